//! The bound import directory.
//!
//! Bound imports record which DLL builds the IAT was pre-resolved against.
//! Name offsets here are relative to the start of the bound import table,
//! which itself lives in the header region.

use scroll::{Pread, Pwrite, SizeWith};

use crate::diag::{Code, Diagnostics, Severity};
use crate::pe::data_directories;
use crate::pe::section_table;
use crate::pe::utils;
use crate::tools;

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct BoundImportDescriptor {
    pub time_date_stamp: u32,
    pub offset_module_name: u16,
    pub number_of_module_forwarder_refs: u16,
}

pub const SIZEOF_BOUND_IMPORT_DESCRIPTOR: usize = 8;

/// One forwarder DLL a bound import depends on.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoundForwarderRef {
    pub time_date_stamp: u32,
    pub name: String,
}

/// One bound DLL with the timestamp its binding is valid for.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoundImport {
    pub time_date_stamp: u32,
    pub name: String,
    pub forwarders: Vec<BoundForwarderRef>,
}

pub fn parse(
    bytes: &[u8],
    sections: &[section_table::SectionTable],
    size_of_headers: usize,
    dd: data_directories::DataDirectory,
    diagnostics: &mut Diagnostics,
) -> Vec<BoundImport> {
    let mut imports = Vec::new();
    let Some(table_start) =
        utils::find_offset(dd.virtual_address as usize, sections, size_of_headers)
    else {
        return imports;
    };
    let mut offset = table_start;

    for _ in 0..tools::MAX_TABLE_ENTRIES {
        let Ok(descriptor) = bytes.gread_with::<BoundImportDescriptor>(&mut offset, scroll::LE)
        else {
            diagnostics.push(
                Code::ImpTruncated,
                Severity::Error,
                offset as u64,
                0,
                "bound import table runs off the end of the file",
            );
            break;
        };
        if descriptor.time_date_stamp == 0 && descriptor.offset_module_name == 0 {
            break;
        }
        let name = tools::read_cstr_at(
            bytes,
            table_start + descriptor.offset_module_name as usize,
            tools::MAX_CSTR,
        )
        .unwrap_or_default();

        let mut forwarders = Vec::new();
        for _ in 0..descriptor.number_of_module_forwarder_refs {
            let Ok(fwd) = bytes.gread_with::<BoundImportDescriptor>(&mut offset, scroll::LE)
            else {
                break;
            };
            forwarders.push(BoundForwarderRef {
                time_date_stamp: fwd.time_date_stamp,
                name: tools::read_cstr_at(
                    bytes,
                    table_start + fwd.offset_module_name as usize,
                    tools::MAX_CSTR,
                )
                .unwrap_or_default(),
            });
        }
        imports.push(BoundImport {
            time_date_stamp: descriptor.time_date_stamp,
            name,
            forwarders,
        });
    }
    imports
}
