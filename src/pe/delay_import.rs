//! The delay-load import directory.

use scroll::{Pread, Pwrite, SizeWith};

use crate::diag::{Code, Diagnostics, Severity};
use crate::pe::data_directories;
use crate::pe::import::{self, ImportFunction};
use crate::pe::section_table;
use crate::pe::utils;
use crate::tools;

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct DelayImportDescriptor {
    pub attributes: u32,
    pub name_rva: u32,
    pub module_handle_rva: u32,
    pub import_address_table_rva: u32,
    pub import_name_table_rva: u32,
    pub bound_import_address_table_rva: u32,
    pub unload_information_table_rva: u32,
    pub time_date_stamp: u32,
}

pub const SIZEOF_DELAY_IMPORT_DESCRIPTOR: usize = 32;

impl DelayImportDescriptor {
    pub fn is_null(&self) -> bool {
        self.attributes == 0
            && self.name_rva == 0
            && self.import_address_table_rva == 0
            && self.import_name_table_rva == 0
    }

    /// Bit 0 set means the RVA fields really are RVAs; clear means the
    /// legacy VA encoding (VC6).
    pub fn rva_based(&self) -> bool {
        self.attributes & 1 != 0
    }
}

/// One delay-loaded DLL and the functions bound through it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DelayImportDll {
    pub name: String,
    pub descriptor: DelayImportDescriptor,
    pub functions: Vec<ImportFunction>,
}

pub fn parse(
    bytes: &[u8],
    sections: &[section_table::SectionTable],
    size_of_headers: usize,
    dd: data_directories::DataDirectory,
    image_base: u64,
    is_64: bool,
    diagnostics: &mut Diagnostics,
) -> Vec<DelayImportDll> {
    let mut dlls = Vec::new();
    let Some(mut offset) = utils::find_offset(dd.virtual_address as usize, sections, size_of_headers)
    else {
        return dlls;
    };

    for _ in 0..tools::MAX_TABLE_ENTRIES {
        let Ok(descriptor) = bytes.gread_with::<DelayImportDescriptor>(&mut offset, scroll::LE)
        else {
            diagnostics.push(
                Code::ImpTruncated,
                Severity::Error,
                offset as u64,
                0,
                "delay import descriptor array runs off the end of the file",
            );
            break;
        };
        if descriptor.is_null() {
            break;
        }

        // VC6-era descriptors store VAs; rebase them
        let fix = |field: u32| -> u32 {
            if descriptor.rva_based() {
                field
            } else {
                (field as u64).saturating_sub(image_base) as u32
            }
        };
        let name = utils::read_cstr_at_rva(
            bytes,
            sections,
            size_of_headers,
            fix(descriptor.name_rva) as usize,
        )
        .unwrap_or_default();
        if name.is_empty() {
            diagnostics.push(
                Code::ImpMissingDll,
                Severity::Anomaly,
                0,
                descriptor.name_rva,
                "delay import descriptor has no readable DLL name",
            );
        }

        let functions = import::parse_name_table_thunks(
            bytes,
            sections,
            size_of_headers,
            fix(descriptor.import_name_table_rva),
            image_base,
            descriptor.rva_based(),
            is_64,
            diagnostics,
        );
        dlls.push(DelayImportDll {
            name,
            descriptor,
            functions,
        });
    }
    dlls
}
