//! The import directory: which symbols this binary pulls from which DLLs.

use log::debug;
use scroll::{Pread, Pwrite, SizeWith};

use crate::diag::{Code, Diagnostics, Severity};
use crate::pe::data_directories;
use crate::pe::section_table;
use crate::pe::utils;
use crate::tools;

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct ImportDirectoryEntry {
    pub import_lookup_table_rva: u32,
    pub time_date_stamp: u32,
    pub forwarder_chain: u32,
    pub name_rva: u32,
    pub import_address_table_rva: u32,
}

pub const SIZEOF_IMPORT_DIRECTORY_ENTRY: usize = 20;

impl ImportDirectoryEntry {
    pub fn is_null(&self) -> bool {
        self.import_lookup_table_rva == 0
            && self.time_date_stamp == 0
            && self.forwarder_chain == 0
            && self.name_rva == 0
            && self.import_address_table_rva == 0
    }
}

/// Ordinal flag for a 32-bit thunk
pub const IMPORT_BY_ORDINAL_32: u32 = 0x8000_0000;
/// Ordinal flag for a 64-bit thunk
pub const IMPORT_BY_ORDINAL_64: u64 = 0x8000_0000_0000_0000;

/// A single imported symbol.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImportFunction {
    /// Import-by-name hint, when imported by name
    pub hint: Option<u16>,
    /// Symbol name, when imported by name
    pub name: Option<String>,
    /// Ordinal, when imported by ordinal
    pub ordinal: Option<u16>,
    pub is_ordinal: bool,
    /// Index of this function's IAT slot within its DLL's IAT
    pub iat_index: usize,
}

/// One imported DLL with its ordered functions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImportDll {
    pub name: String,
    pub descriptor: ImportDirectoryEntry,
    pub functions: Vec<ImportFunction>,
}

/// Walk the null-terminated descriptor array and both thunk arrays.
pub fn parse(
    bytes: &[u8],
    sections: &[section_table::SectionTable],
    size_of_headers: usize,
    dd: data_directories::DataDirectory,
    is_64: bool,
    diagnostics: &mut Diagnostics,
) -> Vec<ImportDll> {
    let mut dlls = Vec::new();
    let Some(mut offset) = utils::find_offset(dd.virtual_address as usize, sections, size_of_headers)
    else {
        diagnostics.push(
            Code::ImpTruncated,
            Severity::Error,
            0,
            dd.virtual_address,
            "import directory RVA maps to no section",
        );
        return dlls;
    };

    for _ in 0..tools::MAX_TABLE_ENTRIES {
        let Ok(descriptor) = bytes.gread_with::<ImportDirectoryEntry>(&mut offset, scroll::LE)
        else {
            diagnostics.push(
                Code::ImpTruncated,
                Severity::Error,
                offset as u64,
                0,
                "import descriptor array runs off the end of the file",
            );
            break;
        };
        if descriptor.is_null() {
            break;
        }

        let name = match utils::read_cstr_at_rva(
            bytes,
            sections,
            size_of_headers,
            descriptor.name_rva as usize,
        ) {
            Some(name) => name,
            None => {
                diagnostics.push(
                    Code::ImpMissingDll,
                    Severity::Anomaly,
                    0,
                    descriptor.name_rva,
                    "import descriptor DLL name RVA maps to no section",
                );
                continue;
            }
        };
        if !tools::is_printable(&name) {
            diagnostics.push(
                Code::ImpBinaryName,
                Severity::Warning,
                0,
                descriptor.name_rva,
                format!("import DLL name contains non-printable bytes: {:?}", name),
            );
        }
        debug!("import dll: {}", name);

        // bound imports overwrite the lookup table; fall back to the IAT
        let thunks_rva = if descriptor.import_lookup_table_rva != 0 {
            descriptor.import_lookup_table_rva
        } else {
            descriptor.import_address_table_rva
        };
        let functions = parse_thunks(bytes, sections, size_of_headers, thunks_rva, 0, is_64, diagnostics);
        if functions.is_empty() {
            diagnostics.push(
                Code::ImpEmptyIat,
                Severity::Warning,
                0,
                descriptor.import_address_table_rva,
                format!("DLL {} declares no imported functions", name),
            );
        }
        dlls.push(ImportDll {
            name,
            descriptor,
            functions,
        });
    }
    dlls
}

/// Walk a delay-load name table, rebasing VA-encoded thunks when the
/// descriptor predates the RVA encoding.
pub(crate) fn parse_name_table_thunks(
    bytes: &[u8],
    sections: &[section_table::SectionTable],
    size_of_headers: usize,
    table_rva: u32,
    image_base: u64,
    rva_based: bool,
    is_64: bool,
    diagnostics: &mut Diagnostics,
) -> Vec<ImportFunction> {
    let rebase = if rva_based { 0 } else { image_base };
    parse_thunks(bytes, sections, size_of_headers, table_rva, rebase, is_64, diagnostics)
}

fn parse_thunks(
    bytes: &[u8],
    sections: &[section_table::SectionTable],
    size_of_headers: usize,
    table_rva: u32,
    rebase: u64,
    is_64: bool,
    diagnostics: &mut Diagnostics,
) -> Vec<ImportFunction> {
    let mut functions = Vec::new();
    let Some(mut offset) = utils::find_offset(table_rva as usize, sections, size_of_headers) else {
        return functions;
    };

    for iat_index in 0..tools::MAX_TABLE_ENTRIES {
        let thunk: u64 = if is_64 {
            match bytes.gread_with::<u64>(&mut offset, scroll::LE) {
                Ok(thunk) => thunk,
                Err(_) => {
                    diagnostics.push(
                        Code::ImpTruncated,
                        Severity::Error,
                        offset as u64,
                        0,
                        "import thunk array truncated without a null terminator",
                    );
                    break;
                }
            }
        } else {
            match bytes.gread_with::<u32>(&mut offset, scroll::LE) {
                Ok(thunk) => thunk as u64,
                Err(_) => {
                    diagnostics.push(
                        Code::ImpTruncated,
                        Severity::Error,
                        offset as u64,
                        0,
                        "import thunk array truncated without a null terminator",
                    );
                    break;
                }
            }
        };
        if thunk == 0 {
            break;
        }

        let by_ordinal = if is_64 {
            thunk & IMPORT_BY_ORDINAL_64 != 0
        } else {
            thunk & IMPORT_BY_ORDINAL_32 as u64 != 0
        };
        if by_ordinal {
            functions.push(ImportFunction {
                ordinal: Some((thunk & 0xffff) as u16),
                is_ordinal: true,
                iat_index,
                ..Default::default()
            });
            continue;
        }

        let hint_name_rva = (thunk & 0x7fff_ffff).saturating_sub(rebase) as usize;
        let Some(hint_offset) = utils::find_offset(hint_name_rva, sections, size_of_headers) else {
            diagnostics.push(
                Code::ImpTruncated,
                Severity::Error,
                0,
                hint_name_rva as u32,
                "import hint/name RVA maps to no section",
            );
            continue;
        };
        let hint: u16 = bytes.pread_with(hint_offset, scroll::LE).unwrap_or(0);
        let name = tools::read_cstr_at(bytes, hint_offset + 2, tools::MAX_CSTR);
        if let Some(ref name) = name {
            if !tools::is_printable(name) {
                diagnostics.push(
                    Code::ImpBinaryName,
                    Severity::Warning,
                    hint_offset as u64,
                    hint_name_rva as u32,
                    format!("import name contains non-printable bytes: {:?}", name),
                );
            }
        }
        functions.push(ImportFunction {
            hint: Some(hint),
            name,
            is_ordinal: false,
            iat_index,
            ..Default::default()
        });
    }
    functions
}
