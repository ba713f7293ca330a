//! The debug directory and the CodeView records it points at.

use scroll::{Pread, Pwrite, SizeWith};

use crate::pe::data_directories;
use crate::pe::section_table;
use crate::pe::utils;
use crate::tools;

pub const IMAGE_DEBUG_TYPE_UNKNOWN: u32 = 0;
pub const IMAGE_DEBUG_TYPE_COFF: u32 = 1;
pub const IMAGE_DEBUG_TYPE_CODEVIEW: u32 = 2;
pub const IMAGE_DEBUG_TYPE_FPO: u32 = 3;
pub const IMAGE_DEBUG_TYPE_MISC: u32 = 4;
pub const IMAGE_DEBUG_TYPE_VC_FEATURE: u32 = 12;
pub const IMAGE_DEBUG_TYPE_POGO: u32 = 13;
pub const IMAGE_DEBUG_TYPE_REPRO: u32 = 16;

pub const SIZEOF_DEBUG_DIRECTORY_ENTRY: usize = 28;

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct ImageDebugDirectory {
    pub characteristics: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub data_type: u32,
    pub size_of_data: u32,
    pub address_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
}

/// CodeView PDB 7.0 (`RSDS`) record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CodeviewPdb70 {
    pub signature: [u8; 16],
    pub age: u32,
    pub path: String,
}

/// One debug directory entry with its decoded payload, when recognised.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DebugEntry {
    pub directory: ImageDebugDirectory,
    pub codeview_pdb70: Option<CodeviewPdb70>,
}

pub fn parse(
    bytes: &[u8],
    sections: &[section_table::SectionTable],
    size_of_headers: usize,
    dd: data_directories::DataDirectory,
) -> Vec<DebugEntry> {
    let mut entries = Vec::new();
    let Some(mut offset) = utils::find_offset(dd.virtual_address as usize, sections, size_of_headers)
    else {
        return entries;
    };

    let count = (dd.size as usize / SIZEOF_DEBUG_DIRECTORY_ENTRY).min(tools::MAX_TABLE_ENTRIES);
    for _ in 0..count {
        let Ok(directory) = bytes.gread_with::<ImageDebugDirectory>(&mut offset, scroll::LE)
        else {
            break;
        };
        let codeview_pdb70 = (directory.data_type == IMAGE_DEBUG_TYPE_CODEVIEW)
            .then(|| parse_codeview(bytes, &directory))
            .flatten();
        entries.push(DebugEntry {
            directory,
            codeview_pdb70,
        });
    }
    entries
}

fn parse_codeview(bytes: &[u8], directory: &ImageDebugDirectory) -> Option<CodeviewPdb70> {
    let offset = directory.pointer_to_raw_data as usize;
    if offset + 24 > bytes.len() {
        return None;
    }
    if &bytes[offset..offset + 4] != b"RSDS" {
        return None;
    }
    let mut signature = [0u8; 16];
    signature.copy_from_slice(&bytes[offset + 4..offset + 20]);
    let age: u32 = bytes.pread_with(offset + 20, scroll::LE).ok()?;
    let path = tools::read_cstr_at(bytes, offset + 24, tools::MAX_CSTR)?;
    Some(CodeviewPdb70 {
        signature,
        age,
        path,
    })
}
