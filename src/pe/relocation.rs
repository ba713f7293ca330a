//! The base relocation directory.

use scroll::Pread;

use crate::diag::{Code, Diagnostics, Severity};
use crate::pe::data_directories;
use crate::pe::section_table;
use crate::pe::utils;

pub const IMAGE_REL_BASED_ABSOLUTE: u16 = 0;
pub const IMAGE_REL_BASED_HIGH: u16 = 1;
pub const IMAGE_REL_BASED_LOW: u16 = 2;
pub const IMAGE_REL_BASED_HIGHLOW: u16 = 3;
pub const IMAGE_REL_BASED_HIGHADJ: u16 = 4;
pub const IMAGE_REL_BASED_DIR64: u16 = 10;

/// One `(type:4 | offset:12)` relocation.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct BaseRelocEntry {
    pub reloc_type: u16,
    /// Offset within the block's page
    pub offset: u16,
}

impl BaseRelocEntry {
    /// Types 1, 2, 4, 5 and 9 are legal but effectively extinct; their
    /// presence is a known obfuscation trick.
    pub fn is_unusual(self) -> bool {
        matches!(self.reloc_type, 1 | 2 | 4 | 5 | 9)
    }

    /// Type 8 and anything above 10 is not defined at all.
    pub fn is_invalid(self) -> bool {
        self.reloc_type == 8 || self.reloc_type > 10
    }
}

/// One relocation block covering a 4 KiB page.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseRelocBlock {
    pub page_rva: u32,
    pub block_size: u32,
    pub entries: Vec<BaseRelocEntry>,
}

/// Walk variable-size blocks until the declared directory size is consumed.
/// A zero `block_size` is malformed and stops traversal with a diagnostic.
pub fn parse(
    bytes: &[u8],
    sections: &[section_table::SectionTable],
    size_of_headers: usize,
    dd: data_directories::DataDirectory,
    diagnostics: &mut Diagnostics,
) -> Vec<BaseRelocBlock> {
    let mut blocks = Vec::new();
    let Some(base) = utils::find_offset(dd.virtual_address as usize, sections, size_of_headers)
    else {
        diagnostics.push(
            Code::RelocInvalidType,
            Severity::Error,
            0,
            dd.virtual_address,
            "relocation directory RVA maps to no section",
        );
        return blocks;
    };

    let mut offset = base;
    let end = base.saturating_add(dd.size as usize);
    while offset + 8 <= end {
        let block_offset = offset;
        let Ok(page_rva) = bytes.gread_with::<u32>(&mut offset, scroll::LE) else {
            break;
        };
        let Ok(block_size) = bytes.gread_with::<u32>(&mut offset, scroll::LE) else {
            break;
        };
        if block_size == 0 {
            diagnostics.push(
                Code::RelocInvalidType,
                Severity::Error,
                block_offset as u64,
                page_rva,
                "relocation block declares SizeOfBlock 0; directory traversal stopped",
            );
            break;
        }
        if block_size < 8 {
            diagnostics.push(
                Code::RelocInvalidType,
                Severity::Error,
                block_offset as u64,
                page_rva,
                format!("relocation block SizeOfBlock {} is smaller than its header", block_size),
            );
            break;
        }

        let mut count = (block_size as usize - 8) / 2;
        if count > (end - offset) / 2 {
            diagnostics.push(
                Code::RelocInvalidType,
                Severity::Anomaly,
                block_offset as u64,
                page_rva,
                format!(
                    "relocation block SizeOfBlock {:#x} overruns the directory; clamped",
                    block_size
                ),
            );
            count = (end - offset) / 2;
        }
        let mut entries = Vec::with_capacity(count.min(0x1000));
        for _ in 0..count {
            let Ok(raw) = bytes.gread_with::<u16>(&mut offset, scroll::LE) else {
                diagnostics.push(
                    Code::RelocInvalidType,
                    Severity::Error,
                    offset as u64,
                    page_rva,
                    "relocation block truncated by end of file",
                );
                break;
            };
            let entry = BaseRelocEntry {
                reloc_type: raw >> 12,
                offset: raw & 0x0fff,
            };
            if entry.is_invalid() {
                diagnostics.push(
                    Code::RelocInvalidType,
                    Severity::Anomaly,
                    block_offset as u64,
                    page_rva + entry.offset as u32,
                    format!("relocation type {} is not defined", entry.reloc_type),
                );
            } else if entry.is_unusual() {
                diagnostics.push(
                    Code::RelocUnusualType,
                    Severity::Warning,
                    block_offset as u64,
                    page_rva + entry.offset as u32,
                    format!("relocation type {} is rare outside obfuscated binaries", entry.reloc_type),
                );
            }
            if entry.reloc_type != IMAGE_REL_BASED_ABSOLUTE
                && (page_rva as usize + entry.offset as usize) < size_of_headers
            {
                diagnostics.push(
                    Code::RelocHeaderTarget,
                    Severity::Warning,
                    block_offset as u64,
                    page_rva + entry.offset as u32,
                    "relocation targets the header region",
                );
            }
            entries.push(entry);
        }
        if entries.len() > 2048 {
            diagnostics.push(
                Code::RelocHighDensity,
                Severity::Info,
                block_offset as u64,
                page_rva,
                format!("{} relocations in a single page block", entries.len()),
            );
        }
        blocks.push(BaseRelocBlock {
            page_rva,
            block_size,
            entries,
        });
    }
    blocks
}
