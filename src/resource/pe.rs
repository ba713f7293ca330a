//! The PE `.rsrc` three-level tree backing.

use log::debug;
use scroll::{Pread, Pwrite, SizeWith};

use crate::diag::{Code, Diagnostics, Severity};
use crate::resource::{FormatOrigin, ResourceEntry};

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub(crate) struct ImageResourceDirectory {
    pub characteristics: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub number_of_named_entries: u16,
    pub number_of_id_entries: u16,
}

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub(crate) struct ImageResourceDirectoryEntry {
    /// High bit: string name (offset) vs integer id
    pub name_or_id: u32,
    /// High bit: subdirectory vs data entry
    pub offset_to_data_or_directory: u32,
}

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub(crate) struct ImageResourceDataEntry {
    /// An RVA despite the name
    pub offset_to_data: u32,
    pub size: u32,
    pub code_page: u32,
    pub reserved: u32,
}

const HIGH_BIT: u32 = 0x8000_0000;
const OFFSET_MASK: u32 = 0x7fff_ffff;
const SIZEOF_DIRECTORY: usize = 16;
const SIZEOF_ENTRY: usize = 8;

/// What a level-2 node is keyed by while we descend to its languages.
#[derive(Clone, Default)]
struct PathContext {
    type_id: u16,
    id: Option<u16>,
    name: Option<String>,
}

/// Walk the tree from its root, returning the root timestamp and the
/// flattened leaves.
pub(crate) fn parse_tree<'a>(
    rsrc: &'a [u8],
    rsrc_rva: u32,
    diagnostics: &mut Diagnostics,
) -> (u32, Vec<ResourceEntry<'a>>) {
    let mut entries = Vec::new();
    let timestamp = rsrc
        .pread_with::<ImageResourceDirectory>(0, scroll::LE)
        .map(|dir| dir.time_date_stamp)
        .unwrap_or(0);
    walk(
        rsrc,
        rsrc_rva,
        0,
        1,
        PathContext::default(),
        &mut entries,
        diagnostics,
    );
    (timestamp, entries)
}

fn walk<'a>(
    rsrc: &'a [u8],
    rsrc_rva: u32,
    dir_offset: usize,
    level: u8,
    context: PathContext,
    out: &mut Vec<ResourceEntry<'a>>,
    diagnostics: &mut Diagnostics,
) {
    if dir_offset + SIZEOF_DIRECTORY > rsrc.len() {
        diagnostics.push(
            Code::TruncatedFile,
            Severity::Error,
            dir_offset as u64,
            rsrc_rva,
            "resource directory node extends past the resource data",
        );
        return;
    }
    let Ok(dir) = rsrc.pread_with::<ImageResourceDirectory>(dir_offset, scroll::LE) else {
        return;
    };
    let total = dir.number_of_named_entries as usize + dir.number_of_id_entries as usize;
    debug!(
        "rsrc dir at {:#x}, level {}, {} entries",
        dir_offset, level, total
    );

    let mut entry_offset = dir_offset + SIZEOF_DIRECTORY;
    for _ in 0..total {
        if entry_offset + SIZEOF_ENTRY > rsrc.len() {
            diagnostics.push(
                Code::TruncatedFile,
                Severity::Error,
                entry_offset as u64,
                rsrc_rva,
                "resource directory entry extends past the resource data",
            );
            break;
        }
        let Ok(entry) = rsrc.pread_with::<ImageResourceDirectoryEntry>(entry_offset, scroll::LE)
        else {
            break;
        };
        entry_offset += SIZEOF_ENTRY;

        let is_named = entry.name_or_id & HIGH_BIT != 0;
        let name_offset = (entry.name_or_id & OFFSET_MASK) as usize;
        let entry_id = (entry.name_or_id & 0xffff) as u16;
        let is_subdirectory = entry.offset_to_data_or_directory & HIGH_BIT != 0;
        let target = (entry.offset_to_data_or_directory & OFFSET_MASK) as usize;

        let mut next = context.clone();
        match level {
            1 => next.type_id = entry_id,
            2 => {
                if is_named {
                    next.name = read_name(rsrc, name_offset);
                    next.id = None;
                } else {
                    next.id = Some(entry_id);
                }
            }
            _ => {}
        }

        if is_subdirectory {
            // never descend past the language level
            if level < 3 {
                walk(rsrc, rsrc_rva, target, level + 1, next, out, diagnostics);
            }
        } else if level == 3 {
            if let Some((data, codepage)) = read_data(rsrc, rsrc_rva, target) {
                out.push(ResourceEntry {
                    type_id: next.type_id,
                    id: next.id,
                    name: next.name,
                    language: entry_id,
                    codepage,
                    data,
                    origin: FormatOrigin::Pe,
                });
            } else {
                diagnostics.push(
                    Code::TruncatedFile,
                    Severity::Error,
                    target as u64,
                    rsrc_rva,
                    "resource data entry points outside the resource data",
                );
            }
        }
    }
}

/// Names are `(len: u16, utf16le chars)` at an offset inside the resource
/// data.
fn read_name(rsrc: &[u8], offset: usize) -> Option<String> {
    let len: u16 = rsrc.pread_with(offset, scroll::LE).ok()?;
    let start = offset + 2;
    let end = start.checked_add(len as usize * 2)?;
    if end > rsrc.len() {
        return None;
    }
    let units: Vec<u16> = rsrc[start..end]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Some(String::from_utf16_lossy(&units))
}

fn read_data(rsrc: &[u8], rsrc_rva: u32, entry_offset: usize) -> Option<(&[u8], u32)> {
    let data_entry: ImageResourceDataEntry = rsrc.pread_with(entry_offset, scroll::LE).ok()?;
    // the data RVA is image-relative; rebase against the section
    let start = data_entry.offset_to_data.checked_sub(rsrc_rva)? as usize;
    let end = start.checked_add(data_entry.size as usize)?;
    if end > rsrc.len() {
        return None;
    }
    Some((&rsrc[start..end], data_entry.code_page))
}
