//! The NE resource table backings: the flat Windows form and the OS/2
//! compact form.

use scroll::{Pread, Pwrite, SizeWith};

use crate::diag::{Code, Diagnostics, Severity};
use crate::ne::NeSegment;
use crate::resource::{FormatOrigin, ResourceEntry};

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
struct TypeInfo {
    type_id: u16,
    resource_count: u16,
    reserved: u32,
}

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
struct NameInfo {
    /// File offset in alignment-shift units
    offset: u16,
    /// Length, also in alignment-shift units (undocumented but observed)
    length: u16,
    flags: u16,
    id: u16,
    handle: u16,
    usage: u16,
}

/// The Windows NE form: an alignment-shift word, then per-type blocks of
/// 12-byte name-info records, terminated by a zero type id.
pub(crate) fn parse_windows_table<'a>(
    table: &'a [u8],
    file: &'a [u8],
    diagnostics: &mut Diagnostics,
) -> Vec<ResourceEntry<'a>> {
    let mut entries = Vec::new();
    let mut offset = 0usize;
    let Ok(alignment_shift) = table.gread_with::<u16>(&mut offset, scroll::LE) else {
        return entries;
    };

    loop {
        let Ok(type_info) = table.gread_with::<TypeInfo>(&mut offset, scroll::LE) else {
            diagnostics.push(
                Code::TruncatedFile,
                Severity::Error,
                offset as u64,
                0,
                "NE resource type block extends past the resource table",
            );
            break;
        };
        if type_info.type_id == 0 {
            break;
        }
        let is_integer_type = type_info.type_id & 0x8000 != 0;
        let type_id = if is_integer_type {
            type_info.type_id & 0x7fff
        } else {
            type_info.type_id
        };

        for _ in 0..type_info.resource_count {
            let Ok(name_info) = table.gread_with::<NameInfo>(&mut offset, scroll::LE) else {
                diagnostics.push(
                    Code::TruncatedFile,
                    Severity::Error,
                    offset as u64,
                    0,
                    "NE resource entry extends past the resource table",
                );
                return entries;
            };

            let (id, name) = if name_info.id & 0x8000 != 0 {
                (Some(name_info.id & 0x7fff), None)
            } else {
                // string offset, relative to the start of the resource table
                (None, read_table_string(table, name_info.id as usize))
            };

            // both the offset and, empirically, the length are shifted
            let data_offset = (name_info.offset as usize) << alignment_shift;
            let data_length = (name_info.length as usize) << alignment_shift;
            let data = if data_length != 0 && data_offset + data_length <= file.len() {
                &file[data_offset..data_offset + data_length]
            } else {
                if data_length != 0 {
                    diagnostics.push(
                        Code::TruncatedFile,
                        Severity::Warning,
                        data_offset as u64,
                        0,
                        "NE resource data extends past end of file",
                    );
                }
                &[][..]
            };

            // NE resources carry no language or codepage
            entries.push(ResourceEntry {
                type_id,
                id,
                name,
                language: 0,
                codepage: 0,
                data,
                origin: FormatOrigin::Ne,
            });
        }
    }
    entries
}

/// The OS/2 compact form: an alignment-shift word, then bare
/// `(resource_id, type_id)` pairs; the Nth pair's data is the Nth data
/// segment.
pub(crate) fn parse_os2_table<'a>(
    table: &'a [u8],
    file: &'a [u8],
    segments: &[NeSegment],
    diagnostics: &mut Diagnostics,
) -> Vec<ResourceEntry<'a>> {
    let mut entries = Vec::new();
    let mut offset = 0usize;
    if table.gread_with::<u16>(&mut offset, scroll::LE).is_err() {
        return entries;
    }

    let data_segments: Vec<&NeSegment> = segments.iter().filter(|s| s.is_data()).collect();
    let mut index = 0usize;
    while offset + 4 <= table.len() {
        let Ok(resource_id) = table.gread_with::<u16>(&mut offset, scroll::LE) else {
            break;
        };
        let Ok(type_id) = table.gread_with::<u16>(&mut offset, scroll::LE) else {
            break;
        };

        let data = match data_segments.get(index) {
            Some(segment) => {
                let start = segment.data_offset();
                let end = start + segment.data_length();
                if end <= file.len() {
                    &file[start..end]
                } else {
                    diagnostics.push(
                        Code::TruncatedFile,
                        Severity::Warning,
                        start as u64,
                        0,
                        "OS/2 resource segment extends past end of file",
                    );
                    &[][..]
                }
            }
            None => &[][..],
        };

        entries.push(ResourceEntry {
            type_id,
            id: Some(resource_id),
            name: None,
            language: 0,
            codepage: 0,
            data,
            origin: FormatOrigin::Ne,
        });
        index += 1;
    }
    entries
}

/// NE strings are length-prefixed ANSI, never NUL-terminated.
fn read_table_string(table: &[u8], offset: usize) -> Option<String> {
    let len = *table.get(offset)? as usize;
    let start = offset + 1;
    let end = start.checked_add(len)?;
    (end <= table.len()).then(|| String::from_utf8_lossy(&table[start..end]).into_owned())
}
