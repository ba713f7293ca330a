//! The resource directory, uniform across its three on-disk shapes.
//!
//! PE stores resources as a three-level tree (type → name/id → language);
//! Windows NE stores a flat two-level table; OS/2 NE stores a compact pair
//! list whose data lives in the segment table. All three parse into the
//! same flat [`ResourceEntry`] collection behind one lookup interface, so
//! consumers never care which container the file used.

use scroll::Pread;

pub mod accelerator;
pub mod bitmap;
pub mod dialog;
pub mod font;
pub mod group;
pub mod manifest;
pub mod menu;
pub mod message_table;
mod ne;
mod pe;
pub mod strings;
pub mod version;

use crate::diag::Diagnostics;
use crate::ne::NeSegment;
use crate::pe::{data_directories, section_table, utils};

/// Windows resource type identifier for cursors.
pub const RT_CURSOR: u16 = 1;
/// Windows resource type identifier for bitmaps.
pub const RT_BITMAP: u16 = 2;
/// Windows resource type identifier for icons.
pub const RT_ICON: u16 = 3;
/// Windows resource type identifier for menus.
pub const RT_MENU: u16 = 4;
/// Windows resource type identifier for dialog boxes.
pub const RT_DIALOG: u16 = 5;
/// Windows resource type identifier for string tables.
pub const RT_STRING: u16 = 6;
/// Windows resource type identifier for font directories.
pub const RT_FONTDIR: u16 = 7;
/// Windows resource type identifier for fonts.
pub const RT_FONT: u16 = 8;
/// Windows resource type identifier for accelerators.
pub const RT_ACCELERATOR: u16 = 9;
/// Windows resource type identifier for raw data.
pub const RT_RCDATA: u16 = 10;
/// Windows resource type identifier for message tables.
pub const RT_MESSAGETABLE: u16 = 11;
/// Windows resource type identifier for group cursors.
pub const RT_GROUP_CURSOR: u16 = 12;
/// Windows resource type identifier for group icons.
pub const RT_GROUP_ICON: u16 = 14;
/// Windows resource type identifier for version information.
pub const RT_VERSION: u16 = 16;
/// Windows resource type identifier for manifests.
pub const RT_MANIFEST: u16 = 24;

/// Which container family a resource came out of; selects the string
/// encoding its leaf parsers use (UTF-16LE for PE, ANSI for NE).
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum FormatOrigin {
    Pe,
    Ne,
}

/// One typed resource leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEntry<'a> {
    pub type_id: u16,
    /// Integer id, when the name field's high bit said "integer"
    pub id: Option<u16>,
    /// String name, when present
    pub name: Option<String>,
    pub language: u16,
    pub codepage: u32,
    pub data: &'a [u8],
    pub origin: FormatOrigin,
}

impl<'a> ResourceEntry<'a> {
    pub fn version_info(&self) -> Option<version::VersionInfo> {
        version::parse(self.data)
    }

    pub fn dialog(&self) -> Option<dialog::DialogTemplate> {
        dialog::parse(self.data)
    }

    pub fn menu(&self) -> Option<menu::MenuTemplate> {
        menu::parse(self.data, self.origin)
    }

    pub fn string_table(&self) -> Option<strings::StringTableBlock> {
        strings::parse(self.data, self.id.unwrap_or(0))
    }

    pub fn accelerators(&self) -> Option<Vec<accelerator::Accelerator>> {
        accelerator::parse(self.data)
    }

    pub fn message_table(&self) -> Option<message_table::MessageTable> {
        message_table::parse(self.data)
    }

    pub fn icon_group(&self) -> Option<group::IconGroup> {
        group::parse(self.data)
    }

    pub fn bitmap(&self) -> Option<bitmap::Bitmap<'a>> {
        bitmap::parse(self.data)
    }

    pub fn manifest(&self) -> Option<manifest::Manifest<'a>> {
        manifest::parse(self.data)
    }

    pub fn font(&self) -> Option<font::FontData> {
        font::parse(self.data)
    }
}

/// A parsed resource directory of either backing.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDirectory<'a> {
    pub origin: FormatOrigin,
    /// The root directory's timestamp (PE only; zero for NE)
    pub timestamp: u32,
    entries: Vec<ResourceEntry<'a>>,
}

impl<'a> ResourceDirectory<'a> {
    /// Parse a PE `.rsrc` tree.
    pub fn parse_pe(
        bytes: &'a [u8],
        sections: &[section_table::SectionTable],
        size_of_headers: usize,
        dd: data_directories::DataDirectory,
        diagnostics: &mut Diagnostics,
    ) -> Option<ResourceDirectory<'a>> {
        let offset = utils::find_offset(dd.virtual_address as usize, sections, size_of_headers)?;
        let end = offset.saturating_add(dd.size as usize).min(bytes.len());
        if offset >= end {
            return None;
        }
        let rsrc = &bytes[offset..end];
        let (timestamp, entries) = pe::parse_tree(rsrc, dd.virtual_address, diagnostics);
        Some(ResourceDirectory {
            origin: FormatOrigin::Pe,
            timestamp,
            entries,
        })
    }

    /// Parse a Windows NE resource table.
    pub fn parse_ne(
        table: &'a [u8],
        file: &'a [u8],
        diagnostics: &mut Diagnostics,
    ) -> ResourceDirectory<'a> {
        ResourceDirectory {
            origin: FormatOrigin::Ne,
            timestamp: 0,
            entries: ne::parse_windows_table(table, file, diagnostics),
        }
    }

    /// Parse an OS/2 NE compact resource table. The Nth pair's data is the
    /// Nth data segment; this form is selected by the NE target-OS field,
    /// never guessed.
    pub fn parse_ne_os2(
        table: &'a [u8],
        file: &'a [u8],
        segments: &[NeSegment],
        diagnostics: &mut Diagnostics,
    ) -> ResourceDirectory<'a> {
        ResourceDirectory {
            origin: FormatOrigin::Ne,
            timestamp: 0,
            entries: ne::parse_os2_table(table, file, segments, diagnostics),
        }
    }

    /// The distinct type ids present, sorted.
    pub fn types(&self) -> Vec<u16> {
        let mut types: Vec<u16> = self.entries.iter().map(|e| e.type_id).collect();
        types.sort_unstable();
        types.dedup();
        types
    }

    /// All resources of one type, in directory order.
    pub fn resources_by_type(&self, type_id: u16) -> Vec<&ResourceEntry<'a>> {
        self.entries.iter().filter(|e| e.type_id == type_id).collect()
    }

    /// The first resource matching type and integer id.
    pub fn find(&self, type_id: u16, id: u16) -> Option<&ResourceEntry<'a>> {
        self.entries
            .iter()
            .find(|e| e.type_id == type_id && e.id == Some(id))
    }

    /// As [`Self::find`], constrained to one language.
    pub fn find_with_language(
        &self,
        type_id: u16,
        id: u16,
        language: u16,
    ) -> Option<&ResourceEntry<'a>> {
        self.entries
            .iter()
            .find(|e| e.type_id == type_id && e.id == Some(id) && e.language == language)
    }

    /// The first resource matching type and string name.
    pub fn find_by_name(&self, type_id: u16, name: &str) -> Option<&ResourceEntry<'a>> {
        self.entries
            .iter()
            .find(|e| e.type_id == type_id && e.name.as_deref() == Some(name))
    }

    /// Every language variant of one resource.
    pub fn all_languages(&self, type_id: u16, id: u16) -> Vec<&ResourceEntry<'a>> {
        self.entries
            .iter()
            .filter(|e| e.type_id == type_id && e.id == Some(id))
            .collect()
    }

    pub fn entries(&self) -> &[ResourceEntry<'a>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decode a NUL-terminated UTF-16LE string from `bytes`.
pub(crate) fn utf16_string(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// Read a NUL-terminated UTF-16LE string, advancing `offset` past the
/// terminator.
pub(crate) fn read_utf16_cstr(bytes: &[u8], offset: &mut usize) -> Option<String> {
    let mut units = Vec::new();
    loop {
        let unit: u16 = bytes.pread_with(*offset, scroll::LE).ok()?;
        *offset += 2;
        if unit == 0 {
            break;
        }
        units.push(unit);
    }
    Some(String::from_utf16_lossy(&units))
}

/// Read a NUL-terminated ANSI string, advancing `offset` past the
/// terminator.
pub(crate) fn read_ansi_cstr(bytes: &[u8], offset: &mut usize) -> Option<String> {
    let start = *offset;
    while *offset < bytes.len() && bytes[*offset] != 0 {
        *offset += 1;
    }
    let value = String::from_utf8_lossy(&bytes[start..*offset]).into_owned();
    if *offset < bytes.len() {
        *offset += 1;
    }
    Some(value)
}

#[inline]
pub(crate) fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
