//! An LE/LX (linear executable) parser.
//!
//! LE carries DOS-extender programs and Windows VxDs; LX is its OS/2
//! successor. The two differ in exactly one testable way: LX applies a
//! non-zero `page_offset_shift` to page offsets (and uses a wider page
//! record). Everything else — objects, fixups, bundle-encoded entry
//! tables, length-prefixed name tables — is shared, and the entry-bundle
//! encoding is shared further still, with NE.

use log::debug;
use scroll::{Pread, Pwrite, SizeWith};

use crate::diag::{Code, Diagnostics, Severity};
use crate::error;
use crate::mz;
use crate::tools;

/// `LE`, little endian
pub const LE_MAGIC: u16 = 0x454c;
/// `LX`, little endian
pub const LX_MAGIC: u16 = 0x584c;

pub const SIZEOF_LE_HEADER: usize = 0xb0;
pub const SIZEOF_LE_OBJECT: usize = 24;
pub const SIZEOF_LE_RESOURCE: usize = 14;

/// The 176-byte LE/LX header. Table offsets are relative to the header
/// start except the data pages, non-resident name table, and debug info
/// offsets, which are absolute file offsets.
#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct LeHeader {
    pub magic: u16,
    pub byte_order: u8,
    pub word_order: u8,
    pub format_level: u32,
    /// 1 = 286, 2 = 386, 3 = 486
    pub cpu_type: u16,
    /// 1 = OS/2, 2 = Windows, 3 = DOS 4.x, 4 = Windows 386
    pub os_type: u16,
    pub module_version: u32,
    pub module_flags: u32,
    pub page_count: u32,
    pub eip_object: u32,
    pub eip: u32,
    pub esp_object: u32,
    pub esp: u32,
    pub page_size: u32,
    /// LX: shift applied to page offsets; LE: bytes on last page
    pub page_offset_shift: u32,
    pub fixup_section_size: u32,
    pub fixup_section_checksum: u32,
    pub loader_section_size: u32,
    pub loader_section_checksum: u32,
    pub object_table_offset: u32,
    pub object_count: u32,
    pub object_page_table_offset: u32,
    pub object_iter_pages_offset: u32,
    pub resource_table_offset: u32,
    pub resource_count: u32,
    pub resident_name_table_offset: u32,
    pub entry_table_offset: u32,
    pub module_directives_offset: u32,
    pub module_directives_count: u32,
    pub fixup_page_table_offset: u32,
    pub fixup_record_table_offset: u32,
    pub import_module_table_offset: u32,
    pub import_module_count: u32,
    pub import_proc_table_offset: u32,
    pub per_page_checksum_offset: u32,
    /// Absolute file offset of the data pages
    pub data_pages_offset: u32,
    pub preload_page_count: u32,
    /// Absolute file offset of the non-resident name table
    pub nonresident_name_table_offset: u32,
    pub nonresident_name_table_size: u32,
    pub nonresident_name_checksum: u32,
    pub auto_data_object: u32,
    /// Absolute file offset of debug info
    pub debug_info_offset: u32,
    pub debug_info_size: u32,
    pub instance_preload_count: u32,
    pub instance_demand_count: u32,
    pub heap_size: u32,
    pub stack_size: u32,
}

/// An LE/LX object, the analogue of a PE section.
#[derive(Debug, PartialEq, Copy, Clone, Default)]
pub struct LeObject {
    /// 1-based
    pub index: u32,
    pub virtual_size: u32,
    pub base_address: u32,
    pub flags: u32,
    /// 1-based index of the object's first page table entry
    pub page_table_index: u32,
    pub page_count: u32,
}

impl LeObject {
    pub fn is_readable(&self) -> bool {
        self.flags & 0x0001 != 0
    }
    pub fn is_writable(&self) -> bool {
        self.flags & 0x0002 != 0
    }
    pub fn is_executable(&self) -> bool {
        self.flags & 0x0004 != 0
    }
    pub fn is_resource(&self) -> bool {
        self.flags & 0x0008 != 0
    }
    pub fn is_discardable(&self) -> bool {
        self.flags & 0x0010 != 0
    }
    pub fn is_shared(&self) -> bool {
        self.flags & 0x0020 != 0
    }
    pub fn is_preload(&self) -> bool {
        self.flags & 0x0040 != 0
    }
    /// 32-bit addressing (the `BIG` flag).
    pub fn is_32bit(&self) -> bool {
        self.flags & 0x2000 != 0
    }
}

/// The five page states of the page table.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum LePageState {
    Legal,
    Iterated,
    Invalid,
    ZeroFill,
    Compressed,
    Unknown(u16),
}

#[derive(Debug, PartialEq, Copy, Clone, Default)]
pub struct LePageEntry {
    /// 1-based position in the page table
    pub page_number: u32,
    /// Resolved absolute file offset of the page data
    pub file_offset: usize,
    /// LX only; LE pages are always `page_size` long
    pub data_size: u16,
    pub flags: u16,
}

impl LePageEntry {
    pub fn state(&self) -> LePageState {
        match self.flags {
            0x0000 => LePageState::Legal,
            0x0001 => LePageState::Iterated,
            0x0002 => LePageState::Invalid,
            0x0003 => LePageState::ZeroFill,
            0x0005 => LePageState::Compressed,
            other => LePageState::Unknown(other),
        }
    }
}

/// Entry table entry types.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub enum LeEntryType {
    #[default]
    Unused,
    Entry16,
    Gate286,
    Entry32,
    Forwarder,
}

/// One decoded entry table entry.
#[derive(Debug, PartialEq, Copy, Clone, Default)]
pub struct LeEntry {
    /// 1-based
    pub ordinal: u32,
    pub entry_type: LeEntryType,
    pub object: u16,
    pub offset: u32,
    pub flags: u8,
    pub callgate: u16,
    pub module_ordinal: u16,
    pub import_ordinal: u32,
}

impl LeEntry {
    pub fn is_exported(&self) -> bool {
        self.flags & 0x01 != 0
    }
    pub fn is_shared_data(&self) -> bool {
        self.flags & 0x02 != 0
    }
    pub fn param_count(&self) -> u8 {
        (self.flags >> 3) & 0x1f
    }
}

/// Fixup source types: what kind of value is patched.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum LeFixupSourceType {
    Byte,
    Selector16,
    Pointer1616,
    Offset16,
    Pointer1632,
    Offset32,
    Relative32,
    Unknown(u8),
}

impl From<u8> for LeFixupSourceType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => LeFixupSourceType::Byte,
            0x02 => LeFixupSourceType::Selector16,
            0x03 => LeFixupSourceType::Pointer1616,
            0x05 => LeFixupSourceType::Offset16,
            0x06 => LeFixupSourceType::Pointer1632,
            0x07 => LeFixupSourceType::Offset32,
            0x08 => LeFixupSourceType::Relative32,
            other => LeFixupSourceType::Unknown(other),
        }
    }
}

/// Fixup target types: what the patched value points at.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum LeFixupTargetType {
    Internal,
    ImportOrdinal,
    ImportName,
    InternalEntry,
}

#[derive(Debug, PartialEq, Copy, Clone)]
pub struct LeFixup {
    /// 1-based page this fixup applies to
    pub page_index: u32,
    pub source_type: LeFixupSourceType,
    pub target_type: LeFixupTargetType,
    pub source_offset: i16,
    pub target_object: u16,
    pub target_offset: u32,
    pub module_ordinal: u16,
    pub import_ordinal: u32,
    pub is_alias: bool,
    pub is_additive: bool,
    pub additive_value: i32,
}

/// A resident or non-resident name table entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NameEntry {
    pub name: String,
    pub ordinal: u16,
}

/// An LE/LX resource table entry (OS/2 form).
#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct LeResource {
    pub type_id: u16,
    pub name_id: u16,
    pub size: u32,
    /// 1-based object holding the data
    pub object: u16,
    pub offset: u32,
}

/// DOS extenders recognisable from the stub.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub enum DosExtender {
    #[default]
    None,
    Dos4Gw,
    Dos32A,
    PmodeW,
    CauseWay,
    Unknown,
}

/// A parsed LE or LX executable.
#[derive(Debug)]
pub struct LeFile<'a> {
    bytes: &'a [u8],
    /// File offset of the LE/LX header (the stub size, when bound)
    pub le_offset: usize,
    pub header: LeHeader,
    pub objects: Vec<LeObject>,
    pub pages: Vec<LePageEntry>,
    pub entries: Vec<LeEntry>,
    pub fixups: Vec<LeFixup>,
    pub resident_names: Vec<NameEntry>,
    pub nonresident_names: Vec<NameEntry>,
    pub resources: Vec<LeResource>,
    pub extender: DosExtender,
    pub diagnostics: Diagnostics,
}

impl<'a> LeFile<'a> {
    pub fn parse(bytes: &'a [u8]) -> error::Result<LeFile<'a>> {
        let le_offset = if bytes.len() >= mz::SIZEOF_EXTENDED_DOS_HEADER
            && matches!(
                bytes.pread_with::<u16>(0, scroll::LE)?,
                mz::DOS_MAGIC | mz::DOS_MAGIC_REVERSED
            ) {
            bytes.pread_with::<u32>(mz::NEW_HEADER_POINTER_OFFSET, scroll::LE)? as usize
        } else {
            0
        };
        Self::parse_at(bytes, le_offset)
    }

    /// Parse with an explicit header offset (zero for a stripped file).
    pub fn parse_at(bytes: &'a [u8], le_offset: usize) -> error::Result<LeFile<'a>> {
        let mut diagnostics = Diagnostics::new();
        let header: LeHeader = bytes.pread_with(le_offset, scroll::LE)?;
        if header.magic != LE_MAGIC && header.magic != LX_MAGIC {
            return Err(error::Error::BadMagic(header.magic as u64));
        }
        if header.byte_order != 0 || header.word_order != 0 {
            diagnostics.push(
                Code::LeInvalidByteOrder,
                Severity::Anomaly,
                le_offset as u64 + 2,
                0,
                format!(
                    "big-endian byte/word order ({}/{}) is unsupported by every known loader",
                    header.byte_order, header.word_order
                ),
            );
        }
        if !header.page_size.is_power_of_two() {
            diagnostics.push(
                Code::LeInvalidPageSize,
                Severity::Anomaly,
                le_offset as u64 + 0x28,
                0,
                format!("page size {:#x} is not a power of two", header.page_size),
            );
        }

        let extender = if le_offset > 0 {
            diagnostics.push(
                Code::LeStubDetected,
                Severity::Info,
                0,
                0,
                format!("DOS extender stub of {:#x} bytes precedes the header", le_offset),
            );
            detect_extender(&bytes[..le_offset.min(bytes.len())])
        } else {
            DosExtender::None
        };
        debug!(
            "{}: header at {:#x}, {} objects, {} pages, extender {:?}",
            if header.magic == LX_MAGIC { "lx" } else { "le" },
            le_offset,
            header.object_count,
            header.page_count,
            extender
        );

        let mut file = LeFile {
            bytes,
            le_offset,
            header,
            objects: Vec::new(),
            pages: Vec::new(),
            entries: Vec::new(),
            fixups: Vec::new(),
            resident_names: Vec::new(),
            nonresident_names: Vec::new(),
            resources: Vec::new(),
            extender,
            diagnostics,
        };
        file.parse_objects();
        file.parse_pages();
        file.parse_entries();
        file.parse_fixups();
        file.parse_names();
        file.parse_resources();
        Ok(file)
    }

    pub fn is_lx(&self) -> bool {
        self.header.magic == LX_MAGIC
    }

    /// Whether a DOS-extender stub precedes the header.
    pub fn is_bound(&self) -> bool {
        self.le_offset > 0
    }

    pub fn is_vxd(&self) -> bool {
        self.header.os_type == 4
    }

    pub fn is_library(&self) -> bool {
        self.header.module_flags & 0x8000 != 0
    }

    pub fn format_name(&self) -> &'static str {
        if self.is_lx() { "LX" } else { "LE" }
    }

    pub fn le_header_offset(&self) -> usize {
        self.le_offset
    }

    fn header_relative(&self, offset: u32) -> Option<usize> {
        (offset != 0).then(|| self.le_offset + offset as usize)
    }

    fn parse_objects(&mut self) {
        let Some(mut offset) = self.header_relative(self.header.object_table_offset) else {
            return;
        };
        let count = (self.header.object_count as usize).min(tools::MAX_TABLE_ENTRIES);
        for index in 0..count {
            let Ok(virtual_size) = self.bytes.gread_with::<u32>(&mut offset, scroll::LE) else {
                break;
            };
            let Ok(base_address) = self.bytes.gread_with::<u32>(&mut offset, scroll::LE) else {
                break;
            };
            let Ok(flags) = self.bytes.gread_with::<u32>(&mut offset, scroll::LE) else {
                break;
            };
            let Ok(page_table_index) = self.bytes.gread_with::<u32>(&mut offset, scroll::LE)
            else {
                break;
            };
            let Ok(page_count) = self.bytes.gread_with::<u32>(&mut offset, scroll::LE) else {
                break;
            };
            let Ok(_reserved) = self.bytes.gread_with::<u32>(&mut offset, scroll::LE) else {
                break;
            };
            self.objects.push(LeObject {
                index: index as u32 + 1,
                virtual_size,
                base_address,
                flags,
                page_table_index,
                page_count,
            });
        }

        let mut sorted: Vec<&LeObject> = self.objects.iter().collect();
        sorted.sort_by_key(|o| o.base_address);
        for pair in sorted.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            if prev.base_address.saturating_add(prev.virtual_size) > next.base_address {
                self.diagnostics.push(
                    Code::LeOverlappingObjects,
                    Severity::Anomaly,
                    0,
                    next.base_address,
                    format!("objects {} and {} overlap in memory", prev.index, next.index),
                );
            }
        }
    }

    fn parse_pages(&mut self) {
        let Some(mut offset) = self.header_relative(self.header.object_page_table_offset) else {
            return;
        };
        let count = (self.header.page_count as usize).min(tools::MAX_TABLE_ENTRIES);
        let data_pages = self.header.data_pages_offset as usize;

        for number in 1..=count as u32 {
            let entry = if self.is_lx() {
                // LX: (offset << shift) is relative to the data pages
                let Ok(page_offset) = self.bytes.gread_with::<u32>(&mut offset, scroll::LE)
                else {
                    break;
                };
                let Ok(data_size) = self.bytes.gread_with::<u16>(&mut offset, scroll::LE) else {
                    break;
                };
                let Ok(flags) = self.bytes.gread_with::<u16>(&mut offset, scroll::LE) else {
                    break;
                };
                LePageEntry {
                    page_number: number,
                    file_offset: data_pages
                        + ((page_offset as usize) << self.header.page_offset_shift),
                    data_size,
                    flags,
                }
            } else {
                // LE: a 3-byte big-endian page number and a flag byte
                let Ok(high) = self.bytes.gread_with::<u8>(&mut offset, scroll::LE) else {
                    break;
                };
                let Ok(mid) = self.bytes.gread_with::<u8>(&mut offset, scroll::LE) else {
                    break;
                };
                let Ok(low) = self.bytes.gread_with::<u8>(&mut offset, scroll::LE) else {
                    break;
                };
                let Ok(flags) = self.bytes.gread_with::<u8>(&mut offset, scroll::LE) else {
                    break;
                };
                let page_number =
                    ((high as u32) << 16) | ((mid as u32) << 8) | low as u32;
                let file_offset = data_pages
                    + (page_number.saturating_sub(1) as usize) * self.header.page_size as usize;
                LePageEntry {
                    page_number: number,
                    file_offset,
                    data_size: self.header.page_size.min(0xffff) as u16,
                    flags: flags as u16,
                }
            };

            if entry.state() == LePageState::Legal && entry.file_offset >= self.bytes.len() {
                self.diagnostics.push(
                    Code::LeInvalidPageOffset,
                    Severity::Anomaly,
                    entry.file_offset as u64,
                    0,
                    format!("page {} data lies beyond end of file", entry.page_number),
                );
            }
            if entry.state() == LePageState::Compressed {
                self.diagnostics.push(
                    Code::LeCompressedPage,
                    Severity::Warning,
                    entry.file_offset as u64,
                    0,
                    format!("page {} is compressed; its data is surfaced raw", entry.page_number),
                );
            }
            self.pages.push(entry);
        }
    }

    fn parse_entries(&mut self) {
        let Some(offset) = self.header_relative(self.header.entry_table_offset) else {
            return;
        };
        self.entries = parse_entry_bundles(self.bytes, offset, &mut self.diagnostics);
        for entry in &self.entries {
            if matches!(entry.entry_type, LeEntryType::Entry16 | LeEntryType::Entry32)
                && (entry.object == 0 || entry.object as usize > self.objects.len())
            {
                self.diagnostics.push(
                    Code::LeInvalidObjectIndex,
                    Severity::Anomaly,
                    0,
                    0,
                    format!(
                        "entry ordinal {} names object {} of {}",
                        entry.ordinal,
                        entry.object,
                        self.objects.len()
                    ),
                );
            }
        }
    }

    fn parse_fixups(&mut self) {
        let Some(page_table) = self.header_relative(self.header.fixup_page_table_offset) else {
            return;
        };
        let Some(record_table) = self.header_relative(self.header.fixup_record_table_offset)
        else {
            return;
        };
        let page_count = (self.header.page_count as usize).min(tools::MAX_TABLE_ENTRIES);

        // the fixup page table holds page_count + 1 offsets into the record
        // table; page i's records span [starts[i], starts[i+1])
        let mut starts = Vec::with_capacity(page_count + 1);
        let mut offset = page_table;
        for _ in 0..=page_count {
            match self.bytes.gread_with::<u32>(&mut offset, scroll::LE) {
                Ok(start) => starts.push(start as usize),
                Err(_) => return,
            }
        }

        for page in 0..page_count {
            let mut cursor = record_table + starts[page];
            let end = record_table + starts[page + 1];
            while cursor < end {
                match self.parse_fixup_record(&mut cursor, page as u32 + 1) {
                    Some(fixup) => self.fixups.push(fixup),
                    None => {
                        self.diagnostics.push(
                            Code::LeFixupOverflow,
                            Severity::Error,
                            cursor as u64,
                            0,
                            format!("malformed fixup record on page {}", page + 1),
                        );
                        break;
                    }
                }
            }
        }
    }

    fn parse_fixup_record(&self, offset: &mut usize, page_index: u32) -> Option<LeFixup> {
        let src: u8 = self.bytes.gread_with(offset, scroll::LE).ok()?;
        let flags: u8 = self.bytes.gread_with(offset, scroll::LE).ok()?;
        let source_type = LeFixupSourceType::from(src & 0x0f);
        let is_alias = src & 0x10 != 0;
        let source_list = src & 0x20 != 0;
        let wide_ordinal = flags & 0x40 != 0;
        let wide_offset = flags & 0x10 != 0;
        let is_additive = flags & 0x04 != 0;

        let mut read_ordinal = |offset: &mut usize| -> Option<u16> {
            if wide_ordinal {
                self.bytes.gread_with::<u16>(offset, scroll::LE).ok()
            } else {
                self.bytes.gread_with::<u8>(offset, scroll::LE).ok().map(u16::from)
            }
        };

        let source_count = if source_list {
            self.bytes.gread_with::<u8>(offset, scroll::LE).ok()? as usize
        } else {
            0
        };
        let source_offset = if source_list {
            0
        } else {
            self.bytes.gread_with::<u16>(offset, scroll::LE).ok()? as i16
        };

        let mut fixup = LeFixup {
            page_index,
            source_type,
            target_type: LeFixupTargetType::Internal,
            source_offset,
            target_object: 0,
            target_offset: 0,
            module_ordinal: 0,
            import_ordinal: 0,
            is_alias,
            is_additive,
            additive_value: 0,
        };

        match flags & 0x03 {
            0 => {
                fixup.target_type = LeFixupTargetType::Internal;
                fixup.target_object = read_ordinal(offset)?;
                if source_type != LeFixupSourceType::Selector16 {
                    fixup.target_offset = if wide_offset {
                        self.bytes.gread_with::<u32>(offset, scroll::LE).ok()?
                    } else {
                        self.bytes.gread_with::<u16>(offset, scroll::LE).ok()? as u32
                    };
                }
            }
            1 => {
                fixup.target_type = LeFixupTargetType::ImportOrdinal;
                fixup.module_ordinal = read_ordinal(offset)?;
                fixup.import_ordinal = if flags & 0x80 != 0 {
                    self.bytes.gread_with::<u8>(offset, scroll::LE).ok()? as u32
                } else if wide_offset {
                    self.bytes.gread_with::<u32>(offset, scroll::LE).ok()?
                } else {
                    self.bytes.gread_with::<u16>(offset, scroll::LE).ok()? as u32
                };
            }
            2 => {
                fixup.target_type = LeFixupTargetType::ImportName;
                fixup.module_ordinal = read_ordinal(offset)?;
                fixup.target_offset = if wide_offset {
                    self.bytes.gread_with::<u32>(offset, scroll::LE).ok()?
                } else {
                    self.bytes.gread_with::<u16>(offset, scroll::LE).ok()? as u32
                };
            }
            _ => {
                fixup.target_type = LeFixupTargetType::InternalEntry;
                fixup.import_ordinal = read_ordinal(offset)? as u32;
            }
        }

        if is_additive {
            fixup.additive_value = if flags & 0x20 != 0 {
                self.bytes.gread_with::<u32>(offset, scroll::LE).ok()? as i32
            } else {
                self.bytes.gread_with::<u16>(offset, scroll::LE).ok()? as i16 as i32
            };
        }
        if source_list {
            // the source offset list trails the record
            for _ in 0..source_count {
                let _: u16 = self.bytes.gread_with(offset, scroll::LE).ok()?;
            }
        }
        Some(fixup)
    }

    fn parse_names(&mut self) {
        if let Some(offset) = self.header_relative(self.header.resident_name_table_offset) {
            self.resident_names = parse_name_table(self.bytes, offset);
        }
        // absolute, unlike its resident sibling
        if self.header.nonresident_name_table_offset != 0 {
            self.nonresident_names =
                parse_name_table(self.bytes, self.header.nonresident_name_table_offset as usize);
        }
    }

    fn parse_resources(&mut self) {
        let Some(mut offset) = self.header_relative(self.header.resource_table_offset) else {
            return;
        };
        let count = (self.header.resource_count as usize).min(tools::MAX_TABLE_ENTRIES);
        for _ in 0..count {
            match self.bytes.gread_with::<LeResource>(&mut offset, scroll::LE) {
                Ok(resource) => self.resources.push(resource),
                Err(_) => break,
            }
        }
    }

    /// The module name: the first resident name entry.
    pub fn module_name(&self) -> Option<&str> {
        self.resident_names.first().map(|e| e.name.as_str())
    }

    pub fn get_object(&self, index: u32) -> Option<&LeObject> {
        (index >= 1).then(|| self.objects.get(index as usize - 1)).flatten()
    }

    /// Look an entry up by its 1-based ordinal.
    pub fn get_entry(&self, ordinal: u32) -> Option<&LeEntry> {
        self.entries.iter().find(|e| e.ordinal == ordinal)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// The page table entries belonging to one object.
    pub fn object_pages(&self, object_index: u32) -> &[LePageEntry] {
        let Some(object) = self.get_object(object_index) else {
            return &[];
        };
        let first = object.page_table_index.saturating_sub(1) as usize;
        let end = (first + object.page_count as usize).min(self.pages.len());
        if first >= self.pages.len() {
            return &[];
        }
        &self.pages[first..end]
    }

    /// Assemble an object's bytes: legal pages from the file, zero-fill
    /// pages as zeros, clipped to the object's virtual size.
    pub fn read_object_data(&self, object_index: u32) -> Vec<u8> {
        let Some(object) = self.get_object(object_index) else {
            return Vec::new();
        };
        let page_size = self.header.page_size as usize;
        let mut data = Vec::with_capacity((object.virtual_size as usize).min(1 << 24));
        for page in self.object_pages(object_index) {
            let len = if self.is_lx() && page.state() == LePageState::Legal {
                page.data_size as usize
            } else {
                page_size
            };
            match page.state() {
                LePageState::Legal | LePageState::Compressed => {
                    let start = page.file_offset.min(self.bytes.len());
                    let end = (page.file_offset + len).min(self.bytes.len());
                    data.extend_from_slice(&self.bytes[start..end]);
                    data.resize(data.len() + (len - (end - start)), 0);
                }
                _ => data.resize(data.len() + len, 0),
            }
        }
        data.truncate(object.virtual_size as usize);
        data
    }

    /// The file-resident bytes of the first executable object's first legal
    /// page run.
    pub fn code_section(&self) -> Option<&'a [u8]> {
        let object = self
            .objects
            .iter()
            .find(|o| o.is_executable())
            .or_else(|| self.get_object(self.header.eip_object))?;
        let pages = self.object_pages(object.index);
        let first = pages.iter().find(|p| p.state() == LePageState::Legal)?;
        let len = (object.virtual_size as usize).min(pages.len() * self.header.page_size as usize);
        let start = first.file_offset.min(self.bytes.len());
        let end = (start + len).min(self.bytes.len());
        (start < end).then(|| &self.bytes[start..end])
    }

    /// Strip a bound file's DOS-extender stub.
    ///
    /// Returns the bytes from the LE/LX header onward, with every *absolute*
    /// header offset (data pages, non-resident names, debug info) reduced by
    /// the stub size. Header-relative offsets are untouched. Re-parsing the
    /// result yields an unbound module.
    pub fn strip_extender(&self) -> error::Result<Vec<u8>> {
        if self.le_offset == 0 {
            return Ok(self.bytes.to_vec());
        }
        if self.le_offset >= self.bytes.len() {
            return Err(error::Error::Malformed(
                "stub size exceeds the file".into(),
            ));
        }
        let stub = self.le_offset as u32;
        let mut stripped = self.bytes[self.le_offset..].to_vec();
        let mut adjust = |field_offset: usize, value: u32| -> error::Result<()> {
            if value != 0 {
                let adjusted = value.checked_sub(stub).ok_or_else(|| {
                    error::Error::Malformed(format!(
                        "absolute offset {:#x} lies inside the stub",
                        value
                    ))
                })?;
                stripped.pwrite_with(adjusted, field_offset, scroll::LE)?;
            }
            Ok(())
        };
        adjust(0x80, self.header.data_pages_offset)?;
        adjust(0x88, self.header.nonresident_name_table_offset)?;
        adjust(0x98, self.header.debug_info_offset)?;
        Ok(stripped)
    }
}

/// Parse a bundle-encoded entry table: `(count, type)` bundles until a zero
/// count. Type 0 skips ordinals with no storage; types 1/3 are 16/32-bit
/// entries in a following object; type 2 is a 286 call gate; type 4 is a
/// forwarder. NE entry tables use the same encoding and share this parser.
pub(crate) fn parse_entry_bundles(
    bytes: &[u8],
    mut offset: usize,
    diagnostics: &mut Diagnostics,
) -> Vec<LeEntry> {
    let mut entries = Vec::new();
    let mut ordinal: u32 = 1;

    loop {
        let Ok(count) = bytes.gread_with::<u8>(&mut offset, scroll::LE) else {
            diagnostics.push(
                Code::LeEntryInvalid,
                Severity::Error,
                offset as u64,
                0,
                "entry table ends without a terminating bundle",
            );
            break;
        };
        if count == 0 {
            break;
        }
        let Ok(bundle_type) = bytes.gread_with::<u8>(&mut offset, scroll::LE) else {
            break;
        };

        match bundle_type {
            0x00 => {
                // unused: skip the ordinals, no storage follows
                ordinal += count as u32;
            }
            0x01 => {
                let Ok(object) = bytes.gread_with::<u8>(&mut offset, scroll::LE) else {
                    break;
                };
                for _ in 0..count {
                    let Ok(flags) = bytes.gread_with::<u8>(&mut offset, scroll::LE) else {
                        return entries;
                    };
                    let Ok(entry_offset) = bytes.gread_with::<u16>(&mut offset, scroll::LE)
                    else {
                        return entries;
                    };
                    entries.push(LeEntry {
                        ordinal,
                        entry_type: LeEntryType::Entry16,
                        object: object as u16,
                        offset: entry_offset as u32,
                        flags,
                        ..Default::default()
                    });
                    ordinal += 1;
                }
            }
            0x02 => {
                let Ok(object) = bytes.gread_with::<u8>(&mut offset, scroll::LE) else {
                    break;
                };
                for _ in 0..count {
                    let Ok(flags) = bytes.gread_with::<u8>(&mut offset, scroll::LE) else {
                        return entries;
                    };
                    let Ok(entry_offset) = bytes.gread_with::<u16>(&mut offset, scroll::LE)
                    else {
                        return entries;
                    };
                    let Ok(callgate) = bytes.gread_with::<u16>(&mut offset, scroll::LE) else {
                        return entries;
                    };
                    entries.push(LeEntry {
                        ordinal,
                        entry_type: LeEntryType::Gate286,
                        object: object as u16,
                        offset: entry_offset as u32,
                        flags,
                        callgate,
                        ..Default::default()
                    });
                    ordinal += 1;
                }
            }
            0x03 => {
                let Ok(object) = bytes.gread_with::<u16>(&mut offset, scroll::LE) else {
                    break;
                };
                for _ in 0..count {
                    let Ok(flags) = bytes.gread_with::<u8>(&mut offset, scroll::LE) else {
                        return entries;
                    };
                    let Ok(entry_offset) = bytes.gread_with::<u32>(&mut offset, scroll::LE)
                    else {
                        return entries;
                    };
                    entries.push(LeEntry {
                        ordinal,
                        entry_type: LeEntryType::Entry32,
                        object,
                        offset: entry_offset,
                        flags,
                        ..Default::default()
                    });
                    ordinal += 1;
                }
            }
            0x04 => {
                let Ok(_reserved) = bytes.gread_with::<u16>(&mut offset, scroll::LE) else {
                    break;
                };
                for _ in 0..count {
                    let Ok(flags) = bytes.gread_with::<u8>(&mut offset, scroll::LE) else {
                        return entries;
                    };
                    let Ok(module_ordinal) = bytes.gread_with::<u16>(&mut offset, scroll::LE)
                    else {
                        return entries;
                    };
                    let Ok(import_ordinal) = bytes.gread_with::<u32>(&mut offset, scroll::LE)
                    else {
                        return entries;
                    };
                    entries.push(LeEntry {
                        ordinal,
                        entry_type: LeEntryType::Forwarder,
                        flags,
                        module_ordinal,
                        import_ordinal,
                        ..Default::default()
                    });
                    ordinal += 1;
                }
            }
            other => {
                diagnostics.push(
                    Code::LeEntryInvalid,
                    Severity::Error,
                    offset as u64,
                    0,
                    format!("unknown entry bundle type {:#04x}; table traversal stopped", other),
                );
                break;
            }
        }
    }
    entries
}

/// Length-prefixed name table: `(len:u8, name, ordinal:u16)` until a zero
/// length.
pub(crate) fn parse_name_table(bytes: &[u8], mut offset: usize) -> Vec<NameEntry> {
    let mut names = Vec::new();
    loop {
        let Ok(len) = bytes.gread_with::<u8>(&mut offset, scroll::LE) else {
            break;
        };
        if len == 0 {
            break;
        }
        if offset + len as usize > bytes.len() {
            break;
        }
        let name = String::from_utf8_lossy(&bytes[offset..offset + len as usize]).into_owned();
        offset += len as usize;
        let Ok(ordinal) = bytes.gread_with::<u16>(&mut offset, scroll::LE) else {
            break;
        };
        names.push(NameEntry { name, ordinal });
    }
    names
}

fn detect_extender(stub: &[u8]) -> DosExtender {
    const BANNERS: &[(&[u8], DosExtender)] = &[
        (b"DOS/4G", DosExtender::Dos4Gw),
        (b"DOS/32A", DosExtender::Dos32A),
        (b"PMODE/W", DosExtender::PmodeW),
        (b"CauseWay", DosExtender::CauseWay),
    ];
    for &(banner, extender) in BANNERS {
        if stub.windows(banner.len()).any(|window| window == banner) {
            return extender;
        }
    }
    DosExtender::Unknown
}
