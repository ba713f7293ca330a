//! A 16-bit NE (New Executable) parser: Windows 3.x and OS/2 1.x.

use log::debug;
use scroll::{Pread, Pwrite, SizeWith};

use crate::diag::{Code, Diagnostics, Severity};
use crate::error;
use crate::le;
use crate::mz;
use crate::resource::ResourceDirectory;
use crate::tools;

/// `NE`, little endian
pub const NE_MAGIC: u16 = 0x454e;

pub const SIZEOF_NE_HEADER: usize = 0x40;
pub const SIZEOF_NE_SEGMENT: usize = 8;

/// NE target operating systems.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum NeTargetOs {
    Unknown,
    Os2,
    Windows,
    Dos4,
    Windows386,
    BorlandOsServices,
}

impl From<u8> for NeTargetOs {
    fn from(value: u8) -> Self {
        match value {
            1 => NeTargetOs::Os2,
            2 => NeTargetOs::Windows,
            3 => NeTargetOs::Dos4,
            4 => NeTargetOs::Windows386,
            5 => NeTargetOs::BorlandOsServices,
            _ => NeTargetOs::Unknown,
        }
    }
}

/// The 64-byte NE header. Table offsets are relative to the NE header
/// except the non-resident name table, which is absolute.
#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct NeHeader {
    pub magic: u16,
    pub linker_version: u8,
    pub linker_revision: u8,
    pub entry_table_offset: u16,
    pub entry_table_size: u16,
    pub crc: u32,
    pub flags: u16,
    /// 1-based automatic data segment, 0 when none
    pub auto_data_segment: u16,
    pub heap_size: u16,
    pub stack_size: u16,
    pub entry_ip: u16,
    /// 1-based segment number holding the entry point
    pub entry_cs: u16,
    pub initial_sp: u16,
    pub initial_ss: u16,
    pub segment_count: u16,
    pub module_ref_count: u16,
    pub nonresident_name_size: u16,
    pub segment_table_offset: u16,
    pub resource_table_offset: u16,
    pub resident_name_table_offset: u16,
    pub module_ref_table_offset: u16,
    pub import_name_table_offset: u16,
    /// Absolute file offset
    pub nonresident_name_table_offset: u32,
    pub movable_entry_count: u16,
    /// Segment file offsets are left-shifted by this
    pub alignment_shift: u16,
    pub resource_count: u16,
    pub target_os: u8,
    pub misc_flags: u8,
    pub fastload_offset: u16,
    pub fastload_size: u16,
    pub reserved: u16,
    pub expected_windows_version: u16,
}

/// One segment table entry, with the alignment shift already applied.
#[derive(Debug, PartialEq, Copy, Clone, Default)]
pub struct NeSegment {
    /// 1-based
    pub index: u16,
    /// Absolute file offset (shifted); 0 means no file data
    pub file_offset: usize,
    /// Bytes of file data; a stored 0 with a non-zero offset means 65536
    pub length: usize,
    pub flags: u16,
    pub min_alloc: u16,
}

impl NeSegment {
    pub fn is_data(&self) -> bool {
        self.flags & 0x0001 != 0
    }
    pub fn is_code(&self) -> bool {
        !self.is_data()
    }
    pub fn is_movable(&self) -> bool {
        self.flags & 0x0010 != 0
    }
    pub fn is_preload(&self) -> bool {
        self.flags & 0x0040 != 0
    }
    pub fn has_relocations(&self) -> bool {
        self.flags & 0x0100 != 0
    }
    pub fn is_discardable(&self) -> bool {
        self.flags & 0x1000 != 0
    }
    pub fn data_offset(&self) -> usize {
        self.file_offset
    }
    pub fn data_length(&self) -> usize {
        self.length
    }
}

/// A parsed NE executable.
#[derive(Debug)]
pub struct NeFile<'a> {
    bytes: &'a [u8],
    /// File offset of the NE header
    pub ne_offset: usize,
    pub header: NeHeader,
    pub segments: Vec<NeSegment>,
    /// First entry is the module name
    pub resident_names: Vec<le::NameEntry>,
    /// First entry is the module description
    pub nonresident_names: Vec<le::NameEntry>,
    /// Referenced module names, in module-reference order
    pub module_references: Vec<String>,
    /// The entry table, bundle-decoded
    pub entries: Vec<le::LeEntry>,
    /// The resource directory, when the file carries one
    pub resources: Option<ResourceDirectory<'a>>,
    pub diagnostics: Diagnostics,
}

impl<'a> NeFile<'a> {
    pub fn parse(bytes: &'a [u8]) -> error::Result<NeFile<'a>> {
        mz::DosHeader::parse(bytes)?;
        if bytes.len() < mz::SIZEOF_EXTENDED_DOS_HEADER {
            return Err(error::Error::Malformed(format!(
                "file of {} bytes cannot hold an NE container",
                bytes.len()
            )));
        }
        let ne_offset =
            bytes.pread_with::<u32>(mz::NEW_HEADER_POINTER_OFFSET, scroll::LE)? as usize;
        let header: NeHeader = bytes.pread_with(ne_offset, scroll::LE)?;
        if header.magic != NE_MAGIC {
            return Err(error::Error::BadMagic(header.magic as u64));
        }
        debug!(
            "ne: header at {:#x}, {} segments, target os {:?}",
            ne_offset,
            header.segment_count,
            NeTargetOs::from(header.target_os)
        );

        let mut file = NeFile {
            bytes,
            ne_offset,
            header,
            segments: Vec::new(),
            resident_names: Vec::new(),
            nonresident_names: Vec::new(),
            module_references: Vec::new(),
            entries: Vec::new(),
            resources: None,
            diagnostics: Diagnostics::new(),
        };
        file.parse_segments();
        file.parse_names();
        file.parse_module_references();
        file.parse_entries();
        file.parse_resources();
        Ok(file)
    }

    pub fn target_os(&self) -> NeTargetOs {
        NeTargetOs::from(self.header.target_os)
    }

    pub fn format_name(&self) -> &'static str {
        match self.target_os() {
            NeTargetOs::Os2 => "NE (OS/2)",
            _ => "NE",
        }
    }

    /// The module name from the resident name table.
    pub fn module_name(&self) -> Option<&str> {
        self.resident_names.first().map(|e| e.name.as_str())
    }

    fn parse_segments(&mut self) {
        if self.header.segment_table_offset == 0 {
            return;
        }
        let mut offset = self.ne_offset + self.header.segment_table_offset as usize;
        let count = (self.header.segment_count as usize).min(tools::MAX_TABLE_ENTRIES);
        for index in 0..count {
            let Ok(raw_offset) = self.bytes.gread_with::<u16>(&mut offset, scroll::LE) else {
                self.diagnostics.push(
                    Code::TruncatedFile,
                    Severity::Error,
                    offset as u64,
                    0,
                    "segment table runs off the end of the file",
                );
                break;
            };
            let Ok(raw_length) = self.bytes.gread_with::<u16>(&mut offset, scroll::LE) else {
                break;
            };
            let Ok(flags) = self.bytes.gread_with::<u16>(&mut offset, scroll::LE) else {
                break;
            };
            let Ok(min_alloc) = self.bytes.gread_with::<u16>(&mut offset, scroll::LE) else {
                break;
            };

            let file_offset = (raw_offset as usize) << self.header.alignment_shift;
            let length = if raw_length == 0 && raw_offset != 0 {
                0x10000
            } else {
                raw_length as usize
            };
            let segment = NeSegment {
                index: index as u16 + 1,
                file_offset,
                length,
                flags,
                min_alloc,
            };
            if file_offset != 0 && file_offset + length > self.bytes.len() {
                self.diagnostics.push(
                    Code::TruncatedFile,
                    Severity::Warning,
                    file_offset as u64,
                    0,
                    format!("segment {} data extends past end of file", segment.index),
                );
            }
            self.segments.push(segment);
        }
    }

    fn parse_names(&mut self) {
        if self.header.resident_name_table_offset != 0 {
            self.resident_names = le::parse_name_table(
                self.bytes,
                self.ne_offset + self.header.resident_name_table_offset as usize,
            );
        }
        if self.header.nonresident_name_table_offset != 0 {
            self.nonresident_names = le::parse_name_table(
                self.bytes,
                self.header.nonresident_name_table_offset as usize,
            );
        }
    }

    /// The module reference table is an array of offsets into the imported
    /// name table, whose strings are length-prefixed.
    fn parse_module_references(&mut self) {
        if self.header.module_ref_table_offset == 0 || self.header.module_ref_count == 0 {
            return;
        }
        let mut offset = self.ne_offset + self.header.module_ref_table_offset as usize;
        let import_names = self.ne_offset + self.header.import_name_table_offset as usize;
        for _ in 0..self.header.module_ref_count {
            let Ok(name_offset) = self.bytes.gread_with::<u16>(&mut offset, scroll::LE) else {
                break;
            };
            let at = import_names + name_offset as usize;
            let name = self
                .bytes
                .get(at)
                .and_then(|&len| {
                    let start = at + 1;
                    let end = start + len as usize;
                    (end <= self.bytes.len())
                        .then(|| String::from_utf8_lossy(&self.bytes[start..end]).into_owned())
                })
                .unwrap_or_default();
            self.module_references.push(name);
        }
    }

    fn parse_entries(&mut self) {
        if self.header.entry_table_offset == 0 {
            return;
        }
        self.entries = le::parse_entry_bundles(
            self.bytes,
            self.ne_offset + self.header.entry_table_offset as usize,
            &mut self.diagnostics,
        );
    }

    pub fn has_resources(&self) -> bool {
        self.header.resource_table_offset != 0
            && self.header.resource_table_offset != self.header.resident_name_table_offset
    }

    /// Parse the resource directory, chosen by the target OS: OS/2 files
    /// use the compact segment-mapped form, everything else the flat
    /// Windows form.
    fn parse_resources(&mut self) {
        if !self.has_resources() {
            return;
        }
        let start = self.ne_offset + self.header.resource_table_offset as usize;
        // the resource table runs up to the resident name table
        let end = if self.header.resident_name_table_offset > self.header.resource_table_offset {
            self.ne_offset + self.header.resident_name_table_offset as usize
        } else {
            self.bytes.len()
        };
        let bytes = self.bytes;
        let Some(table) = bytes.get(start..end.min(bytes.len())) else {
            return;
        };
        self.resources = Some(if self.target_os() == NeTargetOs::Os2 {
            ResourceDirectory::parse_ne_os2(table, bytes, &self.segments, &mut self.diagnostics)
        } else {
            ResourceDirectory::parse_ne(table, bytes, &mut self.diagnostics)
        });
    }

    /// The first code segment's file data.
    pub fn code_section(&self) -> Option<&'a [u8]> {
        let segment = self.segments.iter().find(|s| s.is_code())?;
        let start = segment.file_offset;
        let end = (start + segment.length).min(self.bytes.len());
        (start != 0 && start < end).then(|| &self.bytes[start..end])
    }

    pub fn segment_data(&self, index: u16) -> Option<&'a [u8]> {
        let segment = self.segments.iter().find(|s| s.index == index)?;
        let start = segment.file_offset;
        let end = (start + segment.length).min(self.bytes.len());
        (start < end).then(|| &self.bytes[start..end])
    }

    /// Shannon entropy of one segment's file data.
    pub fn segment_entropy(&self, index: u16) -> f64 {
        self.segment_data(index)
            .map(tools::shannon_entropy)
            .unwrap_or(0.0)
    }

    pub fn file_entropy(&self) -> f64 {
        tools::shannon_entropy(self.bytes)
    }

    /// Whether any segment's entropy reaches packing territory (≥ 7.0 bits).
    pub fn has_high_entropy_segments(&self) -> bool {
        self.segments
            .iter()
            .any(|s| self.segment_entropy(s.index) >= 7.0)
    }

    pub fn is_likely_packed(&self) -> bool {
        self.has_high_entropy_segments()
    }
}
