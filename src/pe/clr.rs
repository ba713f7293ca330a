//! The CLR (COM descriptor) header of .NET images.

use scroll::{Pread, Pwrite, SizeWith};

use crate::pe::data_directories;
use crate::pe::section_table;
use crate::pe::utils;

/// The image contains IL code only
pub const COMIMAGE_FLAGS_ILONLY: u32 = 0x0000_0001;
/// The image requires a 32-bit process
pub const COMIMAGE_FLAGS_32BITREQUIRED: u32 = 0x0000_0002;
/// The image is strong-name signed
pub const COMIMAGE_FLAGS_STRONGNAMESIGNED: u32 = 0x0000_0008;
/// The entry point token is a native entry point RVA
pub const COMIMAGE_FLAGS_NATIVE_ENTRYPOINT: u32 = 0x0000_0010;

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct ClrHeader {
    pub cb: u32,
    pub major_runtime_version: u16,
    pub minor_runtime_version: u16,
    pub metadata: data_directories::DataDirectory,
    pub flags: u32,
    /// Managed entry point token, or native entry RVA when
    /// [`COMIMAGE_FLAGS_NATIVE_ENTRYPOINT`] is set
    pub entry_point_token: u32,
    pub resources: data_directories::DataDirectory,
    pub strong_name_signature: data_directories::DataDirectory,
    pub code_manager_table: data_directories::DataDirectory,
    pub vtable_fixups: data_directories::DataDirectory,
    pub export_address_table_jumps: data_directories::DataDirectory,
    pub managed_native_header: data_directories::DataDirectory,
}

impl ClrHeader {
    pub fn is_il_only(&self) -> bool {
        self.flags & COMIMAGE_FLAGS_ILONLY != 0
    }

    pub fn is_strong_name_signed(&self) -> bool {
        self.flags & COMIMAGE_FLAGS_STRONGNAMESIGNED != 0
    }
}

pub fn parse(
    bytes: &[u8],
    sections: &[section_table::SectionTable],
    size_of_headers: usize,
    dd: data_directories::DataDirectory,
) -> Option<ClrHeader> {
    let offset = utils::find_offset(dd.virtual_address as usize, sections, size_of_headers)?;
    bytes.pread_with(offset, scroll::LE).ok()
}
