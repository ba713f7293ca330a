//! The PE optional header, unified over the PE32 and PE32+ layouts.

use crate::diag::Diagnostics;
use crate::error;
use crate::pe::data_directories;
use scroll::{Pread, Pwrite, SizeWith};

/// Standard fields magic number for 32-bit binary
pub const MAGIC_32: u16 = 0x10b;
/// Standard fields magic number for 64-bit binary
pub const MAGIC_64: u16 = 0x20b;

pub const SIZEOF_STANDARD_FIELDS_32: usize = 28;
pub const SIZEOF_STANDARD_FIELDS_64: usize = 24;
pub const SIZEOF_WINDOWS_FIELDS_32: usize = 68;
pub const SIZEOF_WINDOWS_FIELDS_64: usize = 88;
/// Optional header sizes including the full directory table
pub const SIZEOF_OPTIONAL_HEADER_32: usize =
    SIZEOF_STANDARD_FIELDS_32 + SIZEOF_WINDOWS_FIELDS_32 + 16 * 8;
pub const SIZEOF_OPTIONAL_HEADER_64: usize =
    SIZEOF_STANDARD_FIELDS_64 + SIZEOF_WINDOWS_FIELDS_64 + 16 * 8;

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct StandardFields32 {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub base_of_data: u32,
}

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct StandardFields64 {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
}

/// Unified 32/64-bit standard fields
#[derive(Debug, PartialEq, Copy, Clone, Default)]
pub struct StandardFields {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    /// absent in PE32+
    pub base_of_data: u32,
}

impl From<StandardFields32> for StandardFields {
    fn from(fields: StandardFields32) -> Self {
        StandardFields {
            magic: fields.magic,
            major_linker_version: fields.major_linker_version,
            minor_linker_version: fields.minor_linker_version,
            size_of_code: fields.size_of_code,
            size_of_initialized_data: fields.size_of_initialized_data,
            size_of_uninitialized_data: fields.size_of_uninitialized_data,
            address_of_entry_point: fields.address_of_entry_point,
            base_of_code: fields.base_of_code,
            base_of_data: fields.base_of_data,
        }
    }
}

impl From<StandardFields64> for StandardFields {
    fn from(fields: StandardFields64) -> Self {
        StandardFields {
            magic: fields.magic,
            major_linker_version: fields.major_linker_version,
            minor_linker_version: fields.minor_linker_version,
            size_of_code: fields.size_of_code,
            size_of_initialized_data: fields.size_of_initialized_data,
            size_of_uninitialized_data: fields.size_of_uninitialized_data,
            address_of_entry_point: fields.address_of_entry_point,
            base_of_code: fields.base_of_code,
            base_of_data: 0,
        }
    }
}

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct WindowsFields32 {
    pub image_base: u32,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub check_sum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u32,
    pub size_of_stack_commit: u32,
    pub size_of_heap_reserve: u32,
    pub size_of_heap_commit: u32,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
}

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct WindowsFields64 {
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub check_sum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u64,
    pub size_of_stack_commit: u64,
    pub size_of_heap_reserve: u64,
    pub size_of_heap_commit: u64,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
}

impl From<WindowsFields32> for WindowsFields {
    fn from(windows: WindowsFields32) -> Self {
        WindowsFields {
            image_base: windows.image_base as u64,
            section_alignment: windows.section_alignment,
            file_alignment: windows.file_alignment,
            major_operating_system_version: windows.major_operating_system_version,
            minor_operating_system_version: windows.minor_operating_system_version,
            major_image_version: windows.major_image_version,
            minor_image_version: windows.minor_image_version,
            major_subsystem_version: windows.major_subsystem_version,
            minor_subsystem_version: windows.minor_subsystem_version,
            win32_version_value: windows.win32_version_value,
            size_of_image: windows.size_of_image,
            size_of_headers: windows.size_of_headers,
            check_sum: windows.check_sum,
            subsystem: windows.subsystem,
            dll_characteristics: windows.dll_characteristics,
            size_of_stack_reserve: windows.size_of_stack_reserve as u64,
            size_of_stack_commit: windows.size_of_stack_commit as u64,
            size_of_heap_reserve: windows.size_of_heap_reserve as u64,
            size_of_heap_commit: windows.size_of_heap_commit as u64,
            loader_flags: windows.loader_flags,
            number_of_rva_and_sizes: windows.number_of_rva_and_sizes,
        }
    }
}

pub type WindowsFields = WindowsFields64;

/// Windows GUI subsystem
pub const IMAGE_SUBSYSTEM_WINDOWS_GUI: u16 = 2;
/// Windows character-mode subsystem
pub const IMAGE_SUBSYSTEM_WINDOWS_CUI: u16 = 3;
/// EFI application
pub const IMAGE_SUBSYSTEM_EFI_APPLICATION: u16 = 10;
/// Native (no subsystem)
pub const IMAGE_SUBSYSTEM_NATIVE: u16 = 1;

#[derive(Debug, PartialEq, Copy, Clone, Default)]
pub struct OptionalHeader {
    pub standard_fields: StandardFields,
    pub windows_fields: WindowsFields,
    pub data_directories: data_directories::DataDirectories,
}

impl OptionalHeader {
    pub fn parse(
        bytes: &[u8],
        offset: &mut usize,
        diagnostics: &mut Diagnostics,
    ) -> error::Result<Self> {
        let magic: u16 = bytes.pread_with(*offset, scroll::LE)?;
        let (standard_fields, windows_fields): (StandardFields, WindowsFields) = match magic {
            MAGIC_32 => {
                let standard: StandardFields32 = bytes.gread_with(offset, scroll::LE)?;
                let windows: WindowsFields32 = bytes.gread_with(offset, scroll::LE)?;
                (standard.into(), windows.into())
            }
            MAGIC_64 => {
                let standard: StandardFields64 = bytes.gread_with(offset, scroll::LE)?;
                let windows: WindowsFields64 = bytes.gread_with(offset, scroll::LE)?;
                (standard.into(), windows)
            }
            magic => return Err(error::Error::BadMagic(magic as u64)),
        };
        let data_directories = data_directories::DataDirectories::parse(
            bytes,
            windows_fields.number_of_rva_and_sizes as usize,
            offset,
            diagnostics,
        )?;
        Ok(OptionalHeader {
            standard_fields,
            windows_fields,
            data_directories,
        })
    }

    pub fn is_64(&self) -> bool {
        self.standard_fields.magic == MAGIC_64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizeof_standards32() {
        assert_eq!(
            core::mem::size_of::<StandardFields32>(),
            SIZEOF_STANDARD_FIELDS_32
        );
    }
    #[test]
    fn sizeof_windows32() {
        assert_eq!(
            core::mem::size_of::<WindowsFields32>(),
            SIZEOF_WINDOWS_FIELDS_32
        );
    }
    #[test]
    fn sizeof_standards64() {
        assert_eq!(
            core::mem::size_of::<StandardFields64>(),
            SIZEOF_STANDARD_FIELDS_64
        );
    }
    #[test]
    fn sizeof_windows64() {
        assert_eq!(
            core::mem::size_of::<WindowsFields64>(),
            SIZEOF_WINDOWS_FIELDS_64
        );
    }
}
