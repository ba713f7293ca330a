//! The load configuration directory.
//!
//! The structure has grown a field at a time across Windows versions; its
//! leading `Size` field declares how far a given file's copy extends. Fields
//! past the declared size are surfaced as zero, and declared bytes past the
//! newest field this crate knows about are reported, not guessed at.

use scroll::Pread;

use crate::diag::{Code, Diagnostics, Severity};
use crate::pe::data_directories;
use crate::pe::section_table;
use crate::pe::utils;

/// Control Flow Guard is enabled in `guard_flags`
pub const IMAGE_GUARD_CF_INSTRUMENTED: u32 = 0x0000_0100;
/// CFG export suppression is enabled
pub const IMAGE_GUARD_CF_EXPORT_SUPPRESSION_INFO_PRESENT: u32 = 0x0000_4000;
/// Return flow guard (RFG) stack protection
pub const IMAGE_GUARD_RF_INSTRUMENTED: u32 = 0x0002_0000;

/// Unified 32/64-bit load config; pointer-sized fields widen to `u64`.
#[derive(Debug, PartialEq, Copy, Clone, Default)]
pub struct LoadConfig {
    pub size: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub global_flags_clear: u32,
    pub global_flags_set: u32,
    pub critical_section_default_timeout: u32,
    pub decommit_free_block_threshold: u64,
    pub decommit_total_free_threshold: u64,
    pub lock_prefix_table: u64,
    pub maximum_allocation_size: u64,
    pub virtual_memory_threshold: u64,
    pub process_affinity_mask: u64,
    pub process_heap_flags: u32,
    pub csd_version: u16,
    pub dependent_load_flags: u16,
    pub edit_list: u64,
    pub security_cookie: u64,
    /// SafeSEH handler table; meaningful only for PE32
    pub se_handler_table: u64,
    pub se_handler_count: u64,
    pub guard_cf_check_function_pointer: u64,
    pub guard_cf_dispatch_function_pointer: u64,
    pub guard_cf_function_table: u64,
    pub guard_cf_function_count: u64,
    pub guard_flags: u32,
    pub code_integrity: [u8; 12],
    pub guard_address_taken_iat_entry_table: u64,
    pub guard_address_taken_iat_entry_count: u64,
    pub guard_long_jump_target_table: u64,
    pub guard_long_jump_target_count: u64,
}

impl LoadConfig {
    pub fn has_safeseh(&self) -> bool {
        self.se_handler_table != 0
    }

    pub fn has_cf_guard_instrumentation(&self) -> bool {
        self.guard_flags & IMAGE_GUARD_CF_INSTRUMENTED != 0
    }
}

/// Reads fields only while they fall inside the declared `Size`. A cursor
/// that would cross the boundary yields zero for that field and every later
/// one.
struct BoundedReader<'a> {
    bytes: &'a [u8],
    offset: usize,
    end: usize,
}

impl<'a> BoundedReader<'a> {
    fn u16(&mut self) -> u16 {
        self.read::<u16>(2)
    }
    fn u32(&mut self) -> u32 {
        self.read::<u32>(4)
    }
    fn ptr(&mut self, is_64: bool) -> u64 {
        if is_64 {
            self.read::<u64>(8)
        } else {
            self.read::<u32>(4) as u64
        }
    }
    fn read<T: Default + scroll::ctx::TryFromCtx<'a, scroll::Endian, Error = scroll::Error>>(
        &mut self,
        size: usize,
    ) -> T {
        if self.offset + size > self.end {
            self.offset = self.end;
            return T::default();
        }
        let bytes = self.bytes;
        match bytes.pread_with::<T>(self.offset, scroll::LE) {
            Ok(value) => {
                self.offset += size;
                value
            }
            Err(_) => {
                self.offset = self.end;
                T::default()
            }
        }
    }
    fn bytes12(&mut self) -> [u8; 12] {
        let mut out = [0u8; 12];
        if self.offset + 12 <= self.end && self.offset + 12 <= self.bytes.len() {
            out.copy_from_slice(&self.bytes[self.offset..self.offset + 12]);
            self.offset += 12;
        } else {
            self.offset = self.end;
        }
        out
    }
}

pub fn parse(
    bytes: &[u8],
    sections: &[section_table::SectionTable],
    size_of_headers: usize,
    dd: data_directories::DataDirectory,
    is_64: bool,
    diagnostics: &mut Diagnostics,
) -> Option<LoadConfig> {
    let base = utils::find_offset(dd.virtual_address as usize, sections, size_of_headers)?;
    let declared_size: u32 = bytes.pread_with(base, scroll::LE).ok()?;
    let end = base
        .saturating_add(declared_size as usize)
        .min(bytes.len());

    let mut reader = BoundedReader {
        bytes,
        offset: base,
        end,
    };
    let mut config = LoadConfig {
        size: reader.u32(),
        time_date_stamp: reader.u32(),
        major_version: reader.u16(),
        minor_version: reader.u16(),
        global_flags_clear: reader.u32(),
        global_flags_set: reader.u32(),
        critical_section_default_timeout: reader.u32(),
        decommit_free_block_threshold: reader.ptr(is_64),
        decommit_total_free_threshold: reader.ptr(is_64),
        lock_prefix_table: reader.ptr(is_64),
        maximum_allocation_size: reader.ptr(is_64),
        virtual_memory_threshold: reader.ptr(is_64),
        ..Default::default()
    };
    // the affinity mask and heap flags swap places between the layouts
    if is_64 {
        config.process_affinity_mask = reader.ptr(true);
        config.process_heap_flags = reader.u32();
    } else {
        config.process_heap_flags = reader.u32();
        config.process_affinity_mask = reader.ptr(false);
    }
    config.csd_version = reader.u16();
    config.dependent_load_flags = reader.u16();
    config.edit_list = reader.ptr(is_64);
    config.security_cookie = reader.ptr(is_64);
    config.se_handler_table = reader.ptr(is_64);
    config.se_handler_count = reader.ptr(is_64);
    config.guard_cf_check_function_pointer = reader.ptr(is_64);
    config.guard_cf_dispatch_function_pointer = reader.ptr(is_64);
    config.guard_cf_function_table = reader.ptr(is_64);
    config.guard_cf_function_count = reader.ptr(is_64);
    config.guard_flags = reader.u32();
    config.code_integrity = reader.bytes12();
    config.guard_address_taken_iat_entry_table = reader.ptr(is_64);
    config.guard_address_taken_iat_entry_count = reader.ptr(is_64);
    config.guard_long_jump_target_table = reader.ptr(is_64);
    config.guard_long_jump_target_count = reader.ptr(is_64);

    if reader.offset < end {
        diagnostics.push(
            Code::OptReservedNonzero,
            Severity::Info,
            reader.offset as u64,
            dd.virtual_address,
            format!(
                "load config declares {} bytes beyond the last known field",
                end - reader.offset
            ),
        );
    }
    Some(config)
}
