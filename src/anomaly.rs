//! Post-parse anomaly rules.
//!
//! Each rule is a pure function from the parsed model to zero or more
//! diagnostics. They run once, at the end of the primary parse, so a
//! malware-analysis consumer gets the complete picture from the collector
//! without re-walking the model.

use crate::diag::{Code, Diagnostics, Severity};
use crate::pe::characteristic::*;
use crate::pe::data_directories::DataDirectoryType;
use crate::pe::PE;

pub(crate) fn check_pe(pe: &mut PE) {
    let mut diags = Diagnostics::new();
    check_coff(pe, &mut diags);
    if let Some(optional) = pe.header.optional_header {
        check_optional_header(pe, &optional, &mut diags);
        check_entry_point(pe, &optional, &mut diags);
        check_directories(&optional, &mut diags);
    }
    check_sections(pe, &mut diags);
    check_self_references(pe, &mut diags);
    pe.diagnostics.append(diags);
}

fn check_coff(pe: &PE, diags: &mut Diagnostics) {
    let coff = &pe.header.coff_header;
    let coff_offset = pe.header.pe_pointer as u64 + 4;
    if coff.number_of_sections == 0 {
        diags.push(
            Code::CoffZeroSections,
            Severity::Anomaly,
            coff_offset,
            0,
            "NumberOfSections is 0",
        );
    } else if coff.number_of_sections > 96 {
        diags.push(
            Code::CoffExcessiveSections,
            Severity::Warning,
            coff_offset,
            0,
            format!("{} sections exceeds the loader's limit of 96", coff.number_of_sections),
        );
    }
    if coff.characteristics & IMAGE_FILE_DEPRECATED_MASK != 0 {
        diags.push(
            Code::CoffDeprecatedFlag,
            Severity::Info,
            coff_offset,
            0,
            format!(
                "deprecated characteristics bits set: {:#06x}",
                coff.characteristics & IMAGE_FILE_DEPRECATED_MASK
            ),
        );
    }
    if coff.pointer_to_symbol_table != 0 || coff.number_of_symbol_table != 0 {
        diags.push(
            Code::CoffSymbolTablePresent,
            Severity::Info,
            coff_offset,
            0,
            "COFF symbol table fields are non-zero in an image",
        );
    }
    if coff.characteristics & IMAGE_FILE_RELOCS_STRIPPED != 0 && !pe.relocations.is_empty() {
        diags.push(
            Code::CoffRelocsStrippedIgnored,
            Severity::Warning,
            coff_offset,
            0,
            "RELOCS_STRIPPED is set but a relocation directory is present",
        );
    }
}

fn check_optional_header(
    pe: &PE,
    optional: &crate::pe::optional_header::OptionalHeader,
    diags: &mut Diagnostics,
) {
    let windows = &optional.windows_fields;
    let opt_offset = pe.header.pe_pointer as u64 + 24;

    if pe.header.pe_pointer as usize >= windows.size_of_headers as usize {
        diags.push(
            Code::PeHeaderInOverlay,
            Severity::Anomaly,
            pe.header.pe_pointer as u64,
            0,
            "PE header lies beyond SizeOfHeaders",
        );
    }

    if windows.image_base == 0 || (!pe.is_64 && windows.image_base >= 0x8000_0000) {
        diags.push(
            Code::OptInvalidImageBase,
            Severity::Warning,
            opt_offset,
            0,
            format!("ImageBase {:#x} is zero or in kernel space", windows.image_base),
        );
    }
    if windows.image_base % 0x10000 != 0 {
        diags.push(
            Code::OptUnalignedImageBase,
            Severity::Warning,
            opt_offset,
            0,
            format!("ImageBase {:#x} is not 64 KiB aligned", windows.image_base),
        );
    }

    let section_align = windows.section_alignment;
    let file_align = windows.file_alignment;
    if !section_align.is_power_of_two() || !file_align.is_power_of_two() {
        diags.push(
            Code::OptNonPower2Alignment,
            Severity::Anomaly,
            opt_offset,
            0,
            format!(
                "alignments {:#x}/{:#x} are not powers of two",
                section_align, file_align
            ),
        );
    }
    if section_align < file_align {
        diags.push(
            Code::OptSectionLtFileAlign,
            Severity::Anomaly,
            opt_offset,
            0,
            format!(
                "SectionAlignment {:#x} is below FileAlignment {:#x}",
                section_align, file_align
            ),
        );
    }
    if section_align == file_align && section_align <= 0x200 && section_align != 0 {
        // low alignment mode: the image is mapped as one writable blob
        diags.push(
            Code::OptLowAlignment,
            Severity::Info,
            opt_offset,
            0,
            format!("low alignment mode ({:#x})", section_align),
        );
        diags.push(
            Code::PeWritableHeader,
            Severity::Info,
            opt_offset,
            0,
            "headers are writable in low alignment mode",
        );
    } else if !(0x200..=0x10000).contains(&file_align) {
        diags.push(
            Code::OptFileAlignmentRange,
            Severity::Warning,
            opt_offset,
            0,
            format!("FileAlignment {:#x} is outside 512..64K", file_align),
        );
    }
    if section_align.is_power_of_two() && windows.size_of_image % section_align != 0 {
        diags.push(
            Code::OptSizeOfImageUnaligned,
            Severity::Warning,
            opt_offset,
            0,
            format!("SizeOfImage {:#x} is not section aligned", windows.size_of_image),
        );
    }
    if file_align.is_power_of_two() && windows.size_of_headers % file_align != 0 {
        diags.push(
            Code::OptSizeOfHeadersUnaligned,
            Severity::Warning,
            opt_offset,
            0,
            format!("SizeOfHeaders {:#x} is not file aligned", windows.size_of_headers),
        );
    }
    if windows.win32_version_value != 0 {
        diags.push(
            Code::OptReservedNonzero,
            Severity::Info,
            opt_offset,
            0,
            format!("Win32VersionValue is {:#x}, reserved as zero", windows.win32_version_value),
        );
    }
    if windows.dll_characteristics & IMAGE_DLLCHARACTERISTICS_RESERVED_MASK != 0 {
        diags.push(
            Code::OptReservedDllChar,
            Severity::Warning,
            opt_offset,
            0,
            format!(
                "reserved DllCharacteristics bits set: {:#06x}",
                windows.dll_characteristics & IMAGE_DLLCHARACTERISTICS_RESERVED_MASK
            ),
        );
    }
    if windows.check_sum != 0 {
        let computed = pe_checksum(pe.bytes, pe.header.pe_pointer as usize + 24 + 64);
        if computed != windows.check_sum {
            diags.push(
                Code::OptChecksumMismatch,
                Severity::Warning,
                opt_offset,
                0,
                format!(
                    "declared checksum {:#x} does not match computed {:#x}",
                    windows.check_sum, computed
                ),
            );
        }
    }
}

fn check_entry_point(
    pe: &PE,
    optional: &crate::pe::optional_header::OptionalHeader,
    diags: &mut Diagnostics,
) {
    let windows = &optional.windows_fields;
    let entry = pe.entry;

    if entry == 0 {
        if pe.header.coff_header.characteristics & IMAGE_FILE_EXECUTABLE_IMAGE != 0 && !pe.is_lib {
            diags.push(
                Code::OptZeroEntryPoint,
                Severity::Warning,
                0,
                0,
                "AddressOfEntryPoint is 0 in an executable image",
            );
        }
        return;
    }
    if entry >= windows.size_of_image {
        diags.push(
            Code::OptEpOutsideImage,
            Severity::Anomaly,
            0,
            entry,
            format!(
                "entry point {:#x} lies beyond SizeOfImage {:#x}",
                entry, windows.size_of_image
            ),
        );
        return;
    }
    if entry < windows.size_of_headers {
        diags.push(
            Code::OptEpInHeader,
            Severity::Anomaly,
            entry as u64,
            entry,
            "entry point lies inside the header region",
        );
        return;
    }
    match pe.section_containing(entry) {
        Some(section) => {
            if !section.is_executable() {
                diags.push(
                    Code::EpNonExecutable,
                    Severity::Anomaly,
                    section.pointer_to_raw_data as u64,
                    entry,
                    format!(
                        "entry point lies in non-executable section {}",
                        section.name()
                    ),
                );
            }
        }
        None => {
            diags.push(
                Code::EpInOverlay,
                Severity::Anomaly,
                0,
                entry,
                "entry point maps into no section",
            );
        }
    }
}

fn check_sections(pe: &PE, diags: &mut Diagnostics) {
    let file_align = pe
        .header
        .optional_header
        .map(|oh| oh.windows_fields.file_alignment)
        .unwrap_or(0);

    let mut by_va: Vec<_> = pe.sections.iter().collect();
    by_va.sort_by_key(|s| s.virtual_address);
    for pair in by_va.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        if prev.virtual_address + prev.virtual_extent() > next.virtual_address {
            diags.push(
                Code::SectOverlap,
                Severity::Anomaly,
                next.pointer_to_raw_data as u64,
                next.virtual_address,
                format!("sections {} and {} overlap in memory", prev.name(), next.name()),
            );
        }
    }

    for section in &pe.sections {
        let raw_end = section.pointer_to_raw_data as u64 + section.size_of_raw_data as u64;
        if section.size_of_raw_data != 0 && raw_end > pe.bytes.len() as u64 {
            diags.push(
                Code::SectBeyondFile,
                Severity::Warning,
                section.pointer_to_raw_data as u64,
                section.virtual_address,
                format!(
                    "section {} raw data ends at {:#x}, past the {:#x}-byte file; reads are clipped",
                    section.name(),
                    raw_end,
                    pe.bytes.len()
                ),
            );
        }
        if section.pointer_to_raw_data != 0 && section.size_of_raw_data == 0 {
            diags.push(
                Code::SectZeroRawSize,
                Severity::Info,
                section.pointer_to_raw_data as u64,
                section.virtual_address,
                format!("section {} has a raw pointer but no raw data", section.name()),
            );
        }
        if file_align.is_power_of_two()
            && section.pointer_to_raw_data != 0
            && section.pointer_to_raw_data % file_align != 0
        {
            diags.push(
                Code::SectUnaligned,
                Severity::Info,
                section.pointer_to_raw_data as u64,
                section.virtual_address,
                format!("section {} raw pointer is not file aligned", section.name()),
            );
        }
    }
}

fn check_directories(
    optional: &crate::pe::optional_header::OptionalHeader,
    diags: &mut Diagnostics,
) {
    let size_of_headers = optional.windows_fields.size_of_headers;
    let mut populated: Vec<(usize, u32, u32)> = Vec::new();
    for (index, dd) in optional.data_directories.data_directories.iter().enumerate() {
        let Some(dd) = dd else { continue };
        // the security directory is file-offset based and exempt
        if index == DataDirectoryType::Security as usize {
            continue;
        }
        if dd.virtual_address < size_of_headers {
            diags.push(
                Code::DirectoryInHeader,
                Severity::Warning,
                0,
                dd.virtual_address,
                format!("data directory {} points into the header region", index),
            );
        }
        populated.push((index, dd.virtual_address, dd.virtual_address.saturating_add(dd.size)));
    }
    for (i, &(index_a, start_a, end_a)) in populated.iter().enumerate() {
        for &(index_b, start_b, end_b) in &populated[i + 1..] {
            if start_a < end_b && start_b < end_a {
                diags.push(
                    Code::OverlappingDirectories,
                    Severity::Info,
                    0,
                    start_a.max(start_b),
                    format!("data directories {} and {} overlap", index_a, index_b),
                );
            }
        }
    }
}

/// A module importing from itself, or forwarding an export back into
/// itself, is an infinite-resolution trick seen in evasive samples.
fn check_self_references(pe: &PE, diags: &mut Diagnostics) {
    let Some(own_name) = pe.name.as_deref() else {
        return;
    };
    for dll in &pe.imports {
        if dll.name.eq_ignore_ascii_case(own_name) {
            diags.push(
                Code::ImpSelfImport,
                Severity::Warning,
                0,
                dll.descriptor.name_rva,
                format!("module imports from itself ({})", dll.name),
            );
        }
    }
    let Some(exports) = &pe.exports else { return };
    let own_stem = own_name.split('.').next().unwrap_or(own_name);
    for export in &exports.exports {
        let Some(forwarder) = &export.forwarder else {
            continue;
        };
        let target_module = forwarder.split('.').next().unwrap_or(forwarder);
        if target_module.eq_ignore_ascii_case(own_stem) {
            diags.push(
                Code::ExpForwarderLoop,
                Severity::Warning,
                0,
                export.rva,
                format!(
                    "export ordinal {} forwards to its own module ({})",
                    export.ordinal, forwarder
                ),
            );
        }
    }
}

/// The PE checksum: ones-complement folded 16-bit sum over the file with the
/// checksum field skipped, plus the file length.
fn pe_checksum(bytes: &[u8], checksum_offset: usize) -> u32 {
    let mut sum: u64 = 0;
    let mut i = 0;
    while i < bytes.len() {
        if i == checksum_offset {
            i += 4;
            continue;
        }
        let word = if i + 1 < bytes.len() {
            u16::from_le_bytes([bytes[i], bytes[i + 1]]) as u64
        } else {
            bytes[i] as u64
        };
        sum += word;
        sum = (sum & 0xffff) + (sum >> 16);
        i += 2;
    }
    sum = (sum & 0xffff) + (sum >> 16);
    sum as u32 + bytes.len() as u32
}
