//! The export directory: the symbols this binary exposes, by name and by
//! ordinal, including forwarders.

use log::debug;
use scroll::{Pread, Pwrite, SizeWith};

use crate::diag::{Code, Diagnostics, Severity};
use crate::pe::data_directories;
use crate::pe::section_table;
use crate::pe::utils;
use crate::tools;

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct ExportDirectoryTable {
    pub export_flags: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub name_rva: u32,
    pub ordinal_base: u32,
    pub address_table_entries: u32,
    pub number_of_name_pointers: u32,
    pub export_address_table_rva: u32,
    pub name_pointer_rva: u32,
    pub ordinal_table_rva: u32,
}

pub const SIZEOF_EXPORT_DIRECTORY_TABLE: usize = 40;

/// One exported symbol.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExportEntry {
    pub ordinal: u32,
    /// `None` for by-ordinal-only exports
    pub name: Option<String>,
    pub rva: u32,
    /// Set when the RVA lands inside the export directory itself
    pub forwarder: Option<String>,
}

impl ExportEntry {
    pub fn is_forwarder(&self) -> bool {
        self.forwarder.is_some()
    }
}

/// The parsed export directory.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExportDirectory {
    pub table: ExportDirectoryTable,
    /// The exporting module's own name
    pub name: Option<String>,
    pub exports: Vec<ExportEntry>,
}

/// Join the three parallel export tables: for each name index `i`, the
/// export is `(names[i], ordinal_table[i], eat[ordinal_table[i]])`. EAT
/// slots never referenced by the ordinal table are by-ordinal-only exports.
pub fn parse(
    bytes: &[u8],
    sections: &[section_table::SectionTable],
    size_of_headers: usize,
    dd: data_directories::DataDirectory,
    diagnostics: &mut Diagnostics,
) -> Option<ExportDirectory> {
    let offset = utils::find_offset(dd.virtual_address as usize, sections, size_of_headers)?;
    let table: ExportDirectoryTable = bytes.pread_with(offset, scroll::LE).ok()?;
    debug!("export directory: {:?}", table);

    let mut num_functions = table.address_table_entries as usize;
    if num_functions > tools::MAX_TABLE_ENTRIES {
        diagnostics.push(
            Code::ExpOrdinalGap,
            Severity::Anomaly,
            offset as u64,
            dd.virtual_address,
            format!(
                "export address table declares {} entries, clamped to {}",
                num_functions,
                tools::MAX_TABLE_ENTRIES
            ),
        );
        num_functions = tools::MAX_TABLE_ENTRIES;
    }
    let mut num_names = table.number_of_name_pointers as usize;
    if num_names > num_functions {
        diagnostics.push(
            Code::ExpOrdinalGap,
            Severity::Anomaly,
            offset as u64,
            dd.virtual_address,
            format!(
                "export name count {} exceeds function count {}",
                num_names, num_functions
            ),
        );
        num_names = 0;
    }

    let name = (table.name_rva != 0 && table.name_rva != 0xffff_ffff)
        .then(|| utils::read_cstr_at_rva(bytes, sections, size_of_headers, table.name_rva as usize))
        .flatten();

    let eat = read_u32_table(
        bytes,
        sections,
        size_of_headers,
        table.export_address_table_rva,
        num_functions,
    );
    let name_pointers = read_u32_table(
        bytes,
        sections,
        size_of_headers,
        table.name_pointer_rva,
        num_names,
    );
    let ordinals = read_u16_table(
        bytes,
        sections,
        size_of_headers,
        table.ordinal_table_rva,
        num_names,
    );

    if eat.is_empty() {
        return Some(ExportDirectory {
            table,
            name,
            exports: Vec::new(),
        });
    }

    let export_range = dd.virtual_address..dd.virtual_address.wrapping_add(dd.size);
    let mut exports = Vec::new();
    let mut named_ordinals = std::collections::HashSet::new();

    for i in 0..name_pointers.len().min(ordinals.len()) {
        let ordinal_offset = ordinals[i];
        named_ordinals.insert(ordinal_offset);
        let Some(&rva) = eat.get(ordinal_offset as usize) else {
            continue;
        };
        if rva == 0 || rva == 0xffff_ffff {
            continue;
        }
        let export_name =
            utils::read_cstr_at_rva(bytes, sections, size_of_headers, name_pointers[i] as usize);
        if let Some(ref export_name) = export_name {
            if !tools::is_printable(export_name) {
                diagnostics.push(
                    Code::ExpBinaryName,
                    Severity::Warning,
                    0,
                    name_pointers[i],
                    format!("export name contains non-printable bytes: {:?}", export_name),
                );
            }
        }
        let forwarder = export_range
            .contains(&rva)
            .then(|| utils::read_cstr_at_rva(bytes, sections, size_of_headers, rva as usize))
            .flatten();
        exports.push(ExportEntry {
            ordinal: ordinal_offset as u32 + table.ordinal_base,
            name: export_name,
            rva,
            forwarder,
        });
    }

    // by-ordinal-only exports: populated EAT slots with no name
    for (i, &rva) in eat.iter().enumerate() {
        if named_ordinals.contains(&(i as u16)) || rva == 0 || rva == 0xffff_ffff {
            continue;
        }
        let forwarder = export_range
            .contains(&rva)
            .then(|| utils::read_cstr_at_rva(bytes, sections, size_of_headers, rva as usize))
            .flatten();
        exports.push(ExportEntry {
            ordinal: i as u32 + table.ordinal_base,
            name: None,
            rva,
            forwarder,
        });
    }

    if let (Some(min), Some(max)) = (
        exports.iter().map(|e| e.ordinal).min(),
        exports.iter().map(|e| e.ordinal).max(),
    ) {
        let span = (max - min + 1) as usize;
        if span > exports.len() + 256 {
            diagnostics.push(
                Code::ExpOrdinalGap,
                Severity::Warning,
                0,
                dd.virtual_address,
                format!(
                    "export ordinals span {} values for {} exports",
                    span,
                    exports.len()
                ),
            );
        }
    }

    Some(ExportDirectory {
        table,
        name,
        exports,
    })
}

fn read_u32_table(
    bytes: &[u8],
    sections: &[section_table::SectionTable],
    size_of_headers: usize,
    table_rva: u32,
    count: usize,
) -> Vec<u32> {
    let mut table = Vec::new();
    if table_rva == 0 || table_rva == 0xffff_ffff || count == 0 {
        return table;
    }
    let Some(mut offset) = utils::find_offset(table_rva as usize, sections, size_of_headers) else {
        return table;
    };
    for _ in 0..count {
        match bytes.gread_with::<u32>(&mut offset, scroll::LE) {
            Ok(value) => table.push(value),
            Err(_) => break,
        }
    }
    table
}

fn read_u16_table(
    bytes: &[u8],
    sections: &[section_table::SectionTable],
    size_of_headers: usize,
    table_rva: u32,
    count: usize,
) -> Vec<u16> {
    let mut table = Vec::new();
    if table_rva == 0 || table_rva == 0xffff_ffff || count == 0 {
        return table;
    }
    let Some(mut offset) = utils::find_offset(table_rva as usize, sections, size_of_headers) else {
        return table;
    };
    for _ in 0..count {
        match bytes.gread_with::<u16>(&mut offset, scroll::LE) {
            Ok(value) => table.push(value),
            Err(_) => break,
        }
    }
    table
}
