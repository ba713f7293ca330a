//! A PE32 and PE32+ parser.
//!
//! Parsing is fully eager: `PE::parse` reads the headers, the section
//! table, and every populated data directory, accumulating diagnostics as
//! it goes. Nothing mutates after the root is returned, so sharing it
//! across threads is safe by construction.

use log::debug;

use crate::diag::Diagnostics;
use crate::error;
use crate::resource::ResourceDirectory;

pub mod bound_import;
pub mod certificate_table;
pub mod characteristic;
pub mod clr;
pub mod data_directories;
pub mod debug;
pub mod delay_import;
pub mod exception;
pub mod export;
pub mod header;
pub mod import;
pub mod load_config;
pub mod optional_header;
pub mod relocation;
pub mod rich_header;
pub mod section_table;
pub mod tls;
pub mod utils;

#[cfg(feature = "authenticode")]
pub mod authenticode;

/// An analyzed PE32/PE32+ binary.
#[derive(Debug)]
pub struct PE<'a> {
    pub(crate) bytes: &'a [u8],
    /// The DOS, COFF and optional headers
    pub header: header::Header,
    /// The section table
    pub sections: Vec<section_table::SectionTable>,
    /// Whether this is a `dll`
    pub is_lib: bool,
    /// Whether the binary is PE32+ (64-bit)
    pub is_64: bool,
    /// Entry point RVA
    pub entry: u32,
    /// Preferred load address
    pub image_base: u64,
    /// The exporting module's name, when it has an export directory
    pub name: Option<String>,
    /// Imported DLLs, in descriptor order
    pub imports: Vec<import::ImportDll>,
    /// The export directory, when present
    pub exports: Option<export::ExportDirectory>,
    /// Base relocation blocks
    pub relocations: Vec<relocation::BaseRelocBlock>,
    /// The Rich header, when present
    pub rich_header: Option<rich_header::RichHeader>,
    /// TLS directory, template data, and callbacks
    pub tls: Option<tls::TlsDirectory<'a>>,
    /// Debug directory entries
    pub debug_entries: Vec<debug::DebugEntry>,
    /// Load configuration, when present
    pub load_config: Option<load_config::LoadConfig>,
    /// Delay-loaded DLLs
    pub delay_imports: Vec<delay_import::DelayImportDll>,
    /// Bound import records
    pub bound_imports: Vec<bound_import::BoundImport>,
    /// `.pdata` runtime functions
    pub exceptions: Vec<exception::RuntimeFunction>,
    /// Attribute certificates (Authenticode signatures)
    pub certificates: Vec<certificate_table::AttributeCertificate<'a>>,
    /// CLR header, when this is a .NET image
    pub clr: Option<clr::ClrHeader>,
    /// The resource tree, when present
    pub resources: Option<ResourceDirectory<'a>>,
    /// Everything suspicious or broken that was seen along the way
    pub diagnostics: Diagnostics,
}

impl<'a> PE<'a> {
    /// Reads a PE binary from the underlying `bytes`.
    pub fn parse(bytes: &'a [u8]) -> error::Result<Self> {
        let mut diagnostics = Diagnostics::new();
        let header = header::Header::parse(bytes, &mut diagnostics)?;
        debug!("header: {:?}", header.coff_header);

        let mut offset = header.section_table_offset();
        let nsections = header.coff_header.number_of_sections as usize;
        if nsections > bytes.len() / section_table::SIZEOF_SECTION_TABLE {
            return Err(error::Error::BufferTooShort(nsections, "sections"));
        }
        let mut sections = Vec::with_capacity(nsections);
        for i in 0..nsections {
            let section = section_table::SectionTable::parse(bytes, &mut offset)?;
            debug!("({}) {:?} {:?}", i, section.name(), section);
            sections.push(section);
        }

        let is_lib = characteristic::is_dll(header.coff_header.characteristics);
        let rich_header = rich_header::parse(bytes, header.pe_pointer, &mut diagnostics);

        let mut pe = PE {
            bytes,
            header,
            sections,
            is_lib,
            is_64: false,
            entry: 0,
            image_base: 0,
            name: None,
            imports: Vec::new(),
            exports: None,
            relocations: Vec::new(),
            rich_header,
            tls: None,
            debug_entries: Vec::new(),
            load_config: None,
            delay_imports: Vec::new(),
            bound_imports: Vec::new(),
            exceptions: Vec::new(),
            certificates: Vec::new(),
            clr: None,
            resources: None,
            diagnostics,
        };

        if let Some(optional_header) = pe.header.optional_header {
            pe.is_64 = optional_header.is_64();
            pe.entry = optional_header.standard_fields.address_of_entry_point;
            pe.image_base = optional_header.windows_fields.image_base;
            let size_of_headers = optional_header.windows_fields.size_of_headers as usize;
            debug!(
                "entry {:#x} image_base {:#x} is_64: {}",
                pe.entry, pe.image_base, pe.is_64
            );

            let directories = &optional_header.data_directories;
            if let Some(dd) = *directories.get_import_table() {
                pe.imports = import::parse(
                    bytes,
                    &pe.sections,
                    size_of_headers,
                    dd,
                    pe.is_64,
                    &mut pe.diagnostics,
                );
            }
            if let Some(dd) = *directories.get_export_table() {
                pe.exports =
                    export::parse(bytes, &pe.sections, size_of_headers, dd, &mut pe.diagnostics);
                pe.name = pe.exports.as_ref().and_then(|e| e.name.clone());
            }
            if let Some(dd) = *directories.get_base_relocation_table() {
                pe.relocations = relocation::parse(
                    bytes,
                    &pe.sections,
                    size_of_headers,
                    dd,
                    &mut pe.diagnostics,
                );
            }
            if let Some(dd) = *directories.get_tls_table() {
                pe.tls = tls::parse(
                    bytes,
                    &pe.sections,
                    size_of_headers,
                    dd,
                    pe.image_base,
                    pe.is_64,
                    &mut pe.diagnostics,
                );
            }
            if let Some(dd) = *directories.get_debug_table() {
                pe.debug_entries = debug::parse(bytes, &pe.sections, size_of_headers, dd);
            }
            if let Some(dd) = *directories.get_load_config_table() {
                pe.load_config = load_config::parse(
                    bytes,
                    &pe.sections,
                    size_of_headers,
                    dd,
                    pe.is_64,
                    &mut pe.diagnostics,
                );
            }
            if let Some(dd) = *directories.get_delay_import_descriptor() {
                pe.delay_imports = delay_import::parse(
                    bytes,
                    &pe.sections,
                    size_of_headers,
                    dd,
                    pe.image_base,
                    pe.is_64,
                    &mut pe.diagnostics,
                );
            }
            if let Some(dd) = *directories.get_bound_import_table() {
                pe.bound_imports = bound_import::parse(
                    bytes,
                    &pe.sections,
                    size_of_headers,
                    dd,
                    &mut pe.diagnostics,
                );
            }
            if let Some(dd) = *directories.get_exception_table() {
                pe.exceptions = exception::parse(bytes, &pe.sections, size_of_headers, dd);
            }
            if let Some(dd) = *directories.get_certificate_table() {
                pe.certificates = certificate_table::parse(bytes, dd, &mut pe.diagnostics);
            }
            if let Some(dd) = *directories.get_clr_runtime_header() {
                pe.clr = clr::parse(bytes, &pe.sections, size_of_headers, dd);
            }
            if let Some(dd) = *directories.get_resource_table() {
                pe.resources = ResourceDirectory::parse_pe(
                    bytes,
                    &pe.sections,
                    size_of_headers,
                    dd,
                    &mut pe.diagnostics,
                );
            }
        }

        crate::anomaly::check_pe(&mut pe);
        Ok(pe)
    }

    pub fn format_name(&self) -> &'static str {
        if self.is_64 { "PE32+" } else { "PE32" }
    }

    /// The raw bytes of the section containing the entry point, falling
    /// back to the first executable section.
    pub fn code_section(&self) -> Option<&'a [u8]> {
        let section = self
            .sections
            .iter()
            .find(|s| self.entry != 0 && s.contains_rva(self.entry))
            .or_else(|| self.sections.iter().find(|s| s.is_executable()))?;
        let start = section.pointer_to_raw_data as usize;
        let end = (start + section.size_of_raw_data as usize).min(self.bytes.len());
        (start < end).then(|| &self.bytes[start..end])
    }

    /// The section containing `rva`, if any.
    pub fn section_containing(&self, rva: u32) -> Option<&section_table::SectionTable> {
        self.sections.iter().find(|s| s.contains_rva(rva))
    }

    /// Translate an RVA to a file offset through the section map.
    pub fn rva_to_offset(&self, rva: u32) -> Option<usize> {
        let size_of_headers = self
            .header
            .optional_header
            .map(|oh| oh.windows_fields.size_of_headers as usize)
            .unwrap_or(0);
        utils::find_offset(rva as usize, &self.sections, size_of_headers)
    }

    /// Bytes appended past the last section's raw data, if any.
    pub fn overlay(&self) -> Option<&'a [u8]> {
        let end = self
            .sections
            .iter()
            .map(|s| s.pointer_to_raw_data as usize + s.size_of_raw_data as usize)
            .max()?;
        (end < self.bytes.len()).then(|| &self.bytes[end..])
    }

    // Security-feature surface: pure projections of header flags.

    /// ASLR: the image may be rebased at load time.
    pub fn has_aslr(&self) -> bool {
        self.dll_characteristics()
            & characteristic::IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE
            != 0
    }

    /// 64-bit high-entropy ASLR; only meaningful for PE32+.
    pub fn has_high_entropy_aslr(&self) -> bool {
        self.is_64
            && self.dll_characteristics()
                & characteristic::IMAGE_DLLCHARACTERISTICS_HIGH_ENTROPY_VA
                != 0
    }

    /// DEP / NX compatibility.
    pub fn has_dep(&self) -> bool {
        self.dll_characteristics() & characteristic::IMAGE_DLLCHARACTERISTICS_NX_COMPAT != 0
    }

    /// Control Flow Guard.
    pub fn has_cfg(&self) -> bool {
        self.dll_characteristics() & characteristic::IMAGE_DLLCHARACTERISTICS_GUARD_CF != 0
    }

    /// SafeSEH: PE32 only, and only when the load config carries a handler
    /// table.
    pub fn has_safeseh(&self) -> bool {
        !self.is_64
            && self
                .load_config
                .as_ref()
                .map(|lc| lc.has_safeseh())
                .unwrap_or(false)
    }

    /// Whether this is a .NET image.
    pub fn is_dotnet(&self) -> bool {
        self.clr.is_some()
    }

    fn dll_characteristics(&self) -> u16 {
        self.header
            .optional_header
            .map(|oh| oh.windows_fields.dll_characteristics)
            .unwrap_or(0)
    }
}
