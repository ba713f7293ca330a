//! The TLS directory.

use scroll::Pread;

use crate::diag::{Code, Diagnostics, Severity};
use crate::pe::data_directories;
use crate::pe::section_table;
use crate::pe::utils;
use crate::tools;

/// The TLS directory with pointer fields widened to 64 bits; the PE32
/// variant stores them as `u32`.
#[derive(Debug, PartialEq, Copy, Clone, Default)]
pub struct ImageTlsDirectory {
    /// VA (not RVA) of the start of the template data
    pub start_address_of_raw_data: u64,
    pub end_address_of_raw_data: u64,
    pub address_of_index: u64,
    /// VA of the null-terminated callback pointer array
    pub address_of_callbacks: u64,
    pub size_of_zero_fill: u32,
    pub characteristics: u32,
}

/// Parsed TLS information.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TlsDirectory<'a> {
    pub directory: ImageTlsDirectory,
    /// The template data, when its VA maps into the file
    pub raw_data: Option<&'a [u8]>,
    /// Callback VAs, in declaration order
    pub callbacks: Vec<u64>,
}

pub fn parse<'a>(
    bytes: &'a [u8],
    sections: &[section_table::SectionTable],
    size_of_headers: usize,
    dd: data_directories::DataDirectory,
    image_base: u64,
    is_64: bool,
    diagnostics: &mut Diagnostics,
) -> Option<TlsDirectory<'a>> {
    let mut offset = utils::find_offset(dd.virtual_address as usize, sections, size_of_headers)?;

    let mut read_ptr = |offset: &mut usize| -> Option<u64> {
        if is_64 {
            bytes.gread_with::<u64>(offset, scroll::LE).ok()
        } else {
            bytes.gread_with::<u32>(offset, scroll::LE).ok().map(u64::from)
        }
    };
    let directory = ImageTlsDirectory {
        start_address_of_raw_data: read_ptr(&mut offset)?,
        end_address_of_raw_data: read_ptr(&mut offset)?,
        address_of_index: read_ptr(&mut offset)?,
        address_of_callbacks: read_ptr(&mut offset)?,
        size_of_zero_fill: bytes.gread_with(&mut offset, scroll::LE).ok()?,
        characteristics: bytes.gread_with(&mut offset, scroll::LE).ok()?,
    };

    // the raw data addresses are VAs; rebase before mapping
    let raw_data = if directory.start_address_of_raw_data >= image_base
        && directory.end_address_of_raw_data > directory.start_address_of_raw_data
    {
        let start_rva = (directory.start_address_of_raw_data - image_base) as usize;
        let len =
            (directory.end_address_of_raw_data - directory.start_address_of_raw_data) as usize;
        utils::find_offset(start_rva, sections, size_of_headers).and_then(|start| {
            (start + len <= bytes.len()).then(|| &bytes[start..start + len])
        })
    } else {
        None
    };

    let mut callbacks = Vec::new();
    if directory.address_of_callbacks >= image_base {
        let rva = (directory.address_of_callbacks - image_base) as usize;
        if let Some(mut cb_offset) = utils::find_offset(rva, sections, size_of_headers) {
            for _ in 0..tools::MAX_TABLE_ENTRIES {
                let Some(callback) = read_ptr(&mut cb_offset) else {
                    diagnostics.push(
                        Code::TruncatedFile,
                        Severity::Error,
                        cb_offset as u64,
                        rva as u32,
                        "TLS callback array truncated without a null terminator",
                    );
                    break;
                };
                if callback == 0 {
                    break;
                }
                callbacks.push(callback);
            }
        }
    }

    Some(TlsDirectory {
        directory,
        raw_data,
        callbacks,
    })
}
