//! The exception directory: the `.pdata` runtime function table used for
//! x64 stack unwinding.

use scroll::{Pread, Pwrite, SizeWith};

use crate::pe::data_directories;
use crate::pe::section_table;
use crate::pe::utils;
use crate::tools;

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct RuntimeFunction {
    pub begin_address: u32,
    pub end_address: u32,
    pub unwind_info_address: u32,
}

pub const SIZEOF_RUNTIME_FUNCTION: usize = 12;

pub fn parse(
    bytes: &[u8],
    sections: &[section_table::SectionTable],
    size_of_headers: usize,
    dd: data_directories::DataDirectory,
) -> Vec<RuntimeFunction> {
    let mut functions = Vec::new();
    let Some(mut offset) = utils::find_offset(dd.virtual_address as usize, sections, size_of_headers)
    else {
        return functions;
    };
    let count = (dd.size as usize / SIZEOF_RUNTIME_FUNCTION).min(tools::MAX_TABLE_ENTRIES);
    for _ in 0..count {
        match bytes.gread_with::<RuntimeFunction>(&mut offset, scroll::LE) {
            Ok(function) => functions.push(function),
            Err(_) => break,
        }
    }
    functions
}
