//! The PE signature, COFF header, and header aggregate.

use crate::diag::{Code, Diagnostics, Severity};
use crate::error;
use crate::mz;
use crate::pe::optional_header;
use log::debug;
use scroll::{Pread, Pwrite, SizeWith};

/// `PE\0\0`, little endian
pub const PE_MAGIC: u32 = 0x0000_4550;
pub const SIZEOF_PE_MAGIC: usize = 4;
pub const SIZEOF_COFF_HEADER: usize = 20;

/// COFF File Header
#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct CoffHeader {
    /// The machine type
    pub machine: u16,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbol_table: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

/// The contents of this field are assumed to be applicable to any machine type
pub const COFF_MACHINE_UNKNOWN: u16 = 0x0;
/// Intel 386 or later processors and compatible processors
pub const COFF_MACHINE_X86: u16 = 0x14c;
/// x64
pub const COFF_MACHINE_X86_64: u16 = 0x8664;
/// ARM little endian
pub const COFF_MACHINE_ARM: u16 = 0x1c0;
/// ARM Thumb-2 little endian
pub const COFF_MACHINE_ARMNT: u16 = 0x1c4;
/// ARM64 little endian
pub const COFF_MACHINE_ARM64: u16 = 0xaa64;
/// EFI byte code
pub const COFF_MACHINE_EBC: u16 = 0xebc;
/// Intel Itanium processor family
pub const COFF_MACHINE_IA64: u16 = 0x200;
/// MIPS little endian
pub const COFF_MACHINE_R4000: u16 = 0x166;
/// RISC-V 32-bit address space
pub const COFF_MACHINE_RISCV32: u16 = 0x5032;
/// RISC-V 64-bit address space
pub const COFF_MACHINE_RISCV64: u16 = 0x5064;

impl CoffHeader {
    pub fn parse(bytes: &[u8], offset: &mut usize) -> error::Result<Self> {
        Ok(bytes.gread_with(offset, scroll::LE)?)
    }
}

/// Convert machine to str representation
pub fn machine_to_str(machine: u16) -> &'static str {
    match machine {
        COFF_MACHINE_UNKNOWN => "UNKNOWN",
        COFF_MACHINE_X86 => "X86",
        COFF_MACHINE_X86_64 => "X86_64",
        COFF_MACHINE_ARM => "ARM",
        COFF_MACHINE_ARMNT => "ARM_NT",
        COFF_MACHINE_ARM64 => "ARM64",
        COFF_MACHINE_EBC => "EBC",
        COFF_MACHINE_IA64 => "IA64",
        COFF_MACHINE_R4000 => "R4000",
        COFF_MACHINE_RISCV32 => "RISC-V_32",
        COFF_MACHINE_RISCV64 => "RISC-V_64",
        _ => "COFF_UNKNOWN",
    }
}

#[derive(Debug, PartialEq, Copy, Clone, Default)]
pub struct Header {
    pub dos_header: mz::DosHeader,
    /// `e_lfanew`
    pub pe_pointer: u32,
    /// PE Magic: PE\0\0, little endian
    pub signature: u32,
    pub coff_header: CoffHeader,
    pub optional_header: Option<optional_header::OptionalHeader>,
}

impl Header {
    pub fn parse(bytes: &[u8], diagnostics: &mut Diagnostics) -> error::Result<Self> {
        let dos_header = mz::DosHeader::parse(bytes)?;
        if bytes.len() < mz::SIZEOF_EXTENDED_DOS_HEADER {
            return Err(error::Error::Malformed(format!(
                "file of {} bytes cannot hold an extended DOS header",
                bytes.len()
            )));
        }
        let pe_pointer: u32 = bytes.pread_with(mz::NEW_HEADER_POINTER_OFFSET, scroll::LE)?;
        let mut offset = pe_pointer as usize;
        let signature: u32 = bytes.gread_with(&mut offset, scroll::LE).map_err(|_| {
            error::Error::Malformed(format!("cannot read PE signature at {:#x}", pe_pointer))
        })?;
        if signature != PE_MAGIC {
            return Err(error::Error::BadMagic(signature as u64));
        }
        let coff_header = CoffHeader::parse(bytes, &mut offset)?;
        debug!("coff: {:?}", coff_header);
        let optional_header = if coff_header.size_of_optional_header > 0 {
            let expected = if bytes.pread_with::<u16>(offset, scroll::LE).unwrap_or(0)
                == optional_header::MAGIC_64
            {
                optional_header::SIZEOF_OPTIONAL_HEADER_64
            } else {
                optional_header::SIZEOF_OPTIONAL_HEADER_32
            };
            if (coff_header.size_of_optional_header as usize) > expected {
                diagnostics.push(
                    Code::OptOversizedOptionalHdr,
                    Severity::Warning,
                    offset as u64,
                    0,
                    format!(
                        "SizeOfOptionalHeader is {:#x}, expected at most {:#x}",
                        coff_header.size_of_optional_header, expected
                    ),
                );
            }
            Some(optional_header::OptionalHeader::parse(
                bytes,
                &mut offset,
                diagnostics,
            )?)
        } else {
            None
        };
        Ok(Header {
            dos_header,
            pe_pointer,
            signature,
            coff_header,
            optional_header,
        })
    }

    /// File offset of the first section table entry.
    pub fn section_table_offset(&self) -> usize {
        self.pe_pointer as usize
            + SIZEOF_PE_MAGIC
            + SIZEOF_COFF_HEADER
            + self.coff_header.size_of_optional_header as usize
    }
}
