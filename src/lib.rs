//! # relic
//!
//! A parsing and unpacking crate for the executable formats of the
//! MS-DOS/Windows/OS-2 lineage:
//!
//! - 16-bit MZ (DOS), including the packers historically applied to it
//!   (PKLITE, LZEXE, EXEPACK, DIET, Knowledge Dynamics)
//! - 16-bit NE (Windows 3.x, OS/2 1.x)
//! - 32-bit LE/LX (DOS extenders, VxDs, OS/2 2.x)
//! - PE32 and PE32+ (Windows)
//!
//! `relic` is written for two audiences: tools that inspect metadata
//! (imports, exports, resources, version information), and malware-analysis
//! tools that must characterise evasive or malformed files without crashing
//! on adversarial input. Parsing never panics on hostile bytes; structural
//! oddities surface as [`diag::Diagnostic`]s on the parsed root while
//! parsing continues, and only the small hard-error taxonomy in
//! [`error::Error`] aborts a parse.
//!
//! ```no_run
//! use relic::Object;
//!
//! fn main() -> relic::error::Result<()> {
//!     let bytes = std::fs::read("foo.exe")?;
//!     match Object::parse(&bytes)? {
//!         Object::Pe(pe) => println!("pe: {} imports", pe.imports.len()),
//!         Object::Ne(ne) => println!("ne: {} segments", ne.segments.len()),
//!         Object::Le(le) => println!("{}: {} objects", le.format_name(), le.objects.len()),
//!         Object::Mz(mz) => println!("mz, packer: {:?}", mz.fingerprint),
//!         Object::Unknown(magic) => println!("unknown magic: {:#x}", magic),
//!     }
//!     Ok(())
//! }
//! ```

pub mod anomaly;
pub mod diag;
pub mod error;
pub mod explode;
pub mod le;
pub mod mz;
pub mod ne;
pub mod pe;
pub mod resource;
pub(crate) mod tools;

use scroll::Pread;

/// The format of a parsed executable.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Format {
    Mz,
    Ne,
    Le,
    Lx,
    Pe32,
    Pe32Plus,
}

/// A parsed executable of any supported format.
#[derive(Debug)]
pub enum Object<'a> {
    /// A plain (possibly packed) DOS MZ executable
    Mz(mz::MzFile<'a>),
    /// A 16-bit NE executable
    Ne(ne::NeFile<'a>),
    /// A 32-bit linear LE or LX executable
    Le(le::LeFile<'a>),
    /// A PE32 or PE32+ executable
    Pe(pe::PE<'a>),
    /// Unrecognised bytes; the payload is the leading magic that was read
    Unknown(u64),
}

impl<'a> Object<'a> {
    /// Classify `bytes` and parse them with the appropriate parser.
    ///
    /// The signature table is checked in order: an MZ magic (`MZ` or `ZM`)
    /// makes this a DOS-lineage file; `e_lfanew` at offset 0x3c is then
    /// probed for a `PE\0\0`, `NE`, `LE` or `LX` signature. An `e_lfanew`
    /// below 0x40 or beyond the file, or an unknown signature there, falls
    /// back to a plain MZ. Inputs shorter than a DOS header are
    /// [`Object::Unknown`], never an error.
    pub fn parse(bytes: &'a [u8]) -> error::Result<Object<'a>> {
        if bytes.len() < mz::SIZEOF_EXTENDED_DOS_HEADER {
            let magic = match bytes.len() {
                0 => 0,
                1 => bytes[0] as u64,
                _ => bytes.pread_with::<u16>(0, scroll::LE)? as u64,
            };
            return Ok(Object::Unknown(magic));
        }
        let magic: u16 = bytes.pread_with(0, scroll::LE)?;
        if magic != mz::DOS_MAGIC && magic != mz::DOS_MAGIC_REVERSED {
            return Ok(Object::Unknown(magic as u64));
        }
        let new_offset: u32 = bytes.pread_with(mz::NEW_HEADER_POINTER_OFFSET, scroll::LE)?;
        if new_offset >= 0x40 && (new_offset as usize) + 4 <= bytes.len() {
            let offset = new_offset as usize;
            let new_magic: u32 = bytes.pread_with(offset, scroll::LE)?;
            if new_magic == pe::header::PE_MAGIC {
                return Ok(Object::Pe(pe::PE::parse(bytes)?));
            }
            match (new_magic & 0xFFFF) as u16 {
                ne::NE_MAGIC => return Ok(Object::Ne(ne::NeFile::parse(bytes)?)),
                le::LE_MAGIC | le::LX_MAGIC => {
                    return Ok(Object::Le(le::LeFile::parse(bytes)?));
                }
                _ => {}
            }
        }
        Ok(Object::Mz(mz::MzFile::parse(bytes)?))
    }

    /// The [`Format`] of this object, if it was recognised.
    pub fn format(&self) -> Option<Format> {
        match self {
            Object::Mz(_) => Some(Format::Mz),
            Object::Ne(_) => Some(Format::Ne),
            Object::Le(le) => Some(if le.is_lx() { Format::Lx } else { Format::Le }),
            Object::Pe(pe) => Some(if pe.is_64 { Format::Pe32Plus } else { Format::Pe32 }),
            Object::Unknown(_) => None,
        }
    }

    /// Human-readable format name.
    pub fn format_name(&self) -> &'static str {
        match self {
            Object::Mz(_) => "MZ",
            Object::Ne(ne) => ne.format_name(),
            Object::Le(le) => le.format_name(),
            Object::Pe(pe) => pe.format_name(),
            Object::Unknown(_) => "unknown",
        }
    }

    /// The bytes of the primary code region of this executable, when the
    /// format has a meaningful notion of one.
    pub fn code_section(&self) -> Option<&'a [u8]> {
        match self {
            Object::Mz(mz) => mz.code_section(),
            Object::Ne(ne) => ne.code_section(),
            Object::Le(le) => le.code_section(),
            Object::Pe(pe) => pe.code_section(),
            Object::Unknown(_) => None,
        }
    }

    /// The diagnostics collected while parsing this object.
    pub fn diagnostics(&self) -> Option<&diag::Diagnostics> {
        match self {
            Object::Mz(mz) => Some(&mz.diagnostics),
            Object::Ne(ne) => Some(&ne.diagnostics),
            Object::Le(le) => Some(&le.diagnostics),
            Object::Pe(pe) => Some(&pe.diagnostics),
            Object::Unknown(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny_inputs_are_unknown() {
        for len in 0..0x40 {
            let bytes = vec![0u8; len];
            match Object::parse(&bytes).unwrap() {
                Object::Unknown(_) => {}
                other => panic!("expected Unknown for {} bytes, got {:?}", len, other.format()),
            }
        }
    }

    #[test]
    fn non_mz_magic_is_unknown() {
        let mut bytes = vec![0u8; 0x80];
        bytes[0] = 0x7f;
        bytes[1] = b'E';
        match Object::parse(&bytes).unwrap() {
            Object::Unknown(magic) => assert_eq!(magic, 0x457f),
            other => panic!("expected Unknown, got {:?}", other.format()),
        }
    }
}
