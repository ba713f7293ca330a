//! The 16-bit DOS MZ container and packer fingerprinting.
//!
//! A plain MZ is the fallback of the format dispatcher: anything with an
//! `MZ`/`ZM` magic whose `e_lfanew` does not lead to a recognised newer
//! header lands here. Because the interesting plain-MZ population is almost
//! entirely packed DOS binaries, parsing fingerprints the known packers by
//! byte signature and exposes [`MzFile::decompress`] for the ones this crate
//! can unpack.

use log::debug;
use scroll::{Pread, Pwrite, SizeWith};

use crate::diag::{Code, Diagnostics, Severity};
use crate::error;
use crate::explode;
use crate::tools;

/// `MZ`, little endian
pub const DOS_MAGIC: u16 = 0x5a4d;
/// `ZM`: some late-DOS linkers wrote the magic reversed and DOS accepted it
pub const DOS_MAGIC_REVERSED: u16 = 0x4d5a;
/// File offset of `e_lfanew`, the pointer to a PE/NE/LE/LX header
pub const NEW_HEADER_POINTER_OFFSET: usize = 0x3c;
/// The original 28-byte DOS header
pub const SIZEOF_DOS_HEADER: usize = 28;
/// The extended header area up to and including `e_lfanew`
pub const SIZEOF_EXTENDED_DOS_HEADER: usize = 0x40;

/// The 28-byte DOS program header.
#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct DosHeader {
    /// e_magic: `MZ` or `ZM`
    pub signature: u16,
    /// e_cblp: bytes used in the last 512-byte page, 0 meaning the page is full
    pub bytes_on_last_page: u16,
    /// e_cp: number of 512-byte pages holding the load module
    pub pages_in_file: u16,
    /// e_crlc: relocation entry count
    pub relocations: u16,
    /// e_cparhdr: header size in 16-byte paragraphs
    pub size_of_header_in_paragraphs: u16,
    /// e_minalloc
    pub minimum_extra_paragraphs: u16,
    /// e_maxalloc
    pub maximum_extra_paragraphs: u16,
    /// e_ss, relative to the load segment
    pub initial_relative_ss: u16,
    /// e_sp
    pub initial_sp: u16,
    /// e_csum
    pub checksum: u16,
    /// e_ip
    pub initial_ip: u16,
    /// e_cs, relative to the load segment (signed in practice; packers use
    /// negative values)
    pub initial_relative_cs: u16,
    /// e_lfarlc: file offset of the relocation table
    pub file_address_of_relocation_table: u16,
    /// e_ovno
    pub overlay_number: u16,
}

impl DosHeader {
    pub fn parse(bytes: &[u8]) -> error::Result<Self> {
        if bytes.len() < SIZEOF_DOS_HEADER {
            return Err(error::Error::Malformed(format!(
                "file of {} bytes cannot hold a DOS header",
                bytes.len()
            )));
        }
        let header: DosHeader = bytes.pread_with(0, scroll::LE)?;
        if header.signature != DOS_MAGIC && header.signature != DOS_MAGIC_REVERSED {
            return Err(error::Error::BadMagic(header.signature as u64));
        }
        Ok(header)
    }

    /// File offset where the load module starts.
    pub fn load_module_start(&self) -> usize {
        self.size_of_header_in_paragraphs as usize * 16
    }

    /// File offset one past the load module, as declared by the page fields.
    /// May exceed the real file size in truncated files.
    pub fn load_module_end(&self) -> usize {
        let mut end = self.pages_in_file as usize * 512;
        if self.bytes_on_last_page != 0 {
            end -= 512 - self.bytes_on_last_page as usize;
        }
        end
    }

    /// File offset of the entry point. CS is treated as signed; packers
    /// routinely point it before the relocation table.
    pub fn entry_point(&self) -> usize {
        let base = self.load_module_start() as i64;
        let cs = self.initial_relative_cs as i16 as i64;
        (base + cs * 16 + self.initial_ip as i64).max(0) as usize
    }
}

/// The packer recognised in a plain MZ, if any.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub enum CompressionFingerprint {
    #[default]
    None,
    Pklite,
    LzexeV090,
    LzexeV091,
    Exepack,
    Diet,
    KnowledgeDynamics,
}

/// A parsed plain MZ executable.
#[derive(Debug)]
pub struct MzFile<'a> {
    bytes: &'a [u8],
    pub header: DosHeader,
    /// `e_lfanew`, zero when the header area does not extend that far
    pub new_header_offset: u32,
    /// The packer recognised by fingerprint, if any
    pub fingerprint: CompressionFingerprint,
    /// The `h_pklite_info` word preceding a found `PKLITE` signature: minor
    /// version in the low nibble, bit 12 = extra compression, bit 13 = large
    /// compression
    pub pklite_info: Option<u16>,
    pub diagnostics: Diagnostics,
}

impl<'a> MzFile<'a> {
    pub fn parse(bytes: &'a [u8]) -> error::Result<MzFile<'a>> {
        let header = DosHeader::parse(bytes)?;
        let mut diagnostics = Diagnostics::new();

        let new_header_offset = if bytes.len() >= SIZEOF_EXTENDED_DOS_HEADER {
            bytes.pread_with::<u32>(NEW_HEADER_POINTER_OFFSET, scroll::LE)?
        } else {
            0
        };

        if header.load_module_end() > bytes.len() {
            diagnostics.push(
                Code::TruncatedFile,
                Severity::Warning,
                bytes.len() as u64,
                0,
                format!(
                    "load module declared to end at {:#x} but file is {:#x} bytes",
                    header.load_module_end(),
                    bytes.len()
                ),
            );
        }

        let (fingerprint, pklite_info) = fingerprint(bytes, &header);
        debug!("mz fingerprint: {:?}", fingerprint);

        Ok(MzFile {
            bytes,
            header,
            new_header_offset,
            fingerprint,
            pklite_info,
            diagnostics,
        })
    }

    pub fn format_name(&self) -> &'static str {
        "MZ"
    }

    /// The load module bytes (everything between the header and the declared
    /// end of the image, clipped to the file).
    pub fn code_section(&self) -> Option<&'a [u8]> {
        let start = self.header.load_module_start().min(self.bytes.len());
        let end = self.header.load_module_end().min(self.bytes.len());
        (start < end).then(|| &self.bytes[start..end])
    }

    /// Bytes appended past the declared image, if any.
    pub fn overlay(&self) -> Option<&'a [u8]> {
        let end = self.header.load_module_end();
        (end < self.bytes.len()).then(|| &self.bytes[end..])
    }

    /// Shannon entropy of the whole file.
    pub fn file_entropy(&self) -> f64 {
        tools::shannon_entropy(self.bytes)
    }

    /// Entropy-based packing heuristic for files no fingerprint matched.
    pub fn is_likely_packed(&self) -> bool {
        self.fingerprint != CompressionFingerprint::None
            || self
                .code_section()
                .map(|code| tools::shannon_entropy(code) >= 7.0)
                .unwrap_or(false)
    }

    /// Unpack the recognised packer's payload.
    ///
    /// Fails with [`error::Error::UnsupportedVariant`] when no fingerprint
    /// was recognised; each decompressor raises its own hard errors on
    /// contradictory streams.
    pub fn decompress(&self) -> error::Result<explode::DecompressionResult> {
        match self.fingerprint {
            CompressionFingerprint::LzexeV090 | CompressionFingerprint::LzexeV091 => {
                explode::lzexe::Lzexe::parse(self.bytes, &self.header)?.decompress()
            }
            CompressionFingerprint::Pklite => {
                explode::pklite::Pklite::parse(self.bytes, &self.header)?.decompress()
            }
            CompressionFingerprint::Exepack => {
                explode::exepack::Exepack::parse(self.bytes, &self.header)?.decompress()
            }
            CompressionFingerprint::Diet => {
                explode::diet::Diet::parse(self.bytes)?.decompress()
            }
            CompressionFingerprint::KnowledgeDynamics => {
                explode::kdyn::KnowledgeDynamics::parse(self.bytes, &self.header)?.decompress()
            }
            CompressionFingerprint::None => Err(error::Error::UnsupportedVariant(
                "no known packer fingerprint".into(),
            )),
        }
    }
}

/// Recognise known packers by byte signature. Never rejects; an unmatched
/// file is simply [`CompressionFingerprint::None`].
fn fingerprint(bytes: &[u8], header: &DosHeader) -> (CompressionFingerprint, Option<u16>) {
    // LZEXE puts its version tag where the relocation table would normally be
    if bytes.len() >= 0x20 {
        match &bytes[0x1c..0x20] {
            b"LZ09" => return (CompressionFingerprint::LzexeV090, None),
            b"LZ91" => return (CompressionFingerprint::LzexeV091, None),
            _ => {}
        }
    }

    // PKLITE's copyright banner lives in the header region at a
    // version-dependent offset; the word before it is h_pklite_info
    let header_end = header.load_module_start().min(bytes.len()).min(0x200);
    if header_end > SIZEOF_DOS_HEADER {
        let region = &bytes[..header_end];
        if let Some(pos) = region
            .windows(6)
            .position(|window| window == b"PKLITE" || window == b"PKlite")
        {
            let info = (pos >= 2).then(|| {
                u16::from_le_bytes([region[pos - 2], region[pos - 1]])
            });
            return (CompressionFingerprint::Pklite, info);
        }
    }

    if is_exepack(bytes, header) {
        return (CompressionFingerprint::Exepack, None);
    }

    // Knowledge Dynamics' stub begins with a fixed jump at 0x200
    if bytes.len() >= 0x203 && bytes[0x200..0x203] == [0xe9, 0x99, 0x00] {
        return (CompressionFingerprint::KnowledgeDynamics, None);
    }

    if explode::diet::Diet::detect(bytes).is_some() {
        return (CompressionFingerprint::Diet, None);
    }

    (CompressionFingerprint::None, None)
}

/// EXEPACK detection: the `RB` word at the end of the variables block at
/// `cs:0`, backed up by the `"Packed file is corrupt"` string the stub
/// carries right after its unpacker code.
fn is_exepack(bytes: &[u8], header: &DosHeader) -> bool {
    let exe_data_start = header.load_module_start();
    let packed_len = header.initial_relative_cs as usize * 0x10;
    let hdr_start = exe_data_start + packed_len;

    let sig_offset = hdr_start + explode::exepack::SIZEOF_EXEPACK_HEADER - 2;
    if sig_offset + 2 > bytes.len() {
        return false;
    }
    if &bytes[sig_offset..sig_offset + 2] != b"RB" {
        return false;
    }
    let str_offset = hdr_start
        + explode::exepack::SIZEOF_EXEPACK_HEADER
        + explode::exepack::SIZEOF_EXEPACK_UNPACKER;
    if str_offset + 0x16 > bytes.len() {
        return false;
    }
    &bytes[str_offset..str_offset + 0x16] == b"Packed file is corrupt"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_mz() -> Vec<u8> {
        let mut bytes = vec![0u8; 0x400];
        bytes[0] = b'M';
        bytes[1] = b'Z';
        bytes[2] = 0x00; // last page full
        bytes[4] = 0x02; // 2 pages -> 1024 bytes
        bytes[8] = 0x04; // 4 header paragraphs
        bytes
    }

    #[test]
    fn parses_reversed_magic() {
        let mut bytes = minimal_mz();
        bytes[0] = b'Z';
        bytes[1] = b'M';
        let mz = MzFile::parse(&bytes).unwrap();
        assert_eq!(mz.header.signature, DOS_MAGIC_REVERSED);
    }

    #[test]
    fn fingerprints_lzexe() {
        let mut bytes = minimal_mz();
        bytes[0x1c..0x20].copy_from_slice(b"LZ91");
        let mz = MzFile::parse(&bytes).unwrap();
        assert_eq!(mz.fingerprint, CompressionFingerprint::LzexeV091);
    }

    #[test]
    fn fingerprints_pklite_and_info_word() {
        let mut bytes = minimal_mz();
        bytes[0x1c] = 0x0c; // h_pklite_info = 0x010c (v1.12)
        bytes[0x1d] = 0x01;
        bytes[0x1e..0x24].copy_from_slice(b"PKLITE");
        let mz = MzFile::parse(&bytes).unwrap();
        assert_eq!(mz.fingerprint, CompressionFingerprint::Pklite);
        assert_eq!(mz.pklite_info, Some(0x010c));
    }

    #[test]
    fn truncated_load_module_is_a_diagnostic_not_an_error() {
        let mut bytes = minimal_mz();
        bytes[4] = 0xff; // declare far more pages than the file holds
        let mz = MzFile::parse(&bytes).unwrap();
        assert!(mz.diagnostics.has(Code::TruncatedFile));
        assert!(mz.code_section().is_some());
    }

    #[test]
    fn unpacked_file_has_no_decompressor() {
        let bytes = minimal_mz();
        let mz = MzFile::parse(&bytes).unwrap();
        assert_eq!(mz.fingerprint, CompressionFingerprint::None);
        assert!(matches!(
            mz.decompress(),
            Err(error::Error::UnsupportedVariant(_))
        ));
    }
}
