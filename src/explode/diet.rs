//! DIET decompression.
//!
//! DIET compressed three kinds of files (COM, EXE, arbitrary data), across
//! several versions with different stub layouts. Detection is a signature
//! table keyed on the first byte; most variants carry a `dlz` header with
//! the compressed and original lengths. The LZ77 stream uses an 8 KiB ring
//! buffer and a variable-length match-length code.

use log::debug;
use scroll::Pread;

use crate::error;
use crate::explode::bitstream::BitReader;
use crate::explode::{DecompressionResult, Relocation};

/// Decompressed-size ceiling applied when no original length is declared.
const MAX_DIET_OUTPUT: usize = 4 * 1024 * 1024;
const RING_BUFFER_SIZE: usize = 8192;

const SIG_DLZ: &[u8] = b"dlz";
const SIG_9D89: &[u8] = &[0x9d, 0x89];
const SIG_INT21: &[u8] = &[0xb4, 0x4c, 0xcd, 0x21];
const SIG_OLD: &[u8] = &[0xfd, 0xf3, 0xa5, 0xfc, 0x8b, 0xf7, 0xbf, 0x00];
const SIG_8EDB: &[u8] = &[0x8e, 0xdb, 0x8e, 0xc0, 0x33, 0xf6, 0x33, 0xff, 0xb9];

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum DietVersion {
    V100,
    V102,
    V144,
    V145f,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum DietFileType {
    Com,
    Exe,
    Data,
}

/// Stub parameters recovered by detection.
#[derive(Debug, Default, Copy, Clone)]
pub struct DietParams {
    pub cmpr_pos: usize,
    pub crc_pos: usize,
    pub dlz_pos: usize,
    pub has_dlz_sig: bool,
    pub hdr_flags1: u8,
    pub hdr_flags2: u8,
    pub cmpr_len: usize,
    pub orig_len: usize,
    /// Read from the stub, not verified
    pub crc_reported: u16,
}

#[derive(Debug)]
pub struct Diet<'a> {
    bytes: &'a [u8],
    pub version: DietVersion,
    pub file_type: DietFileType,
    pub params: DietParams,
}

fn mem_eq(bytes: &[u8], at: usize, sig: &[u8]) -> bool {
    bytes.len() >= at + sig.len() && &bytes[at..at + sig.len()] == sig
}

impl<'a> Diet<'a> {
    /// Signature-table detection. Returns version, file type, compressed
    /// data position and CRC position.
    pub fn detect(bytes: &[u8]) -> Option<(DietVersion, DietFileType, usize, usize)> {
        if bytes.len() < 40 {
            return None;
        }

        match bytes[0] {
            0xbe => {
                if mem_eq(bytes, 35, SIG_DLZ) && mem_eq(bytes, 17, SIG_OLD) {
                    return Some((DietVersion::V102, DietFileType::Com, 35 + 11, 35 + 6));
                }
            }
            0xbf => {
                if mem_eq(bytes, 17, SIG_OLD) {
                    return Some((DietVersion::V100, DietFileType::Com, 37, 35));
                }
            }
            0xf9 => {
                if mem_eq(bytes, 65, SIG_DLZ) && mem_eq(bytes, 10, SIG_9D89) {
                    return Some((DietVersion::V144, DietFileType::Com, 65 + 11, 65 + 6));
                }
            }
            0xb4 => {
                if mem_eq(bytes, 0, SIG_INT21) && mem_eq(bytes, 4, SIG_9D89) {
                    return if mem_eq(bytes, 6, SIG_DLZ) {
                        Some((DietVersion::V144, DietFileType::Data, 6 + 11, 6 + 6))
                    } else {
                        Some((DietVersion::V100, DietFileType::Data, 8, 6))
                    };
                }
            }
            0x9d => {
                if mem_eq(bytes, 0, SIG_9D89) && mem_eq(bytes, 2, SIG_DLZ) {
                    return Some((DietVersion::V102, DietFileType::Data, 2 + 11, 2 + 6));
                }
            }
            b'M' | b'Z' => {
                if (bytes[0] == b'M' && bytes[1] == b'Z') || (bytes[0] == b'Z' && bytes[1] == b'M')
                {
                    return Self::detect_exe(bytes);
                }
            }
            _ => {}
        }
        None
    }

    fn detect_exe(bytes: &[u8]) -> Option<(DietVersion, DietFileType, usize, usize)> {
        if bytes.len() < 80 {
            return None;
        }
        let e_cparhdr = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        let codestart = e_cparhdr * 16;
        if codestart < 32 || codestart + 80 > bytes.len() {
            return None;
        }

        // the 8e db 8e c0 ... dispatch sits at a version-specific offset
        for &(probe, version) in &[
            (77usize, DietVersion::V145f),
            (72, DietVersion::V144),
            (52, DietVersion::V102),
            (55, DietVersion::V100),
        ] {
            if mem_eq(bytes, codestart + probe - 32, SIG_8EDB) {
                return Some(match version {
                    DietVersion::V145f => {
                        let dlz = codestart - 32 + 108;
                        (version, DietFileType::Exe, dlz + 11, dlz + 6)
                    }
                    DietVersion::V144 => {
                        let dlz = codestart - 32 + 107;
                        (version, DietFileType::Exe, dlz + 11, dlz + 6)
                    }
                    DietVersion::V102 => {
                        let dlz = codestart - 32 + 87;
                        (version, DietFileType::Exe, dlz + 11, dlz + 6)
                    }
                    _ => (version, DietFileType::Exe, codestart - 32 + 90, 18),
                });
            }
        }
        None
    }

    pub fn parse(bytes: &'a [u8]) -> error::Result<Diet<'a>> {
        let (version, file_type, cmpr_pos, crc_pos) = Self::detect(bytes).ok_or_else(|| {
            error::Error::UnsupportedVariant("no DIET signature recognised".into())
        })?;

        let mut params = DietParams {
            cmpr_pos,
            crc_pos,
            ..Default::default()
        };
        if crc_pos + 2 <= bytes.len() {
            params.crc_reported = bytes.pread_with(crc_pos, scroll::LE)?;
        }

        if version != DietVersion::V100 || file_type != DietFileType::Exe {
            // the `dlz` tag is six bytes before the CRC; its header carries
            // both lengths
            let dlz_pos = crc_pos - 6;
            params.dlz_pos = dlz_pos;
            params.has_dlz_sig = true;
            if dlz_pos + 11 <= bytes.len() {
                let flags_and_len = bytes[dlz_pos + 3];
                params.hdr_flags1 = flags_and_len & 0xf0;
                params.cmpr_len = ((flags_and_len & 0x0f) as usize) << 16;
                params.cmpr_len |= bytes.pread_with::<u16>(dlz_pos + 4, scroll::LE)? as usize;

                let orig_flags = bytes[dlz_pos + 8];
                params.orig_len = ((orig_flags & 0xfc) as usize) << 14;
                params.hdr_flags2 = orig_flags & 0x03;
                params.orig_len |= bytes.pread_with::<u16>(dlz_pos + 9, scroll::LE)? as usize;
            }
        } else if bytes.len() >= 36 {
            params.cmpr_len = (bytes.pread_with::<u32>(32, scroll::LE)? & 0xfffff) as usize;
        }

        if version == DietVersion::V100 && file_type == DietFileType::Data {
            params.cmpr_len = bytes.len() - params.cmpr_pos;
        }

        debug!(
            "diet {:?} {:?}: data at {:#x}, cmpr_len {:#x}, orig_len {:#x}",
            version, file_type, params.cmpr_pos, params.cmpr_len, params.orig_len
        );

        Ok(Diet {
            bytes,
            version,
            file_type,
            params,
        })
    }

    pub fn decompress(&self) -> error::Result<DecompressionResult> {
        if self.params.hdr_flags1 & 0x80 != 0 {
            return Err(error::Error::UnsupportedVariant(
                "DIET 'following block' files".into(),
            ));
        }
        let decompressed = self.decompress_lz77()?;
        let mut result = DecompressionResult::default();
        if self.file_type == DietFileType::Exe {
            self.reconstruct_exe(&decompressed, &mut result)?;
        } else {
            result.code = decompressed;
            if self.file_type == DietFileType::Com {
                result.initial_cs = 0;
                result.initial_ip = 0x100;
            }
        }
        Ok(result)
    }

    fn decompress_lz77(&self) -> error::Result<Vec<u8>> {
        let max_output = if self.params.orig_len > 0 {
            self.params.orig_len
        } else {
            MAX_DIET_OUTPUT
        };
        let mut out: Vec<u8> = Vec::with_capacity(max_output.min(MAX_DIET_OUTPUT));
        let mut ringbuf = vec![0u8; RING_BUFFER_SIZE];
        let mut ring_pos = 0usize;

        let mut reader = BitReader::new(self.bytes);
        reader.seek(self.params.cmpr_pos)?;

        macro_rules! put {
            ($byte:expr) => {{
                let byte = $byte;
                out.push(byte);
                ringbuf[ring_pos] = byte;
                ring_pos = (ring_pos + 1) % RING_BUFFER_SIZE;
            }};
        }

        while out.len() < max_output {
            if reader.bit()? == 1 {
                put!(reader.byte()?);
                continue;
            }

            let x2 = reader.bit()?;
            let v = reader.byte()? as u32;
            let matchpos: u32;
            let matchlen: u32;

            if x2 == 0 {
                let a1 = reader.bit()?;
                if a1 == 1 {
                    matchlen = 2;
                    let a2 = reader.bit()? as u32;
                    let a3 = reader.bit()? as u32;
                    let a4 = reader.bit()? as u32;
                    matchpos = 2303 - (1024 * a2 + 512 * a3 + 256 * a4 + v);
                } else if v != 0xff {
                    matchlen = 2;
                    matchpos = 0xff - v;
                } else {
                    let a2 = reader.bit()?;
                    if a2 == 0 {
                        break;
                    }
                    if self.file_type == DietFileType::Exe {
                        // segment refresh; no output
                        continue;
                    }
                    return Err(error::Error::Malformed(
                        "DIET segment refresh in a non-EXE stream".into(),
                    ));
                }
            } else {
                let a1 = reader.bit()? as u32;
                let a2 = reader.bit()?;
                if a2 == 1 {
                    matchpos = 511 - (256 * a1 + v);
                } else {
                    let a3 = reader.bit()?;
                    if a3 == 1 {
                        matchpos = 1023 - (256 * a1 + v);
                    } else {
                        let a4 = reader.bit()? as u32;
                        let a5 = reader.bit()?;
                        if a5 == 1 {
                            matchpos = 2047 - (512 * a1 + 256 * a4 + v);
                        } else {
                            let a6 = reader.bit()? as u32;
                            let a7 = reader.bit()?;
                            if a7 == 1 {
                                matchpos = 4095 - (1024 * a1 + 512 * a4 + 256 * a6 + v);
                            } else {
                                let a8 = reader.bit()? as u32;
                                matchpos = 8191
                                    - (2048 * a1 + 1024 * a4 + 512 * a6 + 256 * a8 + v);
                            }
                        }
                    }
                }
                matchlen = read_matchlen(&mut reader)?;
            }

            if matchpos as usize + 1 > out.len() {
                return Err(error::Error::Malformed(format!(
                    "DIET back-reference {} before start of output",
                    matchpos
                )));
            }
            let mut src = (ring_pos + RING_BUFFER_SIZE - 1 - matchpos as usize) % RING_BUFFER_SIZE;
            for _ in 0..matchlen {
                let byte = ringbuf[src];
                put!(byte);
                src = (src + 1) % RING_BUFFER_SIZE;
            }
        }
        Ok(out)
    }

    /// The decompressed EXE stream is the original code followed by the
    /// original MZ header and relocation table; the header position comes
    /// from an immediate in the stub.
    fn reconstruct_exe(
        &self,
        decompressed: &[u8],
        result: &mut DecompressionResult,
    ) -> error::Result<()> {
        let entry_offset = match self.version {
            DietVersion::V100 | DietVersion::V102 => 53,
            DietVersion::V144 => 73,
            DietVersion::V145f => 26,
        };
        let e_cparhdr: u16 = self.bytes.pread_with(8, scroll::LE)?;
        let entry_point = e_cparhdr as usize * 16;
        if entry_point + entry_offset + 2 > self.bytes.len() {
            return Err(error::Error::Malformed(
                "DIET stub truncated before the header-position parameter".into(),
            ));
        }
        let iparam1: u16 = self
            .bytes
            .pread_with(entry_point + entry_offset, scroll::LE)?;
        let mz_pos_approx = iparam1 as usize * 16;

        let mut mz_pos = mz_pos_approx;
        if self.params.has_dlz_sig && self.params.hdr_flags1 & 0x20 != 0 {
            mz_pos = mz_pos_approx + self.params.orig_len % 16;
        }

        if mz_pos + 28 > decompressed.len() {
            // early versions only store an approximation; scan for the magic
            let mut found = false;
            for i in 0..16 {
                if mz_pos_approx + i + 28 > decompressed.len() {
                    break;
                }
                let sig = u16::from_le_bytes([
                    decompressed[mz_pos_approx + i],
                    decompressed[mz_pos_approx + i + 1],
                ]);
                if sig == 0x5a4d || sig == 0x4d5a {
                    mz_pos = mz_pos_approx + i;
                    found = true;
                    break;
                }
            }
            if !found {
                return Err(error::Error::Malformed(
                    "no MZ header in DIET decompressed data".into(),
                ));
            }
        }
        if mz_pos + 2 <= decompressed.len() {
            let sig = u16::from_le_bytes([decompressed[mz_pos], decompressed[mz_pos + 1]]);
            if sig != 0x5a4d && sig != 0x4d5a {
                return Err(error::Error::Malformed(format!(
                    "bad MZ signature {:#x} in DIET decompressed data",
                    sig
                )));
            }
        }

        let mz_hdr = &decompressed[mz_pos..];
        let read_word = |offset: usize| -> u16 {
            if offset + 2 > mz_hdr.len() {
                0
            } else {
                u16::from_le_bytes([mz_hdr[offset], mz_hdr[offset + 1]])
            }
        };

        let e_crlc = read_word(6);
        result.initial_ss = read_word(14);
        result.initial_sp = read_word(16);
        result.checksum = read_word(18);
        result.initial_ip = read_word(20);
        result.initial_cs = read_word(22);
        result.min_extra_paragraphs = read_word(10);
        result.max_extra_paragraphs = read_word(12);
        let e_lfarlc = read_word(24);

        // DIET delta-encodes the relocation table it stores after the header
        let mut pos = mz_pos + e_lfarlc as usize;
        let mut segment: u16 = 0;
        let mut offset: u16 = 0;
        for _ in 0..e_crlc {
            if pos + 2 > decompressed.len() {
                break;
            }
            let n = u16::from_le_bytes([decompressed[pos], decompressed[pos + 1]]);
            pos += 2;
            if n & 0x8000 != 0 {
                if n >= 0xc000 {
                    offset = offset.wrapping_add(n);
                } else {
                    offset = offset.wrapping_add(n - 0x8000);
                }
            } else {
                segment = n;
                if pos + 2 <= decompressed.len() {
                    offset = u16::from_le_bytes([decompressed[pos], decompressed[pos + 1]]);
                    pos += 2;
                }
            }
            result.relocations.push(Relocation { segment, offset });
        }

        result.code = decompressed[..mz_pos].to_vec();
        Ok(())
    }
}

fn read_matchlen(reader: &mut BitReader) -> error::Result<u32> {
    // lengths 3..6 are unary-coded
    for nbits in 1..=4u32 {
        if reader.bit()? == 1 {
            return Ok(2 + nbits);
        }
    }
    let x1 = reader.bit()?;
    let x2 = reader.bit()?;
    if x1 == 1 {
        return Ok(7 + x2 as u32);
    }
    if x2 == 0 {
        let x3 = reader.bit()? as u32;
        let x4 = reader.bit()? as u32;
        let x5 = reader.bit()? as u32;
        return Ok(9 + 4 * x3 + 2 * x4 + x5);
    }
    Ok(17 + reader.byte()? as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A v1.02 `dlz`-tagged data file holding two literal bytes.
    fn synthetic_diet_data() -> Vec<u8> {
        let mut bytes = vec![0u8; 64];
        bytes[0] = 0x9d;
        bytes[1] = 0x89;
        bytes[2..5].copy_from_slice(b"dlz");
        bytes[5] = 0x00; // flags / cmpr_len high nibble
        bytes[6..8].copy_from_slice(&2u16.to_le_bytes()); // cmpr_len
        bytes[8..10].copy_from_slice(&0u16.to_le_bytes()); // crc
        bytes[10] = 0x00; // orig_len flags
        bytes[11..13].copy_from_slice(&2u16.to_le_bytes()); // orig_len
        // stream: two literal bits then bytes
        bytes[13] = 0x03;
        bytes[14] = 0x00;
        bytes[15] = b'H';
        bytes[16] = b'I';
        bytes
    }

    #[test]
    fn detects_and_decompresses_data_file() {
        let bytes = synthetic_diet_data();
        let (version, file_type, cmpr_pos, crc_pos) = Diet::detect(&bytes).unwrap();
        assert_eq!(version, DietVersion::V102);
        assert_eq!(file_type, DietFileType::Data);
        assert_eq!(cmpr_pos, 13);
        assert_eq!(crc_pos, 8);

        let diet = Diet::parse(&bytes).unwrap();
        assert_eq!(diet.params.orig_len, 2);
        let result = diet.decompress().unwrap();
        assert_eq!(result.code, b"HI");
    }

    #[test]
    fn ring_buffer_matches() {
        // literals 'a' 'b', then a short two-byte match reaching back to 'a'
        // (00 + v=0xfe + a1=0 -> matchpos 1): output "abab"
        let mut bytes = synthetic_diet_data();
        bytes[11..13].copy_from_slice(&4u16.to_le_bytes()); // orig_len 4
        // bits: 1,1,0,0,0  -> word 0b00011 = 0x0003
        bytes[13] = 0x03;
        bytes[14] = 0x00;
        bytes[15] = b'a';
        bytes[16] = b'b';
        bytes[17] = 0xfe; // v
        let result = Diet::parse(&bytes).unwrap().decompress().unwrap();
        assert_eq!(result.code, b"abab");
    }

    #[test]
    fn no_signature_is_unsupported() {
        let bytes = vec![0u8; 64];
        assert!(matches!(
            Diet::parse(&bytes),
            Err(error::Error::UnsupportedVariant(_))
        ));
    }
}
