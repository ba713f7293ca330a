//! Microsoft EXEPACK decompression.
//!
//! EXEPACK appends a variables block at `cs:0` of the packed file, ending in
//! the `RB` signature word, followed by the unpacker stub, its
//! `"Packed file is corrupt"` string, and the packed relocation table. The
//! packed data itself is expanded *backwards*: commands are read from the
//! end of the packed block toward the front, writing the output from its end
//! toward its front.

use scroll::Pread;

use crate::error;
use crate::explode::{DecompressionResult, Relocation};
use crate::mz::DosHeader;

/// The EXEPACK variables block, including the trailing `RB` signature.
pub const SIZEOF_EXEPACK_HEADER: usize = 0x12;
/// Size of the unpacker stub between the variables block and the error string.
pub const SIZEOF_EXEPACK_UNPACKER: usize = 0x105;
/// Size of the `"Packed file is corrupt"` string.
pub const SIZEOF_EXEPACK_ERRMSG: usize = 0x16;

/// The nine-word variables block at `cs:0`.
#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread)]
pub struct ExepackHeader {
    pub real_ip: u16,
    pub real_cs: u16,
    /// scratch for the unpacker, meaningless on disk
    pub mem_start: u16,
    pub exepack_size: u16,
    pub real_sp: u16,
    pub real_ss: u16,
    /// unpacked size in paragraphs
    pub dest_len: u16,
    pub skip_len: u16,
    /// `RB`
    pub signature: u16,
}

/// `RB`, little endian
pub const EXEPACK_SIGNATURE: u16 = 0x4252;

#[derive(Debug)]
pub struct Exepack<'a> {
    bytes: &'a [u8],
    dos: DosHeader,
    pub header: ExepackHeader,
    exe_data_start: usize,
    packed_len: usize,
    header_start: usize,
}

impl<'a> Exepack<'a> {
    pub fn parse(bytes: &'a [u8], dos: &DosHeader) -> error::Result<Exepack<'a>> {
        let exe_data_start = dos.load_module_start();
        let packed_len = dos.initial_relative_cs as usize * 0x10;
        let header_start = exe_data_start + packed_len;

        let header: ExepackHeader = bytes.pread_with(header_start, scroll::LE)?;
        if header.signature != EXEPACK_SIGNATURE {
            return Err(error::Error::BadMagic(header.signature as u64));
        }
        Ok(Exepack {
            bytes,
            dos: *dos,
            header,
            exe_data_start,
            packed_len,
            header_start,
        })
    }

    /// Unpacked size in bytes.
    pub fn unpacked_size(&self) -> usize {
        self.header.dest_len as usize * 16
    }

    pub fn decompress(&self) -> error::Result<DecompressionResult> {
        if self.exe_data_start + self.packed_len > self.bytes.len() {
            return Err(error::Error::Malformed(
                "EXEPACK packed data extends past end of file".into(),
            ));
        }
        let buffer = &self.bytes[self.exe_data_start..self.exe_data_start + self.packed_len];
        let out_len = self.unpacked_size().max(self.packed_len);
        let mut out = vec![0xffu8; out_len];
        out[..self.packed_len].copy_from_slice(buffer);

        let mut dst_pos = out_len;
        let mut src_pos = self.packed_len;
        let mut take = |src_pos: &mut usize| -> error::Result<u8> {
            *src_pos = src_pos.checked_sub(1).ok_or_else(|| {
                error::Error::Malformed("EXEPACK command stream underflows packed data".into())
            })?;
            Ok(buffer[*src_pos])
        };

        // skip the 0xff padding that pads the packed block to a paragraph
        loop {
            let byte = take(&mut src_pos)?;
            if byte != 0xff {
                src_pos += 1;
                break;
            }
        }

        loop {
            let cmd = take(&mut src_pos)?;
            match cmd & 0xfe {
                0xb0 => {
                    let hi = take(&mut src_pos)? as usize;
                    let lo = take(&mut src_pos)? as usize;
                    let length = hi * 0x100 + lo;
                    let fill = take(&mut src_pos)?;
                    dst_pos = dst_pos.checked_sub(length).ok_or_else(|| {
                        error::Error::Malformed("EXEPACK fill underflows output".into())
                    })?;
                    let start = dst_pos.checked_sub(1).ok_or_else(|| {
                        error::Error::Malformed("EXEPACK fill underflows output".into())
                    })?;
                    out[start..start + length].fill(fill);
                }
                0xb2 => {
                    let hi = take(&mut src_pos)? as usize;
                    let lo = take(&mut src_pos)? as usize;
                    let length = hi * 0x100 + lo;
                    dst_pos = dst_pos.checked_sub(length).ok_or_else(|| {
                        error::Error::Malformed("EXEPACK copy underflows output".into())
                    })?;
                    src_pos = src_pos.checked_sub(length).ok_or_else(|| {
                        error::Error::Malformed("EXEPACK copy underflows packed data".into())
                    })?;
                    out[dst_pos..dst_pos + length]
                        .copy_from_slice(&buffer[src_pos..src_pos + length]);
                }
                other => {
                    return Err(error::Error::Malformed(format!(
                        "unknown EXEPACK command {:#04x}",
                        other
                    )));
                }
            }
            if cmd & 1 == 1 {
                break;
            }
        }

        Ok(DecompressionResult {
            code: out,
            relocations: self.relocations()?,
            initial_ip: self.header.real_ip,
            initial_cs: self.header.real_cs,
            initial_sp: self.header.real_sp,
            initial_ss: self.header.real_ss,
            checksum: self.dos.checksum,
            min_extra_paragraphs: self.dos.minimum_extra_paragraphs,
            max_extra_paragraphs: 0xffff,
        })
    }

    /// The packed relocation table behind the error string: sixteen sections
    /// of `(count:u16, offsets:u16[count])`, section N patching segment
    /// `N * 0x1000`.
    fn relocations(&self) -> error::Result<Vec<Relocation>> {
        let mut offset =
            self.header_start + SIZEOF_EXEPACK_HEADER + SIZEOF_EXEPACK_UNPACKER + SIZEOF_EXEPACK_ERRMSG;
        let mut relocations = Vec::new();
        for section in 0u16..16 {
            let count: u16 = self.bytes.gread_with(&mut offset, scroll::LE)?;
            for _ in 0..count {
                let entry: u16 = self.bytes.gread_with(&mut offset, scroll::LE)?;
                relocations.push(Relocation {
                    segment: section.wrapping_mul(0x1000),
                    offset: entry,
                });
            }
        }
        Ok(relocations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_exepack() -> Vec<u8> {
        let mut bytes = vec![0u8; 0x200];
        bytes[0] = b'M';
        bytes[1] = b'Z';
        bytes[4] = 0x01; // pages
        bytes[8] = 0x02; // header paragraphs -> data at 0x20
        bytes[0x16] = 0x01; // cs = 1 -> 16 packed bytes

        // packed block at 0x20: junk data, then (read backwards) a
        // terminating fill command: 0xb1, hi 0, lo 4, fill 0xaa, then padding
        for (i, byte) in bytes[0x20..0x2b].iter_mut().enumerate() {
            *byte = i as u8;
        }
        bytes[0x2b] = 0xaa; // fill byte
        bytes[0x2c] = 0x04; // length low
        bytes[0x2d] = 0x00; // length high
        bytes[0x2e] = 0xb1; // fill command, last bit set
        bytes[0x2f] = 0xff; // paragraph padding

        // variables block at 0x30
        let header: [u16; 9] = [
            0x0100, // ip
            0x0000, // cs
            0x0000, // mem_start
            0x0150, // exepack_size
            0x0200, // sp
            0x0003, // ss
            0x0002, // dest_len -> 32 bytes
            0x0001, // skip_len
            EXEPACK_SIGNATURE,
        ];
        for (i, word) in header.iter().enumerate() {
            bytes[0x30 + 2 * i..0x30 + 2 * i + 2].copy_from_slice(&word.to_le_bytes());
        }

        // error string for the fingerprint
        bytes[0x147..0x147 + 0x16].copy_from_slice(b"Packed file is corrupt");

        // relocation table at 0x15d: section 0 has one entry, rest empty
        bytes[0x15d..0x15f].copy_from_slice(&1u16.to_le_bytes());
        bytes[0x15f..0x161].copy_from_slice(&0x0042u16.to_le_bytes());
        bytes
    }

    #[test]
    fn unpacks_backwards_fill() {
        let bytes = synthetic_exepack();
        let dos = DosHeader::parse(&bytes).unwrap();
        let exepack = Exepack::parse(&bytes, &dos).unwrap();
        assert_eq!(exepack.unpacked_size(), 32);
        let result = exepack.decompress().unwrap();
        assert_eq!(result.code.len(), 32);
        // the packed block is mirrored at the front
        assert_eq!(result.code[0..4], [0, 1, 2, 3]);
        // the fill command wrote 4 bytes of 0xaa at the tail
        assert_eq!(result.code[27..31], [0xaa; 4]);
        assert_eq!(result.initial_ip, 0x0100);
        assert_eq!(result.initial_ss, 0x0003);
        assert_eq!(result.initial_sp, 0x0200);
        assert_eq!(
            result.relocations,
            vec![Relocation { segment: 0, offset: 0x42 }]
        );
    }

    #[test]
    fn bad_signature_is_rejected() {
        let mut bytes = synthetic_exepack();
        bytes[0x40] = b'X';
        let dos = DosHeader::parse(&bytes).unwrap();
        assert!(matches!(
            Exepack::parse(&bytes, &dos),
            Err(error::Error::BadMagic(_))
        ));
    }

    #[test]
    fn unknown_command_is_rejected() {
        let mut bytes = synthetic_exepack();
        bytes[0x2e] = 0xc1;
        let dos = DosHeader::parse(&bytes).unwrap();
        assert!(matches!(
            Exepack::parse(&bytes, &dos).unwrap().decompress(),
            Err(error::Error::Malformed(_))
        ));
    }
}
