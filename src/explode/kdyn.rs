//! Knowledge Dynamics (INSTALIT) decompression.
//!
//! The packer appends the compressed payload after the stub's declared
//! image, preceded by a copy of the original MZ header. The stream is LZW
//! with 9- to 12-bit codes, a dictionary-reset code (0x100), an end code
//! (0x101), and the historical decoder's 1024-byte input window whose
//! refill quirks are part of the format in practice.

use log::debug;

use crate::error;
use crate::explode::DecompressionResult;
use crate::mz::DosHeader;

/// The `jmp` opcode sequence at file offset 0x200 that identifies the stub.
pub const KDYN_SIGNATURE: [u8; 3] = [0xe9, 0x99, 0x00];
pub const KDYN_SIGNATURE_OFFSET: usize = 0x200;

const MBUFFER_SIZE: usize = 1024;
const MBUFFER_EDGE: usize = MBUFFER_SIZE - 3;
const DICT_SIZE: usize = 768 * 16;
const KEY_MASK: [u16; 4] = [0x01ff, 0x03ff, 0x07ff, 0x0fff];

#[derive(Debug)]
pub struct KnowledgeDynamics<'a> {
    bytes: &'a [u8],
    /// The original MZ header, stored verbatim before the payload
    pub inner_header: DosHeader,
    expected_size: u32,
    code_offset: usize,
}

impl<'a> KnowledgeDynamics<'a> {
    pub fn parse(bytes: &'a [u8], dos: &DosHeader) -> error::Result<KnowledgeDynamics<'a>> {
        if bytes.len() < KDYN_SIGNATURE_OFFSET + 3
            || bytes[KDYN_SIGNATURE_OFFSET..KDYN_SIGNATURE_OFFSET + 3] != KDYN_SIGNATURE
        {
            return Err(error::Error::UnsupportedVariant(
                "no Knowledge Dynamics stub signature".into(),
            ));
        }

        let extra_data_start = {
            let mut start = dos.pages_in_file as usize * 512;
            if dos.bytes_on_last_page != 0 {
                start -= 512 - dos.bytes_on_last_page as usize;
            }
            start
        };
        if extra_data_start + 0x25 > bytes.len() {
            return Err(error::Error::Malformed(
                "Knowledge Dynamics payload header past end of file".into(),
            ));
        }
        let inner_header = DosHeader::parse(&bytes[extra_data_start..])?;

        let inner_code_start = inner_header.load_module_start();
        let inner_code_end = inner_header.load_module_end();
        let expected_size = inner_code_end.saturating_sub(inner_code_start) as u32;
        let code_offset = extra_data_start + inner_code_start;
        debug!(
            "knowledge dynamics: payload at {:#x}, expected {:#x} bytes",
            code_offset, expected_size
        );

        Ok(KnowledgeDynamics {
            bytes,
            inner_header,
            expected_size,
            code_offset,
        })
    }

    /// The unpacked size declared by the stored original header.
    pub fn unpacked_size(&self) -> u32 {
        self.expected_size
    }

    pub fn decompress(&self) -> error::Result<DecompressionResult> {
        let code = self.unpack_lzw()?;
        Ok(DecompressionResult {
            code,
            relocations: Vec::new(),
            initial_cs: self.inner_header.initial_relative_cs,
            initial_ip: self.inner_header.initial_ip,
            initial_ss: self.inner_header.initial_relative_ss,
            initial_sp: self.inner_header.initial_sp,
            checksum: self.inner_header.checksum,
            min_extra_paragraphs: ((self.expected_size + 0x20) / 64) as u16,
            max_extra_paragraphs: self.inner_header.maximum_extra_paragraphs,
        })
    }

    fn unpack_lzw(&self) -> error::Result<Vec<u8>> {
        let mut input_pos = self.code_offset.min(self.bytes.len());
        let mut mbuffer = [0u8; MBUFFER_SIZE];
        let first = MBUFFER_SIZE.min(self.bytes.len() - input_pos);
        mbuffer[..first].copy_from_slice(&self.bytes[input_pos..input_pos + first]);
        input_pos += first;

        let mut pos = 0usize;
        let mut reset_hack = false;
        let mut step = 9usize;

        // each dictionary entry chains to a previous entry and adds one byte
        let mut dict_key = vec![0u16; DICT_SIZE];
        let mut dict_val = vec![0u8; DICT_SIZE];
        let mut dict_index: u16 = 0x0102;
        let mut dict_range: u16 = 0x0200;

        // entries decode backwards, so bytes pass through a small queue
        let mut queue = [0u8; 0xff];
        let mut queued = 0usize;

        let mut last_char = 0u8;
        let mut last_index: u16 = 0;
        let mut out: Vec<u8> = Vec::new();

        loop {
            if reset_hack {
                step = 9;
                dict_range = 0x0200;
                dict_index = 0x0102;
            }
            let mut byte_pos = pos / 8;
            let mut bit_pos = pos % 8;
            pos += step;

            if byte_pos >= MBUFFER_EDGE {
                let bytes_extra = MBUFFER_SIZE - byte_pos;
                let bytes_left = MBUFFER_SIZE - bytes_extra;
                for j in 0..bytes_extra {
                    mbuffer[j] = mbuffer[bytes_left + j];
                }
                let remains = self.bytes.len() - input_pos;
                let to_read = remains.min(bytes_left);
                mbuffer[bytes_extra..bytes_extra + to_read]
                    .copy_from_slice(&self.bytes[input_pos..input_pos + to_read]);
                input_pos += to_read;

                pos = bit_pos + step;
                byte_pos = 0;
                if reset_hack {
                    bit_pos = bytes_extra;
                }
            }

            let big_index = ((mbuffer[byte_pos + 2] as u32) << 16)
                | ((mbuffer[byte_pos + 1] as u32) << 8)
                | mbuffer[byte_pos] as u32;
            let mut next_index = ((big_index >> bit_pos) & 0xffff) as u16;

            if step - 9 >= KEY_MASK.len() {
                return Err(error::Error::Malformed(
                    "Knowledge Dynamics code width overflow".into(),
                ));
            }
            next_index &= KEY_MASK[step - 9];

            if reset_hack {
                last_index = next_index;
                last_char = (next_index & 0x00ff) as u8;
                out.push(last_char);
                reset_hack = false;
                continue;
            }
            if next_index == 0x0101 {
                break;
            }
            if next_index == 0x0100 {
                reset_hack = true;
                continue;
            }

            let keep_index = next_index;

            if next_index >= dict_index {
                // code not yet in the dictionary: expand the previous one
                next_index = last_index;
                if queued >= queue.len() {
                    return Err(error::Error::Malformed(
                        "Knowledge Dynamics queue overflow".into(),
                    ));
                }
                queue[queued] = last_char;
                queued += 1;
            }

            while next_index > 0x00ff {
                if queued >= queue.len() || next_index as usize >= DICT_SIZE {
                    return Err(error::Error::Malformed(
                        "Knowledge Dynamics dictionary chain overflow".into(),
                    ));
                }
                queue[queued] = dict_val[next_index as usize];
                queued += 1;
                next_index = dict_key[next_index as usize];
            }

            last_char = (next_index & 0x00ff) as u8;
            if queued >= queue.len() {
                return Err(error::Error::Malformed(
                    "Knowledge Dynamics queue overflow".into(),
                ));
            }
            queue[queued] = last_char;
            queued += 1;

            while queued > 0 {
                queued -= 1;
                out.push(queue[queued]);
            }

            if dict_index as usize >= DICT_SIZE {
                return Err(error::Error::Malformed(
                    "Knowledge Dynamics dictionary overflow".into(),
                ));
            }
            dict_key[dict_index as usize] = last_index;
            dict_val[dict_index as usize] = last_char;
            dict_index += 1;
            last_index = keep_index;

            if dict_index >= dict_range && step < 12 {
                step += 1;
                dict_range *= 2;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Outer stub + stored original header + a three-code LZW stream:
    /// reset, literal 'A', end.
    fn synthetic_kdyn() -> Vec<u8> {
        let mut bytes = vec![0u8; 0x480];
        bytes[0] = b'M';
        bytes[1] = b'Z';
        bytes[4] = 0x02; // 2 pages -> payload at 0x400
        bytes[8] = 0x02;
        bytes[KDYN_SIGNATURE_OFFSET..KDYN_SIGNATURE_OFFSET + 3].copy_from_slice(&KDYN_SIGNATURE);

        // stored original header at 0x400
        let inner = 0x400;
        bytes[inner] = b'M';
        bytes[inner + 1] = b'Z';
        bytes[inner + 2] = 0x40; // bytes on last page
        bytes[inner + 4] = 0x02; // pages
        bytes[inner + 8] = 0x02; // header paragraphs -> code at inner+0x20
        bytes[inner + 14] = 0x30; // ss
        bytes[inner + 16] = 0x40; // sp
        bytes[inner + 20] = 0x10; // ip
        bytes[inner + 22] = 0x20; // cs
        bytes[inner + 12] = 0xff; // max mem
        bytes[inner + 13] = 0x0f;

        // LZW stream at 0x420: 9-bit codes 0x100, 0x041, 0x101
        bytes[inner + 0x20] = 0x00;
        bytes[inner + 0x21] = 0x83;
        bytes[inner + 0x22] = 0x04;
        bytes[inner + 0x23] = 0x04;
        bytes
    }

    #[test]
    fn unpacks_literal_after_reset() {
        let bytes = synthetic_kdyn();
        let dos = DosHeader::parse(&bytes).unwrap();
        let kdyn = KnowledgeDynamics::parse(&bytes, &dos).unwrap();
        let result = kdyn.decompress().unwrap();
        assert_eq!(result.code, b"A");
        assert_eq!(result.initial_cs, 0x20);
        assert_eq!(result.initial_ip, 0x10);
        assert_eq!(result.initial_ss, 0x30);
        assert_eq!(result.initial_sp, 0x40);
        assert_eq!(result.max_extra_paragraphs, 0x0fff);
    }

    #[test]
    fn missing_stub_signature_is_rejected() {
        let mut bytes = synthetic_kdyn();
        bytes[KDYN_SIGNATURE_OFFSET] = 0x90;
        let dos = DosHeader::parse(&bytes).unwrap();
        assert!(matches!(
            KnowledgeDynamics::parse(&bytes, &dos),
            Err(error::Error::UnsupportedVariant(_))
        ));
    }
}
