//! PKLITE decompression.
//!
//! PKLITE is a variant zoo: the version word in the header is unreliable, so
//! the variant is classified from the *code* near the entry point, in four
//! successive steps. The intro class locates the end of the register setup;
//! a descrambler class (if any) reveals an XOR- or ADD-scrambled
//! decompressor which is descrambled in place; the copier class reveals
//! where the real decompressor body sits; the decompressor class reveals
//! where the compressed data starts. Two further scans detect the extra
//! literal transformation, the large-vs-small Huffman tables, and the v1.20
//! obfuscated offset key.

use log::debug;
use scroll::Pread;

use crate::error;
use crate::explode::bitstream::BitReader;
use crate::explode::{DecompressionResult, Relocation};
use crate::mz::DosHeader;

const WILDCARD: u8 = b'?';
/// How much entry-point code is examined for classification.
const EPBYTES_LEN: usize = 2048;

// Huffman code tables: high 4 bits are the code length, low 12 bits the code.
const MATCHLENGTHS_SM: &[u16] = &[
    0x2000, 0x3004, 0x3005, 0x400c, 0x400d, 0x400e, 0x400f, 0x3003, 0x3002,
];
const MATCHLENGTHS_LG: &[u16] = &[
    0x2003, 0x3000, 0x4002, 0x4003, 0x4004, 0x500a, 0x500b, 0x500c, 0x601a, 0x601b, 0x703a,
    0x703b, 0x703c, 0x807a, 0x807b, 0x807c, 0x90fa, 0x90fb, 0x90fc, 0x90fd, 0x90fe, 0x90ff,
    0x601c, 0x2002,
];
const MATCHLENGTHS_120_SM: &[u16] = &[
    0x2003, 0x3000, 0x4004, 0x4005, 0x500e, 0x601e, 0x601f, 0x4006, 0x2002, 0x4003, 0x4002,
];
const MATCHLENGTHS_120_LG: &[u16] = &[
    0x2003, 0x3000, 0x4005, 0x4006, 0x5006, 0x5007, 0x6008, 0x6009, 0x7020, 0x7021, 0x7022,
    0x7023, 0x8048, 0x8049, 0x804a, 0x9096, 0x9097, 0x6013, 0x2002, 0x4007, 0x5005,
];
const OFFSETS_STD: &[u16] = &[
    0x1001, 0x4000, 0x4001, 0x5004, 0x5005, 0x5006, 0x5007, 0x6010, 0x6011, 0x6012, 0x6013,
    0x6014, 0x6015, 0x6016, 0x702e, 0x702f, 0x7030, 0x7031, 0x7032, 0x7033, 0x7034, 0x7035,
    0x7036, 0x7037, 0x7038, 0x7039, 0x703a, 0x703b, 0x703c, 0x703d, 0x703e, 0x703f,
];
const OFFSETS_120: &[u16] = &[
    0x1001, 0x3000, 0x5004, 0x5005, 0x5006, 0x5007, 0x6010, 0x6011, 0x6012, 0x6013, 0x6014,
    0x6015, 0x702c, 0x702d, 0x702e, 0x702f, 0x7030, 0x7031, 0x7032, 0x7033, 0x7034, 0x7035,
    0x7036, 0x7037, 0x7038, 0x7039, 0x703a, 0x703b, 0x703c, 0x703d, 0x703e, 0x703f,
];

/// Canonical Huffman decoder over a `(length << 12 | code)` table; the symbol
/// is the table index.
struct Huffman {
    entries: Vec<(u8, u16)>,
}

impl Huffman {
    fn new(table: &[u16]) -> Self {
        Huffman {
            entries: table
                .iter()
                .map(|&raw| ((raw >> 12) as u8, raw & 0x0fff))
                .collect(),
        }
    }

    fn decode(&self, reader: &mut BitReader) -> error::Result<u16> {
        let mut code: u16 = 0;
        for bits_read in 1..=12u8 {
            code = (code << 1) | reader.bit()?;
            for (value, &(bits, entry_code)) in self.entries.iter().enumerate() {
                if bits == bits_read && entry_code == code {
                    return Ok(value as u16);
                }
            }
        }
        Err(error::Error::Malformed(
            "invalid PKLITE Huffman code".into(),
        ))
    }
}

/// First classification step: the register-setup code at the entry point.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub enum IntroClass {
    #[default]
    Unknown,
    Beta,
    BetaLoadHigh,
    V100,
    V112,
    V114,
    V150,
    Un2pack,
    Megalite,
}

/// Second step: the scrambler wrapper some variants put around the
/// decompressor.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub enum DescramblerClass {
    #[default]
    None,
    V114,
    V120Var1a,
    V120Var1b,
    V150,
    V120Var2,
    Pkzip204cLike,
    Pklite201Like,
    Chk4lite201Like,
    V150Ibm,
}

/// Third step: the copier that moves the decompressor into place.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub enum CopierClass {
    #[default]
    Unknown,
    Common,
    V150Scrambled,
    Other,
    Pklite201Like,
    V120Var1Small,
    Megalite,
    Un2pack,
}

/// Fourth step: the decompressor body itself.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub enum DecompressorClass {
    #[default]
    Unknown,
    Common,
    V115,
    V120Small,
    V120SmallOld,
    Beta,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub enum ScrambleMethod {
    #[default]
    None,
    Xor,
    Add,
}

fn mem_match(mem: &[u8], pattern: &[u8], wildcard: u8) -> bool {
    if mem.len() < pattern.len() {
        return false;
    }
    pattern
        .iter()
        .zip(mem)
        .all(|(&p, &m)| p == wildcard || p == m)
}

fn search_match(
    mem: &[u8],
    start: usize,
    end: usize,
    pattern: &[u8],
    wildcard: u8,
) -> Option<usize> {
    let end = end.min(mem.len());
    if pattern.is_empty() || start >= end || end - start < pattern.len() {
        return None;
    }
    (start..=end - pattern.len()).find(|&pos| mem_match(&mem[pos..], pattern, wildcard))
}

fn rel(base: i64, raw: u16, entry: i64) -> error::Result<usize> {
    let value = base + raw as i64 - 0x100 - entry;
    if value < 0 {
        return Err(error::Error::Malformed(format!(
            "PKLITE IP-relative value {:#x} resolves before the entry point",
            raw
        )));
    }
    Ok(value as usize)
}

/// A PKLITE decompressor, classified and (if necessary) descrambled at
/// construction.
pub struct Pklite<'a> {
    bytes: &'a [u8],
    dos: DosHeader,
    start_of_dos_code: usize,
    end_of_dos_code: usize,
    entry_point: usize,
    epbytes: Vec<u8>,

    pub intro_class: IntroClass,
    pub descrambler_class: DescramblerClass,
    pub copier_class: CopierClass,
    pub decompressor_class: DecompressorClass,
    pub scramble_method: ScrambleMethod,

    initial_key: u16,
    data_before_decoder: bool,
    scrambled_word_count: usize,
    pos_of_last_scrambled_word: usize,
    position2: usize,
    copier_pos: usize,
    decompr_pos: usize,
    approx_end_of_decompressor: usize,

    /// 0 = none, 1 = XOR with the bit counter, 2 = XOR with 0xFF
    pub extra_compression: u8,
    pub large_compression: bool,
    pub v120_compression: bool,
    offset_xor_key: u8,
    cmpr_data_pos: usize,
}

impl<'a> Pklite<'a> {
    pub fn parse(bytes: &'a [u8], dos: &DosHeader) -> error::Result<Pklite<'a>> {
        let start_of_dos_code = dos.load_module_start();
        let end_of_dos_code = dos.load_module_end().min(bytes.len());
        let entry_point = dos.entry_point();

        let mut epbytes = vec![0u8; EPBYTES_LEN];
        if entry_point < bytes.len() {
            let avail = EPBYTES_LEN.min(bytes.len() - entry_point);
            epbytes[..avail].copy_from_slice(&bytes[entry_point..entry_point + avail]);
        }

        let mut pklite = Pklite {
            bytes,
            dos: *dos,
            start_of_dos_code,
            end_of_dos_code,
            entry_point,
            epbytes,
            intro_class: IntroClass::Unknown,
            descrambler_class: DescramblerClass::None,
            copier_class: CopierClass::Unknown,
            decompressor_class: DecompressorClass::Unknown,
            scramble_method: ScrambleMethod::None,
            initial_key: 0,
            data_before_decoder: false,
            scrambled_word_count: 0,
            pos_of_last_scrambled_word: 0,
            position2: 0,
            copier_pos: 0,
            decompr_pos: 0,
            approx_end_of_decompressor: 0,
            extra_compression: 0,
            large_compression: false,
            v120_compression: false,
            offset_xor_key: 0,
            cmpr_data_pos: 0,
        };
        pklite.analyze()?;
        Ok(pklite)
    }

    fn analyze(&mut self) -> error::Result<()> {
        self.analyze_intro()?;
        self.analyze_descrambler()?;
        if self.scramble_method != ScrambleMethod::None {
            self.descramble()?;
        }
        self.analyze_copier()?;
        self.analyze_decompressor()?;
        if self.cmpr_data_pos == 0 {
            return Err(error::Error::UnsupportedVariant(
                "PKLITE compressed data position not found".into(),
            ));
        }
        self.approx_end_of_decompressor = if self.data_before_decoder {
            self.end_of_dos_code.saturating_sub(self.entry_point)
        } else {
            self.cmpr_data_pos.saturating_sub(self.entry_point)
        };
        self.detect_extra_compression()?;
        self.detect_large_and_v120()?;
        self.detect_obfuscated_offsets();
        debug!(
            "pklite: intro {:?}, descrambler {:?}, copier {:?}, decompressor {:?}, extra {}, large {}, v120 {}, data at {:#x}",
            self.intro_class,
            self.descrambler_class,
            self.copier_class,
            self.decompressor_class,
            self.extra_compression,
            self.large_compression,
            self.v120_compression,
            self.cmpr_data_pos
        );
        Ok(())
    }

    fn epword(&self, pos: usize) -> u16 {
        u16::from_le_bytes([self.epbytes[pos], self.epbytes[pos + 1]])
    }

    fn analyze_intro(&mut self) -> error::Result<()> {
        let ep = &self.epbytes;

        // DX holds the descrambling key in the scrambled variants
        if mem_match(ep, b"\xb8??\xba", WILDCARD) {
            self.initial_key = self.epword(4);
        } else if mem_match(ep, b"\x50\xb8??\xba", WILDCARD) {
            self.initial_key = self.epword(5);
        }

        if mem_match(
            ep,
            b"\xb8??\x8c\xca\x03\xd0\x8c\xc9\x81\xc1??\x51\x52\xb9??\x8c\xd8\x48\x8e\xc0",
            WILDCARD,
        ) {
            self.intro_class = IntroClass::Beta;
            self.data_before_decoder = true;
            return Ok(());
        }
        if mem_match(ep, b"\x2e\x8c\x1e??\xfc\x8c\xc8\x2e\x2b\x06", WILDCARD) {
            self.intro_class = IntroClass::BetaLoadHigh;
            self.data_before_decoder = true;
            return Ok(());
        }
        if mem_match(
            ep,
            b"\xb8??\xba??\x05??\x3b\x06\x02\x00\x72\x55\x8b",
            WILDCARD,
        ) {
            self.intro_class = IntroClass::V100;
            self.position2 = 16;
            return Ok(());
        }
        if mem_match(ep, b"\xb8??\xba??\x05??\x3b\x06\x02\x00", WILDCARD) {
            if ep[13] == 0x73 {
                self.intro_class = IntroClass::V112;
                self.position2 = 15;
                return Ok(());
            } else if ep[13] == 0x72 {
                self.intro_class = IntroClass::V114;
                self.position2 = 15 + ep[14] as usize;
                return Ok(());
            }
        }
        if mem_match(ep, b"\x50\xb8??\xba??\x05??\x3b\x06\x02\x00", WILDCARD)
            && ep[14] == 0x72
        {
            self.intro_class = IntroClass::V150;
            self.position2 = 16 + ep[15] as usize;
            return Ok(());
        }
        if mem_match(ep, b"\xb8??\xba??\x05??\x50\x52", WILDCARD)
            && mem_match(&ep[30..], b"\xb9??\x2b", WILDCARD)
        {
            self.intro_class = IntroClass::Un2pack;
            self.position2 = 34;
            return Ok(());
        }
        if mem_match(ep, b"\xb8??\xba??\x05??\x3b\x06\x02\x00\x72", WILDCARD) {
            self.intro_class = IntroClass::Megalite;
            self.position2 = 15 + ep[14] as usize;
            return Ok(());
        }

        Err(error::Error::UnsupportedVariant(format!(
            "entry point bytes match no known PKLITE intro: {:02x?}",
            &ep[..16.min(ep.len())]
        )))
    }

    fn analyze_descrambler(&mut self) -> error::Result<()> {
        match self.intro_class {
            IntroClass::V112 | IntroClass::V114 | IntroClass::V150 => {}
            _ => {
                if !self.data_before_decoder {
                    self.copier_pos = self.position2;
                }
                return Ok(());
            }
        }

        let pos = self.position2;
        if pos + 200 > EPBYTES_LEN {
            self.copier_pos = self.position2;
            return Ok(());
        }
        let ep = &self.epbytes;

        let mut count_field = 0usize;
        let mut endpos_field = 0usize;
        let mut jmp_field = 0usize;
        let mut op_field = 0usize;

        if mem_match(
            &ep[pos..],
            b"\x2d\x20\x00\x8e\xd0\x2d??\x50\x52\xb9??\xbe??\x8b\xfe\xfd\x90\x49\x74?\xad\x92\x33\xc2\xab\xeb\xf6",
            WILDCARD,
        ) {
            self.descrambler_class = DescramblerClass::V114;
            count_field = pos + 11;
            endpos_field = pos + 14;
            jmp_field = pos + 22;
            op_field = pos + 25;
        } else if mem_match(
            &ep[pos..],
            b"\x8b\xfc\x81\xef??\x57\x57\x52\xb9??\xbe??\x8b\xfe\xfd\x49\x74?\xad\x92\x03\xc2\xab\xeb\xf6",
            WILDCARD,
        ) {
            self.descrambler_class = DescramblerClass::V120Var1a;
            count_field = pos + 10;
            endpos_field = pos + 13;
            jmp_field = pos + 20;
            op_field = pos + 23;
        } else if mem_match(
            &ep[pos..],
            b"\x8b\xfc\x81\xef??\x57\x57\x52\xb9??\xbe??\x8b\xfe\xfd\x90\x49\x74?\xad\x92\x03\xc2\xab\xeb\xf6",
            WILDCARD,
        ) {
            self.descrambler_class = DescramblerClass::V120Var1b;
            count_field = pos + 10;
            endpos_field = pos + 13;
            jmp_field = pos + 21;
            op_field = pos + 24;
        } else if mem_match(
            &ep[pos..],
            b"\x59\x2d\x20\x00\x8e\xd0\x51??\x00\x50\x80\x3e\x41\x01\xc3\x75\xe6\x52\xb8??\xbe??\x56\x56\x52\x50\x90",
            WILDCARD,
        ) && ep[pos + 37] == 0x74
        {
            self.descrambler_class = DescramblerClass::V150;
            count_field = pos + 20;
            endpos_field = pos + 23;
            jmp_field = pos + 38;
            op_field = pos + 45;
        } else if mem_match(&ep[pos..], b"\x2d\x20\x00", WILDCARD)
            && ep[pos + 15] == 0xb9
            && ep[pos + 18] == 0xbe
            && ep[pos + 28] == 0x74
            && ep[pos + 31] == 0x03
        {
            self.descrambler_class = DescramblerClass::V120Var2;
            count_field = pos + 16;
            endpos_field = pos + 19;
            jmp_field = pos + 28;
            op_field = pos + 31;
        } else if mem_match(&ep[pos..], b"\x2d\x20\x00", WILDCARD)
            && ep[pos + 16] == 0xb9
            && ep[pos + 19] == 0xbe
            && ep[pos + 29] == 0x74
            && ep[pos + 32] == 0x03
        {
            self.descrambler_class = DescramblerClass::Pkzip204cLike;
            count_field = pos + 16;
            endpos_field = pos + 19;
            jmp_field = pos + 29;
            op_field = pos + 32;
        } else if mem_match(&ep[pos..], b"\x2d\x20\x00", WILDCARD)
            && ep[pos + 21] == 0xb9
            && ep[pos + 24] == 0xbe
            && ep[pos + 35] == 0x74
            && ep[pos + 38] == 0x03
        {
            self.descrambler_class = DescramblerClass::Pklite201Like;
            count_field = pos + 21;
            endpos_field = pos + 24;
            jmp_field = pos + 35;
            op_field = pos + 38;
        } else if mem_match(&ep[pos..], b"\x8b\xfc\x81", WILDCARD)
            && ep[pos + 17] == 0xbb
            && ep[pos + 20] == 0xbe
            && ep[pos + 27] == 0x74
            && ep[pos + 30] == 0x03
        {
            self.descrambler_class = DescramblerClass::Chk4lite201Like;
            count_field = pos + 17;
            endpos_field = pos + 20;
            jmp_field = pos + 27;
            op_field = pos + 30;
        } else if mem_match(
            &ep[pos..],
            b"\x59\x2d\x20\x00\x8e\xd0\x51\x2d??\x50\x52\xb9??\xbe??\x8b\xfe\xfd\x90\x49\x74?\xad\x92\x33",
            WILDCARD,
        ) {
            self.descrambler_class = DescramblerClass::V150Ibm;
            count_field = pos + 13;
            endpos_field = pos + 16;
            jmp_field = pos + 24;
            op_field = pos + 27;
        }

        if self.descrambler_class == DescramblerClass::None {
            self.copier_pos = self.position2;
            return Ok(());
        }

        self.scramble_method = match self.epbytes[op_field] {
            0x33 => ScrambleMethod::Xor,
            0x03 => ScrambleMethod::Add,
            other => {
                return Err(error::Error::UnsupportedVariant(format!(
                    "unknown PKLITE scramble opcode {:#04x}",
                    other
                )));
            }
        };

        self.scrambled_word_count = self.epword(count_field) as usize;
        if self.scrambled_word_count > 0 {
            self.scrambled_word_count -= 1;
        }
        self.pos_of_last_scrambled_word = rel(
            self.start_of_dos_code as i64,
            self.epword(endpos_field),
            self.entry_point as i64,
        )?;
        self.copier_pos = jmp_field + 1 + self.epbytes[jmp_field] as usize;
        Ok(())
    }

    /// Undo the word-pair scrambling in place, walking from the first
    /// scrambled word to the last; the chain ends with the key from the
    /// intro's DX load.
    fn descramble(&mut self) -> error::Result<()> {
        if self.scrambled_word_count < 1 {
            return Ok(());
        }
        if self.pos_of_last_scrambled_word + 2 > EPBYTES_LEN {
            return Err(error::Error::Malformed(
                "PKLITE scrambled region extends past the examined entry bytes".into(),
            ));
        }
        let last = self.pos_of_last_scrambled_word;
        let span = self.scrambled_word_count * 2;
        if span > last + 2 {
            return Err(error::Error::Malformed(
                "PKLITE scrambled region underflows the entry point".into(),
            ));
        }
        let startpos = last + 2 - span;

        let mut this_word = self.epword(startpos);
        let mut pos = startpos;
        while pos <= last {
            let next_word = if pos == last {
                self.initial_key
            } else {
                self.epword(pos + 2)
            };
            let descrambled = match self.scramble_method {
                ScrambleMethod::Add => this_word.wrapping_add(next_word),
                _ => this_word ^ next_word,
            };
            self.epbytes[pos..pos + 2].copy_from_slice(&descrambled.to_le_bytes());
            this_word = next_word;
            pos += 2;
        }
        Ok(())
    }

    fn analyze_copier(&mut self) -> error::Result<()> {
        if self.data_before_decoder {
            return Ok(());
        }
        if self.copier_pos == 0 || self.copier_pos + 200 > EPBYTES_LEN {
            return Err(error::Error::UnsupportedVariant(
                "PKLITE copier position out of range".into(),
            ));
        }

        let pos = self.copier_pos;
        let ep = &self.epbytes;
        let mut decompr_field = 0usize;

        if let Some(found) = search_match(
            ep,
            pos,
            pos + 75,
            b"\xb9??\x33\xff\x57\xbe??\xfc\xf3\xa5",
            WILDCARD,
        ) {
            self.copier_class = match ep[found + 12] {
                0xcb => CopierClass::Common,
                0xca => CopierClass::V150Scrambled,
                _ => CopierClass::Other,
            };
            decompr_field = found + 7;
        } else if let Some(found) = search_match(
            ep,
            pos,
            pos + 75,
            b"\xb9??\x33\xff\x57\xfc\xbe??\xf3\xa5\xcb",
            WILDCARD,
        ) {
            self.copier_class = CopierClass::Pklite201Like;
            decompr_field = found + 8;
        } else if let Some(found) = search_match(
            ep,
            pos,
            pos + 75,
            b"\x57\xb9??\xbe??\xfc\xf3\xa5\xc3",
            WILDCARD,
        ) {
            self.copier_class = CopierClass::V120Var1Small;
            decompr_field = found + 5;
        } else if let Some(found) = search_match(
            ep,
            pos,
            pos + 75,
            b"\xb9??\x33\xff\x56\xbe??\xfc\xf2\xa5\xca",
            WILDCARD,
        ) {
            self.copier_class = CopierClass::Megalite;
            decompr_field = found + 7;
        } else if let Some(found) = search_match(
            ep,
            pos,
            pos + 75,
            b"\xb9??\x2b\xff\x57\xbe??\xfc\xf3\xa5\xcb",
            WILDCARD,
        ) {
            self.copier_class = CopierClass::Un2pack;
            decompr_field = found + 7;
        }

        if self.copier_class == CopierClass::Unknown {
            return Err(error::Error::UnsupportedVariant(format!(
                "no known PKLITE copier at {:#x}: {:02x?}",
                pos,
                &ep[pos..(pos + 16).min(ep.len())]
            )));
        }

        self.decompr_pos = rel(
            self.start_of_dos_code as i64,
            self.epword(decompr_field),
            self.entry_point as i64,
        )?;
        Ok(())
    }

    fn analyze_decompressor(&mut self) -> error::Result<()> {
        let ep = &self.epbytes;
        if self.data_before_decoder && self.decompr_pos == 0 {
            if mem_match(&ep[0x59..], b"\xf3\xa5\x2e\xa1", WILDCARD)
                && ep[0x66] == 0xcb
                && ep[0x67] == 0xfc
            {
                self.decompr_pos = 0x66;
            } else if mem_match(&ep[0x5b..], b"\xf3\xa5\x85\xed", WILDCARD)
                && ep[0x6b] == 0xcb
                && ep[0x6c] == 0xfc
            {
                self.decompr_pos = 0x6c;
            } else if mem_match(ep, b"\x2e\x8c\x1e??\xfc\x8c\xc8\x2e\x2b\x06", WILDCARD) {
                self.decompr_pos = 0x5;
            }
        }

        let pos = self.decompr_pos;
        if pos == 0 || pos + 200 > EPBYTES_LEN {
            return Err(error::Error::UnsupportedVariant(
                "PKLITE decompressor position out of range".into(),
            ));
        }

        if mem_match(&ep[pos..], b"\xfd\x8c\xdb\x53\x83\xc3", WILDCARD) {
            self.decompressor_class = DecompressorClass::Common;
            let n = ep[pos + 6] as i64 * 16;
            self.cmpr_data_pos = (self.start_of_dos_code as i64 + n - 0x100).max(0) as usize;
        } else if mem_match(&ep[pos..], b"\xfd\x8c\xdb\x53\x81\xc3", WILDCARD) {
            self.decompressor_class = DecompressorClass::V115;
            let n = self.epword(pos + 6) as i64 * 16;
            self.cmpr_data_pos = (self.start_of_dos_code as i64 + n - 0x100).max(0) as usize;
        } else if mem_match(
            &ep[pos..],
            b"\xfd\x5f\xc7\x85????\x4f\x4f\xbe??\x03\xf2\x8b\xca\xd1\xe9\xf3",
            WILDCARD,
        ) {
            self.decompressor_class = DecompressorClass::V120Small;
            let n = self.epword(pos + 11) as i64;
            self.cmpr_data_pos = (self.start_of_dos_code as i64 + n - 0x100 + 2).max(0) as usize;
        } else if mem_match(
            &ep[pos..],
            b"\xfd\x5f\x4f\x4f\xbe??\x03\xf2\x8b\xca\xd1\xe9\xf3",
            WILDCARD,
        ) {
            self.decompressor_class = DecompressorClass::V120SmallOld;
            let n = self.epword(pos + 5) as i64;
            self.cmpr_data_pos = (self.start_of_dos_code as i64 + n - 0x100 + 2).max(0) as usize;
        } else if mem_match(&ep[pos..], b"\xfc\x8c\xc8\x2e\x2b\x06??\x8e\xd8\xbf", WILDCARD) {
            self.decompressor_class = DecompressorClass::Beta;
            self.cmpr_data_pos = self.start_of_dos_code;
        }

        if self.decompressor_class == DecompressorClass::Unknown {
            return Err(error::Error::UnsupportedVariant(format!(
                "no known PKLITE decompressor at {:#x}: {:02x?}",
                pos,
                &ep[pos..(pos + 16).min(ep.len())]
            )));
        }
        Ok(())
    }

    fn detect_extra_compression(&mut self) -> error::Result<()> {
        if self.decompr_pos == 0 || self.approx_end_of_decompressor == 0 {
            return Err(error::Error::UnsupportedVariant(
                "PKLITE decompressor bounds unknown".into(),
            ));
        }
        let ep = &self.epbytes;
        if search_match(
            ep,
            self.decompr_pos,
            self.approx_end_of_decompressor,
            b"\xad\x95\xb2\x10\x72\x08\xa4\xd1\xed\x4a\x74",
            WILDCARD,
        )
        .is_some()
        {
            self.extra_compression = 0;
            return Ok(());
        }
        if let Some(found) = search_match(
            ep,
            self.decompr_pos,
            self.approx_end_of_decompressor,
            b"\xad\x95\xb2\x10\x72\x0b\xac??\xaa\xd1\xed\x4a\x74",
            WILDCARD,
        ) {
            if ep[found + 7] == 0x32 && ep[found + 8] == 0xc2 {
                self.extra_compression = 1;
                return Ok(());
            } else if ep[found + 7] == 0xf6 && ep[found + 8] == 0xd0 {
                self.extra_compression = 2;
                return Ok(());
            }
        }
        Err(error::Error::UnsupportedVariant(
            "PKLITE literal handler not recognised".into(),
        ))
    }

    fn detect_large_and_v120(&mut self) -> error::Result<()> {
        if matches!(
            self.decompressor_class,
            DecompressorClass::V120Small | DecompressorClass::V120SmallOld
        ) {
            self.v120_compression = true;
            self.large_compression = false;
            return Ok(());
        }

        let ep = &self.epbytes;
        // The offset-bits Huffman table is embedded in the decompressor; the
        // byte before it discriminates small (0x09) from large (0x18)
        if let Some(found) = search_match(
            ep,
            self.approx_end_of_decompressor.saturating_sub(60),
            self.approx_end_of_decompressor,
            b"\x01\x02\x00\x00\x03\x04\x05\x06\x00\x00\x00\x00\x00\x00\x00\x00\x07\x08\x09\x0a\x0b",
            0x3f,
        ) {
            if found > 0 {
                match ep[found - 1] {
                    0x09 => self.large_compression = false,
                    0x18 => self.large_compression = true,
                    other => {
                        return Err(error::Error::UnsupportedVariant(format!(
                            "unrecognised PKLITE table discriminator {:#04x}",
                            other
                        )));
                    }
                }
            }
            return Ok(());
        }

        // v1.20 large always uses extra compression
        if self.extra_compression == 0 {
            return Err(error::Error::UnsupportedVariant(
                "PKLITE Huffman table signature not found".into(),
            ));
        }
        if search_match(
            ep,
            self.approx_end_of_decompressor.saturating_sub(50),
            self.approx_end_of_decompressor,
            b"\x33\xc0\x8b\xd8\x8b\xc8\x8b\xd0\x8b\xe8\x8b\xf0\x8b",
            0x3f,
        )
        .is_some()
        {
            self.v120_compression = true;
            self.large_compression = true;
            return Ok(());
        }
        Err(error::Error::UnsupportedVariant(
            "PKLITE compression mode not recognised".into(),
        ))
    }

    fn detect_obfuscated_offsets(&mut self) {
        if !self.v120_compression {
            return;
        }
        if let Some(found) = search_match(
            &self.epbytes,
            self.decompr_pos + 200,
            self.approx_end_of_decompressor,
            b"\xac\x34?\x8a",
            WILDCARD,
        ) {
            self.offset_xor_key = self.epbytes[found + 2];
        }
    }

    pub fn decompress(&self) -> error::Result<DecompressionResult> {
        if self.cmpr_data_pos == 0 || self.cmpr_data_pos >= self.bytes.len() {
            return Err(error::Error::Malformed(format!(
                "PKLITE compressed data position {:#x} outside file",
                self.cmpr_data_pos
            )));
        }

        let lengths = Huffman::new(match (self.large_compression, self.v120_compression) {
            (true, true) => MATCHLENGTHS_120_LG,
            (true, false) => MATCHLENGTHS_LG,
            (false, true) => MATCHLENGTHS_120_SM,
            (false, false) => MATCHLENGTHS_SM,
        });
        let offsets = Huffman::new(if self.v120_compression {
            OFFSETS_120
        } else {
            OFFSETS_STD
        });

        // Special code values depend on the table in use
        let (long_ml_code, ml2_0_code, ml2_1_code, lit0_code, long_matchlen_bias): (
            u16,
            u16,
            u16,
            u16,
            u16,
        ) = match (self.large_compression, self.v120_compression) {
            (true, true) => (17, 18, 19, 20, 20),
            (true, false) => (22, 23, 0xffff, 0xffff, 25),
            (false, true) => (7, 8, 9, 10, 10),
            (false, false) => (7, 8, 0xffff, 0xffff, 10),
        };

        let mut reader = BitReader::new(self.bytes);
        reader.seek(self.cmpr_data_pos)?;
        let mut out: Vec<u8> = Vec::with_capacity(0x10000);

        loop {
            if reader.bit()? == 0 {
                let mut byte = reader.byte()?;
                if self.extra_compression == 1 {
                    byte ^= reader.bit_count();
                } else if self.extra_compression == 2 {
                    byte ^= 0xff;
                }
                out.push(byte);
                continue;
            }

            let len_raw = lengths.decode(&mut reader)?;
            let matchlen: u16;
            let mut offs_hi_bits: u16 = 0;
            let mut offs_have_hi_bits = false;

            if len_raw < long_ml_code {
                matchlen = len_raw + 3;
            } else if len_raw == ml2_0_code {
                matchlen = 2;
                offs_have_hi_bits = true;
            } else if len_raw == long_ml_code {
                let byte = reader.byte()?;
                if byte >= 0xfd {
                    if byte == 0xfd && self.large_compression {
                        return Err(error::Error::UnsupportedVariant(
                            "PKLITE uncompressed region".into(),
                        ));
                    }
                    if byte == 0xfe && self.large_compression {
                        // segment separator
                        continue;
                    }
                    if byte == 0xff {
                        break;
                    }
                    return Err(error::Error::Malformed(format!(
                        "unexpected PKLITE long-length escape {:#04x}",
                        byte
                    )));
                }
                matchlen = byte as u16 + long_matchlen_bias;
            } else if len_raw == lit0_code {
                out.push(0x00);
                continue;
            } else if len_raw == ml2_1_code {
                matchlen = 2;
                offs_hi_bits = 1;
                offs_have_hi_bits = true;
            } else {
                return Err(error::Error::Malformed(format!(
                    "invalid PKLITE match length code {}",
                    len_raw
                )));
            }

            if !offs_have_hi_bits {
                offs_hi_bits = offsets.decode(&mut reader)?;
            }
            let offs_lo = reader.byte()? ^ self.offset_xor_key;
            let matchpos = (offs_hi_bits << 8) | offs_lo as u16;
            if matchpos == 0 || matchpos as usize > out.len() {
                return Err(error::Error::Malformed(format!(
                    "PKLITE back-reference {:#x} before start of output",
                    matchpos
                )));
            }
            let src = out.len() - matchpos as usize;
            for i in 0..matchlen as usize {
                let byte = out[src + i];
                out.push(byte);
            }
        }

        let mut result = DecompressionResult {
            code: out,
            ..Default::default()
        };

        // Relocations follow the compressed stream; the 8-byte register
        // footer follows them
        let reloc_end = if self.extra_compression != 0 {
            self.read_reloc_table_long(reader.position(), &mut result.relocations)?
        } else {
            self.read_reloc_table_short(reader.position(), &mut result.relocations)?
        };

        if reloc_end + 8 > self.bytes.len() {
            return Err(error::Error::Malformed(
                "PKLITE register footer extends past end of file".into(),
            ));
        }
        let mut offset = reloc_end;
        result.initial_ss = self.bytes.gread_with(&mut offset, scroll::LE)?;
        result.initial_sp = self.bytes.gread_with(&mut offset, scroll::LE)?;
        result.initial_cs = self.bytes.gread_with(&mut offset, scroll::LE)?;
        result.initial_ip = self.bytes.gread_with(&mut offset, scroll::LE)?;

        result.min_extra_paragraphs = self.recover_min_mem(result.code.len());
        result.max_extra_paragraphs = self.dos.maximum_extra_paragraphs;
        result.checksum = self.dos.checksum;
        Ok(result)
    }

    /// The packer stores the unpacked memory requirement in the intro's
    /// `MOV AX, imm16`; recover min-mem from it.
    fn recover_min_mem(&self, code_size: usize) -> u16 {
        if self.data_before_decoder || self.entry_point + 4 > self.bytes.len() {
            return 0;
        }
        let mut pos = self.entry_point;
        let mut byte = self.bytes[pos];
        pos += 1;
        if byte == 0x50 {
            if pos >= self.bytes.len() {
                return 0;
            }
            byte = self.bytes[pos];
            pos += 1;
        }
        if byte == 0xb8 && pos + 2 <= self.bytes.len() {
            let n = u16::from_le_bytes([self.bytes[pos], self.bytes[pos + 1]]) as i64;
            let mem = (n << 4) + 0x100 - code_size as i64;
            if mem >= 0 {
                return (mem >> 4) as u16;
            }
        }
        0
    }

    /// `(count:u8, segment:u16, offsets:u16[count])*`, terminated by count 0.
    fn read_reloc_table_short(
        &self,
        start: usize,
        relocations: &mut Vec<Relocation>,
    ) -> error::Result<usize> {
        let mut offset = start;
        while offset < self.bytes.len() {
            let count: u8 = self.bytes.gread_with(&mut offset, scroll::LE)?;
            if count == 0 {
                return Ok(offset);
            }
            let segment: u16 = self.bytes.gread_with(&mut offset, scroll::LE)?;
            for _ in 0..count {
                let entry: u16 = self.bytes.gread_with(&mut offset, scroll::LE)?;
                relocations.push(Relocation {
                    segment,
                    offset: entry,
                });
            }
        }
        Ok(offset)
    }

    /// `(count:u16, offsets:u16[count])*` with the segment auto-advancing by
    /// 0x0fff per group, terminated by count 0xffff.
    fn read_reloc_table_long(
        &self,
        start: usize,
        relocations: &mut Vec<Relocation>,
    ) -> error::Result<usize> {
        let mut offset = start;
        let mut segment: u16 = 0;
        // some ADD-scrambled builds byte-swap their relocation offsets
        let big_endian = self.scramble_method == ScrambleMethod::Add;
        while offset + 2 <= self.bytes.len() {
            let count: u16 = self.bytes.gread_with(&mut offset, scroll::LE)?;
            if count == 0xffff {
                return Ok(offset);
            }
            for _ in 0..count {
                let entry: u16 = if big_endian {
                    self.bytes.gread_with(&mut offset, scroll::BE)?
                } else {
                    self.bytes.gread_with(&mut offset, scroll::LE)?
                };
                relocations.push(Relocation {
                    segment,
                    offset: entry,
                });
            }
            segment = segment.wrapping_add(0x0fff);
        }
        Ok(offset)
    }
}

impl core::fmt::Debug for Pklite<'_> {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        fmt.debug_struct("Pklite")
            .field("intro_class", &self.intro_class)
            .field("descrambler_class", &self.descrambler_class)
            .field("copier_class", &self.copier_class)
            .field("decompressor_class", &self.decompressor_class)
            .field("extra_compression", &self.extra_compression)
            .field("large_compression", &self.large_compression)
            .field("v120_compression", &self.v120_compression)
            .field("cmpr_data_pos", &self.cmpr_data_pos)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A hand-assembled small-compression PKLITE image: V100 intro, common
    /// copier and decompressor, two literals, a short relocation table, and
    /// the register footer.
    fn synthetic_pklite() -> Vec<u8> {
        let mut bytes = vec![0u8; 0x900];
        bytes[0] = b'M';
        bytes[1] = b'Z';
        bytes[4] = 0x04; // 4 pages
        bytes[8] = 0x02; // header paragraphs -> code at 0x20, entry at 0x20

        let entry = 0x20;
        // V100 intro (16 bytes); the MOV AX holds the min-mem word
        bytes[entry..entry + 16].copy_from_slice(&[
            0xb8, 0x34, 0x12, 0xba, 0x78, 0x56, 0x05, 0x01, 0x02, 0x3b, 0x06, 0x02, 0x00, 0x72,
            0x55, 0x8b,
        ]);
        // common copier at entry+16; the word at +7 is the decompressor
        // position, IP-relative (0x100 + 40)
        bytes[entry + 16..entry + 29].copy_from_slice(&[
            0xb9, 0x11, 0x00, 0x33, 0xff, 0x57, 0xbe, 0x28, 0x01, 0xfc, 0xf3, 0xa5, 0xcb,
        ]);
        // common decompressor at entry+40; data at paragraph 0x20 of the
        // load module, i.e. file offset 0x20 + 0x200 - 0x100 = 0x120
        bytes[entry + 40..entry + 47]
            .copy_from_slice(&[0xfd, 0x8c, 0xdb, 0x53, 0x83, 0xc3, 0x20]);
        // plain literal handler (no extra compression) at entry+60
        bytes[entry + 60..entry + 71].copy_from_slice(&[
            0xad, 0x95, 0xb2, 0x10, 0x72, 0x08, 0xa4, 0xd1, 0xed, 0x4a, 0x74,
        ]);
        // small-compression offset table, preceded by its 0x09 discriminator
        let table_pos = entry + 0xa8;
        bytes[table_pos - 1] = 0x09;
        bytes[table_pos..table_pos + 21].copy_from_slice(&[
            0x01, 0x02, 0x00, 0x00, 0x03, 0x04, 0x05, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x07, 0x08, 0x09, 0x0a, 0x0b,
        ]);

        // compressed stream at 0x120: literal 'A', literal 'B', end marker
        // (length code 7 = bits 011, then escape byte 0xff)
        bytes[0x120] = 0x34; // word 0x0034: bits 0,0,1,0,1,1
        bytes[0x121] = 0x00;
        bytes[0x122] = b'A';
        bytes[0x123] = b'B';
        bytes[0x124] = 0xff;

        // short relocation table: one group of two entries in segment 1
        bytes[0x125] = 0x02;
        bytes[0x126..0x128].copy_from_slice(&0x0001u16.to_le_bytes());
        bytes[0x128..0x12a].copy_from_slice(&0x0010u16.to_le_bytes());
        bytes[0x12a..0x12c].copy_from_slice(&0x0020u16.to_le_bytes());
        bytes[0x12c] = 0x00; // terminator

        // register footer: ss, sp, cs, ip
        bytes[0x12d..0x12f].copy_from_slice(&0x0007u16.to_le_bytes());
        bytes[0x12f..0x131].copy_from_slice(&0x0080u16.to_le_bytes());
        bytes[0x131..0x133].copy_from_slice(&0x0000u16.to_le_bytes());
        bytes[0x133..0x135].copy_from_slice(&0x0003u16.to_le_bytes());
        bytes
    }

    #[test]
    fn classifies_and_decompresses() {
        let bytes = synthetic_pklite();
        let dos = DosHeader::parse(&bytes).unwrap();
        let pklite = Pklite::parse(&bytes, &dos).unwrap();
        assert_eq!(pklite.intro_class, IntroClass::V100);
        assert_eq!(pklite.descrambler_class, DescramblerClass::None);
        assert_eq!(pklite.copier_class, CopierClass::Common);
        assert_eq!(pklite.decompressor_class, DecompressorClass::Common);
        assert_eq!(pklite.extra_compression, 0);
        assert!(!pklite.large_compression);
        assert!(!pklite.v120_compression);

        let result = pklite.decompress().unwrap();
        assert_eq!(result.code, b"AB");
        assert_eq!(
            result.relocations,
            vec![
                Relocation { segment: 1, offset: 0x10 },
                Relocation { segment: 1, offset: 0x20 },
            ]
        );
        assert_eq!(result.initial_ss, 0x0007);
        assert_eq!(result.initial_sp, 0x0080);
        assert_eq!(result.initial_cs, 0x0000);
        assert_eq!(result.initial_ip, 0x0003);
        // min-mem recovered from the intro's MOV AX, 0x1234
        assert_eq!(
            result.min_extra_paragraphs,
            (((0x1234i64 << 4) + 0x100 - 2) >> 4) as u16
        );
    }

    #[test]
    fn no_duplicate_relocations() {
        let bytes = synthetic_pklite();
        let dos = DosHeader::parse(&bytes).unwrap();
        let result = Pklite::parse(&bytes, &dos).unwrap().decompress().unwrap();
        let mut seen = std::collections::HashSet::new();
        for reloc in &result.relocations {
            assert!(seen.insert(*reloc), "duplicate relocation {:?}", reloc);
        }
    }

    #[test]
    fn unknown_intro_is_unsupported_variant() {
        let mut bytes = synthetic_pklite();
        bytes[0x20] = 0x90; // clobber the intro
        let dos = DosHeader::parse(&bytes).unwrap();
        match Pklite::parse(&bytes, &dos) {
            Err(error::Error::UnsupportedVariant(msg)) => {
                assert!(msg.contains("intro"), "message should name the stage: {}", msg)
            }
            other => panic!("expected UnsupportedVariant, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn determinism() {
        let bytes = synthetic_pklite();
        let dos = DosHeader::parse(&bytes).unwrap();
        let a = Pklite::parse(&bytes, &dos).unwrap().decompress().unwrap();
        let b = Pklite::parse(&bytes, &dos).unwrap().decompress().unwrap();
        assert_eq!(a, b);
    }
}
