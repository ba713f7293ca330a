//! The undocumented Rich header Microsoft's linker hides between the DOS
//! stub and the PE signature.
//!
//! Layout, back to front: an XOR-encrypted `DanS` marker, encrypted
//! `(comp_id, count)` pairs, a plaintext `Rich` marker, and the plaintext
//! XOR key. Parsing searches backwards from the PE signature for `Rich`,
//! takes the key, then searches further back for the encrypted `DanS`.

use log::debug;
use scroll::Pread;

use crate::diag::{Code, Diagnostics, Severity};

/// `Rich`, little endian
pub const RICH_MARKER: u32 = 0x6863_6952;
/// `DanS`, little endian
pub const DANS_MARKER: u32 = 0x536e_6144;

/// Build-tool classes the product id maps into.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum RichComponentType {
    Unknown,
    CCompiler,
    CppCompiler,
    Linker,
    Assembler,
    ResourceCompiler,
    ImportLib,
    Export,
    Cvtomf,
    Ltcg,
    Pogo,
    Cvtcil,
    AliasObj,
    Cvtpgd,
}

/// One decrypted `(comp_id, count)` pair.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct RichEntry {
    /// High half of comp.id: which tool
    pub product_id: u16,
    /// Low half of comp.id: the tool's build number
    pub build_number: u16,
    /// How many objects that tool contributed
    pub count: u32,
}

impl RichEntry {
    pub fn comp_id(&self) -> u32 {
        ((self.product_id as u32) << 16) | self.build_number as u32
    }

    pub fn component_type(&self) -> RichComponentType {
        use RichComponentType::*;
        match self.product_id {
            0x0001 => ImportLib,
            0x006d | 0x0083 | 0x00aa | 0x00ce | 0x00e0 | 0x0104 => CCompiler,
            0x006e | 0x0084 | 0x00ab | 0x00cf | 0x00e1 | 0x0105 => CppCompiler,
            0x0078 | 0x0091 | 0x009d | 0x00cc | 0x00de | 0x0102 => Linker,
            0x007d | 0x0095 | 0x009e | 0x00cd | 0x00df | 0x0103 => Assembler,
            0x007c | 0x0094 | 0x009a | 0x00c9 | 0x00db | 0x00ff => ResourceCompiler,
            0x007b | 0x0093 | 0x009c | 0x00cb | 0x00dd | 0x0101 => ImportLib,
            0x007a | 0x0092 | 0x009b | 0x00ca | 0x00dc | 0x0100 => Export,
            0x0079 => Cvtomf,
            0x0082 | 0x0089 | 0x008a | 0x008b | 0x00ae | 0x00af | 0x00b0 | 0x00d2 | 0x00d3
            | 0x00d4 | 0x00e4 | 0x00e5 | 0x00e6 | 0x0108 | 0x0109 | 0x010a => Ltcg,
            0x008c..=0x008f | 0x00b1..=0x00b4 | 0x00d5..=0x00d8 | 0x00e7..=0x00ea
            | 0x010b..=0x010e => Pogo,
            0x0080 | 0x0081 | 0x0087 | 0x0088 | 0x00ac | 0x00ad | 0x00d0 | 0x00d1 | 0x00e2
            | 0x00e3 | 0x0106 | 0x0107 => Cvtcil,
            0x007e | 0x0096 | 0x0098 | 0x00c7 | 0x00d9 | 0x00fd => AliasObj,
            0x0077 | 0x0090 | 0x0099 | 0x00c8 | 0x00da | 0x00fe => Cvtpgd,
            _ => Unknown,
        }
    }

    /// The Visual Studio era the product id belongs to, when known.
    pub fn vs_version(&self) -> Option<&'static str> {
        Some(match self.product_id {
            0x005a..=0x0076 => "VS2003",
            0x0077..=0x0082 => "VS2005",
            0x0083..=0x0097 => "VS2008",
            0x0098..=0x00c6 => "VS2010",
            0x00c7..=0x00d8 => "VS2012",
            0x00d9..=0x00ec => "VS2013",
            0x00fd..=0x010e => "VS2015+",
            _ => return None,
        })
    }

    pub fn is_compiler(&self) -> bool {
        matches!(
            self.component_type(),
            RichComponentType::CCompiler | RichComponentType::CppCompiler
        )
    }

    pub fn is_linker(&self) -> bool {
        self.component_type() == RichComponentType::Linker
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RichHeader {
    /// The plaintext XOR key following the `Rich` marker
    pub xor_key: u32,
    /// File offset of the decrypted `DanS` marker
    pub file_offset: u32,
    /// Total size from `DanS` through the key
    pub size: u32,
    pub entries: Vec<RichEntry>,
}

impl RichHeader {
    pub fn total_count(&self) -> u32 {
        self.entries.iter().map(|e| e.count).sum()
    }

    pub fn linker(&self) -> Option<&RichEntry> {
        self.entries.iter().find(|e| e.is_linker())
    }

    pub fn primary_compiler(&self) -> Option<&RichEntry> {
        self.entries
            .iter()
            .filter(|e| e.is_compiler())
            .max_by_key(|e| e.count)
    }
}

/// Parse the Rich header, if any. Absence of either marker, or a failed
/// `DanS` check, reports the header as absent; only the checksum is a
/// diagnostic matter.
pub fn parse(bytes: &[u8], pe_pointer: u32, diagnostics: &mut Diagnostics) -> Option<RichHeader> {
    let limit = (pe_pointer as usize).min(bytes.len());
    if limit < 0x40 {
        return None;
    }

    // the Rich marker is dword-aligned; scan backwards from the PE signature
    let mut rich_offset = None;
    let mut probe = limit.saturating_sub(4) & !3;
    while probe >= 0x40 {
        if bytes.pread_with::<u32>(probe, scroll::LE).ok()? == RICH_MARKER {
            rich_offset = Some(probe);
            break;
        }
        if probe < 4 {
            break;
        }
        probe -= 4;
    }
    let rich_offset = rich_offset?;
    if rich_offset + 8 > bytes.len() {
        return None;
    }
    let xor_key: u32 = bytes.pread_with(rich_offset + 4, scroll::LE).ok()?;

    // now search further back for DanS, decrypting as we go
    let mut dans_offset = None;
    let mut probe = rich_offset.saturating_sub(4);
    while probe >= 0x20 {
        let word: u32 = bytes.pread_with(probe, scroll::LE).ok()?;
        if word ^ xor_key == DANS_MARKER {
            dans_offset = Some(probe);
            break;
        }
        if probe < 4 {
            break;
        }
        probe -= 4;
    }
    let dans_offset = dans_offset?;
    debug!(
        "rich header: DanS at {:#x}, Rich at {:#x}, key {:#x}",
        dans_offset, rich_offset, xor_key
    );

    // DanS is followed by three zero (encrypted) padding dwords
    let mut entries = Vec::new();
    let mut offset = dans_offset + 16;
    while offset + 8 <= rich_offset {
        let comp_id = bytes.pread_with::<u32>(offset, scroll::LE).ok()? ^ xor_key;
        let count = bytes.pread_with::<u32>(offset + 4, scroll::LE).ok()? ^ xor_key;
        entries.push(RichEntry {
            product_id: (comp_id >> 16) as u16,
            build_number: (comp_id & 0xffff) as u16,
            count,
        });
        offset += 8;
    }
    if offset != rich_offset {
        diagnostics.push(
            Code::RichTruncated,
            Severity::Warning,
            dans_offset as u64,
            0,
            "Rich header entry area is not a whole number of entries",
        );
    }

    let header = RichHeader {
        xor_key,
        file_offset: dans_offset as u32,
        size: (rich_offset + 8 - dans_offset) as u32,
        entries,
    };

    // checksum validation is folklore: the key should equal the rotated sum
    // of the DOS header (e_lfanew zeroed) plus the entries
    let checksum = checksum(bytes, dans_offset, &header.entries);
    if checksum != xor_key {
        diagnostics.push(
            Code::RichChecksumMismatch,
            Severity::Warning,
            dans_offset as u64,
            0,
            format!(
                "Rich header key {:#x} does not match computed checksum {:#x}",
                xor_key, checksum
            ),
        );
    }

    Some(header)
}

fn checksum(bytes: &[u8], dans_offset: usize, entries: &[RichEntry]) -> u32 {
    let mut sum = dans_offset as u32;
    for (i, &byte) in bytes[..dans_offset].iter().enumerate() {
        // e_lfanew is written after the checksum is computed
        if (0x3c..0x40).contains(&i) {
            continue;
        }
        sum = sum.wrapping_add((byte as u32).rotate_left((i % 32) as u32));
    }
    for entry in entries {
        sum = sum.wrapping_add(entry.comp_id().rotate_left(entry.count % 32));
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Diagnostics;

    fn build_rich(entries: &[(u32, u32)], key: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; 0x200];
        bytes[0] = b'M';
        bytes[1] = b'Z';
        let dans = 0x80usize;
        bytes[0x3c..0x40].copy_from_slice(&0x180u32.to_le_bytes());
        bytes[dans..dans + 4].copy_from_slice(&(DANS_MARKER ^ key).to_le_bytes());
        for pad in 1..4 {
            bytes[dans + 4 * pad..dans + 4 * pad + 4].copy_from_slice(&key.to_le_bytes());
        }
        let mut offset = dans + 16;
        for &(comp_id, count) in entries {
            bytes[offset..offset + 4].copy_from_slice(&(comp_id ^ key).to_le_bytes());
            bytes[offset + 4..offset + 8].copy_from_slice(&(count ^ key).to_le_bytes());
            offset += 8;
        }
        bytes[offset..offset + 4].copy_from_slice(&RICH_MARKER.to_le_bytes());
        bytes[offset + 4..offset + 8].copy_from_slice(&key.to_le_bytes());
        bytes
    }

    #[test]
    fn decrypts_entries() {
        let key = 0xdead_beef;
        let bytes = build_rich(&[(0x0102_5678, 3), (0x0104_1111, 7)], key);
        let mut diags = Diagnostics::new();
        let rich = parse(&bytes, 0x180, &mut diags).unwrap();
        assert_eq!(rich.xor_key, key);
        assert_eq!(rich.entries.len(), 2);
        assert_eq!(rich.entries[0].product_id, 0x0102);
        assert_eq!(rich.entries[0].build_number, 0x5678);
        assert_eq!(rich.entries[0].count, 3);
        assert_eq!(
            rich.entries[0].component_type(),
            RichComponentType::Linker
        );
        assert_eq!(rich.entries[1].component_type(), RichComponentType::CCompiler);
        assert_eq!(rich.entries[1].vs_version(), Some("VS2015+"));
        assert_eq!(rich.total_count(), 10);
        // synthetic key will not match the folklore checksum; a Warning, not
        // a parse failure
        assert!(diags.has(crate::diag::Code::RichChecksumMismatch));
    }

    #[test]
    fn absent_marker_is_none() {
        let mut bytes = vec![0u8; 0x200];
        bytes[0] = b'M';
        bytes[1] = b'Z';
        let mut diags = Diagnostics::new();
        assert!(parse(&bytes, 0x180, &mut diags).is_none());
        assert!(diags.is_empty());
    }
}
