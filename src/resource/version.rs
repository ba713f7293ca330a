//! The `VS_VERSIONINFO` resource tree.
//!
//! Every node shares one padded layout: `(length, value_length, type, key,
//! value, children)` with 32-bit alignment between parts. The root holds
//! `VS_FIXEDFILEINFO`; a `StringFileInfo` child holds per-language string
//! tables; a `VarFileInfo` child holds the translation list.

use scroll::{Pread, Pwrite, SizeWith};

use crate::resource::{align_up, read_utf16_cstr};

/// `VS_FIXEDFILEINFO::signature`
pub const VS_FFI_SIGNATURE: u32 = 0xfeef_04bd;

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct VsFixedFileInfo {
    pub signature: u32,
    pub struct_version: u32,
    pub file_version_ms: u32,
    pub file_version_ls: u32,
    pub product_version_ms: u32,
    pub product_version_ls: u32,
    pub file_flags_mask: u32,
    pub file_flags: u32,
    pub file_os: u32,
    pub file_type: u32,
    pub file_subtype: u32,
    pub file_date_ms: u32,
    pub file_date_ls: u32,
}

pub const SIZEOF_VS_FIXED_FILE_INFO: usize = 52;

/// One key/value pair under a string table.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionString {
    pub key: String,
    pub value: String,
}

/// One `StringTable` node; the key encodes language and codepage as eight
/// hex digits.
#[derive(Debug, Clone, PartialEq)]
pub struct StringTable {
    pub key: String,
    pub strings: Vec<VersionString>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VersionInfo {
    pub fixed: Option<VsFixedFileInfo>,
    pub string_tables: Vec<StringTable>,
    /// `(language, codepage)` pairs from `VarFileInfo\Translation`
    pub translations: Vec<(u16, u16)>,
}

impl VersionInfo {
    fn version_string(ms: u32, ls: u32) -> String {
        format!("{}.{}.{}.{}", ms >> 16, ms & 0xffff, ls >> 16, ls & 0xffff)
    }

    /// `FileVersion` from the fixed info, as `a.b.c.d`.
    pub fn file_version_string(&self) -> Option<String> {
        self.fixed
            .map(|f| Self::version_string(f.file_version_ms, f.file_version_ls))
    }

    /// `ProductVersion` from the fixed info, as `a.b.c.d`.
    pub fn product_version_string(&self) -> Option<String> {
        self.fixed
            .map(|f| Self::version_string(f.product_version_ms, f.product_version_ls))
    }

    /// The first string value with the given key, in any string table.
    pub fn string(&self, key: &str) -> Option<&str> {
        self.string_tables
            .iter()
            .flat_map(|t| &t.strings)
            .find(|s| s.key == key)
            .map(|s| s.value.as_str())
    }
}

struct Node {
    end: usize,
    value_length: u16,
    key: String,
    value_offset: usize,
}

/// Read one node header: `(length, value_length, type, key)` then align to
/// 32 bits. Returns `None` on truncation or a zero length.
fn read_node(data: &[u8], offset: &mut usize) -> Option<Node> {
    let start = *offset;
    let length: u16 = data.pread_with(*offset, scroll::LE).ok()?;
    let value_length: u16 = data.pread_with(*offset + 2, scroll::LE).ok()?;
    let _value_type: u16 = data.pread_with(*offset + 4, scroll::LE).ok()?;
    if length < 6 {
        return None;
    }
    *offset += 6;
    let key = read_utf16_cstr(data, offset)?;
    *offset = align_up(*offset, 4);
    let end = (start + length as usize).min(data.len());
    if *offset > end {
        return None;
    }
    Some(Node {
        end,
        value_length,
        key,
        value_offset: *offset,
    })
}

pub fn parse(data: &[u8]) -> Option<VersionInfo> {
    let mut offset = 0usize;
    let root = read_node(data, &mut offset)?;
    if root.key != "VS_VERSION_INFO" {
        return None;
    }

    let mut info = VersionInfo::default();
    if root.value_length as usize >= SIZEOF_VS_FIXED_FILE_INFO {
        let fixed: VsFixedFileInfo = data.pread_with(root.value_offset, scroll::LE).ok()?;
        if fixed.signature == VS_FFI_SIGNATURE {
            info.fixed = Some(fixed);
        }
        offset = align_up(root.value_offset + root.value_length as usize, 4);
    }

    while offset + 6 <= root.end {
        let Some(child) = read_node(data, &mut offset) else {
            break;
        };
        match child.key.as_str() {
            "StringFileInfo" => parse_string_file_info(data, &mut offset, child.end, &mut info),
            "VarFileInfo" => parse_var_file_info(data, &mut offset, child.end, &mut info),
            _ => {}
        }
        offset = align_up(child.end, 4);
    }
    Some(info)
}

fn parse_string_file_info(data: &[u8], offset: &mut usize, end: usize, info: &mut VersionInfo) {
    while *offset + 6 <= end {
        let Some(table_node) = read_node(data, offset) else {
            break;
        };
        let mut strings = Vec::new();
        while *offset + 6 <= table_node.end {
            let Some(string_node) = read_node(data, offset) else {
                break;
            };
            // the value is value_length UTF-16 units
            let value = if string_node.value_length > 0 {
                let value_end =
                    (string_node.value_offset + string_node.value_length as usize * 2)
                        .min(string_node.end);
                crate::resource::utf16_string(&data[string_node.value_offset.min(value_end)..value_end])
            } else {
                String::new()
            };
            strings.push(VersionString {
                key: string_node.key,
                value,
            });
            *offset = align_up(string_node.end, 4);
        }
        info.string_tables.push(StringTable {
            key: table_node.key,
            strings,
        });
        *offset = align_up(table_node.end, 4);
    }
}

fn parse_var_file_info(data: &[u8], offset: &mut usize, end: usize, info: &mut VersionInfo) {
    while *offset + 6 <= end {
        let Some(var_node) = read_node(data, offset) else {
            break;
        };
        if var_node.key == "Translation" {
            let mut value_offset = var_node.value_offset;
            while value_offset + 4 <= var_node.end {
                let lang: u16 = data.pread_with(value_offset, scroll::LE).unwrap_or(0);
                let codepage: u16 = data.pread_with(value_offset + 2, scroll::LE).unwrap_or(0);
                info.translations.push((lang, codepage));
                value_offset += 4;
            }
        }
        *offset = align_up(var_node.end, 4);
    }
}

/// Serialise a minimal version info block; shared by the tests that need a
/// well-formed tree to pick apart.
#[cfg(test)]
pub(crate) fn build_version_info(file_version: (u16, u16, u16, u16), strings: &[(&str, &str)]) -> Vec<u8> {
    fn push_utf16(out: &mut Vec<u8>, value: &str) {
        for unit in value.encode_utf16() {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out.extend_from_slice(&0u16.to_le_bytes());
    }
    fn pad4(out: &mut Vec<u8>) {
        while out.len() % 4 != 0 {
            out.push(0);
        }
    }
    fn patch_len(out: &mut Vec<u8>, at: usize) {
        let length = (out.len() - at) as u16;
        out[at..at + 2].copy_from_slice(&length.to_le_bytes());
    }

    let mut out = Vec::new();
    // root node
    out.extend_from_slice(&[0u8; 2]); // length, patched later
    out.extend_from_slice(&(SIZEOF_VS_FIXED_FILE_INFO as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // binary
    push_utf16(&mut out, "VS_VERSION_INFO");
    pad4(&mut out);

    let fixed = VsFixedFileInfo {
        signature: VS_FFI_SIGNATURE,
        struct_version: 0x0001_0000,
        file_version_ms: ((file_version.0 as u32) << 16) | file_version.1 as u32,
        file_version_ls: ((file_version.2 as u32) << 16) | file_version.3 as u32,
        product_version_ms: ((file_version.0 as u32) << 16) | file_version.1 as u32,
        product_version_ls: ((file_version.2 as u32) << 16) | file_version.3 as u32,
        ..Default::default()
    };
    let mut buffer = [0u8; SIZEOF_VS_FIXED_FILE_INFO];
    use scroll::Pwrite as _;
    buffer.pwrite_with(fixed, 0, scroll::LE).unwrap();
    out.extend_from_slice(&buffer);
    pad4(&mut out);

    // StringFileInfo -> one table -> the given strings
    let sfi_at = out.len();
    out.extend_from_slice(&[0u8; 2]);
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    push_utf16(&mut out, "StringFileInfo");
    pad4(&mut out);

    let table_at = out.len();
    out.extend_from_slice(&[0u8; 2]);
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    push_utf16(&mut out, "040904b0");
    pad4(&mut out);

    for &(key, value) in strings {
        let string_at = out.len();
        out.extend_from_slice(&[0u8; 2]);
        out.extend_from_slice(&((value.encode_utf16().count() + 1) as u16).to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        push_utf16(&mut out, key);
        pad4(&mut out);
        push_utf16(&mut out, value);
        patch_len(&mut out, string_at);
        pad4(&mut out);
    }
    patch_len(&mut out, table_at);
    patch_len(&mut out, sfi_at);
    patch_len(&mut out, 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fixed_info_and_strings() {
        let data = build_version_info(
            (1, 2, 3, 4),
            &[("FileDescription", "impish"), ("CompanyName", "relic")],
        );
        let info = parse(&data).unwrap();
        let fixed = info.fixed.unwrap();
        assert_eq!(fixed.signature, VS_FFI_SIGNATURE);
        assert_eq!(info.file_version_string().unwrap(), "1.2.3.4");
        assert_eq!(info.string("CompanyName"), Some("relic"));
        assert_eq!(info.string("FileDescription"), Some("impish"));
        assert_eq!(info.string_tables.len(), 1);
        assert_eq!(info.string_tables[0].key, "040904b0");
    }

    #[test]
    fn wrong_root_key_is_rejected() {
        let mut data = build_version_info((1, 0, 0, 0), &[]);
        // corrupt the root key
        data[6] = b'X';
        assert!(parse(&data).is_none());
    }
}
