//! Menu templates.

use scroll::Pread;

use crate::resource::{read_ansi_cstr, read_utf16_cstr, FormatOrigin};

/// Item opens a submenu; children follow.
pub const MF_POPUP: u16 = 0x0010;
/// Last item at the current nesting level.
pub const MF_END: u16 = 0x0080;
/// Horizontal separator.
pub const MF_SEPARATOR: u16 = 0x0800;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MenuItem {
    pub flags: u16,
    /// Zero for popups, which have no command of their own
    pub command_id: u16,
    pub text: String,
    pub children: Vec<MenuItem>,
}

impl MenuItem {
    pub fn is_popup(&self) -> bool {
        self.flags & MF_POPUP != 0
    }

    pub fn is_separator(&self) -> bool {
        self.flags & MF_SEPARATOR != 0
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MenuTemplate {
    pub version: u16,
    pub header_size: u16,
    pub items: Vec<MenuItem>,
}

/// Parse a menu. The string encoding follows the container the resource
/// came from: UTF-16 in PE, ANSI in NE.
pub fn parse(data: &[u8], origin: FormatOrigin) -> Option<MenuTemplate> {
    if data.len() < 4 {
        return None;
    }
    let mut offset = 0usize;
    let version: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let header_size: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
    offset = offset.checked_add(header_size as usize)?;

    let mut template = MenuTemplate {
        version,
        header_size,
        items: Vec::new(),
    };
    parse_items(data, &mut offset, origin, &mut template.items)?;
    Some(template)
}

fn parse_items(
    data: &[u8],
    offset: &mut usize,
    origin: FormatOrigin,
    items: &mut Vec<MenuItem>,
) -> Option<()> {
    while *offset < data.len() {
        let mut item = MenuItem {
            flags: data.gread_with(offset, scroll::LE).ok()?,
            ..Default::default()
        };
        if item.is_popup() {
            item.text = read_text(data, offset, origin)?;
            parse_items(data, offset, origin, &mut item.children)?;
        } else {
            item.command_id = data.gread_with(offset, scroll::LE).ok()?;
            item.text = read_text(data, offset, origin)?;
        }
        let is_end = item.flags & MF_END != 0;
        items.push(item);
        if is_end {
            break;
        }
    }
    Some(())
}

fn read_text(data: &[u8], offset: &mut usize, origin: FormatOrigin) -> Option<String> {
    match origin {
        FormatOrigin::Pe => read_utf16_cstr(data, offset),
        FormatOrigin::Ne => read_ansi_cstr(data, offset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_utf16(out: &mut Vec<u8>, value: &str) {
        for unit in value.encode_utf16() {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out.extend_from_slice(&0u16.to_le_bytes());
    }

    #[test]
    fn parses_nested_popup() {
        let mut out = Vec::new();
        out.extend_from_slice(&0u16.to_le_bytes()); // version
        out.extend_from_slice(&0u16.to_le_bytes()); // header size
        // popup "File" (also last at top level)
        out.extend_from_slice(&(MF_POPUP | MF_END).to_le_bytes());
        push_utf16(&mut out, "File");
        // child "Open" then terminating child "Exit"
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&101u16.to_le_bytes());
        push_utf16(&mut out, "Open");
        out.extend_from_slice(&MF_END.to_le_bytes());
        out.extend_from_slice(&102u16.to_le_bytes());
        push_utf16(&mut out, "Exit");

        let menu = parse(&out, FormatOrigin::Pe).unwrap();
        assert_eq!(menu.items.len(), 1);
        let file = &menu.items[0];
        assert!(file.is_popup());
        assert_eq!(file.text, "File");
        assert_eq!(file.children.len(), 2);
        assert_eq!(file.children[0].command_id, 101);
        assert_eq!(file.children[1].text, "Exit");
    }

    #[test]
    fn ansi_encoding_for_ne() {
        let mut out = Vec::new();
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&MF_END.to_le_bytes());
        out.extend_from_slice(&7u16.to_le_bytes());
        out.extend_from_slice(b"About\0");
        let menu = parse(&out, FormatOrigin::Ne).unwrap();
        assert_eq!(menu.items[0].text, "About");
        assert_eq!(menu.items[0].command_id, 7);
    }
}
