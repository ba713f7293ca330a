//! Dialog and extended dialog templates.

use scroll::Pread;

use crate::resource::{align_up, read_utf16_cstr};

/// `DS_SETFONT`: the template carries font information.
pub const DS_SETFONT: u32 = 0x40;

/// A `name or ordinal` field: `0xffff` prefixes an ordinal, zero means
/// absent, anything else starts an inline UTF-16 string.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum OrdinalOrString {
    #[default]
    None,
    Ordinal(u16),
    String(String),
}

fn read_ordinal_or_string(data: &[u8], offset: &mut usize) -> Option<OrdinalOrString> {
    let first: u16 = data.pread_with(*offset, scroll::LE).ok()?;
    match first {
        0x0000 => {
            *offset += 2;
            Some(OrdinalOrString::None)
        }
        0xffff => {
            let ordinal: u16 = data.pread_with(*offset + 2, scroll::LE).ok()?;
            *offset += 4;
            Some(OrdinalOrString::Ordinal(ordinal))
        }
        _ => Some(OrdinalOrString::String(read_utf16_cstr(data, offset)?)),
    }
}

/// Font information, present iff `DS_SETFONT` is in the style.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DialogFont {
    pub point_size: u16,
    /// Extended templates only
    pub weight: u16,
    /// Extended templates only
    pub italic: u8,
    /// Extended templates only
    pub charset: u8,
    pub face: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DialogControl {
    pub style: u32,
    pub ex_style: u32,
    /// Extended templates only
    pub help_id: u32,
    pub x: i16,
    pub y: i16,
    pub cx: i16,
    pub cy: i16,
    pub id: u32,
    pub class: OrdinalOrString,
    pub text: OrdinalOrString,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DialogTemplate {
    /// Whether this was a `DIALOGEX` template
    pub is_extended: bool,
    pub style: u32,
    pub ex_style: u32,
    pub help_id: u32,
    pub item_count: u16,
    pub x: i16,
    pub y: i16,
    pub cx: i16,
    pub cy: i16,
    pub menu: OrdinalOrString,
    pub class: OrdinalOrString,
    pub title: String,
    pub font: Option<DialogFont>,
    pub controls: Vec<DialogControl>,
}

pub fn parse(data: &[u8]) -> Option<DialogTemplate> {
    if data.len() < 4 {
        return None;
    }
    // DIALOGEX announces itself with version 1, signature 0xffff
    let word0: u16 = data.pread_with(0, scroll::LE).ok()?;
    let word1: u16 = data.pread_with(2, scroll::LE).ok()?;
    let is_extended = word0 == 0x0001 && word1 == 0xffff;

    let mut template = DialogTemplate {
        is_extended,
        ..Default::default()
    };
    let mut offset = 0usize;

    if is_extended {
        offset += 4;
        template.help_id = data.gread_with(&mut offset, scroll::LE).ok()?;
        template.ex_style = data.gread_with(&mut offset, scroll::LE).ok()?;
        template.style = data.gread_with(&mut offset, scroll::LE).ok()?;
    } else {
        template.style = data.gread_with(&mut offset, scroll::LE).ok()?;
        template.ex_style = data.gread_with(&mut offset, scroll::LE).ok()?;
    }
    template.item_count = data.gread_with(&mut offset, scroll::LE).ok()?;
    template.x = data.gread_with(&mut offset, scroll::LE).ok()?;
    template.y = data.gread_with(&mut offset, scroll::LE).ok()?;
    template.cx = data.gread_with(&mut offset, scroll::LE).ok()?;
    template.cy = data.gread_with(&mut offset, scroll::LE).ok()?;
    template.menu = read_ordinal_or_string(data, &mut offset)?;
    template.class = read_ordinal_or_string(data, &mut offset)?;
    template.title = read_utf16_cstr(data, &mut offset)?;

    if template.style & DS_SETFONT != 0 {
        let mut font = DialogFont {
            point_size: data.gread_with(&mut offset, scroll::LE).ok()?,
            ..Default::default()
        };
        if is_extended {
            font.weight = data.gread_with(&mut offset, scroll::LE).ok()?;
            font.italic = data.gread_with(&mut offset, scroll::LE).ok()?;
            font.charset = data.gread_with(&mut offset, scroll::LE).ok()?;
        }
        font.face = read_utf16_cstr(data, &mut offset)?;
        template.font = Some(font);
    }

    for _ in 0..template.item_count {
        // every control record is DWORD aligned
        offset = align_up(offset, 4);
        let mut control = DialogControl::default();
        if is_extended {
            control.help_id = data.gread_with(&mut offset, scroll::LE).ok()?;
            control.ex_style = data.gread_with(&mut offset, scroll::LE).ok()?;
            control.style = data.gread_with(&mut offset, scroll::LE).ok()?;
        } else {
            control.style = data.gread_with(&mut offset, scroll::LE).ok()?;
            control.ex_style = data.gread_with(&mut offset, scroll::LE).ok()?;
        }
        control.x = data.gread_with(&mut offset, scroll::LE).ok()?;
        control.y = data.gread_with(&mut offset, scroll::LE).ok()?;
        control.cx = data.gread_with(&mut offset, scroll::LE).ok()?;
        control.cy = data.gread_with(&mut offset, scroll::LE).ok()?;
        // the id widens from u16 to u32 in the extended layout
        control.id = if is_extended {
            data.gread_with::<u32>(&mut offset, scroll::LE).ok()?
        } else {
            data.gread_with::<u16>(&mut offset, scroll::LE).ok()? as u32
        };
        control.class = read_ordinal_or_string(data, &mut offset)?;
        control.text = read_ordinal_or_string(data, &mut offset)?;
        // skip creation data
        let creation_len: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
        if creation_len > 0 {
            offset = offset.checked_add(creation_len as usize)?;
        }
        template.controls.push(control);
    }
    Some(template)
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

    fn build_standard_dialog(with_font: bool) -> Vec<u8> {
        let mut out = Vec::new();
        let style = if with_font { DS_SETFONT } else { 0 };
        out.extend_from_slice(&style.to_le_bytes()); // style
        out.extend_from_slice(&0u32.to_le_bytes()); // ex style
        out.extend_from_slice(&1u16.to_le_bytes()); // one control
        out.extend_from_slice(&10i16.to_le_bytes());
        out.extend_from_slice(&20i16.to_le_bytes());
        out.extend_from_slice(&200i16.to_le_bytes());
        out.extend_from_slice(&100i16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // no menu
        out.extend_from_slice(&0u16.to_le_bytes()); // default class
        push_utf16(&mut out, "About");
        if with_font {
            out.extend_from_slice(&8u16.to_le_bytes()); // point size
            push_utf16(&mut out, "MS Shell Dlg");
        }
        while out.len() % 4 != 0 {
            out.push(0);
        }
        // one button control
        out.extend_from_slice(&0x5000_0001u32.to_le_bytes()); // style
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&5i16.to_le_bytes());
        out.extend_from_slice(&6i16.to_le_bytes());
        out.extend_from_slice(&50i16.to_le_bytes());
        out.extend_from_slice(&14i16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // IDOK
        out.extend_from_slice(&0xffffu16.to_le_bytes()); // ordinal class
        out.extend_from_slice(&0x0080u16.to_le_bytes()); // button
        push_utf16(&mut out, "OK");
        out.extend_from_slice(&0u16.to_le_bytes()); // no creation data
        out
    }

    #[test]
    fn parses_standard_template() {
        let data = build_standard_dialog(true);
        let dialog = parse(&data).unwrap();
        assert!(!dialog.is_extended);
        assert_eq!(dialog.title, "About");
        assert_eq!(dialog.cx, 200);
        let font = dialog.font.unwrap();
        assert_eq!(font.point_size, 8);
        assert_eq!(font.face, "MS Shell Dlg");
        assert_eq!(dialog.controls.len(), 1);
        let control = &dialog.controls[0];
        assert_eq!(control.id, 1);
        assert_eq!(control.class, OrdinalOrString::Ordinal(0x0080));
        assert_eq!(control.text, OrdinalOrString::String("OK".into()));
    }

    #[test]
    fn font_absent_without_setfont() {
        let data = build_standard_dialog(false);
        let dialog = parse(&data).unwrap();
        assert!(dialog.font.is_none());
        assert_eq!(dialog.controls.len(), 1);
    }
}
