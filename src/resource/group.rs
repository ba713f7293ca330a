//! Icon and cursor group directories.
//!
//! A group resource is only a directory: each member names the ordinal of a
//! sibling `RT_ICON`/`RT_CURSOR` resource that holds the actual image.

use scroll::{Pread, Pwrite, SizeWith};

/// `RES_ICON`
pub const GROUP_TYPE_ICON: u16 = 1;
/// `RES_CURSOR`
pub const GROUP_TYPE_CURSOR: u16 = 2;

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct IconGroupHeader {
    pub reserved: u16,
    /// [`GROUP_TYPE_ICON`] or [`GROUP_TYPE_CURSOR`]
    pub group_type: u16,
    pub count: u16,
}

/// One directory member; `ordinal` is the sibling resource id.
#[derive(Debug, PartialEq, Copy, Clone, Default)]
pub struct IconGroupEntry {
    /// 0 means 256
    pub width: u8,
    /// 0 means 256
    pub height: u8,
    pub color_count: u8,
    pub planes: u16,
    pub bit_count: u16,
    pub bytes_in_res: u32,
    pub ordinal: u16,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IconGroup {
    pub header: IconGroupHeader,
    pub entries: Vec<IconGroupEntry>,
}

impl IconGroup {
    pub fn is_cursor_group(&self) -> bool {
        self.header.group_type == GROUP_TYPE_CURSOR
    }
}

pub fn parse(data: &[u8]) -> Option<IconGroup> {
    let mut offset = 0usize;
    let header: IconGroupHeader = data.gread_with(&mut offset, scroll::LE).ok()?;
    if header.reserved != 0
        || !matches!(header.group_type, GROUP_TYPE_ICON | GROUP_TYPE_CURSOR)
    {
        return None;
    }
    let mut entries = Vec::with_capacity(header.count as usize);
    for _ in 0..header.count {
        let width: u8 = data.gread_with(&mut offset, scroll::LE).ok()?;
        let height: u8 = data.gread_with(&mut offset, scroll::LE).ok()?;
        let color_count: u8 = data.gread_with(&mut offset, scroll::LE).ok()?;
        let _reserved: u8 = data.gread_with(&mut offset, scroll::LE).ok()?;
        let planes: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
        let bit_count: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
        let bytes_in_res: u32 = data.gread_with(&mut offset, scroll::LE).ok()?;
        let ordinal: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
        entries.push(IconGroupEntry {
            width,
            height,
            color_count,
            planes,
            bit_count,
            bytes_in_res,
            ordinal,
        });
    }
    Some(IconGroup { header, entries })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_icon_group() {
        let mut data = Vec::new();
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&GROUP_TYPE_ICON.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&[32, 32, 16, 0]);
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&4u16.to_le_bytes());
        data.extend_from_slice(&744u32.to_le_bytes());
        data.extend_from_slice(&2u16.to_le_bytes());
        let group = parse(&data).unwrap();
        assert_eq!(group.entries.len(), 1);
        assert_eq!(group.entries[0].width, 32);
        assert_eq!(group.entries[0].ordinal, 2);
        assert!(!group.is_cursor_group());
    }

    #[test]
    fn nonzero_reserved_is_rejected() {
        let data = [1u8, 0, 1, 0, 0, 0];
        assert!(parse(&data).is_none());
    }
}
