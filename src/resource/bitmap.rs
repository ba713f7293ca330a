//! Bitmap resources.
//!
//! An `RT_BITMAP` is a DIB without the `BITMAPFILEHEADER`: a
//! `BITMAPINFOHEADER` followed by the palette and pixel data.

use scroll::{Pread, Pwrite, SizeWith};

pub const BI_RGB: u32 = 0;
pub const BI_RLE8: u32 = 1;
pub const BI_RLE4: u32 = 2;
pub const BI_BITFIELDS: u32 = 3;

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct BitmapInfoHeader {
    pub size: u32,
    pub width: i32,
    /// Negative height means a top-down DIB
    pub height: i32,
    pub planes: u16,
    pub bit_count: u16,
    pub compression: u32,
    pub size_image: u32,
    pub x_pels_per_meter: i32,
    pub y_pels_per_meter: i32,
    pub clr_used: u32,
    pub clr_important: u32,
}

pub const SIZEOF_BITMAP_INFO_HEADER: usize = 40;

#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap<'a> {
    pub header: BitmapInfoHeader,
    /// Palette and pixel data following the header
    pub data: &'a [u8],
}

impl Bitmap<'_> {
    pub fn is_top_down(&self) -> bool {
        self.header.height < 0
    }
}

pub fn parse(data: &[u8]) -> Option<Bitmap<'_>> {
    let header: BitmapInfoHeader = data.pread_with(0, scroll::LE).ok()?;
    if (header.size as usize) < SIZEOF_BITMAP_INFO_HEADER {
        return None;
    }
    let body_start = (header.size as usize).min(data.len());
    Some(Bitmap {
        header,
        data: &data[body_start..],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_and_body() {
        let mut data = vec![0u8; 48];
        data[0..4].copy_from_slice(&40u32.to_le_bytes());
        data[4..8].copy_from_slice(&16i32.to_le_bytes());
        data[8..12].copy_from_slice(&(-16i32).to_le_bytes());
        data[12..14].copy_from_slice(&1u16.to_le_bytes());
        data[14..16].copy_from_slice(&24u16.to_le_bytes());
        let bitmap = parse(&data).unwrap();
        assert_eq!(bitmap.header.width, 16);
        assert!(bitmap.is_top_down());
        assert_eq!(bitmap.data.len(), 8);
    }
}
