//! `RT_FONT` resources: Windows 1.x, 2.x, and 3.0 `.FNT` layouts.
//!
//! Five layouts share one header, discriminated by the version word, the
//! vector bit of `dfType`, and whether `dfPixWidth` declares a fixed pitch.
//! 1.x raster fonts store one row-major bitmap covering every glyph; those
//! are converted here to the column-major per-glyph form 2.x uses natively.
//! 1.x vector fonts store pen stroke programs instead of pixels.

use scroll::Pread;

pub const FONT_VERSION_1X: u16 = 0x0100;
pub const FONT_VERSION_2X: u16 = 0x0200;
pub const FONT_VERSION_3X: u16 = 0x0300;

/// `dfType` bit 0: vector rather than raster glyphs.
pub const FONT_TYPE_VECTOR: u16 = 0x0001;

/// Pen-up marker in vector stroke data.
const PEN_UP_MARKER: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrokeKind {
    PenUp,
    MoveTo,
    LineTo,
}

/// One vector stroke command; deltas are signed pixel steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrokeCommand {
    pub kind: StrokeKind,
    pub x: i8,
    pub y: i8,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VectorGlyph {
    pub width: u16,
    pub strokes: Vec<StrokeCommand>,
}

/// One glyph's width and its offset into [`FontData::bitmap_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GlyphEntry {
    pub width: u16,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FontData {
    pub version: u16,
    pub size: u32,
    pub copyright: String,
    pub font_type: u16,
    pub points: u16,
    pub vertical_res: u16,
    pub horizontal_res: u16,
    pub ascent: u16,
    pub internal_leading: u16,
    pub external_leading: u16,
    pub italic: bool,
    pub underline: bool,
    pub strikeout: bool,
    pub weight: u16,
    pub charset: u8,
    /// Zero for variable-pitch fonts
    pub pixel_width: u16,
    pub pixel_height: u16,
    pub pitch_and_family: u8,
    pub avg_width: u16,
    pub max_width: u16,
    pub first_char: u8,
    pub last_char: u8,
    pub default_char: u8,
    pub break_char: u8,
    /// Bytes per bitmap row in the 1.x combined bitmap
    pub width_bytes: u16,
    pub face_name: String,
    /// Per-glyph widths and offsets into [`Self::bitmap_data`]
    pub glyphs: Vec<GlyphEntry>,
    /// Column-major per-glyph bitmaps (raster fonts)
    pub bitmap_data: Vec<u8>,
    /// Decoded stroke programs (vector fonts)
    pub vector_glyphs: Vec<VectorGlyph>,
}

impl FontData {
    pub fn is_vector(&self) -> bool {
        self.font_type & FONT_TYPE_VECTOR != 0
    }

    pub fn is_fixed_pitch(&self) -> bool {
        self.pixel_width != 0
    }

    pub fn glyph_count(&self) -> usize {
        self.last_char as usize - self.first_char as usize + 1
    }
}

// FNT header field offsets, stable across 1.x/2.x/3.0
const OFF_TYPE: usize = 66;
const OFF_FACE: usize = 105;
const OFF_BITS_OFFSET: usize = 113;
const CHAR_TABLE_1X: usize = 117;
const CHAR_TABLE_2X: usize = 118;
const CHAR_TABLE_3X: usize = 148;

pub fn parse(data: &[u8]) -> Option<FontData> {
    if data.len() < CHAR_TABLE_1X {
        return None;
    }
    let mut font = read_header(data)?;
    let num_glyphs = font.glyph_count();
    let bits_offset: u32 = data.pread_with(OFF_BITS_OFFSET, scroll::LE).ok()?;

    match font.version {
        FONT_VERSION_1X => {
            if font.is_vector() {
                parse_1x_vector(data, &mut font, num_glyphs, bits_offset as usize)?;
            } else {
                parse_1x_raster(data, &mut font, num_glyphs, bits_offset as usize)?;
            }
        }
        FONT_VERSION_2X => {
            parse_2x_3x(data, &mut font, num_glyphs, CHAR_TABLE_2X, false)?;
        }
        FONT_VERSION_3X => {
            parse_2x_3x(data, &mut font, num_glyphs, CHAR_TABLE_3X, true)?;
        }
        _ => return None,
    }
    Some(font)
}

fn read_header(data: &[u8]) -> Option<FontData> {
    let mut offset = 0usize;
    let version: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let size: u32 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let copyright_bytes = &data[6..66];
    let copyright_len = copyright_bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(copyright_bytes.len());
    let copyright = String::from_utf8_lossy(&copyright_bytes[..copyright_len]).into_owned();

    let mut offset = OFF_TYPE;
    let font_type: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let points: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let vertical_res: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let horizontal_res: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let ascent: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let internal_leading: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let external_leading: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let italic: u8 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let underline: u8 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let strike_out: u8 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let weight: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let charset: u8 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let pixel_width: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let pixel_height: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let pitch_and_family: u8 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let avg_width: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let max_width: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let first_char: u8 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let last_char: u8 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let default_char: u8 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let break_char: u8 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let width_bytes: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
    if last_char < first_char {
        return None;
    }

    let face_offset: u32 = data.pread_with(OFF_FACE, scroll::LE).ok()?;
    let face_name = if face_offset != 0 && (face_offset as usize) < data.len() {
        crate::tools::read_cstr_at(data, face_offset as usize, 64).unwrap_or_default()
    } else {
        String::new()
    };

    Some(FontData {
        version,
        size,
        copyright,
        font_type,
        points,
        vertical_res,
        horizontal_res,
        ascent,
        internal_leading,
        external_leading,
        italic: italic != 0,
        underline: underline != 0,
        strikeout: strike_out != 0,
        weight,
        charset,
        pixel_width,
        pixel_height,
        pitch_and_family,
        avg_width,
        max_width,
        first_char,
        last_char,
        default_char,
        break_char,
        width_bytes,
        face_name,
        ..Default::default()
    })
}

/// 1.x raster: one row-major bitmap covers every glyph side by side; the
/// char table (variable pitch only) lists pixel x-offsets into it.
fn parse_1x_raster(
    data: &[u8],
    font: &mut FontData,
    num_glyphs: usize,
    bits_offset: usize,
) -> Option<()> {
    let height = font.pixel_height as usize;
    let row_bytes = font.width_bytes as usize;
    let bitmap_size = row_bytes.checked_mul(height)?;
    if bits_offset.checked_add(bitmap_size)? > data.len() {
        return None;
    }

    let mut pixel_offsets = Vec::with_capacity(num_glyphs + 1);
    if font.is_fixed_pitch() {
        for i in 0..=num_glyphs {
            pixel_offsets.push((i * font.pixel_width as usize) as u16);
        }
    } else {
        let mut offset = CHAR_TABLE_1X;
        for _ in 0..=num_glyphs {
            pixel_offsets.push(data.gread_with::<u16>(&mut offset, scroll::LE).ok()?);
        }
    }

    let src = &data[bits_offset..bits_offset + bitmap_size];
    for g in 0..num_glyphs {
        let px_offset = pixel_offsets[g] as usize;
        let width = (pixel_offsets[g + 1].saturating_sub(pixel_offsets[g])) as usize;
        font.glyphs.push(GlyphEntry {
            width: width as u16,
            offset: font.bitmap_data.len(),
        });

        // rotate this glyph's pixels into column-major byte columns
        let byte_cols = width.div_ceil(8);
        for bc in 0..byte_cols {
            for row in 0..height {
                let mut dest_byte = 0u8;
                for bit in 0..8 {
                    let pixel_x = bc * 8 + bit;
                    if pixel_x >= width {
                        break;
                    }
                    let src_x = px_offset + pixel_x;
                    let src_byte_offset = row * row_bytes + src_x / 8;
                    let src_bit = 7 - (src_x % 8);
                    if src_byte_offset < bitmap_size && (src[src_byte_offset] >> src_bit) & 1 != 0
                    {
                        dest_byte |= 1 << (7 - bit);
                    }
                }
                font.bitmap_data.push(dest_byte);
            }
        }
    }
    Some(())
}

/// 1.x vector: the char table lists stroke offsets (and widths when the
/// pitch varies); strokes decode to pen commands.
fn parse_1x_vector(
    data: &[u8],
    font: &mut FontData,
    num_glyphs: usize,
    bits_offset: usize,
) -> Option<()> {
    let mut table = Vec::with_capacity(num_glyphs + 1);
    let mut offset = CHAR_TABLE_1X;
    if font.is_fixed_pitch() {
        for _ in 0..=num_glyphs {
            let stroke_offset: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
            table.push((stroke_offset, font.pixel_width));
        }
    } else {
        for _ in 0..=num_glyphs {
            let stroke_offset: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
            let width: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
            table.push((stroke_offset, width));
        }
    }

    for g in 0..num_glyphs {
        let (stroke_offset, width) = table[g];
        let (next_offset, _) = table[g + 1];
        font.glyphs.push(GlyphEntry {
            width,
            offset: stroke_offset as usize,
        });

        let start = bits_offset + stroke_offset as usize;
        let end = bits_offset + next_offset as usize;
        let strokes = if start < data.len() && end <= data.len() && end > start {
            decode_strokes(&data[start..end])
        } else {
            Vec::new()
        };
        font.vector_glyphs.push(VectorGlyph { width, strokes });
    }
    Some(())
}

/// 2.x and 3.0: per-glyph `(width, offset)` entries pointing at
/// column-major bitmaps that need no conversion.
fn parse_2x_3x(
    data: &[u8],
    font: &mut FontData,
    num_glyphs: usize,
    table_offset: usize,
    wide_offsets: bool,
) -> Option<()> {
    let height = font.pixel_height as usize;
    let mut offset = table_offset;
    let mut raw: Vec<(u16, usize)> = Vec::with_capacity(num_glyphs);
    for _ in 0..num_glyphs {
        let width: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
        let glyph_offset = if wide_offsets {
            data.gread_with::<u32>(&mut offset, scroll::LE).ok()? as usize
        } else {
            data.gread_with::<u16>(&mut offset, scroll::LE).ok()? as usize
        };
        raw.push((width, glyph_offset));
    }

    for (width, glyph_offset) in raw {
        let byte_cols = (width as usize).div_ceil(8);
        let glyph_size = byte_cols * height;
        let entry_offset = font.bitmap_data.len();
        if glyph_offset + glyph_size <= data.len() {
            font.bitmap_data
                .extend_from_slice(&data[glyph_offset..glyph_offset + glyph_size]);
        } else {
            font.bitmap_data.extend(std::iter::repeat(0).take(glyph_size));
        }
        font.glyphs.push(GlyphEntry {
            width,
            offset: entry_offset,
        });
    }
    Some(())
}

/// `0x80` lifts the pen; otherwise two signed bytes are an X,Y delta, a
/// `MoveTo` right after a pen-up and a `LineTo` otherwise.
fn decode_strokes(data: &[u8]) -> Vec<StrokeCommand> {
    let mut strokes = Vec::new();
    let mut need_move = true;
    let mut i = 0usize;
    while i < data.len() {
        if data[i] == PEN_UP_MARKER {
            strokes.push(StrokeCommand {
                kind: StrokeKind::PenUp,
                x: 0,
                y: 0,
            });
            need_move = true;
            i += 1;
        } else {
            if i + 1 >= data.len() {
                break;
            }
            strokes.push(StrokeCommand {
                kind: if need_move {
                    StrokeKind::MoveTo
                } else {
                    StrokeKind::LineTo
                },
                x: data[i] as i8,
                y: data[i + 1] as i8,
            });
            need_move = false;
            i += 2;
        }
    }
    strokes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_header(version: u16, font_type: u16, pix_width: u16) -> Vec<u8> {
        let mut data = vec![0u8; 0x200];
        data[0..2].copy_from_slice(&version.to_le_bytes());
        data[2..6].copy_from_slice(&0x200u32.to_le_bytes());
        data[6..10].copy_from_slice(b"test");
        data[66..68].copy_from_slice(&font_type.to_le_bytes());
        data[86..88].copy_from_slice(&pix_width.to_le_bytes());
        data[88..90].copy_from_slice(&2u16.to_le_bytes()); // pix height
        data[95] = b'A'; // first char
        data[96] = b'B'; // last char
        data[99..101].copy_from_slice(&2u16.to_le_bytes()); // width bytes
        data
    }

    #[test]
    fn raster_1x_variable_converts_to_column_major() {
        let mut data = base_header(FONT_VERSION_1X, 0, 0);
        // char table: offsets 0, 8, 16 (two glyphs of 8 pixels)
        data[117..119].copy_from_slice(&0u16.to_le_bytes());
        data[119..121].copy_from_slice(&8u16.to_le_bytes());
        data[121..123].copy_from_slice(&16u16.to_le_bytes());
        // combined bitmap at 0x100: 2 rows of 2 bytes
        data[113..117].copy_from_slice(&0x100u32.to_le_bytes());
        data[0x100] = 0b1010_0000; // row 0: glyph A pixels
        data[0x101] = 0b1111_0000; // row 0: glyph B pixels
        data[0x102] = 0b0000_0000; // row 1
        data[0x103] = 0b0000_1111; // row 1

        let font = parse(&data).unwrap();
        assert!(!font.is_vector());
        assert_eq!(font.glyphs.len(), 2);
        assert_eq!(font.glyphs[0].width, 8);
        // glyph A: one byte column, 2 rows
        assert_eq!(font.bitmap_data[0], 0b1010_0000);
        assert_eq!(font.bitmap_data[1], 0b0000_0000);
        // glyph B
        assert_eq!(font.bitmap_data[2], 0b1111_0000);
        assert_eq!(font.bitmap_data[3], 0b0000_1111);
    }

    #[test]
    fn vector_1x_decodes_strokes() {
        let mut data = base_header(FONT_VERSION_1X, FONT_TYPE_VECTOR, 4);
        // fixed pitch: stroke offsets 0, 5, 5
        data[117..119].copy_from_slice(&0u16.to_le_bytes());
        data[119..121].copy_from_slice(&5u16.to_le_bytes());
        data[121..123].copy_from_slice(&5u16.to_le_bytes());
        data[113..117].copy_from_slice(&0x100u32.to_le_bytes());
        // glyph A strokes: move(1,2), line(3,-1), pen up
        data[0x100] = 1;
        data[0x101] = 2;
        data[0x102] = 3;
        data[0x103] = (-1i8) as u8;
        data[0x104] = 0x80;

        let font = parse(&data).unwrap();
        assert!(font.is_vector());
        assert_eq!(font.vector_glyphs.len(), 2);
        let strokes = &font.vector_glyphs[0].strokes;
        assert_eq!(strokes.len(), 3);
        assert_eq!(strokes[0].kind, StrokeKind::MoveTo);
        assert_eq!(strokes[1].kind, StrokeKind::LineTo);
        assert_eq!(strokes[1].y, -1);
        assert_eq!(strokes[2].kind, StrokeKind::PenUp);
    }

    #[test]
    fn raster_2x_reads_glyph_table() {
        let mut data = base_header(FONT_VERSION_2X, 0, 0);
        // glyph entries at 118: (width 8, offset 0x100), (width 8, offset 0x102)
        data[118..120].copy_from_slice(&8u16.to_le_bytes());
        data[120..122].copy_from_slice(&0x100u16.to_le_bytes());
        data[122..124].copy_from_slice(&8u16.to_le_bytes());
        data[124..126].copy_from_slice(&0x102u16.to_le_bytes());
        data[0x100] = 0xaa;
        data[0x101] = 0x55;
        data[0x102] = 0x11;
        data[0x103] = 0x22;
        let font = parse(&data).unwrap();
        assert_eq!(font.glyphs.len(), 2);
        assert_eq!(font.bitmap_data, vec![0xaa, 0x55, 0x11, 0x22]);
    }
}
