//! Generic region decoding (T.88 sections 6.2 and 7.4.6).
//!
//! A generic region is coded either with MMR (delegated to the CCITT
//! decoder) or with the MQ coder, where each pixel's context is
//! gathered from a template of neighbours. Four templates exist; some
//! of their pixels are adaptive and carried in the segment header.

use graven_common::bit::BitReader;
use graven_common::mq::{Context, MqDecoder};

use crate::bitmap::Bitmap;
use crate::error::{
    DecodeError, HuffmanError, ParseError, RegionError, Result, bail, read,
};
use crate::segment::RegionInfo;

/// The context templates of 6.2.5.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Template {
    T0,
    T1,
    T2,
    T3,
}

impl Template {
    pub(crate) fn from_bits(value: u8) -> Self {
        match value & 3 {
            0 => Self::T0,
            1 => Self::T1,
            2 => Self::T2,
            _ => Self::T3,
        }
    }

    /// How many adaptive pixels the template carries.
    pub(crate) fn at_count(self) -> usize {
        match self {
            Self::T0 => 4,
            _ => 1,
        }
    }

    /// The context value coding the typical-prediction pseudo-pixel
    /// (6.2.5.7).
    fn sltp_context(self) -> u32 {
        match self {
            Self::T0 => 0x9B25,
            Self::T1 => 0x0795,
            Self::T2 => 0x00E5,
            Self::T3 => 0x0195,
        }
    }

    fn slots(self) -> &'static [Slot] {
        match self {
            Self::T0 => &T0_SLOTS,
            Self::T1 => &T1_SLOTS,
            Self::T2 => &T2_SLOTS,
            Self::T3 => &T3_SLOTS,
        }
    }
}

/// An adaptive template pixel offset. Segment headers carry signed
/// bytes, but the nominal pixels of a pattern dictionary reach back a
/// full pattern width.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AtPixel {
    pub(crate) x: i16,
    pub(crate) y: i16,
}

/// One position in a context template: either fixed or one of the
/// adaptive pixels (by index).
#[derive(Debug, Clone, Copy)]
enum Slot {
    Fixed(i8, i8),
    At(u8),
}

impl Slot {
    fn offset(self, at: &[AtPixel]) -> (i32, i32) {
        match self {
            Self::Fixed(dx, dy) => (i32::from(dx), i32::from(dy)),
            Self::At(i) => {
                let pixel = at[usize::from(i)];
                (i32::from(pixel.x), i32::from(pixel.y))
            }
        }
    }
}

// Template pixels from figures 8 through 11, listed from the most
// significant context bit down.
#[rustfmt::skip]
const T0_SLOTS: [Slot; 16] = [
    Slot::At(3), Slot::Fixed(-1, -2), Slot::Fixed(0, -2), Slot::Fixed(1, -2), Slot::At(2),
    Slot::At(1), Slot::Fixed(-2, -1), Slot::Fixed(-1, -1), Slot::Fixed(0, -1),
    Slot::Fixed(1, -1), Slot::Fixed(2, -1), Slot::At(0),
    Slot::Fixed(-4, 0), Slot::Fixed(-3, 0), Slot::Fixed(-2, 0), Slot::Fixed(-1, 0),
];
#[rustfmt::skip]
const T1_SLOTS: [Slot; 13] = [
    Slot::Fixed(-1, -2), Slot::Fixed(0, -2), Slot::Fixed(1, -2), Slot::Fixed(2, -2),
    Slot::Fixed(-2, -1), Slot::Fixed(-1, -1), Slot::Fixed(0, -1), Slot::Fixed(1, -1),
    Slot::Fixed(2, -1), Slot::At(0),
    Slot::Fixed(-3, 0), Slot::Fixed(-2, 0), Slot::Fixed(-1, 0),
];
#[rustfmt::skip]
const T2_SLOTS: [Slot; 10] = [
    Slot::Fixed(-1, -2), Slot::Fixed(0, -2), Slot::Fixed(1, -2),
    Slot::Fixed(-2, -1), Slot::Fixed(-1, -1), Slot::Fixed(0, -1), Slot::Fixed(1, -1),
    Slot::At(0),
    Slot::Fixed(-2, 0), Slot::Fixed(-1, 0),
];
#[rustfmt::skip]
const T3_SLOTS: [Slot; 10] = [
    Slot::Fixed(-3, -1), Slot::Fixed(-2, -1), Slot::Fixed(-1, -1), Slot::Fixed(0, -1),
    Slot::Fixed(1, -1), Slot::At(0),
    Slot::Fixed(-4, 0), Slot::Fixed(-3, 0), Slot::Fixed(-2, 0), Slot::Fixed(-1, 0),
];

fn context_at(bitmap: &Bitmap, x: i32, y: i32, slots: &[Slot], at: &[AtPixel]) -> u32 {
    let mut context = 0;
    for slot in slots {
        let (dx, dy) = slot.offset(at);
        context = (context << 1) | bitmap.pixel_at(x + dx, y + dy);
    }

    context
}

/// A template prepared for one decode: most template pixels appear in
/// two consecutive contexts along a row, so their bits carry over with
/// a shift and only the remaining entries are fetched per pixel.
struct Neighborhood<'a> {
    slots: &'static [Slot],
    at: &'a [AtPixel],
    /// Context bits that stay valid after shifting the previous label.
    reuse_mask: u32,
    /// Offset and context bit of every entry fetched fresh.
    changing: Vec<(i32, i32, u32)>,
    /// The leftmost and topmost pixel with every offset in bounds, and
    /// the width margin the rightmost offset needs.
    interior_left: u32,
    interior_top: u32,
    margin_right: i32,
}

impl<'a> Neighborhood<'a> {
    fn new(template: Template, at: &'a [AtPixel]) -> Self {
        let slots = template.slots();
        let offsets: Vec<(i32, i32)> = slots.iter().map(|slot| slot.offset(at)).collect();

        let mut reuse_mask = 0_u32;
        let mut changing = Vec::new();
        for (k, &(dx, dy)) in offsets.iter().enumerate() {
            let bit = 1 << (offsets.len() - 1 - k);
            // The entry one step right in the same row supplies this bit
            // through the shift; anything else must be re-read.
            if offsets.get(k + 1) == Some(&(dx + 1, dy)) {
                reuse_mask |= bit;
            } else {
                changing.push((dx, dy, bit));
            }
        }

        let min_x = offsets.iter().map(|o| o.0).min().unwrap_or(0);
        let max_x = offsets.iter().map(|o| o.0).max().unwrap_or(0);
        let min_y = offsets.iter().map(|o| o.1).min().unwrap_or(0);

        Self {
            slots,
            at,
            reuse_mask,
            changing,
            interior_left: (-min_x).max(0) as u32,
            interior_top: (-min_y).max(0) as u32,
            margin_right: max_x,
        }
    }

    /// The context at `(x, y)`, given the context of `(x - 1, y)`.
    fn context(&self, bitmap: &Bitmap, x: u32, y: u32, previous: u32) -> u32 {
        let interior = x >= self.interior_left
            && y >= self.interior_top
            && i64::from(x) + i64::from(self.margin_right) < i64::from(bitmap.width());
        if !interior {
            return context_at(bitmap, x as i32, y as i32, self.slots, self.at);
        }

        let mut context = (previous << 1) & self.reuse_mask;
        for &(dx, dy, bit) in &self.changing {
            if bitmap.pixel_at(x as i32 + dx, y as i32 + dy) != 0 {
                context |= bit;
            }
        }

        context
    }
}

/// Read the adaptive pixels for `template` from the segment header.
///
/// An adaptive pixel must lie in already-decoded territory: strictly
/// above the current row, or to its left within it.
pub(crate) fn parse_at_pixels(
    reader: &mut BitReader<'_>,
    template: Template,
) -> Result<Vec<AtPixel>> {
    let mut pixels = Vec::with_capacity(template.at_count());
    for _ in 0..template.at_count() {
        let x = i16::from(read!(reader.read_bits(8))? as u8 as i8);
        let y = i16::from(read!(reader.read_bits(8))? as u8 as i8);
        if y > 0 || (y == 0 && x >= 0) {
            bail!(RegionError::InvalidAtPixel);
        }

        pixels.push(AtPixel { x, y });
    }

    Ok(pixels)
}

/// The number of contexts every template fits into.
pub(crate) const CONTEXT_COUNT: usize = 1 << 16;

/// Decode the pixels of `bitmap` with the MQ coder (6.2.5.7).
///
/// The context array is shared across calls when several bitmaps are
/// coded in one arithmetic stream, as symbol dictionaries do.
pub(crate) fn decode_bitmap(
    bitmap: &mut Bitmap,
    mq: &mut MqDecoder<'_>,
    contexts: &mut [Context],
    template: Template,
    at: &[AtPixel],
    tpgdon: bool,
) -> Result<()> {
    debug_assert_eq!(at.len(), template.at_count());

    let neighborhood = Neighborhood::new(template, at);
    let mut typical = false;

    for y in 0..bitmap.height() {
        if tpgdon {
            let sltp = mq.decode(&mut contexts[template.sltp_context() as usize]);
            if sltp == 1 {
                typical = !typical;
            }

            // A typical row repeats the row above it.
            if typical {
                if y > 0 {
                    bitmap.duplicate_row(y, y - 1);
                }
                continue;
            }
        }

        let mut context = 0;
        for x in 0..bitmap.width() {
            context = neighborhood.context(bitmap, x, y, context);
            let pixel = mq.decode(&mut contexts[context as usize]);
            bitmap.set(x, y, pixel == 1);
        }
    }

    Ok(())
}

fn mmr_error(err: graven_ccitt::DecodeError) -> DecodeError {
    match err {
        graven_ccitt::DecodeError::UnexpectedEof => ParseError::UnexpectedEof.into(),
        graven_ccitt::DecodeError::InvalidCode => HuffmanError::InvalidCode.into(),
        graven_ccitt::DecodeError::InvalidDimensions => RegionError::InvalidDimension.into(),
    }
}

/// Decode the pixels of `bitmap` from an MMR coding (6.2.6).
///
/// Returns the number of bytes consumed, including any end-of-block
/// pattern, so that callers packing several codings back to back can
/// continue after it.
pub(crate) fn decode_bitmap_mmr(bitmap: &mut Bitmap, data: &[u8]) -> Result<usize> {
    let params = graven_ccitt::Params {
        k: -1,
        columns: bitmap.width(),
        rows: bitmap.height(),
        black_is_1: true,
        encoded_byte_align: false,
        end_of_line: false,
        end_of_block: true,
    };

    let mut decoder = graven_ccitt::Decoder::new(data, &params);
    for y in 0..bitmap.height() {
        let row = decoder
            .next_row()
            .map_err(mmr_error)?
            .ok_or(ParseError::UnexpectedEof)?;

        for x in 0..bitmap.width() {
            let bit = (row[(x / 8) as usize] >> (7 - (x % 8))) & 1;
            bitmap.set(x, y, bit != 0);
        }
    }

    decoder.consume_eofb();
    Ok(decoder.bytes_consumed())
}

/// Decode a generic region segment (7.4.6).
///
/// `unknown_length` marks the streaming escape of 7.2.7: the region
/// data then ends with a terminator and a four-byte real row count,
/// which replaces the declared height.
pub(crate) fn decode_region(data: &[u8], unknown_length: bool) -> Result<(RegionInfo, Bitmap)> {
    let (body, row_count) = if unknown_length {
        let split = data
            .len()
            .checked_sub(4)
            .ok_or(DecodeError::Parse(ParseError::UnexpectedEof))?;
        let count = u32::from_be_bytes(
            data[split..]
                .try_into()
                .map_err(|_| ParseError::UnexpectedEof)?,
        );

        (&data[..split], Some(count))
    } else {
        (data, None)
    };

    let mut reader = BitReader::new(body);
    let mut info = RegionInfo::parse(&mut reader)?;

    if let Some(count) = row_count {
        if count > info.height || count == 0 {
            bail!(RegionError::InvalidDimension);
        }

        info.height = count;
    }

    let flags = read!(reader.read_bits(8))?;
    let mmr = flags & 1 != 0;
    let template = Template::from_bits(((flags >> 1) & 3) as u8);
    let tpgdon = flags & 8 != 0;
    if flags & 0x10 != 0 {
        // Extended (12-pixel) templates.
        bail!(DecodeError::Unsupported);
    }

    let mut bitmap = Bitmap::new(info.width, info.height)?;

    if mmr {
        read!(reader.tail())
            .and_then(|tail| decode_bitmap_mmr(&mut bitmap, tail).map(|_| ()))?;
    } else {
        let at = parse_at_pixels(&mut reader, template)?;
        reader.align();
        let mut mq = MqDecoder::new(read!(reader.tail())?);
        let mut contexts = vec![Context::default(); CONTEXT_COUNT];
        decode_bitmap(&mut bitmap, &mut mq, &mut contexts, template, &at, tpgdon)?;
    }

    Ok((info, bitmap))
}

#[cfg(test)]
mod tests {
    use graven_common::bit::BitReader;

    use super::{AtPixel, Neighborhood, Template, context_at, decode_region, parse_at_pixels};
    use crate::bitmap::Bitmap;
    use crate::error::{DecodeError, RegionError};

    #[test]
    fn template0_context_order() {
        // Row 0 all black; the context of (0, 2) then holds exactly the
        // row -2 pixels that are in bounds, in template order.
        let mut bitmap = Bitmap::new(8, 3).unwrap();
        for x in 0..8 {
            bitmap.set(x, 0, true);
        }

        let at = [
            AtPixel { x: 3, y: -1 },
            AtPixel { x: -3, y: -1 },
            AtPixel { x: 2, y: -2 },
            AtPixel { x: -2, y: -2 },
        ];
        let context = context_at(&bitmap, 0, 2, Template::T0.slots(), &at);

        assert_eq!(context, 0x3800);
    }

    /// The sliding context update must agree with the full recompute at
    /// every pixel, including the border columns it falls back on.
    #[test]
    fn incremental_contexts_match_the_recompute() {
        let mut bitmap = Bitmap::new(19, 7).unwrap();
        for y in 0..7 {
            for x in 0..19 {
                bitmap.set(x, y, (x * 7 + y * 3) % 5 < 2);
            }
        }

        let cases: [(Template, Vec<AtPixel>); 3] = [
            (
                Template::T0,
                vec![
                    AtPixel { x: 3, y: -1 },
                    AtPixel { x: -3, y: -1 },
                    AtPixel { x: 2, y: -2 },
                    AtPixel { x: -2, y: -2 },
                ],
            ),
            // A moved adaptive pixel breaks a run of fixed entries.
            (Template::T0, vec![
                AtPixel { x: -5, y: -1 },
                AtPixel { x: -3, y: -1 },
                AtPixel { x: 2, y: -2 },
                AtPixel { x: -2, y: -2 },
            ]),
            (Template::T2, vec![AtPixel { x: -7, y: 0 }]),
        ];

        for (template, at) in &cases {
            let neighborhood = Neighborhood::new(*template, at);
            for y in 0..7 {
                let mut context = 0;
                for x in 0..19 {
                    context = neighborhood.context(&bitmap, x, y, context);
                    let expected =
                        context_at(&bitmap, x as i32, y as i32, template.slots(), at);
                    assert_eq!(context, expected, "({x}, {y})");
                }
            }
        }
    }

    #[test]
    fn at_pixel_in_undecoded_territory_is_rejected() {
        // (1, 0) points right of the current pixel.
        let mut reader = BitReader::new(&[0x01, 0x00, 0x00, 0xFF]);
        assert_eq!(
            parse_at_pixels(&mut reader, Template::T1).unwrap_err(),
            DecodeError::Region(RegionError::InvalidAtPixel)
        );

        // (-8, 0) is fine for the first pixel of a row.
        let mut reader = BitReader::new(&[0xF8, 0x00]);
        let at = parse_at_pixels(&mut reader, Template::T1).unwrap();
        assert_eq!((at[0].x, at[0].y), (-8, 0));
    }

    fn pack(codes: &str) -> Vec<u8> {
        let mut out = Vec::new();
        let mut byte = 0_u8;
        let mut count = 0;

        for ch in codes.chars().filter(|c| !c.is_whitespace()) {
            byte = (byte << 1) | (ch == '1') as u8;
            count += 1;
            if count == 8 {
                out.push(byte);
                byte = 0;
                count = 0;
            }
        }

        if count > 0 {
            out.push(byte << (8 - count));
        }

        out
    }

    #[test]
    fn unknown_length_mmr_region() {
        // Declared height is the unknown-length escape; the real row
        // count (2) trails the data after the 00 00 terminator.
        let mut data = Vec::new();
        data.extend_from_slice(&8_u32.to_be_bytes());
        data.extend_from_slice(&u32::MAX.to_be_bytes());
        data.extend_from_slice(&0_u32.to_be_bytes());
        data.extend_from_slice(&0_u32.to_be_bytes());
        data.push(0x00);
        data.push(0x01);

        // Two MMR-coded checkerboard rows.
        let row0 = "001 00110101 010  001 000111 010  001 000111 010  001 000111 010  1";
        let row1 = "011 010 010 010 010 010 010 1";
        data.extend_from_slice(&pack(&format!("{row0} {row1}")));
        data.extend_from_slice(&[0x00, 0x00]);
        data.extend_from_slice(&2_u32.to_be_bytes());

        let (info, bitmap) = decode_region(&data, true).unwrap();

        assert_eq!(info.height, 2);
        assert_eq!(bitmap.to_packed(), [0xAA, 0x55]);
    }
}
