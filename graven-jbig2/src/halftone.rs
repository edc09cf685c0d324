//! Pattern dictionary and halftone region decoding (T.88 sections 6.6,
//! 6.7, 7.4.4, and 7.4.5).
//!
//! A pattern dictionary codes all its patterns side by side in one
//! collective bitmap. A halftone region decodes a grid of gray-scale
//! values, bit plane by bit plane in Gray code, and renders each cell
//! with the pattern its value selects.

use graven_common::bit::BitReader;
use graven_common::mq::{Context, MqDecoder};

use crate::bitmap::{Bitmap, CombinationOperator};
use crate::error::{DecodeError, RegionError, Result, bail, read};
use crate::generic::{self, AtPixel, Template};
use crate::integer::code_length;
use crate::segment::RegionInfo;

/// The patterns of a dictionary segment, indexed by gray-scale value.
#[derive(Debug)]
pub(crate) struct PatternDictionary {
    pub(crate) patterns: Vec<Bitmap>,
}

/// Decode a pattern dictionary segment (7.4.4).
pub(crate) fn decode_patterns(data: &[u8]) -> Result<PatternDictionary> {
    let mut reader = BitReader::new(data);

    let flags = read!(reader.read_bits(8))?;
    let mmr = flags & 1 != 0;
    let template = Template::from_bits(((flags >> 1) & 3) as u8);

    let width = read!(reader.read_bits(8))?;
    let height = read!(reader.read_bits(8))?;
    if width == 0 || height == 0 {
        bail!(RegionError::InvalidDimension);
    }

    let gray_max = read!(reader.read_bits(32))?;
    let count = gray_max.checked_add(1).ok_or(DecodeError::Overflow)?;
    let collective_width = count.checked_mul(width).ok_or(DecodeError::Overflow)?;

    let mut collective = Bitmap::new(collective_width, height)?;
    if mmr {
        generic::decode_bitmap_mmr(&mut collective, read!(reader.tail())?)?;
    } else {
        // The nominal adaptive pixels of 6.7.5: the first reaches back
        // one whole pattern width.
        let mut at = vec![AtPixel { x: -(width as i16), y: 0 }];
        if template == Template::T0 {
            at.extend_from_slice(&[
                AtPixel { x: -3, y: -1 },
                AtPixel { x: 2, y: -2 },
                AtPixel { x: -2, y: -2 },
            ]);
        }

        let mut mq = MqDecoder::new(read!(reader.tail())?);
        let mut contexts = vec![Context::default(); generic::CONTEXT_COUNT];
        generic::decode_bitmap(&mut collective, &mut mq, &mut contexts, template, &at, false)?;
    }

    let mut patterns = Vec::with_capacity(count.min(4096) as usize);
    for i in 0..count {
        let mut pattern = Bitmap::new(width, height)?;
        for y in 0..height {
            for x in 0..width {
                pattern.set(x, y, collective.get(i * width + x, y));
            }
        }
        patterns.push(pattern);
    }

    Ok(PatternDictionary { patterns })
}

/// Decode the gray-scale image of a halftone grid (Annex C): one bit
/// plane per value bit, most significant first, each plane coded as a
/// generic bitmap and combined by Gray decoding.
fn decode_grayscale(
    reader: &mut BitReader<'_>,
    mmr: bool,
    template: Template,
    bits_per_value: u8,
    grid_width: u32,
    grid_height: u32,
) -> Result<Vec<u32>> {
    let len = (grid_width as usize)
        .checked_mul(grid_height as usize)
        .ok_or(DecodeError::Overflow)?;
    let mut values = vec![0_u32; len];
    let mut bits = vec![0_u8; len];

    // The adaptive pixels of Table C.4.
    let at: &[AtPixel] = match template {
        Template::T0 => &[
            AtPixel { x: 3, y: -1 },
            AtPixel { x: -3, y: -1 },
            AtPixel { x: 2, y: -2 },
            AtPixel { x: -2, y: -2 },
        ],
        Template::T1 => &[AtPixel { x: 3, y: -1 }],
        _ => &[AtPixel { x: 2, y: -1 }],
    };

    let mut mmr_data = read!(reader.tail())?;
    let mut mq = MqDecoder::new(mmr_data);
    let mut contexts = vec![Context::default(); generic::CONTEXT_COUNT];

    for _ in 0..bits_per_value {
        let mut plane = Bitmap::new(grid_width, grid_height)?;
        if mmr {
            // Planes follow each other in the stream, each with its own
            // end-of-block pattern.
            let consumed = generic::decode_bitmap_mmr(&mut plane, mmr_data)?;
            mmr_data = &mmr_data[consumed.min(mmr_data.len())..];
        } else {
            generic::decode_bitmap(&mut plane, &mut mq, &mut contexts, template, at, false)?;
        }

        for (i, (value, bit)) in values.iter_mut().zip(bits.iter_mut()).enumerate() {
            let x = (i as u32) % grid_width;
            let y = (i as u32) / grid_width;
            *bit ^= plane.get(x, y) as u8;
            *value = (*value << 1) | u32::from(*bit);
        }
    }

    Ok(values)
}

/// Decode a halftone region segment (7.4.5).
pub(crate) fn decode_region(data: &[u8], patterns: &[Bitmap]) -> Result<(RegionInfo, Bitmap)> {
    let mut reader = BitReader::new(data);
    let info = RegionInfo::parse(&mut reader)?;

    let flags = read!(reader.read_bits(8))?;
    let mmr = flags & 1 != 0;
    let template = Template::from_bits(((flags >> 1) & 3) as u8);
    if flags & 8 != 0 {
        // Skip bitmaps require knowledge of the enclosing region's
        // composition the segment does not carry.
        bail!(DecodeError::Unsupported);
    }
    let comb_op = CombinationOperator::from_bits(((flags >> 4) & 7) as u8)?;
    let default_pixel = flags & 0x80 != 0;

    let grid_width = read!(reader.read_bits(32))?;
    let grid_height = read!(reader.read_bits(32))?;
    let grid_x = read!(reader.read_bits(32))? as i32;
    let grid_y = read!(reader.read_bits(32))? as i32;
    let step_x = read!(reader.read_bits(16))? as i32;
    let step_y = read!(reader.read_bits(16))? as i32;

    if patterns.is_empty() {
        bail!(RegionError::PatternIndexOutOfRange);
    }

    let bits_per_value = code_length(patterns.len() as u32);
    let values = decode_grayscale(&mut reader, mmr, template, bits_per_value, grid_width, grid_height)?;

    let mut bitmap = Bitmap::filled(info.width, info.height, default_pixel)?;

    // Grid coordinates are signed 24.8 fixed point (6.6.5).
    let mut row_x = grid_x;
    let mut row_y = grid_y;
    for m in 0..grid_height {
        let mut x = row_x;
        let mut y = row_y;
        for n in 0..grid_width {
            let index = values[(m * grid_width + n) as usize] as usize;
            let pattern = patterns
                .get(index)
                .ok_or(DecodeError::Region(RegionError::PatternIndexOutOfRange))?;
            bitmap.draw(pattern, x >> 8, y >> 8, comb_op);

            x = x.wrapping_add(step_x);
            y = y.wrapping_sub(step_y);
        }

        row_x = row_x.wrapping_add(step_y);
        row_y = row_y.wrapping_add(step_x);
    }

    Ok((info, bitmap))
}
