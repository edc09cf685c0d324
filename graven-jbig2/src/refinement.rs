//! Generic refinement decoding (T.88 sections 6.3 and 7.4.7).
//!
//! Refinement codes a bitmap against a reference: the context of each
//! pixel mixes neighbours already decoded in the current bitmap with a
//! window into the reference. Text regions and symbol dictionaries use
//! the same procedure to refine aggregated symbols.

use graven_common::bit::BitReader;
use graven_common::mq::{Context, MqDecoder};

use crate::bitmap::Bitmap;
use crate::error::{DecodeError, RegionError, Result, bail, read};
use crate::generic::AtPixel;
use crate::segment::RegionInfo;

/// The refinement templates of 6.3.5.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefinementTemplate {
    T0,
    T1,
}

impl RefinementTemplate {
    pub(crate) fn from_bits(value: u8) -> Self {
        if value & 1 == 0 { Self::T0 } else { Self::T1 }
    }

    fn slots(self) -> &'static [Slot] {
        match self {
            Self::T0 => &T0_SLOTS,
            Self::T1 => &T1_SLOTS,
        }
    }
}

/// One position in a refinement template: a pixel of the bitmap being
/// decoded, a pixel of the reference, or one of the two adaptive
/// pixels.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Current(i8, i8),
    CurrentAt,
    Reference(i8, i8),
    ReferenceAt,
}

// Template pixels from figures 12 and 13, most significant context bit
// first. Template 0 places its first adaptive pixel in the current
// bitmap and its second in the reference.
#[rustfmt::skip]
const T0_SLOTS: [Slot; 13] = [
    Slot::CurrentAt, Slot::Current(0, -1), Slot::Current(1, -1), Slot::Current(-1, 0),
    Slot::ReferenceAt, Slot::Reference(0, -1), Slot::Reference(1, -1),
    Slot::Reference(-1, 0), Slot::Reference(0, 0), Slot::Reference(1, 0),
    Slot::Reference(-1, 1), Slot::Reference(0, 1), Slot::Reference(1, 1),
];
#[rustfmt::skip]
const T1_SLOTS: [Slot; 10] = [
    Slot::Current(-1, -1), Slot::Current(0, -1), Slot::Current(1, -1), Slot::Current(-1, 0),
    Slot::Reference(0, -1),
    Slot::Reference(-1, 0), Slot::Reference(0, 0), Slot::Reference(1, 0),
    Slot::Reference(0, 1), Slot::Reference(1, 1),
];

/// The number of contexts both templates fit into.
pub(crate) const CONTEXT_COUNT: usize = 1 << 13;

/// Read the two adaptive pixels of refinement template 0. Unlike
/// generic templates these may point anywhere in the reference.
pub(crate) fn parse_at_pixels(reader: &mut BitReader<'_>) -> Result<Vec<AtPixel>> {
    let mut pixels = Vec::with_capacity(2);
    for _ in 0..2 {
        let x = i16::from(read!(reader.read_bits(8))? as u8 as i8);
        let y = i16::from(read!(reader.read_bits(8))? as u8 as i8);
        pixels.push(AtPixel { x, y });
    }

    Ok(pixels)
}

fn context_at(
    bitmap: &Bitmap,
    reference: &Bitmap,
    x: i32,
    y: i32,
    ref_x: i32,
    ref_y: i32,
    slots: &[Slot],
    at: &[AtPixel],
) -> u32 {
    let mut context = 0;
    for slot in slots {
        let pixel = match *slot {
            Slot::Current(dx, dy) => bitmap.pixel_at(x + i32::from(dx), y + i32::from(dy)),
            Slot::CurrentAt => {
                bitmap.pixel_at(x + i32::from(at[0].x), y + i32::from(at[0].y))
            }
            Slot::Reference(dx, dy) => {
                reference.pixel_at(ref_x + i32::from(dx), ref_y + i32::from(dy))
            }
            Slot::ReferenceAt => {
                reference.pixel_at(ref_x + i32::from(at[1].x), ref_y + i32::from(at[1].y))
            }
        };
        context = (context << 1) | pixel;
    }

    context
}

/// Decode the pixels of `bitmap` by refining `reference` (6.3.5.6).
///
/// `dx` and `dy` place the reference relative to the bitmap: reference
/// pixel `(x - dx, y - dy)` underlies bitmap pixel `(x, y)`.
pub(crate) fn decode_bitmap(
    bitmap: &mut Bitmap,
    mq: &mut MqDecoder<'_>,
    contexts: &mut [Context],
    reference: &Bitmap,
    dx: i32,
    dy: i32,
    template: RefinementTemplate,
    at: &[AtPixel],
) -> Result<()> {
    let slots = template.slots();

    for y in 0..bitmap.height() {
        for x in 0..bitmap.width() {
            let context = context_at(
                bitmap,
                reference,
                x as i32,
                y as i32,
                x as i32 - dx,
                y as i32 - dy,
                slots,
                at,
            );
            let pixel = mq.decode(&mut contexts[context as usize]);
            bitmap.set(x, y, pixel == 1);
        }
    }

    Ok(())
}

/// Decode a refinement region segment (7.4.7) against `reference`,
/// positioned at `(dx, dy)` as for [`decode_bitmap`].
pub(crate) fn decode_region(
    data: &[u8],
    reference: &Bitmap,
    dx: i32,
    dy: i32,
) -> Result<(RegionInfo, Bitmap)> {
    let mut reader = BitReader::new(data);
    let info = RegionInfo::parse(&mut reader)?;

    if info.width > reference.width() || info.height > reference.height() {
        bail!(RegionError::InvalidDimension);
    }

    let flags = read!(reader.read_bits(8))?;
    let template = RefinementTemplate::from_bits((flags & 1) as u8);
    if flags & 2 != 0 {
        // Typical prediction over the reference.
        bail!(DecodeError::Unsupported);
    }

    let at = if template == RefinementTemplate::T0 {
        parse_at_pixels(&mut reader)?
    } else {
        Vec::new()
    };

    reader.align();
    let mut mq = MqDecoder::new(read!(reader.tail())?);
    let mut contexts = vec![Context::default(); CONTEXT_COUNT];
    let mut bitmap = Bitmap::new(info.width, info.height)?;
    decode_bitmap(
        &mut bitmap,
        &mut mq,
        &mut contexts,
        reference,
        dx,
        dy,
        template,
        &at,
    )?;

    Ok((info, bitmap))
}

#[cfg(test)]
mod tests {
    use super::{RefinementTemplate, context_at};
    use crate::bitmap::Bitmap;
    use crate::generic::AtPixel;

    #[test]
    fn template1_context_order() {
        // The current bitmap is empty, the reference is all black: the
        // context holds exactly the six reference bits.
        let bitmap = Bitmap::new(3, 3).unwrap();
        let reference = Bitmap::filled(3, 3, true).unwrap();

        let context = context_at(
            &bitmap,
            &reference,
            1,
            1,
            1,
            1,
            RefinementTemplate::T1.slots(),
            &[],
        );

        assert_eq!(context, 0b00_0011_1111);
    }

    #[test]
    fn template0_adaptive_pixels() {
        // A single black pixel reached only through the first adaptive
        // pixel lands in the top context bit.
        let mut bitmap = Bitmap::new(4, 4).unwrap();
        bitmap.set(0, 0, true);
        let reference = Bitmap::new(4, 4).unwrap();

        let at = [AtPixel { x: -2, y: -2 }, AtPixel { x: -1, y: -1 }];
        let context = context_at(
            &bitmap,
            &reference,
            2,
            2,
            2,
            2,
            RefinementTemplate::T0.slots(),
            &at,
        );

        assert_eq!(context, 1 << 12);
    }
}
