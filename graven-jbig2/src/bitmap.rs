//! A 1-bit-per-pixel bitmap and the composition operators that combine
//! region bitmaps onto a page (T.88 section 6.8).

use crate::error::{RegionError, Result, bail};

/// How a source bitmap is combined onto a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CombinationOperator {
    Or,
    And,
    Xor,
    Xnor,
    Replace,
}

impl CombinationOperator {
    /// Decode an external combination operator field. Values above 4 are
    /// reserved.
    pub(crate) fn from_bits(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Or,
            1 => Self::And,
            2 => Self::Xor,
            3 => Self::Xnor,
            4 => Self::Replace,
            _ => bail!(RegionError::InvalidCombinationOperator),
        })
    }

    fn apply(self, dst: bool, src: bool) -> bool {
        match self {
            Self::Or => dst | src,
            Self::And => dst & src,
            Self::Xor => dst ^ src,
            Self::Xnor => !(dst ^ src),
            Self::Replace => src,
        }
    }
}

/// An uncompressed bitmap, one `bool` per pixel in row-major order.
#[derive(Debug, Clone)]
pub(crate) struct Bitmap {
    width: u32,
    height: u32,
    data: Vec<bool>,
}

impl Bitmap {
    /// Create an all-white bitmap.
    ///
    /// Fails with `Overflow` rather than attempting an implausible
    /// allocation when the pixel count does not fit in memory.
    pub(crate) fn new(width: u32, height: u32) -> Result<Self> {
        Self::filled(width, height, false)
    }

    /// Create a bitmap with every pixel set to `value`.
    pub(crate) fn filled(width: u32, height: u32, value: bool) -> Result<Self> {
        let len = (width as usize)
            .checked_mul(height as usize)
            .ok_or(crate::error::DecodeError::Overflow)?;

        Ok(Self {
            width,
            height,
            data: vec![value; len],
        })
    }

    pub(crate) fn width(&self) -> u32 {
        self.width
    }

    pub(crate) fn height(&self) -> u32 {
        self.height
    }

    /// The pixel at `(x, y)`, which must be in bounds.
    #[inline]
    pub(crate) fn get(&self, x: u32, y: u32) -> bool {
        debug_assert!(x < self.width && y < self.height);
        self.data[y as usize * self.width as usize + x as usize]
    }

    /// The pixel at signed coordinates, as the 0/1 value template
    /// contexts are built from. Pixels outside the bitmap read as 0.
    #[inline]
    pub(crate) fn pixel_at(&self, x: i32, y: i32) -> u32 {
        if x < 0 || x >= self.width as i32 || y < 0 || y >= self.height as i32 {
            return 0;
        }

        self.data[y as usize * self.width as usize + x as usize] as u32
    }

    #[inline]
    pub(crate) fn set(&mut self, x: u32, y: u32, value: bool) {
        debug_assert!(x < self.width && y < self.height);
        self.data[y as usize * self.width as usize + x as usize] = value;
    }

    /// Copy row `src_y` onto row `dst_y`.
    pub(crate) fn duplicate_row(&mut self, dst_y: u32, src_y: u32) {
        let w = self.width as usize;
        let src_start = src_y as usize * w;
        self.data.copy_within(src_start..src_start + w, dst_y as usize * w);
    }

    /// Combine `src` onto this bitmap with its top-left corner at
    /// `(x, y)`. Source pixels falling outside the destination are
    /// clipped.
    pub(crate) fn draw(&mut self, src: &Self, x: i32, y: i32, op: CombinationOperator) {
        for sy in 0..src.height {
            let dy = y + sy as i32;
            if dy < 0 || dy >= self.height as i32 {
                continue;
            }

            for sx in 0..src.width {
                let dx = x + sx as i32;
                if dx < 0 || dx >= self.width as i32 {
                    continue;
                }

                let combined = op.apply(self.get(dx as u32, dy as u32), src.get(sx, sy));
                self.set(dx as u32, dy as u32, combined);
            }
        }
    }

    /// Pack the pixels into MSB-first rows of `(width + 7) / 8` bytes,
    /// a set bit meaning black.
    pub(crate) fn to_packed(&self) -> Vec<u8> {
        let row_bytes = (self.width as usize).div_ceil(8);
        let mut out = vec![0_u8; row_bytes * self.height as usize];

        for y in 0..self.height {
            let row = &mut out[y as usize * row_bytes..][..row_bytes];
            for x in 0..self.width {
                if self.get(x, y) {
                    row[x as usize / 8] |= 0x80 >> (x % 8);
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::{Bitmap, CombinationOperator};

    #[test]
    fn draw_clips_at_the_edges() {
        let mut page = Bitmap::new(4, 4).unwrap();
        let mut src = Bitmap::filled(3, 3, true).unwrap();
        src.set(1, 1, false);

        page.draw(&src, -1, -1, CombinationOperator::Or);

        // Only the lower-right 2x2 quadrant of the source lands on the
        // page, with its cleared center at the page origin.
        assert!(!page.get(0, 0));
        assert!(page.get(1, 0));
        assert!(page.get(0, 1));
        assert!(!page.get(2, 2));
    }

    #[test]
    fn xnor_sets_matching_pixels() {
        let mut page = Bitmap::new(2, 1).unwrap();
        let mut src = Bitmap::new(2, 1).unwrap();
        src.set(1, 0, true);

        page.draw(&src, 0, 0, CombinationOperator::Xnor);

        assert!(page.get(0, 0));
        assert!(!page.get(1, 0));
    }

    #[test]
    fn packed_rows_are_msb_first() {
        let mut bitmap = Bitmap::new(9, 2).unwrap();
        bitmap.set(0, 0, true);
        bitmap.set(8, 0, true);
        bitmap.set(4, 1, true);

        assert_eq!(bitmap.to_packed(), [0x80, 0x80, 0x08, 0x00]);
    }
}
