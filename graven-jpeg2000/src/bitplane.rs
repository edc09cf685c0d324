//! Coefficient bit modelling (ITU-T T.800 Annex D).
//!
//! Code-block data is an MQ-coded sequence of coding passes, three per
//! bit-plane: significance propagation, magnitude refinement, and
//! cleanup. The context for each decision is derived from the
//! significance of the eight neighbors, so the decoder mirrors the
//! full state machine of the encoder: significance flags, sign flags,
//! and the pass membership of every coefficient.

use graven_common::mq::{Context, MqDecoder};

use crate::error::{CodingError, Result, bail};
use crate::tile::BandKind;

/// Context labels 0 to 8 are zero coding, 9 to 13 sign coding, and
/// 14 to 16 magnitude refinement (Tables D.1 to D.4).
const RUN_LENGTH: usize = 17;
const UNIFORM: usize = 18;

/// One decoded coefficient in sign-magnitude form.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Coefficient {
    pub(crate) magnitude: u32,
    pub(crate) negative: bool,
    /// Bit-planes accounted for, counting the all-zero leading planes.
    pub(crate) bits: u32,
}

/// Decode the coding passes of one code-block. `zero_bitplanes` is the
/// number of all-zero leading bit-planes from the packet header.
pub(crate) fn decode_block(
    data: &[u8],
    width: u32,
    height: u32,
    band: BandKind,
    passes: u32,
    zero_bitplanes: u32,
    segmentation_symbols: bool,
) -> Result<Vec<Coefficient>> {
    // One cleanup pass for the first plane, then three passes each.
    let planes = passes.div_ceil(3);
    if zero_bitplanes + planes > 31 {
        bail!(CodingError::TooManyBitplanes);
    }

    let mut model = BitModel::new(width, height, band, zero_bitplanes);
    let mut decoder = MqDecoder::new(data);

    for pass in 0..passes {
        match pass % 3 {
            0 => {
                model.cleanup_pass(&mut decoder);

                if segmentation_symbols {
                    let mut symbol = 0_u8;
                    for _ in 0..4 {
                        symbol = (symbol << 1) | decoder.decode(&mut model.contexts[UNIFORM]);
                    }
                    if symbol != 0b1010 {
                        bail!(CodingError::InvalidSegmentationSymbol);
                    }
                }

                // Pass membership is per bit-plane; the cleanup pass
                // closes one.
                model.visited.fill(false);
            }
            1 => model.significance_pass(&mut decoder),
            _ => model.refinement_pass(&mut decoder),
        }
    }

    Ok(model.into_coefficients())
}

struct BitModel {
    width: u32,
    height: u32,
    band: BandKind,
    significant: Vec<bool>,
    /// Whether a coefficient has been refined at least once.
    refined: Vec<bool>,
    /// Whether a coefficient was decoded earlier in the current plane.
    visited: Vec<bool>,
    magnitudes: Vec<u32>,
    negative: Vec<bool>,
    bits: Vec<u32>,
    contexts: [Context; 19],
}

impl BitModel {
    fn new(width: u32, height: u32, band: BandKind, zero_bitplanes: u32) -> Self {
        let len = width as usize * height as usize;

        // Initial context states per Table D.7.
        let mut contexts = [Context::default(); 19];
        contexts[0] = Context::with_index(4);
        contexts[RUN_LENGTH] = Context::with_index(3);
        contexts[UNIFORM] = Context::with_index(46);

        Self {
            width,
            height,
            band,
            significant: vec![false; len],
            refined: vec![false; len],
            visited: vec![false; len],
            magnitudes: vec![0; len],
            negative: vec![false; len],
            bits: vec![zero_bitplanes; len],
            contexts,
        }
    }

    fn into_coefficients(self) -> Vec<Coefficient> {
        self.magnitudes
            .into_iter()
            .zip(self.negative)
            .zip(self.bits)
            .map(|((magnitude, negative), bits)| Coefficient {
                magnitude,
                negative,
                bits,
            })
            .collect()
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (x + y * self.width) as usize
    }

    fn push_bit(&mut self, index: usize, bit: u8) {
        self.magnitudes[index] = (self.magnitudes[index] << 1) | u32::from(bit);
        self.bits[index] += 1;
    }

    fn significance(&self, x: i64, y: i64) -> u8 {
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            return 0;
        }
        u8::from(self.significant[(x + y * i64::from(self.width)) as usize])
    }

    fn horizontal(&self, x: u32, y: u32) -> u8 {
        let (x, y) = (i64::from(x), i64::from(y));
        self.significance(x - 1, y) + self.significance(x + 1, y)
    }

    fn vertical(&self, x: u32, y: u32) -> u8 {
        let (x, y) = (i64::from(x), i64::from(y));
        self.significance(x, y - 1) + self.significance(x, y + 1)
    }

    fn diagonal(&self, x: u32, y: u32) -> u8 {
        let (x, y) = (i64::from(x), i64::from(y));
        self.significance(x - 1, y - 1)
            + self.significance(x + 1, y - 1)
            + self.significance(x - 1, y + 1)
            + self.significance(x + 1, y + 1)
    }

    fn neighborhood(&self, x: u32, y: u32) -> u8 {
        self.horizontal(x, y) + self.vertical(x, y) + self.diagonal(x, y)
    }

    /// The zero coding context label (Tables D.1).
    fn zero_context(&self, x: u32, y: u32) -> usize {
        let mut h = self.horizontal(x, y);
        let mut v = self.vertical(x, y);
        let d = self.diagonal(x, y);

        match self.band {
            BandKind::LowLow | BandKind::LowHigh | BandKind::HighLow => {
                // The HL band is transposed with respect to LH.
                if self.band == BandKind::HighLow {
                    core::mem::swap(&mut h, &mut v);
                }

                match (h, v, d) {
                    (2, _, _) => 8,
                    (1, 1.., _) => 7,
                    (1, 0, 1..) => 6,
                    (1, 0, 0) => 5,
                    (0, 2, _) => 4,
                    (0, 1, _) => 3,
                    (0, 0, 2..) => 2,
                    (0, 0, 1) => 1,
                    _ => 0,
                }
            }
            BandKind::HighHigh => match (h + v, d) {
                (_, 3..) => 8,
                (1.., 2) => 7,
                (0, 2) => 6,
                (2.., 1) => 5,
                (1, 1) => 4,
                (0, 1) => 3,
                (2.., 0) => 2,
                (1, 0) => 1,
                _ => 0,
            },
        }
    }

    /// The magnitude refinement context label (Table D.4).
    fn refinement_context(&self, x: u32, y: u32) -> usize {
        if self.refined[self.index(x, y)] {
            16
        } else if self.neighborhood(x, y) > 0 {
            15
        } else {
            14
        }
    }

    /// Decode a sign bit with the context and flip bit of Table D.2.
    fn decode_sign(&mut self, decoder: &mut MqDecoder<'_>, x: u32, y: u32) {
        fn contribution(model: &BitModel, x: i64, y: i64) -> i32 {
            if model.significance(x, y) == 0 {
                return 0;
            }
            if model.negative[(x + y * i64::from(model.width)) as usize] {
                -1
            } else {
                1
            }
        }

        let (xs, ys) = (i64::from(x), i64::from(y));
        let h = (contribution(self, xs - 1, ys) + contribution(self, xs + 1, ys)).clamp(-1, 1);
        let v = (contribution(self, xs, ys - 1) + contribution(self, xs, ys + 1)).clamp(-1, 1);

        let (label, flip) = match (h, v) {
            (1, 1) => (13, 0),
            (1, 0) => (12, 0),
            (1, -1) => (11, 0),
            (0, 1) => (10, 0),
            (0, 0) => (9, 0),
            (0, -1) => (10, 1),
            (-1, 1) => (11, 1),
            (-1, 0) => (12, 1),
            (-1, -1) => (13, 1),
            _ => (9, 0),
        };

        let bit = decoder.decode(&mut self.contexts[label]) ^ flip;
        let index = self.index(x, y);
        self.negative[index] = bit != 0;
    }

    /// The significance propagation pass (D.3.1) visits insignificant
    /// coefficients with at least one significant neighbor.
    fn significance_pass(&mut self, decoder: &mut MqDecoder<'_>) {
        for (x, y) in ScanOrder::new(self.width, self.height) {
            let index = self.index(x, y);
            if self.significant[index] || self.neighborhood(x, y) == 0 {
                continue;
            }

            let label = self.zero_context(x, y);
            let bit = decoder.decode(&mut self.contexts[label]);
            self.push_bit(index, bit);
            self.visited[index] = true;

            if bit != 0 {
                self.decode_sign(decoder, x, y);
                self.significant[index] = true;
            }
        }
    }

    /// The magnitude refinement pass (D.3.3) visits coefficients that
    /// became significant in an earlier plane.
    fn refinement_pass(&mut self, decoder: &mut MqDecoder<'_>) {
        for (x, y) in ScanOrder::new(self.width, self.height) {
            let index = self.index(x, y);
            if !self.significant[index] || self.visited[index] {
                continue;
            }

            let label = self.refinement_context(x, y);
            let bit = decoder.decode(&mut self.contexts[label]);
            self.push_bit(index, bit);
            self.refined[index] = true;
        }
    }

    /// The cleanup pass (D.3.4) decodes everything the other two passes
    /// left out, with a run-length shortcut for all-zero columns.
    fn cleanup_pass(&mut self, decoder: &mut MqDecoder<'_>) {
        let mut scan = ScanOrder::new(self.width, self.height);

        while let Some((x, mut y)) = scan.next() {
            let mut index = self.index(x, y);
            if self.significant[index] || self.visited[index] {
                continue;
            }

            // A full stripe column with all-zero neighborhoods uses the
            // run-length context.
            let run_length = y % 4 == 0
                && self.height - y >= 4
                && (0..4).all(|dy| self.neighborhood(x, y + dy) == 0);

            let bit = if run_length {
                if decoder.decode(&mut self.contexts[RUN_LENGTH]) == 0 {
                    // The whole column stays insignificant.
                    self.push_bit(index, 0);
                    for _ in 0..3 {
                        let Some((nx, ny)) = scan.next() else {
                            return;
                        };
                        self.push_bit(self.index(nx, ny), 0);
                    }
                    continue;
                }

                // Two UNIFORM bits locate the first significant
                // coefficient of the column.
                let mut zeros = decoder.decode(&mut self.contexts[UNIFORM]);
                zeros = (zeros << 1) | decoder.decode(&mut self.contexts[UNIFORM]);

                for _ in 0..zeros {
                    self.push_bit(index, 0);
                    let Some((nx, ny)) = scan.next() else {
                        return;
                    };
                    y = ny;
                    index = self.index(nx, ny);
                }

                1
            } else {
                let label = self.zero_context(x, y);
                decoder.decode(&mut self.contexts[label])
            };

            self.push_bit(index, bit);

            if bit != 0 {
                self.decode_sign(decoder, x, y);
                self.significant[index] = true;
            }
        }
    }
}

/// The stripe-oriented scan of D.2: four-row stripes, column by column
/// within each stripe.
struct ScanOrder {
    width: u32,
    height: u32,
    stripe: u32,
    x: u32,
    y: u32,
}

impl ScanOrder {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            stripe: 0,
            x: 0,
            y: 0,
        }
    }
}

impl Iterator for ScanOrder {
    type Item = (u32, u32);

    fn next(&mut self) -> Option<(u32, u32)> {
        loop {
            if self.stripe >= self.height {
                return None;
            }

            let stripe_end = (self.stripe + 4).min(self.height);
            if self.y >= stripe_end {
                self.y = self.stripe;
                self.x += 1;
            }
            if self.x >= self.width {
                self.x = 0;
                self.stripe += 4;
                self.y = self.stripe;
                continue;
            }

            let position = (self.x, self.y);
            self.y += 1;
            return Some(position);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Coefficient, ScanOrder, decode_block};
    use crate::tile::BandKind;

    fn values(coefficients: &[Coefficient]) -> Vec<i32> {
        coefficients
            .iter()
            .map(|c| {
                let value = c.magnitude as i32;
                if c.negative { -value } else { value }
            })
            .collect()
    }

    #[test]
    fn scan_order_walks_stripe_columns() {
        let positions: Vec<(u32, u32)> = ScanOrder::new(3, 6).collect();

        #[rustfmt::skip]
        let expected = [
            (0, 0), (0, 1), (0, 2), (0, 3),
            (1, 0), (1, 1), (1, 2), (1, 3),
            (2, 0), (2, 1), (2, 2), (2, 3),
            (0, 4), (0, 5), (1, 4), (1, 5), (2, 4), (2, 5),
        ];
        assert_eq!(positions.as_slice(), &expected);
    }

    /// The first code-block of the example in Annex J.10.4.
    #[test]
    fn conformance_column_low_low() {
        let data = [0x01, 0x8F, 0x0D, 0xC8, 0x75, 0x5D];
        let coefficients =
            decode_block(&data, 1, 5, BandKind::LowLow, 16, 0, false).unwrap();

        assert_eq!(values(&coefficients), vec![-26, -22, -30, -32, -19]);
    }

    /// The second code-block of the example in Annex J.10.4.
    #[test]
    fn conformance_column_low_high() {
        let data = [0x0F, 0xB1, 0x76];
        let coefficients =
            decode_block(&data, 1, 4, BandKind::LowHigh, 7, 0, false).unwrap();

        assert_eq!(values(&coefficients), vec![1, 5, 1, 0]);
    }

    /// A full 32x32 HL block with five leading zero bit-planes.
    #[test]
    fn conformance_block_high_low() {
        let data = [
            225, 72, 111, 59, 122, 13, 70, 63, 48, 1, 128, 138, 167, 142, 136, 234, 176, 18, 250,
            155, 201, 209, 178, 22, 3, 122, 65, 71, 189, 9, 116, 133, 67, 58, 236, 36, 96, 180,
            149, 176, 210, 225, 171, 223, 90, 253, 30, 222, 151, 102, 39, 30, 60, 157, 116, 17, 8,
            141, 68, 131, 67, 132, 26, 211, 205, 234, 114, 234, 111, 228, 220, 77, 234, 216, 84, 2,
            25, 142, 108, 246, 245, 33, 60, 206, 71, 9, 179, 66, 149, 216, 164, 135, 42, 146, 104,
            78, 63, 79, 112, 108, 108, 114, 239, 235, 88, 168, 87, 191, 194, 236, 134, 79, 1, 98,
            61, 204, 148, 226, 181, 124, 207, 254, 19, 70, 229, 25, 35, 118, 148, 10, 123, 207,
            148, 214, 75, 143, 254, 109, 78, 34, 254, 242, 12, 97, 100, 199, 130, 49, 4, 67, 50,
            32, 3, 98, 70, 155, 104, 103, 90, 193, 89, 59, 68, 148, 110, 7, 3, 141, 178, 237, 93,
            253, 5, 69, 137, 207, 188, 149, 131, 59, 203, 223, 41, 106, 78, 51, 223, 21, 113, 99,
            204, 208, 145, 44, 51, 14, 133, 90, 118, 136, 134, 167, 54, 22, 84, 84, 47, 206, 125,
            89, 39, 60, 52, 175, 97, 228, 217, 133, 171, 135, 129, 201, 164, 82, 3, 110, 200, 88,
            1, 140, 235, 79, 57, 38, 185, 197, 236, 33, 222, 117, 107, 156, 18, 78, 235, 63, 131,
            57, 197, 153, 196, 178, 254, 161, 28, 72, 103, 42, 31, 255, 56, 2, 18, 126, 95, 98, 19,
            30, 233,
        ];

        let coefficients =
            decode_block(&data, 32, 32, BandKind::HighLow, 13, 5, false).unwrap();

        let expected = vec![
            0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, -1, 0, -2, 0, -1, 0, 1, 1, -1, 0, 0,
            0, -1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, -1, 0, 0, 1, 0, 0, 0, 0,
            2, 0, 0, 0, 1, 3, -2, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 1, 0, 0, 0,
            0, 0, -1, 0, -2, -1, -2, -1, -1, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, -1, -1, 0, 0,
            -1, 0, -1, 1, 1, 0, 0, 0, 0, 0, 1, 1, -1, -2, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
            0, 1, 0, 0, -1, 0, -1, 2, 1, 0, 1, 1, -1, 0, -2, 1, 4, -1, 0, 1, -1, 0, 0, 0, 0, 0, 0,
            0, 0, 0, 0, 1, 0, 0, 0, 1, -1, 1, 0, 0, 0, 0, 1, 1, 1, 2, -3, 2, 1, 1, -1, -1, 0, 0, 0,
            0, 0, 0, 0, 0, -1, -1, 0, 0, 0, 0, -1, 0, 1, -1, -1, 1, 1, 0, 1, 1, 0, -1, 3, -1, 1, 2,
            0, 2, 0, 0, 0, 0, 0, 0, 0, -1, -1, 1, 1, 0, 0, 0, 0, 0, 0, 0, -1, 1, 2, 0, -2, -1, -1,
            1, 1, 0, -2, 0, 0, -1, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 1, 0, 0, 0, 0, 2, 1, 0, 1, 1,
            0, 0, -1, 1, -1, 0, 2, 2, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1, 1, 0, 0, 1, 0, 0, 0, 2, 1, 0,
            1, 0, 1, 0, -1, 0, 1, -2, -1, -3, -2, 0, 2, 1, 0, 0, 0, 0, 0, 0, 0, -1, 0, 0, -1, -1,
            0, 0, 0, -1, 0, 0, 0, -2, 2, 1, -3, 0, 0, 0, 1, 0, -2, 0, 0, 0, -1, 0, 0, 0, 0, 1, -1,
            0, 1, 0, 1, 1, 0, 0, 0, 1, 0, 0, 1, 1, 1, -3, 2, -1, 2, 0, 1, 1, 1, 0, 0, 2, 0, 0, 0,
            0, 0, 1, 0, 0, 0, -1, 0, -1, 0, 1, 1, 0, -1, 0, 1, 1, -3, 1, -1, -1, 3, 3, 1, 1, 0, 1,
            1, 0, 2, 1, 0, 0, 1, 0, 0, 1, 0, 0, 0, 0, 0, 0, 1, 0, -1, 0, 0, -2, 0, 1, 0, -2, 0, 1,
            1, 3, 2, 0, 1, 1, 1, -1, 0, 0, 0, 0, 1, 0, 1, 1, 0, 0, 1, 0, 0, 0, 1, 3, 0, 5, 1, 3, 0,
            -1, 2, 3, -1, -2, 0, 2, 2, 0, 1, 1, -1, -1, 1, 0, 0, 0, 0, 0, 1, 1, 0, 1, 0, 2, 0, -5,
            2, -2, 0, -3, 0, -3, 1, 1, 0, -1, 0, 0, 2, 2, -2, -1, -1, 1, -1, 0, 1, -1, 0, 1, 0, 0,
            0, 0, 0, -1, 3, 2, 1, 2, 0, -1, 0, -2, 2, 0, -1, -1, -1, 0, 0, 0, 2, 0, 0, 1, 0, 1, 0,
            0, 1, -1, -1, 1, 0, -1, -3, 3, 1, -1, 0, -1, 0, 1, 2, 0, 1, 1, 0, 0, 1, 1, -2, -1, 0,
            -2, 1, 0, -1, -1, 0, 0, 0, 1, 1, 0, 0, -2, -1, 1, -1, 0, 0, 0, 1, 1, -1, 1, -1, 1, -1,
            1, 0, 1, 1, -2, 0, 4, -1, 0, 2, 1, 1, 1, 0, 0, 0, 0, 0, 3, 0, 0, 0, 0, 0, 0, 1, 0, 1,
            1, -1, 0, 0, 0, 3, -1, 2, 0, -3, -1, 0, 1, 0, 0, -1, -1, 1, 1, 0, -2, 2, 1, 1, 0, 0, 0,
            0, 0, 0, 0, 0, -1, 0, 0, 0, -2, 1, 2, 2, 2, 2, -3, -1, 1, 1, 1, 0, -1, 1, 0, -1, 4, 1,
            -1, 0, 0, 0, 0, 1, 0, 1, 0, -1, 0, 1, 0, 1, 1, 2, 2, 1, 2, 2, 10, 0, 0, 0, 0, 1, 0, 1,
            -1, 1, 0, 0, 0, 0, 0, 0, 1, 1, 0, -1, 1, 0, 2, 1, -1, 1, 0, 0, 2, -2, -2, 11, -4, 1, 1,
            1, 1, 0, -1, -3, 2, -1, 0, 1, 1, 0, 1, 0, 0, 1, 0, 0, 1, -1, -1, -1, 0, -1, 1, -2, 1,
            -2, 8, -8, -1, -1, 0, 1, 0, 0, -1, 1, 1, 0, 1, 0, 0, 0, 1, 0, 0, 1, -1, 0, -1, 0, 0, 0,
            -1, 1, 1, 0, 9, 16, -8, 1, 1, 0, 1, 0, 1, -1, 0, 1, 0, 0, 0, 1, 0, 1, 0, 0, 0, 0, 0, 0,
            0, -1, 0, 1, -1, 0, 0, 6, -7, -3, 0, 0, 0, 1, -1, -1, -1, 2, 2, 0, 1, 0, 1, 0, 1, 1, 1,
            0, 0, 0, 0, 0, 0, 1, 0, 0, 1, 1, 6, -9, 1, 1, -1, 1, 0, 0, 1, 0, 1, 1, 0, 0, -1, 0, 0,
            0, 0, 0, -1, 0, 0, 0, 0, 1, 1, 1, -2, 0, 0, 6, -5, 2, 2, 0, 1, 0, 0, 0, -1, 1, 1, 0, 0,
            0, 0, 0, 1, 0, 0, -1, 0, 1, -1, 0, 1, 0, 1, 1, 1, 1, 9, -9, 1, 1, 0, 1, 2, 1, 1, 1, 1,
            1, 0, 0, 0, 0, 0, -1, 0, 1, 0, 1, 1, 0, 0, 3, 1, 0, 1, -1, -2, 4, -9, 2, 0, 0, -1, 0,
            -1, 0, 0, 1, -1, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 1, 1, 0, 1, 1, 1, -1, -2, 9, 6, 5, 0,
            0, -1, 0, 0, 0, 1, 0, 1, 0, 1, 1, 1, 1, -1, 1, -1, 0, 0, -1, 1, 1, 0, 0, -1, 1, 0, -1,
            10, -4, 0, 0, 0, 1, 0, 0, 0, 0, 1, 0,
        ];

        assert_eq!(values(&coefficients), expected);
    }

    /// With five bit-planes missing and five decoded, every coefficient
    /// accounts for ten planes.
    #[test]
    fn bit_counts_include_missing_planes() {
        let data = [0x01, 0x8F, 0x0D, 0xC8, 0x75, 0x5D];
        let coefficients =
            decode_block(&data, 1, 5, BandKind::LowLow, 16, 2, false).unwrap();

        for c in &coefficients {
            assert_eq!(c.bits, 8);
        }
    }
}
