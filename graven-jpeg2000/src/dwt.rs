//! Inverse discrete wavelet transform (ITU-T T.800 Annex F).
//!
//! Each reconstruction step interleaves the LL band of the previous
//! level with the HL, LH, and HH bands of the current one, then runs
//! the one-dimensional synthesis filter over every row and column.
//! Samples outside the signal are supplied by periodic symmetric
//! extension, so all index arithmetic happens on the absolute
//! coordinates of the reference grid partitions.

use crate::codestream::WaveletTransform;
use crate::tile::Rect;

/// Extension margin; the 9-7 filter reaches four samples out.
const MARGIN: usize = 4;

/// Lifting parameters of the irreversible 9-7 filter (Table F.4).
const ALPHA: f32 = -1.586_134_3;
const BETA: f32 = -0.052_980_118;
const GAMMA: f32 = 0.882_911_1;
const DELTA: f32 = 0.443_506_85;
const K: f32 = 1.230_174_1;
const K_INV: f32 = 1.0 / K;

/// One sub-band's worth of dequantized coefficients.
pub(crate) struct BandData {
    pub(crate) rect: Rect,
    pub(crate) data: Vec<f32>,
}

impl BandData {
    pub(crate) fn zeroed(rect: Rect) -> Self {
        Self {
            data: vec![0.0; rect.width() as usize * rect.height() as usize],
            rect,
        }
    }
}

/// Periodic symmetric extension (F-4): reflect an index into [i0, i1)
/// without repeating the boundary samples.
fn pse(i: i64, i0: i64, i1: i64) -> i64 {
    let span = 2 * (i1 - i0 - 1);
    let m = (i - i0).rem_euclid(span);
    i0 + m.min(span - m)
}

/// Fill the margins of a line whose signal occupies [MARGIN, MARGIN+n).
fn extend(line: &mut [f32], i0: i64, i1: i64) {
    let n = (i1 - i0) as usize;
    debug_assert_eq!(line.len(), n + 2 * MARGIN);

    if n == 1 {
        let value = line[MARGIN];
        line[..MARGIN].fill(value);
        line[MARGIN + 1..].fill(value);
        return;
    }

    for k in 0..MARGIN as i64 {
        let left = pse(i0 - 1 - k, i0, i1);
        line[(MARGIN as i64 - 1 - k) as usize] = line[(left - i0) as usize + MARGIN];
        let right = pse(i1 + k, i0, i1);
        line[MARGIN + n + k as usize] = line[(right - i0) as usize + MARGIN];
    }
}

/// The reversible 5-3 synthesis filter (F.5.4). Works on the extended
/// line; parity is taken from the absolute sample index.
fn synthesize_53(line: &mut [f32], i0: i64) {
    let base = i0 - MARGIN as i64;

    for j in 1..line.len() - 1 {
        if (base + j as i64) % 2 == 0 {
            line[j] -= ((line[j - 1] + line[j + 1] + 2.0) / 4.0).floor();
        }
    }
    for j in 1..line.len() - 1 {
        if (base + j as i64) % 2 != 0 {
            line[j] += ((line[j - 1] + line[j + 1]) / 2.0).floor();
        }
    }
}

/// The irreversible 9-7 synthesis filter (F.4.8.2).
fn synthesize_97(line: &mut [f32], i0: i64) {
    let base = i0 - MARGIN as i64;
    let even = |j: usize| (base + j as i64) % 2 == 0;

    for j in 0..line.len() {
        if even(j) {
            line[j] *= K;
        } else {
            line[j] *= K_INV;
        }
    }
    for j in 1..line.len() - 1 {
        if even(j) {
            line[j] -= DELTA * (line[j - 1] + line[j + 1]);
        }
    }
    for j in 1..line.len() - 1 {
        if !even(j) {
            line[j] -= GAMMA * (line[j - 1] + line[j + 1]);
        }
    }
    for j in 1..line.len() - 1 {
        if even(j) {
            line[j] -= BETA * (line[j - 1] + line[j + 1]);
        }
    }
    for j in 1..line.len() - 1 {
        if !even(j) {
            line[j] -= ALPHA * (line[j - 1] + line[j + 1]);
        }
    }
}

fn synthesize(transform: WaveletTransform, line: &mut [f32], i0: i64, i1: i64) {
    extend(line, i0, i1);
    match transform {
        WaveletTransform::Reversible53 => synthesize_53(line, i0),
        WaveletTransform::Irreversible97 => synthesize_97(line, i0),
    }
}

/// Reconstruct one resolution level: interleave the four bands over
/// `rect` (B.15) and apply the synthesis filter to rows, then columns.
pub(crate) fn compose(
    transform: WaveletTransform,
    ll: &BandData,
    hl: &BandData,
    lh: &BandData,
    hh: &BandData,
    rect: Rect,
) -> BandData {
    let width = rect.width() as usize;
    let height = rect.height() as usize;
    let mut out = vec![0.0_f32; width * height];

    for (band, dx, dy) in [(ll, 0, 0), (hl, 1, 0), (lh, 0, 1), (hh, 1, 1)] {
        let bw = band.rect.width() as usize;
        for v in 0..band.rect.height() as usize {
            for u in 0..bw {
                let rx = 2 * (band.rect.x0 as usize + u) + dx - rect.x0 as usize;
                let ry = 2 * (band.rect.y0 as usize + v) + dy - rect.y0 as usize;
                out[rx + ry * width] = band.data[u + v * bw];
            }
        }
    }

    // Horizontal pass.
    if width == 1 {
        if rect.x0 % 2 != 0 {
            for value in &mut out {
                *value *= 0.5;
            }
        }
    } else {
        let mut line = vec![0.0_f32; width + 2 * MARGIN];
        for y in 0..height {
            line[MARGIN..MARGIN + width].copy_from_slice(&out[y * width..(y + 1) * width]);
            synthesize(transform, &mut line, rect.x0 as i64, rect.x1 as i64);
            out[y * width..(y + 1) * width].copy_from_slice(&line[MARGIN..MARGIN + width]);
        }
    }

    // Vertical pass.
    if height == 1 {
        if rect.y0 % 2 != 0 {
            for value in &mut out {
                *value *= 0.5;
            }
        }
    } else {
        let mut line = vec![0.0_f32; height + 2 * MARGIN];
        for x in 0..width {
            for y in 0..height {
                line[MARGIN + y] = out[x + y * width];
            }
            synthesize(transform, &mut line, rect.y0 as i64, rect.y1 as i64);
            for y in 0..height {
                out[x + y * width] = line[MARGIN + y];
            }
        }
    }

    BandData { rect, data: out }
}

#[cfg(test)]
mod tests {
    use super::{BandData, MARGIN, compose, extend, pse};
    use crate::codestream::WaveletTransform;
    use crate::tile::Rect;

    fn rect(x0: u32, y0: u32, x1: u32, y1: u32) -> Rect {
        Rect { x0, y0, x1, y1 }
    }

    fn band(r: Rect, value: f32) -> BandData {
        BandData {
            data: vec![value; r.width() as usize * r.height() as usize],
            rect: r,
        }
    }

    #[test]
    fn periodic_symmetric_extension() {
        let reflected: Vec<i64> = (0..9).map(|i| pse(i, 3, 6)).collect();
        assert_eq!(reflected, vec![4, 5, 4, 3, 4, 5, 4, 3, 4]);
    }

    #[test]
    fn extension_fills_both_margins() {
        let mut line = vec![0.0; 3 + 2 * MARGIN];
        line[MARGIN..MARGIN + 3].copy_from_slice(&[1.0, 2.0, 3.0]);
        extend(&mut line, 0, 3);

        assert_eq!(
            line,
            vec![1.0, 2.0, 3.0, 2.0, 1.0, 2.0, 3.0, 2.0, 1.0, 2.0, 3.0]
        );
    }

    #[test]
    fn reversible_constant_image() {
        // A constant image transforms to a constant LL band and zero
        // detail bands, at any rectangle parity.
        let full = rect(3, 5, 10, 12);
        let ll = band(rect(2, 3, 5, 6), 7.0);
        let hl = band(rect(1, 3, 5, 6), 0.0);
        let lh = band(rect(2, 2, 5, 6), 0.0);
        let hh = band(rect(1, 2, 5, 6), 0.0);

        let out = compose(WaveletTransform::Reversible53, &ll, &hl, &lh, &hh, full);
        assert_eq!(out.data, vec![7.0; 49]);
    }

    #[test]
    fn irreversible_constant_image() {
        let full = rect(0, 0, 8, 8);
        let ll = band(rect(0, 0, 4, 4), 100.0);
        let hl = band(rect(0, 0, 4, 4), 0.0);
        let lh = band(rect(0, 0, 4, 4), 0.0);
        let hh = band(rect(0, 0, 4, 4), 0.0);

        let out = compose(WaveletTransform::Irreversible97, &ll, &hl, &lh, &hh, full);
        for value in out.data {
            assert!((value - 100.0).abs() < 0.05, "{value}");
        }
    }

    /// Forward 5-3 analysis on one row, for the round-trip check.
    fn analyze_53(samples: &[f32]) -> (Vec<f32>, Vec<f32>) {
        let n = samples.len() as i64;
        let at = |i: i64| samples[pse(i, 0, n) as usize];

        let mut high = Vec::new();
        let mut low = Vec::new();
        for i in (1..n).step_by(2) {
            high.push(at(i) - ((at(i - 1) + at(i + 1)) / 2.0).floor());
        }
        let high_at = |i: i64| {
            let idx = pse(i, 0, n);
            high[(idx / 2) as usize]
        };
        for i in (0..n).step_by(2) {
            low.push(at(i) + ((high_at(i - 1) + high_at(i + 1) + 2.0) / 4.0).floor());
        }

        (low, high)
    }

    #[test]
    fn reversible_round_trip_single_row() {
        let samples: Vec<f32> = [12, -3, 7, 0, 45, 45, 44, 2, 19, 60]
            .iter()
            .map(|&v| v as f32)
            .collect();
        let (low, high) = analyze_53(&samples);

        let full = rect(0, 0, 10, 1);
        let ll = BandData {
            data: low,
            rect: rect(0, 0, 5, 1),
        };
        let hl = BandData {
            data: high,
            rect: rect(0, 0, 5, 1),
        };
        let lh = band(rect(0, 0, 5, 0), 0.0);
        let hh = band(rect(0, 0, 5, 0), 0.0);

        let out = compose(WaveletTransform::Reversible53, &ll, &hl, &lh, &hh, full);
        assert_eq!(out.data, samples);
    }

    #[test]
    fn single_column_at_odd_origin_is_halved() {
        let full = rect(1, 0, 2, 4);
        let ll = band(rect(1, 0, 1, 2), 0.0);
        let hl = band(rect(0, 0, 1, 2), 8.0);
        let lh = band(rect(1, 0, 1, 2), 0.0);
        let hh = band(rect(0, 0, 1, 2), 8.0);

        let out = compose(WaveletTransform::Reversible53, &ll, &hl, &lh, &hh, full);
        // The horizontal pass halves the lone odd column to [4; 4]; the
        // vertical pass then synthesizes it as usual.
        assert_eq!(out.data, vec![2.0, 6.0, 2.0, 6.0]);
    }
}
