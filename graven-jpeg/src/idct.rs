//! Dequantization and the fixed-point inverse DCT.
//!
//! The transform is the separable 8-point scheme of the independent
//! JPEG group, run once over rows and once over columns with 12-bit
//! scaled cosine constants. The column pass folds the +128 level shift
//! in and clamps straight to 8-bit samples.

/// Zig-zag scan order: position `k` of the scan maps to this index of
/// the natural-order block.
#[rustfmt::skip]
pub(crate) const ZIGZAG: [u8; 64] = [
     0,  1,  8, 16,  9,  2,  3, 10,
    17, 24, 32, 25, 18, 11,  4,  5,
    12, 19, 26, 33, 40, 48, 41, 34,
    27, 20, 13,  6,  7, 14, 21, 28,
    35, 42, 49, 56, 57, 50, 43, 36,
    29, 22, 15, 23, 30, 37, 44, 51,
    58, 59, 52, 45, 38, 31, 39, 46,
    53, 60, 61, 54, 47, 55, 62, 63,
];

// cos(n pi / 16) and sin(n pi / 16), scaled by 1 << 12.
const COS_1: i32 = 4017;
const SIN_1: i32 = 799;
const COS_3: i32 = 3406;
const SIN_3: i32 = 2276;
const COS_6: i32 = 1567;
const SIN_6: i32 = 3784;
const SQRT_2: i32 = 5793;
const SQRT_1_2: i32 = 2896;

fn clamp(value: i32) -> u8 {
    // Values carry four fraction bits and a +128.5 bias at this point.
    if value < 16 {
        0
    } else if value >= 4080 {
        255
    } else {
        (value >> 4) as u8
    }
}

/// Dequantize one coefficient block and write the inverse transform as
/// 8-bit samples into `output`, one row every `stride` bytes.
pub(crate) fn quantize_and_inverse(
    block: &[i16],
    quant: &[u16; 64],
    output: &mut [u8],
    stride: usize,
) {
    let mut p = [0_i32; 64];
    for (i, value) in p.iter_mut().enumerate() {
        *value = i32::from(block[i]) * i32::from(quant[i]);
    }

    // Rows.
    for row in (0..64).step_by(8) {
        let (p0, p1, p2, p3) = (p[row], p[row + 1], p[row + 2], p[row + 3]);
        let (p4, p5, p6, p7) = (p[row + 4], p[row + 5], p[row + 6], p[row + 7]);

        // All-zero AC shortcut.
        if p1 | p2 | p3 | p4 | p5 | p6 | p7 == 0 {
            let t = (SQRT_2 * p0 + 512) >> 10;
            p[row..row + 8].fill(t);
            continue;
        }

        // Stage 4.
        let mut v0 = (SQRT_2 * p0 + 128) >> 8;
        let mut v1 = (SQRT_2 * p4 + 128) >> 8;
        let mut v2 = p2;
        let mut v3 = p6;
        let mut v4 = (SQRT_1_2 * (p1 - p7) + 128) >> 8;
        let mut v7 = (SQRT_1_2 * (p1 + p7) + 128) >> 8;
        let mut v5 = p3 << 4;
        let mut v6 = p5 << 4;

        // Stage 3.
        v0 = (v0 + v1 + 1) >> 1;
        v1 = v0 - v1;
        let mut t = (v2 * SIN_6 + v3 * COS_6 + 128) >> 8;
        v2 = (v2 * COS_6 - v3 * SIN_6 + 128) >> 8;
        v3 = t;
        v4 = (v4 + v6 + 1) >> 1;
        v6 = v4 - v6;
        v7 = (v7 + v5 + 1) >> 1;
        v5 = v7 - v5;

        // Stage 2.
        v0 = (v0 + v3 + 1) >> 1;
        v3 = v0 - v3;
        v1 = (v1 + v2 + 1) >> 1;
        v2 = v1 - v2;
        t = (v4 * SIN_3 + v7 * COS_3 + 2048) >> 12;
        v4 = (v4 * COS_3 - v7 * SIN_3 + 2048) >> 12;
        v7 = t;
        t = (v5 * SIN_1 + v6 * COS_1 + 2048) >> 12;
        v5 = (v5 * COS_1 - v6 * SIN_1 + 2048) >> 12;
        v6 = t;

        // Stage 1.
        p[row] = v0 + v7;
        p[row + 7] = v0 - v7;
        p[row + 1] = v1 + v6;
        p[row + 6] = v1 - v6;
        p[row + 2] = v2 + v5;
        p[row + 5] = v2 - v5;
        p[row + 3] = v3 + v4;
        p[row + 4] = v3 - v4;
    }

    // Columns.
    for col in 0..8 {
        let (p0, p1, p2, p3) = (p[col], p[col + 8], p[col + 16], p[col + 24]);
        let (p4, p5, p6, p7) = (p[col + 32], p[col + 40], p[col + 48], p[col + 56]);

        if p1 | p2 | p3 | p4 | p5 | p6 | p7 == 0 {
            let t = (SQRT_2 * p0 + 8192) >> 14;
            let sample = if t < -2040 {
                0
            } else if t >= 2024 {
                255
            } else {
                ((t + 2056) >> 4) as u8
            };
            for row in 0..8 {
                output[row * stride + col] = sample;
            }
            continue;
        }

        // Stage 4.
        let mut v0 = (SQRT_2 * p0 + 2048) >> 12;
        let mut v1 = (SQRT_2 * p4 + 2048) >> 12;
        let mut v2 = p2;
        let mut v3 = p6;
        let mut v4 = (SQRT_1_2 * (p1 - p7) + 2048) >> 12;
        let mut v7 = (SQRT_1_2 * (p1 + p7) + 2048) >> 12;
        let mut v5 = p3;
        let mut v6 = p5;

        // Stage 3. The bias folds the level shift into the DC path as
        // 128.5 in 5 fraction bits.
        v0 = ((v0 + v1 + 1) >> 1) + 4112;
        v1 = v0 - v1;
        let mut t = (v2 * SIN_6 + v3 * COS_6 + 2048) >> 12;
        v2 = (v2 * COS_6 - v3 * SIN_6 + 2048) >> 12;
        v3 = t;
        v4 = (v4 + v6 + 1) >> 1;
        v6 = v4 - v6;
        v7 = (v7 + v5 + 1) >> 1;
        v5 = v7 - v5;

        // Stage 2.
        v0 = (v0 + v3 + 1) >> 1;
        v3 = v0 - v3;
        v1 = (v1 + v2 + 1) >> 1;
        v2 = v1 - v2;
        t = (v4 * SIN_3 + v7 * COS_3 + 2048) >> 12;
        v4 = (v4 * COS_3 - v7 * SIN_3 + 2048) >> 12;
        v7 = t;
        t = (v5 * SIN_1 + v6 * COS_1 + 2048) >> 12;
        v5 = (v5 * COS_1 - v6 * SIN_1 + 2048) >> 12;
        v6 = t;

        // Stage 1 and the final clamp.
        output[col] = clamp(v0 + v7);
        output[7 * stride + col] = clamp(v0 - v7);
        output[stride + col] = clamp(v1 + v6);
        output[6 * stride + col] = clamp(v1 - v6);
        output[2 * stride + col] = clamp(v2 + v5);
        output[5 * stride + col] = clamp(v2 - v5);
        output[3 * stride + col] = clamp(v3 + v4);
        output[4 * stride + col] = clamp(v3 - v4);
    }
}
