//! Color space conversion of the decoded sample buffer.
//!
//! Three-component images are usually stored as YCbCr and four-component
//! ones as YCCK; both convert in place, per pixel, using the ITU-R
//! BT.601 coefficients. Four-component output stays CMYK by default,
//! which is what the surrounding raster pipeline consumes; an RGB
//! rendition goes through the empirical polynomial below.

fn clamp(value: f32) -> u8 {
    if value < 0.0 {
        0
    } else if value > 255.0 {
        255
    } else {
        value as u8
    }
}

/// Convert interleaved YCbCr triples to RGB in place.
pub(crate) fn ycc_to_rgb(data: &mut [u8]) {
    for pixel in data.chunks_exact_mut(3) {
        let y = f32::from(pixel[0]);
        let cb = f32::from(pixel[1]) - 128.0;
        let cr = f32::from(pixel[2]) - 128.0;

        pixel[0] = clamp(y + 1.402 * cr);
        pixel[1] = clamp(y - 0.344_136 * cb - 0.714_136 * cr);
        pixel[2] = clamp(y + 1.772 * cb);
    }
}

/// Convert interleaved YCCK quadruples to CMYK in place. The chroma
/// channels decode exactly as in YCbCr; the result is inverted and the
/// black channel passes through.
pub(crate) fn ycck_to_cmyk(data: &mut [u8]) {
    for pixel in data.chunks_exact_mut(4) {
        let y = f32::from(pixel[0]);
        let cb = f32::from(pixel[1]) - 128.0;
        let cr = f32::from(pixel[2]) - 128.0;

        pixel[0] = 255 - clamp(y + 1.402 * cr);
        pixel[1] = 255 - clamp(y - 0.344_136 * cb - 0.714_136 * cr);
        pixel[2] = 255 - clamp(y + 1.772 * cb);
    }
}

/// Convert interleaved CMYK quadruples to RGB triples, shrinking the
/// buffer in place. A second-order polynomial fitted against printed
/// output replaces the naive linear formula, which renders scanned
/// CMYK material far too dark.
pub(crate) fn cmyk_to_rgb(data: &mut Vec<u8>) {
    let pixels = data.len() / 4;
    let mut out = 0;

    for i in 0..pixels {
        let c = f32::from(data[4 * i]);
        let m = f32::from(data[4 * i + 1]);
        let y = f32::from(data[4 * i + 2]);
        let k = f32::from(data[4 * i + 3]);

        let r = 255.0
            + c * (-6.747147073602441e-5 * c
                + 8.379262121013727e-4 * m
                + 2.894718188643294e-4 * y
                + 3.264231057537806e-3 * k
                - 1.1185611867203937)
            + m * (2.6374107616089405e-5 * m
                - 8.626949158638572e-5 * y
                - 2.748769067499491e-4 * k
                - 2.155688794978967e-2)
            + y * (-3.878099212869363e-5 * y - 3.267808279485286e-4 * k + 0.0686742238595345)
            - k * (3.361971776183937e-4 * k + 0.7430659151342254);
        let g = 255.0
            + c * (1.3596372813588848e-4 * c
                + 9.24537132573585e-4 * m
                + 1.0567359618683593e-4 * y
                + 4.791864687436512e-4 * k
                - 0.3109689587515875)
            + m * (-2.3545346108370344e-4 * m
                + 2.702845253534714e-4 * y
                + 2.0200308977307156e-3 * k
                - 0.7488052167015494)
            + y * (6.834815998235662e-5 * y + 1.5168452363460973e-4 * k - 0.09751927774728933)
            - k * (3.189131175883281e-4 * k + 0.7364883807733168);
        let b = 255.0
            + c * (1.3598650411385307e-5 * c
                + 1.2423956175490851e-4 * m
                + 4.751985097583589e-4 * y
                - 3.6729317476630422e-6 * k
                - 0.05562186980264034)
            + m * (1.6141380598724676e-4 * m
                + 9.692239130725186e-4 * y
                + 7.782692450036253e-4 * k
                - 0.44015232367526463)
            + y * (5.068882914068769e-7 * y + 1.7778369011375071e-3 * k - 0.7591454649749609)
            - k * (3.435319965105553e-4 * k + 0.7063770186160144);

        data[out] = clamp(r);
        data[out + 1] = clamp(g);
        data[out + 2] = clamp(b);
        out += 3;
    }

    data.truncate(pixels * 3);
}

/// Replicate interleaved grayscale samples to RGB triples.
pub(crate) fn gray_to_rgb(data: &mut Vec<u8>) {
    let mut out = Vec::with_capacity(data.len() * 3);
    for &value in data.iter() {
        out.extend_from_slice(&[value, value, value]);
    }
    *data = out;
}

#[cfg(test)]
mod tests {
    use super::{cmyk_to_rgb, gray_to_rgb, ycc_to_rgb, ycck_to_cmyk};

    #[test]
    fn neutral_chroma_is_gray() {
        let mut data = [200, 128, 128];
        ycc_to_rgb(&mut data);
        assert_eq!(data, [200, 200, 200]);
    }

    #[test]
    fn primary_extremes() {
        // Full-scale red chroma on black luma.
        let mut data = [0, 128, 255, 255, 0, 128];
        ycc_to_rgb(&mut data);
        assert_eq!(data[0], 178);
        // Negative chroma clamps at zero.
        assert_eq!(data[1], 0);
        assert_eq!(data[5], 28);
    }

    #[test]
    fn ycck_preserves_black_channel() {
        let mut data = [255, 128, 128, 77];
        ycck_to_cmyk(&mut data);
        assert_eq!(data, [0, 0, 0, 77]);
    }

    #[test]
    fn blank_cmyk_is_white() {
        let mut data = vec![0, 0, 0, 0];
        cmyk_to_rgb(&mut data);
        assert_eq!(data, [255, 255, 255]);
    }

    #[test]
    fn full_black_ink_is_dark_but_not_zero() {
        // The polynomial keeps pure key ink slightly above RGB black,
        // matching how it prints.
        let mut data = vec![0, 0, 0, 255];
        cmyk_to_rgb(&mut data);
        assert_eq!(data, [43, 46, 52]);
    }

    #[test]
    fn cmyk_conversion_shrinks_the_buffer() {
        let mut data = vec![255, 0, 0, 0, 0, 0, 0, 0];
        cmyk_to_rgb(&mut data);
        assert_eq!(data.len(), 6);
        // Pure cyan drives red to the floor.
        assert_eq!(data[0], 0);
        assert_eq!(&data[3..], [255, 255, 255]);
    }

    #[test]
    fn gray_replication() {
        let mut data = vec![0, 129, 255];
        gray_to_rgb(&mut data);
        assert_eq!(data, [0, 0, 0, 129, 129, 129, 255, 255, 255]);
    }
}
