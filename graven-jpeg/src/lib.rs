/*!
A memory-safe, pure-Rust baseline and progressive JPEG decoder.

`graven-jpeg` decodes Huffman-coded DCT images as embedded in PDF
`DCTDecode` streams: baseline and extended sequential frames (SOF0 and
SOF1) and progressive frames (SOF2), including spectral selection,
successive approximation, restart intervals and component subsampling.
Arithmetic coding, hierarchical frames and 12-bit precision are
rejected as unsupported.

The output is interleaved 8-bit samples in the image's natural color
space: grayscale, RGB (after the YCbCr transform), or CMYK (after the
YCCK transform when an Adobe segment requests it). The transform choice
follows the Adobe APP14 marker and the component count, and can be
forced either way through [`Params::color_transform`]. Callers that
consume RGB only can set [`Params::force_rgb`] to have grayscale
replicated and CMYK converted through an empirical polynomial.

Two recovery paths mirror what real-world files require: a DNL marker
contradicting the frame's line count causes a single re-parse with the
corrected height, and an end-of-image marker inside scan data truncates
the image gracefully instead of failing.

# Safety
This crate forbids unsafe code via a crate-level attribute.
*/

#![forbid(unsafe_code)]

mod color;
mod decoder;
mod error;
mod huffman;
mod idct;
mod scan;

pub use error::{DecodeError, FormatError, Result};

use decoder::{Abort, Decoder};

/// Decode parameters supplied by the surrounding document, when any.
#[derive(Debug, Clone, Copy, Default)]
pub struct Params {
    /// A scan line count known ahead of decoding, overriding the frame
    /// header. Useful when the header holds a placeholder and the DNL
    /// marker was stripped.
    pub scan_lines: Option<u32>,
    /// Force the YCbCr/YCCK color transform on (`Some(true)`) or off
    /// (`Some(false)`) instead of inferring it from the stream.
    pub color_transform: Option<bool>,
    /// Deliver three RGB samples per pixel regardless of the stream's
    /// color space: grayscale is replicated and CMYK converted.
    pub force_rgb: bool,
}

/// A decoded image: `components` interleaved 8-bit samples per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    /// The width of the image in pixels.
    pub width: u32,
    /// The height of the image in pixels.
    pub height: u32,
    /// The number of components per pixel, 1 to 4.
    pub components: u8,
    /// Interleaved samples, `width * height * components` bytes.
    pub data: Vec<u8>,
}

/// Decode a complete JPEG image.
pub fn decode(data: &[u8], params: &Params) -> Result<Image> {
    let mut decoder = Decoder::new(data, params.scan_lines);
    match decoder.parse() {
        Ok(()) => {}
        Err(Abort::Relines(lines)) => {
            log::warn!("DNL marker corrects the line count to {lines}, parsing again");
            decoder = Decoder::new(data, Some(lines));
            decoder.parse().map_err(Abort::into_error)?;
        }
        Err(Abort::Error(e)) => return Err(e),
    }
    decoder.build_image(params)
}

#[cfg(test)]
mod tests {
    use super::{DecodeError, FormatError, Params, decode};

    /// A minimal grayscale stream: flat quantization, one DC code of
    /// category 4 and an AC table holding only end-of-block.
    fn gray_8x8(sof: u8, scans: &[&[u8]]) -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8];

        data.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x43, 0x00]);
        data.extend_from_slice(&[1; 64]);

        data.extend_from_slice(&[
            0xFF, sof, 0x00, 0x0B, 0x08, 0x00, 0x08, 0x00, 0x08, 0x01, 0x01, 0x11, 0x00,
        ]);

        // DC table 0: one code "0" for category 4.
        data.extend_from_slice(&[0xFF, 0xC4, 0x00, 0x14, 0x00, 0x01]);
        data.extend_from_slice(&[0; 15]);
        data.push(0x04);
        // AC table 0: one code "0" for end-of-block.
        data.extend_from_slice(&[0xFF, 0xC4, 0x00, 0x14, 0x10, 0x01]);
        data.extend_from_slice(&[0; 15]);
        data.push(0x00);

        for scan in scans {
            data.extend_from_slice(scan);
        }
        data.extend_from_slice(&[0xFF, 0xD9]);
        data
    }

    #[test]
    fn baseline_dc_only_block() {
        // Scan data: DC code "0", magnitude 1000 (diff 8), EOB "0".
        let data = gray_8x8(
            0xC0,
            &[&[
                0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00, 0x43,
            ]],
        );

        let image = decode(&data, &Params::default()).unwrap();

        assert_eq!((image.width, image.height, image.components), (8, 8, 1));
        // DC 8 lifts the mid-gray level shift by one.
        assert!(image.data.iter().all(|&v| v == 129));
    }

    #[test]
    fn forced_rgb_replicates_grayscale() {
        let data = gray_8x8(
            0xC0,
            &[&[
                0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00, 0x43,
            ]],
        );
        let params = Params {
            force_rgb: true,
            ..Params::default()
        };

        let image = decode(&data, &params).unwrap();

        assert_eq!(image.components, 3);
        assert_eq!(image.data.len(), 8 * 8 * 3);
        assert!(image.data.iter().all(|&v| v == 129));
    }

    #[test]
    fn progressive_dc_refinement() {
        // First scan codes DC diff 8 at point transform 1 (value 16),
        // the refinement scan adds the low bit.
        let first = [
            0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x00, 0x01, 0x47,
        ];
        let refine = [
            0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x00, 0x10, 0x80,
        ];
        let data = gray_8x8(0xC2, &[&first, &refine]);

        let image = decode(&data, &Params::default()).unwrap();

        // DC 17: 128 + round(17 / 8) at four fraction bits.
        assert!(image.data.iter().all(|&v| v == 130));
    }

    #[test]
    fn single_coefficient_spectral_band() {
        // A progressive AC scan whose band is exactly one coefficient.
        // The AC table needs a run/size symbol: "0" maps to 0x01.
        let mut data = vec![0xFF, 0xD8];
        // A coarse quantization table so the lone unit coefficient is
        // visible in the output.
        data.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x43, 0x00]);
        data.extend_from_slice(&[0xFF; 64]);
        data.extend_from_slice(&[
            0xFF, 0xC2, 0x00, 0x0B, 0x08, 0x00, 0x08, 0x00, 0x08, 0x01, 0x01, 0x11, 0x00,
        ]);
        data.extend_from_slice(&[0xFF, 0xC4, 0x00, 0x14, 0x10, 0x01]);
        data.extend_from_slice(&[0; 15]);
        data.push(0x01);
        // Ss = Se = 1, then the code "0" and a positive sign bit.
        data.extend_from_slice(&[
            0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x01, 0x01, 0x00, 0x40,
        ]);
        data.extend_from_slice(&[0xFF, 0xD9]);

        let image = decode(&data, &Params::default()).unwrap();

        assert_eq!((image.width, image.height), (8, 8));
        assert_eq!(image.data.len(), 64);
        // A single AC coefficient is not a flat block.
        assert!(image.data.iter().any(|&v| v != image.data[0]));
    }

    #[test]
    fn missing_signature_is_rejected() {
        assert_eq!(
            decode(&[0x00, 0x10], &Params::default()),
            Err(DecodeError::Format(FormatError::MissingStartOfImage))
        );
    }

    #[test]
    fn truncated_scan_pads_with_mid_gray() {
        // The scan data ends in an EOI marker after the stream claims
        // two MCU rows; the decoded rows keep their value, the rest is
        // the level-shift gray.
        let mut data = vec![0xFF, 0xD8];
        data.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x43, 0x00]);
        data.extend_from_slice(&[1; 64]);
        data.extend_from_slice(&[
            0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x00, 0x10, 0x00, 0x08, 0x01, 0x01, 0x11, 0x00,
        ]);
        data.extend_from_slice(&[0xFF, 0xC4, 0x00, 0x14, 0x00, 0x01]);
        data.extend_from_slice(&[0; 15]);
        data.push(0x04);
        data.extend_from_slice(&[0xFF, 0xC4, 0x00, 0x14, 0x10, 0x01]);
        data.extend_from_slice(&[0; 15]);
        data.push(0x00);
        // One coded block (DC 8), then EOI in place of the second.
        data.extend_from_slice(&[
            0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00, 0x43, 0xFF, 0xD9,
        ]);

        let image = decode(&data, &Params::default()).unwrap();

        assert_eq!(image.height, 16);
        assert!(image.data[..64].iter().all(|&v| v == 129));
        assert!(image.data[64..].iter().all(|&v| v == 128));
    }

    #[test]
    fn arithmetic_coding_is_rejected() {
        let mut data = vec![0xFF, 0xD8];
        // SOF9: extended sequential, arithmetic coding.
        data.extend_from_slice(&[
            0xFF, 0xC9, 0x00, 0x0B, 0x08, 0x00, 0x08, 0x00, 0x08, 0x01, 0x01, 0x11, 0x00,
        ]);
        assert_eq!(
            decode(&data, &Params::default()),
            Err(DecodeError::Unsupported)
        );
    }
}
