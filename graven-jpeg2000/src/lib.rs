/*!
A memory-safe, pure-Rust JPEG 2000 decoder.

`graven-jpeg2000` decodes the codestreams embedded in PDF `JPXDecode`
streams: raw ITU-T T.800 codestreams as well as JP2 containers, from
which the contiguous codestream box is extracted. All five progression
orders, multiple tiles and tile-parts, precinct partitions, quality
layers, component subsampling, both wavelet filters and both component
transforms are handled. Progression order changes, packed packet
headers, regions of interest, and signed components are rejected as
unsupported.

The output is interleaved 8-bit samples on the reference grid, one byte
per component per pixel; higher sample precisions are scaled down and
subsampled components are replicated.

Codestreams inside PDF files are routinely truncated. By default a
broken packet or tile-part keeps everything decoded up to that point
and fills the rest of the image from the quantization zero level;
[`Params::strict`] turns those recoveries into errors.

# Safety
This crate forbids unsafe code via a crate-level attribute.
*/

#![forbid(unsafe_code)]

mod bitplane;
mod boxes;
mod codestream;
mod decoder;
mod dwt;
mod error;
mod mct;
mod packet;
mod progression;
mod tagtree;
mod tile;

pub use error::{CodingError, DecodeError, FormatError, MarkerError, ParseError, Result};

/// Decode parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Params {
    /// Fail on corrupt packet data instead of keeping the partial
    /// image. Malformed main headers are always an error.
    pub strict: bool,
}

/// A decoded image: `components` interleaved 8-bit samples per pixel.
#[derive(Debug, Clone)]
pub struct Image {
    /// The width of the image in pixels.
    pub width: u32,
    /// The height of the image in pixels.
    pub height: u32,
    /// The number of components per pixel.
    pub components: u8,
    /// Interleaved samples, `width * height * components` bytes.
    pub data: Vec<u8>,
}

/// Decode a JP2 file or a raw codestream.
pub fn decode(data: &[u8], params: &Params) -> Result<Image> {
    // A raw codestream opens with the SOC marker; anything else must be
    // a box container.
    if data.starts_with(&[0xFF, 0x4F]) {
        decoder::decode_codestream(data, params)
    } else {
        decoder::decode_codestream(boxes::codestream(data)?, params)
    }
}

#[cfg(test)]
mod tests {
    use super::{DecodeError, Params, decode};

    /// A 1x1 grayscale codestream with no decomposition levels and a
    /// single empty packet, so every coefficient is zero.
    fn tiny_codestream() -> Vec<u8> {
        let mut data = vec![0xFF, 0x4F];

        data.extend_from_slice(&[0xFF, 0x51]);
        data.extend_from_slice(&41_u16.to_be_bytes());
        data.extend_from_slice(&0_u16.to_be_bytes());
        for value in [1_u32, 1, 0, 0, 1, 1, 0, 0] {
            data.extend_from_slice(&value.to_be_bytes());
        }
        data.extend_from_slice(&1_u16.to_be_bytes());
        data.extend_from_slice(&[7, 1, 1]);

        // LRCP, one layer, no MCT, zero levels, 64x64 blocks, 5-3.
        data.extend_from_slice(&[0xFF, 0x52]);
        data.extend_from_slice(&12_u16.to_be_bytes());
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x04, 0x04, 0x00, 0x01]);

        // No quantization, two guard bits, exponent 8.
        data.extend_from_slice(&[0xFF, 0x5C]);
        data.extend_from_slice(&4_u16.to_be_bytes());
        data.extend_from_slice(&[0x40, 8 << 3]);

        // One tile-part of 15 bytes: SOT, SOD, and the packet byte.
        data.extend_from_slice(&[0xFF, 0x90]);
        data.extend_from_slice(&10_u16.to_be_bytes());
        data.extend_from_slice(&0_u16.to_be_bytes());
        data.extend_from_slice(&15_u32.to_be_bytes());
        data.extend_from_slice(&[0, 1]);
        data.extend_from_slice(&[0xFF, 0x93]);

        // The zero-length bit of an empty packet.
        data.push(0x00);

        data.extend_from_slice(&[0xFF, 0xD9]);
        data
    }

    fn boxed(box_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut data = (payload.len() as u32 + 8).to_be_bytes().to_vec();
        data.extend_from_slice(box_type);
        data.extend_from_slice(payload);
        data
    }

    #[test]
    fn empty_packet_yields_the_level_shift() {
        let image = decode(&tiny_codestream(), &Params::default()).unwrap();

        assert_eq!((image.width, image.height, image.components), (1, 1, 1));
        // A zero coefficient comes out as mid-gray after the shift.
        assert_eq!(image.data, vec![128]);
    }

    #[test]
    fn jp2_container_is_unwrapped() {
        let mut data = boxed(b"jP\x20\x20", &[0x0D, 0x0A, 0x87, 0x0A]);
        data.extend_from_slice(&boxed(b"ftyp", b"jp2\x20\x00\x00\x00\x00jp2\x20"));
        data.extend_from_slice(&boxed(b"jp2h", &[0; 4]));
        data.extend_from_slice(&boxed(b"jp2c", &tiny_codestream()));

        let image = decode(&data, &Params::default()).unwrap();
        assert_eq!(image.data, vec![128]);
    }

    #[test]
    fn truncated_tile_data_recovers_by_default() {
        let full = tiny_codestream();
        // Cut away the packet byte and the EOC marker; Psot now points
        // past the end of the data.
        let cut = &full[..full.len() - 3];

        let image = decode(cut, &Params { strict: false }).unwrap();
        assert_eq!(image.data, vec![128]);

        assert!(decode(cut, &Params { strict: true }).is_err());
    }

    #[test]
    fn progression_order_changes_are_rejected() {
        let mut data = tiny_codestream();
        // Splice a POC segment in front of the SOT marker.
        let sot = data.windows(2).position(|w| w == [0xFF, 0x90]).unwrap();
        let mut poc = vec![0xFF, 0x5F];
        poc.extend_from_slice(&9_u16.to_be_bytes());
        poc.extend_from_slice(&[0; 7]);
        data.splice(sot..sot, poc);

        assert!(matches!(
            decode(&data, &Params::default()),
            Err(DecodeError::Unsupported(_))
        ));
    }

    #[test]
    fn garbage_is_not_a_codestream() {
        assert!(decode(&[0x42; 16], &Params::default()).is_err());
    }
}
