//! The JP2 box container (ISO/IEC 15444-1 Annex I).
//!
//! A JP2 file is a sequence of boxes, each a length, a four-byte type,
//! and a payload. The decoder only needs to locate the contiguous
//! codestream box; the header boxes describing color and capture
//! metadata are the caller's concern.

use graven_common::byte::Reader;

use crate::error::{FormatError, Result, bail, read};

pub(crate) const SIGNATURE: u32 = u32::from_be_bytes(*b"jP\x20\x20");
pub(crate) const FILE_TYPE: u32 = u32::from_be_bytes(*b"ftyp");
pub(crate) const CODESTREAM: u32 = u32::from_be_bytes(*b"jp2c");

/// The payload a JP2 signature box must carry.
const SIGNATURE_PAYLOAD: [u8; 4] = [0x0D, 0x0A, 0x87, 0x0A];

pub(crate) struct JpBox<'a> {
    pub(crate) box_type: u32,
    pub(crate) data: &'a [u8],
}

/// Read one box at the reader's position.
pub(crate) fn read_box<'a>(reader: &mut Reader<'a>) -> Option<JpBox<'a>> {
    let lbox = reader.read_u32()?;
    let box_type = reader.read_u32()?;

    let data = match lbox {
        // The box extends to the end of the data.
        0 => {
            let tail = reader.tail();
            reader.skip(tail.len())?;
            tail
        }
        // An extended 64-bit length follows the type.
        1 => {
            let xlbox = reader.read_u64()?;
            let payload = usize::try_from(xlbox.checked_sub(16)?).ok()?;
            reader.read_bytes(payload)?
        }
        _ => {
            let payload = usize::try_from(lbox.checked_sub(8)?).ok()?;
            reader.read_bytes(payload)?
        }
    };

    Some(JpBox { box_type, data })
}

/// Extract the contiguous codestream from a JP2 container.
pub(crate) fn codestream(data: &[u8]) -> Result<&[u8]> {
    let mut reader = Reader::new(data);

    let signature = read!(read_box(&mut reader))?;
    if signature.box_type != SIGNATURE || signature.data != SIGNATURE_PAYLOAD {
        bail!(FormatError::InvalidSignature);
    }

    let file_type = read!(read_box(&mut reader))?;
    if file_type.box_type != FILE_TYPE {
        bail!(FormatError::InvalidSignature);
    }

    while !reader.at_end() {
        let Some(current) = read_box(&mut reader) else {
            bail!(FormatError::InvalidBox);
        };

        if current.box_type == CODESTREAM {
            return Ok(current.data);
        }
    }

    bail!(FormatError::MissingCodestream)
}

#[cfg(test)]
mod tests {
    use super::{CODESTREAM, codestream};
    use crate::error::{DecodeError, FormatError};

    fn boxed(box_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut data = (payload.len() as u32 + 8).to_be_bytes().to_vec();
        data.extend_from_slice(box_type);
        data.extend_from_slice(payload);
        data
    }

    fn container(extra: &[Vec<u8>]) -> Vec<u8> {
        let mut data = boxed(b"jP\x20\x20", &[0x0D, 0x0A, 0x87, 0x0A]);
        data.extend_from_slice(&boxed(b"ftyp", b"jp2\x20\x00\x00\x00\x00jp2\x20"));
        for b in extra {
            data.extend_from_slice(b);
        }
        data
    }

    #[test]
    fn finds_the_codestream_box() {
        let data = container(&[
            boxed(b"jp2h", &[0; 4]),
            boxed(b"jp2c", &[0xFF, 0x4F, 0xFF, 0xD9]),
        ]);

        let stream = codestream(&data).unwrap();
        assert_eq!(stream, &[0xFF, 0x4F, 0xFF, 0xD9]);
    }

    #[test]
    fn zero_length_box_extends_to_the_end() {
        let mut data = container(&[]);
        data.extend_from_slice(&0_u32.to_be_bytes());
        data.extend_from_slice(b"jp2c");
        data.extend_from_slice(&[0xFF, 0x4F, 0x01, 0x02]);

        let stream = codestream(&data).unwrap();
        assert_eq!(stream, &[0xFF, 0x4F, 0x01, 0x02]);

        assert_eq!(u32::from_be_bytes(*b"jp2c"), CODESTREAM);
    }

    #[test]
    fn bad_signature_payload_is_rejected() {
        let mut data = boxed(b"jP\x20\x20", &[0, 0, 0, 0]);
        data.extend_from_slice(&boxed(b"ftyp", b"jp2\x20"));

        assert_eq!(
            codestream(&data),
            Err(DecodeError::Format(FormatError::InvalidSignature))
        );
    }

    #[test]
    fn missing_codestream_is_reported() {
        let data = container(&[boxed(b"jp2h", &[0; 2])]);
        assert_eq!(
            codestream(&data),
            Err(DecodeError::Format(FormatError::MissingCodestream))
        );
    }
}
