/*!
A memory-safe, pure-Rust CCITT Group 3/4 fax decoder.

`graven-ccitt` decodes the one- and two-dimensional run-length encodings
from ITU-T T.4 (Group 3) and T.6 (Group 4), as embedded in PDF
`CCITTFaxDecode` streams. The encoding variant is selected by the PDF
`K` parameter: `K < 0` is pure two-dimensional Group 4, `K = 0` is pure
one-dimensional Group 3, and `K > 0` is mixed Group 3 where a per-row
tag bit selects the coding of each row.

The decoder produces packed 1-bit-per-pixel rows. Invalid codes inside a
row are recovered from by filling the remainder of the row and logging a
warning; only unrecoverable truncation ends decoding early, in which
case the returned image is zero-padded to the declared height.

# Safety
This crate forbids unsafe code via a crate-level attribute.
*/

#![forbid(unsafe_code)]

use core::fmt;

mod decode;
mod tables;

pub use decode::Decoder;

/// Decode parameters, mirroring the PDF `CCITTFaxDecode` dictionary.
#[derive(Debug, Clone, Copy)]
pub struct Params {
    /// Encoding selector: negative is Group 4, zero is Group 3 1D,
    /// positive is Group 3 with mixed 1D/2D rows.
    pub k: i32,
    /// The width of the image in pixels.
    pub columns: u32,
    /// The height of the image in pixels, or 0 if unknown.
    pub rows: u32,
    /// If true, a 1 bit means black. The PDF default is false (0 is black).
    pub black_is_1: bool,
    /// Each coded row starts on a byte boundary.
    pub encoded_byte_align: bool,
    /// Rows are preceded by end-of-line codes.
    pub end_of_line: bool,
    /// The stream is terminated by an explicit end-of-block pattern.
    pub end_of_block: bool,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            k: 0,
            columns: 1728,
            rows: 0,
            black_is_1: false,
            encoded_byte_align: false,
            end_of_line: false,
            end_of_block: true,
        }
    }
}

/// A decoded 1-bit-per-pixel image, rows packed MSB-first.
#[derive(Debug, Clone)]
pub struct Image {
    /// The width of the image in pixels.
    pub width: u32,
    /// The height of the image in pixels.
    pub height: u32,
    /// Packed rows, `(width + 7) / 8` bytes each.
    pub data: Vec<u8>,
}

/// The error type for CCITT decoding operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The coded data ended before the declared raster was complete.
    UnexpectedEof,
    /// A bit sequence matched no code of the expected kind.
    InvalidCode,
    /// The column or row count is zero or implausibly large.
    InvalidDimensions,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of input"),
            Self::InvalidCode => write!(f, "invalid run-length or mode code"),
            Self::InvalidDimensions => write!(f, "invalid image dimensions"),
        }
    }
}

impl core::error::Error for DecodeError {}

/// Result type for CCITT decoding operations.
pub type Result<T> = core::result::Result<T, DecodeError>;

/// Decode a complete image from the given data.
///
/// When `params.rows` is non-zero, exactly that many rows are returned;
/// rows the data does not cover are filled with white. When it is zero,
/// rows are decoded until the end-of-block pattern or the end of the
/// data.
pub fn decode(data: &[u8], params: &Params) -> Result<Image> {
    if params.columns == 0 {
        return Err(DecodeError::InvalidDimensions);
    }

    let row_bytes = (params.columns as usize).div_ceil(8);
    let mut decoder = Decoder::new(data, params);
    let mut out = Vec::new();
    let mut rows_decoded = 0_u32;

    while let Some(row) = decoder.next_row()? {
        debug_assert_eq!(row.len(), row_bytes);
        out.extend_from_slice(row);
        rows_decoded += 1;

        if params.rows != 0 && rows_decoded == params.rows {
            break;
        }
    }

    if params.rows != 0 && rows_decoded < params.rows {
        log::warn!(
            "CCITT data ended after {rows_decoded} of {} rows, padding with white",
            params.rows
        );

        // White is 0 unless `black_is_1` inverted the polarity.
        let fill = if params.black_is_1 { 0x00 } else { 0xFF };
        out.resize(params.rows as usize * row_bytes, fill);
        rows_decoded = params.rows;
    }

    Ok(Image {
        width: params.columns,
        height: rows_decoded,
        data: out,
    })
}
