//! The error taxonomy of the decoder.

use core::fmt;

/// The error type for JPEG decoding operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The data ended inside a marker segment or the entropy-coded scan.
    UnexpectedEof,
    /// Structurally invalid data.
    Format(FormatError),
    /// A coding mode the format allows but this decoder does not
    /// implement, such as arithmetic entropy coding or hierarchical
    /// frames.
    Unsupported,
}

/// Structural errors that always abort the decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    /// The data does not start with a start-of-image marker.
    MissingStartOfImage,
    /// A marker appeared where it is not allowed.
    UnexpectedMarker(u8),
    /// A byte sequence matched no Huffman code of the active table.
    InvalidHuffmanCode,
    /// The code length histogram of a Huffman table is inconsistent.
    InvalidHuffmanTable,
    /// A scan selected a Huffman table that was never defined.
    MissingHuffmanTable,
    /// A component selected a quantization table that was never defined.
    MissingQuantizationTable,
    /// A table destination identifier is out of range.
    InvalidTableId,
    /// The frame dimensions are zero or the component count is invalid.
    InvalidDimensions,
    /// A sampling factor is outside the allowed 1 to 4 range.
    InvalidSamplingFactor,
    /// A scan referenced a component the frame does not declare.
    UnknownComponent,
    /// The spectral selection or successive approximation parameters of
    /// a scan are inconsistent.
    InvalidScanHeader,
    /// A marker segment is shorter than its mandatory fields.
    MalformedSegment,
    /// The entropy-coded data ran off the end of a block.
    InvalidBlockIndex,
    /// A scan appeared before any frame header.
    MissingFrame,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of input"),
            Self::Format(e) => write!(f, "{e}"),
            Self::Unsupported => write!(f, "unsupported coding mode"),
        }
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingStartOfImage => write!(f, "missing start-of-image marker"),
            Self::UnexpectedMarker(m) => write!(f, "unexpected marker 0xff{m:02x}"),
            Self::InvalidHuffmanCode => write!(f, "invalid Huffman code"),
            Self::InvalidHuffmanTable => write!(f, "inconsistent Huffman table definition"),
            Self::MissingHuffmanTable => write!(f, "scan selects an undefined Huffman table"),
            Self::MissingQuantizationTable => {
                write!(f, "component selects an undefined quantization table")
            }
            Self::InvalidTableId => write!(f, "table destination identifier out of range"),
            Self::InvalidDimensions => write!(f, "invalid frame dimensions"),
            Self::InvalidSamplingFactor => write!(f, "invalid sampling factor"),
            Self::UnknownComponent => write!(f, "scan references an undeclared component"),
            Self::InvalidScanHeader => write!(f, "invalid scan header"),
            Self::MalformedSegment => write!(f, "marker segment too short"),
            Self::InvalidBlockIndex => write!(f, "coefficient index outside the block"),
            Self::MissingFrame => write!(f, "scan before any frame header"),
        }
    }
}

impl core::error::Error for DecodeError {}

impl From<FormatError> for DecodeError {
    fn from(value: FormatError) -> Self {
        Self::Format(value)
    }
}

/// Result type for JPEG decoding operations.
pub type Result<T> = core::result::Result<T, DecodeError>;
