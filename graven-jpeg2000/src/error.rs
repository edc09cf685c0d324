//! Error types for JPEG 2000 decoding.

use core::fmt;

/// The top-level error type for JPEG 2000 decoding operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The data ended before a structure was complete.
    Parse(ParseError),
    /// The JP2 container is malformed.
    Format(FormatError),
    /// The codestream carries an invalid marker or marker segment.
    Marker(MarkerError),
    /// A packet header or code-block is inconsistent.
    Coding(CodingError),
    /// The stream uses a feature this decoder does not implement.
    Unsupported(&'static str),
}

/// The data ended prematurely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The data ended before a structure was complete.
    UnexpectedEof,
}

/// The JP2 container is malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    /// The signature box is missing or holds the wrong bytes.
    InvalidSignature,
    /// A box length field contradicts the remaining data.
    InvalidBox,
    /// The container holds no contiguous codestream box.
    MissingCodestream,
}

/// The codestream carries an invalid marker or marker segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerError {
    /// A byte pair where a marker belongs is no marker.
    Invalid(u8),
    /// A required marker is missing.
    Missing(&'static str),
    /// A marker segment could not be parsed.
    Malformed(&'static str),
    /// The progression order field holds a reserved value.
    InvalidProgressionOrder,
    /// The quantization style field holds a reserved value.
    InvalidQuantizationStyle,
    /// The wavelet transformation field holds a reserved value.
    InvalidTransformation,
    /// Image or tile dimensions are zero or inconsistent.
    InvalidDimensions,
    /// The image area exceeds the supported size.
    ImageTooLarge,
    /// A tile-part names a tile outside the tile grid.
    InvalidTileIndex,
    /// A marker names a component outside the component count.
    InvalidComponentIndex,
}

/// A packet header or code-block is inconsistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodingError {
    /// A packet header bit sequence is invalid.
    InvalidPacketHeader,
    /// A code-block declares more bit-planes than fit a coefficient.
    TooManyBitplanes,
    /// The segmentation symbol after a cleanup pass is wrong.
    InvalidSegmentationSymbol,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => e.fmt(f),
            Self::Format(e) => e.fmt(f),
            Self::Marker(e) => e.fmt(f),
            Self::Coding(e) => e.fmt(f),
            Self::Unsupported(feature) => write!(f, "unsupported feature: {feature}"),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of input"),
        }
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSignature => write!(f, "invalid JP2 signature"),
            Self::InvalidBox => write!(f, "invalid JP2 box"),
            Self::MissingCodestream => write!(f, "missing contiguous codestream box"),
        }
    }
}

impl fmt::Display for MarkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(code) => write!(f, "invalid marker 0xFF{code:02X}"),
            Self::Missing(marker) => write!(f, "missing {marker} marker"),
            Self::Malformed(marker) => write!(f, "malformed {marker} marker segment"),
            Self::InvalidProgressionOrder => write!(f, "reserved progression order"),
            Self::InvalidQuantizationStyle => write!(f, "reserved quantization style"),
            Self::InvalidTransformation => write!(f, "reserved wavelet transformation"),
            Self::InvalidDimensions => write!(f, "invalid image or tile dimensions"),
            Self::ImageTooLarge => write!(f, "image area too large"),
            Self::InvalidTileIndex => write!(f, "tile index outside the tile grid"),
            Self::InvalidComponentIndex => write!(f, "component index out of range"),
        }
    }
}

impl fmt::Display for CodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPacketHeader => write!(f, "invalid packet header"),
            Self::TooManyBitplanes => write!(f, "too many bit-planes in code-block"),
            Self::InvalidSegmentationSymbol => write!(f, "invalid segmentation symbol"),
        }
    }
}

impl core::error::Error for DecodeError {}

impl From<ParseError> for DecodeError {
    fn from(value: ParseError) -> Self {
        Self::Parse(value)
    }
}

impl From<FormatError> for DecodeError {
    fn from(value: FormatError) -> Self {
        Self::Format(value)
    }
}

impl From<MarkerError> for DecodeError {
    fn from(value: MarkerError) -> Self {
        Self::Marker(value)
    }
}

impl From<CodingError> for DecodeError {
    fn from(value: CodingError) -> Self {
        Self::Coding(value)
    }
}

/// Result type for JPEG 2000 decoding operations.
pub type Result<T> = core::result::Result<T, DecodeError>;

/// Return early with the given error, converted to [`DecodeError`].
macro_rules! bail {
    ($err:expr) => {
        return Err($crate::error::DecodeError::from($err))
    };
}

/// Map an exhausted reader to [`ParseError::UnexpectedEof`].
macro_rules! read {
    ($expr:expr) => {
        $expr.ok_or($crate::error::DecodeError::Parse(
            $crate::error::ParseError::UnexpectedEof,
        ))
    };
}

pub(crate) use {bail, read};
