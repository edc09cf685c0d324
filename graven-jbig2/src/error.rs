//! Error types for JBIG2 decoding.

use core::fmt;

/// The top-level error type for JBIG2 decoding operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The data ended before a structure was complete.
    Parse(ParseError),
    /// A file- or segment-level structure is malformed.
    Format(FormatError),
    /// A Huffman table is malformed or produced an invalid code.
    Huffman(HuffmanError),
    /// A region segment carries invalid parameters.
    Region(RegionError),
    /// A symbol dictionary or text region is inconsistent.
    Symbol(SymbolError),
    /// An arithmetic operation on declared sizes overflowed.
    Overflow,
    /// The stream uses a feature this decoder does not implement.
    Unsupported,
}

/// The data ended prematurely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The data ended before a structure was complete.
    UnexpectedEof,
}

/// A file- or segment-level structure is malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    /// The file header magic bytes are wrong.
    InvalidFileHeader,
    /// A reserved field holds a non-zero value.
    ReservedBits,
    /// The value in a segment type field names no known segment type.
    UnknownSegmentType(u8),
    /// The referred-to segment count field holds a reserved value.
    InvalidReferredCount,
    /// A segment refers to a segment with an equal or higher number.
    ForwardReference,
    /// A region segment appeared before any page information segment.
    MissingPageInfo,
    /// The page height is unknown and no end-of-stripe segment fixes it.
    UnknownPageHeight,
    /// An unknown-length region carries no terminator sequence.
    MissingEndMarker,
    /// A region needs a dictionary no referred segment provides.
    MissingDictionary,
}

/// A Huffman table is malformed or produced an invalid code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HuffmanError {
    /// A bit sequence matched no code in the table.
    InvalidCode,
    /// A table selection field holds a reserved value.
    InvalidSelection,
    /// A segment selects more custom tables than it refers to.
    MissingTable,
    /// An out-of-band value appeared where a number is required.
    UnexpectedOob,
}

/// A region segment carries invalid parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionError {
    /// A width, height, or grid dimension is zero or implausible.
    InvalidDimension,
    /// An adaptive template pixel lies in undecoded territory.
    InvalidAtPixel,
    /// An external combination operator field holds a reserved value.
    InvalidCombinationOperator,
    /// A gray-scale value selected no pattern in the dictionary.
    PatternIndexOutOfRange,
}

/// A symbol dictionary or text region is inconsistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolError {
    /// A text region refers to no symbol dictionary symbols.
    NoSymbols,
    /// A symbol ID is not within the dictionary.
    IdOutOfRange,
    /// More symbols or instances were coded than declared.
    TooManyInstances,
    /// An aggregate instance count is zero or negative.
    InvalidAggregateCount,
    /// The dictionary exported a different number of symbols than
    /// declared.
    ExportCountMismatch,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => e.fmt(f),
            Self::Format(e) => e.fmt(f),
            Self::Huffman(e) => e.fmt(f),
            Self::Region(e) => e.fmt(f),
            Self::Symbol(e) => e.fmt(f),
            Self::Overflow => write!(f, "arithmetic overflow in declared sizes"),
            Self::Unsupported => write!(f, "unsupported feature"),
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
            Self::InvalidFileHeader => write!(f, "invalid file header"),
            Self::ReservedBits => write!(f, "reserved bits set"),
            Self::UnknownSegmentType(t) => write!(f, "unknown segment type {t}"),
            Self::InvalidReferredCount => write!(f, "invalid referred-to segment count"),
            Self::ForwardReference => write!(f, "segment refers to a later segment"),
            Self::MissingPageInfo => write!(f, "region segment before page information"),
            Self::UnknownPageHeight => write!(f, "page height cannot be determined"),
            Self::MissingEndMarker => write!(f, "unknown-length region has no end marker"),
            Self::MissingDictionary => write!(f, "required dictionary segment missing"),
        }
    }
}

impl fmt::Display for HuffmanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCode => write!(f, "invalid Huffman code"),
            Self::InvalidSelection => write!(f, "reserved Huffman table selection"),
            Self::MissingTable => write!(f, "custom Huffman table not referred to"),
            Self::UnexpectedOob => write!(f, "unexpected out-of-band value"),
        }
    }
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDimension => write!(f, "invalid region dimensions"),
            Self::InvalidAtPixel => write!(f, "invalid adaptive template pixel"),
            Self::InvalidCombinationOperator => {
                write!(f, "reserved external combination operator")
            }
            Self::PatternIndexOutOfRange => write!(f, "pattern index out of range"),
        }
    }
}

impl fmt::Display for SymbolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSymbols => write!(f, "text region without symbols"),
            Self::IdOutOfRange => write!(f, "symbol ID out of range"),
            Self::TooManyInstances => write!(f, "more symbols coded than declared"),
            Self::InvalidAggregateCount => write!(f, "invalid aggregate instance count"),
            Self::ExportCountMismatch => write!(f, "exported symbol count mismatch"),
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

impl From<HuffmanError> for DecodeError {
    fn from(value: HuffmanError) -> Self {
        Self::Huffman(value)
    }
}

impl From<RegionError> for DecodeError {
    fn from(value: RegionError) -> Self {
        Self::Region(value)
    }
}

impl From<SymbolError> for DecodeError {
    fn from(value: SymbolError) -> Self {
        Self::Symbol(value)
    }
}

/// Result type for JBIG2 decoding operations.
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
