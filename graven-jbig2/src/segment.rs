//! Segment headers and the file-level structure (T.88 section 7.2 and
//! Annex D).
//!
//! A standalone file starts with an eight-byte ID string and a flags
//! byte; streams embedded in PDF carry no file header and are organized
//! sequentially. In the sequential organization each segment header is
//! immediately followed by its data; in the random-access organization
//! all headers come first and the data parts follow in the same order.

use graven_common::bit::BitReader;
use graven_common::byte::Reader;

use crate::bitmap::CombinationOperator;
use crate::error::{DecodeError, FormatError, RegionError, Result, bail, read};

/// The file ID string (D.4.1).
const FILE_ID: [u8; 8] = [0x97, 0x4A, 0x42, 0x32, 0x0D, 0x0A, 0x1A, 0x0A];

/// Segment types (7.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SegmentKind {
    SymbolDictionary,
    IntermediateTextRegion,
    ImmediateTextRegion,
    ImmediateLosslessTextRegion,
    PatternDictionary,
    IntermediateHalftoneRegion,
    ImmediateHalftoneRegion,
    ImmediateLosslessHalftoneRegion,
    IntermediateGenericRegion,
    ImmediateGenericRegion,
    ImmediateLosslessGenericRegion,
    IntermediateRefinementRegion,
    ImmediateRefinementRegion,
    ImmediateLosslessRefinementRegion,
    PageInformation,
    EndOfPage,
    EndOfStripe,
    EndOfFile,
    Profiles,
    Tables,
    Extension,
}

impl SegmentKind {
    fn from_value(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::SymbolDictionary,
            4 => Self::IntermediateTextRegion,
            6 => Self::ImmediateTextRegion,
            7 => Self::ImmediateLosslessTextRegion,
            16 => Self::PatternDictionary,
            20 => Self::IntermediateHalftoneRegion,
            22 => Self::ImmediateHalftoneRegion,
            23 => Self::ImmediateLosslessHalftoneRegion,
            36 => Self::IntermediateGenericRegion,
            38 => Self::ImmediateGenericRegion,
            39 => Self::ImmediateLosslessGenericRegion,
            40 => Self::IntermediateRefinementRegion,
            42 => Self::ImmediateRefinementRegion,
            43 => Self::ImmediateLosslessRefinementRegion,
            48 => Self::PageInformation,
            49 => Self::EndOfPage,
            50 => Self::EndOfStripe,
            51 => Self::EndOfFile,
            52 => Self::Profiles,
            53 => Self::Tables,
            62 => Self::Extension,
            _ => bail!(FormatError::UnknownSegmentType(value)),
        })
    }

    /// Whether a segment of this kind may declare an unknown data
    /// length (7.2.7).
    fn may_have_unknown_length(self) -> bool {
        matches!(
            self,
            Self::ImmediateGenericRegion | Self::ImmediateLosslessGenericRegion
        )
    }
}

/// A parsed segment header (7.2.2 through 7.2.7).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SegmentHeader {
    pub(crate) number: u32,
    pub(crate) kind: SegmentKind,
    /// Numbers of the segments this one refers to, in header order.
    pub(crate) referred: Vec<u32>,
    pub(crate) page: u32,
    /// Declared data length, or `None` for the unknown-length escape.
    pub(crate) data_length: Option<u32>,
}

/// A segment header together with its resolved data part.
#[derive(Debug, Clone)]
pub(crate) struct Segment<'a> {
    pub(crate) header: SegmentHeader,
    pub(crate) data: &'a [u8],
}

/// Parse a single segment header, advancing the reader past it.
pub(crate) fn parse_header(reader: &mut Reader<'_>) -> Result<SegmentHeader> {
    let number = read!(reader.read_u32())?;
    let flags = read!(reader.read_byte())?;
    let kind = SegmentKind::from_value(flags & 0x3F)?;
    let large_page_field = flags & 0x40 != 0;

    let referred_flags = read!(reader.read_byte())?;
    let referred_count = match referred_flags >> 5 {
        count @ 0..=4 => u32::from(count),
        5 | 6 => bail!(FormatError::InvalidReferredCount),
        _ => {
            // Long form: the count occupies the low 29 bits of a
            // four-byte field, followed by one retain bit per referred
            // segment plus one, rounded up to whole bytes.
            let rest = read!(reader.read_bytes(3))?;
            let count = (u32::from(referred_flags & 0x1F) << 24)
                | (u32::from(rest[0]) << 16)
                | (u32::from(rest[1]) << 8)
                | u32::from(rest[2]);
            let retain_bytes = (count as usize + 1).div_ceil(8);
            read!(reader.skip(retain_bytes))?;

            count
        }
    };

    let referred_size = if number <= 256 {
        1
    } else if number <= 65536 {
        2
    } else {
        4
    };
    let mut referred = Vec::with_capacity(referred_count.min(1024) as usize);
    for _ in 0..referred_count {
        let value = match referred_size {
            1 => u32::from(read!(reader.read_byte())?),
            2 => u32::from(read!(reader.read_u16())?),
            _ => read!(reader.read_u32())?,
        };

        // References always point backwards in the stream.
        if value >= number {
            bail!(FormatError::ForwardReference);
        }

        referred.push(value);
    }

    let page = if large_page_field {
        read!(reader.read_u32())?
    } else {
        u32::from(read!(reader.read_byte())?)
    };

    let data_length = match read!(reader.read_u32())? {
        u32::MAX => {
            if !kind.may_have_unknown_length() {
                bail!(DecodeError::Unsupported);
            }

            None
        }
        length => Some(length),
    };

    Ok(SegmentHeader {
        number,
        kind,
        referred,
        page,
        data_length,
    })
}

/// Determine the data length of an unknown-length generic region by
/// scanning for its terminator sequence (7.2.7).
///
/// The data begins with the 17-byte region info and the flags byte; the
/// flags select MMR or arithmetic coding, which in turn selects the
/// two-byte terminator to search for. The terminator is followed by a
/// four-byte row count, which is included in the returned length.
fn unknown_region_length(data: &[u8]) -> Result<usize> {
    let flags = *read!(data.get(17))?;
    let marker: [u8; 2] = if flags & 1 != 0 {
        [0x00, 0x00]
    } else {
        [0xFF, 0xAC]
    };

    let search = read!(data.get(18..))?;
    for (i, window) in search.windows(2).enumerate() {
        let end = 18 + i + 2 + 4;
        if window == marker && end <= data.len() {
            return Ok(end);
        }
    }

    bail!(FormatError::MissingEndMarker)
}

fn segment_data<'a>(header: &SegmentHeader, tail: &'a [u8]) -> Result<&'a [u8]> {
    match header.data_length {
        Some(length) => read!(tail.get(..length as usize)),
        None => {
            let length = unknown_region_length(tail)?;
            Ok(&tail[..length])
        }
    }
}

/// Split a stream into segments.
///
/// A leading file header, if present, selects the organization;
/// embedded streams without one are treated as sequential. Parsing
/// stops at an end-of-file segment or at the end of the data.
pub(crate) fn split(data: &[u8]) -> Result<Vec<Segment<'_>>> {
    let mut reader = Reader::new(data);
    let mut random_access = false;

    if data.starts_with(&FILE_ID) {
        read!(reader.skip(FILE_ID.len()))?;
        let flags = read!(reader.read_byte())?;
        if flags & 0xFC != 0 {
            bail!(FormatError::ReservedBits);
        }

        random_access = flags & 1 == 0;
        if flags & 2 == 0 {
            // Known number of pages; we derive it from the segments.
            let _ = read!(reader.read_u32())?;
        }
    } else if data.first().is_some_and(|&b| b == 0x97) {
        bail!(FormatError::InvalidFileHeader);
    }

    let mut segments = Vec::new();

    if random_access {
        let mut headers = Vec::new();
        loop {
            let header = parse_header(&mut reader)?;
            let done = header.kind == SegmentKind::EndOfFile;
            headers.push(header);
            if done || reader.at_end() {
                break;
            }
        }

        for header in headers {
            let data = segment_data(&header, reader.tail())?;
            read!(reader.skip(data.len()))?;
            segments.push(Segment { header, data });
        }
    } else {
        while !reader.at_end() {
            let header = parse_header(&mut reader)?;
            let data = segment_data(&header, reader.tail())?;
            read!(reader.skip(data.len()))?;

            let done = header.kind == SegmentKind::EndOfFile;
            segments.push(Segment { header, data });
            if done {
                break;
            }
        }
    }

    Ok(segments)
}

/// The region segment information field shared by all region segments
/// (7.4.1): width, height, location, and the external combination
/// operator.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RegionInfo {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) x: u32,
    pub(crate) y: u32,
    pub(crate) op: CombinationOperator,
}

impl RegionInfo {
    pub(crate) fn parse(reader: &mut BitReader<'_>) -> Result<Self> {
        let width = read!(reader.read_bits(32))?;
        let height = read!(reader.read_bits(32))?;
        let x = read!(reader.read_bits(32))?;
        let y = read!(reader.read_bits(32))?;
        let flags = read!(reader.read_bits(8))?;
        let op = CombinationOperator::from_bits((flags & 7) as u8)?;

        // Height may be the unknown-length escape; it is replaced by
        // the trailing row count before any allocation happens.
        if width == 0 || height == 0 {
            bail!(RegionError::InvalidDimension);
        }

        Ok(Self {
            width,
            height,
            x,
            y,
            op,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{SegmentKind, parse_header, split, unknown_region_length};
    use crate::error::{DecodeError, FormatError};

    #[test]
    fn short_form_header() {
        // Segment 32: an immediate text region on page 4 referring to
        // segments 2, 30, and 5, with 0x426 bytes of data.
        let bytes = [
            0x00, 0x00, 0x00, 0x20, 0x86, 0x6B, 0x02, 0x1E, 0x05, 0x04, 0x00, 0x00, 0x04, 0x26,
        ];

        let mut reader = graven_common::byte::Reader::new(&bytes);
        let header = parse_header(&mut reader).unwrap();

        assert_eq!(header.number, 32);
        assert_eq!(header.kind, SegmentKind::ImmediateTextRegion);
        assert_eq!(header.referred, [2, 30, 5]);
        assert_eq!(header.page, 4);
        assert_eq!(header.data_length, Some(0x426));
        assert!(reader.at_end());
    }

    #[test]
    fn long_form_header() {
        // Segment 257: eight referred segments force the long count
        // form (two retain bytes) and two-byte referred numbers; the
        // page association field is four bytes wide.
        let mut bytes = vec![0x00, 0x00, 0x01, 0x01, 0x40, 0xE0, 0x00, 0x00, 0x08, 0x00, 0x00];
        for n in 1_u16..=8 {
            bytes.extend_from_slice(&n.to_be_bytes());
        }
        bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x02]);
        bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x10]);

        let mut reader = graven_common::byte::Reader::new(&bytes);
        let header = parse_header(&mut reader).unwrap();

        assert_eq!(header.number, 257);
        assert_eq!(header.kind, SegmentKind::SymbolDictionary);
        assert_eq!(header.referred, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(header.page, 2);
        assert_eq!(header.data_length, Some(16));
    }

    #[test]
    fn forward_reference_is_rejected() {
        let bytes = [0x00, 0x00, 0x00, 0x02, 0x00, 0x20, 0x02, 0x01, 0x00, 0x00, 0x00, 0x00];

        let mut reader = graven_common::byte::Reader::new(&bytes);
        assert_eq!(
            parse_header(&mut reader),
            Err(DecodeError::Format(FormatError::ForwardReference))
        );
    }

    #[test]
    fn unknown_length_terminator_scan() {
        // Arithmetic coding: 17 bytes of region info, a flags byte with
        // the MMR bit clear, then payload containing the FF AC
        // terminator and a four-byte row count.
        let mut data = vec![0_u8; 17];
        data.push(0x00);
        data.extend_from_slice(&[0x12, 0xFF, 0xAC, 0x00, 0x00, 0x00, 0x02]);
        assert_eq!(unknown_region_length(&data), Ok(25));

        // MMR coding searches for 00 00 instead.
        let mut data = vec![0_u8; 17];
        data.push(0x01);
        data.extend_from_slice(&[0x34, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(unknown_region_length(&data), Ok(25));

        // No terminator at all.
        let mut data = vec![0_u8; 17];
        data.push(0x00);
        data.extend_from_slice(&[0x12, 0x34]);
        assert_eq!(
            unknown_region_length(&data),
            Err(DecodeError::Format(FormatError::MissingEndMarker))
        );
    }

    #[test]
    fn sequential_file_with_header() {
        let mut data = vec![0x97, 0x4A, 0x42, 0x32, 0x0D, 0x0A, 0x1A, 0x0A];
        // Sequential organization, known page count of 1.
        data.push(0x01);
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
        // Segment 1: end-of-file with no data.
        data.extend_from_slice(&[
            0x00, 0x00, 0x00, 0x01, 0x33, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ]);

        let segments = split(&data).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].header.kind, SegmentKind::EndOfFile);
        assert!(segments[0].data.is_empty());
    }
}
