//! A decoder for JBIG2-compressed bi-level images (ITU-T T.88), as
//! embedded in PDF streams.
//!
//! The entry point is [`decode`], which takes a complete JBIG2 stream
//! (standalone file or embedded stream without a file header) and
//! returns the composed page as a packed 1-bit-per-pixel [`Image`].
//!
//! The decoder covers generic regions (arithmetic and MMR coded),
//! symbol dictionaries and text regions, pattern dictionaries and
//! halftone regions, generic refinement, and custom Huffman tables.

#![forbid(unsafe_code)]

mod bitmap;
mod error;
mod generic;
mod halftone;
mod huffman;
mod integer;
mod refinement;
mod segment;
mod symbol;
mod text;

use std::collections::HashMap;

use graven_common::bit::BitReader;

use crate::bitmap::{Bitmap, CombinationOperator};
pub use crate::error::{
    DecodeError, FormatError, HuffmanError, ParseError, RegionError, Result, SymbolError,
};
use crate::error::{bail, read};
use crate::huffman::Table;
use crate::segment::{RegionInfo, Segment, SegmentHeader, SegmentKind};

/// A decoded page.
#[derive(Debug, Clone)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    /// Packed rows of `(width + 7) / 8` bytes, most significant bit
    /// first, a set bit meaning black.
    pub data: Vec<u8>,
}

/// Decode a JBIG2 stream into its page image.
pub fn decode(data: &[u8]) -> Result<Image> {
    let segments = segment::split(data)?;
    log::debug!("decoding {} segments", segments.len());

    // An unknown page height is fixed up from the end-of-stripe
    // segments before the page buffer is allocated.
    let mut stripe_rows: Option<u32> = None;
    for segment in &segments {
        if segment.header.kind == SegmentKind::EndOfStripe {
            let bytes = read!(segment.data.get(..4))?;
            let y = u32::from_be_bytes(bytes.try_into().map_err(|_| ParseError::UnexpectedEof)?);
            let rows = y.checked_add(1).ok_or(DecodeError::Overflow)?;
            stripe_rows = Some(stripe_rows.map_or(rows, |m| m.max(rows)));
        }
    }

    let mut decoder = Decoder {
        page: None,
        default_op: CombinationOperator::Or,
        override_allowed: false,
        stripe_rows,
        payloads: HashMap::new(),
    };

    for segment in &segments {
        decoder.process(segment)?;
    }

    decoder.finish()
}

/// The decoded result of a segment later segments may refer to.
enum Payload {
    Symbols(symbol::SymbolDictionary),
    Patterns(halftone::PatternDictionary),
    Table(Table),
    /// An intermediate region, kept for refinement.
    Region(Bitmap),
}

struct Decoder {
    page: Option<Bitmap>,
    default_op: CombinationOperator,
    override_allowed: bool,
    stripe_rows: Option<u32>,
    payloads: HashMap<u32, Payload>,
}

impl Decoder {
    fn process(&mut self, segment: &Segment<'_>) -> Result<()> {
        match segment.header.kind {
            SegmentKind::PageInformation => self.page_information(segment.data)?,
            SegmentKind::SymbolDictionary => {
                let dictionary = {
                    let (symbols, tables) = self.collect_referred(&segment.header);
                    symbol::decode(segment.data, &symbols, &tables)?
                };
                self.payloads
                    .insert(segment.header.number, Payload::Symbols(dictionary));
            }
            SegmentKind::PatternDictionary => {
                let dictionary = halftone::decode_patterns(segment.data)?;
                self.payloads
                    .insert(segment.header.number, Payload::Patterns(dictionary));
            }
            SegmentKind::Tables => {
                let table = Table::from_stream(&mut BitReader::new(segment.data))?;
                self.payloads
                    .insert(segment.header.number, Payload::Table(table));
            }
            SegmentKind::IntermediateTextRegion
            | SegmentKind::ImmediateTextRegion
            | SegmentKind::ImmediateLosslessTextRegion => {
                let (info, bitmap) = {
                    let (symbols, tables) = self.collect_referred(&segment.header);
                    text::decode_region(segment.data, &symbols, &tables)?
                };
                self.place(&segment.header, info, bitmap)?;
            }
            SegmentKind::IntermediateGenericRegion
            | SegmentKind::ImmediateGenericRegion
            | SegmentKind::ImmediateLosslessGenericRegion => {
                let unknown_length = segment.header.data_length.is_none();
                let (info, bitmap) = generic::decode_region(segment.data, unknown_length)?;
                self.place(&segment.header, info, bitmap)?;
            }
            SegmentKind::IntermediateHalftoneRegion
            | SegmentKind::ImmediateHalftoneRegion
            | SegmentKind::ImmediateLosslessHalftoneRegion => {
                let patterns = segment
                    .header
                    .referred
                    .iter()
                    .find_map(|number| match self.payloads.get(number) {
                        Some(Payload::Patterns(d)) => Some(d.patterns.as_slice()),
                        _ => None,
                    })
                    .ok_or(DecodeError::Format(FormatError::MissingDictionary))?;
                let (info, bitmap) = halftone::decode_region(segment.data, patterns)?;
                self.place(&segment.header, info, bitmap)?;
            }
            SegmentKind::IntermediateRefinementRegion
            | SegmentKind::ImmediateRefinementRegion
            | SegmentKind::ImmediateLosslessRefinementRegion => {
                self.refinement_region(segment)?;
            }
            SegmentKind::EndOfPage | SegmentKind::EndOfStripe | SegmentKind::EndOfFile => {}
            SegmentKind::Profiles | SegmentKind::Extension => {
                log::debug!("ignoring segment {:?}", segment.header.kind);
            }
        }

        Ok(())
    }

    fn page_information(&mut self, data: &[u8]) -> Result<()> {
        if self.page.is_some() {
            // One page per stream, as in PDF-embedded use.
            bail!(DecodeError::Unsupported);
        }

        let mut reader = BitReader::new(data);
        let width = read!(reader.read_bits(32))?;
        let height = read!(reader.read_bits(32))?;
        let _x_resolution = read!(reader.read_bits(32))?;
        let _y_resolution = read!(reader.read_bits(32))?;

        let flags = read!(reader.read_bits(8))?;
        let default_pixel = flags & 4 != 0;
        self.default_op = CombinationOperator::from_bits(((flags >> 3) & 3) as u8)?;
        self.override_allowed = flags & 0x40 != 0;

        let _striping = read!(reader.read_bits(16))?;

        let height = if height == u32::MAX {
            self.stripe_rows
                .ok_or(DecodeError::Format(FormatError::UnknownPageHeight))?
        } else {
            height
        };

        self.page = Some(Bitmap::filled(width, height, default_pixel)?);
        Ok(())
    }

    fn refinement_region(&mut self, segment: &Segment<'_>) -> Result<()> {
        let info = RegionInfo::parse(&mut BitReader::new(segment.data))?;

        let referred = segment
            .header
            .referred
            .iter()
            .find_map(|number| match self.payloads.get(number) {
                Some(Payload::Region(bitmap)) => Some(bitmap),
                _ => None,
            });

        if let Some(reference) = referred {
            let (info, bitmap) = refinement::decode_region(segment.data, reference, 0, 0)?;
            return self.place(&segment.header, info, bitmap);
        }

        // Without an intermediate region the reference is the page
        // itself, and the refined window writes straight back.
        let window = self.page_window(&info)?;
        let (info, bitmap) = refinement::decode_region(segment.data, &window, 0, 0)?;

        if segment.header.kind == SegmentKind::IntermediateRefinementRegion {
            self.payloads
                .insert(segment.header.number, Payload::Region(bitmap));
            return Ok(());
        }

        let page = self
            .page
            .as_mut()
            .ok_or(DecodeError::Format(FormatError::MissingPageInfo))?;
        let x = i32::try_from(info.x).map_err(|_| DecodeError::Overflow)?;
        let y = i32::try_from(info.y).map_err(|_| DecodeError::Overflow)?;
        page.draw(&bitmap, x, y, CombinationOperator::Replace);

        Ok(())
    }

    /// Copy the page rectangle a refinement region covers.
    fn page_window(&self, info: &RegionInfo) -> Result<Bitmap> {
        let page = self
            .page
            .as_ref()
            .ok_or(DecodeError::Format(FormatError::MissingPageInfo))?;

        let right = info.x.checked_add(info.width).ok_or(DecodeError::Overflow)?;
        let bottom = info.y.checked_add(info.height).ok_or(DecodeError::Overflow)?;
        if right > page.width() || bottom > page.height() {
            bail!(RegionError::InvalidDimension);
        }

        let mut window = Bitmap::new(info.width, info.height)?;
        for y in 0..info.height {
            for x in 0..info.width {
                window.set(x, y, page.get(info.x + x, info.y + y));
            }
        }

        Ok(window)
    }

    /// The exported symbols and custom tables of every referred
    /// segment, in referral order.
    fn collect_referred(&self, header: &SegmentHeader) -> (Vec<&Bitmap>, Vec<&Table>) {
        let mut symbols = Vec::new();
        let mut tables = Vec::new();

        for number in &header.referred {
            match self.payloads.get(number) {
                Some(Payload::Symbols(dictionary)) => symbols.extend(dictionary.symbols.iter()),
                Some(Payload::Table(table)) => tables.push(table),
                _ => {}
            }
        }

        (symbols, tables)
    }

    /// Keep an intermediate region for later refinement, or compose an
    /// immediate one onto the page.
    fn place(&mut self, header: &SegmentHeader, info: RegionInfo, bitmap: Bitmap) -> Result<()> {
        if matches!(
            header.kind,
            SegmentKind::IntermediateTextRegion
                | SegmentKind::IntermediateGenericRegion
                | SegmentKind::IntermediateHalftoneRegion
                | SegmentKind::IntermediateRefinementRegion
        ) {
            self.payloads.insert(header.number, Payload::Region(bitmap));
            return Ok(());
        }

        let page = self
            .page
            .as_mut()
            .ok_or(DecodeError::Format(FormatError::MissingPageInfo))?;

        // The page may forbid regions from overriding its default
        // combination operator.
        let op = if self.override_allowed {
            info.op
        } else {
            self.default_op
        };
        let x = i32::try_from(info.x).map_err(|_| DecodeError::Overflow)?;
        let y = i32::try_from(info.y).map_err(|_| DecodeError::Overflow)?;
        page.draw(&bitmap, x, y, op);

        Ok(())
    }

    fn finish(self) -> Result<Image> {
        let page = self
            .page
            .ok_or(DecodeError::Format(FormatError::MissingPageInfo))?;

        Ok(Image {
            width: page.width(),
            height: page.height(),
            data: page.to_packed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{DecodeError, FormatError, decode};

    fn page_information(number: u32, width: u32, height: u32) -> Vec<u8> {
        let mut out = number.to_be_bytes().to_vec();
        out.extend_from_slice(&[0x30, 0x00, 0x01]);
        out.extend_from_slice(&19_u32.to_be_bytes());
        out.extend_from_slice(&width.to_be_bytes());
        out.extend_from_slice(&height.to_be_bytes());
        out.extend_from_slice(&[0x00; 8]); // resolutions
        out.push(0x00);
        out.extend_from_slice(&[0x00, 0x00]); // striping
        out
    }

    /// An MMR-coded 8x2 checkerboard generic region payload.
    fn checkerboard_region_data() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&8_u32.to_be_bytes());
        data.extend_from_slice(&2_u32.to_be_bytes());
        data.extend_from_slice(&0_u32.to_be_bytes());
        data.extend_from_slice(&0_u32.to_be_bytes());
        data.push(0x00);
        data.push(0x01); // MMR coding
        data.extend_from_slice(&[
            0x26, 0xA8, 0x8E, 0x88, 0xE8, 0x8E, 0xAD, 0x24, 0x92, 0x80,
        ]);
        data
    }

    #[test]
    fn page_with_generic_region() {
        let mut stream = page_information(1, 8, 2);
        let region = checkerboard_region_data();
        stream.extend_from_slice(&2_u32.to_be_bytes());
        stream.extend_from_slice(&[0x26, 0x00, 0x01]);
        stream.extend_from_slice(&(region.len() as u32).to_be_bytes());
        stream.extend_from_slice(&region);

        let image = decode(&stream).unwrap();

        assert_eq!((image.width, image.height), (8, 2));
        assert_eq!(image.data, [0xAA, 0x55]);
    }

    #[test]
    fn unknown_page_height_from_end_of_stripe() {
        let mut stream = page_information(1, 8, u32::MAX);
        let region = checkerboard_region_data();
        stream.extend_from_slice(&2_u32.to_be_bytes());
        stream.extend_from_slice(&[0x26, 0x00, 0x01]);
        stream.extend_from_slice(&(region.len() as u32).to_be_bytes());
        stream.extend_from_slice(&region);
        // End of stripe: the stripe's last row is row 1.
        stream.extend_from_slice(&3_u32.to_be_bytes());
        stream.extend_from_slice(&[0x32, 0x00, 0x01]);
        stream.extend_from_slice(&4_u32.to_be_bytes());
        stream.extend_from_slice(&1_u32.to_be_bytes());

        let image = decode(&stream).unwrap();

        assert_eq!(image.height, 2);
        assert_eq!(image.data, [0xAA, 0x55]);
    }

    #[test]
    fn symbol_dictionary_feeds_text_region() {
        let dictionary = [
            0x00, 0x01, // Huffman coding, standard tables
            0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, // one exported, one new
            0xB7, 0xE0, // height class: one 2x2 symbol
            0x80, 0x40, // its uncompressed bitmap
            0x00, 0x40, // export runs
        ];
        let mut region = Vec::new();
        region.extend_from_slice(&8_u32.to_be_bytes());
        region.extend_from_slice(&2_u32.to_be_bytes());
        region.extend_from_slice(&0_u32.to_be_bytes());
        region.extend_from_slice(&0_u32.to_be_bytes());
        region.push(0x00);
        region.extend_from_slice(&[0x00, 0x11]); // Huffman, top-left corners
        region.extend_from_slice(&[0x00, 0x00]);
        region.extend_from_slice(&2_u32.to_be_bytes());
        region.push(0x01); // symbol ID code table
        region.extend_from_slice(&[0x00; 17]);
        region.extend_from_slice(&[0x00, 0x04, 0x04, 0x20]); // two instances

        let mut stream = page_information(1, 8, 2);
        stream.extend_from_slice(&2_u32.to_be_bytes());
        stream.extend_from_slice(&[0x00, 0x00, 0x01]);
        stream.extend_from_slice(&(dictionary.len() as u32).to_be_bytes());
        stream.extend_from_slice(&dictionary);
        stream.extend_from_slice(&3_u32.to_be_bytes());
        stream.extend_from_slice(&[0x06, 0x20, 0x02, 0x01]); // refers to segment 2
        stream.extend_from_slice(&(region.len() as u32).to_be_bytes());
        stream.extend_from_slice(&region);

        let image = decode(&stream).unwrap();

        assert_eq!(image.data, [0x80, 0x48]);
    }

    #[test]
    fn region_before_page_information_is_rejected() {
        let region = checkerboard_region_data();
        let mut stream = 1_u32.to_be_bytes().to_vec();
        stream.extend_from_slice(&[0x26, 0x00, 0x01]);
        stream.extend_from_slice(&(region.len() as u32).to_be_bytes());
        stream.extend_from_slice(&region);

        assert_eq!(
            decode(&stream).unwrap_err(),
            DecodeError::Format(FormatError::MissingPageInfo)
        );
    }
}
