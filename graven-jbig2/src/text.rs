//! Text region decoding (T.88 sections 6.4 and 7.4.3).
//!
//! A text region draws instances of dictionary symbols at decoded
//! positions. Instances are grouped into strips; within a strip only
//! the S coordinate advances, coded as deltas, and an out-of-band
//! delta closes the strip. Symbol dictionaries reuse the same
//! procedure to aggregate refined symbols, sharing their contexts
//! through [`Coder::Arithmetic`].

use graven_common::bit::BitReader;
use graven_common::mq::{Context, MqDecoder};

use crate::bitmap::{Bitmap, CombinationOperator};
use crate::error::{
    DecodeError, FormatError, HuffmanError, RegionError, Result, SymbolError, bail, read,
};
use crate::generic::AtPixel;
use crate::huffman::{Line, Table, read_value, select_table};
use crate::integer::{IntegerDecoder, SymbolIdDecoder, code_length};
use crate::refinement::{self, RefinementTemplate};
use crate::segment::RegionInfo;

/// Which corner of a symbol the decoded coordinates name (6.4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefCorner {
    BottomLeft,
    TopLeft,
    BottomRight,
    TopRight,
}

impl RefCorner {
    fn from_bits(value: u8) -> Self {
        match value & 3 {
            0 => Self::BottomLeft,
            1 => Self::TopLeft,
            2 => Self::BottomRight,
            _ => Self::TopRight,
        }
    }
}

/// The arithmetic integer decoders of one text decoding procedure.
///
/// A symbol dictionary keeps one instance across all its aggregated
/// symbols, so the statistics carry over between aggregations.
#[derive(Debug)]
pub(crate) struct TextContexts {
    pub(crate) iadt: IntegerDecoder,
    pub(crate) iafs: IntegerDecoder,
    pub(crate) iads: IntegerDecoder,
    pub(crate) iait: IntegerDecoder,
    pub(crate) iari: IntegerDecoder,
    pub(crate) iardw: IntegerDecoder,
    pub(crate) iardh: IntegerDecoder,
    pub(crate) iardx: IntegerDecoder,
    pub(crate) iardy: IntegerDecoder,
    pub(crate) iaid: SymbolIdDecoder,
}

impl TextContexts {
    pub(crate) fn new(code_len: u8) -> Self {
        Self {
            iadt: IntegerDecoder::new(),
            iafs: IntegerDecoder::new(),
            iads: IntegerDecoder::new(),
            iait: IntegerDecoder::new(),
            iari: IntegerDecoder::new(),
            iardw: IntegerDecoder::new(),
            iardh: IntegerDecoder::new(),
            iardx: IntegerDecoder::new(),
            iardy: IntegerDecoder::new(),
            iaid: SymbolIdDecoder::new(code_len),
        }
    }
}

/// The code tables of a Huffman-coded text region.
pub(crate) struct HuffmanTables<'t> {
    first_s: &'t Table,
    delta_s: &'t Table,
    delta_t: &'t Table,
    ids: Table,
}

/// The entropy coder a text decoding procedure reads from.
pub(crate) enum Coder<'a, 'b> {
    Arithmetic {
        mq: &'b mut MqDecoder<'a>,
        contexts: &'b mut TextContexts,
        refinement: &'b mut [Context],
    },
    Huffman {
        reader: &'b mut BitReader<'a>,
        tables: HuffmanTables<'b>,
    },
}

impl Coder<'_, '_> {
    fn delta_t(&mut self) -> Result<i32> {
        match self {
            Self::Arithmetic { mq, contexts, .. } => read_value(contexts.iadt.decode(mq)),
            Self::Huffman { reader, tables } => tables.delta_t.decode_value(reader),
        }
    }

    fn first_s(&mut self) -> Result<i32> {
        match self {
            Self::Arithmetic { mq, contexts, .. } => read_value(contexts.iafs.decode(mq)),
            Self::Huffman { reader, tables } => tables.first_s.decode_value(reader),
        }
    }

    /// `None` closes the current strip.
    fn delta_s(&mut self) -> Result<Option<i32>> {
        match self {
            Self::Arithmetic { mq, contexts, .. } => Ok(contexts.iads.decode(mq)),
            Self::Huffman { reader, tables } => tables.delta_s.decode(reader),
        }
    }

    fn cur_t(&mut self, log_strips: u8) -> Result<i32> {
        match self {
            Self::Arithmetic { mq, contexts, .. } => read_value(contexts.iait.decode(mq)),
            Self::Huffman { reader, .. } => Ok(read!(reader.read_bits(log_strips))? as i32),
        }
    }

    fn id(&mut self) -> Result<u32> {
        match self {
            Self::Arithmetic { mq, contexts, .. } => Ok(contexts.iaid.decode(mq)),
            Self::Huffman { reader, tables } => {
                let id = tables.ids.decode_value(reader)?;
                u32::try_from(id).map_err(|_| SymbolError::IdOutOfRange.into())
            }
        }
    }

    fn refine_flag(&mut self) -> Result<bool> {
        match self {
            Self::Arithmetic { mq, contexts, .. } => {
                Ok(read_value(contexts.iari.decode(mq))? != 0)
            }
            Self::Huffman { reader, .. } => Ok(read!(reader.read_bit())? != 0),
        }
    }
}

/// The parameters of one text decoding procedure, either from a text
/// region segment header or fixed by the symbol dictionary aggregation
/// of 6.5.8.2.
pub(crate) struct Params<'p> {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) default_pixel: bool,
    pub(crate) num_instances: u32,
    pub(crate) log_strips: u8,
    pub(crate) ref_corner: RefCorner,
    pub(crate) transposed: bool,
    pub(crate) comb_op: CombinationOperator,
    pub(crate) ds_offset: i32,
    pub(crate) refine: bool,
    pub(crate) r_template: RefinementTemplate,
    pub(crate) r_at: &'p [AtPixel],
}

fn add(a: i32, b: i32) -> Result<i32> {
    a.checked_add(b).ok_or(DecodeError::Overflow)
}

/// Decode and place `num_instances` symbol instances (6.4.5).
pub(crate) fn decode_instances(
    coder: &mut Coder<'_, '_>,
    symbols: &[&Bitmap],
    params: &Params<'_>,
) -> Result<Bitmap> {
    if symbols.is_empty() {
        bail!(SymbolError::NoSymbols);
    }

    let mut bitmap = Bitmap::filled(params.width, params.height, params.default_pixel)?;
    let strips = 1_i32 << params.log_strips;

    let mut strip_t = coder
        .delta_t()?
        .checked_mul(strips)
        .and_then(i32::checked_neg)
        .ok_or(DecodeError::Overflow)?;
    let mut first_s = 0_i32;
    let mut count = 0_u32;

    while count < params.num_instances {
        strip_t = add(strip_t, coder.delta_t()?.checked_mul(strips).ok_or(DecodeError::Overflow)?)?;
        first_s = add(first_s, coder.first_s()?)?;

        let mut cur_s = first_s;
        let mut first = true;

        loop {
            if !first {
                let Some(ds) = coder.delta_s()? else {
                    break;
                };
                cur_s = add(add(cur_s, ds)?, params.ds_offset)?;
            }
            first = false;

            let cur_t = if strips == 1 { 0 } else { coder.cur_t(params.log_strips)? };
            let t = add(strip_t, cur_t)?;

            let id = coder.id()?;
            let base = *symbols
                .get(id as usize)
                .ok_or(DecodeError::Symbol(SymbolError::IdOutOfRange))?;

            let refined = if params.refine && coder.refine_flag()? {
                Some(refine_instance(coder, base, params)?)
            } else {
                None
            };
            let symbol = refined.as_ref().unwrap_or(base);

            let w = symbol.width() as i32;
            let h = symbol.height() as i32;

            // The decoded S names the leading edge of the instance; for
            // the right (or, transposed, bottom) corners it must be
            // moved to the trailing edge before placing.
            let leading = if params.transposed {
                matches!(params.ref_corner, RefCorner::BottomLeft | RefCorner::BottomRight)
            } else {
                matches!(params.ref_corner, RefCorner::BottomRight | RefCorner::TopRight)
            };
            if leading {
                cur_s = add(cur_s, if params.transposed { h - 1 } else { w - 1 })?;
            }

            let (x, y) = if params.transposed {
                match params.ref_corner {
                    RefCorner::TopLeft => (t, cur_s),
                    RefCorner::TopRight => (t - w + 1, cur_s),
                    RefCorner::BottomLeft => (t, cur_s - h + 1),
                    RefCorner::BottomRight => (t - w + 1, cur_s - h + 1),
                }
            } else {
                match params.ref_corner {
                    RefCorner::TopLeft => (cur_s, t),
                    RefCorner::TopRight => (cur_s - w + 1, t),
                    RefCorner::BottomLeft => (cur_s, t - h + 1),
                    RefCorner::BottomRight => (cur_s - w + 1, t - h + 1),
                }
            };

            bitmap.draw(symbol, x, y, params.comb_op);

            if !leading {
                cur_s = add(cur_s, if params.transposed { h - 1 } else { w - 1 })?;
            }

            count += 1;
            if count > params.num_instances {
                bail!(SymbolError::TooManyInstances);
            }
        }
    }

    Ok(bitmap)
}

/// Decode the refinement of one instance against its symbol (6.4.11).
fn refine_instance(
    coder: &mut Coder<'_, '_>,
    base: &Bitmap,
    params: &Params<'_>,
) -> Result<Bitmap> {
    let Coder::Arithmetic { mq, contexts, refinement } = coder else {
        // Huffman-coded refinement carries per-instance data lengths
        // this decoder does not handle.
        bail!(DecodeError::Unsupported);
    };

    let rdw = read_value(contexts.iardw.decode(mq))?;
    let rdh = read_value(contexts.iardh.decode(mq))?;
    let rdx = read_value(contexts.iardx.decode(mq))?;
    let rdy = read_value(contexts.iardy.decode(mq))?;

    let width = base
        .width()
        .checked_add_signed(rdw)
        .filter(|&w| w > 0)
        .ok_or(DecodeError::Region(RegionError::InvalidDimension))?;
    let height = base
        .height()
        .checked_add_signed(rdh)
        .filter(|&h| h > 0)
        .ok_or(DecodeError::Region(RegionError::InvalidDimension))?;

    let dx = add(rdw.div_euclid(2), rdx)?;
    let dy = add(rdh.div_euclid(2), rdy)?;

    let mut refined = Bitmap::new(width, height)?;
    refinement::decode_bitmap(
        &mut refined,
        mq,
        refinement,
        base,
        dx,
        dy,
        params.r_template,
        params.r_at,
    )?;

    Ok(refined)
}

/// Read the symbol ID code table (7.4.3.1.7): 35 runcode prefix
/// lengths, then the symbol code lengths coded with them.
fn parse_symbol_id_table(reader: &mut BitReader<'_>, num_symbols: usize) -> Result<Table> {
    let mut runcode_lines = Vec::with_capacity(35);
    for i in 0..35 {
        let prefix_len = read!(reader.read_bits(4))? as u8;
        runcode_lines.push(Line::new(i, prefix_len, 0));
    }
    let runcodes = Table::build(&runcode_lines);

    let mut lengths: Vec<u8> = Vec::with_capacity(num_symbols);
    let mut previous = 0_u8;
    while lengths.len() < num_symbols {
        let (value, run) = match runcodes.decode_value(reader)? {
            code @ 0..=31 => {
                previous = code as u8;
                (previous, 1)
            }
            32 => (previous, read!(reader.read_bits(2))? as usize + 3),
            33 => (0, read!(reader.read_bits(3))? as usize + 3),
            _ => (0, read!(reader.read_bits(7))? as usize + 11),
        };

        if lengths.len() + run > num_symbols {
            bail!(HuffmanError::InvalidCode);
        }
        lengths.extend(core::iter::repeat_n(value, run));
    }

    reader.align();

    let lines: Vec<Line> = lengths
        .iter()
        .enumerate()
        .map(|(i, &len)| Line::new(i as i32, len, 0))
        .collect();

    Ok(Table::build(&lines))
}

/// Decode a text region segment (7.4.3). `symbols` holds the exported
/// symbols of every referred dictionary in referral order, `custom`
/// the referred code tables.
pub(crate) fn decode_region(
    data: &[u8],
    symbols: &[&Bitmap],
    custom: &[&Table],
) -> Result<(RegionInfo, Bitmap)> {
    let mut reader = BitReader::new(data);
    let info = RegionInfo::parse(&mut reader)?;

    let flags = read!(reader.read_bits(16))?;
    let huffman = flags & 1 != 0;
    let refine = flags & 2 != 0;
    if huffman && refine {
        bail!(DecodeError::Unsupported);
    }

    let log_strips = ((flags >> 2) & 3) as u8;
    let ref_corner = RefCorner::from_bits(((flags >> 4) & 3) as u8);
    let transposed = flags & 0x40 != 0;
    let comb_op = CombinationOperator::from_bits(((flags >> 7) & 3) as u8)?;
    let default_pixel = flags & 0x200 != 0;
    let ds_raw = ((flags >> 10) & 0x1F) as u8;
    let ds_offset = i32::from(if ds_raw & 0x10 != 0 {
        (ds_raw | 0xE0) as i8
    } else {
        ds_raw as i8
    });
    let r_template = RefinementTemplate::from_bits(((flags >> 15) & 1) as u8);

    let huffman_flags = if huffman {
        let value = read!(reader.read_bits(16))?;
        if value & 0x8000 != 0 {
            bail!(FormatError::ReservedBits);
        }

        Some(value)
    } else {
        None
    };

    let r_at = if refine && r_template == RefinementTemplate::T0 {
        refinement::parse_at_pixels(&mut reader)?
    } else {
        Vec::new()
    };

    let num_instances = read!(reader.read_bits(32))?;

    let params = Params {
        width: info.width,
        height: info.height,
        default_pixel,
        num_instances,
        log_strips,
        ref_corner,
        transposed,
        comb_op,
        ds_offset,
        refine,
        r_template,
        r_at: &r_at,
    };

    let bitmap = if let Some(hf) = huffman_flags {
        // The refinement table selections in bits 6..15 only matter
        // together with the refinement flag, which the check above
        // already excluded for Huffman coding.
        let mut next_custom = 0;
        let first_s = select_table(hf & 3, &[6, 7], custom, &mut next_custom)?;
        let delta_s = select_table((hf >> 2) & 3, &[8, 9, 10], custom, &mut next_custom)?;
        let delta_t = select_table((hf >> 4) & 3, &[11, 12, 13], custom, &mut next_custom)?;
        let ids = parse_symbol_id_table(&mut reader, symbols.len())?;

        let mut coder = Coder::Huffman {
            reader: &mut reader,
            tables: HuffmanTables { first_s, delta_s, delta_t, ids },
        };
        decode_instances(&mut coder, symbols, &params)?
    } else {
        reader.align();
        let mut mq = MqDecoder::new(read!(reader.tail())?);
        let mut contexts = TextContexts::new(code_length(symbols.len() as u32));
        let mut refinement_contexts = if refine {
            vec![Context::default(); refinement::CONTEXT_COUNT]
        } else {
            Vec::new()
        };

        let mut coder = Coder::Arithmetic {
            mq: &mut mq,
            contexts: &mut contexts,
            refinement: &mut refinement_contexts,
        };
        decode_instances(&mut coder, symbols, &params)?
    };

    Ok((info, bitmap))
}

#[cfg(test)]
mod tests {
    use graven_common::bit::BitReader;

    use super::{decode_region, parse_symbol_id_table};
    use crate::bitmap::Bitmap;
    use crate::error::{DecodeError, SymbolError};

    fn cross_symbol() -> Bitmap {
        let mut symbol = Bitmap::new(2, 2).unwrap();
        symbol.set(0, 0, true);
        symbol.set(1, 1, true);
        symbol
    }

    #[test]
    fn huffman_region_places_two_instances() {
        // An 8x2 region with two instances of a 2x2 symbol, top-left
        // corners, one strip row each: the first at (0, 0), the second
        // at (4, 1) with its lower row clipped away.
        let mut data = Vec::new();
        data.extend_from_slice(&8_u32.to_be_bytes());
        data.extend_from_slice(&2_u32.to_be_bytes());
        data.extend_from_slice(&0_u32.to_be_bytes());
        data.extend_from_slice(&0_u32.to_be_bytes());
        data.push(0x00);
        // Huffman coding, top-left corners, single-row strips.
        data.extend_from_slice(&[0x00, 0x11]);
        // Standard tables B.6, B.8, and B.11 throughout.
        data.extend_from_slice(&[0x00, 0x00]);
        data.extend_from_slice(&2_u32.to_be_bytes());
        // Symbol ID table: runcode 1 gets a one-bit prefix, the single
        // symbol's code length is coded with it.
        data.push(0x01);
        data.extend_from_slice(&[0x00; 17]);
        // Strip data: DT 1, strip at T 0 with FS 0, then strip at T 1
        // with FS 4, each strip closed by an out-of-band delta.
        data.extend_from_slice(&[0x00, 0x04, 0x04, 0x20]);

        let symbol = cross_symbol();
        let (info, bitmap) = decode_region(&data, &[&symbol], &[]).unwrap();

        assert_eq!((info.width, info.height), (8, 2));
        assert_eq!(bitmap.to_packed(), [0x80, 0x48]);
    }

    #[test]
    fn region_without_symbols_is_rejected() {
        let mut data = Vec::new();
        data.extend_from_slice(&8_u32.to_be_bytes());
        data.extend_from_slice(&2_u32.to_be_bytes());
        data.extend_from_slice(&0_u32.to_be_bytes());
        data.extend_from_slice(&0_u32.to_be_bytes());
        data.push(0x00);
        data.extend_from_slice(&[0x00, 0x10]);
        data.extend_from_slice(&1_u32.to_be_bytes());

        assert_eq!(
            decode_region(&data, &[], &[]).unwrap_err(),
            DecodeError::Symbol(SymbolError::NoSymbols)
        );
    }

    #[test]
    fn symbol_id_run_codes_expand() {
        // Runcodes 2 and 33 get one-bit prefixes; the stream codes one
        // symbol of length 2 followed by a run of four zero lengths.
        let mut data = vec![0x00, 0x10];
        data.extend_from_slice(&[0x00; 14]);
        data.extend_from_slice(&[0x01, 0x04, 0x80]);

        let table = parse_symbol_id_table(&mut BitReader::new(&data), 5).unwrap();

        // Only symbol 0 has a code, the two-bit "00".
        assert_eq!(table.decode(&mut BitReader::new(&[0x00])).unwrap(), Some(0));
        assert!(table.decode(&mut BitReader::new(&[0x40])).is_err());
    }
}
