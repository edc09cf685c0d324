//! Symbol dictionary decoding (T.88 sections 6.5 and 7.4.2).
//!
//! A dictionary codes its new symbols in height classes of equal
//! height. Within a class, widths are coded as deltas and an
//! out-of-band delta closes the class. The dictionary then exports a
//! subset of its input and new symbols as alternating runs of retained
//! and dropped indices.

use graven_common::bit::BitReader;
use graven_common::mq::{Context, MqDecoder};

use crate::bitmap::{Bitmap, CombinationOperator};
use crate::error::{
    DecodeError, HuffmanError, RegionError, Result, SymbolError, bail, read,
};
use crate::generic::{self, AtPixel, Template};
use crate::huffman::{Table, read_value, select_table, standard_table};
use crate::integer::{IntegerDecoder, code_length};
use crate::refinement::{self, RefinementTemplate};
use crate::text::{self, RefCorner, TextContexts};

/// The symbols a dictionary segment exports, in export order.
#[derive(Debug)]
pub(crate) struct SymbolDictionary {
    pub(crate) symbols: Vec<Bitmap>,
}

struct Flags {
    huffman: bool,
    refagg: bool,
    dh_selector: u32,
    dw_selector: u32,
    bmsize_selector: u32,
    agg_selector: u32,
    template: Template,
    r_template: RefinementTemplate,
}

struct Header {
    flags: Flags,
    at: Vec<AtPixel>,
    r_at: Vec<AtPixel>,
    num_exported: u32,
    num_new: u32,
}

fn parse(reader: &mut BitReader<'_>) -> Result<Header> {
    let flags = read!(reader.read_bits(16))?;
    let huffman = flags & 1 != 0;
    let refagg = flags & 2 != 0;
    if huffman && refagg {
        // Refinement of Huffman-coded symbols interleaves per-symbol
        // data lengths this decoder does not handle.
        bail!(DecodeError::Unsupported);
    }

    let template = Template::from_bits(((flags >> 10) & 3) as u8);
    let r_template = RefinementTemplate::from_bits(((flags >> 12) & 1) as u8);

    let at = if huffman {
        Vec::new()
    } else {
        generic::parse_at_pixels(reader, template)?
    };
    let r_at = if refagg && r_template == RefinementTemplate::T0 {
        refinement::parse_at_pixels(reader)?
    } else {
        Vec::new()
    };

    let num_exported = read!(reader.read_bits(32))?;
    let num_new = read!(reader.read_bits(32))?;

    Ok(Header {
        flags: Flags {
            huffman,
            refagg,
            dh_selector: (flags >> 2) & 3,
            dw_selector: (flags >> 4) & 3,
            // A set flag selects a custom table in place of B.1.
            bmsize_selector: if flags & 0x40 != 0 { 3 } else { 0 },
            agg_selector: if flags & 0x80 != 0 { 3 } else { 0 },
            template,
            r_template,
        },
        at,
        r_at,
        num_exported,
        num_new,
    })
}

/// Decode a symbol dictionary segment. `input` holds the exported
/// symbols of every referred dictionary in referral order, `custom`
/// the referred code tables.
pub(crate) fn decode(
    data: &[u8],
    input: &[&Bitmap],
    custom: &[&Table],
) -> Result<SymbolDictionary> {
    let mut reader = BitReader::new(data);
    let header = parse(&mut reader)?;
    let tail = read!(reader.tail())?;

    if header.flags.huffman {
        decode_huffman(tail, &header, input, custom)
    } else {
        decode_arithmetic(tail, &header, input)
    }
}

/// The arithmetic decoding state shared across all symbols of one
/// dictionary (6.5.8.1: the statistics are not reset between symbols).
struct ArithCoder<'a> {
    mq: MqDecoder<'a>,
    iadh: IntegerDecoder,
    iadw: IntegerDecoder,
    iaex: IntegerDecoder,
    iaai: IntegerDecoder,
    generic: Vec<Context>,
    refinement: Vec<Context>,
    text: Option<TextContexts>,
}

fn decode_arithmetic(data: &[u8], header: &Header, input: &[&Bitmap]) -> Result<SymbolDictionary> {
    let mut coder = ArithCoder {
        mq: MqDecoder::new(data),
        iadh: IntegerDecoder::new(),
        iadw: IntegerDecoder::new(),
        iaex: IntegerDecoder::new(),
        iaai: IntegerDecoder::new(),
        generic: vec![Context::default(); generic::CONTEXT_COUNT],
        refinement: if header.flags.refagg {
            vec![Context::default(); refinement::CONTEXT_COUNT]
        } else {
            Vec::new()
        },
        text: None,
    };

    let mut new_symbols: Vec<Bitmap> = Vec::with_capacity(header.num_new.min(1024) as usize);
    let mut height = 0_u32;

    while (new_symbols.len() as u32) < header.num_new {
        let dh = read_value(coder.iadh.decode(&mut coder.mq))?;
        height = height
            .checked_add_signed(dh)
            .ok_or(DecodeError::Region(RegionError::InvalidDimension))?;

        let mut width = 0_u32;
        loop {
            let Some(dw) = coder.iadw.decode(&mut coder.mq) else {
                break;
            };
            width = width
                .checked_add_signed(dw)
                .ok_or(DecodeError::Region(RegionError::InvalidDimension))?;
            if new_symbols.len() as u32 == header.num_new {
                bail!(SymbolError::TooManyInstances);
            }

            let bitmap = if header.flags.refagg {
                decode_refined(&mut coder, header, input, &new_symbols, width, height)?
            } else {
                let mut bitmap = Bitmap::new(width, height)?;
                generic::decode_bitmap(
                    &mut bitmap,
                    &mut coder.mq,
                    &mut coder.generic,
                    header.flags.template,
                    &header.at,
                    false,
                )?;
                bitmap
            };
            new_symbols.push(bitmap);
        }
    }

    let exported = export(input, &new_symbols, header.num_exported, || {
        read_value(coder.iaex.decode(&mut coder.mq))
    })?;

    Ok(SymbolDictionary { symbols: exported })
}

/// Decode one symbol coded by refinement or aggregation (6.5.8.2).
fn decode_refined(
    coder: &mut ArithCoder<'_>,
    header: &Header,
    input: &[&Bitmap],
    new_symbols: &[Bitmap],
    width: u32,
    height: u32,
) -> Result<Bitmap> {
    let total = (input.len() as u32)
        .checked_add(header.num_new)
        .ok_or(DecodeError::Overflow)?;
    let code_len = code_length(total);

    let count = read_value(coder.iaai.decode(&mut coder.mq))?;
    if count < 1 {
        bail!(SymbolError::InvalidAggregateCount);
    }

    if count == 1 {
        // A single instance refines one existing symbol directly.
        let contexts = coder.text.get_or_insert_with(|| TextContexts::new(code_len));
        let id = contexts.iaid.decode(&mut coder.mq) as usize;
        let rdx = read_value(contexts.iardx.decode(&mut coder.mq))?;
        let rdy = read_value(contexts.iardy.decode(&mut coder.mq))?;

        let base = if id < input.len() {
            input[id]
        } else {
            new_symbols
                .get(id - input.len())
                .ok_or(DecodeError::Symbol(SymbolError::IdOutOfRange))?
        };

        let mut bitmap = Bitmap::new(width, height)?;
        refinement::decode_bitmap(
            &mut bitmap,
            &mut coder.mq,
            &mut coder.refinement,
            base,
            rdx,
            rdy,
            header.flags.r_template,
            &header.r_at,
        )?;

        return Ok(bitmap);
    }

    // Several instances form the symbol through the text region
    // procedure with the fixed parameters of Table 17.
    let all: Vec<&Bitmap> = input.iter().copied().chain(new_symbols.iter()).collect();
    let params = text::Params {
        width,
        height,
        default_pixel: false,
        num_instances: count as u32,
        log_strips: 0,
        ref_corner: RefCorner::TopLeft,
        transposed: false,
        comb_op: CombinationOperator::Or,
        ds_offset: 0,
        refine: true,
        r_template: header.flags.r_template,
        r_at: &header.r_at,
    };

    let contexts = coder.text.get_or_insert_with(|| TextContexts::new(code_len));
    let mut text_coder = text::Coder::Arithmetic {
        mq: &mut coder.mq,
        contexts,
        refinement: &mut coder.refinement,
    };

    text::decode_instances(&mut text_coder, &all, &params)
}

fn decode_huffman(
    data: &[u8],
    header: &Header,
    input: &[&Bitmap],
    custom: &[&Table],
) -> Result<SymbolDictionary> {
    // Custom tables are assigned in flag order, including the
    // aggregation table this coding path never reads.
    let mut next_custom = 0;
    let dh_table = select_table(header.flags.dh_selector, &[4, 5], custom, &mut next_custom)?;
    let dw_table = select_table(header.flags.dw_selector, &[2, 3], custom, &mut next_custom)?;
    let size_table = select_table(header.flags.bmsize_selector, &[1], custom, &mut next_custom)?;
    let _ = select_table(header.flags.agg_selector, &[1], custom, &mut next_custom)?;

    let mut reader = BitReader::new(data);
    let mut new_symbols: Vec<Bitmap> = Vec::with_capacity(header.num_new.min(1024) as usize);
    let mut height = 0_u32;

    while (new_symbols.len() as u32) < header.num_new {
        let dh = dh_table.decode_value(&mut reader)?;
        height = height
            .checked_add_signed(dh)
            .ok_or(DecodeError::Region(RegionError::InvalidDimension))?;

        let mut width = 0_u32;
        let mut total_width = 0_u32;
        let mut widths = Vec::new();
        while let Some(dw) = dw_table.decode(&mut reader)? {
            width = width
                .checked_add_signed(dw)
                .ok_or(DecodeError::Region(RegionError::InvalidDimension))?;
            if new_symbols.len() + widths.len() >= header.num_new as usize {
                bail!(SymbolError::TooManyInstances);
            }

            total_width = total_width
                .checked_add(width)
                .ok_or(DecodeError::Overflow)?;
            widths.push(width);
        }

        decode_height_class(&mut reader, size_table, &mut new_symbols, &widths, total_width, height)?;
    }

    let exported = export(input, &new_symbols, header.num_exported, || {
        standard_table(1).decode_value(&mut reader)
    })?;

    Ok(SymbolDictionary { symbols: exported })
}

/// Decode the collective bitmap of one height class and split it into
/// its symbols (6.5.9).
fn decode_height_class(
    reader: &mut BitReader<'_>,
    size_table: &Table,
    out: &mut Vec<Bitmap>,
    widths: &[u32],
    total_width: u32,
    height: u32,
) -> Result<()> {
    let size = size_table.decode_value(reader)?;
    let size = usize::try_from(size).map_err(|_| HuffmanError::InvalidCode)?;
    reader.align();

    let mut collective = Bitmap::new(total_width, height)?;
    if size == 0 {
        // Stored uncompressed, each row padded to a whole byte.
        for y in 0..height {
            for byte_index in 0..total_width.div_ceil(8) {
                let byte = read!(reader.read_bits(8))?;
                for bit in 0..8 {
                    let x = byte_index * 8 + bit;
                    if x < total_width {
                        collective.set(x, y, (byte >> (7 - bit)) & 1 != 0);
                    }
                }
            }
        }
    } else {
        let bytes = read!(reader.read_bytes(size))?;
        generic::decode_bitmap_mmr(&mut collective, bytes)?;
    }

    let mut x0 = 0_u32;
    for &width in widths {
        let mut symbol = Bitmap::new(width, height)?;
        for y in 0..height {
            for x in 0..width {
                symbol.set(x, y, collective.get(x0 + x, y));
            }
        }
        out.push(symbol);
        x0 += width;
    }

    Ok(())
}

/// Read the export runs (6.5.10): alternating counts of dropped and
/// retained symbols over the concatenation of input and new symbols.
fn export<F>(
    input: &[&Bitmap],
    new_symbols: &[Bitmap],
    declared: u32,
    mut next_run: F,
) -> Result<Vec<Bitmap>>
where
    F: FnMut() -> Result<i32>,
{
    let total = input.len() + new_symbols.len();
    let mut retained = vec![false; total];
    let mut index = 0_usize;
    let mut current = false;
    let mut rounds = 0_usize;

    while index < total {
        // Zero-length runs only toggle the flag; a stream of them must
        // not spin forever.
        rounds += 1;
        if rounds > 2 * total + 2 {
            bail!(HuffmanError::InvalidCode);
        }

        let run = next_run()?;
        let run = usize::try_from(run).map_err(|_| HuffmanError::InvalidCode)?;
        for flag in retained.iter_mut().skip(index).take(run) {
            *flag = current;
        }

        index = index.saturating_add(run);
        current = !current;
    }

    let mut exported = Vec::with_capacity(declared.min(1024) as usize);
    for (i, &keep) in retained.iter().enumerate() {
        if keep {
            exported.push(if i < input.len() {
                input[i].clone()
            } else {
                new_symbols[i - input.len()].clone()
            });
        }
    }

    if exported.len() as u32 != declared {
        bail!(SymbolError::ExportCountMismatch);
    }

    Ok(exported)
}

#[cfg(test)]
mod tests {
    use super::decode;
    use crate::error::DecodeError;

    #[test]
    fn huffman_dictionary_with_uncompressed_class() {
        // One new symbol: height class of height 2 with a single width-2
        // symbol, collective bitmap stored uncompressed, exported alone.
        let data = [
            0x00, 0x01, // Huffman coding, standard tables throughout
            0x00, 0x00, 0x00, 0x01, // one exported symbol
            0x00, 0x00, 0x00, 0x01, // one new symbol
            0xB7, 0xE0, // DH 2, DW 2, out-of-band, size 0
            0x80, 0x40, // the collective bitmap rows
            0x00, 0x40, // export runs 0 and 1
        ];

        let dictionary = decode(&data, &[], &[]).unwrap();

        assert_eq!(dictionary.symbols.len(), 1);
        let symbol = &dictionary.symbols[0];
        assert_eq!((symbol.width(), symbol.height()), (2, 2));
        assert_eq!(symbol.to_packed(), [0x80, 0x40]);
    }

    #[test]
    fn empty_arithmetic_dictionary() {
        // No new and no exported symbols; only the template pixels and
        // the counts are present.
        let data = [
            0x00, 0x00, // arithmetic coding, template 0
            0x03, 0xFF, 0xFD, 0xFF, 0x02, 0xFE, 0xFE, 0xFE, // adaptive pixels
            0x00, 0x00, 0x00, 0x00, // no exported symbols
            0x00, 0x00, 0x00, 0x00, // no new symbols
        ];

        let dictionary = decode(&data, &[], &[]).unwrap();

        assert!(dictionary.symbols.is_empty());
    }

    #[test]
    fn huffman_refinement_is_rejected() {
        let data = [0x00, 0x03];

        assert_eq!(decode(&data, &[], &[]).unwrap_err(), DecodeError::Unsupported);
    }
}
