//! Packet headers (ITU-T T.800 B.9 and B.10).
//!
//! A packet carries the contributions of one quality layer to the
//! code-blocks of one precinct. Its header is a bit stream with byte
//! stuffing: a byte following 0xFF starts with a stuffed zero bit, so
//! no marker can appear inside a header. The header says which blocks
//! are included, how many coding passes each contributes, and how many
//! body bytes follow for each.

use crate::codestream::{CodingStyle, markers};
use crate::error::{CodingError, Result, bail, read};
use crate::tile::Resolution;

/// A bit reader over packet data that undoes byte stuffing.
pub(crate) struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
    buffer: u64,
    bits: u8,
    /// The previous byte was 0xFF, so the next byte opens with a
    /// stuffed zero bit.
    stuffed: bool,
}

impl<'a> PacketReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            buffer: 0,
            bits: 0,
            stuffed: false,
        }
    }

    pub(crate) fn read_bit(&mut self) -> Option<u8> {
        self.read_bits(1).map(|bit| bit as u8)
    }

    pub(crate) fn read_bits(&mut self, count: u8) -> Option<u32> {
        debug_assert!(count <= 32);

        while self.bits < count {
            let byte = *self.data.get(self.pos)?;
            self.pos += 1;

            if self.stuffed {
                self.buffer = (self.buffer << 7) | u64::from(byte & 0x7F);
                self.bits += 7;
            } else {
                self.buffer = (self.buffer << 8) | u64::from(byte);
                self.bits += 8;
            }
            self.stuffed = byte == 0xFF;
        }

        self.bits -= count;
        Some((self.buffer >> self.bits) as u32 & (((1_u64 << count) - 1) as u32))
    }

    /// Discard the bits of the current byte. If the last header byte
    /// was 0xFF the encoder appended a stuffing byte, which belongs to
    /// the header as well.
    pub(crate) fn align(&mut self) {
        self.bits = 0;
        self.buffer = 0;
        if self.stuffed {
            self.pos += 1;
            self.stuffed = false;
        }
    }

    /// Read packet body bytes. Only valid on a byte boundary.
    pub(crate) fn read_bytes(&mut self, count: usize) -> Option<&'a [u8]> {
        debug_assert!(self.bits == 0);

        let end = self.pos.checked_add(count)?;
        let bytes = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Skip an SOP marker segment if one starts here.
    fn skip_sop(&mut self) {
        if self.data.get(self.pos) == Some(&0xFF)
            && self.data.get(self.pos + 1) == Some(&markers::SOP)
        {
            // Marker, Lsop, and Nsop are six bytes in total.
            self.pos += 6;
        }
    }

    /// Skip an EPH marker if one starts here.
    fn skip_eph(&mut self) {
        if self.data.get(self.pos) == Some(&0xFF)
            && self.data.get(self.pos + 1) == Some(&markers::EPH)
        {
            self.pos += 2;
        }
    }
}

/// The codeword for the number of coding passes (Table B.4).
fn coding_passes(reader: &mut PacketReader<'_>) -> Option<u32> {
    if reader.read_bit()? == 0 {
        return Some(1);
    }
    if reader.read_bit()? == 0 {
        return Some(2);
    }
    let prefix = reader.read_bits(2)?;
    if prefix < 3 {
        return Some(3 + prefix);
    }
    let prefix = reader.read_bits(5)?;
    if prefix < 31 {
        return Some(6 + prefix);
    }
    Some(37 + reader.read_bits(7)?)
}

/// One code-block's share of a packet body.
pub(crate) struct Contribution {
    pub(crate) band: usize,
    pub(crate) block: usize,
    pub(crate) passes: u32,
    pub(crate) length: usize,
}

/// Parse the header of the packet for the given precinct and layer,
/// updating the inclusion state of the affected code-blocks. The body
/// bytes follow at the reader's position, in contribution order.
pub(crate) fn packet_header(
    reader: &mut PacketReader<'_>,
    resolution: &mut Resolution,
    precinct: u32,
    layer: u16,
    style: &CodingStyle,
) -> Result<Vec<Contribution>> {
    let mut contributions = Vec::new();

    if style.sop_markers {
        reader.skip_sop();
    }

    // The zero-length bit: an empty packet has nothing else to say.
    if read!(reader.read_bit())? == 0 {
        reader.align();
        if style.eph_markers {
            reader.skip_eph();
        }
        return Ok(contributions);
    }

    for (band_index, band) in resolution.bands.iter_mut().enumerate() {
        let part = &mut band.precincts[precinct as usize];

        for by in part.block_y0..part.block_y1 {
            for bx in part.block_x0..part.block_x1 {
                let block_index = (by * band.blocks_wide + bx) as usize;
                let block = &mut band.blocks[block_index];
                let (tx, ty) = (bx - part.block_x0, by - part.block_y0);

                let included = if block.included {
                    read!(reader.read_bit())? == 1
                } else {
                    // The inclusion tag tree stores the first layer in
                    // which each block contributes.
                    let first = read!(part.inclusion.read(
                        tx,
                        ty,
                        reader,
                        u32::from(layer) + 1
                    ))?;
                    first <= u32::from(layer)
                };
                if !included {
                    continue;
                }

                if !block.included {
                    block.included = true;
                    block.zero_bitplanes =
                        read!(part.zero_planes.read(tx, ty, reader, u32::MAX))?;
                    block.length_indicator = 3;
                }

                let passes = read!(coding_passes(reader))?;

                // Each 1 bit widens the length field by one (B.10.7.1).
                while read!(reader.read_bit())? == 1 {
                    block.length_indicator += 1;
                }
                let bits = block.length_indicator + passes.ilog2();
                if bits > 32 {
                    bail!(CodingError::InvalidPacketHeader);
                }
                let length = read!(reader.read_bits(bits as u8))? as usize;

                contributions.push(Contribution {
                    band: band_index,
                    block: block_index,
                    passes,
                    length,
                });
            }
        }
    }

    reader.align();
    if style.eph_markers {
        reader.skip_eph();
    }

    Ok(contributions)
}
