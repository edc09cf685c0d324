//! A bit-level cursor over a byte buffer.
//!
//! Bits are consumed MSB-first within each byte, the convention shared by
//! CCITT codes, JBIG2 segment fields, and JPEG 2000 packet headers.

/// A forward-only bit cursor.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    /// Position in bits from the start of `data`.
    pos: usize,
}

impl<'a> BitReader<'a> {
    /// Create a new reader over `data`, positioned at the first bit.
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// The byte the cursor currently points into.
    #[inline]
    pub fn byte_pos(&self) -> usize {
        self.pos >> 3
    }

    /// The bit offset within the current byte (0..8).
    #[inline]
    pub fn bit_pos(&self) -> usize {
        self.pos & 7
    }

    /// Whether every bit has been consumed.
    #[inline]
    pub fn at_end(&self) -> bool {
        self.byte_pos() >= self.data.len()
    }

    /// The number of unread bits.
    #[inline]
    pub fn remaining_bits(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.pos)
    }

    /// Advance to the next byte boundary. No-op when already aligned.
    #[inline]
    pub fn align(&mut self) {
        self.pos = (self.pos + 7) & !7;
    }

    /// Read a single bit.
    #[inline]
    pub fn read_bit(&mut self) -> Option<u8> {
        let byte = self.data.get(self.byte_pos()).copied()?;
        let bit = (byte >> (7 - self.bit_pos())) & 1;
        self.pos += 1;

        Some(bit)
    }

    /// Read `count` bits (at most 32) into the low bits of a `u32`.
    #[inline]
    pub fn read_bits(&mut self, count: u8) -> Option<u32> {
        debug_assert!(count <= 32);

        let value = self.peek_bits(count)?;
        self.pos += count as usize;

        Some(value)
    }

    /// Peek `count` bits without advancing.
    ///
    /// Returns `None` if fewer than `count` bits remain.
    #[inline]
    pub fn peek_bits(&self, count: u8) -> Option<u32> {
        debug_assert!(count <= 32);

        if self.pos + count as usize > self.data.len() * 8 {
            return None;
        }

        Some(self.peek_raw(count))
    }

    /// Peek `count` bits, zero-padding past the end of the data.
    ///
    /// Returns `None` only if no bits remain at all. This is the lookahead
    /// CCITT code matching needs: a code may be shorter than the lookahead
    /// window even when the window runs past the last byte.
    #[inline]
    pub fn peek_bits_padded(&self, count: u8) -> Option<u32> {
        debug_assert!(count <= 32);

        if self.at_end() {
            return None;
        }

        Some(self.peek_raw(count))
    }

    /// Skip `count` bits. Skipping past the end is allowed; subsequent
    /// reads will simply fail.
    #[inline]
    pub fn skip_bits(&mut self, count: u8) {
        self.pos += count as usize;
    }

    /// Read `len` whole bytes as a slice.
    ///
    /// The cursor must be byte-aligned.
    #[inline]
    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        debug_assert_eq!(self.bit_pos(), 0);

        let start = self.byte_pos();
        let end = start.checked_add(len)?;
        let bytes = self.data.get(start..end)?;
        self.pos = end * 8;

        Some(bytes)
    }

    /// The unread remainder of the data as a byte slice.
    ///
    /// The cursor must be byte-aligned.
    #[inline]
    pub fn tail(&self) -> Option<&'a [u8]> {
        debug_assert_eq!(self.bit_pos(), 0);

        self.data.get(self.byte_pos()..)
    }

    fn peek_raw(&self, count: u8) -> u32 {
        let mut value = 0_u32;
        let mut pos = self.pos;

        for _ in 0..count {
            let bit = self
                .data
                .get(pos >> 3)
                .map(|byte| (byte >> (7 - (pos & 7))) & 1)
                .unwrap_or(0);
            value = (value << 1) | bit as u32;
            pos += 1;
        }

        value
    }
}

#[cfg(test)]
mod tests {
    use super::BitReader;

    #[test]
    fn msb_first_order() {
        let mut reader = BitReader::new(&[0b1010_0110, 0b1100_0000]);

        assert_eq!(reader.read_bit(), Some(1));
        assert_eq!(reader.read_bit(), Some(0));
        assert_eq!(reader.read_bits(4), Some(0b1001));
        assert_eq!(reader.read_bits(4), Some(0b1011));
        assert_eq!(reader.bit_pos(), 2);
    }

    #[test]
    fn align_and_padded_peek() {
        let mut reader = BitReader::new(&[0xFF, 0x80]);

        reader.read_bits(3).unwrap();
        reader.align();
        assert_eq!(reader.byte_pos(), 1);

        // Only one set bit remains; padding fills the rest with zeros.
        assert_eq!(reader.peek_bits_padded(8), Some(0b1000_0000));
        assert_eq!(reader.peek_bits(16), None);

        reader.skip_bits(8);
        assert_eq!(reader.peek_bits_padded(1), None);
    }
}
