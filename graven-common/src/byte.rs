//! A bounds-checked cursor over a byte buffer.
//!
//! All reads are big-endian (network order), which is what every format in
//! this workspace uses. Out-of-range reads return `None`; callers decide
//! whether that is recoverable.

/// A forward-only byte cursor.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    /// Create a new reader over `data`, positioned at the start.
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// The current byte offset from the start of the buffer.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Move the cursor to an absolute offset.
    ///
    /// Returns `None` if `offset` lies past the end of the buffer.
    #[inline]
    pub fn seek(&mut self, offset: usize) -> Option<()> {
        if offset > self.data.len() {
            return None;
        }

        self.offset = offset;
        Some(())
    }

    /// Whether the cursor has reached the end of the buffer.
    #[inline]
    pub fn at_end(&self) -> bool {
        self.offset >= self.data.len()
    }

    /// The number of bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    /// The unread remainder of the buffer.
    #[inline]
    pub fn tail(&self) -> &'a [u8] {
        &self.data[self.offset.min(self.data.len())..]
    }

    /// Peek the next byte without advancing.
    #[inline]
    pub fn peek_byte(&self) -> Option<u8> {
        self.data.get(self.offset).copied()
    }

    /// Peek the byte `n` positions ahead of the cursor.
    #[inline]
    pub fn peek_byte_at(&self, n: usize) -> Option<u8> {
        self.data.get(self.offset.checked_add(n)?).copied()
    }

    /// Read a single byte.
    #[inline]
    pub fn read_byte(&mut self) -> Option<u8> {
        let byte = self.peek_byte()?;
        self.offset += 1;

        Some(byte)
    }

    /// Read `len` bytes as a subslice.
    #[inline]
    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.offset.checked_add(len)?;
        let bytes = self.data.get(self.offset..end)?;
        self.offset = end;

        Some(bytes)
    }

    /// Skip `len` bytes.
    #[inline]
    pub fn skip(&mut self, len: usize) -> Option<()> {
        self.read_bytes(len).map(|_| ())
    }

    /// Read a big-endian `u16`.
    #[inline]
    pub fn read_u16(&mut self) -> Option<u16> {
        Some(u16::from_be_bytes(self.read_bytes(2)?.try_into().ok()?))
    }

    /// Read a big-endian `u32`.
    #[inline]
    pub fn read_u32(&mut self) -> Option<u32> {
        Some(u32::from_be_bytes(self.read_bytes(4)?.try_into().ok()?))
    }

    /// Read a big-endian `u64`.
    #[inline]
    pub fn read_u64(&mut self) -> Option<u64> {
        Some(u64::from_be_bytes(self.read_bytes(8)?.try_into().ok()?))
    }

    /// Read a big-endian `i8`.
    #[inline]
    pub fn read_i8(&mut self) -> Option<i8> {
        self.read_byte().map(|b| b as i8)
    }
}

#[cfg(test)]
mod tests {
    use super::Reader;

    #[test]
    fn big_endian_reads() {
        let mut reader = Reader::new(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]);

        assert_eq!(reader.read_u16(), Some(0x0102));
        assert_eq!(reader.read_u32(), Some(0x0304_0506));
        assert_eq!(reader.read_byte(), Some(0x07));
        assert!(reader.at_end());
        assert_eq!(reader.read_byte(), None);
    }

    #[test]
    fn out_of_range_read_does_not_advance() {
        let mut reader = Reader::new(&[0x01, 0x02]);

        assert_eq!(reader.read_u32(), None);
        assert_eq!(reader.offset(), 0);
        assert_eq!(reader.read_u16(), Some(0x0102));
    }
}
