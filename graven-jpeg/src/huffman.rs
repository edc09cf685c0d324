//! Canonical Huffman tables (ISO/IEC 10918-1 Annex C and F).
//!
//! A table is defined in the stream by a histogram of code lengths and
//! the symbol values in code order. Code assignment is canonical: codes
//! of a given length are consecutive, and each length continues where
//! the previous one left off, shifted up one bit.

use crate::error::{FormatError, Result};

/// A decoding table in the three-array form of Figure F.15: for every
/// code length, the smallest and largest assigned code and the index of
/// the first symbol of that length.
#[derive(Debug, Clone)]
pub(crate) struct Table {
    min_code: [i32; 17],
    max_code: [i32; 17],
    val_ptr: [i32; 17],
    values: Vec<u8>,
}

impl Table {
    /// Build a table from the 16-entry code length histogram and the
    /// symbol values of a DHT segment.
    pub(crate) fn build(bits: &[u8; 16], values: Vec<u8>) -> Result<Self> {
        let total: usize = bits.iter().map(|&n| n as usize).sum();
        if total != values.len() || total > 256 {
            return Err(FormatError::InvalidHuffmanTable.into());
        }

        let mut min_code = [0_i32; 17];
        let mut max_code = [-1_i32; 17];
        let mut val_ptr = [0_i32; 17];

        let mut code = 0_i32;
        let mut k = 0_i32;
        for (length, &count) in (1..=16).zip(bits.iter()) {
            val_ptr[length] = k;
            min_code[length] = code;
            code += i32::from(count);
            k += i32::from(count);
            max_code[length] = code - 1;

            // The histogram must not assign more codes than the length
            // can hold, and length 16 must leave the all-ones code free
            // as a prefix of nothing.
            if code > (1 << length) - i32::from(length == 16) {
                return Err(FormatError::InvalidHuffmanTable.into());
            }
            code <<= 1;
        }

        Ok(Self {
            min_code,
            max_code,
            val_ptr,
            values,
        })
    }

    /// The symbol for `code` of `length` bits, if one is assigned.
    pub(crate) fn lookup(&self, length: usize, code: i32) -> Option<u8> {
        if code > self.max_code[length] {
            return None;
        }
        let index = self.val_ptr[length] + (code - self.min_code[length]);
        self.values.get(index as usize).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::Table;

    #[test]
    fn canonical_code_assignment() {
        // Two codes of length 2, one of length 3: 00, 01, 100.
        let mut bits = [0_u8; 16];
        bits[1] = 2;
        bits[2] = 1;
        let table = Table::build(&bits, vec![10, 20, 30]).unwrap();

        assert_eq!(table.lookup(2, 0b00), Some(10));
        assert_eq!(table.lookup(2, 0b01), Some(20));
        assert_eq!(table.lookup(2, 0b10), None);
        assert_eq!(table.lookup(3, 0b100), Some(30));
        assert_eq!(table.lookup(3, 0b101), None);
    }

    #[test]
    fn overfull_histogram_is_rejected() {
        // Three codes of length 1 cannot exist.
        let mut bits = [0_u8; 16];
        bits[0] = 3;
        assert!(Table::build(&bits, vec![1, 2, 3]).is_err());
    }

    #[test]
    fn histogram_and_values_must_agree() {
        let mut bits = [0_u8; 16];
        bits[0] = 1;
        assert!(Table::build(&bits, vec![1, 2]).is_err());
    }
}
