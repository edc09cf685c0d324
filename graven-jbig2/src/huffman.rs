//! Huffman-coded integer decoding (T.88 Annex B).
//!
//! A table is a list of lines, each covering a range of values with a
//! prefix code and a count of offset bits. Prefix codes are not stored
//! in the stream; they are assigned canonically from the prefix lengths
//! (B.3). The fifteen standard tables are built once on first use;
//! custom tables arrive in table segments (B.2).

use std::sync::LazyLock;

use graven_common::bit::BitReader;

use crate::error::{DecodeError, HuffmanError, Result, bail, read};

/// What a table line contributes to a decoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    /// `value = low + offset`.
    Normal,
    /// The open lower range, `value = low - offset`.
    Lower,
    /// The out-of-band marker.
    Oob,
}

/// One line of a code table.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Line {
    low: i32,
    prefix_len: u8,
    range_len: u8,
    kind: LineKind,
}

impl Line {
    pub(crate) const fn new(low: i32, prefix_len: u8, range_len: u8) -> Self {
        Self {
            low,
            prefix_len,
            range_len,
            kind: LineKind::Normal,
        }
    }

    /// The open upper range line. Reads 32 offset bits.
    const fn upper(low: i32, prefix_len: u8) -> Self {
        Self::new(low, prefix_len, 32)
    }

    /// The open lower range line, based at the highest value it covers.
    const fn lower(high: i32, prefix_len: u8) -> Self {
        Self {
            low: high,
            prefix_len,
            range_len: 32,
            kind: LineKind::Lower,
        }
    }

    const fn oob(prefix_len: u8) -> Self {
        Self {
            low: 0,
            prefix_len,
            range_len: 0,
            kind: LineKind::Oob,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Leaf {
    low: i32,
    range_len: u8,
    kind: LineKind,
}

/// A tree node. Children index into the arena; 0 marks an absent child,
/// since the root can never be a child.
#[derive(Debug, Clone, Copy, Default)]
struct Node {
    children: [u32; 2],
    leaf: Option<Leaf>,
}

/// A prefix code table, stored as a flat binary tree.
#[derive(Debug, Clone)]
pub(crate) struct Table {
    nodes: Vec<Node>,
}

impl Table {
    /// Assign canonical prefix codes to `lines` and build the tree
    /// (B.3). Lines with a prefix length of zero are unused.
    pub(crate) fn build(lines: &[Line]) -> Self {
        let max_len = lines.iter().map(|l| l.prefix_len).max().unwrap_or(0) as usize;
        let mut len_count = vec![0_u32; max_len + 1];
        for line in lines {
            len_count[line.prefix_len as usize] += 1;
        }
        len_count[0] = 0;

        let mut table = Self {
            nodes: vec![Node::default()],
        };

        // Codes of each length start where the previous length left
        // off, shifted one bit; within a length they follow line order.
        let mut first_code = 0_u32;
        for len in 1..=max_len {
            first_code = (first_code + len_count[len - 1]) << 1;

            let mut code = first_code;
            for line in lines {
                if line.prefix_len as usize == len {
                    table.insert(
                        code,
                        line.prefix_len,
                        Leaf {
                            low: line.low,
                            range_len: line.range_len,
                            kind: line.kind,
                        },
                    );
                    code += 1;
                }
            }
        }

        table
    }

    fn insert(&mut self, code: u32, len: u8, leaf: Leaf) {
        let mut node = 0_usize;
        for i in (0..len).rev() {
            let bit = ((code >> i) & 1) as usize;
            let next = self.nodes[node].children[bit];

            node = if next == 0 {
                self.nodes.push(Node::default());
                let index = self.nodes.len() - 1;
                self.nodes[node].children[bit] = index as u32;
                index
            } else {
                next as usize
            };
        }

        self.nodes[node].leaf = Some(leaf);
    }

    /// Decode one value (B.4). `None` is the out-of-band marker.
    pub(crate) fn decode(&self, reader: &mut BitReader<'_>) -> Result<Option<i32>> {
        let mut node = &self.nodes[0];

        loop {
            if let Some(leaf) = node.leaf {
                if leaf.kind == LineKind::Oob {
                    return Ok(None);
                }

                let offset = if leaf.range_len == 0 {
                    0
                } else {
                    i64::from(read!(reader.read_bits(leaf.range_len))?)
                };
                let value = match leaf.kind {
                    LineKind::Lower => i64::from(leaf.low) - offset,
                    _ => i64::from(leaf.low) + offset,
                };

                return Ok(Some(value as i32));
            }

            let bit = read!(reader.read_bit())?;
            let next = node.children[bit as usize];
            if next == 0 {
                bail!(HuffmanError::InvalidCode);
            }

            node = &self.nodes[next as usize];
        }
    }

    /// Decode one value where out-of-band is not permitted.
    pub(crate) fn decode_value(&self, reader: &mut BitReader<'_>) -> Result<i32> {
        read_value(self.decode(reader)?)
    }

    /// Read a custom code table from a table segment (B.2).
    pub(crate) fn from_stream(reader: &mut BitReader<'_>) -> Result<Self> {
        let flags = read!(reader.read_bits(8))?;
        if flags & 0x80 != 0 {
            bail!(crate::error::FormatError::ReservedBits);
        }

        let oob = flags & 1 != 0;
        let prefix_bits = (((flags >> 1) & 7) + 1) as u8;
        let range_bits = (((flags >> 4) & 7) + 1) as u8;
        let low = read!(reader.read_bits(32))? as i32;
        let high = read!(reader.read_bits(32))? as i32;

        // One line per range until the declared span is covered, then
        // the two open ranges and, when flagged, the out-of-band line.
        let mut lines = Vec::new();
        let mut current = low;
        while current < high {
            let prefix_len = read!(reader.read_bits(prefix_bits))? as u8;
            let range_len = read!(reader.read_bits(range_bits))? as u8;
            lines.push(Line::new(current, prefix_len, range_len));

            let step = 1_i64
                .checked_shl(u32::from(range_len))
                .ok_or(DecodeError::Overflow)?;
            let next = i64::from(current) + step;
            current = i32::try_from(next.min(i64::from(high))).map_err(|_| DecodeError::Overflow)?;
        }

        let prefix_len = read!(reader.read_bits(prefix_bits))? as u8;
        lines.push(Line::lower(low.wrapping_sub(1), prefix_len));

        let prefix_len = read!(reader.read_bits(prefix_bits))? as u8;
        lines.push(Line::upper(current, prefix_len));

        if oob {
            let prefix_len = read!(reader.read_bits(prefix_bits))? as u8;
            lines.push(Line::oob(prefix_len));
        }

        Ok(Self::build(&lines))
    }
}

/// Map an out-of-band value to an error where a number is required.
pub(crate) fn read_value(decoded: Option<i32>) -> Result<i32> {
    decoded.ok_or_else(|| HuffmanError::UnexpectedOob.into())
}

/// Resolve one table selection field: an index into `standard` (which
/// holds standard table numbers), or the next referred custom table
/// when the field is 3.
pub(crate) fn select_table<'t>(
    selector: u32,
    standard: &[u8],
    custom: &[&'t Table],
    next_custom: &mut usize,
) -> Result<&'t Table> {
    if selector == 3 {
        let table = custom
            .get(*next_custom)
            .copied()
            .ok_or(DecodeError::Huffman(HuffmanError::MissingTable))?;
        *next_custom += 1;

        return Ok(table);
    }

    match standard.get(selector as usize) {
        Some(&number) => Ok(standard_table(number)),
        None => bail!(HuffmanError::InvalidSelection),
    }
}

/// The standard tables B.1 through B.15, in Annex B order.
static STANDARD: LazyLock<[Table; 15]> = LazyLock::new(|| {
    [
        // B.1: segment lengths and other unbounded counts.
        Table::build(&[
            Line::new(0, 1, 4),
            Line::new(16, 2, 8),
            Line::new(272, 3, 16),
            Line::upper(65808, 3),
        ]),
        // B.2
        Table::build(&[
            Line::new(0, 1, 0),
            Line::new(1, 2, 0),
            Line::new(2, 3, 0),
            Line::new(3, 4, 3),
            Line::new(11, 5, 6),
            Line::upper(75, 6),
            Line::oob(6),
        ]),
        // B.3
        Table::build(&[
            Line::new(-256, 8, 8),
            Line::new(0, 1, 0),
            Line::new(1, 2, 0),
            Line::new(2, 3, 0),
            Line::new(3, 4, 3),
            Line::new(11, 5, 6),
            Line::lower(-257, 8),
            Line::upper(75, 7),
            Line::oob(6),
        ]),
        // B.4
        Table::build(&[
            Line::new(1, 1, 0),
            Line::new(2, 2, 0),
            Line::new(3, 3, 0),
            Line::new(4, 4, 3),
            Line::new(12, 5, 6),
            Line::upper(76, 5),
        ]),
        // B.5
        Table::build(&[
            Line::new(-255, 7, 8),
            Line::new(1, 1, 0),
            Line::new(2, 2, 0),
            Line::new(3, 3, 0),
            Line::new(4, 4, 3),
            Line::new(12, 5, 6),
            Line::lower(-256, 7),
            Line::upper(76, 6),
        ]),
        // B.6
        Table::build(&[
            Line::new(-2048, 5, 10),
            Line::new(-1024, 4, 9),
            Line::new(-512, 4, 8),
            Line::new(-256, 4, 7),
            Line::new(-128, 5, 6),
            Line::new(-64, 5, 5),
            Line::new(-32, 4, 5),
            Line::new(0, 2, 7),
            Line::new(128, 3, 7),
            Line::new(256, 3, 8),
            Line::new(512, 4, 9),
            Line::new(1024, 4, 10),
            Line::lower(-2049, 6),
            Line::upper(2048, 6),
        ]),
        // B.7
        Table::build(&[
            Line::new(-1024, 4, 9),
            Line::new(-512, 3, 8),
            Line::new(-256, 4, 7),
            Line::new(-128, 5, 6),
            Line::new(-64, 5, 5),
            Line::new(-32, 4, 5),
            Line::new(0, 4, 5),
            Line::new(32, 5, 5),
            Line::new(64, 5, 6),
            Line::new(128, 4, 7),
            Line::new(256, 3, 8),
            Line::new(512, 3, 9),
            Line::new(1024, 3, 10),
            Line::lower(-1025, 5),
            Line::upper(2048, 5),
        ]),
        // B.8
        Table::build(&[
            Line::new(-15, 8, 3),
            Line::new(-7, 9, 1),
            Line::new(-5, 8, 1),
            Line::new(-3, 9, 0),
            Line::new(-2, 7, 0),
            Line::new(-1, 4, 0),
            Line::new(0, 2, 1),
            Line::new(2, 5, 0),
            Line::new(3, 6, 0),
            Line::new(4, 3, 4),
            Line::new(20, 6, 1),
            Line::new(22, 4, 4),
            Line::new(38, 4, 5),
            Line::new(70, 5, 6),
            Line::new(134, 5, 7),
            Line::new(262, 6, 7),
            Line::new(390, 7, 8),
            Line::new(646, 6, 10),
            Line::lower(-16, 9),
            Line::upper(1670, 9),
            Line::oob(2),
        ]),
        // B.9
        Table::build(&[
            Line::new(-31, 8, 4),
            Line::new(-15, 9, 2),
            Line::new(-11, 8, 2),
            Line::new(-7, 9, 1),
            Line::new(-5, 7, 1),
            Line::new(-3, 4, 1),
            Line::new(-1, 3, 1),
            Line::new(1, 3, 1),
            Line::new(3, 5, 1),
            Line::new(5, 6, 1),
            Line::new(7, 3, 5),
            Line::new(39, 6, 2),
            Line::new(43, 4, 5),
            Line::new(75, 4, 6),
            Line::new(139, 5, 7),
            Line::new(267, 5, 8),
            Line::new(523, 6, 8),
            Line::new(779, 7, 9),
            Line::new(1291, 6, 11),
            Line::lower(-32, 9),
            Line::upper(3339, 9),
            Line::oob(2),
        ]),
        // B.10
        Table::build(&[
            Line::new(-21, 7, 4),
            Line::new(-5, 8, 0),
            Line::new(-4, 7, 0),
            Line::new(-3, 5, 0),
            Line::new(-2, 2, 2),
            Line::new(2, 5, 0),
            Line::new(3, 6, 0),
            Line::new(4, 7, 0),
            Line::new(5, 8, 0),
            Line::new(6, 2, 6),
            Line::new(70, 5, 5),
            Line::new(102, 6, 5),
            Line::new(134, 6, 6),
            Line::new(198, 6, 7),
            Line::new(326, 6, 8),
            Line::new(582, 6, 9),
            Line::new(1094, 6, 10),
            Line::new(2118, 7, 11),
            Line::lower(-22, 8),
            Line::upper(4166, 8),
            Line::oob(2),
        ]),
        // B.11
        Table::build(&[
            Line::new(1, 1, 0),
            Line::new(2, 2, 1),
            Line::new(4, 4, 0),
            Line::new(5, 4, 1),
            Line::new(7, 5, 1),
            Line::new(9, 5, 2),
            Line::new(13, 6, 2),
            Line::new(17, 7, 2),
            Line::new(21, 7, 3),
            Line::new(29, 7, 4),
            Line::new(45, 7, 5),
            Line::new(77, 7, 6),
            Line::upper(141, 7),
        ]),
        // B.12
        Table::build(&[
            Line::new(1, 1, 0),
            Line::new(2, 2, 0),
            Line::new(3, 3, 1),
            Line::new(5, 5, 0),
            Line::new(6, 5, 1),
            Line::new(8, 6, 1),
            Line::new(10, 7, 0),
            Line::new(11, 7, 1),
            Line::new(13, 7, 2),
            Line::new(17, 7, 3),
            Line::new(25, 7, 4),
            Line::new(41, 8, 5),
            Line::upper(73, 8),
        ]),
        // B.13
        Table::build(&[
            Line::new(1, 1, 0),
            Line::new(2, 3, 0),
            Line::new(3, 4, 0),
            Line::new(4, 5, 0),
            Line::new(5, 4, 1),
            Line::new(7, 3, 3),
            Line::new(15, 6, 1),
            Line::new(17, 6, 2),
            Line::new(21, 6, 3),
            Line::new(29, 6, 4),
            Line::new(45, 6, 5),
            Line::new(77, 7, 6),
            Line::upper(141, 7),
        ]),
        // B.14: closed, no open ranges.
        Table::build(&[
            Line::new(-2, 3, 0),
            Line::new(-1, 3, 0),
            Line::new(0, 1, 0),
            Line::new(1, 3, 0),
            Line::new(2, 3, 0),
        ]),
        // B.15
        Table::build(&[
            Line::new(-24, 7, 4),
            Line::new(-8, 6, 2),
            Line::new(-4, 5, 1),
            Line::new(-2, 4, 0),
            Line::new(-1, 3, 0),
            Line::new(0, 1, 0),
            Line::new(1, 3, 0),
            Line::new(2, 4, 0),
            Line::new(3, 5, 1),
            Line::new(5, 6, 2),
            Line::new(9, 7, 4),
            Line::lower(-25, 7),
            Line::upper(25, 7),
        ]),
    ]
});

/// The standard table B.`number`, for `number` in 1..=15.
pub(crate) fn standard_table(number: u8) -> &'static Table {
    debug_assert!((1..=15).contains(&number));
    &STANDARD[usize::from(number) - 1]
}

#[cfg(test)]
mod tests {
    use graven_common::bit::BitReader;

    use super::{Table, standard_table};
    use crate::error::{DecodeError, HuffmanError};

    fn decode_one(table: &Table, data: &[u8]) -> Option<i32> {
        table.decode(&mut BitReader::new(data)).unwrap()
    }

    #[test]
    fn standard_table_b1() {
        let table = standard_table(1);

        // "0" + 4 offset bits.
        assert_eq!(decode_one(table, &[0b0_0000_000]), Some(0));
        assert_eq!(decode_one(table, &[0b0_0111_000]), Some(7));
        // "10" + 8 offset bits.
        assert_eq!(decode_one(table, &[0b10_111111, 0b11_000000]), Some(271));
        // "110" + 16 offset bits.
        assert_eq!(decode_one(table, &[0b110_00000, 0x00, 0b000_00000]), Some(272));
        // "111" + 32 offset bits reaches the open upper range.
        assert_eq!(
            decode_one(table, &[0b111_00000, 0x00, 0x00, 0x00, 0b00001_000]),
            Some(65809)
        );
    }

    #[test]
    fn out_of_band_and_invalid_codes() {
        let table = standard_table(2);

        // "111111" is the out-of-band marker.
        assert_eq!(decode_one(table, &[0b111111_00]), None);
        assert_eq!(
            table.decode_value(&mut BitReader::new(&[0b111111_00])),
            Err(DecodeError::Huffman(HuffmanError::UnexpectedOob))
        );
        assert_eq!(decode_one(table, &[0b110_00000]), Some(2));
    }

    #[test]
    fn lower_range_subtracts_its_offset() {
        let table = standard_table(5);

        // "1111111" selects the open lower range below -255.
        let mut data = vec![0b1111111_0];
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0b0000101_0]);
        assert_eq!(decode_one(table, &data), Some(-256 - 10));
    }

    #[test]
    fn custom_table_matches_its_standard_equivalent() {
        // A custom table encoding the same lines as B.1: flags select
        // two prefix-length bits and five range-length bits, the span
        // is 0..65808, and three lines cover it.
        let data = [
            0x42, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x01, 0x10, 0x49, 0x23, 0x81, 0x80,
        ];
        let table = Table::from_stream(&mut BitReader::new(&data)).unwrap();

        assert_eq!(decode_one(&table, &[0b0_1111_000]), Some(15));
        assert_eq!(decode_one(&table, &[0b10_000000, 0b00_000000]), Some(16));
        assert_eq!(
            decode_one(&table, &[0b111_00000, 0x00, 0x00, 0x00, 0b00000_000]),
            Some(65808)
        );
    }
}
