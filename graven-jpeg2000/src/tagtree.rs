//! Tag trees (ITU-T T.800 B.10.2).
//!
//! A tag tree is a quad tree over a grid of leaf values in which every
//! interior node stores the minimum of its children. The codestream
//! transmits it incrementally: each visit refines the nodes along the
//! path from the root to one leaf, so the same tree instance must be
//! kept across packets.

use crate::packet::PacketReader;

/// One quad-tree level, a grid of nodes. Level 0 holds the leaves.
struct Level {
    width: u32,
    values: Vec<u32>,
    resolved: Vec<bool>,
}

pub(crate) struct TagTree {
    levels: Vec<Level>,
}

impl TagTree {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        debug_assert!(width > 0 && height > 0);

        let depth = width.max(height).next_power_of_two().ilog2() + 1;
        let mut levels = Vec::with_capacity(depth as usize);
        let (mut w, mut h) = (width, height);
        for _ in 0..depth {
            let len = (w * h) as usize;
            levels.push(Level {
                width: w,
                values: vec![0; len],
                resolved: vec![false; len],
            });
            w = w.div_ceil(2);
            h = h.div_ceil(2);
        }

        Self { levels }
    }

    /// Read the value of leaf (x, y), stopping as soon as the value is
    /// known to be at least `cap`. The returned value is exact when it
    /// is below `cap`; otherwise only the bound holds and the remaining
    /// bits arrive with later visits.
    pub(crate) fn read(
        &mut self,
        x: u32,
        y: u32,
        reader: &mut PacketReader<'_>,
        cap: u32,
    ) -> Option<u32> {
        // Walk from the root down to the leaf. Each node's value is at
        // least its parent's, so the bound learned so far carries down.
        let mut floor = 0;
        for level in (0..self.levels.len()).rev() {
            let grid = &mut self.levels[level];
            let index = ((x >> level) + (y >> level) * grid.width) as usize;
            let mut value = floor.max(grid.values[index]);

            if grid.resolved[index] {
                floor = value;
                continue;
            }

            // A 0 bit raises the lower bound, a 1 bit settles the value.
            while value < cap {
                if reader.read_bit()? == 1 {
                    grid.resolved[index] = true;
                    break;
                }
                value += 1;
            }

            grid.values[index] = value;
            if !grid.resolved[index] {
                return Some(value);
            }
            floor = value;
        }

        Some(floor)
    }
}

#[cfg(test)]
mod tests {
    use super::TagTree;
    use crate::packet::PacketReader;

    fn pack(bits: &[u8]) -> Vec<u8> {
        let mut data = vec![0_u8; bits.len().div_ceil(8)];
        for (i, bit) in bits.iter().enumerate() {
            data[i / 8] |= bit << (7 - i % 8);
        }
        data
    }

    /// The worked example from B.10.2, reading the first row of a 6x3
    /// grid holding the values 1, 3, 2, 3, 2.
    #[test]
    fn worked_example_first_row() {
        let data = pack(&[
            0, 1, 1, 1, 1, // leaf (0, 0)
            0, 0, 1, // leaf (1, 0)
            1, 0, 1, // leaf (2, 0)
            0, 0, 1, // leaf (3, 0)
            1, 0, 1, 1, // leaf (4, 0)
        ]);
        let mut reader = PacketReader::new(&data);
        let mut tree = TagTree::new(6, 3);

        for (x, expected) in [1, 3, 2, 3, 2].into_iter().enumerate() {
            let value = tree.read(x as u32, 0, &mut reader, u32::MAX).unwrap();
            assert_eq!(value, expected, "leaf ({x}, 0)");
        }
    }

    /// The inclusion reads from Table B.5: a 3x2 grid read with a cap
    /// of 1, where capped nodes convey later leaves without new bits.
    #[test]
    fn capped_reads_share_partial_nodes() {
        let data = pack(&[1, 1, 1, 1, 0, 0, 0]);
        let mut reader = PacketReader::new(&data);
        let mut tree = TagTree::new(3, 2);

        assert_eq!(tree.read(0, 0, &mut reader, 1), Some(0));
        assert_eq!(tree.read(1, 0, &mut reader, 1), Some(0));
        assert_eq!(tree.read(2, 0, &mut reader, 1), Some(1));
        assert_eq!(tree.read(0, 1, &mut reader, 1), Some(1));
        assert_eq!(tree.read(1, 1, &mut reader, 1), Some(1));
        // All seven data bits are spent; this read needs none.
        assert_eq!(tree.read(2, 1, &mut reader, 1), Some(1));
    }

    /// Raising the cap on a later visit resumes an interrupted read.
    #[test]
    fn resumes_after_cap() {
        let mut tree = TagTree::new(1, 1);

        let first = pack(&[0, 0]);
        let mut reader = PacketReader::new(&first);
        assert_eq!(tree.read(0, 0, &mut reader, 2), Some(2));

        let second = pack(&[0, 1]);
        let mut reader = PacketReader::new(&second);
        assert_eq!(tree.read(0, 0, &mut reader, u32::MAX), Some(3));
    }

    #[test]
    fn exhausted_reader_is_detected() {
        let data = pack(&[0, 0, 0]);
        let mut reader = PacketReader::new(&data);
        let mut tree = TagTree::new(1, 1);

        // Three 0 bits, five padding zeros, then the data runs out.
        assert_eq!(tree.read(0, 0, &mut reader, u32::MAX), None);
    }
}
