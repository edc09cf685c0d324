//! Arithmetic integer decoding (T.88 Annex A).
//!
//! Integers are coded as a sign bit followed by a value ladder: each
//! rung widens the offset field and raises the base. The context for
//! every bit is chosen by the bits decoded so far, tracked in `PREV`.

use graven_common::mq::{Context, MqDecoder};

/// Offset field widths and bases of the value ladder (A.2). The last
/// rung has no selector bit.
const LADDER: [(u8, u32); 6] = [(2, 0), (4, 4), (6, 20), (8, 84), (12, 340), (32, 4436)];

/// Decodes integers against one of the IA-class context sets. Each
/// decoding procedure owns one instance per parameter kind.
#[derive(Debug)]
pub(crate) struct IntegerDecoder {
    contexts: Vec<Context>,
}

impl IntegerDecoder {
    pub(crate) fn new() -> Self {
        Self {
            contexts: vec![Context::default(); 512],
        }
    }

    fn bit(&mut self, mq: &mut MqDecoder<'_>, prev: &mut u32) -> u32 {
        let d = u32::from(mq.decode(&mut self.contexts[*prev as usize]));

        // PREV keeps the low eight bits once it grows past them.
        *prev = if *prev < 256 {
            (*prev << 1) | d
        } else {
            (((*prev << 1) | d) & 511) | 256
        };

        d
    }

    /// Decode one integer. `None` is the out-of-band value, coded as
    /// negative zero.
    pub(crate) fn decode(&mut self, mq: &mut MqDecoder<'_>) -> Option<i32> {
        let mut prev = 1_u32;
        let sign = self.bit(mq, &mut prev);

        let mut value = 0_i64;
        for (i, &(bits, base)) in LADDER.iter().enumerate() {
            if i + 1 == LADDER.len() || self.bit(mq, &mut prev) == 0 {
                let mut offset = 0_u32;
                for _ in 0..bits {
                    offset = (offset << 1) | self.bit(mq, &mut prev);
                }

                value = i64::from(offset) + i64::from(base);
                break;
            }
        }

        if sign == 1 {
            if value == 0 {
                return None;
            }

            value = -value;
        }

        Some(value as i32)
    }
}

/// The symbol ID code length for a dictionary of `total` symbols: the
/// number of bits needed to tell them apart, zero for a single symbol.
pub(crate) fn code_length(total: u32) -> u8 {
    (32 - total.saturating_sub(1).leading_zeros()) as u8
}

/// Decodes symbol IDs (A.3): a fixed-width code whose contexts form a
/// binary tree over the bits read so far.
#[derive(Debug)]
pub(crate) struct SymbolIdDecoder {
    contexts: Vec<Context>,
    code_len: u8,
}

impl SymbolIdDecoder {
    /// `code_len` is the number of bits per ID, zero when the
    /// dictionary holds a single symbol.
    pub(crate) fn new(code_len: u8) -> Self {
        Self {
            contexts: vec![Context::default(); 1_usize << code_len],
            code_len,
        }
    }

    pub(crate) fn decode(&mut self, mq: &mut MqDecoder<'_>) -> u32 {
        let mut prev = 1_u32;
        for _ in 0..self.code_len {
            let d = u32::from(mq.decode(&mut self.contexts[prev as usize]));
            prev = (prev << 1) | d;
        }

        prev - (1 << self.code_len)
    }
}
