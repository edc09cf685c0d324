//! The run-length and mode code tables from ITU-T T.4 and T.6.
//!
//! Codes are stored as `(run, length, bits)` triples and matched against a
//! zero-padded lookahead window: a candidate matches when the top `length`
//! bits of the window equal `bits`. Make-up codes (runs of 64 or more) are
//! followed by a terminating code of the same colour.

/// A single run-length code.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RunCode {
    /// The decoded run length in pixels.
    pub(crate) run: u16,
    /// The code length in bits.
    pub(crate) len: u8,
    /// The code, right-aligned.
    pub(crate) bits: u16,
}

const fn c(run: u16, len: u8, bits: u16) -> RunCode {
    RunCode { run, len, bits }
}

/// The longest run code in any table (black terminating/make-up).
pub(crate) const MAX_CODE_LEN: u8 = 13;

/// The end-of-line code: eleven 0 bits followed by a 1 (T.4 §4.1.2).
pub(crate) const EOL: u32 = 0b0000_0000_0001;
pub(crate) const EOL_LEN: u8 = 12;

/// "Table 2/T.4 - Terminating white codes" plus
/// "Table 3a/T.4 - Make-up white codes".
#[rustfmt::skip]
pub(crate) static WHITE_CODES: [RunCode; 91] = [
    c(0, 8, 0b00110101),
    c(1, 6, 0b000111),
    c(2, 4, 0b0111),
    c(3, 4, 0b1000),
    c(4, 4, 0b1011),
    c(5, 4, 0b1100),
    c(6, 4, 0b1110),
    c(7, 4, 0b1111),
    c(8, 5, 0b10011),
    c(9, 5, 0b10100),
    c(10, 5, 0b00111),
    c(11, 5, 0b01000),
    c(12, 6, 0b001000),
    c(13, 6, 0b000011),
    c(14, 6, 0b110100),
    c(15, 6, 0b110101),
    c(16, 6, 0b101010),
    c(17, 6, 0b101011),
    c(18, 7, 0b0100111),
    c(19, 7, 0b0001100),
    c(20, 7, 0b0001000),
    c(21, 7, 0b0010111),
    c(22, 7, 0b0000011),
    c(23, 7, 0b0000100),
    c(24, 7, 0b0101000),
    c(25, 7, 0b0101011),
    c(26, 7, 0b0010011),
    c(27, 7, 0b0100100),
    c(28, 7, 0b0011000),
    c(29, 8, 0b00000010),
    c(30, 8, 0b00000011),
    c(31, 8, 0b00011010),
    c(32, 8, 0b00011011),
    c(33, 8, 0b00010010),
    c(34, 8, 0b00010011),
    c(35, 8, 0b00010100),
    c(36, 8, 0b00010101),
    c(37, 8, 0b00010110),
    c(38, 8, 0b00010111),
    c(39, 8, 0b00101000),
    c(40, 8, 0b00101001),
    c(41, 8, 0b00101010),
    c(42, 8, 0b00101011),
    c(43, 8, 0b00101100),
    c(44, 8, 0b00101101),
    c(45, 8, 0b00000100),
    c(46, 8, 0b00000101),
    c(47, 8, 0b00001010),
    c(48, 8, 0b00001011),
    c(49, 8, 0b01010010),
    c(50, 8, 0b01010011),
    c(51, 8, 0b01010100),
    c(52, 8, 0b01010101),
    c(53, 8, 0b00100100),
    c(54, 8, 0b00100101),
    c(55, 8, 0b01011000),
    c(56, 8, 0b01011001),
    c(57, 8, 0b01011010),
    c(58, 8, 0b01011011),
    c(59, 8, 0b01001010),
    c(60, 8, 0b01001011),
    c(61, 8, 0b00110010),
    c(62, 8, 0b00110011),
    c(63, 8, 0b00110100),
    // Make-up codes.
    c(64, 5, 0b11011),
    c(128, 5, 0b10010),
    c(192, 6, 0b010111),
    c(256, 7, 0b0110111),
    c(320, 8, 0b00110110),
    c(384, 8, 0b00110111),
    c(448, 8, 0b01100100),
    c(512, 8, 0b01100101),
    c(576, 8, 0b01101000),
    c(640, 8, 0b01100111),
    c(704, 9, 0b011001100),
    c(768, 9, 0b011001101),
    c(832, 9, 0b011010010),
    c(896, 9, 0b011010011),
    c(960, 9, 0b011010100),
    c(1024, 9, 0b011010101),
    c(1088, 9, 0b011010110),
    c(1152, 9, 0b011010111),
    c(1216, 9, 0b011011000),
    c(1280, 9, 0b011011001),
    c(1344, 9, 0b011011010),
    c(1408, 9, 0b011011011),
    c(1472, 9, 0b010011000),
    c(1536, 9, 0b010011001),
    c(1600, 9, 0b010011010),
    c(1664, 6, 0b011000),
    c(1728, 9, 0b010011011),
];

/// "Table 3/T.4 - Terminating black codes" plus
/// "Table 3b/T.4 - Make-up black codes".
#[rustfmt::skip]
pub(crate) static BLACK_CODES: [RunCode; 91] = [
    c(0, 10, 0b0000110111),
    c(1, 3, 0b010),
    c(2, 2, 0b11),
    c(3, 2, 0b10),
    c(4, 3, 0b011),
    c(5, 4, 0b0011),
    c(6, 4, 0b0010),
    c(7, 5, 0b00011),
    c(8, 6, 0b000101),
    c(9, 6, 0b000100),
    c(10, 7, 0b0000100),
    c(11, 7, 0b0000101),
    c(12, 7, 0b0000111),
    c(13, 8, 0b00000100),
    c(14, 8, 0b00000111),
    c(15, 9, 0b000011000),
    c(16, 10, 0b0000010111),
    c(17, 10, 0b0000011000),
    c(18, 10, 0b0000001000),
    c(19, 11, 0b00001100111),
    c(20, 11, 0b00001101000),
    c(21, 11, 0b00001101100),
    c(22, 11, 0b00000110111),
    c(23, 11, 0b00000101000),
    c(24, 11, 0b00000010111),
    c(25, 11, 0b00000011000),
    c(26, 12, 0b000011001010),
    c(27, 12, 0b000011001011),
    c(28, 12, 0b000011001100),
    c(29, 12, 0b000011001101),
    c(30, 12, 0b000001101000),
    c(31, 12, 0b000001101001),
    c(32, 12, 0b000001101010),
    c(33, 12, 0b000001101011),
    c(34, 12, 0b000011010010),
    c(35, 12, 0b000011010011),
    c(36, 12, 0b000011010100),
    c(37, 12, 0b000011010101),
    c(38, 12, 0b000011010110),
    c(39, 12, 0b000011010111),
    c(40, 12, 0b000001101100),
    c(41, 12, 0b000001101101),
    c(42, 12, 0b000011011010),
    c(43, 12, 0b000011011011),
    c(44, 12, 0b000001010100),
    c(45, 12, 0b000001010101),
    c(46, 12, 0b000001010110),
    c(47, 12, 0b000001010111),
    c(48, 12, 0b000001100100),
    c(49, 12, 0b000001100101),
    c(50, 12, 0b000001010010),
    c(51, 12, 0b000001010011),
    c(52, 12, 0b000000100100),
    c(53, 12, 0b000000110111),
    c(54, 12, 0b000000111000),
    c(55, 12, 0b000000100111),
    c(56, 12, 0b000000101000),
    c(57, 12, 0b000001011000),
    c(58, 12, 0b000001011001),
    c(59, 12, 0b000000101011),
    c(60, 12, 0b000000101100),
    c(61, 12, 0b000001011010),
    c(62, 12, 0b000001100110),
    c(63, 12, 0b000001100111),
    // Make-up codes.
    c(64, 10, 0b0000001111),
    c(128, 12, 0b000011001000),
    c(192, 12, 0b000011001001),
    c(256, 12, 0b000001011011),
    c(320, 12, 0b000000110011),
    c(384, 12, 0b000000110100),
    c(448, 12, 0b000000110101),
    c(512, 13, 0b0000001101100),
    c(576, 13, 0b0000001101101),
    c(640, 13, 0b0000001001010),
    c(704, 13, 0b0000001001011),
    c(768, 13, 0b0000001001100),
    c(832, 13, 0b0000001001101),
    c(896, 13, 0b0000001110010),
    c(960, 13, 0b0000001110011),
    c(1024, 13, 0b0000001110100),
    c(1088, 13, 0b0000001110101),
    c(1152, 13, 0b0000001110110),
    c(1216, 13, 0b0000001110111),
    c(1280, 13, 0b0000001010010),
    c(1344, 13, 0b0000001010011),
    c(1408, 13, 0b0000001010100),
    c(1472, 13, 0b0000001010101),
    c(1536, 13, 0b0000001011010),
    c(1600, 13, 0b0000001011011),
    c(1664, 13, 0b0000001100100),
    c(1728, 13, 0b0000001100101),
];

/// "Table 4/T.4 - Extended make-up codes", shared by both colours.
#[rustfmt::skip]
pub(crate) static EXTENDED_CODES: [RunCode; 13] = [
    c(1792, 11, 0b00000001000),
    c(1856, 11, 0b00000001100),
    c(1920, 11, 0b00000001101),
    c(1984, 12, 0b000000010010),
    c(2048, 12, 0b000000010011),
    c(2112, 12, 0b000000010100),
    c(2176, 12, 0b000000010101),
    c(2240, 12, 0b000000010110),
    c(2304, 12, 0b000000010111),
    c(2368, 12, 0b000000011100),
    c(2432, 12, 0b000000011101),
    c(2496, 12, 0b000000011110),
    c(2560, 12, 0b000000011111),
];

/// A two-dimensional coding mode (T.6 §2.2.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Pass mode: the coding run extends past `b2` without a transition.
    Pass,
    /// Horizontal mode: two explicit run lengths follow.
    Horizontal,
    /// Vertical mode: the transition lands at `b1 + offset`.
    Vertical(i8),
}

/// A single mode code.
pub(crate) struct ModeCode {
    pub(crate) mode: Mode,
    pub(crate) len: u8,
    pub(crate) bits: u8,
}

/// "Table 1/T.6 - Code table" (vertical/horizontal/pass mode codes).
#[rustfmt::skip]
pub(crate) static MODE_CODES: [ModeCode; 9] = [
    ModeCode { mode: Mode::Vertical(0), len: 1, bits: 0b1 },
    ModeCode { mode: Mode::Horizontal, len: 3, bits: 0b001 },
    ModeCode { mode: Mode::Vertical(1), len: 3, bits: 0b011 },
    ModeCode { mode: Mode::Vertical(-1), len: 3, bits: 0b010 },
    ModeCode { mode: Mode::Pass, len: 4, bits: 0b0001 },
    ModeCode { mode: Mode::Vertical(2), len: 6, bits: 0b000011 },
    ModeCode { mode: Mode::Vertical(-2), len: 6, bits: 0b000010 },
    ModeCode { mode: Mode::Vertical(3), len: 7, bits: 0b0000011 },
    ModeCode { mode: Mode::Vertical(-3), len: 7, bits: 0b0000010 },
];

#[cfg(test)]
mod tests {
    use super::{BLACK_CODES, EXTENDED_CODES, WHITE_CODES};

    #[test]
    fn tables_cover_all_runs() {
        // Terminating codes 0..=63 followed by make-up codes in steps of 64.
        for (i, code) in WHITE_CODES.iter().chain(BLACK_CODES.iter()).enumerate() {
            let i = i % 91;
            if i < 64 {
                assert_eq!(code.run as usize, i);
            } else {
                assert_eq!(code.run as usize, (i - 63) * 64);
            }
        }

        for (i, code) in EXTENDED_CODES.iter().enumerate() {
            assert_eq!(code.run as usize, 1792 + i * 64);
        }
    }

    #[test]
    fn codes_fit_their_length() {
        for code in WHITE_CODES
            .iter()
            .chain(BLACK_CODES.iter())
            .chain(EXTENDED_CODES.iter())
        {
            assert!(code.len <= super::MAX_CODE_LEN);
            assert!((code.bits as u32) < (1 << code.len));
        }
    }
}
