//! The MQ arithmetic decoder.
//!
//! This is the binary arithmetic coder shared by JBIG2 (ITU-T T.88 Annex E)
//! and JPEG 2000 (ITU-T T.800 Annex C). The decoder consumes a coded byte
//! sequence and a stream of context labels, yielding one decision bit per
//! call.
//!
//! The register layout follows the software conventions of Annex C: the
//! 32-bit C register is kept as separate `chigh`/`clow` 16-bit halves, and
//! the LPS path is taken when `chigh` falls below the current Qe estimate.

/// The probability state for a single coding context.
///
/// Packs the state index I(CX) and the MPS sense into one byte as
/// `(index << 1) | mps`. A default-constructed context starts at state 0
/// with an MPS of 0, which is the initial state every format here uses
/// for all but a handful of special contexts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Context(u8);

impl Context {
    /// Create a context with the given initial state index.
    #[inline]
    pub fn with_index(index: u8) -> Self {
        Self(index << 1)
    }

    #[inline]
    fn index(self) -> usize {
        (self.0 >> 1) as usize
    }

    #[inline]
    fn mps(self) -> u8 {
        self.0 & 1
    }

    #[inline]
    fn set(&mut self, index: u8, mps: u8) {
        self.0 = (index << 1) | mps;
    }
}

/// The MQ decoder state.
///
/// The decoder never fails: reading past the end of the coded data
/// synthesizes `0xFF` bytes, which the coder treats as a marker prefix.
/// Callers are responsible for bounding the total number of reads (e.g.
/// by the declared coding-pass count of a code-block).
pub struct MqDecoder<'a> {
    data: &'a [u8],
    /// "BP" - pointer to the compressed data.
    bp: usize,
    /// High 16 bits of the C register.
    chigh: u32,
    /// Low 16 bits of the C register.
    clow: u32,
    /// "A" - the current interval size.
    a: u32,
    /// "CT" - bits remaining before the next BYTEIN.
    ct: i32,
}

impl<'a> MqDecoder<'a> {
    /// Initialize the decoder over the given coded byte range (INITDEC).
    pub fn new(data: &'a [u8]) -> Self {
        let mut decoder = Self {
            data,
            bp: 0,
            chigh: 0,
            clow: 0,
            a: 0,
            ct: 0,
        };

        decoder.chigh = decoder.byte_at(0) as u32;
        decoder.byte_in();

        decoder.chigh = ((decoder.chigh << 7) & 0xFFFF) | ((decoder.clow >> 9) & 0x7F);
        decoder.clow = (decoder.clow << 7) & 0xFFFF;
        decoder.ct -= 7;
        decoder.a = 0x8000;

        decoder
    }

    /// Decode one decision using `cx`, updating its probability state.
    #[inline(always)]
    pub fn decode(&mut self, cx: &mut Context) -> u8 {
        let entry = &QE_TABLE[cx.index()];
        let qe = entry.qe as u32;
        let mut mps = cx.mps();

        let mut a = self.a - qe;
        let index;
        let d;

        if self.chigh < qe {
            // LPS path with conditional exchange (C.3.2).
            if a < qe {
                a = qe;
                d = mps;
                index = entry.nmps;
            } else {
                a = qe;
                d = 1 - mps;
                if entry.switch {
                    mps = d;
                }
                index = entry.nlps;
            }
        } else {
            self.chigh -= qe;

            if a & 0x8000 != 0 {
                // No renormalization needed; the context is unchanged.
                self.a = a;
                return mps;
            }

            // MPS path with conditional exchange (C.3.2).
            if a < qe {
                d = 1 - mps;
                if entry.switch {
                    mps = d;
                }
                index = entry.nlps;
            } else {
                d = mps;
                index = entry.nmps;
            }
        }

        // RENORMD (C.3.3).
        loop {
            if self.ct == 0 {
                self.byte_in();
            }

            a <<= 1;
            self.chigh = ((self.chigh << 1) & 0xFFFF) | ((self.clow >> 15) & 1);
            self.clow = (self.clow << 1) & 0xFFFF;
            self.ct -= 1;

            if a & 0x8000 != 0 {
                break;
            }
        }

        self.a = a;
        cx.set(index, mps);

        d
    }

    /// The BYTEIN procedure (C.3.4), compensating for the stuff bit that
    /// follows any `0xFF` byte in the coded stream.
    fn byte_in(&mut self) {
        if self.byte_at(self.bp) == 0xFF {
            if self.byte_at(self.bp + 1) > 0x8F {
                // A marker has been reached; feed 1-bits from here on.
                self.clow += 0xFF00;
                self.ct = 8;
            } else {
                self.bp += 1;
                self.clow += (self.byte_at(self.bp) as u32) << 9;
                self.ct = 7;
            }
        } else {
            self.bp += 1;
            self.clow += (self.byte_at(self.bp) as u32) << 8;
            self.ct = 8;
        }

        if self.clow > 0xFFFF {
            self.chigh += self.clow >> 16;
            self.clow &= 0xFFFF;
        }
    }

    /// Fetch a coded byte, synthesizing `0xFF` past the end of the data.
    #[inline(always)]
    fn byte_at(&self, pos: usize) -> u8 {
        self.data.get(pos).copied().unwrap_or(0xFF)
    }
}

/// One row of the probability estimation table.
struct Qe {
    /// The probability estimate for the LPS.
    qe: u16,
    /// Next state index after an MPS.
    nmps: u8,
    /// Next state index after an LPS.
    nlps: u8,
    /// Whether an LPS flips the MPS sense.
    switch: bool,
}

const fn q(qe: u16, nmps: u8, nlps: u8, switch: bool) -> Qe {
    Qe {
        qe,
        nmps,
        nlps,
        switch,
    }
}

/// "Table E.1 - Qe values and probability estimation process" (T.88),
/// identical to Table C.2 of T.800.
#[rustfmt::skip]
static QE_TABLE: [Qe; 47] = [
    q(0x5601,  1,  1, true),
    q(0x3401,  2,  6, false),
    q(0x1801,  3,  9, false),
    q(0x0AC1,  4, 12, false),
    q(0x0521,  5, 29, false),
    q(0x0221, 38, 33, false),
    q(0x5601,  7,  6, true),
    q(0x5401,  8, 14, false),
    q(0x4801,  9, 14, false),
    q(0x3801, 10, 14, false),
    q(0x3001, 11, 17, false),
    q(0x2401, 12, 18, false),
    q(0x1C01, 13, 20, false),
    q(0x1601, 29, 21, false),
    q(0x5601, 15, 14, true),
    q(0x5401, 16, 14, false),
    q(0x5101, 17, 15, false),
    q(0x4801, 18, 16, false),
    q(0x3801, 19, 17, false),
    q(0x3401, 20, 18, false),
    q(0x3001, 21, 19, false),
    q(0x2801, 22, 19, false),
    q(0x2401, 23, 20, false),
    q(0x2201, 24, 21, false),
    q(0x1C01, 25, 22, false),
    q(0x1801, 26, 23, false),
    q(0x1601, 27, 24, false),
    q(0x1401, 28, 25, false),
    q(0x1201, 29, 26, false),
    q(0x1101, 30, 27, false),
    q(0x0AC1, 31, 28, false),
    q(0x09C1, 32, 29, false),
    q(0x08A1, 33, 30, false),
    q(0x0521, 34, 31, false),
    q(0x0441, 35, 32, false),
    q(0x02A1, 36, 33, false),
    q(0x0221, 37, 34, false),
    q(0x0141, 38, 35, false),
    q(0x0111, 39, 36, false),
    q(0x0085, 40, 37, false),
    q(0x0049, 41, 38, false),
    q(0x0025, 42, 39, false),
    q(0x0015, 43, 40, false),
    q(0x0009, 44, 41, false),
    q(0x0005, 45, 42, false),
    q(0x0001, 45, 43, false),
    q(0x5601, 46, 46, false),
];

#[cfg(test)]
mod tests {
    use super::{Context, MqDecoder};

    /// The test sequence from ITU-T T.88, Annex H.2 ("Test sequence for
    /// arithmetic coder"). All decisions share a single context.
    #[test]
    fn annex_h2_conformance() {
        let input: [u8; 30] = [
            0x84, 0xC7, 0x3B, 0xFC, 0xE1, 0xA1, 0x43, 0x04, 0x02, 0x20, 0x00, 0x00, 0x41, 0x0D,
            0xBB, 0x86, 0xF4, 0x31, 0x7F, 0xFF, 0x88, 0xFF, 0x37, 0x47, 0x1A, 0xDB, 0x6A, 0xDF,
            0xFF, 0xAC,
        ];

        let expected: [u8; 32] = [
            0x00, 0x02, 0x00, 0x51, 0x00, 0x00, 0x00, 0xC0, 0x03, 0x52, 0x87, 0x2A, 0xAA, 0xAA,
            0xAA, 0xAA, 0x82, 0xC0, 0x20, 0x00, 0xFC, 0xD7, 0x9E, 0xF6, 0xBF, 0x7F, 0xED, 0x90,
            0x4F, 0x46, 0xA3, 0xBF,
        ];

        let mut decoder = MqDecoder::new(&input);
        let mut cx = Context::default();
        let mut out = Vec::with_capacity(expected.len());

        for _ in 0..expected.len() {
            let mut byte = 0_u8;
            for _ in 0..8 {
                byte = (byte << 1) | decoder.decode(&mut cx);
            }
            out.push(byte);
        }

        assert_eq!(out, expected);
    }

    /// Reads past the end of the coded data must keep yielding bits
    /// instead of panicking.
    #[test]
    fn exhausted_data_synthesizes_marker_bytes() {
        let mut decoder = MqDecoder::new(&[0x00]);
        let mut cx = Context::default();

        for _ in 0..256 {
            let bit = decoder.decode(&mut cx);
            assert!(bit <= 1);
        }
    }
}
