//! The row-by-row decoding state machine.
//!
//! A row is decoded as a list of changing elements: the pixel positions at
//! which the colour flips, always starting from an implicit white run.
//! Two-dimensionally coded rows are decoded against the changing elements
//! of the previous row (`b1`/`b2` in T.6 terms); the first row uses an
//! imaginary all-white reference line.

use graven_common::bit::BitReader;
use log::warn;

use crate::tables::{
    BLACK_CODES, EOL, EOL_LEN, EXTENDED_CODES, MAX_CODE_LEN, MODE_CODES, Mode, RunCode,
    WHITE_CODES,
};
use crate::{DecodeError, Params, Result};

/// The end-of-facsimile-block pattern terminating Group 4 data: two
/// consecutive end-of-line codes.
const EOFB: u32 = (EOL << EOL_LEN) | EOL;

/// How a single row is coded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowCoding {
    OneD,
    TwoD,
}

/// A streaming row decoder.
///
/// Rows come out packed 1 bit per pixel, MSB-first. The polarity follows
/// `Params::black_is_1`.
pub struct Decoder<'a> {
    reader: BitReader<'a>,
    params: Params,
    columns: usize,
    /// Changing elements of the previous row.
    ref_line: Vec<u32>,
    /// Changing elements of the row being decoded.
    coding_line: Vec<u32>,
    /// The packed form of the most recently decoded row.
    row_buf: Vec<u8>,
    rows_done: u32,
    /// Whether the next mixed-mode row is one-dimensional.
    next_is_1d: bool,
    /// Set on unrecoverable truncation; no further rows will be produced.
    eof: bool,
    done: bool,
}

impl<'a> Decoder<'a> {
    /// Create a decoder over the given coded data.
    pub fn new(data: &'a [u8], params: &Params) -> Self {
        Self {
            reader: BitReader::new(data),
            params: *params,
            columns: params.columns as usize,
            ref_line: Vec::new(),
            coding_line: Vec::new(),
            row_buf: Vec::new(),
            rows_done: 0,
            next_is_1d: true,
            eof: false,
            done: false,
        }
    }

    /// The number of coded bytes consumed so far, rounded up to a whole
    /// byte.
    pub fn bytes_consumed(&self) -> usize {
        self.reader.byte_pos() + usize::from(self.reader.bit_pos() != 0)
    }

    /// Consume a trailing end-of-block pattern, if one follows the rows
    /// decoded so far.
    ///
    /// Embedding formats that pack several codings back to back (JBIG2
    /// gray-scale bitplanes) call this so that `bytes_consumed` points
    /// past the terminator rather than into it.
    pub fn consume_eofb(&mut self) {
        if self.reader.remaining_bits() >= 2 * EOL_LEN as usize
            && self.reader.peek_bits(2 * EOL_LEN) == Some(EOFB)
        {
            self.reader.skip_bits(2 * EOL_LEN);
        }
    }

    /// Decode the next row, or return `None` when the stream has ended.
    ///
    /// A row with an invalid code is completed by extending the current
    /// run to the end of the row; truncation ends the stream. Both are
    /// logged rather than reported as errors, so the caller always
    /// receives correctly sized rows.
    pub fn next_row(&mut self) -> Result<Option<&[u8]>> {
        if self.done || self.eof {
            return Ok(None);
        }

        if self.params.rows != 0 && self.rows_done == self.params.rows {
            self.done = true;
            return Ok(None);
        }

        if self.params.encoded_byte_align {
            self.reader.align();
        }

        let coding = match self.start_of_row() {
            Some(coding) => coding,
            None => {
                self.done = true;
                return Ok(None);
            }
        };

        if self.at_effective_end() {
            self.eof = true;
            return Ok(None);
        }

        self.coding_line.clear();

        let result = match coding {
            RowCoding::OneD => self.decode_row_1d(),
            RowCoding::TwoD => self.decode_row_2d(),
        };

        match result {
            Ok(()) => {}
            Err(DecodeError::UnexpectedEof) => {
                self.eof = true;

                if self.coding_line.is_empty() {
                    return Ok(None);
                }

                warn!("CCITT row truncated, filling remainder");
            }
            Err(DecodeError::InvalidCode) => {
                warn!("invalid CCITT code, filling rest of row");
            }
            Err(e) => return Err(e),
        }

        self.pack_row();
        core::mem::swap(&mut self.ref_line, &mut self.coding_line);
        self.rows_done += 1;

        Ok(Some(&self.row_buf))
    }

    /// Handle everything that may precede a row's codes, and decide how
    /// the row is coded. Returns `None` when the stream end was reached
    /// instead of a row.
    fn start_of_row(&mut self) -> Option<RowCoding> {
        if self.params.k < 0 {
            // Group 4 has no per-row EOLs; only the EOFB terminator.
            if self.params.end_of_block
                && self.reader.remaining_bits() >= 2 * EOL_LEN as usize
                && self.reader.peek_bits(2 * EOL_LEN) == Some(EOFB)
            {
                self.reader.skip_bits(2 * EOL_LEN);
                return None;
            }

            return Some(RowCoding::TwoD);
        }

        // Producers are sloppy with the `end_of_line` flag, so EOLs are
        // always tolerated, whether announced or not.
        let eols = self.consume_eols();

        // Two consecutive EOLs with no row data in between can only be
        // part of an RTC (six EOLs in Group 3), so the page is over.
        if eols >= 2 {
            return None;
        }

        if self.params.k == 0 {
            return Some(RowCoding::OneD);
        }

        // Mixed mode: each EOL is followed by a tag bit selecting the
        // coding of the next row (T.4 §4.2.1.2).
        if eols == 1 {
            match self.reader.read_bit() {
                Some(tag) => self.next_is_1d = tag == 1,
                None => return None,
            }

            // A further EOL directly after the tag bit is an RTC.
            if self.reader.peek_bits(EOL_LEN) == Some(EOL) {
                return None;
            }
        }

        Some(if self.next_is_1d {
            RowCoding::OneD
        } else {
            RowCoding::TwoD
        })
    }

    /// Consume zero fill bits plus an EOL, repeatedly. Returns how many
    /// EOLs were consumed.
    fn consume_eols(&mut self) -> usize {
        let mut count = 0;

        loop {
            let mut probe = self.reader.clone();
            let mut zeros = 0_usize;

            let consumed = loop {
                match probe.read_bit() {
                    Some(0) => {
                        zeros += 1;
                        // An EOL must appear within a reasonable amount
                        // of fill; give up rather than scan forever.
                        if zeros > 4096 {
                            break false;
                        }
                    }
                    Some(_) => break zeros >= (EOL_LEN - 1) as usize,
                    None => break false,
                }
            };

            if !consumed {
                return count;
            }

            self.reader = probe;
            count += 1;
        }
    }

    /// Whether only zero padding (or nothing) remains in the data.
    fn at_effective_end(&self) -> bool {
        let remaining = self.reader.remaining_bits();

        if remaining == 0 {
            return true;
        }

        if remaining >= EOL_LEN as usize {
            return false;
        }

        self.reader
            .peek_bits(remaining.min(255) as u8)
            .is_some_and(|bits| bits == 0)
    }

    /// Decode a one-dimensionally coded row: alternating white/black runs
    /// until the row is full.
    fn decode_row_1d(&mut self) -> Result<()> {
        let mut pos = 0_usize;
        let mut white = true;
        let mut guard = 0_usize;

        while pos < self.columns {
            guard += 1;
            if guard > 2 * self.columns + 16 {
                return Err(DecodeError::InvalidCode);
            }

            let run = self.read_run(white)? as usize;
            pos += run;

            if pos > self.columns {
                return Err(DecodeError::InvalidCode);
            }

            self.coding_line.push(pos as u32);
            white = !white;
        }

        Ok(())
    }

    /// Decode a two-dimensionally coded row against the reference line.
    fn decode_row_2d(&mut self) -> Result<()> {
        let columns = self.columns as i64;
        let mut a0 = -1_i64;
        let mut white = true;
        let mut guard = 0_usize;

        while a0 < columns {
            guard += 1;
            if guard > 2 * self.columns + 16 {
                return Err(DecodeError::InvalidCode);
            }

            let (b1, b2) = self.locate_b(a0, white);

            match self.read_mode()? {
                Mode::Pass => {
                    // The run extends beyond b2 without a colour change.
                    a0 = b2 as i64;
                }
                Mode::Horizontal => {
                    let r1 = self.read_run(white)? as i64;
                    let r2 = self.read_run(!white)? as i64;

                    let start = a0.max(0);
                    let t1 = start + r1;
                    let t2 = t1 + r2;

                    if t2 > columns {
                        return Err(DecodeError::InvalidCode);
                    }

                    self.coding_line.push(t1 as u32);
                    self.coding_line.push(t2 as u32);
                    a0 = t2;
                }
                Mode::Vertical(offset) => {
                    let a1 = b1 as i64 + offset as i64;

                    if a1 < a0.max(0) || a1 > columns {
                        return Err(DecodeError::InvalidCode);
                    }

                    self.coding_line.push(a1 as u32);
                    a0 = a1;
                    white = !white;
                }
            }
        }

        Ok(())
    }

    /// Locate `b1` (the first changing element on the reference line right
    /// of `a0` with a colour opposite to the current colour) and `b2` (the
    /// next changing element after it). Either defaults to the imaginary
    /// changing element at `columns`.
    fn locate_b(&self, a0: i64, white: bool) -> (u32, u32) {
        let columns = self.columns as u32;

        // Even-indexed changing elements are white-to-black transitions.
        let mut i = if white { 0 } else { 1 };

        while i < self.ref_line.len() && (self.ref_line[i] as i64) <= a0 {
            i += 2;
        }

        let b1 = self
            .ref_line
            .get(i)
            .copied()
            .unwrap_or(columns)
            .min(columns);
        let b2 = self
            .ref_line
            .get(i + 1)
            .copied()
            .unwrap_or(columns)
            .min(columns);

        (b1, b2)
    }

    /// Read a complete run of the given colour, accumulating make-up codes
    /// until a terminating code (run < 64) arrives.
    fn read_run(&mut self, white: bool) -> Result<u32> {
        let mut total = 0_u32;

        loop {
            let code = self.lookup_run(white)?;
            total = total
                .checked_add(code.run as u32)
                .ok_or(DecodeError::InvalidCode)?;

            if code.run < 64 {
                return Ok(total);
            }
        }
    }

    /// Match a single run code of the given colour at the cursor.
    fn lookup_run(&mut self, white: bool) -> Result<RunCode> {
        let window = self
            .reader
            .peek_bits_padded(MAX_CODE_LEN)
            .ok_or(DecodeError::UnexpectedEof)?;

        let table = if white { &WHITE_CODES } else { &BLACK_CODES };

        for code in table.iter().chain(EXTENDED_CODES.iter()) {
            if window >> (MAX_CODE_LEN - code.len) == code.bits as u32 {
                // The match must not extend into zero padding.
                if (code.len as usize) > self.reader.remaining_bits() {
                    return Err(DecodeError::UnexpectedEof);
                }

                self.reader.skip_bits(code.len);
                return Ok(*code);
            }
        }

        self.no_match_error()
    }

    /// Match a two-dimensional mode code at the cursor.
    fn read_mode(&mut self) -> Result<Mode> {
        const MODE_WINDOW: u8 = 7;

        let window = self
            .reader
            .peek_bits_padded(MODE_WINDOW)
            .ok_or(DecodeError::UnexpectedEof)?;

        for code in &MODE_CODES {
            if window >> (MODE_WINDOW - code.len) == code.bits as u32 {
                if (code.len as usize) > self.reader.remaining_bits() {
                    return Err(DecodeError::UnexpectedEof);
                }

                self.reader.skip_bits(code.len);
                return Ok(code.mode);
            }
        }

        // The seven-zero prefix introduces either an EOL (handled by the
        // caller via EOFB/RTC detection) or a 2D extension code, which is
        // not supported.
        self.no_match_error()
    }

    /// Classify a failed table lookup: all-zero leftovers are truncation,
    /// anything else is a corrupt code.
    fn no_match_error<T>(&self) -> Result<T> {
        let remaining = self.reader.remaining_bits();

        if remaining < MAX_CODE_LEN as usize
            && self
                .reader
                .peek_bits(remaining as u8)
                .is_some_and(|bits| bits == 0)
        {
            return Err(DecodeError::UnexpectedEof);
        }

        Err(DecodeError::InvalidCode)
    }

    /// Pack the changing-element list into `row_buf`.
    fn pack_row(&mut self) {
        let (white_byte, black_byte) = if self.params.black_is_1 {
            (0x00_u8, 0xFF_u8)
        } else {
            (0xFF_u8, 0x00_u8)
        };

        self.row_buf.clear();
        self.row_buf.resize(self.columns.div_ceil(8), 0);

        let mut pos = 0_usize;
        let mut white = true;

        let mut fill = |from: usize, to: usize, byte: u8, buf: &mut [u8]| {
            for i in from..to {
                if byte != 0 {
                    buf[i / 8] |= 0x80 >> (i % 8);
                }
            }
        };

        for &t in &self.coding_line {
            let t = (t as usize).min(self.columns);
            let byte = if white { white_byte } else { black_byte };
            fill(pos, t, byte, &mut self.row_buf);
            pos = t;
            white = !white;
        }

        // Any remainder keeps the colour that was current when decoding
        // stopped; this is the "fill rest of row" recovery as well as the
        // normal no-op for complete rows.
        if pos < self.columns {
            let byte = if white { white_byte } else { black_byte };
            fill(pos, self.columns, byte, &mut self.row_buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Decoder;
    use crate::Params;

    #[test]
    fn group3_row_with_makeup_code() {
        // 80 columns: white 64+8 (11011 10011), black 8 (000101).
        let encoded = [0b1101_1100, 0b1100_0101];

        let params = Params {
            k: 0,
            columns: 80,
            rows: 1,
            black_is_1: true,
            end_of_block: false,
            ..Params::default()
        };

        let mut decoder = Decoder::new(&encoded, &params);
        let row = decoder.next_row().unwrap().unwrap();

        assert_eq!(row.len(), 10);
        assert_eq!(&row[..10], &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0xFF]);
    }

    #[test]
    fn invalid_code_fills_rest_of_row() {
        // White 4 (1011), then garbage that matches no white code.
        let encoded = [0b1011_0000, 0b0000_0000, 0b1000_0000];

        let params = Params {
            k: 0,
            columns: 16,
            rows: 1,
            black_is_1: true,
            end_of_block: false,
            ..Params::default()
        };

        let mut decoder = Decoder::new(&encoded, &params);
        let row = decoder.next_row().unwrap().unwrap();

        // Four white pixels; the failed code was for the black run, so
        // the remainder is filled with black.
        assert_eq!(row, &[0x0F, 0xFF]);
    }

    #[test]
    fn truncated_stream_ends_without_panicking() {
        let encoded = [0b1011_0000];

        let params = Params {
            k: 0,
            columns: 64,
            rows: 4,
            end_of_block: false,
            ..Params::default()
        };

        let mut decoder = Decoder::new(&encoded, &params);

        // First row: white 4, then truncation; the row is filled.
        assert!(decoder.next_row().unwrap().is_some());
        // After the terminal eof, no more rows appear.
        assert!(decoder.next_row().unwrap().is_none());
        assert!(decoder.next_row().unwrap().is_none());
    }
}
