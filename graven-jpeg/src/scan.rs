//! Entropy-coded scan decoding (ISO/IEC 10918-1 Annex F and G).
//!
//! A scan is a bit stream in which a 0xFF byte is followed by a stuffed
//! zero; any other following byte is a marker. Four block decoding
//! procedures cover baseline scans and the DC/AC first and refinement
//! scans of progressive frames.

use crate::error::{DecodeError, FormatError};
use crate::huffman::Table;
use crate::idct::ZIGZAG;

/// Why an entropy decode stopped short of a full block.
///
/// The two marker variants are not failures: the caller either restarts
/// the parse with the line count a DNL marker supplied, or keeps the
/// blocks decoded so far when the image ends early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanFault {
    Error(DecodeError),
    /// A define-number-of-lines marker carrying the true line count.
    Dnl(u32),
    /// The end-of-image marker inside the scan data.
    Eoi,
}

impl From<DecodeError> for ScanFault {
    fn from(value: DecodeError) -> Self {
        Self::Error(value)
    }
}

impl From<FormatError> for ScanFault {
    fn from(value: FormatError) -> Self {
        Self::Error(value.into())
    }
}

pub(crate) type ScanResult<T> = core::result::Result<T, ScanFault>;

/// Bit cursor over entropy-coded data, unstuffing 0xFF 0x00 pairs and
/// surfacing markers as faults.
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    buf: u8,
    count: u8,
    parse_dnl: bool,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(data: &'a [u8], pos: usize, parse_dnl: bool) -> Self {
        Self {
            data,
            pos,
            buf: 0,
            count: 0,
            parse_dnl,
        }
    }

    /// The position of the next unread byte.
    pub(crate) fn byte_pos(&self) -> usize {
        self.pos
    }

    /// Discard buffered bits, for realignment at a restart marker.
    pub(crate) fn reset(&mut self) {
        self.buf = 0;
        self.count = 0;
    }

    /// Advance to the next marker, discarding buffered bits and any
    /// stray bytes in between. Returns the marker byte and how many
    /// bytes were skipped, without consuming the marker itself.
    pub(crate) fn find_marker(&mut self) -> Option<(u8, usize)> {
        self.reset();
        let mut skipped = 0;
        while self.pos + 1 < self.data.len() {
            if self.data[self.pos] == 0xFF && !matches!(self.data[self.pos + 1], 0x00 | 0xFF) {
                return Some((self.data[self.pos + 1], skipped));
            }
            self.pos += 1;
            skipped += 1;
        }
        None
    }

    /// Step over the two-byte marker [`find_marker`](Self::find_marker)
    /// stopped at.
    pub(crate) fn skip_marker(&mut self) {
        self.pos += 2;
    }

    fn next_byte(&mut self) -> ScanResult<u8> {
        let byte = *self.data.get(self.pos).ok_or(DecodeError::UnexpectedEof)?;
        if byte != 0xFF {
            self.pos += 1;
            return Ok(byte);
        }

        match self.data.get(self.pos + 1).copied() {
            Some(0x00) => {
                self.pos += 2;
                Ok(0xFF)
            }
            Some(0xDC) if self.parse_dnl => {
                // DNL: length (must cover the field) then the line count.
                let lines = self
                    .data
                    .get(self.pos + 4..self.pos + 6)
                    .map(|b| u32::from(u16::from_be_bytes([b[0], b[1]])))
                    .ok_or(DecodeError::UnexpectedEof)?;
                Err(ScanFault::Dnl(lines))
            }
            Some(0xD9) => Err(ScanFault::Eoi),
            Some(marker) => Err(FormatError::UnexpectedMarker(marker).into()),
            None => Err(DecodeError::UnexpectedEof.into()),
        }
    }

    pub(crate) fn read_bit(&mut self) -> ScanResult<u32> {
        if self.count == 0 {
            self.buf = self.next_byte()?;
            self.count = 8;
        }
        self.count -= 1;
        Ok(u32::from((self.buf >> self.count) & 1))
    }

    /// Read `length` raw bits, most significant first.
    pub(crate) fn receive(&mut self, length: u8) -> ScanResult<i32> {
        let mut value = 0_i32;
        for _ in 0..length {
            value = (value << 1) | self.read_bit()? as i32;
        }
        Ok(value)
    }

    /// Read a `length`-bit difference magnitude and sign-extend it
    /// (Figure F.12).
    pub(crate) fn receive_and_extend(&mut self, length: u8) -> ScanResult<i32> {
        if length == 1 {
            return Ok(if self.read_bit()? != 0 { 1 } else { -1 });
        }
        let value = self.receive(length)?;
        if value < 1 << (length - 1) {
            Ok(value + (-1 << length) + 1)
        } else {
            Ok(value)
        }
    }

    /// Decode one Huffman symbol, one code bit at a time (Figure F.16).
    pub(crate) fn decode_huffman(&mut self, table: &Table) -> ScanResult<u8> {
        let mut code = 0_i32;
        for length in 1..=16 {
            code = (code << 1) | self.read_bit()? as i32;
            if let Some(value) = table.lookup(length, code) {
                return Ok(value);
            }
        }
        Err(FormatError::InvalidHuffmanCode.into())
    }
}

/// State threaded through the block decodes of one scan: the DC
/// predictor lives per component in the caller, but the end-of-band run
/// and the AC refinement state span blocks.
pub(crate) struct ScanDecoder<'a> {
    pub(crate) reader: BitReader<'a>,
    pub(crate) spectral_start: u8,
    pub(crate) spectral_end: u8,
    /// The point transform of the scan (Al).
    pub(crate) successive: u8,
    eob_run: u32,
    ac_state: u8,
    ac_next_value: i32,
}

impl<'a> ScanDecoder<'a> {
    pub(crate) fn new(
        reader: BitReader<'a>,
        spectral_start: u8,
        spectral_end: u8,
        successive: u8,
    ) -> Self {
        Self {
            reader,
            spectral_start,
            spectral_end,
            successive,
            eob_run: 0,
            ac_state: 0,
            ac_next_value: 0,
        }
    }

    /// Reset inter-block state at a restart marker.
    pub(crate) fn restart(&mut self) {
        self.reader.reset();
        self.eob_run = 0;
        self.ac_state = 0;
    }

    fn dc_diff(&mut self, table: &Table) -> ScanResult<i32> {
        let t = self.reader.decode_huffman(table)?;
        if t == 0 {
            Ok(0)
        } else if t > 15 {
            Err(FormatError::InvalidHuffmanCode.into())
        } else {
            self.reader.receive_and_extend(t)
        }
    }

    pub(crate) fn decode_baseline(
        &mut self,
        block: &mut [i16],
        dc: &Table,
        ac: &Table,
        pred: &mut i32,
    ) -> ScanResult<()> {
        *pred += self.dc_diff(dc)?;
        block[0] = *pred as i16;

        let mut k = 1_usize;
        while k < 64 {
            let rs = self.reader.decode_huffman(ac)?;
            let s = rs & 15;
            let r = (rs >> 4) as usize;
            if s == 0 {
                if r < 15 {
                    break;
                }
                k += 16;
                continue;
            }

            k += r;
            if k > 63 {
                return Err(FormatError::InvalidBlockIndex.into());
            }
            block[ZIGZAG[k] as usize] = self.reader.receive_and_extend(s)? as i16;
            k += 1;
        }

        Ok(())
    }

    pub(crate) fn decode_dc_first(
        &mut self,
        block: &mut [i16],
        dc: &Table,
        pred: &mut i32,
    ) -> ScanResult<()> {
        *pred += self.dc_diff(dc)? << self.successive;
        block[0] = *pred as i16;
        Ok(())
    }

    pub(crate) fn decode_dc_successive(&mut self, block: &mut [i16]) -> ScanResult<()> {
        block[0] |= (self.read_bit_i16()?) << self.successive;
        Ok(())
    }

    fn read_bit_i16(&mut self) -> ScanResult<i16> {
        Ok(self.reader.read_bit()? as i16)
    }

    pub(crate) fn decode_ac_first(&mut self, block: &mut [i16], ac: &Table) -> ScanResult<()> {
        if self.eob_run > 0 {
            self.eob_run -= 1;
            return Ok(());
        }

        let mut k = self.spectral_start as usize;
        let e = self.spectral_end as usize;
        while k <= e {
            let rs = self.reader.decode_huffman(ac)?;
            let s = rs & 15;
            let r = (rs >> 4) as usize;
            if s == 0 {
                if r < 15 {
                    self.eob_run = self.reader.receive(r as u8)? as u32 + (1_u32 << r) - 1;
                    break;
                }
                k += 16;
                continue;
            }

            k += r;
            if k > 63 {
                return Err(FormatError::InvalidBlockIndex.into());
            }
            let value = self.reader.receive_and_extend(s)? * (1 << self.successive);
            block[ZIGZAG[k] as usize] = value as i16;
            k += 1;
        }

        Ok(())
    }

    pub(crate) fn decode_ac_successive(&mut self, block: &mut [i16], ac: &Table) -> ScanResult<()> {
        let mut k = self.spectral_start as usize;
        let e = self.spectral_end as usize;
        let mut r = 0_i32;

        while k <= e {
            let z = ZIGZAG[k] as usize;
            let sign: i16 = if block[z] < 0 { -1 } else { 1 };

            match self.ac_state {
                0 => {
                    let rs = self.reader.decode_huffman(ac)?;
                    let s = rs & 15;
                    r = i32::from(rs >> 4);
                    if s == 0 {
                        if r < 15 {
                            self.eob_run = self.reader.receive(r as u8)? as u32 + (1_u32 << r);
                            self.ac_state = 4;
                        } else {
                            r = 16;
                            self.ac_state = 1;
                        }
                    } else {
                        if s != 1 {
                            return Err(FormatError::InvalidHuffmanCode.into());
                        }
                        self.ac_next_value = self.reader.receive_and_extend(1)?;
                        self.ac_state = if r != 0 { 2 } else { 3 };
                    }
                    continue;
                }
                1 | 2 => {
                    // Skipping r zero coefficients; nonzero ones get a
                    // correction bit instead.
                    if block[z] != 0 {
                        block[z] += sign * (self.read_bit_i16()? << self.successive);
                    } else {
                        r -= 1;
                        if r == 0 {
                            self.ac_state = if self.ac_state == 2 { 3 } else { 0 };
                        }
                    }
                }
                3 => {
                    if block[z] != 0 {
                        block[z] += sign * (self.read_bit_i16()? << self.successive);
                    } else {
                        block[z] = (self.ac_next_value << self.successive) as i16;
                        self.ac_state = 0;
                    }
                }
                _ => {
                    // Inside an end-of-band run.
                    if block[z] != 0 {
                        block[z] += sign * (self.read_bit_i16()? << self.successive);
                    }
                }
            }
            k += 1;
        }

        if self.ac_state == 4 {
            self.eob_run -= 1;
            if self.eob_run == 0 {
                self.ac_state = 0;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::BitReader;
    use crate::error::DecodeError;
    use crate::scan::ScanFault;

    #[test]
    fn stuffed_byte_is_data() {
        let mut reader = BitReader::new(&[0xFF, 0x00, 0x80], 0, false);
        assert_eq!(reader.receive(8).unwrap(), 0xFF);
        assert_eq!(reader.read_bit().unwrap(), 1);
    }

    #[test]
    fn receive_and_extend_sign_extends() {
        // 0b0111: magnitude 7 of a 4-bit category maps to -8.
        let mut reader = BitReader::new(&[0b0111_1000], 0, false);
        assert_eq!(reader.receive_and_extend(4).unwrap(), -8);
        assert_eq!(reader.receive_and_extend(4).unwrap(), 8);
    }

    #[test]
    fn end_of_image_inside_scan_is_a_fault() {
        let mut reader = BitReader::new(&[0xFF, 0xD9], 0, false);
        assert_eq!(reader.read_bit(), Err(ScanFault::Eoi));
    }

    #[test]
    fn dnl_marker_carries_the_line_count() {
        let mut reader = BitReader::new(&[0xFF, 0xDC, 0x00, 0x04, 0x01, 0x40], 0, true);
        assert_eq!(reader.read_bit(), Err(ScanFault::Dnl(320)));
    }

    #[test]
    fn truncation_is_an_error() {
        let mut reader = BitReader::new(&[], 0, false);
        assert_eq!(
            reader.read_bit(),
            Err(ScanFault::Error(DecodeError::UnexpectedEof))
        );
    }
}
