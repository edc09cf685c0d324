//! Marker-level parsing and scan orchestration (ISO/IEC 10918-1
//! Annex B).
//!
//! The decoder walks the marker stream once, accumulating tables and
//! frame state, and decodes each scan in place into per-component
//! coefficient buffers. Sample output is assembled at the end from the
//! coefficient buffers in [`Decoder::build_image`].

use graven_common::byte::Reader;

use crate::color;
use crate::error::{DecodeError, FormatError, Result};
use crate::huffman::Table;
use crate::idct::{ZIGZAG, quantize_and_inverse};
use crate::scan::{BitReader, ScanDecoder, ScanFault, ScanResult};
use crate::{Image, Params};

/// Per-component coefficient buffers are capped at this many entries to
/// bound allocations driven by header fields.
const MAX_BLOCK_DATA: usize = 1 << 28;

/// Why a parse run stopped: a hard error, or a DNL marker announcing a
/// line count that contradicts the frame header. The caller reacts to
/// the latter by parsing again with the corrected count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Abort {
    Error(DecodeError),
    Relines(u32),
}

impl Abort {
    pub(crate) fn into_error(self) -> DecodeError {
        match self {
            Self::Error(e) => e,
            Self::Relines(_) => FormatError::InvalidDimensions.into(),
        }
    }
}

impl From<DecodeError> for Abort {
    fn from(value: DecodeError) -> Self {
        Self::Error(value)
    }
}

impl From<FormatError> for Abort {
    fn from(value: FormatError) -> Self {
        Self::Error(value.into())
    }
}

type ParseResult<T> = core::result::Result<T, Abort>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Baseline,
    DcFirst,
    DcSuccessive,
    AcFirst,
    AcSuccessive,
}

struct Component {
    id: u8,
    h: u32,
    v: u32,
    quant_id: usize,
    dc_id: usize,
    ac_id: usize,
    blocks_per_line: u32,
    blocks_per_column: u32,
    /// Width of the coefficient buffer in blocks; MCU geometry rounds
    /// it up beyond `blocks_per_line`.
    blocks_per_line_for_mcu: u32,
    block_data: Vec<i16>,
    pred: i32,
}

struct Frame {
    progressive: bool,
    scan_lines: u32,
    samples_per_line: u32,
    max_h: u32,
    max_v: u32,
    mcus_per_line: u32,
    mcus_per_column: u32,
    components: Vec<Component>,
}

pub(crate) struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    frame: Option<Frame>,
    quant: [Option<Box<[u16; 64]>>; 4],
    dc_tables: [Option<Table>; 4],
    ac_tables: [Option<Table>; 4],
    restart_interval: u32,
    adobe_transform: Option<u8>,
    scan_lines_override: Option<u32>,
    first_scan: bool,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(data: &'a [u8], scan_lines_override: Option<u32>) -> Self {
        Self {
            data,
            pos: 0,
            frame: None,
            quant: [None, None, None, None],
            dc_tables: [None, None, None, None],
            ac_tables: [None, None, None, None],
            restart_interval: 0,
            adobe_transform: None,
            scan_lines_override,
            first_scan: true,
        }
    }

    pub(crate) fn parse(&mut self) -> ParseResult<()> {
        if self.read_u16()? != 0xFFD8 {
            return Err(FormatError::MissingStartOfImage.into());
        }

        loop {
            if self.pos + 2 > self.data.len() {
                log::warn!("data ended without an end-of-image marker");
                break;
            }
            let marker = self.next_marker()?;
            match marker {
                0xD9 => break,
                0xC0 | 0xC1 => self.parse_frame(false)?,
                0xC2 => self.parse_frame(true)?,
                0xC4 => self.parse_huffman_tables()?,
                // Lossless, arithmetic, differential and hierarchical
                // frames, and arithmetic conditioning.
                0xC3 | 0xC5..=0xCF => return Err(DecodeError::Unsupported.into()),
                0xDB => self.parse_quant_tables()?,
                0xDD => self.parse_restart_interval()?,
                0xDA => self.parse_scan()?,
                0xDC => self.parse_dnl()?,
                0xFE => {
                    self.segment()?;
                }
                0xE0..=0xEF => self.parse_application(marker)?,
                // TEM and stray restart markers carry no segment.
                0x01 | 0xD0..=0xD7 => {}
                m => return Err(FormatError::UnexpectedMarker(m).into()),
            }
        }

        Ok(())
    }

    fn read_u16(&mut self) -> ParseResult<u16> {
        let bytes = self
            .data
            .get(self.pos..self.pos + 2)
            .ok_or(DecodeError::UnexpectedEof)?;
        self.pos += 2;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Read the next marker, resynchronizing over stray bytes the way a
    /// lenient reader must for real-world files.
    fn next_marker(&mut self) -> ParseResult<u8> {
        let mut skipped = 0_usize;
        while self.pos < self.data.len() {
            if self.data[self.pos] != 0xFF {
                self.pos += 1;
                skipped += 1;
                continue;
            }
            let mut p = self.pos + 1;
            while self.data.get(p) == Some(&0xFF) {
                p += 1;
            }
            match self.data.get(p) {
                Some(0x00) => {
                    skipped += p + 1 - self.pos;
                    self.pos = p + 1;
                }
                Some(&marker) => {
                    if skipped > 0 {
                        log::warn!("skipped {skipped} bytes before marker 0xff{marker:02x}");
                    }
                    self.pos = p + 1;
                    return Ok(marker);
                }
                None => break,
            }
        }
        Err(DecodeError::UnexpectedEof.into())
    }

    /// Read a marker segment: a big-endian length that counts itself,
    /// then the body.
    fn segment(&mut self) -> ParseResult<&'a [u8]> {
        let length = self.read_u16()? as usize;
        if length < 2 {
            return Err(FormatError::MalformedSegment.into());
        }
        let body = self
            .data
            .get(self.pos..self.pos + length - 2)
            .ok_or(DecodeError::UnexpectedEof)?;
        self.pos += length - 2;
        Ok(body)
    }

    fn parse_quant_tables(&mut self) -> ParseResult<()> {
        let mut reader = Reader::new(self.segment()?);
        while !reader.at_end() {
            let pq_tq = reader.read_byte().ok_or(DecodeError::UnexpectedEof)?;
            let precision = pq_tq >> 4;
            let id = (pq_tq & 15) as usize;
            if id >= 4 {
                return Err(FormatError::InvalidTableId.into());
            }
            if precision > 1 {
                return Err(FormatError::MalformedSegment.into());
            }

            let mut table = Box::new([0_u16; 64]);
            for &z in &ZIGZAG {
                let value = if precision == 1 {
                    reader.read_u16()
                } else {
                    reader.read_byte().map(u16::from)
                };
                table[z as usize] = value.ok_or(DecodeError::UnexpectedEof)?;
            }
            self.quant[id] = Some(table);
        }
        Ok(())
    }

    fn parse_huffman_tables(&mut self) -> ParseResult<()> {
        let mut reader = Reader::new(self.segment()?);
        while !reader.at_end() {
            let tc_th = reader.read_byte().ok_or(DecodeError::UnexpectedEof)?;
            let class = tc_th >> 4;
            let id = (tc_th & 15) as usize;
            if class > 1 || id >= 4 {
                return Err(FormatError::InvalidTableId.into());
            }

            let mut bits = [0_u8; 16];
            bits.copy_from_slice(reader.read_bytes(16).ok_or(DecodeError::UnexpectedEof)?);
            let total: usize = bits.iter().map(|&n| n as usize).sum();
            let values = reader
                .read_bytes(total)
                .ok_or(DecodeError::UnexpectedEof)?
                .to_vec();

            let table = Table::build(&bits, values)?;
            if class == 0 {
                self.dc_tables[id] = Some(table);
            } else {
                self.ac_tables[id] = Some(table);
            }
        }
        Ok(())
    }

    fn parse_restart_interval(&mut self) -> ParseResult<()> {
        let mut reader = Reader::new(self.segment()?);
        self.restart_interval = reader
            .read_u16()
            .ok_or(DecodeError::UnexpectedEof)?
            .into();
        Ok(())
    }

    fn parse_application(&mut self, marker: u8) -> ParseResult<()> {
        let body = self.segment()?;
        if marker == 0xEE && body.len() >= 12 && body.starts_with(b"Adobe") {
            self.adobe_transform = Some(body[11]);
            log::debug!("Adobe segment with color transform {}", body[11]);
        } else if marker == 0xE0 && body.starts_with(b"JFIF\0") {
            log::debug!("JFIF segment, version {}.{}", body[5], body[6]);
        }
        Ok(())
    }

    /// A DNL segment after a completed scan. If its line count
    /// contradicts the frame, the whole image must be parsed again.
    fn parse_dnl(&mut self) -> ParseResult<()> {
        let mut reader = Reader::new(self.segment()?);
        let lines: u32 = reader
            .read_u16()
            .ok_or(DecodeError::UnexpectedEof)?
            .into();
        if let Some(frame) = &self.frame {
            if lines > 0 && lines != frame.scan_lines {
                return Err(Abort::Relines(lines));
            }
        }
        Ok(())
    }

    fn parse_frame(&mut self, progressive: bool) -> ParseResult<()> {
        if self.frame.is_some() {
            // A second frame means hierarchical coding.
            return Err(DecodeError::Unsupported.into());
        }

        let mut reader = Reader::new(self.segment()?);
        let precision = reader.read_byte().ok_or(DecodeError::UnexpectedEof)?;
        if precision != 8 {
            return Err(DecodeError::Unsupported.into());
        }

        let mut scan_lines: u32 = reader
            .read_u16()
            .ok_or(DecodeError::UnexpectedEof)?
            .into();
        let samples_per_line: u32 = reader
            .read_u16()
            .ok_or(DecodeError::UnexpectedEof)?
            .into();
        let count = reader.read_byte().ok_or(DecodeError::UnexpectedEof)?;
        if samples_per_line == 0 || count == 0 || count > 4 {
            return Err(FormatError::InvalidDimensions.into());
        }
        if let Some(lines) = self.scan_lines_override {
            scan_lines = lines;
        }

        let mut components = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = reader.read_byte().ok_or(DecodeError::UnexpectedEof)?;
            let hv = reader.read_byte().ok_or(DecodeError::UnexpectedEof)?;
            let h = u32::from(hv >> 4);
            let v = u32::from(hv & 15);
            if !(1..=4).contains(&h) || !(1..=4).contains(&v) {
                return Err(FormatError::InvalidSamplingFactor.into());
            }
            let quant_id = reader.read_byte().ok_or(DecodeError::UnexpectedEof)? as usize;
            if quant_id >= 4 {
                return Err(FormatError::InvalidTableId.into());
            }
            components.push(Component {
                id,
                h,
                v,
                quant_id,
                dc_id: 0,
                ac_id: 0,
                blocks_per_line: 0,
                blocks_per_column: 0,
                blocks_per_line_for_mcu: 0,
                block_data: Vec::new(),
                pred: 0,
            });
        }

        let max_h = components.iter().map(|c| c.h).max().unwrap_or(1);
        let max_v = components.iter().map(|c| c.v).max().unwrap_or(1);

        if scan_lines == 0 {
            // The height arrives in a DNL marker after the first scan.
            // Decode against a bounded provisional height until then.
            scan_lines = ((1_u32 << 26) / samples_per_line).clamp(8 * max_v, 0xFFFF);
            log::debug!("frame height unknown, decoding provisionally with {scan_lines} lines");
        }

        let mcus_per_line = samples_per_line.div_ceil(8 * max_h);
        let mcus_per_column = scan_lines.div_ceil(8 * max_v);

        for c in &mut components {
            c.blocks_per_line = (samples_per_line * c.h).div_ceil(8 * max_h);
            c.blocks_per_column = (scan_lines * c.v).div_ceil(8 * max_v);
            c.blocks_per_line_for_mcu = mcus_per_line * c.h;
            let blocks_per_column_for_mcu = mcus_per_column * c.v;

            let size = 64_usize
                .checked_mul(c.blocks_per_line_for_mcu as usize)
                .and_then(|n| n.checked_mul(blocks_per_column_for_mcu as usize))
                .filter(|&n| n <= MAX_BLOCK_DATA)
                .ok_or(FormatError::InvalidDimensions)?;
            c.block_data = vec![0; size];
        }

        self.frame = Some(Frame {
            progressive,
            scan_lines,
            samples_per_line,
            max_h,
            max_v,
            mcus_per_line,
            mcus_per_column,
            components,
        });
        Ok(())
    }

    fn parse_scan(&mut self) -> ParseResult<()> {
        let mut reader = Reader::new(self.segment()?);
        let frame = self.frame.as_mut().ok_or(FormatError::MissingFrame)?;

        let count = reader.read_byte().ok_or(DecodeError::UnexpectedEof)? as usize;
        if count == 0 || count > 4 {
            return Err(FormatError::InvalidScanHeader.into());
        }

        let mut indices = Vec::with_capacity(count);
        for _ in 0..count {
            let cs = reader.read_byte().ok_or(DecodeError::UnexpectedEof)?;
            let index = frame
                .components
                .iter()
                .position(|c| c.id == cs)
                .ok_or(FormatError::UnknownComponent)?;
            let td_ta = reader.read_byte().ok_or(DecodeError::UnexpectedEof)?;
            let dc = (td_ta >> 4) as usize;
            let ac = (td_ta & 15) as usize;
            if dc >= 4 || ac >= 4 {
                return Err(FormatError::InvalidTableId.into());
            }
            frame.components[index].dc_id = dc;
            frame.components[index].ac_id = ac;
            indices.push(index);
        }

        let mut ss = reader.read_byte().ok_or(DecodeError::UnexpectedEof)?;
        let mut se = reader.read_byte().ok_or(DecodeError::UnexpectedEof)?;
        let ah_al = reader.read_byte().ok_or(DecodeError::UnexpectedEof)?;
        let mut ah = ah_al >> 4;
        let mut al = ah_al & 15;

        if frame.progressive {
            if se > 63 || se < ss || (ss == 0 && se != 0) || ah > 13 || al > 13 {
                return Err(FormatError::InvalidScanHeader.into());
            }
            if ss != 0 && indices.len() != 1 {
                return Err(FormatError::InvalidScanHeader.into());
            }
        } else if ss != 0 || se != 63 || ah != 0 || al != 0 {
            log::warn!("ignoring nonstandard spectral parameters in a baseline scan");
            (ss, se, ah, al) = (0, 63, 0, 0);
        }

        self.decode_entropy(&indices, ss, se, ah, al)
    }

    fn decode_entropy(
        &mut self,
        indices: &[usize],
        ss: u8,
        se: u8,
        ah: u8,
        al: u8,
    ) -> ParseResult<()> {
        let parse_dnl = self.first_scan;
        self.first_scan = false;
        let restart_interval = self.restart_interval as usize;
        let data = self.data;

        let frame = self.frame.as_mut().ok_or(FormatError::MissingFrame)?;
        let kind = if !frame.progressive {
            BlockKind::Baseline
        } else if ss == 0 {
            if ah == 0 {
                BlockKind::DcFirst
            } else {
                BlockKind::DcSuccessive
            }
        } else if ah == 0 {
            BlockKind::AcFirst
        } else {
            BlockKind::AcSuccessive
        };

        let mut tables = Vec::with_capacity(indices.len());
        for &i in indices {
            let c = &mut frame.components[i];
            c.pred = 0;
            let dc = self.dc_tables[c.dc_id].as_ref();
            let ac = self.ac_tables[c.ac_id].as_ref();
            let missing = match kind {
                BlockKind::Baseline => dc.is_none() || ac.is_none(),
                BlockKind::DcFirst => dc.is_none(),
                BlockKind::DcSuccessive => false,
                BlockKind::AcFirst | BlockKind::AcSuccessive => ac.is_none(),
            };
            if missing {
                return Err(FormatError::MissingHuffmanTable.into());
            }
            tables.push((dc, ac));
        }

        let single = indices.len() == 1;
        let mcu_expected = if single {
            let c = &frame.components[indices[0]];
            c.blocks_per_line as usize * c.blocks_per_column as usize
        } else {
            frame.mcus_per_line as usize * frame.mcus_per_column as usize
        };

        let mut dec = ScanDecoder::new(BitReader::new(data, self.pos, parse_dnl), ss, se, al);
        let mut mcu = 0_usize;
        let mut fault = None;

        'outer: while mcu < mcu_expected {
            let target = if restart_interval > 0 {
                (mcu + restart_interval).min(mcu_expected)
            } else {
                mcu_expected
            };

            while mcu < target {
                if let Err(f) = decode_one_mcu(&mut dec, frame, indices, &tables, kind, mcu, single)
                {
                    fault = Some(f);
                    break 'outer;
                }
                mcu += 1;
            }
            if mcu == mcu_expected {
                break;
            }

            // Between restart intervals an RSTn marker realigns the
            // stream and resets all predictors.
            match dec.reader.find_marker() {
                Some((marker, skipped)) if (0xD0..=0xD7).contains(&marker) => {
                    if skipped > 0 {
                        log::warn!("skipped {skipped} bytes before a restart marker");
                    }
                    dec.reader.skip_marker();
                    dec.restart();
                    for &i in indices {
                        frame.components[i].pred = 0;
                    }
                }
                _ => {
                    log::warn!("missing restart marker, scan ends after {mcu} of {mcu_expected} units");
                    break;
                }
            }
        }

        match fault {
            None => {}
            Some(ScanFault::Eoi) => {
                log::warn!("end-of-image inside scan data after {mcu} of {mcu_expected} units");
            }
            Some(ScanFault::Dnl(lines)) => {
                if lines != frame.scan_lines {
                    return Err(Abort::Relines(lines));
                }
            }
            Some(ScanFault::Error(e)) => return Err(Abort::Error(e)),
        }

        if let Some((_, skipped)) = dec.reader.find_marker() {
            if skipped > 0 {
                log::warn!("skipped {skipped} bytes of trailing scan data");
            }
        }
        self.pos = dec.reader.byte_pos();
        Ok(())
    }

    pub(crate) fn build_image(&self, params: &Params) -> Result<Image> {
        let frame = self.frame.as_ref().ok_or(FormatError::MissingFrame)?;
        let width = frame.samples_per_line as usize;
        let height = frame.scan_lines as usize;
        let n = frame.components.len();

        let mut planes = Vec::with_capacity(n);
        for c in &frame.components {
            let quant = self.quant[c.quant_id]
                .as_ref()
                .ok_or(FormatError::MissingQuantizationTable)?;
            let stride = c.blocks_per_line as usize * 8;
            let rows = c.blocks_per_column as usize * 8;
            let mut plane = vec![0_u8; stride * rows];

            for block_row in 0..c.blocks_per_column as usize {
                for block_col in 0..c.blocks_per_line as usize {
                    let offset = 64 * (block_row * c.blocks_per_line_for_mcu as usize + block_col);
                    let out = block_row * 8 * stride + block_col * 8;
                    quantize_and_inverse(
                        &c.block_data[offset..offset + 64],
                        quant,
                        &mut plane[out..],
                        stride,
                    );
                }
            }
            planes.push(plane);
        }

        // Nearest-neighbor upsampling straight into the interleaved
        // output.
        let mut data = vec![0_u8; width * height * n];
        for (i, plane) in planes.iter().enumerate() {
            let c = &frame.components[i];
            let stride = c.blocks_per_line as usize * 8;
            for y in 0..height {
                let cy = y * c.v as usize / frame.max_v as usize;
                let src = &plane[cy * stride..];
                let dst = y * width * n;
                for x in 0..width {
                    let cx = x * c.h as usize / frame.max_h as usize;
                    data[dst + x * n + i] = src[cx];
                }
            }
        }

        let transform = match params.color_transform {
            Some(t) => t,
            None => match n {
                3 => match self.adobe_transform {
                    Some(t) => t != 0,
                    // Components explicitly named R, G, B are already
                    // device color.
                    None => !(frame.components[0].id == b'R'
                        && frame.components[1].id == b'G'
                        && frame.components[2].id == b'B'),
                },
                4 => self.adobe_transform == Some(2),
                _ => false,
            },
        };
        if transform {
            match n {
                3 => color::ycc_to_rgb(&mut data),
                4 => color::ycck_to_cmyk(&mut data),
                _ => {}
            }
        }

        let mut components = n as u8;
        if params.force_rgb {
            match n {
                1 => {
                    color::gray_to_rgb(&mut data);
                    components = 3;
                }
                4 => {
                    color::cmyk_to_rgb(&mut data);
                    components = 3;
                }
                _ => {}
            }
        }

        Ok(Image {
            width: frame.samples_per_line,
            height: frame.scan_lines,
            components,
            data,
        })
    }
}

fn decode_one_mcu(
    dec: &mut ScanDecoder<'_>,
    frame: &mut Frame,
    indices: &[usize],
    tables: &[(Option<&Table>, Option<&Table>)],
    kind: BlockKind,
    mcu: usize,
    single: bool,
) -> ScanResult<()> {
    if single {
        let c = &mut frame.components[indices[0]];
        let (dc, ac) = tables[0];
        let row = mcu / c.blocks_per_line as usize;
        let col = mcu % c.blocks_per_line as usize;
        return decode_block(dec, c, kind, row, col, dc, ac);
    }

    let mcus_per_line = frame.mcus_per_line as usize;
    let mcu_row = mcu / mcus_per_line;
    let mcu_col = mcu % mcus_per_line;
    for (&i, &(dc, ac)) in indices.iter().zip(tables) {
        let c = &mut frame.components[i];
        for v in 0..c.v as usize {
            for h in 0..c.h as usize {
                let row = mcu_row * c.v as usize + v;
                let col = mcu_col * c.h as usize + h;
                decode_block(dec, c, kind, row, col, dc, ac)?;
            }
        }
    }
    Ok(())
}

fn decode_block(
    dec: &mut ScanDecoder<'_>,
    c: &mut Component,
    kind: BlockKind,
    row: usize,
    col: usize,
    dc: Option<&Table>,
    ac: Option<&Table>,
) -> ScanResult<()> {
    let offset = 64 * (row * c.blocks_per_line_for_mcu as usize + col);
    let Component {
        block_data, pred, ..
    } = c;
    let block = block_data
        .get_mut(offset..offset + 64)
        .ok_or(FormatError::InvalidBlockIndex)?;

    match kind {
        BlockKind::Baseline => dec.decode_baseline(
            block,
            dc.ok_or(FormatError::MissingHuffmanTable)?,
            ac.ok_or(FormatError::MissingHuffmanTable)?,
            pred,
        ),
        BlockKind::DcFirst => {
            dec.decode_dc_first(block, dc.ok_or(FormatError::MissingHuffmanTable)?, pred)
        }
        BlockKind::DcSuccessive => dec.decode_dc_successive(block),
        BlockKind::AcFirst => {
            dec.decode_ac_first(block, ac.ok_or(FormatError::MissingHuffmanTable)?)
        }
        BlockKind::AcSuccessive => {
            dec.decode_ac_successive(block, ac.ok_or(FormatError::MissingHuffmanTable)?)
        }
    }
}
