//! Codestream decoding, from markers to interleaved samples.
//!
//! The main header fixes the geometry and the default coding and
//! quantization parameters; tile-part headers may override them per
//! tile. Tile-part bodies are concatenated per tile and walked in
//! packet order, feeding the code-block decoder. The reconstructed
//! sub-bands then pass through dequantization, the inverse wavelet
//! transform, the inverse component transform, and the level shift.

use graven_common::byte::Reader;
use log::{debug, warn};

use crate::codestream::{
    self, CodingStyle, ComponentSize, Quantization, ReaderExt, SizeParams, WaveletTransform,
    markers,
};
use crate::dwt::{self, BandData};
use crate::error::{CodingError, DecodeError, MarkerError, Result, bail, read};
use crate::packet::{PacketReader, packet_header};
use crate::progression::{PacketIndex, packet_sequence};
use crate::tile::{Subband, Tile, TileComponent};
use crate::{Image, Params};

/// Per-component sample cap; a malformed header must not drive the
/// allocator into the ground.
const MAX_SAMPLES: u64 = 1 << 28;

/// The resolved main header.
struct Header {
    size: SizeParams,
    default_coding: CodingStyle,
    coc: Vec<Option<CodingStyle>>,
    default_quantization: Quantization,
    qcc: Vec<Option<Quantization>>,
}

impl Header {
    /// Resolve the per-component parameters for one tile, with the
    /// precedence of A.6.2: tile COC, tile COD, main COC, main COD.
    fn resolve(&self, tile: &TileState) -> (Vec<CodingStyle>, Vec<Quantization>, CodingStyle) {
        let tile_default = tile.coding.as_ref().unwrap_or(&self.default_coding);

        let coding = (0..self.size.components.len())
            .map(|c| {
                tile.coc[c]
                    .as_ref()
                    .or(tile.coding.as_ref())
                    .or(self.coc[c].as_ref())
                    .unwrap_or(&self.default_coding)
                    .clone()
            })
            .collect();
        let quantization = (0..self.size.components.len())
            .map(|c| {
                tile.qcc[c]
                    .as_ref()
                    .or(tile.quantization.as_ref())
                    .or(self.qcc[c].as_ref())
                    .unwrap_or(&self.default_quantization)
                    .clone()
            })
            .collect();

        (coding, quantization, tile_default.clone())
    }
}

/// Everything collected for one tile before it is decoded.
struct TileState {
    /// Concatenated tile-part bodies, in tile-part order.
    data: Vec<u8>,
    coding: Option<CodingStyle>,
    coc: Vec<Option<CodingStyle>>,
    quantization: Option<Quantization>,
    qcc: Vec<Option<Quantization>>,
}

impl TileState {
    fn new(components: usize) -> Self {
        Self {
            data: Vec::new(),
            coding: None,
            coc: vec![None; components],
            quantization: None,
            qcc: vec![None; components],
        }
    }
}

pub(crate) fn decode_codestream(data: &[u8], params: &Params) -> Result<Image> {
    let mut reader = Reader::new(data);
    let header = parse_main_header(&mut reader)?;

    let num_tiles = header.size.num_tiles();
    if num_tiles == 0 || num_tiles > u32::from(u16::MAX) {
        bail!(MarkerError::InvalidDimensions);
    }

    let components = header.size.components.len();
    let mut tiles: Vec<TileState> = (0..num_tiles).map(|_| TileState::new(components)).collect();
    if let Err(error) = collect_tile_parts(&mut reader, data, &header, &mut tiles) {
        if params.strict {
            return Err(error);
        }
        warn!("truncated codestream ({error}); decoding the tile-parts read so far");
    }

    let mut planes = header
        .size
        .components
        .iter()
        .map(|component| Plane::new(&header.size, component))
        .collect::<Result<Vec<_>>>()?;

    for (index, state) in tiles.iter().enumerate() {
        decode_tile(index as u32, state, &header, params, &mut planes)?;
    }

    interleave(&header.size, &planes)
}

fn parse_main_header(reader: &mut Reader<'_>) -> Result<Header> {
    if reader.read_marker()? != markers::SOC {
        bail!(MarkerError::Missing("SOC"));
    }
    if reader.read_marker()? != markers::SIZ {
        bail!(MarkerError::Missing("SIZ"));
    }
    let size = codestream::siz_marker(read!(codestream::segment(reader))?)?;

    for component in &size.components {
        if component.is_signed {
            bail!(DecodeError::Unsupported("signed components"));
        }
    }

    let components = size.components.len();
    let mut default_coding = None;
    let mut coc = vec![None; components];
    let mut default_quantization = None;
    let mut qcc = vec![None; components];

    loop {
        let marker = reader.read_marker()?;
        match marker {
            markers::SOT => break,
            markers::COD => {
                let segment = read!(codestream::segment(reader))?;
                default_coding = Some(codestream::cod_marker(segment)?);
            }
            markers::COC => {
                let segment = read!(codestream::segment(reader))?;
                let default = default_coding
                    .as_ref()
                    .ok_or(DecodeError::Marker(MarkerError::Missing("COD")))?;
                let (index, style) =
                    codestream::coc_marker(segment, components as u16, default)?;
                coc[index as usize] = Some(style);
            }
            markers::QCD => {
                let segment = read!(codestream::segment(reader))?;
                default_quantization = Some(codestream::qcd_marker(segment)?);
            }
            markers::QCC => {
                let segment = read!(codestream::segment(reader))?;
                let (index, quantization) =
                    codestream::qcc_marker(segment, components as u16)?;
                qcc[index as usize] = Some(quantization);
            }
            markers::POC => bail!(DecodeError::Unsupported("progression order changes")),
            markers::PPM => bail!(DecodeError::Unsupported("packed packet headers")),
            markers::RGN => bail!(DecodeError::Unsupported("region of interest")),
            markers::EOC => bail!(MarkerError::Missing("SOT")),
            code if markers::has_no_segment(code) => {}
            code => {
                let _ = read!(codestream::segment(reader))?;
                debug!("skipping marker 0xFF{code:02X} in the main header");
            }
        }
    }

    Ok(Header {
        default_coding: default_coding
            .ok_or(DecodeError::Marker(MarkerError::Missing("COD")))?,
        default_quantization: default_quantization
            .ok_or(DecodeError::Marker(MarkerError::Missing("QCD")))?,
        size,
        coc,
        qcc,
    })
}

/// Collect tile-part bodies. The reader stands just past an SOT marker
/// on entry and past the EOC marker on success.
fn collect_tile_parts(
    reader: &mut Reader<'_>,
    data: &[u8],
    header: &Header,
    tiles: &mut [TileState],
) -> Result<()> {
    loop {
        // Psot counts from the SOT marker itself.
        let sot_start = reader.offset() - 2;
        let part = codestream::sot_marker(read!(codestream::segment(reader))?)?;
        if part.index as usize >= tiles.len() {
            bail!(MarkerError::InvalidTileIndex);
        }

        // Tile-part header, up to SOD. Parameter markers are only legal
        // in the first tile-part of a tile.
        let state = &mut tiles[part.index as usize];
        loop {
            let marker = reader.read_marker()?;
            if marker == markers::SOD {
                break;
            }
            if markers::has_no_segment(marker) {
                continue;
            }
            let segment = read!(codestream::segment(reader))?;
            match marker {
                markers::COD if part.part_index == 0 => {
                    state.coding = Some(codestream::cod_marker(segment)?);
                }
                markers::COC if part.part_index == 0 => {
                    // Inherited fields come from the tile COD, or from
                    // the main default when the tile has none.
                    let default = state.coding.as_ref().unwrap_or(&header.default_coding);
                    let (index, style) =
                        codestream::coc_marker(segment, state.coc.len() as u16, default)?;
                    state.coc[index as usize] = Some(style);
                }
                markers::QCD if part.part_index == 0 => {
                    state.quantization = Some(codestream::qcd_marker(segment)?);
                }
                markers::QCC if part.part_index == 0 => {
                    let (index, quantization) =
                        codestream::qcc_marker(segment, state.qcc.len() as u16)?;
                    state.qcc[index as usize] = Some(quantization);
                }
                markers::PPT => bail!(DecodeError::Unsupported("packed packet headers")),
                code => debug!("skipping marker 0xFF{code:02X} in a tile-part header"),
            }
        }

        // The body runs to the end given by Psot, or to the end of the
        // codestream when Psot is zero.
        let end = if part.length == 0 {
            data.len()
        } else {
            sot_start + part.length as usize
        };
        let body_length = end
            .checked_sub(reader.offset())
            .ok_or(DecodeError::Marker(MarkerError::Malformed("SOT")))?;
        let body = read!(reader.read_bytes(body_length))?;
        tiles[part.index as usize].data.extend_from_slice(body);

        if reader.at_end() {
            warn!("codestream ends without an EOC marker");
            return Ok(());
        }
        match reader.read_marker()? {
            markers::SOT => {}
            markers::EOC => return Ok(()),
            code => bail!(MarkerError::Invalid(code)),
        }
    }
}

fn decode_tile(
    index: u32,
    state: &TileState,
    header: &Header,
    params: &Params,
    planes: &mut [Plane],
) -> Result<()> {
    let (coding, quantization, tile_coding) = header.resolve(state);
    let mut tile = Tile::new(index, &header.size, &coding, &quantization)?;
    if tile.rect.is_empty() {
        return Ok(());
    }

    let sequence = packet_sequence(&tile, tile_coding.progression, tile_coding.layers);
    let mut reader = PacketReader::new(&state.data);
    for packet in sequence {
        if let Err(error) = read_packet(&mut reader, &mut tile, packet) {
            if params.strict {
                return Err(error);
            }
            warn!("tile {index}: {error}; keeping the packets read so far");
            break;
        }
    }

    let mut pixels = Vec::with_capacity(tile.components.len());
    for (c, component) in tile.components.iter().enumerate() {
        pixels.push(reconstruct_component(
            component,
            header.size.components[c].precision,
            params,
        )?);
    }

    if tile_coding.mct {
        apply_component_transform(&tile, &mut pixels);
    }

    for (c, component) in tile.components.iter().enumerate() {
        store_component(
            &mut planes[c],
            component,
            &pixels[c],
            header.size.components[c].precision,
        );
    }

    Ok(())
}

fn read_packet(
    reader: &mut PacketReader<'_>,
    tile: &mut Tile,
    packet: PacketIndex,
) -> Result<()> {
    let component = &mut tile.components[packet.component];
    let coding = &component.coding;
    let resolution = &mut component.resolutions[packet.resolution as usize];

    let contributions = packet_header(reader, resolution, packet.precinct, packet.layer, coding)?;
    for contribution in contributions {
        let bytes = read!(reader.read_bytes(contribution.length))?;
        let block = &mut resolution.bands[contribution.band].blocks[contribution.block];
        block.data.extend_from_slice(bytes);
        block.passes += contribution.passes;
    }

    Ok(())
}

/// Decode and dequantize the code-blocks of one sub-band (E.1).
fn band_data(
    band: &Subband,
    level: u8,
    component: &TileComponent,
    precision: u8,
    params: &Params,
) -> Result<BandData> {
    let mut out = BandData::zeroed(band.rect);
    if band.rect.is_empty() {
        return Ok(out);
    }

    let reversible = component.coding.transformation == WaveletTransform::Reversible53;
    let step = component.quantization.step_size(band.band_index, level);
    let epsilon = i32::from(step.epsilon);
    let mb = i32::from(component.quantization.guard_bits) + epsilon - 1;
    if !(1..=31).contains(&mb) {
        bail!(CodingError::TooManyBitplanes);
    }

    // Formula E-3; for the reversible filter the step size is one.
    let gain = i32::from(band.kind.gain());
    let delta = if reversible {
        1.0
    } else {
        2.0_f32.powi(i32::from(precision) + gain - epsilon)
            * (1.0 + f32::from(step.mu) / 2048.0)
    };
    let correction = if reversible { 0.0 } else { 0.5 };

    let width = band.rect.width();
    for block in &band.blocks {
        if block.passes == 0 || block.rect.is_empty() {
            continue;
        }

        let decoded = crate::bitplane::decode_block(
            &block.data,
            block.rect.width(),
            block.rect.height(),
            band.kind,
            block.passes,
            block.zero_bitplanes,
            component.coding.segmentation_symbol,
        );
        let coefficients = match decoded {
            Ok(coefficients) => coefficients,
            Err(error) => {
                if params.strict {
                    return Err(error);
                }
                warn!("skipping a corrupt code-block ({error})");
                continue;
            }
        };

        let ox = block.rect.x0 - band.rect.x0;
        let oy = block.rect.y0 - band.rect.y0;
        let bw = block.rect.width();
        for (i, coefficient) in coefficients.iter().enumerate() {
            if coefficient.magnitude == 0 {
                continue;
            }

            // A truncated coefficient stands for the top bits of its
            // magnitude; scale it back up and center the uncertainty
            // interval for the irreversible filter.
            let mut value = (coefficient.magnitude as f32 + correction) * delta;
            let bits = coefficient.bits.min(31) as i32;
            if bits < mb {
                value *= 2.0_f32.powi(mb - bits);
            }
            if coefficient.negative {
                value = -value;
            }

            let x = ox + i as u32 % bw;
            let y = oy + i as u32 / bw;
            out.data[(x + y * width) as usize] = value;
        }
    }

    Ok(out)
}

/// Run one component of a tile through dequantization and the inverse
/// wavelet transform. Returns samples covering the component's rect.
fn reconstruct_component(
    component: &TileComponent,
    precision: u8,
    params: &Params,
) -> Result<Vec<f32>> {
    let mut current = band_data(
        &component.resolutions[0].bands[0],
        0,
        component,
        precision,
        params,
    )?;

    for resolution in &component.resolutions[1..] {
        let hl = band_data(&resolution.bands[0], resolution.level, component, precision, params)?;
        let lh = band_data(&resolution.bands[1], resolution.level, component, precision, params)?;
        let hh = band_data(&resolution.bands[2], resolution.level, component, precision, params)?;

        current = dwt::compose(
            component.coding.transformation,
            &current,
            &hl,
            &lh,
            &hh,
            resolution.rect,
        );
    }

    Ok(current.data)
}

fn apply_component_transform(tile: &Tile, pixels: &mut [Vec<f32>]) {
    if tile.components.len() < 3 {
        warn!("component transform flagged with fewer than three components");
        return;
    }

    let rect = tile.components[0].rect;
    if tile.components[1..3]
        .iter()
        .any(|c| c.rect.width() != rect.width() || c.rect.height() != rect.height())
    {
        warn!("component transform flagged across differently sized components");
        return;
    }

    let (first, rest) = pixels.split_at_mut(1);
    let (second, third) = rest.split_at_mut(1);
    match tile.components[0].coding.transformation {
        WaveletTransform::Reversible53 => {
            crate::mct::inverse_reversible(&mut first[0], &mut second[0], &mut third[0]);
        }
        WaveletTransform::Irreversible97 => {
            crate::mct::inverse_irreversible(&mut first[0], &mut second[0], &mut third[0]);
        }
    }
}

/// One component's samples over the whole image area.
struct Plane {
    x0: u32,
    y0: u32,
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Plane {
    fn new(size: &SizeParams, component: &ComponentSize) -> Result<Self> {
        let x0 = size.image_x0.div_ceil(u32::from(component.dx));
        let y0 = size.image_y0.div_ceil(u32::from(component.dy));
        let x1 = size.grid_width.div_ceil(u32::from(component.dx));
        let y1 = size.grid_height.div_ceil(u32::from(component.dy));

        let width = x1.saturating_sub(x0);
        let height = y1.saturating_sub(y0);
        if u64::from(width) * u64::from(height) > MAX_SAMPLES {
            bail!(MarkerError::ImageTooLarge);
        }

        Ok(Self {
            x0,
            y0,
            width,
            height,
            data: vec![0; width as usize * height as usize],
        })
    }
}

/// Level shift, clamp, and scale one tile component into its plane
/// (G.1.2).
fn store_component(plane: &mut Plane, component: &TileComponent, pixels: &[f32], precision: u8) {
    let shift = (1_u32 << (precision - 1)) as f32;
    let max = (1_u32 << precision) - 1;

    let width = component.rect.width() as usize;
    for y in 0..component.rect.height() as usize {
        for x in 0..width {
            let value = (pixels[x + y * width] + shift).round().clamp(0.0, max as f32) as u32;
            let sample = if precision >= 8 {
                (value >> (precision - 8)) as u8
            } else {
                (value << (8 - precision)) as u8
            };

            let px = (component.rect.x0 - plane.x0) as usize + x;
            let py = (component.rect.y0 - plane.y0) as usize + y;
            plane.data[px + py * plane.width as usize] = sample;
        }
    }
}

/// Replicate subsampled components onto the reference grid and
/// interleave everything into one 8-bit buffer.
fn interleave(size: &SizeParams, planes: &[Plane]) -> Result<Image> {
    let width = size.image_width();
    let height = size.image_height();
    let components = planes.len();

    let total = u64::from(width) * u64::from(height) * components as u64;
    if total > MAX_SAMPLES {
        bail!(MarkerError::ImageTooLarge);
    }

    let mut data = vec![0_u8; total as usize];
    for (c, plane) in planes.iter().enumerate() {
        if plane.width == 0 || plane.height == 0 {
            continue;
        }
        let component = &size.components[c];

        for y in 0..height {
            let gy = size.image_y0 + y;
            let sy = (gy / u32::from(component.dy))
                .saturating_sub(plane.y0)
                .min(plane.height - 1);

            for x in 0..width {
                let gx = size.image_x0 + x;
                let sx = (gx / u32::from(component.dx))
                    .saturating_sub(plane.x0)
                    .min(plane.width - 1);

                data[(y as usize * width as usize + x as usize) * components + c] =
                    plane.data[sx as usize + sy as usize * plane.width as usize];
            }
        }
    }

    Ok(Image {
        width,
        height,
        components: components as u8,
        data,
    })
}
