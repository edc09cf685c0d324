//! Codestream marker segments (ITU-T T.800 Annex A).
//!
//! The main header runs from SOC to the first SOT and fixes the image
//! geometry (SIZ), the default coding style (COD, overridden per
//! component by COC) and the quantization parameters (QCD/QCC).
//! Tile-part headers may override the coding and quantization defaults
//! for a single tile.

use graven_common::byte::Reader;

use crate::error::{MarkerError, Result, bail, read};

/// Marker codes (Table A.2). The leading 0xFF byte is implied.
pub(crate) mod markers {
    /// Start of codestream.
    pub(crate) const SOC: u8 = 0x4F;
    /// Image and tile size.
    pub(crate) const SIZ: u8 = 0x51;
    /// Coding style default.
    pub(crate) const COD: u8 = 0x52;
    /// Coding style component.
    pub(crate) const COC: u8 = 0x53;
    /// Tile-part lengths.
    pub(crate) const TLM: u8 = 0x55;
    /// Packet length, main header.
    pub(crate) const PLM: u8 = 0x57;
    /// Packet length, tile-part header.
    pub(crate) const PLT: u8 = 0x58;
    /// Quantization default.
    pub(crate) const QCD: u8 = 0x5C;
    /// Quantization component.
    pub(crate) const QCC: u8 = 0x5D;
    /// Region of interest.
    pub(crate) const RGN: u8 = 0x5E;
    /// Progression order change.
    pub(crate) const POC: u8 = 0x5F;
    /// Packed packet headers, main header.
    pub(crate) const PPM: u8 = 0x60;
    /// Packed packet headers, tile-part header.
    pub(crate) const PPT: u8 = 0x61;
    /// Component registration.
    pub(crate) const CRG: u8 = 0x63;
    /// Comment.
    pub(crate) const COM: u8 = 0x64;
    /// Start of tile-part.
    pub(crate) const SOT: u8 = 0x90;
    /// Start of packet.
    pub(crate) const SOP: u8 = 0x91;
    /// End of packet header.
    pub(crate) const EPH: u8 = 0x92;
    /// Start of data.
    pub(crate) const SOD: u8 = 0x93;
    /// End of codestream.
    pub(crate) const EOC: u8 = 0xD9;

    /// Markers 0xFF30 through 0xFF3F carry no segment.
    pub(crate) fn has_no_segment(code: u8) -> bool {
        (0x30..=0x3F).contains(&code)
    }
}

/// Marker reads over the plain byte reader.
pub(crate) trait ReaderExt {
    fn read_marker(&mut self) -> Result<u8>;
}

impl ReaderExt for Reader<'_> {
    fn read_marker(&mut self) -> Result<u8> {
        let prefix = read!(self.read_byte())?;
        if prefix != 0xFF {
            bail!(MarkerError::Invalid(prefix));
        }

        read!(self.read_byte())
    }
}

/// Read a length-prefixed marker segment body. The length field counts
/// itself but not the marker.
pub(crate) fn segment<'a>(reader: &mut Reader<'a>) -> Option<&'a [u8]> {
    let length = reader.read_u16()?;
    reader.read_bytes((length as usize).checked_sub(2)?)
}

/// Per-component fields of the SIZ marker (Ssiz, XRsiz, YRsiz).
#[derive(Debug, Clone, Copy)]
pub(crate) struct ComponentSize {
    /// Bits per sample, 1 to 38 on the wire; this decoder caps at 16.
    pub(crate) precision: u8,
    pub(crate) is_signed: bool,
    /// Horizontal subsampling with respect to the reference grid.
    pub(crate) dx: u8,
    /// Vertical subsampling with respect to the reference grid.
    pub(crate) dy: u8,
}

/// Image and tile geometry from the SIZ marker (A.5.1).
#[derive(Debug, Clone)]
pub(crate) struct SizeParams {
    /// Width of the reference grid (Xsiz).
    pub(crate) grid_width: u32,
    /// Height of the reference grid (Ysiz).
    pub(crate) grid_height: u32,
    /// Horizontal offset to the image area (XOsiz).
    pub(crate) image_x0: u32,
    /// Vertical offset to the image area (YOsiz).
    pub(crate) image_y0: u32,
    /// Width of one reference tile (XTsiz).
    pub(crate) tile_width: u32,
    /// Height of one reference tile (YTsiz).
    pub(crate) tile_height: u32,
    /// Horizontal offset to the first tile (XTOsiz).
    pub(crate) tile_x0: u32,
    /// Vertical offset to the first tile (YTOsiz).
    pub(crate) tile_y0: u32,
    pub(crate) components: Vec<ComponentSize>,
}

impl SizeParams {
    /// The number of tiles in the x direction (B-5).
    pub(crate) fn num_x_tiles(&self) -> u32 {
        (self.grid_width - self.tile_x0).div_ceil(self.tile_width)
    }

    /// The number of tiles in the y direction (B-5).
    pub(crate) fn num_y_tiles(&self) -> u32 {
        (self.grid_height - self.tile_y0).div_ceil(self.tile_height)
    }

    pub(crate) fn num_tiles(&self) -> u32 {
        self.num_x_tiles() * self.num_y_tiles()
    }

    /// The image area width in reference grid points.
    pub(crate) fn image_width(&self) -> u32 {
        self.grid_width - self.image_x0
    }

    /// The image area height in reference grid points.
    pub(crate) fn image_height(&self) -> u32 {
        self.grid_height - self.image_y0
    }
}

pub(crate) fn siz_marker(data: &[u8]) -> Result<SizeParams> {
    let size = read!(siz_marker_inner(data))?;

    if size.grid_width == 0
        || size.grid_height == 0
        || size.tile_width == 0
        || size.tile_height == 0
        || size.image_x0 >= size.grid_width
        || size.image_y0 >= size.grid_height
        || size.components.is_empty()
    {
        bail!(MarkerError::InvalidDimensions);
    }

    // The tile offsets may not exceed the image area offsets (B-3), and
    // the first tile must overlap the image area (B-4).
    if size.tile_x0 > size.image_x0
        || size.tile_y0 > size.image_y0
        || size.tile_x0 as u64 + size.tile_width as u64 <= size.image_x0 as u64
        || size.tile_y0 as u64 + size.tile_height as u64 <= size.image_y0 as u64
    {
        bail!(MarkerError::InvalidDimensions);
    }

    for component in &size.components {
        if component.dx == 0 || component.dy == 0 {
            bail!(MarkerError::InvalidDimensions);
        }
        if component.precision > 16 {
            bail!(crate::error::DecodeError::Unsupported(
                "sample precision above 16 bits",
            ));
        }
    }

    Ok(size)
}

fn siz_marker_inner(data: &[u8]) -> Option<SizeParams> {
    let mut reader = Reader::new(data);

    // Decoder capabilities (Rsiz).
    let _ = reader.read_u16()?;

    let grid_width = reader.read_u32()?;
    let grid_height = reader.read_u32()?;
    let image_x0 = reader.read_u32()?;
    let image_y0 = reader.read_u32()?;
    let tile_width = reader.read_u32()?;
    let tile_height = reader.read_u32()?;
    let tile_x0 = reader.read_u32()?;
    let tile_y0 = reader.read_u32()?;
    let csiz = reader.read_u16()?;

    let mut components = Vec::with_capacity(csiz as usize);
    for _ in 0..csiz {
        let ssiz = reader.read_byte()?;
        let dx = reader.read_byte()?;
        let dy = reader.read_byte()?;

        components.push(ComponentSize {
            precision: (ssiz & 0x7F) + 1,
            is_signed: ssiz & 0x80 != 0,
            dx,
            dy,
        });
    }

    Some(SizeParams {
        grid_width,
        grid_height,
        image_x0,
        image_y0,
        tile_width,
        tile_height,
        tile_x0,
        tile_y0,
        components,
    })
}

/// Progression order (Table A.16).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProgressionOrder {
    /// Layer-resolution-component-position.
    Lrcp,
    /// Resolution-layer-component-position.
    Rlcp,
    /// Resolution-position-component-layer.
    Rpcl,
    /// Position-component-resolution-layer.
    Pcrl,
    /// Component-position-resolution-layer.
    Cprl,
}

impl ProgressionOrder {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Lrcp),
            1 => Ok(Self::Rlcp),
            2 => Ok(Self::Rpcl),
            3 => Ok(Self::Pcrl),
            4 => Ok(Self::Cprl),
            _ => Err(MarkerError::InvalidProgressionOrder.into()),
        }
    }
}

/// Wavelet transformation (Table A.20).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaveletTransform {
    /// The 9-7 irreversible filter.
    Irreversible97,
    /// The 5-3 reversible integer filter.
    Reversible53,
}

impl WaveletTransform {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Irreversible97),
            1 => Ok(Self::Reversible53),
            _ => Err(MarkerError::InvalidTransformation.into()),
        }
    }
}

/// Resolved coding style for one component (A.6.1 and A.6.2).
#[derive(Debug, Clone)]
pub(crate) struct CodingStyle {
    pub(crate) sop_markers: bool,
    pub(crate) eph_markers: bool,
    pub(crate) progression: ProgressionOrder,
    pub(crate) layers: u16,
    pub(crate) mct: bool,
    pub(crate) decomposition_levels: u8,
    /// Code-block width exponent, already offset by 2.
    pub(crate) xcb: u8,
    /// Code-block height exponent, already offset by 2.
    pub(crate) ycb: u8,
    pub(crate) segmentation_symbol: bool,
    pub(crate) transformation: WaveletTransform,
    /// One packed PPx/PPy byte per resolution level.
    pub(crate) precinct_sizes: Vec<u8>,
}

impl CodingStyle {
    /// The precinct width exponent at the given resolution level.
    pub(crate) fn ppx(&self, resolution: u8) -> u8 {
        self.precinct_sizes
            .get(resolution as usize)
            .map_or(15, |packed| packed & 0x0F)
    }

    /// The precinct height exponent at the given resolution level.
    pub(crate) fn ppy(&self, resolution: u8) -> u8 {
        self.precinct_sizes
            .get(resolution as usize)
            .map_or(15, |packed| packed >> 4)
    }
}

/// The SPcod/SPcoc parameter block shared by COD and COC.
fn coding_style_parameters(
    reader: &mut Reader<'_>,
    style: &mut CodingStyle,
    has_precincts: bool,
) -> Result<()> {
    let decomposition_levels = read!(reader.read_byte())?;
    if decomposition_levels > 32 {
        bail!(MarkerError::Malformed("COD"));
    }

    let xcb = (read!(reader.read_byte())? & 0x0F) + 2;
    let ycb = (read!(reader.read_byte())? & 0x0F) + 2;
    if xcb > 10 || ycb > 10 || xcb + ycb > 12 {
        bail!(MarkerError::Malformed("COD"));
    }

    let block_style = read!(reader.read_byte())?;
    if block_style & 0x01 != 0 {
        bail!(crate::error::DecodeError::Unsupported(
            "selective arithmetic coding bypass",
        ));
    }
    if block_style & 0x02 != 0 {
        bail!(crate::error::DecodeError::Unsupported(
            "context probability reset on coding pass boundaries",
        ));
    }
    if block_style & 0x04 != 0 {
        bail!(crate::error::DecodeError::Unsupported(
            "termination on each coding pass",
        ));
    }
    if block_style & 0x08 != 0 {
        bail!(crate::error::DecodeError::Unsupported(
            "vertically causal context",
        ));
    }
    if block_style & 0x10 != 0 {
        bail!(crate::error::DecodeError::Unsupported(
            "predictable termination",
        ));
    }

    let transformation = WaveletTransform::from_u8(read!(reader.read_byte())?)?;

    let mut precinct_sizes = Vec::new();
    if has_precincts {
        for _ in 0..=decomposition_levels {
            precinct_sizes.push(read!(reader.read_byte())?);
        }
    }

    style.decomposition_levels = decomposition_levels;
    style.xcb = xcb;
    style.ycb = ycb;
    style.segmentation_symbol = block_style & 0x20 != 0;
    style.transformation = transformation;
    style.precinct_sizes = precinct_sizes;

    Ok(())
}

/// COD marker (A.6.1).
pub(crate) fn cod_marker(data: &[u8]) -> Result<CodingStyle> {
    let mut reader = Reader::new(data);

    let scod = read!(reader.read_byte())?;
    let progression = ProgressionOrder::from_u8(read!(reader.read_byte())?)?;
    let layers = read!(reader.read_u16())?;
    if layers == 0 {
        bail!(MarkerError::Malformed("COD"));
    }
    let mct = read!(reader.read_byte())? != 0;

    let mut style = CodingStyle {
        sop_markers: scod & 0x02 != 0,
        eph_markers: scod & 0x04 != 0,
        progression,
        layers,
        mct,
        decomposition_levels: 0,
        xcb: 0,
        ycb: 0,
        segmentation_symbol: false,
        transformation: WaveletTransform::Reversible53,
        precinct_sizes: Vec::new(),
    };
    coding_style_parameters(&mut reader, &mut style, scod & 0x01 != 0)?;

    Ok(style)
}

/// COC marker (A.6.2). Returns the component index and the coding
/// style, which inherits the progression, layer count, and transform
/// flag from the given default.
pub(crate) fn coc_marker(
    data: &[u8],
    num_components: u16,
    default: &CodingStyle,
) -> Result<(u16, CodingStyle)> {
    let mut reader = Reader::new(data);

    let index = if num_components < 257 {
        u16::from(read!(reader.read_byte())?)
    } else {
        read!(reader.read_u16())?
    };
    if index >= num_components {
        bail!(MarkerError::InvalidComponentIndex);
    }

    let scoc = read!(reader.read_byte())?;
    let mut style = default.clone();
    coding_style_parameters(&mut reader, &mut style, scoc & 0x01 != 0)?;

    Ok((index, style))
}

/// Quantization style (Table A.28).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QuantizationStyle {
    /// No quantization; step sizes carry exponents only.
    None,
    /// One step size, derived for every sub-band (E-5).
    ScalarDerived,
    /// One step size signalled per sub-band.
    ScalarExpounded,
}

/// One quantization step size (Table A.29).
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct StepSize {
    pub(crate) epsilon: u8,
    pub(crate) mu: u16,
}

/// Quantization parameters for one component (A.6.4 and A.6.5).
#[derive(Debug, Clone)]
pub(crate) struct Quantization {
    pub(crate) style: QuantizationStyle,
    pub(crate) guard_bits: u8,
    pub(crate) step_sizes: Vec<StepSize>,
}

impl Quantization {
    /// The step size for a sub-band, by its index in the codestream
    /// band order: 0 for LL, then HL, LH, HH per decomposition.
    pub(crate) fn step_size(&self, band_index: usize, resolution: u8) -> StepSize {
        match self.style {
            QuantizationStyle::ScalarDerived => {
                let base = self.step_sizes[0];
                // Formula E-5: derived exponents shrink with the level.
                let epsilon = (i16::from(base.epsilon)
                    + if resolution > 0 {
                        1 - i16::from(resolution)
                    } else {
                        0
                    })
                .clamp(0, 31) as u8;
                StepSize {
                    epsilon,
                    mu: base.mu,
                }
            }
            _ => self
                .step_sizes
                .get(band_index)
                .copied()
                .unwrap_or_default(),
        }
    }
}

fn quantization_parameters(data: &[u8], skip: usize) -> Result<Quantization> {
    let mut reader = Reader::new(data);
    read!(reader.skip(skip))?;

    let sqcd = read!(reader.read_byte())?;
    let guard_bits = sqcd >> 5;

    let style = match sqcd & 0x1F {
        0 => QuantizationStyle::None,
        1 => QuantizationStyle::ScalarDerived,
        2 => QuantizationStyle::ScalarExpounded,
        _ => bail!(MarkerError::InvalidQuantizationStyle),
    };

    let mut step_sizes = Vec::new();
    match style {
        QuantizationStyle::None => {
            while let Some(byte) = reader.read_byte() {
                step_sizes.push(StepSize {
                    epsilon: byte >> 3,
                    mu: 0,
                });
            }
        }
        QuantizationStyle::ScalarDerived | QuantizationStyle::ScalarExpounded => {
            while let Some(value) = reader.read_u16() {
                step_sizes.push(StepSize {
                    epsilon: (value >> 11) as u8,
                    mu: value & 0x07FF,
                });
            }
        }
    }

    if step_sizes.is_empty() {
        bail!(MarkerError::Malformed("QCD"));
    }

    Ok(Quantization {
        style,
        guard_bits,
        step_sizes,
    })
}

/// QCD marker (A.6.4).
pub(crate) fn qcd_marker(data: &[u8]) -> Result<Quantization> {
    quantization_parameters(data, 0)
}

/// QCC marker (A.6.5).
pub(crate) fn qcc_marker(data: &[u8], num_components: u16) -> Result<(u16, Quantization)> {
    let mut reader = Reader::new(data);

    let (index, skip) = if num_components < 257 {
        (u16::from(read!(reader.read_byte())?), 1)
    } else {
        (read!(reader.read_u16())?, 2)
    };
    if index >= num_components {
        bail!(MarkerError::InvalidComponentIndex);
    }

    Ok((index, quantization_parameters(data, skip)?))
}

/// A start-of-tile-part header (A.4.2).
#[derive(Debug, Clone, Copy)]
pub(crate) struct TilePart {
    /// Tile index (Isot).
    pub(crate) index: u16,
    /// Length of the tile-part from the SOT marker (Psot), or zero when
    /// the tile-part extends to the end of the codestream.
    pub(crate) length: u32,
    /// Tile-part index within the tile (TPsot).
    pub(crate) part_index: u8,
}

pub(crate) fn sot_marker(data: &[u8]) -> Result<TilePart> {
    let mut reader = Reader::new(data);

    let index = read!(reader.read_u16())?;
    let length = read!(reader.read_u32())?;
    let part_index = read!(reader.read_byte())?;
    // TNsot; unknown counts are signalled as zero and are fine either way.
    let _ = read!(reader.read_byte())?;

    Ok(TilePart {
        index,
        length,
        part_index,
    })
}

#[cfg(test)]
mod tests {
    use super::{
        ProgressionOrder, QuantizationStyle, WaveletTransform, cod_marker, qcd_marker, siz_marker,
    };
    use crate::error::DecodeError;

    fn siz_body(width: u32, height: u32) -> Vec<u8> {
        let mut data = vec![0, 0];
        for value in [width, height, 0, 0, width, height, 0, 0] {
            data.extend_from_slice(&value.to_be_bytes());
        }
        data.extend_from_slice(&1_u16.to_be_bytes());
        data.extend_from_slice(&[7, 1, 1]);
        data
    }

    #[test]
    fn siz_geometry() {
        let size = siz_marker(&siz_body(640, 480)).unwrap();

        assert_eq!((size.image_width(), size.image_height()), (640, 480));
        assert_eq!(size.num_tiles(), 1);
        assert_eq!(size.components[0].precision, 8);
        assert!(!size.components[0].is_signed);
    }

    #[test]
    fn zero_tile_size_is_rejected() {
        let mut data = siz_body(640, 480);
        // Zero out XTsiz.
        data[18..22].fill(0);
        assert!(siz_marker(&data).is_err());
    }

    #[test]
    fn cod_defaults_and_flags() {
        // No precincts, LRCP, one layer, no MCT, 5 levels, 64x64
        // code-blocks, segmentation symbols, 5-3 transform.
        let data = [0x00, 0x00, 0x00, 0x01, 0x00, 0x05, 0x04, 0x04, 0x20, 0x01];
        let style = cod_marker(&data).unwrap();

        assert_eq!(style.progression, ProgressionOrder::Lrcp);
        assert_eq!(style.layers, 1);
        assert_eq!(style.decomposition_levels, 5);
        assert_eq!((style.xcb, style.ycb), (6, 6));
        assert!(style.segmentation_symbol);
        assert_eq!(style.transformation, WaveletTransform::Reversible53);
        // Without a precinct list every level uses the maximal size.
        assert_eq!((style.ppx(0), style.ppy(3)), (15, 15));
    }

    #[test]
    fn exotic_code_block_styles_are_rejected() {
        for flag in [0x01, 0x02, 0x04, 0x08, 0x10] {
            let data = [0x00, 0x00, 0x00, 0x01, 0x00, 0x05, 0x04, 0x04, flag, 0x01];
            assert!(matches!(
                cod_marker(&data),
                Err(DecodeError::Unsupported(_))
            ));
        }
    }

    #[test]
    fn qcd_no_quantization_reads_exponents() {
        // Two guard bits, style 0, three bands.
        let data = [0x40, 9 << 3, 10 << 3, 10 << 3];
        let quant = qcd_marker(&data).unwrap();

        assert_eq!(quant.style, QuantizationStyle::None);
        assert_eq!(quant.guard_bits, 2);
        assert_eq!(quant.step_sizes.len(), 3);
        assert_eq!(quant.step_sizes[1].epsilon, 10);
        assert_eq!(quant.step_size(2, 1).epsilon, 10);
    }

    #[test]
    fn qcd_derived_applies_to_every_band() {
        // Style 1: a single 16-bit step size.
        let data = [0x41, (12 << 3) | 0x03, 0xFF];
        let quant = qcd_marker(&data).unwrap();

        assert_eq!(quant.style, QuantizationStyle::ScalarDerived);
        assert_eq!(quant.step_sizes.len(), 1);
        assert_eq!(quant.step_size(0, 0).epsilon, 12);
        // Formula E-5 lowers the exponent per decomposition.
        assert_eq!(quant.step_size(4, 2).epsilon, 11);
        assert_eq!(quant.step_size(0, 0).mu, 0x3FF);
    }
}
