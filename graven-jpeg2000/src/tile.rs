//! Tile, resolution, and sub-band geometry (ITU-T T.800 Annex B).
//!
//! Every partition in the codestream is anchored on the reference
//! grid: tiles partition the image area, each tile component carries
//! one resolution level per decomposition, resolutions split into
//! sub-bands, precincts group the code-blocks of a resolution, and
//! code-blocks tile each sub-band. All of it is pure arithmetic on
//! the SIZ and COD parameters; nothing here reads the codestream.

use crate::codestream::{CodingStyle, Quantization, SizeParams};
use crate::error::{MarkerError, Result, bail};
use crate::tagtree::TagTree;

/// A half-open rectangle on one of the coordinate systems of Annex B.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Rect {
    pub(crate) x0: u32,
    pub(crate) y0: u32,
    pub(crate) x1: u32,
    pub(crate) y1: u32,
}

impl Rect {
    pub(crate) fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub(crate) fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }
}

/// ceil(value / 2^shift) for values that may start slightly negative.
fn ceil_shift(value: i64, shift: u8) -> i64 {
    let divisor = 1_i64 << shift;
    (value + divisor - 1).div_euclid(divisor)
}

/// Sub-band orientation (Table B.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BandKind {
    LowLow,
    HighLow,
    LowHigh,
    HighHigh,
}

impl BandKind {
    /// The horizontal band offset (xob in B-15).
    fn x_offset(self) -> i64 {
        match self {
            Self::LowLow | Self::LowHigh => 0,
            Self::HighLow | Self::HighHigh => 1,
        }
    }

    /// The vertical band offset (yob in B-15).
    fn y_offset(self) -> i64 {
        match self {
            Self::LowLow | Self::HighLow => 0,
            Self::LowHigh | Self::HighHigh => 1,
        }
    }

    /// The log2 gain of the band (Table E.1).
    pub(crate) fn gain(self) -> u8 {
        match self {
            Self::LowLow => 0,
            Self::HighLow | Self::LowHigh => 1,
            Self::HighHigh => 2,
        }
    }
}

/// One code-block and its accumulated codestream state.
#[derive(Debug)]
pub(crate) struct CodeBlock {
    /// Position in sub-band coordinates, clipped to the sub-band.
    pub(crate) rect: Rect,
    /// Whether any earlier layer included this block.
    pub(crate) included: bool,
    /// Number of all-zero leading bit-planes (missing bit-planes).
    pub(crate) zero_bitplanes: u32,
    /// The Lblock state for length decoding (B.10.7.1).
    pub(crate) length_indicator: u32,
    /// Total coding passes contributed so far.
    pub(crate) passes: u32,
    /// Concatenated body bytes from all layers.
    pub(crate) data: Vec<u8>,
}

/// The share of one precinct that falls into one sub-band: a range of
/// code-block grid positions and the two tag trees of B.10.
pub(crate) struct BandPrecinct {
    /// Code-block columns, relative to the sub-band's block grid.
    pub(crate) block_x0: u32,
    pub(crate) block_x1: u32,
    /// Code-block rows, relative to the sub-band's block grid.
    pub(crate) block_y0: u32,
    pub(crate) block_y1: u32,
    pub(crate) inclusion: TagTree,
    pub(crate) zero_planes: TagTree,
}

pub(crate) struct Subband {
    pub(crate) kind: BandKind,
    /// Position in sub-band coordinates (B-15).
    pub(crate) rect: Rect,
    /// Index in the codestream band order, for quantization lookup.
    pub(crate) band_index: usize,
    /// First code-block column and row of the block grid (B-17).
    grid_x0: u32,
    grid_y0: u32,
    pub(crate) blocks_wide: u32,
    pub(crate) blocks_high: u32,
    /// Code-blocks in raster order.
    pub(crate) blocks: Vec<CodeBlock>,
    /// One entry per precinct of the parent resolution.
    pub(crate) precincts: Vec<BandPrecinct>,
}

pub(crate) struct Resolution {
    pub(crate) level: u8,
    /// Position in resolution coordinates (B-14).
    pub(crate) rect: Rect,
    /// Precinct size exponents at this resolution (unscaled).
    pub(crate) ppx: u8,
    pub(crate) ppy: u8,
    pub(crate) precincts_wide: u32,
    pub(crate) precincts_high: u32,
    pub(crate) bands: Vec<Subband>,
}

impl Resolution {
    pub(crate) fn num_precincts(&self) -> u32 {
        self.precincts_wide * self.precincts_high
    }
}

pub(crate) struct TileComponent {
    /// Position in component coordinates (B-12).
    pub(crate) rect: Rect,
    /// Subsampling factors with respect to the reference grid.
    pub(crate) dx: u8,
    pub(crate) dy: u8,
    pub(crate) coding: CodingStyle,
    pub(crate) quantization: Quantization,
    /// Resolution levels from 0 (the lone LL band) upwards.
    pub(crate) resolutions: Vec<Resolution>,
}

pub(crate) struct Tile {
    /// Position on the reference grid (B-7), clipped to the image area.
    pub(crate) rect: Rect,
    pub(crate) components: Vec<TileComponent>,
}

impl Tile {
    /// Build the full geometry of one tile. The coding and quantization
    /// slices hold the resolved per-component parameters.
    pub(crate) fn new(
        index: u32,
        size: &SizeParams,
        coding: &[CodingStyle],
        quantization: &[Quantization],
    ) -> Result<Self> {
        let tx = index % size.num_x_tiles();
        let ty = index / size.num_x_tiles();

        let x0 = u64::from(size.tile_x0) + u64::from(tx) * u64::from(size.tile_width);
        let y0 = u64::from(size.tile_y0) + u64::from(ty) * u64::from(size.tile_height);
        let rect = Rect {
            x0: x0.max(u64::from(size.image_x0)).min(u64::from(size.grid_width)) as u32,
            y0: y0.max(u64::from(size.image_y0)).min(u64::from(size.grid_height)) as u32,
            x1: (x0 + u64::from(size.tile_width)).min(u64::from(size.grid_width)) as u32,
            y1: (y0 + u64::from(size.tile_height)).min(u64::from(size.grid_height)) as u32,
        };

        let mut components = Vec::with_capacity(size.components.len());
        for (c, component) in size.components.iter().enumerate() {
            let component_rect = Rect {
                x0: u64::from(rect.x0).div_ceil(u64::from(component.dx)) as u32,
                y0: u64::from(rect.y0).div_ceil(u64::from(component.dy)) as u32,
                x1: u64::from(rect.x1).div_ceil(u64::from(component.dx)) as u32,
                y1: u64::from(rect.y1).div_ceil(u64::from(component.dy)) as u32,
            };

            components.push(tile_component(
                component_rect,
                component.dx,
                component.dy,
                &coding[c],
                &quantization[c],
            )?);
        }

        Ok(Self { rect, components })
    }
}

fn tile_component(
    rect: Rect,
    dx: u8,
    dy: u8,
    coding: &CodingStyle,
    quantization: &Quantization,
) -> Result<TileComponent> {
    let levels = coding.decomposition_levels;
    let mut resolutions = Vec::with_capacity(levels as usize + 1);

    for r in 0..=levels {
        let shift = levels - r;
        let resolution_rect = Rect {
            x0: ceil_shift(rect.x0 as i64, shift) as u32,
            y0: ceil_shift(rect.y0 as i64, shift) as u32,
            x1: ceil_shift(rect.x1 as i64, shift) as u32,
            y1: ceil_shift(rect.y1 as i64, shift) as u32,
        };

        let ppx = coding.ppx(r);
        let ppy = coding.ppy(r);
        // Zero precinct exponents are only allowed at resolution 0
        // (Table A.21).
        if r > 0 && (ppx == 0 || ppy == 0) {
            bail!(MarkerError::Malformed("COD"));
        }

        // Formula B-16.
        let precincts_wide = if resolution_rect.x1 > resolution_rect.x0 {
            (ceil_shift(resolution_rect.x1 as i64, ppx) - (resolution_rect.x0 as i64 >> ppx))
                as u32
        } else {
            0
        };
        let precincts_high = if resolution_rect.y1 > resolution_rect.y0 {
            (ceil_shift(resolution_rect.y1 as i64, ppy) - (resolution_rect.y0 as i64 >> ppy))
                as u32
        } else {
            0
        };

        // For r > 0 the bands sit at half the resolution scale, and the
        // precinct shrinks with them (B-17).
        let (band_ppx, band_ppy) = if r == 0 {
            (ppx, ppy)
        } else {
            (ppx - 1, ppy - 1)
        };
        let xcb = coding.xcb.min(band_ppx);
        let ycb = coding.ycb.min(band_ppy);

        let kinds: &[BandKind] = if r == 0 {
            &[BandKind::LowLow]
        } else {
            &[BandKind::HighLow, BandKind::LowHigh, BandKind::HighHigh]
        };

        let mut bands = Vec::with_capacity(kinds.len());
        for (position, &kind) in kinds.iter().enumerate() {
            let band_index = if r == 0 {
                0
            } else {
                3 * (r as usize - 1) + 1 + position
            };

            // Formula B-15, with nb decompositions remaining.
            let nb = if r == 0 { levels } else { levels - r + 1 };
            let half = nb.saturating_sub(1);
            let band_rect = Rect {
                x0: ceil_shift(rect.x0 as i64 - (kind.x_offset() << half), nb) as u32,
                y0: ceil_shift(rect.y0 as i64 - (kind.y_offset() << half), nb) as u32,
                x1: ceil_shift(rect.x1 as i64 - (kind.x_offset() << half), nb) as u32,
                y1: ceil_shift(rect.y1 as i64 - (kind.y_offset() << half), nb) as u32,
            };

            bands.push(subband(
                kind,
                band_rect,
                band_index,
                xcb,
                ycb,
                band_ppx,
                band_ppy,
                &resolution_rect,
                ppx,
                ppy,
                precincts_wide,
                precincts_high,
            ));
        }

        resolutions.push(Resolution {
            level: r,
            rect: resolution_rect,
            ppx,
            ppy,
            precincts_wide,
            precincts_high,
            bands,
        });
    }

    Ok(TileComponent {
        rect,
        dx,
        dy,
        coding: coding.clone(),
        quantization: quantization.clone(),
        resolutions,
    })
}

#[allow(clippy::too_many_arguments)]
fn subband(
    kind: BandKind,
    rect: Rect,
    band_index: usize,
    xcb: u8,
    ycb: u8,
    band_ppx: u8,
    band_ppy: u8,
    resolution_rect: &Rect,
    ppx: u8,
    ppy: u8,
    precincts_wide: u32,
    precincts_high: u32,
) -> Subband {
    // The code-block grid is anchored at zero (B-17).
    let (grid_x0, grid_y0, blocks_wide, blocks_high) = if rect.is_empty() {
        (0, 0, 0, 0)
    } else {
        let gx0 = rect.x0 >> xcb;
        let gy0 = rect.y0 >> ycb;
        (
            gx0,
            gy0,
            (ceil_shift(rect.x1 as i64, xcb) as u32) - gx0,
            (ceil_shift(rect.y1 as i64, ycb) as u32) - gy0,
        )
    };

    let mut blocks = Vec::with_capacity((blocks_wide * blocks_high) as usize);
    for gy in 0..blocks_high {
        for gx in 0..blocks_wide {
            let x0 = (grid_x0 + gx) << xcb;
            let y0 = (grid_y0 + gy) << ycb;
            blocks.push(CodeBlock {
                rect: Rect {
                    x0: x0.max(rect.x0),
                    y0: y0.max(rect.y0),
                    x1: (x0 + (1 << xcb)).min(rect.x1),
                    y1: (y0 + (1 << ycb)).min(rect.y1),
                },
                included: false,
                zero_bitplanes: 0,
                length_indicator: 3,
                passes: 0,
                data: Vec::new(),
            });
        }
    }

    // The precinct grid is anchored at zero on the resolution level;
    // its columns and rows map to the band scale unchanged, except for
    // the exponents shrinking by one above resolution 0.
    let precinct_x0 = resolution_rect.x0 >> ppx;
    let precinct_y0 = resolution_rect.y0 >> ppy;

    let mut precincts = Vec::with_capacity((precincts_wide * precincts_high) as usize);
    for py in 0..precincts_high {
        for px in 0..precincts_wide {
            let band_x0 = u64::from(precinct_x0 + px) << band_ppx;
            let band_x1 = u64::from(precinct_x0 + px + 1) << band_ppx;
            let band_y0 = u64::from(precinct_y0 + py) << band_ppy;
            let band_y1 = u64::from(precinct_y0 + py + 1) << band_ppy;

            // Precinct boundaries are multiples of the block size, so a
            // plain shift maps them onto the block grid.
            let gx0 = ((band_x0 >> xcb) as u32).clamp(grid_x0, grid_x0 + blocks_wide);
            let gx1 = ((band_x1 >> xcb) as u32).clamp(gx0, grid_x0 + blocks_wide);
            let gy0 = ((band_y0 >> ycb) as u32).clamp(grid_y0, grid_y0 + blocks_high);
            let gy1 = ((band_y1 >> ycb) as u32).clamp(gy0, grid_y0 + blocks_high);

            precincts.push(BandPrecinct {
                block_x0: gx0 - grid_x0,
                block_x1: gx1 - grid_x0,
                block_y0: gy0 - grid_y0,
                block_y1: gy1 - grid_y0,
                inclusion: TagTree::new((gx1 - gx0).max(1), (gy1 - gy0).max(1)),
                zero_planes: TagTree::new((gx1 - gx0).max(1), (gy1 - gy0).max(1)),
            });
        }
    }

    Subband {
        kind,
        rect,
        band_index,
        grid_x0,
        grid_y0,
        blocks_wide,
        blocks_high,
        blocks,
        precincts,
    }
}

#[cfg(test)]
mod tests {
    use super::{BandKind, Rect, Tile};
    use crate::codestream::{
        CodingStyle, ComponentSize, ProgressionOrder, Quantization, QuantizationStyle, SizeParams,
        StepSize, WaveletTransform,
    };

    fn size(width: u32, height: u32) -> SizeParams {
        SizeParams {
            grid_width: width,
            grid_height: height,
            image_x0: 0,
            image_y0: 0,
            tile_width: width,
            tile_height: height,
            tile_x0: 0,
            tile_y0: 0,
            components: vec![ComponentSize {
                precision: 8,
                is_signed: false,
                dx: 1,
                dy: 1,
            }],
        }
    }

    fn coding(levels: u8) -> CodingStyle {
        CodingStyle {
            sop_markers: false,
            eph_markers: false,
            progression: ProgressionOrder::Lrcp,
            layers: 1,
            mct: false,
            decomposition_levels: levels,
            xcb: 6,
            ycb: 6,
            segmentation_symbol: false,
            transformation: WaveletTransform::Reversible53,
            precinct_sizes: Vec::new(),
        }
    }

    fn quantization() -> Quantization {
        Quantization {
            style: QuantizationStyle::None,
            guard_bits: 2,
            step_sizes: vec![StepSize { epsilon: 9, mu: 0 }],
        }
    }

    #[test]
    fn resolution_and_band_rects() {
        let tile = Tile::new(0, &size(129, 97), &[coding(2)], &[quantization()]).unwrap();
        let component = &tile.components[0];

        assert_eq!(component.resolutions.len(), 3);
        // Resolution 0 halves the extent twice, rounding up.
        let r0 = &component.resolutions[0];
        assert_eq!(r0.rect, Rect { x0: 0, y0: 0, x1: 33, y1: 25 });
        assert_eq!(r0.bands[0].kind, BandKind::LowLow);
        assert_eq!(r0.bands[0].rect, r0.rect);

        // The highest resolution covers the full component.
        let r2 = &component.resolutions[2];
        assert_eq!(r2.rect, Rect { x0: 0, y0: 0, x1: 129, y1: 97 });
        // Its HL band holds the odd horizontal samples.
        assert_eq!(r2.bands[0].kind, BandKind::HighLow);
        assert_eq!(r2.bands[0].rect, Rect { x0: 0, y0: 0, x1: 64, y1: 49 });
        assert_eq!(r2.bands[0].band_index, 4);
    }

    #[test]
    fn code_block_grid_is_anchored_at_zero() {
        // A 100x80 band area with 64x64 blocks spans two grid columns
        // and two rows, with the boundary blocks clipped.
        let tile = Tile::new(0, &size(200, 160), &[coding(1)], &[quantization()]).unwrap();
        let band = &tile.components[0].resolutions[1].bands[0];

        assert_eq!(band.rect, Rect { x0: 0, y0: 0, x1: 100, y1: 80 });
        assert_eq!((band.blocks_wide, band.blocks_high), (2, 2));
        assert_eq!(band.blocks[1].rect, Rect { x0: 64, y0: 0, x1: 100, y1: 64 });
        assert_eq!(band.blocks[3].rect, Rect { x0: 64, y0: 64, x1: 100, y1: 80 });
    }

    #[test]
    fn default_precinct_covers_everything() {
        let tile = Tile::new(0, &size(512, 512), &[coding(3)], &[quantization()]).unwrap();

        for resolution in &tile.components[0].resolutions {
            assert_eq!(resolution.num_precincts(), 1);
            for band in &resolution.bands {
                let precinct = &band.precincts[0];
                assert_eq!(precinct.block_x0, 0);
                assert_eq!(precinct.block_x1, band.blocks_wide);
                assert_eq!(precinct.block_y1, band.blocks_high);
            }
        }
    }

    #[test]
    fn small_precincts_partition_the_blocks() {
        // 256x256, one decomposition, 128x128 precincts at the top
        // resolution: a 2x2 precinct grid over 64x64 blocks.
        let mut style = coding(1);
        style.precinct_sizes = vec![0x77, 0x77];
        let tile = Tile::new(0, &size(256, 256), &[style], &[quantization()]).unwrap();

        let resolution = &tile.components[0].resolutions[1];
        assert_eq!((resolution.precincts_wide, resolution.precincts_high), (2, 2));

        // Each band is 128x128; a 64x64 band-scale precinct holds one
        // 64x64 block.
        for band in &resolution.bands {
            assert_eq!((band.blocks_wide, band.blocks_high), (2, 2));
            assert_eq!(band.precincts.len(), 4);
            let p = &band.precincts[1];
            assert_eq!((p.block_x0, p.block_x1), (1, 2));
            assert_eq!((p.block_y0, p.block_y1), (0, 1));
        }
    }

    #[test]
    fn subsampled_component_shrinks_the_tile() {
        let mut params = size(100, 100);
        params.components[0].dx = 2;
        params.components[0].dy = 2;

        let tile = Tile::new(0, &params, &[coding(0)], &[quantization()]).unwrap();
        let component = &tile.components[0];
        assert_eq!(component.rect, Rect { x0: 0, y0: 0, x1: 50, y1: 50 });
        assert_eq!(component.resolutions.len(), 1);
    }
}
