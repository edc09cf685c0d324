//! Packet ordering for the five progression orders (ITU-T T.800 B.12).
//!
//! Rather than interleaving five different iterator shapes with the
//! packet parser, the whole packet sequence of a tile is materialized
//! up front. The parser then walks the sequence and reads one packet
//! per entry.

use crate::codestream::ProgressionOrder;
use crate::tile::{Resolution, Tile, TileComponent};

/// The coordinates of one packet within a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PacketIndex {
    pub(crate) layer: u16,
    pub(crate) resolution: u8,
    pub(crate) component: usize,
    pub(crate) precinct: u32,
}

/// Materialize the packet sequence of a tile.
pub(crate) fn packet_sequence(
    tile: &Tile,
    progression: ProgressionOrder,
    layers: u16,
) -> Vec<PacketIndex> {
    match progression {
        ProgressionOrder::Lrcp => layer_major(tile, layers),
        ProgressionOrder::Rlcp => resolution_layer_major(tile, layers),
        ProgressionOrder::Rpcl => resolution_position_major(tile, layers),
        ProgressionOrder::Pcrl => position_major(tile, layers),
        ProgressionOrder::Cprl => component_major(tile, layers),
    }
}

fn max_resolutions(tile: &Tile) -> u8 {
    tile.components
        .iter()
        .map(|c| c.resolutions.len() as u8)
        .max()
        .unwrap_or(0)
}

fn layer_major(tile: &Tile, layers: u16) -> Vec<PacketIndex> {
    let mut sequence = Vec::new();

    for layer in 0..layers {
        for resolution in 0..max_resolutions(tile) {
            for (component, info) in tile.components.iter().enumerate() {
                let Some(level) = info.resolutions.get(resolution as usize) else {
                    continue;
                };
                for precinct in 0..level.num_precincts() {
                    sequence.push(PacketIndex {
                        layer,
                        resolution,
                        component,
                        precinct,
                    });
                }
            }
        }
    }

    sequence
}

fn resolution_layer_major(tile: &Tile, layers: u16) -> Vec<PacketIndex> {
    let mut sequence = Vec::new();

    for resolution in 0..max_resolutions(tile) {
        for layer in 0..layers {
            for (component, info) in tile.components.iter().enumerate() {
                let Some(level) = info.resolutions.get(resolution as usize) else {
                    continue;
                };
                for precinct in 0..level.num_precincts() {
                    sequence.push(PacketIndex {
                        layer,
                        resolution,
                        component,
                        precinct,
                    });
                }
            }
        }
    }

    sequence
}

fn resolution_position_major(tile: &Tile, layers: u16) -> Vec<PacketIndex> {
    let mut sequence = Vec::new();

    for resolution in 0..max_resolutions(tile) {
        for y in tile.rect.y0..tile.rect.y1 {
            for x in tile.rect.x0..tile.rect.x1 {
                for (component, info) in tile.components.iter().enumerate() {
                    let Some(level) = info.resolutions.get(resolution as usize) else {
                        continue;
                    };
                    if let Some(precinct) = precinct_at(tile, info, level, x, y) {
                        for layer in 0..layers {
                            sequence.push(PacketIndex {
                                layer,
                                resolution,
                                component,
                                precinct,
                            });
                        }
                    }
                }
            }
        }
    }

    sequence
}

fn position_major(tile: &Tile, layers: u16) -> Vec<PacketIndex> {
    let mut sequence = Vec::new();

    for y in tile.rect.y0..tile.rect.y1 {
        for x in tile.rect.x0..tile.rect.x1 {
            for (component, info) in tile.components.iter().enumerate() {
                for level in &info.resolutions {
                    if let Some(precinct) = precinct_at(tile, info, level, x, y) {
                        for layer in 0..layers {
                            sequence.push(PacketIndex {
                                layer,
                                resolution: level.level,
                                component,
                                precinct,
                            });
                        }
                    }
                }
            }
        }
    }

    sequence
}

fn component_major(tile: &Tile, layers: u16) -> Vec<PacketIndex> {
    let mut sequence = Vec::new();

    for (component, info) in tile.components.iter().enumerate() {
        for y in tile.rect.y0..tile.rect.y1 {
            for x in tile.rect.x0..tile.rect.x1 {
                for level in &info.resolutions {
                    if let Some(precinct) = precinct_at(tile, info, level, x, y) {
                        for layer in 0..layers {
                            sequence.push(PacketIndex {
                                layer,
                                resolution: level.level,
                                component,
                                precinct,
                            });
                        }
                    }
                }
            }
        }
    }

    sequence
}

/// Decide whether the reference grid point (x, y) is the anchor of a
/// precinct of the given resolution level, and if so return the
/// precinct's index. A point anchors a precinct when it lies on the
/// precinct stride, or on the tile edge when the first precinct is
/// only partially covered (B.12.1.3).
fn precinct_at(
    tile: &Tile,
    info: &TileComponent,
    level: &Resolution,
    x: u32,
    y: u32,
) -> Option<u32> {
    if level.num_precincts() == 0 {
        return None;
    }

    let shift = u32::from(info.coding.decomposition_levels - level.level);
    let scale = 1_u64 << shift;
    let x_stride = u64::from(info.dx) << (u32::from(level.ppx) + shift);
    let y_stride = u64::from(info.dy) << (u32::from(level.ppy) + shift);

    let trx0 = u64::from(level.rect.x0);
    let try0 = u64::from(level.rect.y0);

    let on_y_stride = u64::from(y) % y_stride == 0;
    let on_y_edge = y == tile.rect.y0 && (try0 * scale) % y_stride != 0;
    if !(on_y_stride || on_y_edge) {
        return None;
    }

    let on_x_stride = u64::from(x) % x_stride == 0;
    let on_x_edge = x == tile.rect.x0 && (trx0 * scale) % x_stride != 0;
    if !(on_x_stride || on_x_edge) {
        return None;
    }

    // Map the grid point to resolution coordinates and into the
    // precinct grid.
    let px = (u64::from(x).div_ceil(u64::from(info.dx) * scale) >> level.ppx)
        .checked_sub(trx0 >> level.ppx)?;
    let py = (u64::from(y).div_ceil(u64::from(info.dy) * scale) >> level.ppy)
        .checked_sub(try0 >> level.ppy)?;

    let precinct = px + py * u64::from(level.precincts_wide);
    if precinct >= u64::from(level.num_precincts()) {
        return None;
    }

    precinct.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::{PacketIndex, packet_sequence};
    use crate::codestream::{
        CodingStyle, ComponentSize, ProgressionOrder, Quantization, QuantizationStyle, SizeParams,
        StepSize, WaveletTransform,
    };
    use crate::tile::Tile;

    fn tile(width: u32, height: u32, levels: u8, precincts: Vec<u8>) -> Tile {
        let size = SizeParams {
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
        };
        let coding = CodingStyle {
            sop_markers: false,
            eph_markers: false,
            progression: ProgressionOrder::Lrcp,
            layers: 2,
            mct: false,
            decomposition_levels: levels,
            xcb: 6,
            ycb: 6,
            segmentation_symbol: false,
            transformation: WaveletTransform::Reversible53,
            precinct_sizes: precincts,
        };
        let quantization = Quantization {
            style: QuantizationStyle::None,
            guard_bits: 2,
            step_sizes: vec![StepSize { epsilon: 9, mu: 0 }],
        };

        Tile::new(0, &size, &[coding], &[quantization]).unwrap()
    }

    fn index(layer: u16, resolution: u8, precinct: u32) -> PacketIndex {
        PacketIndex {
            layer,
            resolution,
            component: 0,
            precinct,
        }
    }

    #[test]
    fn layer_major_iterates_layers_outermost() {
        let tile = tile(64, 64, 1, Vec::new());
        let sequence = packet_sequence(&tile, ProgressionOrder::Lrcp, 2);

        assert_eq!(
            sequence,
            vec![
                index(0, 0, 0),
                index(0, 1, 0),
                index(1, 0, 0),
                index(1, 1, 0),
            ]
        );
    }

    #[test]
    fn resolution_major_iterates_resolutions_outermost() {
        let tile = tile(64, 64, 1, Vec::new());
        let sequence = packet_sequence(&tile, ProgressionOrder::Rlcp, 2);

        assert_eq!(
            sequence,
            vec![
                index(0, 0, 0),
                index(1, 0, 0),
                index(0, 1, 0),
                index(1, 1, 0),
            ]
        );
    }

    #[test]
    fn position_orders_cover_every_packet_once() {
        // 2x2 precincts at the top resolution.
        let tile = tile(256, 256, 1, vec![0x77, 0x77]);

        for order in [
            ProgressionOrder::Rpcl,
            ProgressionOrder::Pcrl,
            ProgressionOrder::Cprl,
        ] {
            let sequence = packet_sequence(&tile, order, 2);
            // Resolution 0 has one precinct, resolution 1 has four,
            // each visited in both layers.
            assert_eq!(sequence.len(), 10, "{order:?}");

            let mut seen = sequence.clone();
            seen.sort_by_key(|p| (p.layer, p.resolution, p.precinct));
            seen.dedup();
            assert_eq!(seen.len(), 10, "{order:?}");
        }
    }

    #[test]
    fn precincts_advance_in_raster_order() {
        let tile = tile(256, 256, 1, vec![0x77, 0x77]);
        let sequence = packet_sequence(&tile, ProgressionOrder::Rpcl, 1);

        let precincts: Vec<u32> = sequence
            .iter()
            .filter(|p| p.resolution == 1)
            .map(|p| p.precinct)
            .collect();
        assert_eq!(precincts, vec![0, 1, 2, 3]);
    }
}
