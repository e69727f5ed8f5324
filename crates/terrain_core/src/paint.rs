//! Editor painting: surface-aware flood fill and line painting.

use bevy::prelude::*;
use std::collections::{HashSet, VecDeque};

use crate::edge_table::AREA_EPSILON;
use crate::grid::TerrainGrid;
use crate::surface::CLEAR_SURFACE;
use crate::tile::{Rotation, Tile};

/// Neighbour offset across each tile side (bottom, right, top, left).
const SIDE_OFFSETS: [IVec2; 4] = [IVec2::NEG_Y, IVec2::X, IVec2::Y, IVec2::NEG_X];

/// Full tiles are a single region; split tiles have two.
fn region_key(tile: &Tile, side: usize) -> usize {
    if tile.is_full() {
        1
    } else {
        side
    }
}

impl TerrainGrid {
    /// Flood-fill the region under `pos` with `surface`.
    ///
    /// The fill spreads through tile sides that the current region touches,
    /// into neighbouring regions carrying the same surface that touch the
    /// opposite side. Returns the number of regions painted.
    pub fn paint_flood_fill(&mut self, pos: Vec2, layer: i32, surface: u8) -> usize {
        let Some(start) = self.get_tile_index(pos) else {
            return 0;
        };
        let Some(start_tile) = self.tile_at(start, layer) else {
            return 0;
        };
        let start_side = start_tile.region_at(self.tile_local(start, pos));
        let target = start_tile.surface(start_side);
        if target == surface {
            return 0;
        }
        let treat_clear = target == CLEAR_SURFACE;

        let start_key = (start, region_key(start_tile, start_side));
        let mut visited = HashSet::from([start_key]);
        let mut queue = VecDeque::from([start_key]);
        let mut regions = Vec::new();

        while let Some((index, side)) = queue.pop_front() {
            regions.push((index, side));
            let Some(&tile) = self.tile_at(index, layer) else {
                continue;
            };
            for (tile_side, offset) in SIDE_OFFSETS.iter().enumerate() {
                let tile_side = tile_side as u8;
                if !tile.touches_side(tile_side, treat_clear, side) {
                    continue;
                }
                let neighbor_index = index + *offset;
                let Some(neighbor) = self.tile_at(neighbor_index, layer) else {
                    continue;
                };
                // A full tile is one region of its covering surface, whatever
                // a degenerate cut left in the other slot.
                if let Some(covering) = neighbor.full_surface() {
                    let key = (neighbor_index, 1);
                    if covering == target && visited.insert(key) {
                        queue.push_back(key);
                    }
                    continue;
                }
                let opposite = (tile_side + 2) % 4;
                for neighbor_side in 0..2 {
                    if neighbor.surface(neighbor_side) != target
                        || neighbor.surface_area(neighbor_side) <= AREA_EPSILON
                        || !neighbor.touches_side(opposite, treat_clear, neighbor_side)
                    {
                        continue;
                    }
                    let key = (neighbor_index, neighbor_side);
                    if visited.insert(key) {
                        queue.push_back(key);
                    }
                }
            }
        }

        for &(index, side) in &regions {
            let Some(tile) = self.tile_at_mut(index, layer) else {
                continue;
            };
            if tile.is_full() {
                *tile = Tile::full(surface).with_texture(tile.texture);
            } else {
                tile.set_surface(side, surface);
                tile.normalize();
            }
            self.mark_painted(index, layer);
        }
        debug!(
            "Flood fill at {:?} painted {} regions with surface {}",
            pos,
            regions.len(),
            surface
        );
        regions.len()
    }

    /// Flood-fill the region under `pos` with the clear surface.
    pub fn erase_flood_fill(&mut self, pos: Vec2, layer: i32) -> usize {
        self.paint_flood_fill(pos, layer, CLEAR_SURFACE)
    }

    /// Cut every tile the segment `p1 -> p2` crosses.
    ///
    /// The right side of the segment gets `surface`, the left side keeps the
    /// tile's other material. Changed tiles take the given texture rotation
    /// and mirror flag. Returns the number of tiles changed.
    pub fn paint_line(
        &mut self,
        p1: Vec2,
        p2: Vec2,
        layer: i32,
        surface: u8,
        rotation: Rotation,
        mirror: bool,
    ) -> usize {
        let ts = self.config.tile_size;
        let min = (p1.min(p2) / ts).floor().as_ivec2();
        let max = (p1.max(p2) / ts).floor().as_ivec2();
        let mut changed = 0;

        for ty in min.y..=max.y {
            for tx in min.x..=max.x {
                let index = IVec2::new(tx, ty);
                let local_p1 = self.tile_local(index, p1);
                let local_p2 = self.tile_local(index, p2);
                let Some(&original) = self.tile_at(index, layer) else {
                    continue;
                };
                let removed = original.full_surface().unwrap_or(if original.surface_a == surface {
                    original.surface_b
                } else {
                    original.surface_a
                });
                let mut tile = original;
                if !tile.cut_line(local_p1, local_p2, surface, removed) {
                    continue;
                }
                tile.texture.rotation = rotation;
                tile.texture.mirror = mirror;
                if let Some(slot) = self.tile_at_mut(index, layer) {
                    *slot = tile;
                }
                self.mark_painted(index, layer);
                changed += 1;
            }
        }
        changed
    }

    fn mark_painted(&mut self, index: IVec2, layer: i32) {
        if layer == self.config.physics_layer {
            self.mark_tile_changed(index);
        } else {
            self.mark_dirty();
        }
    }
}
