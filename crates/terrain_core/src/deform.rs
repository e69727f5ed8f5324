//! Destructive terrain edits: circular blasts and directional digging.
//!
//! Both operations work on the physics layer, only ever remove material, and
//! leave the actual collision rebuild to the next
//! [`TerrainGrid::update_post`] pass.

use bevy::prelude::*;
use rand::Rng;

use crate::edge_table::AREA_EPSILON;
use crate::grid::TerrainGrid;
use crate::physics::{BodyHandle, PhysicsBackend};
use crate::surface::{MaterialId, MaterialMask};
use crate::tile::Tile;

/// How far past a ray hit the tile lookup point sits, in tiles.
const HIT_INSET: f32 = 0.01;

/// Half-length of the cut placed by [`TerrainGrid::deform_tile`], in tiles.
const DIG_HALF_LENGTH: f32 = 2.0;

impl TerrainGrid {
    fn can_destroy(&self, surface: u8, allowed: MaterialMask) -> bool {
        surface != 0
            && self.catalog.is_destructible(surface)
            && allowed.contains(self.catalog.material(surface))
    }

    /// Clear tiles whose leftover material is a destructible sliver.
    fn collapse_sliver(&self, tile: &mut Tile, allowed: MaterialMask) {
        if tile.is_clear() || tile.solid_area() >= self.config.min_surface_area {
            return;
        }
        let all_destroyable = (0..2).all(|side| {
            let surface = tile.surface(side);
            surface == 0
                || tile.surface_area(side) <= AREA_EPSILON
                || self.can_destroy(surface, allowed)
        });
        if all_destroyable {
            tile.clear_surfaces();
        }
    }

    /// Write a deformed tile back and flag everything that depends on it.
    fn commit_deformed_tile(&mut self, tile_index: IVec2, tile: Tile) {
        let layer = self.config.physics_layer;
        if let Some(slot) = self.tile_at_mut(tile_index, layer) {
            *slot = tile;
        }
        self.mark_tile_changed(tile_index);
    }

    /// Carve a circle out of the physics layer.
    ///
    /// Only surfaces that are destructible and whose material is in `allowed`
    /// are touched. `randomness` jitters each tile's cut by up to that
    /// fraction of the radius. Returns whether any tile changed.
    pub fn deform_area(
        &mut self,
        center: Vec2,
        radius: f32,
        allowed: MaterialMask,
        randomness: f32,
    ) -> bool {
        if !radius.is_finite() || radius <= 0.0 || !center.is_finite() {
            return false;
        }
        let ts = self.config.tile_size;
        let layer = self.config.physics_layer;
        let local_radius = radius / ts;
        // Tile range around the centre tile, clamped to the grid.
        let center_tile = (center / ts).floor();
        let reach = local_radius.ceil() + 1.0;
        let last_tile = (self.config.full_size * self.config.patch_size - IVec2::ONE).as_vec2();
        let min = (center_tile - reach).max(Vec2::ZERO).as_ivec2();
        let max = (center_tile + reach).min(last_tile).as_ivec2();
        let mut changed_any = false;

        for ty in min.y..=max.y {
            for tx in min.x..=max.x {
                let tile_index = IVec2::new(tx, ty);
                let Some(&original) = self.tile_at(tile_index, layer) else {
                    continue;
                };
                if original.is_clear() {
                    continue;
                }
                let min = self.tile_world_origin(tile_index);
                let closest = center.clamp(min, min + Vec2::splat(ts));
                if closest.distance(center) > radius {
                    continue;
                }

                let mut tile = original;
                match tile.full_surface() {
                    Some(surface) => {
                        if !self.can_destroy(surface, allowed) {
                            continue;
                        }
                        let jitter = if randomness > 0.0 {
                            self.rng.gen_range(-randomness..=randomness) * local_radius
                        } else {
                            0.0
                        };
                        let local_center = self.tile_local(tile_index, center);
                        tile.resurface_circle(local_center, local_radius, jitter);
                    }
                    None => {
                        let destroy_a = self.can_destroy(tile.surface_a, allowed)
                            && tile.surface_area(0) > AREA_EPSILON;
                        let destroy_b = self.can_destroy(tile.surface_b, allowed)
                            && tile.surface_area(1) > AREA_EPSILON;
                        match (destroy_a, destroy_b) {
                            (true, true) => tile.clear_surfaces(),
                            (true, false) => {
                                tile.surface_a = 0;
                                tile.normalize();
                            }
                            (false, true) => {
                                tile.surface_b = 0;
                                tile.normalize();
                            }
                            (false, false) => continue,
                        }
                    }
                }
                self.collapse_sliver(&mut tile, allowed);

                if tile != original {
                    self.commit_deformed_tile(tile_index, tile);
                    changed_any = true;
                }
            }
        }
        changed_any
    }

    /// Dig into the terrain along a ray.
    ///
    /// Casts from `start` along `direction` (its length is the reach). Returns
    /// the material of the surface hit, or `None` when nothing was hit. The
    /// tile is only modified when that surface is destructible and its
    /// material is in `allowed`: `clear_mode` removes the whole surface,
    /// otherwise a cut is placed `deform_tile_depth` tiles past the hit.
    pub fn deform_tile(
        &mut self,
        start: Vec2,
        direction: Vec2,
        ignore: Option<BodyHandle>,
        allowed: MaterialMask,
        clear_mode: bool,
        backend: &dyn PhysicsBackend,
    ) -> Option<MaterialId> {
        let dir = direction.normalize_or_zero();
        if dir == Vec2::ZERO {
            return None;
        }
        let hit = backend.raycast(start, start + direction, ignore)?;

        let ts = self.config.tile_size;
        let inside = hit.point + dir * HIT_INSET * ts;
        let tile_index = self.get_tile_index(inside)?;
        let original = *self.tile_at(tile_index, self.config.physics_layer)?;
        let local = self.tile_local(tile_index, inside);
        let side = original.region_at(local);
        let surface = original.surface(side);
        if surface == 0 {
            return None;
        }
        let material = self.catalog.material(surface);
        if !self.can_destroy(surface, allowed) {
            return Some(material);
        }

        let mut tile = original;
        let other = original.surface(1 - side);
        if clear_mode || (!original.is_full() && other != 0) {
            // With two materials only the hit one goes; the other keeps its region.
            tile.set_surface(side, 0);
            tile.normalize();
        } else {
            let cut_center = local + dir * self.config.deform_tile_depth;
            let along = Vec2::new(-dir.y, dir.x);
            let half = along * DIG_HALF_LENGTH;
            tile.resurface_line(cut_center - half, cut_center + half);
        }
        self.collapse_sliver(&mut tile, allowed);

        if tile != original {
            self.commit_deformed_tile(tile_index, tile);
        }
        Some(material)
    }
}
