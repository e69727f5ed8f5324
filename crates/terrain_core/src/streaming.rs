//! Stream window: which patches have live physics and objects.
//!
//! ## Overview
//!
//! The window is a square of patches around the patch containing a reference
//! point (usually the camera):
//! - Patches inside `[centre - radius, centre + radius]` are active
//! - Patches leaving the window lose their physics body
//! - Serializable live objects outside the window are written back to stubs
//!
//! The centre only moves once the reference point is `window_hysteresis`
//! patches past the current centre patch, so a camera idling on a patch
//! border doesn't thrash activation.
//!
//! ```text
//!   +---+---+---+---+
//!   |   | A | A | A |     A: active
//!   +---+---+---+---+     C: centre patch
//!   |   | A | C | A |
//!   +---+---+---+---+
//!   |   | A | A | A |
//!   +---+---+---+---+
//! ```

use bevy::prelude::*;

use crate::grid::TerrainGrid;
use crate::objects::ObjectHost;
use crate::physics::PhysicsBackend;

/// Current window state, in patch coordinates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamWindow {
    /// Centre patch after hysteresis.
    pub center: Option<IVec2>,
    /// Active patch range, inclusive on both ends.
    pub rect: Option<IRect>,
    /// Radius the rect was computed with.
    pub radius: i32,
    pub stats: StreamingStats,
}

/// Statistics about the last window update.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamingStats {
    /// Patches with active physics after the update.
    pub active_patches: usize,
    /// Patches activated by the last update.
    pub activated: usize,
    /// Patches deactivated by the last update.
    pub deactivated: usize,
    /// Live objects written back to stubs by the last update.
    pub streamed_out: usize,
    /// Window moves since the grid was loaded or cleared.
    pub moves: usize,
}

impl TerrainGrid {
    pub fn stream_window(&self) -> &StreamWindow {
        &self.window
    }

    pub fn streaming_stats(&self) -> StreamingStats {
        self.window.stats
    }

    /// Patch range currently streamed in, if any.
    pub fn active_window(&self) -> Option<IRect> {
        self.window.rect
    }

    /// World rectangle covered by a patch range.
    pub fn window_world_rect(&self, rect: IRect) -> Rect {
        let size = self.config.patch_world_size();
        Rect::from_corners(rect.min.as_vec2() * size, (rect.max + IVec2::ONE).as_vec2() * size)
    }

    fn window_center(&self, center: Vec2) -> IVec2 {
        let size = self.config.patch_world_size();
        let raw = (center / size).floor().as_ivec2();
        let held = self.window.center.filter(|current| {
            let margin = self.config.window_hysteresis * size;
            let min = current.as_vec2() * size - Vec2::splat(margin);
            let max = (*current + IVec2::ONE).as_vec2() * size + Vec2::splat(margin);
            center.cmpge(min).all() && center.cmple(max).all()
        });
        held.unwrap_or(raw)
            .clamp(IVec2::ZERO, self.config.full_size - IVec2::ONE)
    }

    /// Move the stream window to `center` (world units).
    ///
    /// The first call after construction, load or clear activates everything
    /// inside the window. Later calls only do work when the window moved.
    /// Returns whether anything was activated or deactivated.
    pub fn update_active_window(
        &mut self,
        center: Vec2,
        backend: &mut dyn PhysicsBackend,
        host: &mut dyn ObjectHost,
    ) -> bool {
        let full = self.config.full_size;
        let (center_patch, radius, rect) = if self.config.streaming_enabled {
            let center_patch = self.window_center(center);
            let radius = self.config.window_radius.max(0);
            let rect = IRect::from_corners(
                (center_patch - IVec2::splat(radius)).max(IVec2::ZERO),
                (center_patch + IVec2::splat(radius)).min(full - IVec2::ONE),
            );
            (center_patch, radius, rect)
        } else {
            let rect = IRect::from_corners(IVec2::ZERO, full - IVec2::ONE);
            (rect.center(), full.max_element(), rect)
        };

        let first = self.window.rect.is_none();
        if !first && self.window.rect == Some(rect) && self.window.radius == radius {
            self.window.center = Some(center_patch);
            self.window.stats.activated = 0;
            self.window.stats.deactivated = 0;
            self.window.stats.streamed_out = 0;
            return false;
        }
        let previous = self.window.rect;
        let world_rect = self.window_world_rect(rect);
        let inside = |index: IVec2| {
            index.x >= rect.min.x
                && index.y >= rect.min.y
                && index.x <= rect.max.x
                && index.y <= rect.max.y
        };

        let mut stats = StreamingStats {
            moves: self.window.stats.moves + usize::from(!first),
            ..Default::default()
        };

        // Deactivate first so the proxy budget is freed for incoming patches.
        for slot in 0..self.patches.len() {
            if !inside(self.patches[slot].index()) {
                if self.set_patch_physics(slot, false, backend) {
                    stats.deactivated += 1;
                }
                self.patches[slot].deactivate_objects();
            }
        }
        for slot in 0..self.patches.len() {
            if inside(self.patches[slot].index()) {
                if self.set_patch_physics(slot, true, backend) {
                    stats.activated += 1;
                }
                self.patches[slot].set_active_objects(true, !first, host, world_rect);
            }
        }

        // Serializable objects that left the window go back into stubs.
        for (handle, position, size) in host.live_serializable() {
            let min = position - size * 0.5;
            let max = position + size * 0.5;
            if world_rect.contains(min) && world_rect.contains(max) {
                continue;
            }
            let Some(stub) = host.stream_out(handle) else {
                continue;
            };
            let stub_position = stub.position();
            match self.get_patch_index(stub_position).and_then(|index| self.patch_slot(index)) {
                Some(slot) => {
                    self.patches[slot].add_stub(stub);
                    self.mark_dirty();
                    stats.streamed_out += 1;
                }
                None => warn!(
                    "Object {:?} left the terrain at {:?}; dropping it",
                    handle, stub_position
                ),
            }
        }

        if stats.activated > 0 || stats.deactivated > 0 {
            backend.refresh_queries();
        }
        stats.active_patches =
            self.patches.iter().filter(|patch| patch.is_physics_active()).count();
        debug!(
            "Stream window {:?} -> {:?}: +{} -{} patches, {} objects streamed out",
            previous, rect, stats.activated, stats.deactivated, stats.streamed_out
        );

        self.window.center = Some(center_patch);
        self.window.rect = Some(rect);
        self.window.radius = radius;
        self.window.stats = stats;
        stats.activated > 0 || stats.deactivated > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TerrainConfig;
    use crate::objects::ObjectRegistry;
    use crate::physics::MemoryBackend;
    use crate::stub::{ObjectStub, Transform2};
    use crate::surface::SurfaceCatalog;

    fn grid() -> TerrainGrid {
        // 5x5 patches of 4x4 tiles, radius 1.
        TerrainGrid::with_default_terrain(
            TerrainConfig::small()
                .with_full_size(5, 5)
                .with_patch_size(4)
                .with_window_radius(1),
            SurfaceCatalog::default_catalog(),
        )
    }

    #[test]
    fn test_first_update_activates_window() {
        let mut grid = grid();
        let mut backend = MemoryBackend::new();
        let mut host = ObjectRegistry::new();
        assert!(grid.update_active_window(Vec2::new(10.0, 10.0), &mut backend, &mut host));
        let stats = grid.streaming_stats();
        assert_eq!(stats.activated, 9);
        assert_eq!(stats.active_patches, 9);
        assert_eq!(grid.active_window(), Some(IRect::new(1, 1, 3, 3)));
        assert!(grid.get_patch(2, 2).unwrap().is_physics_active());
        assert!(!grid.get_patch(0, 0).unwrap().is_physics_active());
    }

    #[test]
    fn test_same_center_is_idempotent() {
        let mut grid = grid();
        let mut backend = MemoryBackend::new();
        let mut host = ObjectRegistry::new();
        grid.update_active_window(Vec2::new(10.0, 10.0), &mut backend, &mut host);
        let created = backend.bodies_created;
        let destroyed = backend.bodies_destroyed;

        assert!(!grid.update_active_window(Vec2::new(10.0, 10.0), &mut backend, &mut host));
        assert_eq!(backend.bodies_created, created);
        assert_eq!(backend.bodies_destroyed, destroyed);
        assert_eq!(grid.streaming_stats().activated, 0);
    }

    #[test]
    fn test_window_moves_and_clamps() {
        let mut grid = grid();
        let mut backend = MemoryBackend::new();
        let mut host = ObjectRegistry::new();
        grid.update_active_window(Vec2::new(10.0, 10.0), &mut backend, &mut host);

        // Well past the hysteresis margin into patch (3, 2).
        assert!(grid.update_active_window(Vec2::new(14.0, 10.0), &mut backend, &mut host));
        let stats = grid.streaming_stats();
        assert_eq!(stats.activated, 3);
        assert_eq!(stats.deactivated, 3);
        assert_eq!(stats.moves, 1);
        assert_eq!(grid.active_window(), Some(IRect::new(2, 1, 4, 3)));

        // Corner of the world clamps the window.
        grid.update_active_window(Vec2::new(0.5, 0.5), &mut backend, &mut host);
        assert_eq!(grid.active_window(), Some(IRect::new(0, 0, 1, 1)));
        assert_eq!(grid.streaming_stats().active_patches, 4);
    }

    #[test]
    fn test_hysteresis_holds_center() {
        let mut grid = grid();
        let mut backend = MemoryBackend::new();
        let mut host = ObjectRegistry::new();
        grid.update_active_window(Vec2::new(11.9, 10.0), &mut backend, &mut host);
        // Just past the border of patch (2, 2) but within 0.25 patches.
        assert!(!grid.update_active_window(Vec2::new(12.5, 10.0), &mut backend, &mut host));
        assert_eq!(grid.active_window(), Some(IRect::new(1, 1, 3, 3)));
        // Beyond the margin the window follows.
        assert!(grid.update_active_window(Vec2::new(13.1, 10.0), &mut backend, &mut host));
    }

    #[test]
    fn test_streaming_disabled_activates_everything_once() {
        let mut grid = TerrainGrid::new(
            TerrainConfig::small().with_full_size(3, 2).with_patch_size(2).without_streaming(),
            SurfaceCatalog::default_catalog(),
        );
        let mut backend = MemoryBackend::new();
        let mut host = ObjectRegistry::new();
        grid.update_active_window(Vec2::ZERO, &mut backend, &mut host);
        assert_eq!(grid.streaming_stats().active_patches, 6);
        assert!(!grid.update_active_window(Vec2::new(100.0, 100.0), &mut backend, &mut host));
    }

    #[test]
    fn test_serializable_objects_stream_out_and_back() {
        let mut grid = grid();
        let mut backend = MemoryBackend::new();
        let mut host = ObjectRegistry::new().with_serializable(7);
        let handle = grid
            .add_stub(
                ObjectStub::new(7, Transform2::from_position(Vec2::new(10.0, 10.0)), Vec2::ONE),
                true,
            )
            .unwrap();

        grid.update_active_window(Vec2::new(10.0, 10.0), &mut backend, &mut host);
        assert!(host.contains(handle));
        assert!(grid.get_stub(handle).is_none());

        // Move far away: the object is written back into its patch.
        grid.update_active_window(Vec2::new(1.0, 18.0), &mut backend, &mut host);
        assert!(!host.contains(handle));
        assert_eq!(grid.streaming_stats().streamed_out, 1);
        let stub = grid.get_stub(handle).unwrap();
        assert_eq!(stub.position(), Vec2::new(10.0, 10.0));

        // And comes back to life when the window returns.
        grid.update_active_window(Vec2::new(10.0, 10.0), &mut backend, &mut host);
        assert!(host.contains(handle));
    }
}
