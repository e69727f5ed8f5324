//! The terrain grid: owner of every patch, tile and stub.
//!
//! All outside mutation goes through [`TerrainGrid`] so that the per-patch
//! rebuild flags and the grid's dirty flag stay in step with the data.
//! Streaming lives in [`crate::streaming`], deformation in [`crate::deform`],
//! painting in [`crate::paint`] and persistence in [`crate::terrain_io`]; they
//! all extend this type.
//!
//! Coordinates:
//! - *patch index*: `IVec2` in `[0, full_size)`
//! - *tile index*: global `IVec2` over the whole grid, `patch * patch_size + local`
//! - *world position*: `Vec2`, tile `t` covers `[t * tile_size, (t + 1) * tile_size)`

use bevy::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{GridShape, TerrainConfig};
use crate::handles::{HandleAllocator, HandleSource};
use crate::patch::TerrainPatch;
use crate::patch_physics::{PatchBorder, PhysicsEnv};
use crate::physics::PhysicsBackend;
use crate::streaming::StreamWindow;
use crate::stub::{ObjectHandle, ObjectStub};
use crate::surface::SurfaceCatalog;
use crate::terrain_io::{EmbeddedTerrain, TerrainIoResult};
use crate::tile::Tile;

/// Surface of the ground band in the built-in default terrain.
pub const DEFAULT_GROUND_SURFACE: u8 = 1;

#[derive(Resource)]
pub struct TerrainGrid {
    pub(crate) config: TerrainConfig,
    pub(crate) catalog: SurfaceCatalog,
    /// Column-major (x outer, y inner), matching the save format.
    pub(crate) patches: Vec<TerrainPatch>,
    pub(crate) handles: HandleAllocator,
    pub(crate) player_start: Vec2,
    pub(crate) window: StreamWindow,
    pub(crate) embedded: EmbeddedTerrain,
    pub(crate) rng: StdRng,
    dirty: bool,
}

impl TerrainGrid {
    /// A clear grid.
    ///
    /// Unusable config values are clamped with a warning; use
    /// [`TerrainGrid::try_new`] to reject them instead.
    pub fn new(config: TerrainConfig, catalog: SurfaceCatalog) -> Self {
        let config = match config.validate() {
            Ok(()) => config,
            Err(e) => {
                warn!("{}; clamping to usable values", e);
                config.sanitized()
            }
        };
        let patches = (0..config.full_size.x)
            .flat_map(|x| (0..config.full_size.y).map(move |y| IVec2::new(x, y)))
            .map(|index| TerrainPatch::new(index, &config))
            .collect();
        let rng = StdRng::seed_from_u64(config.deform_seed);
        Self {
            config,
            catalog,
            patches,
            handles: HandleAllocator::default(),
            player_start: Vec2::ZERO,
            window: StreamWindow::default(),
            embedded: EmbeddedTerrain::default(),
            rng,
            dirty: false,
        }
    }

    /// A clear grid, or an error when the config can't describe one.
    pub fn try_new(config: TerrainConfig, catalog: SurfaceCatalog) -> TerrainIoResult<Self> {
        config.validate()?;
        Ok(Self::new(config, catalog))
    }

    /// A grid holding the built-in default terrain.
    pub fn with_default_terrain(config: TerrainConfig, catalog: SurfaceCatalog) -> Self {
        let mut grid = Self::new(config, catalog);
        grid.fill_default_terrain();
        grid
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    pub fn shape(&self) -> GridShape {
        self.config.shape()
    }

    pub fn catalog(&self) -> &SurfaceCatalog {
        &self.catalog
    }

    /// Catalog changes only reach collision on the next rebuild of each patch.
    pub fn catalog_mut(&mut self) -> &mut SurfaceCatalog {
        &mut self.catalog
    }

    pub fn embedded_mut(&mut self) -> &mut EmbeddedTerrain {
        &mut self.embedded
    }

    pub fn player_start(&self) -> Vec2 {
        self.player_start
    }

    pub fn set_player_start(&mut self, position: Vec2) {
        self.player_start = position;
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    // ----- patches -----

    pub(crate) fn patch_slot(&self, index: IVec2) -> Option<usize> {
        let full = self.config.full_size;
        if index.x < 0 || index.y < 0 || index.x >= full.x || index.y >= full.y {
            return None;
        }
        Some((index.x * full.y + index.y) as usize)
    }

    pub fn patches(&self) -> &[TerrainPatch] {
        &self.patches
    }

    pub fn get_patch(&self, x: i32, y: i32) -> Option<&TerrainPatch> {
        self.patch_slot(IVec2::new(x, y)).map(|slot| &self.patches[slot])
    }

    pub fn get_patch_mut(&mut self, x: i32, y: i32) -> Option<&mut TerrainPatch> {
        let slot = self.patch_slot(IVec2::new(x, y))?;
        self.dirty = true;
        Some(&mut self.patches[slot])
    }

    pub fn get_patch_at(&self, world_pos: Vec2) -> Option<&TerrainPatch> {
        let index = self.get_patch_index(world_pos)?;
        self.get_patch(index.x, index.y)
    }

    pub fn get_patch_at_mut(&mut self, world_pos: Vec2) -> Option<&mut TerrainPatch> {
        let index = self.get_patch_index(world_pos)?;
        self.get_patch_mut(index.x, index.y)
    }

    /// Patch containing a world position.
    pub fn get_patch_index(&self, world_pos: Vec2) -> Option<IVec2> {
        let index = (world_pos / self.config.patch_world_size()).floor().as_ivec2();
        self.patch_slot(index).map(|_| index)
    }

    pub fn patch_world_origin(&self, index: IVec2) -> Vec2 {
        index.as_vec2() * self.config.patch_world_size()
    }

    /// World extent of the whole grid as `(min, max)`.
    pub fn world_bounds(&self) -> (Vec2, Vec2) {
        (Vec2::ZERO, self.config.full_size.as_vec2() * self.config.patch_world_size())
    }

    // ----- tiles -----

    /// Global tile containing a world position.
    pub fn get_tile_index(&self, world_pos: Vec2) -> Option<IVec2> {
        let tile = (world_pos / self.config.tile_size).floor().as_ivec2();
        self.split_tile_index(tile).map(|_| tile)
    }

    /// `(patch slot, local tile)` for a global tile index.
    pub(crate) fn split_tile_index(&self, tile: IVec2) -> Option<(usize, IVec2)> {
        let ps = self.config.patch_size;
        let patch = IVec2::new(tile.x.div_euclid(ps), tile.y.div_euclid(ps));
        let local = IVec2::new(tile.x.rem_euclid(ps), tile.y.rem_euclid(ps));
        self.patch_slot(patch).map(|slot| (slot, local))
    }

    pub fn tile_at(&self, tile: IVec2, layer: i32) -> Option<&Tile> {
        let (slot, local) = self.split_tile_index(tile)?;
        self.patches[slot].get_tile(local.x, local.y, layer)
    }

    /// Mutable tile access; flags the owning patch for rebuild and the grid dirty.
    pub fn tile_at_mut(&mut self, tile: IVec2, layer: i32) -> Option<&mut Tile> {
        let (slot, local) = self.split_tile_index(tile)?;
        let tile = self.patches[slot].get_tile_mut(local.x, local.y, layer)?;
        self.dirty = true;
        Some(tile)
    }

    pub fn get_tile(&self, world_pos: Vec2, layer: i32) -> Option<&Tile> {
        let tile = self.get_tile_index(world_pos)?;
        self.tile_at(tile, layer)
    }

    /// World position of a tile's bottom-left corner.
    pub fn tile_world_origin(&self, tile: IVec2) -> Vec2 {
        tile.as_vec2() * self.config.tile_size
    }

    /// Tile-local coordinates (`[0, 1]²`) of a world position inside `tile`.
    pub fn tile_local(&self, tile: IVec2, world_pos: Vec2) -> Vec2 {
        (world_pos - self.tile_world_origin(tile)) / self.config.tile_size
    }

    /// Surface index under a world position.
    pub fn get_surface_index(&self, world_pos: Vec2, layer: i32) -> Option<u8> {
        let tile_index = self.get_tile_index(world_pos)?;
        let tile = self.tile_at(tile_index, layer)?;
        Some(tile.surface_at(self.tile_local(tile_index, world_pos)))
    }

    /// Fill the tile under a world position with one surface.
    pub fn set_surface_index(&mut self, world_pos: Vec2, layer: i32, surface: u8) -> bool {
        let Some(tile_index) = self.get_tile_index(world_pos) else {
            return false;
        };
        let Some(tile) = self.tile_at_mut(tile_index, layer) else {
            return false;
        };
        *tile = Tile::full(surface).with_texture(tile.texture);
        self.mark_tile_changed(tile_index);
        true
    }

    // ----- stubs and handles -----

    /// Give a stub a fresh handle. Editor placements and runtime objects draw
    /// from separate counters that never overlap.
    pub fn assign_new_handle(&mut self, stub: &mut ObjectStub, from_editor: bool) -> ObjectHandle {
        let source = if from_editor {
            HandleSource::Editor
        } else {
            HandleSource::Runtime
        };
        stub.handle = self.handles.allocate(source);
        stub.handle
    }

    /// Handle for a live object spawned at runtime.
    pub fn allocate_object_handle(&mut self) -> ObjectHandle {
        self.handles.allocate(HandleSource::Runtime)
    }

    pub fn handles(&self) -> &HandleAllocator {
        &self.handles
    }

    /// Store a stub in the patch under its position. Stubs without a handle
    /// get one. Returns `None` when the position is outside the grid.
    pub fn add_stub(&mut self, mut stub: ObjectStub, from_editor: bool) -> Option<ObjectHandle> {
        let slot = self.patch_slot(self.get_patch_index(stub.position())?)?;
        if !stub.handle.is_valid() {
            self.assign_new_handle(&mut stub, from_editor);
        } else {
            self.handles.observe(stub.handle);
        }
        let handle = stub.handle;
        self.patches[slot].add_stub(stub);
        self.dirty = true;
        Some(handle)
    }

    pub fn remove_stub(&mut self, handle: ObjectHandle) -> Option<ObjectStub> {
        let removed = self
            .patches
            .iter_mut()
            .find_map(|patch| patch.remove_stub(handle));
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn get_stub(&self, handle: ObjectHandle) -> Option<&ObjectStub> {
        self.patches.iter().find_map(|patch| patch.get_stub(handle))
    }

    /// Stub under a world position, checking the patch there and its
    /// neighbours (boxes may overhang patch borders).
    pub fn get_stub_at(&self, world_pos: Vec2) -> Option<&ObjectStub> {
        let center = (world_pos / self.config.patch_world_size()).floor().as_ivec2();
        let mut best: Option<(f32, &ObjectStub)> = None;
        for dy in -1..=1 {
            for dx in -1..=1 {
                let Some(patch) = self.get_patch(center.x + dx, center.y + dy) else {
                    continue;
                };
                for stub in patch.stubs() {
                    if let Some(distance) = stub.contains_point(world_pos) {
                        if best.is_none_or(|(d, _)| distance < d) {
                            best = Some((distance, stub));
                        }
                    }
                }
            }
        }
        best.map(|(_, stub)| stub)
    }

    /// Next stub of `object_type` after `after` in patch order, wrapping
    /// around. With an invalid `after` the first match is returned.
    pub fn find_next_stub_by_type(
        &self,
        object_type: u32,
        after: ObjectHandle,
    ) -> Option<&ObjectStub> {
        let matches: Vec<&ObjectStub> = self
            .patches
            .iter()
            .flat_map(|patch| patch.stubs())
            .filter(|stub| stub.object_type == object_type)
            .collect();
        let next = matches
            .iter()
            .position(|stub| stub.handle == after)
            .map_or(0, |i| (i + 1) % matches.len());
        matches.get(next).copied()
    }

    /// Replace a stub's handle with a fresh editor handle (used when
    /// duplicating placements).
    pub fn give_stub_new_handle(&mut self, handle: ObjectHandle) -> Option<ObjectHandle> {
        let slot = self.patches.iter().position(|patch| patch.get_stub(handle).is_some())?;
        let fresh = self.handles.allocate(HandleSource::Editor);
        let stub = self.patches[slot].get_stub_mut(handle)?;
        stub.handle = fresh;
        self.dirty = true;
        Some(fresh)
    }

    /// Iterate every stub in the grid.
    pub fn stubs(&self) -> impl Iterator<Item = &ObjectStub> {
        self.patches.iter().flat_map(|patch| patch.stubs())
    }

    // ----- physics -----

    /// Copy the physics-layer tiles around a patch.
    pub(crate) fn build_border(&self, index: IVec2) -> PatchBorder {
        let ps = self.config.patch_size;
        let layer = self.config.physics_layer;
        let mut border = PatchBorder::empty(ps);
        for local in PatchBorder::ring_positions(ps) {
            if let Some(tile) = self.tile_at(index * ps + local, layer) {
                border.set(local.x, local.y, *tile);
            }
        }
        border
    }

    /// Switch one patch's physics on or off. Returns whether it changed.
    pub(crate) fn set_patch_physics(
        &mut self,
        slot: usize,
        active: bool,
        backend: &mut dyn PhysicsBackend,
    ) -> bool {
        let border = if active {
            self.build_border(self.patches[slot].index())
        } else {
            PatchBorder::empty(0)
        };
        let env = PhysicsEnv {
            catalog: &self.catalog,
            config: &self.config,
            border: &border,
        };
        self.patches[slot].set_active_physics(active, backend, &env)
    }

    /// Rebuild physics for every active patch touched since the last pass.
    ///
    /// Patches that ran out of proxy budget on their last build are retried
    /// once the backend is below the budget again. Returns the number of
    /// patches rebuilt.
    pub fn update_post(&mut self, backend: &mut dyn PhysicsBackend) -> usize {
        let mut rebuilt = 0;
        for slot in 0..self.patches.len() {
            let patch = &self.patches[slot];
            if !patch.is_physics_active() {
                continue;
            }
            let starved = patch.stats().budget_exhausted
                && backend.proxy_count() < self.config.max_proxies;
            if !patch.needs_rebuild() && !starved {
                continue;
            }
            let border = self.build_border(patch.index());
            let env = PhysicsEnv {
                catalog: &self.catalog,
                config: &self.config,
                border: &border,
            };
            self.patches[slot].rebuild(backend, &env);
            rebuilt += 1;
        }
        if rebuilt > 0 {
            backend.refresh_queries();
            debug!("Rebuilt physics for {} terrain patches", rebuilt);
        }
        rebuilt
    }

    /// Flag a patch and, when `tile` sits on its border, the neighbours whose
    /// edge collision looks at it.
    pub(crate) fn mark_tile_changed(&mut self, tile: IVec2) {
        let ps = self.config.patch_size;
        for dy in -1..=1 {
            for dx in -1..=1 {
                if let Some((slot, local)) = self.split_tile_index(tile + IVec2::new(dx, dy)) {
                    let own = dx == 0 && dy == 0;
                    let touches =
                        local.x == 0 || local.y == 0 || local.x == ps - 1 || local.y == ps - 1;
                    if own || touches {
                        self.patches[slot].mark_for_rebuild();
                    }
                }
            }
        }
        self.dirty = true;
    }

    /// Destroy every patch's physics body and drop objects activation.
    pub fn deactivate_all(&mut self, backend: &mut dyn PhysicsBackend) {
        for slot in 0..self.patches.len() {
            self.set_patch_physics(slot, false, backend);
            self.patches[slot].deactivate_objects();
        }
        backend.refresh_queries();
        self.window = StreamWindow::default();
    }

    /// Reset to an empty grid: no tiles, no stubs, fresh handles.
    pub fn clear(&mut self, backend: &mut dyn PhysicsBackend) {
        self.deactivate_all(backend);
        self.reset_contents();
    }

    pub(crate) fn reset_contents(&mut self) {
        for patch in &mut self.patches {
            let count = patch.raw_tiles().len();
            patch.replace_tiles(vec![Tile::CLEAR; count]);
            patch.clear_stubs();
        }
        self.handles = HandleAllocator::default();
        self.player_start = Vec2::ZERO;
        self.window = StreamWindow::default();
        self.rng = StdRng::seed_from_u64(self.config.deform_seed);
        self.dirty = false;
    }

    /// Built-in default terrain: a solid ground band along the bottom patch
    /// row, a quarter of a patch thick.
    pub(crate) fn fill_default_terrain(&mut self) {
        self.reset_contents();
        let ps = self.config.patch_size;
        let band = (ps / 4).max(1);
        let layer = self.config.physics_layer;
        for patch in self.patches.iter_mut().filter(|patch| patch.index().y == 0) {
            for y in 0..band {
                for x in 0..ps {
                    patch.set_tile(x, y, layer, Tile::full(DEFAULT_GROUND_SURFACE));
                }
            }
        }
        self.player_start = Vec2::new(
            self.config.full_size.x as f32 * self.config.patch_world_size() * 0.5,
            (band + 1) as f32 * self.config.tile_size,
        );
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::ObjectRegistry;
    use crate::physics::MemoryBackend;
    use crate::stub::Transform2;
    use crate::terrain_io::TerrainIoError;

    fn grid() -> TerrainGrid {
        TerrainGrid::new(
            TerrainConfig::small().with_full_size(3, 2).with_patch_size(4),
            SurfaceCatalog::default_catalog(),
        )
    }

    #[test]
    fn test_patch_lookup() {
        let grid = grid();
        assert_eq!(grid.patches().len(), 6);
        assert_eq!(grid.get_patch(2, 1).unwrap().index(), IVec2::new(2, 1));
        assert!(grid.get_patch(3, 0).is_none());
        assert!(grid.get_patch(0, -1).is_none());
        assert_eq!(grid.get_patch_index(Vec2::new(9.0, 5.0)), Some(IVec2::new(2, 1)));
        assert_eq!(grid.get_patch_index(Vec2::new(-0.1, 1.0)), None);
        assert_eq!(grid.patch_world_origin(IVec2::new(2, 1)), Vec2::new(8.0, 4.0));
        // Column-major storage.
        assert_eq!(grid.patches()[1].index(), IVec2::new(0, 1));
    }

    #[test]
    fn test_tile_lookup_and_surface_index() {
        let mut grid = grid();
        assert_eq!(grid.get_tile_index(Vec2::new(5.5, 2.5)), Some(IVec2::new(5, 2)));
        assert!(grid.get_tile_index(Vec2::new(12.0, 0.0)).is_none());

        assert!(grid.set_surface_index(Vec2::new(5.5, 2.5), 0, 2));
        assert!(grid.is_dirty());
        assert_eq!(grid.get_surface_index(Vec2::new(5.1, 2.9), 0), Some(2));
        assert_eq!(grid.get_patch(1, 0).unwrap().get_tile(1, 2, 0), Some(&Tile::full(2)));
        assert!(grid.get_patch(1, 0).unwrap().needs_rebuild());
        assert!(!grid.set_surface_index(Vec2::new(50.0, 0.0), 0, 2));
    }

    #[test]
    fn test_stub_operations() {
        let mut grid = grid();
        let stub = ObjectStub::new(3, Transform2::from_position(Vec2::new(1.0, 1.0)), Vec2::ONE);
        let first = grid.add_stub(stub.clone(), true).unwrap();
        let at = |x: f32, y: f32| Transform2::from_position(Vec2::new(x, y));
        let second = grid.add_stub(ObjectStub::new(3, at(9.0, 5.0), Vec2::ONE), true).unwrap();
        let other = grid.add_stub(ObjectStub::new(4, at(5.0, 1.0), Vec2::ONE), false).unwrap();
        assert_ne!(first, second);
        assert_ne!(second, other);
        assert!(grid.add_stub(ObjectStub::new(3, at(-5.0, 1.0), Vec2::ONE), true).is_none());

        assert_eq!(grid.find_next_stub_by_type(3, ObjectHandle::INVALID).unwrap().handle, first);
        assert_eq!(grid.find_next_stub_by_type(3, first).unwrap().handle, second);
        assert_eq!(grid.find_next_stub_by_type(3, second).unwrap().handle, first);
        assert!(grid.find_next_stub_by_type(99, first).is_none());

        assert_eq!(grid.get_stub_at(Vec2::new(9.2, 5.1)).unwrap().handle, second);
        let renewed = grid.give_stub_new_handle(second).unwrap();
        assert!(grid.get_stub(second).is_none());
        assert_eq!(grid.get_stub(renewed).unwrap().object_type, 3);
        // A missing stub doesn't use up a handle.
        let saved = grid.handles().saved_value();
        assert!(grid.give_stub_new_handle(ObjectHandle(999)).is_none());
        assert_eq!(grid.handles().saved_value(), saved);

        assert!(grid.remove_stub(first).is_some());
        assert!(grid.get_stub(first).is_none());
        assert_eq!(grid.stubs().count(), 2);
    }

    #[test]
    fn test_stub_near_patch_border_is_found() {
        let mut grid = grid();
        // Stored in patch (0, 0) but overhangs into patch (1, 0).
        let stub = ObjectStub::new(1, Transform2::from_position(Vec2::new(3.8, 1.0)), Vec2::ONE);
        let handle = grid.add_stub(stub, true).unwrap();
        assert_eq!(grid.get_stub_at(Vec2::new(4.2, 1.0)).unwrap().handle, handle);
    }

    #[test]
    fn test_update_post_rebuilds_only_touched_patches() {
        let mut grid = TerrainGrid::with_default_terrain(
            TerrainConfig::small().with_full_size(2, 1).with_patch_size(4).without_streaming(),
            SurfaceCatalog::default_catalog(),
        );
        let mut backend = MemoryBackend::new();
        for slot in 0..grid.patches.len() {
            grid.set_patch_physics(slot, true, &mut backend);
        }
        assert_eq!(grid.update_post(&mut backend), 0);

        grid.set_surface_index(Vec2::new(1.5, 0.5), 0, 0);
        assert_eq!(grid.update_post(&mut backend), 1);
        assert_eq!(grid.update_post(&mut backend), 0);
        assert_eq!(backend.body_count(), 2);
    }

    #[test]
    fn test_budget_starved_patch_is_rebuilt_once_proxies_free_up() {
        let mut grid = TerrainGrid::new(
            TerrainConfig::small()
                .with_full_size(2, 1)
                .with_patch_size(4)
                .without_streaming()
                .with_max_proxies(16),
            SurfaceCatalog::default_catalog(),
        );
        // Patch (0, 0): a dirt/rock checkerboard, one proxy per tile.
        for y in 0..4 {
            for x in 0..4 {
                let surface = if (x + y) % 2 == 0 { 1 } else { 2 };
                *grid.tile_at_mut(IVec2::new(x, y), 0).unwrap() = Tile::full(surface);
            }
        }
        // Patch (1, 0): four isolated dirt tiles.
        for tile in [IVec2::new(4, 0), IVec2::new(6, 0), IVec2::new(4, 2), IVec2::new(6, 2)] {
            *grid.tile_at_mut(tile, 0).unwrap() = Tile::full(1);
        }
        let mut backend = MemoryBackend::new();
        let mut host = ObjectRegistry::new();
        grid.update_active_window(Vec2::splat(2.0), &mut backend, &mut host);

        let starved = grid.get_patch(1, 0).unwrap().stats();
        assert!(starved.budget_exhausted);
        assert_eq!(starved.fixtures, 0);
        assert_eq!(starved.skipped, 4);
        // Still no room: nothing to retry.
        assert_eq!(grid.update_post(&mut backend), 0);

        let first = grid.get_patch_mut(0, 0).unwrap();
        for y in 0..4 {
            for x in 0..4 {
                first.set_tile(x, y, 0, Tile::CLEAR);
            }
        }
        first.mark_for_rebuild();
        assert_eq!(grid.update_post(&mut backend), 2);

        let stats = grid.get_patch(1, 0).unwrap().stats();
        assert!(!stats.budget_exhausted);
        assert_eq!(stats.fixtures, 4);
        assert_eq!(backend.proxy_count(), 4);
        assert_eq!(grid.update_post(&mut backend), 0);
    }

    #[test]
    fn test_unusable_config_is_rejected_or_clamped() {
        let mut config = TerrainConfig::small().with_full_size(1, 1).with_patch_size(4);
        config.physics_layer = config.layer_count;
        assert!(matches!(
            TerrainGrid::try_new(config.clone(), SurfaceCatalog::default_catalog()),
            Err(TerrainIoError::InvalidConfig(_))
        ));

        let mut grid = TerrainGrid::with_default_terrain(config, SurfaceCatalog::default_catalog());
        assert_eq!(grid.config().physics_layer, 0);
        let mut backend = MemoryBackend::new();
        let mut host = ObjectRegistry::new();
        grid.update_active_window(Vec2::splat(2.0), &mut backend, &mut host);
        assert!(backend.proxy_count() > 0);

        let empty_patches = TerrainConfig::small().with_patch_size(0);
        let grid = TerrainGrid::new(empty_patches, SurfaceCatalog::default_catalog());
        assert_eq!(grid.config().patch_size, 1);
        assert_eq!(grid.get_tile_index(Vec2::new(0.5, 0.5)), Some(IVec2::ZERO));
    }

    #[test]
    fn test_default_terrain_and_clear() {
        let mut grid = TerrainGrid::with_default_terrain(
            TerrainConfig::small().with_full_size(2, 2).with_patch_size(8),
            SurfaceCatalog::default_catalog(),
        );
        assert!(!grid.is_dirty());
        assert_eq!(grid.get_surface_index(Vec2::new(3.0, 1.5), 0), Some(DEFAULT_GROUND_SURFACE));
        assert_eq!(grid.get_surface_index(Vec2::new(3.0, 2.5), 0), Some(0));
        assert_eq!(grid.get_surface_index(Vec2::new(3.0, 8.5), 0), Some(0));

        let mut backend = MemoryBackend::new();
        grid.add_stub(ObjectStub::new(1, Transform2::from_position(Vec2::ONE), Vec2::ONE), true);
        grid.clear(&mut backend);
        assert_eq!(grid.get_surface_index(Vec2::new(3.0, 1.5), 0), Some(0));
        assert_eq!(grid.stubs().count(), 0);
        assert_eq!(grid.handles().saved_value(), 1);
        assert!(!grid.is_dirty());
    }
}
