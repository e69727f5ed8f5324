//! Terrain patches: fixed-size blocks of tiles plus their object stubs.
//!
//! A patch is the unit of streaming. Physics and objects activate
//! independently; both transitions are idempotent.
//!
//! ```text
//!   physics:  Inactive <-> Active       (body created / destroyed)
//!   objects:  Inactive <-> Active       (stubs spawned into live objects)
//! ```

use bevy::prelude::*;
use std::collections::HashSet;

use crate::config::TerrainConfig;
use crate::objects::ObjectHost;
use crate::patch_physics::{build_patch_shapes, PatchPhysicsStats, PhysicsEnv, ShapeGeometry};
use crate::physics::{BodyHandle, FixtureProps, PhysicsBackend};
use crate::stub::{ObjectHandle, ObjectStub};
use crate::tile::Tile;

#[derive(Debug)]
pub struct TerrainPatch {
    index: IVec2,
    origin: Vec2,
    patch_size: i32,
    layer_count: i32,
    /// Layer-major, then row-major: `layer * ps * ps + y * ps + x`.
    tiles: Vec<Tile>,
    stubs: Vec<ObjectStub>,
    body: Option<BodyHandle>,
    physics_active: bool,
    objects_active: bool,
    needs_rebuild: bool,
    /// Non-serializable stubs already turned into live objects.
    spawned: HashSet<ObjectHandle>,
    stats: PatchPhysicsStats,
}

impl TerrainPatch {
    pub fn new(index: IVec2, config: &TerrainConfig) -> Self {
        Self {
            index,
            origin: index.as_vec2() * config.patch_world_size(),
            patch_size: config.patch_size,
            layer_count: config.layer_count,
            tiles: vec![Tile::CLEAR; config.tiles_per_patch()],
            stubs: Vec::new(),
            body: None,
            physics_active: false,
            objects_active: false,
            needs_rebuild: false,
            spawned: HashSet::new(),
            stats: PatchPhysicsStats::default(),
        }
    }

    /// Patch coordinates within the grid.
    pub fn index(&self) -> IVec2 {
        self.index
    }

    /// World position of the patch's bottom-left corner.
    pub fn origin(&self) -> Vec2 {
        self.origin
    }

    pub fn patch_size(&self) -> i32 {
        self.patch_size
    }

    pub fn layer_count(&self) -> i32 {
        self.layer_count
    }

    fn tile_index(&self, x: i32, y: i32, layer: i32) -> Option<usize> {
        let ps = self.patch_size;
        if !(0..ps).contains(&x)
            || !(0..ps).contains(&y)
            || !(0..self.layer_count).contains(&layer)
        {
            return None;
        }
        Some((layer * ps * ps + y * ps + x) as usize)
    }

    pub fn get_tile(&self, x: i32, y: i32, layer: i32) -> Option<&Tile> {
        self.tile_index(x, y, layer).map(|i| &self.tiles[i])
    }

    /// Mutable access; the patch is flagged for a physics rebuild.
    pub fn get_tile_mut(&mut self, x: i32, y: i32, layer: i32) -> Option<&mut Tile> {
        let i = self.tile_index(x, y, layer)?;
        self.needs_rebuild = true;
        Some(&mut self.tiles[i])
    }

    pub fn set_tile(&mut self, x: i32, y: i32, layer: i32, tile: Tile) -> bool {
        match self.get_tile_mut(x, y, layer) {
            Some(slot) => {
                *slot = tile;
                true
            }
            None => false,
        }
    }

    /// Tiles of one layer in row-major order.
    pub fn layer_tiles(&self, layer: i32) -> &[Tile] {
        if !(0..self.layer_count).contains(&layer) {
            return &[];
        }
        let count = (self.patch_size * self.patch_size) as usize;
        let start = layer as usize * count;
        &self.tiles[start..start + count]
    }

    /// `(tile position, tile)` pairs of one layer, for rendering.
    pub fn tiles(&self, layer: i32) -> impl Iterator<Item = (IVec2, &Tile)> {
        let ps = self.patch_size;
        self.layer_tiles(layer)
            .iter()
            .enumerate()
            .map(move |(i, tile)| (IVec2::new(i as i32 % ps, i as i32 / ps), tile))
    }

    /// Every tile in storage order.
    pub fn raw_tiles(&self) -> &[Tile] {
        &self.tiles
    }

    /// Replace every tile. `tiles` must match the patch's storage size.
    pub(crate) fn replace_tiles(&mut self, tiles: Vec<Tile>) {
        debug_assert_eq!(tiles.len(), self.tiles.len());
        if tiles.len() == self.tiles.len() {
            self.tiles = tiles;
            self.needs_rebuild = true;
        }
    }

    pub fn stubs(&self) -> &[ObjectStub] {
        &self.stubs
    }

    pub fn add_stub(&mut self, stub: ObjectStub) {
        debug_assert!(
            !stub.handle.is_valid() || self.get_stub(stub.handle).is_none(),
            "duplicate stub handle {:?}",
            stub.handle
        );
        self.stubs.push(stub);
    }

    pub fn remove_stub(&mut self, handle: ObjectHandle) -> Option<ObjectStub> {
        let position = self.stubs.iter().position(|stub| stub.handle == handle)?;
        self.spawned.remove(&handle);
        Some(self.stubs.remove(position))
    }

    pub fn get_stub(&self, handle: ObjectHandle) -> Option<&ObjectStub> {
        self.stubs.iter().find(|stub| stub.handle == handle)
    }

    pub fn get_stub_mut(&mut self, handle: ObjectHandle) -> Option<&mut ObjectStub> {
        self.stubs.iter_mut().find(|stub| stub.handle == handle)
    }

    /// Stub whose box contains `pos`, preferring the one whose edge the
    /// point is nearest so overlapping stubs stay selectable.
    pub fn get_stub_at(&self, pos: Vec2) -> Option<&ObjectStub> {
        self.stubs
            .iter()
            .filter_map(|stub| stub.contains_point(pos).map(|distance| (distance, stub)))
            .min_by(|(a, _), (b, _)| a.total_cmp(b))
            .map(|(_, stub)| stub)
    }

    pub(crate) fn clear_stubs(&mut self) {
        self.stubs.clear();
        self.spawned.clear();
    }

    pub fn is_physics_active(&self) -> bool {
        self.physics_active
    }

    pub fn is_objects_active(&self) -> bool {
        self.objects_active
    }

    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    pub fn mark_for_rebuild(&mut self) {
        self.needs_rebuild = true;
    }

    pub fn body(&self) -> Option<BodyHandle> {
        self.body
    }

    /// Statistics from the last physics build.
    pub fn stats(&self) -> PatchPhysicsStats {
        self.stats
    }

    /// Activate or deactivate collision. Returns whether the state changed.
    pub fn set_active_physics(
        &mut self,
        active: bool,
        backend: &mut dyn PhysicsBackend,
        env: &PhysicsEnv,
    ) -> bool {
        if active == self.physics_active {
            return false;
        }
        if active {
            self.build_physics(backend, env);
            self.notify_tile_hooks(env);
        } else {
            self.destroy_physics(backend);
        }
        self.physics_active = active;
        true
    }

    /// Replace this patch's fixtures with freshly built ones.
    pub fn rebuild(&mut self, backend: &mut dyn PhysicsBackend, env: &PhysicsEnv) {
        if !self.physics_active {
            return;
        }
        self.destroy_physics(backend);
        self.build_physics(backend, env);
    }

    fn destroy_physics(&mut self, backend: &mut dyn PhysicsBackend) {
        if let Some(body) = self.body.take() {
            backend.destroy_body(body);
        }
    }

    fn build_physics(&mut self, backend: &mut dyn PhysicsBackend, env: &PhysicsEnv) {
        let tiles = self.layer_tiles(env.config.physics_layer);
        let shapes = build_patch_shapes(tiles, self.patch_size, env);
        self.needs_rebuild = false;
        self.stats = PatchPhysicsStats {
            merged_tiles: shapes.merged_tiles,
            ..Default::default()
        };
        if shapes.is_empty() {
            return;
        }

        let body = backend.create_static_body(self.origin);
        self.body = Some(body);
        for (i, shape) in shapes.shapes.iter().enumerate() {
            if backend.proxy_count() >= env.config.max_proxies {
                self.stats.budget_exhausted = true;
                self.stats.skipped = shapes.len() - i;
                warn!(
                    "Physics proxy budget of {} exhausted in patch {}; \
                     {} shapes left without collision",
                    env.config.max_proxies, self.index, self.stats.skipped
                );
                break;
            }
            let info = env.catalog.get(shape.surface);
            let props = FixtureProps {
                friction: info.friction_or(env.config.default_friction),
                restitution: info.restitution_or(env.config.default_restitution),
                surface: shape.surface,
            };
            let added = match &shape.geometry {
                ShapeGeometry::Polygon(vertices) => backend.add_polygon(body, vertices, &props),
                ShapeGeometry::Edge(a, b) => backend.add_edge(body, *a, *b, &props),
            };
            if added {
                self.stats.fixtures += 1;
            }
        }
    }

    fn notify_tile_hooks(&self, env: &PhysicsEnv) {
        if !env.catalog.has_hooks() {
            return;
        }
        let ts = env.config.tile_size;
        for (pos, tile) in self.tiles(env.config.physics_layer) {
            let world_pos = self.origin + (pos.as_vec2() + Vec2::splat(0.5)) * ts;
            let mut notified = None;
            for side in 0..2 {
                let surface = tile.surface(side);
                if tile.surface_area(side) <= 0.0 || notified == Some(surface) {
                    continue;
                }
                if let Some(hook) = env.catalog.hook_for_surface(surface) {
                    hook.on_tile_created(world_pos, tile);
                    notified = Some(surface);
                }
            }
        }
    }

    pub fn deactivate_objects(&mut self) {
        self.objects_active = false;
    }

    /// Activate or deactivate objects for this patch.
    ///
    /// On activation, or when the stream window moved, non-serializable stubs
    /// are spawned once and kept; serializable stubs are spawned (and handed
    /// over to the live object) only when fully inside `window`.
    pub fn set_active_objects(
        &mut self,
        active: bool,
        window_moved: bool,
        host: &mut dyn ObjectHost,
        window: Rect,
    ) {
        if !active {
            self.deactivate_objects();
            return;
        }
        if self.objects_active && !window_moved {
            return;
        }
        self.objects_active = true;

        let mut handed_over = Vec::new();
        for stub in &self.stubs {
            if host.is_serializable(stub.object_type) {
                if stub.is_fully_inside(window.min, window.max)
                    && !host.contains(stub.handle)
                    && host.spawn(stub)
                {
                    handed_over.push(stub.handle);
                }
            } else if !self.spawned.contains(&stub.handle) && !host.contains(stub.handle) {
                if host.spawn(stub) {
                    self.spawned.insert(stub.handle);
                }
            }
        }
        self.stubs.retain(|stub| !handed_over.contains(&stub.handle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PhysicsMode;
    use crate::objects::ObjectRegistry;
    use crate::patch_physics::PatchBorder;
    use crate::physics::MemoryBackend;
    use crate::stub::Transform2;
    use crate::surface::{MaterialId, SurfaceCatalog, TileCreateHook};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn config() -> TerrainConfig {
        TerrainConfig::small().with_patch_size(4)
    }

    fn solid_patch(config: &TerrainConfig, surface: u8) -> TerrainPatch {
        let mut patch = TerrainPatch::new(IVec2::new(1, 0), config);
        for y in 0..4 {
            for x in 0..4 {
                patch.set_tile(x, y, 0, Tile::full(surface));
            }
        }
        patch
    }

    #[test]
    fn test_tile_bounds() {
        let config = config();
        let mut patch = TerrainPatch::new(IVec2::ZERO, &config);
        assert!(patch.get_tile(3, 3, 0).is_some());
        assert!(patch.get_tile(4, 0, 0).is_none());
        assert!(patch.get_tile(0, -1, 0).is_none());
        assert!(patch.get_tile(0, 0, 1).is_none());
        assert!(!patch.set_tile(0, 0, 5, Tile::full(1)));
        assert!(patch.set_tile(2, 1, 0, Tile::full(1)));
        assert_eq!(patch.layer_tiles(0)[1 * 4 + 2], Tile::full(1));
        assert_eq!(patch.tiles(0).nth(6).map(|(pos, _)| pos), Some(IVec2::new(2, 1)));
    }

    #[test]
    fn test_physics_activation_is_idempotent() {
        let config = config();
        let catalog = SurfaceCatalog::default_catalog();
        let border = PatchBorder::empty(4);
        let env = PhysicsEnv {
            catalog: &catalog,
            config: &config,
            border: &border,
        };
        let mut backend = MemoryBackend::new();
        let mut patch = solid_patch(&config, 2);

        assert!(patch.set_active_physics(true, &mut backend, &env));
        assert!(!patch.set_active_physics(true, &mut backend, &env));
        assert_eq!(backend.bodies_created, 1);
        assert_eq!(backend.proxy_count(), 1);
        assert_eq!(patch.stats().fixtures, 1);
        let body = backend.body(patch.body().unwrap()).unwrap();
        assert_eq!(body.origin, Vec2::new(4.0, 0.0));

        assert!(patch.set_active_physics(false, &mut backend, &env));
        assert!(!patch.set_active_physics(false, &mut backend, &env));
        assert_eq!(backend.proxy_count(), 0);
        assert_eq!(backend.bodies_destroyed, 1);
    }

    #[test]
    fn test_empty_patch_creates_no_body() {
        let config = config();
        let catalog = SurfaceCatalog::default_catalog();
        let border = PatchBorder::empty(4);
        let env = PhysicsEnv {
            catalog: &catalog,
            config: &config,
            border: &border,
        };
        let mut backend = MemoryBackend::new();
        let mut patch = TerrainPatch::new(IVec2::ZERO, &config);
        patch.set_active_physics(true, &mut backend, &env);
        assert!(patch.body().is_none());
        assert_eq!(backend.bodies_created, 0);
    }

    #[test]
    fn test_proxy_budget() {
        let config = config().with_max_proxies(3);
        let catalog = SurfaceCatalog::default_catalog();
        let border = PatchBorder::empty(4);
        let env = PhysicsEnv {
            catalog: &catalog,
            config: &config,
            border: &border,
        };
        let mut backend = MemoryBackend::new();
        let mut patch = TerrainPatch::new(IVec2::ZERO, &config);
        // Checkerboard: 8 unmergeable tiles.
        for y in 0..4 {
            for x in 0..4 {
                if (x + y) % 2 == 0 {
                    patch.set_tile(x, y, 0, Tile::full(2));
                }
            }
        }
        patch.set_active_physics(true, &mut backend, &env);
        let stats = patch.stats();
        assert!(stats.budget_exhausted);
        assert_eq!(stats.fixtures, 3);
        assert_eq!(stats.skipped, 5);
        assert_eq!(backend.proxy_count(), 3);
    }

    #[test]
    fn test_rebuild_replaces_fixtures() {
        let config = config().with_physics_mode(PhysicsMode::Polygon);
        let catalog = SurfaceCatalog::default_catalog();
        let border = PatchBorder::empty(4);
        let env = PhysicsEnv {
            catalog: &catalog,
            config: &config,
            border: &border,
        };
        let mut backend = MemoryBackend::new();
        let mut patch = solid_patch(&config, 2);
        patch.set_active_physics(true, &mut backend, &env);

        patch.set_tile(0, 0, 0, Tile::CLEAR);
        assert!(patch.needs_rebuild());
        patch.rebuild(&mut backend, &env);
        assert!(!patch.needs_rebuild());
        assert!((backend.polygon_area() - 15.0).abs() < 1e-4);
        assert_eq!(backend.body_count(), 1);
    }

    struct Counter(Arc<AtomicUsize>);

    impl TileCreateHook for Counter {
        fn on_tile_created(&self, _world_pos: Vec2, _tile: &Tile) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_tile_hooks_on_activation() {
        let config = config();
        let mut catalog = SurfaceCatalog::default_catalog();
        let count = Arc::new(AtomicUsize::new(0));
        catalog.register_hook(MaterialId(3), Box::new(Counter(count.clone())));
        let border = PatchBorder::empty(4);
        let env = PhysicsEnv {
            catalog: &catalog,
            config: &config,
            border: &border,
        };
        let mut backend = MemoryBackend::new();
        let mut patch = TerrainPatch::new(IVec2::ZERO, &config);
        patch.set_tile(0, 0, 0, Tile::full(3));
        patch.set_tile(1, 0, 0, Tile::split(0, 8, 3, 1));
        patch.set_tile(2, 0, 0, Tile::full(1));
        patch.set_active_physics(true, &mut backend, &env);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_get_stub_at_prefers_nearest_edge() {
        let config = config();
        let mut patch = TerrainPatch::new(IVec2::ZERO, &config);
        let center = Transform2::from_position(Vec2::new(2.0, 2.0));
        let big = ObjectStub::new(1, center, Vec2::splat(4.0)).with_handle(ObjectHandle(1));
        let small = ObjectStub::new(1, center, Vec2::splat(1.0)).with_handle(ObjectHandle(2));
        patch.add_stub(big);
        patch.add_stub(small);
        assert_eq!(patch.get_stub_at(Vec2::new(2.1, 2.0)).unwrap().handle, ObjectHandle(2));
        assert_eq!(patch.get_stub_at(Vec2::new(3.5, 2.0)).unwrap().handle, ObjectHandle(1));
        assert!(patch.get_stub_at(Vec2::new(10.0, 2.0)).is_none());

        assert!(patch.remove_stub(ObjectHandle(2)).is_some());
        assert!(patch.remove_stub(ObjectHandle(2)).is_none());
        assert_eq!(patch.get_stub_at(Vec2::new(2.1, 2.0)).unwrap().handle, ObjectHandle(1));
    }

    #[test]
    fn test_object_activation() {
        let config = config();
        let mut patch = TerrainPatch::new(IVec2::ZERO, &config);
        let mut host = ObjectRegistry::new().with_serializable(20);
        let stub = |object_type: u32, position: Vec2, handle: u32| {
            ObjectStub::new(object_type, Transform2::from_position(position), Vec2::ONE)
                .with_handle(ObjectHandle(handle))
        };
        patch.add_stub(stub(10, Vec2::new(1.0, 1.0), 1));
        patch.add_stub(stub(20, Vec2::new(2.0, 2.0), 2));
        patch.add_stub(stub(20, Vec2::new(3.9, 2.0), 3));

        let window = Rect::new(0.0, 0.0, 4.0, 4.0);
        patch.set_active_objects(true, false, &mut host, window);
        assert!(patch.is_objects_active());
        assert!(host.contains(ObjectHandle(1)));
        assert!(host.contains(ObjectHandle(2)));
        // Straddles the window edge.
        assert!(!host.contains(ObjectHandle(3)));
        // Non-serializable stubs stay; spawned serializable ones are handed over.
        assert!(patch.get_stub(ObjectHandle(1)).is_some());
        assert!(patch.get_stub(ObjectHandle(2)).is_none());

        // Again without movement: nothing happens.
        patch.set_active_objects(true, false, &mut host, window);
        assert_eq!(host.spawn_count, 2);

        // Non-serializable objects spawn only once, even if destroyed later.
        host.despawn(ObjectHandle(1));
        patch.set_active_objects(true, true, &mut host, Rect::new(0.0, 0.0, 8.0, 8.0));
        assert!(!host.contains(ObjectHandle(1)));
        assert!(host.contains(ObjectHandle(3)));
    }
}
