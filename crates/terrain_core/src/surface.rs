//! Surface definitions for terrain tiles.
//!
//! Surfaces are referenced by a `u8` index from each tile region. Index 0 is
//! reserved and always means "clear": no collision, nothing drawn.
//!
//! The catalog is fixed at 256 entries once built. Entries can be loaded from
//! JSON so a game can tune friction or destructibility without recompiling.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;

use crate::terrain_io::TerrainIoResult;
use crate::tile::Tile;

/// Number of addressable surfaces.
pub const SURFACE_COUNT: usize = 256;

/// Surface index that always means "no surface".
pub const CLEAR_SURFACE: u8 = 0;

/// Physical material identity shared by several surfaces (e.g. "rock" drawn
/// with two different textures).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct MaterialId(pub u8);

/// Bit set of materials, used to restrict which materials a deform may destroy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MaterialMask(pub u32);

impl MaterialMask {
    pub const ALL: MaterialMask = MaterialMask(u32::MAX);
    pub const NONE: MaterialMask = MaterialMask(0);

    pub fn only(material: MaterialId) -> Self {
        Self::NONE.with(material)
    }

    pub fn with(self, material: MaterialId) -> Self {
        Self(self.0 | Self::bit(material))
    }

    pub fn contains(self, material: MaterialId) -> bool {
        self.0 & Self::bit(material) != 0
    }

    fn bit(material: MaterialId) -> u32 {
        // Only 32 material groups are maskable; the rest share the top bit.
        1u32 << material.0.min(31)
    }
}

/// Behaviour flags of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SurfaceFlags {
    #[serde(default)]
    pub collision: bool,
    #[serde(default)]
    pub destructible: bool,
    #[serde(default)]
    pub foreground_occlude: bool,
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceInfo {
    pub name: String,
    #[serde(default)]
    pub texture_id: u32,
    #[serde(default)]
    pub material_id: MaterialId,
    /// RGBA color, each component in 0.0-1.0 range.
    #[serde(default = "default_color")]
    pub color: [f32; 4],
    #[serde(default = "default_color")]
    pub background_color: [f32; 4],
    #[serde(default)]
    pub flags: SurfaceFlags,
    /// Negative means "use the configured default".
    #[serde(default = "use_default_coefficient")]
    pub friction: f32,
    /// Negative means "use the configured default".
    #[serde(default = "use_default_coefficient")]
    pub restitution: f32,
}

fn default_color() -> [f32; 4] {
    [1.0, 1.0, 1.0, 1.0]
}

fn use_default_coefficient() -> f32 {
    -1.0
}

impl Default for SurfaceInfo {
    fn default() -> Self {
        Self::clear()
    }
}

impl SurfaceInfo {
    /// The reserved "no surface" entry.
    pub fn clear() -> Self {
        Self {
            name: "clear".to_string(),
            texture_id: 0,
            material_id: MaterialId(0),
            color: [0.0; 4],
            background_color: [0.0; 4],
            flags: SurfaceFlags::default(),
            friction: -1.0,
            restitution: -1.0,
        }
    }

    /// A colliding surface with default friction and restitution.
    pub fn solid(name: impl Into<String>, material_id: MaterialId, color: [f32; 4]) -> Self {
        Self {
            name: name.into(),
            material_id,
            color,
            background_color: color,
            flags: SurfaceFlags {
                collision: true,
                ..default()
            },
            ..Self::clear()
        }
    }

    pub fn destructible(mut self) -> Self {
        self.flags.destructible = true;
        self
    }

    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction;
        self
    }

    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution;
        self
    }

    pub fn has_collision(&self) -> bool {
        self.flags.collision
    }

    pub fn is_destructible(&self) -> bool {
        self.flags.destructible
    }

    /// Whether two surfaces behave the same to the physics backend.
    pub fn same_physics(&self, other: &SurfaceInfo) -> bool {
        self.has_collision() == other.has_collision()
            && self.friction == other.friction
            && self.restitution == other.restitution
    }

    pub fn friction_or(&self, default: f32) -> f32 {
        if self.friction < 0.0 {
            default
        } else {
            self.friction
        }
    }

    pub fn restitution_or(&self, default: f32) -> f32 {
        if self.restitution < 0.0 {
            default
        } else {
            self.restitution
        }
    }

    /// Batch ordering: visual identity first, then physical identity.
    pub fn cmp_batch(&self, other: &SurfaceInfo) -> Ordering {
        self.texture_id
            .cmp(&other.texture_id)
            .then(self.material_id.cmp(&other.material_id))
            .then(self.flags.collision.cmp(&other.flags.collision))
            .then(self.friction.total_cmp(&other.friction))
            .then(self.restitution.total_cmp(&other.restitution))
    }
}

/// Callback invoked for tiles whose material has gameplay behaviour (spawn
/// particles, register hazards, ...) when their patch activates.
pub trait TileCreateHook: Send + Sync {
    fn on_tile_created(&self, world_pos: Vec2, tile: &Tile);
}

/// Fixed table of 256 surfaces.
pub struct SurfaceCatalog {
    entries: Vec<SurfaceInfo>,
    hooks: HashMap<MaterialId, Box<dyn TileCreateHook>>,
}

impl std::fmt::Debug for SurfaceCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceCatalog")
            .field("defined", &self.entries.iter().filter(|e| e.has_collision()).count())
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl Default for SurfaceCatalog {
    fn default() -> Self {
        Self::default_catalog()
    }
}

impl SurfaceCatalog {
    /// Build a catalog from explicit entries. Entry 0 is always replaced by
    /// the clear surface; missing entries are clear.
    pub fn new(entries: Vec<SurfaceInfo>) -> Self {
        if entries.len() > SURFACE_COUNT {
            warn!(
                "Surface catalog has {} entries, ignoring all past {}",
                entries.len(),
                SURFACE_COUNT
            );
        }
        let mut table: Vec<SurfaceInfo> = entries.into_iter().take(SURFACE_COUNT).collect();
        table.resize_with(SURFACE_COUNT, SurfaceInfo::clear);
        table[CLEAR_SURFACE as usize] = SurfaceInfo::clear();
        Self {
            entries: table,
            hooks: HashMap::new(),
        }
    }

    /// Dirt (1, destructible), rock (2), ice (3, slippery) and a decorative
    /// background surface (4, no collision).
    pub fn default_catalog() -> Self {
        Self::new(vec![
            SurfaceInfo::clear(),
            SurfaceInfo::solid("dirt", MaterialId(1), [0.6, 0.4, 0.2, 1.0]).destructible(),
            SurfaceInfo::solid("rock", MaterialId(2), [0.5, 0.5, 0.5, 1.0]),
            SurfaceInfo::solid("ice", MaterialId(3), [0.7, 0.9, 1.0, 1.0])
                .with_friction(0.05)
                .destructible(),
            SurfaceInfo {
                name: "backdrop".to_string(),
                material_id: MaterialId(4),
                color: [0.2, 0.2, 0.25, 1.0],
                ..SurfaceInfo::clear()
            },
        ])
    }

    pub fn from_json_str(json: &str) -> TerrainIoResult<Self> {
        let entries: Vec<SurfaceInfo> = serde_json::from_str(json)?;
        Ok(Self::new(entries))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> TerrainIoResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn get(&self, index: u8) -> &SurfaceInfo {
        &self.entries[index as usize]
    }

    /// Replace an entry. Entry 0 cannot be redefined.
    pub fn set(&mut self, index: u8, info: SurfaceInfo) {
        if index == CLEAR_SURFACE {
            debug_assert!(false, "surface 0 is reserved");
            return;
        }
        self.entries[index as usize] = info;
    }

    pub fn has_collision(&self, index: u8) -> bool {
        index != CLEAR_SURFACE && self.get(index).has_collision()
    }

    pub fn is_destructible(&self, index: u8) -> bool {
        index != CLEAR_SURFACE && self.get(index).is_destructible()
    }

    pub fn material(&self, index: u8) -> MaterialId {
        self.get(index).material_id
    }

    /// Whether tiles of the two surfaces may share one merged physics shape.
    pub fn can_merge(&self, a: u8, b: u8) -> bool {
        if a == b {
            return true;
        }
        let (sa, sb) = (self.get(a), self.get(b));
        sa.material_id == sb.material_id && sa.same_physics(sb)
    }

    /// Surface indices in batch order (clear surface excluded).
    pub fn batch_order(&self) -> Vec<u8> {
        let mut order: Vec<u8> = (1..=u8::MAX).collect();
        order.sort_by(|&a, &b| self.get(a).cmp_batch(self.get(b)).then(a.cmp(&b)));
        order
    }

    pub fn register_hook(&mut self, material: MaterialId, hook: Box<dyn TileCreateHook>) {
        if self.hooks.insert(material, hook).is_some() {
            warn!("Replacing tile-create hook for material {:?}", material);
        }
    }

    /// Hook registered for the material of `surface`, if any.
    pub fn hook_for_surface(&self, surface: u8) -> Option<&dyn TileCreateHook> {
        if surface == CLEAR_SURFACE {
            return None;
        }
        self.hooks.get(&self.material(surface)).map(|hook| hook.as_ref())
    }

    pub fn has_hooks(&self) -> bool {
        !self.hooks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    #[test]
    fn test_entry_zero_is_clear() {
        let catalog =
            SurfaceCatalog::new(vec![SurfaceInfo::solid("oops", MaterialId(9), [1.0; 4])]);
        assert!(!catalog.has_collision(0));
        assert_eq!(catalog.get(0).name, "clear");
        assert!(!catalog.get(200).has_collision());
    }

    #[test]
    fn test_default_catalog_flags() {
        let catalog = SurfaceCatalog::default_catalog();
        assert!(catalog.has_collision(1) && catalog.is_destructible(1));
        assert!(catalog.has_collision(2) && !catalog.is_destructible(2));
        assert!(!catalog.has_collision(4));
        assert_eq!(catalog.get(3).friction_or(0.6), 0.05);
        assert_eq!(catalog.get(1).friction_or(0.6), 0.6);
    }

    #[test]
    fn test_same_physics_and_merge() {
        let mut catalog = SurfaceCatalog::default_catalog();
        // Same material as dirt, different texture.
        let dark_dirt =
            SurfaceInfo::solid("dark dirt", MaterialId(1), [0.3, 0.2, 0.1, 1.0]).destructible();
        catalog.set(5, SurfaceInfo { texture_id: 7, ..dark_dirt });
        assert!(catalog.get(1).same_physics(catalog.get(5)));
        assert!(catalog.can_merge(1, 5));
        assert!(!catalog.can_merge(1, 2));
        assert!(!catalog.can_merge(1, 3));
    }

    #[test]
    fn test_batch_order_groups_by_texture() {
        let mut catalog = SurfaceCatalog::new(vec![]);
        let solid = |name: &str| SurfaceInfo::solid(name, MaterialId(1), [1.0; 4]);
        catalog.set(1, SurfaceInfo { texture_id: 2, ..solid("a") });
        catalog.set(2, SurfaceInfo { texture_id: 1, ..solid("b") });
        let order = catalog.batch_order();
        let pos = |s: u8| order.iter().position(|&x| x == s).unwrap();
        assert!(pos(2) < pos(1));
        assert_eq!(order.len(), 255);
    }

    #[test]
    fn test_material_mask() {
        let mask = MaterialMask::only(MaterialId(1)).with(MaterialId(3));
        assert!(mask.contains(MaterialId(1)));
        assert!(mask.contains(MaterialId(3)));
        assert!(!mask.contains(MaterialId(2)));
        assert!(MaterialMask::ALL.contains(MaterialId(200)));
    }

    #[test]
    fn test_from_json() {
        let json = r#"[
            {"name": "clear"},
            {"name": "mud", "material_id": 1, "friction": 0.9,
             "flags": {"collision": true, "destructible": true}}
        ]"#;
        let catalog = SurfaceCatalog::from_json_str(json).unwrap();
        assert!(catalog.is_destructible(1));
        assert_eq!(catalog.get(1).friction_or(0.6), 0.9);
        assert_eq!(catalog.get(1).restitution_or(0.1), 0.1);
        assert!(SurfaceCatalog::from_json_str("{").is_err());
    }

    struct CountingHook(Arc<AtomicUsize>);

    impl TileCreateHook for CountingHook {
        fn on_tile_created(&self, _world_pos: Vec2, _tile: &Tile) {
            self.0.fetch_add(1, AtomicOrdering::SeqCst);
        }
    }

    #[test]
    fn test_hook_lookup_by_material() {
        let mut catalog = SurfaceCatalog::default_catalog();
        let count = Arc::new(AtomicUsize::new(0));
        catalog.register_hook(MaterialId(2), Box::new(CountingHook(count.clone())));
        assert!(catalog.hook_for_surface(1).is_none());
        assert!(catalog.hook_for_surface(0).is_none());
        let hook = catalog.hook_for_surface(2).unwrap();
        hook.on_tile_created(Vec2::ZERO, &Tile::full(2));
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
    }
}
