//! Terrain configuration.
//!
//! The grid shape stored here is the one every save file is checked against:
//! a file declaring a different shape is rejected rather than reinterpreted.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::terrain_io::{TerrainIoError, TerrainIoResult};

/// How patch collision is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PhysicsMode {
    /// Convex polygons, with full tiles merged into rectangles.
    #[default]
    Polygon,
    /// Thin segments along every boundary between colliding and
    /// non-colliding material.
    Edge,
}

/// Grid dimensions declared by a save file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridShape {
    pub full_size: IVec2,
    pub patch_size: i32,
    pub layer_count: i32,
}

impl fmt::Display for GridShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} patches of {}x{} tiles, {} layers",
            self.full_size.x, self.full_size.y, self.patch_size, self.patch_size, self.layer_count
        )
    }
}

/// Configuration for the terrain grid.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Grid size in patches.
    /// Default: 16x16
    pub full_size: IVec2,

    /// Tiles per patch side.
    /// Default: 16
    pub patch_size: i32,

    /// Tile layers per patch. Only `physics_layer` collides.
    /// Default: 2
    pub layer_count: i32,

    /// World units per tile.
    /// Default: 1.0
    pub tile_size: f32,

    pub physics_mode: PhysicsMode,

    /// Layer that produces collision.
    /// Default: 0
    pub physics_layer: i32,

    /// Fixture creation stops once the backend holds this many proxies.
    /// Default: 20000
    pub max_proxies: usize,

    /// Friction for surfaces that don't set their own.
    pub default_friction: f32,

    /// Restitution for surfaces that don't set their own.
    pub default_restitution: f32,

    /// When false the whole grid is activated once and never streamed.
    pub streaming_enabled: bool,

    /// Patches kept active on each side of the centre patch.
    /// Default: 1 (a 3x3 window)
    pub window_radius: i32,

    /// How far (in patches) the reference point must travel past the centre
    /// patch's bounds before the window moves.
    /// Default: 0.25
    pub window_hysteresis: f32,

    /// Tiles whose remaining solid area drops below this after a deform are
    /// cleared entirely.
    /// Default: 0.4
    pub min_surface_area: f32,

    /// How far (in tiles) a directional deform cuts past the hit point.
    /// Default: 0.25
    pub deform_tile_depth: f32,

    /// Seed for deformation jitter.
    pub deform_seed: u64,

    /// Embedded terrain consulted when a file can't be loaded.
    pub fallback_resource: Option<String>,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            full_size: IVec2::new(16, 16),
            patch_size: 16,
            layer_count: 2,
            tile_size: 1.0,
            physics_mode: PhysicsMode::Polygon,
            physics_layer: 0,
            max_proxies: 20_000,
            default_friction: 0.6,
            default_restitution: 0.0,
            streaming_enabled: true,
            window_radius: 1,
            window_hysteresis: 0.25,
            min_surface_area: 0.4,
            deform_tile_depth: 0.25,
            deform_seed: 0x5eed,
            fallback_resource: Some("default_terrain".to_string()),
        }
    }
}

impl TerrainConfig {
    /// Create config for a small grid (good for testing).
    pub fn small() -> Self {
        Self {
            full_size: IVec2::new(4, 4),
            patch_size: 8,
            layer_count: 1,
            ..Default::default()
        }
    }

    /// Load and validate a config.
    pub fn from_json_file(path: impl AsRef<Path>) -> TerrainIoResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that a grid can be built from this config.
    pub fn validate(&self) -> TerrainIoResult<()> {
        let invalid = |msg: String| Err(TerrainIoError::InvalidConfig(msg));
        if self.full_size.x <= 0 || self.full_size.y <= 0 {
            return invalid(format!("full_size must be positive, got {}", self.full_size));
        }
        if self.patch_size <= 0 {
            return invalid(format!("patch_size must be positive, got {}", self.patch_size));
        }
        if self.layer_count <= 0 {
            return invalid(format!("layer_count must be positive, got {}", self.layer_count));
        }
        if !(0..self.layer_count).contains(&self.physics_layer) {
            return invalid(format!(
                "physics_layer {} is outside 0..{}",
                self.physics_layer, self.layer_count
            ));
        }
        if !(self.tile_size.is_finite() && self.tile_size > 0.0) {
            return invalid(format!("tile_size must be positive, got {}", self.tile_size));
        }
        Ok(())
    }

    /// Copy with out-of-range values clamped to the nearest usable ones.
    pub fn sanitized(&self) -> Self {
        let mut config = self.clone();
        config.full_size = config.full_size.max(IVec2::ONE);
        config.patch_size = config.patch_size.max(1);
        config.layer_count = config.layer_count.max(1);
        config.physics_layer = config.physics_layer.clamp(0, config.layer_count - 1);
        if !(config.tile_size.is_finite() && config.tile_size > 0.0) {
            config.tile_size = 1.0;
        }
        config
    }

    pub fn with_full_size(mut self, x: i32, y: i32) -> Self {
        self.full_size = IVec2::new(x, y);
        self
    }

    pub fn with_patch_size(mut self, patch_size: i32) -> Self {
        self.patch_size = patch_size;
        self
    }

    pub fn with_layers(mut self, layer_count: i32) -> Self {
        self.layer_count = layer_count;
        self
    }

    pub fn with_physics_mode(mut self, mode: PhysicsMode) -> Self {
        self.physics_mode = mode;
        self
    }

    pub fn with_window_radius(mut self, radius: i32) -> Self {
        self.window_radius = radius;
        self
    }

    pub fn with_max_proxies(mut self, max_proxies: usize) -> Self {
        self.max_proxies = max_proxies;
        self
    }

    /// Disable streaming: everything activates on the first window update.
    pub fn without_streaming(mut self) -> Self {
        self.streaming_enabled = false;
        self
    }

    pub fn shape(&self) -> GridShape {
        GridShape {
            full_size: self.full_size,
            patch_size: self.patch_size,
            layer_count: self.layer_count,
        }
    }

    /// World size of one patch side.
    pub fn patch_world_size(&self) -> f32 {
        self.patch_size as f32 * self.tile_size
    }

    pub fn tiles_per_patch(&self) -> usize {
        (self.layer_count * self.patch_size * self.patch_size).max(0) as usize
    }
}
