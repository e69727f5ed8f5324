//! Core of a streamable 2D edge-tile terrain.
//!
//! This crate provides:
//! - Edge-byte tile encoding and its precomputed geometry tables
//! - Surface catalog (materials, collision flags, per-material hooks)
//! - Patches of tiles and object stubs, with physics synthesis
//! - The terrain grid: streaming window, deformation, painting, handles
//! - Binary and JSON save/load with embedded fallbacks
//! - A Bevy plugin driving streaming and deferred physics rebuilds

pub mod config;
pub mod deform;
pub mod edge_table;
pub mod grid;
pub mod handles;
pub mod objects;
pub mod paint;
pub mod patch;
pub mod patch_physics;
pub mod physics;
pub mod plugin;
pub mod streaming;
pub mod stub;
pub mod surface;
pub mod terrain_io;
pub mod tile;

pub use config::{GridShape, PhysicsMode, TerrainConfig};
pub use grid::{TerrainGrid, DEFAULT_GROUND_SURFACE};
pub use handles::{HandleAllocator, HandleSource};
pub use objects::{LiveObject, ObjectHost, ObjectRegistry};
pub use patch::TerrainPatch;
pub use patch_physics::{
    build_patch_shapes, PatchBorder, PatchPhysicsStats, PatchShape, PatchShapes, PhysicsEnv,
    ShapeGeometry,
};
pub use physics::{BodyHandle, FixtureProps, MemoryBackend, PhysicsBackend, RayHit};
pub use plugin::{TerrainFocus, TerrainPlugin};
pub use streaming::{StreamWindow, StreamingStats};
pub use stub::{ObjectHandle, ObjectStub, Transform2};
pub use surface::{
    MaterialId, MaterialMask, SurfaceCatalog, SurfaceFlags, SurfaceInfo, TileCreateHook,
};
pub use terrain_io::{EmbeddedTerrain, TerrainData, TerrainIoError, TerrainIoResult, DATA_VERSION};
pub use tile::{Rotation, Tile, TileTexture};
