//! Terrain save/load.
//!
//! Supports two formats:
//! - binary (any extension) - little-endian, compact, the shipping format
//! - `.json` - the same data through serde, human readable and debuggable
//!
//! Both are checked against the grid's configured shape before any tile is
//! applied. A file that fails the check never partially overwrites the grid:
//! [`TerrainGrid::load`] falls back to an embedded resource and then to the
//! built-in default terrain.
//!
//! # Binary layout
//!
//! ```text
//! u8   version
//! f32  player_start.x, player_start.y
//! i32  full_size.x, full_size.y      (version 3: a single i32 for both)
//! i32  patch_size
//! i32  layer_count
//! u32  next_object_handle
//! per patch, x outer, y inner:
//!     [u8; 4] per tile, layer-major then row-major
//!     u32  stub count
//!     per stub:
//!         u32 type, f32 x, f32 y, f32 angle, f32 width, f32 height
//!         u32 handle
//!         i32 attribute length, then that many UTF-8 bytes
//! ```

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::config::GridShape;
use crate::grid::TerrainGrid;
use crate::objects::ObjectHost;
use crate::physics::PhysicsBackend;
use crate::stub::{ObjectHandle, ObjectStub, Transform2, MAX_ATTRIBUTE_LEN};
use crate::tile::{Tile, TILE_BYTES};

/// Current file format version.
pub const DATA_VERSION: u8 = 4;

/// Older version with a square grid (single `full_size` value).
pub const LEGACY_VERSION: u8 = 3;

/// Errors that can occur during terrain I/O.
#[derive(Debug)]
pub enum TerrainIoError {
    /// File system error
    Io(std::io::Error),
    /// JSON serialization error
    Json(String),
    /// Unsupported version byte
    VersionMismatch { found: u8, expected: u8 },
    /// File grid shape differs from the configured one
    ShapeMismatch { found: GridShape, expected: GridShape },
    /// Truncated or inconsistent data
    InvalidFormat(String),
    /// No embedded resource registered under this name
    MissingResource(String),
    /// Configuration values the grid can't be built from
    InvalidConfig(String),
}

impl std::fmt::Display for TerrainIoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerrainIoError::Io(e) => write!(f, "IO error: {}", e),
            TerrainIoError::Json(e) => write!(f, "JSON error: {}", e),
            TerrainIoError::VersionMismatch { found, expected } => {
                write!(f, "Unsupported terrain version {} (expected {})", found, expected)
            }
            TerrainIoError::ShapeMismatch { found, expected } => {
                write!(f, "Terrain shape mismatch: file has {}, configured {}", found, expected)
            }
            TerrainIoError::InvalidFormat(msg) => write!(f, "Invalid format: {}", msg),
            TerrainIoError::MissingResource(name) => {
                write!(f, "No embedded terrain named '{}'", name)
            }
            TerrainIoError::InvalidConfig(msg) => write!(f, "Invalid terrain config: {}", msg),
        }
    }
}

impl std::error::Error for TerrainIoError {}

impl From<std::io::Error> for TerrainIoError {
    fn from(e: std::io::Error) -> Self {
        TerrainIoError::Io(e)
    }
}

impl From<serde_json::Error> for TerrainIoError {
    fn from(e: serde_json::Error) -> Self {
        TerrainIoError::Json(e.to_string())
    }
}

/// Result type for terrain I/O operations.
pub type TerrainIoResult<T> = Result<T, TerrainIoError>;

/// Terrain files compiled into the game, addressed by name.
#[derive(Debug, Default, Clone)]
pub struct EmbeddedTerrain {
    resources: HashMap<String, Vec<u8>>,
}

impl EmbeddedTerrain {
    pub fn register(&mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.resources.insert(name.into(), bytes.into());
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.resources.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }
}

/// One patch as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchData {
    pub tiles: Vec<[u8; TILE_BYTES]>,
    pub stubs: Vec<ObjectStub>,
}

/// Everything a terrain file holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainData {
    pub version: u8,
    pub player_start: Vec2,
    pub shape: GridShape,
    pub next_object_handle: u32,
    /// x outer, y inner.
    pub patches: Vec<PatchData>,
}

impl TerrainData {
    /// Check version, shape and array sizes against the expected shape.
    pub fn validate(&self, expected: &GridShape) -> TerrainIoResult<()> {
        if self.version != DATA_VERSION && self.version != LEGACY_VERSION {
            return Err(TerrainIoError::VersionMismatch {
                found: self.version,
                expected: DATA_VERSION,
            });
        }
        if self.shape != *expected {
            return Err(TerrainIoError::ShapeMismatch {
                found: self.shape,
                expected: *expected,
            });
        }
        let patch_count = (expected.full_size.x * expected.full_size.y) as usize;
        if self.patches.len() != patch_count {
            return Err(TerrainIoError::InvalidFormat(format!(
                "expected {} patches, found {}",
                patch_count,
                self.patches.len()
            )));
        }
        let tile_count = tiles_per_patch(expected);
        if let Some(patch) = self.patches.iter().find(|patch| patch.tiles.len() != tile_count) {
            return Err(TerrainIoError::InvalidFormat(format!(
                "expected {} tiles per patch, found {}",
                tile_count,
                patch.tiles.len()
            )));
        }
        Ok(())
    }

    pub fn write_binary<W: Write>(&self, writer: &mut W) -> TerrainIoResult<()> {
        writer.write_all(&[self.version])?;
        writer.write_all(&self.player_start.x.to_le_bytes())?;
        writer.write_all(&self.player_start.y.to_le_bytes())?;
        if self.version == LEGACY_VERSION {
            writer.write_all(&self.shape.full_size.x.to_le_bytes())?;
        } else {
            writer.write_all(&self.shape.full_size.x.to_le_bytes())?;
            writer.write_all(&self.shape.full_size.y.to_le_bytes())?;
        }
        writer.write_all(&self.shape.patch_size.to_le_bytes())?;
        writer.write_all(&self.shape.layer_count.to_le_bytes())?;
        writer.write_all(&self.next_object_handle.to_le_bytes())?;

        for patch in &self.patches {
            for tile in &patch.tiles {
                writer.write_all(tile)?;
            }
            writer.write_all(&(patch.stubs.len() as u32).to_le_bytes())?;
            for stub in &patch.stubs {
                writer.write_all(&stub.object_type.to_le_bytes())?;
                writer.write_all(&stub.transform.position.x.to_le_bytes())?;
                writer.write_all(&stub.transform.position.y.to_le_bytes())?;
                writer.write_all(&stub.transform.angle.to_le_bytes())?;
                writer.write_all(&stub.size.x.to_le_bytes())?;
                writer.write_all(&stub.size.y.to_le_bytes())?;
                writer.write_all(&stub.handle.0.to_le_bytes())?;
                let attributes = stub.attributes().as_bytes();
                writer.write_all(&(attributes.len() as i32).to_le_bytes())?;
                writer.write_all(attributes)?;
            }
        }
        Ok(())
    }

    /// Read binary terrain data, rejecting a wrong version or shape before
    /// any tile bytes are read.
    pub fn read_binary<R: Read>(reader: &mut R, expected: &GridShape) -> TerrainIoResult<Self> {
        let version = read_u8(reader)?;
        if version != DATA_VERSION && version != LEGACY_VERSION {
            return Err(TerrainIoError::VersionMismatch {
                found: version,
                expected: DATA_VERSION,
            });
        }
        let player_start = Vec2::new(read_f32(reader)?, read_f32(reader)?);
        let full_size = if version == LEGACY_VERSION {
            IVec2::splat(read_i32(reader)?)
        } else {
            IVec2::new(read_i32(reader)?, read_i32(reader)?)
        };
        let shape = GridShape {
            full_size,
            patch_size: read_i32(reader)?,
            layer_count: read_i32(reader)?,
        };
        if shape != *expected {
            return Err(TerrainIoError::ShapeMismatch {
                found: shape,
                expected: *expected,
            });
        }
        let next_object_handle = read_u32(reader)?;

        let patch_count = (shape.full_size.x * shape.full_size.y) as usize;
        let tile_count = tiles_per_patch(&shape);
        let mut patches = Vec::with_capacity(patch_count);
        for _ in 0..patch_count {
            let mut raw = vec![0u8; tile_count * TILE_BYTES];
            read_exact(reader, &mut raw)?;
            let tiles = raw
                .chunks_exact(TILE_BYTES)
                .map(|chunk| [chunk[0], chunk[1], chunk[2], chunk[3]])
                .collect();

            let stub_count = read_u32(reader)?;
            let mut stubs = Vec::new();
            for _ in 0..stub_count {
                stubs.push(read_stub(reader)?);
            }
            patches.push(PatchData { tiles, stubs });
        }

        Ok(Self {
            version,
            player_start,
            shape,
            next_object_handle,
            patches,
        })
    }
}

fn tiles_per_patch(shape: &GridShape) -> usize {
    (shape.layer_count * shape.patch_size * shape.patch_size).max(0) as usize
}

fn read_stub<R: Read>(reader: &mut R) -> TerrainIoResult<ObjectStub> {
    let object_type = read_u32(reader)?;
    let position = Vec2::new(read_f32(reader)?, read_f32(reader)?);
    let angle = read_f32(reader)?;
    let size = Vec2::new(read_f32(reader)?, read_f32(reader)?);
    let handle = read_u32(reader)?;
    let length = read_i32(reader)?;
    if !(0..=MAX_ATTRIBUTE_LEN as i32).contains(&length) {
        return Err(TerrainIoError::InvalidFormat(format!(
            "stub {} has an attribute length of {}",
            handle, length
        )));
    }
    let mut attributes = vec![0u8; length as usize];
    read_exact(reader, &mut attributes)?;
    let attributes = String::from_utf8(attributes)
        .map_err(|_| {
            TerrainIoError::InvalidFormat(format!("stub {} has non-UTF-8 attributes", handle))
        })?;

    Ok(ObjectStub::new(object_type, Transform2::new(position, angle), size)
        .with_attributes(attributes)
        .with_handle(ObjectHandle(handle)))
}

/// `read_exact` that reports truncation as a format error.
fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> TerrainIoResult<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TerrainIoError::InvalidFormat("unexpected end of terrain data".to_string())
        } else {
            TerrainIoError::Io(e)
        }
    })
}

fn read_u8<R: Read>(reader: &mut R) -> TerrainIoResult<u8> {
    let mut bytes = [0u8; 1];
    read_exact(reader, &mut bytes)?;
    Ok(bytes[0])
}

fn read_u32<R: Read>(reader: &mut R) -> TerrainIoResult<u32> {
    let mut bytes = [0u8; 4];
    read_exact(reader, &mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_i32<R: Read>(reader: &mut R) -> TerrainIoResult<i32> {
    let mut bytes = [0u8; 4];
    read_exact(reader, &mut bytes)?;
    Ok(i32::from_le_bytes(bytes))
}

fn read_f32<R: Read>(reader: &mut R) -> TerrainIoResult<f32> {
    let mut bytes = [0u8; 4];
    read_exact(reader, &mut bytes)?;
    Ok(f32::from_le_bytes(bytes))
}

fn is_json_path(path: &Path) -> bool {
    path.to_string_lossy().to_lowercase().ends_with(".json")
}

impl TerrainGrid {
    /// Snapshot of the grid in file form, with the stubs held by patches.
    ///
    /// Serializable objects that are live in a host are not in any patch;
    /// use [`TerrainGrid::to_data_with_objects`] to include them.
    pub fn to_data(&self) -> TerrainData {
        TerrainData {
            version: DATA_VERSION,
            player_start: self.player_start,
            shape: self.shape(),
            next_object_handle: self.handles.saved_value(),
            patches: self
                .patches
                .iter()
                .map(|patch| PatchData {
                    tiles: patch.raw_tiles().iter().map(|tile| tile.to_bytes()).collect(),
                    stubs: patch.stubs().to_vec(),
                })
                .collect(),
        }
    }

    /// Snapshot including live serializable objects from `host`, each stored
    /// in the patch under its current position.
    pub fn to_data_with_objects(&self, host: &dyn ObjectHost) -> TerrainData {
        let mut data = self.to_data();
        let stored: HashSet<ObjectHandle> = self.stubs().map(|stub| stub.handle).collect();
        for (handle, position, _) in host.live_serializable() {
            if stored.contains(&handle) {
                continue;
            }
            let Some(stub) = host.snapshot(handle) else {
                continue;
            };
            match self.get_patch_index(position).and_then(|index| self.patch_slot(index)) {
                Some(slot) => data.patches[slot].stubs.push(stub),
                None => warn!(
                    "Object {:?} at {:?} is outside the terrain; not saved",
                    handle, position
                ),
            }
        }
        data
    }

    /// Replace the grid contents with validated data.
    ///
    /// Physics is torn down first; the next window update re-activates.
    pub fn apply_data(
        &mut self,
        data: TerrainData,
        backend: &mut dyn PhysicsBackend,
    ) -> TerrainIoResult<()> {
        data.validate(&self.shape())?;
        self.deactivate_all(backend);
        self.reset_contents();

        self.handles.reset(data.next_object_handle);
        for (patch, patch_data) in self.patches.iter_mut().zip(data.patches) {
            patch.replace_tiles(patch_data.tiles.into_iter().map(Tile::from_bytes).collect());
            for stub in patch_data.stubs {
                self.handles.observe(stub.handle);
                patch.add_stub(stub);
            }
        }
        self.player_start = data.player_start;
        self.clear_dirty();
        Ok(())
    }

    /// Save to `path`; `.json` selects the JSON format.
    ///
    /// Live serializable objects in `host` are written as stubs and stay live.
    pub fn save(&mut self, path: impl AsRef<Path>, host: &dyn ObjectHost) -> TerrainIoResult<()> {
        let path = path.as_ref();
        let data = self.to_data_with_objects(host);
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        if is_json_path(path) {
            serde_json::to_writer_pretty(&mut writer, &data)?;
        } else {
            data.write_binary(&mut writer)?;
        }
        writer.flush()?;

        let stub_count: usize = data.patches.iter().map(|patch| patch.stubs.len()).sum();
        info!(
            "Saved terrain to {:?} ({} patches, {} stubs)",
            path,
            data.patches.len(),
            stub_count
        );
        self.clear_dirty();
        Ok(())
    }

    /// Read and validate a terrain file without applying it.
    pub fn read_file(&self, path: impl AsRef<Path>) -> TerrainIoResult<TerrainData> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let data = if is_json_path(path) {
            serde_json::from_reader(reader)?
        } else {
            TerrainData::read_binary(&mut reader, &self.shape())?
        };
        data.validate(&self.shape())?;
        Ok(data)
    }

    /// Load from `path`.
    ///
    /// On failure the grid falls back to the embedded `fallback_resource`,
    /// then to the built-in default terrain, and the original error is
    /// returned. The grid never holds partially applied data.
    pub fn load(
        &mut self,
        path: impl AsRef<Path>,
        backend: &mut dyn PhysicsBackend,
    ) -> TerrainIoResult<()> {
        let path = path.as_ref();
        let error = match self.read_file(path).and_then(|data| self.apply_data(data, backend)) {
            Ok(()) => {
                let stub_count = self.stubs().count();
                info!(
                    "Loaded terrain from {:?} ({} patches, {} stubs)",
                    path,
                    self.patches.len(),
                    stub_count
                );
                return Ok(());
            }
            Err(e) => e,
        };

        warn!("Failed to load terrain from {:?}: {}", path, error);
        if let Some(name) = self.config.fallback_resource.clone() {
            match self.load_resource(&name, backend) {
                Ok(()) => {
                    warn!("Using embedded terrain '{}' instead", name);
                    return Err(error);
                }
                Err(fallback_error) => warn!("Embedded fallback unavailable: {}", fallback_error),
            }
        }
        warn!("Using built-in default terrain");
        self.deactivate_all(backend);
        self.fill_default_terrain();
        Err(error)
    }

    /// Load an embedded terrain by name.
    pub fn load_resource(
        &mut self,
        name: &str,
        backend: &mut dyn PhysicsBackend,
    ) -> TerrainIoResult<()> {
        let bytes = self
            .embedded
            .get(name)
            .ok_or_else(|| TerrainIoError::MissingResource(name.to_string()))?;
        let data = TerrainData::read_binary(&mut &bytes[..], &self.shape())?;
        self.apply_data(data, backend)?;
        info!("Loaded embedded terrain '{}'", name);
        Ok(())
    }
}
