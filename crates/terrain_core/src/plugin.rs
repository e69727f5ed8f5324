//! Bevy integration: streams the terrain around the camera and runs the
//! deferred physics rebuild once per frame.
//!
//! # Usage
//!
//! ```ignore
//! use terrain_core::{MemoryBackend, ObjectRegistry, TerrainPlugin};
//!
//! App::new()
//!     .insert_resource(MemoryBackend::default())
//!     .insert_resource(ObjectRegistry::default())
//!     .add_plugins(TerrainPlugin::<MemoryBackend, ObjectRegistry>::default())
//!     .run();
//! ```

use bevy::prelude::*;
use std::marker::PhantomData;

use crate::config::TerrainConfig;
use crate::edge_table;
use crate::grid::TerrainGrid;
use crate::objects::ObjectHost;
use crate::physics::PhysicsBackend;
use crate::surface::SurfaceCatalog;

/// Marks the entity the stream window follows. Without one, the first
/// `Camera2d` is used.
#[derive(Component, Debug, Default, Clone, Copy)]
pub struct TerrainFocus;

impl FromWorld for TerrainGrid {
    fn from_world(world: &mut World) -> Self {
        let config = world.get_resource::<TerrainConfig>().cloned().unwrap_or_default();
        TerrainGrid::with_default_terrain(config, SurfaceCatalog::default_catalog())
    }
}

/// Plugin that drives a [`TerrainGrid`] with physics backend `B` and object
/// host `O`.
///
/// Adds:
/// - Default `TerrainConfig` and a default-terrain `TerrainGrid` (if not already present)
/// - `stream_terrain_system` in Update
/// - `rebuild_terrain_physics_system` in PostUpdate
///
/// `B` and `O` must be inserted by the app.
pub struct TerrainPlugin<B, O> {
    _marker: PhantomData<fn() -> (B, O)>,
}

impl<B, O> Default for TerrainPlugin<B, O> {
    fn default() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<B, O> Plugin for TerrainPlugin<B, O>
where
    B: PhysicsBackend + Resource,
    O: ObjectHost + Resource,
{
    fn build(&self, app: &mut App) {
        app.init_resource::<TerrainConfig>()
            .init_resource::<TerrainGrid>()
            .add_systems(Startup, warm_edge_table)
            .add_systems(
                Update,
                stream_terrain_system::<B, O>
                    .run_if(resource_exists::<B>)
                    .run_if(resource_exists::<O>),
            )
            .add_systems(
                PostUpdate,
                rebuild_terrain_physics_system::<B>.run_if(resource_exists::<B>),
            );
    }
}

fn warm_edge_table() {
    edge_table::build_cache();
}

/// Move the stream window to the focus entity (or the 2D camera).
pub fn stream_terrain_system<B: PhysicsBackend + Resource, O: ObjectHost + Resource>(
    focus: Query<&Transform, With<TerrainFocus>>,
    cameras: Query<&Transform, (With<Camera2d>, Without<TerrainFocus>)>,
    mut grid: ResMut<TerrainGrid>,
    mut backend: ResMut<B>,
    mut host: ResMut<O>,
) {
    let Some(transform) = focus.iter().next().or_else(|| cameras.iter().next()) else {
        return;
    };
    let center = transform.translation.truncate();
    grid.update_active_window(center, &mut *backend, &mut *host);
}

/// Rebuild collision for patches edited this frame.
pub fn rebuild_terrain_physics_system<B: PhysicsBackend + Resource>(
    mut grid: ResMut<TerrainGrid>,
    mut backend: ResMut<B>,
) {
    grid.update_post(&mut *backend);
}
