use bevy::prelude::*;
use bevy::window::PrimaryWindow;
use terrain_core::{MaterialMask, ObjectRegistry, TerrainGrid, TerrainPlugin};
use terrain_physics::{RapierTerrainBackend, TerrainPhysicsPlugin};

/// Terrain file given on the command line, if any.
#[derive(Resource, Debug, Clone, Default)]
struct TerrainFile(Option<String>);

const PAN_SPEED: f32 = 20.0;
const BLAST_RADIUS: f32 = 1.5;

fn main() {
    App::new()
        .add_plugins(DefaultPlugins)
        .add_plugins(TerrainPhysicsPlugin)
        .insert_resource(ObjectRegistry::default())
        .insert_resource(TerrainFile(std::env::args().nth(1)))
        .add_plugins(TerrainPlugin::<RapierTerrainBackend, ObjectRegistry>::default())
        // Dark background
        .insert_resource(ClearColor(Color::srgb(0.05, 0.05, 0.08)))
        .add_systems(Startup, (load_terrain, setup).chain())
        .add_systems(Update, (pan_camera, blast_on_click, draw_terrain))
        .run();
}

fn load_terrain(
    file: Res<TerrainFile>,
    mut grid: ResMut<TerrainGrid>,
    mut backend: ResMut<RapierTerrainBackend>,
) {
    let Some(path) = &file.0 else {
        info!("No terrain file given, using the built-in default terrain");
        return;
    };
    if let Err(e) = grid.load(path, &mut *backend) {
        error!("Could not load {}: {}", path, e);
    }
}

fn setup(mut commands: Commands, grid: Res<TerrainGrid>) {
    let start = grid.player_start();
    commands.spawn((
        Camera2d,
        Projection::from(OrthographicProjection {
            scale: 0.05,
            ..OrthographicProjection::default_2d()
        }),
        Transform::from_xyz(start.x, start.y, 0.0),
    ));
}

fn pan_camera(
    keyboard: Res<ButtonInput<KeyCode>>,
    time: Res<Time>,
    mut cameras: Query<&mut Transform, With<Camera2d>>,
) {
    let mut direction = Vec2::ZERO;
    if keyboard.pressed(KeyCode::KeyA) || keyboard.pressed(KeyCode::ArrowLeft) {
        direction.x -= 1.0;
    }
    if keyboard.pressed(KeyCode::KeyD) || keyboard.pressed(KeyCode::ArrowRight) {
        direction.x += 1.0;
    }
    if keyboard.pressed(KeyCode::KeyS) || keyboard.pressed(KeyCode::ArrowDown) {
        direction.y -= 1.0;
    }
    if keyboard.pressed(KeyCode::KeyW) || keyboard.pressed(KeyCode::ArrowUp) {
        direction.y += 1.0;
    }
    let step = direction.normalize_or_zero() * PAN_SPEED * time.delta_secs();
    for mut transform in cameras.iter_mut() {
        transform.translation += step.extend(0.0);
    }
}

/// Left click carves a crater, right click digs along the view ray.
fn blast_on_click(
    mouse_button: Res<ButtonInput<MouseButton>>,
    windows: Query<&Window, With<PrimaryWindow>>,
    cameras: Query<(&Camera, &GlobalTransform), With<Camera2d>>,
    mut grid: ResMut<TerrainGrid>,
    backend: Res<RapierTerrainBackend>,
) {
    let Ok(window) = windows.single() else {
        return;
    };
    let Ok((camera, camera_transform)) = cameras.single() else {
        return;
    };
    let Some(cursor) = window.cursor_position() else {
        return;
    };
    let Ok(world) = camera.viewport_to_world_2d(camera_transform, cursor) else {
        return;
    };

    if mouse_button.just_pressed(MouseButton::Left) {
        grid.deform_area(world, BLAST_RADIUS, MaterialMask::ALL, 0.2);
    }
    if mouse_button.just_pressed(MouseButton::Right) {
        let eye = camera_transform.translation().truncate();
        let ray = (world - eye) * 2.0;
        let material = grid.deform_tile(eye, ray, None, MaterialMask::ALL, false, &*backend);
        debug!("Dig hit {:?}", material);
    }
}

fn draw_terrain(grid: Res<TerrainGrid>, mut gizmos: Gizmos) {
    let ts = grid.config().tile_size;
    let layer = grid.config().physics_layer;
    for patch in grid.patches().iter().filter(|patch| patch.is_physics_active()) {
        for (pos, tile) in patch.tiles(layer) {
            for side in 0..2 {
                let surface = tile.surface(side);
                if surface == 0 || tile.surface_area(side) <= 0.0 {
                    continue;
                }
                let [r, g, b, a] = grid.catalog().get(surface).color;
                let corner = patch.origin() + pos.as_vec2() * ts;
                let vertices = tile.surface_vertices(side);
                let outline = vertices
                    .iter()
                    .chain(vertices.first())
                    .map(|v| corner + *v * ts);
                gizmos.linestrip_2d(outline, Color::srgba(r, g, b, a));
            }
        }
    }
}
