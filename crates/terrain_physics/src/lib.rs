//! Rapier implementation of the terrain physics backend.

use bevy::prelude::*;
use rapier2d::prelude as rapier;
use rapier::nalgebra::{Point2, Vector2};
use std::collections::HashMap;

use terrain_core::{BodyHandle, FixtureProps, PhysicsBackend, RayHit};

pub struct TerrainPhysicsPlugin;

impl Plugin for TerrainPhysicsPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(RapierTerrainBackend::new())
            .add_systems(Update, step_physics);
    }
}

/// Rapier world holding the terrain's static bodies (and whatever else the
/// game adds to it).
#[derive(Resource)]
pub struct RapierTerrainBackend {
    pub gravity: Vector2<f32>,
    pub integration_parameters: rapier::IntegrationParameters,
    pub physics_pipeline: rapier::PhysicsPipeline,
    pub island_manager: rapier::IslandManager,
    pub broad_phase: rapier::DefaultBroadPhase,
    pub narrow_phase: rapier::NarrowPhase,
    pub rigid_body_set: rapier::RigidBodySet,
    pub collider_set: rapier::ColliderSet,
    pub impulse_joint_set: rapier::ImpulseJointSet,
    pub multibody_joint_set: rapier::MultibodyJointSet,
    pub ccd_solver: rapier::CCDSolver,
    pub query_pipeline: rapier::QueryPipeline,
    bodies: HashMap<BodyHandle, rapier::RigidBodyHandle>,
    body_ids: HashMap<rapier::RigidBodyHandle, BodyHandle>,
    next_body: u64,
    terrain_colliders: usize,
    /// Colliders changed since the query pipeline was last updated.
    queries_stale: bool,
}

impl RapierTerrainBackend {
    pub fn new() -> Self {
        Self {
            gravity: Vector2::new(0.0, -9.81),
            integration_parameters: rapier::IntegrationParameters::default(),
            physics_pipeline: rapier::PhysicsPipeline::new(),
            island_manager: rapier::IslandManager::new(),
            broad_phase: rapier::DefaultBroadPhase::new(),
            narrow_phase: rapier::NarrowPhase::new(),
            rigid_body_set: rapier::RigidBodySet::new(),
            collider_set: rapier::ColliderSet::new(),
            impulse_joint_set: rapier::ImpulseJointSet::new(),
            multibody_joint_set: rapier::MultibodyJointSet::new(),
            ccd_solver: rapier::CCDSolver::new(),
            query_pipeline: rapier::QueryPipeline::new(),
            bodies: HashMap::new(),
            body_ids: HashMap::new(),
            next_body: 1,
            terrain_colliders: 0,
            queries_stale: false,
        }
    }

    /// Rapier handle behind a terrain body.
    pub fn rigid_body(&self, body: BodyHandle) -> Option<rapier::RigidBodyHandle> {
        self.bodies.get(&body).copied()
    }

    pub fn terrain_body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Advance the simulation by one step.
    pub fn step(&mut self) {
        self.physics_pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(),
            &(),
        );
        self.queries_stale = false;
    }

    fn insert_collider(
        &mut self,
        body: BodyHandle,
        collider: rapier::ColliderBuilder,
        props: &FixtureProps,
    ) -> bool {
        let Some(&parent) = self.bodies.get(&body) else {
            warn!("Terrain body {:?} does not exist", body);
            return false;
        };
        let collider = collider
            .friction(props.friction)
            .restitution(props.restitution)
            .user_data(props.surface as u128);
        self.collider_set
            .insert_with_parent(collider, parent, &mut self.rigid_body_set);
        self.terrain_colliders += 1;
        self.queries_stale = true;
        true
    }
}

impl Default for RapierTerrainBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn point(v: Vec2) -> Point2<f32> {
    Point2::new(v.x, v.y)
}

impl PhysicsBackend for RapierTerrainBackend {
    fn create_static_body(&mut self, origin: Vec2) -> BodyHandle {
        let rigid_body =
            rapier::RigidBodyBuilder::fixed().translation(Vector2::new(origin.x, origin.y));
        let handle = self.rigid_body_set.insert(rigid_body);
        let body = BodyHandle(self.next_body);
        self.next_body += 1;
        self.bodies.insert(body, handle);
        self.body_ids.insert(handle, body);
        body
    }

    fn add_polygon(&mut self, body: BodyHandle, vertices: &[Vec2], props: &FixtureProps) -> bool {
        if vertices.len() < 3 {
            return false;
        }
        let points: Vec<Point2<f32>> = vertices.iter().copied().map(point).collect();
        match rapier::ColliderBuilder::convex_polyline(points) {
            Some(collider) => self.insert_collider(body, collider, props),
            None => {
                debug!("Rejected degenerate terrain polygon {:?}", vertices);
                false
            }
        }
    }

    fn add_edge(&mut self, body: BodyHandle, a: Vec2, b: Vec2, props: &FixtureProps) -> bool {
        if a == b {
            return false;
        }
        self.insert_collider(body, rapier::ColliderBuilder::segment(point(a), point(b)), props)
    }

    fn destroy_body(&mut self, body: BodyHandle) {
        let Some(handle) = self.bodies.remove(&body) else {
            return;
        };
        self.body_ids.remove(&handle);
        if let Some(rigid_body) = self.rigid_body_set.get(handle) {
            let colliders = rigid_body.colliders().len();
            self.terrain_colliders = self.terrain_colliders.saturating_sub(colliders);
        }
        self.queries_stale = true;
        self.rigid_body_set.remove(
            handle,
            &mut self.island_manager,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            true,
        );
    }

    fn proxy_count(&self) -> usize {
        self.terrain_colliders
    }

    fn raycast(&self, start: Vec2, end: Vec2, ignore: Option<BodyHandle>) -> Option<RayHit> {
        let dir = end - start;
        if dir == Vec2::ZERO {
            return None;
        }
        let ray = rapier::Ray::new(point(start), Vector2::new(dir.x, dir.y));
        let terrain_only = |_: rapier::ColliderHandle, collider: &rapier::Collider| {
            collider
                .parent()
                .is_some_and(|parent| self.body_ids.contains_key(&parent))
        };
        let mut filter = rapier::QueryFilter::default().predicate(&terrain_only);
        if let Some(&handle) = ignore.and_then(|body| self.bodies.get(&body)) {
            filter = filter.exclude_rigid_body(handle);
        }

        let (collider, hit) = self.query_pipeline.cast_ray_and_get_normal(
            &self.rigid_body_set,
            &self.collider_set,
            &ray,
            1.0,
            true,
            filter,
        )?;
        let parent = self.collider_set.get(collider)?.parent()?;
        let body = *self.body_ids.get(&parent)?;
        Some(RayHit {
            point: start + dir * hit.time_of_impact,
            normal: Vec2::new(hit.normal.x, hit.normal.y),
            body,
            fraction: hit.time_of_impact,
        })
    }

    fn refresh_queries(&mut self) {
        if self.queries_stale {
            self.query_pipeline.update(&self.collider_set);
            self.queries_stale = false;
        }
    }
}

fn step_physics(mut physics: ResMut<RapierTerrainBackend>) {
    physics.step();
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrain_core::{MaterialMask, ObjectRegistry, SurfaceCatalog, TerrainConfig, TerrainGrid};

    fn props() -> FixtureProps {
        FixtureProps {
            friction: 0.6,
            restitution: 0.0,
            surface: 1,
        }
    }

    fn square() -> Vec<Vec2> {
        vec![Vec2::ZERO, Vec2::new(1.0, 0.0), Vec2::ONE, Vec2::new(0.0, 1.0)]
    }

    #[test]
    fn test_bodies_and_proxy_count() {
        let mut backend = RapierTerrainBackend::new();
        let body = backend.create_static_body(Vec2::new(4.0, 0.0));
        assert!(backend.add_polygon(body, &square(), &props()));
        assert!(backend.add_edge(body, Vec2::ZERO, Vec2::new(0.0, 2.0), &props()));
        assert!(!backend.add_polygon(body, &square()[..2], &props()));
        assert!(!backend.add_edge(BodyHandle(99), Vec2::ZERO, Vec2::ONE, &props()));
        assert_eq!(backend.proxy_count(), 2);

        backend.destroy_body(body);
        assert_eq!(backend.proxy_count(), 0);
        assert_eq!(backend.terrain_body_count(), 0);
        assert!(backend.collider_set.is_empty());
    }

    #[test]
    fn test_raycast_hits_nearest_fixture() {
        let mut backend = RapierTerrainBackend::new();
        let near = backend.create_static_body(Vec2::new(2.0, 0.0));
        backend.add_polygon(near, &square(), &props());
        let far = backend.create_static_body(Vec2::new(5.0, 0.0));
        backend.add_polygon(far, &square(), &props());
        // Not visible to queries until refreshed.
        assert!(backend.raycast(Vec2::new(0.0, 0.5), Vec2::new(10.0, 0.5), None).is_none());
        backend.refresh_queries();

        let hit = backend
            .raycast(Vec2::new(0.0, 0.5), Vec2::new(10.0, 0.5), None)
            .unwrap();
        assert_eq!(hit.body, near);
        assert!((hit.point.x - 2.0).abs() < 1e-3);
        assert!((hit.fraction - 0.2).abs() < 1e-3);
        assert!(hit.normal.x < -0.9);

        let hit = backend
            .raycast(Vec2::new(0.0, 0.5), Vec2::new(10.0, 0.5), Some(near))
            .unwrap();
        assert_eq!(hit.body, far);
        assert!(backend.raycast(Vec2::new(0.0, 3.0), Vec2::new(10.0, 3.0), None).is_none());
    }

    #[test]
    fn test_grid_streams_into_rapier() {
        let config = TerrainConfig::small().with_full_size(2, 2).with_patch_size(8);
        let mut grid = TerrainGrid::with_default_terrain(config, SurfaceCatalog::default_catalog());
        let mut backend = RapierTerrainBackend::new();
        let mut host = ObjectRegistry::new();
        grid.update_active_window(Vec2::new(4.0, 4.0), &mut backend, &mut host);
        // One merged rectangle per ground patch.
        assert_eq!(backend.terrain_body_count(), 2);
        assert_eq!(backend.proxy_count(), 2);

        let (start, down) = (Vec2::new(3.5, 6.0), Vec2::new(0.0, -10.0));
        let material = grid.deform_tile(start, down, None, MaterialMask::ALL, true, &backend);
        assert!(material.is_some());
        assert_eq!(grid.update_post(&mut backend), 1);
        assert!(backend.proxy_count() > 2);
        backend.step();
    }
}
