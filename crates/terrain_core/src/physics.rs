//! Physics backend abstraction.
//!
//! Terrain patches never talk to a physics engine directly. They describe
//! their collision through [`PhysicsBackend`], which a game implements on top
//! of its engine (see the `terrain_physics` crate for the rapier version).
//! [`MemoryBackend`] records everything in plain collections and is what the
//! tests run against.

use bevy::prelude::*;
use std::collections::BTreeMap;

/// Opaque handle to a static body owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyHandle(pub u64);

/// Material properties applied to one fixture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixtureProps {
    pub friction: f32,
    pub restitution: f32,
    /// Surface index the fixture was built from, reported back by ray casts.
    pub surface: u8,
}

/// Result of a ray cast against terrain fixtures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub point: Vec2,
    pub normal: Vec2,
    pub body: BodyHandle,
    /// Position of the hit along the ray, 0 at the start and 1 at the end.
    pub fraction: f32,
}

/// Capability the terrain needs from a physics engine.
///
/// Shapes are given in body-local coordinates; the body sits at the world
/// position passed to [`create_static_body`](PhysicsBackend::create_static_body).
pub trait PhysicsBackend {
    fn create_static_body(&mut self, origin: Vec2) -> BodyHandle;

    /// Add a convex polygon fixture. Returns false if the backend rejected it.
    fn add_polygon(&mut self, body: BodyHandle, vertices: &[Vec2], props: &FixtureProps) -> bool;

    /// Add a two-sided segment fixture.
    fn add_edge(&mut self, body: BodyHandle, a: Vec2, b: Vec2, props: &FixtureProps) -> bool;

    /// Destroy a body together with all its fixtures.
    fn destroy_body(&mut self, body: BodyHandle);

    /// Number of live collision proxies (fixtures) across all bodies.
    fn proxy_count(&self) -> usize;

    /// Closest hit along `start -> end` in world space, skipping `ignore`.
    fn raycast(&self, start: Vec2, end: Vec2, ignore: Option<BodyHandle>) -> Option<RayHit>;

    /// Make body and fixture changes visible to [`PhysicsBackend::raycast`].
    ///
    /// The grid calls this after each batch of activations or rebuilds.
    fn refresh_queries(&mut self) {}
}

/// Fixture geometry as recorded by [`MemoryBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedShape {
    Polygon(Vec<Vec2>),
    Edge(Vec2, Vec2),
}

#[derive(Debug, Clone)]
pub struct RecordedFixture {
    pub shape: RecordedShape,
    pub props: FixtureProps,
}

#[derive(Debug, Clone, Default)]
pub struct RecordedBody {
    pub origin: Vec2,
    pub fixtures: Vec<RecordedFixture>,
}

/// In-memory backend that records bodies and fixtures.
#[derive(Debug, Default, Resource)]
pub struct MemoryBackend {
    bodies: BTreeMap<BodyHandle, RecordedBody>,
    next_body: u64,
    pub bodies_created: usize,
    pub bodies_destroyed: usize,
    pub fixtures_created: usize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body(&self, handle: BodyHandle) -> Option<&RecordedBody> {
        self.bodies.get(&handle)
    }

    pub fn bodies(&self) -> impl Iterator<Item = (&BodyHandle, &RecordedBody)> {
        self.bodies.iter()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Total area of polygon fixtures, for merge checks.
    pub fn polygon_area(&self) -> f32 {
        self.bodies
            .values()
            .flat_map(|body| body.fixtures.iter())
            .filter_map(|fixture| match &fixture.shape {
                RecordedShape::Polygon(points) => {
                    Some(crate::edge_table::polygon_area(points).abs())
                }
                RecordedShape::Edge(..) => None,
            })
            .sum()
    }

    fn push_fixture(&mut self, body: BodyHandle, fixture: RecordedFixture) -> bool {
        match self.bodies.get_mut(&body) {
            Some(record) => {
                record.fixtures.push(fixture);
                self.fixtures_created += 1;
                true
            }
            None => false,
        }
    }
}

impl PhysicsBackend for MemoryBackend {
    fn create_static_body(&mut self, origin: Vec2) -> BodyHandle {
        self.next_body += 1;
        let handle = BodyHandle(self.next_body);
        self.bodies.insert(
            handle,
            RecordedBody {
                origin,
                fixtures: Vec::new(),
            },
        );
        self.bodies_created += 1;
        handle
    }

    fn add_polygon(&mut self, body: BodyHandle, vertices: &[Vec2], props: &FixtureProps) -> bool {
        if vertices.len() < 3 {
            return false;
        }
        self.push_fixture(
            body,
            RecordedFixture {
                shape: RecordedShape::Polygon(vertices.to_vec()),
                props: *props,
            },
        )
    }

    fn add_edge(&mut self, body: BodyHandle, a: Vec2, b: Vec2, props: &FixtureProps) -> bool {
        if a == b {
            return false;
        }
        self.push_fixture(
            body,
            RecordedFixture {
                shape: RecordedShape::Edge(a, b),
                props: *props,
            },
        )
    }

    fn destroy_body(&mut self, body: BodyHandle) {
        if self.bodies.remove(&body).is_some() {
            self.bodies_destroyed += 1;
        }
    }

    fn proxy_count(&self) -> usize {
        self.bodies.values().map(|body| body.fixtures.len()).sum()
    }

    fn raycast(&self, start: Vec2, end: Vec2, ignore: Option<BodyHandle>) -> Option<RayHit> {
        let mut best: Option<RayHit> = None;
        for (&handle, body) in &self.bodies {
            if Some(handle) == ignore {
                continue;
            }
            for fixture in &body.fixtures {
                let segments: Vec<(Vec2, Vec2)> = match &fixture.shape {
                    RecordedShape::Polygon(points) => (0..points.len())
                        .map(|i| (points[i], points[(i + 1) % points.len()]))
                        .collect(),
                    RecordedShape::Edge(a, b) => vec![(*a, *b)],
                };
                for (a, b) in segments {
                    let (a, b) = (a + body.origin, b + body.origin);
                    if let Some(fraction) = segment_intersection(start, end, a, b) {
                        if best.is_none_or(|hit| fraction < hit.fraction) {
                            let along = (b - a).normalize_or_zero();
                            let mut normal = Vec2::new(along.y, -along.x);
                            if normal.dot(end - start) > 0.0 {
                                normal = -normal;
                            }
                            best = Some(RayHit {
                                point: start + (end - start) * fraction,
                                normal,
                                body: handle,
                                fraction,
                            });
                        }
                    }
                }
            }
        }
        best
    }
}

/// Fraction along `p -> q` where it crosses segment `a -> b`.
fn segment_intersection(p: Vec2, q: Vec2, a: Vec2, b: Vec2) -> Option<f32> {
    let r = q - p;
    let s = b - a;
    let denom = r.perp_dot(s);
    if denom.abs() < f32::EPSILON {
        return None;
    }
    let t = (a - p).perp_dot(s) / denom;
    let u = (a - p).perp_dot(r) / denom;
    ((0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u)).then_some(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> FixtureProps {
        FixtureProps {
            friction: 0.6,
            restitution: 0.0,
            surface: 1,
        }
    }

    fn unit_square() -> Vec<Vec2> {
        vec![Vec2::ZERO, Vec2::X, Vec2::ONE, Vec2::Y]
    }

    #[test]
    fn test_memory_backend_counts() {
        let mut backend = MemoryBackend::new();
        let body = backend.create_static_body(Vec2::new(4.0, 0.0));
        assert!(backend.add_polygon(body, &unit_square(), &props()));
        assert!(backend.add_edge(body, Vec2::ZERO, Vec2::X, &props()));
        assert!(!backend.add_edge(body, Vec2::X, Vec2::X, &props()));
        assert_eq!(backend.proxy_count(), 2);
        assert!((backend.polygon_area() - 1.0).abs() < 1e-6);

        backend.destroy_body(body);
        assert_eq!(backend.proxy_count(), 0);
        assert_eq!(backend.bodies_destroyed, 1);
        assert!(!backend.add_polygon(body, &unit_square(), &props()));
    }

    #[test]
    fn test_raycast_hits_nearest_face() {
        let mut backend = MemoryBackend::new();
        let body = backend.create_static_body(Vec2::new(2.0, 0.0));
        backend.add_polygon(body, &unit_square(), &props());

        let hit = backend
            .raycast(Vec2::new(0.0, 0.5), Vec2::new(5.0, 0.5), None)
            .unwrap();
        assert!((hit.point - Vec2::new(2.0, 0.5)).length() < 1e-5);
        assert!((hit.normal - Vec2::new(-1.0, 0.0)).length() < 1e-5);
        assert_eq!(hit.body, body);
        assert!((hit.fraction - 0.4).abs() < 1e-5);

        assert!(backend
            .raycast(Vec2::new(0.0, 0.5), Vec2::new(5.0, 0.5), Some(body))
            .is_none());
        assert!(backend
            .raycast(Vec2::new(0.0, 3.0), Vec2::new(5.0, 3.0), None)
            .is_none());
    }
}
