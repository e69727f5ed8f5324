//! Object placement stubs.
//!
//! Stubs are the persisted form of placed game objects. A live object is
//! spawned from its stub when the owning patch activates, and serializable
//! objects are written back into a stub when they stream out.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// Longest attribute string a stub may carry, in bytes.
pub const MAX_ATTRIBUTE_LEN: usize = 255;

/// Stable identity of a placed object. 0 is reserved as "unassigned".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ObjectHandle(pub u32);

impl ObjectHandle {
    pub const INVALID: ObjectHandle = ObjectHandle(0);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

/// Position plus rotation (radians) in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform2 {
    pub position: Vec2,
    pub angle: f32,
}

impl Transform2 {
    pub fn new(position: Vec2, angle: f32) -> Self {
        Self { position, angle }
    }

    pub fn from_position(position: Vec2) -> Self {
        Self::new(position, 0.0)
    }

    /// Express a world point in this transform's local frame.
    pub fn inverse_transform_point(&self, point: Vec2) -> Vec2 {
        let rotation = Vec2::from_angle(-self.angle);
        rotation.rotate(point - self.position)
    }
}

/// Placement descriptor for one game object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectStub {
    pub object_type: u32,
    pub transform: Transform2,
    /// Full extents of the object's box (centred on the transform position).
    pub size: Vec2,
    attributes: String,
    pub handle: ObjectHandle,
}

impl ObjectStub {
    pub fn new(object_type: u32, transform: Transform2, size: Vec2) -> Self {
        Self {
            object_type,
            transform,
            size,
            attributes: String::new(),
            handle: ObjectHandle::INVALID,
        }
    }

    pub fn with_attributes(mut self, attributes: impl Into<String>) -> Self {
        self.set_attributes(attributes);
        self
    }

    pub fn with_handle(mut self, handle: ObjectHandle) -> Self {
        self.handle = handle;
        self
    }

    pub fn attributes(&self) -> &str {
        &self.attributes
    }

    /// Replace the attribute string, truncating at a character boundary so it
    /// fits in [`MAX_ATTRIBUTE_LEN`] bytes.
    pub fn set_attributes(&mut self, attributes: impl Into<String>) {
        let mut attributes = attributes.into();
        if attributes.len() > MAX_ATTRIBUTE_LEN {
            let mut cut = MAX_ATTRIBUTE_LEN;
            while !attributes.is_char_boundary(cut) {
                cut -= 1;
            }
            warn!(
                "Stub attributes truncated from {} to {} bytes",
                attributes.len(),
                cut
            );
            attributes.truncate(cut);
        }
        self.attributes = attributes;
    }

    pub fn position(&self) -> Vec2 {
        self.transform.position
    }

    /// Distance from `point` to the nearest edge of the stub's rotated box,
    /// or `None` when the point lies outside it.
    pub fn contains_point(&self, point: Vec2) -> Option<f32> {
        let local = self.transform.inverse_transform_point(point);
        let half = self.size * 0.5;
        if local.x.abs() > half.x || local.y.abs() > half.y {
            return None;
        }
        Some((half.x - local.x.abs()).min(half.y - local.y.abs()))
    }

    /// Axis-aligned bounds of the rotated box as `(min, max)`.
    pub fn bounds(&self) -> (Vec2, Vec2) {
        let half = self.size * 0.5;
        let rotation = Vec2::from_angle(self.transform.angle);
        let extent = Vec2::new(
            (rotation.x * half.x).abs() + (rotation.y * half.y).abs(),
            (rotation.y * half.x).abs() + (rotation.x * half.y).abs(),
        );
        (self.transform.position - extent, self.transform.position + extent)
    }

    /// Whether the stub's bounds fit inside the rectangle `[min, max]`.
    pub fn is_fully_inside(&self, min: Vec2, max: Vec2) -> bool {
        let (lo, hi) = self.bounds();
        lo.x >= min.x && lo.y >= min.y && hi.x <= max.x && hi.y <= max.y
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_attributes_are_capped() {
        let stub =
            ObjectStub::new(1, Transform2::default(), Vec2::ONE).with_attributes("x".repeat(300));
        assert_eq!(stub.attributes().len(), MAX_ATTRIBUTE_LEN);

        // Multi-byte characters are never split.
        let stub =
            ObjectStub::new(1, Transform2::default(), Vec2::ONE).with_attributes("é".repeat(200));
        assert!(stub.attributes().len() <= MAX_ATTRIBUTE_LEN);
        assert!(stub.attributes().chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_contains_point_edge_distance() {
        let at = Transform2::from_position(Vec2::new(10.0, 5.0));
        let stub = ObjectStub::new(1, at, Vec2::new(4.0, 2.0));
        assert_eq!(stub.contains_point(Vec2::new(10.0, 5.0)), Some(1.0));
        let near_edge = stub.contains_point(Vec2::new(11.5, 5.0)).unwrap();
        assert!((near_edge - 0.5).abs() < 1e-5);
        assert!(stub.contains_point(Vec2::new(12.5, 5.0)).is_none());
    }

    #[test]
    fn test_rotated_box() {
        let stub = ObjectStub::new(1, Transform2::new(Vec2::ZERO, FRAC_PI_2), Vec2::new(4.0, 2.0));
        // Rotated a quarter turn the long axis is vertical.
        assert!(stub.contains_point(Vec2::new(0.0, 1.8)).is_some());
        assert!(stub.contains_point(Vec2::new(1.8, 0.0)).is_none());
        let (lo, hi) = stub.bounds();
        assert!((lo - Vec2::new(-1.0, -2.0)).length() < 1e-4);
        assert!((hi - Vec2::new(1.0, 2.0)).length() < 1e-4);
    }

    #[test]
    fn test_fully_inside() {
        let at = Transform2::from_position(Vec2::new(5.0, 5.0));
        let stub = ObjectStub::new(1, at, Vec2::splat(2.0));
        assert!(stub.is_fully_inside(Vec2::ZERO, Vec2::splat(10.0)));
        assert!(!stub.is_fully_inside(Vec2::ZERO, Vec2::splat(5.5)));
    }

    #[test]
    fn test_invalid_handle() {
        assert!(!ObjectHandle::INVALID.is_valid());
        assert!(ObjectHandle(3).is_valid());
    }
}
