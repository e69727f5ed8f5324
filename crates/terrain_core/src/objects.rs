//! Live game objects spawned from stubs.
//!
//! The terrain only needs a narrow view of the game's object system:
//! [`ObjectHost`]. [`ObjectRegistry`] is a handle-keyed implementation that
//! keeps plain records, enough for tools and tests; a game can implement
//! the trait over its own entities instead.

use bevy::prelude::*;
use std::collections::{BTreeMap, HashSet};

use crate::stub::{ObjectHandle, ObjectStub, Transform2};

/// Object system capability used during patch activation and streaming.
pub trait ObjectHost {
    /// Whether objects of this type write themselves back into a stub when
    /// they stream out.
    fn is_serializable(&self, object_type: u32) -> bool;

    /// Whether a live object with this handle exists.
    fn contains(&self, handle: ObjectHandle) -> bool;

    /// Spawn a live object from a stub. Returns false if the type is unknown.
    fn spawn(&mut self, stub: &ObjectStub) -> bool;

    /// Live serializable objects as `(handle, position, size)`.
    fn live_serializable(&self) -> Vec<(ObjectHandle, Vec2, Vec2)>;

    /// Current state of a live object as a stub; the object stays live.
    fn snapshot(&self, handle: ObjectHandle) -> Option<ObjectStub>;

    /// Destroy a live object, returning its stub.
    fn stream_out(&mut self, handle: ObjectHandle) -> Option<ObjectStub>;
}

/// One live object.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveObject {
    pub handle: ObjectHandle,
    pub object_type: u32,
    pub transform: Transform2,
    pub size: Vec2,
    pub attributes: String,
}

impl LiveObject {
    pub fn to_stub(&self) -> ObjectStub {
        ObjectStub::new(self.object_type, self.transform, self.size)
            .with_attributes(self.attributes.clone())
            .with_handle(self.handle)
    }
}

/// Handle-keyed table of live objects.
#[derive(Resource, Debug, Default)]
pub struct ObjectRegistry {
    objects: BTreeMap<ObjectHandle, LiveObject>,
    serializable_types: HashSet<u32>,
    /// Objects spawned since creation.
    pub spawn_count: usize,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an object type as serializable.
    pub fn with_serializable(mut self, object_type: u32) -> Self {
        self.serializable_types.insert(object_type);
        self
    }

    pub fn lookup(&self, handle: ObjectHandle) -> Option<&LiveObject> {
        self.objects.get(&handle)
    }

    pub fn lookup_mut(&mut self, handle: ObjectHandle) -> Option<&mut LiveObject> {
        self.objects.get_mut(&handle)
    }

    /// Destroy an object without writing it back (killed, picked up, ...).
    pub fn despawn(&mut self, handle: ObjectHandle) -> Option<LiveObject> {
        self.objects.remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LiveObject> {
        self.objects.values()
    }
}

impl ObjectHost for ObjectRegistry {
    fn is_serializable(&self, object_type: u32) -> bool {
        self.serializable_types.contains(&object_type)
    }

    fn contains(&self, handle: ObjectHandle) -> bool {
        self.objects.contains_key(&handle)
    }

    fn spawn(&mut self, stub: &ObjectStub) -> bool {
        if self.objects.contains_key(&stub.handle) {
            warn!("Object {:?} is already live, not spawning twice", stub.handle);
            return false;
        }
        self.objects.insert(
            stub.handle,
            LiveObject {
                handle: stub.handle,
                object_type: stub.object_type,
                transform: stub.transform,
                size: stub.size,
                attributes: stub.attributes().to_string(),
            },
        );
        self.spawn_count += 1;
        true
    }

    fn live_serializable(&self) -> Vec<(ObjectHandle, Vec2, Vec2)> {
        self.objects
            .values()
            .filter(|object| self.serializable_types.contains(&object.object_type))
            .map(|object| (object.handle, object.transform.position, object.size))
            .collect()
    }

    fn snapshot(&self, handle: ObjectHandle) -> Option<ObjectStub> {
        self.objects.get(&handle).map(LiveObject::to_stub)
    }

    fn stream_out(&mut self, handle: ObjectHandle) -> Option<ObjectStub> {
        self.objects.remove(&handle).map(|object| object.to_stub())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_and_lookup() {
        let mut registry = ObjectRegistry::new();
        let stub = ObjectStub::new(7, Transform2::from_position(Vec2::new(1.0, 2.0)), Vec2::ONE)
            .with_attributes("hp=3")
            .with_handle(ObjectHandle(4));
        assert!(registry.spawn(&stub));
        assert!(!registry.spawn(&stub));
        let live = registry.lookup(ObjectHandle(4)).unwrap();
        assert_eq!(live.attributes, "hp=3");
        assert!(registry.lookup(ObjectHandle(5)).is_none());
    }

    #[test]
    fn test_stream_out_round_trip() {
        let mut registry = ObjectRegistry::new().with_serializable(7);
        let stub = ObjectStub::new(7, Transform2::new(Vec2::new(3.0, 0.0), 0.5), Vec2::splat(2.0))
            .with_attributes("door")
            .with_handle(ObjectHandle(9));
        registry.spawn(&stub);
        assert_eq!(
            registry.live_serializable(),
            vec![(ObjectHandle(9), Vec2::new(3.0, 0.0), Vec2::splat(2.0))]
        );

        registry.lookup_mut(ObjectHandle(9)).unwrap().transform.position.x = 4.0;
        let snapshot = registry.snapshot(ObjectHandle(9)).unwrap();
        assert_eq!(snapshot.position(), Vec2::new(4.0, 0.0));
        assert_eq!(registry.len(), 1);
        let back = registry.stream_out(ObjectHandle(9)).unwrap();
        assert_eq!(back.position(), Vec2::new(4.0, 0.0));
        assert_eq!(back.attributes(), "door");
        assert!(registry.is_empty());
    }
}
