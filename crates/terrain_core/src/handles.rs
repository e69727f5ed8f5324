//! Object handle allocation.
//!
//! Two counters hand out handles: editor placements draw from `start_handle`,
//! runtime spawns from `next_handle`. Every allocation pushes the other
//! counter past the value it produced, so the two sources never collide.

use crate::stub::ObjectHandle;

/// Who asked for a new handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleSource {
    Editor,
    Runtime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleAllocator {
    start_handle: u32,
    next_handle: u32,
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new(1)
    }
}

impl HandleAllocator {
    /// Start both counters at `first` (clamped so 0 is never handed out).
    pub fn new(first: u32) -> Self {
        let first = first.max(1);
        Self {
            start_handle: first,
            next_handle: first,
        }
    }

    pub fn allocate(&mut self, source: HandleSource) -> ObjectHandle {
        match source {
            HandleSource::Editor => {
                let handle = self.start_handle;
                self.start_handle = self.start_handle.wrapping_add(1).max(1);
                self.next_handle = self.next_handle.max(self.start_handle);
                ObjectHandle(handle)
            }
            HandleSource::Runtime => {
                let handle = self.next_handle;
                self.next_handle = self.next_handle.wrapping_add(1).max(1);
                self.start_handle = self.start_handle.max(self.next_handle);
                ObjectHandle(handle)
            }
        }
    }

    /// Value persisted as `nextObjectHandle`.
    pub fn saved_value(&self) -> u32 {
        self.start_handle.max(self.next_handle)
    }

    /// Reset both counters to a loaded `nextObjectHandle`.
    pub fn reset(&mut self, saved: u32) {
        *self = Self::new(saved);
    }

    /// Make sure a handle read from data is never handed out again.
    pub fn observe(&mut self, handle: ObjectHandle) {
        if handle.is_valid() {
            let after = handle.0.saturating_add(1);
            self.start_handle = self.start_handle.max(after);
            self.next_handle = self.next_handle.max(after);
        }
    }

    pub fn start_handle(&self) -> u32 {
        self.start_handle
    }

    pub fn next_handle(&self) -> u32 {
        self.next_handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_handles_start_at_one() {
        let mut handles = HandleAllocator::default();
        assert_eq!(handles.allocate(HandleSource::Editor), ObjectHandle(1));
        assert_eq!(HandleAllocator::new(0).allocate(HandleSource::Runtime), ObjectHandle(1));
    }

    #[test]
    fn test_sources_never_collide() {
        let mut handles = HandleAllocator::default();
        let mut seen = HashSet::new();
        for i in 0..50 {
            let source = if i % 3 == 0 {
                HandleSource::Editor
            } else {
                HandleSource::Runtime
            };
            let handle = handles.allocate(source);
            assert!(handle.is_valid());
            assert!(seen.insert(handle), "duplicate handle {:?}", handle);
        }
    }

    #[test]
    fn test_saved_value_round_trip() {
        let mut handles = HandleAllocator::default();
        for _ in 0..4 {
            handles.allocate(HandleSource::Runtime);
        }
        let saved = handles.saved_value();
        assert_eq!(saved, 5);

        let mut loaded = HandleAllocator::default();
        loaded.reset(saved);
        assert_eq!(loaded.allocate(HandleSource::Editor), ObjectHandle(5));
        assert_eq!(loaded.allocate(HandleSource::Runtime), ObjectHandle(6));
    }

    #[test]
    fn test_observe_skips_loaded_handles() {
        let mut handles = HandleAllocator::new(3);
        handles.observe(ObjectHandle(10));
        handles.observe(ObjectHandle::INVALID);
        assert_eq!(handles.allocate(HandleSource::Editor), ObjectHandle(11));
    }
}
