//! Stable object identifiers.

use std::fmt;

/// Identifier of a scene node. Never reused while the allocator lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(u64);

impl ObjectId {
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out increasing [`ObjectId`]s, starting at 0.
///
/// Owned by whoever builds the scene, so tests get deterministic ids.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> ObjectId {
        let id = ObjectId(self.next);
        self.next += 1;
        id
    }

    /// Starts over at 0. Ids handed out before are not tracked.
    pub fn reset(&mut self) {
        self.next = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_sequential() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.allocate().raw(), 0);
        assert_eq!(ids.allocate().raw(), 1);
        assert_eq!(ids.allocate(), ObjectId::from_raw(2));
    }

    #[test]
    fn test_reset_restarts_at_zero() {
        let mut ids = IdAllocator::new();
        ids.allocate();
        ids.allocate();
        ids.reset();
        assert_eq!(ids.allocate().raw(), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(ObjectId::from_raw(7).to_string(), "#7");
    }
}
