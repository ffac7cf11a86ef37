//! Entity type and allocation.
//!
//! An [`Entity`] is a lightweight `u64` identifier with no inherent data.
//! IDs are allocated by the owning [`EntityComponentManager`] and are never
//! reused within a process lifetime, which is what makes per-tick
//! new/removed tracking and log replay unambiguous.
//!
//! [`EntityComponentManager`]: crate::EntityComponentManager

use serde::{Deserialize, Serialize};

/// A unique entity identifier.
///
/// Entities are pure identifiers — they carry no data of their own.
/// Components are attached to entities to give them meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity(pub u64);

impl Entity {
    /// The null / "no entity" sentinel.
    pub const NULL: Entity = Entity(0);

    /// Create an entity from a raw `u64` identifier.
    #[must_use]
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw `u64` identifier.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }

    /// Returns `true` if this is a valid (non-null) entity.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

/// Allocates monotonically increasing entity IDs.
///
/// There is deliberately no free-list: a removed entity's ID stays dead so
/// that a stale reference can never silently resolve to a newer entity.
#[derive(Debug)]
pub struct EntityAllocator {
    next_id: u64,
}

impl EntityAllocator {
    /// Creates a new allocator. IDs start at 1 (0 is [`Entity::NULL`]).
    #[must_use]
    pub fn new() -> Self {
        Self { next_id: 1 }
    }

    /// Allocates a fresh entity ID.
    ///
    /// # Panics
    ///
    /// Panics on exhaustion of the 64-bit ID space. This is the one fatal,
    /// unrecoverable resource failure in the ECM.
    pub fn allocate(&mut self) -> Entity {
        assert!(self.next_id != u64::MAX, "entity ID space exhausted");
        let id = self.next_id;
        self.next_id += 1;
        Entity(id)
    }

    /// Advance the allocator so that it will never hand out `id` or anything
    /// below it. Used when applying a state snapshot that carries entity IDs
    /// allocated by another process.
    pub fn reserve_through(&mut self, id: u64) {
        if id >= self.next_id {
            self.next_id = id + 1;
        }
    }

    /// Returns the number of entities allocated so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.next_id - 1
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}
