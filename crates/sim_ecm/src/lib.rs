//! Entity-component storage with per-tick change tracking.
//!
//! The [`EntityComponentManager`] is the heart of the simulation kernel:
//! systems read and write components through it, queries join component
//! types in deterministic order, and versioned [`EcmState`] snapshots move
//! world state across process boundaries for distributed runs and logging.
//!
//! Lifecycle changes are *staged*: removals requested during a tick stay
//! visible to every system until the runner calls
//! [`EntityComponentManager::end_of_tick`], which commits removals and
//! resets all change states. This gives every system the same view of "what
//! changed this tick" regardless of execution order.

mod component;
mod components;
mod entity;
mod error;
mod manager;
mod query;
mod snapshot;
mod storage;

pub use component::{
    ChangeState, Component, ComponentRegistry, ComponentTypeId, ComponentVtable,
};
pub use components::{Name, ParentEntity, Static, WorldComponent};
pub use entity::{Entity, EntityAllocator};
pub use error::EcmError;
pub use manager::EntityComponentManager;
pub use query::ComponentQuery;
pub use snapshot::{
    ComponentState, EcmState, EntityLifecycle, EntityState, STATE_VERSION, SnapshotScope,
};
pub use storage::{ComponentStorage, ErasedStorage};
