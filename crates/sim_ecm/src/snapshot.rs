//! State snapshots.
//!
//! An [`EcmState`] is the opaque, versioned value that crosses every
//! process boundary: primary → secondary sync, state logging, and log
//! playback all move these. Component payloads are MessagePack bytes so a
//! receiver can apply types it knows and skip types it does not.
//!
//! Within each entity, components are sorted by type ID so two snapshots of
//! equivalent worlds compare equal regardless of registration history.

use serde::{Deserialize, Serialize};

use crate::component::{ChangeState, ComponentTypeId};
use crate::entity::Entity;

/// Snapshot schema version understood by this build.
pub const STATE_VERSION: u32 = 1;

/// What a snapshot covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotScope {
    /// Only entities/components whose change state is not `NoChange`
    /// (plus creations and removals). The default wire format.
    Changed,
    /// Everything, used for initial sync and full log keyframes.
    Full,
}

/// Per-entity lifecycle tag within a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityLifecycle {
    /// Created during the covered tick.
    Created,
    /// Pre-existing, with at least one component change.
    Modified,
    /// Staged for removal during the covered tick.
    Removed,
    /// Pre-existing and untouched (full snapshots only).
    Unchanged,
}

/// One serialized component on one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentState {
    /// Stable component type identifier.
    pub type_id: ComponentTypeId,
    /// The change state at capture time, applied verbatim on the receiver
    /// so change visibility survives the snapshot boundary.
    pub change: ChangeState,
    /// MessagePack-encoded component value.
    pub data: Vec<u8>,
}

/// One entity's slice of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    /// The entity ID, valid across processes (IDs are never recycled).
    pub entity: Entity,
    /// Lifecycle tag for the covered tick.
    pub lifecycle: EntityLifecycle,
    /// Live components, sorted by `type_id`.
    pub components: Vec<ComponentState>,
    /// Component types staged for removal this tick, sorted.
    pub removed_components: Vec<ComponentTypeId>,
}

/// A serialized view of ECM state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EcmState {
    /// Snapshot schema version; see [`STATE_VERSION`].
    pub version: u32,
    /// Entity records in creation order.
    pub entities: Vec<EntityState>,
}

impl EcmState {
    /// An empty snapshot at the current schema version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION,
            entities: Vec::new(),
        }
    }

    /// Returns `true` if the snapshot carries no entity records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl Default for EcmState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_state() {
        let state = EcmState::new();
        assert!(state.is_empty());
        assert_eq!(state.version, STATE_VERSION);
    }

    #[test]
    fn test_state_roundtrips_through_messagepack() {
        let state = EcmState {
            version: STATE_VERSION,
            entities: vec![EntityState {
                entity: Entity::from_raw(4),
                lifecycle: EntityLifecycle::Created,
                components: vec![ComponentState {
                    type_id: ComponentTypeId::from_name("Name"),
                    change: ChangeState::OneTimeChange,
                    data: vec![1, 2, 3],
                }],
                removed_components: vec![],
            }],
        };
        let bytes = rmp_serde::to_vec(&state).unwrap();
        let restored: EcmState = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(state, restored);
    }
}
