//! ECM error types.

use crate::component::ComponentTypeId;
use crate::entity::Entity;

/// Errors surfaced by the entity-component manager.
#[derive(Debug, thiserror::Error)]
pub enum EcmError {
    /// The referenced entity does not exist.
    #[error("entity {0} does not exist")]
    UnknownEntity(Entity),

    /// No component type with this ID is registered.
    #[error("unknown component type {0:?}")]
    UnknownComponentType(ComponentTypeId),

    /// The requested re-parenting would make the entity tree cyclic.
    #[error("re-parenting {child} under {parent} would create a cycle")]
    WouldCycle {
        /// The entity being re-parented.
        child: Entity,
        /// The requested parent.
        parent: Entity,
    },

    /// Failed to decode a component payload from a snapshot.
    #[error("failed to decode component payload: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Failed to encode a component payload into a snapshot.
    #[error("failed to encode component payload: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// The snapshot was produced by an incompatible schema version.
    #[error("unsupported state snapshot version {got} (expected {expected})")]
    StateVersion {
        /// The version this build understands.
        expected: u32,
        /// The version found in the snapshot.
        got: u32,
    },
}
