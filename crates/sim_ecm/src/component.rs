//! Core [`Component`] trait, stable type identity, and change states.
//!
//! ## Stable type identity
//!
//! [`ComponentTypeId`] is derived from the component's **string name** using
//! the FNV-1a 64-bit hash. This is deterministic and process-independent:
//! a distributed secondary or a log playback tool reconstructs the exact
//! same ID for a given name, which a language runtime type token could not
//! guarantee.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::entity::Entity;
use crate::error::EcmError;
use crate::manager::EntityComponentManager;

/// A unique identifier for a component type, derived from its string name
/// using the FNV-1a 64-bit hash algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ComponentTypeId(pub u64);

impl ComponentTypeId {
    /// FNV-1a 64-bit offset basis.
    const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

    /// FNV-1a 64-bit prime.
    const FNV_PRIME: u64 = 0x0100_0000_01b3;

    /// Compute the [`ComponentTypeId`] from a component's string name.
    ///
    /// Language-neutral: any implementation that applies FNV-1a 64-bit to
    /// the same UTF-8 bytes produces the same result.
    #[must_use]
    pub const fn from_name(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut hash = Self::FNV_OFFSET_BASIS;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u64;
            hash = hash.wrapping_mul(Self::FNV_PRIME);
            i += 1;
        }
        Self(hash)
    }

    /// Compute the [`ComponentTypeId`] for a Rust component type `T`.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self::from_name(T::type_name())
    }
}

/// Per-component change state, scoped to the current tick.
///
/// The end-of-tick cleanup resets every non-`NoChange` state back to
/// `NoChange`, so all systems observe the same "did this change this tick"
/// answer regardless of call order within the tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ChangeState {
    /// The component did not change this tick.
    #[default]
    NoChange,
    /// Set once, e.g. on creation or an irreversible external command.
    OneTimeChange,
    /// Expected to mutate most ticks (pose, velocity, ...).
    PeriodicChange,
}

impl ChangeState {
    /// Returns `true` for any state other than [`ChangeState::NoChange`].
    #[must_use]
    pub fn is_changed(self) -> bool {
        !matches!(self, ChangeState::NoChange)
    }
}

/// The core component trait.
///
/// All data stored in the ECM must implement this trait. Components must be
/// serialisable so they can cross the state-snapshot boundary, and
/// `Send + Sync` so a runner (and the ECM it owns) can move to its worker
/// thread.
pub trait Component:
    Send + Sync + 'static + Serialize + DeserializeOwned + PartialEq + std::fmt::Debug
{
    /// The stable, process-independent name for this component type.
    fn type_name() -> &'static str;

    /// Returns the [`ComponentTypeId`] for this component.
    fn type_id() -> ComponentTypeId {
        ComponentTypeId::from_name(Self::type_name())
    }

    /// Equality hook used to suppress spurious change flags when a newly
    /// written value is equivalent to the stored one.
    ///
    /// The default is exact equality; components carrying floating-point
    /// data override this with a tolerance comparison.
    fn matches(&self, other: &Self) -> bool {
        self == other
    }
}

/// Type-erased operations for one component type, used when applying a
/// state snapshot whose payloads are opaque bytes.
///
/// Plain function pointers (not closures) so the vtable is `Copy` and can be
/// pulled out of the registry before re-borrowing the manager mutably.
#[derive(Debug, Clone, Copy)]
pub struct ComponentVtable {
    /// The stable type identifier.
    pub type_id: ComponentTypeId,
    /// The stable type name.
    pub name: &'static str,
    /// Decode `bytes` and write the component onto `entity` with the given
    /// change state, creating or updating as needed.
    pub apply: fn(&mut EntityComponentManager, Entity, &[u8], ChangeState) -> Result<(), EcmError>,
}

impl ComponentVtable {
    /// Build the vtable for component type `T`.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self {
            type_id: T::type_id(),
            name: T::type_name(),
            apply: apply_snapshot_component::<T>,
        }
    }
}

fn apply_snapshot_component<T: Component>(
    ecm: &mut EntityComponentManager,
    entity: Entity,
    bytes: &[u8],
    change: ChangeState,
) -> Result<(), EcmError> {
    let value: T = rmp_serde::from_slice(bytes).map_err(EcmError::Decode)?;
    ecm.apply_component(entity, value, change);
    Ok(())
}

/// Registry mapping stable type IDs to their [`ComponentVtable`].
///
/// Component types register here (explicitly or on first typed use) so
/// `set_state` can reconstruct components received from another process.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    vtables: std::collections::HashMap<ComponentTypeId, ComponentVtable>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register component type `T`. Re-registering is a no-op.
    pub fn register<T: Component>(&mut self) {
        self.vtables
            .entry(T::type_id())
            .or_insert_with(ComponentVtable::of::<T>);
    }

    /// Look up the vtable for a type ID.
    #[must_use]
    pub fn get(&self, type_id: ComponentTypeId) -> Option<ComponentVtable> {
        self.vtables.get(&type_id).copied()
    }

    /// Number of registered component types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vtables.len()
    }

    /// Returns `true` if no types are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vtables.is_empty()
    }
}

/// Declare a newtype component wrapping a serialisable payload.
///
/// ```
/// sim_ecm::declare_component!(
///     /// Battery charge fraction.
///     Charge, f64
/// );
/// ```
#[macro_export]
macro_rules! declare_component {
    ($(#[$meta:meta])* $name:ident, $data:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        pub struct $name(pub $data);

        impl $crate::Component for $name {
            fn type_name() -> &'static str {
                stringify!($name)
            }
        }
    };
    // Marker component with no payload.
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
        pub struct $name;

        impl $crate::Component for $name {
            fn type_name() -> &'static str {
                stringify!($name)
            }
        }
    };
}
