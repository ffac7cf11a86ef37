//! Per-type component storage.
//!
//! Each concrete component type gets its own [`ComponentStorage`], reached
//! through the manager's type-indexed table. Entries live in a `Vec` in
//! insertion order (that order is the iteration contract for queries) with
//! a hash index for O(1) entity lookup. Removal is staged: a staged entry
//! stays visible to same-tick queries and is physically dropped by
//! [`ErasedStorage::commit_removals`] during end-of-tick cleanup.

use std::any::Any;
use std::collections::HashMap;

use crate::component::{ChangeState, Component, ComponentTypeId};
use crate::entity::Entity;
use crate::error::EcmError;

#[derive(Debug)]
struct Entry<T> {
    entity: Entity,
    value: T,
    change: ChangeState,
    added_this_tick: bool,
    staged_removal: bool,
}

/// Insertion-ordered storage for components of a single type.
#[derive(Debug)]
pub struct ComponentStorage<T: Component> {
    entries: Vec<Entry<T>>,
    index: HashMap<Entity, usize>,
}

impl<T: Component> ComponentStorage<T> {
    /// Create an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Insert a component for `entity`.
    ///
    /// Fails (returns `false`) if the entity already holds a live component
    /// of this type. Inserting over an entry staged for removal this tick
    /// cancels the removal and re-creates the component in place.
    pub fn insert(&mut self, entity: Entity, value: T, change: ChangeState) -> bool {
        if let Some(&i) = self.index.get(&entity) {
            let entry = &mut self.entries[i];
            if !entry.staged_removal {
                return false;
            }
            entry.value = value;
            entry.change = change;
            entry.added_this_tick = true;
            entry.staged_removal = false;
            return true;
        }
        self.index.insert(entity, self.entries.len());
        self.entries.push(Entry {
            entity,
            value,
            change,
            added_this_tick: true,
            staged_removal: false,
        });
        true
    }

    /// Look up the component for `entity`.
    #[must_use]
    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.index.get(&entity).map(|&i| &self.entries[i].value)
    }

    /// Mutable lookup. Does not touch the change state; callers flag
    /// changes explicitly or go through the manager's compare-and-set path.
    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        let i = *self.index.get(&entity)?;
        Some(&mut self.entries[i].value)
    }

    /// Overwrite the stored value, reporting whether it actually differed
    /// according to the component's equality hook.
    ///
    /// Writing to an entry staged for removal this tick cancels the removal;
    /// that always counts as a change, since the component would otherwise
    /// vanish at commit.
    pub fn write(&mut self, entity: Entity, value: T) -> Option<bool> {
        let i = *self.index.get(&entity)?;
        let entry = &mut self.entries[i];
        let resurrected = std::mem::take(&mut entry.staged_removal);
        if !resurrected && entry.value.matches(&value) {
            return Some(false);
        }
        entry.value = value;
        Some(true)
    }

    /// Iterate `(entity, &mut value)` over live entries in insertion order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &mut T)> {
        self.entries.iter_mut().map(|e| (e.entity, &mut e.value))
    }
}

impl<T: Component> Default for ComponentStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased view over a [`ComponentStorage`], used for bulk per-tick
/// bookkeeping and snapshot serialization without per-entity dynamic
/// dispatch in typed hot paths.
pub trait ErasedStorage: Send + Sync {
    /// The stable type ID of the stored component type.
    fn type_id(&self) -> ComponentTypeId;
    /// The stable type name of the stored component type.
    fn type_name(&self) -> &'static str;
    /// Whether `entity` holds this component (staged removals included).
    fn has(&self, entity: Entity) -> bool;
    /// Number of entries, staged removals included.
    fn len(&self) -> usize;
    /// Returns `true` if the storage holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Entities holding this component, in insertion order.
    fn entities(&self) -> Vec<Entity>;
    /// The change state for `entity`, if present.
    fn change(&self, entity: Entity) -> Option<ChangeState>;
    /// Override the change state. Returns `false` if the entity is absent.
    fn set_change(&mut self, entity: Entity, state: ChangeState) -> bool;
    /// Whether the component was added during the current tick.
    fn is_new(&self, entity: Entity) -> bool;
    /// Whether the component is staged for removal this tick.
    fn is_staged_removal(&self, entity: Entity) -> bool;
    /// Stage the component for removal. Returns `false` if absent.
    fn stage_remove(&mut self, entity: Entity) -> bool;
    /// Physically drop staged entries and rebuild the index.
    fn commit_removals(&mut self);
    /// Clear per-tick marks: new flags and all change states reset.
    fn clear_tick_state(&mut self);
    /// Serialize the component for `entity` to MessagePack bytes.
    fn serialize(&self, entity: Entity) -> Option<Result<Vec<u8>, EcmError>>;
    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
    /// Mutable downcast support.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> ErasedStorage for ComponentStorage<T> {
    fn type_id(&self) -> ComponentTypeId {
        T::type_id()
    }

    fn type_name(&self) -> &'static str {
        T::type_name()
    }

    fn has(&self, entity: Entity) -> bool {
        self.index.contains_key(&entity)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn entities(&self) -> Vec<Entity> {
        self.entries.iter().map(|e| e.entity).collect()
    }

    fn change(&self, entity: Entity) -> Option<ChangeState> {
        self.index.get(&entity).map(|&i| self.entries[i].change)
    }

    fn set_change(&mut self, entity: Entity, state: ChangeState) -> bool {
        match self.index.get(&entity) {
            Some(&i) => {
                self.entries[i].change = state;
                true
            }
            None => false,
        }
    }

    fn is_new(&self, entity: Entity) -> bool {
        self.index
            .get(&entity)
            .is_some_and(|&i| self.entries[i].added_this_tick)
    }

    fn is_staged_removal(&self, entity: Entity) -> bool {
        self.index
            .get(&entity)
            .is_some_and(|&i| self.entries[i].staged_removal)
    }

    fn stage_remove(&mut self, entity: Entity) -> bool {
        match self.index.get(&entity) {
            Some(&i) => {
                self.entries[i].staged_removal = true;
                true
            }
            None => false,
        }
    }

    fn commit_removals(&mut self) {
        if self.entries.iter().all(|e| !e.staged_removal) {
            return;
        }
        self.entries.retain(|e| !e.staged_removal);
        self.index.clear();
        for (i, e) in self.entries.iter().enumerate() {
            self.index.insert(e.entity, i);
        }
    }

    fn clear_tick_state(&mut self) {
        for entry in &mut self.entries {
            entry.added_this_tick = false;
            entry.change = ChangeState::NoChange;
        }
    }

    fn serialize(&self, entity: Entity) -> Option<Result<Vec<u8>, EcmError>> {
        let &i = self.index.get(&entity)?;
        Some(rmp_serde::to_vec(&self.entries[i].value).map_err(EcmError::Encode))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::declare_component!(Label, String);

    #[test]
    fn test_insert_and_get() {
        let mut storage = ComponentStorage::<Label>::new();
        let e = Entity::from_raw(1);
        assert!(storage.insert(e, Label("box".into()), ChangeState::OneTimeChange));
        assert_eq!(storage.get(e).unwrap().0, "box");
        assert_eq!(storage.change(e), Some(ChangeState::OneTimeChange));
        assert!(storage.is_new(e));
    }

    #[test]
    fn test_duplicate_insert_fails() {
        let mut storage = ComponentStorage::<Label>::new();
        let e = Entity::from_raw(1);
        assert!(storage.insert(e, Label("a".into()), ChangeState::OneTimeChange));
        assert!(!storage.insert(e, Label("b".into()), ChangeState::OneTimeChange));
        assert_eq!(storage.get(e).unwrap().0, "a");
    }

    #[test]
    fn test_entities_in_insertion_order() {
        let mut storage = ComponentStorage::<Label>::new();
        for id in [5u64, 2, 9] {
            storage.insert(
                Entity::from_raw(id),
                Label(id.to_string()),
                ChangeState::OneTimeChange,
            );
        }
        let order: Vec<u64> = storage.entities().iter().map(|e| e.id()).collect();
        assert_eq!(order, vec![5, 2, 9]);
    }

    #[test]
    fn test_write_uses_equality_hook() {
        let mut storage = ComponentStorage::<Label>::new();
        let e = Entity::from_raw(1);
        storage.insert(e, Label("a".into()), ChangeState::OneTimeChange);
        assert_eq!(storage.write(e, Label("a".into())), Some(false));
        assert_eq!(storage.write(e, Label("b".into())), Some(true));
        assert_eq!(storage.write(Entity::from_raw(7), Label("x".into())), None);
    }

    #[test]
    fn test_staged_removal_visible_until_commit() {
        let mut storage = ComponentStorage::<Label>::new();
        let e1 = Entity::from_raw(1);
        let e2 = Entity::from_raw(2);
        storage.insert(e1, Label("a".into()), ChangeState::OneTimeChange);
        storage.insert(e2, Label("b".into()), ChangeState::OneTimeChange);

        assert!(storage.stage_remove(e1));
        assert!(storage.has(e1));
        assert!(storage.is_staged_removal(e1));

        storage.commit_removals();
        assert!(!storage.has(e1));
        assert!(storage.has(e2));
        assert_eq!(storage.get(e2).unwrap().0, "b");
    }

    #[test]
    fn test_write_cancels_staged_removal() {
        let mut storage = ComponentStorage::<Label>::new();
        let e = Entity::from_raw(1);
        storage.insert(e, Label("a".into()), ChangeState::OneTimeChange);
        storage.stage_remove(e);

        // Even an equal value counts: the entry would otherwise vanish.
        assert_eq!(storage.write(e, Label("a".into())), Some(true));
        assert!(!storage.is_staged_removal(e));
        storage.commit_removals();
        assert_eq!(storage.get(e).unwrap().0, "a");
    }

    #[test]
    fn test_reinsert_after_staged_removal() {
        let mut storage = ComponentStorage::<Label>::new();
        let e = Entity::from_raw(1);
        storage.insert(e, Label("a".into()), ChangeState::OneTimeChange);
        storage.clear_tick_state();
        storage.stage_remove(e);

        assert!(storage.insert(e, Label("b".into()), ChangeState::OneTimeChange));
        assert!(storage.is_new(e));
        assert!(!storage.is_staged_removal(e));
        storage.commit_removals();
        assert_eq!(storage.get(e).unwrap().0, "b");
    }

    #[test]
    fn test_clear_tick_state() {
        let mut storage = ComponentStorage::<Label>::new();
        let e = Entity::from_raw(1);
        storage.insert(e, Label("a".into()), ChangeState::OneTimeChange);
        storage.clear_tick_state();
        assert!(!storage.is_new(e));
        assert_eq!(storage.change(e), Some(ChangeState::NoChange));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut storage = ComponentStorage::<Label>::new();
        let e = Entity::from_raw(1);
        storage.insert(e, Label("payload".into()), ChangeState::OneTimeChange);
        let bytes = storage.serialize(e).unwrap().unwrap();
        let restored: Label = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(restored.0, "payload");
    }
}
