//! The entity-component manager.
//!
//! Composes the entity allocator, the per-type storages, the parent/child
//! forest, and snapshot capture/apply. All entity and component lifecycle
//! goes through this type; systems mutate it during their phases and the
//! runner calls [`EntityComponentManager::end_of_tick`] once per tick, after
//! all systems have run, to commit staged removals and reset change states.

use std::collections::{HashMap, HashSet};

use tracing::{error, warn};

use crate::component::{ChangeState, Component, ComponentRegistry, ComponentTypeId};
use crate::components::{Name, ParentEntity, Static, WorldComponent};
use crate::entity::{Entity, EntityAllocator};
use crate::error::EcmError;
use crate::query::ComponentQuery;
use crate::snapshot::{
    ComponentState, EcmState, EntityLifecycle, EntityState, STATE_VERSION, SnapshotScope,
};
use crate::storage::{ComponentStorage, ErasedStorage};

enum ScanMode {
    All,
    New,
    Removed,
}

/// Typed, queryable, change-tracked component storage for one world.
pub struct EntityComponentManager {
    allocator: EntityAllocator,
    /// Entities in creation order, including those staged for removal.
    entities: Vec<Entity>,
    alive: HashSet<Entity>,
    new_entities: HashSet<Entity>,
    removed_entities: HashSet<Entity>,
    storages: HashMap<ComponentTypeId, Box<dyn ErasedStorage>>,
    registry: ComponentRegistry,
    /// Auxiliary children index, kept in sync with `ParentEntity` writes.
    children: HashMap<Entity, Vec<Entity>>,
}

impl EntityComponentManager {
    /// Create an empty manager with the base component types registered.
    #[must_use]
    pub fn new() -> Self {
        let mut ecm = Self {
            allocator: EntityAllocator::new(),
            entities: Vec::new(),
            alive: HashSet::new(),
            new_entities: HashSet::new(),
            removed_entities: HashSet::new(),
            storages: HashMap::new(),
            registry: ComponentRegistry::new(),
            children: HashMap::new(),
        };
        ecm.register_component::<Name>();
        ecm.register_component::<ParentEntity>();
        ecm.register_component::<WorldComponent>();
        ecm.register_component::<Static>();
        ecm
    }

    // ── Entity lifecycle ────────────────────────────────────────────────

    /// Allocate a fresh entity with no components and no parent.
    pub fn create_entity(&mut self) -> Entity {
        let entity = self.allocator.allocate();
        self.entities.push(entity);
        self.alive.insert(entity);
        self.new_entities.insert(entity);
        entity
    }

    /// Whether `entity` currently exists (staged removals still count until
    /// end-of-tick processing).
    #[must_use]
    pub fn has_entity(&self, entity: Entity) -> bool {
        self.alive.contains(&entity)
    }

    /// Number of existing entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.alive.len()
    }

    /// Entities in creation order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities.iter().copied()
    }

    /// Whether `entity` was created during the current tick.
    #[must_use]
    pub fn is_new_entity(&self, entity: Entity) -> bool {
        self.new_entities.contains(&entity)
    }

    /// Whether `entity` is staged for removal this tick.
    #[must_use]
    pub fn is_marked_for_removal(&self, entity: Entity) -> bool {
        self.removed_entities.contains(&entity)
    }

    /// Stage `entity` (and, if `recursive`, all of its descendants) for
    /// removal at end-of-tick processing. Until then the entity stays
    /// visible to queries and to `each_removed`.
    ///
    /// Returns `false` if the entity does not exist.
    pub fn request_remove_entity(&mut self, entity: Entity, recursive: bool) -> bool {
        if !self.alive.contains(&entity) {
            return false;
        }
        let mut stack = vec![entity];
        while let Some(e) = stack.pop() {
            if !self.removed_entities.insert(e) {
                continue;
            }
            for storage in self.storages.values_mut() {
                storage.stage_remove(e);
            }
            if recursive {
                if let Some(kids) = self.children.get(&e) {
                    stack.extend(kids.iter().copied());
                }
            }
        }
        true
    }

    // ── Component CRUD ──────────────────────────────────────────────────

    /// Register component type `T` so snapshots containing it can be
    /// applied. Typed accessors register on first use; a secondary that
    /// only ever receives state must register its types explicitly.
    pub fn register_component<T: Component>(&mut self) {
        self.registry.register::<T>();
        self.storages
            .entry(T::type_id())
            .or_insert_with(|| Box::new(ComponentStorage::<T>::new()));
    }

    /// Attach a component of type `T` to `entity`, marked
    /// [`ChangeState::OneTimeChange`].
    ///
    /// A no-op returning `false` if the entity does not exist or already
    /// holds a component of this type. `ParentEntity` values are routed
    /// through [`Self::set_parent`] so the children index and acyclicity
    /// stay intact.
    pub fn create_component<T: Component>(&mut self, entity: Entity, value: T) -> bool {
        if !self.alive.contains(&entity) {
            warn!(%entity, component = T::type_name(), "create_component on unknown entity");
            return false;
        }
        if T::type_id() == ParentEntity::type_id() {
            let staged = self
                .storages
                .get(&T::type_id())
                .is_some_and(|s| s.is_staged_removal(entity));
            if self.has_component_id(entity, T::type_id()) && !staged {
                return false;
            }
            let parent = (&value as &dyn std::any::Any)
                .downcast_ref::<ParentEntity>()
                .map(|p| p.0);
            return match parent {
                Some(p) => match self.set_parent(entity, Some(p)) {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(%entity, %err, "rejected parent component");
                        false
                    }
                },
                None => false,
            };
        }
        let storage = self.storage_mut_or_create::<T>();
        storage.insert(entity, value, ChangeState::OneTimeChange)
    }

    /// Direct component lookup.
    #[must_use]
    pub fn component<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.storage::<T>()?.get(entity)
    }

    /// Mutable component lookup. Does not flag a change; pair with
    /// [`Self::set_changed`] or use [`Self::set_component_data`].
    pub fn component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        self.storage_mut::<T>()?.get_mut(entity)
    }

    /// Write a component value, creating it if absent.
    ///
    /// Uses the component's equality hook to decide whether this counts as
    /// a change; an equivalent value leaves the change state untouched.
    /// Returns `None` for an unknown entity, otherwise whether the value
    /// differed.
    pub fn set_component_data<T: Component>(&mut self, entity: Entity, value: T) -> Option<bool> {
        if !self.alive.contains(&entity) {
            return None;
        }
        if T::type_id() == ParentEntity::type_id() {
            let parent = (&value as &dyn std::any::Any)
                .downcast_ref::<ParentEntity>()
                .map(|p| p.0)?;
            let previous = self.parent(entity);
            return match self.set_parent(entity, Some(parent)) {
                Ok(()) => Some(previous != Some(parent)),
                Err(err) => {
                    warn!(%entity, %err, "rejected parent write");
                    None
                }
            };
        }
        let storage = self.storage_mut_or_create::<T>();
        if storage.has(entity) {
            let changed = storage.write(entity, value)?;
            if changed {
                storage.set_change(entity, ChangeState::PeriodicChange);
            }
            Some(changed)
        } else {
            storage.insert(entity, value, ChangeState::OneTimeChange);
            Some(true)
        }
    }

    /// Whether `entity` holds a component of type `T`.
    #[must_use]
    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.has_component_id(entity, T::type_id())
    }

    /// Whether `entity` holds a component with the given type ID.
    #[must_use]
    pub fn has_component_id(&self, entity: Entity, type_id: ComponentTypeId) -> bool {
        self.storages.get(&type_id).is_some_and(|s| s.has(entity))
    }

    /// Explicitly override a component's change state. Used by systems that
    /// compute a value in place and know whether it differed from last tick.
    ///
    /// Returns `false` if the entity does not hold that component.
    pub fn set_changed(&mut self, entity: Entity, type_id: ComponentTypeId, state: ChangeState) -> bool {
        self.storages
            .get_mut(&type_id)
            .is_some_and(|s| s.set_change(entity, state))
    }

    /// The change state of a component, if present.
    #[must_use]
    pub fn change_state(&self, entity: Entity, type_id: ComponentTypeId) -> Option<ChangeState> {
        self.storages.get(&type_id)?.change(entity)
    }

    /// Stage removal of `entity`'s component of type `T`. It remains
    /// visible to `each_removed` until end-of-tick processing.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> bool {
        self.remove_component_id(entity, T::type_id())
    }

    /// Stage removal by type ID.
    pub fn remove_component_id(&mut self, entity: Entity, type_id: ComponentTypeId) -> bool {
        if type_id == ParentEntity::type_id() {
            return self.set_parent(entity, None).is_ok();
        }
        self.storages
            .get_mut(&type_id)
            .is_some_and(|s| s.stage_remove(entity))
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Invoke `f` for every entity currently holding all of `Q`'s component
    /// types, in insertion order of the first type's storage. Returning
    /// `false` from the callback stops the scan early.
    pub fn each<Q: ComponentQuery>(&self, f: impl FnMut(Entity, Q::Refs<'_>) -> bool) {
        self.scan::<Q>(ScanMode::All, f);
    }

    /// Like [`Self::each`], restricted to entities where at least one of the
    /// listed components was added during the current tick.
    pub fn each_new<Q: ComponentQuery>(&self, f: impl FnMut(Entity, Q::Refs<'_>) -> bool) {
        self.scan::<Q>(ScanMode::New, f);
    }

    /// Like [`Self::each`], restricted to entities where at least one of the
    /// listed components is staged for removal this tick.
    pub fn each_removed<Q: ComponentQuery>(&self, f: impl FnMut(Entity, Q::Refs<'_>) -> bool) {
        self.scan::<Q>(ScanMode::Removed, f);
    }

    fn scan<Q: ComponentQuery>(
        &self,
        mode: ScanMode,
        mut f: impl FnMut(Entity, Q::Refs<'_>) -> bool,
    ) {
        let ids = Q::type_ids();
        let Some(root) = self.storages.get(&ids[0]) else {
            return;
        };
        for entity in root.entities() {
            let holds_all = ids[1..]
                .iter()
                .all(|id| self.storages.get(id).is_some_and(|s| s.has(entity)));
            if !holds_all {
                continue;
            }
            let selected = match mode {
                ScanMode::All => true,
                ScanMode::New => ids
                    .iter()
                    .any(|id| self.storages.get(id).is_some_and(|s| s.is_new(entity))),
                ScanMode::Removed => ids.iter().any(|id| {
                    self.storages
                        .get(id)
                        .is_some_and(|s| s.is_staged_removal(entity))
                }),
            };
            if !selected {
                continue;
            }
            match Q::fetch(self, entity) {
                Some(refs) => {
                    if !f(entity, refs) {
                        return;
                    }
                }
                None => {
                    // Index said the entity holds every type; treat the miss
                    // as an internal error and keep the tick going for the
                    // remaining entities.
                    error!(%entity, "component index inconsistency during scan; entity skipped");
                }
            }
        }
    }

    /// Mutable single-type iteration in insertion order. Change states are
    /// not touched; callers flag what they changed.
    pub fn each_mut<T: Component>(&mut self, mut f: impl FnMut(Entity, &mut T) -> bool) {
        let Some(storage) = self.storage_mut::<T>() else {
            return;
        };
        for (entity, value) in storage.iter_mut() {
            if !f(entity, value) {
                break;
            }
        }
    }

    /// Find an entity by its `Name` component.
    #[must_use]
    pub fn entity_by_name(&self, name: &str) -> Option<Entity> {
        let mut found = None;
        self.each::<Name>(|entity, n| {
            if n.0 == name {
                found = Some(entity);
                false
            } else {
                true
            }
        });
        found
    }

    // ── Parent/child forest ─────────────────────────────────────────────

    /// The entity's simulation parent, if any.
    #[must_use]
    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        self.component::<ParentEntity>(entity).map(|p| p.0)
    }

    /// Direct children of `entity`, in attachment order.
    #[must_use]
    pub fn children(&self, entity: Entity) -> Vec<Entity> {
        self.children.get(&entity).cloned().unwrap_or_default()
    }

    /// Direct children of `entity` holding all of the given component types.
    #[must_use]
    pub fn children_by_components(&self, entity: Entity, filter: &[ComponentTypeId]) -> Vec<Entity> {
        self.children(entity)
            .into_iter()
            .filter(|&child| filter.iter().all(|&id| self.has_component_id(child, id)))
            .collect()
    }

    /// Attach `child` under `parent` (or detach with `None`).
    ///
    /// Rejects re-parenting that would create a cycle; the forest is acyclic
    /// by construction.
    pub fn set_parent(&mut self, child: Entity, parent: Option<Entity>) -> Result<(), EcmError> {
        if !self.alive.contains(&child) {
            return Err(EcmError::UnknownEntity(child));
        }
        if let Some(p) = parent {
            if !self.alive.contains(&p) {
                return Err(EcmError::UnknownEntity(p));
            }
            // Walk up from the proposed parent; hitting `child` means the
            // new edge would close a loop.
            let mut cursor = Some(p);
            while let Some(ancestor) = cursor {
                if ancestor == child {
                    return Err(EcmError::WouldCycle { child, parent: p });
                }
                cursor = self.parent(ancestor);
            }
        }

        if let Some(old) = self.parent(child) {
            if let Some(kids) = self.children.get_mut(&old) {
                kids.retain(|&k| k != child);
            }
        }

        match parent {
            Some(p) => {
                let storage = self.storage_mut_or_create::<ParentEntity>();
                if storage.has(child) {
                    if storage.write(child, ParentEntity(p)) == Some(true) {
                        storage.set_change(child, ChangeState::OneTimeChange);
                    }
                } else {
                    storage.insert(child, ParentEntity(p), ChangeState::OneTimeChange);
                }
                self.children.entry(p).or_default().push(child);
            }
            None => {
                if let Some(storage) = self.storages.get_mut(&ParentEntity::type_id()) {
                    storage.stage_remove(child);
                }
            }
        }
        Ok(())
    }

    // ── Snapshots ───────────────────────────────────────────────────────

    /// Capture a snapshot. [`SnapshotScope::Changed`] covers entities and
    /// components whose change state is not `NoChange`, plus creations and
    /// removals; [`SnapshotScope::Full`] covers everything.
    #[must_use]
    pub fn state(&self, scope: SnapshotScope) -> EcmState {
        let changed_only = scope == SnapshotScope::Changed;
        let mut sorted_storages: Vec<_> = self.storages.iter().map(|(id, s)| (*id, s)).collect();
        sorted_storages.sort_by_key(|(id, _)| *id);

        let mut out = EcmState::new();
        for &entity in &self.entities {
            let removed = self.removed_entities.contains(&entity);
            let created = self.new_entities.contains(&entity);

            let mut components = Vec::new();
            let mut removed_components = Vec::new();
            let mut any_change = false;

            if !removed {
                for &(type_id, storage) in &sorted_storages {
                    if !storage.has(entity) {
                        continue;
                    }
                    if storage.is_staged_removal(entity) {
                        removed_components.push(type_id);
                        any_change = true;
                        continue;
                    }
                    let change = storage.change(entity).unwrap_or_default();
                    if change.is_changed() || storage.is_new(entity) {
                        any_change = true;
                    }
                    if changed_only && !created && !change.is_changed() && !storage.is_new(entity) {
                        continue;
                    }
                    match storage.serialize(entity) {
                        Some(Ok(data)) => components.push(ComponentState {
                            type_id,
                            change,
                            data,
                        }),
                        Some(Err(err)) => {
                            error!(%entity, %err, name = storage.type_name(),
                                "failed to serialize component; omitted from snapshot");
                        }
                        None => {}
                    }
                }
            }

            let lifecycle = if removed {
                EntityLifecycle::Removed
            } else if created {
                EntityLifecycle::Created
            } else if any_change {
                EntityLifecycle::Modified
            } else {
                EntityLifecycle::Unchanged
            };

            if changed_only && lifecycle == EntityLifecycle::Unchanged {
                continue;
            }

            out.entities.push(EntityState {
                entity,
                lifecycle,
                components,
                removed_components,
            });
        }
        out
    }

    /// Apply a snapshot, creating, updating, and removing entities and
    /// components to match. Unknown component types are skipped with a
    /// warning; everything else in the snapshot still applies.
    pub fn set_state(&mut self, state: &EcmState) -> Result<(), EcmError> {
        if state.version != STATE_VERSION {
            return Err(EcmError::StateVersion {
                expected: STATE_VERSION,
                got: state.version,
            });
        }
        for record in &state.entities {
            if record.lifecycle == EntityLifecycle::Removed {
                if self.alive.contains(&record.entity) {
                    self.stage_single_removal(record.entity);
                }
                continue;
            }
            self.ensure_entity(record.entity, record.lifecycle == EntityLifecycle::Created);

            for &type_id in &record.removed_components {
                if let Some(storage) = self.storages.get_mut(&type_id) {
                    storage.stage_remove(record.entity);
                }
            }

            for component in &record.components {
                let Some(vtable) = self.registry.get(component.type_id) else {
                    warn!(type_id = component.type_id.0,
                        "snapshot carries unregistered component type; skipped");
                    continue;
                };
                if let Err(err) =
                    (vtable.apply)(self, record.entity, &component.data, component.change)
                {
                    error!(%err, entity = %record.entity, name = vtable.name,
                        "failed to apply snapshot component");
                }
            }
        }
        Ok(())
    }

    /// Insert-or-update used by the snapshot apply path; the change state
    /// is taken verbatim from the snapshot.
    pub(crate) fn apply_component<T: Component>(
        &mut self,
        entity: Entity,
        value: T,
        change: ChangeState,
    ) {
        if T::type_id() == ParentEntity::type_id() {
            if let Some(parent) = (&value as &dyn std::any::Any).downcast_ref::<ParentEntity>() {
                // A snapshot may order children before parents.
                self.ensure_entity(parent.0, false);
                match self.set_parent(entity, Some(parent.0)) {
                    Ok(()) => {
                        self.set_changed(entity, T::type_id(), change);
                    }
                    Err(err) => warn!(%entity, %err, "snapshot parent rejected"),
                }
            }
            return;
        }
        let storage = self.storage_mut_or_create::<T>();
        if storage.has(entity) {
            storage.write(entity, value);
            storage.set_change(entity, change);
        } else {
            storage.insert(entity, value, change);
        }
    }

    fn ensure_entity(&mut self, entity: Entity, mark_new: bool) {
        if self.alive.contains(&entity) {
            return;
        }
        self.allocator.reserve_through(entity.id());
        self.entities.push(entity);
        self.alive.insert(entity);
        if mark_new {
            self.new_entities.insert(entity);
        }
    }

    fn stage_single_removal(&mut self, entity: Entity) {
        self.removed_entities.insert(entity);
        for storage in self.storages.values_mut() {
            storage.stage_remove(entity);
        }
    }

    // ── End-of-tick processing ──────────────────────────────────────────

    /// Commit staged removals and clear per-tick bookkeeping.
    ///
    /// Runs at exactly one point per tick, after all system phases, so
    /// every system observed the same change/new/removed answers.
    pub fn end_of_tick(&mut self) {
        if !self.removed_entities.is_empty() {
            // Detach doomed entities from surviving parents first.
            let doomed: Vec<(Entity, Option<Entity>)> = self
                .removed_entities
                .iter()
                .map(|&e| (e, self.parent(e)))
                .collect();
            for (entity, parent) in doomed {
                if let Some(p) = parent {
                    if let Some(kids) = self.children.get_mut(&p) {
                        kids.retain(|&k| k != entity);
                    }
                }
                self.children.remove(&entity);
                self.alive.remove(&entity);
            }
            self.entities.retain(|e| self.alive.contains(e));
            self.removed_entities.clear();
        }
        for storage in self.storages.values_mut() {
            storage.commit_removals();
            storage.clear_tick_state();
        }
        self.new_entities.clear();
    }

    // ── Storage access ──────────────────────────────────────────────────

    fn storage<T: Component>(&self) -> Option<&ComponentStorage<T>> {
        self.storages.get(&T::type_id())?.as_any().downcast_ref()
    }

    fn storage_mut<T: Component>(&mut self) -> Option<&mut ComponentStorage<T>> {
        self.storages
            .get_mut(&T::type_id())?
            .as_any_mut()
            .downcast_mut()
    }

    fn storage_mut_or_create<T: Component>(&mut self) -> &mut ComponentStorage<T> {
        self.registry.register::<T>();
        self.storages
            .entry(T::type_id())
            .or_insert_with(|| Box::new(ComponentStorage::<T>::new()))
            .as_any_mut()
            .downcast_mut()
            .expect("component type ID collision between distinct type names")
    }
}

impl Default for EntityComponentManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::declare_component!(Pos, f64);
    crate::declare_component!(Vel, f64);

    fn manager_with_entity() -> (EntityComponentManager, Entity) {
        let mut ecm = EntityComponentManager::new();
        let e = ecm.create_entity();
        (ecm, e)
    }

    #[test]
    fn test_create_entity_is_new_until_end_of_tick() {
        let (mut ecm, e) = manager_with_entity();
        assert!(ecm.has_entity(e));
        assert!(ecm.is_new_entity(e));
        ecm.end_of_tick();
        assert!(ecm.has_entity(e));
        assert!(!ecm.is_new_entity(e));
    }

    #[test]
    fn test_create_component_rejects_duplicates() {
        let (mut ecm, e) = manager_with_entity();
        assert!(ecm.create_component(e, Pos(1.0)));
        assert!(!ecm.create_component(e, Pos(2.0)));
        assert_eq!(ecm.component::<Pos>(e), Some(&Pos(1.0)));
    }

    #[test]
    fn test_create_component_on_unknown_entity() {
        let mut ecm = EntityComponentManager::new();
        assert!(!ecm.create_component(Entity::from_raw(99), Pos(1.0)));
    }

    #[test]
    fn test_set_component_data_tracks_changes() {
        let (mut ecm, e) = manager_with_entity();
        // First write creates with a one-time change.
        assert_eq!(ecm.set_component_data(e, Pos(1.0)), Some(true));
        assert_eq!(
            ecm.change_state(e, Pos::type_id()),
            Some(ChangeState::OneTimeChange)
        );
        ecm.end_of_tick();

        // Equivalent write: no change recorded.
        assert_eq!(ecm.set_component_data(e, Pos(1.0)), Some(false));
        assert_eq!(
            ecm.change_state(e, Pos::type_id()),
            Some(ChangeState::NoChange)
        );

        // Differing write: periodic change.
        assert_eq!(ecm.set_component_data(e, Pos(2.0)), Some(true));
        assert_eq!(
            ecm.change_state(e, Pos::type_id()),
            Some(ChangeState::PeriodicChange)
        );

        ecm.end_of_tick();
        assert_eq!(
            ecm.change_state(e, Pos::type_id()),
            Some(ChangeState::NoChange)
        );
    }

    #[test]
    fn test_removal_is_staged_until_end_of_tick() {
        let (mut ecm, e) = manager_with_entity();
        ecm.create_component(e, Pos(1.0));
        ecm.end_of_tick();

        assert!(ecm.request_remove_entity(e, false));
        // Still visible within the tick.
        assert!(ecm.has_entity(e));
        assert!(ecm.is_marked_for_removal(e));
        assert!(ecm.component::<Pos>(e).is_some());

        ecm.end_of_tick();
        assert!(!ecm.has_entity(e));
        assert!(ecm.component::<Pos>(e).is_none());
        assert_eq!(ecm.entity_count(), 0);
    }

    #[test]
    fn test_write_after_staged_removal_keeps_component() {
        let (mut ecm, e) = manager_with_entity();
        ecm.create_component(e, Pos(1.0));
        ecm.end_of_tick();

        assert!(ecm.remove_component::<Pos>(e));
        assert_eq!(ecm.set_component_data(e, Pos(2.0)), Some(true));
        assert_eq!(
            ecm.change_state(e, Pos::type_id()),
            Some(ChangeState::PeriodicChange)
        );

        ecm.end_of_tick();
        assert_eq!(ecm.component::<Pos>(e), Some(&Pos(2.0)));
    }

    #[test]
    fn test_create_after_remove_in_same_tick() {
        let (mut ecm, e) = manager_with_entity();
        ecm.create_component(e, Pos(1.0));
        ecm.end_of_tick();

        assert!(ecm.remove_component::<Pos>(e));
        assert!(ecm.create_component(e, Pos(3.0)));
        ecm.end_of_tick();
        assert_eq!(ecm.component::<Pos>(e), Some(&Pos(3.0)));
    }

    #[test]
    fn test_reparent_in_one_tick_keeps_children_consistent() {
        let mut ecm = EntityComponentManager::new();
        let a = ecm.create_entity();
        let b = ecm.create_entity();
        let child = ecm.create_entity();
        ecm.set_parent(child, Some(a)).unwrap();
        ecm.end_of_tick();

        ecm.set_parent(child, None).unwrap();
        ecm.set_parent(child, Some(b)).unwrap();
        ecm.end_of_tick();

        assert_eq!(ecm.parent(child), Some(b));
        assert!(ecm.children(a).is_empty());
        assert_eq!(ecm.children(b), vec![child]);
    }

    #[test]
    fn test_recursive_removal_takes_descendants() {
        let mut ecm = EntityComponentManager::new();
        let world = ecm.create_entity();
        let model = ecm.create_entity();
        let link = ecm.create_entity();
        ecm.set_parent(model, Some(world)).unwrap();
        ecm.set_parent(link, Some(model)).unwrap();
        ecm.end_of_tick();

        assert!(ecm.request_remove_entity(model, true));
        ecm.end_of_tick();
        assert!(ecm.has_entity(world));
        assert!(!ecm.has_entity(model));
        assert!(!ecm.has_entity(link));
        assert!(ecm.children(world).is_empty());
    }

    #[test]
    fn test_non_recursive_removal_keeps_children() {
        let mut ecm = EntityComponentManager::new();
        let parent = ecm.create_entity();
        let child = ecm.create_entity();
        ecm.set_parent(child, Some(parent)).unwrap();
        ecm.end_of_tick();

        ecm.request_remove_entity(parent, false);
        ecm.end_of_tick();
        assert!(!ecm.has_entity(parent));
        assert!(ecm.has_entity(child));
    }

    #[test]
    fn test_set_parent_rejects_cycles() {
        let mut ecm = EntityComponentManager::new();
        let a = ecm.create_entity();
        let b = ecm.create_entity();
        let c = ecm.create_entity();
        ecm.set_parent(b, Some(a)).unwrap();
        ecm.set_parent(c, Some(b)).unwrap();

        assert!(matches!(
            ecm.set_parent(a, Some(c)),
            Err(EcmError::WouldCycle { .. })
        ));
        assert!(matches!(
            ecm.set_parent(a, Some(a)),
            Err(EcmError::WouldCycle { .. })
        ));
        // The failed attempts left the forest untouched.
        assert_eq!(ecm.parent(b), Some(a));
        assert_eq!(ecm.parent(c), Some(b));
        assert_eq!(ecm.parent(a), None);
    }

    #[test]
    fn test_reparenting_updates_children_index() {
        let mut ecm = EntityComponentManager::new();
        let a = ecm.create_entity();
        let b = ecm.create_entity();
        let child = ecm.create_entity();
        ecm.set_parent(child, Some(a)).unwrap();
        ecm.set_parent(child, Some(b)).unwrap();

        assert!(ecm.children(a).is_empty());
        assert_eq!(ecm.children(b), vec![child]);
        assert_eq!(ecm.parent(child), Some(b));
    }

    #[test]
    fn test_each_iterates_in_insertion_order() {
        let mut ecm = EntityComponentManager::new();
        let e1 = ecm.create_entity();
        let e2 = ecm.create_entity();
        let e3 = ecm.create_entity();
        ecm.create_component(e2, Pos(2.0));
        ecm.create_component(e1, Pos(1.0));
        ecm.create_component(e3, Pos(3.0));
        ecm.create_component(e1, Vel(0.1));
        ecm.create_component(e3, Vel(0.3));

        let mut seen = Vec::new();
        ecm.each::<Pos>(|entity, pos| {
            seen.push((entity, pos.0));
            true
        });
        // Order follows Pos insertion, not entity creation.
        assert_eq!(seen, vec![(e2, 2.0), (e1, 1.0), (e3, 3.0)]);

        let mut joined = Vec::new();
        ecm.each::<(Pos, Vel)>(|entity, (pos, vel)| {
            joined.push((entity, pos.0, vel.0));
            true
        });
        assert_eq!(joined, vec![(e1, 1.0, 0.1), (e3, 3.0, 0.3)]);
    }

    #[test]
    fn test_each_early_exit() {
        let mut ecm = EntityComponentManager::new();
        for i in 0..5 {
            let e = ecm.create_entity();
            ecm.create_component(e, Pos(i as f64));
        }
        let mut visits = 0;
        ecm.each::<Pos>(|_, _| {
            visits += 1;
            visits < 2
        });
        assert_eq!(visits, 2);
    }

    #[test]
    fn test_each_new_scoped_to_current_tick() {
        let mut ecm = EntityComponentManager::new();
        let e1 = ecm.create_entity();
        ecm.create_component(e1, Pos(1.0));
        ecm.end_of_tick();

        let e2 = ecm.create_entity();
        ecm.create_component(e2, Pos(2.0));

        let mut new_entities = Vec::new();
        ecm.each_new::<Pos>(|entity, _| {
            new_entities.push(entity);
            true
        });
        assert_eq!(new_entities, vec![e2]);

        ecm.end_of_tick();
        let mut after = Vec::new();
        ecm.each_new::<Pos>(|entity, _| {
            after.push(entity);
            true
        });
        assert!(after.is_empty());
    }

    #[test]
    fn test_each_removed_sees_staged_values() {
        let mut ecm = EntityComponentManager::new();
        let e = ecm.create_entity();
        ecm.create_component(e, Pos(7.0));
        ecm.end_of_tick();

        ecm.remove_component::<Pos>(e);
        let mut seen = Vec::new();
        ecm.each_removed::<Pos>(|entity, pos| {
            seen.push((entity, pos.0));
            true
        });
        assert_eq!(seen, vec![(e, 7.0)]);

        ecm.end_of_tick();
        assert!(!ecm.has_component::<Pos>(e));
    }

    #[test]
    fn test_each_mut_leaves_change_state_alone() {
        let mut ecm = EntityComponentManager::new();
        let e = ecm.create_entity();
        ecm.create_component(e, Pos(0.0));
        ecm.end_of_tick();

        ecm.each_mut::<Pos>(|_, pos| {
            pos.0 += 1.0;
            true
        });
        assert_eq!(ecm.component::<Pos>(e), Some(&Pos(1.0)));
        assert_eq!(
            ecm.change_state(e, Pos::type_id()),
            Some(ChangeState::NoChange)
        );

        ecm.set_changed(e, Pos::type_id(), ChangeState::PeriodicChange);
        assert_eq!(
            ecm.change_state(e, Pos::type_id()),
            Some(ChangeState::PeriodicChange)
        );
    }

    #[test]
    fn test_entity_by_name() {
        let mut ecm = EntityComponentManager::new();
        let e = ecm.create_entity();
        ecm.create_component(e, Name("robot".into()));
        assert_eq!(ecm.entity_by_name("robot"), Some(e));
        assert_eq!(ecm.entity_by_name("nope"), None);
    }

    #[test]
    fn test_children_by_components() {
        let mut ecm = EntityComponentManager::new();
        let world = ecm.create_entity();
        let a = ecm.create_entity();
        let b = ecm.create_entity();
        ecm.set_parent(a, Some(world)).unwrap();
        ecm.set_parent(b, Some(world)).unwrap();
        ecm.create_component(a, Static);

        let filtered = ecm.children_by_components(world, &[Static::type_id()]);
        assert_eq!(filtered, vec![a]);
        let all = ecm.children_by_components(world, &[]);
        assert_eq!(all, vec![a, b]);
    }

    #[test]
    fn test_full_snapshot_roundtrip() {
        let mut source = EntityComponentManager::new();
        let world = source.create_entity();
        source.create_component(world, Name("default".into()));
        source.create_component(world, WorldComponent);
        let model = source.create_entity();
        source.create_component(model, Name("box".into()));
        source.set_parent(model, Some(world)).unwrap();
        source.create_component(model, Pos(1.5));
        source.end_of_tick();

        let state = source.state(SnapshotScope::Full);

        let mut target = EntityComponentManager::new();
        target.register_component::<Pos>();
        target.set_state(&state).unwrap();
        target.end_of_tick();

        assert_eq!(target.entity_count(), 2);
        assert_eq!(target.component::<Name>(world), Some(&Name("default".into())));
        assert_eq!(target.component::<Pos>(model), Some(&Pos(1.5)));
        assert_eq!(target.parent(model), Some(world));

        // The reconstructed world captures an identical full snapshot.
        assert_eq!(target.state(SnapshotScope::Full), state);
    }

    #[test]
    fn test_changed_snapshot_covers_only_changes() {
        let mut ecm = EntityComponentManager::new();
        let e1 = ecm.create_entity();
        ecm.create_component(e1, Pos(1.0));
        let e2 = ecm.create_entity();
        ecm.create_component(e2, Pos(2.0));
        ecm.end_of_tick();

        // Quiet tick: nothing to report.
        assert!(ecm.state(SnapshotScope::Changed).is_empty());

        ecm.set_component_data(e2, Pos(4.0));
        let state = ecm.state(SnapshotScope::Changed);
        assert_eq!(state.entities.len(), 1);
        assert_eq!(state.entities[0].entity, e2);
        assert_eq!(state.entities[0].lifecycle, EntityLifecycle::Modified);
        assert_eq!(
            state.entities[0].components[0].change,
            ChangeState::PeriodicChange
        );
    }

    #[test]
    fn test_changed_snapshot_propagates_removals() {
        let mut primary = EntityComponentManager::new();
        primary.register_component::<Pos>();
        let e = primary.create_entity();
        primary.create_component(e, Pos(1.0));
        primary.end_of_tick();

        let mut secondary = EntityComponentManager::new();
        secondary.register_component::<Pos>();
        secondary.set_state(&primary.state(SnapshotScope::Full)).unwrap();
        secondary.end_of_tick();
        assert!(secondary.has_entity(e));

        primary.request_remove_entity(e, false);
        let delta = primary.state(SnapshotScope::Changed);
        assert_eq!(delta.entities[0].lifecycle, EntityLifecycle::Removed);

        secondary.set_state(&delta).unwrap();
        secondary.end_of_tick();
        assert!(!secondary.has_entity(e));
        primary.end_of_tick();
    }

    #[test]
    fn test_set_state_skips_unknown_component_types() {
        let mut source = EntityComponentManager::new();
        let e = source.create_entity();
        source.create_component(e, Pos(9.0));
        source.create_component(e, Name("beacon".into()));
        let state = source.state(SnapshotScope::Full);

        // Target never registered Pos.
        let mut target = EntityComponentManager::new();
        target.set_state(&state).unwrap();
        target.end_of_tick();
        assert!(target.has_entity(e));
        assert_eq!(target.component::<Name>(e), Some(&Name("beacon".into())));
        assert!(!target.has_component::<Pos>(e));
    }

    #[test]
    fn test_set_state_rejects_version_mismatch() {
        let mut state = EcmState::new();
        state.version = STATE_VERSION + 1;
        let mut ecm = EntityComponentManager::new();
        assert!(matches!(
            ecm.set_state(&state),
            Err(EcmError::StateVersion { .. })
        ));
    }

    #[test]
    fn test_set_state_preserves_change_states() {
        let mut source = EntityComponentManager::new();
        let e = source.create_entity();
        source.create_component(e, Pos(0.0));
        source.end_of_tick();
        source.set_component_data(e, Pos(3.0));

        let delta = source.state(SnapshotScope::Changed);

        let mut target = EntityComponentManager::new();
        target.register_component::<Pos>();
        target.set_state(&delta).unwrap();
        assert_eq!(
            target.change_state(e, Pos::type_id()),
            Some(ChangeState::PeriodicChange)
        );
    }

    #[test]
    fn test_set_state_allocator_skips_foreign_ids() {
        let mut source = EntityComponentManager::new();
        source.create_entity();
        let far = source.create_entity();

        let mut target = EntityComponentManager::new();
        target.set_state(&source.state(SnapshotScope::Full)).unwrap();
        let fresh = target.create_entity();
        assert!(fresh.id() > far.id());
    }
}
