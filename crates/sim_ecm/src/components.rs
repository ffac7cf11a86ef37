//! Base components every world carries.
//!
//! Domain-specific components (poses, velocities, sensor data) live with
//! their subsystems; only the types the manager itself understands are
//! defined here.

use crate::declare_component;
use crate::entity::Entity;

declare_component!(
    /// Human-readable entity name. Unique within a world by convention,
    /// not enforced.
    Name, String
);

declare_component!(
    /// Link to the entity's simulation parent. Maintained through
    /// [`EntityComponentManager::set_parent`] so the auxiliary children
    /// index and the acyclicity guarantee stay intact.
    ///
    /// [`EntityComponentManager::set_parent`]: crate::EntityComponentManager::set_parent
    ParentEntity, Entity
);

declare_component!(
    /// Marks an entity as a world root (no simulation parent).
    WorldComponent
);

declare_component!(
    /// Marks an entity as static: no system should author motion for it.
    Static
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;

    #[test]
    fn test_base_component_names() {
        assert_eq!(Name::type_name(), "Name");
        assert_eq!(ParentEntity::type_name(), "ParentEntity");
        assert_eq!(WorldComponent::type_name(), "WorldComponent");
        assert_eq!(Static::type_name(), "Static");
    }

    #[test]
    fn test_parent_entity_roundtrip() {
        let parent = ParentEntity(Entity::from_raw(7));
        let bytes = rmp_serde::to_vec(&parent).unwrap();
        let restored: ParentEntity = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(parent, restored);
    }
}
