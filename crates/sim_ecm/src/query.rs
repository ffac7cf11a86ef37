//! Tuple queries over component types.
//!
//! A [`ComponentQuery`] is implemented for a single component type and for
//! tuples up to four types, giving `each::<(Pose, LinearVelocity)>(..)`-style
//! joins. The first listed type is the scan root: iteration order is the
//! insertion order of its storage.

use crate::component::{Component, ComponentTypeId};
use crate::entity::Entity;
use crate::manager::EntityComponentManager;

/// A set of component types fetched together per entity.
pub trait ComponentQuery {
    /// The borrowed references handed to the callback.
    type Refs<'a>;

    /// The stable type IDs, in declaration order. Never empty.
    fn type_ids() -> Vec<ComponentTypeId>;

    /// Fetch all references for `entity`, or `None` if any type is absent.
    fn fetch(ecm: &EntityComponentManager, entity: Entity) -> Option<Self::Refs<'_>>;
}

impl<T: Component> ComponentQuery for T {
    type Refs<'a> = &'a T;

    fn type_ids() -> Vec<ComponentTypeId> {
        vec![T::type_id()]
    }

    fn fetch(ecm: &EntityComponentManager, entity: Entity) -> Option<Self::Refs<'_>> {
        ecm.component::<T>(entity)
    }
}

macro_rules! impl_component_query {
    ($($ty:ident),+) => {
        impl<$($ty: Component),+> ComponentQuery for ($($ty,)+) {
            type Refs<'a> = ($(&'a $ty,)+);

            fn type_ids() -> Vec<ComponentTypeId> {
                vec![$($ty::type_id()),+]
            }

            fn fetch(ecm: &EntityComponentManager, entity: Entity) -> Option<Self::Refs<'_>> {
                Some(($(ecm.component::<$ty>(entity)?,)+))
            }
        }
    };
}

impl_component_query!(A);
impl_component_query!(A, B);
impl_component_query!(A, B, C);
impl_component_query!(A, B, C, D);
