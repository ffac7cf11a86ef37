//! Kinematic physics stand-in.
//!
//! Integrates `Pose += LinearVelocity * dt` during Update for every
//! non-static entity. This fills the physics slot of the default pipeline
//! without binding a real engine; a proper backend would replace this
//! system wholesale.

use glam::Vec3;
use sim_ecm::{Entity, EntityComponentManager, Static};
use sim_system::{System, UpdateInfo};
use tracing::warn;

use crate::components::{AngularVelocity, LinearVelocity, Pose};
use crate::util::WarnOnce;

#[derive(Default)]
pub struct PhysicsSystem {
    angular_warn: WarnOnce,
}

impl PhysicsSystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl System for PhysicsSystem {
    fn name(&self) -> &str {
        "physics"
    }

    fn update(&mut self, info: &UpdateInfo, ecm: &mut EntityComponentManager) {
        let dt = info.dt.as_secs_f32();
        if dt <= 0.0 {
            return;
        }

        let mut moves: Vec<(Entity, Pose)> = Vec::new();
        ecm.each::<(Pose, LinearVelocity)>(|entity, (pose, velocity)| {
            if ecm.has_component::<Static>(entity) || velocity.0 == Vec3::ZERO {
                return true;
            }
            let mut next = *pose;
            next.translation += velocity.0 * dt;
            moves.push((entity, next));
            true
        });
        for (entity, pose) in moves {
            ecm.set_component_data(entity, pose);
        }

        // Angular integration is outside this backend's capability set.
        let mut spinning = false;
        ecm.each::<AngularVelocity>(|_, angular| {
            if angular.0 != Vec3::ZERO {
                spinning = true;
                return false;
            }
            true
        });
        if spinning && self.angular_warn.once() {
            warn!("kinematic backend cannot integrate angular velocity; rotation is frozen");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn info(dt_ms: u64) -> UpdateInfo {
        UpdateInfo {
            dt: Duration::from_millis(dt_ms),
            ..UpdateInfo::default()
        }
    }

    #[test]
    fn test_update_integrates_linear_velocity() {
        let mut ecm = EntityComponentManager::new();
        let e = ecm.create_entity();
        ecm.create_component(e, Pose::IDENTITY);
        ecm.create_component(e, LinearVelocity(Vec3::new(2.0, 0.0, 0.0)));
        ecm.end_of_tick();

        let mut physics = PhysicsSystem::new();
        physics.update(&info(500), &mut ecm);

        let pose = ecm.component::<Pose>(e).unwrap();
        assert!((pose.translation.x - 1.0).abs() < 1e-6);
        assert!(
            ecm.change_state(e, <Pose as sim_ecm::Component>::type_id())
                .unwrap()
                .is_changed()
        );
    }

    #[test]
    fn test_static_entities_do_not_move() {
        let mut ecm = EntityComponentManager::new();
        let e = ecm.create_entity();
        ecm.create_component(e, Pose::IDENTITY);
        ecm.create_component(e, LinearVelocity(Vec3::ONE));
        ecm.create_component(e, Static);
        ecm.end_of_tick();

        PhysicsSystem::new().update(&info(100), &mut ecm);
        assert_eq!(ecm.component::<Pose>(e).unwrap().translation, Vec3::ZERO);
    }

    #[test]
    fn test_zero_dt_is_a_noop() {
        let mut ecm = EntityComponentManager::new();
        let e = ecm.create_entity();
        ecm.create_component(e, Pose::IDENTITY);
        ecm.create_component(e, LinearVelocity(Vec3::ONE));
        ecm.end_of_tick();

        PhysicsSystem::new().update(&info(0), &mut ecm);
        assert_eq!(ecm.component::<Pose>(e).unwrap().translation, Vec3::ZERO);
    }
}
