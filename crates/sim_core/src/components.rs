//! Simulation components carried by world entities.
//!
//! The manager's base components (`Name`, `ParentEntity`, ...) live in
//! `sim_ecm`; everything kinematic lives here. Float-carrying components
//! override the equality hook with a tolerance so integration noise below
//! the threshold does not flag a change every tick.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use sim_ecm::Component;

/// Absolute tolerance for pose and velocity comparisons.
pub const KINEMATIC_TOLERANCE: f32 = 1e-6;

/// World-frame pose of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Component for Pose {
    fn type_name() -> &'static str {
        "Pose"
    }

    fn matches(&self, other: &Self) -> bool {
        self.translation.abs_diff_eq(other.translation, KINEMATIC_TOLERANCE)
            && self.rotation.abs_diff_eq(other.rotation, KINEMATIC_TOLERANCE)
    }
}

/// Linear velocity in the world frame, metres per second.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LinearVelocity(pub Vec3);

impl Component for LinearVelocity {
    fn type_name() -> &'static str {
        "LinearVelocity"
    }

    fn matches(&self, other: &Self) -> bool {
        self.0.abs_diff_eq(other.0, KINEMATIC_TOLERANCE)
    }
}

/// Angular velocity in the world frame, radians per second.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AngularVelocity(pub Vec3);

impl Component for AngularVelocity {
    fn type_name() -> &'static str {
        "AngularVelocity"
    }

    fn matches(&self, other: &Self) -> bool {
        self.0.abs_diff_eq(other.0, KINEMATIC_TOLERANCE)
    }
}
