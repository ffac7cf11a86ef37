//! NATS subject hierarchy.
//!
//! All simulation subjects are prefixed with `sim.` to namespace within a
//! shared NATS cluster. Per-world subjects embed the world name, so several
//! worlds (and several server instances) can share one cluster.

/// Root prefix for all simulation NATS subjects.
pub const PREFIX: &str = "sim";

// ── Dynamic subject builders ────────────────────────────────────────────────

/// State snapshots published by the primary after each tick.
///
/// `sim.world.<world>.state`
#[must_use]
pub fn state_subject(world: &str) -> String {
    format!("sim.world.{world}.state")
}

/// Step acknowledgements from secondaries back to the primary.
///
/// `sim.world.<world>.step.ack`
#[must_use]
pub fn ack_subject(world: &str) -> String {
    format!("sim.world.{world}.step.ack")
}

/// Secondaries announce themselves here before the run starts.
///
/// `sim.world.<world>.secondary.ready`
#[must_use]
pub fn ready_subject(world: &str) -> String {
    format!("sim.world.{world}.secondary.ready")
}

/// World control messages (pause, step, run-to-iteration).
///
/// `sim.world.<world>.control`
#[must_use]
pub fn control_subject(world: &str) -> String {
    format!("sim.world.{world}.control")
}

/// Request/reply service side channel for a world.
///
/// `sim.world.<world>.service`
#[must_use]
pub fn service_subject(world: &str) -> String {
    format!("sim.world.{world}.service")
}

/// Scene summaries published by the scene broadcaster.
///
/// `sim.world.<world>.scene`
#[must_use]
pub fn scene_subject(world: &str) -> String {
    format!("sim.world.{world}.scene")
}

/// Per-tick world statistics (iterations, sim time, paused).
///
/// `sim.world.<world>.stats`
#[must_use]
pub fn stats_subject(world: &str) -> String {
    format!("sim.world.{world}.stats")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_subjects() {
        assert_eq!(state_subject("default"), "sim.world.default.state");
        assert_eq!(ack_subject("default"), "sim.world.default.step.ack");
        assert_eq!(
            ready_subject("default"),
            "sim.world.default.secondary.ready"
        );
        assert_eq!(control_subject("shapes"), "sim.world.shapes.control");
        assert_eq!(service_subject("shapes"), "sim.world.shapes.service");
        assert_eq!(scene_subject("shapes"), "sim.world.shapes.scene");
        assert_eq!(stats_subject("shapes"), "sim.world.shapes.stats");
    }
}
