//! Distributed stepping over a [`SnapshotLink`].
//!
//! A primary runs the simulation and, after every advancing tick, publishes
//! the changed-entity snapshot, then waits (bounded) for each known
//! secondary to acknowledge it. A secondary never authors state; its run
//! loop applies received snapshots and acks. The [`NetworkStepper`] wraps
//! the link plus the handshake/ack bookkeeping so the runner only deals
//! with two calls per tick.

use std::time::Duration;

use sim_ecm::{EntityComponentManager, SnapshotScope};
use sim_net::{LinkRole, NetError, SecondaryReady, SnapshotLink, SnapshotMsg, StepAck};
use tracing::{info, warn};
use uuid::Uuid;

/// Default wait for one secondary's ready announcement.
pub const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default wait for the full set of step acks.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(1);

pub struct NetworkStepper {
    role: LinkRole,
    link: Box<dyn SnapshotLink>,
    expected_secondaries: usize,
    instance_id: String,
    sent_initial: bool,
    ack_timeout: Duration,
    ready_timeout: Duration,
}

impl NetworkStepper {
    /// Primary side: will wait for `expected_secondaries` at run start and
    /// for the same number of acks each tick.
    #[must_use]
    pub fn primary(link: Box<dyn SnapshotLink>, expected_secondaries: usize) -> Self {
        Self {
            role: LinkRole::Primary,
            link,
            expected_secondaries,
            instance_id: Uuid::new_v4().to_string(),
            sent_initial: false,
            ack_timeout: ACK_TIMEOUT,
            ready_timeout: READY_TIMEOUT,
        }
    }

    /// Secondary side.
    #[must_use]
    pub fn secondary(link: Box<dyn SnapshotLink>) -> Self {
        Self {
            role: LinkRole::Secondary,
            link,
            expected_secondaries: 0,
            instance_id: Uuid::new_v4().to_string(),
            sent_initial: false,
            ack_timeout: ACK_TIMEOUT,
            ready_timeout: READY_TIMEOUT,
        }
    }

    #[must_use]
    pub fn role(&self) -> LinkRole {
        self.role
    }

    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.role == LinkRole::Primary
    }

    /// Run-start synchronization.
    ///
    /// The primary collects ready announcements; a secondary that misses
    /// the window is dropped from the expected set with a warning rather
    /// than stalling the run forever. A secondary announces itself once.
    pub fn handshake(&mut self, world: &str) {
        match self.role {
            LinkRole::Primary => {
                let mut joined = 0;
                for _ in 0..self.expected_secondaries {
                    match self.link.recv_ready(self.ready_timeout) {
                        Ok(ready) => {
                            info!(world, instance = %ready.instance_id, "secondary joined");
                            joined += 1;
                        }
                        Err(err) => {
                            warn!(world, %err, "secondary missed the ready window");
                            break;
                        }
                    }
                }
                if joined < self.expected_secondaries {
                    warn!(
                        world,
                        expected = self.expected_secondaries,
                        joined,
                        "running with fewer secondaries than configured"
                    );
                    self.expected_secondaries = joined;
                }
            }
            LinkRole::Secondary => {
                let ready = SecondaryReady {
                    instance_id: self.instance_id.clone(),
                    world: world.to_string(),
                };
                if let Err(err) = self.link.send_ready(&ready) {
                    warn!(world, %err, "failed to announce readiness");
                }
            }
        }
    }

    /// Primary: publish this tick's state and wait for the acks.
    ///
    /// The first publish of a run carries a full snapshot so secondaries
    /// start from a complete world; the rest carry changed entities only.
    /// Change flags must still be set when this is called, i.e. before the
    /// manager's end-of-tick cleanup.
    pub fn publish_tick(
        &mut self,
        world: &str,
        iterations: u64,
        sim_time: Duration,
        ecm: &EntityComponentManager,
    ) {
        let scope = if self.sent_initial {
            SnapshotScope::Changed
        } else {
            SnapshotScope::Full
        };
        let msg = SnapshotMsg {
            world: world.to_string(),
            iterations,
            sim_time_ns: sim_time.as_nanos() as u64,
            state: ecm.state(scope),
        };
        if let Err(err) = self.link.send_snapshot(&msg) {
            warn!(world, iterations, %err, "failed to publish snapshot");
            return;
        }
        self.sent_initial = true;

        if self.expected_secondaries > 0 {
            match self
                .link
                .recv_acks(self.expected_secondaries, self.ack_timeout)
            {
                Ok(_) => {}
                Err(err) => warn!(world, iterations, %err, "incomplete step acks; continuing"),
            }
        }
    }

    /// Secondary: wait for the next snapshot.
    ///
    /// # Errors
    ///
    /// Propagates link errors; [`NetError::Timeout`] just means no tick
    /// arrived inside `timeout`.
    pub fn recv_step(&mut self, timeout: Duration) -> Result<SnapshotMsg, NetError> {
        self.link.recv_snapshot(timeout)
    }

    /// Secondary: acknowledge an applied snapshot.
    pub fn ack_step(&mut self, iterations: u64) {
        let ack = StepAck {
            instance_id: self.instance_id.clone(),
            iterations,
        };
        if let Err(err) = self.link.send_ack(&ack) {
            warn!(iterations, %err, "failed to ack step");
        }
    }

    /// Shrink the handshake/ack windows, used by tests.
    pub fn set_timeouts(&mut self, ready: Duration, ack: Duration) {
        self.ready_timeout = ready;
        self.ack_timeout = ack;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_net::local_link;

    #[test]
    fn test_handshake_pairs_primary_and_secondary() {
        let (a, b) = local_link();
        let mut primary = NetworkStepper::primary(Box::new(a), 1);
        let mut secondary = NetworkStepper::secondary(Box::new(b));
        primary.set_timeouts(Duration::from_millis(200), Duration::from_millis(200));

        secondary.handshake("default");
        primary.handshake("default");
        assert_eq!(primary.expected_secondaries, 1);
    }

    #[test]
    fn test_handshake_drops_missing_secondaries() {
        let (a, _b) = local_link();
        let mut primary = NetworkStepper::primary(Box::new(a), 2);
        primary.set_timeouts(Duration::from_millis(10), Duration::from_millis(10));
        primary.handshake("default");
        assert_eq!(primary.expected_secondaries, 0);
    }

    #[test]
    fn test_first_publish_is_full_then_changed() {
        let (a, mut b) = local_link();
        let mut primary = NetworkStepper::primary(Box::new(a), 0);

        let mut ecm = EntityComponentManager::new();
        let e = ecm.create_entity();
        ecm.create_component(e, sim_ecm::Name("beacon".to_string()));
        ecm.end_of_tick();

        primary.publish_tick("default", 1, Duration::from_millis(1), &ecm);
        let first = b.recv_snapshot(Duration::from_millis(100)).unwrap();
        // Unchanged entity present: full scope.
        assert_eq!(first.state.entities.len(), 1);

        primary.publish_tick("default", 2, Duration::from_millis(2), &ecm);
        let second = b.recv_snapshot(Duration::from_millis(100)).unwrap();
        // Nothing changed since: empty delta.
        assert!(second.state.is_empty());
        assert_eq!(second.iterations, 2);
    }
}
