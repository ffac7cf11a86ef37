//! Message types exchanged between simulation processes.
//!
//! All message types derive `Serialize` and `Deserialize` for MessagePack
//! transport. Everything a receiver needs is in the payload; no routing
//! metadata is hidden in NATS headers, so the same structs travel over the
//! in-process link used by tests.

use serde::{Deserialize, Serialize};
use sim_ecm::EcmState;

// ── Distributed stepping ────────────────────────────────────────────────────

/// One tick's worth of world state, published by the primary on
/// [`state_subject`](crate::subjects::state_subject) after each tick.
///
/// Carries the changed-entity snapshot by default; the first message of a
/// run carries a full snapshot so a late-joining secondary starts from a
/// complete world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMsg {
    /// The world this snapshot belongs to.
    pub world: String,
    /// Ticks completed on the primary, this snapshot's tick included.
    pub iterations: u64,
    /// Accumulated simulated time, in nanoseconds.
    pub sim_time_ns: u64,
    /// The serialized entity/component delta.
    pub state: EcmState,
}

/// A secondary announces itself on
/// [`ready_subject`](crate::subjects::ready_subject) before the run starts.
/// The primary blocks until the expected number of secondaries is ready.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryReady {
    /// Unique instance identifier (UUID).
    pub instance_id: String,
    /// The world the secondary participates in.
    pub world: String,
}

/// A secondary acknowledges applying one snapshot, published on
/// [`ack_subject`](crate::subjects::ack_subject). The primary blocks the
/// next tick until every known secondary has acked the current one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepAck {
    /// The acknowledging secondary.
    pub instance_id: String,
    /// The iteration count the secondary has caught up to.
    pub iterations: u64,
}

// ── World control ───────────────────────────────────────────────────────────

/// External run control, published on
/// [`control_subject`](crate::subjects::control_subject).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorldControlMsg {
    /// Requested paused state, if any.
    pub pause: Option<bool>,
    /// Force exactly one full tick, regardless of the paused state.
    pub step: bool,
    /// Run this many further iterations, then pause.
    pub run_to_iterations: Option<u64>,
}

// ── Service side channel ────────────────────────────────────────────────────

/// A request on the world's service subject. Operations are named by
/// string so the channel can grow without a schema change; parameters are
/// JSON for the same reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    /// Correlation ID echoed in the response (UUID).
    pub request_id: String,
    /// Operation name, e.g. `"world_control"` or `"resource_paths.get"`.
    pub op: String,
    /// Operation parameters.
    pub params: serde_json::Value,
}

/// The reply to a [`ServiceRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse {
    /// The request this responds to.
    pub request_id: String,
    /// Whether the operation was accepted.
    pub success: bool,
    /// Operation result, or an error description when `success` is false.
    pub payload: serde_json::Value,
}

/// Per-tick world statistics, published on
/// [`stats_subject`](crate::subjects::stats_subject).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldStats {
    /// Ticks completed.
    pub iterations: u64,
    /// Accumulated simulated time, in nanoseconds.
    pub sim_time_ns: u64,
    /// Whether the world is currently paused.
    pub paused: bool,
}
