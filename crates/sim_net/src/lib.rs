//! # sim_net
//!
//! Transport layer for the simulation server.
//!
//! This crate provides:
//!
//! - [`subjects`] — NATS subject hierarchy builders.
//! - [`messages`] — Message types exchanged between primary, secondaries,
//!   and external tools.
//! - [`codec`] — MessagePack serialisation/deserialisation helpers.
//! - [`connection`] — NATS connection management.
//! - [`link`] — The [`SnapshotLink`] abstraction over NATS or an
//!   in-process channel pair.
//! - [`error`] — Network-layer error types.

pub mod codec;
pub mod connection;
pub mod error;
pub mod link;
pub mod messages;
pub mod subjects;

pub use codec::{decode, encode};
pub use connection::NatsConnection;
pub use error::NetError;
pub use link::{LinkRole, LocalLink, NatsLink, SnapshotLink, local_link};
pub use messages::{
    SecondaryReady, ServiceRequest, ServiceResponse, SnapshotMsg, StepAck, WorldControlMsg,
    WorldStats,
};
