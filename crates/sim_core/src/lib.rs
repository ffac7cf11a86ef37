//! # sim_core
//!
//! The simulation server: worlds, runners, systems, and the service
//! front-end.
//!
//! The layering is strict. [`sim_ecm`] holds state, [`sim_system`] defines
//! the tick phases, [`sim_events`] carries loop signals, and [`sim_net`]
//! moves snapshots between processes. This crate composes them:
//!
//! - [`config`] — the [`ServerConfig`] consumed once at construction.
//! - [`world_desc`] — JSON world descriptions and ECM seeding.
//! - [`systems`] — the default system set (kinematics, user commands,
//!   scene broadcasting, state logging).
//! - [`runner`] — the per-world tick loop.
//! - [`network`] — distributed lockstep over a snapshot link.
//! - [`server`] — the multi-world [`Server`] and its threading model.
//! - [`service`] — user commands and the request dispatcher.

pub mod components;
pub mod config;
pub mod error;
pub mod network;
pub mod runner;
pub mod server;
pub mod service;
pub mod systems;
pub mod util;
pub mod world_desc;

pub use components::{AngularVelocity, LinearVelocity, Pose};
pub use config::{CommandTiebreak, NetworkRole, PluginInfo, ServerConfig};
pub use error::ServerError;
pub use network::NetworkStepper;
pub use runner::{RunnerRequest, RunnerStatus, SimulationRunner};
pub use server::Server;
pub use service::{CommandBuffer, UserCommand, handle_request};
pub use util::{SeedContext, WarnOnce};
pub use world_desc::{WorldDescription, default_world, load_world, parse_world};
