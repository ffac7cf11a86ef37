//! The default system set and the system factory.
//!
//! Systems are a closed set created by name through [`create_system`]; the
//! plugin list in the configuration references these names. Unknown names
//! are a configuration error handled by the caller (warn and skip).

mod log_record;
mod physics;
mod scene_broadcaster;
mod user_commands;

pub use log_record::{LogRecord, LogRecordSystem, read_state_log};
pub use physics::PhysicsSystem;
pub use scene_broadcaster::{
    ChannelScenePublisher, SceneBroadcasterSystem, SceneEntity, ScenePublisher, SceneSummary,
    TracingScenePublisher,
};
pub use user_commands::UserCommandsSystem;

use std::path::PathBuf;
use std::sync::Arc;

use sim_system::System;

use crate::config::CommandTiebreak;
use crate::service::CommandBuffer;

/// Everything the factory may hand to a newly built system.
pub struct SystemDeps {
    /// The world's command queue, shared with the service front-end.
    pub commands: Arc<CommandBuffer>,
    /// Tie-break policy for contradictory commands.
    pub tiebreak: CommandTiebreak,
    /// World name, stamped into broadcast messages.
    pub world_name: String,
    /// State log destination, when recording is enabled.
    pub log_record_path: Option<PathBuf>,
    /// Scene output destination; `None` falls back to the tracing
    /// publisher. Consumed by the first scene broadcaster built.
    pub scene_publisher: Option<Box<dyn ScenePublisher>>,
}

/// Names of the systems every world gets by default, in pipeline order.
pub const DEFAULT_SYSTEMS: [&str; 3] = ["physics", "user_commands", "scene_broadcaster"];

/// Build a system by factory name. Returns `None` for an unknown name.
pub fn create_system(name: &str, deps: &mut SystemDeps) -> Option<Box<dyn System>> {
    match name {
        "physics" => Some(Box::new(PhysicsSystem::new())),
        "user_commands" => Some(Box::new(UserCommandsSystem::new(
            Arc::clone(&deps.commands),
            deps.tiebreak,
        ))),
        "scene_broadcaster" => {
            let publisher = deps
                .scene_publisher
                .take()
                .unwrap_or_else(|| Box::new(TracingScenePublisher));
            Some(Box::new(SceneBroadcasterSystem::new(
                deps.world_name.clone(),
                publisher,
            )))
        }
        "log_record" => {
            let path = deps
                .log_record_path
                .clone()
                .unwrap_or_else(|| PathBuf::from("state.log"));
            Some(Box::new(LogRecordSystem::new(path)))
        }
        _ => None,
    }
}
