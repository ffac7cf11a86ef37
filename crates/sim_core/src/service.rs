//! Service side channel: user commands and request/response handling.
//!
//! External callers never touch an ECM directly. Mutations arrive as
//! [`UserCommand`]s pushed into a world's [`CommandBuffer`]; the
//! user-commands system drains the buffer at the top of the next tick, so
//! effects always land at a tick boundary. Queries and control flow through
//! [`handle_request`], which answers synchronously from server-side state.

use std::sync::Mutex;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sim_net::{ServiceRequest, ServiceResponse, WorldControlMsg};
use tracing::debug;

use crate::components::Pose;
use crate::server::Server;

/// A deferred world mutation, addressed by entity name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UserCommand {
    /// Teleport an entity.
    SetPose { entity: String, pose: Pose },
    /// Set an entity's linear velocity.
    VelocityCmd { entity: String, linear: Vec3 },
    /// Zero an entity's velocities.
    VelocityReset { entity: String },
    /// Spawn a model under the world entity.
    Spawn {
        name: String,
        #[serde(default)]
        pose: Pose,
        #[serde(default)]
        linear_velocity: Option<Vec3>,
    },
    /// Remove an entity (and its subtree when `recursive`).
    Remove { entity: String, recursive: bool },
}

/// Queue of pending commands for one world, shared between the service
/// front-end and that world's user-commands system.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    queue: Mutex<Vec<UserCommand>>,
}

impl CommandBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, command: UserCommand) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(command);
    }

    /// Take every pending command, leaving the buffer empty.
    pub fn drain(&self) -> Vec<UserCommand> {
        std::mem::take(&mut *self.queue.lock().unwrap_or_else(|e| e.into_inner()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn ok(request_id: &str, payload: serde_json::Value) -> ServiceResponse {
    ServiceResponse {
        request_id: request_id.to_string(),
        success: true,
        payload,
    }
}

fn fail(request_id: &str, reason: impl Into<String>) -> ServiceResponse {
    ServiceResponse {
        request_id: request_id.to_string(),
        success: false,
        payload: json!({ "error": reason.into() }),
    }
}

/// Answer one service request against `server`.
///
/// Unknown operations and malformed parameters fail the request without
/// touching the tick loop.
pub fn handle_request(server: &Server, req: &ServiceRequest) -> ServiceResponse {
    debug!(op = %req.op, request_id = %req.request_id, "service request");
    let world_index = req
        .params
        .get("world_index")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0) as usize;

    match req.op.as_str() {
        "world_control" => {
            let msg: WorldControlMsg = match serde_json::from_value(req.params.clone()) {
                Ok(msg) => msg,
                Err(err) => return fail(&req.request_id, format!("bad world_control: {err}")),
            };
            if server.post_control(msg, world_index) {
                ok(&req.request_id, json!({}))
            } else {
                fail(&req.request_id, format!("invalid world index {world_index}"))
            }
        }
        "user_command" => {
            let Some(params) = req.params.get("command") else {
                return fail(&req.request_id, "missing command");
            };
            let command: UserCommand = match serde_json::from_value(params.clone()) {
                Ok(command) => command,
                Err(err) => return fail(&req.request_id, format!("bad command: {err}")),
            };
            if server.post_command(command, world_index) {
                ok(&req.request_id, json!({}))
            } else {
                fail(&req.request_id, format!("invalid world index {world_index}"))
            }
        }
        "stats" => match server.stats(world_index) {
            Some(stats) => ok(
                &req.request_id,
                json!({
                    "iterations": stats.iterations,
                    "sim_time_ns": stats.sim_time_ns,
                    "paused": stats.paused,
                }),
            ),
            None => fail(&req.request_id, format!("invalid world index {world_index}")),
        },
        "resource_paths.get" => {
            let paths: Vec<String> = server
                .resource_paths()
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            ok(&req.request_id, json!({ "paths": paths }))
        }
        "resource_paths.add" => {
            let Some(paths) = req.params.get("paths").and_then(|v| v.as_array()) else {
                return fail(&req.request_id, "missing paths");
            };
            for path in paths.iter().filter_map(|v| v.as_str()) {
                server.add_resource_path(path);
            }
            ok(&req.request_id, json!({}))
        }
        other => fail(&req.request_id, format!("unknown operation {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_buffer_drains_in_order() {
        let buffer = CommandBuffer::new();
        buffer.push(UserCommand::VelocityReset {
            entity: "box".to_string(),
        });
        buffer.push(UserCommand::Remove {
            entity: "box".to_string(),
            recursive: true,
        });
        assert_eq!(buffer.len(), 2);

        let drained = buffer.drain();
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[0], UserCommand::VelocityReset { .. }));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_user_command_json_roundtrip() {
        let cmd = UserCommand::VelocityCmd {
            entity: "sphere".to_string(),
            linear: Vec3::new(0.0, 0.0, -9.8),
        };
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["kind"], "velocity_cmd");
        let restored: UserCommand = serde_json::from_value(value).unwrap();
        assert_eq!(cmd, restored);
    }
}
