//! Applies queued user commands at tick boundaries.
//!
//! Commands arrive on the shared [`CommandBuffer`] from the service side
//! channel at any time; this system drains the buffer in PreUpdate so every
//! mutation lands before any system observes the tick.

use std::collections::HashSet;
use std::sync::Arc;

use glam::Vec3;
use sim_ecm::{
    ChangeState, Component, Entity, EntityComponentManager, Name, WorldComponent,
};
use sim_events::EventManager;
use sim_system::{System, UpdateInfo};
use tracing::{debug, warn};

use crate::components::{AngularVelocity, LinearVelocity, Pose};
use crate::config::CommandTiebreak;
use crate::service::{CommandBuffer, UserCommand};

pub struct UserCommandsSystem {
    commands: Arc<CommandBuffer>,
    tiebreak: CommandTiebreak,
}

impl UserCommandsSystem {
    #[must_use]
    pub fn new(commands: Arc<CommandBuffer>, tiebreak: CommandTiebreak) -> Self {
        Self { commands, tiebreak }
    }

    fn resolve(ecm: &EntityComponentManager, name: &str) -> Option<Entity> {
        let entity = ecm.entity_by_name(name);
        if entity.is_none() {
            warn!(entity = name, "user command targets unknown entity; dropped");
        }
        entity
    }

    fn apply(&mut self, command: UserCommand, ecm: &mut EntityComponentManager) {
        match command {
            UserCommand::SetPose { entity, pose } => {
                let Some(e) = Self::resolve(ecm, &entity) else {
                    return;
                };
                if ecm.set_component_data(e, pose) == Some(true) {
                    // Teleports are discrete, not periodic motion.
                    ecm.set_changed(e, Pose::type_id(), ChangeState::OneTimeChange);
                }
            }
            UserCommand::VelocityCmd { entity, linear } => {
                let Some(e) = Self::resolve(ecm, &entity) else {
                    return;
                };
                ecm.set_component_data(e, LinearVelocity(linear));
            }
            UserCommand::VelocityReset { entity } => {
                let Some(e) = Self::resolve(ecm, &entity) else {
                    return;
                };
                if ecm.has_component::<LinearVelocity>(e) {
                    if ecm.set_component_data(e, LinearVelocity(Vec3::ZERO)) == Some(true) {
                        ecm.set_changed(e, LinearVelocity::type_id(), ChangeState::OneTimeChange);
                    }
                }
                if ecm.has_component::<AngularVelocity>(e) {
                    if ecm.set_component_data(e, AngularVelocity(Vec3::ZERO)) == Some(true) {
                        ecm.set_changed(e, AngularVelocity::type_id(), ChangeState::OneTimeChange);
                    }
                }
            }
            UserCommand::Spawn {
                name,
                pose,
                linear_velocity,
            } => {
                let mut world = None;
                ecm.each::<WorldComponent>(|entity, _| {
                    world = Some(entity);
                    false
                });
                let Some(world) = world else {
                    warn!(model = %name, "spawn requested before a world exists; dropped");
                    return;
                };
                let model = ecm.create_entity();
                ecm.create_component(model, Name(name.clone()));
                ecm.create_component(model, pose);
                if let Some(v) = linear_velocity {
                    ecm.create_component(model, LinearVelocity(v));
                }
                if let Err(err) = ecm.set_parent(model, Some(world)) {
                    warn!(model = %name, %err, "failed to parent spawned model");
                }
                debug!(model = %name, entity = %model, "model spawned");
            }
            UserCommand::Remove { entity, recursive } => {
                let Some(e) = Self::resolve(ecm, &entity) else {
                    return;
                };
                ecm.request_remove_entity(e, recursive);
            }
        }
    }
}

impl System for UserCommandsSystem {
    fn name(&self) -> &str {
        "user_commands"
    }

    fn configure(
        &mut self,
        _entity: Entity,
        params: &serde_json::Value,
        _ecm: &mut EntityComponentManager,
        _events: &Arc<EventManager>,
    ) {
        if let Some(tiebreak) = params.get("tiebreak").and_then(|v| v.as_str()) {
            match tiebreak {
                "reset_wins" => self.tiebreak = CommandTiebreak::ResetWins,
                "command_wins" => self.tiebreak = CommandTiebreak::CommandWins,
                other => warn!(tiebreak = other, "unknown tiebreak policy; keeping current"),
            }
        }
    }

    fn pre_update(&mut self, _info: &UpdateInfo, ecm: &mut EntityComponentManager) {
        let batch = self.commands.drain();
        if batch.is_empty() {
            return;
        }

        // A velocity command and a velocity reset on the same entity in the
        // same batch contradict each other; the configured policy picks the
        // survivor and the loser is dropped with one warning.
        let resets: HashSet<&str> = batch
            .iter()
            .filter_map(|c| match c {
                UserCommand::VelocityReset { entity } => Some(entity.as_str()),
                _ => None,
            })
            .collect();
        let cmds: HashSet<&str> = batch
            .iter()
            .filter_map(|c| match c {
                UserCommand::VelocityCmd { entity, .. } => Some(entity.as_str()),
                _ => None,
            })
            .collect();
        let contested: HashSet<String> = resets
            .intersection(&cmds)
            .map(|s| (*s).to_string())
            .collect();
        if !contested.is_empty() {
            match self.tiebreak {
                CommandTiebreak::ResetWins => {
                    warn!(entities = ?contested, "velocity command overridden by reset in the same tick");
                }
                CommandTiebreak::CommandWins => {
                    warn!(entities = ?contested, "velocity reset overridden by command in the same tick");
                }
            }
        }

        for command in batch {
            let dropped = match (&command, self.tiebreak) {
                (UserCommand::VelocityCmd { entity, .. }, CommandTiebreak::ResetWins) => {
                    contested.contains(entity)
                }
                (UserCommand::VelocityReset { entity }, CommandTiebreak::CommandWins) => {
                    contested.contains(entity)
                }
                _ => false,
            };
            if !dropped {
                self.apply(command, ecm);
            }
        }
    }
}
