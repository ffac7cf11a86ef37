//! JSON world descriptions and ECM seeding.
//!
//! A world description is the load-time picture of a world: its name, its
//! models, their links. [`load_world`] turns a description into entities
//! and components; the empty configuration falls back to [`default_world`].

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use sim_ecm::{Entity, EntityComponentManager, Name, Static, WorldComponent};
use tracing::{debug, warn};

use crate::components::{AngularVelocity, LinearVelocity, Pose};
use crate::config::PluginInfo;
use crate::error::ServerError;

fn identity_rotation() -> Quat {
    Quat::IDENTITY
}

/// Pose block inside a description. Both fields optional in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseDesc {
    #[serde(default)]
    pub translation: Vec3,
    #[serde(default = "identity_rotation")]
    pub rotation: Quat,
}

impl Default for PoseDesc {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl From<PoseDesc> for Pose {
    fn from(desc: PoseDesc) -> Self {
        Self {
            translation: desc.translation,
            rotation: desc.rotation,
        }
    }
}

/// One rigid link of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkDescription {
    pub name: String,
    #[serde(default)]
    pub pose: PoseDesc,
}

/// One model in a world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    pub name: String,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub pose: PoseDesc,
    #[serde(default)]
    pub linear_velocity: Option<Vec3>,
    #[serde(default)]
    pub angular_velocity: Option<Vec3>,
    #[serde(default)]
    pub links: Vec<LinkDescription>,
}

/// A complete world description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldDescription {
    pub name: String,
    #[serde(default)]
    pub models: Vec<ModelDescription>,
    /// Extra systems to attach to this world, merged with the server-level
    /// plugin list.
    #[serde(default)]
    pub systems: Vec<PluginInfo>,
}

/// The world used when no source is configured: one world entity, one
/// model, one link.
#[must_use]
pub fn default_world() -> WorldDescription {
    WorldDescription {
        name: "default".to_string(),
        models: vec![ModelDescription {
            name: "box".to_string(),
            is_static: false,
            pose: PoseDesc::default(),
            linear_velocity: None,
            angular_velocity: None,
            links: vec![LinkDescription {
                name: "box_link".to_string(),
                pose: PoseDesc::default(),
            }],
        }],
        systems: Vec::new(),
    }
}

/// Parse a description from a JSON string.
///
/// # Errors
///
/// Returns [`ServerError::WorldParse`] on malformed JSON.
pub fn parse_world(json: &str) -> Result<WorldDescription, ServerError> {
    Ok(serde_json::from_str(json)?)
}

/// Read and parse a description file.
///
/// # Errors
///
/// Returns [`ServerError::WorldFile`] if the file cannot be read and
/// [`ServerError::WorldParse`] on malformed JSON.
pub fn read_world_file(path: &std::path::Path) -> Result<WorldDescription, ServerError> {
    let json = std::fs::read_to_string(path).map_err(|source| ServerError::WorldFile {
        path: path.to_path_buf(),
        source,
    })?;
    parse_world(&json)
}

/// Seed `ecm` with the entities of `desc`. Returns the world entity.
pub fn load_world(ecm: &mut EntityComponentManager, desc: &WorldDescription) -> Entity {
    let world = ecm.create_entity();
    ecm.create_component(world, Name(desc.name.clone()));
    ecm.create_component(world, WorldComponent);

    for model in &desc.models {
        let model_entity = ecm.create_entity();
        ecm.create_component(model_entity, Name(model.name.clone()));
        ecm.create_component(model_entity, Pose::from(model.pose));
        if model.is_static {
            ecm.create_component(model_entity, Static);
        }
        if let Some(v) = model.linear_velocity {
            ecm.create_component(model_entity, LinearVelocity(v));
        }
        if let Some(w) = model.angular_velocity {
            ecm.create_component(model_entity, AngularVelocity(w));
        }
        if let Err(err) = ecm.set_parent(model_entity, Some(world)) {
            warn!(model = %model.name, %err, "failed to parent model");
        }

        for link in &model.links {
            let link_entity = ecm.create_entity();
            ecm.create_component(link_entity, Name(link.name.clone()));
            ecm.create_component(link_entity, Pose::from(link.pose));
            if let Err(err) = ecm.set_parent(link_entity, Some(model_entity)) {
                warn!(link = %link.name, %err, "failed to parent link");
            }
        }
    }
    debug!(world = %desc.name, entities = ecm.entity_count(), "world loaded");
    world
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_world_seeds_three_entities() {
        let mut ecm = EntityComponentManager::new();
        let world = load_world(&mut ecm, &default_world());
        assert_eq!(ecm.entity_count(), 3);
        assert_eq!(ecm.entity_by_name("default"), Some(world));

        let model = ecm.entity_by_name("box").unwrap();
        assert_eq!(ecm.parent(model), Some(world));
        let link = ecm.entity_by_name("box_link").unwrap();
        assert_eq!(ecm.parent(link), Some(model));
    }

    #[test]
    fn test_parse_inline_world() {
        let json = r#"{
            "name": "shapes",
            "models": [
                {
                    "name": "sphere",
                    "pose": { "translation": [0.0, 1.5, 0.5] },
                    "linear_velocity": [1.0, 0.0, 0.0],
                    "links": [{ "name": "sphere_link" }]
                },
                { "name": "ground", "is_static": true }
            ]
        }"#;
        let desc = parse_world(json).unwrap();
        assert_eq!(desc.name, "shapes");
        assert_eq!(desc.models.len(), 2);
        assert!(desc.models[1].is_static);

        let mut ecm = EntityComponentManager::new();
        load_world(&mut ecm, &desc);
        assert_eq!(ecm.entity_count(), 4);
        let sphere = ecm.entity_by_name("sphere").unwrap();
        assert_eq!(
            ecm.component::<LinearVelocity>(sphere),
            Some(&LinearVelocity(Vec3::new(1.0, 0.0, 0.0)))
        );
        let ground = ecm.entity_by_name("ground").unwrap();
        assert!(ecm.has_component::<Static>(ground));
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        assert!(parse_world("{ not json").is_err());
    }
}
