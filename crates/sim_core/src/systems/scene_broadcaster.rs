//! Publishes per-tick statistics and scene structure.
//!
//! Runs in PostUpdate, after all state for the tick is final but before
//! change flags are cleared. Statistics go out every tick; the full scene
//! summary only when the entity set changed, since it is the expensive
//! message.

use sim_ecm::{EntityComponentManager, Name, ParentEntity};
use sim_net::WorldStats;
use sim_system::{System, UpdateInfo};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::components::Pose;

/// One entity in a scene summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneEntity {
    pub id: u64,
    pub name: Option<String>,
    pub parent: Option<u64>,
    pub pose: Option<Pose>,
}

/// Structural snapshot of a world, for viewers and tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSummary {
    pub world: String,
    pub entities: Vec<SceneEntity>,
}

/// Where scene output goes. The default publisher writes to the log; the
/// server binary bridges to NATS.
pub trait ScenePublisher: Send {
    fn publish_stats(&mut self, stats: &WorldStats);
    fn publish_scene(&mut self, scene: &SceneSummary);
}

/// Publishes to the tracing log only.
#[derive(Debug, Default)]
pub struct TracingScenePublisher;

impl ScenePublisher for TracingScenePublisher {
    fn publish_stats(&mut self, stats: &WorldStats) {
        trace!(
            iterations = stats.iterations,
            sim_time_ns = stats.sim_time_ns,
            paused = stats.paused,
            "world stats"
        );
    }

    fn publish_scene(&mut self, scene: &SceneSummary) {
        debug!(world = %scene.world, entities = scene.entities.len(), "scene updated");
    }
}

/// Forwards messages over a channel, for embedding in an async front-end.
pub struct ChannelScenePublisher {
    stats_tx: std::sync::mpsc::Sender<WorldStats>,
    scene_tx: std::sync::mpsc::Sender<SceneSummary>,
}

impl ChannelScenePublisher {
    #[must_use]
    pub fn new(
        stats_tx: std::sync::mpsc::Sender<WorldStats>,
        scene_tx: std::sync::mpsc::Sender<SceneSummary>,
    ) -> Self {
        Self { stats_tx, scene_tx }
    }
}

impl ScenePublisher for ChannelScenePublisher {
    fn publish_stats(&mut self, stats: &WorldStats) {
        // A gone receiver just means no viewer is attached.
        let _ = self.stats_tx.send(*stats);
    }

    fn publish_scene(&mut self, scene: &SceneSummary) {
        let _ = self.scene_tx.send(scene.clone());
    }
}

pub struct SceneBroadcasterSystem {
    world_name: String,
    publisher: Box<dyn ScenePublisher>,
    published_initial: bool,
}

impl SceneBroadcasterSystem {
    #[must_use]
    pub fn new(world_name: impl Into<String>, publisher: Box<dyn ScenePublisher>) -> Self {
        Self {
            world_name: world_name.into(),
            publisher,
            published_initial: false,
        }
    }

    fn structure_changed(ecm: &EntityComponentManager) -> bool {
        ecm.entities()
            .any(|e| ecm.is_new_entity(e) || ecm.is_marked_for_removal(e))
    }

    fn summarize(&self, ecm: &EntityComponentManager) -> SceneSummary {
        let entities = ecm
            .entities()
            .filter(|&e| !ecm.is_marked_for_removal(e))
            .map(|e| SceneEntity {
                id: e.id(),
                name: ecm.component::<Name>(e).map(|n| n.0.clone()),
                parent: ecm.component::<ParentEntity>(e).map(|p| p.0.id()),
                pose: ecm.component::<Pose>(e).copied(),
            })
            .collect();
        SceneSummary {
            world: self.world_name.clone(),
            entities,
        }
    }
}

impl System for SceneBroadcasterSystem {
    fn name(&self) -> &str {
        "scene_broadcaster"
    }

    fn post_update(&mut self, info: &UpdateInfo, ecm: &EntityComponentManager) {
        self.publisher.publish_stats(&WorldStats {
            iterations: info.iterations,
            sim_time_ns: info.sim_time.as_nanos() as u64,
            paused: info.paused,
        });

        if !self.published_initial || Self::structure_changed(ecm) {
            let scene = self.summarize(ecm);
            self.publisher.publish_scene(&scene);
            self.published_initial = true;
        }
    }
}
