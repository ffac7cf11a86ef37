//! The system contract and the per-world system pipeline.
//!
//! A [`System`] is a unit of simulation behavior attached to a world. The
//! runner drives every attached system through three phases per tick:
//! `pre_update`, `update` (skipped while paused), and `post_update`
//! (read-only). All phases of one world run sequentially on that world's
//! thread, so systems never observe a half-applied tick.

use std::sync::Arc;
use std::time::Duration;

use sim_ecm::{Entity, EntityComponentManager};
use sim_events::EventManager;
use tracing::debug;

/// Per-tick timing and state handed to every system phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateInfo {
    /// Accumulated simulated time.
    pub sim_time: Duration,
    /// Simulated time covered by this tick. Zero while paused.
    pub dt: Duration,
    /// Ticks completed since the world was loaded, this one included.
    pub iterations: u64,
    /// Whether the world is paused this tick.
    pub paused: bool,
    /// Wall-clock time since the run started.
    pub real_time: Duration,
}

/// A simulation behavior attached to one world.
///
/// All methods have default no-op implementations; a system overrides only
/// the phases it participates in. Systems move to the world's runner thread,
/// hence the `Send` bound.
pub trait System: Send {
    /// Stable name used in configuration and logs.
    fn name(&self) -> &str;

    /// Called exactly once when the system is attached, before its first
    /// tick. `entity` is the entity the system is attached to (usually the
    /// world) and `params` carries its configuration block.
    fn configure(
        &mut self,
        entity: Entity,
        params: &serde_json::Value,
        ecm: &mut EntityComponentManager,
        events: &Arc<EventManager>,
    ) {
        let _ = (entity, params, ecm, events);
    }

    /// Pre-step phase: runs every tick, paused or not. Entity and component
    /// creation/removal belongs here.
    fn pre_update(&mut self, info: &UpdateInfo, ecm: &mut EntityComponentManager) {
        let _ = (info, ecm);
    }

    /// Step phase: advances simulation state. Skipped while paused.
    fn update(&mut self, info: &UpdateInfo, ecm: &mut EntityComponentManager) {
        let _ = (info, ecm);
    }

    /// Post-step phase: read-only observation of the tick's final state
    /// (change flags are still set). Runs every tick, paused or not.
    fn post_update(&mut self, info: &UpdateInfo, ecm: &EntityComponentManager) {
        let _ = (info, ecm);
    }
}

struct PipelineEntry {
    name: String,
    system: Box<dyn System>,
}

/// Ordered collection of the systems attached to one world.
///
/// Phase runs visit systems in attachment order; the order is stable for
/// the lifetime of the world.
#[derive(Default)]
pub struct SystemPipeline {
    entries: Vec<PipelineEntry>,
}

impl SystemPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a system, configuring it immediately.
    pub fn attach(
        &mut self,
        mut system: Box<dyn System>,
        entity: Entity,
        params: &serde_json::Value,
        ecm: &mut EntityComponentManager,
        events: &Arc<EventManager>,
    ) {
        system.configure(entity, params, ecm, events);
        let name = system.name().to_owned();
        debug!(system = %name, "system attached");
        events.emit(&sim_events::SystemAttached { name: name.clone() });
        self.entries.push(PipelineEntry { name, system });
    }

    /// Number of attached systems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Attached system names, in attachment order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Run the pre-step phase of every system.
    pub fn pre_update_all(&mut self, info: &UpdateInfo, ecm: &mut EntityComponentManager) {
        for entry in &mut self.entries {
            entry.system.pre_update(info, ecm);
        }
    }

    /// Run the step phase of every system.
    pub fn update_all(&mut self, info: &UpdateInfo, ecm: &mut EntityComponentManager) {
        for entry in &mut self.entries {
            entry.system.update(info, ecm);
        }
    }

    /// Run the read-only post-step phase of every system.
    pub fn post_update_all(&mut self, info: &UpdateInfo, ecm: &EntityComponentManager) {
        for entry in &mut self.entries {
            entry.system.post_update(info, ecm);
        }
    }
}

impl std::fmt::Debug for SystemPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| &e.name))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct PhaseRecorder {
        log: Arc<Mutex<Vec<&'static str>>>,
        configured: usize,
    }

    impl System for PhaseRecorder {
        fn name(&self) -> &str {
            "phase_recorder"
        }

        fn configure(
            &mut self,
            _entity: Entity,
            _params: &serde_json::Value,
            _ecm: &mut EntityComponentManager,
            _events: &Arc<EventManager>,
        ) {
            self.configured += 1;
            self.log.lock().unwrap().push("configure");
        }

        fn pre_update(&mut self, _info: &UpdateInfo, _ecm: &mut EntityComponentManager) {
            self.log.lock().unwrap().push("pre");
        }

        fn update(&mut self, _info: &UpdateInfo, _ecm: &mut EntityComponentManager) {
            self.log.lock().unwrap().push("update");
        }

        fn post_update(&mut self, _info: &UpdateInfo, _ecm: &EntityComponentManager) {
            self.log.lock().unwrap().push("post");
        }
    }

    #[test]
    fn test_attach_configures_once_and_phases_run_in_order() {
        let mut pipeline = SystemPipeline::new();
        let mut ecm = EntityComponentManager::new();
        let events = Arc::new(EventManager::new());
        let world = ecm.create_entity();

        let log = Arc::new(Mutex::new(Vec::new()));
        pipeline.attach(
            Box::new(PhaseRecorder {
                log: Arc::clone(&log),
                configured: 0,
            }),
            world,
            &serde_json::Value::Null,
            &mut ecm,
            &events,
        );
        assert_eq!(pipeline.len(), 1);

        let info = UpdateInfo::default();
        pipeline.pre_update_all(&info, &mut ecm);
        pipeline.update_all(&info, &mut ecm);
        pipeline.post_update_all(&info, &ecm);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["configure", "pre", "update", "post"]
        );
    }

    struct Named(&'static str);

    impl System for Named {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_pipeline_preserves_attachment_order() {
        let mut pipeline = SystemPipeline::new();
        let mut ecm = EntityComponentManager::new();
        let events = Arc::new(EventManager::new());
        let world = ecm.create_entity();

        for name in ["physics", "user_commands", "scene_broadcaster"] {
            pipeline.attach(
                Box::new(Named(name)),
                world,
                &serde_json::Value::Null,
                &mut ecm,
                &events,
            );
        }
        let names: Vec<_> = pipeline.names().collect();
        assert_eq!(names, vec!["physics", "user_commands", "scene_broadcaster"]);
    }
}
