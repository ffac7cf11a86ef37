//! The simulation server: N worlds, one runner each.
//!
//! The server seeds each world from configuration (entities from the world
//! description, systems from the default set plus the plugin list) and owns
//! the threading model: a non-blocking run puts each world's runner on its
//! own thread, which locks the runner for the duration of the run. External
//! callers therefore never touch a running runner directly; they poll the
//! shared [`RunnerStatus`] atomics, push [`UserCommand`]s, or queue
//! [`RunnerRequest`]s that the runner drains at tick boundaries.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use sim_ecm::{EcmState, EntityComponentManager};
use sim_events::EventManager;
use sim_net::{LinkRole, NatsLink, WorldControlMsg, WorldStats};
use sim_system::System;
use tracing::{error, info, warn};

use crate::config::{NetworkRole, ServerConfig};
use crate::network::NetworkStepper;
use crate::runner::{RunnerRequest, RunnerStatus, SimulationRunner};
use crate::service::{CommandBuffer, UserCommand};
use crate::systems::{DEFAULT_SYSTEMS, SystemDeps, create_system};
use crate::util::SeedContext;
use crate::world_desc::{
    WorldDescription, default_world, load_world, parse_world, read_world_file,
};

/// Environment variable holding extra resource paths, colon-separated.
pub const RESOURCE_PATH_ENV: &str = "SIM_RESOURCE_PATH";

struct WorldHandle {
    name: String,
    runner: Arc<Mutex<SimulationRunner>>,
    status: Arc<RunnerStatus>,
    stop: Arc<AtomicBool>,
    requests: mpsc::Sender<RunnerRequest>,
    commands: Arc<CommandBuffer>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WorldHandle {
    fn lock_runner(&self) -> MutexGuard<'_, SimulationRunner> {
        self.runner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct Server {
    worlds: Vec<WorldHandle>,
    seed: SeedContext,
    resource_paths: Mutex<Vec<PathBuf>>,
}

impl Server {
    /// Build a server from configuration.
    ///
    /// Configuration problems (unreadable world file, unknown plugin name)
    /// are logged and skipped; the server always constructs. An empty
    /// configuration yields the default world with the default system set.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let descriptions = resolve_world_descriptions(&config);
        let mut resource_paths: Vec<PathBuf> =
            config.resource_paths().iter().cloned().collect();
        if let Ok(env_paths) = std::env::var(RESOURCE_PATH_ENV) {
            resource_paths.extend(env_paths.split(':').filter(|s| !s.is_empty()).map(Into::into));
        }

        let worlds = descriptions
            .into_iter()
            .map(|desc| build_world(&config, desc))
            .collect();

        Self {
            worlds,
            seed: SeedContext::new(config.seed()),
            resource_paths: Mutex::new(resource_paths),
        }
    }

    // ── Run control ─────────────────────────────────────────────────────

    /// Start stepping every world.
    ///
    /// Returns `false` if any world is already running. With `blocking`
    /// the call returns after the iteration budget (0 = until stopped) is
    /// spent on every world; a single-world blocking run steps on the
    /// caller's thread. Non-blocking runs return immediately and step on
    /// one thread per world. Paused worlds hold their budget: the run
    /// stays alive at its current iteration until unpaused or stopped.
    pub fn run(&mut self, blocking: bool, iterations: u64, paused: bool) -> bool {
        if self.running() {
            warn!("run rejected; server is already running");
            return false;
        }
        for world in &self.worlds {
            world.status.set_paused(paused);
            // Claim before any thread spawns so a racing second `run` call
            // is rejected immediately.
            world.status.begin_run();
        }

        if blocking && self.worlds.len() == 1 {
            self.worlds[0].lock_runner().run_claimed(iterations);
            return true;
        }

        for world in &self.worlds {
            let runner = Arc::clone(&world.runner);
            let name = world.name.clone();
            let handle = std::thread::Builder::new()
                .name(format!("world-{name}"))
                .spawn(move || {
                    runner
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .run_claimed(iterations);
                });
            match handle {
                Ok(handle) => {
                    *world.thread.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
                }
                Err(err) => {
                    error!(world = %name, %err, "failed to spawn runner thread");
                    world.status.end_run();
                }
            }
        }
        if blocking {
            self.join_all();
        }
        true
    }

    /// Execute exactly one full tick on every world, synchronously.
    /// Worlds currently running are skipped with a warning.
    pub fn run_once(&mut self, paused: bool) {
        for world in &self.worlds {
            if world.status.running() {
                warn!(world = %world.name, "run_once skipped; world is running");
                continue;
            }
            world.lock_runner().run_once(paused);
        }
    }

    /// Whether any world is currently running.
    #[must_use]
    pub fn running(&self) -> bool {
        self.worlds.iter().any(|w| w.status.running())
    }

    /// Whether a specific world is running; `None` for an invalid index.
    #[must_use]
    pub fn running_world(&self, world_index: usize) -> Option<bool> {
        self.worlds.get(world_index).map(|w| w.status.running())
    }

    /// Completed iterations of a world; `None` for an invalid index.
    #[must_use]
    pub fn iterations(&self, world_index: usize) -> Option<u64> {
        self.worlds.get(world_index).map(|w| w.status.iterations())
    }

    /// Pause or unpause a world. Returns `false` for an invalid index.
    pub fn set_paused(&self, paused: bool, world_index: usize) -> bool {
        match self.worlds.get(world_index) {
            Some(world) => {
                world.status.set_paused(paused);
                true
            }
            None => false,
        }
    }

    /// Whether a world is paused; `None` for an invalid index.
    #[must_use]
    pub fn paused(&self, world_index: usize) -> Option<bool> {
        self.worlds.get(world_index).map(|w| w.status.paused())
    }

    /// Stop every world and wait for their run threads to exit. In-flight
    /// ticks complete; no partial tick is exposed to systems.
    pub fn stop(&self) {
        info!("stopping all worlds");
        for world in &self.worlds {
            world.stop.store(true, Ordering::Release);
        }
        self.join_all();
    }

    fn join_all(&self) {
        for world in &self.worlds {
            let handle = world.thread.lock().unwrap_or_else(|e| e.into_inner()).take();
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    error!(world = %world.name, "runner thread panicked");
                }
            }
        }
    }

    // ── Pipeline management ─────────────────────────────────────────────

    /// Attach a system to a world.
    ///
    /// Tri-state result: `Some(true)` added, `Some(false)` rejected because
    /// the world is actively running, `None` for an invalid index.
    pub fn add_system(
        &self,
        system: Box<dyn System>,
        params: serde_json::Value,
        world_index: usize,
    ) -> Option<bool> {
        let world = self.worlds.get(world_index)?;
        if world.status.running() {
            warn!(world = %world.name, "cannot add a system while running");
            return Some(false);
        }
        let mut runner = world.lock_runner();
        // A run may have started while we waited for the lock.
        if world.status.running() {
            return Some(false);
        }
        runner.add_system(system, &params);
        Some(true)
    }

    /// Number of systems attached to a world. Blocks if the world is
    /// mid-run; meant for setup and teardown phases.
    #[must_use]
    pub fn system_count(&self, world_index: usize) -> Option<usize> {
        Some(self.worlds.get(world_index)?.lock_runner().system_count())
    }

    /// Number of entities in a world. Same locking caveat as
    /// [`Self::system_count`].
    #[must_use]
    pub fn entity_count(&self, world_index: usize) -> Option<usize> {
        Some(
            self.worlds
                .get(world_index)?
                .lock_runner()
                .ecm()
                .entity_count(),
        )
    }

    /// Whether a world contains an entity with the given name.
    #[must_use]
    pub fn has_entity(&self, name: &str, world_index: usize) -> Option<bool> {
        Some(
            self.worlds
                .get(world_index)?
                .lock_runner()
                .ecm()
                .entity_by_name(name)
                .is_some(),
        )
    }

    // ── External effects ────────────────────────────────────────────────

    /// Queue a world-control message for the next tick boundary.
    pub fn post_control(&self, msg: WorldControlMsg, world_index: usize) -> bool {
        match self.worlds.get(world_index) {
            Some(world) => world.requests.send(RunnerRequest::Control(msg)).is_ok(),
            None => false,
        }
    }

    /// Queue a user command for the next tick boundary.
    pub fn post_command(&self, command: UserCommand, world_index: usize) -> bool {
        match self.worlds.get(world_index) {
            Some(world) => {
                world.commands.push(command);
                true
            }
            None => false,
        }
    }

    /// Queue a state snapshot to apply at the next tick boundary.
    pub fn post_state(&self, state: EcmState, world_index: usize) -> bool {
        match self.worlds.get(world_index) {
            Some(world) => world.requests.send(RunnerRequest::SetState(state)).is_ok(),
            None => false,
        }
    }

    /// Change the wall-clock pacing of every world (takes effect at each
    /// world's next tick boundary).
    pub fn set_update_period(&self, period: Duration) {
        for world in &self.worlds {
            let _ = world.requests.send(RunnerRequest::SetUpdatePeriod(period));
        }
    }

    /// Current statistics for a world; `None` for an invalid index.
    #[must_use]
    pub fn stats(&self, world_index: usize) -> Option<WorldStats> {
        let world = self.worlds.get(world_index)?;
        Some(WorldStats {
            iterations: world.status.iterations(),
            sim_time_ns: world.status.sim_time_ns(),
            paused: world.status.paused(),
        })
    }

    /// Attach a network stepper to a world (testing and embedding; the
    /// NATS case is wired from configuration). Rejected while running.
    pub fn attach_network(&self, stepper: NetworkStepper, world_index: usize) -> bool {
        match self.worlds.get(world_index) {
            Some(world) if !world.status.running() => {
                world.lock_runner().set_network(stepper);
                true
            }
            _ => false,
        }
    }

    // ── Introspection ───────────────────────────────────────────────────

    #[must_use]
    pub fn world_count(&self) -> usize {
        self.worlds.len()
    }

    /// World names, in configuration order.
    #[must_use]
    pub fn world_names(&self) -> Vec<String> {
        self.worlds.iter().map(|w| w.name.clone()).collect()
    }

    /// The explicit randomness context derived from the configured seed.
    #[must_use]
    pub fn seed(&self) -> SeedContext {
        self.seed
    }

    #[must_use]
    pub fn resource_paths(&self) -> Vec<PathBuf> {
        self.resource_paths
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn add_resource_path(&self, path: impl Into<PathBuf>) {
        self.resource_paths
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(path.into());
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

fn resolve_world_descriptions(config: &ServerConfig) -> Vec<WorldDescription> {
    let parsed = if let Some(path) = config.world_file() {
        read_world_file(path).map_err(|err| {
            warn!(path = %path.display(), %err, "world file unusable; using the default world");
        })
    } else if let Some(json) = config.world_json() {
        // A source may describe one world or a list of them.
        if let Ok(list) = serde_json::from_str::<Vec<WorldDescription>>(json) {
            return list;
        }
        parse_world(json).map_err(|err| {
            warn!(%err, "inline world unusable; using the default world");
        })
    } else {
        return vec![default_world()];
    };
    match parsed {
        Ok(desc) => vec![desc],
        Err(()) => vec![default_world()],
    }
}

fn build_world(config: &ServerConfig, desc: WorldDescription) -> WorldHandle {
    let name = desc.name.clone();
    let mut ecm = EntityComponentManager::new();
    // Register the kinematic set up front so snapshots from a primary can
    // be applied even before any local system writes these types.
    ecm.register_component::<crate::components::Pose>();
    ecm.register_component::<crate::components::LinearVelocity>();
    ecm.register_component::<crate::components::AngularVelocity>();
    let world_entity = load_world(&mut ecm, &desc);

    let events = Arc::new(EventManager::new());
    let status = Arc::new(RunnerStatus::new(config.start_paused()));
    let stop = Arc::new(AtomicBool::new(false));
    let commands = Arc::new(CommandBuffer::new());
    let (requests_tx, requests_rx) = mpsc::channel();

    let mut runner = SimulationRunner::new(
        name.clone(),
        ecm,
        world_entity,
        Arc::clone(&events),
        Arc::clone(&status),
        Arc::clone(&stop),
        requests_rx,
    );
    runner.set_update_period(config.update_period());

    let mut deps = SystemDeps {
        commands: Arc::clone(&commands),
        tiebreak: config.command_tiebreak(),
        world_name: name.clone(),
        log_record_path: config.log_record_path().map(Into::into),
        scene_publisher: None,
    };

    let mut system_names: Vec<(String, serde_json::Value)> = DEFAULT_SYSTEMS
        .iter()
        .map(|n| ((*n).to_string(), serde_json::Value::Null))
        .collect();
    if config.log_record() {
        system_names.push(("log_record".to_string(), serde_json::Value::Null));
    }
    for plugin in desc.systems.iter().chain(config.plugins()) {
        if !plugin.entity_name.is_empty()
            && plugin.entity_kind == "world"
            && plugin.entity_name != name
        {
            continue;
        }
        system_names.push((plugin.system_name.clone(), plugin.params.clone()));
    }

    for (system_name, params) in system_names {
        match create_system(&system_name, &mut deps) {
            Some(system) => runner.add_system(system, &params),
            None => warn!(world = %name, system = %system_name, "unknown system; skipped"),
        }
    }

    match config.network_role() {
        NetworkRole::None => {}
        role => {
            let link_role = match role {
                NetworkRole::Primary => LinkRole::Primary,
                NetworkRole::Secondary => LinkRole::Secondary,
                NetworkRole::None => unreachable!(),
            };
            let url = config
                .nats_url()
                .unwrap_or(sim_net::connection::DEFAULT_NATS_URL);
            match NatsLink::connect(link_role, &name, url) {
                Ok(link) => {
                    let stepper = match link_role {
                        LinkRole::Primary => NetworkStepper::primary(
                            Box::new(link),
                            config.expected_secondaries(),
                        ),
                        LinkRole::Secondary => NetworkStepper::secondary(Box::new(link)),
                    };
                    runner.set_network(stepper);
                    info!(world = %name, ?role, "distributed mode enabled");
                }
                Err(err) => {
                    warn!(world = %name, %err, "cannot join the distributed run; running standalone");
                }
            }
        }
    }

    info!(
        world = %name,
        entities = runner.ecm().entity_count(),
        systems = runner.system_count(),
        "world ready"
    );

    WorldHandle {
        name,
        runner: Arc::new(Mutex::new(runner)),
        status,
        stop,
        requests: requests_tx,
        commands,
        thread: Mutex::new(None),
    }
}
