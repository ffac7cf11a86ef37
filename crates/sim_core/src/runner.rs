//! The per-world simulation runner.
//!
//! A runner owns one world outright: its ECM, its system pipeline, its
//! event manager, and its clock. All mutation happens on the thread driving
//! [`SimulationRunner::run`]; the outside world interacts through three
//! narrow surfaces, none of which touch the ECM directly:
//!
//! - [`RunnerStatus`] — lock-free polling of iterations/running/paused;
//! - the request channel — [`RunnerRequest`]s drained at the top of every
//!   tick, so external effects always land at a tick boundary;
//! - the stop flag — observed at the next tick boundary at the latest.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use sim_ecm::{EcmState, Entity, EntityComponentManager};
use sim_events::{EventManager, Pause, Stop};
use sim_net::{LinkRole, NetError, WorldControlMsg};
use sim_system::{System, SystemPipeline, UpdateInfo};
use tracing::{debug, error, info, warn};

use crate::network::NetworkStepper;

/// Default simulated time per tick.
pub const DEFAULT_STEP_SIZE: Duration = Duration::from_millis(1);

/// Default wall-clock pacing per tick.
pub const DEFAULT_UPDATE_PERIOD: Duration = Duration::from_millis(1);

/// Lock-free view of a runner, shared with pollers on other threads.
#[derive(Debug)]
pub struct RunnerStatus {
    iterations: AtomicU64,
    sim_time_ns: AtomicU64,
    running: AtomicBool,
    paused: AtomicBool,
}

impl RunnerStatus {
    #[must_use]
    pub fn new(paused: bool) -> Self {
        Self {
            iterations: AtomicU64::new(0),
            sim_time_ns: AtomicU64::new(0),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(paused),
        }
    }

    /// Accumulated simulated time, in nanoseconds.
    #[must_use]
    pub fn sim_time_ns(&self) -> u64 {
        self.sim_time_ns.load(Ordering::Acquire)
    }

    /// Completed ticks since the world was loaded.
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Set the paused flag; returns whether the state actually changed.
    pub fn set_paused(&self, paused: bool) -> bool {
        self.paused.swap(paused, Ordering::AcqRel) != paused
    }

    /// Claim the running flag. Returns `false` if a run already owns it.
    pub(crate) fn begin_run(&self) -> bool {
        !self.running.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn end_run(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub(crate) fn store_iterations(&self, iterations: u64) {
        self.iterations.store(iterations, Ordering::Release);
    }
}

/// An external effect queued for the next tick boundary.
pub enum RunnerRequest {
    /// Apply a state snapshot.
    SetState(EcmState),
    /// Pause/step/run-to control.
    Control(WorldControlMsg),
    /// Change the wall-clock pacing.
    SetUpdatePeriod(Duration),
    /// Change the simulated time per tick.
    SetStepSize(Duration),
}

pub struct SimulationRunner {
    world_name: String,
    ecm: EntityComponentManager,
    pipeline: SystemPipeline,
    events: Arc<EventManager>,
    status: Arc<RunnerStatus>,
    stop: Arc<AtomicBool>,
    requests: mpsc::Receiver<RunnerRequest>,
    world_entity: Entity,
    sim_time: Duration,
    step_size: Duration,
    update_period: Duration,
    run_start: Option<Instant>,
    network: Option<NetworkStepper>,
    pending_step: bool,
    run_to: Option<u64>,
}

impl SimulationRunner {
    pub fn new(
        world_name: impl Into<String>,
        ecm: EntityComponentManager,
        world_entity: Entity,
        events: Arc<EventManager>,
        status: Arc<RunnerStatus>,
        stop: Arc<AtomicBool>,
        requests: mpsc::Receiver<RunnerRequest>,
    ) -> Self {
        // Systems stop the run by raising the event; the flag is observed
        // at the next tick boundary.
        let stop_flag = Arc::clone(&stop);
        events
            .subscribe::<Stop>(move |_| {
                stop_flag.store(true, Ordering::Release);
            })
            .forget();

        Self {
            world_name: world_name.into(),
            ecm,
            pipeline: SystemPipeline::new(),
            events,
            status,
            stop,
            requests,
            world_entity,
            sim_time: Duration::ZERO,
            step_size: DEFAULT_STEP_SIZE,
            update_period: DEFAULT_UPDATE_PERIOD,
            run_start: None,
            network: None,
            pending_step: false,
            run_to: None,
        }
    }

    #[must_use]
    pub fn world_name(&self) -> &str {
        &self.world_name
    }

    #[must_use]
    pub fn ecm(&self) -> &EntityComponentManager {
        &self.ecm
    }

    #[must_use]
    pub fn system_count(&self) -> usize {
        self.pipeline.len()
    }

    #[must_use]
    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    /// Attach and configure a system. The caller (the server) guarantees
    /// the runner is not stepping; mid-run attachment is rejected there.
    pub fn add_system(&mut self, system: Box<dyn System>, params: &serde_json::Value) {
        self.pipeline
            .attach(system, self.world_entity, params, &mut self.ecm, &self.events);
    }

    pub fn set_step_size(&mut self, step_size: Duration) {
        self.step_size = step_size;
    }

    #[must_use]
    pub fn step_size(&self) -> Duration {
        self.step_size
    }

    pub fn set_update_period(&mut self, period: Duration) {
        self.update_period = period;
    }

    #[must_use]
    pub fn update_period(&self) -> Duration {
        self.update_period
    }

    pub fn set_network(&mut self, network: NetworkStepper) {
        self.network = Some(network);
    }

    /// The tick info a system would see right now.
    #[must_use]
    pub fn current_info(&self) -> UpdateInfo {
        UpdateInfo {
            sim_time: self.sim_time,
            dt: self.step_size,
            iterations: self.status.iterations(),
            paused: self.status.paused(),
            real_time: self.run_start.map(|s| s.elapsed()).unwrap_or_default(),
        }
    }

    /// Blocking run of `iterations` advanced ticks (0 = until stopped).
    ///
    /// Only ticks that advance the iteration counter consume the budget: a
    /// paused run keeps looping at its current iteration until unpaused,
    /// stepped, or stopped.
    ///
    /// Returns `false` without stepping if a run is already in progress.
    pub fn run(&mut self, iterations: u64) -> bool {
        if !self.status.begin_run() {
            warn!(world = %self.world_name, "run rejected; already running");
            return false;
        }
        self.run_loop(iterations);
        self.status.end_run();
        true
    }

    /// Run loop entry for a caller that already claimed the running flag.
    pub(crate) fn run_claimed(&mut self, iterations: u64) {
        self.run_loop(iterations);
        self.status.end_run();
    }

    /// Execute exactly one full tick synchronously, regardless of the
    /// paused state: Update runs and the iteration counter advances.
    /// `paused` is only reflected in the info systems receive.
    pub fn run_once(&mut self, paused: bool) {
        self.drain_requests();
        self.step(true, paused);
    }

    fn run_loop(&mut self, iterations: u64) {
        self.run_start = Some(Instant::now());
        info!(
            world = %self.world_name,
            iterations,
            paused = self.status.paused(),
            "run starting"
        );
        if let Some(net) = self.network.as_mut() {
            net.handshake(&self.world_name);
            if net.role() == LinkRole::Secondary {
                self.follow_loop(iterations);
                info!(world = %self.world_name, "secondary run finished");
                return;
            }
        }

        // The budget counts advanced iterations, not loop passes: paused
        // passes leave the counter alone and the loop keeps waiting.
        let target = self.status.iterations() + iterations;
        while !self.stop.load(Ordering::Acquire)
            && (iterations == 0 || self.status.iterations() < target)
        {
            let tick_start = Instant::now();
            self.loop_tick();
            if let Some(rest) = self.update_period.checked_sub(tick_start.elapsed()) {
                if !rest.is_zero() {
                    std::thread::sleep(rest);
                }
            }
        }
        info!(
            world = %self.world_name,
            completed = self.status.iterations(),
            "run finished"
        );
    }

    /// One pass of the normal run loop. A paused tick runs PreUpdate and
    /// PostUpdate only and advances nothing.
    fn loop_tick(&mut self) {
        self.drain_requests();
        let forced = std::mem::take(&mut self.pending_step);
        let paused = self.status.paused() && !forced;
        self.step(!paused, paused);

        if let Some(target) = self.run_to {
            if self.status.iterations() >= target {
                self.status.set_paused(true);
                self.run_to = None;
                debug!(world = %self.world_name, target, "run-to target reached; pausing");
            }
        }
    }

    /// One tick. `advance` runs Update and moves the clocks; the phases
    /// around it run either way.
    fn step(&mut self, advance: bool, paused_flag: bool) {
        let completed = self.status.iterations();
        let iterations = if advance { completed + 1 } else { completed };
        let next_sim_time = if advance {
            self.sim_time + self.step_size
        } else {
            self.sim_time
        };
        let info = UpdateInfo {
            sim_time: next_sim_time,
            dt: if advance { self.step_size } else { Duration::ZERO },
            iterations,
            paused: paused_flag,
            real_time: self.run_start.map(|s| s.elapsed()).unwrap_or_default(),
        };

        self.pipeline.pre_update_all(&info, &mut self.ecm);
        if advance {
            self.pipeline.update_all(&info, &mut self.ecm);
            self.sim_time = next_sim_time;
            self.status.store_iterations(iterations);
            self.status
                .sim_time_ns
                .store(next_sim_time.as_nanos() as u64, Ordering::Release);
        }
        self.pipeline.post_update_all(&info, &self.ecm);

        // Change flags are still set here; the snapshot must go out before
        // end-of-tick cleanup clears them.
        if advance {
            if let Some(net) = self.network.as_mut() {
                if net.is_primary() {
                    net.publish_tick(&self.world_name, iterations, self.sim_time, &self.ecm);
                }
            }
        }
        self.ecm.end_of_tick();
    }

    /// Secondary run loop: apply snapshots from the primary, never author.
    fn follow_loop(&mut self, iterations: u64) {
        let Some(mut net) = self.network.take() else {
            return;
        };
        let mut ticks = 0u64;
        while !self.stop.load(Ordering::Acquire) && (iterations == 0 || ticks < iterations) {
            match net.recv_step(Duration::from_millis(100)) {
                Ok(msg) => {
                    self.drain_requests();
                    if let Err(err) = self.ecm.set_state(&msg.state) {
                        error!(world = %self.world_name, %err, "rejected snapshot");
                        continue;
                    }
                    let info = UpdateInfo {
                        sim_time: Duration::from_nanos(msg.sim_time_ns),
                        dt: self.step_size,
                        iterations: msg.iterations,
                        paused: false,
                        real_time: self.run_start.map(|s| s.elapsed()).unwrap_or_default(),
                    };
                    self.pipeline.pre_update_all(&info, &mut self.ecm);
                    // No Update phase: the primary owns authorship.
                    self.pipeline.post_update_all(&info, &self.ecm);
                    self.sim_time = Duration::from_nanos(msg.sim_time_ns);
                    self.status.store_iterations(msg.iterations);
                    self.status
                        .sim_time_ns
                        .store(msg.sim_time_ns, Ordering::Release);
                    self.ecm.end_of_tick();
                    net.ack_step(msg.iterations);
                    ticks += 1;
                }
                Err(NetError::Timeout(_)) => continue,
                Err(err) => {
                    warn!(world = %self.world_name, %err, "snapshot link lost; stopping");
                    break;
                }
            }
        }
        self.network = Some(net);
    }

    fn drain_requests(&mut self) {
        while let Ok(request) = self.requests.try_recv() {
            match request {
                RunnerRequest::SetState(state) => {
                    if let Err(err) = self.ecm.set_state(&state) {
                        error!(world = %self.world_name, %err, "rejected external state");
                    }
                }
                RunnerRequest::Control(msg) => {
                    self.events.emit(&sim_events::WorldControl {
                        pause: msg.pause,
                        step: msg.step,
                    });
                    if let Some(paused) = msg.pause {
                        if self.status.set_paused(paused) {
                            self.events.emit(&Pause(paused));
                        }
                    }
                    if msg.step {
                        self.pending_step = true;
                    }
                    if let Some(n) = msg.run_to_iterations {
                        self.run_to = Some(self.status.iterations() + n);
                        self.status.set_paused(false);
                    }
                }
                RunnerRequest::SetUpdatePeriod(period) => self.update_period = period,
                RunnerRequest::SetStepSize(step) => self.step_size = step,
            }
        }
    }
}
