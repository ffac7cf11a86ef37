//! State logging to disk.
//!
//! Appends one length-prefixed MessagePack [`LogRecord`] per tick to the
//! configured file: a full snapshot first, changed-only deltas after.
//! Replaying the records through `set_state` in order reconstructs the
//! world at any logged tick.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sim_ecm::{EcmState, EntityComponentManager, SnapshotScope};
use sim_system::{System, UpdateInfo};
use tracing::{error, info, warn};

use crate::util::WarnOnce;

/// One logged tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub iterations: u64,
    pub sim_time_ns: u64,
    pub state: EcmState,
}

pub struct LogRecordSystem {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    write_warn: WarnOnce,
    wrote_initial: bool,
}

impl LogRecordSystem {
    /// Create a recorder writing to `path`. The file is created (or
    /// truncated) on the first configure.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            write_warn: WarnOnce::new(),
            wrote_initial: false,
        }
    }

    fn write_record(&mut self, record: &LogRecord) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let result = rmp_serde::to_vec(record)
            .map_err(std::io::Error::other)
            .and_then(|bytes| {
                writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
                writer.write_all(&bytes)?;
                writer.flush()
            });
        if let Err(err) = result {
            if self.write_warn.once() {
                error!(path = %self.path.display(), %err, "state log write failed; recording disabled");
            }
            self.writer = None;
        }
    }
}

impl System for LogRecordSystem {
    fn name(&self) -> &str {
        "log_record"
    }

    fn configure(
        &mut self,
        _entity: sim_ecm::Entity,
        _params: &serde_json::Value,
        _ecm: &mut EntityComponentManager,
        _events: &std::sync::Arc<sim_events::EventManager>,
    ) {
        match File::create(&self.path) {
            Ok(file) => {
                info!(path = %self.path.display(), "state log opened");
                self.writer = Some(BufWriter::new(file));
            }
            Err(err) => {
                warn!(path = %self.path.display(), %err, "cannot open state log; recording disabled");
            }
        }
    }

    fn post_update(&mut self, info: &UpdateInfo, ecm: &EntityComponentManager) {
        if self.writer.is_none() {
            return;
        }
        let scope = if self.wrote_initial {
            SnapshotScope::Changed
        } else {
            SnapshotScope::Full
        };
        let state = ecm.state(scope);
        if scope == SnapshotScope::Changed && state.is_empty() {
            return;
        }
        self.write_record(&LogRecord {
            iterations: info.iterations,
            sim_time_ns: info.sim_time.as_nanos() as u64,
            state,
        });
        self.wrote_initial = true;
    }
}

/// Read every record back from a state log.
///
/// # Errors
///
/// Returns an I/O error for a truncated file or a decode error for a
/// corrupt record.
pub fn read_state_log(path: &Path) -> std::io::Result<Vec<LogRecord>> {
    let mut file = File::open(path)?;
    let mut records = Vec::new();
    loop {
        let mut len_buf = [0u8; 4];
        match file.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut bytes = vec![0u8; len];
        file.read_exact(&mut bytes)?;
        let record = rmp_serde::from_slice(&bytes).map_err(std::io::Error::other)?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{LinearVelocity, Pose};
    use crate::world_desc::{default_world, load_world};
    use glam::Vec3;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_log_roundtrips_through_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.log");

        let mut ecm = EntityComponentManager::new();
        let world = load_world(&mut ecm, &default_world());
        let mut recorder = LogRecordSystem::new(&path);
        recorder.configure(
            world,
            &serde_json::Value::Null,
            &mut ecm,
            &Arc::new(sim_events::EventManager::new()),
        );

        // Tick 1: initial full snapshot.
        let mut info = UpdateInfo {
            iterations: 1,
            sim_time: Duration::from_millis(1),
            ..UpdateInfo::default()
        };
        recorder.post_update(&info, &ecm);
        ecm.end_of_tick();

        // Tick 2: one pose change.
        let model = ecm.entity_by_name("box").unwrap();
        let mut pose = Pose::IDENTITY;
        pose.translation = Vec3::new(1.0, 2.0, 3.0);
        ecm.set_component_data(model, pose);
        info.iterations = 2;
        recorder.post_update(&info, &ecm);
        ecm.end_of_tick();

        let records = read_state_log(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].iterations, 1);
        assert_eq!(records[1].iterations, 2);

        // Replay into a fresh manager.
        let mut replay = EntityComponentManager::new();
        replay.register_component::<Pose>();
        replay.register_component::<LinearVelocity>();
        for record in &records {
            replay.set_state(&record.state).unwrap();
            replay.end_of_tick();
        }
        assert_eq!(replay.entity_count(), 3);
        let replayed = replay.entity_by_name("box").unwrap();
        assert_eq!(
            replay.component::<Pose>(replayed).unwrap().translation,
            Vec3::new(1.0, 2.0, 3.0)
        );
    }

    #[test]
    fn test_quiet_ticks_are_not_logged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.log");

        let mut ecm = EntityComponentManager::new();
        let world = load_world(&mut ecm, &default_world());
        let mut recorder = LogRecordSystem::new(&path);
        recorder.configure(
            world,
            &serde_json::Value::Null,
            &mut ecm,
            &Arc::new(sim_events::EventManager::new()),
        );

        let info = UpdateInfo::default();
        recorder.post_update(&info, &ecm);
        ecm.end_of_tick();
        // Nothing changed this tick.
        recorder.post_update(&info, &ecm);
        ecm.end_of_tick();

        assert_eq!(read_state_log(&path).unwrap().len(), 1);
    }
}
