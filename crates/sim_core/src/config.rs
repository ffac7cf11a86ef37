//! Server configuration.
//!
//! A [`ServerConfig`] is assembled by the caller (CLI, tests, an embedding
//! application) and consumed once by [`Server::new`]. Invalid values are
//! rejected at the setter with a warning, keeping the previous value, so a
//! misconfigured field never poisons the rest of the server.
//!
//! [`Server::new`]: crate::Server::new

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// This process's role in a distributed run. Roles are configured
/// explicitly, never auto-detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NetworkRole {
    /// Standalone simulation, no networking.
    #[default]
    None,
    /// Authors state and publishes snapshots to secondaries.
    Primary,
    /// Applies snapshots received from the primary; never authors state.
    Secondary,
}

/// Policy for a velocity command and a velocity reset hitting the same
/// entity in the same tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CommandTiebreak {
    /// The reset wins; the command is dropped with one warning.
    #[default]
    ResetWins,
    /// The command wins; the reset is dropped with one warning.
    CommandWins,
}

/// One system to attach to an entity at load time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Name of the entity to attach to.
    pub entity_name: String,
    /// Kind of that entity (`"world"`, `"model"`, `"link"`), used to
    /// disambiguate identical names.
    pub entity_kind: String,
    /// Factory name of the system, e.g. `"physics"`.
    pub system_name: String,
    /// System-specific configuration block.
    pub params: serde_json::Value,
}

/// Everything the server needs to construct its worlds.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    world_file: Option<PathBuf>,
    world_json: Option<String>,
    update_rate_hz: f64,
    seed: u64,
    start_paused: bool,
    network_role: NetworkRole,
    expected_secondaries: usize,
    nats_url: Option<String>,
    resource_cache_path: Option<PathBuf>,
    resource_paths: Vec<PathBuf>,
    plugins: Vec<PluginInfo>,
    log_record: bool,
    log_record_path: Option<PathBuf>,
    command_tiebreak: CommandTiebreak,
}

impl Default for ServerConfig {
    /// The empty configuration: default world, 1 kHz update rate, starting
    /// paused.
    fn default() -> Self {
        Self {
            world_file: None,
            world_json: None,
            update_rate_hz: 1000.0,
            seed: 0,
            start_paused: true,
            network_role: NetworkRole::None,
            expected_secondaries: 0,
            nats_url: None,
            resource_cache_path: None,
            resource_paths: Vec::new(),
            plugins: Vec::new(),
            log_record: false,
            log_record_path: None,
            command_tiebreak: CommandTiebreak::default(),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a world description file. Clears any inline description.
    pub fn set_world_file(&mut self, path: impl Into<PathBuf>) {
        self.world_file = Some(path.into());
        self.world_json = None;
    }

    #[must_use]
    pub fn world_file(&self) -> Option<&Path> {
        self.world_file.as_deref()
    }

    /// Use an inline JSON world description. Clears any file path.
    pub fn set_world_json(&mut self, json: impl Into<String>) {
        self.world_json = Some(json.into());
        self.world_file = None;
    }

    #[must_use]
    pub fn world_json(&self) -> Option<&str> {
        self.world_json.as_deref()
    }

    /// Set the target update rate in Hz. Non-positive or non-finite rates
    /// are rejected with a warning and the previous rate is kept.
    pub fn set_update_rate(&mut self, hz: f64) -> bool {
        if !hz.is_finite() || hz <= 0.0 {
            warn!(hz, "rejecting non-positive update rate");
            return false;
        }
        self.update_rate_hz = hz;
        true
    }

    #[must_use]
    pub fn update_rate(&self) -> f64 {
        self.update_rate_hz
    }

    /// Wall-clock pacing interval derived from the update rate.
    #[must_use]
    pub fn update_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.update_rate_hz)
    }

    /// Seed for deterministic runs. Threaded explicitly into consumers;
    /// there is no process-global seed.
    pub fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn set_start_paused(&mut self, paused: bool) {
        self.start_paused = paused;
    }

    #[must_use]
    pub fn start_paused(&self) -> bool {
        self.start_paused
    }

    pub fn set_network_role(&mut self, role: NetworkRole) {
        self.network_role = role;
    }

    #[must_use]
    pub fn network_role(&self) -> NetworkRole {
        self.network_role
    }

    /// Number of secondaries a primary waits for at run start.
    pub fn set_expected_secondaries(&mut self, count: usize) {
        self.expected_secondaries = count;
    }

    #[must_use]
    pub fn expected_secondaries(&self) -> usize {
        self.expected_secondaries
    }

    pub fn set_nats_url(&mut self, url: impl Into<String>) {
        self.nats_url = Some(url.into());
    }

    #[must_use]
    pub fn nats_url(&self) -> Option<&str> {
        self.nats_url.as_deref()
    }

    pub fn set_resource_cache_path(&mut self, path: impl Into<PathBuf>) {
        self.resource_cache_path = Some(path.into());
    }

    #[must_use]
    pub fn resource_cache_path(&self) -> Option<&Path> {
        self.resource_cache_path.as_deref()
    }

    pub fn add_resource_path(&mut self, path: impl Into<PathBuf>) {
        self.resource_paths.push(path.into());
    }

    #[must_use]
    pub fn resource_paths(&self) -> &[PathBuf] {
        &self.resource_paths
    }

    pub fn add_plugin(&mut self, plugin: PluginInfo) {
        self.plugins.push(plugin);
    }

    #[must_use]
    pub fn plugins(&self) -> &[PluginInfo] {
        &self.plugins
    }

    /// Enable state logging to `path`.
    pub fn set_log_record(&mut self, path: impl Into<PathBuf>) {
        self.log_record = true;
        self.log_record_path = Some(path.into());
    }

    #[must_use]
    pub fn log_record(&self) -> bool {
        self.log_record
    }

    #[must_use]
    pub fn log_record_path(&self) -> Option<&Path> {
        self.log_record_path.as_deref()
    }

    pub fn set_command_tiebreak(&mut self, tiebreak: CommandTiebreak) {
        self.command_tiebreak = tiebreak;
    }

    #[must_use]
    pub fn command_tiebreak(&self) -> CommandTiebreak {
        self.command_tiebreak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert!(config.start_paused());
        assert_eq!(config.update_rate(), 1000.0);
        assert_eq!(config.update_period(), Duration::from_millis(1));
        assert_eq!(config.network_role(), NetworkRole::None);
        assert_eq!(config.seed(), 0);
        assert!(config.world_file().is_none());
        assert!(config.world_json().is_none());
    }

    #[test]
    fn test_update_rate_rejects_non_positive() {
        let mut config = ServerConfig::default();
        assert!(config.set_update_rate(500.0));
        assert!(!config.set_update_rate(0.0));
        assert!(!config.set_update_rate(-3.0));
        assert!(!config.set_update_rate(f64::NAN));
        assert_eq!(config.update_rate(), 500.0);
    }

    #[test]
    fn test_world_sources_are_exclusive() {
        let mut config = ServerConfig::default();
        config.set_world_file("/tmp/shapes.json");
        assert!(config.world_file().is_some());
        config.set_world_json("{\"name\":\"inline\"}");
        assert!(config.world_file().is_none());
        assert!(config.world_json().is_some());
        config.set_world_file("/tmp/shapes.json");
        assert!(config.world_json().is_none());
    }
}
