//! Server-level error types.

use std::path::PathBuf;

/// Errors surfaced by the server and its configuration loading.
///
/// Run-state conditions (double run, invalid world index on control calls)
/// are reported through `bool`/`Option` returns instead; these variants
/// cover the cases where a caller needs the cause.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// A world index outside the configured world list.
    #[error("invalid world index {0}")]
    InvalidWorldIndex(usize),

    /// An invalid configuration value that could not be skipped.
    #[error("configuration error: {0}")]
    Config(String),

    /// A world file could not be read.
    #[error("failed to read world file {path}: {source}")]
    WorldFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A world description failed to parse.
    #[error("failed to parse world description: {0}")]
    WorldParse(#[from] serde_json::Error),

    /// Entity/component layer failure.
    #[error(transparent)]
    Ecm(#[from] sim_ecm::EcmError),

    /// Transport failure.
    #[error(transparent)]
    Net(#[from] sim_net::NetError),
}
