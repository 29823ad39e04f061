//! Supervision of the local `llama-server` inference process.

pub mod launch;
pub mod output;
pub mod supervisor;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::core::config::data::path_display;
use crate::core::config::ConfigError;

pub use supervisor::{ProcessSupervisor, ServerStatus, StartOverrides, StatusReport};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Model file does not exist: {}", path_display(.path))]
    ModelNotFound { path: PathBuf },
    #[error("llama-server binary not found (looked for {})", display_paths(.searched))]
    BinaryNotFound { searched: Vec<PathBuf> },
    #[error("Failed to start {}: {source}", path_display(.binary))]
    Spawn {
        binary: PathBuf,
        source: std::io::Error,
    },
    #[error("Unable to load model {model}: {line}")]
    ModelLoadFailed { model: String, line: String },
    #[error("llama-server did not report readiness within {}s", .timeout.as_secs())]
    StartupTimeout { timeout: Duration },
    #[error("llama-server exited before it was ready ({status})")]
    ExitedDuringStartup { status: String },
    #[error("Failed to stop llama-server: {source}")]
    Stop { source: std::io::Error },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(path_display)
        .collect::<Vec<_>>()
        .join(", ")
}
