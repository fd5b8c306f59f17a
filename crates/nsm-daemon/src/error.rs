//! Daemon-level error type (§10.3), mirroring the shape of the teacher's
//! `ServerError`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("failed to bind socket at {path}: {source}")]
    BindFailed { path: PathBuf, source: std::io::Error },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] nsm_config::ConfigError),

    #[error("failed to install signal handler: {0}")]
    SignalHandler(std::io::Error),
}
