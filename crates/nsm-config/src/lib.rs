//! Configuration for the node lifecycle manager daemon.
//!
//! Loaded from, in increasing precedence order: built-in defaults, a
//! per-user config file, a project config file, a local (gitignored)
//! override file, and `NSM_*`-prefixed environment variables.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NsmConfig {
    pub daemon: DaemonConfig,
    pub timeouts: TimeoutConfig,
    pub logging: LoggingConfig,
}

impl Default for NsmConfig {
    fn default() -> Self {
        NsmConfig {
            daemon: DaemonConfig::default(),
            timeouts: TimeoutConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix domain socket the request surface listens on.
    pub socket_path: PathBuf,
    pub pid_file: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            socket_path: PathBuf::from("/run/nsm/nsm.sock"),
            pid_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-client acknowledgement timeout used when a client registers
    /// without specifying one of its own, in milliseconds.
    pub default_client_timeout_ms: u32,
    /// Diagnostic ceiling for the aggregate-timeout bookkeeping (sum of a
    /// transition's sequential-client timeouts plus its max parallel-client
    /// timeout, SPEC_FULL §3): the engine logs a warning when a transition's
    /// aggregate exceeds this, but never enforces it. In milliseconds.
    pub aggregate_ceiling_ms: u32,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            default_client_timeout_ms: 5_000,
            aggregate_ceiling_ms: 120_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// A `tracing_subscriber::EnvFilter` directive string, e.g. "info" or
    /// "nsm_core=debug,nsm_daemon=info".
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "info".to_string(),
        }
    }
}
