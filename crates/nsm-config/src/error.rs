//! Configuration error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    ParseError(String),

    #[error("invalid configuration: {0}")]
    ValidationError(String),

    #[error("xdg directory error: {0}")]
    XdgError(String),
}
