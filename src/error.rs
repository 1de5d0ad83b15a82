//! Error types

use thiserror::Error;

use crate::types::LinkId;

/// Configuration problems, surfaced to whoever supplied the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no link named '{0}' is configured")]
    UnknownLink(LinkId),

    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors returned by the engine handle
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine stopped")]
    Stopped,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors from the system lock action
#[derive(Debug, Error)]
pub enum LockError {
    #[error("no lock command configured")]
    Empty,

    #[error("failed to run lock command: {0}")]
    Spawn(#[from] std::io::Error),
}
