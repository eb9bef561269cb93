//! Error types for the stevedore manager

use thiserror::Error;

/// Main error type for the deploy manager
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    #[error("no deploy matching '{0}'")]
    NotFound(String),

    #[error("'{name}' matches {count} deploy ids, be more specific")]
    Ambiguous { name: String, count: usize },

    #[error("deploy {deploy_id} is already configured for port {port}")]
    AlreadyConfigured { deploy_id: String, port: u16 },

    #[error("no free port between {low} and {high}")]
    PortExhausted { low: u16, high: u16 },

    #[error("cannot clean up {0}: deploy is currently running")]
    StillRunning(String),

    #[error("deploy {0} is not running")]
    NotRunning(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("health check failed: {0}")]
    HealthFailed(String),

    #[error("command '{command}' failed: {reason}")]
    ExternalCommand { command: String, reason: String },

    #[error("server error: {0}")]
    Server(String),

    #[error("shutdown error: {0}")]
    Shutdown(String),
}

impl From<anyhow::Error> for ManagerError {
    fn from(err: anyhow::Error) -> Self {
        ManagerError::Server(err.to_string())
    }
}
