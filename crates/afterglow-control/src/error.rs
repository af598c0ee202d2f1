//! Error types for lighting and player control
use thiserror::Error;

/// Lighting and control errors
#[derive(Error, Debug)]
pub enum ControlError {
    /// Fixture does not fit into the universe
    #[error("Fixture out of range: {0}")]
    FixtureOutOfRange(String),

    /// Scene fixture or value problem
    #[error("Invalid scene: {0}")]
    InvalidScene(String),

    /// Scene id not registered
    #[error("Scene not found: {0}")]
    SceneNotFound(String),

    /// Connect did not finish in time
    #[error("Connection to {0} timed out")]
    ConnectTimeout(String),

    /// I/O error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Invalid message format
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

/// Result type for control operations
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors raised by an embedded player widget
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WidgetError {
    /// Player API script or endpoint is missing
    #[error("Player API not available: {0}")]
    ApiUnavailable(String),

    /// No widget bound
    #[error("Player widget not bound")]
    NotBound,

    /// Player did not become ready in time
    #[error("Player not ready after {0:?}")]
    NotReady(std::time::Duration),

    /// Operation ran longer than the configured timeout
    #[error("Operation '{0}' timed out")]
    Timeout(String),

    /// The player rejected a command
    #[error("Player command failed: {0}")]
    Command(String),

    /// Network failure talking to the player
    #[error("Network error: {0}")]
    Network(String),
}

impl From<reqwest::Error> for WidgetError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_status() {
            WidgetError::Command(e.to_string())
        } else {
            WidgetError::Network(e.to_string())
        }
    }
}
