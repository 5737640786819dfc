//! Error types for the Naptha client.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Node unreachable, connection reset, or request timeout.
    #[error("Transport error ({node}): {message}")]
    Transport { node: String, message: String },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    /// Application-level failure reported by a node.
    #[error("Run {run_id} failed: {message}")]
    RunFailed { run_id: String, message: String },

    #[error("Run {run_id} timed out without reaching a terminal status")]
    RunTimedOut { run_id: String },

    /// A caller-supplied deadline passed before the work could start.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("Environment conflict: {0}")]
    EnvironmentConflict(String),

    #[error("Storage object not found: {0}")]
    StorageNotFound(String),

    #[error("Operation {operation} not supported by environment {environment}")]
    UnsupportedOperation {
        environment: String,
        operation: String,
    },

    #[error("Environment session closed: {0}")]
    SessionClosed(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn transport(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Only transport failures are retried locally; everything else is
    /// either permanent or handled at a coarser granularity.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Errors that no amount of retrying on another node will fix.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Auth(_)
                | Self::ModuleNotFound(_)
                | Self::UnsupportedOperation { .. }
                | Self::InvalidInput(_)
                | Self::InvalidPlan(_)
                | Self::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
