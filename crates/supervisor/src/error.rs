//! Error types for the supervisor

use thiserror::Error;

/// Result type alias for supervisor operations
pub type Result<T> = std::result::Result<T, SupervisorError>;

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Named CLI agent is not installed; raised before any spawn
    #[error("Agent not installed: {agent}")]
    ExecutorUnavailable { agent: String },

    /// Hard wall-clock timeout expired; the subprocess was killed
    #[error("{agent} timed out after {seconds} seconds")]
    ExecutionTimeout { agent: String, seconds: u64 },

    /// Dispatch requires a live PTY
    #[error("No shell is running, connect first")]
    ShellNotRunning,

    /// Operation requires a relay connection
    #[error("Not connected to a room")]
    NotConnected,

    #[error("Failed to spawn shell: {message}")]
    SpawnFailed { message: String },

    #[error("Relay link closed")]
    LinkClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    pub fn spawn_failed(message: impl Into<String>) -> Self {
        Self::SpawnFailed {
            message: message.into(),
        }
    }
}
