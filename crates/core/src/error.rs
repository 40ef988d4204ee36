//! Error types for the core library

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid transition for task {id}: cannot {action} while {state}")]
    InvalidTransition {
        id: String,
        state: String,
        action: String,
    },

    #[error("Capability not available on current tier: {capability}")]
    CapabilityDenied { capability: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Owner unavailable: {0}")]
    OwnerUnavailable(String),
}
