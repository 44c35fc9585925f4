//! Store error types

use thiserror::Error;

/// Errors raised by key-value store backends
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not establish a connection to the backend
    #[error("Store connection error: {0}")]
    Connection(String),

    /// A command was rejected or failed on the backend
    #[error("Store command failed: {operation}: {message}")]
    Command { operation: String, message: String },

    /// An atomic script failed to execute
    #[error("Store script failed: {0}")]
    Script(String),

    /// The store was explicitly closed
    #[error("Store connection has been closed")]
    Closed,

    /// The backend is unreachable (outage, simulated outage)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The command did not complete in time
    #[error("Store operation timed out: {0}")]
    Timeout(String),
}

impl StoreError {
    /// Build a command error for the given operation
    pub fn command(operation: &str, message: impl Into<String>) -> Self {
        StoreError::Command {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
