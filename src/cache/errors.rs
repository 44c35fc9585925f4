//! Cache error types

use crate::store::StoreError;
use thiserror::Error;

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing store failed
    #[error("Cache store error: {0}")]
    Store(#[from] StoreError),

    /// Failed to serialize or deserialize a cache value
    #[error("Cache serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(error: serde_json::Error) -> Self {
        CacheError::SerializationError(error.to_string())
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
