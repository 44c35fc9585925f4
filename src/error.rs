//! Crate-wide error type
//!
//! Component APIs return their own error enums ([`StoreError`],
//! [`CacheError`], [`ConfigurationError`], ...). [`ResilienceError`] is what
//! composition code such as [`crate::context::ResilienceContext`] returns, with
//! `From` conversions so `?` works across component boundaries.

use crate::cache::CacheError;
use crate::config::ConfigurationError;
use crate::resilience::{CircuitBreakerError, GuardError};
use crate::store::StoreError;
use std::fmt::Display;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResilienceError {
    #[error("Store error: {0}")]
    StoreError(String),
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Cache error: {0}")]
    CacheError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Circuit breaker open: {0}")]
    CircuitBreakerOpen(String),
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("Operation failed: {0}")]
    OperationFailed(String),
    #[error("Context closed")]
    Closed,
}

impl ResilienceError {
    /// Whether retrying later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResilienceError::StoreUnavailable(_)
                | ResilienceError::CircuitBreakerOpen(_)
                | ResilienceError::RateLimited(_)
        )
    }
}

impl From<StoreError> for ResilienceError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Unavailable(_) | StoreError::Timeout(_) | StoreError::Connection(_) => {
                ResilienceError::StoreUnavailable(error.to_string())
            }
            StoreError::Closed => ResilienceError::Closed,
            other => ResilienceError::StoreError(other.to_string()),
        }
    }
}

impl From<CacheError> for ResilienceError {
    fn from(error: CacheError) -> Self {
        match error {
            CacheError::Store(store) => store.into(),
            other => ResilienceError::CacheError(other.to_string()),
        }
    }
}

impl From<ConfigurationError> for ResilienceError {
    fn from(error: ConfigurationError) -> Self {
        ResilienceError::ConfigurationError(error.to_string())
    }
}

impl From<serde_json::Error> for ResilienceError {
    fn from(error: serde_json::Error) -> Self {
        ResilienceError::CacheError(format!("JSON serialization error: {error}"))
    }
}

impl<E: Display> From<CircuitBreakerError<E>> for ResilienceError {
    fn from(error: CircuitBreakerError<E>) -> Self {
        match error {
            CircuitBreakerError::CircuitOpen { component } => ResilienceError::CircuitBreakerOpen(component),
            CircuitBreakerError::OperationFailed(e) => ResilienceError::OperationFailed(e.to_string()),
        }
    }
}

impl<E: Display> From<GuardError<E>> for ResilienceError {
    fn from(error: GuardError<E>) -> Self {
        match error {
            GuardError::RateLimited { identifier, .. } => ResilienceError::RateLimited(identifier),
            GuardError::Unavailable { component } => ResilienceError::CircuitBreakerOpen(component),
            GuardError::Operation(e) => ResilienceError::OperationFailed(e.to_string()),
        }
    }
}

pub type ResilienceResult<T> = Result<T, ResilienceError>;
