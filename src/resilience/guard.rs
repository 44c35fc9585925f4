//! # Resilience Guard
//!
//! Composes an identifier-scoped [`TokenBucket`] with a [`CircuitBreaker`] in
//! front of calls to an unreliable dependency such as an AI provider:
//!
//! ```text
//! execute(identifier, op)
//!   -> TokenBucket::try_consume(identifier)   RateLimited if empty
//!   -> CircuitBreaker::execute(op)            Unavailable if open
//!   -> op / fallback
//! ```

use crate::rate_limit::TokenBucket;
use crate::resilience::{CircuitBreaker, CircuitBreakerError, Served};
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

/// Errors surfaced by [`ResilienceGuard`]
#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    /// The caller's token bucket is empty
    #[error("Rate limit exceeded. Please try again later")]
    RateLimited {
        identifier: String,
        /// Epoch milliseconds at which the bucket is full again
        retry_at: i64,
    },

    /// The circuit is open and no fallback was supplied
    #[error("Service temporarily unavailable")]
    Unavailable { component: String },

    /// The protected operation failed
    #[error("{0}")]
    Operation(E),
}

impl<E> GuardError<E> {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GuardError::RateLimited { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, GuardError::Unavailable { .. })
    }
}

impl<E> From<CircuitBreakerError<E>> for GuardError<E> {
    fn from(error: CircuitBreakerError<E>) -> Self {
        match error {
            CircuitBreakerError::CircuitOpen { component } => GuardError::Unavailable { component },
            CircuitBreakerError::OperationFailed(e) => GuardError::Operation(e),
        }
    }
}

/// Rate limiter and circuit breaker in front of one dependency
#[derive(Debug, Clone)]
pub struct ResilienceGuard {
    limiter: Arc<TokenBucket>,
    breaker: Arc<CircuitBreaker>,
}

impl ResilienceGuard {
    pub fn new(limiter: Arc<TokenBucket>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { limiter, breaker }
    }

    pub fn limiter(&self) -> &Arc<TokenBucket> {
        &self.limiter
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    fn admit<E>(&self, identifier: &str) -> Result<(), GuardError<E>> {
        if self.limiter.try_consume(identifier, 1) {
            return Ok(());
        }
        warn!(
            component = %self.breaker.name(),
            identifier = identifier,
            "Rate limit exceeded"
        );
        Err(GuardError::RateLimited {
            identifier: identifier.to_string(),
            retry_at: self.limiter.get_reset_time(identifier),
        })
    }

    /// Run `operation` for `identifier` behind the rate limiter and breaker
    pub async fn execute<F, Fut, T, E>(&self, identifier: &str, operation: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.admit(identifier)?;
        Ok(self.breaker.execute(operation).await?)
    }

    /// Like [`Self::execute`], answering from `fallback` while the dependency
    /// is unavailable
    ///
    /// Rate limiting is not softened by the fallback: a caller over its limit
    /// still gets [`GuardError::RateLimited`].
    pub async fn execute_with_fallback<F, Fut, FB, FbFut, T, E>(
        &self,
        identifier: &str,
        operation: F,
        fallback: FB,
    ) -> Result<Served<T>, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce() -> FbFut,
        FbFut: Future<Output = T>,
    {
        self.admit(identifier)?;
        Ok(self
            .breaker
            .execute_with_fallback(operation, fallback)
            .await?)
    }
}
