//! # Circuit Breaker Implementation
//!
//! Gates calls to an unreliable dependency with the classic three-state
//! machine: Closed (normal operation), Open (failing fast until a recovery
//! deadline) and HalfOpen (probing recovery).
//!
//! State lives in process memory. Multiple processes each run an independent
//! breaker for the same dependency.

use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - calls are allowed and counted toward closing
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, rejecting all calls
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Operation failed and was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CircuitBreakerError::CircuitOpen { .. })
    }

    /// The operation's own error, if the operation ran and failed
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            CircuitBreakerError::OperationFailed(e) => Some(e),
            CircuitBreakerError::CircuitOpen { .. } => None,
        }
    }
}

/// Outcome of a protected call that may have been answered by a fallback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Served<T> {
    /// The protected operation produced the value
    Primary(T),
    /// The dependency was unavailable and the fallback produced the value
    Fallback(T),
}

impl<T> Served<T> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Served::Fallback(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Served::Primary(value) | Served::Fallback(value) => value,
        }
    }

    pub fn as_inner(&self) -> &T {
        match self {
            Served::Primary(value) | Served::Fallback(value) => value,
        }
    }
}

/// Mutable breaker state, epoch milliseconds for timestamps
#[derive(Debug, Clone)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<i64>,
    last_success_at: Option<i64>,
    next_attempt_at: Option<i64>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            last_success_at: None,
            next_attempt_at: None,
        }
    }
}

#[derive(Debug, Default)]
struct CallCounters {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    rejected_count: AtomicU64,
    fallback_count: AtomicU64,
}

fn epoch_millis_now() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Circuit breaker guarding one protected resource
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    config: CircuitBreakerConfig,

    /// Never held across an await point
    inner: Mutex<BreakerState>,

    counters: CallCounters,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            success_threshold = config.success_threshold,
            timeout_ms = config.timeout.as_millis() as u64,
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            inner: Mutex::new(BreakerState::closed()),
            counters: CallCounters::default(),
        }
    }

    /// Create a circuit breaker after validating its configuration
    pub fn try_new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> Result<Self, crate::config::ConfigurationError> {
        config
            .validate()
            .map_err(crate::config::ConfigurationError::validation_error)?;
        Ok(Self::new(name, config))
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// While open and before the recovery deadline the operation is not
    /// invoked and [`CircuitBreakerError::CircuitOpen`] is returned.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_admit_at(epoch_millis_now()) {
            return Err(self.rejection());
        }

        let start_time = Instant::now();
        let result = operation().await;
        let duration = start_time.elapsed();

        match result {
            Ok(value) => {
                self.on_success_at(epoch_millis_now(), duration);
                Ok(value)
            }
            Err(e) => {
                self.on_failure_at(epoch_millis_now(), duration);
                Err(CircuitBreakerError::OperationFailed(e))
            }
        }
    }

    /// Execute an operation, answering from `fallback` when the circuit is
    /// open or the failure just opened it
    ///
    /// A failure that leaves the circuit closed is returned to the caller.
    pub async fn execute_with_fallback<F, Fut, FB, FbFut, T, E>(
        &self,
        operation: F,
        fallback: FB,
    ) -> Result<Served<T>, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce() -> FbFut,
        FbFut: Future<Output = T>,
    {
        match self.execute(operation).await {
            Ok(value) => Ok(Served::Primary(value)),
            Err(CircuitBreakerError::CircuitOpen { .. }) => Ok(self.serve_fallback(fallback).await),
            Err(CircuitBreakerError::OperationFailed(e)) => {
                if self.state() == CircuitState::Open {
                    Ok(self.serve_fallback(fallback).await)
                } else {
                    Err(CircuitBreakerError::OperationFailed(e))
                }
            }
        }
    }

    async fn serve_fallback<FB, FbFut, T>(&self, fallback: FB) -> Served<T>
    where
        FB: FnOnce() -> FbFut,
        FbFut: Future<Output = T>,
    {
        self.counters.fallback_count.fetch_add(1, Ordering::Relaxed);
        debug!(component = %self.name, "Serving fallback");
        Served::Fallback(fallback().await)
    }

    fn rejection<E>(&self) -> CircuitBreakerError<E> {
        self.counters.rejected_count.fetch_add(1, Ordering::Relaxed);
        debug!(component = %self.name, "Call rejected, circuit open");
        CircuitBreakerError::CircuitOpen {
            component: self.name.clone(),
        }
    }

    /// Decide whether a call may proceed at `now_ms`, moving Open to HalfOpen
    /// once the recovery deadline has passed
    fn try_admit_at(&self, now_ms: i64) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let deadline = inner.next_attempt_at.unwrap_or(now_ms);
                if now_ms < deadline {
                    return false;
                }
                inner.state = CircuitState::HalfOpen;
                inner.success_count = 0;
                inner.next_attempt_at = None;
                info!(
                    component = %self.name,
                    success_threshold = self.config.success_threshold,
                    "Circuit breaker half-open (testing recovery)"
                );
                true
            }
        }
    }

    fn on_success_at(&self, now_ms: i64, duration: Duration) {
        self.counters.total_calls.fetch_add(1, Ordering::Relaxed);
        self.counters.success_count.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        inner.last_success_at = Some(now_ms);

        debug!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            "Operation succeeded"
        );

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    info!(
                        component = %self.name,
                        total_calls = self.counters.total_calls.load(Ordering::Relaxed),
                        "Circuit breaker closed (recovered)"
                    );
                }
            }
            CircuitState::Open => {
                // A call admitted before another caller reopened the circuit
                debug!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    fn on_failure_at(&self, now_ms: i64, duration: Duration) {
        self.counters.total_calls.fetch_add(1, Ordering::Relaxed);
        self.counters.failure_count.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        let previous_failure = inner.last_failure_at.replace(now_ms);

        warn!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            "Operation failed"
        );

        match inner.state {
            CircuitState::Closed => {
                let monitoring_ms = duration_millis(self.config.monitoring_period);
                let stale = previous_failure.is_some_and(|at| now_ms.saturating_sub(at) > monitoring_ms);
                inner.failure_count = if stale { 1 } else { inner.failure_count + 1 };
                if inner.failure_count >= self.config.failure_threshold {
                    self.open(&mut inner, now_ms);
                }
            }
            CircuitState::HalfOpen => {
                self.open(&mut inner, now_ms);
            }
            CircuitState::Open => {
                inner.failure_count += 1;
            }
        }
    }

    fn open(&self, inner: &mut BreakerState, now_ms: i64) {
        inner.state = CircuitState::Open;
        inner.success_count = 0;
        inner.next_attempt_at = Some(now_ms.saturating_add(duration_millis(self.config.timeout)));

        error!(
            component = %self.name,
            failure_count = inner.failure_count,
            failure_threshold = self.config.failure_threshold,
            timeout_ms = self.config.timeout.as_millis() as u64,
            "Circuit breaker opened (failing fast)"
        );
    }

    /// Force Closed with zeroed counters (administrative recovery)
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let previous = inner.state;
        *inner = BreakerState::closed();
        info!(component = %self.name, previous_state = %previous, "Circuit breaker reset");
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "Circuit breaker forced open");
        let mut inner = self.inner.lock();
        self.open(&mut inner, epoch_millis_now());
    }

    /// Record a success for an operation executed outside [`Self::execute`]
    pub fn record_success(&self, duration: Duration) {
        self.on_success_at(epoch_millis_now(), duration);
    }

    /// Record a failure for an operation executed outside [`Self::execute`]
    pub fn record_failure(&self, duration: Duration) {
        self.on_failure_at(epoch_millis_now(), duration);
    }

    /// Pre-flight check for manual recording; moves Open to HalfOpen once the
    /// recovery deadline has passed
    pub fn should_allow(&self) -> bool {
        self.try_admit_at(epoch_millis_now())
    }

    /// Check if circuit is healthy (closed state with low failure rate)
    pub fn is_healthy(&self) -> bool {
        self.metrics().is_healthy()
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock().clone();
        let total_calls = self.counters.total_calls.load(Ordering::Relaxed);
        let success_count = self.counters.success_count.load(Ordering::Relaxed);
        let failure_count = self.counters.failure_count.load(Ordering::Relaxed);

        let (failure_rate, success_rate) = if total_calls > 0 {
            (
                failure_count as f64 / total_calls as f64,
                success_count as f64 / total_calls as f64,
            )
        } else {
            (0.0, 0.0)
        };

        CircuitBreakerMetrics {
            total_calls,
            success_count,
            failure_count,
            rejected_count: self.counters.rejected_count.load(Ordering::Relaxed),
            fallback_count: self.counters.fallback_count.load(Ordering::Relaxed),
            consecutive_failures: inner.failure_count,
            half_open_successes: inner.success_count,
            current_state: inner.state,
            last_failure_at: inner.last_failure_at.and_then(millis_to_datetime),
            last_success_at: inner.last_success_at.and_then(millis_to_datetime),
            next_attempt_at: inner.next_attempt_at.and_then(millis_to_datetime),
            failure_rate,
            success_rate,
        }
    }
}

/// Milliseconds in `duration`, saturating at `i64::MAX`
fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
