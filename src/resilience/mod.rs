//! # Resilience Module
//!
//! Fault isolation for calls to unreliable dependencies.
//!
//! ## Architecture
//!
//! - **Circuit Breakers**: stop calling a failing dependency for a cooldown,
//!   then probe recovery
//! - **Manager**: one breaker per protected resource, created from config
//! - **Metrics**: counters and timestamps for health checks
//! - **Guard**: identifier-scoped rate limiting in front of a breaker
//!
//! ## Usage
//!
//! ```rust,no_run
//! use resilience_core::resilience::{CircuitBreaker, CircuitBreakerConfig, Served};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     success_threshold: 3,
//!     timeout: Duration::from_secs(30),
//!     monitoring_period: Duration::from_secs(60),
//! };
//! let breaker = CircuitBreaker::new("ai_provider", config);
//!
//! let answer = breaker
//!     .execute_with_fallback(
//!         || async { Ok::<_, std::io::Error>("generated summary".to_string()) },
//!         || async { "Summary unavailable".to_string() },
//!     )
//!     .await?;
//!
//! if let Served::Fallback(_) = answer {
//!     // degraded response
//! }
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod guard;
pub mod manager;
pub mod metrics;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState, Served};
pub use config::CircuitBreakerConfig;
pub use guard::{GuardError, ResilienceGuard};
pub use manager::CircuitBreakerManager;
pub use metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
