#![allow(clippy::doc_markdown)] // Allow technical terms like Redis, SCAN in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Resilience Core
//!
//! Resilience and distributed-coordination primitives for services that call
//! unreliable dependencies and share state through Redis.
//!
//! ## Overview
//!
//! Components, leaf-first:
//!
//! - [`store`] - async key-value store contract with Redis and in-memory backends
//! - [`rate_limit`] - sliding-window and fixed-window limiters over the store,
//!   plus an in-process token bucket
//! - [`resilience`] - circuit breakers, their manager and metrics, and the
//!   rate-limit-then-breaker [`ResilienceGuard`]
//! - [`lock`] - token-owned distributed locks
//! - [`cache`] - cache-aside and stale-while-revalidate caching with namespaces
//! - [`warmup`] - registry of cache entries warmed in parallel batches
//! - [`context`] - composition root with an `init`/`close` lifecycle
//!
//! Ambient modules: [`config`], [`error`], [`logging`].
//!
//! ## Failure Policy
//!
//! Rate limiting and caching fail **open** when the store is unavailable: the
//! call is allowed or treated as a miss, and the failure is logged at error
//! level. Locking fails **closed**: a store failure reads as "not acquired".
//! Circuit breaker failures reach the caller unless a fallback is supplied.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use resilience_core::config::ResilienceConfig;
//! use resilience_core::context::ResilienceContext;
//! use resilience_core::rate_limit::TokenBucketConfig;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! resilience_core::logging::init_structured_logging();
//! let context = ResilienceContext::init(ResilienceConfig::load()?).await?;
//!
//! let guard = context
//!     .guard("ai_provider", TokenBucketConfig::new(10, 0.5, Duration::from_secs(60)))
//!     .await?;
//! let summary = guard
//!     .execute_with_fallback(
//!         "user-42",
//!         || async { Ok::<_, std::io::Error>("fresh summary".to_string()) },
//!         || async { "Summary unavailable".to_string() },
//!     )
//!     .await?
//!     .into_inner();
//!
//! context.close().await?;
//! # let _ = summary;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod lock;
pub mod logging;
pub mod rate_limit;
pub mod resilience;
pub mod store;
pub mod warmup;

pub use cache::{Cache, CacheOptions, RevalidationEvent};
pub use config::{ConfigurationError, ResilienceConfig};
pub use context::ResilienceContext;
pub use error::{ResilienceError, ResilienceResult};
pub use lock::{DistributedLock, LockToken};
pub use rate_limit::{RateLimitResult, RateLimiter, TokenBucket, TokenBucketConfig};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerManager,
    CircuitState, GuardError, ResilienceGuard, Served,
};
pub use store::{InMemoryStore, KeyValueStore, StoreError};
pub use warmup::{CacheWarmupScheduler, WarmupEntry, WarmupOptions, WarmupReport};
