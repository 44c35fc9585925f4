//! # Cache Module
//!
//! Cache-aside caching over the shared [`KeyValueStore`](crate::store::KeyValueStore).
//!
//! ## Architecture
//!
//! ```text
//! Cache                     <- get/set/delete/delete_pattern/exists
//!   ├── get_or_set          <- cache-aside
//!   ├── get_or_set_stale    <- stale-while-revalidate, one background refresh per key
//!   └── increment           <- TTL'd counters
//! SessionCache              <- `session` namespace
//! RateLimitCounter          <- `ratelimit` namespace
//! ```
//!
//! ## Design Decisions
//!
//! - **Fail open**: store errors are logged and behave as a miss; the
//!   `try_*` variants surface them
//! - **Observable revalidation**: background refresh outcomes are published
//!   as [`RevalidationEvent`]s
//!
//! ## Usage
//!
//! ```rust,no_run
//! use resilience_core::cache::{Cache, CacheOptions};
//! use resilience_core::store::InMemoryStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let cache = Cache::new(Arc::new(InMemoryStore::new()), "app", Duration::from_secs(300));
//! let options = CacheOptions::in_namespace("dashboards").ttl(Duration::from_secs(60));
//!
//! let totals: Vec<u64> = cache
//!     .get_or_set("totals", || async { Ok::<_, String>(vec![1, 2, 3]) }, &options)
//!     .await?;
//! # let _ = totals;
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod helpers;
pub mod options;
pub mod revalidation;
pub mod service;

pub use errors::{CacheError, CacheResult};
pub use helpers::{RateLimitCounter, SessionCache, RATE_LIMIT_NAMESPACE, SESSION_NAMESPACE};
pub use options::CacheOptions;
pub use revalidation::RevalidationEvent;
pub use service::{Cache, DEFAULT_TTL};
