//! # Rate Limiting
//!
//! Two store-backed algorithms sharing one result shape, plus an in-process
//! token bucket:
//!
//! - [`RateLimiter::check_rate_limit`]: sliding window over a sorted set of
//!   request timestamps. Accurate at window edges.
//! - [`RateLimiter::check_fixed_rate_limit`]: one counter per fixed window.
//!   Cheaper, but can admit up to twice the limit across a window boundary.
//! - [`TokenBucket`]: lazily refilled buckets in process memory, no store.
//!
//! Store-backed checks fail open: when the store errors the request is treated
//! as allowed and the failure is logged.

pub mod store_limiter;
pub mod token_bucket;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub use store_limiter::RateLimiter;
pub use token_bucket::{TokenBucket, TokenBucketConfig};

/// Outcome of a single rate limit check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    /// Requests still available in the current window
    pub remaining: u64,
    /// Epoch milliseconds at which capacity is next available
    pub reset_at: i64,
    pub limit: u64,
    pub window_seconds: u64,
}

impl RateLimitResult {
    /// Reset time as a timestamp
    pub fn reset_at_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.reset_at).single()
    }

    /// Milliseconds until the reset time, measured from `now_ms`
    pub fn retry_after_ms(&self, now_ms: i64) -> u64 {
        self.reset_at.saturating_sub(now_ms).max(0) as u64
    }
}
