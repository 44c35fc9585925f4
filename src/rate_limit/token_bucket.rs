//! In-process token bucket
//!
//! Buckets are created lazily per identifier and refilled lazily on access;
//! there is no background timer. Idle buckets are evicted by an explicit
//! [`TokenBucket::cleanup`] sweep.

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Token bucket parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    /// Maximum tokens a bucket holds
    pub capacity: u32,
    /// Tokens added per second
    pub refill_rate: f64,
    /// Buckets idle for longer than this are evicted by `cleanup`
    pub window: Duration,
}

impl TokenBucketConfig {
    pub fn new(capacity: u32, refill_rate: f64, window: Duration) -> Self {
        Self {
            capacity,
            refill_rate,
            window,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("capacity must be greater than 0".to_string());
        }
        if !(self.refill_rate.is_finite() && self.refill_rate > 0.0) {
            return Err("refill_rate must be a positive number".to_string());
        }
        if self.window.is_zero() {
            return Err("window must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_rate: 1.0,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill_ms: i64,
}

impl Bucket {
    /// Tokens available at `now_ms`, capped at capacity
    fn refilled(&self, now_ms: i64, config: &TokenBucketConfig) -> f64 {
        let elapsed_ms = (now_ms - self.last_refill_ms).max(0) as f64;
        (self.tokens + elapsed_ms / 1000.0 * config.refill_rate).min(config.capacity as f64)
    }
}

/// Identifier-scoped token buckets held in process memory
#[derive(Debug)]
pub struct TokenBucket {
    config: TokenBucketConfig,
    buckets: DashMap<String, Bucket>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl TokenBucket {
    pub fn new(config: TokenBucketConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    /// Create a token bucket after validating its configuration
    pub fn try_new(config: TokenBucketConfig) -> Result<Self, crate::config::ConfigurationError> {
        config
            .validate()
            .map_err(crate::config::ConfigurationError::validation_error)?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    /// Consume `cost` tokens for `key` if available
    pub fn try_consume(&self, key: &str, cost: u32) -> bool {
        self.try_consume_at(key, cost, now_ms())
    }

    /// [`Self::try_consume`] with an explicit clock (epoch milliseconds)
    ///
    /// A request for more tokens than are available consumes nothing.
    pub fn try_consume_at(&self, key: &str, cost: u32, now_ms: i64) -> bool {
        let capacity = self.config.capacity as f64;
        let mut bucket = self.buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: capacity,
            last_refill_ms: now_ms,
        });

        bucket.tokens = bucket.refilled(now_ms, &self.config);
        bucket.last_refill_ms = bucket.last_refill_ms.max(now_ms);

        let cost = cost as f64;
        if bucket.tokens >= cost {
            bucket.tokens -= cost;
            true
        } else {
            debug!(
                key = key,
                available = bucket.tokens,
                requested = cost,
                "Token bucket exhausted"
            );
            false
        }
    }

    /// Whole tokens currently available for `key`
    pub fn get_remaining(&self, key: &str) -> u32 {
        self.get_remaining_at(key, now_ms())
    }

    pub fn get_remaining_at(&self, key: &str, now_ms: i64) -> u32 {
        self.buckets
            .get(key)
            .map(|bucket| bucket.refilled(now_ms, &self.config).floor() as u32)
            .unwrap_or(self.config.capacity)
    }

    /// Epoch milliseconds at which the bucket for `key` is full again
    pub fn get_reset_time(&self, key: &str) -> i64 {
        self.get_reset_time_at(key, now_ms())
    }

    pub fn get_reset_time_at(&self, key: &str, now_ms: i64) -> i64 {
        let Some(bucket) = self.buckets.get(key) else {
            return now_ms;
        };
        let missing = self.config.capacity as f64 - bucket.refilled(now_ms, &self.config);
        if missing <= 0.0 || self.config.refill_rate <= 0.0 {
            return now_ms;
        }
        now_ms + (missing / self.config.refill_rate * 1000.0).ceil() as i64
    }

    /// Evict buckets idle longer than the configured window; returns the
    /// number removed
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(now_ms())
    }

    pub fn cleanup_at(&self, now_ms: i64) -> usize {
        let window_ms = self.config.window.as_millis() as i64;
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now_ms - bucket.last_refill_ms <= window_ms);
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            debug!(removed = removed, remaining = self.buckets.len(), "Token buckets evicted");
        }
        removed
    }

    /// Number of tracked buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(capacity: u32, refill_rate: f64) -> TokenBucket {
        TokenBucket::new(TokenBucketConfig::new(
            capacity,
            refill_rate,
            Duration::from_secs(60),
        ))
    }

    #[test]
    fn test_consume_until_empty_then_refill() {
        let bucket = bucket(5, 5.0);
        let t0 = 1_000_000;

        for _ in 0..5 {
            assert!(bucket.try_consume_at("ai:user-1", 1, t0));
        }
        assert!(!bucket.try_consume_at("ai:user-1", 1, t0));
        assert_eq!(bucket.get_remaining_at("ai:user-1", t0), 0);

        // capacity / refill_rate = 1 second
        let t1 = t0 + 1_000;
        assert_eq!(bucket.get_remaining_at("ai:user-1", t1), 5);
        for _ in 0..5 {
            assert!(bucket.try_consume_at("ai:user-1", 1, t1));
        }
    }

    #[test]
    fn test_overdraw_does_not_partially_consume() {
        let bucket = bucket(3, 1.0);
        let t0 = 1_000_000;

        assert!(bucket.try_consume_at("k", 2, t0));
        assert!(!bucket.try_consume_at("k", 2, t0));
        assert_eq!(bucket.get_remaining_at("k", t0), 1);
        assert!(bucket.try_consume_at("k", 1, t0));
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let bucket = bucket(2, 10.0);
        let t0 = 1_000_000;
        assert!(bucket.try_consume_at("k", 1, t0));
        assert_eq!(bucket.get_remaining_at("k", t0 + 60_000), 2);
        assert!(!bucket.try_consume_at("k", 3, t0 + 60_000));
    }

    #[test]
    fn test_reset_time() {
        let bucket = bucket(4, 2.0);
        let t0 = 1_000_000;
        assert_eq!(bucket.get_reset_time_at("unknown", t0), t0);

        assert!(bucket.try_consume_at("k", 4, t0));
        // 4 tokens at 2/s
        assert_eq!(bucket.get_reset_time_at("k", t0), t0 + 2_000);
        assert_eq!(bucket.get_reset_time_at("k", t0 + 1_000), t0 + 2_000);
    }

    #[test]
    fn test_cleanup_evicts_idle_buckets() {
        let bucket = TokenBucket::new(TokenBucketConfig::new(1, 1.0, Duration::from_secs(10)));
        let t0 = 1_000_000;
        bucket.try_consume_at("old", 1, t0);
        bucket.try_consume_at("fresh", 1, t0 + 8_000);

        assert_eq!(bucket.cleanup_at(t0 + 15_000), 1);
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket.get_remaining_at("old", t0 + 15_000), 1);
    }

    #[test]
    fn test_config_validation() {
        assert!(TokenBucketConfig::default().validate().is_ok());
        assert!(TokenBucket::try_new(TokenBucketConfig::new(0, 1.0, Duration::from_secs(1))).is_err());
        assert!(TokenBucket::try_new(TokenBucketConfig::new(1, 0.0, Duration::from_secs(1))).is_err());
        assert!(TokenBucket::try_new(TokenBucketConfig::new(1, f64::NAN, Duration::from_secs(1))).is_err());
    }
}
