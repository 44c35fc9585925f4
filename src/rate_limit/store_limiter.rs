//! Store-backed sliding-window and fixed-window rate limiters

use super::RateLimitResult;
use crate::logging::log_store_failure;
use crate::store::{KeyValueStore, StoreResult};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Rate limiter keeping its windows in the shared key-value store
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    key_prefix: String,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
        }
    }

    fn window_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    /// Sliding-window check; fails open on store errors
    pub async fn check_rate_limit(&self, key: &str, limit: u64, window_seconds: u64) -> RateLimitResult {
        let now_ms = Utc::now().timestamp_millis();
        match self.try_check_rate_limit_at(key, limit, window_seconds, now_ms).await {
            Ok(result) => result,
            Err(e) => {
                log_store_failure("rate_limiter", "sliding_window", key, &e);
                fail_open(limit, window_seconds, now_ms)
            }
        }
    }

    /// Sliding-window check surfacing store errors
    pub async fn try_check_rate_limit(
        &self,
        key: &str,
        limit: u64,
        window_seconds: u64,
    ) -> StoreResult<RateLimitResult> {
        self.try_check_rate_limit_at(key, limit, window_seconds, Utc::now().timestamp_millis())
            .await
    }

    async fn try_check_rate_limit_at(
        &self,
        key: &str,
        limit: u64,
        window_seconds: u64,
        now_ms: i64,
    ) -> StoreResult<RateLimitResult> {
        let window_seconds = window_seconds.max(1);
        let window_ms = (window_seconds * 1000) as i64;
        let window_start = now_ms - window_ms;
        let store_key = self.window_key(key);

        // Trim, then count, then insert
        self.store
            .zrem_range_by_score(&store_key, 0.0, window_start as f64)
            .await?;
        let count = self.store.zcard(&store_key).await?;

        if count >= limit {
            let oldest = self.store.zrange_with_scores(&store_key, 0, 0).await?;
            let reset_at = oldest
                .first()
                .map(|(_, score)| *score as i64 + window_ms)
                .unwrap_or(now_ms + window_ms);

            debug!(key = key, count = count, limit = limit, "Rate limit exceeded");
            return Ok(RateLimitResult {
                allowed: false,
                remaining: 0,
                reset_at,
                limit,
                window_seconds,
            });
        }

        let member = format!("{}-{}", now_ms, Uuid::new_v4().simple());
        self.store.zadd(&store_key, now_ms as f64, &member).await?;
        self.store
            .expire(&store_key, Duration::from_secs(window_seconds))
            .await?;

        Ok(RateLimitResult {
            allowed: true,
            remaining: limit - count - 1,
            reset_at: now_ms + window_ms,
            limit,
            window_seconds,
        })
    }

    /// Fixed-window check; fails open on store errors
    ///
    /// Each window is a fresh counter, so bursts straddling a boundary can be
    /// admitted up to twice the limit.
    pub async fn check_fixed_rate_limit(
        &self,
        key: &str,
        limit: u64,
        window_seconds: u64,
    ) -> RateLimitResult {
        let now_ms = Utc::now().timestamp_millis();
        match self
            .try_check_fixed_rate_limit_at(key, limit, window_seconds, now_ms)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                log_store_failure("rate_limiter", "fixed_window", key, &e);
                fail_open(limit, window_seconds, now_ms)
            }
        }
    }

    /// Fixed-window check surfacing store errors
    pub async fn try_check_fixed_rate_limit(
        &self,
        key: &str,
        limit: u64,
        window_seconds: u64,
    ) -> StoreResult<RateLimitResult> {
        self.try_check_fixed_rate_limit_at(key, limit, window_seconds, Utc::now().timestamp_millis())
            .await
    }

    async fn try_check_fixed_rate_limit_at(
        &self,
        key: &str,
        limit: u64,
        window_seconds: u64,
        now_ms: i64,
    ) -> StoreResult<RateLimitResult> {
        let window_seconds = window_seconds.max(1);
        let window_ms = (window_seconds * 1000) as i64;
        let window_index = now_ms.div_euclid(window_ms);
        let store_key = format!("{}:{}", self.window_key(key), window_index);

        let count = self
            .store
            .incr_with_expiry(&store_key, Duration::from_secs(window_seconds))
            .await?
            .max(0) as u64;

        Ok(RateLimitResult {
            allowed: count <= limit,
            remaining: limit.saturating_sub(count),
            reset_at: (window_index + 1) * window_ms,
            limit,
            window_seconds,
        })
    }
}

fn fail_open(limit: u64, window_seconds: u64, now_ms: i64) -> RateLimitResult {
    RateLimitResult {
        allowed: true,
        remaining: limit,
        reset_at: now_ms + (window_seconds.max(1) * 1000) as i64,
        limit,
        window_seconds,
    }
}
