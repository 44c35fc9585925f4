//! Namespaced specializations of [`Cache`]

use super::options::CacheOptions;
use super::service::Cache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

pub const SESSION_NAMESPACE: &str = "session";
pub const RATE_LIMIT_NAMESPACE: &str = "ratelimit";

/// Session storage in the `session` namespace
#[derive(Debug, Clone)]
pub struct SessionCache {
    cache: Cache,
    ttl: Duration,
}

impl SessionCache {
    pub fn new(cache: Cache, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    fn options(&self) -> CacheOptions {
        CacheOptions::in_namespace(SESSION_NAMESPACE).ttl(self.ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get<T: DeserializeOwned>(&self, session_id: &str) -> Option<T> {
        self.cache.get(session_id, &self.options()).await
    }

    pub async fn set<T: Serialize + ?Sized>(&self, session_id: &str, data: &T) -> bool {
        self.cache.set(session_id, data, &self.options()).await
    }

    pub async fn delete(&self, session_id: &str) -> bool {
        self.cache.delete(session_id, &self.options()).await
    }

    /// Drop every session; returns the number removed
    pub async fn clear_all(&self) -> u64 {
        self.cache.delete_pattern("*", Some(SESSION_NAMESPACE)).await
    }
}

/// Simple hit counters in the `ratelimit` namespace
///
/// Counts live for `window` from the first hit. For enforcement with a result
/// shape use [`crate::rate_limit::RateLimiter`]; this is the lightweight
/// counter behind ad hoc quotas.
#[derive(Debug, Clone)]
pub struct RateLimitCounter {
    cache: Cache,
}

impl RateLimitCounter {
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    /// Record a hit for `key`; `None` if the store failed
    pub async fn hit(&self, key: &str, window: Duration) -> Option<i64> {
        let options = CacheOptions::in_namespace(RATE_LIMIT_NAMESPACE).ttl(window);
        self.cache.increment(key, &options).await
    }

    /// Hits recorded for `key` in the current window
    pub async fn count(&self, key: &str) -> i64 {
        self.cache
            .get::<i64>(key, &CacheOptions::in_namespace(RATE_LIMIT_NAMESPACE))
            .await
            .unwrap_or(0)
    }

    /// Whether `key` has reached `limit` hits
    pub async fn is_exceeded(&self, key: &str, limit: i64) -> bool {
        self.count(key).await >= limit
    }

    pub async fn reset(&self, key: &str) -> bool {
        self.cache
            .delete(key, &CacheOptions::in_namespace(RATE_LIMIT_NAMESPACE))
            .await
    }
}
