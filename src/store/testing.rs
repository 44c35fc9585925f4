//! Store wrappers for exercising partial-failure paths in unit tests

use super::{InMemoryStore, KeyTtl, KeyValueStore, StoreError, StoreResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// [`InMemoryStore`] whose first `n` `EXPIRE` commands fail
///
/// Relies on the trait's default `incr_with_expiry`, so it models a backend
/// that sends `INCR` and `EXPIRE` as separate commands.
#[derive(Debug)]
pub(crate) struct ExpireFailingStore {
    inner: InMemoryStore,
    failures_left: AtomicUsize,
}

impl ExpireFailingStore {
    pub(crate) fn failing_first(n: usize) -> Self {
        Self {
            inner: InMemoryStore::new(),
            failures_left: AtomicUsize::new(n),
        }
    }
}

#[async_trait]
impl KeyValueStore for ExpireFailingStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.inner.set_ex(key, value, ttl).await
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.inner.set_nx_ex(key, value, ttl).await
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        self.inner.del(keys).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key).await
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        self.inner.ttl(key).await
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.inner.keys(pattern).await
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        self.inner.incr(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let failed = self
            .failures_left
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::Timeout("EXPIRE timed out".to_string()));
        }
        self.inner.expire(key, ttl).await
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> StoreResult<()> {
        self.inner.zadd(key, score, member).await
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<u64> {
        self.inner.zrem_range_by_score(key, min, max).await
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        self.inner.zcard(key).await
    }

    async fn zrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> StoreResult<Vec<(String, f64)>> {
        self.inner.zrange_with_scores(key, start, stop).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        self.inner.compare_and_delete(key, expected).await
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        self.inner.compare_and_expire(key, expected, ttl).await
    }

    async fn ping(&self) -> StoreResult<bool> {
        self.inner.ping().await
    }

    async fn close(&self) -> StoreResult<()> {
        self.inner.close().await
    }

    fn provider_name(&self) -> &'static str {
        "expire-failing"
    }
}
