//! # Key-Value Store Adapter
//!
//! Thin async contract over a Redis-like key-value store. Every higher-level
//! component (rate limiter, cache, distributed lock, warm-up scheduler) talks to
//! the store exclusively through [`KeyValueStore`], so a process shares one
//! connection and tests can substitute [`InMemoryStore`].
//!
//! ## Architecture
//!
//! ```text
//! Arc<dyn KeyValueStore>
//!   ├── RedisStore      <- ConnectionManager, lazily connected, closeable
//!   └── InMemoryStore   <- TTL-aware fake with outage simulation
//! ```
//!
//! Ownership-checked mutations (lock release/extend) are expressed as
//! [`KeyValueStore::compare_and_delete`] and [`KeyValueStore::compare_and_expire`];
//! each backend implements them with whatever atomic primitive it has.

pub mod errors;
pub mod memory;

#[cfg(feature = "cache-redis")]
pub mod redis;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

pub use errors::{StoreError, StoreResult};
pub use memory::InMemoryStore;

#[cfg(feature = "cache-redis")]
pub use self::redis::RedisStore;

/// Remaining lifetime of a key as reported by `TTL`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist (`TTL` = -2)
    Missing,
    /// Key exists without an expiry (`TTL` = -1)
    Persistent,
    /// Key expires after the given duration
    Expires(Duration),
}

impl KeyTtl {
    /// Decode the integer reply of a `TTL` command
    pub fn from_seconds(seconds: i64) -> Self {
        match seconds {
            -2 => KeyTtl::Missing,
            s if s < 0 => KeyTtl::Persistent,
            s => KeyTtl::Expires(Duration::from_secs(s as u64)),
        }
    }

    /// Remaining duration, if the key has one
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            KeyTtl::Expires(d) => Some(*d),
            _ => None,
        }
    }
}

/// Async key-value store contract (Redis semantics)
///
/// Implementations must make `set_nx_ex`, `compare_and_delete` and
/// `compare_and_expire` atomic with respect to concurrent callers in other
/// processes.
#[async_trait]
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    /// `GET key`
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// `SETEX key ttl value`
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// `SET key value PX ttl NX`; returns `true` when the key was written
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// `DEL key...`; returns the number of keys removed
    async fn del(&self, keys: &[String]) -> StoreResult<u64>;

    /// `EXISTS key`
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// `TTL key`
    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl>;

    /// Enumerate keys matching a glob pattern
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// `INCR key`
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// `EXPIRE key ttl`; returns `false` when the key does not exist
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// `INCR key`, giving the counter `ttl` whenever it has no expiry
    ///
    /// This default issues separate commands and re-arms the TTL on any call
    /// that finds the counter persistent, so an `EXPIRE` lost after the first
    /// increment is repaired by the next one. Backends with an atomic
    /// primitive override it.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> StoreResult<i64> {
        let count = self.incr(key).await?;
        if count == 1 || self.ttl(key).await? == KeyTtl::Persistent {
            self.expire(key, ttl).await?;
        }
        Ok(count)
    }

    /// `ZADD key score member`
    async fn zadd(&self, key: &str, score: f64, member: &str) -> StoreResult<()>;

    /// `ZREMRANGEBYSCORE key min max`
    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<u64>;

    /// `ZCARD key`
    async fn zcard(&self, key: &str) -> StoreResult<u64>;

    /// `ZRANGE key start stop WITHSCORES`
    async fn zrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> StoreResult<Vec<(String, f64)>>;

    /// Atomically delete `key` only if its value equals `expected`
    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool>;

    /// Atomically refresh the TTL of `key` only if its value equals `expected`
    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> StoreResult<bool>;

    /// Check the backend is reachable
    async fn ping(&self) -> StoreResult<bool>;

    /// Release the underlying connection
    async fn close(&self) -> StoreResult<()>;

    /// Name of the backend for logging
    fn provider_name(&self) -> &'static str;
}

/// Floor applied to a zero TTL by every backend
pub const MIN_TTL: Duration = Duration::from_secs(1);

/// `ttl`, or [`MIN_TTL`] when it is zero
pub(crate) fn effective_ttl(ttl: Duration) -> Duration {
    if ttl.is_zero() {
        MIN_TTL
    } else {
        ttl
    }
}

/// Key pattern with Redis `KEYS`/`SCAN MATCH` semantics for `*`, `?`,
/// `[...]` classes (including `[^...]`) and `\` escapes
///
/// Compiled once to a [`glob::Pattern`]. A pattern glob cannot express, such
/// as an unterminated class, matches only itself literally.
#[derive(Debug, Clone)]
pub(crate) enum KeyPattern {
    Glob(glob::Pattern),
    Literal(String),
}

impl KeyPattern {
    pub(crate) fn new(pattern: &str) -> Self {
        match glob::Pattern::new(&to_glob_syntax(pattern)) {
            Ok(compiled) => KeyPattern::Glob(compiled),
            Err(e) => {
                debug!(pattern = pattern, error = %e, "Key pattern matched literally");
                KeyPattern::Literal(pattern.to_string())
            }
        }
    }

    pub(crate) fn matches(&self, candidate: &str) -> bool {
        match self {
            KeyPattern::Glob(compiled) => compiled.matches(candidate),
            KeyPattern::Literal(literal) => literal == candidate,
        }
    }
}

/// Rewrite Redis glob syntax into `glob` crate syntax
fn to_glob_syntax(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut chars = pattern.chars().peekable();
    let mut in_class = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped @ ('*' | '?' | '[' | ']')) if !in_class => {
                    out.push('[');
                    out.push(escaped);
                    out.push(']');
                }
                Some(escaped) => out.push(escaped),
                None => out.push('\\'),
            },
            '[' if !in_class => {
                in_class = true;
                out.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    out.push('!');
                }
            }
            ']' if in_class => {
                in_class = false;
                out.push(']');
            }
            // `**` is a path-component wildcard in glob
            '*' if !in_class => {
                out.push('*');
                while chars.peek() == Some(&'*') {
                    chars.next();
                }
            }
            other => out.push(other),
        }
    }
    out
}
