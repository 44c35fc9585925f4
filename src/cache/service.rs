//! Store-backed cache
//!
//! Values are JSON-encoded, except strings which are stored as-is. Reads try
//! JSON first and fall back to treating the raw payload as a string, so values
//! written by other clients as plain text stay readable.

use super::errors::{CacheError, CacheResult};
use super::options::CacheOptions;
use super::revalidation::{RevalidationEvent, Revalidator};
use crate::config::CacheSettings;
use crate::logging::log_store_failure;
use crate::store::{KeyTtl, KeyValueStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// TTL applied when neither the call nor the cache overrides it
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

fn encode<T: Serialize + ?Sized>(value: &T) -> CacheResult<String> {
    match serde_json::to_value(value)? {
        Value::String(raw) => Ok(raw),
        other => Ok(other.to_string()),
    }
}

fn decode<T: DeserializeOwned>(raw: &str) -> CacheResult<T> {
    serde_json::from_str(raw)
        .or_else(|_| serde_json::from_value(Value::String(raw.to_string())))
        .map_err(CacheError::from)
}

/// Log a swallowed cache error; payload errors are not store outages
fn log_cache_failure(operation: &str, key: &str, error: &CacheError) {
    match error {
        CacheError::SerializationError(reason) => warn!(
            component = "cache",
            operation = operation,
            key = key,
            error = %reason,
            "Cache payload could not be converted"
        ),
        CacheError::Store(store_error) => log_store_failure("cache", operation, key, store_error),
    }
}

/// Cache-aside cache over a [`KeyValueStore`]
///
/// Keys are built as `prefix[:namespace]:key`. Cloning is cheap; clones share
/// the store and the revalidation state.
///
/// The plain operations (`get`, `set`, `delete`, ...) fail open: store errors
/// are logged and reported as a miss or `false`. The `try_*` variants return
/// the error instead.
#[derive(Debug, Clone)]
pub struct Cache {
    store: Arc<dyn KeyValueStore>,
    key_prefix: Arc<str>,
    default_ttl: Duration,
    revalidator: Arc<Revalidator>,
}

impl Cache {
    pub fn new(store: Arc<dyn KeyValueStore>, key_prefix: impl Into<String>, default_ttl: Duration) -> Self {
        Self {
            store,
            key_prefix: Arc::from(key_prefix.into()),
            default_ttl,
            revalidator: Arc::new(Revalidator::new()),
        }
    }

    pub fn from_settings(store: Arc<dyn KeyValueStore>, settings: &CacheSettings) -> Self {
        Self::new(store, settings.key_prefix.clone(), settings.default_ttl())
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Full store key for `key` in `namespace`
    pub fn build_key(&self, key: &str, namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) if !ns.is_empty() => format!("{}:{}:{}", self.key_prefix, ns, key),
            _ => format!("{}:{}", self.key_prefix, key),
        }
    }

    fn full_key(&self, key: &str, options: &CacheOptions) -> String {
        self.build_key(key, options.namespace.as_deref())
    }

    fn ttl_for(&self, options: &CacheOptions) -> Duration {
        options.ttl.unwrap_or(self.default_ttl)
    }

    /// Receive outcomes of background refreshes started by
    /// [`Self::get_or_set_stale`]
    pub fn subscribe_revalidations(&self) -> broadcast::Receiver<RevalidationEvent> {
        self.revalidator.subscribe()
    }

    /// Whether a background refresh is running for `key`
    pub fn is_revalidating(&self, key: &str, options: &CacheOptions) -> bool {
        self.revalidator.is_in_flight(&self.full_key(key, options))
    }

    /// Cached value for `key`, or `None` on miss or failure
    pub async fn get<T: DeserializeOwned>(&self, key: &str, options: &CacheOptions) -> Option<T> {
        match self.try_get(key, options).await {
            Ok(value) => value,
            Err(e) => {
                log_cache_failure("get", &self.full_key(key, options), &e);
                None
            }
        }
    }

    /// Cached value for `key`
    ///
    /// With `stale_while_revalidate` set, an entry whose remaining TTL is under
    /// the window is logged as stale and still returned.
    pub async fn try_get<T: DeserializeOwned>(&self, key: &str, options: &CacheOptions) -> CacheResult<Option<T>> {
        let full_key = self.full_key(key, options);
        let Some(raw) = self.store.get(&full_key).await? else {
            debug!(key = %full_key, "Cache miss");
            return Ok(None);
        };

        if let Some(window) = options.stale_while_revalidate {
            let ttl = self.store.ttl(&full_key).await?;
            if is_stale(ttl, window) {
                debug!(
                    key = %full_key,
                    window_seconds = window.as_secs(),
                    "Cache hit within stale window"
                );
            }
        } else {
            debug!(key = %full_key, "Cache hit");
        }

        decode(&raw).map(Some)
    }

    /// Store `value` under `key`; `false` on failure
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, options: &CacheOptions) -> bool {
        match self.try_set(key, value, options).await {
            Ok(()) => true,
            Err(e) => {
                log_cache_failure("set", &self.full_key(key, options), &e);
                false
            }
        }
    }

    pub async fn try_set<T: Serialize + ?Sized>(&self, key: &str, value: &T, options: &CacheOptions) -> CacheResult<()> {
        let payload = encode(value)?;
        self.write(&self.full_key(key, options), &payload, self.ttl_for(options))
            .await
    }

    /// Store an encoded payload
    async fn write(&self, full_key: &str, payload: &str, ttl: Duration) -> CacheResult<()> {
        self.store.set_ex(full_key, payload, ttl).await?;
        debug!(key = %full_key, ttl_seconds = ttl.as_secs(), "Cache set");
        Ok(())
    }

    /// Remove `key`; `true` if an entry was removed
    pub async fn delete(&self, key: &str, options: &CacheOptions) -> bool {
        let full_key = self.full_key(key, options);
        match self.store.del(std::slice::from_ref(&full_key)).await {
            Ok(removed) => removed > 0,
            Err(e) => {
                log_store_failure("cache", "delete", &full_key, &e);
                false
            }
        }
    }

    /// Remove every key matching the glob `pattern` in `namespace`
    ///
    /// Returns the number removed; `0` on no matches or failure.
    pub async fn delete_pattern(&self, pattern: &str, namespace: Option<&str>) -> u64 {
        match self.try_delete_pattern(pattern, namespace).await {
            Ok(removed) => removed,
            Err(e) => {
                log_cache_failure("delete_pattern", &self.build_key(pattern, namespace), &e);
                0
            }
        }
    }

    pub async fn try_delete_pattern(&self, pattern: &str, namespace: Option<&str>) -> CacheResult<u64> {
        let full_pattern = self.build_key(pattern, namespace);
        let keys = self.store.keys(&full_pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = self.store.del(&keys).await?;
        debug!(pattern = %full_pattern, removed = removed, "Cache pattern delete");
        Ok(removed)
    }

    pub async fn exists(&self, key: &str, options: &CacheOptions) -> bool {
        let full_key = self.full_key(key, options);
        match self.store.exists(&full_key).await {
            Ok(found) => found,
            Err(e) => {
                log_store_failure("cache", "exists", &full_key, &e);
                false
            }
        }
    }

    /// Cache-aside read
    ///
    /// Returns the cached value if present; otherwise awaits `fetch`, stores
    /// its result and returns it. Fetch errors are returned unchanged and
    /// nothing is cached.
    pub async fn get_or_set<T, F, Fut, E>(&self, key: &str, fetch: F, options: &CacheOptions) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get::<T>(key, options).await {
            return Ok(cached);
        }
        let value = fetch().await?;
        self.set(key, &value, options).await;
        Ok(value)
    }

    /// Stale-while-revalidate read
    ///
    /// On a hit whose remaining TTL is under `options.stale_while_revalidate`,
    /// the cached value is returned immediately and `fetch` runs in a spawned
    /// task that rewrites the entry. On a miss `fetch` runs inline and its
    /// result is cached. If the store fails, `fetch` is called directly and
    /// nothing is cached.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn get_or_set_stale<T, F, Fut, E>(&self, key: &str, fetch: F, options: &CacheOptions) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let full_key = self.full_key(key, options);
        let ttl = self.ttl_for(options);

        let cached = match self.lookup::<T>(&full_key).await {
            Ok(cached) => cached,
            Err(e) => {
                log_cache_failure("get_or_set_stale", &full_key, &e);
                return fetch().await;
            }
        };

        match cached {
            Some((value, remaining)) => {
                let window = options.stale_while_revalidate.unwrap_or(Duration::ZERO);
                if is_stale(remaining, window) {
                    self.spawn_refresh(full_key, fetch, ttl);
                } else {
                    debug!(key = %full_key, "Cache hit");
                }
                Ok(value)
            }
            None => {
                let value = fetch().await?;
                let encoded = encode(&value);
                let written = match encoded {
                    Ok(payload) => self.write(&full_key, &payload, ttl).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    log_cache_failure("set", &full_key, &e);
                }
                Ok(value)
            }
        }
    }

    /// Decoded value and remaining TTL; undecodable entries count as a miss
    async fn lookup<T: DeserializeOwned>(&self, full_key: &str) -> CacheResult<Option<(T, KeyTtl)>> {
        let Some(raw) = self.store.get(full_key).await? else {
            debug!(key = %full_key, "Cache miss");
            return Ok(None);
        };
        let value = match decode(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %full_key, error = %e, "Discarding undecodable cache entry");
                return Ok(None);
            }
        };
        let remaining = self.store.ttl(full_key).await?;
        Ok(Some((value, remaining)))
    }

    fn spawn_refresh<T, F, Fut, E>(&self, full_key: String, fetch: F, ttl: Duration)
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let Some(slot) = self.revalidator.begin(&full_key) else {
            debug!(key = %full_key, "Revalidation already in flight");
            return;
        };
        debug!(key = %full_key, "Stale cache entry, refreshing in background");

        let cache = self.clone();
        tokio::spawn(async move {
            let event = match fetch().await.map(|value| encode(&value)) {
                Ok(encoded) => match cache.write_encoded(&full_key, encoded, ttl).await {
                    Ok(()) => RevalidationEvent::Refreshed { key: full_key },
                    Err(e) => {
                        warn!(key = %full_key, error = %e, "Background revalidation write failed");
                        RevalidationEvent::Failed {
                            key: full_key,
                            error: e.to_string(),
                        }
                    }
                },
                Err(e) => {
                    warn!(key = %full_key, error = %e, "Background revalidation fetch failed");
                    RevalidationEvent::Failed {
                        key: full_key,
                        error: e.to_string(),
                    }
                }
            };
            drop(slot);
            cache.revalidator.publish(event);
        });
    }

    async fn write_encoded(&self, full_key: &str, encoded: CacheResult<String>, ttl: Duration) -> CacheResult<()> {
        self.write(full_key, &encoded?, ttl).await
    }

    /// Increment the counter at `key`, starting its TTL on first increment
    pub async fn increment(&self, key: &str, options: &CacheOptions) -> Option<i64> {
        match self.try_increment(key, options).await {
            Ok(count) => Some(count),
            Err(e) => {
                log_cache_failure("increment", &self.full_key(key, options), &e);
                None
            }
        }
    }

    pub async fn try_increment(&self, key: &str, options: &CacheOptions) -> CacheResult<i64> {
        let full_key = self.full_key(key, options);
        Ok(self
            .store
            .incr_with_expiry(&full_key, self.ttl_for(options))
            .await?)
    }
}

fn is_stale(remaining: KeyTtl, window: Duration) -> bool {
    matches!(remaining, KeyTtl::Expires(left) if left < window)
}
