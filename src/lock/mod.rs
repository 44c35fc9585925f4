//! # Distributed Lock
//!
//! Mutual exclusion across processes through the shared key-value store.
//!
//! A lock is a store key (`{prefix}:{name}`) holding a unique token with a TTL.
//! Acquisition is an atomic set-if-absent; release and extension go through
//! [`KeyValueStore::compare_and_delete`] and
//! [`KeyValueStore::compare_and_expire`] so a holder whose lock expired and was
//! re-acquired elsewhere can never release or extend the new holder's lock.
//!
//! All operations are non-blocking. Store failures are logged and reported as
//! "not acquired" / "not released": locking fails closed.

use crate::store::{KeyValueStore, StoreError, StoreResult};
use chrono::Utc;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Proof of lock ownership returned by [`DistributedLock::acquire`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// Fresh token: acquisition timestamp plus a random suffix
    fn generate() -> Self {
        Self(format!(
            "{}-{}",
            Utc::now().timestamp_millis(),
            Uuid::new_v4().simple()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LockToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn log_lock_failure(operation: &str, lock_name: &str, error: &StoreError) {
    error!(
        component = "lock",
        operation = operation,
        lock = lock_name,
        error = %error,
        "lock operation failed"
    );
}

/// Store-backed distributed lock
#[derive(Debug, Clone)]
pub struct DistributedLock {
    store: Arc<dyn KeyValueStore>,
    key_prefix: String,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KeyValueStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
        }
    }

    fn lock_key(&self, lock_name: &str) -> String {
        format!("{}:{}", self.key_prefix, lock_name)
    }

    /// Try to take the lock; `None` on contention or store failure
    pub async fn acquire(&self, lock_name: &str, ttl: Duration) -> Option<LockToken> {
        match self.try_acquire(lock_name, ttl).await {
            Ok(token) => token,
            Err(e) => {
                log_lock_failure("acquire", lock_name, &e);
                None
            }
        }
    }

    /// Try to take the lock, surfacing store errors
    pub async fn try_acquire(&self, lock_name: &str, ttl: Duration) -> StoreResult<Option<LockToken>> {
        let token = LockToken::generate();
        let acquired = self
            .store
            .set_nx_ex(&self.lock_key(lock_name), token.as_str(), ttl)
            .await?;

        if acquired {
            debug!(lock = lock_name, ttl_ms = ttl.as_millis() as u64, "Lock acquired");
            Ok(Some(token))
        } else {
            debug!(lock = lock_name, "Lock held by another owner");
            Ok(None)
        }
    }

    /// Release the lock if `token` still owns it
    ///
    /// Returns `false` for a foreign or expired token, and on store failure.
    pub async fn release(&self, lock_name: &str, token: &LockToken) -> bool {
        match self
            .store
            .compare_and_delete(&self.lock_key(lock_name), token.as_str())
            .await
        {
            Ok(released) => {
                debug!(lock = lock_name, released = released, "Lock release");
                released
            }
            Err(e) => {
                log_lock_failure("release", lock_name, &e);
                false
            }
        }
    }

    /// Refresh the lock's TTL if `token` still owns it
    pub async fn extend(&self, lock_name: &str, token: &LockToken, ttl: Duration) -> bool {
        match self
            .store
            .compare_and_expire(&self.lock_key(lock_name), token.as_str(), ttl)
            .await
        {
            Ok(extended) => {
                debug!(lock = lock_name, extended = extended, "Lock extend");
                extended
            }
            Err(e) => {
                log_lock_failure("extend", lock_name, &e);
                false
            }
        }
    }

    /// Whether any owner currently holds the lock
    pub async fn is_locked(&self, lock_name: &str) -> bool {
        match self.store.exists(&self.lock_key(lock_name)).await {
            Ok(held) => held,
            Err(e) => {
                log_lock_failure("exists", lock_name, &e);
                false
            }
        }
    }

    /// Acquire, run `operation`, release
    ///
    /// Returns `None` without running `operation` when the lock is contended
    /// or the store is unavailable. The lock is released even if the
    /// operation's output is an error value.
    pub async fn with_lock<F, Fut, T>(&self, lock_name: &str, ttl: Duration, operation: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let token = self.acquire(lock_name, ttl).await?;
        let output = operation().await;
        if !self.release(lock_name, &token).await {
            warn!(
                lock = lock_name,
                "Lock expired before the critical section finished"
            );
        }
        Some(output)
    }
}
