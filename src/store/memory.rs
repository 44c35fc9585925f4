//! In-memory store backend
//!
//! Single-process implementation of the [`KeyValueStore`] contract with lazy
//! TTL expiry. Every operation runs under one mutex, which gives the same
//! atomicity guarantees Redis gives a single command or script.
//!
//! Used by unit and integration tests, and by single-process deployments that
//! have no Redis. [`InMemoryStore::set_available`] simulates an outage so the
//! fail-open and fail-closed paths of higher layers can be exercised.

use super::{effective_ttl, KeyPattern, KeyTtl, KeyValueStore, StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
enum StoredValue {
    Text(String),
    SortedSet(Vec<(String, f64)>),
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// TTL-aware in-process key-value store
#[derive(Debug)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, StoredEntry>>,
    available: AtomicBool,
    commands: AtomicU64,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            commands: AtomicU64::new(0),
        }
    }

    /// Toggle simulated availability; while unavailable every command fails
    /// with [`StoreError::Unavailable`]
    pub fn set_available(&self, available: bool) {
        debug!(available = available, "In-memory store availability changed");
        self.available.store(available, Ordering::Release);
    }

    /// Number of commands served (including failed ones)
    pub fn command_count(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    /// Number of live (non-expired) keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    /// Whether the store holds no live keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self, operation: &str) -> StoreResult<()> {
        self.commands.fetch_add(1, Ordering::Relaxed);
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!(
                "in-memory store offline during {operation}"
            )))
        }
    }

    /// Purge expired entries, then run `f` with the lock held
    fn with_live_entries<R>(
        &self,
        f: impl FnOnce(&mut HashMap<String, StoredEntry>, Instant) -> R,
    ) -> R {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));
        f(&mut entries, now)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_type(operation: &str) -> StoreError {
    StoreError::command(
        operation,
        "WRONGTYPE Operation against a key holding the wrong kind of value",
    )
}

fn increment<'a>(
    entries: &'a mut HashMap<String, StoredEntry>,
    key: &str,
) -> StoreResult<(i64, &'a mut StoredEntry)> {
    let entry = entries.entry(key.to_string()).or_insert(StoredEntry {
        value: StoredValue::Text("0".to_string()),
        expires_at: None,
    });
    let StoredValue::Text(text) = &mut entry.value else {
        return Err(wrong_type("INCR"));
    };
    let current: i64 = text
        .parse()
        .map_err(|_| StoreError::command("INCR", "value is not an integer or out of range"))?;
    let next = current + 1;
    *text = next.to_string();
    Ok((next, entry))
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_available("GET")?;
        self.with_live_entries(|entries, _| match entries.get(key) {
            None => Ok(None),
            Some(StoredEntry {
                value: StoredValue::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => Err(wrong_type("GET")),
        })
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.check_available("SETEX")?;
        self.with_live_entries(|entries, now| {
            entries.insert(
                key.to_string(),
                StoredEntry {
                    value: StoredValue::Text(value.to_string()),
                    expires_at: Some(now + effective_ttl(ttl)),
                },
            );
            Ok(())
        })
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.check_available("SET NX")?;
        self.with_live_entries(|entries, now| {
            if entries.contains_key(key) {
                return Ok(false);
            }
            entries.insert(
                key.to_string(),
                StoredEntry {
                    value: StoredValue::Text(value.to_string()),
                    expires_at: Some(now + effective_ttl(ttl)),
                },
            );
            Ok(true)
        })
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        self.check_available("DEL")?;
        self.with_live_entries(|entries, _| {
            Ok(keys
                .iter()
                .filter(|key| entries.remove(key.as_str()).is_some())
                .count() as u64)
        })
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check_available("EXISTS")?;
        self.with_live_entries(|entries, _| Ok(entries.contains_key(key)))
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        self.check_available("TTL")?;
        self.with_live_entries(|entries, now| {
            Ok(match entries.get(key) {
                None => KeyTtl::Missing,
                Some(StoredEntry {
                    expires_at: None, ..
                }) => KeyTtl::Persistent,
                Some(StoredEntry {
                    expires_at: Some(at),
                    ..
                }) => KeyTtl::Expires(at.saturating_duration_since(now)),
            })
        })
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.check_available("KEYS")?;
        let matcher = KeyPattern::new(pattern);
        self.with_live_entries(|entries, _| {
            let mut matched: Vec<String> = entries
                .keys()
                .filter(|key| matcher.matches(key))
                .cloned()
                .collect();
            matched.sort();
            Ok(matched)
        })
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        self.check_available("INCR")?;
        self.with_live_entries(|entries, _| increment(entries, key).map(|(count, _)| count))
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> StoreResult<i64> {
        self.check_available("INCR EXPIRE")?;
        self.with_live_entries(|entries, now| {
            let (count, entry) = increment(entries, key)?;
            if entry.expires_at.is_none() {
                entry.expires_at = Some(now + effective_ttl(ttl));
            }
            Ok(count)
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.check_available("EXPIRE")?;
        self.with_live_entries(|entries, now| match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(now + effective_ttl(ttl));
                Ok(true)
            }
            None => Ok(false),
        })
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> StoreResult<()> {
        self.check_available("ZADD")?;
        self.with_live_entries(|entries, _| {
            let entry = entries.entry(key.to_string()).or_insert(StoredEntry {
                value: StoredValue::SortedSet(Vec::new()),
                expires_at: None,
            });
            match &mut entry.value {
                StoredValue::SortedSet(members) => {
                    members.retain(|(existing, _)| existing != member);
                    let position = members
                        .iter()
                        .position(|(existing, s)| {
                            *s > score || (*s == score && existing.as_str() > member)
                        })
                        .unwrap_or(members.len());
                    members.insert(position, (member.to_string(), score));
                    Ok(())
                }
                StoredValue::Text(_) => Err(wrong_type("ZADD")),
            }
        })
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<u64> {
        self.check_available("ZREMRANGEBYSCORE")?;
        self.with_live_entries(|entries, _| {
            let Some(entry) = entries.get_mut(key) else {
                return Ok(0);
            };
            let StoredValue::SortedSet(members) = &mut entry.value else {
                return Err(wrong_type("ZREMRANGEBYSCORE"));
            };
            let before = members.len();
            members.retain(|(_, score)| *score < min || *score > max);
            let removed = (before - members.len()) as u64;
            if members.is_empty() {
                entries.remove(key);
            }
            Ok(removed)
        })
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        self.check_available("ZCARD")?;
        self.with_live_entries(|entries, _| match entries.get(key) {
            None => Ok(0),
            Some(StoredEntry {
                value: StoredValue::SortedSet(members),
                ..
            }) => Ok(members.len() as u64),
            Some(_) => Err(wrong_type("ZCARD")),
        })
    }

    async fn zrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> StoreResult<Vec<(String, f64)>> {
        self.check_available("ZRANGE")?;
        self.with_live_entries(|entries, _| {
            let members = match entries.get(key) {
                None => return Ok(Vec::new()),
                Some(StoredEntry {
                    value: StoredValue::SortedSet(members),
                    ..
                }) => members,
                Some(_) => return Err(wrong_type("ZRANGE")),
            };
            let len = members.len() as isize;
            let normalize = |index: isize| if index < 0 { len + index } else { index };
            let start = normalize(start).max(0);
            let stop = normalize(stop).min(len - 1);
            if start > stop || start >= len {
                return Ok(Vec::new());
            }
            Ok(members[start as usize..=stop as usize].to_vec())
        })
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        self.check_available("EVAL compare_and_delete")?;
        self.with_live_entries(|entries, _| match entries.get(key) {
            Some(StoredEntry {
                value: StoredValue::Text(current),
                ..
            }) if current == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        self.check_available("EVAL compare_and_expire")?;
        self.with_live_entries(|entries, now| match entries.get_mut(key) {
            Some(entry) if matches!(&entry.value, StoredValue::Text(current) if current == expected) =>
            {
                entry.expires_at = Some(now + effective_ttl(ttl));
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    async fn ping(&self) -> StoreResult<bool> {
        self.check_available("PING")?;
        Ok(true)
    }

    async fn close(&self) -> StoreResult<()> {
        self.entries.lock().clear();
        debug!("In-memory store closed");
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_and_expiry() {
        let store = InMemoryStore::new();
        store
            .set_ex("greeting", "hello", Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(store.get("greeting").await.unwrap(), Some("hello".to_string()));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(store.get("greeting").await.unwrap(), None);
        assert_eq!(store.ttl("greeting").await.unwrap(), KeyTtl::Missing);
    }

    #[tokio::test]
    async fn test_set_nx_only_writes_once() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(10);
        assert!(store.set_nx_ex("lock:a", "one", ttl).await.unwrap());
        assert!(!store.set_nx_ex("lock:a", "two", ttl).await.unwrap());
        assert_eq!(store.get("lock:a").await.unwrap(), Some("one".to_string()));
    }

    #[tokio::test]
    async fn test_incr_and_expire() {
        let store = InMemoryStore::new();
        assert_eq!(store.incr("counter").await.unwrap(), 1);
        assert_eq!(store.incr("counter").await.unwrap(), 2);
        assert_eq!(store.ttl("counter").await.unwrap(), KeyTtl::Persistent);
        assert!(store.expire("counter", Duration::from_secs(5)).await.unwrap());
        assert!(matches!(
            store.ttl("counter").await.unwrap(),
            KeyTtl::Expires(_)
        ));
        assert!(!store.expire("missing", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_incr_with_expiry_arms_persistent_counter() {
        let store = InMemoryStore::new();
        assert_eq!(store.incr("counter").await.unwrap(), 1);
        assert_eq!(store.ttl("counter").await.unwrap(), KeyTtl::Persistent);

        assert_eq!(
            store
                .incr_with_expiry("counter", Duration::from_millis(40))
                .await
                .unwrap(),
            2
        );
        let armed = store.ttl("counter").await.unwrap();
        assert!(matches!(armed, KeyTtl::Expires(_)));

        // An existing expiry is left alone
        store
            .incr_with_expiry("counter", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(store.ttl("counter").await.unwrap().remaining().unwrap() <= Duration::from_millis(40));

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert_eq!(store.get("counter").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_floored_like_redis() {
        let store = InMemoryStore::new();
        assert!(store.set_nx_ex("lock:zero", "a", Duration::ZERO).await.unwrap());
        assert!(!store.set_nx_ex("lock:zero", "b", Duration::ZERO).await.unwrap());
        assert!(matches!(
            store.ttl("lock:zero").await.unwrap(),
            KeyTtl::Expires(left) if left > Duration::from_millis(500)
        ));

        store.set_ex("plain", "v", Duration::ZERO).await.unwrap();
        assert_eq!(store.get("plain").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_incr_rejects_non_integer() {
        let store = InMemoryStore::new();
        store
            .set_ex("word", "abc", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(matches!(
            store.incr("word").await,
            Err(StoreError::Command { .. })
        ));
    }

    #[tokio::test]
    async fn test_sorted_set_operations() {
        let store = InMemoryStore::new();
        store.zadd("window", 30.0, "c").await.unwrap();
        store.zadd("window", 10.0, "a").await.unwrap();
        store.zadd("window", 20.0, "b").await.unwrap();

        assert_eq!(store.zcard("window").await.unwrap(), 3);
        let oldest = store.zrange_with_scores("window", 0, 0).await.unwrap();
        assert_eq!(oldest, vec![("a".to_string(), 10.0)]);

        let removed = store.zrem_range_by_score("window", 0.0, 20.0).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.zcard("window").await.unwrap(), 1);

        let all = store.zrange_with_scores("window", 0, -1).await.unwrap();
        assert_eq!(all, vec![("c".to_string(), 30.0)]);
    }

    #[tokio::test]
    async fn test_keys_and_bulk_delete() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(10);
        for key in ["app:user:1", "app:user:2", "app:session:1"] {
            store.set_ex(key, "v", ttl).await.unwrap();
        }

        let users = store.keys("app:user:*").await.unwrap();
        assert_eq!(users, vec!["app:user:1".to_string(), "app:user:2".to_string()]);

        assert_eq!(store.del(&users).await.unwrap(), 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_compare_and_delete_checks_ownership() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(10);
        store.set_nx_ex("lock:job", "token-a", ttl).await.unwrap();

        assert!(!store.compare_and_delete("lock:job", "token-b").await.unwrap());
        assert!(store.exists("lock:job").await.unwrap());

        assert!(store.compare_and_delete("lock:job", "token-a").await.unwrap());
        assert!(!store.exists("lock:job").await.unwrap());
    }

    #[tokio::test]
    async fn test_compare_and_expire_checks_ownership() {
        let store = InMemoryStore::new();
        store
            .set_nx_ex("lock:job", "token-a", Duration::from_millis(50))
            .await
            .unwrap();

        assert!(!store
            .compare_and_expire("lock:job", "token-b", Duration::from_secs(10))
            .await
            .unwrap());
        assert!(store
            .compare_and_expire("lock:job", "token-a", Duration::from_secs(10))
            .await
            .unwrap());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(store.exists("lock:job").await.unwrap());
    }

    #[tokio::test]
    async fn test_simulated_outage() {
        let store = InMemoryStore::new();
        store.set_available(false);
        assert!(matches!(
            store.get("anything").await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_available(true);
        assert!(store.ping().await.unwrap());
        assert_eq!(store.command_count(), 2);
    }
}
