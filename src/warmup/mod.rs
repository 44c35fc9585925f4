//! # Cache Warm-up
//!
//! Process-local registry of cache entries that should be populated ahead of
//! demand, executed on request or on a recurring schedule.
//!
//! Entries are keyed by `(key, namespace)`: registering the same pair again
//! replaces the earlier entry. Lower `priority` values run first. Entries are
//! not persisted; call sites re-register them at startup.
//!
//! A run processes entries in fixed-size parallel batches. One entry's failure
//! is counted and logged but never fails the batch or the run.

use crate::cache::{Cache, CacheOptions};
use crate::config::WarmupSettings;
use crate::logging::log_store_failure;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Type-erased fetcher producing the JSON value to cache
pub type WarmupFetch = Arc<dyn Fn() -> BoxFuture<'static, Result<serde_json::Value, BoxError>> + Send + Sync>;

pub const DEFAULT_PRIORITY: u8 = 5;

/// A registered warm-up target
#[derive(Clone)]
pub struct WarmupEntry {
    pub key: String,
    pub fetch: WarmupFetch,
    pub ttl: Option<Duration>,
    pub namespace: Option<String>,
    /// Lower runs first
    pub priority: u8,
}

impl WarmupEntry {
    pub fn new<F, Fut, T, E>(key: impl Into<String>, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let fetch: WarmupFetch = Arc::new(move || {
            let pending = fetch();
            async move {
                let value = pending.await.map_err(|e| -> BoxError { e.into() })?;
                serde_json::to_value(value).map_err(|e| Box::new(e) as BoxError)
            }
            .boxed()
        });
        Self {
            key: key.into(),
            fetch,
            ttl: None,
            namespace: None,
            priority: DEFAULT_PRIORITY,
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            ttl: self.ttl,
            namespace: self.namespace.clone(),
            stale_while_revalidate: None,
        }
    }

    fn same_target(&self, key: &str, namespace: Option<&str>) -> bool {
        self.key == key && self.namespace.as_deref() == namespace
    }
}

impl fmt::Debug for WarmupEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmupEntry")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("namespace", &self.namespace)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarmupOptions {
    /// Entries warmed concurrently per batch
    pub parallel: usize,
    /// Only run entries with `priority <= ceiling`
    pub priority_only: Option<u8>,
}

impl Default for WarmupOptions {
    fn default() -> Self {
        Self {
            parallel: 5,
            priority_only: None,
        }
    }
}

/// Outcome of one warm-up run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmupReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration: Duration,
}

/// Handle to a recurring warm-up started by [`CacheWarmupScheduler::schedule`]
#[derive(Debug)]
pub struct WarmupSchedule {
    cancel: Arc<watch::Sender<bool>>,
    handle: JoinHandle<()>,
}

impl WarmupSchedule {
    /// Stop the schedule; a run in progress finishes first
    pub fn cancel(&self) {
        // Err means the loop already exited
        let _ = self.cancel.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel and wait for the loop to exit
    pub async fn shutdown(self) {
        self.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Cache warmup schedule task ended abnormally");
        }
    }
}

/// Registry and runner for cache warm-up entries
#[derive(Debug, Clone)]
pub struct CacheWarmupScheduler {
    cache: Cache,
    settings: WarmupSettings,
    entries: Arc<Mutex<Vec<WarmupEntry>>>,
    schedules: Arc<Mutex<Vec<Arc<watch::Sender<bool>>>>>,
}

impl CacheWarmupScheduler {
    pub fn new(cache: Cache, settings: WarmupSettings) -> Self {
        Self {
            cache,
            settings,
            entries: Arc::new(Mutex::new(Vec::new())),
            schedules: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn settings(&self) -> &WarmupSettings {
        &self.settings
    }

    /// Add `entry`, replacing any entry with the same key and namespace
    pub fn register(&self, entry: WarmupEntry) {
        let mut entries = self.entries.lock();
        match entries
            .iter()
            .position(|existing| existing.same_target(&entry.key, entry.namespace.as_deref()))
        {
            Some(index) => {
                debug!(key = %entry.key, namespace = ?entry.namespace, "Replacing cache warmup entry");
                entries[index] = entry;
            }
            None => {
                debug!(
                    key = %entry.key,
                    namespace = ?entry.namespace,
                    priority = entry.priority,
                    "Registered cache warmup entry"
                );
                entries.push(entry);
            }
        }
    }

    /// Remove the entry for `key` in `namespace`; `true` if one was removed
    pub fn unregister(&self, key: &str, namespace: Option<&str>) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| !entry.same_target(key, namespace));
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Warm every matching entry once
    ///
    /// Returns an empty report without touching the store when warm-up is
    /// disabled.
    pub async fn execute(&self, options: WarmupOptions) -> WarmupReport {
        if !self.settings.enabled {
            debug!("Cache warmup disabled, skipping run");
            return WarmupReport::default();
        }

        let started = Instant::now();
        let mut selected: Vec<WarmupEntry> = self
            .entries
            .lock()
            .iter()
            .filter(|entry| options.priority_only.map_or(true, |ceiling| entry.priority <= ceiling))
            .cloned()
            .collect();
        selected.sort_by_key(|entry| entry.priority);

        let mut report = WarmupReport {
            total: selected.len(),
            ..WarmupReport::default()
        };

        for batch in selected.chunks(options.parallel.max(1)) {
            let outcomes = join_all(batch.iter().map(|entry| self.warm(entry))).await;
            for warmed in outcomes {
                if warmed {
                    report.succeeded += 1;
                } else {
                    report.failed += 1;
                }
            }
        }

        report.duration = started.elapsed();
        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            duration_ms = report.duration.as_millis() as u64,
            "Cache warmup completed"
        );
        report
    }

    async fn warm(&self, entry: &WarmupEntry) -> bool {
        let value = match (entry.fetch)().await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %entry.key, namespace = ?entry.namespace, error = %e, "Cache warmup fetch failed");
                return false;
            }
        };
        match self.cache.try_set(&entry.key, &value, &entry.cache_options()).await {
            Ok(()) => true,
            Err(e) => {
                log_store_failure("warmup", "set", &entry.key, &e);
                false
            }
        }
    }

    /// Run high-priority warm-ups every `interval`
    ///
    /// Each tick runs entries at or under the configured scheduled priority
    /// ceiling. Returns `None` when warm-up is disabled or `interval` is zero.
    /// Must be called from within a Tokio runtime.
    pub fn schedule(&self, interval: Duration) -> Option<WarmupSchedule> {
        if !self.settings.enabled {
            debug!("Cache warmup disabled, not scheduling");
            return None;
        }
        if interval.is_zero() {
            warn!("Cache warmup interval must be greater than zero, not scheduling");
            return None;
        }

        let (cancel, mut cancelled) = watch::channel(false);
        let cancel = Arc::new(cancel);
        {
            let mut schedules = self.schedules.lock();
            // Loops that exited dropped their receiver
            schedules.retain(|existing| !existing.is_closed() && !*existing.borrow());
            schedules.push(Arc::clone(&cancel));
        }

        let scheduler = self.clone();
        let options = WarmupOptions {
            parallel: self.settings.parallel,
            priority_only: Some(self.settings.scheduled_priority_ceiling),
        };

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    changed = cancelled.changed() => {
                        if changed.is_err() || *cancelled.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        scheduler.execute(options).await;
                    }
                }
            }
            info!("Cache warmup schedule stopped");
        });

        info!(
            interval_ms = interval.as_millis() as u64,
            priority_ceiling = self.settings.scheduled_priority_ceiling,
            "Cache warmup scheduled"
        );
        Some(WarmupSchedule { cancel, handle })
    }

    /// [`Self::schedule`] with the configured interval
    pub fn schedule_default(&self) -> Option<WarmupSchedule> {
        self.schedule(self.settings.interval())
    }

    /// Cancel every schedule started by this scheduler or its clones
    pub fn cancel_all(&self) {
        let mut schedules = self.schedules.lock();
        for cancel in schedules.drain(..) {
            let _ = cancel.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, KeyValueStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings(enabled: bool) -> WarmupSettings {
        WarmupSettings {
            enabled,
            ..WarmupSettings::default()
        }
    }

    fn scheduler(enabled: bool) -> (Arc<InMemoryStore>, CacheWarmupScheduler) {
        let store = Arc::new(InMemoryStore::new());
        let cache = Cache::new(store.clone(), "app", Duration::from_secs(300));
        (store, CacheWarmupScheduler::new(cache, settings(enabled)))
    }

    fn constant(value: serde_json::Value) -> WarmupEntry {
        WarmupEntry::new("unused", move || {
            let value = value.clone();
            async move { Ok::<_, String>(value) }
        })
    }

    #[tokio::test]
    async fn test_register_is_idempotent_per_key_and_namespace() {
        let (store, scheduler) = scheduler(true);

        scheduler.register(WarmupEntry {
            key: "stats".to_string(),
            ..constant(json!(1))
        });
        scheduler.register(WarmupEntry {
            key: "stats".to_string(),
            ..constant(json!(2))
        });
        scheduler.register(WarmupEntry {
            key: "stats".to_string(),
            ..constant(json!(3)).namespace("dashboard")
        });
        assert_eq!(scheduler.len(), 2);

        let report = scheduler.execute(WarmupOptions::default()).await;
        assert_eq!(report.total, 2);
        assert_eq!(report.succeeded, 2);
        assert_eq!(store.get("app:stats").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.get("app:dashboard:stats").await.unwrap().as_deref(), Some("3"));

        assert!(scheduler.unregister("stats", Some("dashboard")));
        assert!(!scheduler.unregister("stats", Some("dashboard")));
        assert_eq!(scheduler.len(), 1);
    }

    #[tokio::test]
    async fn test_failures_do_not_block_batch() {
        let (store, scheduler) = scheduler(true);

        scheduler.register(WarmupEntry::new("ok", || async { Ok::<_, String>(json!({"n": 1})) }));
        scheduler.register(WarmupEntry::new("broken", || async {
            Err::<serde_json::Value, _>("upstream 500".to_string())
        }));
        scheduler.register(WarmupEntry::new("also_ok", || async { Ok::<_, String>("text") }));

        let report = scheduler
            .execute(WarmupOptions {
                parallel: 2,
                priority_only: None,
            })
            .await;
        assert_eq!(report.total, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert!(store.exists("app:ok").await.unwrap());
        assert_eq!(store.get("app:also_ok").await.unwrap().as_deref(), Some("text"));
    }

    #[tokio::test]
    async fn test_priority_filter_and_order() {
        let (_store, scheduler) = scheduler(true);
        let order = Arc::new(Mutex::new(Vec::new()));

        for (key, priority) in [("low", 9u8), ("urgent", 1), ("high", 2), ("normal", DEFAULT_PRIORITY)] {
            let order = Arc::clone(&order);
            scheduler.register(
                WarmupEntry::new(key, move || {
                    order.lock().push(key);
                    async { Ok::<_, String>(json!(true)) }
                })
                .priority(priority),
            );
        }

        let report = scheduler
            .execute(WarmupOptions {
                parallel: 1,
                priority_only: Some(2),
            })
            .await;
        assert_eq!(report.total, 2);
        assert_eq!(*order.lock(), vec!["urgent", "high"]);

        order.lock().clear();
        scheduler
            .execute(WarmupOptions {
                parallel: 1,
                priority_only: None,
            })
            .await;
        assert_eq!(*order.lock(), vec!["urgent", "high", "normal", "low"]);
    }

    #[tokio::test]
    async fn test_store_outage_counts_as_failure() {
        let (store, scheduler) = scheduler(true);
        scheduler.register(constant(json!(1)));
        store.set_available(false);

        let report = scheduler.execute(WarmupOptions::default()).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 0);
    }

    #[tokio::test]
    async fn test_disabled_is_noop() {
        let (store, scheduler) = scheduler(false);
        scheduler.register(constant(json!(1)));

        assert_eq!(scheduler.execute(WarmupOptions::default()).await, WarmupReport::default());
        assert!(scheduler.schedule(Duration::from_millis(10)).is_none());
        assert_eq!(store.command_count(), 0);
    }

    #[tokio::test]
    async fn test_schedule_runs_high_priority_until_cancelled() {
        let (_store, scheduler) = scheduler(true);
        let urgent_runs = Arc::new(AtomicUsize::new(0));
        let background_runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&urgent_runs);
        scheduler.register(
            WarmupEntry::new("urgent", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, String>(1) }
            })
            .priority(1),
        );
        let counter = Arc::clone(&background_runs);
        scheduler.register(WarmupEntry::new("background", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(1) }
        }));

        assert!(scheduler.schedule(Duration::ZERO).is_none());

        let schedule = scheduler.schedule(Duration::from_millis(20)).unwrap();
        tokio::time::sleep(Duration::from_millis(110)).await;
        schedule.shutdown().await;

        let runs = urgent_runs.load(Ordering::SeqCst);
        assert!(runs >= 2, "expected repeated runs, got {runs}");
        assert_eq!(background_runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(urgent_runs.load(Ordering::SeqCst), runs);
    }

    #[tokio::test]
    async fn test_cancel_all_stops_schedules() {
        let (_store, scheduler) = scheduler(true);
        let schedule = scheduler.schedule(Duration::from_millis(10)).unwrap();

        scheduler.cancel_all();
        tokio::time::timeout(Duration::from_secs(1), async {
            while !schedule.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_wins_over_a_ready_tick() {
        let (_store, scheduler) = scheduler(true);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        scheduler.register(
            WarmupEntry::new("urgent", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, String>(1) }
            })
            .priority(1),
        );

        let schedule = scheduler.schedule(Duration::from_millis(10)).unwrap();
        // Block the runtime so the first tick is due before the loop is polled
        std::thread::sleep(Duration::from_millis(30));
        schedule.cancel();
        schedule.shutdown().await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_finished_schedules_are_pruned() {
        let (_store, scheduler) = scheduler(true);

        for _ in 0..3 {
            let schedule = scheduler.schedule(Duration::from_secs(60)).unwrap();
            schedule.shutdown().await;
        }
        let live = scheduler.schedule(Duration::from_secs(60)).unwrap();
        assert_eq!(scheduler.schedules.lock().len(), 1);

        live.shutdown().await;
    }
}
