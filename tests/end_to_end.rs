//! End-to-end scenarios against the in-memory store

use resilience_core::cache::{CacheOptions, RevalidationEvent};
use resilience_core::config::ResilienceConfig;
use resilience_core::context::ResilienceContext;
use resilience_core::rate_limit::TokenBucketConfig;
use resilience_core::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, Served};
use resilience_core::store::{InMemoryStore, KeyValueStore};
use resilience_core::warmup::{WarmupEntry, WarmupOptions};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn context() -> (Arc<InMemoryStore>, ResilienceContext) {
    let store = Arc::new(InMemoryStore::new());
    let context = ResilienceContext::with_store(ResilienceConfig::default(), store.clone());
    (store, context)
}

#[tokio::test]
async fn test_sliding_window_admits_limit_then_recovers() {
    let (_store, context) = context();
    let limiter = context.rate_limiter();

    for _ in 0..3 {
        assert!(limiter.check_rate_limit("api:user-1", 3, 1).await.allowed);
    }

    let denied = limiter.check_rate_limit("api:user-1", 3, 1).await;
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    assert_eq!(denied.limit, 3);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(limiter.check_rate_limit("api:user-1", 3, 1).await.allowed);
}

#[tokio::test]
async fn test_breaker_opens_serves_fallback_then_recovers() {
    let breaker = CircuitBreaker::new(
        "ai_provider",
        CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 1,
            timeout: Duration::from_millis(1000),
            monitoring_period: Duration::from_secs(60),
        },
    );

    for _ in 0..2 {
        let result = breaker
            .execute(|| async { Err::<String, _>("upstream 503") })
            .await;
        assert!(result.is_err());
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(500)).await;
    let invoked = AtomicUsize::new(0);
    let served = breaker
        .execute_with_fallback(
            || async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>("real".to_string())
            },
            || async { "F".to_string() },
        )
        .await
        .unwrap();
    assert_eq!(served, Served::Fallback("F".to_string()));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(700)).await;
    let served = breaker
        .execute_with_fallback(
            || async { Ok::<_, String>("real".to_string()) },
            || async { "F".to_string() },
        )
        .await
        .unwrap();
    assert_eq!(served, Served::Primary("real".to_string()));
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_guard_rate_limits_per_identifier() {
    let (_store, context) = context();
    let guard = context
        .guard("ai_provider", TokenBucketConfig::new(2, 0.01, Duration::from_secs(60)))
        .await
        .unwrap();

    for _ in 0..2 {
        assert!(guard
            .execute("user-1", || async { Ok::<_, String>(()) })
            .await
            .is_ok());
    }
    let limited = guard
        .execute("user-1", || async { Ok::<_, String>(()) })
        .await
        .unwrap_err();
    assert_eq!(limited.to_string(), "Rate limit exceeded. Please try again later");
    assert!(guard
        .execute("user-2", || async { Ok::<_, String>(()) })
        .await
        .is_ok());
}

#[tokio::test]
async fn test_lock_mutual_exclusion_across_handles() {
    let (store, context) = context();
    let other = resilience_core::lock::DistributedLock::new(store.clone(), "lock");
    let ttl = Duration::from_secs(5);

    let token = context.lock().acquire("nightly-report", ttl).await.unwrap();
    assert!(other.acquire("nightly-report", ttl).await.is_none());

    let stolen = resilience_core::lock::LockToken::from("forged".to_string());
    assert!(!other.release("nightly-report", &stolen).await);
    assert!(context.lock().is_locked("nightly-report").await);

    assert!(context.lock().release("nightly-report", &token).await);
    assert!(other.acquire("nightly-report", ttl).await.is_some());
}

#[tokio::test]
async fn test_cache_round_trip_and_get_or_set() {
    let (_store, context) = context();
    let cache = context.cache();
    let options = CacheOptions::in_namespace("dashboards");
    let payload = json!({"orders": 12, "revenue": [1.5, 2.25]});

    assert!(cache.set("totals", &payload, &options).await);
    assert_eq!(cache.get::<serde_json::Value>("totals", &options).await, Some(payload));
    assert!(cache.delete("totals", &options).await);
    assert_eq!(cache.get::<serde_json::Value>("totals", &options).await, None);

    let fetches = AtomicUsize::new(0);
    for _ in 0..2 {
        let value: u64 = cache
            .get_or_set(
                "active_users",
                || async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(314)
                },
                &options,
            )
            .await
            .unwrap();
        assert_eq!(value, 314);
    }
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    let short = CacheOptions::in_namespace("dashboards").ttl(Duration::from_millis(50));
    cache.set("flash", "hi", &short).await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(cache.get::<String>("flash", &short).await, None);
}

#[tokio::test]
async fn test_stale_while_revalidate_refreshes_in_background() {
    let (_store, context) = context();
    let cache = context.cache();
    let mut events = cache.subscribe_revalidations();
    let options = CacheOptions::new()
        .ttl(Duration::from_secs(10))
        .stale_while_revalidate(Duration::from_secs(30));

    cache.set("feed", &json!(["old"]), &options).await;

    let served: serde_json::Value = cache
        .get_or_set_stale("feed", || async { Ok::<_, String>(json!(["new"])) }, &options)
        .await
        .unwrap();
    assert_eq!(served, json!(["old"]));

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.key(), "app:feed");
    assert!(matches!(event, RevalidationEvent::Refreshed { .. }));
    assert_eq!(
        cache.get::<serde_json::Value>("feed", &options).await,
        Some(json!(["new"]))
    );
}

#[tokio::test]
async fn test_warmup_populates_cache() {
    let (_store, context) = context();
    context.warmup().register(
        WarmupEntry::new("pricing", || async { Ok::<_, String>(json!({"basic": 10})) })
            .namespace("catalog")
            .priority(1),
    );
    context.warmup().register(WarmupEntry::new("slow_report", || async {
        Err::<serde_json::Value, _>("report service down".to_string())
    }));

    let report = context.warmup().execute(WarmupOptions::default()).await;
    assert_eq!((report.total, report.succeeded, report.failed), (2, 1, 1));

    let pricing = context
        .cache()
        .get::<serde_json::Value>("pricing", &CacheOptions::in_namespace("catalog"))
        .await;
    assert_eq!(pricing, Some(json!({"basic": 10})));
}

#[tokio::test]
async fn test_store_outage_policies() {
    let (store, context) = context();
    store.set_available(false);

    // Rate limiting fails open
    let result = context.rate_limiter().check_rate_limit("api", 1, 60).await;
    assert!(result.allowed);
    let result = context.rate_limiter().check_fixed_rate_limit("api", 1, 60).await;
    assert!(result.allowed);

    // Caching fails open
    assert_eq!(
        context.cache().get::<String>("k", &CacheOptions::default()).await,
        None
    );
    let value = context
        .cache()
        .get_or_set("k", || async { Ok::<_, String>("computed".to_string()) }, &CacheOptions::default())
        .await
        .unwrap();
    assert_eq!(value, "computed");

    // Locking fails closed
    assert!(context.lock().acquire("job", Duration::from_secs(5)).await.is_none());

    store.set_available(true);
    assert!(context.lock().acquire("job", Duration::from_secs(5)).await.is_some());
    assert!(store.exists("lock:job").await.unwrap());
}
