//! # Resilience Context
//!
//! Composition root owning the store connection and every component built on
//! it. A process creates one context at startup, hands out the components, and
//! calls [`ResilienceContext::close`] at shutdown. Tests build a context over
//! an [`InMemoryStore`](crate::store::InMemoryStore) with
//! [`ResilienceContext::with_store`].

use crate::cache::{Cache, RateLimitCounter, SessionCache};
use crate::config::ResilienceConfig;
use crate::error::{ResilienceError, ResilienceResult};
use crate::lock::DistributedLock;
use crate::rate_limit::{RateLimiter, TokenBucket, TokenBucketConfig};
use crate::resilience::{CircuitBreakerManager, ResilienceGuard};
use crate::store::KeyValueStore;
use crate::warmup::CacheWarmupScheduler;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Shared resilience components over one store connection
pub struct ResilienceContext {
    /// Instance ID for log correlation
    pub context_id: Uuid,
    config: Arc<ResilienceConfig>,
    store: Arc<dyn KeyValueStore>,
    cache: Cache,
    sessions: SessionCache,
    counters: RateLimitCounter,
    rate_limiter: RateLimiter,
    lock: DistributedLock,
    warmup: CacheWarmupScheduler,
    circuit_breaker_manager: Arc<CircuitBreakerManager>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ResilienceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceContext")
            .field("context_id", &self.context_id)
            .field("store", &self.store.provider_name())
            .field("cache_prefix", &self.cache.key_prefix())
            .field("warmup_entries", &self.warmup.len())
            .field("circuit_breaker_manager", &"Arc<CircuitBreakerManager>")
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl ResilienceContext {
    /// Load configuration from the environment and connect
    #[cfg(feature = "cache-redis")]
    pub async fn new() -> ResilienceResult<Self> {
        let config = ResilienceConfig::load()?;
        Self::init(config).await
    }

    /// Connect to Redis and build every component
    #[cfg(feature = "cache-redis")]
    pub async fn init(config: ResilienceConfig) -> ResilienceResult<Self> {
        config.validate()?;
        let store = crate::store::RedisStore::connect(&config.redis).await?;
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Build every component over an existing store
    pub fn with_store(config: ResilienceConfig, store: Arc<dyn KeyValueStore>) -> Self {
        let cache = Cache::from_settings(Arc::clone(&store), &config.cache);
        let sessions = SessionCache::new(cache.clone(), config.cache.session_ttl());
        let counters = RateLimitCounter::new(cache.clone());
        let rate_limiter = RateLimiter::new(Arc::clone(&store), config.rate_limit.key_prefix.clone());
        let lock = DistributedLock::new(Arc::clone(&store), config.lock.key_prefix.clone());
        let warmup = CacheWarmupScheduler::new(cache.clone(), config.warmup.clone());
        let circuit_breaker_manager = Arc::new(CircuitBreakerManager::from_settings(&config.circuit_breakers));

        let context = Self {
            context_id: Uuid::new_v4(),
            config: Arc::new(config),
            store,
            cache,
            sessions,
            counters,
            rate_limiter,
            lock,
            warmup,
            circuit_breaker_manager,
            closed: AtomicBool::new(false),
        };

        info!(
            context_id = %context.context_id,
            store = context.store.provider_name(),
            cache_prefix = %context.cache.key_prefix(),
            warmup_enabled = context.config.warmup.enabled,
            "Resilience context initialized"
        );
        context
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    pub fn counters(&self) -> &RateLimitCounter {
        &self.counters
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn lock(&self) -> &DistributedLock {
        &self.lock
    }

    pub fn warmup(&self) -> &CacheWarmupScheduler {
        &self.warmup
    }

    pub fn circuit_breaker_manager(&self) -> Arc<CircuitBreakerManager> {
        Arc::clone(&self.circuit_breaker_manager)
    }

    /// Guard for `component`: a fresh token bucket in front of the
    /// component's managed circuit breaker
    pub async fn guard(&self, component: &str, limits: TokenBucketConfig) -> ResilienceResult<ResilienceGuard> {
        let limiter = Arc::new(TokenBucket::try_new(limits)?);
        let breaker = self.circuit_breaker_manager.get_circuit_breaker(component).await;
        Ok(ResilienceGuard::new(limiter, breaker))
    }

    /// Whether the store answers a ping
    pub async fn health_check(&self) -> bool {
        !self.is_closed() && self.store.ping().await.unwrap_or(false)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Cancel scheduled warm-ups and close the store connection
    ///
    /// Closing twice is an error.
    pub async fn close(&self) -> ResilienceResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(ResilienceError::Closed);
        }
        self.warmup.cancel_all();
        self.store.close().await?;
        info!(context_id = %self.context_id, "Resilience context closed");
        Ok(())
    }
}
