use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-call cache options
///
/// ```rust
/// use resilience_core::cache::CacheOptions;
/// use std::time::Duration;
///
/// let options = CacheOptions::new()
///     .namespace("reports")
///     .ttl(Duration::from_secs(600))
///     .stale_while_revalidate(Duration::from_secs(60));
/// assert_eq!(options.namespace.as_deref(), Some("reports"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOptions {
    /// Entry lifetime; the cache's default TTL when unset
    pub ttl: Option<Duration>,
    /// Key namespace inserted between the prefix and the key
    pub namespace: Option<String>,
    /// Remaining-TTL window under which an entry counts as stale
    pub stale_while_revalidate: Option<Duration>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn stale_while_revalidate(mut self, window: Duration) -> Self {
        self.stale_while_revalidate = Some(window);
        self
    }

    /// Options scoped to `namespace` with no other settings
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self::new().namespace(namespace)
    }
}
