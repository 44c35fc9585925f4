//! # Resilience Configuration
//!
//! Serde configuration structures for the store connection, cache, warm-up,
//! lock and circuit breaker defaults. Values are merged by [`loader`] from
//! built-in defaults, an optional TOML/YAML file and environment variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use resilience_core::config::ResilienceConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ResilienceConfig::load()?;
//! let ttl = config.cache.default_ttl();
//! # Ok(())
//! # }
//! ```
//!
//! Rate-limit and circuit-breaker thresholds used at a call site are normally
//! constructor arguments; the values here are defaults for components built by
//! [`crate::context::ResilienceContext`].

pub mod error;
pub mod loader;

use crate::resilience::CircuitBreakerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Key-value store connection
    pub redis: RedisConfig,

    /// Cache key construction and TTLs
    pub cache: CacheSettings,

    /// Cache warm-up scheduling
    pub warmup: WarmupSettings,

    /// Distributed lock keys
    pub lock: LockSettings,

    /// Store-backed rate limiter keys
    pub rate_limit: RateLimitSettings,

    /// Circuit breaker defaults and per-component overrides
    pub circuit_breakers: CircuitBreakerSettings,
}

impl ResilienceConfig {
    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.redis.url.trim().is_empty() {
            return Err(ConfigurationError::validation_error(
                "redis.url must not be empty",
            ));
        }
        if self.redis.connection_timeout_seconds == 0 {
            return Err(ConfigurationError::validation_error(
                "redis.connection_timeout_seconds must be greater than 0",
            ));
        }
        if self.cache.key_prefix.is_empty() {
            return Err(ConfigurationError::validation_error(
                "cache.key_prefix must not be empty",
            ));
        }
        if self.cache.default_ttl_seconds == 0 {
            return Err(ConfigurationError::validation_error(
                "cache.default_ttl_seconds must be greater than 0",
            ));
        }
        if self.cache.session_ttl_seconds == 0 {
            return Err(ConfigurationError::validation_error(
                "cache.session_ttl_seconds must be greater than 0",
            ));
        }
        if self.warmup.parallel == 0 {
            return Err(ConfigurationError::validation_error(
                "warmup.parallel must be greater than 0",
            ));
        }
        if self.warmup.interval_seconds == 0 {
            return Err(ConfigurationError::validation_error(
                "warmup.interval_seconds must be greater than 0",
            ));
        }
        if self.lock.key_prefix.is_empty() || self.rate_limit.key_prefix.is_empty() {
            return Err(ConfigurationError::validation_error(
                "lock.key_prefix and rate_limit.key_prefix must not be empty",
            ));
        }

        self.circuit_breakers
            .default_config
            .to_resilience_config()
            .validate()
            .map_err(|e| {
                ConfigurationError::validation_error(format!("circuit_breakers.default_config: {e}"))
            })?;
        for (component, component_config) in &self.circuit_breakers.component_configs {
            component_config
                .to_resilience_config()
                .validate()
                .map_err(|e| {
                    ConfigurationError::validation_error(format!(
                        "circuit_breakers.component_configs.{component}: {e}"
                    ))
                })?;
        }

        Ok(())
    }
}

/// Redis connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection URL (`redis://[user:pass@]host:port[/db]`)
    pub url: String,
    /// Timeout for establishing a connection
    pub connection_timeout_seconds: u64,
    /// Connection attempts before giving up
    pub max_retries: u32,
}

impl RedisConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connection_timeout_seconds: 5,
            max_retries: 3,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Prefix applied to every cache key
    pub key_prefix: String,
    /// TTL applied when a write does not specify one
    pub default_ttl_seconds: u64,
    /// TTL for the session cache helper
    pub session_ttl_seconds: u64,
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            key_prefix: "app".to_string(),
            default_ttl_seconds: 300,
            session_ttl_seconds: 3600,
        }
    }
}

/// Cache warm-up configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WarmupSettings {
    pub enabled: bool,
    /// Interval between scheduled warm-up runs
    pub interval_seconds: u64,
    /// Entries warmed concurrently per batch
    pub parallel: usize,
    /// Scheduled runs only warm entries at or below this priority
    pub scheduled_priority_ceiling: u8,
}

impl WarmupSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Default for WarmupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 300,
            parallel: 5,
            scheduled_priority_ceiling: 2,
        }
    }
}

/// Distributed lock configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LockSettings {
    pub key_prefix: String,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            key_prefix: "lock".to_string(),
        }
    }
}

/// Store-backed rate limiter configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub key_prefix: String,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            key_prefix: "ratelimit".to_string(),
        }
    }
}

/// Circuit breaker configuration with per-component overrides
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Configuration for components without an override
    pub default_config: CircuitBreakerComponentConfig,

    /// Specific configurations for named components
    pub component_configs: HashMap<String, CircuitBreakerComponentConfig>,
}

impl CircuitBreakerSettings {
    /// Get configuration for a specific component
    pub fn config_for_component(&self, component_name: &str) -> CircuitBreakerComponentConfig {
        self.component_configs
            .get(component_name)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }
}

/// File/env representation of a single breaker's thresholds
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerComponentConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout_seconds: u64,
    pub monitoring_period_seconds: u64,
}

impl CircuitBreakerComponentConfig {
    /// Convert to the resilience module's format
    pub fn to_resilience_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            timeout: Duration::from_secs(self.timeout_seconds),
            monitoring_period: Duration::from_secs(self.monitoring_period_seconds),
        }
    }
}

impl Default for CircuitBreakerComponentConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout_seconds: 30,
            monitoring_period_seconds: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ResilienceConfig::default();
        assert_eq!(config.cache.key_prefix, "app");
        assert_eq!(config.cache.default_ttl(), Duration::from_secs(300));
        assert!(config.warmup.enabled);
        assert_eq!(config.warmup.parallel, 5);
        assert_eq!(config.redis.max_retries, 3);
        assert_eq!(config.lock.key_prefix, "lock");
        assert_eq!(config.rate_limit.key_prefix, "ratelimit");

        let breaker = config.circuit_breakers.default_config.to_resilience_config();
        assert_eq!(breaker.failure_threshold, 5);
        assert_eq!(breaker.success_threshold, 3);
        assert_eq!(breaker.timeout, Duration::from_secs(30));
        assert_eq!(breaker.monitoring_period, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = ResilienceConfig::default();
        config.cache.default_ttl_seconds = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::ValidationError { .. })
        ));

        let mut config = ResilienceConfig::default();
        config.warmup.parallel = 0;
        assert!(config.validate().is_err());

        let mut config = ResilienceConfig::default();
        config.circuit_breakers.component_configs.insert(
            "ai".to_string(),
            CircuitBreakerComponentConfig {
                failure_threshold: 0,
                ..Default::default()
            },
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("component_configs.ai"));
    }

    #[test]
    fn test_component_override_lookup() {
        let mut settings = CircuitBreakerSettings::default();
        settings.component_configs.insert(
            "payments".to_string(),
            CircuitBreakerComponentConfig {
                failure_threshold: 2,
                ..Default::default()
            },
        );

        assert_eq!(settings.config_for_component("payments").failure_threshold, 2);
        assert_eq!(settings.config_for_component("search").failure_threshold, 5);
    }
}
