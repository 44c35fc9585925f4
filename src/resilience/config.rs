//! # Circuit Breaker Configuration
//!
//! Configuration structure and validation for a single circuit breaker. For
//! file/env driven settings see [`crate::config::CircuitBreakerSettings`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Number of successful calls in half-open state to close circuit
    pub success_threshold: u32,

    /// Time to wait in open state before attempting recovery
    pub timeout: Duration,

    /// A failure arriving later than this after the previous one restarts the
    /// consecutive failure count
    pub monitoring_period: Duration,
}

impl CircuitBreakerConfig {
    /// Create configuration for external API calls (AI providers, webhooks)
    pub fn for_external_api() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(45),
            monitoring_period: Duration::from_secs(60),
        }
    }

    /// Create configuration for the shared key-value store
    pub fn for_store() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: Duration::from_secs(15),
            monitoring_period: Duration::from_secs(30),
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.failure_threshold > 100 {
            return Err("failure_threshold should not exceed 100".to_string());
        }

        if self.timeout.is_zero() {
            return Err("timeout must be greater than 0".to_string());
        }

        if self.timeout > Duration::from_secs(300) {
            return Err("timeout should not exceed 300 seconds".to_string());
        }

        if self.success_threshold == 0 {
            return Err("success_threshold must be greater than 0".to_string());
        }

        if self.success_threshold > 50 {
            return Err("success_threshold should not exceed 50".to_string());
        }

        if self.monitoring_period.is_zero() {
            return Err("monitoring_period must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout: Duration::from_secs(30),
            monitoring_period: Duration::from_secs(60),
        }
    }
}
