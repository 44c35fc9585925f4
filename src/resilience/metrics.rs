//! # Circuit Breaker Metrics
//!
//! Point-in-time snapshots of circuit breaker counters for health checks and
//! dashboards.

use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metrics for a single circuit breaker instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Operations actually invoked
    pub total_calls: u64,

    /// Number of successful calls
    pub success_count: u64,

    /// Number of failed calls
    pub failure_count: u64,

    /// Calls rejected without invoking the operation
    pub rejected_count: u64,

    /// Calls answered by a fallback
    pub fallback_count: u64,

    /// Current consecutive failure count
    pub consecutive_failures: u32,

    /// Successes recorded in the current half-open window
    pub half_open_successes: u32,

    /// Current circuit breaker state
    pub current_state: CircuitState,

    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,

    /// Earliest time a recovery probe is allowed (set only while open)
    pub next_attempt_at: Option<DateTime<Utc>>,

    /// Calculated failure rate (0.0 to 1.0)
    pub failure_rate: f64,

    /// Calculated success rate (0.0 to 1.0)
    pub success_rate: f64,
}

impl CircuitBreakerMetrics {
    /// Check if metrics indicate healthy operation
    pub fn is_healthy(&self) -> bool {
        match self.current_state {
            CircuitState::Closed => self.failure_rate < 0.1,
            CircuitState::Open => false,
            CircuitState::HalfOpen => true,
        }
    }

    /// Get human-readable state description
    pub fn state_description(&self) -> &'static str {
        match self.current_state {
            CircuitState::Closed => "Healthy - Normal operation",
            CircuitState::Open => "Failing - Rejecting all calls",
            CircuitState::HalfOpen => "Recovering - Testing system health",
        }
    }

    /// Format metrics for logging
    pub fn format_summary(&self) -> String {
        format!(
            "State: {} | Calls: {} | Success: {:.1}% | Failures: {} | Rejected: {} | Fallbacks: {}",
            self.state_description(),
            self.total_calls,
            self.success_rate * 100.0,
            self.failure_count,
            self.rejected_count,
            self.fallback_count
        )
    }
}

/// System-wide circuit breaker metrics aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCircuitBreakerMetrics {
    /// Metrics for individual circuit breakers by name
    pub circuit_breakers: HashMap<String, CircuitBreakerMetrics>,

    /// Timestamp of last metrics collection
    pub collected_at: DateTime<Utc>,
}

impl SystemCircuitBreakerMetrics {
    pub fn new() -> Self {
        Self {
            circuit_breakers: HashMap::new(),
            collected_at: Utc::now(),
        }
    }

    /// Add metrics for a circuit breaker
    pub fn add_circuit_breaker(&mut self, name: String, metrics: CircuitBreakerMetrics) {
        self.circuit_breakers.insert(name, metrics);
        self.collected_at = Utc::now();
    }

    /// Get count of circuit breakers by state
    pub fn count_by_state(&self) -> HashMap<CircuitState, usize> {
        let mut counts = HashMap::new();
        for metrics in self.circuit_breakers.values() {
            *counts.entry(metrics.current_state).or_insert(0) += 1;
        }
        counts
    }

    /// Names of circuit breakers that are not healthy
    pub fn unhealthy_circuits(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .circuit_breakers
            .iter()
            .filter(|(_, metrics)| !metrics.is_healthy())
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Calculate system-wide health score (0.0 to 1.0)
    pub fn health_score(&self) -> f64 {
        if self.circuit_breakers.is_empty() {
            return 1.0;
        }

        let healthy_count = self
            .circuit_breakers
            .values()
            .filter(|metrics| metrics.is_healthy())
            .count();

        healthy_count as f64 / self.circuit_breakers.len() as f64
    }

    /// Get total calls across all circuit breakers
    pub fn total_calls(&self) -> u64 {
        self.circuit_breakers.values().map(|m| m.total_calls).sum()
    }

    /// Get total rejections across all circuit breakers
    pub fn total_rejections(&self) -> u64 {
        self.circuit_breakers.values().map(|m| m.rejected_count).sum()
    }
}

impl Default for SystemCircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
