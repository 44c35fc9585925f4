//! # Circuit Breaker Manager
//!
//! Process-scoped registry of circuit breakers, one per protected resource,
//! created on first use from [`CircuitBreakerSettings`].

use crate::config::CircuitBreakerSettings;
use crate::resilience::{
    CircuitBreaker, CircuitBreakerMetrics, CircuitState, SystemCircuitBreakerMetrics,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Manager for multiple circuit breakers across system components
#[derive(Debug, Clone)]
pub struct CircuitBreakerManager {
    /// Collection of circuit breakers by component name
    circuit_breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,

    settings: CircuitBreakerSettings,
}

impl CircuitBreakerManager {
    pub fn from_settings(settings: &CircuitBreakerSettings) -> Self {
        info!(
            overrides = settings.component_configs.len(),
            "Initializing circuit breaker manager"
        );

        Self {
            circuit_breakers: Arc::new(RwLock::new(HashMap::new())),
            settings: settings.clone(),
        }
    }

    /// Get or create circuit breaker for a component
    pub async fn get_circuit_breaker(&self, component_name: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.circuit_breakers.read().await;
            if let Some(breaker) = breakers.get(component_name) {
                return Arc::clone(breaker);
            }
        }

        let mut breakers = self.circuit_breakers.write().await;

        // Double-check pattern (another task might have created it)
        if let Some(breaker) = breakers.get(component_name) {
            return Arc::clone(breaker);
        }

        let component_config = self
            .settings
            .config_for_component(component_name)
            .to_resilience_config();

        let breaker = Arc::new(CircuitBreaker::new(component_name, component_config));
        breakers.insert(component_name.to_string(), Arc::clone(&breaker));

        info!(
            component = component_name,
            total_circuit_breakers = breakers.len(),
            "Created new circuit breaker"
        );

        breaker
    }

    /// Get all circuit breaker names, sorted
    pub async fn list_components(&self) -> Vec<String> {
        let breakers = self.circuit_breakers.read().await;
        let mut names: Vec<String> = breakers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get metrics for a specific circuit breaker
    pub async fn get_component_metrics(
        &self,
        component_name: &str,
    ) -> Option<CircuitBreakerMetrics> {
        let breakers = self.circuit_breakers.read().await;
        breakers.get(component_name).map(|breaker| breaker.metrics())
    }

    /// Get system-wide circuit breaker metrics
    pub async fn get_system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let mut system_metrics = SystemCircuitBreakerMetrics::new();

        let breakers = self.circuit_breakers.read().await;
        for (name, breaker) in breakers.iter() {
            system_metrics.add_circuit_breaker(name.clone(), breaker.metrics());
        }

        system_metrics
    }

    /// Reset every circuit breaker to Closed (administrative recovery)
    pub async fn reset_all(&self) {
        warn!("Resetting all circuit breakers");

        let breakers = self.circuit_breakers.read().await;
        for breaker in breakers.values() {
            breaker.reset();
        }
    }

    /// Force open all circuit breakers (emergency stop)
    pub async fn force_open_all(&self) {
        warn!("Forcing all circuit breakers open (emergency stop)");

        let breakers = self.circuit_breakers.read().await;
        for breaker in breakers.values() {
            breaker.force_open();
        }
    }

    /// Remove circuit breaker for a component
    pub async fn remove_circuit_breaker(&self, component_name: &str) -> bool {
        let mut breakers = self.circuit_breakers.write().await;
        if breakers.remove(component_name).is_some() {
            info!(
                component = component_name,
                remaining_count = breakers.len(),
                "Removed circuit breaker"
            );
            true
        } else {
            false
        }
    }

    /// Get count of circuit breakers by state
    pub async fn get_state_summary(&self) -> HashMap<CircuitState, usize> {
        self.get_system_metrics().await.count_by_state()
    }

    /// Overall health based on circuit breaker states (0.0 to 1.0)
    pub async fn system_health_score(&self) -> f64 {
        self.get_system_metrics().await.health_score()
    }
}
