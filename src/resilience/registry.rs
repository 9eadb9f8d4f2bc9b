//! Circuit Breaker Registry
//!
//! Named breakers shared by every client guarding the same dependency. The
//! registry is created at application start-up and handed to clients.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

/// Registry of named circuit breakers.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Create a registry whose breakers default to `default_config`.
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            breakers: DashMap::new(),
        }
    }

    /// Breaker for `name`, created with the default configuration on first use.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, self.default_config.clone())
    }

    /// Breaker for `name`, created with `config` on first use.
    ///
    /// An existing breaker keeps its original configuration.
    pub fn get_or_create_with(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        let entry = self.breakers.entry(name.to_string()).or_insert_with(|| {
            debug!(breaker = name, "registering circuit breaker");
            Arc::new(CircuitBreaker::new(name, config))
        });
        Arc::clone(entry.value())
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.remove(name).map(|(_, breaker)| breaker)
    }

    /// Current state of every breaker, sorted by name.
    pub fn states(&self) -> Vec<(String, CircuitState)> {
        let mut states: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    /// Drop every breaker. Clients holding one keep their handle.
    pub fn clear(&self) {
        self.breakers.clear();
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_same_name_shares_breaker() {
        let registry = CircuitBreakerRegistry::default();
        let a = registry.get_or_create("annotation-api");
        let b = registry.get_or_create("annotation-api");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_first_config_wins() {
        let registry = CircuitBreakerRegistry::default();
        let first = CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(5),
        };
        registry.get_or_create_with("exports", first.clone());
        let again = registry.get_or_create_with("exports", CircuitBreakerConfig::default());
        assert_eq!(again.config(), &first);
    }

    #[test]
    fn test_independent_breakers() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
        });
        registry.get_or_create("tasks").record_failure();
        registry.get_or_create("projects");

        assert_eq!(
            registry.states(),
            vec![
                ("projects".to_string(), CircuitState::Closed),
                ("tasks".to_string(), CircuitState::Open),
            ]
        );

        registry.reset_all();
        assert_eq!(registry.get("tasks").unwrap().state(), CircuitState::Closed);
    }

    #[test]
    fn test_remove_and_clear() {
        let registry = CircuitBreakerRegistry::default();
        registry.get_or_create("a");
        registry.get_or_create("b");
        assert!(registry.remove("a").is_some());
        assert!(registry.get("a").is_none());
        registry.clear();
        assert!(registry.is_empty());
    }
}
