// Copyright 2025 Cowboy AI, LLC.

//! Registry holding one circuit breaker per dependency name
//!
//! The registry is constructed explicitly and shared through the dependency
//! container; there is no process-wide breaker table.

use super::breaker::{CircuitBreaker, CircuitBreakerMetrics};
use super::config::CircuitBreakerConfig;
use crate::errors::ReducerResult;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Lazily populated map of dependency name to breaker
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    overrides: RwLock<HashMap<String, CircuitBreakerConfig>>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::with_validated_config(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    /// Create a registry using `default_config` for unconfigured names
    ///
    /// Fails with `ReducerError::Configuration` when `default_config` does not validate.
    pub fn new(default_config: CircuitBreakerConfig) -> ReducerResult<Self> {
        default_config.validate()?;
        Ok(Self::with_validated_config(default_config))
    }

    fn with_validated_config(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            overrides: RwLock::new(HashMap::new()),
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Set the configuration used when `name`'s breaker is first created
    ///
    /// Has no effect on a breaker that already exists.
    pub fn configure(&self, name: impl Into<String>, config: CircuitBreakerConfig) -> ReducerResult<()> {
        config.validate()?;
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), config);
        Ok(())
    }

    /// Breaker for `name`, created on first use
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.get(name) {
            return breaker;
        }

        let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(breaker) = breakers.get(name) {
            return breaker.clone();
        }

        let config = self
            .overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone());
        debug!(service = %name, "Creating circuit breaker");
        let breaker = Arc::new(CircuitBreaker::with_validated_config(name, config));
        breakers.insert(name.to_string(), breaker.clone());
        breaker
    }

    /// Existing breaker for `name`
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Names of all created breakers, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Metrics of every created breaker, keyed by name
    pub fn all_metrics(&self) -> HashMap<String, CircuitBreakerMetrics> {
        self.snapshot()
            .into_iter()
            .map(|breaker| (breaker.name().to_string(), breaker.metrics()))
            .collect()
    }

    /// Reset every created breaker
    pub fn reset_all(&self) {
        for breaker in self.snapshot() {
            breaker.reset();
        }
    }

    fn snapshot(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
