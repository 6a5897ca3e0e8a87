// Copyright 2025 Cowboy AI, LLC.

//! Reducer configuration
//!
//! ```rust
//! use cim_reducer::ReducerConfig;
//!
//! let config = ReducerConfig::from_json_str(r#"{
//!     "max_retries": 2,
//!     "circuit_breakers": {
//!         "document_generator": { "failure_threshold": 2 }
//!     }
//! }"#).unwrap();
//!
//! assert_eq!(config.max_retries, 2);
//! assert_eq!(config.snapshot_store.max_snapshots_per_workflow, 10);
//! ```

use crate::errors::{ReducerError, ReducerResult};
use crate::infrastructure::{
    CircuitBreakerConfig, CircuitBreakerRegistry, SnapshotPolicy, SnapshotStoreConfig,
};
use crate::workflow::DEFAULT_MAX_RETRIES;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configuration of a reducer engine and the components it wires up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReducerConfig {
    /// Retries allowed per workflow run
    pub max_retries: u32,
    /// Breaker configuration for dependencies without an override
    pub circuit_breaker: CircuitBreakerConfig,
    /// Per-dependency breaker overrides
    pub circuit_breakers: HashMap<String, CircuitBreakerConfig>,
    /// Snapshot retention and validation
    pub snapshot_store: SnapshotStoreConfig,
    /// When workflows checkpoint
    pub snapshot_policy: SnapshotPolicy,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            circuit_breaker: CircuitBreakerConfig::default(),
            circuit_breakers: HashMap::new(),
            snapshot_store: SnapshotStoreConfig::default(),
            snapshot_policy: SnapshotPolicy::default(),
        }
    }
}

impl ReducerConfig {
    /// Parse and validate a JSON document; absent fields take their defaults
    pub fn from_json_str(json: &str) -> ReducerResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ReducerError::Configuration(format!("invalid reducer config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every nested configuration
    pub fn validate(&self) -> ReducerResult<()> {
        self.circuit_breaker.validate()?;
        for (name, config) in &self.circuit_breakers {
            config.validate().map_err(|e| {
                ReducerError::Configuration(format!("circuit breaker '{name}': {e}"))
            })?;
        }
        self.snapshot_store.validate()?;
        self.snapshot_policy.validate()
    }

    /// Breaker registry carrying the default and per-dependency configs
    pub fn circuit_breaker_registry(&self) -> ReducerResult<CircuitBreakerRegistry> {
        let registry = CircuitBreakerRegistry::new(self.circuit_breaker.clone())?;
        for (name, config) in &self.circuit_breakers {
            registry.configure(name.clone(), config.clone())?;
        }
        Ok(registry)
    }
}
