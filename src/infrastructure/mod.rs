// Copyright 2025 Cowboy AI, LLC.

//! Infrastructure for workflow execution
//!
//! - Circuit breakers guarding external dependencies
//! - Snapshot storage for checkpoints and point-in-time recovery
//! - Snapshot policies deciding when to checkpoint

pub mod circuit_breaker;
/// Checkpointing policy for workflows
pub mod snapshot_policy;
pub mod snapshot_store;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerEvent,
    CircuitBreakerEventKind, CircuitBreakerMetrics, CircuitBreakerRegistry, CircuitState,
    EventListener, SharedCircuitBreaker,
};
pub use snapshot_policy::{CheckpointTracker, SnapshotPolicy};
pub use snapshot_store::{
    InMemorySnapshotStore, Snapshot, SnapshotStore, SnapshotStoreConfig, SnapshotStoreStats,
    WorkflowSnapshotStats,
};
