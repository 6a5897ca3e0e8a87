// Copyright 2025 Cowboy AI, LLC.

//! # CIM Reducer
//!
//! Long-lived, resumable workflows identified by `(workflow_type, instance_id)`.
//!
//! This crate provides:
//! - **Workflow state machine**: a fixed transition table, retry accounting,
//!   timing and an append-only transition history
//! - **Reducer engine and router**: input validation, deterministic dispatch to
//!   per-type [`Subreducer`]s and a uniform [`WorkflowOutput`]
//! - **Circuit breaker**: failure-rate detection, exponential backoff and
//!   half-open probing for calls to unreliable dependencies
//! - **Snapshot store**: checksummed, sequence-addressable checkpoints with
//!   retention pruning and point-in-time recovery
//!
//! ## Example
//!
//! ```rust
//! use cim_reducer::{ReducerConfig, ReducerEngine, WorkflowInput};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let engine = ReducerEngine::new(ReducerConfig::default()).unwrap();
//! let output = engine
//!     .process(WorkflowInput::new(
//!         "document_regeneration",
//!         "wf-1",
//!         json!({"document": {"title": "T", "content": "C"}}),
//!     ))
//!     .await;
//!
//! assert!(output.success);
//! assert_eq!(output.workflow_type, "document_regeneration");
//! # }
//! ```
//!
//! The library installs no `tracing` subscriber; applications choose their own.

#![warn(missing_docs)]

pub mod config;
pub mod errors;
pub mod events;
pub mod identifiers;
pub mod infrastructure;
pub mod integration;
pub mod reducer;
pub mod subreducers;
pub mod workflow;

pub use config::ReducerConfig;
pub use errors::{ReducerError, ReducerResult};
pub use events::{EventPublisher, InMemoryEventPublisher, PublishedEvent, WorkflowEventType};
pub use identifiers::{CorrelationId, RoutingKey, WorkflowId};
pub use infrastructure::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerRegistry,
    CircuitState, InMemorySnapshotStore, Snapshot, SnapshotPolicy, SnapshotStore,
    SnapshotStoreConfig,
};
pub use integration::{ContainerBuilder, DependencyContainer};
pub use reducer::{
    ReducerEngine, ReducerEngineBuilder, Subreducer, SubreducerContext, SubreducerResult,
    WorkflowInput, WorkflowOutput, WorkflowRouter,
};
pub use workflow::{
    StateTransition, TransitionValidator, WorkflowIdentity, WorkflowState, WorkflowStateModel,
};
