// Copyright 2025 Cowboy AI, LLC.

//! Workflow events and the publisher collaborator
//!
//! Subreducers emit events fire-and-forget: a publish failure is logged by the
//! caller and never fails the workflow. Delivery guarantees belong to the
//! transport behind [`EventPublisher`].
//!
//! # Examples
//!
//! ```rust
//! use cim_reducer::events::{EventPublisher, InMemoryEventPublisher, WorkflowEventType};
//! use cim_reducer::CorrelationId;
//! use serde_json::json;
//!
//! let publisher = InMemoryEventPublisher::new();
//! publisher
//!     .publish(
//!         WorkflowEventType::WorkflowStarted.as_str(),
//!         json!({"instance_id": "wf-1"}),
//!         CorrelationId::new(),
//!     )
//!     .unwrap();
//!
//! assert_eq!(publisher.event_types(), vec!["workflow.started".to_string()]);
//! ```

use crate::identifiers::CorrelationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Event types emitted by workflows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowEventType {
    /// Workflow entered PROCESSING for the first time
    WorkflowStarted,
    /// Workflow is retrying after a failure
    WorkflowRetrying,
    /// Workflow reached COMPLETED
    WorkflowCompleted,
    /// Workflow ended in FAILED
    WorkflowFailed,
    /// A document was regenerated
    DocumentRegenerated,
}

impl WorkflowEventType {
    /// Wire name of the event type
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowEventType::WorkflowStarted => "workflow.started",
            WorkflowEventType::WorkflowRetrying => "workflow.retrying",
            WorkflowEventType::WorkflowCompleted => "workflow.completed",
            WorkflowEventType::WorkflowFailed => "workflow.failed",
            WorkflowEventType::DocumentRegenerated => "document.regenerated",
        }
    }
}

impl fmt::Display for WorkflowEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event transport used by subreducers
#[cfg_attr(test, mockall::automock)]
pub trait EventPublisher: Send + Sync {
    /// Hand an event to the transport
    fn publish(
        &self,
        event_type: &str,
        payload: Value,
        correlation_id: CorrelationId,
    ) -> Result<(), String>;
}

/// An event captured by [`InMemoryEventPublisher`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedEvent {
    /// Event type name
    pub event_type: String,
    /// Event body
    pub payload: Value,
    /// Correlation of the workflow run that emitted it
    pub correlation_id: CorrelationId,
    /// When it was published
    pub published_at: DateTime<Utc>,
}

/// Publisher that keeps events in memory
#[derive(Clone, Default)]
pub struct InMemoryEventPublisher {
    published: Arc<RwLock<Vec<PublishedEvent>>>,
}

impl InMemoryEventPublisher {
    /// Create an empty publisher
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event published so far, in order
    pub fn published_events(&self) -> Vec<PublishedEvent> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Types of every event published so far, in order
    pub fn event_types(&self) -> Vec<String> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }

    /// Events published under one correlation id
    pub fn events_for(&self, correlation_id: CorrelationId) -> Vec<PublishedEvent> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.correlation_id == correlation_id)
            .cloned()
            .collect()
    }

    /// Drop every captured event
    pub fn clear(&self) {
        self.published
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventPublisher for InMemoryEventPublisher {
    fn publish(
        &self,
        event_type: &str,
        payload: Value,
        correlation_id: CorrelationId,
    ) -> Result<(), String> {
        self.published
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PublishedEvent {
                event_type: event_type.to_string(),
                payload,
                correlation_id,
                published_at: Utc::now(),
            });
        Ok(())
    }
}
