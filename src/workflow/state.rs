// Copyright 2025 Cowboy AI, LLC.

//! Workflow states and identity
//!
//! The state set is closed: every workflow is always in exactly one of the
//! six [`WorkflowState`] values.

use crate::errors::{ReducerError, ReducerResult};
use crate::identifiers::{CorrelationId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// Created, not yet started
    Pending,
    /// Actively executing
    Processing,
    /// Finished successfully (terminal)
    Completed,
    /// Execution failed; may be retried or cancelled
    Failed,
    /// Cancelled (terminal)
    Cancelled,
    /// Waiting to re-enter processing after a failure
    Retrying,
}

impl WorkflowState {
    /// All states, in declaration order
    pub const ALL: [WorkflowState; 6] = [
        WorkflowState::Pending,
        WorkflowState::Processing,
        WorkflowState::Completed,
        WorkflowState::Failed,
        WorkflowState::Cancelled,
        WorkflowState::Retrying,
    ];

    /// Name of this state for logging and serialization
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowState::Pending => "pending",
            WorkflowState::Processing => "processing",
            WorkflowState::Completed => "completed",
            WorkflowState::Failed => "failed",
            WorkflowState::Cancelled => "cancelled",
            WorkflowState::Retrying => "retrying",
        }
    }

    /// Only COMPLETED and CANCELLED are terminal. FAILED still allows
    /// RETRYING and CANCELLED.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Completed | WorkflowState::Cancelled)
    }

    /// States in which work is in flight
    pub fn is_active(&self) -> bool {
        matches!(self, WorkflowState::Processing | WorkflowState::Retrying)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WorkflowState {
    type Err = ReducerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        WorkflowState::ALL
            .into_iter()
            .find(|state| state.name() == normalized)
            .ok_or_else(|| ReducerError::validation(format!("Unknown workflow state: {s}")))
    }
}

/// Immutable identity of a workflow run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowIdentity {
    workflow_id: WorkflowId,
    workflow_type: String,
    correlation_id: CorrelationId,
    instance_id: String,
}

impl WorkflowIdentity {
    /// Create an identity; the workflow type is normalized to lowercase
    pub fn new(
        workflow_type: &str,
        instance_id: impl Into<String>,
        correlation_id: CorrelationId,
    ) -> ReducerResult<Self> {
        let workflow_type = normalize_workflow_type(workflow_type);
        let instance_id = instance_id.into();
        if workflow_type.is_empty() {
            return Err(ReducerError::validation("workflow_type must not be empty"));
        }
        if instance_id.trim().is_empty() {
            return Err(ReducerError::validation("instance_id must not be empty"));
        }
        Ok(Self {
            workflow_id: WorkflowId::new(),
            workflow_type,
            correlation_id,
            instance_id,
        })
    }

    /// Unique id of this run
    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    /// Normalized workflow type
    pub fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    /// Correlation id of the request that started this run
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Caller-supplied instance id
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

/// Lowercase and trim a workflow type name
pub fn normalize_workflow_type(workflow_type: &str) -> String {
    workflow_type.trim().to_lowercase()
}
