// Copyright 2025 Cowboy AI, LLC.

//! Workflow state model
//!
//! [`WorkflowStateModel`] owns one workflow's current and previous state,
//! its transition history, retry counter, timing and error information.
//! It is mutated only through [`WorkflowStateModel::transition_to`] and the
//! helpers built on it. Callers must serialize transitions on a single model;
//! `&mut self` enforces this within one task.

use crate::errors::{ReducerError, ReducerResult};
use crate::workflow::state::{WorkflowIdentity, WorkflowState};
use crate::workflow::transition::{StateTransition, TransitionReason, TransitionValidator};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Default number of retries allowed per workflow
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Lifecycle timestamps of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTiming {
    /// When the model was created
    pub created_at: DateTime<Utc>,
    /// When the model last changed
    pub updated_at: DateTime<Utc>,
    /// First entry into PROCESSING
    pub started_at: Option<DateTime<Utc>>,
    /// Entry into COMPLETED
    pub completed_at: Option<DateTime<Utc>>,
    /// Milliseconds between `started_at` and `completed_at`
    pub processing_time_ms: Option<i64>,
}

/// Error information carried by a failed workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error message
    pub message: Option<String>,
    /// Structured error details
    pub details: HashMap<String, serde_json::Value>,
    /// Whether an error is currently recorded
    pub has_error: bool,
}

/// State of one workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStateModel {
    identity: WorkflowIdentity,
    current_state: WorkflowState,
    previous_state: Option<WorkflowState>,
    retry_count: u32,
    max_retries: u32,
    timing: WorkflowTiming,
    transition_history: Vec<StateTransition>,
    error_info: ErrorInfo,
}

impl WorkflowStateModel {
    /// Create a new model in PENDING
    pub fn new(identity: WorkflowIdentity, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            identity,
            current_state: WorkflowState::Pending,
            previous_state: None,
            retry_count: 0,
            max_retries,
            timing: WorkflowTiming {
                created_at: now,
                updated_at: now,
                started_at: None,
                completed_at: None,
                processing_time_ms: None,
            },
            transition_history: Vec::new(),
            error_info: ErrorInfo::default(),
        }
    }

    /// Identity of this workflow
    pub fn identity(&self) -> &WorkflowIdentity {
        &self.identity
    }

    /// Current state
    pub fn current_state(&self) -> WorkflowState {
        self.current_state
    }

    /// State before the last transition
    pub fn previous_state(&self) -> Option<WorkflowState> {
        self.previous_state
    }

    /// Number of entries into RETRYING so far
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Retry budget
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Lifecycle timestamps
    pub fn timing(&self) -> &WorkflowTiming {
        &self.timing
    }

    /// Ordered transition history
    pub fn transition_history(&self) -> &[StateTransition] {
        &self.transition_history
    }

    /// Current error information
    pub fn error_info(&self) -> &ErrorInfo {
        &self.error_info
    }

    /// Whether `target` is reachable in one step
    pub fn can_transition_to(&self, target: WorkflowState) -> bool {
        TransitionValidator::is_valid(self.current_state, target)
    }

    /// Whether the workflow has reached COMPLETED or CANCELLED
    pub fn is_terminal_state(&self) -> bool {
        self.current_state.is_terminal()
    }

    /// Whether work is in flight
    pub fn is_active_state(&self) -> bool {
        self.current_state.is_active()
    }

    /// True iff the workflow is FAILED and has retry budget left
    pub fn can_retry(&self) -> bool {
        self.current_state == WorkflowState::Failed && self.retry_count < self.max_retries
    }

    /// Transition with a default reason and no metadata
    pub fn transition_to(&mut self, target: WorkflowState) -> ReducerResult<&StateTransition> {
        self.transition_with(target, None, HashMap::new())
    }

    /// Transition to `target`, recording a reason and metadata
    pub fn transition_with(
        &mut self,
        target: WorkflowState,
        reason: Option<TransitionReason>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> ReducerResult<&StateTransition> {
        let from = self.current_state;
        if !TransitionValidator::is_valid(from, target) {
            let reason = if from.is_terminal() {
                format!("{from} is a terminal state")
            } else {
                "transition not permitted".to_string()
            };
            return Err(ReducerError::InvalidTransition {
                from: from.to_string(),
                to: target.to_string(),
                reason,
            });
        }
        if target == WorkflowState::Retrying && self.retry_count >= self.max_retries {
            return Err(ReducerError::InvalidTransition {
                from: from.to_string(),
                to: target.to_string(),
                reason: format!("retry budget of {} exhausted", self.max_retries),
            });
        }

        let now = Utc::now();
        match target {
            WorkflowState::Processing if self.timing.started_at.is_none() => {
                self.timing.started_at = Some(now);
            }
            WorkflowState::Completed => {
                self.timing.completed_at = Some(now);
                self.timing.processing_time_ms = self
                    .timing
                    .started_at
                    .map(|started| (now - started).num_milliseconds());
            }
            WorkflowState::Retrying => {
                self.retry_count += 1;
            }
            _ => {}
        }

        debug!(
            workflow_id = %self.identity.workflow_id(),
            instance_id = %self.identity.instance_id(),
            from = %from,
            to = %target,
            "Workflow state transition"
        );

        self.previous_state = Some(from);
        self.current_state = target;
        self.timing.updated_at = now;
        self.transition_history.push(StateTransition {
            from_state: from,
            to_state: target,
            reason: reason.unwrap_or_else(|| TransitionReason::for_target(target)),
            metadata,
            transition_time: now,
        });

        // history is never empty after the push above
        Ok(&self.transition_history[self.transition_history.len() - 1])
    }

    /// Record an error and move into FAILED
    ///
    /// The error is recorded even when FAILED is not reachable from the
    /// current state; the transition error is then returned. Already-FAILED
    /// workflows only have their error information replaced.
    pub fn set_error(
        &mut self,
        message: impl Into<String>,
        details: HashMap<String, serde_json::Value>,
    ) -> ReducerResult<()> {
        let message = message.into();
        self.error_info = ErrorInfo {
            message: Some(message.clone()),
            details: details.clone(),
            has_error: true,
        };
        self.timing.updated_at = Utc::now();

        if self.current_state == WorkflowState::Failed {
            return Ok(());
        }

        let mut metadata = details;
        metadata.insert("error_message".to_string(), serde_json::Value::String(message.clone()));
        self.transition_with(
            WorkflowState::Failed,
            Some(TransitionReason::error(message)),
            metadata,
        )?;
        Ok(())
    }

    /// Clear error information without changing state
    pub fn clear_error(&mut self) {
        self.error_info = ErrorInfo::default();
        self.timing.updated_at = Utc::now();
    }

    /// Sequence of states visited, starting with PENDING
    pub fn state_path(&self) -> Vec<WorkflowState> {
        let mut path = vec![WorkflowState::Pending];
        path.extend(self.transition_history.iter().map(|t| t.to_state));
        path
    }

    /// Check an externally supplied sequence of states against the table
    pub fn validate_transition_path(path: &[WorkflowState]) -> bool {
        TransitionValidator::validate_path(path)
    }
}
