// Copyright 2025 Cowboy AI, LLC.

//! Workflow transition table and transition records
//!
//! Transitions are the morphisms between [`WorkflowState`]s. The legal set is
//! fixed:
//!
//! ```text
//! PENDING    -> PROCESSING | CANCELLED
//! PROCESSING -> COMPLETED | FAILED | CANCELLED
//! FAILED     -> RETRYING | CANCELLED
//! RETRYING   -> PROCESSING | FAILED | CANCELLED
//! COMPLETED  -> (none)
//! CANCELLED  -> (none)
//! ```

use crate::workflow::state::WorkflowState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Pure lookup of the legal transition table
pub struct TransitionValidator;

impl TransitionValidator {
    /// States reachable in one step from `from`
    pub fn allowed_targets(from: WorkflowState) -> &'static [WorkflowState] {
        use WorkflowState::*;
        match from {
            Pending => &[Processing, Cancelled],
            Processing => &[Completed, Failed, Cancelled],
            Failed => &[Retrying, Cancelled],
            Retrying => &[Processing, Failed, Cancelled],
            Completed | Cancelled => &[],
        }
    }

    /// Whether `from -> to` is in the table
    pub fn is_valid(from: WorkflowState, to: WorkflowState) -> bool {
        Self::allowed_targets(from).contains(&to)
    }

    /// Check an externally supplied sequence of states against the table
    ///
    /// Empty and single-element sequences are trivially valid.
    pub fn validate_path(path: &[WorkflowState]) -> bool {
        path.windows(2).all(|pair| Self::is_valid(pair[0], pair[1]))
    }
}

/// What kind of actor or condition caused a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCategory {
    /// Normal progress driven by the workflow itself
    System,
    /// Requested by a user or operator
    UserAction,
    /// Caused by an error
    Error,
    /// Part of a retry cycle
    Retry,
    /// Caused by a deadline
    Timeout,
    /// Cancellation request
    Cancellation,
}

/// Why a transition happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionReason {
    /// Human-readable description
    pub description: String,
    /// Category of cause
    pub category: TransitionCategory,
    /// Whether the transition was made without human involvement
    pub automated: bool,
}

impl TransitionReason {
    /// Automated system transition
    pub fn system(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            category: TransitionCategory::System,
            automated: true,
        }
    }

    /// Transition caused by an error
    pub fn error(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            category: TransitionCategory::Error,
            automated: true,
        }
    }

    /// Transition into a retry cycle
    pub fn retry(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            category: TransitionCategory::Retry,
            automated: true,
        }
    }

    /// Operator-requested transition
    pub fn user(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            category: TransitionCategory::UserAction,
            automated: false,
        }
    }

    /// Default reason when the caller supplies none
    pub fn for_target(target: WorkflowState) -> Self {
        match target {
            WorkflowState::Failed => Self::error("workflow failed"),
            WorkflowState::Retrying => Self::retry("retrying workflow"),
            WorkflowState::Cancelled => Self {
                description: "workflow cancelled".to_string(),
                category: TransitionCategory::Cancellation,
                automated: true,
            },
            other => Self::system(format!("transition to {other}")),
        }
    }
}

/// Append-only record of one state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    /// State before the transition
    pub from_state: WorkflowState,
    /// State after the transition
    pub to_state: WorkflowState,
    /// Why it happened
    pub reason: TransitionReason,
    /// Additional metadata
    pub metadata: HashMap<String, serde_json::Value>,
    /// When the transition occurred
    pub transition_time: DateTime<Utc>,
}
