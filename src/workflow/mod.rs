// Copyright 2025 Cowboy AI, LLC.

//! Workflow state machine
//!
//! - [`WorkflowState`]: the closed set of lifecycle states
//! - [`TransitionValidator`]: pure lookup of the legal transition table
//! - [`WorkflowStateModel`]: one workflow's state, history, retries and timing

pub mod model;
pub mod state;
pub mod transition;

pub use model::{ErrorInfo, WorkflowStateModel, WorkflowTiming, DEFAULT_MAX_RETRIES};
pub use state::{normalize_workflow_type, WorkflowIdentity, WorkflowState};
pub use transition::{StateTransition, TransitionCategory, TransitionReason, TransitionValidator};
