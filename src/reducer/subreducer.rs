// Copyright 2025 Cowboy AI, LLC.

//! Contract implemented by per-type workflow handlers

use crate::errors::ReducerResult;
use crate::identifiers::{CorrelationId, RoutingKey};
use crate::workflow::StateTransition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything a handler receives for one run
#[derive(Debug, Clone)]
pub struct SubreducerContext {
    /// Normalized workflow type
    pub workflow_type: String,
    /// Instance being processed
    pub instance_id: String,
    /// Correlation of the run
    pub correlation_id: CorrelationId,
    /// Workflow-specific payload, always a JSON object
    pub data: Value,
    /// Digest of `(workflow_type, instance_id)`
    pub routing_key: RoutingKey,
}

/// What a handler reports back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubreducerResult {
    /// Whether the workflow completed
    pub success: bool,
    /// Output of the workflow
    pub result_data: Option<Value>,
    /// Why the workflow did not complete
    pub error_message: Option<String>,
    /// Transitions taken during the run, in order
    pub state_transitions: Vec<StateTransition>,
    /// Types of the events emitted during the run
    pub events_emitted: Vec<String>,
    /// Time spent in the handler
    pub execution_time_ms: u64,
}

/// Handler for one workflow type
///
/// Implementations validate their payload and return
/// [`ReducerError::Domain`](crate::ReducerError::Domain) when it does not fit.
/// A run that started but could not finish is reported as an `Ok` result with
/// `success == false`.
#[async_trait]
pub trait Subreducer: Send + Sync {
    /// Workflow type this handler serves, lowercase
    fn workflow_type(&self) -> &str;

    /// Run the workflow
    async fn process_workflow(&self, context: SubreducerContext) -> ReducerResult<SubreducerResult>;
}
