// Copyright 2025 Cowboy AI, LLC.

//! Engine input and output shapes

use crate::errors::{ReducerError, ReducerResult};
use crate::identifiers::CorrelationId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Request to run one workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInput {
    /// Workflow type the request is routed by
    pub workflow_type: String,
    /// Instance the request applies to
    pub instance_id: String,
    /// Workflow-specific payload; must be a JSON object
    #[serde(default = "empty_object")]
    pub data: Value,
    /// Correlation of the request; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

impl WorkflowInput {
    /// Build an input without a correlation id
    pub fn new(
        workflow_type: impl Into<String>,
        instance_id: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            workflow_type: workflow_type.into(),
            instance_id: instance_id.into(),
            data,
            correlation_id: None,
        }
    }

    /// Attach a correlation id
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Check that the routing fields are present
    pub fn validate(&self) -> ReducerResult<()> {
        if self.workflow_type.trim().is_empty() {
            return Err(ReducerError::validation(
                "workflow_type must be a non-empty string",
            ));
        }
        if self.instance_id.trim().is_empty() {
            return Err(ReducerError::validation(
                "instance_id must be a non-empty string",
            ));
        }
        Ok(())
    }

    /// Parse an input from raw JSON, reporting which field is malformed
    pub fn from_value(value: Value) -> ReducerResult<Self> {
        let Value::Object(mut fields) = value else {
            return Err(ReducerError::validation("workflow input must be a JSON object"));
        };

        let workflow_type = take_string(&mut fields, "workflow_type")?;
        let instance_id = take_string(&mut fields, "instance_id")?;
        let data = fields.remove("data").unwrap_or_else(empty_object);
        let correlation_id = match fields.remove("correlation_id") {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => Some(CorrelationId::parse(&raw).ok_or_else(|| {
                ReducerError::validation(format!("correlation_id '{raw}' is not a valid id"))
            })?),
            Some(_) => return Err(ReducerError::validation("correlation_id must be a string")),
        };

        let input = Self {
            workflow_type,
            instance_id,
            data,
            correlation_id,
        };
        input.validate()?;
        Ok(input)
    }
}

fn take_string(fields: &mut Map<String, Value>, name: &str) -> ReducerResult<String> {
    match fields.remove(name) {
        Some(Value::String(value)) => Ok(value),
        Some(_) => Err(ReducerError::validation(format!("{name} must be a string"))),
        None => Err(ReducerError::validation(format!("{name} is required"))),
    }
}

/// Uniform result of [`ReducerEngine::process`](crate::ReducerEngine::process)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOutput {
    /// Whether the workflow succeeded
    pub success: bool,
    /// Handler result, on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_data: Option<Value>,
    /// Failure description, on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Workflow type as requested
    pub workflow_type: String,
    /// Correlation id of the run
    pub correlation_id: String,
    /// Wall-clock time spent in the engine
    pub execution_time_ms: u64,
}

impl WorkflowOutput {
    /// Successful output
    pub fn succeeded(
        workflow_type: impl Into<String>,
        correlation_id: CorrelationId,
        result_data: Value,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            success: true,
            result_data: Some(result_data),
            error_message: None,
            workflow_type: workflow_type.into(),
            correlation_id: correlation_id.to_string(),
            execution_time_ms,
        }
    }

    /// Failed output
    pub fn failed(
        workflow_type: impl Into<String>,
        correlation_id: CorrelationId,
        error_message: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            success: false,
            result_data: None,
            error_message: Some(error_message.into()),
            workflow_type: workflow_type.into(),
            correlation_id: correlation_id.to_string(),
            execution_time_ms,
        }
    }
}
