// Copyright 2025 Cowboy AI, LLC.

//! Error types for reducer operations

use thiserror::Error;

/// Errors that can occur while validating, routing and executing workflows
#[derive(Debug, Clone, Error)]
pub enum ReducerError {
    /// Malformed input or payload shape
    #[error("Validation error: {0}")]
    Validation(String),

    /// No subreducer is registered for the requested workflow type
    #[error("Unsupported workflow type '{workflow_type}'. Supported types: [{}]", supported.join(", "))]
    UnsupportedWorkflowType {
        /// Requested workflow type (normalized)
        workflow_type: String,
        /// Registered workflow types
        supported: Vec<String>,
    },

    /// Illegal workflow state transition
    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidTransition {
        /// Current state
        from: String,
        /// Attempted target state
        to: String,
        /// Why the transition was rejected
        reason: String,
    },

    /// Call rejected because the circuit is open
    #[error("Circuit open for service '{service}'")]
    CircuitOpen {
        /// Dependency name guarded by the breaker
        service: String,
    },

    /// Guarded call exceeded its deadline
    #[error("Call to service '{service}' timed out after {timeout_ms}ms")]
    CircuitTimeout {
        /// Dependency name guarded by the breaker
        service: String,
        /// Deadline that was exceeded
        timeout_ms: u64,
    },

    /// Snapshot checksum did not validate
    #[error("Corruption detected in snapshot {sequence_number} of workflow {instance_id}")]
    CorruptionDetected {
        /// Workflow instance the snapshot belongs to
        instance_id: String,
        /// Sequence number of the corrupted snapshot
        sequence_number: u64,
    },

    /// Reserved extension point
    #[error("Not implemented yet: {0}")]
    NotImplementedYet(String),

    /// Subreducer-specific payload or processing error
    #[error("Workflow '{workflow_type}' failed: {message}")]
    Domain {
        /// Workflow type raising the error
        workflow_type: String,
        /// Error message
        message: String,
    },

    /// A guarded dependency call failed
    #[error("Dependency '{service}' failed: {message}")]
    Dependency {
        /// Dependency name
        service: String,
        /// Error message from the dependency
        message: String,
    },

    /// Lookup failure
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate registration
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for reducer operations
pub type ReducerResult<T> = Result<T, ReducerError>;

impl From<serde_json::Error> for ReducerError {
    fn from(err: serde_json::Error) -> Self {
        ReducerError::Serialization(err.to_string())
    }
}

impl ReducerError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        ReducerError::Validation(msg.into())
    }

    /// Create a subreducer domain error
    pub fn domain(workflow_type: impl Into<String>, message: impl Into<String>) -> Self {
        ReducerError::Domain {
            workflow_type: workflow_type.into(),
            message: message.into(),
        }
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReducerError::NotFound(_))
    }

    /// Check if this is an input validation error
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            ReducerError::Validation(_) | ReducerError::Domain { .. }
        )
    }

    /// Check if this error was raised by a circuit breaker
    pub fn is_circuit_error(&self) -> bool {
        matches!(
            self,
            ReducerError::CircuitOpen { .. } | ReducerError::CircuitTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = ReducerError::UnsupportedWorkflowType {
            workflow_type: "unknown_type".to_string(),
            supported: vec!["document_regeneration".to_string(), "other".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Unsupported workflow type 'unknown_type'. Supported types: [document_regeneration, other]"
        );

        let err = ReducerError::InvalidTransition {
            from: "completed".to_string(),
            to: "processing".to_string(),
            reason: "terminal state".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid state transition from completed to processing: terminal state"
        );

        let err = ReducerError::CircuitTimeout {
            service: "generator".to_string(),
            timeout_ms: 250,
        };
        assert_eq!(
            err.to_string(),
            "Call to service 'generator' timed out after 250ms"
        );

        let err = ReducerError::CorruptionDetected {
            instance_id: "wf-1".to_string(),
            sequence_number: 7,
        };
        assert_eq!(
            err.to_string(),
            "Corruption detected in snapshot 7 of workflow wf-1"
        );
    }

    #[test]
    fn test_helper_method_exclusivity() {
        let open = ReducerError::CircuitOpen {
            service: "s".to_string(),
        };
        assert!(open.is_circuit_error());
        assert!(!open.is_validation_error());
        assert!(!open.is_not_found());

        let domain = ReducerError::domain("document_regeneration", "missing title");
        assert!(domain.is_validation_error());
        assert!(!domain.is_circuit_error());

        assert!(ReducerError::NotFound("x".to_string()).is_not_found());
    }

    #[test]
    fn test_serde_json_conversion() {
        let serde_err = serde_json::from_str::<serde_json::Value>("{ invalid json }").unwrap_err();
        let err: ReducerError = serde_err.into();
        assert!(matches!(err, ReducerError::Serialization(msg) if !msg.is_empty()));
    }
}
