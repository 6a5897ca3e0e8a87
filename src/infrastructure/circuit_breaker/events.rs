// Copyright 2025 Cowboy AI, LLC.

//! Circuit breaker events and listener dispatch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::warn;

/// State of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are rejected
    Open,
    /// A bounded number of trial requests probe recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Kinds of events a breaker emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerEventKind {
    /// Guarded call succeeded
    Success,
    /// Guarded call failed
    Failure,
    /// Guarded call exceeded its deadline
    Timeout,
    /// Breaker changed state
    StateChange,
    /// Call was rejected and a fallback ran instead
    FallbackExecuted,
}

/// Event emitted by a circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerEvent {
    /// Dependency name
    pub service: String,
    /// What happened
    pub kind: CircuitBreakerEventKind,
    /// Breaker state after the event
    pub state: CircuitState,
    /// State before a state change
    pub previous_state: Option<CircuitState>,
    /// Call latency, for call outcomes
    pub duration: Option<Duration>,
    /// Error message, for failures
    pub error: Option<String>,
    /// When the event was produced
    pub timestamp: DateTime<Utc>,
}

impl CircuitBreakerEvent {
    pub(crate) fn new(service: &str, kind: CircuitBreakerEventKind, state: CircuitState) -> Self {
        Self {
            service: service.to_string(),
            kind,
            state,
            previous_state: None,
            duration: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn state_change(service: &str, from: CircuitState, to: CircuitState) -> Self {
        Self {
            previous_state: Some(from),
            ..Self::new(service, CircuitBreakerEventKind::StateChange, to)
        }
    }

    pub(crate) fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub(crate) fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Callback invoked for breaker events
pub type EventListener = Arc<dyn Fn(&CircuitBreakerEvent) + Send + Sync>;

/// Best-effort listener registry; a panicking listener is logged and skipped
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: RwLock<HashMap<CircuitBreakerEventKind, Vec<EventListener>>>,
}

impl ListenerSet {
    pub(crate) fn add(&self, kind: CircuitBreakerEventKind, listener: EventListener) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(listener);
    }

    pub(crate) fn emit(&self, event: &CircuitBreakerEvent) {
        // clone out so no lock is held while user code runs
        let listeners: Vec<EventListener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind)
            .cloned()
            .unwrap_or_default();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(
                    service = %event.service,
                    kind = ?event.kind,
                    "Circuit breaker event listener panicked"
                );
            }
        }
    }
}
