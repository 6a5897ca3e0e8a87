// Copyright 2025 Cowboy AI, LLC.

//! Circuit breaker guarding one external dependency
//!
//! Lifecycle: CLOSED -> OPEN -> HALF_OPEN -> CLOSED (enough trial successes)
//! or back to OPEN (any trial failure).
//!
//! All bookkeeping happens under one short-lived mutex that is never held
//! across an `.await`. Each admitted call is accounted exactly once through a
//! drop guard, whether it completes, times out or is cancelled by its caller.

use super::config::CircuitBreakerConfig;
use super::events::{
    CircuitBreakerEvent, CircuitBreakerEventKind, CircuitState, EventListener, ListenerSet,
};
use crate::errors::{ReducerError, ReducerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Smoothing factor of the latency moving average
const LATENCY_SMOOTHING: f64 = 0.1;

/// Error returned by guarded calls
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// The breaker rejected the call and no fallback was configured
    #[error("Circuit open for service '{service}'")]
    Open {
        /// Dependency name
        service: String,
    },

    /// The call exceeded its deadline
    #[error("Call to service '{service}' timed out after {timeout:?}")]
    Timeout {
        /// Dependency name
        service: String,
        /// Deadline that was exceeded
        timeout: Duration,
    },

    /// The wrapped operation failed
    #[error("Dependency '{service}' failed: {error}")]
    Operation {
        /// Dependency name
        service: String,
        /// Error returned by the operation
        error: E,
    },
}

impl<E> CircuitBreakerError<E> {
    /// Whether the call was rejected without running
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open { .. })
    }

    /// Whether the call timed out
    pub fn is_timeout(&self) -> bool {
        matches!(self, CircuitBreakerError::Timeout { .. })
    }
}

impl<E: Display> From<CircuitBreakerError<E>> for ReducerError {
    fn from(err: CircuitBreakerError<E>) -> Self {
        match err {
            CircuitBreakerError::Open { service } => ReducerError::CircuitOpen { service },
            CircuitBreakerError::Timeout { service, timeout } => ReducerError::CircuitTimeout {
                service,
                timeout_ms: timeout.as_millis() as u64,
            },
            CircuitBreakerError::Operation { service, error } => ReducerError::Dependency {
                service,
                message: error.to_string(),
            },
        }
    }
}

/// Point-in-time view of a breaker's counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Dependency name
    pub service: String,
    /// Current state
    pub state: CircuitState,
    /// Admitted calls whose outcome was recorded
    pub total_requests: u64,
    /// Successful calls
    pub successful_requests: u64,
    /// Failed calls, timeouts included
    pub failed_requests: u64,
    /// Calls that exceeded their deadline
    pub timeout_requests: u64,
    /// Calls abandoned by their caller before completing
    pub cancelled_requests: u64,
    /// Calls rejected by an open circuit
    pub rejected_requests: u64,
    /// Fallbacks executed for rejected calls
    pub fallback_executions: u64,
    /// Requests recorded in the current window
    pub window_requests: u32,
    /// Successes recorded in the current window
    pub window_successes: u32,
    /// Failures recorded in the current window
    pub window_failures: u32,
    /// `window_failures / window_requests`
    pub window_failure_rate: f64,
    /// Trial calls admitted in the current half-open period
    pub half_open_requests: u32,
    /// Trial successes in the current half-open period
    pub half_open_successes: u32,
    /// Trial failures in the current half-open period
    pub half_open_failures: u32,
    /// Exponential moving average of call latency
    pub average_latency_ms: f64,
    /// Opens since the circuit last closed
    pub consecutive_opens: u32,
    /// Time the circuit stays open before probing
    pub current_backoff_ms: u64,
    /// When the state last changed
    pub last_state_change: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Window {
    requests: u32,
    successes: u32,
    failures: u32,
}

impl Window {
    fn failure_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            f64::from(self.failures) / f64::from(self.requests)
        }
    }
}

#[derive(Debug, Default)]
struct HalfOpenCounters {
    requests: u32,
    successes: u32,
    failures: u32,
}

#[derive(Debug, Default)]
struct Totals {
    total: u64,
    successful: u64,
    failed: u64,
    timeouts: u64,
    cancelled: u64,
    rejected: u64,
    fallbacks: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    last_state_change: Instant,
    last_state_change_at: DateTime<Utc>,
    current_backoff: Duration,
    consecutive_opens: u32,
    window_started: Instant,
    window: Window,
    half_open: HalfOpenCounters,
    totals: Totals,
    average_latency_ms: Option<f64>,
}

impl BreakerInner {
    fn new(config: &CircuitBreakerConfig) -> Self {
        let now = Instant::now();
        Self {
            state: CircuitState::Closed,
            last_state_change: now,
            last_state_change_at: Utc::now(),
            current_backoff: config.recovery_timeout(),
            consecutive_opens: 0,
            window_started: now,
            window: Window::default(),
            half_open: HalfOpenCounters::default(),
            totals: Totals::default(),
            average_latency_ms: None,
        }
    }
}

/// How an admitted call ended
#[derive(Debug)]
enum CallOutcome {
    Success(Duration),
    Failure(Duration, String),
    Timeout(Duration),
    Cancelled,
}

/// Records the outcome of an admitted call exactly once
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    recorded: bool,
}

impl<'a> CallGuard<'a> {
    fn new(breaker: &'a CircuitBreaker) -> Self {
        Self {
            breaker,
            recorded: false,
        }
    }

    fn finish(mut self, outcome: CallOutcome) {
        self.recorded = true;
        self.breaker.record(outcome);
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            self.breaker.record(CallOutcome::Cancelled);
        }
    }
}

/// Per-dependency circuit breaker
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    listeners: ListenerSet,
}

impl CircuitBreaker {
    /// Create a breaker in CLOSED state
    ///
    /// Fails with [`ReducerError::Configuration`] when `config` does not validate.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> ReducerResult<Self> {
        config.validate()?;
        Ok(Self::with_validated_config(name, config))
    }

    /// Create a breaker from a configuration that already passed `validate`
    pub(crate) fn with_validated_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let inner = BreakerInner::new(&config);
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(inner),
            listeners: ListenerSet::default(),
        }
    }

    /// Dependency name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration in effect
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Register a listener for one event kind
    pub fn add_listener(&self, kind: CircuitBreakerEventKind, listener: EventListener) {
        self.listeners.add(kind, listener);
    }

    /// Run `operation` under the default deadline
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.execute(operation, None).await
    }

    /// Run `operation` under an explicit deadline
    pub async fn call_with_timeout<T, E, F, Fut>(
        &self,
        operation: F,
        timeout: Duration,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.execute(operation, Some(timeout)).await
    }

    /// Run `operation`, or `fallback` if the circuit rejects the call
    pub async fn call_with_fallback<T, E, F, Fut, FB, FutB>(
        &self,
        operation: F,
        fallback: FB,
        timeout: Option<Duration>,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce() -> FutB,
        FutB: Future<Output = Result<T, E>>,
        E: Display,
    {
        match self.execute(operation, timeout).await {
            Err(CircuitBreakerError::Open { .. }) => {
                let state = {
                    let mut inner = self.lock();
                    inner.totals.fallbacks += 1;
                    inner.state
                };
                debug!(service = %self.name, "Executing fallback for rejected call");
                self.listeners.emit(&CircuitBreakerEvent::new(
                    &self.name,
                    CircuitBreakerEventKind::FallbackExecuted,
                    state,
                ));
                fallback().await.map_err(|error| CircuitBreakerError::Operation {
                    service: self.name.clone(),
                    error,
                })
            }
            other => other,
        }
    }

    async fn execute<T, E, F, Fut>(
        &self,
        operation: F,
        timeout: Option<Duration>,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        if !self.should_allow() {
            return Err(CircuitBreakerError::Open {
                service: self.name.clone(),
            });
        }

        let deadline = timeout.unwrap_or_else(|| self.config.request_timeout());
        let guard = CallGuard::new(self);
        let started = Instant::now();
        let outcome = tokio::time::timeout(deadline, operation()).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(value)) => {
                guard.finish(CallOutcome::Success(elapsed));
                Ok(value)
            }
            Ok(Err(error)) => {
                guard.finish(CallOutcome::Failure(elapsed, error.to_string()));
                Err(CircuitBreakerError::Operation {
                    service: self.name.clone(),
                    error,
                })
            }
            Err(_) => {
                guard.finish(CallOutcome::Timeout(elapsed));
                Err(CircuitBreakerError::Timeout {
                    service: self.name.clone(),
                    timeout: deadline,
                })
            }
        }
    }

    /// Admission decision
    ///
    /// OPEN admits only the first call after the backoff has elapsed and moves
    /// to HALF_OPEN before that call runs.
    fn should_allow(&self) -> bool {
        let mut events = Vec::new();
        let allowed = {
            let mut inner = self.lock();
            let now = Instant::now();
            match inner.state {
                CircuitState::Closed => true,
                CircuitState::Open => {
                    if now.duration_since(inner.last_state_change) >= inner.current_backoff {
                        self.transition(&mut inner, CircuitState::HalfOpen, now, &mut events);
                        inner.half_open.requests = 1;
                        true
                    } else {
                        false
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.half_open.requests < self.config.half_open_max_requests {
                        inner.half_open.requests += 1;
                        true
                    } else {
                        false
                    }
                }
            }
        };
        if !allowed {
            self.lock().totals.rejected += 1;
            debug!(service = %self.name, "Circuit breaker rejected call");
        }
        self.emit_all(&events);
        allowed
    }

    fn record(&self, outcome: CallOutcome) {
        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            let now = Instant::now();
            self.roll_window(&mut inner, now);

            match outcome {
                CallOutcome::Success(elapsed) => {
                    inner.totals.total += 1;
                    inner.totals.successful += 1;
                    inner.window.requests += 1;
                    inner.window.successes += 1;
                    let latency = elapsed.as_secs_f64() * 1000.0;
                    inner.average_latency_ms = Some(match inner.average_latency_ms {
                        Some(avg) => LATENCY_SMOOTHING * latency + (1.0 - LATENCY_SMOOTHING) * avg,
                        None => latency,
                    });
                    events.push(
                        CircuitBreakerEvent::new(&self.name, CircuitBreakerEventKind::Success, inner.state)
                            .with_duration(elapsed),
                    );

                    if inner.state == CircuitState::HalfOpen {
                        inner.half_open.successes += 1;
                        if inner.half_open.successes >= self.config.success_threshold {
                            info!(
                                service = %self.name,
                                successes = inner.half_open.successes,
                                "Circuit breaker closing after successful recovery"
                            );
                            self.transition(&mut inner, CircuitState::Closed, now, &mut events);
                        }
                    }
                }
                CallOutcome::Failure(elapsed, message) => {
                    self.record_failure(&mut inner, now, elapsed, false, message, &mut events);
                }
                CallOutcome::Timeout(elapsed) => {
                    let message = format!("timed out after {}ms", elapsed.as_millis());
                    self.record_failure(&mut inner, now, elapsed, true, message, &mut events);
                }
                CallOutcome::Cancelled => {
                    inner.totals.total += 1;
                    inner.totals.cancelled += 1;
                    if inner.state == CircuitState::HalfOpen && inner.half_open.requests > 0 {
                        // hand the probe slot back so another caller can try
                        inner.half_open.requests -= 1;
                    }
                    debug!(service = %self.name, "Guarded call cancelled by caller");
                }
            }
        }
        self.emit_all(&events);
    }

    fn record_failure(
        &self,
        inner: &mut BreakerInner,
        now: Instant,
        elapsed: Duration,
        is_timeout: bool,
        message: String,
        events: &mut Vec<CircuitBreakerEvent>,
    ) {
        inner.totals.total += 1;
        inner.totals.failed += 1;
        if is_timeout {
            inner.totals.timeouts += 1;
        }
        inner.window.requests += 1;
        inner.window.failures += 1;

        let kind = if is_timeout {
            CircuitBreakerEventKind::Timeout
        } else {
            CircuitBreakerEventKind::Failure
        };
        events.push(
            CircuitBreakerEvent::new(&self.name, kind, inner.state)
                .with_duration(elapsed)
                .with_error(message),
        );

        match inner.state {
            CircuitState::HalfOpen => {
                inner.half_open.failures += 1;
                warn!(
                    service = %self.name,
                    "Circuit breaker re-opening after half-open failure"
                );
                self.transition(inner, CircuitState::Open, now, events);
            }
            CircuitState::Closed => {
                let window = &inner.window;
                let enough_requests = window.requests >= self.config.minimum_request_threshold;
                let too_many_failures = window.failures >= self.config.failure_threshold
                    || window.failure_rate() >= self.config.failure_rate_threshold;
                if enough_requests && too_many_failures {
                    warn!(
                        service = %self.name,
                        failures = window.failures,
                        requests = window.requests,
                        failure_rate = window.failure_rate(),
                        "Circuit breaker opening due to failures"
                    );
                    self.transition(inner, CircuitState::Open, now, events);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Reset window counters once `window_size_seconds` has elapsed
    fn roll_window(&self, inner: &mut BreakerInner, now: Instant) {
        if now.duration_since(inner.window_started) >= self.config.window_size() {
            inner.window = Window::default();
            inner.window_started = now;
        }
    }

    fn transition(
        &self,
        inner: &mut BreakerInner,
        to: CircuitState,
        now: Instant,
        events: &mut Vec<CircuitBreakerEvent>,
    ) {
        let from = inner.state;
        inner.state = to;
        inner.last_state_change = now;
        inner.last_state_change_at = Utc::now();
        inner.half_open = HalfOpenCounters::default();

        match to {
            CircuitState::Open => {
                inner.consecutive_opens += 1;
                inner.current_backoff = self.config.backoff_for(inner.consecutive_opens);
            }
            CircuitState::Closed => {
                inner.consecutive_opens = 0;
                inner.current_backoff = self.config.recovery_timeout();
                inner.window = Window::default();
                inner.window_started = now;
            }
            CircuitState::HalfOpen => {}
        }

        if from != to {
            info!(
                service = %self.name,
                from = %from,
                to = %to,
                backoff_ms = inner.current_backoff.as_millis() as u64,
                "Circuit breaker state change"
            );
            events.push(CircuitBreakerEvent::state_change(&self.name, from, to));
        }
    }

    /// Open the circuit regardless of counters
    pub fn force_open(&self) {
        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            self.transition(&mut inner, CircuitState::Open, Instant::now(), &mut events);
        }
        info!(service = %self.name, "Circuit breaker forced open");
        self.emit_all(&events);
    }

    /// Close the circuit and reset window and backoff
    pub fn force_close(&self) {
        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            self.transition(&mut inner, CircuitState::Closed, Instant::now(), &mut events);
        }
        info!(service = %self.name, "Circuit breaker forced closed");
        self.emit_all(&events);
    }

    /// Return to the initial CLOSED state with all counters cleared
    pub fn reset(&self) {
        let previous = {
            let mut inner = self.lock();
            let previous = inner.state;
            *inner = BreakerInner::new(&self.config);
            previous
        };
        info!(service = %self.name, "Circuit breaker reset");
        if previous != CircuitState::Closed {
            self.listeners.emit(&CircuitBreakerEvent::state_change(
                &self.name,
                previous,
                CircuitState::Closed,
            ));
        }
    }

    /// Snapshot of the breaker's counters
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.lock();
        CircuitBreakerMetrics {
            service: self.name.clone(),
            state: inner.state,
            total_requests: inner.totals.total,
            successful_requests: inner.totals.successful,
            failed_requests: inner.totals.failed,
            timeout_requests: inner.totals.timeouts,
            cancelled_requests: inner.totals.cancelled,
            rejected_requests: inner.totals.rejected,
            fallback_executions: inner.totals.fallbacks,
            window_requests: inner.window.requests,
            window_successes: inner.window.successes,
            window_failures: inner.window.failures,
            window_failure_rate: inner.window.failure_rate(),
            half_open_requests: inner.half_open.requests,
            half_open_successes: inner.half_open.successes,
            half_open_failures: inner.half_open.failures,
            average_latency_ms: inner.average_latency_ms.unwrap_or(0.0),
            consecutive_opens: inner.consecutive_opens,
            current_backoff_ms: inner.current_backoff.as_millis() as u64,
            last_state_change: inner.last_state_change_at,
        }
    }

    fn emit_all(&self, events: &[CircuitBreakerEvent]) {
        for event in events {
            self.listeners.emit(event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Shared handle to a breaker
pub type SharedCircuitBreaker = Arc<CircuitBreaker>;
