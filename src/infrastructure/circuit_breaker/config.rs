// Copyright 2025 Cowboy AI, LLC.

//! Circuit breaker configuration

use crate::errors::{ReducerError, ReducerResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for one guarded dependency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures in the current window that open the circuit
    pub failure_threshold: u32,

    /// Failure rate (0.0..=1.0) in the current window that opens the circuit
    pub failure_rate_threshold: f64,

    /// Requests the window must hold before either threshold applies
    pub minimum_request_threshold: u32,

    /// Base time the circuit stays open before probing
    pub recovery_timeout_seconds: f64,

    /// Half-open successes needed to close the circuit
    pub success_threshold: u32,

    /// Trial calls admitted while half-open
    pub half_open_max_requests: u32,

    /// Default deadline for guarded calls
    pub request_timeout_seconds: f64,

    /// Length of the rolling failure window
    pub window_size_seconds: f64,

    /// Double the open period on each consecutive open
    pub exponential_backoff: bool,

    /// Upper bound for the open period
    pub max_backoff_seconds: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_rate_threshold: 0.5,
            minimum_request_threshold: 3,
            recovery_timeout_seconds: 60.0,
            success_threshold: 3,
            half_open_max_requests: 3,
            request_timeout_seconds: 30.0,
            window_size_seconds: 60.0,
            exponential_backoff: true,
            max_backoff_seconds: 300.0,
        }
    }
}

impl CircuitBreakerConfig {
    /// Base open period
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.recovery_timeout_seconds)
    }

    /// Default call deadline
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_seconds)
    }

    /// Rolling window length
    pub fn window_size(&self) -> Duration {
        Duration::from_secs_f64(self.window_size_seconds)
    }

    /// Open period cap
    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.max_backoff_seconds)
    }

    /// Open period after the `consecutive_opens`-th consecutive open
    ///
    /// `min(recovery_timeout * 2^(consecutive_opens - 1), max_backoff)` when
    /// exponential backoff is enabled, otherwise the recovery timeout.
    pub fn backoff_for(&self, consecutive_opens: u32) -> Duration {
        if !self.exponential_backoff || consecutive_opens <= 1 {
            return self.recovery_timeout().min(self.max_backoff());
        }
        let exponent = (consecutive_opens - 1).min(63) as i32;
        let seconds = self.recovery_timeout_seconds * 2f64.powi(exponent);
        Duration::from_secs_f64(seconds.min(self.max_backoff_seconds))
    }

    /// Check value ranges
    pub fn validate(&self) -> ReducerResult<()> {
        let positive = [
            ("recovery_timeout_seconds", self.recovery_timeout_seconds),
            ("request_timeout_seconds", self.request_timeout_seconds),
            ("window_size_seconds", self.window_size_seconds),
            ("max_backoff_seconds", self.max_backoff_seconds),
        ];
        for (name, value) in positive {
            if value <= 0.0 || Duration::try_from_secs_f64(value).is_err() {
                return Err(ReducerError::Configuration(format!(
                    "{name} must be a positive number of seconds, got {value}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.failure_rate_threshold) {
            return Err(ReducerError::Configuration(format!(
                "failure_rate_threshold must be within 0.0..=1.0, got {}",
                self.failure_rate_threshold
            )));
        }
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err(ReducerError::Configuration(
                "failure_threshold and success_threshold must be at least 1".to_string(),
            ));
        }
        if self.half_open_max_requests < self.success_threshold {
            return Err(ReducerError::Configuration(format!(
                "half_open_max_requests ({}) must be >= success_threshold ({})",
                self.half_open_max_requests, self.success_threshold
            )));
        }
        if self.max_backoff_seconds < self.recovery_timeout_seconds {
            return Err(ReducerError::Configuration(
                "max_backoff_seconds must be >= recovery_timeout_seconds".to_string(),
            ));
        }
        Ok(())
    }
}
