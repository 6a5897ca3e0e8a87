// Copyright 2025 Cowboy AI, LLC.

//! Circuit breaker for calls to unreliable external dependencies
//!
//! One [`CircuitBreaker`] guards one dependency name. It fails fast while the
//! dependency is unhealthy, probes recovery through a bounded half-open state
//! and backs off exponentially across consecutive opens.

mod breaker;
mod config;
mod events;
mod registry;

pub use breaker::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerMetrics, SharedCircuitBreaker,
};
pub use config::CircuitBreakerConfig;
pub use events::{CircuitBreakerEvent, CircuitBreakerEventKind, CircuitState, EventListener};
pub use registry::CircuitBreakerRegistry;

#[cfg(test)]
mod tests;
