// Copyright 2025 Cowboy AI, LLC.

//! Circuit breaker behaviour tests
//!
//! These run on a paused tokio clock so backoff and deadlines are exact.

use super::*;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{advance, sleep};

fn config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 3,
        failure_rate_threshold: 1.0,
        minimum_request_threshold: 3,
        recovery_timeout_seconds: 10.0,
        success_threshold: 2,
        half_open_max_requests: 2,
        request_timeout_seconds: 5.0,
        window_size_seconds: 60.0,
        exponential_backoff: true,
        max_backoff_seconds: 100.0,
    }
}

async fn fail(breaker: &CircuitBreaker) -> CircuitBreakerError<String> {
    breaker
        .call(|| async { Err::<(), String>("boom".to_string()) })
        .await
        .unwrap_err()
}

async fn succeed(breaker: &CircuitBreaker) {
    breaker
        .call(|| async { Ok::<_, String>(()) })
        .await
        .unwrap();
}

async fn open_breaker(breaker: &CircuitBreaker) {
    for _ in 0..3 {
        fail(breaker).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_three_failures_open_and_fourth_call_fails_fast() {
    let breaker = CircuitBreaker::new("generator", config()).unwrap();

    for _ in 0..3 {
        let err = fail(&breaker).await;
        assert!(matches!(err, CircuitBreakerError::Operation { .. }));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let invoked = AtomicBool::new(false);
    let err = breaker
        .call(|| async {
            invoked.store(true, Ordering::SeqCst);
            Ok::<_, String>(())
        })
        .await
        .unwrap_err();
    assert!(err.is_open());
    assert!(!invoked.load(Ordering::SeqCst));

    let metrics = breaker.metrics();
    assert_eq!(metrics.rejected_requests, 1);
    assert_eq!(metrics.failed_requests, 3);
    assert_eq!(metrics.consecutive_opens, 1);
    assert_eq!(metrics.current_backoff_ms, 10_000);
}

#[tokio::test(start_paused = true)]
async fn test_failure_rate_opens_circuit() {
    let breaker = CircuitBreaker::new(
        "generator",
        CircuitBreakerConfig {
            failure_threshold: 100,
            failure_rate_threshold: 0.5,
            minimum_request_threshold: 4,
            ..config()
        },
    ).unwrap();

    succeed(&breaker).await;
    fail(&breaker).await;
    succeed(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Closed);

    // 4th request: 2 failures out of 4 reaches the 50% rate
    fail(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_minimum_request_threshold_holds_circuit_closed() {
    let breaker = CircuitBreaker::new(
        "generator",
        CircuitBreakerConfig {
            failure_threshold: 1,
            minimum_request_threshold: 5,
            ..config()
        },
    ).unwrap();
    for _ in 0..4 {
        fail(&breaker).await;
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
    fail(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_window_resets_after_window_size() {
    let breaker = CircuitBreaker::new("generator", config()).unwrap();
    fail(&breaker).await;
    fail(&breaker).await;
    assert_eq!(breaker.metrics().window_failures, 2);

    advance(Duration::from_secs(61)).await;
    fail(&breaker).await;

    let metrics = breaker.metrics();
    assert_eq!(metrics.window_failures, 1);
    assert_eq!(metrics.window_requests, 1);
    assert_eq!(metrics.failed_requests, 3);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_open_admits_first_call_after_backoff_as_half_open() {
    let breaker = Arc::new(CircuitBreaker::new("generator", config()).unwrap());
    open_breaker(&breaker).await;

    advance(Duration::from_secs(9)).await;
    assert!(fail(&breaker).await.is_open());

    advance(Duration::from_secs(1)).await;
    let observed = Arc::new(Mutex::new(None));
    let inner = breaker.clone();
    let seen = observed.clone();
    breaker
        .call(|| async move {
            *seen.lock().unwrap() = Some(inner.state());
            Ok::<_, String>(())
        })
        .await
        .unwrap();

    assert_eq!(*observed.lock().unwrap(), Some(CircuitState::HalfOpen));
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    assert_eq!(breaker.metrics().half_open_successes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_successes_close_circuit() {
    let breaker = CircuitBreaker::new("generator", config()).unwrap();
    open_breaker(&breaker).await;
    advance(Duration::from_secs(10)).await;

    succeed(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    succeed(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Closed);

    let metrics = breaker.metrics();
    assert_eq!(metrics.window_requests, 0);
    assert_eq!(metrics.consecutive_opens, 0);
    assert_eq!(metrics.current_backoff_ms, 10_000);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_failure_reopens_with_doubled_backoff() {
    let breaker = CircuitBreaker::new("generator", config()).unwrap();
    open_breaker(&breaker).await;

    advance(Duration::from_secs(10)).await;
    fail(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(breaker.metrics().current_backoff_ms, 20_000);

    advance(Duration::from_secs(15)).await;
    assert!(fail(&breaker).await.is_open());

    advance(Duration::from_secs(5)).await;
    fail(&breaker).await;
    assert_eq!(breaker.metrics().current_backoff_ms, 40_000);
    assert_eq!(breaker.metrics().consecutive_opens, 3);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_is_capped() {
    let breaker = CircuitBreaker::new(
        "generator",
        CircuitBreakerConfig {
            max_backoff_seconds: 25.0,
            ..config()
        },
    ).unwrap();
    open_breaker(&breaker).await;
    let mut previous = breaker.metrics().current_backoff_ms;
    for _ in 0..4 {
        advance(Duration::from_millis(previous)).await;
        fail(&breaker).await;
        let current = breaker.metrics().current_backoff_ms;
        assert!(current >= previous);
        assert!(current <= 25_000);
        previous = current;
    }
    assert_eq!(previous, 25_000);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_limits_trial_requests() {
    let breaker = Arc::new(CircuitBreaker::new(
        "generator",
        CircuitBreakerConfig {
            success_threshold: 1,
            half_open_max_requests: 1,
            ..config()
        },
    ).unwrap());
    open_breaker(&breaker).await;
    advance(Duration::from_secs(10)).await;

    let probe = {
        let breaker = breaker.clone();
        tokio::spawn(async move {
            breaker
                .call(|| async {
                    sleep(Duration::from_secs(1)).await;
                    Ok::<_, String>(())
                })
                .await
        })
    };
    tokio::task::yield_now().await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    assert!(fail(&breaker).await.is_open());

    probe.await.unwrap().unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_counts_as_failure() {
    let breaker = CircuitBreaker::new("generator", config()).unwrap();
    let err = breaker
        .call_with_timeout(
            || async {
                sleep(Duration::from_secs(5)).await;
                Ok::<_, String>(())
            },
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    let metrics = breaker.metrics();
    assert_eq!(metrics.timeout_requests, 1);
    assert_eq!(metrics.failed_requests, 1);
    assert_eq!(metrics.window_failures, 1);
    assert_eq!(metrics.total_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_default_request_timeout_applies() {
    let breaker = CircuitBreaker::new("generator", config()).unwrap();
    let err = breaker
        .call(|| async {
            sleep(Duration::from_secs(6)).await;
            Ok::<_, String>(())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CircuitBreakerError::Timeout { timeout, .. } if timeout == Duration::from_secs(5)));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_call_recorded_exactly_once() {
    let breaker = Arc::new(CircuitBreaker::new("generator", config()).unwrap());
    let task = {
        let breaker = breaker.clone();
        tokio::spawn(async move {
            breaker
                .call(|| async {
                    sleep(Duration::from_secs(3)).await;
                    Ok::<_, String>(())
                })
                .await
        })
    };
    tokio::task::yield_now().await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    let metrics = breaker.metrics();
    assert_eq!(metrics.total_requests, 1);
    assert_eq!(metrics.cancelled_requests, 1);
    assert_eq!(metrics.failed_requests, 0);
    assert_eq!(metrics.successful_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_runs_when_open() {
    let breaker = CircuitBreaker::new("generator", config()).unwrap();
    let fallbacks = Arc::new(AtomicU32::new(0));
    let counter = fallbacks.clone();
    breaker.add_listener(
        CircuitBreakerEventKind::FallbackExecuted,
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );
    open_breaker(&breaker).await;

    let invoked = AtomicBool::new(false);
    let value = breaker
        .call_with_fallback(
            || async {
                invoked.store(true, Ordering::SeqCst);
                Ok::<_, String>("primary")
            },
            || async { Ok("cached") },
            None,
        )
        .await
        .unwrap();

    assert_eq!(value, "cached");
    assert!(!invoked.load(Ordering::SeqCst));
    assert_eq!(fallbacks.load(Ordering::SeqCst), 1);
    assert_eq!(breaker.metrics().fallback_executions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_not_used_for_operation_failure() {
    let breaker = CircuitBreaker::new("generator", config()).unwrap();
    let err = breaker
        .call_with_fallback(
            || async { Err::<&str, _>("broken".to_string()) },
            || async { Ok("cached") },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CircuitBreakerError::Operation { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_latency_moving_average() {
    let breaker = CircuitBreaker::new("generator", config()).unwrap();
    for millis in [100u64, 200] {
        breaker
            .call(|| async move {
                sleep(Duration::from_millis(millis)).await;
                Ok::<_, String>(())
            })
            .await
            .unwrap();
    }
    let avg = breaker.metrics().average_latency_ms;
    assert!((avg - 110.0).abs() < 2.0, "unexpected average {avg}");
}

#[tokio::test(start_paused = true)]
async fn test_state_change_events() {
    let breaker = CircuitBreaker::new("generator", config()).unwrap();
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = changes.clone();
    breaker.add_listener(
        CircuitBreakerEventKind::StateChange,
        Arc::new(move |event| {
            sink.lock()
                .unwrap()
                .push((event.previous_state.unwrap(), event.state));
        }),
    );

    open_breaker(&breaker).await;
    advance(Duration::from_secs(10)).await;
    succeed(&breaker).await;
    succeed(&breaker).await;

    assert_eq!(
        *changes.lock().unwrap(),
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_panicking_listener_does_not_break_calls() {
    let breaker = CircuitBreaker::new("generator", config()).unwrap();
    breaker.add_listener(
        CircuitBreakerEventKind::Success,
        Arc::new(|_| panic!("listener bug")),
    );
    succeed(&breaker).await;
    assert_eq!(breaker.metrics().successful_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_force_open_close_and_reset() {
    let breaker = CircuitBreaker::new("generator", config()).unwrap();

    breaker.force_open();
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(fail(&breaker).await.is_open());

    breaker.force_close();
    assert_eq!(breaker.state(), CircuitState::Closed);
    succeed(&breaker).await;

    breaker.reset();
    let metrics = breaker.metrics();
    assert_eq!(metrics.state, CircuitState::Closed);
    assert_eq!(metrics.total_requests, 0);
    assert_eq!(metrics.rejected_requests, 0);
    assert_eq!(metrics.consecutive_opens, 0);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_error_converts_to_reducer_error() {
    let breaker = CircuitBreaker::new("generator", config()).unwrap();
    breaker.force_open();
    let err: crate::errors::ReducerError = fail(&breaker).await.into();
    assert!(matches!(
        err,
        crate::errors::ReducerError::CircuitOpen { ref service } if service == "generator"
    ));
}

#[test]
fn test_new_rejects_unrepresentable_durations() {
    for recovery_timeout_seconds in [-1.0, f64::INFINITY, 1e300] {
        let result = CircuitBreaker::new(
            "generator",
            CircuitBreakerConfig {
                recovery_timeout_seconds,
                ..config()
            },
        );
        assert!(
            matches!(result, Err(crate::errors::ReducerError::Configuration(_))),
            "accepted recovery_timeout_seconds = {recovery_timeout_seconds}"
        );
    }
}
