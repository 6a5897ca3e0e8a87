// Copyright 2025 Cowboy AI, LLC.

//! Running metrics of the reducer engine

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Execution times kept per workflow type
const MAX_SAMPLES: usize = 1000;

#[derive(Debug, Default)]
struct TypeCounters {
    processed: u64,
    succeeded: u64,
    failed: u64,
    durations: Vec<Duration>,
}

/// Engine metrics
#[derive(Debug, Clone, Default)]
pub struct ReducerMetrics {
    per_type: Arc<RwLock<HashMap<String, TypeCounters>>>,
}

impl ReducerMetrics {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one processed request
    pub fn record(&self, workflow_type: &str, success: bool, duration: Duration) {
        let mut per_type = self.per_type.write().unwrap_or_else(PoisonError::into_inner);
        let counters = per_type.entry(workflow_type.to_string()).or_default();
        counters.processed += 1;
        if success {
            counters.succeeded += 1;
        } else {
            counters.failed += 1;
        }
        counters.durations.push(duration);
        if counters.durations.len() > MAX_SAMPLES {
            let excess = counters.durations.len() - MAX_SAMPLES;
            counters.durations.drain(..excess);
        }
    }

    /// Requests processed for one workflow type
    pub fn processed(&self, workflow_type: &str) -> u64 {
        self.per_type
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(workflow_type)
            .map(|c| c.processed)
            .unwrap_or(0)
    }

    /// Summary across all workflow types
    pub fn summary(&self) -> MetricsSummary {
        let per_type = self.per_type.read().unwrap_or_else(PoisonError::into_inner);

        let mut all = Vec::new();
        let mut by_type = HashMap::new();
        for (workflow_type, counters) in per_type.iter() {
            all.extend_from_slice(&counters.durations);
            by_type.insert(
                workflow_type.clone(),
                TypeMetrics {
                    processed: counters.processed,
                    succeeded: counters.succeeded,
                    failed: counters.failed,
                    average_execution_ms: average_ms(&counters.durations),
                },
            );
        }

        MetricsSummary {
            total_processed: by_type.values().map(|m| m.processed).sum(),
            total_succeeded: by_type.values().map(|m| m.succeeded).sum(),
            total_failed: by_type.values().map(|m| m.failed).sum(),
            average_execution_ms: average_ms(&all),
            p95_execution_ms: percentile_ms(&mut all, 95.0),
            by_type,
        }
    }

    /// Forget everything recorded
    pub fn reset(&self) {
        self.per_type
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn average_ms(durations: &[Duration]) -> f64 {
    if durations.is_empty() {
        return 0.0;
    }
    let total: Duration = durations.iter().sum();
    total.as_secs_f64() * 1000.0 / durations.len() as f64
}

fn percentile_ms(durations: &mut [Duration], percentile: f64) -> f64 {
    if durations.is_empty() {
        return 0.0;
    }
    durations.sort();
    let index = ((durations.len() as f64 - 1.0) * percentile / 100.0) as usize;
    durations[index].as_secs_f64() * 1000.0
}

/// Counters for one workflow type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeMetrics {
    /// Requests processed
    pub processed: u64,
    /// Requests that succeeded
    pub succeeded: u64,
    /// Requests that failed
    pub failed: u64,
    /// Mean execution time
    pub average_execution_ms: f64,
}

/// Snapshot of engine metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    /// Requests processed
    pub total_processed: u64,
    /// Requests that succeeded
    pub total_succeeded: u64,
    /// Requests that failed
    pub total_failed: u64,
    /// Mean execution time over retained samples
    pub average_execution_ms: f64,
    /// 95th percentile execution time over retained samples
    pub p95_execution_ms: f64,
    /// Per workflow type breakdown
    pub by_type: HashMap<String, TypeMetrics>,
}
