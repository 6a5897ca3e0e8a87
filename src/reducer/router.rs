// Copyright 2025 Cowboy AI, LLC.

//! Routing of workflow requests to their subreducer
//!
//! Handlers are registered per workflow type as factories at startup. Each
//! type owns its own slot, so constructing one handler never blocks routing
//! to another. The first request for a type builds its handler exactly once
//! even under concurrent first access.

use super::subreducer::{Subreducer, SubreducerContext, SubreducerResult};
use crate::errors::{ReducerError, ReducerResult};
use crate::identifiers::RoutingKey;
use crate::integration::DependencyContainer;
use crate::workflow::normalize_workflow_type;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Builds the handler for one workflow type
pub type SubreducerFactory =
    Arc<dyn Fn(&DependencyContainer) -> ReducerResult<Arc<dyn Subreducer>> + Send + Sync>;

/// Call accounting for one route
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteStats {
    /// Calls dispatched
    pub calls: u64,
    /// Calls that returned an error or an unsuccessful result
    pub failures: u64,
    /// Summed handler time
    pub total_duration_ms: f64,
    /// Mean handler time
    pub average_duration_ms: f64,
    /// When the route was last used
    pub last_called_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct RouteCounters {
    stats: Mutex<RouteStats>,
}

impl RouteCounters {
    fn record(&self, elapsed_ms: f64, failed: bool) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.calls += 1;
        if failed {
            stats.failures += 1;
        }
        stats.total_duration_ms += elapsed_ms;
        stats.average_duration_ms = stats.total_duration_ms / stats.calls as f64;
        stats.last_called_at = Some(Utc::now());
    }

    fn snapshot(&self) -> RouteStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

struct HandlerSlot {
    factory: SubreducerFactory,
    instance: RwLock<Option<Arc<dyn Subreducer>>>,
    counters: Arc<RouteCounters>,
}

impl HandlerSlot {
    async fn resolve(
        &self,
        workflow_type: &str,
        container: &DependencyContainer,
    ) -> ReducerResult<Arc<dyn Subreducer>> {
        if let Some(handler) = self.instance.read().await.as_ref() {
            return Ok(handler.clone());
        }

        let mut slot = self.instance.write().await;
        if let Some(handler) = slot.as_ref() {
            return Ok(handler.clone());
        }

        debug!(workflow_type = %workflow_type, "Constructing subreducer");
        let handler = (self.factory)(container)?;
        *slot = Some(handler.clone());
        Ok(handler)
    }
}

/// Dispatches workflow requests to registered subreducers
pub struct WorkflowRouter {
    container: Arc<DependencyContainer>,
    slots: HashMap<String, HandlerSlot>,
}

impl WorkflowRouter {
    /// Create a router resolving handler dependencies from `container`
    pub fn new(container: Arc<DependencyContainer>) -> Self {
        Self {
            container,
            slots: HashMap::new(),
        }
    }

    /// Register the factory for a workflow type
    pub fn register<F>(&mut self, workflow_type: &str, factory: F) -> ReducerResult<()>
    where
        F: Fn(&DependencyContainer) -> ReducerResult<Arc<dyn Subreducer>> + Send + Sync + 'static,
    {
        let workflow_type = normalize_workflow_type(workflow_type);
        if workflow_type.is_empty() {
            return Err(ReducerError::validation("workflow_type must not be empty"));
        }
        if self.slots.contains_key(&workflow_type) {
            return Err(ReducerError::AlreadyExists(format!(
                "Subreducer for workflow type '{workflow_type}' already registered"
            )));
        }
        info!(workflow_type = %workflow_type, "Registered subreducer");
        self.slots.insert(
            workflow_type,
            HandlerSlot {
                factory: Arc::new(factory),
                instance: RwLock::new(None),
                counters: Arc::default(),
            },
        );
        Ok(())
    }

    /// Registered workflow types, sorted
    pub fn supported_workflow_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.slots.keys().cloned().collect();
        types.sort();
        types
    }

    /// Whether `workflow_type` has a registered handler
    pub fn is_supported(&self, workflow_type: &str) -> bool {
        self.slots
            .contains_key(&normalize_workflow_type(workflow_type))
    }

    /// Find the handler for a request
    pub async fn route(
        &self,
        workflow_type: &str,
        instance_id: &str,
        workflow_data: &Value,
    ) -> ReducerResult<RoutedSubreducer> {
        let normalized = normalize_workflow_type(workflow_type);
        if normalized.is_empty() {
            return Err(ReducerError::validation("workflow_type must not be empty"));
        }
        if instance_id.trim().is_empty() {
            return Err(ReducerError::validation("instance_id must not be empty"));
        }

        let Some(slot) = self.slots.get(&normalized) else {
            return Err(ReducerError::UnsupportedWorkflowType {
                workflow_type: workflow_type.to_string(),
                supported: self.supported_workflow_types(),
            });
        };

        if !workflow_data.is_object() {
            return Err(ReducerError::validation(
                "workflow data must be a structured mapping",
            ));
        }

        let handler = slot.resolve(&normalized, &self.container).await?;
        let routing_key = RoutingKey::compute(&normalized, instance_id);
        debug!(
            workflow_type = %normalized,
            instance_id = %instance_id,
            routing_key = %routing_key,
            "Routed workflow"
        );

        Ok(RoutedSubreducer {
            workflow_type: normalized,
            routing_key,
            handler,
            counters: slot.counters.clone(),
        })
    }

    /// Call accounting per workflow type
    pub fn route_stats(&self) -> HashMap<String, RouteStats> {
        self.slots
            .iter()
            .map(|(workflow_type, slot)| (workflow_type.clone(), slot.counters.snapshot()))
            .collect()
    }

    /// Drop constructed handlers; the next request rebuilds them
    pub async fn clear_cache(&self) {
        for slot in self.slots.values() {
            *slot.instance.write().await = None;
        }
        debug!("Cleared subreducer cache");
    }
}

/// A resolved handler together with its routing key and call accounting
pub struct RoutedSubreducer {
    workflow_type: String,
    routing_key: RoutingKey,
    handler: Arc<dyn Subreducer>,
    counters: Arc<RouteCounters>,
}

impl std::fmt::Debug for RoutedSubreducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutedSubreducer")
            .field("workflow_type", &self.workflow_type)
            .field("routing_key", &self.routing_key)
            .finish()
    }
}

impl RoutedSubreducer {
    /// Normalized workflow type
    pub fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    /// Routing key of the request
    pub fn routing_key(&self) -> &RoutingKey {
        &self.routing_key
    }

    /// The underlying handler
    pub fn handler(&self) -> &Arc<dyn Subreducer> {
        &self.handler
    }

    /// Run the handler, recording the call against its route
    pub async fn process_workflow(
        &self,
        context: SubreducerContext,
    ) -> ReducerResult<SubreducerResult> {
        let started = Instant::now();
        let result = self.handler.process_workflow(context).await;
        let failed = !matches!(&result, Ok(r) if r.success);
        self.counters
            .record(started.elapsed().as_secs_f64() * 1000.0, failed);
        result
    }
}
