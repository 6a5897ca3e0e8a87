// Copyright 2025 Cowboy AI, LLC.

//! Top-level orchestration of workflow requests
//!
//! [`ReducerEngine::process`] is the only boundary that never returns an
//! error: validation, routing and handler failures, and handler panics, all
//! become a [`WorkflowOutput`] with `success == false`.

use super::input::{WorkflowInput, WorkflowOutput};
use super::metrics::{MetricsSummary, ReducerMetrics};
use super::router::{RouteStats, WorkflowRouter};
use super::subreducer::{Subreducer, SubreducerContext};
use crate::config::ReducerConfig;
use crate::errors::{ReducerError, ReducerResult};
use crate::events::{EventPublisher, InMemoryEventPublisher};
use crate::identifiers::CorrelationId;
use crate::infrastructure::{CircuitBreakerRegistry, InMemorySnapshotStore, SnapshotStore};
use crate::integration::DependencyContainer;
use crate::subreducers::document_regeneration::{
    self, DocumentGenerator, DocumentRegenerationSubreducer, TemplateDocumentGenerator,
};
use crate::workflow::normalize_workflow_type;
use futures::FutureExt;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Metrics bucket for requests without a workflow type
pub const INVALID_TYPE_BUCKET: &str = "<invalid>";

/// Metrics bucket for requests naming an unregistered workflow type
pub const UNSUPPORTED_TYPE_BUCKET: &str = "<unsupported>";

/// Orchestrates validation, routing and handler execution
pub struct ReducerEngine {
    router: WorkflowRouter,
    container: Arc<DependencyContainer>,
    metrics: ReducerMetrics,
    running: AtomicBool,
}

impl std::fmt::Debug for ReducerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReducerEngine")
            .field("workflow_types", &self.router.supported_workflow_types())
            .field("running", &self.is_running())
            .finish()
    }
}

impl ReducerEngine {
    /// Engine with built-in workflows and in-memory collaborators
    pub fn new(config: ReducerConfig) -> ReducerResult<Self> {
        Self::builder().config(config).build()
    }

    /// Start configuring an engine
    pub fn builder() -> ReducerEngineBuilder {
        ReducerEngineBuilder::default()
    }

    /// Run one workflow request
    pub async fn process(&self, input: WorkflowInput) -> WorkflowOutput {
        let started = Instant::now();
        let correlation_id = input.correlation_id.unwrap_or_default();
        let workflow_type = input.workflow_type.clone();

        let result = AssertUnwindSafe(self.run(input, correlation_id))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic_message(panic.as_ref());
                error!(
                    workflow_type = %workflow_type,
                    correlation_id = %correlation_id,
                    panic = %message,
                    "Subreducer panicked"
                );
                Err(ReducerError::Internal(format!("subreducer panicked: {message}")))
            });

        self.finish(&workflow_type, correlation_id, started, result)
    }

    /// Run one workflow request given as raw JSON
    pub async fn process_value(&self, value: Value) -> WorkflowOutput {
        let started = Instant::now();
        match WorkflowInput::from_value(value.clone()) {
            Ok(input) => self.process(input).await,
            Err(err) => {
                let workflow_type = value
                    .get("workflow_type")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let correlation_id = value
                    .get("correlation_id")
                    .and_then(Value::as_str)
                    .and_then(CorrelationId::parse)
                    .unwrap_or_default();
                self.finish(&workflow_type, correlation_id, started, Err(err))
            }
        }
    }

    async fn run(
        &self,
        input: WorkflowInput,
        correlation_id: CorrelationId,
    ) -> ReducerResult<Value> {
        if !self.is_running() {
            return Err(ReducerError::Internal("reducer engine is shut down".to_string()));
        }
        input.validate()?;

        let routed = self
            .router
            .route(&input.workflow_type, &input.instance_id, &input.data)
            .await?;
        let context = SubreducerContext {
            workflow_type: routed.workflow_type().to_string(),
            instance_id: input.instance_id,
            correlation_id,
            data: input.data,
            routing_key: routed.routing_key().clone(),
        };

        let result = routed.process_workflow(context).await?;
        if result.success {
            Ok(result
                .result_data
                .unwrap_or_else(|| Value::Object(Map::new())))
        } else {
            Err(ReducerError::domain(
                routed.workflow_type(),
                result
                    .error_message
                    .unwrap_or_else(|| "workflow did not complete".to_string()),
            ))
        }
    }

    fn finish(
        &self,
        workflow_type: &str,
        correlation_id: CorrelationId,
        started: Instant,
        result: ReducerResult<Value>,
    ) -> WorkflowOutput {
        let elapsed = started.elapsed();
        let execution_time_ms = elapsed.as_millis() as u64;

        // only registered types get their own bucket
        let metric_key = match normalize_workflow_type(workflow_type) {
            key if key.is_empty() => INVALID_TYPE_BUCKET.to_string(),
            key if self.router.is_supported(&key) => key,
            _ => UNSUPPORTED_TYPE_BUCKET.to_string(),
        };
        self.metrics.record(&metric_key, result.is_ok(), elapsed);

        match result {
            Ok(data) => {
                debug!(
                    workflow_type = %workflow_type,
                    correlation_id = %correlation_id,
                    execution_time_ms,
                    "Workflow succeeded"
                );
                WorkflowOutput::succeeded(workflow_type, correlation_id, data, execution_time_ms)
            }
            Err(err) => {
                warn!(
                    workflow_type = %workflow_type,
                    correlation_id = %correlation_id,
                    execution_time_ms,
                    error = %err,
                    "Workflow failed"
                );
                WorkflowOutput::failed(workflow_type, correlation_id, err.to_string(), execution_time_ms)
            }
        }
    }

    /// Aggregate processing metrics
    pub fn metrics(&self) -> MetricsSummary {
        self.metrics.summary()
    }

    /// Per-route call accounting
    pub fn route_stats(&self) -> HashMap<String, RouteStats> {
        self.router.route_stats()
    }

    /// Registered workflow types
    pub fn supported_workflow_types(&self) -> Vec<String> {
        self.router.supported_workflow_types()
    }

    /// Container the engine resolves collaborators from
    pub fn container(&self) -> &Arc<DependencyContainer> {
        &self.container
    }

    /// Whether the engine accepts requests
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop accepting requests and drop constructed handlers
    ///
    /// Requests started before the call finish normally; later requests fail.
    pub async fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.router.clear_cache().await;
            info!("Reducer engine stopped");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

type PendingRegistration = (
    String,
    Box<dyn Fn(&DependencyContainer) -> ReducerResult<Arc<dyn Subreducer>> + Send + Sync>,
);

/// Wires configuration, collaborators and subreducers into an engine
///
/// Collaborators not supplied explicitly or through the container fall back
/// to in-memory implementations.
#[derive(Default)]
pub struct ReducerEngineBuilder {
    config: ReducerConfig,
    container: Option<DependencyContainer>,
    publisher: Option<Arc<dyn EventPublisher>>,
    snapshot_store: Option<Arc<dyn SnapshotStore>>,
    generator: Option<Arc<dyn DocumentGenerator>>,
    subreducers: Vec<PendingRegistration>,
}

impl ReducerEngineBuilder {
    /// Use `config`
    pub fn config(mut self, config: ReducerConfig) -> Self {
        self.config = config;
        self
    }

    /// Start from a container holding additional services
    pub fn container(mut self, container: DependencyContainer) -> Self {
        self.container = Some(container);
        self
    }

    /// Publish workflow events through `publisher`
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Persist checkpoints in `store`
    pub fn snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshot_store = Some(store);
        self
    }

    /// Regenerate documents with `generator`
    pub fn document_generator(mut self, generator: Arc<dyn DocumentGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Register an additional workflow type
    pub fn subreducer<F>(mut self, workflow_type: &str, factory: F) -> Self
    where
        F: Fn(&DependencyContainer) -> ReducerResult<Arc<dyn Subreducer>> + Send + Sync + 'static,
    {
        self.subreducers
            .push((workflow_type.to_string(), Box::new(factory)));
        self
    }

    /// Validate the configuration and build the engine
    pub fn build(self) -> ReducerResult<ReducerEngine> {
        self.config.validate()?;
        let container = self.container.unwrap_or_default();

        if !container.contains::<ReducerConfig>() {
            container.register_instance(Arc::new(self.config.clone()))?;
        }
        if !container.contains::<CircuitBreakerRegistry>() {
            container.register_instance(Arc::new(self.config.circuit_breaker_registry()?))?;
        }
        register_or_default::<dyn SnapshotStore>(&container, self.snapshot_store, || {
            Arc::new(InMemorySnapshotStore::new(self.config.snapshot_store.clone())) as Arc<dyn SnapshotStore>
        })?;
        register_or_default::<dyn EventPublisher>(&container, self.publisher, || {
            Arc::new(InMemoryEventPublisher::new()) as Arc<dyn EventPublisher>
        })?;
        register_or_default::<dyn DocumentGenerator>(&container, self.generator, || {
            Arc::new(TemplateDocumentGenerator) as Arc<dyn DocumentGenerator>
        })?;

        let container = Arc::new(container);
        let mut router = WorkflowRouter::new(container.clone());
        router.register(
            document_regeneration::WORKFLOW_TYPE,
            DocumentRegenerationSubreducer::from_container,
        )?;
        for (workflow_type, factory) in self.subreducers {
            router.register(&workflow_type, factory)?;
        }

        info!(
            workflow_types = ?router.supported_workflow_types(),
            "Reducer engine started"
        );
        Ok(ReducerEngine {
            router,
            container,
            metrics: ReducerMetrics::new(),
            running: AtomicBool::new(true),
        })
    }
}

/// Register `explicit`, or `default()` when the container has no `T` yet
fn register_or_default<T>(
    container: &DependencyContainer,
    explicit: Option<Arc<T>>,
    default: impl FnOnce() -> Arc<T>,
) -> ReducerResult<()>
where
    T: ?Sized + Send + Sync + 'static,
{
    match explicit {
        Some(service) => container.register_instance(service),
        None if container.contains::<T>() => Ok(()),
        None => container.register_instance(default()),
    }
}
