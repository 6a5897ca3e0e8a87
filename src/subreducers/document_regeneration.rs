// Copyright 2025 Cowboy AI, LLC.

//! The `document_regeneration` workflow
//!
//! Payload: `{"document": {"title": string, "content": string, "format"?: "markdown" | "text"}}`.
//!
//! The document is rebuilt by a [`DocumentGenerator`] called through the
//! `document_generator` circuit breaker. Generator failures move the workflow
//! through FAILED -> RETRYING -> PROCESSING until the retry budget is spent or
//! the circuit opens. Lifecycle events are published fire-and-forget and the
//! workflow state is checkpointed according to the [`SnapshotPolicy`].

use crate::config::ReducerConfig;
use crate::errors::{ReducerError, ReducerResult};
use crate::events::{EventPublisher, WorkflowEventType};
use crate::infrastructure::{
    CheckpointTracker, CircuitBreakerRegistry, SnapshotPolicy, SnapshotStore,
};
use crate::integration::DependencyContainer;
use crate::reducer::{Subreducer, SubreducerContext, SubreducerResult};
use crate::workflow::{TransitionReason, WorkflowIdentity, WorkflowState, WorkflowStateModel};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Workflow type served by [`DocumentRegenerationSubreducer`]
pub const WORKFLOW_TYPE: &str = "document_regeneration";

/// Breaker name guarding the generator
pub const GENERATOR_SERVICE: &str = "document_generator";

/// Output format of a regenerated document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    /// Markdown with a level-one heading
    #[default]
    Markdown,
    /// Plain text with an underlined title
    Text,
}

/// Document to regenerate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRequest {
    /// Document title
    pub title: String,
    /// Source content
    pub content: String,
    /// Desired output format
    #[serde(default)]
    pub format: DocumentFormat,
}

impl DocumentRequest {
    /// Extract the request from workflow data
    pub fn from_data(data: &Value) -> ReducerResult<Self> {
        let Some(document) = data.get("document") else {
            return Err(ReducerError::domain(WORKFLOW_TYPE, "missing 'document' object"));
        };
        if !document.is_object() {
            return Err(ReducerError::domain(WORKFLOW_TYPE, "'document' must be an object"));
        }
        for field in ["title", "content"] {
            if !document.get(field).is_some_and(Value::is_string) {
                return Err(ReducerError::domain(
                    WORKFLOW_TYPE,
                    format!("'document.{field}' must be a string"),
                ));
            }
        }

        let request: Self = serde_json::from_value(document.clone())
            .map_err(|e| ReducerError::domain(WORKFLOW_TYPE, e.to_string()))?;
        if request.title.trim().is_empty() {
            return Err(ReducerError::domain(WORKFLOW_TYPE, "'document.title' must not be empty"));
        }
        Ok(request)
    }
}

/// Result of a regeneration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegeneratedDocument {
    /// Document title
    pub title: String,
    /// Regenerated content
    pub content: String,
    /// Format of `content`
    pub format: DocumentFormat,
    /// Words in the source content
    pub word_count: usize,
    /// blake3 digest of `content`
    pub content_hash: String,
    /// When the document was produced
    pub regenerated_at: DateTime<Utc>,
}

/// External dependency producing regenerated documents
#[async_trait]
pub trait DocumentGenerator: Send + Sync {
    /// Regenerate one document
    async fn regenerate(&self, request: &DocumentRequest) -> anyhow::Result<RegeneratedDocument>;
}

/// Deterministic generator normalizing whitespace under a title heading
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateDocumentGenerator;

#[async_trait]
impl DocumentGenerator for TemplateDocumentGenerator {
    async fn regenerate(&self, request: &DocumentRequest) -> anyhow::Result<RegeneratedDocument> {
        let paragraphs: Vec<String> = request
            .content
            .split("\n\n")
            .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|p| !p.is_empty())
            .collect();
        let body = paragraphs.join("\n\n");
        let title = request.title.trim();

        let content = match request.format {
            DocumentFormat::Markdown => format!("# {title}\n\n{body}\n"),
            DocumentFormat::Text => {
                format!("{title}\n{}\n\n{body}\n", "=".repeat(title.chars().count()))
            }
        };

        Ok(RegeneratedDocument {
            title: title.to_string(),
            word_count: request.content.split_whitespace().count(),
            content_hash: blake3::hash(content.as_bytes()).to_hex().to_string(),
            content,
            format: request.format,
            regenerated_at: Utc::now(),
        })
    }
}

/// Mutable bookkeeping of one run
struct Run {
    model: WorkflowStateModel,
    tracker: CheckpointTracker,
    events: Vec<String>,
}

/// Handler for `document_regeneration`
pub struct DocumentRegenerationSubreducer {
    breakers: Arc<CircuitBreakerRegistry>,
    snapshots: Arc<dyn SnapshotStore>,
    publisher: Arc<dyn EventPublisher>,
    generator: Arc<dyn DocumentGenerator>,
    policy: SnapshotPolicy,
    max_retries: u32,
}

impl DocumentRegenerationSubreducer {
    /// Create the handler from its collaborators
    pub fn new(
        breakers: Arc<CircuitBreakerRegistry>,
        snapshots: Arc<dyn SnapshotStore>,
        publisher: Arc<dyn EventPublisher>,
        generator: Arc<dyn DocumentGenerator>,
        policy: SnapshotPolicy,
        max_retries: u32,
    ) -> Self {
        Self {
            breakers,
            snapshots,
            publisher,
            generator,
            policy,
            max_retries,
        }
    }

    /// Build the handler from a dependency container
    ///
    /// Requires `ReducerConfig`, `CircuitBreakerRegistry`, `dyn SnapshotStore`,
    /// `dyn EventPublisher` and `dyn DocumentGenerator` registrations.
    pub fn from_container(container: &DependencyContainer) -> ReducerResult<Arc<dyn Subreducer>> {
        let config = container.resolve::<ReducerConfig>()?;
        Ok(Arc::new(Self::new(
            container.resolve::<CircuitBreakerRegistry>()?,
            container.resolve::<dyn SnapshotStore>()?,
            container.resolve::<dyn EventPublisher>()?,
            container.resolve::<dyn DocumentGenerator>()?,
            config.snapshot_policy.clone(),
            config.max_retries,
        )))
    }

    async fn transition(
        &self,
        run: &mut Run,
        target: WorkflowState,
        reason: TransitionReason,
    ) -> ReducerResult<()> {
        run.model.transition_with(target, Some(reason), HashMap::new())?;
        self.checkpoint(run, true).await
    }

    async fn checkpoint(&self, run: &mut Run, state_changed: bool) -> ReducerResult<()> {
        if !self.policy.should_snapshot(&run.tracker, state_changed) {
            return Ok(());
        }
        let payload = serde_json::to_vec(&run.model)?;
        let instance_id = run.model.identity().instance_id();
        let sequence = self.snapshots.next_sequence(instance_id).await?;
        let metadata = HashMap::from([
            ("state".to_string(), json!(run.model.current_state())),
            (
                "correlation_id".to_string(),
                json!(run.model.identity().correlation_id().to_string()),
            ),
        ]);
        self.snapshots
            .save_snapshot(instance_id, sequence, payload, run.tracker.total_events, metadata)
            .await?;
        run.tracker.record_snapshot(sequence);
        Ok(())
    }

    async fn emit(
        &self,
        run: &mut Run,
        event_type: WorkflowEventType,
        mut payload: Value,
    ) -> ReducerResult<()> {
        let identity = run.model.identity();
        if let Value::Object(fields) = &mut payload {
            fields.insert("workflow_id".to_string(), json!(identity.workflow_id().to_string()));
            fields.insert("instance_id".to_string(), json!(identity.instance_id()));
            fields.insert("state".to_string(), json!(run.model.current_state()));
        }
        let correlation_id = identity.correlation_id();

        if let Err(error) = self.publisher.publish(event_type.as_str(), payload, correlation_id) {
            warn!(
                event_type = %event_type,
                correlation_id = %correlation_id,
                error = %error,
                "Failed to publish workflow event"
            );
        }
        run.events.push(event_type.as_str().to_string());
        run.tracker.record_event();
        self.checkpoint(run, false).await
    }

    fn finish(
        run: Run,
        started: Instant,
        outcome: Result<Value, String>,
    ) -> SubreducerResult {
        let (success, result_data, error_message) = match outcome {
            Ok(data) => (true, Some(data), None),
            Err(message) => (false, None, Some(message)),
        };
        SubreducerResult {
            success,
            result_data,
            error_message,
            state_transitions: run.model.transition_history().to_vec(),
            events_emitted: run.events,
            execution_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

#[async_trait]
impl Subreducer for DocumentRegenerationSubreducer {
    fn workflow_type(&self) -> &str {
        WORKFLOW_TYPE
    }

    async fn process_workflow(&self, context: SubreducerContext) -> ReducerResult<SubreducerResult> {
        let started = Instant::now();
        let request = DocumentRequest::from_data(&context.data)?;

        let identity =
            WorkflowIdentity::new(&context.workflow_type, &context.instance_id, context.correlation_id)?;
        let mut run = Run {
            model: WorkflowStateModel::new(identity, self.max_retries),
            tracker: CheckpointTracker::new(),
            events: Vec::new(),
        };

        self.transition(&mut run, WorkflowState::Processing, TransitionReason::system("regeneration started"))
            .await?;
        self.emit(&mut run, WorkflowEventType::WorkflowStarted, json!({"title": request.title}))
            .await?;

        let breaker = self.breakers.get_or_create(GENERATOR_SERVICE);
        loop {
            let attempt = run.model.retry_count() + 1;
            let generated = breaker
                .call(|| self.generator.regenerate(&request))
                .await;

            match generated {
                Ok(document) => {
                    self.emit(
                        &mut run,
                        WorkflowEventType::DocumentRegenerated,
                        json!({"content_hash": document.content_hash, "attempt": attempt}),
                    )
                    .await?;
                    self.transition(&mut run, WorkflowState::Completed, TransitionReason::system("document regenerated"))
                        .await?;
                    self.emit(&mut run, WorkflowEventType::WorkflowCompleted, json!({}))
                        .await?;

                    info!(
                        workflow_type = WORKFLOW_TYPE,
                        instance_id = %context.instance_id,
                        correlation_id = %context.correlation_id,
                        attempt,
                        "Document regenerated"
                    );
                    let data = json!({
                        "document": document,
                        "instance_id": context.instance_id,
                        "routing_key": context.routing_key.as_str(),
                        "attempts": attempt,
                    });
                    return Ok(Self::finish(run, started, Ok(data)));
                }
                Err(error) => {
                    let circuit_open = error.is_open();
                    let error = ReducerError::from(error);
                    let message = error.to_string();
                    warn!(
                        workflow_type = WORKFLOW_TYPE,
                        instance_id = %context.instance_id,
                        attempt,
                        error = %message,
                        "Document generation failed"
                    );

                    let details = HashMap::from([
                        ("service".to_string(), json!(GENERATOR_SERVICE)),
                        ("attempt".to_string(), json!(attempt)),
                    ]);
                    run.model.set_error(message.clone(), details)?;
                    self.checkpoint(&mut run, true).await?;

                    // an open circuit will reject the next attempt as well
                    if circuit_open || !run.model.can_retry() {
                        self.emit(&mut run, WorkflowEventType::WorkflowFailed, json!({"error": message}))
                            .await?;
                        return Ok(Self::finish(run, started, Err(message)));
                    }

                    self.transition(&mut run, WorkflowState::Retrying, TransitionReason::retry(format!("retry after attempt {attempt}")))
                        .await?;
                    self.emit(&mut run, WorkflowEventType::WorkflowRetrying, json!({"attempt": attempt}))
                        .await?;
                    run.model.clear_error();
                    self.transition(&mut run, WorkflowState::Processing, TransitionReason::retry("retrying generation"))
                        .await?;
                    debug!(instance_id = %context.instance_id, retry = run.model.retry_count(), "Retrying document generation");
                }
            }
        }
    }
}
