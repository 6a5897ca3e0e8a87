//! Integration tests for the reducer engine

use async_trait::async_trait;
use cim_reducer::infrastructure::SnapshotStore;
use cim_reducer::subreducers::{DocumentGenerator, DocumentRequest, RegeneratedDocument};
use cim_reducer::{
    CircuitBreakerConfig, CorrelationId, EventPublisher, InMemoryEventPublisher,
    InMemorySnapshotStore, ReducerConfig, ReducerEngine, ReducerResult, Subreducer,
    SubreducerContext, SubreducerResult, WorkflowInput, WorkflowState, WorkflowStateModel,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

fn regeneration_input(instance_id: &str) -> WorkflowInput {
    WorkflowInput::new(
        "document_regeneration",
        instance_id,
        json!({"document": {"title": "T", "content": "C"}}),
    )
}

struct BrokenGenerator {
    calls: AtomicU32,
}

#[async_trait]
impl DocumentGenerator for BrokenGenerator {
    async fn regenerate(&self, _request: &DocumentRequest) -> anyhow::Result<RegeneratedDocument> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("renderer offline")
    }
}

struct FailingPublisher;

impl EventPublisher for FailingPublisher {
    fn publish(&self, _: &str, _: Value, _: CorrelationId) -> Result<(), String> {
        Err("broker unreachable".to_string())
    }
}

#[tokio::test]
async fn test_document_regeneration_succeeds() {
    let engine = ReducerEngine::new(ReducerConfig::default()).unwrap();
    let output = engine.process(regeneration_input("wf-1")).await;

    assert!(output.success, "{:?}", output.error_message);
    assert_eq!(output.workflow_type, "document_regeneration");
    assert!(output.error_message.is_none());
    let document = &output.result_data.as_ref().unwrap()["document"];
    assert_eq!(document["title"], "T");
    assert_eq!(document["content"], "# T\n\nC\n");
    assert!(CorrelationId::parse(&output.correlation_id).is_some());
}

#[tokio::test]
async fn test_unknown_type_fails_with_type_name() {
    let engine = ReducerEngine::new(ReducerConfig::default()).unwrap();
    let output = engine
        .process(WorkflowInput::new("unknown_type", "wf-2", json!({})))
        .await;

    assert!(!output.success);
    assert_eq!(output.workflow_type, "unknown_type");
    let message = output.error_message.unwrap();
    assert!(message.contains("unknown_type"));
    assert!(message.contains("document_regeneration"));
    assert!(output.result_data.is_none());
}

#[tokio::test]
async fn test_raw_json_input() {
    let engine = ReducerEngine::new(ReducerConfig::default()).unwrap();
    let correlation_id = CorrelationId::new();
    let output = engine
        .process_value(json!({
            "workflow_type": "Document_Regeneration",
            "instance_id": "wf-3",
            "data": {"document": {"title": "Raw", "content": "body", "format": "text"}},
            "correlation_id": correlation_id.to_string(),
        }))
        .await;

    assert!(output.success);
    assert_eq!(output.correlation_id, correlation_id.to_string());
    assert_eq!(
        output.result_data.unwrap()["document"]["content"],
        "Raw\n===\n\nbody\n"
    );
}

#[tokio::test]
async fn test_validation_failures_never_escape() {
    let engine = ReducerEngine::new(ReducerConfig::default()).unwrap();
    let cases = [
        WorkflowInput::new("", "wf-1", json!({})),
        WorkflowInput::new("document_regeneration", "", json!({})),
        WorkflowInput::new("document_regeneration", "wf-1", json!("not a mapping")),
        WorkflowInput::new("document_regeneration", "wf-1", json!({"document": 3})),
    ];
    for input in cases {
        let output = engine.process(input).await;
        assert!(!output.success);
        assert!(output.error_message.is_some());
    }
    assert_eq!(engine.metrics().total_failed, 4);
}

#[tokio::test]
async fn test_metrics_cover_success_and_failure() {
    let engine = ReducerEngine::new(ReducerConfig::default()).unwrap();
    engine.process(regeneration_input("wf-1")).await;
    engine.process(regeneration_input("wf-2")).await;
    engine
        .process(WorkflowInput::new("unknown_type", "wf-3", json!({})))
        .await;

    let metrics = engine.metrics();
    assert_eq!(metrics.total_processed, 3);
    assert_eq!(metrics.total_succeeded, 2);
    assert_eq!(metrics.by_type["document_regeneration"].succeeded, 2);
    assert_eq!(metrics.by_type["<unsupported>"].failed, 1);
    assert!(!metrics.by_type.contains_key("unknown_type"));
    assert_eq!(engine.route_stats()["document_regeneration"].calls, 2);
}

#[tokio::test]
async fn test_checkpoints_support_recovery() {
    let store = Arc::new(InMemorySnapshotStore::default());
    let engine = ReducerEngine::builder()
        .snapshot_store(store.clone())
        .build()
        .unwrap();
    engine.process(regeneration_input("wf-1")).await;

    let latest = store.get_latest_snapshot("wf-1").await.unwrap().unwrap();
    let model: WorkflowStateModel = latest.decode().unwrap();
    assert_eq!(model.current_state(), WorkflowState::Completed);
    assert_eq!(model.identity().instance_id(), "wf-1");

    let first = store.get_snapshot_at_sequence("wf-1", 1).await.unwrap().unwrap();
    let model: WorkflowStateModel = first.decode().unwrap();
    assert_eq!(model.current_state(), WorkflowState::Processing);
}

#[tokio::test]
async fn test_events_published_per_correlation() {
    let publisher = InMemoryEventPublisher::new();
    let engine = ReducerEngine::builder()
        .event_publisher(Arc::new(publisher.clone()))
        .build()
        .unwrap();
    let correlation_id = CorrelationId::new();
    engine
        .process(regeneration_input("wf-1").with_correlation_id(correlation_id))
        .await;

    let types: Vec<String> = publisher
        .events_for(correlation_id)
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        types,
        vec!["workflow.started", "document.regenerated", "workflow.completed"]
    );
}

#[tokio::test]
async fn test_publish_failures_are_not_workflow_failures() {
    let engine = ReducerEngine::builder()
        .event_publisher(Arc::new(FailingPublisher))
        .build()
        .unwrap();
    let output = engine.process(regeneration_input("wf-1")).await;
    assert!(output.success);
}

#[tokio::test]
async fn test_open_circuit_fails_fast_across_requests() {
    let generator = Arc::new(BrokenGenerator {
        calls: AtomicU32::new(0),
    });
    let mut config = ReducerConfig::default();
    config.max_retries = 0;
    config.circuit_breakers.insert(
        "document_generator".to_string(),
        CircuitBreakerConfig {
            failure_threshold: 2,
            minimum_request_threshold: 2,
            ..Default::default()
        },
    );
    let engine = ReducerEngine::builder()
        .config(config)
        .document_generator(generator.clone())
        .build()
        .unwrap();

    for instance in ["wf-1", "wf-2"] {
        let output = engine.process(regeneration_input(instance)).await;
        assert!(output.error_message.unwrap().contains("renderer offline"));
    }
    let output = engine.process(regeneration_input("wf-3")).await;
    assert!(!output.success);
    assert!(output.error_message.unwrap().contains("Circuit open"));
    assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
}

struct Counter;

#[async_trait]
impl Subreducer for Counter {
    fn workflow_type(&self) -> &str {
        "counter"
    }

    async fn process_workflow(&self, context: SubreducerContext) -> ReducerResult<SubreducerResult> {
        let n = context.data["n"].as_i64().unwrap_or(0);
        Ok(SubreducerResult {
            success: true,
            result_data: Some(json!({"next": n + 1, "routing_key": context.routing_key.as_str()})),
            error_message: None,
            state_transitions: Vec::new(),
            events_emitted: Vec::new(),
            execution_time_ms: 0,
        })
    }
}

#[tokio::test]
async fn test_custom_subreducer_registration() {
    let engine = ReducerEngine::builder()
        .subreducer("counter", |_| Ok(Arc::new(Counter) as Arc<dyn Subreducer>))
        .build()
        .unwrap();
    assert_eq!(
        engine.supported_workflow_types(),
        vec!["counter".to_string(), "document_regeneration".to_string()]
    );

    let first = engine
        .process(WorkflowInput::new("counter", "c-1", json!({"n": 41})))
        .await;
    let second = engine
        .process(WorkflowInput::new("counter", "c-1", json!({"n": 1})))
        .await;
    let first = first.result_data.unwrap();
    let second = second.result_data.unwrap();
    assert_eq!(first["next"], 42);
    assert_eq!(first["routing_key"], second["routing_key"]);
    assert_eq!(first["routing_key"].as_str().unwrap().len(), 32);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workflows() {
    let engine = Arc::new(ReducerEngine::new(ReducerConfig::default()).unwrap());
    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.process(regeneration_input(&format!("wf-{i}"))).await })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().success);
    }
    assert_eq!(engine.metrics().total_succeeded, 32);
}

#[tokio::test]
async fn test_shutdown() {
    let engine = ReducerEngine::new(ReducerConfig::default()).unwrap();
    assert!(engine.process(regeneration_input("wf-1")).await.success);
    engine.shutdown().await;
    assert!(!engine.process(regeneration_input("wf-2")).await.success);
}
