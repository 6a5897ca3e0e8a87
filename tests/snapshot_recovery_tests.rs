//! Snapshot storage and point-in-time recovery

use cim_reducer::infrastructure::{SnapshotStore, SnapshotStoreConfig};
use cim_reducer::{
    CorrelationId, InMemorySnapshotStore, ReducerError, Snapshot, WorkflowIdentity,
    WorkflowState, WorkflowStateModel,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

fn store(max_snapshots_per_workflow: usize) -> InMemorySnapshotStore {
    InMemorySnapshotStore::new(SnapshotStoreConfig {
        max_snapshots_per_workflow,
        validate_checksums: true,
    })
}

async fn save_marker(store: &InMemorySnapshotStore, instance_id: &str, sequence: u64) {
    store
        .save_snapshot(
            instance_id,
            sequence,
            serde_json::to_vec(&json!({"sequence": sequence})).unwrap(),
            sequence * 2,
            HashMap::new(),
        )
        .await
        .unwrap();
}

async fn sequence_at(store: &InMemorySnapshotStore, sequence: u64) -> Option<u64> {
    store
        .get_snapshot_at_sequence("wf-1", sequence)
        .await
        .unwrap()
        .map(|s| s.sequence_number)
}

#[tokio::test]
async fn test_point_in_time_lookup_picks_nearest_earlier() {
    let store = store(10);
    for sequence in [10, 25, 40] {
        save_marker(&store, "wf-1", sequence).await;
    }

    assert_eq!(sequence_at(&store, 35).await, Some(25));
    assert_eq!(sequence_at(&store, 40).await, Some(40));
    assert_eq!(sequence_at(&store, 1000).await, Some(40));
    assert_eq!(sequence_at(&store, 9).await, None);
    assert!(store
        .get_snapshot_at_sequence("unknown", 35)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_retention_keeps_newest_snapshots() {
    let store = store(3);
    for sequence in 1..=5 {
        save_marker(&store, "wf-1", sequence).await;
    }

    let sequences: Vec<u64> = store
        .list_snapshots("wf-1")
        .await
        .unwrap()
        .iter()
        .map(|s| s.sequence_number)
        .collect();
    assert_eq!(sequences, vec![3, 4, 5]);

    assert_eq!(store.delete_old_snapshots("wf-1", 1).await.unwrap(), 2);
    assert_eq!(
        store.get_latest_snapshot("wf-1").await.unwrap().unwrap().sequence_number,
        5
    );
}

#[tokio::test]
async fn test_round_trip_preserves_payload() {
    let store = store(10);
    let payload = b"\x00binary\xffstate".to_vec();
    let metadata = HashMap::from([("reason".to_string(), json!("checkpoint"))]);
    let saved = store
        .save_snapshot("wf-1", 7, payload.clone(), 12, metadata)
        .await
        .unwrap();

    let loaded = store.get_latest_snapshot("wf-1").await.unwrap().unwrap();
    assert_eq!(loaded.state_data, payload);
    assert_eq!(loaded.checksum, saved.checksum);
    assert_eq!(loaded.checksum, Snapshot::compute_checksum(&payload));
    assert_eq!(loaded.event_count, 12);
    assert_eq!(loaded.metadata["reason"], "checkpoint");
    assert!(loaded.verify());
}

#[tokio::test]
async fn test_tampered_snapshot_is_reported() {
    let store = store(10);
    save_marker(&store, "wf-1", 1).await;

    let mut tampered = Snapshot::new("wf-1", 2, b"original".to_vec(), 3, HashMap::new());
    tampered.state_data = b"modified".to_vec();
    store.import_snapshot(tampered).await.unwrap();

    let err = store.get_latest_snapshot("wf-1").await.unwrap_err();
    assert!(matches!(
        err,
        ReducerError::CorruptionDetected { ref instance_id, sequence_number: 2 } if instance_id == "wf-1"
    ));
    // earlier intact snapshots stay readable
    assert_eq!(
        store.get_snapshot_at_sequence("wf-1", 1).await.unwrap().unwrap().sequence_number,
        1
    );
    assert!(store.list_snapshots("wf-1").await.is_err());
}

#[tokio::test]
async fn test_checksum_validation_can_be_disabled() {
    let store = InMemorySnapshotStore::new(SnapshotStoreConfig {
        max_snapshots_per_workflow: 10,
        validate_checksums: false,
    });
    let mut tampered = Snapshot::new("wf-1", 1, b"original".to_vec(), 1, HashMap::new());
    tampered.state_data = b"modified".to_vec();
    store.import_snapshot(tampered).await.unwrap();

    let loaded = store.get_latest_snapshot("wf-1").await.unwrap().unwrap();
    assert!(!loaded.verify());
    assert!(store.validate_snapshot(&loaded).is_err());
}

#[tokio::test]
async fn test_stats_and_deletion() {
    let store = store(10);
    for sequence in 1..=3 {
        save_marker(&store, "wf-a", sequence).await;
    }
    save_marker(&store, "wf-b", 9).await;

    let stats = store.get_stats().await.unwrap();
    assert_eq!(stats.total_workflows, 2);
    assert_eq!(stats.total_snapshots, 4);
    assert_eq!(stats.workflows["wf-a"].min_sequence, 1);
    assert_eq!(stats.workflows["wf-a"].max_sequence, 3);
    assert_eq!(stats.max_snapshots_per_workflow, 10);

    assert_eq!(store.delete_snapshots("wf-a").await.unwrap(), 3);
    assert_eq!(store.delete_snapshots("wf-a").await.unwrap(), 0);
    assert_eq!(store.clear_all().await.unwrap(), 1);
    assert_eq!(store.get_stats().await.unwrap().total_snapshots, 0);
}

#[tokio::test]
async fn test_workflow_state_recovered_and_resumed() {
    let store = store(10);
    let identity =
        WorkflowIdentity::new("document_regeneration", "wf-1", CorrelationId::new()).unwrap();
    let mut model = WorkflowStateModel::new(identity, 3);

    model.transition_to(WorkflowState::Processing).unwrap();
    store
        .save_snapshot("wf-1", 1, serde_json::to_vec(&model).unwrap(), 1, HashMap::new())
        .await
        .unwrap();
    model.set_error("generator unavailable", HashMap::new()).unwrap();
    store
        .save_snapshot("wf-1", 2, serde_json::to_vec(&model).unwrap(), 2, HashMap::new())
        .await
        .unwrap();

    let snapshot = store.get_latest_snapshot("wf-1").await.unwrap().unwrap();
    let mut recovered: WorkflowStateModel = snapshot.decode().unwrap();
    assert_eq!(recovered.current_state(), WorkflowState::Failed);
    assert!(recovered.error_info().has_error);
    assert!(recovered.can_retry());
    assert_eq!(recovered.identity().workflow_id(), model.identity().workflow_id());

    recovered.transition_to(WorkflowState::Retrying).unwrap();
    recovered.clear_error();
    recovered.transition_to(WorkflowState::Processing).unwrap();
    recovered.transition_to(WorkflowState::Completed).unwrap();
    assert_eq!(recovered.retry_count(), 1);
    assert_eq!(
        recovered.state_path(),
        vec![
            WorkflowState::Pending,
            WorkflowState::Processing,
            WorkflowState::Failed,
            WorkflowState::Retrying,
            WorkflowState::Processing,
            WorkflowState::Completed,
        ]
    );

    let earlier = store.get_snapshot_at_sequence("wf-1", 1).await.unwrap().unwrap();
    let earlier: WorkflowStateModel = earlier.decode().unwrap();
    assert_eq!(earlier.current_state(), WorkflowState::Processing);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_on_distinct_workflows() {
    let store = Arc::new(store(5));
    let tasks: Vec<_> = (0..8)
        .map(|w| {
            let store = store.clone();
            tokio::spawn(async move {
                let instance_id = format!("wf-{w}");
                for sequence in 1..=10 {
                    save_marker(&store, &instance_id, sequence).await;
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let stats = store.get_stats().await.unwrap();
    assert_eq!(stats.total_workflows, 8);
    assert!(stats.workflows.values().all(|w| w.snapshot_count == 5
        && w.min_sequence == 6
        && w.max_sequence == 10));
}
