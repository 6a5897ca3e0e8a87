// Copyright 2025 Cowboy AI, LLC.

//! Snapshot store for workflow checkpoints
//!
//! Snapshots are kept per workflow instance, ordered by sequence number and
//! pruned to the highest `max_snapshots_per_workflow` sequence numbers. Every
//! snapshot carries a blake3 digest of its payload which is checked on read
//! when validation is enabled.
//!
//! Writers reserve sequence numbers with [`SnapshotStore::next_sequence`] so
//! overlapping runs of one workflow never save under the same number.

use crate::errors::{ReducerError, ReducerResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error};

/// Checkpoint of one workflow's state at a sequence number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Workflow instance the snapshot belongs to
    pub workflow_instance_id: String,
    /// Position of the snapshot in the workflow's history
    pub sequence_number: u64,
    /// Opaque serialized state
    pub state_data: Vec<u8>,
    /// Number of events folded into this state
    pub event_count: u64,
    /// Hex digest of `state_data`
    pub checksum: String,
    /// Free-form metadata
    pub metadata: HashMap<String, Value>,
    /// When the snapshot was taken
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Build a snapshot, computing its checksum
    pub fn new(
        workflow_instance_id: impl Into<String>,
        sequence_number: u64,
        state_data: Vec<u8>,
        event_count: u64,
        metadata: HashMap<String, Value>,
    ) -> Self {
        let checksum = Self::compute_checksum(&state_data);
        Self {
            workflow_instance_id: workflow_instance_id.into(),
            sequence_number,
            state_data,
            event_count,
            checksum,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Digest used for snapshot checksums
    pub fn compute_checksum(data: &[u8]) -> String {
        blake3::hash(data).to_hex().to_string()
    }

    /// Whether the stored checksum matches the payload
    pub fn verify(&self) -> bool {
        Self::compute_checksum(&self.state_data) == self.checksum
    }

    /// Deserialize the payload as JSON
    pub fn decode<T: DeserializeOwned>(&self) -> ReducerResult<T> {
        Ok(serde_json::from_slice(&self.state_data)?)
    }

    /// Payload size in bytes
    pub fn size_bytes(&self) -> usize {
        self.state_data.len()
    }
}

/// Configuration of the snapshot store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotStoreConfig {
    /// Snapshots retained per workflow
    pub max_snapshots_per_workflow: usize,
    /// Recompute and compare checksums on every read
    pub validate_checksums: bool,
}

impl Default for SnapshotStoreConfig {
    fn default() -> Self {
        Self {
            max_snapshots_per_workflow: 10,
            validate_checksums: true,
        }
    }
}

impl SnapshotStoreConfig {
    /// Check the configuration
    pub fn validate(&self) -> ReducerResult<()> {
        if self.max_snapshots_per_workflow == 0 {
            return Err(ReducerError::Configuration(
                "max_snapshots_per_workflow must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Snapshot counts for one workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshotStats {
    /// Snapshots retained
    pub snapshot_count: usize,
    /// Lowest retained sequence number
    pub min_sequence: u64,
    /// Highest retained sequence number
    pub max_sequence: u64,
    /// Payload bytes retained
    pub total_bytes: usize,
}

/// Aggregate statistics of a snapshot store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotStoreStats {
    /// Workflows with at least one snapshot
    pub total_workflows: usize,
    /// Snapshots across all workflows
    pub total_snapshots: usize,
    /// Payload bytes across all workflows
    pub total_bytes: usize,
    /// Retention limit in effect
    pub max_snapshots_per_workflow: usize,
    /// Whether reads validate checksums
    pub validate_checksums: bool,
    /// Per-workflow breakdown
    pub workflows: HashMap<String, WorkflowSnapshotStats>,
}

/// Storage of workflow snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Store a checkpoint and prune the workflow to its retention limit
    ///
    /// Saving an existing sequence number replaces that snapshot.
    async fn save_snapshot(
        &self,
        instance_id: &str,
        sequence_number: u64,
        state_data: Vec<u8>,
        event_count: u64,
        metadata: HashMap<String, Value>,
    ) -> ReducerResult<Snapshot>;

    /// Reserve the next sequence number of a workflow
    ///
    /// The number is above every sequence stored or reserved so far and is
    /// never handed out twice, unless the workflow's snapshots are deleted
    /// and numbering starts over.
    async fn next_sequence(&self, instance_id: &str) -> ReducerResult<u64>;

    /// Snapshot with the highest sequence number
    async fn get_latest_snapshot(&self, instance_id: &str) -> ReducerResult<Option<Snapshot>>;

    /// Snapshot with the largest sequence number not above `sequence_number`
    async fn get_snapshot_at_sequence(
        &self,
        instance_id: &str,
        sequence_number: u64,
    ) -> ReducerResult<Option<Snapshot>>;

    /// All retained snapshots of a workflow in ascending sequence order
    async fn list_snapshots(&self, instance_id: &str) -> ReducerResult<Vec<Snapshot>>;

    /// Keep only the `keep_latest` highest sequence numbers
    async fn delete_old_snapshots(&self, instance_id: &str, keep_latest: usize)
        -> ReducerResult<usize>;

    /// Remove every snapshot of a workflow
    async fn delete_snapshots(&self, instance_id: &str) -> ReducerResult<usize>;

    /// Remove every snapshot of every workflow
    async fn clear_all(&self) -> ReducerResult<usize>;

    /// Aggregate and per-workflow counts
    async fn get_stats(&self) -> ReducerResult<SnapshotStoreStats>;
}

/// Snapshots of one workflow and its sequence counter
#[derive(Debug)]
struct WorkflowSnapshots {
    snapshots: Vec<Snapshot>,
    next_sequence: u64,
}

impl Default for WorkflowSnapshots {
    fn default() -> Self {
        Self {
            snapshots: Vec::new(),
            next_sequence: 1,
        }
    }
}

impl WorkflowSnapshots {
    fn insert(&mut self, snapshot: Snapshot) {
        self.next_sequence = self
            .next_sequence
            .max(snapshot.sequence_number.saturating_add(1));
        insert_ordered(&mut self.snapshots, snapshot);
    }
}

type WorkflowSlot = Arc<Mutex<WorkflowSnapshots>>;

/// In-memory snapshot store
///
/// The outer map lock is only held to find or create a workflow's slot; all
/// snapshot mutations happen under that workflow's own mutex. Deletes take
/// the map lock first and the slot lock second; writers never hold a slot
/// lock while waiting for the map.
pub struct InMemorySnapshotStore {
    config: SnapshotStoreConfig,
    workflows: RwLock<HashMap<String, WorkflowSlot>>,
}

impl Default for InMemorySnapshotStore {
    fn default() -> Self {
        Self::new(SnapshotStoreConfig::default())
    }
}

impl InMemorySnapshotStore {
    /// Create a store with the given configuration
    pub fn new(config: SnapshotStoreConfig) -> Self {
        Self {
            config,
            workflows: RwLock::new(HashMap::new()),
        }
    }

    /// Configuration in effect
    pub fn config(&self) -> &SnapshotStoreConfig {
        &self.config
    }

    /// Check a snapshot's checksum
    pub fn validate_snapshot(&self, snapshot: &Snapshot) -> ReducerResult<()> {
        if snapshot.verify() {
            Ok(())
        } else {
            error!(
                instance_id = %snapshot.workflow_instance_id,
                sequence_number = snapshot.sequence_number,
                "Snapshot checksum mismatch"
            );
            Err(ReducerError::CorruptionDetected {
                instance_id: snapshot.workflow_instance_id.clone(),
                sequence_number: snapshot.sequence_number,
            })
        }
    }

    /// Store a snapshot exactly as given, keeping its checksum
    ///
    /// Used to load snapshots persisted elsewhere. The checksum is verified on
    /// the next read, not here.
    pub async fn import_snapshot(&self, snapshot: Snapshot) -> ReducerResult<()> {
        if snapshot.workflow_instance_id.trim().is_empty() {
            return Err(ReducerError::validation("instance_id must not be empty"));
        }
        let slot = self.slot_or_create(&snapshot.workflow_instance_id).await;
        let mut entry = slot.lock().await;
        entry.insert(snapshot);
        prune(&mut entry.snapshots, self.config.max_snapshots_per_workflow);
        Ok(())
    }

    async fn slot(&self, instance_id: &str) -> Option<WorkflowSlot> {
        self.workflows.read().await.get(instance_id).cloned()
    }

    async fn slot_or_create(&self, instance_id: &str) -> WorkflowSlot {
        if let Some(slot) = self.slot(instance_id).await {
            return slot;
        }
        self.workflows
            .write()
            .await
            .entry(instance_id.to_string())
            .or_default()
            .clone()
    }

    fn checked(&self, snapshot: Snapshot) -> ReducerResult<Snapshot> {
        if self.config.validate_checksums {
            self.validate_snapshot(&snapshot)?;
        }
        Ok(snapshot)
    }
}

fn insert_ordered(list: &mut Vec<Snapshot>, snapshot: Snapshot) {
    match list.binary_search_by_key(&snapshot.sequence_number, |s| s.sequence_number) {
        Ok(index) => list[index] = snapshot,
        Err(index) => list.insert(index, snapshot),
    }
}

/// Drop the lowest sequence numbers beyond `keep`, returning how many went
fn prune(list: &mut Vec<Snapshot>, keep: usize) -> usize {
    let excess = list.len().saturating_sub(keep);
    list.drain(..excess);
    excess
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save_snapshot(
        &self,
        instance_id: &str,
        sequence_number: u64,
        state_data: Vec<u8>,
        event_count: u64,
        metadata: HashMap<String, Value>,
    ) -> ReducerResult<Snapshot> {
        if instance_id.trim().is_empty() {
            return Err(ReducerError::validation("instance_id must not be empty"));
        }

        let snapshot = Snapshot::new(instance_id, sequence_number, state_data, event_count, metadata);
        let slot = self.slot_or_create(instance_id).await;
        let mut entry = slot.lock().await;
        entry.insert(snapshot.clone());
        let pruned = prune(&mut entry.snapshots, self.config.max_snapshots_per_workflow);

        debug!(
            instance_id = %instance_id,
            sequence_number,
            bytes = snapshot.size_bytes(),
            retained = entry.snapshots.len(),
            pruned,
            "Saved snapshot"
        );
        Ok(snapshot)
    }

    async fn next_sequence(&self, instance_id: &str) -> ReducerResult<u64> {
        if instance_id.trim().is_empty() {
            return Err(ReducerError::validation("instance_id must not be empty"));
        }
        let slot = self.slot_or_create(instance_id).await;
        let mut entry = slot.lock().await;
        let sequence = entry.next_sequence;
        entry.next_sequence = sequence.saturating_add(1);
        Ok(sequence)
    }

    async fn get_latest_snapshot(&self, instance_id: &str) -> ReducerResult<Option<Snapshot>> {
        let Some(slot) = self.slot(instance_id).await else {
            return Ok(None);
        };
        let latest = slot.lock().await.snapshots.last().cloned();
        latest.map(|s| self.checked(s)).transpose()
    }

    async fn get_snapshot_at_sequence(
        &self,
        instance_id: &str,
        sequence_number: u64,
    ) -> ReducerResult<Option<Snapshot>> {
        let Some(slot) = self.slot(instance_id).await else {
            return Ok(None);
        };
        let found = {
            let entry = slot.lock().await;
            let list = &entry.snapshots;
            let upper = list.partition_point(|s| s.sequence_number <= sequence_number);
            upper.checked_sub(1).map(|index| list[index].clone())
        };
        found.map(|s| self.checked(s)).transpose()
    }

    async fn list_snapshots(&self, instance_id: &str) -> ReducerResult<Vec<Snapshot>> {
        let Some(slot) = self.slot(instance_id).await else {
            return Ok(Vec::new());
        };
        let list = slot.lock().await.snapshots.clone();
        list.into_iter().map(|s| self.checked(s)).collect()
    }

    async fn delete_old_snapshots(
        &self,
        instance_id: &str,
        keep_latest: usize,
    ) -> ReducerResult<usize> {
        let Some(slot) = self.slot(instance_id).await else {
            return Ok(0);
        };
        let removed = prune(&mut slot.lock().await.snapshots, keep_latest);
        debug!(instance_id = %instance_id, keep_latest, removed, "Pruned snapshots");
        Ok(removed)
    }

    async fn delete_snapshots(&self, instance_id: &str) -> ReducerResult<usize> {
        let mut workflows = self.workflows.write().await;
        let Some(slot) = workflows.get(instance_id).cloned() else {
            return Ok(0);
        };
        let removed = std::mem::take(&mut slot.lock().await.snapshots).len();
        // a writer holding the slot will still save into it, so keep it mapped
        if Arc::strong_count(&slot) == 2 {
            workflows.remove(instance_id);
        }
        debug!(instance_id = %instance_id, removed, "Deleted snapshots");
        Ok(removed)
    }

    async fn clear_all(&self) -> ReducerResult<usize> {
        let mut workflows = self.workflows.write().await;
        let mut removed = 0;
        for slot in workflows.values() {
            removed += std::mem::take(&mut slot.lock().await.snapshots).len();
        }
        workflows.retain(|_, slot| Arc::strong_count(slot) > 1);
        debug!(removed, "Cleared snapshot store");
        Ok(removed)
    }

    async fn get_stats(&self) -> ReducerResult<SnapshotStoreStats> {
        let slots: Vec<(String, WorkflowSlot)> = self
            .workflows
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();

        let mut workflows = HashMap::new();
        for (id, slot) in slots {
            let entry = slot.lock().await;
            let list = &entry.snapshots;
            let (Some(first), Some(last)) = (list.first(), list.last()) else {
                continue;
            };
            workflows.insert(
                id,
                WorkflowSnapshotStats {
                    snapshot_count: list.len(),
                    min_sequence: first.sequence_number,
                    max_sequence: last.sequence_number,
                    total_bytes: list.iter().map(Snapshot::size_bytes).sum(),
                },
            );
        }

        Ok(SnapshotStoreStats {
            total_workflows: workflows.len(),
            total_snapshots: workflows.values().map(|w| w.snapshot_count).sum(),
            total_bytes: workflows.values().map(|w| w.total_bytes).sum(),
            max_snapshots_per_workflow: self.config.max_snapshots_per_workflow,
            validate_checksums: self.config.validate_checksums,
            workflows,
        })
    }
}
