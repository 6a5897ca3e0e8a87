// Copyright 2025 Cowboy AI, LLC.

//! Checkpointing policy for workflows
//!
//! A [`SnapshotPolicy`] decides when a running workflow persists a checkpoint;
//! a [`CheckpointTracker`] carries the per-workflow counters the decision is
//! made from.

use crate::errors::{ReducerError, ReducerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// When to snapshot a running workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotPolicy {
    /// Snapshot once this many events accumulated since the last snapshot
    pub event_count_threshold: u64,
    /// Snapshot after every state transition
    pub checkpoint_on_transition: bool,
    /// Whether the policy is active
    pub enabled: bool,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            event_count_threshold: 5,
            checkpoint_on_transition: true,
            enabled: true,
        }
    }
}

impl SnapshotPolicy {
    /// Policy that never snapshots
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Whether a checkpoint is due
    pub fn should_snapshot(&self, tracker: &CheckpointTracker, state_changed: bool) -> bool {
        if !self.enabled {
            return false;
        }
        if state_changed && self.checkpoint_on_transition {
            return true;
        }
        tracker.events_since_snapshot >= self.event_count_threshold
    }

    /// Check the policy
    pub fn validate(&self) -> ReducerResult<()> {
        if self.enabled && self.event_count_threshold == 0 {
            return Err(ReducerError::Configuration(
                "event_count_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-workflow checkpoint counters
///
/// Sequence numbers are reserved from the snapshot store, not counted here;
/// the tracker only remembers the last one it saw.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointTracker {
    /// Events recorded since the last snapshot
    pub events_since_snapshot: u64,
    /// Events recorded overall
    pub total_events: u64,
    /// Sequence number of the last snapshot taken
    pub last_sequence: Option<u64>,
    /// Snapshots taken
    pub total_snapshots: u64,
    /// When the last snapshot was taken
    pub last_snapshot_at: Option<DateTime<Utc>>,
}

impl CheckpointTracker {
    /// Tracker for a run with no snapshots yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one event
    pub fn record_event(&mut self) {
        self.events_since_snapshot += 1;
        self.total_events += 1;
    }

    /// Account for a snapshot saved under `sequence`
    pub fn record_snapshot(&mut self, sequence: u64) {
        self.last_sequence = Some(sequence);
        self.events_since_snapshot = 0;
        self.total_snapshots += 1;
        self.last_snapshot_at = Some(Utc::now());
    }
}
