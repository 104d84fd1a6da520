//! State-store collaborator contract and in-memory implementation.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{ExecutionState, TccStatus, TransactionId};

/// Durable record of execution-state transitions.
///
/// The coordinator checkpoints the state three times per invocation:
/// `begin` before the reservation phase, `update` after it, and `end`
/// after the confirm/cancel phase. Implementations that back crash
/// recovery must be durable before returning; the coordinator treats all
/// three calls as synchronous and non-failing.
pub trait StateStore: Send + Sync {
    /// Records the freshly created state, before any unit runs.
    fn begin(&self, state: &ExecutionState);

    /// Records the post-reservation snapshot, before compensation.
    fn update(&self, state: &ExecutionState);

    /// Records the final snapshot, after the confirm/cancel phase.
    fn end(&self, state: &ExecutionState);
}

/// Which checkpoint produced a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Checkpoint {
    /// Before the reservation phase.
    Begin,
    /// After the reservation phase.
    Update,
    /// After the confirm/cancel phase.
    End,
}

/// Serializable projection of an [`ExecutionState`] — what a durable
/// store persists at each checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// The invocation's transaction ID.
    pub transaction_id: TransactionId,
    /// Total number of units in the chain.
    pub node_count: usize,
    /// Arena indices of units that entered their reservation step.
    pub tried: Vec<usize>,
    /// Whether the invocation is marked for cancellation.
    pub rollback: bool,
    /// Whether the whole chain reserved successfully.
    pub end: bool,
    /// Confirm/cancel phase disposition, if that phase ran.
    pub status: Option<TccStatus>,
    /// Captured failure message, if any.
    pub failure: Option<String>,
    /// When the invocation started.
    pub started_at: DateTime<Utc>,
    /// When the invocation finished, if finalized.
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&ExecutionState> for StateSnapshot {
    fn from(state: &ExecutionState) -> Self {
        Self {
            transaction_id: state.transaction_id(),
            node_count: state.node_count(),
            tried: state.tried().to_vec(),
            rollback: state.is_rollback(),
            end: state.is_end(),
            status: state.status(),
            failure: state.failure_message(),
            started_at: state.started_at(),
            finished_at: state.finished_at(),
        }
    }
}

/// In-memory state store for testing.
///
/// Records every checkpoint with a snapshot of the state at that moment,
/// in call order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStateStore {
    records: Arc<RwLock<Vec<(Checkpoint, StateSnapshot)>>>,
}

impl InMemoryStateStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of recorded checkpoints.
    pub fn record_count(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Returns the checkpoints in the order they were recorded.
    pub fn checkpoints(&self) -> Vec<Checkpoint> {
        self.records
            .read()
            .unwrap()
            .iter()
            .map(|(checkpoint, _)| *checkpoint)
            .collect()
    }

    /// Returns the snapshot recorded at the given checkpoint, if any.
    pub fn snapshot_at(&self, checkpoint: Checkpoint) -> Option<StateSnapshot> {
        self.records
            .read()
            .unwrap()
            .iter()
            .find(|(recorded, _)| *recorded == checkpoint)
            .map(|(_, snapshot)| snapshot.clone())
    }

    /// Returns the most recently recorded snapshot, if any.
    pub fn last_snapshot(&self) -> Option<StateSnapshot> {
        self.records
            .read()
            .unwrap()
            .last()
            .map(|(_, snapshot)| snapshot.clone())
    }

    /// Clears all recorded checkpoints.
    pub fn clear(&self) {
        self.records.write().unwrap().clear();
    }

    fn record(&self, checkpoint: Checkpoint, state: &ExecutionState) {
        self.records
            .write()
            .unwrap()
            .push((checkpoint, StateSnapshot::from(state)));
    }
}

impl StateStore for InMemoryStateStore {
    fn begin(&self, state: &ExecutionState) {
        self.record(Checkpoint::Begin, state);
    }

    fn update(&self, state: &ExecutionState) {
        self.record(Checkpoint::Update, state);
    }

    fn end(&self, state: &ExecutionState) {
        self.record(Checkpoint::End, state);
    }
}
