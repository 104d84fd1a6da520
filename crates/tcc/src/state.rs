//! Per-invocation execution state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TccError;

/// Unique identifier for one chain invocation.
///
/// Wraps a UUID so transaction IDs cannot be mixed up with other
/// UUID-based identifiers. Assigned when the execution state is created
/// and published into the shared context for handler correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Creates a new random transaction ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal disposition of the confirm/cancel phase.
///
/// Assigned only during that phase; a state that never reached it (empty
/// chain, overflow) carries no status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TccStatus {
    /// Every tried unit confirmed.
    ConfirmSuccess,
    /// A confirm call failed.
    ConfirmFailed,
    /// A confirm call timed out.
    ConfirmTimeout,
    /// Every tried unit cancelled.
    CancelSuccess,
    /// A cancel call failed.
    CancelFailed,
    /// A cancel call timed out.
    CancelTimeout,
}

impl TccStatus {
    /// Returns true for the success variants.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::ConfirmSuccess | Self::CancelSuccess)
    }

    /// Returns true for the timeout variants.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConfirmTimeout | Self::CancelTimeout)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfirmSuccess => "ConfirmSuccess",
            Self::ConfirmFailed => "ConfirmFailed",
            Self::ConfirmTimeout => "ConfirmTimeout",
            Self::CancelSuccess => "CancelSuccess",
            Self::CancelFailed => "CancelFailed",
            Self::CancelTimeout => "CancelTimeout",
        }
    }
}

impl std::fmt::Display for TccStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Mutable record of one chain invocation.
///
/// Created by the coordinator before the reservation phase, threaded
/// through the confirm/cancel phase, and discarded when `execute`
/// returns. Tracks which TCC units entered their reservation step (by
/// arena index, in execution order), the rollback/end disposition, the terminal
/// status and at most one captured failure.
///
/// Invariant: `rollback` and `end` are mutually exclusive. After the
/// reservation phase exactly one of them is set unless the chain was
/// empty (in which case no state exists at all).
#[derive(Debug)]
pub struct ExecutionState {
    transaction_id: TransactionId,
    node_count: usize,
    tried: Vec<usize>,
    rollback: bool,
    end: bool,
    status: Option<TccStatus>,
    failure: Option<TccError>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl ExecutionState {
    /// Creates a fresh state for a chain of `node_count` units.
    pub fn new(node_count: usize) -> Self {
        Self {
            transaction_id: TransactionId::new(),
            node_count,
            tried: Vec::with_capacity(node_count),
            rollback: false,
            end: false,
            status: None,
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Returns the invocation's transaction ID.
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// Returns the total number of units in the chain.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Returns the arena indices of the TCC units whose reservation step
    /// was entered, in execution order.
    pub fn tried(&self) -> &[usize] {
        &self.tried
    }

    /// Records an entered reservation step. Append-only.
    pub fn record_tried(&mut self, index: usize) {
        self.tried.push(index);
    }

    /// Returns true if a reservation-phase failure requires cancellation.
    pub fn is_rollback(&self) -> bool {
        self.rollback
    }

    /// Marks the invocation for cancellation.
    pub fn mark_rollback(&mut self) {
        self.rollback = true;
    }

    /// Marks the reservation phase fully complete, clearing any rollback
    /// mark. Only this path reaches the confirm phase.
    pub fn mark_end(&mut self) {
        self.rollback = false;
        self.end = true;
    }

    /// Returns true if the whole chain reserved successfully.
    pub fn is_end(&self) -> bool {
        self.end
    }

    /// Returns the confirm/cancel phase disposition, if that phase ran.
    pub fn status(&self) -> Option<TccStatus> {
        self.status
    }

    /// Records the confirm/cancel phase disposition.
    pub fn set_status(&mut self, status: TccStatus) {
        self.status = Some(status);
    }

    /// Returns the captured reservation-phase failure, if any.
    pub fn failure(&self) -> Option<&TccError> {
        self.failure.as_ref()
    }

    /// Returns the captured failure's message, if any.
    pub fn failure_message(&self) -> Option<String> {
        self.failure.as_ref().map(|e| e.to_string())
    }

    /// Captures a reservation-phase failure. The first capture wins.
    pub fn collect_failure(&mut self, failure: TccError) {
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
    }

    /// Takes the captured failure out of the state, for surfacing to the
    /// caller once compensation has completed.
    pub fn take_failure(&mut self) -> Option<TccError> {
        self.failure.take()
    }

    /// Returns when the invocation started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns when the invocation finished, once finalized.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Stamps the invocation as finished.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}
