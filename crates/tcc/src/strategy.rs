//! Compensation-strategy collaborator contracts.

use std::sync::{Arc, RwLock};

use crate::state::ExecutionState;
use crate::store::StateSnapshot;

/// Re-attempt policy for a failed confirm phase.
///
/// Invoked once by the coordinator after it has classified the failure
/// and stamped the status. The strategy owns whatever retry, backoff or
/// escalation logic is appropriate; the coordinator never retries on its
/// own and does not catch the strategy's failures.
pub trait ConfirmCompensateStrategy: Send + Sync {
    /// Handles a confirm-phase failure, given the full execution state.
    fn retry(&self, state: &ExecutionState);
}

/// Re-attempt policy for a failed cancel phase.
pub trait CancelCompensateStrategy: Send + Sync {
    /// Handles a cancel-phase failure, given the full execution state.
    fn retry(&self, state: &ExecutionState);
}

/// Strategy that only logs the terminal status and leaves re-attempts to
/// an out-of-band process driven from the state store.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetryStrategy;

impl NoRetryStrategy {
    /// Creates a new no-retry strategy.
    pub fn new() -> Self {
        Self
    }
}

impl ConfirmCompensateStrategy for NoRetryStrategy {
    fn retry(&self, state: &ExecutionState) {
        tracing::warn!(
            transaction_id = %state.transaction_id(),
            status = ?state.status(),
            tried = state.tried().len(),
            "confirm phase failed, leaving re-attempt to out-of-band recovery"
        );
    }
}

impl CancelCompensateStrategy for NoRetryStrategy {
    fn retry(&self, state: &ExecutionState) {
        tracing::warn!(
            transaction_id = %state.transaction_id(),
            status = ?state.status(),
            tried = state.tried().len(),
            "cancel phase failed, leaving re-attempt to out-of-band recovery"
        );
    }
}

/// Recording strategy for testing.
///
/// Counts invocations and keeps a snapshot of the state each time it is
/// consulted.
#[derive(Debug, Clone, Default)]
pub struct RecordingStrategy {
    calls: Arc<RwLock<Vec<StateSnapshot>>>,
}

impl RecordingStrategy {
    /// Creates a new recording strategy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many times `retry` was invoked.
    pub fn retry_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    /// Returns the state snapshot from the most recent invocation.
    pub fn last_state(&self) -> Option<StateSnapshot> {
        self.calls.read().unwrap().last().cloned()
    }
}

impl ConfirmCompensateStrategy for RecordingStrategy {
    fn retry(&self, state: &ExecutionState) {
        self.calls.write().unwrap().push(StateSnapshot::from(state));
    }
}

impl CancelCompensateStrategy for RecordingStrategy {
    fn retry(&self, state: &ExecutionState) {
        self.calls.write().unwrap().push(StateSnapshot::from(state));
    }
}
