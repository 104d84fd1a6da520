//! Coordinator driving the Try-Confirm-Cancel phases over a chain.

use serde_json::Value;

use crate::chain::{ExecutionChain, ExecutionUnit, TRAVERSAL_LIMIT};
use crate::error::{Result, TccError};
use crate::handler::{PlainHandler, TccHandler};
use crate::params::{StepParameter, TRANSACTION_ID_KEY};
use crate::state::{ExecutionState, TccStatus};
use crate::store::StateStore;
use crate::strategy::{CancelCompensateStrategy, ConfirmCompensateStrategy};

/// Orchestrates a Try-Confirm-Cancel transaction over an ordered chain.
///
/// The chain mixes TCC participants with plain steps. `execute` runs the
/// reservation phase over the whole chain; if every unit reserves, each
/// tried participant is confirmed in reservation order, and if any unit
/// fails, the tried participants are cancelled in reverse reservation
/// order. A plain step's failure rolls back reserved participants exactly
/// as a participant's own failure would.
///
/// The coordinator is configured once (`add_tcc` / `add_plain`) and is
/// read-only afterwards, so a single instance is safe to share across
/// concurrent invocations; all per-invocation state is freshly allocated
/// inside `execute`.
pub struct TccCoordinator<S, C, R>
where
    S: StateStore,
    C: ConfirmCompensateStrategy,
    R: CancelCompensateStrategy,
{
    chain: ExecutionChain,
    store: S,
    confirm_strategy: C,
    cancel_strategy: R,
}

impl<S, C, R> TccCoordinator<S, C, R>
where
    S: StateStore,
    C: ConfirmCompensateStrategy,
    R: CancelCompensateStrategy,
{
    /// Creates a coordinator with an empty chain and the given
    /// state-store and compensation-strategy collaborators.
    pub fn new(store: S, confirm_strategy: C, cancel_strategy: R) -> Self {
        Self {
            chain: ExecutionChain::new(),
            store,
            confirm_strategy,
            cancel_strategy,
        }
    }

    /// Appends a TCC participant to the chain.
    pub fn add_tcc(&mut self, handler: impl TccHandler + 'static) -> &mut Self {
        self.chain.push(ExecutionUnit::Tcc(Box::new(handler)));
        self
    }

    /// Appends a plain step to the chain.
    pub fn add_plain(&mut self, handler: impl PlainHandler + 'static) -> &mut Self {
        self.chain.push(ExecutionUnit::Plain(Box::new(handler)));
        self
    }

    /// Appends an already-built unit to the chain.
    pub fn add_unit(&mut self, unit: ExecutionUnit) -> &mut Self {
        self.chain.push(unit);
        self
    }

    /// Returns the number of units in the chain.
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Returns true if the chain holds no units.
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn chain_mut(&mut self) -> &mut ExecutionChain {
        &mut self.chain
    }

    /// Runs the full chain.
    ///
    /// Returns the final parameter (the last unit's result threaded
    /// through) on success. On a reservation-phase failure, cancellation
    /// of every tried participant completes before the captured failure
    /// is returned, so the caller never observes an error ahead of
    /// compensation.
    #[tracing::instrument(skip(self, parameter), fields(nodes = self.chain.len()))]
    pub fn execute(&self, parameter: StepParameter) -> Result<StepParameter> {
        let Some(head) = self.chain.head() else {
            // Empty chain: input passes through untouched, no side effects.
            return Ok(parameter);
        };

        metrics::counter!("tcc_executions_total").increment(1);
        let started = std::time::Instant::now();

        let mut state = ExecutionState::new(self.chain.len());
        let transaction_id = state.transaction_id();
        parameter
            .context()
            .set(TRANSACTION_ID_KEY, transaction_id.to_string());

        tracing::debug!(%transaction_id, "transaction begun");
        self.store.begin(&state);

        let current = match self.prepare(parameter.clone(), head, &mut state) {
            Ok(produced) => produced,
            Err(overflow @ TccError::Overflow { .. }) => return Err(overflow),
            Err(failure) => {
                state.collect_failure(failure);
                parameter
            }
        };

        // Post-reservation snapshot, before any compensation runs.
        self.store.update(&state);

        // Exactly one of rollback/end holds here.
        if state.is_rollback() {
            self.rollback(&mut state);
        }
        if state.is_end() {
            self.commit(&mut state);
        }

        state.finish();
        self.store.end(&state);

        let duration = started.elapsed().as_secs_f64();
        metrics::histogram!("tcc_duration_seconds").record(duration);

        if let Some(failure) = state.take_failure() {
            metrics::counter!("tcc_rolled_back").increment(1);
            tracing::warn!(
                %transaction_id,
                node = failure.node_name().unwrap_or("unknown"),
                "transaction rolled back"
            );
            return Err(failure);
        }

        if state.status().is_none_or(|status| status.is_success()) {
            metrics::counter!("tcc_completed").increment(1);
        } else {
            // Confirm phase was handed to the compensation strategy.
            metrics::counter!("tcc_confirm_delegated").increment(1);
        }
        tracing::info!(%transaction_id, status = ?state.status(), duration, "transaction completed");
        Ok(current)
    }

    /// Reservation phase: walks the chain from `head`, threading each
    /// unit's result into the next unit's parameter.
    ///
    /// The walk stops at the first failing unit; the failure has already
    /// marked the state for rollback by the time it propagates. Reaching
    /// the tail clears rollback and sets the end flag, the only path that
    /// leads to the confirm phase. A traversal that exceeds
    /// [`TRAVERSAL_LIMIT`] aborts with an overflow failure.
    fn prepare(
        &self,
        parameter: StepParameter,
        head: usize,
        state: &mut ExecutionState,
    ) -> Result<StepParameter> {
        let mut current = parameter;
        let mut cursor = Some(head);
        let mut count = 0usize;

        while let Some(index) = cursor {
            if count >= TRAVERSAL_LIMIT {
                return Err(TccError::Overflow {
                    limit: TRAVERSAL_LIMIT,
                });
            }

            let result = match self.chain.unit(index) {
                ExecutionUnit::Tcc(handler) => {
                    self.execute_tcc_unit(index, handler.as_ref(), &current, state)?
                }
                ExecutionUnit::Plain(handler) => {
                    self.execute_plain_unit(index, handler.as_ref(), &current, state)?
                }
            };

            count += 1;
            current = current.next(result);
            cursor = self.chain.next(index);
        }

        state.mark_end();
        Ok(current)
    }

    /// Confirm phase: confirms every tried participant in reservation
    /// order.
    ///
    /// Stops at the first failure, classifies it into
    /// `ConfirmTimeout`/`ConfirmFailed` and hands the state to the
    /// confirm-compensation strategy. The coordinator itself never
    /// retries.
    fn commit(&self, state: &mut ExecutionState) {
        let tried = state.tried().to_vec();
        if tried.is_empty() {
            return;
        }

        for index in tried {
            let ExecutionUnit::Tcc(handler) = self.chain.unit(index) else {
                continue;
            };

            if let Err(cause) = handler.confirm() {
                let status = if cause.is_timeout() {
                    TccStatus::ConfirmTimeout
                } else {
                    TccStatus::ConfirmFailed
                };
                state.set_status(status);
                tracing::warn!(
                    transaction_id = %state.transaction_id(),
                    node = handler.name(),
                    %status,
                    %cause,
                    "confirm failed, delegating to compensation strategy"
                );
                self.confirm_strategy.retry(state);
                return;
            }
            tracing::debug!(node = handler.name(), "confirmed");
        }

        state.set_status(TccStatus::ConfirmSuccess);
    }

    /// Cancel phase: cancels every tried participant in strict reverse
    /// reservation order, so the reservation closest to the failure is
    /// released first.
    ///
    /// Stops at the first failure, classifies it into
    /// `CancelTimeout`/`CancelFailed` and hands the state to the
    /// cancel-compensation strategy.
    fn rollback(&self, state: &mut ExecutionState) {
        let tried = state.tried().to_vec();
        if tried.is_empty() {
            return;
        }

        for index in tried.into_iter().rev() {
            let ExecutionUnit::Tcc(handler) = self.chain.unit(index) else {
                continue;
            };

            if let Err(cause) = handler.cancel() {
                let status = if cause.is_timeout() {
                    TccStatus::CancelTimeout
                } else {
                    TccStatus::CancelFailed
                };
                state.set_status(status);
                tracing::warn!(
                    transaction_id = %state.transaction_id(),
                    node = handler.name(),
                    %status,
                    %cause,
                    "cancel failed, delegating to compensation strategy"
                );
                self.cancel_strategy.retry(state);
                return;
            }
            tracing::debug!(node = handler.name(), "cancelled");
        }

        state.set_status(TccStatus::CancelSuccess);
    }

    /// Runs one TCC participant's reservation step.
    ///
    /// The unit is recorded in the tried list whenever its reservation
    /// step was entered, success or not, so the compensation phase sees
    /// every unit that may have partially applied work. Releasing a
    /// failed, partially-applied reservation relies on the handler's
    /// cancel idempotence contract. A failure additionally marks the
    /// state for rollback.
    fn execute_tcc_unit(
        &self,
        index: usize,
        handler: &dyn TccHandler,
        parameter: &StepParameter,
        state: &mut ExecutionState,
    ) -> Result<Value> {
        tracing::debug!(node = handler.name(), "reserving");
        let outcome = handler.try_reserve(parameter);
        state.record_tried(index);
        match outcome {
            Ok(result) => Ok(result),
            Err(cause) => {
                state.mark_rollback();
                Err(TccError::node(index, handler.name(), parameter, cause))
            }
        }
    }

    /// Runs one plain step. Its failure marks the state for rollback
    /// exactly as a participant's own reservation failure would.
    fn execute_plain_unit(
        &self,
        index: usize,
        handler: &dyn PlainHandler,
        parameter: &StepParameter,
        state: &mut ExecutionState,
    ) -> Result<Value> {
        tracing::debug!(node = handler.name(), "acting");
        match handler.act(parameter) {
            Ok(result) => Ok(result),
            Err(cause) => {
                state.mark_rollback();
                Err(TccError::node(index, handler.name(), parameter, cause))
            }
        }
    }
}

impl<S, C, R> std::fmt::Debug for TccCoordinator<S, C, R>
where
    S: StateStore,
    C: ConfirmCompensateStrategy,
    R: CancelCompensateStrategy,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TccCoordinator")
            .field("nodes", &self.chain.len())
            .finish_non_exhaustive()
    }
}
