//! Handler contracts for plain and TCC-aware execution units.

use serde_json::Value;

use crate::error::HandlerError;
use crate::params::StepParameter;

/// A business step with no transactional semantics.
///
/// Plain handlers run exactly once, during the reservation phase, and are
/// never compensated. A plain handler's failure still rolls back every
/// previously reserved TCC unit.
pub trait PlainHandler: Send + Sync {
    /// Name used in logs and failure reports.
    fn name(&self) -> &str;

    /// Runs the step, producing the payload for the next unit.
    fn act(&self, parameter: &StepParameter) -> Result<Value, HandlerError>;
}

/// A Try-Confirm-Cancel participant.
///
/// `try_reserve` reserves resources during the reservation phase. If every
/// unit in the chain reserves successfully the coordinator confirms each
/// participant; otherwise it cancels the ones that reserved. `confirm` and
/// `cancel` must be idempotent — they may be re-driven by a compensation
/// strategy after a partial failure or crash, and idempotence is the handler
/// author's responsibility, not enforced here.
pub trait TccHandler: Send + Sync {
    /// Name used in logs and failure reports.
    fn name(&self) -> &str;

    /// Reserves resources, producing the payload for the next unit.
    fn try_reserve(&self, parameter: &StepParameter) -> Result<Value, HandlerError>;

    /// Finalizes a successful reservation.
    fn confirm(&self) -> Result<(), HandlerError>;

    /// Releases a reservation after a downstream failure.
    fn cancel(&self) -> Result<(), HandlerError>;
}

/// Adapter turning a closure into a [`PlainHandler`].
pub struct StepFn<F> {
    name: String,
    func: F,
}

impl<F> StepFn<F>
where
    F: Fn(&StepParameter) -> Result<Value, HandlerError> + Send + Sync,
{
    /// Wraps `func` as a named plain handler.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> PlainHandler for StepFn<F>
where
    F: Fn(&StepParameter) -> Result<Value, HandlerError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn act(&self, parameter: &StepParameter) -> Result<Value, HandlerError> {
        (self.func)(parameter)
    }
}
