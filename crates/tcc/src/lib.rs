//! Try-Confirm-Cancel transaction coordinator.
//!
//! This crate drives an ordered chain of business steps through the three
//! TCC phases:
//! 1. Try: every unit reserves its resources; a reservation that succeeds
//!    guarantees the unit can later confirm.
//! 2. Confirm: once the whole chain has reserved, each participant is
//!    confirmed in reservation order.
//! 3. Cancel: if any unit fails during the reservation phase, the
//!    participants that did reserve are cancelled in reverse order.
//!
//! Chains mix TCC participants with plain steps; a plain step's failure
//! rolls back reserved participants exactly as a participant's own
//! failure would. Durable state checkpoints and retry policy are
//! delegated to [`StateStore`] and compensation-strategy collaborators.

pub mod chain;
pub mod coordinator;
pub mod error;
pub mod handler;
pub mod params;
pub mod state;
pub mod store;
pub mod strategy;

pub use chain::{ExecutionChain, ExecutionUnit, TRAVERSAL_LIMIT};
pub use coordinator::TccCoordinator;
pub use error::{HandlerError, TccError};
pub use handler::{PlainHandler, StepFn, TccHandler};
pub use params::{Context, StepParameter, TRANSACTION_ID_KEY};
pub use state::{ExecutionState, TccStatus, TransactionId};
pub use store::{Checkpoint, InMemoryStateStore, StateSnapshot, StateStore};
pub use strategy::{
    CancelCompensateStrategy, ConfirmCompensateStrategy, NoRetryStrategy, RecordingStrategy,
};
