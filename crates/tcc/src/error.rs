//! Coordinator and handler error types.

use thiserror::Error;

use crate::params::StepParameter;

/// Failure raised by a handler's reserve/act/confirm/cancel body.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler gave up waiting on an external collaborator.
    ///
    /// Recognized during the confirm/cancel phase to select the
    /// `ConfirmTimeout` / `CancelTimeout` status variants.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Any other handler failure.
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// Creates a timeout failure.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    /// Creates a generic failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Returns true for the distinguished timeout kind.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Errors surfaced by the coordinator.
#[derive(Debug, Error)]
pub enum TccError {
    /// An execution unit failed; wraps the cause, the offending node and
    /// the parameter at the time of failure.
    #[error("execution unit '{name}' (node {index}) failed: {source}")]
    NodeExecution {
        /// Arena index of the failing node.
        index: usize,
        /// Handler name of the failing node.
        name: String,
        /// Parameter the node was invoked with.
        parameter: StepParameter,
        /// The underlying handler failure.
        #[source]
        source: HandlerError,
    },

    /// Chain traversal exceeded the structural cap.
    ///
    /// Signals a malformed (cyclic) chain, not a business failure.
    #[error("chain traversal exceeded {limit} nodes, chain is malformed")]
    Overflow {
        /// The traversal cap that was hit.
        limit: usize,
    },
}

impl TccError {
    pub(crate) fn node(
        index: usize,
        name: &str,
        parameter: &StepParameter,
        source: HandlerError,
    ) -> Self {
        Self::NodeExecution {
            index,
            name: name.to_string(),
            parameter: parameter.clone(),
            source,
        }
    }

    /// Returns the offending node's handler name, if this is a node failure.
    pub fn node_name(&self) -> Option<&str> {
        match self {
            Self::NodeExecution { name, .. } => Some(name.as_str()),
            Self::Overflow { .. } => None,
        }
    }

    /// Returns the parameter the failing node was invoked with.
    pub fn parameter(&self) -> Option<&StepParameter> {
        match self {
            Self::NodeExecution { parameter, .. } => Some(parameter),
            Self::Overflow { .. } => None,
        }
    }
}

/// Convenience type alias for coordinator results.
pub type Result<T> = std::result::Result<T, TccError>;
