//! Ordered execution chain, stored as an index-addressed arena.

use crate::handler::{PlainHandler, TccHandler};

/// Hard cap on chain traversal.
///
/// A walk that visits more nodes than this is treated as structurally
/// malformed (cyclic) and aborted with [`TccError::Overflow`].
///
/// [`TccError::Overflow`]: crate::error::TccError::Overflow
pub const TRAVERSAL_LIMIT: usize = 1024;

/// A single execution unit: either a plain step or a TCC participant.
pub enum ExecutionUnit {
    /// Runs once during the reservation phase, never compensated.
    Plain(Box<dyn PlainHandler>),
    /// Reserve/confirm/cancel capable participant.
    Tcc(Box<dyn TccHandler>),
}

impl ExecutionUnit {
    /// Returns the handler name of this unit.
    pub fn name(&self) -> &str {
        match self {
            Self::Plain(handler) => handler.name(),
            Self::Tcc(handler) => handler.name(),
        }
    }

    /// Returns true if this unit participates in confirm/cancel.
    pub fn is_tcc(&self) -> bool {
        matches!(self, Self::Tcc(_))
    }
}

impl std::fmt::Debug for ExecutionUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_tcc() { "Tcc" } else { "Plain" };
        write!(f, "ExecutionUnit::{}({:?})", kind, self.name())
    }
}

#[derive(Debug)]
struct ChainNode {
    unit: ExecutionUnit,
    next: Option<usize>,
}

/// Ordered sequence of execution units.
///
/// Nodes live in an arena and are addressed by index; each node carries an
/// explicit successor index. `push` links nodes in insertion order, so a
/// chain built through the public API is always finite and acyclic — the
/// traversal cap exists to fail fast if the links are ever mis-wired.
#[derive(Debug, Default)]
pub struct ExecutionChain {
    nodes: Vec<ChainNode>,
    head: Option<usize>,
}

impl ExecutionChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of units in the chain.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the chain holds no units.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the index of the first unit, if any.
    pub fn head(&self) -> Option<usize> {
        self.head
    }

    /// Appends `unit` to the tail of the chain, returning its index.
    pub fn push(&mut self, unit: ExecutionUnit) -> usize {
        let index = self.nodes.len();
        self.nodes.push(ChainNode { unit, next: None });

        if index == 0 {
            self.head = Some(index);
        } else {
            self.nodes[index - 1].next = Some(index);
        }
        index
    }

    /// Returns the unit at `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    pub fn unit(&self, index: usize) -> &ExecutionUnit {
        &self.nodes[index].unit
    }

    /// Returns the successor index of the node at `index`.
    pub fn next(&self, index: usize) -> Option<usize> {
        self.nodes[index].next
    }

    /// Rewires the successor of `from`. Test hook for malformed chains.
    #[cfg(test)]
    pub(crate) fn set_next(&mut self, from: usize, to: Option<usize>) {
        self.nodes[from].next = to;
    }
}
