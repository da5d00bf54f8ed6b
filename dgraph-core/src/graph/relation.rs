//! Relations: directed edges from a source node to an operation.

use super::flags::RelationFlags;
use super::types::{NodeRef, OperationIndex};

/// A dependency edge. `to` reads what `from` produces.
///
/// A relation is registered in the outlinks of its source and the inlinks
/// of its target when added, and removed from both when unlinked.
#[derive(Debug, Clone)]
pub struct Relation {
    pub(crate) from: NodeRef,
    pub(crate) to: OperationIndex,
    pub(crate) name: String,
    pub(crate) flags: RelationFlags,
}

impl Relation {
    pub fn from(&self) -> NodeRef {
        self.from
    }

    pub fn to(&self) -> OperationIndex {
        self.to
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> RelationFlags {
        self.flags
    }

    pub fn is_cyclic(&self) -> bool {
        self.flags.contains(RelationFlags::CYCLIC)
    }

    /// Source operation, `None` for time source relations.
    pub fn from_operation(&self) -> Option<OperationIndex> {
        self.from.as_operation()
    }
}
