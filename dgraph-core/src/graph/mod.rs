//! Dependency Graph
//!
//! This module implements the node model of the dependency graph: which
//! pieces of scene data are evaluated, by which operations, and in which
//! order.
//!
//! # Overview
//!
//! The graph is a three level tree of nodes with a flat layer of relations
//! on top:
//!
//! - An [`IdNode`] per data-block in the graph
//! - A [`ComponentNode`] per functional aspect of the data-block
//!   (transform, geometry, one per bone, ...)
//! - An [`OperationNode`] per unit of work; only operations are scheduled
//!
//! [`Relation`]s connect operations (or the time source) to operations: if
//! B reads what A writes, there is a relation from A to B.
//!
//! # Design Decisions
//!
//! 1. Nodes are stored in arenas owned by the [`Depsgraph`] and referenced
//!    by index. Back references are indices too, so there is no shared
//!    ownership inside the graph.
//!
//! 2. Node kinds are closed enums; per-kind metadata comes from the static
//!    table in [`registry`].
//!
//! 3. Relations are kept in both endpoint lists so traversals in either
//!    direction are cheap. Removal always unlinks from both lists before the
//!    arena slot is cleared.

mod depsgraph;
mod flags;
mod node;
pub mod registry;
mod relation;
#[cfg(test)]
pub(crate) mod testing;
mod types;

pub use depsgraph::Depsgraph;
pub use flags::{CustomDataMask, EvalFlags, OperationFlags, RecalcFlags, RelationFlags};
pub use node::{
    ComponentIdKey, ComponentNode, IdNode, Links, OperationCallback, OperationIdKey,
    OperationNode, OperationWork, ThreadSafety, TimeSourceNode,
};
pub use registry::NodeTypeInfo;
pub use relation::Relation;
pub use types::{
    ComponentIndex, IdNodeIndex, LinkedState, NodeClass, NodeRef, NodeType, OpCode,
    OperationIndex, RelationIndex, UpdateSource,
};
