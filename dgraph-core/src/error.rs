//! Error types.

use thiserror::Error;

use crate::graph::NodeType;
use crate::scene::{IdKey, IdType};

/// Errors returned by fallible graph operations.
#[derive(Debug, Error)]
pub enum DgraphError {
    /// The scene the graph is built for is missing from the database.
    #[error("scene {0} not found")]
    SceneNotFound(IdKey),

    /// A data-block has a different type than the operation requires.
    #[error("{id} is a {actual:?}, expected {expected:?}")]
    WrongIdType {
        id: IdKey,
        expected: IdType,
        actual: IdType,
    },

    #[error("scene {scene} has no view layer {index}")]
    ViewLayerNotFound { scene: IdKey, index: usize },

    /// Build request does not match the graph's back references.
    #[error("graph belongs to scene {expected}, build requested for {actual}")]
    SceneMismatch { expected: IdKey, actual: IdKey },

    /// Tagging is not allowed while operations run.
    #[error("{0} tagged for update during evaluation")]
    TaggedDuringEvaluation(IdKey),

    #[error("data-block {0} not found")]
    UnknownId(IdKey),

    /// Operation added after the node builder closed the component.
    #[error("component {component} of {id} is closed")]
    ComponentClosed { id: IdKey, component: NodeType },

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DgraphError>;

/// Structural problems found by the consistency check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyError {
    /// A relation is listed a different number of times in the outlinks of
    /// its source than in the inlinks of its target.
    #[error("relation {relation} ({name}) listed {outlinks} times as outlink, {inlinks} times as inlink")]
    LinkMismatch {
        relation: usize,
        name: String,
        outlinks: usize,
        inlinks: usize,
    },

    /// An adjacency list refers to a removed relation.
    #[error("{node} refers to removed relation {relation}")]
    DanglingLink { node: String, relation: usize },

    #[error("{operation}: {expected} pending links expected, counter is {actual}")]
    PendingCount {
        operation: String,
        expected: u32,
        actual: u32,
    },
}
