//! Graph fixtures shared by unit tests.

use super::{
    Depsgraph, NodeRef, NodeType, OpCode, OperationIdKey, OperationIndex, OperationWork,
    RelationFlags, RelationIndex, ThreadSafety,
};
use crate::config::EvaluationMode;
use crate::scene::{IdKey, IdType};

/// A graph with one object whose parameters component holds `count`
/// kernel operations named `op0`, `op1`, ...
pub(crate) fn graph_with_ops(count: usize) -> (Depsgraph, Vec<OperationIndex>) {
    let mut graph = Depsgraph::new(IdKey(0), 0, EvaluationMode::Viewport);
    let (id, _) = graph.add_id_node(IdKey(1), IdType::Object, "OBCube");
    let comp = graph.add_component(id, NodeType::Parameters, "");
    let ops = (0..count)
        .map(|i| {
            graph
                .add_operation(
                    comp,
                    OperationIdKey::new(OpCode::ParametersEval, format!("op{i}"), -1),
                    Some(OperationWork::Kernel),
                    ThreadSafety::ParallelSafe,
                )
                .0
        })
        .collect();
    (graph, ops)
}

pub(crate) fn link(
    graph: &mut Depsgraph,
    from: OperationIndex,
    to: OperationIndex,
    flags: RelationFlags,
) -> RelationIndex {
    graph
        .add_relation(NodeRef::Operation(from), to, "test", flags)
        .unwrap()
}
