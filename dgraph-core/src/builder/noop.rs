//! Removal of no-op operations nothing depends on.
//!
//! A no-op with no outlinks orders nothing, yet its inlinks still make the
//! scheduler wait on it. Relations from the same data-block into such a
//! no-op are dropped; a predecessor no-op left without outlinks is removed
//! the same way. Pinned no-ops keep their relations, as do relations
//! coming from other data-blocks or the time source.

use std::collections::VecDeque;

use tracing::debug;

use crate::graph::{Depsgraph, OperationFlags, OperationIndex, RelationIndex};

fn is_dead_noop(graph: &Depsgraph, op: OperationIndex) -> bool {
    let node = graph.operation(op);
    node.is_noop() && node.outlinks().is_empty() && !node.has_flags(OperationFlags::PINNED)
}

/// Returns the number of relations removed.
pub(crate) fn remove_unused_noops(graph: &mut Depsgraph) -> usize {
    let mut queue: VecDeque<OperationIndex> = graph
        .operations()
        .map(|(index, _)| index)
        .filter(|index| is_dead_noop(graph, *index))
        .collect();
    let mut removed = 0;

    while let Some(op) = queue.pop_front() {
        let owner = graph.operation_id_node(op);
        let local: Vec<(RelationIndex, OperationIndex)> = graph
            .operation(op)
            .inlinks()
            .iter()
            .filter_map(|link| {
                let source = graph.relation(*link)?.from_operation()?;
                (graph.operation_id_node(source) == owner).then_some((*link, source))
            })
            .collect();
        for (link, source) in local {
            graph.unlink_relation(link);
            removed += 1;
            if is_dead_noop(graph, source) {
                queue.push_back(source);
            }
        }
    }
    debug!(removed, "removed relations into unused no-ops");
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvaluationMode;
    use crate::graph::{NodeRef, NodeType, OpCode, OperationIdKey, OperationWork, RelationFlags, ThreadSafety};
    use crate::scene::{IdKey, IdType};

    fn add_op(graph: &mut Depsgraph, id: IdKey, name: &str, work: Option<OperationWork>) -> OperationIndex {
        let (id_index, _) = graph.add_id_node(id, IdType::Object, "OBCube");
        let comp = graph.add_component(id_index, NodeType::Parameters, "");
        graph
            .add_operation(
                comp,
                OperationIdKey::new(OpCode::ParametersEval, name, -1),
                work,
                ThreadSafety::ParallelSafe,
            )
            .0
    }

    fn link(graph: &mut Depsgraph, from: OperationIndex, to: OperationIndex) {
        graph.add_relation(NodeRef::Operation(from), to, "test", RelationFlags::empty());
    }

    #[test]
    fn dead_noop_chain_removed() {
        let mut graph = Depsgraph::new(IdKey(0), 0, EvaluationMode::Viewport);
        let kernel = add_op(&mut graph, IdKey(1), "kernel", Some(OperationWork::Kernel));
        let first = add_op(&mut graph, IdKey(1), "first", None);
        let second = add_op(&mut graph, IdKey(1), "second", None);
        link(&mut graph, kernel, first);
        link(&mut graph, first, second);

        assert_eq!(remove_unused_noops(&mut graph), 2);
        assert!(graph.operation(first).outlinks().is_empty());
        assert!(graph.operation(kernel).outlinks().is_empty());
    }

    #[test]
    fn pinned_and_foreign_relations_kept() {
        let mut graph = Depsgraph::new(IdKey(0), 0, EvaluationMode::Viewport);
        let other = add_op(&mut graph, IdKey(2), "other", Some(OperationWork::Kernel));
        let kernel = add_op(&mut graph, IdKey(1), "kernel", Some(OperationWork::Kernel));
        let pinned = add_op(&mut graph, IdKey(1), "pinned", None);
        let dead = add_op(&mut graph, IdKey(1), "dead", None);
        graph.operation(pinned).set_flags(OperationFlags::PINNED);
        link(&mut graph, kernel, pinned);
        link(&mut graph, other, dead);
        link(&mut graph, kernel, dead);

        assert_eq!(remove_unused_noops(&mut graph), 1);
        assert_eq!(graph.operation(pinned).inlinks().len(), 1);
        assert_eq!(graph.operation(dead).inlinks().len(), 1);
        assert_eq!(graph.operation(kernel).outlinks().len(), 1);
    }
}
