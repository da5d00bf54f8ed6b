//! Transitive Reduction
//!
//! Drops relations that are implied by a longer path: if `A -> B -> C`
//! exists, `A -> C` adds no ordering and only costs scheduling work.
//!
//! A longer path only stands in for a relation if updates travel along it
//! at least as far. Every relation has a flush level: `NO_FLUSH` relations
//! only order, `FLUSH_USER_EDIT_ONLY` relations pass user edits, all others
//! pass every update. The level of a path is the lowest level on it.
//!
//! For every operation `T` the ancestors reachable through its direct
//! parents are marked with the best path level to `T`. A direct relation
//! into `T` whose source is marked with at least its own level is removed.
//! Relations from the time source, cyclic relations and `GODMODE` relations
//! are never removed.

use tracing::debug;

use crate::graph::{Depsgraph, NodeRef, OperationIndex, Relation, RelationFlags, RelationIndex};

/// How far updates travel over a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum FlushLevel {
    OrderOnly,
    UserEdit,
    All,
}

impl FlushLevel {
    fn of(relation: &Relation) -> Self {
        let flags = relation.flags();
        if flags.contains(RelationFlags::NO_FLUSH) {
            FlushLevel::OrderOnly
        } else if flags.contains(RelationFlags::FLUSH_USER_EDIT_ONLY) {
            FlushLevel::UserEdit
        } else {
            FlushLevel::All
        }
    }
}

/// Operation parents with the level of the relation they come through.
fn parents(graph: &Depsgraph, op: OperationIndex) -> Vec<(OperationIndex, FlushLevel)> {
    graph
        .operation(op)
        .inlinks()
        .iter()
        .filter_map(|link| graph.relation(*link))
        .filter(|relation| !relation.is_cyclic())
        .filter_map(|relation| Some((relation.from_operation()?, FlushLevel::of(relation))))
        .collect()
}

/// Remove redundant relations. Returns the number removed.
pub(crate) fn transitive_reduction(graph: &mut Depsgraph) -> usize {
    let num_operations = graph.num_operations();
    // Generation stamps avoid clearing the marks for every target.
    let mut marks: Vec<(u32, FlushLevel)> = vec![(0, FlushLevel::OrderOnly); num_operations];
    let mut generation = 0u32;
    let mut stack: Vec<(OperationIndex, FlushLevel)> = Vec::new();
    let mut removed = 0;

    for target in (0..num_operations).map(OperationIndex::from_usize) {
        generation += 1;
        for (parent, to_target) in parents(graph, target) {
            stack.extend(
                parents(graph, parent)
                    .into_iter()
                    .map(|(ancestor, level)| (ancestor, level.min(to_target))),
            );
        }
        // Levels only grow, so every operation is pushed a bounded number
        // of times.
        while let Some((ancestor, level)) = stack.pop() {
            let mark = &mut marks[ancestor.index()];
            if mark.0 == generation && mark.1 >= level {
                continue;
            }
            *mark = (generation, level);
            stack.extend(
                parents(graph, ancestor)
                    .into_iter()
                    .map(|(next, next_level)| (next, next_level.min(level))),
            );
        }

        let redundant: Vec<RelationIndex> = graph
            .operation(target)
            .inlinks()
            .iter()
            .copied()
            .filter(|link| {
                graph.relation(*link).is_some_and(|relation| {
                    if relation.is_cyclic() || relation.flags().contains(RelationFlags::GODMODE) {
                        return false;
                    }
                    match relation.from() {
                        NodeRef::Operation(source) => {
                            let (stamp, level) = marks[source.index()];
                            stamp == generation && level >= FlushLevel::of(relation)
                        }
                        _ => false,
                    }
                })
            })
            .collect();
        for link in redundant {
            graph.unlink_relation(link);
            removed += 1;
        }
    }
    debug!(removed, "transitive reduction");
    removed
}
