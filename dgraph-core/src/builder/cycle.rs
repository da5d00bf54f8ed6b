//! Cycle Detection
//!
//! Finds dependency cycles between operations and breaks each one by
//! flagging a single relation as cyclic. Cyclic relations are ignored by
//! the scheduler, so the remaining graph can be evaluated in order.
//!
//! # Algorithm
//!
//! Depth-first search with an explicit stack. Every stack entry remembers
//! which of its outlinks it has walked so far and the relation it was
//! reached through.
//!
//! 1. Start from operations without operation parents, then from anything
//!    left unvisited (closed loops have no such start).
//! 2. Reaching an operation that is still on the stack closes a cycle.
//!    Walk back along the stack to it and flag the first relation that is
//!    not `GODMODE`, starting from the closing one.
//! 3. Repeat until a pass finds nothing. Breaking a cycle on a stack
//!    relation instead of the closing one can hide another cycle from the
//!    pass that found it.

use tracing::warn;

use crate::graph::{Depsgraph, OperationIndex, RelationFlags, RelationIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    NotVisited,
    InStack,
    Visited,
}

struct StackEntry {
    op: OperationIndex,
    via: Option<RelationIndex>,
    next_link: usize,
}

/// Flag one relation of every cycle as cyclic. Returns the number of
/// cycles broken.
pub(crate) fn detect_and_solve_cycles(graph: &mut Depsgraph) -> usize {
    let mut total = 0;
    loop {
        let found = solve_cycles_pass(graph);
        if found == 0 {
            return total;
        }
        total += found;
    }
}

fn solve_cycles_pass(graph: &mut Depsgraph) -> usize {
    let num_operations = graph.num_operations();
    let mut state = vec![VisitState::NotVisited; num_operations];
    let mut cycles = 0;

    let roots: Vec<OperationIndex> = graph
        .operations()
        .filter(|(index, _)| graph.operation_parents(*index).next().is_none())
        .map(|(index, _)| index)
        .collect();
    let rest = (0..num_operations).map(OperationIndex::from_usize);
    for start in roots.into_iter().chain(rest) {
        if state[start.index()] != VisitState::NotVisited {
            continue;
        }
        cycles += visit(graph, start, &mut state);
    }
    cycles
}

fn visit(graph: &mut Depsgraph, start: OperationIndex, state: &mut [VisitState]) -> usize {
    let mut cycles = 0;
    let mut stack = vec![StackEntry {
        op: start,
        via: None,
        next_link: 0,
    }];
    state[start.index()] = VisitState::InStack;

    while let Some(top) = stack.last_mut() {
        let outlinks = graph.operation(top.op).outlinks();
        let Some(&link) = outlinks.get(top.next_link) else {
            state[top.op.index()] = VisitState::Visited;
            stack.pop();
            continue;
        };
        top.next_link += 1;
        let Some(relation) = graph.relation(link) else {
            continue;
        };
        if relation.is_cyclic() {
            continue;
        }
        let target = relation.to();
        match state[target.index()] {
            VisitState::NotVisited => {
                state[target.index()] = VisitState::InStack;
                stack.push(StackEntry {
                    op: target,
                    via: Some(link),
                    next_link: 0,
                });
            }
            VisitState::InStack => {
                break_cycle(graph, &stack, link, target);
                cycles += 1;
            }
            VisitState::Visited => {}
        }
    }
    cycles
}

/// Flag one relation of the cycle closed by `closing`, which points back at
/// `cycle_start` further down the stack.
fn break_cycle(
    graph: &mut Depsgraph,
    stack: &[StackEntry],
    closing: RelationIndex,
    cycle_start: OperationIndex,
) {
    let mut candidates = vec![closing];
    let mut path = Vec::new();
    for entry in stack.iter().rev() {
        path.push(graph.operation_label(entry.op));
        if entry.op == cycle_start {
            break;
        }
        if let Some(via) = entry.via {
            candidates.push(via);
        }
    }
    path.reverse();
    path.push(graph.operation_label(cycle_start));

    let chosen = candidates
        .iter()
        .copied()
        .find(|index| {
            graph
                .relation(*index)
                .is_some_and(|relation| !relation.flags().contains(RelationFlags::GODMODE))
        })
        .unwrap_or(closing);
    let name = graph
        .relation(chosen)
        .map(|relation| relation.name().to_owned())
        .unwrap_or_default();
    warn!(cycle = %path.join(" -> "), relation = %name, "dependency cycle detected");
    if let Some(flags) = graph.relation_flags_mut(chosen) {
        *flags |= RelationFlags::CYCLIC;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::testing::{graph_with_ops, link};

    fn cyclic_count(graph: &Depsgraph) -> usize {
        graph.relations().filter(|(_, relation)| relation.is_cyclic()).count()
    }

    #[test]
    fn acyclic_graph_untouched() {
        let (mut graph, ops) = graph_with_ops(3);
        link(&mut graph, ops[0], ops[1], RelationFlags::empty());
        link(&mut graph, ops[1], ops[2], RelationFlags::empty());
        link(&mut graph, ops[0], ops[2], RelationFlags::empty());
        assert_eq!(detect_and_solve_cycles(&mut graph), 0);
        assert_eq!(cyclic_count(&graph), 0);
    }

    #[test]
    fn three_node_cycle() {
        let (mut graph, ops) = graph_with_ops(4);
        link(&mut graph, ops[3], ops[0], RelationFlags::empty());
        link(&mut graph, ops[0], ops[1], RelationFlags::empty());
        link(&mut graph, ops[1], ops[2], RelationFlags::empty());
        link(&mut graph, ops[2], ops[0], RelationFlags::empty());

        assert_eq!(detect_and_solve_cycles(&mut graph), 1);
        assert_eq!(cyclic_count(&graph), 1);
        assert_eq!(detect_and_solve_cycles(&mut graph), 0);
    }

    #[test]
    fn closed_loop_without_roots() {
        let (mut graph, ops) = graph_with_ops(2);
        link(&mut graph, ops[0], ops[1], RelationFlags::empty());
        link(&mut graph, ops[1], ops[0], RelationFlags::empty());
        assert_eq!(detect_and_solve_cycles(&mut graph), 1);
        assert!(!graph.is_reachable(ops[0], ops[1]) || !graph.is_reachable(ops[1], ops[0]));
    }

    #[test]
    fn godmode_relation_survives() {
        let (mut graph, ops) = graph_with_ops(3);
        link(&mut graph, ops[0], ops[1], RelationFlags::empty());
        let kept = link(&mut graph, ops[1], ops[2], RelationFlags::empty());
        let closing = link(&mut graph, ops[2], ops[0], RelationFlags::GODMODE);
        // Start from the loop's first op so the godmode relation closes it.
        detect_and_solve_cycles(&mut graph);
        assert!(!graph.relation(closing).unwrap().is_cyclic());
        assert!(graph.relation(kept).unwrap().is_cyclic());
    }

    #[test]
    fn overlapping_cycles_all_broken() {
        let (mut graph, ops) = graph_with_ops(3);
        link(&mut graph, ops[0], ops[1], RelationFlags::empty());
        link(&mut graph, ops[1], ops[0], RelationFlags::empty());
        link(&mut graph, ops[1], ops[2], RelationFlags::empty());
        link(&mut graph, ops[2], ops[0], RelationFlags::empty());
        assert!(detect_and_solve_cycles(&mut graph) >= 2);
        assert_eq!(detect_and_solve_cycles(&mut graph), 0);
        for from in &ops {
            for to in &ops {
                if from != to {
                    assert!(!(graph.is_reachable(*from, *to) && graph.is_reachable(*to, *from)));
                }
            }
        }
    }
}
