//! Visibility Flush
//!
//! Decides which components contribute to something visible. A component
//! affects a visible id when its id is visible, or when some operation of a
//! visible id reads its result.
//!
//! # Algorithm
//!
//! Reverse topological walk from the sinks of the graph:
//!
//! 1. Every component starts from the visibility of its own id.
//! 2. Operations with no non-cyclic outlinks are queued.
//! 3. A dequeued operation hands its AFFECTS_VISIBILITY flag and its
//!    component's visibility to the source of each inlink. A source in a
//!    VISIBILITY component passes it to every component of its id.
//! 4. A source is queued once all its non-cyclic outlinks were handled.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;

use crate::graph::{Depsgraph, NodeType, OperationFlags, OperationIndex, RelationFlags};

impl Depsgraph {
    /// Recompute `affects_visible_id` of every component and the visible
    /// component mask of every id.
    pub(crate) fn flush_visibility_flags(&mut self) {
        for id_index in 0..self.id_nodes.len() {
            let node = &self.id_nodes[id_index];
            let visible = node.is_visible_on_build;
            let enabled = node.is_enabled_on_eval.load(Ordering::Acquire);
            let components: Vec<_> = node.components().collect();
            for component in components {
                let comp = &mut self.components[component.index()];
                if comp.node_type == NodeType::Synchronization {
                    comp.possibly_affects_visible_id = true;
                    comp.affects_visible_id = true;
                } else {
                    comp.possibly_affects_visible_id = visible;
                    comp.affects_visible_id = visible && enabled;
                }
            }
        }

        let mut pending = vec![0u32; self.operations.len()];
        let mut queue = VecDeque::new();
        for (op, node) in self.operations() {
            let outlinks = node
                .outlinks()
                .iter()
                .filter(|link| self.relation(**link).is_some_and(|relation| !relation.is_cyclic()))
                .count() as u32;
            pending[op.index()] = outlinks;
            if outlinks == 0 {
                queue.push_back(op);
            }
        }

        while let Some(op) = queue.pop_front() {
            self.flush_visibility_to_parents(op, &mut pending, &mut queue);
        }

        for node in &mut self.id_nodes {
            let mut mask = 0;
            for component in node.components.values() {
                let comp = &self.components[component.index()];
                if comp.possibly_affects_visible_id {
                    mask |= comp.node_type.mask_bit();
                }
            }
            node.visible_components_mask = mask;
        }
    }

    fn flush_visibility_to_parents(
        &mut self,
        op: OperationIndex,
        pending: &mut [u32],
        queue: &mut VecDeque<OperationIndex>,
    ) {
        let op_flags = self.operation(op).flags() & OperationFlags::AFFECTS_VISIBILITY;
        let to_component = self.operation(op).owner;
        let inlinks = self.operation(op).inlinks.clone();
        for link in inlinks {
            let Some(relation) = self.relation(link) else {
                continue;
            };
            let Some(from) = relation.from_operation() else {
                continue;
            };
            let is_cyclic = relation.is_cyclic();
            let changes_visibility = !relation.flags.contains(RelationFlags::NO_VISIBILITY_CHANGE);

            self.operation(from).set_flags(op_flags);

            if changes_visibility {
                let target = self.component(to_component);
                let possibly = target.possibly_affects_visible_id;
                let affects = target.affects_visible_id;
                let from_component = self.operation(from).owner;
                let targets: Vec<_> = if self.component(from_component).node_type == NodeType::Visibility {
                    let id_index = self.component(from_component).owner;
                    self.id_node(id_index).components().collect()
                } else {
                    vec![from_component]
                };
                for component in targets {
                    let comp = self.component_mut(component);
                    comp.possibly_affects_visible_id |= possibly;
                    comp.affects_visible_id |= affects;
                }
            }

            if !is_cyclic {
                let count = &mut pending[from.index()];
                *count = count.saturating_sub(1);
                if *count == 0 {
                    queue.push_back(from);
                }
            }
        }
    }

    /// Flush visibility again if an evaluated visibility changed.
    pub(crate) fn flush_visibility_flags_if_needed(&mut self) {
        if !self.need_update_nodes_visibility.swap(false, Ordering::AcqRel) {
            return;
        }
        self.flush_visibility_flags();
    }
}
