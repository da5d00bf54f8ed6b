//! Update Flush
//!
//! Spreads the tags placed by [`tag_update`](crate::graph::Depsgraph::tag_update)
//! to everything that depends on them.
//!
//! # Algorithm
//!
//! 1. If the time source is tagged, every operation connected from it is
//!    tagged as well.
//! 2. Starting from the entry tags, walk the outlinks breadth first. The
//!    first child of a node is followed directly, the others are queued at
//!    the front so a chain is walked to its end before siblings.
//! 3. Every reached operation needs an update. The first time a component is
//!    reached, all its operations are tagged, so a component is always
//!    evaluated as a whole.
//! 4. Ids that were reached accumulate the recalc flags of their reached
//!    components; user-modified ones are reported to editors.
//!
//! Per-pass state lives in scratch vectors indexed by arena index.

use std::collections::VecDeque;

use tracing::debug;

use crate::graph::registry;
use crate::graph::{
    ComponentIndex, Depsgraph, IdNodeIndex, NodeType, OpCode, OperationFlags, OperationIndex,
    RecalcFlags, RelationFlags, UpdateSource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComponentState {
    None,
    Scheduled,
    Done,
}

struct FlushState {
    id_modified: Vec<bool>,
    components: Vec<ComponentState>,
    scheduled: Vec<bool>,
    queue: VecDeque<OperationIndex>,
}

impl Depsgraph {
    /// Propagate entry tags through the graph.
    pub fn flush_updates(&mut self) {
        self.flush_time_source();
        if self.entry_tags.is_empty() {
            return;
        }
        debug!(entry_tags = self.entry_tags.len(), "flush updates");

        let mut state = FlushState {
            id_modified: vec![false; self.id_nodes.len()],
            components: vec![ComponentState::None; self.components.len()],
            scheduled: vec![false; self.operations.len()],
            queue: VecDeque::with_capacity(self.entry_tags.len()),
        };
        for op in &self.entry_tags {
            state.queue.push_back(*op);
            state.scheduled[op.index()] = true;
        }

        while let Some(front) = state.queue.pop_front() {
            let mut current = Some(front);
            while let Some(op) = current {
                self.operation(op).set_flags(OperationFlags::NEEDS_UPDATE);
                let (id_index, component) = self.operation_owner(op);
                state.id_modified[id_index.index()] = true;
                self.flush_handle_component(id_index, component, &mut state);
                current = self.flush_schedule_children(op, &mut state);
            }
        }

        self.flush_collect_id_updates(&state);
    }

    fn flush_time_source(&mut self) {
        if !self.time_source.tagged_for_update {
            return;
        }
        let targets: Vec<_> = self
            .time_source
            .outlinks
            .iter()
            .filter_map(|link| self.relation(*link).map(|relation| relation.to))
            .collect();
        for op in targets {
            self.tag_operation(op, UpdateSource::Time);
        }
    }

    fn flush_handle_component(
        &self,
        id_index: IdNodeIndex,
        component: ComponentIndex,
        state: &mut FlushState,
    ) {
        if state.components[component.index()] == ComponentState::Done {
            return;
        }
        state.components[component.index()] = ComponentState::Done;

        let node = self.component(component);
        if !matches!(
            node.node_type,
            NodeType::ParticleSettings | NodeType::ParticleSystem
        ) {
            let is_geometry = node.node_type == NodeType::Geometry;
            for op in node.operations() {
                let op_node = self.operation(op);
                // Visibility is only re-evaluated on an explicit geometry tag.
                if is_geometry && op_node.opcode == OpCode::Visibility {
                    continue;
                }
                op_node.set_flags(OperationFlags::NEEDS_UPDATE);
            }
        }

        // A changed bone may change the whole IK solution.
        if node.node_type == NodeType::Bone {
            let pose = self
                .id_node(id_index)
                .find_component(NodeType::EvalPose, "");
            if let Some(pose) = pose {
                if state.components[pose.index()] == ComponentState::None {
                    if let Some(entry) = self.component(pose).entry_operation() {
                        state.queue.push_front(entry);
                    }
                    state.components[pose.index()] = ComponentState::Scheduled;
                }
            }
        }
    }

    /// Tag the children of `op`. Returns the child to continue with.
    fn flush_schedule_children(
        &mut self,
        op: OperationIndex,
        state: &mut FlushState,
    ) -> Option<OperationIndex> {
        let flags = self.operation(op).flags();
        let user_modified = flags.contains(OperationFlags::USER_MODIFIED);
        if user_modified {
            let id_index = self.operation_id_node(op);
            self.id_node_mut(id_index).is_user_modified = true;
        }

        let mut next = None;
        for link in self.operation(op).outlinks.iter() {
            let Some(relation) = self.relation(*link) else {
                continue;
            };
            if relation.flags.contains(RelationFlags::NO_FLUSH) {
                continue;
            }
            if relation.flags.contains(RelationFlags::FLUSH_USER_EDIT_ONLY) && !user_modified {
                continue;
            }
            let child = relation.to;
            self.operation(child)
                .set_flags(flags & OperationFlags::FLUSH);
            if state.scheduled[child.index()] {
                continue;
            }
            state.scheduled[child.index()] = true;
            if next.is_none() {
                next = Some(child);
            } else {
                state.queue.push_front(child);
            }
        }
        next
    }

    fn flush_collect_id_updates(&mut self, state: &FlushState) {
        for index in 0..self.id_nodes.len() {
            if !state.id_modified[index] {
                continue;
            }
            let id_index = IdNodeIndex::from_usize(index);
            let id_type = self.id_node(id_index).id_type;
            self.mark_id_type_updated(id_type);

            let recalc = self
                .id_node(id_index)
                .components()
                .filter(|component| state.components[component.index()] == ComponentState::Done)
                .fold(RecalcFlags::empty(), |recalc, component| {
                    recalc | registry::info(self.component(component).node_type).id_recalc_tag
                });

            let node = self.id_node_mut(id_index);
            node.recalc |= recalc;
            let notify = node.is_user_modified && node.is_expanded();
            let id = node.id_orig;
            if notify && self.is_active {
                self.editor_updates.insert(id);
            }
        }
    }

    /// Forget unflushed entry tags and the time source tag.
    pub(crate) fn clear_tags(&mut self) {
        self.entry_tags.clear();
        self.time_source.tagged_for_update = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvaluationMode;
    use crate::graph::{NodeRef, OperationIdKey, OperationWork, ThreadSafety};
    use crate::scene::{IdKey, IdType};

    fn add_op(
        graph: &mut Depsgraph,
        component: ComponentIndex,
        opcode: OpCode,
        name: &str,
    ) -> OperationIndex {
        graph
            .add_operation(
                component,
                OperationIdKey::new(opcode, name, -1),
                Some(OperationWork::Kernel),
                ThreadSafety::ParallelSafe,
            )
            .0
    }

    #[test]
    fn flush_follows_relations() {
        let mut graph = Depsgraph::new(IdKey(0), 0, EvaluationMode::Viewport);
        let (a, _) = graph.add_id_node(IdKey(1), IdType::Object, "OBA");
        let (b, _) = graph.add_id_node(IdKey(2), IdType::Object, "OBB");
        let a_transform = graph.add_component(a, NodeType::Transform, "");
        let b_transform = graph.add_component(b, NodeType::Transform, "");
        let a_final = add_op(&mut graph, a_transform, OpCode::TransformFinal, "");
        let b_local = add_op(&mut graph, b_transform, OpCode::TransformLocal, "");
        let b_final = add_op(&mut graph, b_transform, OpCode::TransformFinal, "");
        graph.add_relation(NodeRef::Operation(a_final), b_local, "parent", RelationFlags::empty());

        graph.tag_operation(a_final, UpdateSource::UserEdit);
        graph.flush_updates();

        assert!(graph.operation(b_local).needs_update());
        // Reached through the component, not a relation.
        assert!(graph.operation(b_final).needs_update());
        assert!(graph
            .operation(b_local)
            .has_flags(OperationFlags::USER_MODIFIED));
        assert!(!graph
            .operation(b_local)
            .has_flags(OperationFlags::DIRECTLY_MODIFIED));
        assert_eq!(graph.id_node(b).recalc(), RecalcFlags::TRANSFORM);
        assert!(graph.id_node(a).is_user_modified());
        assert_ne!(graph.id_type_updated & (1 << IdType::Object.index()), 0);
    }

    #[test]
    fn no_flush_and_user_edit_only() {
        let mut graph = Depsgraph::new(IdKey(0), 0, EvaluationMode::Viewport);
        let (a, _) = graph.add_id_node(IdKey(1), IdType::Object, "OBA");
        let comp_a = graph.add_component(a, NodeType::Parameters, "");
        let (b, _) = graph.add_id_node(IdKey(2), IdType::Object, "OBB");
        let comp_b = graph.add_component(b, NodeType::Parameters, "");
        let (c, _) = graph.add_id_node(IdKey(3), IdType::Object, "OBC");
        let comp_c = graph.add_component(c, NodeType::PointCache, "");
        let source = add_op(&mut graph, comp_a, OpCode::ParametersEval, "");
        let blocked = add_op(&mut graph, comp_b, OpCode::ParametersEval, "");
        let cache = add_op(&mut graph, comp_c, OpCode::PointCacheReset, "");
        graph.add_relation(NodeRef::Operation(source), blocked, "cow", RelationFlags::NO_FLUSH);
        graph.add_relation(
            NodeRef::Operation(source),
            cache,
            "cache",
            RelationFlags::FLUSH_USER_EDIT_ONLY,
        );

        graph.tag_operation(source, UpdateSource::Time);
        graph.flush_updates();
        assert!(!graph.operation(blocked).needs_update());
        assert!(!graph.operation(cache).needs_update());

        graph.clear_tags();
        graph.clear_operation_tags();
        graph.tag_operation(source, UpdateSource::UserEdit);
        graph.flush_updates();
        assert!(!graph.operation(blocked).needs_update());
        assert!(graph.operation(cache).needs_update());
    }

    #[test]
    fn time_source_fans_out() {
        let mut graph = Depsgraph::new(IdKey(0), 0, EvaluationMode::Viewport);
        let (a, _) = graph.add_id_node(IdKey(1), IdType::Object, "OBA");
        let anim = graph.add_component(a, NodeType::Animation, "");
        let eval = add_op(&mut graph, anim, OpCode::AnimationEval, "");
        graph.add_relation(NodeRef::TimeSource, eval, "time", RelationFlags::empty());

        graph.flush_updates();
        assert!(!graph.operation(eval).needs_update());

        graph.tag_time_source();
        graph.flush_updates();
        assert!(graph.operation(eval).needs_update());
        assert_eq!(graph.id_node(a).recalc(), RecalcFlags::ANIMATION);

        graph.clear_tags();
        assert!(!graph.time_source().is_tagged());
        assert_eq!(graph.entry_tags().count(), 0);
    }

    #[test]
    fn geometry_visibility_not_flushed() {
        let mut graph = Depsgraph::new(IdKey(0), 0, EvaluationMode::Viewport);
        let (a, _) = graph.add_id_node(IdKey(1), IdType::Object, "OBA");
        let geometry = graph.add_component(a, NodeType::Geometry, "");
        let eval = add_op(&mut graph, geometry, OpCode::GeometryEval, "");
        let visibility = add_op(&mut graph, geometry, OpCode::Visibility, "");

        graph.tag_operation(eval, UpdateSource::Time);
        graph.flush_updates();
        assert!(graph.operation(eval).needs_update());
        assert!(!graph.operation(visibility).needs_update());
    }
}
