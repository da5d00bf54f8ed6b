//! The graph container and its arena operations.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use tracing::{trace, warn};

use super::flags::{OperationFlags, RelationFlags};
use super::node::{
    ComponentIdKey, ComponentNode, IdNode, OperationIdKey, OperationNode, OperationWork,
    ThreadSafety, TimeSourceNode,
};
use super::relation::Relation;
use super::types::{
    ComponentIndex, IdNodeIndex, NodeRef, NodeType, OpCode, OperationIndex, RelationIndex,
};
use crate::builder::BuildScope;
use crate::config::{EvaluationMode, GraphConfig};
use crate::eval::{DefaultKernel, EvalKernel, EvalStats};
use crate::scene::{IdKey, IdType};

/// A dependency graph for one view layer of one scene.
///
/// Nodes and relations live in arenas and are addressed by index. The graph
/// is rebuilt by the builder pipeline and evaluated in place; evaluation
/// only touches atomics and copy-on-write locks, so it runs through `&self`.
pub struct Depsgraph {
    pub(crate) config: GraphConfig,
    pub(crate) mode: EvaluationMode,
    pub(crate) scene: IdKey,
    pub(crate) view_layer: usize,

    pub(crate) id_nodes: Vec<IdNode>,
    pub(crate) components: Vec<ComponentNode>,
    pub(crate) operations: Vec<OperationNode>,
    pub(crate) relations: Vec<Option<Relation>>,
    pub(crate) time_source: TimeSourceNode,
    pub(crate) id_map: IndexMap<IdKey, IdNodeIndex>,

    /// Operations tagged directly since the last flush.
    pub(crate) entry_tags: IndexSet<OperationIndex>,

    /// Relations must be rebuilt before the next evaluation.
    pub(crate) need_update: bool,
    pub(crate) is_active: bool,
    pub(crate) is_evaluating: bool,
    pub(crate) is_render_pipeline: bool,
    pub(crate) has_animated_visibility: bool,
    pub(crate) need_visibility_update: bool,
    pub(crate) need_visibility_time_update: bool,
    /// Set by visibility operations when an id's enabled state changed.
    pub(crate) need_update_nodes_visibility: AtomicBool,

    pub(crate) frame: f64,
    pub(crate) scene_cow: Option<IdNodeIndex>,
    pub(crate) id_type_exist: u32,
    pub(crate) id_type_updated: u32,
    pub(crate) editor_updates: IndexSet<IdKey>,
    pub(crate) stats: EvalStats,
    pub(crate) kernel: Arc<dyn EvalKernel>,
    pub(crate) last_scope: Option<BuildScope>,
}

impl std::fmt::Debug for Depsgraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Depsgraph")
            .field("scene", &self.scene)
            .field("view_layer", &self.view_layer)
            .field("mode", &self.mode)
            .field("id_nodes", &self.id_nodes.len())
            .field("operations", &self.operations.len())
            .field("relations", &self.num_relations())
            .finish()
    }
}

impl Depsgraph {
    pub fn new(scene: IdKey, view_layer: usize, mode: EvaluationMode) -> Self {
        Self::with_config(scene, view_layer, mode, GraphConfig::default())
    }

    pub fn with_config(
        scene: IdKey,
        view_layer: usize,
        mode: EvaluationMode,
        config: GraphConfig,
    ) -> Self {
        Self {
            config,
            mode,
            scene,
            view_layer,
            id_nodes: Vec::new(),
            components: Vec::new(),
            operations: Vec::new(),
            relations: Vec::new(),
            time_source: TimeSourceNode::default(),
            id_map: IndexMap::new(),
            entry_tags: IndexSet::new(),
            need_update: true,
            is_active: false,
            is_evaluating: false,
            is_render_pipeline: false,
            has_animated_visibility: false,
            need_visibility_update: true,
            need_visibility_time_update: false,
            need_update_nodes_visibility: AtomicBool::new(false),
            frame: 0.0,
            scene_cow: None,
            id_type_exist: 0,
            id_type_updated: 0,
            editor_updates: IndexSet::new(),
            stats: EvalStats::default(),
            kernel: Arc::new(DefaultKernel),
            last_scope: None,
        }
    }

    /// Replace the kernel that runs operations with `OperationWork::Kernel`.
    pub fn set_kernel(&mut self, kernel: Arc<dyn EvalKernel>) {
        self.kernel = kernel;
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn mode(&self) -> EvaluationMode {
        self.mode
    }

    pub fn scene(&self) -> IdKey {
        self.scene
    }

    pub fn view_layer(&self) -> usize {
        self.view_layer
    }

    pub fn frame(&self) -> f64 {
        self.frame
    }

    pub fn need_update(&self) -> bool {
        self.need_update
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Active graphs record user edits on the originals and report editor
    /// updates.
    pub fn make_active(&mut self) {
        self.is_active = true;
    }

    pub fn make_inactive(&mut self) {
        self.is_active = false;
    }

    pub fn is_evaluating(&self) -> bool {
        self.is_evaluating
    }

    pub fn is_render_pipeline(&self) -> bool {
        self.is_render_pipeline
    }

    pub fn has_animated_visibility(&self) -> bool {
        self.has_animated_visibility
    }

    pub fn stats(&self) -> &EvalStats {
        &self.stats
    }

    pub fn time_source(&self) -> &TimeSourceNode {
        &self.time_source
    }

    pub fn entry_tags(&self) -> impl Iterator<Item = OperationIndex> + '_ {
        self.entry_tags.iter().copied()
    }

    // Arena access

    pub fn id_node(&self, index: IdNodeIndex) -> &IdNode {
        &self.id_nodes[index.index()]
    }

    pub(crate) fn id_node_mut(&mut self, index: IdNodeIndex) -> &mut IdNode {
        &mut self.id_nodes[index.index()]
    }

    pub fn component(&self, index: ComponentIndex) -> &ComponentNode {
        &self.components[index.index()]
    }

    pub(crate) fn component_mut(&mut self, index: ComponentIndex) -> &mut ComponentNode {
        &mut self.components[index.index()]
    }

    pub fn operation(&self, index: OperationIndex) -> &OperationNode {
        &self.operations[index.index()]
    }

    pub(crate) fn operation_mut(&mut self, index: OperationIndex) -> &mut OperationNode {
        &mut self.operations[index.index()]
    }

    /// `None` once the relation has been unlinked.
    pub fn relation(&self, index: RelationIndex) -> Option<&Relation> {
        self.relations.get(index.index()).and_then(Option::as_ref)
    }

    pub fn id_nodes(&self) -> impl Iterator<Item = (IdNodeIndex, &IdNode)> {
        self.id_map
            .values()
            .map(move |index| (*index, &self.id_nodes[index.index()]))
    }

    pub fn operations(&self) -> impl Iterator<Item = (OperationIndex, &OperationNode)> {
        self.operations
            .iter()
            .enumerate()
            .map(|(index, node)| (OperationIndex::from_usize(index), node))
    }

    pub fn relations(&self) -> impl Iterator<Item = (RelationIndex, &Relation)> {
        self.relations
            .iter()
            .enumerate()
            .filter_map(|(index, relation)| {
                relation
                    .as_ref()
                    .map(|relation| (RelationIndex::from_usize(index), relation))
            })
    }

    pub fn num_id_nodes(&self) -> usize {
        self.id_nodes.len()
    }

    pub fn num_operations(&self) -> usize {
        self.operations.len()
    }

    pub fn num_relations(&self) -> usize {
        self.relations.iter().filter(|relation| relation.is_some()).count()
    }

    /// Component and id that own an operation.
    pub fn operation_owner(&self, index: OperationIndex) -> (IdNodeIndex, ComponentIndex) {
        let component = self.operation(index).owner;
        (self.component(component).owner, component)
    }

    pub fn operation_id_node(&self, index: OperationIndex) -> IdNodeIndex {
        self.operation_owner(index).0
    }

    /// Human readable `id/COMPONENT[name]/OPCODE(name)` label.
    pub fn operation_label(&self, index: OperationIndex) -> String {
        let (id_index, component) = self.operation_owner(index);
        let comp = self.component(component);
        let op = self.operation(index);
        let mut label = format!("{}/{}", self.id_node(id_index).name, comp.node_type);
        if !comp.name.is_empty() {
            label.push_str(&format!("[{}]", comp.name));
        }
        label.push('/');
        label.push_str(&op.key().to_string());
        label
    }

    // Lookup

    pub fn find_id_node(&self, id: IdKey) -> Option<IdNodeIndex> {
        self.id_map.get(&id).copied()
    }

    pub fn find_component(
        &self,
        id: IdKey,
        node_type: NodeType,
        name: &str,
    ) -> Option<ComponentIndex> {
        let id_index = self.find_id_node(id)?;
        self.id_node(id_index).find_component(node_type, name)
    }

    pub fn find_operation(
        &self,
        id: IdKey,
        node_type: NodeType,
        component_name: &str,
        opcode: OpCode,
        name: &str,
        name_tag: i32,
    ) -> Option<OperationIndex> {
        let component = self.find_component(id, node_type, component_name)?;
        self.component(component)
            .find_operation(&OperationIdKey::new(opcode, name, name_tag))
    }

    // Construction

    /// Find or create the id node of `id`. Returns whether it was created.
    pub(crate) fn add_id_node(
        &mut self,
        id: IdKey,
        id_type: IdType,
        name: &str,
    ) -> (IdNodeIndex, bool) {
        if let Some(index) = self.find_id_node(id) {
            return (index, false);
        }
        let index = IdNodeIndex::from_usize(self.id_nodes.len());
        self.id_nodes.push(IdNode::new(id, id_type, name.to_owned()));
        self.id_map.insert(id, index);
        self.id_type_exist |= 1 << id_type.index();
        (index, true)
    }

    pub(crate) fn add_component(
        &mut self,
        id_index: IdNodeIndex,
        node_type: NodeType,
        name: &str,
    ) -> ComponentIndex {
        let key = ComponentIdKey::new(node_type, name);
        if let Some(index) = self.id_nodes[id_index.index()].components.get(&key) {
            return *index;
        }
        let index = ComponentIndex::from_usize(self.components.len());
        self.components.push(ComponentNode::new(id_index, key.clone()));
        self.id_nodes[id_index.index()].components.insert(key, index);
        index
    }

    /// Add an operation to a component. Returns the existing operation and
    /// `false` when one with the same key is already registered.
    pub(crate) fn add_operation(
        &mut self,
        component: ComponentIndex,
        key: OperationIdKey,
        work: Option<OperationWork>,
        thread_safety: ThreadSafety,
    ) -> (OperationIndex, bool) {
        if let Some(index) = self.components[component.index()].find_operation(&key) {
            return (index, false);
        }
        let index = OperationIndex::from_usize(self.operations.len());
        self.operations
            .push(OperationNode::new(component, key.clone(), work, thread_safety));
        self.components[component.index()].operations.insert(key, index);
        (index, true)
    }

    pub fn find_relation(
        &self,
        from: NodeRef,
        to: OperationIndex,
        name: &str,
    ) -> Option<RelationIndex> {
        self.operation(to).inlinks.iter().copied().find(|index| {
            self.relation(*index)
                .is_some_and(|relation| relation.from == from && relation.name == name)
        })
    }

    /// Connect `from` to `to`.
    ///
    /// With `CHECK_BEFORE_ADD` an existing relation with the same endpoints
    /// and name absorbs the flags instead. Only the time source and
    /// operations may be relation sources.
    pub(crate) fn add_relation(
        &mut self,
        from: NodeRef,
        to: OperationIndex,
        name: &str,
        flags: RelationFlags,
    ) -> Option<RelationIndex> {
        let stored_flags = flags - RelationFlags::CHECK_BEFORE_ADD;
        if flags.contains(RelationFlags::CHECK_BEFORE_ADD) {
            if let Some(existing) = self.find_relation(from, to, name) {
                if let Some(relation) = self.relations[existing.index()].as_mut() {
                    relation.flags |= stored_flags;
                }
                return Some(existing);
            }
        }
        let index = RelationIndex::from_usize(self.relations.len());
        match from {
            NodeRef::TimeSource => self.time_source.outlinks.push(index),
            NodeRef::Operation(source) if source == to => {
                trace!(relation = name, "skipping self relation");
                return None;
            }
            NodeRef::Operation(source) => self.operations[source.index()].outlinks.push(index),
            NodeRef::Id(_) | NodeRef::Component(_) => {
                warn!(relation = name, "relation source must be an operation or the time source");
                return None;
            }
        }
        self.operations[to.index()].inlinks.push(index);
        self.relations.push(Some(Relation {
            from,
            to,
            name: name.to_owned(),
            flags: stored_flags,
        }));
        Some(index)
    }

    /// Detach a relation from both endpoints and drop it.
    pub(crate) fn unlink_relation(&mut self, index: RelationIndex) {
        let Some(relation) = self.relations.get_mut(index.index()).and_then(Option::take) else {
            return;
        };
        match relation.from {
            NodeRef::TimeSource => self.time_source.outlinks.retain(|link| *link != index),
            NodeRef::Operation(source) => self.operations[source.index()]
                .outlinks
                .retain(|link| *link != index),
            NodeRef::Id(_) | NodeRef::Component(_) => {}
        }
        self.operations[relation.to.index()]
            .inlinks
            .retain(|link| *link != index);
    }

    pub(crate) fn relation_flags_mut(&mut self, index: RelationIndex) -> Option<&mut RelationFlags> {
        self.relations
            .get_mut(index.index())
            .and_then(Option::as_mut)
            .map(|relation| &mut relation.flags)
    }

    /// Drop every node and relation. Graph-level state is kept.
    pub(crate) fn clear_all_nodes(&mut self) {
        self.id_nodes.clear();
        self.components.clear();
        self.operations.clear();
        self.relations.clear();
        self.time_source = TimeSourceNode::default();
        self.id_map.clear();
        self.entry_tags.clear();
        self.scene_cow = None;
        self.id_type_exist = 0;
    }

    /// `to` can be reached from `from` over non-cyclic relations.
    pub fn is_reachable(&self, from: OperationIndex, to: OperationIndex) -> bool {
        if from == to {
            return true;
        }
        let mut visited = vec![false; self.operations.len()];
        let mut stack = vec![from];
        visited[from.index()] = true;
        while let Some(current) = stack.pop() {
            for link in &self.operation(current).outlinks {
                let Some(relation) = self.relation(*link) else {
                    continue;
                };
                if relation.is_cyclic() {
                    continue;
                }
                if relation.to == to {
                    return true;
                }
                if !visited[relation.to.index()] {
                    visited[relation.to.index()] = true;
                    stack.push(relation.to);
                }
            }
        }
        false
    }

    /// Source operations of the non-cyclic inlinks of an operation.
    pub(crate) fn operation_parents(&self, index: OperationIndex) -> impl Iterator<Item = OperationIndex> + '_ {
        self.operation(index).inlinks.iter().filter_map(|link| {
            self.relation(*link)
                .filter(|relation| !relation.is_cyclic())
                .and_then(Relation::from_operation)
        })
    }

    pub(crate) fn add_entry_tag(&mut self, index: OperationIndex) {
        self.entry_tags.insert(index);
    }

    pub(crate) fn mark_id_type_updated(&mut self, id_type: IdType) {
        self.id_type_updated |= 1 << id_type.index();
    }

    /// Clear per-evaluation operation flags everywhere.
    pub(crate) fn clear_operation_tags(&self) {
        for op in &self.operations {
            op.clear_flags(OperationFlags::CLEAR_ON_EVAL);
        }
    }
}
