//! Read-only queries against a built graph.
//!
//! Dependency walks go over operations, not data-blocks: an id depends on
//! another one when any of its operations can be reached from the other's
//! operations.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use bitflags::bitflags;

use crate::eval::EvaluatedId;
use crate::graph::{
    ComponentIndex, CustomDataMask, Depsgraph, EvalFlags, IdNodeIndex, LinkedState, NodeRef,
    NodeType, OpCode, OperationIndex,
};
use crate::scene::{IdData, IdKey, IdType, Main, ObjectKind};

/// Aspect of an object as seen from outside the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectComponent {
    Any,
    Parameters,
    Animation,
    Transform,
    Geometry,
    EvalPose,
    Bone,
    Shading,
    Cache,
}

impl ObjectComponent {
    /// Components with no outside aspect map to `Any`, which only an `Any`
    /// filter selects.
    pub fn from_node_type(node_type: NodeType) -> Self {
        match node_type {
            NodeType::Parameters | NodeType::IdRef | NodeType::ParticleSettings => {
                ObjectComponent::Parameters
            }
            NodeType::Animation => ObjectComponent::Animation,
            NodeType::Transform => ObjectComponent::Transform,
            NodeType::Geometry | NodeType::ParticleSystem => ObjectComponent::Geometry,
            NodeType::EvalPose => ObjectComponent::EvalPose,
            NodeType::Bone => ObjectComponent::Bone,
            NodeType::Shading => ObjectComponent::Shading,
            NodeType::Cache | NodeType::PointCache => ObjectComponent::Cache,
            _ => ObjectComponent::Any,
        }
    }
}

bitflags! {
    /// Options of the dependency walks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ForeachFlags: u32 {
        /// Do not walk through rigid body simulation steps.
        const IGNORE_TRANSFORM_SOLVERS = 1 << 0;
    }
}

/// One object produced by [`Depsgraph::visible_objects`].
#[derive(Debug, Clone)]
pub struct VisibleObject {
    pub object: IdKey,
    /// Evaluated data, or the original when no shadow exists yet.
    pub data: Arc<IdData>,
    /// Object whose instance collection produced this one.
    pub instancer: Option<IdKey>,
}

fn needs_visit(graph: &Depsgraph, op: OperationIndex, flags: ForeachFlags) -> bool {
    !(flags.contains(ForeachFlags::IGNORE_TRANSFORM_SOLVERS)
        && graph.operation(op).opcode() == OpCode::RigidbodySim)
}

impl Depsgraph {
    /// The data-block an evaluated shadow was copied from.
    pub fn original_id(&self, evaluated: &EvaluatedId) -> IdKey {
        evaluated.orig
    }

    /// Shadow of the graph's scene. `None` until the scene was evaluated
    /// once.
    pub fn evaluated_scene(&self) -> Option<EvaluatedId> {
        self.scene_cow.and_then(|index| self.id_node(index).evaluated())
    }

    /// Every data-block in the graph, in build order.
    pub fn foreach_id(&self, mut f: impl FnMut(IdKey)) {
        for (_, node) in self.id_nodes() {
            f(node.id_orig);
        }
    }

    /// Objects to draw or render: visible on build, enabled on the last
    /// evaluation and not hidden in the graph's mode.
    ///
    /// With `expand_duplis`, objects of instance collections follow their
    /// instancer. Meta-balls are never expanded.
    pub fn visible_objects(&self, main: &Main, expand_duplis: bool) -> Vec<VisibleObject> {
        let mut result = Vec::new();
        for (_, node) in self.id_nodes() {
            if node.id_type != IdType::Object
                || !node.is_visible_on_build
                || node.linked_state == LinkedState::Indirectly
                || !node.is_enabled_on_eval()
            {
                continue;
            }
            let Some(data) = self.evaluated_data(main, node.id_orig) else {
                continue;
            };
            let Some(object) = data.as_object() else {
                continue;
            };
            let instance_collection = object.instance_collection;
            if !object.is_hidden(self.mode) {
                result.push(VisibleObject {
                    object: node.id_orig,
                    data: data.clone(),
                    instancer: None,
                });
            }
            if !expand_duplis {
                continue;
            }
            let Some(collection) = instance_collection else {
                continue;
            };
            for instanced in main.collection_objects_recursive(collection) {
                let Some(data) = self.evaluated_data(main, instanced) else {
                    continue;
                };
                let visible = data
                    .as_object()
                    .is_some_and(|o| o.kind != ObjectKind::MetaBall && !o.is_hidden(self.mode));
                if visible {
                    result.push(VisibleObject {
                        object: instanced,
                        data,
                        instancer: Some(node.id_orig),
                    });
                }
            }
        }
        result
    }

    /// Walk operations downstream of the operations of `start`. Each
    /// reached operation is passed to `visit` once.
    fn foreach_dependent_operation(
        &self,
        start: IdNodeIndex,
        component: ObjectComponent,
        flags: ForeachFlags,
        mut visit: impl FnMut(OperationIndex),
    ) {
        let mut queue = VecDeque::new();
        let mut scheduled = HashSet::new();
        for comp in self.id_node(start).components() {
            let node = self.component(comp);
            if node.node_type == NodeType::Visibility {
                continue;
            }
            if component != ObjectComponent::Any
                && ObjectComponent::from_node_type(node.node_type) != component
            {
                continue;
            }
            for op in node.operations() {
                if needs_visit(self, op, flags) && scheduled.insert(op) {
                    queue.push_back(op);
                }
            }
        }

        while let Some(op) = queue.pop_front() {
            visit(op);
            for link in self.operation(op).outlinks() {
                let Some(relation) = self.relation(*link) else {
                    continue;
                };
                let to = relation.to();
                if needs_visit(self, to, flags) && scheduled.insert(to) {
                    queue.push_front(to);
                }
            }
        }
    }

    /// Every other data-block depending on `id`, each reported once.
    pub fn foreach_dependent_id(&self, id: IdKey, mut f: impl FnMut(IdKey)) {
        let Some(start) = self.find_id_node(id) else {
            return;
        };
        let mut visited = HashSet::new();
        self.foreach_dependent_operation(start, ObjectComponent::Any, ForeachFlags::empty(), |op| {
            let owner = self.operation_id_node(op);
            if owner != start && visited.insert(owner) {
                f(self.id_node(owner).id_orig);
            }
        });
    }

    /// Every component of other data-blocks depending on the `component`
    /// aspect of `id`.
    pub fn foreach_dependent_id_component(
        &self,
        id: IdKey,
        component: ObjectComponent,
        flags: ForeachFlags,
        mut f: impl FnMut(IdKey, ObjectComponent),
    ) {
        let Some(start) = self.find_id_node(id) else {
            return;
        };
        let mut visited: HashSet<ComponentIndex> = HashSet::new();
        self.foreach_dependent_operation(start, component, flags, |op| {
            let (owner, comp) = self.operation_owner(op);
            if owner != start && visited.insert(comp) {
                f(
                    self.id_node(owner).id_orig,
                    ObjectComponent::from_node_type(self.component(comp).node_type),
                );
            }
        });
    }

    /// Every data-block `id` depends on, each reported once.
    pub fn foreach_ancestor_id(&self, id: IdKey, mut f: impl FnMut(IdKey)) {
        let Some(start) = self.find_id_node(id) else {
            return;
        };
        let mut queue: VecDeque<OperationIndex> = VecDeque::new();
        let mut scheduled = HashSet::new();
        for comp in self.id_node(start).components() {
            for op in self.component(comp).operations() {
                scheduled.insert(op);
                queue.push_back(op);
            }
        }
        let mut visited = HashSet::from([start]);
        while let Some(op) = queue.pop_front() {
            let owner = self.operation_id_node(op);
            if visited.insert(owner) {
                f(self.id_node(owner).id_orig);
            }
            for link in self.operation(op).inlinks() {
                let from = self.relation(*link).map(|relation| relation.from());
                if let Some(NodeRef::Operation(from)) = from {
                    if scheduled.insert(from) {
                        queue.push_front(from);
                    }
                }
            }
        }
    }

    /// A data-block of `id_type` was updated since the last
    /// [`ids_clear_recalc`](Self::ids_clear_recalc).
    pub fn id_type_updated(&self, id_type: IdType) -> bool {
        self.id_type_updated & (1 << id_type.index()) != 0
    }

    pub fn id_type_any_updated(&self) -> bool {
        self.id_type_updated != 0
    }

    /// The graph holds a data-block of `id_type`.
    pub fn id_type_exists(&self, id_type: IdType) -> bool {
        self.id_type_exist & (1 << id_type.index()) != 0
    }

    /// Forget which id types were updated. Call once editors have been
    /// notified.
    pub fn ids_clear_recalc(&mut self) {
        self.id_type_updated = 0;
    }

    /// Extra evaluation requests on `id`; empty for ids outside the graph.
    pub fn eval_flags_for_id(&self, id: IdKey) -> EvalFlags {
        self.find_id_node(id)
            .map(|index| self.id_node(index).eval_flags)
            .unwrap_or_default()
    }

    /// Custom data layers dependents need from the geometry of `object`.
    pub fn customdata_mask_for_object(&self, object: IdKey) -> CustomDataMask {
        self.find_id_node(object)
            .map(|index| self.id_node(index).customdata_masks)
            .unwrap_or_default()
    }

    /// Relations are current and no tag waits for evaluation.
    pub fn is_fully_evaluated(&self) -> bool {
        !self.need_update && self.entry_tags.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvaluationMode;
    use crate::scene::{
        Base, CollectionData, GeometryData, IdPayload, ObjectData, Parent,
        ParentKind, SceneData, ViewLayer,
    };

    struct Fixture {
        main: Main,
        graph: Depsgraph,
        parent: IdKey,
        child: IdKey,
        hidden: IdKey,
    }

    fn fixture() -> Fixture {
        let mut main = Main::new();
        let parent = main.add(IdData::new("OBParent", IdPayload::Object(ObjectData::default())));
        let mut child = ObjectData::default();
        child.parent = Some(Parent {
            object: parent,
            kind: ParentKind::Object,
        });
        let child = main.add(IdData::new("OBChild", IdPayload::Object(child)));
        let mut hidden = ObjectData::default();
        hidden.hide_viewport = true;
        let hidden = main.add(IdData::new("OBHidden", IdPayload::Object(hidden)));
        let mut layer = ViewLayer::new("ViewLayer");
        for object in [parent, child, hidden] {
            layer.bases.push(Base::new(object));
        }
        let scene = main.add(IdData::new(
            "SCScene",
            IdPayload::Scene(SceneData {
                view_layers: vec![layer],
                ..Default::default()
            }),
        ));
        let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
        graph.build_from_view_layer(&main).unwrap();
        Fixture {
            main,
            graph,
            parent,
            child,
            hidden,
        }
    }

    #[test]
    fn dependents_and_ancestors() {
        let f = fixture();
        let mut dependents = Vec::new();
        f.graph.foreach_dependent_id(f.parent, |id| dependents.push(id));
        assert!(dependents.contains(&f.child));
        assert!(!dependents.contains(&f.parent));

        let mut ancestors = Vec::new();
        f.graph.foreach_ancestor_id(f.child, |id| ancestors.push(id));
        assert!(ancestors.contains(&f.parent));
        assert!(!ancestors.contains(&f.child));

        let mut none = Vec::new();
        f.graph.foreach_dependent_id(IdKey(12345), |id| none.push(id));
        assert!(none.is_empty());
    }

    #[test]
    fn dependent_components_filtered() {
        let f = fixture();
        let mut found = Vec::new();
        f.graph.foreach_dependent_id_component(
            f.parent,
            ObjectComponent::Transform,
            ForeachFlags::empty(),
            |id, component| found.push((id, component)),
        );
        assert!(found.contains(&(f.child, ObjectComponent::Transform)));
        assert!(found.iter().all(|(id, _)| *id != f.parent));

        let mut from_shading = Vec::new();
        f.graph.foreach_dependent_id_component(
            f.parent,
            ObjectComponent::Shading,
            ForeachFlags::empty(),
            |id, component| from_shading.push((id, component)),
        );
        assert!(!from_shading.contains(&(f.child, ObjectComponent::Transform)));
    }

    #[test]
    fn visible_objects() {
        let mut f = fixture();
        f.graph.evaluate_on_refresh(&f.main);
        let visible: Vec<IdKey> = f
            .graph
            .visible_objects(&f.main, false)
            .into_iter()
            .map(|v| v.object)
            .collect();
        assert!(visible.contains(&f.parent));
        assert!(visible.contains(&f.child));
        assert!(!visible.contains(&f.hidden));
    }

    #[test]
    fn instances_expanded() {
        let mut main = Main::new();
        let mesh = main.add(IdData::new(
            "MEBall",
            IdPayload::Geometry(IdType::Mesh, GeometryData::default()),
        ));
        let member = main.add(IdData::new(
            "OBMember",
            IdPayload::Object(ObjectData::new(ObjectKind::Mesh, Some(mesh))),
        ));
        let collection = main.add(IdData::new(
            "GRInstanced",
            IdPayload::Collection(CollectionData {
                objects: vec![member],
                ..Default::default()
            }),
        ));
        let mut instancer = ObjectData::default();
        instancer.instance_collection = Some(collection);
        let instancer = main.add(IdData::new("OBInstancer", IdPayload::Object(instancer)));
        let mut layer = ViewLayer::new("ViewLayer");
        layer.bases.push(Base::new(instancer));
        let scene = main.add(IdData::new(
            "SCScene",
            IdPayload::Scene(SceneData {
                view_layers: vec![layer],
                ..Default::default()
            }),
        ));
        let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
        graph.build_from_view_layer(&main).unwrap();
        graph.evaluate_on_refresh(&main);

        let flat = graph.visible_objects(&main, false);
        assert!(flat.iter().all(|v| v.object != member));
        let expanded = graph.visible_objects(&main, true);
        let dupli = expanded.iter().find(|v| v.object == member).unwrap();
        assert_eq!(dupli.instancer, Some(instancer));
    }

    #[test]
    fn type_and_state_queries() {
        let mut f = fixture();
        assert!(f.graph.id_type_exists(IdType::Object));
        assert!(f.graph.id_type_exists(IdType::Scene));
        assert!(!f.graph.id_type_exists(IdType::Camera));
        assert!(!f.graph.is_fully_evaluated());

        f.graph.evaluate_on_refresh(&f.main);
        assert!(f.graph.is_fully_evaluated());
        assert!(f.graph.id_type_updated(IdType::Object));
        f.graph.ids_clear_recalc();
        assert!(!f.graph.id_type_any_updated());

        assert_eq!(f.graph.eval_flags_for_id(IdKey(12345)), EvalFlags::empty());
        assert_eq!(f.graph.customdata_mask_for_object(f.child), CustomDataMask::empty());
        let scene = f.graph.evaluated_scene().unwrap();
        assert_eq!(f.graph.original_id(&scene), f.graph.scene());
    }
}
