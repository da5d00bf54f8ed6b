//! Tagging
//!
//! Translates "this data-block changed in these ways" into operations
//! tagged for update. Tagged operations become the entry points of the next
//! flush.
//!
//! # Overview
//!
//! Every [`RecalcFlags`] bit maps to a component, optionally narrowed to one
//! operation (see [`recalc_flag_target`]). Tagging a whole component tags
//! all its operations; components whose registry entry asks for it also
//! tag the id's COPY_ON_WRITE component so the shadow is refreshed first.
//!
//! An empty flag set is shorthand for [`RecalcFlags::legacy_zero`].

use tracing::{debug, trace, warn};

use crate::error::{DgraphError, Result};
use crate::graph::registry;
use crate::graph::{
    ComponentIndex, Depsgraph, IdNodeIndex, NodeType, OpCode, OperationFlags, OperationIndex,
    RecalcFlags, UpdateSource,
};
use crate::scene::{IdKey, IdPayload, IdType, Main};

/// Component (and operation, `OpCode::Operation` for the whole component)
/// a single recalc flag tags on an id of the given type.
///
/// Returns `None` for flags that have no node: `EDITORS` only notifies
/// editors and `TAG_FOR_UNDO` is ignored.
pub fn recalc_flag_target(id_type: IdType, flag: RecalcFlags) -> Option<(NodeType, OpCode)> {
    let target = match flag {
        RecalcFlags::TRANSFORM => (NodeType::Transform, OpCode::Operation),
        RecalcFlags::GEOMETRY => {
            if id_type == IdType::ParticleSettings {
                (NodeType::ParticleSettings, OpCode::ParticleSettingsReset)
            } else {
                (NodeType::Geometry, OpCode::Operation)
            }
        }
        RecalcFlags::ANIMATION => (NodeType::Animation, OpCode::Operation),
        RecalcFlags::PSYS_REDO
        | RecalcFlags::PSYS_RESET
        | RecalcFlags::PSYS_CHILD
        | RecalcFlags::PSYS_PHYS => {
            if id_type == IdType::ParticleSettings {
                if flag == RecalcFlags::PSYS_RESET {
                    (NodeType::ParticleSettings, OpCode::ParticleSettingsReset)
                } else {
                    (NodeType::ParticleSettings, OpCode::Operation)
                }
            } else {
                (NodeType::ParticleSystem, OpCode::Operation)
            }
        }
        RecalcFlags::COPY_ON_WRITE => (NodeType::CopyOnWrite, OpCode::Operation),
        RecalcFlags::SHADING => {
            if id_type == IdType::NodeTree {
                (NodeType::NtreeOutput, OpCode::Operation)
            } else {
                (NodeType::Shading, OpCode::Operation)
            }
        }
        RecalcFlags::SELECT | RecalcFlags::BASE_FLAGS => match id_type {
            IdType::Scene => (NodeType::LayerCollections, OpCode::ViewLayerEval),
            IdType::Object => (NodeType::ObjectFromLayer, OpCode::ObjectBaseFlags),
            _ => return None,
        },
        RecalcFlags::POINT_CACHE => (NodeType::PointCache, OpCode::Operation),
        RecalcFlags::SEQUENCER_STRIPS => (NodeType::Sequencer, OpCode::Operation),
        RecalcFlags::FRAME_CHANGE
        | RecalcFlags::AUDIO_FPS
        | RecalcFlags::AUDIO_VOLUME
        | RecalcFlags::AUDIO_MUTE
        | RecalcFlags::AUDIO_LISTENER
        | RecalcFlags::AUDIO => (NodeType::Audio, OpCode::Operation),
        RecalcFlags::PARAMETERS | RecalcFlags::SOURCE => (NodeType::Parameters, OpCode::Operation),
        RecalcFlags::NTREE_OUTPUT => (NodeType::NtreeOutput, OpCode::Operation),
        _ => return None,
    };
    Some(target)
}

impl Depsgraph {
    /// Tag a data-block for update.
    ///
    /// User edits on an active graph are also recorded in the original's
    /// recalc flags. Ids that are not part of the graph are ignored.
    pub fn tag_update(
        &mut self,
        main: &mut Main,
        id: IdKey,
        flags: RecalcFlags,
        source: UpdateSource,
    ) -> Result<()> {
        if self.is_evaluating {
            warn!(%id, "tag during evaluation rejected");
            return Err(DgraphError::TaggedDuringEvaluation(id));
        }
        if self.is_active && source == UpdateSource::UserEdit {
            let effective = if flags.is_empty() {
                RecalcFlags::legacy_zero()
            } else {
                flags
            };
            main.add_recalc(id, effective);
        }
        self.id_tag_update(main, id, flags, source)
    }

    /// Tag without touching the originals.
    pub(crate) fn id_tag_update(
        &mut self,
        main: &Main,
        id: IdKey,
        flags: RecalcFlags,
        source: UpdateSource,
    ) -> Result<()> {
        if self.is_evaluating {
            warn!(%id, "tag during evaluation rejected");
            return Err(DgraphError::TaggedDuringEvaluation(id));
        }
        let flags = if flags.is_empty() {
            RecalcFlags::legacy_zero()
        } else {
            flags
        };
        if self.config.debug.tag {
            debug!(%id, ?flags, ?source, "tag update");
        }
        let id_index = self.find_id_node(id);
        for flag in flags.iter() {
            self.tag_single_flag(main, id, id_index, flag, source)?;
        }
        self.tag_embedded_node_tree(main, id, flags, source)?;
        if source == UpdateSource::UserEdit && flags != RecalcFlags::SHADING {
            self.tag_single_flag(main, id, id_index, RecalcFlags::POINT_CACHE, source)?;
        }
        Ok(())
    }

    fn tag_single_flag(
        &mut self,
        main: &Main,
        id: IdKey,
        id_index: Option<IdNodeIndex>,
        flag: RecalcFlags,
        source: UpdateSource,
    ) -> Result<()> {
        if flag == RecalcFlags::EDITORS {
            if self.is_active {
                self.editor_updates.insert(id);
            }
            return Ok(());
        }
        let Some(id_index) = id_index else {
            trace!(%id, "not in graph, ignoring tag");
            return Ok(());
        };
        let id_type = self.id_node(id_index).id_type;
        let Some((component_type, opcode)) = recalc_flag_target(id_type, flag) else {
            return Ok(());
        };
        self.tag_component(id_index, component_type, opcode, source);
        self.tag_geometry_dependencies(main, id, flag, source)
    }

    /// A geometry tag on an object or on mesh-like data also invalidates the
    /// data (respectively the shape key) it is evaluated from.
    fn tag_geometry_dependencies(
        &mut self,
        main: &Main,
        id: IdKey,
        flag: RecalcFlags,
        source: UpdateSource,
    ) -> Result<()> {
        if flag != RecalcFlags::GEOMETRY {
            return Ok(());
        }
        let Some(data) = main.get(id) else {
            return Ok(());
        };
        let dependency = match &data.payload {
            IdPayload::Object(object) => object.data,
            IdPayload::Geometry(_, geometry) => geometry.shape_key,
            _ => None,
        };
        match dependency {
            Some(dependency) => self.id_tag_update(main, dependency, RecalcFlags::empty(), source),
            None => Ok(()),
        }
    }

    /// Node trees owned by a data-block are tagged along with it.
    fn tag_embedded_node_tree(
        &mut self,
        main: &Main,
        id: IdKey,
        flags: RecalcFlags,
        source: UpdateSource,
    ) -> Result<()> {
        let Some(tree) = main.get(id).and_then(|data| data.payload.node_tree()) else {
            return Ok(());
        };
        if tree == id {
            return Ok(());
        }
        self.id_tag_update(main, tree, flags, source)
    }

    fn tag_component(
        &mut self,
        id_index: IdNodeIndex,
        component_type: NodeType,
        opcode: OpCode,
        source: UpdateSource,
    ) {
        let Some(component) = self.id_node(id_index).find_component(component_type, "") else {
            if component_type == NodeType::Animation {
                self.id_node_mut(id_index).is_cow_explicitly_tagged = true;
                self.tag_copy_on_write(id_index, source);
            }
            return;
        };
        if opcode == OpCode::Operation {
            self.tag_component_node(component, source);
        } else if let Some(op) = self.component(component).find_operation_by_code(opcode) {
            self.tag_operation(op, source);
        }
        if registry::info(component_type).tags_copy_on_write {
            self.tag_copy_on_write(id_index, source);
        }
    }

    fn tag_copy_on_write(&mut self, id_index: IdNodeIndex, source: UpdateSource) {
        if let Some(component) = self.id_node(id_index).find_component(NodeType::CopyOnWrite, "") {
            self.tag_component_node(component, source);
        }
    }

    /// Tag one operation. The first tag since the last flush makes it an
    /// entry point.
    pub(crate) fn tag_operation(&mut self, op: OperationIndex, source: UpdateSource) {
        let mut flags = OperationFlags::NEEDS_UPDATE | OperationFlags::DIRECTLY_MODIFIED;
        if source == UpdateSource::UserEdit {
            flags |= OperationFlags::USER_MODIFIED;
        }
        let previous = self.operation(op).set_flags(flags);
        if !previous.contains(OperationFlags::NEEDS_UPDATE) {
            self.add_entry_tag(op);
        }
    }

    /// Tag every operation of a component, unless its entry is already
    /// tagged.
    pub(crate) fn tag_component_node(&mut self, component: ComponentIndex, source: UpdateSource) {
        let node = self.component(component);
        if node
            .entry_operation()
            .is_some_and(|entry| self.operation(entry).needs_update())
        {
            return;
        }
        let operations: Vec<_> = node.operations().collect();
        for op in operations {
            self.tag_operation(op, source);
        }
    }

    /// Tag every component of an id. Relation updates leave animation
    /// alone so unkeyed changes survive.
    pub(crate) fn tag_id_node(&mut self, id_index: IdNodeIndex, source: UpdateSource) {
        let components: Vec<_> = self.id_node(id_index).components().collect();
        for component in components {
            if source == UpdateSource::Relations
                && self.component(component).node_type == NodeType::Animation
            {
                continue;
            }
            self.tag_component_node(component, source);
        }
    }

    /// Request re-evaluation of everything depending on time.
    pub fn tag_time_source(&mut self) {
        self.time_source.tagged_for_update = true;
    }

    /// The set of visible data-blocks may have changed.
    ///
    /// The actual re-tagging happens before the next flush.
    pub fn on_visible_update(&mut self, do_time: bool) {
        self.need_visibility_update = true;
        self.need_visibility_time_update |= do_time;
    }

    /// Re-tag ids that became visible or were never evaluated.
    pub(crate) fn tag_ids_for_visible_update(&mut self, main: &Main) {
        if !self.need_visibility_update {
            return;
        }
        let do_time = self.need_visibility_time_update;
        let id_indices: Vec<_> = self.id_map.values().copied().collect();
        for id_index in id_indices {
            let node = self.id_node(id_index);
            if node.visible_components_mask == 0 {
                continue;
            }
            let id = node.id_orig;
            let id_type = node.id_type;
            let mut flags = RecalcFlags::empty();
            if !node.is_expanded() {
                flags |= RecalcFlags::COPY_ON_WRITE;
                if do_time && main.get(id).is_some_and(|data| data.anim.is_some()) {
                    flags |= RecalcFlags::ANIMATION;
                }
            } else if node.visible_components_mask == node.previously_visible_components_mask {
                continue;
            }
            if id_type == IdType::Object {
                flags |= RecalcFlags::TRANSFORM | RecalcFlags::GEOMETRY;
            }
            if let Err(err) = self.id_tag_update(main, id, flags, UpdateSource::Visibility) {
                warn!(%id, %err, "visibility tag failed");
            }
            if id_type == IdType::Scene {
                self.tag_id_node(id_index, UpdateSource::Visibility);
            }
            let node = self.id_node_mut(id_index);
            node.previously_visible_components_mask = node.visible_components_mask;
            node.previous_eval_flags = node.eval_flags;
            node.previous_customdata_masks = node.customdata_masks;
        }
        self.need_visibility_update = false;
        self.need_visibility_time_update = false;
    }

    /// Relations must be rebuilt before the next evaluation.
    pub fn tag_relations_update(&mut self, main: &Main) -> Result<()> {
        self.need_update = true;
        let scene = self.scene;
        self.id_tag_update(main, scene, RecalcFlags::BASE_FLAGS, UpdateSource::Relations)
    }
}

/// The graphs a tag is broadcast to.
///
/// Every graph built from the same database that should hear about an edit
/// is registered here; tagging through the context tags each of them.
#[derive(Default)]
pub struct TagContext<'g> {
    graphs: Vec<&'g mut Depsgraph>,
}

impl<'g> TagContext<'g> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_graph(mut self, graph: &'g mut Depsgraph) -> Self {
        self.graphs.push(graph);
        self
    }

    pub fn add_graph(&mut self, graph: &'g mut Depsgraph) {
        self.graphs.push(graph);
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    /// Tag `id` in every graph. All graphs are tagged even if one fails;
    /// the first error is returned.
    pub fn tag_update(
        &mut self,
        main: &mut Main,
        id: IdKey,
        flags: RecalcFlags,
        source: UpdateSource,
    ) -> Result<()> {
        let mut result = Ok(());
        for graph in self.graphs.iter_mut() {
            if let Err(err) = graph.tag_update(main, id, flags, source) {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }

    pub fn tag_time_source(&mut self) {
        for graph in self.graphs.iter_mut() {
            graph.tag_time_source();
        }
    }

    pub fn on_visible_update(&mut self, do_time: bool) {
        for graph in self.graphs.iter_mut() {
            graph.on_visible_update(do_time);
        }
    }

    pub fn tag_relations_update(&mut self, main: &Main) -> Result<()> {
        let mut result = Ok(());
        for graph in self.graphs.iter_mut() {
            if let Err(err) = graph.tag_relations_update(main) {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }
}

impl std::fmt::Debug for TagContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagContext")
            .field("graphs", &self.graphs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvaluationMode;
    use crate::graph::{OperationIdKey, OperationWork, ThreadSafety};
    use crate::scene::{IdData, ObjectData, ObjectKind, SceneData};

    struct Fixture {
        main: Main,
        graph: Depsgraph,
        object: IdKey,
        transform: OperationIndex,
        cow: OperationIndex,
    }

    fn fixture() -> Fixture {
        let mut main = Main::new();
        let scene = main.add(IdData::new("SCScene", IdPayload::Scene(SceneData::default())));
        let object = main.add(IdData::new(
            "OBEmpty",
            IdPayload::Object(ObjectData::new(ObjectKind::Empty, None)),
        ));
        let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
        let (id_index, _) = graph.add_id_node(object, IdType::Object, "OBEmpty");
        let cow_comp = graph.add_component(id_index, NodeType::CopyOnWrite, "");
        let (cow, _) = graph.add_operation(
            cow_comp,
            OperationIdKey::new(OpCode::CopyOnWrite, "", -1),
            Some(OperationWork::CopyOnWrite),
            ThreadSafety::ParallelSafe,
        );
        let transform_comp = graph.add_component(id_index, NodeType::Transform, "");
        let (transform, _) = graph.add_operation(
            transform_comp,
            OperationIdKey::new(OpCode::TransformLocal, "", -1),
            Some(OperationWork::Kernel),
            ThreadSafety::ParallelSafe,
        );
        Fixture {
            main,
            graph,
            object,
            transform,
            cow,
        }
    }

    #[test]
    fn flag_table() {
        assert_eq!(
            recalc_flag_target(IdType::Object, RecalcFlags::TRANSFORM),
            Some((NodeType::Transform, OpCode::Operation))
        );
        assert_eq!(
            recalc_flag_target(IdType::ParticleSettings, RecalcFlags::PSYS_RESET),
            Some((NodeType::ParticleSettings, OpCode::ParticleSettingsReset))
        );
        assert_eq!(
            recalc_flag_target(IdType::Object, RecalcFlags::PSYS_CHILD),
            Some((NodeType::ParticleSystem, OpCode::Operation))
        );
        assert_eq!(
            recalc_flag_target(IdType::NodeTree, RecalcFlags::SHADING),
            Some((NodeType::NtreeOutput, OpCode::Operation))
        );
        assert_eq!(
            recalc_flag_target(IdType::Scene, RecalcFlags::SELECT),
            Some((NodeType::LayerCollections, OpCode::ViewLayerEval))
        );
        assert_eq!(
            recalc_flag_target(IdType::Object, RecalcFlags::AUDIO_MUTE),
            Some((NodeType::Audio, OpCode::Operation))
        );
        assert_eq!(recalc_flag_target(IdType::Object, RecalcFlags::EDITORS), None);
        assert_eq!(recalc_flag_target(IdType::Object, RecalcFlags::TAG_FOR_UNDO), None);
    }

    #[test]
    fn transform_tag_also_tags_copy_on_write() {
        let mut f = fixture();
        f.graph
            .tag_update(&mut f.main, f.object, RecalcFlags::TRANSFORM, UpdateSource::Time)
            .unwrap();
        assert!(f.graph.operation(f.transform).needs_update());
        assert!(f.graph.operation(f.cow).needs_update());
        assert!(f
            .graph
            .operation(f.transform)
            .has_flags(OperationFlags::DIRECTLY_MODIFIED));
        assert!(!f
            .graph
            .operation(f.transform)
            .has_flags(OperationFlags::USER_MODIFIED));
        let entry: Vec<_> = f.graph.entry_tags().collect();
        assert_eq!(entry, vec![f.transform, f.cow]);
    }

    #[test]
    fn user_edit_records_recalc_on_active_graph() {
        let mut f = fixture();
        f.graph
            .tag_update(&mut f.main, f.object, RecalcFlags::TRANSFORM, UpdateSource::UserEdit)
            .unwrap();
        assert!(f.main.recalc(f.object).is_empty());
        assert!(f
            .graph
            .operation(f.transform)
            .has_flags(OperationFlags::USER_MODIFIED));

        f.graph.make_active();
        f.graph
            .tag_update(&mut f.main, f.object, RecalcFlags::TRANSFORM, UpdateSource::UserEdit)
            .unwrap();
        assert_eq!(f.main.recalc(f.object), RecalcFlags::TRANSFORM);
    }

    #[test]
    fn missing_animation_tags_copy_on_write() {
        let mut f = fixture();
        f.graph
            .tag_update(&mut f.main, f.object, RecalcFlags::ANIMATION, UpdateSource::Time)
            .unwrap();
        let id_index = f.graph.find_id_node(f.object).unwrap();
        assert!(f.graph.id_node(id_index).is_cow_explicitly_tagged);
        assert!(f.graph.operation(f.cow).needs_update());
        assert!(!f.graph.operation(f.transform).needs_update());
    }

    #[test]
    fn tag_during_evaluation_rejected() {
        let mut f = fixture();
        f.graph.is_evaluating = true;
        let err = f
            .graph
            .tag_update(&mut f.main, f.object, RecalcFlags::TRANSFORM, UpdateSource::UserEdit)
            .unwrap_err();
        assert!(matches!(err, DgraphError::TaggedDuringEvaluation(id) if id == f.object));
        assert!(!f.graph.operation(f.transform).needs_update());
    }

    #[test]
    fn zero_flags_match_legacy_combination() {
        let mut zero = fixture();
        zero.graph
            .tag_update(&mut zero.main, zero.object, RecalcFlags::empty(), UpdateSource::Time)
            .unwrap();
        let mut legacy = fixture();
        legacy
            .graph
            .tag_update(
                &mut legacy.main,
                legacy.object,
                RecalcFlags::legacy_zero(),
                UpdateSource::Time,
            )
            .unwrap();
        let tagged = |graph: &Depsgraph| -> Vec<_> {
            graph
                .operations()
                .map(|(_, op)| op.flags())
                .collect()
        };
        assert_eq!(tagged(&zero.graph), tagged(&legacy.graph));
        assert_eq!(
            zero.graph.entry_tags().collect::<Vec<_>>(),
            legacy.graph.entry_tags().collect::<Vec<_>>()
        );
    }

    #[test]
    fn tag_context_broadcasts() {
        let mut a = fixture();
        let mut b = fixture();
        let object = a.object;
        {
            let mut ctx = TagContext::new().with_graph(&mut a.graph).with_graph(&mut b.graph);
            assert_eq!(ctx.len(), 2);
            ctx.tag_update(&mut a.main, object, RecalcFlags::TRANSFORM, UpdateSource::UserEdit)
                .unwrap();
            ctx.tag_time_source();
        }
        assert!(a.graph.operation(a.transform).needs_update());
        assert!(b.graph.operation(b.transform).needs_update());
        assert!(b.graph.time_source().is_tagged());
    }

    #[test]
    fn relations_update_sets_need_update() {
        let mut f = fixture();
        f.graph.need_update = false;
        f.graph.tag_relations_update(&f.main).unwrap();
        assert!(f.graph.need_update());
    }
}
