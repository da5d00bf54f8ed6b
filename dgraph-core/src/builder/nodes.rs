//! Node Builder
//!
//! Creates the id, component and operation nodes for every data-block
//! reachable from the build scope. No relations are added here; the
//! relation builder walks the same data-blocks afterwards and connects the
//! operations created by this pass.
//!
//! # Overview
//!
//! ```text
//! begin_build ──> build_view_layer / build_scene_render / build_id ... ──> end_build
//!     │                                                                      │
//!     └── remembers shadows, masks and entry tags      re-tags saved entries ┘
//! ```
//!
//! Every `build_*` function is memoized per data-block through
//! [`BuiltMap`], so shared data (a material used by many objects, a parent
//! reached from several children) is built once.

use std::collections::HashMap;

use tracing::warn;

use super::key::OperationKey;
use super::path::{PathSide, PropertyPathQuery};
use super::{BaseFilter, BuildTag, BuilderCache, BuiltMap, NodeKey};
use crate::error::{DgraphError, Result};
use crate::eval::EvaluatedId;
use crate::graph::{
    CustomDataMask, Depsgraph, EvalFlags, IdNodeIndex, LinkedState, NodeType, OpCode,
    OperationFlags, OperationIdKey, OperationIndex, OperationWork, ThreadSafety, UpdateSource,
};
use crate::scene::{
    Driver, DriverTarget, IdData, IdKey, IdPayload, IdProperty, IdType, Main, ObjectData,
    ObjectKind, RigidBodyKind,
};

/// State of an id node carried over a rebuild.
#[derive(Debug)]
struct SavedIdState {
    cow: Option<EvaluatedId>,
    previously_visible_components_mask: u64,
    previous_eval_flags: EvalFlags,
    previous_customdata_masks: CustomDataMask,
    is_cow_explicitly_tagged: bool,
}

/// First pass of a build: creates every node of the graph.
pub(crate) struct NodeBuilder<'a> {
    pub(super) main: &'a Main,
    pub(super) graph: &'a mut Depsgraph,
    pub(super) cache: &'a BuilderCache,
    pub(super) built: BuiltMap,
    filter: BaseFilter,
    scene_camera: Option<IdKey>,
    saved: HashMap<IdKey, SavedIdState>,
    saved_entry_tags: Vec<OperationKey>,
    is_parent_collection_visible: bool,
}

impl<'a> NodeBuilder<'a> {
    pub(crate) fn new(
        main: &'a Main,
        graph: &'a mut Depsgraph,
        cache: &'a BuilderCache,
        filter: BaseFilter,
    ) -> Self {
        let scene_camera = main.scene(graph.scene()).and_then(|scene| scene.camera);
        Self {
            main,
            graph,
            cache,
            built: BuiltMap::default(),
            filter,
            scene_camera,
            saved: HashMap::new(),
            saved_entry_tags: Vec::new(),
            is_parent_collection_visible: true,
        }
    }

    /// Remember what must survive the rebuild, then clear the graph.
    pub(crate) fn begin_build(&mut self) {
        let graph: &Depsgraph = self.graph;
        self.saved_entry_tags = graph
            .entry_tags()
            .map(|op| OperationKey::of(graph, op))
            .collect();
        for node in &mut self.graph.id_nodes {
            let cow = if node.id_type.needs_copy_on_write() {
                node.cow.get_mut().take()
            } else {
                None
            };
            self.saved.insert(
                node.id_orig,
                SavedIdState {
                    cow,
                    previously_visible_components_mask: node.visible_components_mask,
                    previous_eval_flags: node.eval_flags,
                    previous_customdata_masks: node.customdata_masks,
                    is_cow_explicitly_tagged: node.is_cow_explicitly_tagged,
                },
            );
        }
        self.graph.clear_all_nodes();
    }

    /// Close every component and restore the entry tags of the previous
    /// graph.
    pub(crate) fn end_build(&mut self) {
        for component in &mut self.graph.components {
            component.finalized = true;
        }
        let saved = std::mem::take(&mut self.saved_entry_tags);
        for key in saved {
            if let Some(op) = key.find(self.graph) {
                self.graph.tag_operation(op, UpdateSource::UserEdit);
            }
        }
    }

    // Nodes

    /// Find or create the id node of a data-block.
    ///
    /// New nodes get their COPY_ON_WRITE and VISIBILITY components. Returns
    /// `None` for data-blocks missing from the database.
    pub(crate) fn add_id_node(&mut self, id: IdKey) -> Option<IdNodeIndex> {
        let Some(data) = self.main.get(id) else {
            warn!(%id, "data-block missing from database, skipping");
            return None;
        };
        let id_type = data.id_type();
        let (index, created) = self.graph.add_id_node(id, id_type, &data.name);
        if !created {
            return Some(index);
        }
        if let Some(saved) = self.saved.remove(&id) {
            let node = self.graph.id_node_mut(index);
            *node.cow.get_mut() = saved.cow;
            node.previously_visible_components_mask = saved.previously_visible_components_mask;
            node.previous_eval_flags = saved.previous_eval_flags;
            node.previous_customdata_masks = saved.previous_customdata_masks;
            node.is_cow_explicitly_tagged = saved.is_cow_explicitly_tagged;
        }
        if id_type.needs_copy_on_write() {
            let component = self.graph.add_component(index, NodeType::CopyOnWrite, "");
            let (op, _) = self.graph.add_operation(
                component,
                OperationIdKey::new(OpCode::CopyOnWrite, "", -1),
                Some(OperationWork::CopyOnWrite),
                ThreadSafety::ParallelSafe,
            );
            let comp = self.graph.component_mut(component);
            comp.entry = Some(op);
            comp.exit = Some(op);
        }
        let visibility = self.graph.add_component(index, NodeType::Visibility, "");
        let (op, _) = self.graph.add_operation(
            visibility,
            OperationIdKey::new(OpCode::Operation, "", -1),
            None,
            ThreadSafety::ParallelSafe,
        );
        self.graph.operation(op).set_flags(OperationFlags::PINNED);
        self.graph.component_mut(visibility).entry = Some(op);
        Some(index)
    }

    /// Register a new operation. A duplicate key is reported and the
    /// existing operation returned.
    pub(crate) fn add_operation(
        &mut self,
        key: &OperationKey,
        work: Option<OperationWork>,
        thread_safety: ThreadSafety,
    ) -> Result<OperationIndex> {
        let id_index = self
            .add_id_node(key.id)
            .ok_or(DgraphError::UnknownId(key.id))?;
        let component = self
            .graph
            .add_component(id_index, key.component, &key.component_name);
        if self.graph.component(component).finalized {
            return Err(DgraphError::ComponentClosed {
                id: key.id,
                component: key.component,
            });
        }
        let (op, created) = self.graph.add_operation(
            component,
            OperationIdKey::new(key.opcode, key.name.clone(), key.name_tag),
            work,
            thread_safety,
        );
        if !created {
            warn!(operation = %key, "operation is already in the graph");
        }
        Ok(op)
    }

    /// Find an operation, adding it when missing.
    pub(crate) fn ensure_operation(
        &mut self,
        key: &OperationKey,
        work: Option<OperationWork>,
    ) -> Result<OperationIndex> {
        match key.find(self.graph) {
            Some(op) => Ok(op),
            None => self.add_operation(key, work, ThreadSafety::ParallelSafe),
        }
    }

    pub(crate) fn has_operation(&self, key: &OperationKey) -> bool {
        key.find(self.graph).is_some()
    }

    pub(crate) fn add_kernel(&mut self, key: OperationKey) -> Result<OperationIndex> {
        self.add_operation(&key, Some(OperationWork::Kernel), ThreadSafety::ParallelSafe)
    }

    pub(crate) fn add_noop(&mut self, key: OperationKey) -> Result<OperationIndex> {
        self.add_operation(&key, None, ThreadSafety::ParallelSafe)
    }

    pub(crate) fn set_entry(&mut self, op: OperationIndex) {
        let component = self.graph.operation(op).owner;
        self.graph.component_mut(component).entry = Some(op);
    }

    pub(crate) fn set_exit(&mut self, op: OperationIndex) {
        let component = self.graph.operation(op).owner;
        self.graph.component_mut(component).exit = Some(op);
    }

    fn mode(&self) -> crate::config::EvaluationMode {
        self.graph.mode()
    }

    // Generic data-blocks

    /// Build any data-block, dispatching on its type.
    pub(crate) fn build_id(&mut self, id: IdKey) -> Result<()> {
        self.build_id_with_visibility(id, false)
    }

    /// Like [`Self::build_id`], handing `is_visible` to objects.
    pub(crate) fn build_id_with_visibility(&mut self, id: IdKey, is_visible: bool) -> Result<()> {
        let main = self.main;
        let Some(data) = main.get(id) else {
            warn!(%id, "referenced data-block missing, skipping");
            return Ok(());
        };
        match &data.payload {
            IdPayload::Scene(_) => self.build_scene_parameters(id),
            IdPayload::Object(_) => {
                self.build_object(None, id, LinkedState::Indirectly, is_visible)
            }
            IdPayload::Geometry(..) => self.build_object_data_geometry_datablock(id, is_visible),
            IdPayload::Armature => self.build_armature(id),
            IdPayload::Camera(_) => self.build_camera(id),
            IdPayload::Light(_) => self.build_light(id),
            IdPayload::Material(_) => self.build_material(id),
            IdPayload::World(_) => self.build_world(id),
            IdPayload::Texture(_) => self.build_texture(id),
            IdPayload::Image => self.build_image(id),
            IdPayload::NodeTree(_) => self.build_nodetree(id),
            IdPayload::Collection(_) => self.build_collection(id, false),
            IdPayload::ParticleSettings(_) => self.build_particle_settings(id),
            IdPayload::Action(_) => self.build_action(id),
            IdPayload::ShapeKey(_) => self.build_shapekeys(id),
            IdPayload::CacheFile => self.build_cachefile(id),
            IdPayload::Sound => self.build_sound(id),
            IdPayload::Speaker(_) => self.build_speaker(id),
            IdPayload::Text => self.build_generic_id(id),
        }
    }

    pub(crate) fn build_generic_id(&mut self, id: IdKey) -> Result<()> {
        if self.built.check_is_built_and_tag(id, BuildTag::Complete) {
            return Ok(());
        }
        if self.add_id_node(id).is_none() {
            return Ok(());
        }
        self.build_common(id)
    }

    /// Custom properties, animation and parameters: what every data-block
    /// carries.
    fn build_common(&mut self, id: IdKey) -> Result<()> {
        if let Some(data) = self.main.get(id) {
            self.build_idproperties(&data.properties)?;
        }
        self.build_animdata(id)?;
        self.build_parameters(id)
    }

    /// Build every data-block referenced from custom properties.
    pub(crate) fn build_idproperties(&mut self, properties: &[IdProperty]) -> Result<()> {
        let mut ids = Vec::new();
        for property in properties {
            property.foreach_id(&mut |id| ids.push(id));
        }
        for id in ids {
            self.build_id(id)?;
        }
        Ok(())
    }

    pub(crate) fn build_parameters(&mut self, id: IdKey) -> Result<()> {
        if self.built.check_is_built_and_tag(id, BuildTag::Parameters) {
            return Ok(());
        }
        let entry = self.ensure_operation(
            &OperationKey::new(id, NodeType::Parameters, OpCode::ParametersEntry),
            None,
        )?;
        self.set_entry(entry);
        self.ensure_operation(
            &OperationKey::new(id, NodeType::Parameters, OpCode::ParametersEval),
            Some(OperationWork::Kernel),
        )?;
        let exit = self.ensure_operation(
            &OperationKey::new(id, NodeType::Parameters, OpCode::ParametersExit),
            None,
        )?;
        self.set_exit(exit);
        Ok(())
    }

    // Animation

    pub(crate) fn build_animdata(&mut self, id: IdKey) -> Result<()> {
        let main = self.main;
        let Some(anim) = main.get(id).and_then(|data| data.anim.as_ref()) else {
            return Ok(());
        };
        if self.built.check_is_built_and_tag(id, BuildTag::Animation) {
            return Ok(());
        }
        if let Some(action) = anim.action {
            self.build_action(action)?;
            let entry =
                self.add_noop(OperationKey::new(id, NodeType::Animation, OpCode::AnimationEntry))?;
            self.set_entry(entry);
            self.add_kernel(OperationKey::new(id, NodeType::Animation, OpCode::AnimationEval))?;
            let exit =
                self.add_noop(OperationKey::new(id, NodeType::Animation, OpCode::AnimationExit))?;
            self.set_exit(exit);
        }
        for driver in &anim.drivers {
            self.build_driver(id, driver)?;
        }
        Ok(())
    }

    pub(crate) fn build_action(&mut self, action: IdKey) -> Result<()> {
        if self.built.check_is_built_and_tag(action, BuildTag::Complete) {
            return Ok(());
        }
        if self.add_id_node(action).is_none() {
            return Ok(());
        }
        self.ensure_operation(
            &OperationKey::new(action, NodeType::Animation, OpCode::AnimationEval),
            Some(OperationWork::Kernel),
        )?;
        Ok(())
    }

    fn build_driver(&mut self, owner: IdKey, driver: &Driver) -> Result<()> {
        self.ensure_operation(
            &driver_key(owner, driver),
            Some(OperationWork::Kernel),
        )?;
        self.build_driver_id_property(owner, &driver.rna_path)?;
        for variable in &driver.variables {
            for target in &variable.targets {
                let id = target.id();
                self.build_id(id)?;
                if let DriverTarget::Property { rna_path, .. } = target {
                    self.build_driver_id_property(id, rna_path)?;
                }
            }
        }
        Ok(())
    }

    /// Custom properties read or written by drivers get their own
    /// operation so drivers can depend on each other through them.
    fn build_driver_id_property(&mut self, id: IdKey, rna_path: &str) -> Result<()> {
        let Some(id_type) = self.main.id_type(id) else {
            return Ok(());
        };
        let key = PropertyPathQuery::new(id, id_type).resolve(rna_path, PathSide::Entry);
        if let NodeKey::Operation(key) = key {
            if key.opcode == OpCode::IdProperty {
                self.ensure_operation(&key, None)?;
            }
        }
        Ok(())
    }

    // Scene

    /// Build the objects and scene data of one view layer.
    pub(crate) fn build_view_layer(
        &mut self,
        scene: IdKey,
        layer_index: usize,
        linked_state: LinkedState,
    ) -> Result<()> {
        let main = self.main;
        let Some(scene_data) = main.scene(scene) else {
            warn!(%scene, "view layer scene is not a scene, skipping");
            return Ok(());
        };
        let Some(id_index) = self.add_id_node(scene) else {
            return Ok(());
        };
        let node = self.graph.id_node_mut(id_index);
        node.linked_state = node.linked_state.min(linked_state);

        if let Some(layer) = scene_data.view_layer(layer_index) {
            let mode = self.mode();
            let mut base_index = 0;
            for base in &layer.bases {
                if !self
                    .filter
                    .need_pull_base_into_graph(main, self.cache, base, mode)
                {
                    continue;
                }
                self.build_object(
                    Some(base_index),
                    base.object,
                    linked_state,
                    base.is_enabled(mode),
                )?;
                base_index += 1;
            }
        } else {
            warn!(%scene, layer_index, "view layer missing, building scene data only");
        }
        if let Some(collection) = scene_data.master_collection {
            self.build_layer_collections(collection)?;
        }
        if let Some(camera) = scene_data.camera {
            self.build_object(None, camera, LinkedState::Indirectly, true)?;
        }
        if let Some(world) = scene_data.world {
            self.build_world(world)?;
        }
        if scene_data.compositor.is_some() {
            self.build_scene_compositor(scene)?;
        }
        if scene_data.rigid_body_world.is_some() {
            self.build_rigidbody(scene)?;
        }
        for cache_file in &scene_data.cache_files {
            self.build_cachefile(*cache_file)?;
        }
        self.ensure_operation(
            &OperationKey::new(scene, NodeType::LayerCollections, OpCode::ViewLayerEval),
            Some(OperationWork::Kernel),
        )?;
        self.build_scene_parameters(scene)?;
        self.build_animdata(scene)?;
        if linked_state == LinkedState::Directly {
            self.build_scene_audio(scene)?;
            self.build_scene_sequencer(scene)?;
        }
        if let Some(set) = scene_data.background_set {
            if set != scene {
                self.build_view_layer(set, 0, LinkedState::ViaSet)?;
            }
        }
        Ok(())
    }

    /// Collections of the view layer. Their objects come in through bases.
    fn build_layer_collections(&mut self, collection: IdKey) -> Result<()> {
        if self.built.is_built(collection, BuildTag::Complete) {
            return Ok(());
        }
        self.build_collection(collection, true)?;
        let children = self
            .main
            .collection(collection)
            .map(|data| data.children.clone())
            .unwrap_or_default();
        for child in children {
            self.build_layer_collections(child)?;
        }
        Ok(())
    }

    /// Scene data needed by the render pipeline only.
    pub(crate) fn build_scene_render(&mut self, scene: IdKey) -> Result<()> {
        let main = self.main;
        let Some(scene_data) = main.scene(scene) else {
            return Ok(());
        };
        let Some(id_index) = self.add_id_node(scene) else {
            return Ok(());
        };
        self.graph.id_node_mut(id_index).linked_state = LinkedState::Directly;
        self.build_animdata(scene)?;
        self.build_scene_parameters(scene)?;
        self.build_scene_audio(scene)?;
        if scene_data.use_compositing {
            self.build_scene_compositor(scene)?;
        }
        if scene_data.use_sequencer {
            self.build_scene_sequencer(scene)?;
        }
        if let Some(camera) = scene_data.camera {
            self.build_object(None, camera, LinkedState::Indirectly, true)?;
        }
        Ok(())
    }

    pub(crate) fn build_scene_parameters(&mut self, scene: IdKey) -> Result<()> {
        if self.built.check_is_built_and_tag(scene, BuildTag::SceneParameters) {
            return Ok(());
        }
        if self.add_id_node(scene).is_none() {
            return Ok(());
        }
        self.build_parameters(scene)?;
        if let Some(data) = self.main.get(scene) {
            self.build_idproperties(&data.properties)?;
        }
        self.ensure_operation(
            &OperationKey::new(scene, NodeType::Parameters, OpCode::SceneEval),
            Some(OperationWork::Kernel),
        )?;
        Ok(())
    }

    pub(crate) fn build_scene_compositor(&mut self, scene: IdKey) -> Result<()> {
        if self.built.check_is_built_and_tag(scene, BuildTag::SceneCompositor) {
            return Ok(());
        }
        match self.main.scene(scene).and_then(|data| data.compositor) {
            Some(tree) => self.build_nodetree(tree),
            None => Ok(()),
        }
    }

    pub(crate) fn build_scene_audio(&mut self, scene: IdKey) -> Result<()> {
        if self.built.check_is_built_and_tag(scene, BuildTag::SceneAudio) {
            return Ok(());
        }
        let entry = self.add_kernel(OperationKey::new(scene, NodeType::Audio, OpCode::AudioEntry))?;
        self.set_entry(entry);
        self.add_kernel(OperationKey::new(scene, NodeType::Audio, OpCode::AudioVolume))?;
        let exit = self.add_kernel(OperationKey::new(scene, NodeType::Audio, OpCode::SoundEval))?;
        self.set_exit(exit);
        Ok(())
    }

    pub(crate) fn build_scene_sequencer(&mut self, scene: IdKey) -> Result<()> {
        let main = self.main;
        let Some(strips) = main.scene(scene).and_then(|data| data.strips.as_ref()) else {
            return Ok(());
        };
        if self.built.check_is_built_and_tag(scene, BuildTag::SceneSequencer) {
            return Ok(());
        }
        self.build_scene_audio(scene)?;
        self.add_kernel(OperationKey::new(scene, NodeType::Sequencer, OpCode::SequencesEval))?;
        for strip in strips {
            self.build_idproperties(&strip.properties)?;
            if let Some(sound) = strip.sound {
                self.build_sound(sound)?;
            }
            if let Some(strip_scene) = strip.scene {
                self.build_scene_parameters(strip_scene)?;
            }
        }
        Ok(())
    }

    /// Rigid body world: rebuild and simulation on the scene, result copies
    /// on the simulated objects.
    pub(crate) fn build_rigidbody(&mut self, scene: IdKey) -> Result<()> {
        let main = self.main;
        let Some(world) = main.scene(scene).and_then(|data| data.rigid_body_world.as_ref()) else {
            return Ok(());
        };
        self.add_kernel(OperationKey::new(scene, NodeType::Transform, OpCode::RigidbodyRebuild))?;
        let sim = self.add_kernel(OperationKey::new(scene, NodeType::Transform, OpCode::RigidbodySim))?;
        self.set_entry(sim);
        self.set_exit(sim);
        if let Some(collection) = world.collection {
            self.build_collection(collection, false)?;
            for object in main.collection_objects_recursive(collection) {
                let Some(data) = main.object(object) else {
                    continue;
                };
                let is_active = data
                    .rigid_body
                    .is_some_and(|body| body.kind == RigidBodyKind::Active);
                if data.kind != ObjectKind::Mesh || !is_active {
                    continue;
                }
                if self.graph.find_id_node(object).is_none() {
                    continue;
                }
                self.ensure_operation(
                    &OperationKey::new(object, NodeType::Transform, OpCode::RigidbodyTransformCopy),
                    Some(OperationWork::Kernel),
                )?;
            }
        }
        if let Some(constraints) = world.constraints {
            self.build_collection(constraints, false)?;
        }
        Ok(())
    }

    // Collections

    /// Build a collection and, unless it comes from the view layer, its
    /// objects and children.
    pub(crate) fn build_collection(&mut self, collection: IdKey, from_layer: bool) -> Result<()> {
        let main = self.main;
        let Some(data) = main.collection(collection) else {
            warn!(%collection, "not a collection, skipping");
            return Ok(());
        };
        let is_visible = !data.is_hidden(self.mode()) && self.is_parent_collection_visible;
        let id_index = if self.built.check_is_built_and_tag(collection, BuildTag::Complete) {
            let Some(id_index) = self.graph.find_id_node(collection) else {
                return Ok(());
            };
            let node = self.graph.id_node(id_index);
            let became_visible =
                is_visible && !node.is_visible_on_build && node.is_collection_fully_expanded;
            // Built from the view layer first, now its objects are wanted too.
            let needs_expanding = !from_layer && !node.is_collection_fully_expanded;
            if !(became_visible || needs_expanding) {
                return Ok(());
            }
            if became_visible {
                self.graph.id_node_mut(id_index).is_visible_on_build = true;
            }
            id_index
        } else {
            let Some(id_index) = self.add_id_node(collection) else {
                return Ok(());
            };
            self.graph.id_node_mut(id_index).is_visible_on_build = is_visible;
            if let Some(id_data) = main.get(collection) {
                self.build_idproperties(&id_data.properties)?;
            }
            self.add_noop(OperationKey::new(collection, NodeType::Geometry, OpCode::GeometryEvalDone))?;
            id_index
        };
        if from_layer {
            return Ok(());
        }
        self.graph.id_node_mut(id_index).is_collection_fully_expanded = true;
        let parent_visible = self.is_parent_collection_visible;
        self.is_parent_collection_visible = is_visible;
        for object in &data.objects {
            if !self.filter.allows_object(*object) {
                continue;
            }
            self.build_object(None, *object, LinkedState::Indirectly, is_visible)?;
        }
        for child in &data.children {
            self.build_collection(*child, false)?;
        }
        self.is_parent_collection_visible = parent_visible;
        Ok(())
    }

    // Objects

    /// Build an object and everything it references.
    ///
    /// An object reached again only accumulates its linked state,
    /// visibility and base flag.
    pub(crate) fn build_object(
        &mut self,
        base_index: Option<usize>,
        object: IdKey,
        linked_state: LinkedState,
        is_visible: bool,
    ) -> Result<()> {
        let main = self.main;
        let Some(data) = main.object(object) else {
            warn!(%object, "not an object, skipping");
            return Ok(());
        };
        if self.built.check_is_built_and_tag(object, BuildTag::Complete) {
            let Some(id_index) = self.graph.find_id_node(object) else {
                return Ok(());
            };
            if self.graph.id_node(id_index).linked_state == LinkedState::Indirectly {
                self.build_object_from_layer(object)?;
            }
            let node = self.graph.id_node_mut(id_index);
            node.linked_state = node.linked_state.min(linked_state);
            node.is_visible_on_build |= is_visible;
            node.has_base |= base_index.is_some();
            return self.build_object_instance_collection(data, is_visible);
        }

        let Some(id_index) = self.add_id_node(object) else {
            return Ok(());
        };
        let is_camera = self.scene_camera == Some(object);
        let node = self.graph.id_node_mut(id_index);
        node.linked_state = linked_state;
        node.is_visible_on_build = is_visible || is_camera;
        node.has_base |= base_index.is_some();
        if self.cache.is_object_visibility_animated(main, object) {
            self.graph.has_animated_visibility = true;
        }

        self.build_object_from_layer(object)?;
        self.build_object_transform(object, data)?;
        if let Some(parent) = &data.parent {
            self.build_object(None, parent.object, LinkedState::Indirectly, is_visible)?;
        }
        self.build_object_modifiers(object, data, is_visible)?;
        for constraint in &data.constraints {
            let mut targets = Vec::new();
            constraint.kind.foreach_target(&mut |target| targets.push(target.object));
            for target in targets {
                self.build_id_with_visibility(target, is_visible)?;
            }
        }
        self.build_object_data(object, data, is_visible)?;
        self.build_parameters(object)?;
        if let Some(id_data) = main.get(object) {
            self.build_idproperties(&id_data.properties)?;
        }
        self.build_animdata(object)?;
        if !data.particle_systems.is_empty() {
            self.build_particle_systems(object, data, is_visible)?;
        }
        if data.instance_collection.is_some() {
            self.build_object_instance_collection(data, is_visible)?;
            let dupli = self.add_noop(OperationKey::new(object, NodeType::Dupli, OpCode::Dupli))?;
            self.graph.operation(dupli).set_flags(OperationFlags::PINNED);
        }
        self.add_kernel(OperationKey::new(
            object,
            NodeType::Synchronization,
            OpCode::SynchronizeToOriginal,
        ))?;
        self.build_object_visibility(object)
    }

    fn build_object_from_layer(&mut self, object: IdKey) -> Result<()> {
        let entry_key = OperationKey::new(object, NodeType::ObjectFromLayer, OpCode::ObjectFromLayerEntry);
        if self.has_operation(&entry_key) {
            return Ok(());
        }
        let entry = self.add_noop(entry_key)?;
        self.set_entry(entry);
        self.add_kernel(OperationKey::new(object, NodeType::ObjectFromLayer, OpCode::ObjectBaseFlags))?;
        let exit = self.add_noop(OperationKey::new(
            object,
            NodeType::ObjectFromLayer,
            OpCode::ObjectFromLayerExit,
        ))?;
        self.set_exit(exit);
        Ok(())
    }

    fn build_object_transform(&mut self, object: IdKey, data: &ObjectData) -> Result<()> {
        let key = |opcode| OperationKey::new(object, NodeType::Transform, opcode);
        let init = self.add_noop(key(OpCode::TransformInit))?;
        self.set_entry(init);
        self.add_kernel(key(OpCode::TransformLocal))?;
        if data.parent.is_some() {
            self.add_kernel(key(OpCode::TransformParent))?;
        }
        if !data.constraints.is_empty() {
            self.add_kernel(key(OpCode::TransformConstraints))?;
        }
        self.add_kernel(key(OpCode::TransformEval))?;
        self.add_noop(key(OpCode::TransformSimulationInit))?;
        let last = self.add_kernel(key(OpCode::TransformFinal))?;
        self.set_exit(last);
        Ok(())
    }

    /// Operation evaluating whether the object is enabled, the exit of its
    /// VISIBILITY component.
    fn build_object_visibility(&mut self, object: IdKey) -> Result<()> {
        let op = self.add_kernel(OperationKey::new(object, NodeType::Visibility, OpCode::Visibility))?;
        self.graph.operation(op).set_flags(OperationFlags::AFFECTS_VISIBILITY);
        self.set_exit(op);
        Ok(())
    }

    /// Data-blocks referenced by modifiers. The per-modifier operations are
    /// added with the geometry component.
    fn build_object_modifiers(&mut self, object: IdKey, data: &ObjectData, is_visible: bool) -> Result<()> {
        let mut ids = Vec::new();
        for modifier in &data.modifiers {
            modifier.kind.foreach_id(&mut |id| ids.push(id));
        }
        for id in ids {
            self.build_id_with_visibility(id, is_visible)?;
        }
        let main = self.main;
        for modifier in &data.modifiers {
            let base = format!("modifiers[\"{}\"]", modifier.name);
            if self
                .cache
                .is_property_animated(main, object, &format!("{base}.show_viewport"))
                || self
                    .cache
                    .is_property_animated(main, object, &format!("{base}.show_render"))
            {
                self.graph.has_animated_visibility = true;
            }
        }
        Ok(())
    }

    fn build_object_instance_collection(&mut self, data: &ObjectData, is_visible: bool) -> Result<()> {
        let Some(collection) = data.instance_collection else {
            return Ok(());
        };
        let parent_visible = self.is_parent_collection_visible;
        self.is_parent_collection_visible = is_visible;
        let result = self.build_collection(collection, false);
        self.is_parent_collection_visible = parent_visible;
        result
    }

    fn build_object_data(&mut self, object: IdKey, data: &ObjectData, is_visible: bool) -> Result<()> {
        let Some(object_data) = data.data else {
            return Ok(());
        };
        match data.kind {
            kind if kind.has_geometry() => self.build_object_data_geometry(object, data, is_visible)?,
            ObjectKind::Armature => self.build_rig(object, data)?,
            ObjectKind::Camera => self.build_camera(object_data)?,
            ObjectKind::Light => self.build_light(object_data)?,
            ObjectKind::Speaker => self.build_speaker(object_data)?,
            _ => self.build_id(object_data)?,
        }
        self.build_materials(&data.materials)
    }

    fn build_object_data_geometry(&mut self, object: IdKey, data: &ObjectData, is_visible: bool) -> Result<()> {
        let key = |opcode| OperationKey::new(object, NodeType::Geometry, opcode);
        let init = self.add_noop(key(OpCode::GeometryEvalInit))?;
        self.set_entry(init);
        let thread_safety = if data.kind == ObjectKind::MetaBall {
            ThreadSafety::SerialOnly
        } else {
            ThreadSafety::ParallelSafe
        };
        let eval = self.add_operation(&key(OpCode::GeometryEval), Some(OperationWork::Kernel), thread_safety)?;
        self.set_exit(eval);
        if !data.modifiers.is_empty() {
            let visibility = self.add_kernel(key(OpCode::Visibility))?;
            self.graph
                .operation(visibility)
                .set_flags(OperationFlags::AFFECTS_VISIBILITY);
            for modifier in &data.modifiers {
                self.add_kernel(key(OpCode::Modifier).with_name(modifier.name.as_str()))?;
            }
        }
        self.build_object_pointcache(object, data)?;
        if let Some(geometry) = data.data {
            self.build_object_data_geometry_datablock(geometry, is_visible)?;
        }
        self.ensure_operation(
            &OperationKey::new(object, NodeType::Parameters, OpCode::Dimensions),
            Some(OperationWork::Kernel),
        )?;
        Ok(())
    }

    /// Mesh, curve, metaball or lattice data.
    pub(crate) fn build_object_data_geometry_datablock(&mut self, id: IdKey, is_visible: bool) -> Result<()> {
        if self.built.check_is_built_and_tag(id, BuildTag::Complete) {
            return Ok(());
        }
        let main = self.main;
        let Some(id_data) = main.get(id) else {
            warn!(%id, "geometry data missing, skipping");
            return Ok(());
        };
        let Some(geometry) = id_data.as_geometry() else {
            warn!(%id, "not geometry data, skipping");
            return Ok(());
        };
        if self.add_id_node(id).is_none() {
            return Ok(());
        }
        self.build_idproperties(&id_data.properties)?;
        self.build_animdata(id)?;
        if let Some(key) = geometry.shape_key {
            self.build_shapekeys(key)?;
        }
        let eval = self.add_kernel(OperationKey::new(id, NodeType::Geometry, OpCode::GeometryEval))?;
        self.set_entry(eval);
        if let Some(bevel) = geometry.bevel_object {
            self.build_object(None, bevel, LinkedState::Indirectly, is_visible)?;
        }
        let done = self.add_noop(OperationKey::new(id, NodeType::Geometry, OpCode::GeometryEvalDone))?;
        self.set_exit(done);
        self.build_parameters(id)?;
        self.build_materials(&geometry.materials)
    }

    fn build_object_pointcache(&mut self, object: IdKey, data: &ObjectData) -> Result<()> {
        if !data.has_point_cache() {
            return Ok(());
        }
        self.add_kernel(OperationKey::new(object, NodeType::PointCache, OpCode::PointCacheReset))?;
        Ok(())
    }

    fn build_particle_systems(&mut self, object: IdKey, data: &ObjectData, is_visible: bool) -> Result<()> {
        let key = |opcode| OperationKey::new(object, NodeType::ParticleSystem, opcode);
        let init = self.add_kernel(key(OpCode::ParticleSystemInit))?;
        self.set_entry(init);
        let main = self.main;
        for system in &data.particle_systems {
            self.build_particle_settings(system.settings)?;
            self.add_kernel(key(OpCode::ParticleSystemEval).with_name(system.name.as_str()))?;
            let Some(IdPayload::ParticleSettings(settings)) =
                main.get(system.settings).map(|data| &data.payload)
            else {
                continue;
            };
            if let Some(instance) = settings.instance_object {
                self.build_object(None, instance, LinkedState::Indirectly, is_visible)?;
            }
            if let Some(collection) = settings.instance_collection {
                self.build_collection(collection, false)?;
            }
        }
        let done = self.add_noop(key(OpCode::ParticleSystemDone))?;
        self.set_exit(done);
        Ok(())
    }

    pub(crate) fn build_particle_settings(&mut self, settings: IdKey) -> Result<()> {
        if self.built.check_is_built_and_tag(settings, BuildTag::Complete) {
            return Ok(());
        }
        let main = self.main;
        let Some(IdPayload::ParticleSettings(data)) = main.get(settings).map(|data| &data.payload)
        else {
            warn!(%settings, "not particle settings, skipping");
            return Ok(());
        };
        if self.add_id_node(settings).is_none() {
            return Ok(());
        }
        self.build_animdata(settings)?;
        self.build_parameters(settings)?;
        let key = |opcode| OperationKey::new(settings, NodeType::ParticleSettings, opcode);
        let init = self.add_noop(key(OpCode::ParticleSettingsInit))?;
        self.set_entry(init);
        self.add_kernel(key(OpCode::ParticleSettingsReset))?;
        let eval = self.add_noop(key(OpCode::ParticleSettingsEval))?;
        self.set_exit(eval);
        for texture in &data.textures {
            self.build_texture(*texture)?;
        }
        if let Some(collection) = data.effector_collection {
            self.build_collection(collection, false)?;
        }
        if let Some(collection) = data.collision_collection {
            self.build_collection(collection, false)?;
        }
        Ok(())
    }

    // Object data and shading

    pub(crate) fn build_materials(&mut self, materials: &[IdKey]) -> Result<()> {
        for material in materials {
            self.build_material(*material)?;
        }
        Ok(())
    }

    /// Shared shape of shading data-blocks: common data, one update
    /// operation and the embedded node tree.
    fn build_shading(&mut self, id: IdKey, node_type: NodeType, opcode: OpCode) -> Result<()> {
        if self.built.check_is_built_and_tag(id, BuildTag::Complete) {
            return Ok(());
        }
        if self.add_id_node(id).is_none() {
            return Ok(());
        }
        self.add_kernel(OperationKey::new(id, node_type, opcode))?;
        self.build_common(id)?;
        match self.main.get(id).and_then(|data| data.payload.node_tree()) {
            Some(tree) => self.build_nodetree(tree),
            None => Ok(()),
        }
    }

    pub(crate) fn build_material(&mut self, material: IdKey) -> Result<()> {
        self.build_shading(material, NodeType::Shading, OpCode::MaterialUpdate)
    }

    pub(crate) fn build_light(&mut self, light: IdKey) -> Result<()> {
        self.build_shading(light, NodeType::Shading, OpCode::LightUpdate)
    }

    pub(crate) fn build_world(&mut self, world: IdKey) -> Result<()> {
        self.build_shading(world, NodeType::Shading, OpCode::WorldUpdate)
    }

    pub(crate) fn build_texture(&mut self, texture: IdKey) -> Result<()> {
        self.build_shading(texture, NodeType::GenericDatablock, OpCode::GenericDatablockUpdate)?;
        match self.main.get(texture).map(|data| &data.payload) {
            Some(IdPayload::Texture(data)) => match data.image {
                Some(image) => self.build_image(image),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    pub(crate) fn build_image(&mut self, image: IdKey) -> Result<()> {
        if self.built.check_is_built_and_tag(image, BuildTag::Complete) {
            return Ok(());
        }
        if self.add_id_node(image).is_none() {
            return Ok(());
        }
        self.build_parameters(image)?;
        self.add_noop(OperationKey::new(
            image,
            NodeType::GenericDatablock,
            OpCode::GenericDatablockUpdate,
        ))?;
        Ok(())
    }

    /// Node tree: shading and output operations plus every data-block its
    /// nodes and sockets reference.
    pub(crate) fn build_nodetree(&mut self, tree: IdKey) -> Result<()> {
        if self.built.check_is_built_and_tag(tree, BuildTag::Complete) {
            return Ok(());
        }
        let main = self.main;
        let Some(data) = main.node_tree(tree) else {
            warn!(%tree, "not a node tree, skipping");
            return Ok(());
        };
        if self.add_id_node(tree).is_none() {
            return Ok(());
        }
        self.build_common(tree)?;
        self.add_kernel(OperationKey::new(tree, NodeType::Shading, OpCode::MaterialUpdate))?;
        self.add_noop(OperationKey::new(tree, NodeType::NtreeOutput, OpCode::NtreeOutput))?;
        for node in &data.nodes {
            self.build_idproperties(&node.properties)?;
            for id in &node.socket_ids {
                self.build_nodetree_id(*id)?;
            }
            if let Some(id) = node.id {
                self.build_nodetree_id(id)?;
            }
        }
        Ok(())
    }

    fn build_nodetree_id(&mut self, id: IdKey) -> Result<()> {
        match self.main.id_type(id) {
            Some(IdType::Object) => self.build_object(None, id, LinkedState::Indirectly, true),
            Some(IdType::Scene) => {
                self.build_scene_parameters(id)?;
                match self.main.scene(id).and_then(|scene| scene.camera) {
                    Some(camera) => self.build_object(None, camera, LinkedState::Indirectly, true),
                    None => Ok(()),
                }
            }
            // Script nodes.
            Some(IdType::Text) => Ok(()),
            Some(_) => self.build_id(id),
            None => {
                warn!(%id, "node references a missing data-block");
                Ok(())
            }
        }
    }

    pub(crate) fn build_camera(&mut self, camera: IdKey) -> Result<()> {
        if self.built.check_is_built_and_tag(camera, BuildTag::Complete) {
            return Ok(());
        }
        if self.add_id_node(camera).is_none() {
            return Ok(());
        }
        self.build_common(camera)?;
        match self.main.get(camera).map(|data| &data.payload) {
            Some(IdPayload::Camera(data)) => match data.dof_object {
                Some(focus) => self.build_object(None, focus, LinkedState::Indirectly, false),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    pub(crate) fn build_speaker(&mut self, speaker: IdKey) -> Result<()> {
        if self.built.check_is_built_and_tag(speaker, BuildTag::Complete) {
            return Ok(());
        }
        if self.add_id_node(speaker).is_none() {
            return Ok(());
        }
        self.build_common(speaker)?;
        self.add_kernel(OperationKey::new(speaker, NodeType::Audio, OpCode::SpeakerEval))?;
        match self.main.get(speaker).map(|data| &data.payload) {
            Some(IdPayload::Speaker(data)) => match data.sound {
                Some(sound) => self.build_sound(sound),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    pub(crate) fn build_sound(&mut self, sound: IdKey) -> Result<()> {
        if self.built.check_is_built_and_tag(sound, BuildTag::Complete) {
            return Ok(());
        }
        if self.add_id_node(sound).is_none() {
            return Ok(());
        }
        self.build_common(sound)?;
        self.add_kernel(OperationKey::new(sound, NodeType::Audio, OpCode::SoundEval))?;
        Ok(())
    }

    pub(crate) fn build_cachefile(&mut self, cache_file: IdKey) -> Result<()> {
        if self.built.check_is_built_and_tag(cache_file, BuildTag::Complete) {
            return Ok(());
        }
        if self.add_id_node(cache_file).is_none() {
            return Ok(());
        }
        self.build_common(cache_file)?;
        self.add_kernel(OperationKey::new(cache_file, NodeType::Cache, OpCode::FileCacheUpdate))?;
        Ok(())
    }

    pub(crate) fn build_armature(&mut self, armature: IdKey) -> Result<()> {
        if self.built.check_is_built_and_tag(armature, BuildTag::Complete) {
            return Ok(());
        }
        if self.add_id_node(armature).is_none() {
            return Ok(());
        }
        self.build_common(armature)?;
        self.add_kernel(OperationKey::new(armature, NodeType::Armature, OpCode::ArmatureEval))?;
        Ok(())
    }

    /// Shape keys: one operation for the whole key and one parameter
    /// operation per key block.
    pub(crate) fn build_shapekeys(&mut self, key: IdKey) -> Result<()> {
        if self.built.check_is_built_and_tag(key, BuildTag::Complete) {
            return Ok(());
        }
        let main = self.main;
        let Some(IdPayload::ShapeKey(data)) = main.get(key).map(|data: &IdData| &data.payload) else {
            warn!(%key, "not a shape key, skipping");
            return Ok(());
        };
        if self.add_id_node(key).is_none() {
            return Ok(());
        }
        self.build_common(key)?;
        self.add_kernel(OperationKey::new(key, NodeType::Geometry, OpCode::GeometryShapekey))?;
        for block in &data.blocks {
            self.ensure_operation(
                &OperationKey::new(key, NodeType::Parameters, OpCode::ParametersEval)
                    .with_name(block.as_str()),
                Some(OperationWork::Kernel),
            )?;
        }
        Ok(())
    }
}

/// Operation of a driver, in the PARAMETERS component of its owner.
pub(crate) fn driver_key(owner: IdKey, driver: &Driver) -> OperationKey {
    OperationKey::new(owner, NodeType::Parameters, OpCode::Driver)
        .with_name(driver.rna_path.as_str())
        .with_tag(driver.array_index)
}
