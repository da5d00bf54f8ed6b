//! Relation Builder
//!
//! Second pass of a build. Walks the same data-blocks as the node builder,
//! in the same order, and connects the operations it created.
//!
//! Relations are declared between keys. An endpoint that does not resolve
//! means the node builder skipped that part of the data (a missing
//! data-block, a disabled base); the relation is reported and dropped.
//! Relations that are optional by nature are guarded with
//! [`RelationBuilder::has_node`] so they stay quiet.

use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::{trace, warn};

use super::handle::NodeHandle;
use super::key::{ComponentKey, OperationKey, RelationKey, TimeSourceKey};
use super::nodes::driver_key;
use super::path::{PathSide, PropertyPathQuery};
use super::relations_rig::RootMap;
use super::{BaseFilter, BuildTag, BuilderCache, BuiltMap, NodeKey};
use crate::graph::{
    ComponentIndex, CustomDataMask, Depsgraph, EvalFlags, IdNodeIndex, LinkedState, NodeRef,
    NodeType, OpCode, OperationIndex, RelationFlags, RelationIndex,
};
use crate::scene::{
    AnimData, BooleanOperand, Constraint, ConstraintKind, Driver, DriverTarget, IdKey, IdPayload,
    IdProperty, IdType, Main, Modifier, ModifierKind, ObjectData, ObjectKind, Parent, ParentKind,
    RigidBodyKind,
};

/// Second pass of a build: adds every relation of the graph.
pub(crate) struct RelationBuilder<'a> {
    pub(super) main: &'a Main,
    pub(crate) graph: &'a mut Depsgraph,
    pub(super) cache: &'a BuilderCache,
    pub(super) built: BuiltMap,
    filter: BaseFilter,
}

impl<'a> RelationBuilder<'a> {
    pub(crate) fn new(
        main: &'a Main,
        graph: &'a mut Depsgraph,
        cache: &'a BuilderCache,
        filter: BaseFilter,
    ) -> Self {
        Self {
            main,
            graph,
            cache,
            built: BuiltMap::default(),
            filter,
        }
    }

    // Relations

    /// Resolve both keys and connect them.
    pub(crate) fn add_relation<F, T>(
        &mut self,
        from: &F,
        to: &T,
        description: &str,
        flags: RelationFlags,
    ) -> Option<RelationIndex>
    where
        F: RelationKey + ?Sized,
        T: RelationKey + ?Sized,
    {
        let Some(source) = from.source(self.graph) else {
            warn!(from = %from, to = %to, description, "relation source not found");
            return None;
        };
        let Some(target) = to.target(self.graph) else {
            warn!(from = %from, to = %to, description, "relation target not found");
            return None;
        };
        self.graph.add_relation(source, target, description, flags)
    }

    fn add_time_relation<T: RelationKey + ?Sized>(&mut self, to: &T, description: &str) {
        self.add_relation(&TimeSourceKey, to, description, RelationFlags::empty());
    }

    /// Whether `key` resolves to a node of the graph.
    pub(crate) fn has_node<K: RelationKey + ?Sized>(&self, key: &K) -> bool {
        key.source(self.graph).is_some() || key.target(self.graph).is_some()
    }

    fn has_component(&self, id: IdKey, node_type: NodeType) -> bool {
        self.graph.find_component(id, node_type, "").is_some()
    }

    fn id_node(&self, id: IdKey) -> Option<IdNodeIndex> {
        self.graph.find_id_node(id)
    }

    /// Visibility of `to` decides the visibility of `from`.
    pub(crate) fn add_visibility_relation(&mut self, from: IdKey, to: IdKey) {
        let from_key = ComponentKey::new(from, NodeType::Visibility);
        let to_key = ComponentKey::new(to, NodeType::Visibility);
        if !self.has_node(&from_key) || !self.has_node(&to_key) {
            return;
        }
        self.add_relation(&from_key, &to_key, "visibility", RelationFlags::empty());
    }

    pub(crate) fn add_special_eval_flag(&mut self, id: IdKey, flag: EvalFlags) {
        if let Some(index) = self.id_node(id) {
            self.graph.id_node_mut(index).eval_flags |= flag;
        }
    }

    pub(crate) fn add_customdata_mask(&mut self, object: IdKey, mask: CustomDataMask) {
        if let Some(index) = self.id_node(object) {
            self.graph.id_node_mut(index).customdata_masks |= mask;
        }
    }

    // Generic data-blocks

    pub(crate) fn build_id(&mut self, id: IdKey) {
        let main = self.main;
        let Some(data) = main.get(id) else {
            return;
        };
        match &data.payload {
            IdPayload::Scene(_) => self.build_scene_parameters(id),
            IdPayload::Object(_) => self.build_object(id),
            IdPayload::Geometry(..) => self.build_object_data_geometry_datablock(id),
            IdPayload::Armature => self.build_armature(id),
            IdPayload::Camera(_) => self.build_camera(id),
            IdPayload::Light(_) => self.build_light(id),
            IdPayload::Material(_) => self.build_material(id),
            IdPayload::World(_) => self.build_world(id),
            IdPayload::Texture(_) => self.build_texture(id),
            IdPayload::Image => self.build_image(id),
            IdPayload::NodeTree(_) => self.build_nodetree(id),
            IdPayload::Collection(_) => self.build_collection(id, None, false),
            IdPayload::ParticleSettings(_) => self.build_particle_settings(id),
            IdPayload::Action(_) => self.build_action(id),
            IdPayload::ShapeKey(_) => self.build_shapekeys(id),
            IdPayload::CacheFile => self.build_cachefile(id),
            IdPayload::Sound => self.build_sound(id),
            IdPayload::Speaker(_) => self.build_speaker(id),
            IdPayload::Text => self.build_generic_id(id),
        }
    }

    fn build_generic_id(&mut self, id: IdKey) {
        if self.built.check_is_built_and_tag(id, BuildTag::Complete) {
            return;
        }
        self.build_common(id);
    }

    fn build_common(&mut self, id: IdKey) {
        if let Some(data) = self.main.get(id) {
            self.build_idproperties(&data.properties);
        }
        self.build_animdata(id);
        self.build_parameters(id);
    }

    pub(crate) fn build_idproperties(&mut self, properties: &[IdProperty]) {
        let mut ids = Vec::new();
        for property in properties {
            property.foreach_id(&mut |id| ids.push(id));
        }
        for id in ids {
            self.build_id(id);
        }
    }

    /// Parameter evaluations (the main one, per-block and per-bone ones,
    /// and custom properties) run between the entry and exit of the
    /// PARAMETERS component.
    pub(crate) fn build_parameters(&mut self, id: IdKey) {
        if self.built.check_is_built_and_tag(id, BuildTag::Parameters) {
            return;
        }
        let Some(component) = self.graph.find_component(id, NodeType::Parameters, "") else {
            return;
        };
        let graph: &Depsgraph = self.graph;
        let inner: Vec<OperationKey> = graph
            .component(component)
            .operations()
            .filter(|op| {
                matches!(
                    graph.operation(*op).opcode(),
                    OpCode::ParametersEval | OpCode::IdProperty
                )
            })
            .map(|op| OperationKey::of(graph, op))
            .collect();
        let entry = OperationKey::new(id, NodeType::Parameters, OpCode::ParametersEntry);
        let exit = OperationKey::new(id, NodeType::Parameters, OpCode::ParametersExit);
        for key in inner {
            self.add_relation(&entry, &key, "Entry -> Parameters", RelationFlags::empty());
            self.add_relation(&key, &exit, "Parameters -> Exit", RelationFlags::empty());
        }
    }

    // Animation

    pub(crate) fn build_animdata(&mut self, id: IdKey) {
        let main = self.main;
        let Some(anim) = main.get(id).and_then(|data| data.anim.as_ref()) else {
            return;
        };
        if self.built.check_is_built_and_tag(id, BuildTag::Animation) {
            return;
        }
        if let Some(action) = anim.action {
            self.build_action(action);
            self.build_animdata_curves(id, action);
        }
        self.build_animdata_drivers(id, anim);
    }

    fn build_animdata_curves(&mut self, id: IdKey, action: IdKey) {
        let main = self.main;
        let key = |opcode| OperationKey::new(id, NodeType::Animation, opcode);
        let entry = key(OpCode::AnimationEntry);
        let eval = key(OpCode::AnimationEval);
        let exit = key(OpCode::AnimationExit);
        self.add_time_relation(&entry, "TimeSrc -> Animation");
        self.add_relation(
            &OperationKey::new(action, NodeType::Animation, OpCode::AnimationEval),
            &eval,
            "Action -> Animation",
            RelationFlags::empty(),
        );
        self.add_relation(&entry, &eval, "Animation Entry -> Eval", RelationFlags::empty());
        self.add_relation(&eval, &exit, "Animation Eval -> Exit", RelationFlags::empty());

        let (Some(id_type), Some(IdPayload::Action(data))) =
            (main.id_type(id), main.get(action).map(|data| &data.payload))
        else {
            return;
        };
        let query = PropertyPathQuery::new(id, id_type);
        let mut seen = HashSet::new();
        for fcurve in &data.fcurves {
            let target = query.resolve(&fcurve.rna_path, PathSide::Entry);
            if target.node_type() == NodeType::Animation || !seen.insert(target.clone()) {
                continue;
            }
            if !self.has_node(&target) {
                trace!(path = %fcurve.rna_path, %target, "animated property has no node");
                continue;
            }
            self.add_relation(&exit, &target, "Animation -> Prop", RelationFlags::empty());
        }
    }

    fn build_animdata_drivers(&mut self, id: IdKey, anim: &AnimData) {
        let anim_exit = OperationKey::new(id, NodeType::Animation, OpCode::AnimationExit);
        let has_animation = self.has_node(&anim_exit);
        for driver in &anim.drivers {
            if has_animation {
                self.add_relation(
                    &anim_exit,
                    &driver_key(id, driver),
                    "Animation -> Driver",
                    RelationFlags::CHECK_BEFORE_ADD,
                );
            }
            self.build_driver(id, driver);
        }
    }

    pub(crate) fn build_action(&mut self, action: IdKey) {
        if self.built.check_is_built_and_tag(action, BuildTag::Complete) {
            return;
        }
        let key = OperationKey::new(action, NodeType::Animation, OpCode::AnimationEval);
        if self.has_node(&key) {
            self.add_time_relation(&key, "TimeSrc -> Action");
        }
    }

    fn build_driver(&mut self, owner: IdKey, driver: &Driver) {
        let main = self.main;
        let driver_key = driver_key(owner, driver);
        let Some(owner_type) = main.id_type(owner) else {
            return;
        };
        let driven = PropertyPathQuery::new(owner, owner_type).resolve(&driver.rna_path, PathSide::Entry);
        if self.has_node(&driven) {
            self.add_relation(&driver_key, &driven, "Driver -> Driven Property", RelationFlags::empty());
        }
        for variable in &driver.variables {
            for target in &variable.targets {
                let source: NodeKey = match target {
                    DriverTarget::Transform {
                        object,
                        bone: Some(bone),
                    } => OperationKey::bone(*object, bone.as_str(), OpCode::BoneDone).into(),
                    DriverTarget::Transform { object, bone: None } => {
                        ComponentKey::new(*object, NodeType::Transform).into()
                    }
                    DriverTarget::Property { id, rna_path } => {
                        let Some(target_type) = main.id_type(*id) else {
                            continue;
                        };
                        PropertyPathQuery::new(*id, target_type).resolve(rna_path, PathSide::Exit)
                    }
                };
                // A driver reading the property it writes.
                if source == driven || source == NodeKey::Operation(driver_key.clone()) {
                    continue;
                }
                if !self.has_node(&source) {
                    trace!(%source, variable = %variable.name, "driver variable has no node");
                    continue;
                }
                self.add_relation(&source, &driver_key, "Target -> Driver", RelationFlags::empty());
            }
        }
        if driver.uses_time {
            self.add_time_relation(&driver_key, "TimeSrc -> Driver");
        }
    }

    /// Drivers writing elements of the same array run one after another,
    /// in element order.
    pub(crate) fn build_driver_relations(&mut self) {
        let main = self.main;
        let ids: Vec<IdKey> = self.graph.id_nodes().map(|(_, node)| node.id_orig()).collect();
        for id in ids {
            let Some(anim) = main.get(id).and_then(|data| data.anim.as_ref()) else {
                continue;
            };
            let mut groups: IndexMap<&str, Vec<&Driver>> = IndexMap::new();
            for driver in &anim.drivers {
                if driver.array_index >= 0 {
                    groups.entry(driver.rna_path.as_str()).or_default().push(driver);
                }
            }
            for (_, mut drivers) in groups {
                if drivers.len() < 2 {
                    continue;
                }
                drivers.sort_by_key(|driver| driver.array_index);
                for pair in drivers.windows(2) {
                    let previous = driver_key(id, pair[0]);
                    let next = driver_key(id, pair[1]);
                    if self.has_node(&previous) && self.has_node(&next) {
                        self.add_relation(&previous, &next, "Driver Serialization", RelationFlags::empty());
                    }
                }
            }
        }
    }

    // Scene

    pub(crate) fn build_view_layer(&mut self, scene: IdKey, layer_index: usize, linked_state: LinkedState) {
        let main = self.main;
        let Some(scene_data) = main.scene(scene) else {
            return;
        };
        if let Some(layer) = scene_data.view_layer(layer_index) {
            let mode = self.graph.mode();
            for base in &layer.bases {
                if self
                    .filter
                    .need_pull_base_into_graph(main, self.cache, base, mode)
                {
                    self.build_object(base.object);
                }
            }
        }
        if let Some(collection) = scene_data.master_collection {
            self.build_layer_collections(collection);
        }
        if let Some(camera) = scene_data.camera {
            self.build_object(camera);
        }
        if let Some(world) = scene_data.world {
            self.build_world(world);
        }
        if scene_data.compositor.is_some() {
            self.build_scene_compositor(scene);
        }
        if scene_data.rigid_body_world.is_some() {
            self.build_rigidbody(scene);
        }
        for cache_file in &scene_data.cache_files {
            self.build_cachefile(*cache_file);
        }
        self.build_scene_parameters(scene);
        self.build_animdata(scene);
        self.add_relation(
            &OperationKey::new(scene, NodeType::LayerCollections, OpCode::ViewLayerEval),
            &OperationKey::new(scene, NodeType::Parameters, OpCode::SceneEval),
            "View Layer -> Scene Eval",
            RelationFlags::empty(),
        );
        if linked_state == LinkedState::Directly {
            self.build_scene_audio(scene);
            self.build_scene_sequencer(scene);
        }
        if let Some(set) = scene_data.background_set {
            if set != scene {
                self.build_view_layer(set, 0, LinkedState::ViaSet);
            }
        }
    }

    fn build_layer_collections(&mut self, collection: IdKey) {
        if self.built.check_is_built_and_tag(collection, BuildTag::LayerCollection) {
            return;
        }
        self.build_collection(collection, None, true);
        let children = self
            .main
            .collection(collection)
            .map(|data| data.children.clone())
            .unwrap_or_default();
        for child in children {
            self.build_layer_collections(child);
        }
    }

    pub(crate) fn build_scene_render(&mut self, scene: IdKey) {
        let main = self.main;
        let Some(scene_data) = main.scene(scene) else {
            return;
        };
        self.build_animdata(scene);
        self.build_scene_parameters(scene);
        self.build_scene_audio(scene);
        if scene_data.use_compositing {
            self.build_scene_compositor(scene);
        }
        if scene_data.use_sequencer {
            self.build_scene_sequencer(scene);
        }
        if let Some(camera) = scene_data.camera {
            self.build_object(camera);
        }
    }

    pub(crate) fn build_scene_parameters(&mut self, scene: IdKey) {
        if self.built.check_is_built_and_tag(scene, BuildTag::SceneParameters) {
            return;
        }
        if self.id_node(scene).is_none() {
            return;
        }
        self.build_parameters(scene);
        if let Some(data) = self.main.get(scene) {
            self.build_idproperties(&data.properties);
        }
        self.add_relation(
            &OperationKey::new(scene, NodeType::Parameters, OpCode::ParametersExit),
            &OperationKey::new(scene, NodeType::Parameters, OpCode::SceneEval),
            "Parameters -> Scene Eval",
            RelationFlags::empty(),
        );
    }

    pub(crate) fn build_scene_compositor(&mut self, scene: IdKey) {
        if self.built.check_is_built_and_tag(scene, BuildTag::SceneCompositor) {
            return;
        }
        if let Some(tree) = self.main.scene(scene).and_then(|data| data.compositor) {
            self.build_nodetree(tree);
        }
    }

    pub(crate) fn build_scene_audio(&mut self, scene: IdKey) {
        if self.built.check_is_built_and_tag(scene, BuildTag::SceneAudio) {
            return;
        }
        let key = |opcode| OperationKey::new(scene, NodeType::Audio, opcode);
        let entry = key(OpCode::AudioEntry);
        if !self.has_node(&entry) {
            return;
        }
        let volume = key(OpCode::AudioVolume);
        self.add_relation(&entry, &volume, "Audio Entry -> Volume", RelationFlags::empty());
        self.add_relation(&volume, &key(OpCode::SoundEval), "Audio Volume -> Sound", RelationFlags::empty());
        let animated = self
            .main
            .scene(scene)
            .is_some_and(|data| data.audio_volume_animated);
        let animation = ComponentKey::new(scene, NodeType::Animation);
        if animated && self.has_node(&animation) {
            self.add_relation(&animation, &volume, "Animation -> Audio Volume", RelationFlags::empty());
        }
    }

    pub(crate) fn build_scene_sequencer(&mut self, scene: IdKey) {
        let main = self.main;
        let Some(strips) = main.scene(scene).and_then(|data| data.strips.as_ref()) else {
            return;
        };
        if self.built.check_is_built_and_tag(scene, BuildTag::SceneSequencer) {
            return;
        }
        self.build_scene_audio(scene);
        let sequencer = ComponentKey::new(scene, NodeType::Sequencer);
        let mut has_audio_strips = false;
        for strip in strips {
            self.build_idproperties(&strip.properties);
            if let Some(sound) = strip.sound {
                self.build_sound(sound);
                self.add_relation(
                    &ComponentKey::new(sound, NodeType::Audio),
                    &sequencer,
                    "Sound -> Sequencer",
                    RelationFlags::empty(),
                );
                has_audio_strips = true;
            }
            if let Some(strip_scene) = strip.scene {
                self.build_scene_parameters(strip_scene);
                self.add_relation(
                    &ComponentKey::new(strip_scene, NodeType::Parameters),
                    &sequencer,
                    "Sequence Scene -> Sequencer",
                    RelationFlags::empty(),
                );
            }
        }
        if has_audio_strips {
            self.add_relation(
                &sequencer,
                &ComponentKey::new(scene, NodeType::Audio),
                "Sequencer -> Audio",
                RelationFlags::empty(),
            );
        }
    }

    /// Rigid body world: rebuild on time changes, simulate, copy results
    /// to the active bodies.
    pub(crate) fn build_rigidbody(&mut self, scene: IdKey) {
        let main = self.main;
        let Some(world) = main.scene(scene).and_then(|data| data.rigid_body_world.as_ref()) else {
            return;
        };
        let rebuild = OperationKey::new(scene, NodeType::Transform, OpCode::RigidbodyRebuild);
        let sim = OperationKey::new(scene, NodeType::Transform, OpCode::RigidbodySim);
        self.add_time_relation(&rebuild, "TimeSrc -> Rigidbody Rebuild");
        self.add_relation(&rebuild, &sim, "Rigidbody Rebuild -> Sim", RelationFlags::GODMODE);

        if let Some(effectors) = world.effectors {
            for object in main.collection_objects_recursive(effectors) {
                let transform = ComponentKey::new(object, NodeType::Transform);
                if self.has_node(&transform) {
                    self.add_relation(&transform, &rebuild, "Effector -> Rigidbody Rebuild", RelationFlags::empty());
                }
            }
        }
        if let Some(collection) = world.collection {
            self.build_collection(collection, None, false);
            for object in main.collection_objects_recursive(collection) {
                let Some(data) = main.object(object) else {
                    continue;
                };
                let Some(body) = data.rigid_body else {
                    continue;
                };
                if data.kind != ObjectKind::Mesh || self.id_node(object).is_none() {
                    continue;
                }
                let key = |opcode| OperationKey::new(object, NodeType::Transform, opcode);
                self.add_relation(
                    &key(OpCode::TransformSimulationInit),
                    &sim,
                    "Object Transform -> Rigidbody Sim",
                    RelationFlags::empty(),
                );
                if body.uses_evaluated_geometry {
                    self.add_relation(
                        &ComponentKey::new(object, NodeType::Geometry),
                        &sim,
                        "Object Geometry -> Rigidbody Sim",
                        RelationFlags::GODMODE,
                    );
                }
                if body.kind == RigidBodyKind::Active {
                    let copy = key(OpCode::RigidbodyTransformCopy);
                    self.add_relation(&sim, &copy, "Rigidbody Sim -> Transform Copy", RelationFlags::empty());
                    self.add_relation(
                        &copy,
                        &key(OpCode::TransformFinal),
                        "Rigidbody Transform Copy -> Final",
                        RelationFlags::empty(),
                    );
                }
            }
        }
        if let Some(constraints) = world.constraints {
            self.build_collection(constraints, None, false);
            for object in main.collection_objects_recursive(constraints) {
                let transform = ComponentKey::new(object, NodeType::Transform);
                if self.has_node(&transform) {
                    self.add_relation(&transform, &sim, "Rigidbody Constraint -> Sim", RelationFlags::empty());
                }
            }
        }
    }

    // Collections

    /// Relations of a collection and, unless it comes from the view layer,
    /// of its members. With an `instancer`, the instancing object also
    /// depends on every visible member.
    pub(crate) fn build_collection(&mut self, collection: IdKey, instancer: Option<IdKey>, from_layer: bool) {
        let main = self.main;
        let Some(data) = main.collection(collection) else {
            return;
        };
        if self.id_node(collection).is_none() {
            return;
        }
        if from_layer {
            if let Some(id_data) = main.get(collection) {
                self.build_idproperties(&id_data.properties);
            }
        } else if !self.built.check_is_built_and_tag(collection, BuildTag::Complete) {
            if let Some(id_data) = main.get(collection) {
                self.build_idproperties(&id_data.properties);
            }
            let done = OperationKey::new(collection, NodeType::Geometry, OpCode::GeometryEvalDone);
            for object in &data.objects {
                if !self.filter.allows_object(*object) {
                    continue;
                }
                self.build_object(*object);
                if self.id_node(*object).is_none() {
                    continue;
                }
                self.add_relation(
                    &OperationKey::new(*object, NodeType::Transform, OpCode::TransformFinal),
                    &done,
                    "Collection Geometry",
                    RelationFlags::empty(),
                );
                let geometry = OperationKey::new(*object, NodeType::Geometry, OpCode::GeometryEval);
                if self.has_node(&geometry) {
                    self.add_relation(&geometry, &done, "Collection Geometry", RelationFlags::empty());
                }
                if let Some(instance) = main.object(*object).and_then(|data| data.instance_collection) {
                    let instance_done =
                        OperationKey::new(instance, NodeType::Geometry, OpCode::GeometryEvalDone);
                    if self.has_node(&instance_done) {
                        self.add_relation(&instance_done, &done, "Collection Geometry", RelationFlags::empty());
                    }
                }
            }
            for child in &data.children {
                self.build_collection(*child, None, false);
                let child_done = OperationKey::new(*child, NodeType::Geometry, OpCode::GeometryEvalDone);
                if self.has_node(&child_done) {
                    self.add_relation(&child_done, &done, "Collection Geometry", RelationFlags::empty());
                }
            }
        }
        if let Some(instancer) = instancer {
            self.build_collection_instancer(collection, instancer);
        }
    }

    fn build_collection_instancer(&mut self, collection: IdKey, instancer: IdKey) {
        let main = self.main;
        let mode = self.graph.mode();
        let transform_final = OperationKey::new(instancer, NodeType::Transform, OpCode::TransformFinal);
        let dupli = ComponentKey::new(instancer, NodeType::Dupli);
        for object in main.collection_objects_recursive(collection) {
            let Some(data) = main.object(object) else {
                continue;
            };
            if data.is_hidden(mode) || self.id_node(object).is_none() {
                continue;
            }
            let transform = ComponentKey::new(object, NodeType::Transform);
            self.add_relation(&transform, &transform_final, "Dupligroup", RelationFlags::empty());
            self.add_relation(&transform, &dupli, "Dupligroup", RelationFlags::empty());
            let geometry = ComponentKey::new(object, NodeType::Geometry);
            if self.has_node(&geometry) {
                self.add_relation(&geometry, &dupli, "Dupligroup", RelationFlags::empty());
            }
        }
    }

    // Objects

    pub(crate) fn build_object(&mut self, object: IdKey) {
        if self.built.check_is_built_and_tag(object, BuildTag::Complete) {
            return;
        }
        let main = self.main;
        let Some(data) = main.object(object) else {
            return;
        };
        let Some(id_index) = self.id_node(object) else {
            return;
        };
        self.build_object_from_layer(object, id_index);
        self.build_object_transform(object, data);
        let mut ids = Vec::new();
        for modifier in &data.modifiers {
            modifier.kind.foreach_id(&mut |id| ids.push(id));
        }
        for id in ids {
            self.build_id(id);
        }
        self.build_object_data(object, data);
        self.build_parameters(object);
        if let Some(id_data) = main.get(object) {
            self.build_idproperties(&id_data.properties);
        }
        self.build_animdata(object);
        self.build_particle_systems(object, data);
        if let Some(collection) = data.instance_collection {
            self.build_collection(collection, Some(object), false);
        }
        self.build_object_visibility(object);
    }

    fn build_object_from_layer(&mut self, object: IdKey, id_index: IdNodeIndex) {
        let key = |opcode| OperationKey::new(object, NodeType::ObjectFromLayer, opcode);
        let entry = key(OpCode::ObjectFromLayerEntry);
        let flags = key(OpCode::ObjectBaseFlags);
        let exit = key(OpCode::ObjectFromLayerExit);
        self.add_relation(&entry, &flags, "Base Flags", RelationFlags::empty());
        self.add_relation(&flags, &exit, "Base Flags", RelationFlags::empty());
        self.add_relation(
            &exit,
            &OperationKey::new(object, NodeType::Synchronization, OpCode::SynchronizeToOriginal),
            "Synchronize to Original",
            RelationFlags::empty(),
        );
        if self.graph.id_node(id_index).has_base() {
            let scene = self.graph.scene();
            let view_layer = OperationKey::new(scene, NodeType::LayerCollections, OpCode::ViewLayerEval);
            if self.has_node(&view_layer) {
                self.add_relation(&view_layer, &entry, "View Layer -> Base Flags", RelationFlags::empty());
            }
        }
    }

    /// Transform chain: init, local, parent, constraints, eval, simulation
    /// init, final.
    fn build_object_transform(&mut self, object: IdKey, data: &ObjectData) {
        let key = |opcode| OperationKey::new(object, NodeType::Transform, opcode);
        let local = key(OpCode::TransformLocal);
        self.add_relation(&key(OpCode::TransformInit), &local, "Transform Init", RelationFlags::empty());
        let mut last = local;
        if let Some(parent) = &data.parent {
            self.build_object(parent.object);
            self.build_object_parent(object, parent);
            let parent_key = key(OpCode::TransformParent);
            self.add_relation(&last, &parent_key, "ObLocal -> ObParent", RelationFlags::empty());
            last = parent_key;
        }
        let eval = key(OpCode::TransformEval);
        let from_layer = ComponentKey::new(object, NodeType::ObjectFromLayer);
        if data.constraints.is_empty() {
            self.add_relation(&from_layer, &eval, "Object From Layer -> Transform", RelationFlags::empty());
        } else {
            let constraints = key(OpCode::TransformConstraints);
            self.build_constraints(object, &constraints, &data.constraints, None);
            self.add_relation(&last, &constraints, "ObBase -> Constraint Stack", RelationFlags::empty());
            self.add_relation(
                &from_layer,
                &constraints,
                "Object From Layer -> Constraints",
                RelationFlags::empty(),
            );
            last = constraints;
        }
        let simulation_init = key(OpCode::TransformSimulationInit);
        let transform_final = key(OpCode::TransformFinal);
        self.add_relation(&last, &eval, "Transform Eval", RelationFlags::empty());
        self.add_relation(&eval, &simulation_init, "Transform Eval -> Simulation Init", RelationFlags::empty());
        self.add_relation(&simulation_init, &transform_final, "Simulation -> Final Transform", RelationFlags::empty());
        self.add_relation(
            &transform_final,
            &OperationKey::new(object, NodeType::Synchronization, OpCode::SynchronizeToOriginal),
            "Synchronize to Original",
            RelationFlags::empty(),
        );
    }

    fn build_object_parent(&mut self, object: IdKey, parent: &Parent) {
        let main = self.main;
        let parent_key = OperationKey::new(object, NodeType::Transform, OpCode::TransformParent);
        let parent_transform = ComponentKey::new(parent.object, NodeType::Transform);
        match &parent.kind {
            ParentKind::Object => {
                self.add_relation(&parent_transform, &parent_key, "Parent Transform", RelationFlags::empty());
                let is_curve = main
                    .object(parent.object)
                    .is_some_and(|data| data.kind == ObjectKind::Curve);
                let geometry = ComponentKey::new(parent.object, NodeType::Geometry);
                if is_curve && self.has_node(&geometry) {
                    self.add_relation(&geometry, &parent_key, "Curve Parent", RelationFlags::empty());
                    self.add_special_eval_flag(parent.object, EvalFlags::NEED_CURVE_PATH);
                }
            }
            ParentKind::Armature => {
                self.add_relation(&parent_transform, &parent_key, "Parent Armature Transform", RelationFlags::empty());
                let geometry = ComponentKey::new(object, NodeType::Geometry);
                if self.has_node(&geometry) {
                    self.add_relation(
                        &parent_transform,
                        &geometry,
                        "Parent Armature Transform -> Geometry",
                        RelationFlags::empty(),
                    );
                    let pose = ComponentKey::new(parent.object, NodeType::EvalPose);
                    if self.has_node(&pose) {
                        self.add_relation(&pose, &geometry, "Parent Armature Pose -> Geometry", RelationFlags::empty());
                    }
                    self.add_relation(
                        &OperationKey::new(object, NodeType::Transform, OpCode::TransformFinal),
                        &geometry,
                        "Virtual Armature Modifier",
                        RelationFlags::empty(),
                    );
                }
            }
            ParentKind::Bone(bone) => {
                self.add_relation(
                    &OperationKey::bone(parent.object, bone.as_str(), OpCode::BoneDone),
                    &parent_key,
                    "Bone Parent",
                    RelationFlags::empty(),
                );
                self.add_relation(&parent_transform, &parent_key, "Armature Parent", RelationFlags::empty());
            }
            ParentKind::Vertex => {
                self.add_relation(
                    &ComponentKey::new(parent.object, NodeType::Geometry),
                    &parent_key,
                    "Vertex Parent",
                    RelationFlags::empty(),
                );
                self.add_relation(&parent_transform, &parent_key, "Vertex Parent TFM", RelationFlags::empty());
                self.add_customdata_mask(parent.object, CustomDataMask::ORIGINAL_INDEX);
            }
        }
    }

    /// Targets of a constraint stack, evaluated by `stack_op`.
    ///
    /// For bone constraints `root_map` tells which bones of the same
    /// armature are solved in the same IK chain as `owner_bone`; those are
    /// read before the solver runs.
    pub(crate) fn build_constraints(
        &mut self,
        owner: IdKey,
        stack_op: &OperationKey,
        constraints: &[Constraint],
        root_map: Option<(&RootMap, &str)>,
    ) {
        let main = self.main;
        for constraint in constraints {
            match &constraint.kind {
                // Solved per chain by the pose.
                ConstraintKind::InverseKinematics { .. } | ConstraintKind::SplineIk { .. } => continue,
                ConstraintKind::FollowPath { curve } => {
                    if let Some(curve) = *curve {
                        self.build_id(curve);
                        self.add_relation(
                            &ComponentKey::new(curve, NodeType::Geometry),
                            stack_op,
                            &constraint.name,
                            RelationFlags::empty(),
                        );
                        self.add_relation(
                            &ComponentKey::new(curve, NodeType::Transform),
                            stack_op,
                            &constraint.name,
                            RelationFlags::empty(),
                        );
                        self.add_special_eval_flag(curve, EvalFlags::NEED_CURVE_PATH);
                    }
                }
                ConstraintKind::ShrinkWrap { target } => {
                    if let Some(target) = *target {
                        self.build_id(target);
                        let geometry = ComponentKey::new(target, NodeType::Geometry);
                        if self.has_node(&geometry) {
                            self.add_relation(&geometry, stack_op, &constraint.name, RelationFlags::empty());
                            self.add_special_eval_flag(target, EvalFlags::NEED_SHRINKWRAP_BOUNDARY);
                        }
                        self.add_relation(
                            &ComponentKey::new(target, NodeType::Transform),
                            stack_op,
                            &constraint.name,
                            RelationFlags::empty(),
                        );
                    }
                }
                kind => {
                    let mut targets = Vec::new();
                    kind.foreach_target(&mut |target| targets.push(target.clone()));
                    for target in targets {
                        self.build_id(target.object);
                        let target_kind = main.object(target.object).map(|data| data.kind);
                        match (target_kind, target.subtarget.as_deref()) {
                            (Some(ObjectKind::Armature), Some(bone)) => {
                                let same_chain = target.object == owner
                                    && root_map.is_some_and(|(map, owner_bone)| {
                                        map.has_common_root(owner_bone, bone)
                                    });
                                let opcode = if same_chain {
                                    OpCode::BoneReady
                                } else {
                                    OpCode::BoneDone
                                };
                                self.add_relation(
                                    &OperationKey::bone(target.object, bone, opcode),
                                    stack_op,
                                    &constraint.name,
                                    RelationFlags::empty(),
                                );
                            }
                            (Some(ObjectKind::Mesh | ObjectKind::Lattice), Some(_)) => {
                                self.add_relation(
                                    &ComponentKey::new(target.object, NodeType::Geometry),
                                    stack_op,
                                    &constraint.name,
                                    RelationFlags::empty(),
                                );
                                self.add_relation(
                                    &ComponentKey::new(target.object, NodeType::Transform),
                                    stack_op,
                                    &constraint.name,
                                    RelationFlags::empty(),
                                );
                                self.add_customdata_mask(target.object, CustomDataMask::DEFORM_VERT);
                            }
                            _ if target.object == owner => {}
                            _ => {
                                self.add_relation(
                                    &ComponentKey::new(target.object, NodeType::Transform),
                                    stack_op,
                                    &constraint.name,
                                    RelationFlags::empty(),
                                );
                            }
                        }
                    }
                }
            }
            if constraint.kind.depends_on_time() {
                self.add_time_relation(stack_op, "TimeSrc -> Constraint");
            }
        }
    }

    fn build_object_visibility(&mut self, object: IdKey) {
        let visibility = OperationKey::new(object, NodeType::Visibility, OpCode::Visibility);
        self.add_relation(
            &OperationKey::new(object, NodeType::Visibility, OpCode::Operation),
            &visibility,
            "Visibility Entry",
            RelationFlags::empty(),
        );
        self.add_relation(
            &ComponentKey::new(object, NodeType::ObjectFromLayer),
            &visibility,
            "Object From Layer -> Visibility",
            RelationFlags::empty(),
        );
    }

    fn build_object_data(&mut self, object: IdKey, data: &ObjectData) {
        let Some(object_data) = data.data else {
            return;
        };
        let object_parameters = ComponentKey::new(object, NodeType::Parameters);
        match data.kind {
            kind if kind.has_geometry() => self.build_object_data_geometry(object, data),
            ObjectKind::Armature => self.build_rig(object, data),
            ObjectKind::Camera => {
                self.build_camera(object_data);
                self.add_relation(
                    &ComponentKey::new(object_data, NodeType::Parameters),
                    &object_parameters,
                    "Camera -> Object",
                    RelationFlags::empty(),
                );
            }
            ObjectKind::Light => {
                self.build_light(object_data);
                self.add_relation(
                    &ComponentKey::new(object_data, NodeType::Parameters),
                    &object_parameters,
                    "Light -> Object",
                    RelationFlags::empty(),
                );
            }
            ObjectKind::Speaker => {
                self.build_speaker(object_data);
                self.add_relation(
                    &ComponentKey::new(object_data, NodeType::Audio),
                    &object_parameters,
                    "Speaker -> Object",
                    RelationFlags::empty(),
                );
            }
            _ => self.build_id(object_data),
        }
        self.build_materials(&data.materials);
    }

    /// Geometry of an object: base data, modifier stack, materials.
    fn build_object_data_geometry(&mut self, object: IdKey, data: &ObjectData) {
        let key = |opcode| OperationKey::new(object, NodeType::Geometry, opcode);
        let init = key(OpCode::GeometryEvalInit);
        let eval = key(OpCode::GeometryEval);
        if let Some(geometry) = data.data {
            self.build_object_data_geometry_datablock(geometry);
            self.add_relation(
                &ComponentKey::new(geometry, NodeType::Geometry),
                &init,
                "Object Geometry Base Data",
                RelationFlags::empty(),
            );
        }
        let scene_eval = OperationKey::new(self.graph.scene(), NodeType::Parameters, OpCode::SceneEval);
        if self.has_node(&scene_eval) {
            self.add_relation(
                &scene_eval,
                &eval,
                "Scene -> Geometry",
                RelationFlags::NO_FLUSH | RelationFlags::GODMODE,
            );
        }

        let mut previous = init;
        for modifier in &data.modifiers {
            let modifier_key = key(OpCode::Modifier).with_name(modifier.name.as_str());
            self.add_relation(&previous, &modifier_key, "Modifier Stack", RelationFlags::empty());
            self.build_modifier(modifier, &modifier_key);
            if modifier.kind.depends_on_time() {
                self.add_time_relation(&modifier_key, "Time Source -> Modifier");
            }
            previous = modifier_key;
        }
        self.add_relation(&previous, &eval, "Geometry Init -> Eval", RelationFlags::empty());
        if !data.modifiers.is_empty() {
            let visibility = key(OpCode::Visibility);
            self.add_relation(
                &visibility,
                &ComponentKey::new(object, NodeType::Visibility),
                "Modifiers Visibility",
                RelationFlags::NO_VISIBILITY_CHANGE,
            );
            self.add_relation(&visibility, &eval, "Modifiers Visibility -> Geometry", RelationFlags::empty());
        }
        for material in &data.materials {
            let shading = ComponentKey::new(*material, NodeType::Shading);
            if self.has_node(&shading) {
                self.add_relation(&shading, &eval, "Material -> Geometry", RelationFlags::empty());
            }
        }

        let geometry = ComponentKey::new(object, NodeType::Geometry);
        let dimensions = OperationKey::new(object, NodeType::Parameters, OpCode::Dimensions);
        self.add_relation(&geometry, &dimensions, "Geometry -> Dimensions", RelationFlags::empty());
        self.add_relation(
            &ComponentKey::new(object, NodeType::Transform),
            &dimensions,
            "Transform -> Dimensions",
            RelationFlags::empty(),
        );
        self.add_relation(
            &geometry,
            &OperationKey::new(object, NodeType::Synchronization, OpCode::SynchronizeToOriginal),
            "Synchronize to Original",
            RelationFlags::empty(),
        );
        self.build_object_pointcache(object, data);
    }

    /// What one modifier reads, declared through a handle bound to its
    /// operation.
    fn build_modifier(&mut self, modifier: &Modifier, modifier_key: &OperationKey) {
        let description = modifier.name.as_str();
        let mut handle = NodeHandle::new(self, modifier_key.clone());
        match &modifier.kind {
            ModifierKind::Armature { object: Some(armature) } => {
                handle.add_object_relation(*armature, NodeType::EvalPose, description);
                handle.add_object_relation(*armature, NodeType::Transform, description);
                handle.add_modifier_to_transform_relation(description);
            }
            ModifierKind::Hook {
                object: Some(target),
                subtarget,
            } => {
                match subtarget {
                    Some(bone) => handle.add_bone_relation(*target, bone, description),
                    None => handle.add_object_relation(*target, NodeType::Transform, description),
                }
                handle.add_modifier_to_transform_relation(description);
            }
            ModifierKind::CurveDeform { object: Some(curve) } => {
                handle.add_object_relation(*curve, NodeType::Transform, description);
                handle.add_object_relation(*curve, NodeType::Geometry, description);
                handle.add_special_eval_flag(*curve, EvalFlags::NEED_CURVE_PATH);
                handle.add_modifier_to_transform_relation(description);
            }
            ModifierKind::Boolean {
                operand: Some(BooleanOperand::Object(operand)),
            } => {
                handle.add_object_relation(*operand, NodeType::Transform, description);
                handle.add_object_relation(*operand, NodeType::Geometry, description);
                handle.add_modifier_to_transform_relation(description);
            }
            ModifierKind::Boolean {
                operand: Some(BooleanOperand::Collection(collection)),
            } => {
                handle.add_collection_geometry_relation(*collection, description);
                handle.add_modifier_to_transform_relation(description);
            }
            ModifierKind::Nodes { node_tree: Some(tree) } => {
                handle.add_node_tree_output_relation(*tree, description);
            }
            ModifierKind::Cloth | ModifierKind::DynamicPaint => {
                let object = handle.id();
                handle.add_object_pointcache_relation(object, NodeType::Transform, description);
            }
            ModifierKind::External(deps) => deps.update_depsgraph(&mut handle),
            _ => {}
        }
    }

    /// Mesh, curve, metaball or lattice data.
    pub(crate) fn build_object_data_geometry_datablock(&mut self, id: IdKey) {
        if self.built.check_is_built_and_tag(id, BuildTag::Complete) {
            return;
        }
        let main = self.main;
        let Some(id_data) = main.get(id) else {
            return;
        };
        let Some(geometry) = id_data.as_geometry() else {
            return;
        };
        if self.id_node(id).is_none() {
            return;
        }
        self.build_idproperties(&id_data.properties);
        self.build_animdata(id);
        self.build_parameters(id);
        let eval = OperationKey::new(id, NodeType::Geometry, OpCode::GeometryEval);
        self.add_relation(
            &eval,
            &OperationKey::new(id, NodeType::Geometry, OpCode::GeometryEvalDone),
            "Geometry Eval -> Done",
            RelationFlags::empty(),
        );
        self.add_relation(
            &ComponentKey::new(id, NodeType::Parameters),
            &eval,
            "Parameters -> Geometry",
            RelationFlags::empty(),
        );
        if let Some(key) = geometry.shape_key {
            self.build_shapekeys(key);
            self.add_relation(
                &ComponentKey::new(key, NodeType::Geometry),
                &eval,
                "Shapekeys",
                RelationFlags::empty(),
            );
        }
        if let Some(bevel) = geometry.bevel_object {
            self.build_object(bevel);
            let bevel_geometry = ComponentKey::new(bevel, NodeType::Geometry);
            if self.has_node(&bevel_geometry) {
                self.add_relation(&bevel_geometry, &eval, "Curve Bevel Geometry", RelationFlags::empty());
            }
            self.add_relation(
                &ComponentKey::new(bevel, NodeType::Transform),
                &eval,
                "Curve Bevel Transform",
                RelationFlags::empty(),
            );
        }
        self.build_materials(&geometry.materials);
    }

    fn build_object_pointcache(&mut self, object: IdKey, data: &ObjectData) {
        let point_cache = ComponentKey::new(object, NodeType::PointCache);
        if !self.has_node(&point_cache) {
            return;
        }
        let transform = |opcode| OperationKey::new(object, NodeType::Transform, opcode);
        if data.rigid_body.is_some() {
            self.add_relation(
                &point_cache,
                &transform(OpCode::TransformSimulationInit),
                "Point Cache -> Rigid Body",
                RelationFlags::empty(),
            );
            let rebuild = OperationKey::new(self.graph.scene(), NodeType::Transform, OpCode::RigidbodyRebuild);
            if self.has_node(&rebuild) {
                self.add_relation(
                    &rebuild,
                    &point_cache,
                    "Rigid Body Rebuild -> Point Cache Reset",
                    RelationFlags::FLUSH_USER_EDIT_ONLY,
                );
            }
        }
        let geometry_eval = OperationKey::new(object, NodeType::Geometry, OpCode::GeometryEval);
        let simulates_geometry = !data.particle_systems.is_empty()
            || data.modifiers.iter().any(|modifier| modifier.kind.has_point_cache());
        if simulates_geometry && self.has_node(&geometry_eval) {
            self.add_relation(&point_cache, &geometry_eval, "Point Cache -> Geometry", RelationFlags::empty());
        }
        self.add_relation(
            &transform(OpCode::TransformEval),
            &point_cache,
            "Transform -> Point Cache",
            RelationFlags::FLUSH_USER_EDIT_ONLY,
        );
        let geometry_init = OperationKey::new(object, NodeType::Geometry, OpCode::GeometryEvalInit);
        if self.has_node(&geometry_init) {
            self.add_relation(
                &geometry_init,
                &point_cache,
                "Geometry Init -> Point Cache",
                RelationFlags::FLUSH_USER_EDIT_ONLY,
            );
        }
    }

    // Particles

    fn build_particle_systems(&mut self, object: IdKey, data: &ObjectData) {
        if data.particle_systems.is_empty() {
            return;
        }
        let main = self.main;
        let key = |opcode| OperationKey::new(object, NodeType::ParticleSystem, opcode);
        let init = key(OpCode::ParticleSystemInit);
        let done = key(OpCode::ParticleSystemDone);
        let geometry_eval = OperationKey::new(object, NodeType::Geometry, OpCode::GeometryEval);
        let has_geometry = self.has_node(&geometry_eval);
        for system in &data.particle_systems {
            let psys = key(OpCode::ParticleSystemEval).with_name(system.name.as_str());
            self.build_particle_settings(system.settings);
            self.add_relation(
                &OperationKey::new(system.settings, NodeType::ParticleSettings, OpCode::ParticleSettingsEval),
                &psys,
                "Particle Settings -> Particle System",
                RelationFlags::empty(),
            );
            self.add_relation(&init, &psys, "Init -> Particle System", RelationFlags::empty());
            self.add_relation(&psys, &done, "Particle System -> Done", RelationFlags::empty());
            if has_geometry {
                self.add_relation(&psys, &geometry_eval, "Particle System -> Geometry", RelationFlags::empty());
            }
            self.add_time_relation(&psys, "TimeSrc -> Particle System");

            let Some(IdPayload::ParticleSettings(settings)) =
                main.get(system.settings).map(|data| &data.payload)
            else {
                continue;
            };
            for (collection, description) in [
                (settings.effector_collection, "Particle Field"),
                (settings.collision_collection, "Particle Collision"),
            ] {
                let Some(collection) = collection else {
                    continue;
                };
                for member in main.collection_objects_recursive(collection) {
                    if member == object {
                        continue;
                    }
                    self.add_object_dependency(member, &psys, description);
                }
            }
            if let Some(instance) = settings.instance_object {
                self.build_object(instance);
                self.add_relation(
                    &ComponentKey::new(instance, NodeType::Transform),
                    &psys,
                    "Particle Instance Object",
                    RelationFlags::empty(),
                );
            }
            if let Some(collection) = settings.instance_collection {
                self.build_collection(collection, None, false);
                for member in main.collection_objects_recursive(collection) {
                    let transform = ComponentKey::new(member, NodeType::Transform);
                    if self.has_node(&transform) {
                        self.add_relation(&transform, &psys, "Particle Instance Collection", RelationFlags::empty());
                    }
                }
            }
        }
        if has_geometry {
            self.add_relation(
                &OperationKey::new(object, NodeType::Transform, OpCode::TransformFinal),
                &geometry_eval,
                "Particle Eval",
                RelationFlags::empty(),
            );
        }
        let point_cache = ComponentKey::new(object, NodeType::PointCache);
        if self.has_node(&point_cache) {
            self.add_relation(
                &ComponentKey::new(object, NodeType::ParticleSystem),
                &point_cache,
                "Particle Point Cache",
                RelationFlags::FLUSH_USER_EDIT_ONLY,
            );
        }
    }

    /// Transform and, when present, geometry of an object feed `to`.
    fn add_object_dependency(&mut self, object: IdKey, to: &OperationKey, description: &str) {
        let transform = ComponentKey::new(object, NodeType::Transform);
        if !self.has_node(&transform) {
            return;
        }
        self.add_relation(&transform, to, description, RelationFlags::empty());
        let geometry = ComponentKey::new(object, NodeType::Geometry);
        if self.has_node(&geometry) {
            self.add_relation(&geometry, to, description, RelationFlags::empty());
        }
    }

    pub(crate) fn build_particle_settings(&mut self, settings: IdKey) {
        if self.built.check_is_built_and_tag(settings, BuildTag::Complete) {
            return;
        }
        let main = self.main;
        let Some(IdPayload::ParticleSettings(data)) = main.get(settings).map(|data| &data.payload) else {
            return;
        };
        if self.id_node(settings).is_none() {
            return;
        }
        self.build_animdata(settings);
        self.build_parameters(settings);
        let key = |opcode| OperationKey::new(settings, NodeType::ParticleSettings, opcode);
        let eval = key(OpCode::ParticleSettingsEval);
        let reset = key(OpCode::ParticleSettingsReset);
        self.add_relation(&key(OpCode::ParticleSettingsInit), &eval, "Particle Settings Init Order", RelationFlags::empty());
        self.add_relation(&reset, &eval, "Particle Settings Reset", RelationFlags::empty());
        let animation = ComponentKey::new(settings, NodeType::Animation);
        if self.has_node(&animation) {
            self.add_relation(&animation, &eval, "Particle Settings Animation", RelationFlags::empty());
        }
        for texture in &data.textures {
            self.build_texture(*texture);
            self.add_relation(
                &ComponentKey::new(*texture, NodeType::GenericDatablock),
                &reset,
                "Particle Texture",
                RelationFlags::FLUSH_USER_EDIT_ONLY,
            );
        }
        if let Some(collection) = data.effector_collection {
            self.build_collection(collection, None, false);
        }
        if let Some(collection) = data.collision_collection {
            self.build_collection(collection, None, false);
        }
    }

    // Object data and shading

    pub(crate) fn build_materials(&mut self, materials: &[IdKey]) {
        for material in materials {
            self.build_material(*material);
        }
    }

    fn build_shading(&mut self, id: IdKey, node_type: NodeType, opcode: OpCode) {
        if self.built.check_is_built_and_tag(id, BuildTag::Complete) {
            return;
        }
        if self.id_node(id).is_none() {
            return;
        }
        self.build_common(id);
        let update = OperationKey::new(id, node_type, opcode);
        self.add_relation(
            &ComponentKey::new(id, NodeType::Parameters),
            &update,
            "Parameters -> Shading Update",
            RelationFlags::empty(),
        );
        if let Some(tree) = self.main.get(id).and_then(|data| data.payload.node_tree()) {
            self.build_nodetree(tree);
            self.add_relation(
                &OperationKey::new(tree, NodeType::NtreeOutput, OpCode::NtreeOutput),
                &update,
                "Node Tree -> Shading Update",
                RelationFlags::empty(),
            );
        }
    }

    pub(crate) fn build_material(&mut self, material: IdKey) {
        self.build_shading(material, NodeType::Shading, OpCode::MaterialUpdate);
    }

    pub(crate) fn build_light(&mut self, light: IdKey) {
        self.build_shading(light, NodeType::Shading, OpCode::LightUpdate);
    }

    pub(crate) fn build_world(&mut self, world: IdKey) {
        self.build_shading(world, NodeType::Shading, OpCode::WorldUpdate);
    }

    pub(crate) fn build_texture(&mut self, texture: IdKey) {
        self.build_shading(texture, NodeType::GenericDatablock, OpCode::GenericDatablockUpdate);
        if let Some(IdPayload::Texture(data)) = self.main.get(texture).map(|data| &data.payload) {
            if let Some(image) = data.image {
                self.build_image(image);
                self.add_relation(
                    &ComponentKey::new(image, NodeType::GenericDatablock),
                    &OperationKey::new(texture, NodeType::GenericDatablock, OpCode::GenericDatablockUpdate),
                    "Image -> Texture",
                    RelationFlags::CHECK_BEFORE_ADD,
                );
            }
        }
    }

    pub(crate) fn build_image(&mut self, image: IdKey) {
        if self.built.check_is_built_and_tag(image, BuildTag::Complete) {
            return;
        }
        if self.id_node(image).is_none() {
            return;
        }
        self.build_parameters(image);
        self.add_relation(
            &ComponentKey::new(image, NodeType::Parameters),
            &OperationKey::new(image, NodeType::GenericDatablock, OpCode::GenericDatablockUpdate),
            "Image Parameters -> Update",
            RelationFlags::empty(),
        );
    }

    pub(crate) fn build_nodetree(&mut self, tree: IdKey) {
        if self.built.check_is_built_and_tag(tree, BuildTag::Complete) {
            return;
        }
        let main = self.main;
        let Some(data) = main.node_tree(tree) else {
            return;
        };
        if self.id_node(tree).is_none() {
            return;
        }
        self.build_common(tree);
        let shading = OperationKey::new(tree, NodeType::Shading, OpCode::MaterialUpdate);
        self.add_relation(
            &ComponentKey::new(tree, NodeType::Parameters),
            &shading,
            "Node Tree Parameters",
            RelationFlags::empty(),
        );
        self.add_relation(
            &shading,
            &OperationKey::new(tree, NodeType::NtreeOutput, OpCode::NtreeOutput),
            "Shading Update -> Output",
            RelationFlags::empty(),
        );
        for node in &data.nodes {
            self.build_idproperties(&node.properties);
            for id in &node.socket_ids {
                self.build_nodetree_id(tree, *id, &shading);
            }
            if let Some(id) = node.id {
                self.build_nodetree_id(tree, id, &shading);
            }
        }
    }

    fn build_nodetree_id(&mut self, tree: IdKey, id: IdKey, shading: &OperationKey) {
        let main = self.main;
        let source: Option<NodeKey> = match main.id_type(id) {
            Some(IdType::Material) => {
                self.build_material(id);
                Some(ComponentKey::new(id, NodeType::Shading).into())
            }
            Some(IdType::Texture) | Some(IdType::Image) => {
                self.build_id(id);
                Some(ComponentKey::new(id, NodeType::GenericDatablock).into())
            }
            Some(IdType::Object) => {
                self.build_object(id);
                let geometry = ComponentKey::new(id, NodeType::Geometry);
                if self.has_node(&geometry) {
                    self.add_relation(&geometry, shading, "Object Geometry -> Node", RelationFlags::CHECK_BEFORE_ADD);
                }
                Some(ComponentKey::new(id, NodeType::Transform).into())
            }
            Some(IdType::Scene) => {
                self.build_scene_parameters(id);
                if let Some(camera) = main.scene(id).and_then(|scene| scene.camera) {
                    self.build_object(camera);
                    self.add_relation(
                        &ComponentKey::new(camera, NodeType::Transform),
                        shading,
                        "Scene Camera -> Node",
                        RelationFlags::CHECK_BEFORE_ADD,
                    );
                }
                Some(ComponentKey::new(id, NodeType::Parameters).into())
            }
            Some(IdType::Collection) => {
                self.build_collection(id, None, false);
                Some(OperationKey::new(id, NodeType::Geometry, OpCode::GeometryEvalDone).into())
            }
            Some(IdType::NodeTree) => {
                self.build_nodetree(id);
                (id != tree).then(|| OperationKey::new(id, NodeType::NtreeOutput, OpCode::NtreeOutput).into())
            }
            Some(IdType::Text) | None => None,
            Some(_) => {
                self.build_id(id);
                None
            }
        };
        if let Some(source) = source {
            if self.has_node(&source) {
                self.add_relation(&source, shading, "Node Data -> Shading", RelationFlags::CHECK_BEFORE_ADD);
            }
        }
    }

    pub(crate) fn build_camera(&mut self, camera: IdKey) {
        if self.built.check_is_built_and_tag(camera, BuildTag::Complete) {
            return;
        }
        if self.id_node(camera).is_none() {
            return;
        }
        self.build_common(camera);
        if let Some(IdPayload::Camera(data)) = self.main.get(camera).map(|data| &data.payload) {
            if let Some(focus) = data.dof_object {
                self.build_object(focus);
                self.add_relation(
                    &ComponentKey::new(focus, NodeType::Transform),
                    &ComponentKey::new(camera, NodeType::Parameters),
                    "Camera DOF",
                    RelationFlags::empty(),
                );
            }
        }
    }

    pub(crate) fn build_speaker(&mut self, speaker: IdKey) {
        if self.built.check_is_built_and_tag(speaker, BuildTag::Complete) {
            return;
        }
        if self.id_node(speaker).is_none() {
            return;
        }
        self.build_common(speaker);
        let eval = OperationKey::new(speaker, NodeType::Audio, OpCode::SpeakerEval);
        self.add_relation(
            &ComponentKey::new(speaker, NodeType::Parameters),
            &eval,
            "Speaker Parameters",
            RelationFlags::empty(),
        );
        if let Some(IdPayload::Speaker(data)) = self.main.get(speaker).map(|data| &data.payload) {
            if let Some(sound) = data.sound {
                self.build_sound(sound);
                self.add_relation(
                    &ComponentKey::new(sound, NodeType::Audio),
                    &eval,
                    "Sound -> Speaker",
                    RelationFlags::empty(),
                );
            }
        }
    }

    pub(crate) fn build_sound(&mut self, sound: IdKey) {
        if self.built.check_is_built_and_tag(sound, BuildTag::Complete) {
            return;
        }
        if self.id_node(sound).is_none() {
            return;
        }
        self.build_common(sound);
        self.add_relation(
            &ComponentKey::new(sound, NodeType::Parameters),
            &OperationKey::new(sound, NodeType::Audio, OpCode::SoundEval),
            "Sound Parameters",
            RelationFlags::empty(),
        );
    }

    pub(crate) fn build_cachefile(&mut self, cache_file: IdKey) {
        if self.built.check_is_built_and_tag(cache_file, BuildTag::Complete) {
            return;
        }
        if self.id_node(cache_file).is_none() {
            return;
        }
        self.build_common(cache_file);
        let update = OperationKey::new(cache_file, NodeType::Cache, OpCode::FileCacheUpdate);
        self.add_relation(
            &ComponentKey::new(cache_file, NodeType::Parameters),
            &update,
            "Cache File Parameters",
            RelationFlags::empty(),
        );
        let animation = ComponentKey::new(cache_file, NodeType::Animation);
        if self.has_node(&animation) {
            self.add_relation(&animation, &update, "Cache File Animation", RelationFlags::empty());
        }
        self.add_time_relation(&update, "TimeSrc -> Cache File");
    }

    pub(crate) fn build_armature(&mut self, armature: IdKey) {
        if self.built.check_is_built_and_tag(armature, BuildTag::Complete) {
            return;
        }
        if self.id_node(armature).is_none() {
            return;
        }
        self.build_common(armature);
        self.add_relation(
            &ComponentKey::new(armature, NodeType::Parameters),
            &OperationKey::new(armature, NodeType::Armature, OpCode::ArmatureEval),
            "Armature Parameters",
            RelationFlags::empty(),
        );
    }

    pub(crate) fn build_shapekeys(&mut self, key: IdKey) {
        if self.built.check_is_built_and_tag(key, BuildTag::Complete) {
            return;
        }
        let main = self.main;
        let Some(IdPayload::ShapeKey(data)) = main.get(key).map(|data| &data.payload) else {
            return;
        };
        if self.id_node(key).is_none() {
            return;
        }
        self.build_common(key);
        let shapekey = OperationKey::new(key, NodeType::Geometry, OpCode::GeometryShapekey);
        for block in &data.blocks {
            self.add_relation(
                &OperationKey::new(key, NodeType::Parameters, OpCode::ParametersEval).with_name(block.as_str()),
                &shapekey,
                "Key Block Properties",
                RelationFlags::empty(),
            );
        }
        self.add_relation(
            &ComponentKey::new(key, NodeType::Parameters),
            &shapekey,
            "Shapekey Parameters",
            RelationFlags::empty(),
        );
    }

    // Copy-on-write

    /// Every component of an id waits for the evaluated copy of the id.
    ///
    /// Relations go to each component's entry and to every operation with
    /// no predecessor in its own component.
    pub(crate) fn build_copy_on_write_relations(&mut self) {
        let ids: Vec<IdNodeIndex> = self.graph.id_nodes().map(|(index, _)| index).collect();
        for id_index in ids {
            self.build_copy_on_write_relations_for(id_index);
        }
    }

    fn build_copy_on_write_relations_for(&mut self, id_index: IdNodeIndex) {
        let node = self.graph.id_node(id_index);
        let id = node.id_orig();
        let id_type = node.id_type();
        let Some(cow_component) = node.find_component(NodeType::CopyOnWrite, "") else {
            return;
        };
        let Some(cow_op) = self.graph.component(cow_component).exit_operation() else {
            return;
        };
        let components: Vec<ComponentIndex> = node.components().collect();
        for component in components {
            if component == cow_component {
                continue;
            }
            let node_type = self.graph.component(component).node_type();
            let mut flags = RelationFlags::NO_FLUSH | RelationFlags::GODMODE;
            let flushes = matches!(node_type, NodeType::Parameters | NodeType::LayerCollections)
                || (node_type == NodeType::Geometry && id_type.is_geometry_data())
                || (node_type == NodeType::Cache && id_type == IdType::CacheFile)
                || id_type == IdType::Sound;
            if flushes {
                flags.remove(RelationFlags::NO_FLUSH);
            }
            for target in self.copy_on_write_targets(component) {
                self.graph
                    .add_relation(NodeRef::Operation(cow_op), target, "Copy-on-Write Dependency", flags);
            }
        }

        let main = self.main;
        if let Some(data) = main.object(id).and_then(|object| object.data) {
            let data_cow = OperationKey::new(data, NodeType::CopyOnWrite, OpCode::CopyOnWrite);
            if self.has_node(&data_cow) {
                self.add_relation(
                    &data_cow,
                    &OperationKey::new(id, NodeType::CopyOnWrite, OpCode::CopyOnWrite),
                    "Object Data CoW -> Object CoW",
                    RelationFlags::GODMODE,
                );
            }
        }
    }

    /// Entry of the component plus operations with no predecessor inside
    /// the component.
    fn copy_on_write_targets(&self, component: ComponentIndex) -> Vec<OperationIndex> {
        let graph: &Depsgraph = self.graph;
        let comp = graph.component(component);
        let entry = comp.entry_operation();
        let mut targets: Vec<OperationIndex> = entry.into_iter().collect();
        for op in comp.operations() {
            if Some(op) == entry {
                continue;
            }
            let has_same_component_parent = graph
                .operation(op)
                .inlinks()
                .iter()
                .filter_map(|link| graph.relation(*link))
                .filter_map(|relation| relation.from_operation())
                .any(|from| graph.operation(from).owner() == component);
            if !has_same_component_parent {
                targets.push(op);
            }
        }
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::NodeBuilder;
    use crate::config::EvaluationMode;
    use crate::scene::{
        ActionData, Base, CollectionData, ConstraintTarget, FCurve, GeometryData, IdData,
        SceneData, ViewLayer,
    };

    fn scene_with(main: &mut Main, objects: &[IdKey]) -> IdKey {
        let mut layer = ViewLayer::new("ViewLayer");
        layer.bases.extend(objects.iter().map(|object| Base::new(*object)));
        main.add(IdData::new(
            "SCScene",
            IdPayload::Scene(SceneData {
                view_layers: vec![layer],
                ..Default::default()
            }),
        ))
    }

    fn build(main: &Main, graph: &mut Depsgraph) {
        let cache = BuilderCache::new();
        let scene = graph.scene();
        let mut nodes = NodeBuilder::new(main, graph, &cache, BaseFilter::Enabled);
        nodes.begin_build();
        nodes.build_view_layer(scene, 0, LinkedState::Directly).unwrap();
        nodes.end_build();
        let mut relations = RelationBuilder::new(main, graph, &cache, BaseFilter::Enabled);
        relations.build_view_layer(scene, 0, LinkedState::Directly);
        relations.build_driver_relations();
        relations.build_copy_on_write_relations();
    }

    fn op(graph: &Depsgraph, id: IdKey, node_type: NodeType, opcode: OpCode) -> OperationIndex {
        graph.find_operation(id, node_type, "", opcode, "", -1).unwrap()
    }

    fn has_relation(graph: &Depsgraph, from: OperationIndex, to: OperationIndex) -> bool {
        graph
            .operation(to)
            .inlinks()
            .iter()
            .filter_map(|link| graph.relation(*link))
            .any(|relation| relation.from_operation() == Some(from))
    }

    #[test]
    fn transform_chain_and_parent() {
        let mut main = Main::new();
        let parent = main.add(IdData::new("OBParent", IdPayload::Object(ObjectData::default())));
        let mut data = ObjectData::default();
        data.parent = Some(Parent {
            object: parent,
            kind: ParentKind::Object,
        });
        let child = main.add(IdData::new("OBChild", IdPayload::Object(data)));
        let scene = scene_with(&mut main, &[child, parent]);
        let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
        build(&main, &mut graph);

        let local = op(&graph, child, NodeType::Transform, OpCode::TransformLocal);
        let parent_op = op(&graph, child, NodeType::Transform, OpCode::TransformParent);
        let transform_final = op(&graph, child, NodeType::Transform, OpCode::TransformFinal);
        assert!(has_relation(&graph, local, parent_op));
        assert!(graph.is_reachable(local, transform_final));
        let parent_final = op(&graph, parent, NodeType::Transform, OpCode::TransformFinal);
        assert!(has_relation(&graph, parent_final, parent_op));
        // Parent transform feeds the child, never the other way around.
        assert!(!graph.is_reachable(transform_final, parent_final));
    }

    #[test]
    fn copy_on_write_precedes_components() {
        let mut main = Main::new();
        let mesh = main.add(IdData::new(
            "MECube",
            IdPayload::Geometry(IdType::Mesh, GeometryData::default()),
        ));
        let object = main.add(IdData::new(
            "OBCube",
            IdPayload::Object(ObjectData::new(ObjectKind::Mesh, Some(mesh))),
        ));
        let scene = scene_with(&mut main, &[object]);
        let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
        build(&main, &mut graph);

        let cow = op(&graph, object, NodeType::CopyOnWrite, OpCode::CopyOnWrite);
        for (node_type, opcode) in [
            (NodeType::Transform, OpCode::TransformInit),
            (NodeType::Geometry, OpCode::GeometryEvalInit),
            (NodeType::Parameters, OpCode::ParametersEntry),
        ] {
            let target = op(&graph, object, node_type, opcode);
            let relation = graph
                .operation(target)
                .inlinks()
                .iter()
                .filter_map(|link| graph.relation(*link))
                .find(|relation| relation.from_operation() == Some(cow))
                .unwrap();
            assert!(relation.flags().contains(RelationFlags::GODMODE));
            let flushes = node_type == NodeType::Parameters;
            assert_eq!(!relation.flags().contains(RelationFlags::NO_FLUSH), flushes);
        }
        let mesh_cow = op(&graph, mesh, NodeType::CopyOnWrite, OpCode::CopyOnWrite);
        assert!(has_relation(&graph, mesh_cow, cow));
        let mesh_eval = op(&graph, mesh, NodeType::Geometry, OpCode::GeometryEval);
        let object_init = op(&graph, object, NodeType::Geometry, OpCode::GeometryEvalInit);
        assert!(graph.is_reachable(mesh_eval, object_init));
    }

    #[test]
    fn animation_and_driver_relations() {
        let mut main = Main::new();
        let source = main.add(IdData::new("OBSource", IdPayload::Object(ObjectData::default())));
        let action = main.add(IdData::new(
            "ACMove",
            IdPayload::Action(ActionData {
                fcurves: vec![FCurve::new("location", 0), FCurve::new("location", 1)],
            }),
        ));
        let mut anim = AnimData::with_action(action);
        for index in 0..3 {
            anim.drivers.push(Driver::new("scale", index).with_target(
                "var",
                DriverTarget::Transform {
                    object: source,
                    bone: None,
                },
            ));
        }
        let object = main.add(
            IdData::new("OBDriven", IdPayload::Object(ObjectData::default())).with_anim(anim),
        );
        let scene = scene_with(&mut main, &[object, source]);
        let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
        build(&main, &mut graph);

        let exit = op(&graph, object, NodeType::Animation, OpCode::AnimationExit);
        let init = op(&graph, object, NodeType::Transform, OpCode::TransformInit);
        let local = op(&graph, object, NodeType::Transform, OpCode::TransformLocal);
        assert!(has_relation(&graph, exit, init));
        let entry = op(&graph, object, NodeType::Animation, OpCode::AnimationEntry);
        assert!(graph
            .operation(entry)
            .inlinks()
            .iter()
            .filter_map(|link| graph.relation(*link))
            .any(|relation| relation.from() == NodeRef::TimeSource));

        let drivers: Vec<OperationIndex> = (0..3)
            .map(|index| {
                graph
                    .find_operation(object, NodeType::Parameters, "", OpCode::Driver, "scale", index)
                    .unwrap()
            })
            .collect();
        assert!(has_relation(&graph, drivers[0], drivers[1]));
        assert!(has_relation(&graph, drivers[1], drivers[2]));
        let source_final = op(&graph, source, NodeType::Transform, OpCode::TransformFinal);
        assert!(has_relation(&graph, source_final, drivers[0]));
        assert!(graph.is_reachable(drivers[2], local));
    }

    #[test]
    fn bone_constraint_target_masks() {
        let mut main = Main::new();
        let mesh = main.add(IdData::new(
            "MEGrid",
            IdPayload::Geometry(IdType::Mesh, GeometryData::default()),
        ));
        let target = main.add(IdData::new(
            "OBGrid",
            IdPayload::Object(ObjectData::new(ObjectKind::Mesh, Some(mesh))),
        ));
        let mut data = ObjectData::default();
        data.constraints.push(Constraint::new(
            "Copy",
            ConstraintKind::CopyTransform {
                target: Some(ConstraintTarget::bone(target, "Group")),
                channel: crate::scene::TransformChannel::All,
            },
        ));
        let object = main.add(IdData::new("OBFollower", IdPayload::Object(data)));
        let scene = scene_with(&mut main, &[object, target]);
        let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
        build(&main, &mut graph);

        let constraints = op(&graph, object, NodeType::Transform, OpCode::TransformConstraints);
        let geometry = op(&graph, target, NodeType::Geometry, OpCode::GeometryEval);
        assert!(has_relation(&graph, geometry, constraints));
        let target_node = graph.id_node(graph.find_id_node(target).unwrap());
        assert!(target_node.customdata_masks().contains(CustomDataMask::DEFORM_VERT));
    }

    #[test]
    fn instance_collection_relations() {
        let mut main = Main::new();
        let member = main.add(IdData::new("OBMember", IdPayload::Object(ObjectData::default())));
        let collection = main.add(IdData::new(
            "GRProps",
            IdPayload::Collection(CollectionData {
                objects: vec![member],
                ..Default::default()
            }),
        ));
        let mut data = ObjectData::default();
        data.instance_collection = Some(collection);
        let instancer = main.add(IdData::new("OBInstancer", IdPayload::Object(data)));
        let scene = scene_with(&mut main, &[instancer]);
        let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
        build(&main, &mut graph);

        let member_final = op(&graph, member, NodeType::Transform, OpCode::TransformFinal);
        let done = op(&graph, collection, NodeType::Geometry, OpCode::GeometryEvalDone);
        let dupli = op(&graph, instancer, NodeType::Dupli, OpCode::Dupli);
        let instancer_final = op(&graph, instancer, NodeType::Transform, OpCode::TransformFinal);
        assert!(has_relation(&graph, member_final, done));
        assert!(has_relation(&graph, member_final, dupli));
        assert!(has_relation(&graph, member_final, instancer_final));
    }

    #[test]
    fn missing_endpoint_is_skipped() {
        let mut main = Main::new();
        let object = main.add(IdData::new("OBEmpty", IdPayload::Object(ObjectData::default())));
        let scene = scene_with(&mut main, &[object]);
        let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
        build(&main, &mut graph);
        let before = graph.num_relations();

        let cache = BuilderCache::new();
        let mut builder = RelationBuilder::new(&main, &mut graph, &cache, BaseFilter::Enabled);
        let missing = builder.add_relation(
            &ComponentKey::new(object, NodeType::Geometry),
            &OperationKey::new(object, NodeType::Transform, OpCode::TransformLocal),
            "Missing",
            RelationFlags::empty(),
        );
        assert!(missing.is_none());
        assert!(!builder.has_node(&ComponentKey::new(object, NodeType::Geometry)));
        assert_eq!(graph.num_relations(), before);
    }
}
