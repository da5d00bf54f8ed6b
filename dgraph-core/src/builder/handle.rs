//! Relation Declaration Handle
//!
//! Modifiers (and anything else evaluated inside one operation) declare
//! what they read through a [`NodeHandle`]. The handle is bound to the
//! operation being built: every relation added through it points at that
//! operation.
//!
//! ```rust,ignore
//! fn update_depsgraph(&self, handle: &mut NodeHandle<'_, '_>) {
//!     handle.add_object_relation(self.target, NodeType::Transform, "Target Transform");
//!     handle.add_modifier_to_transform_relation("Target Space");
//! }
//! ```

use tracing::trace;

use super::key::{ComponentKey, OperationKey, RelationKey};
use super::RelationBuilder;
use crate::graph::{CustomDataMask, Depsgraph, EvalFlags, NodeType, OpCode, RelationFlags};
use crate::scene::IdKey;

/// Relation builder bound to one operation.
pub struct NodeHandle<'b, 'a> {
    builder: &'b mut RelationBuilder<'a>,
    node: OperationKey,
}

impl<'b, 'a> NodeHandle<'b, 'a> {
    pub(crate) fn new(builder: &'b mut RelationBuilder<'a>, node: OperationKey) -> Self {
        Self { builder, node }
    }

    /// Data-block owning the bound operation.
    pub fn id(&self) -> IdKey {
        self.node.id
    }

    /// Graph under construction.
    pub fn graph(&self) -> &Depsgraph {
        self.builder.graph
    }

    fn add_node_handle_relation(&mut self, from: &dyn RelationKey, description: &str) {
        if self
            .builder
            .add_relation(from, &self.node, description, RelationFlags::empty())
            .is_none()
        {
            trace!(from = %from, to = %self.node, description, "handle relation skipped");
        }
    }

    /// Depend on a component of a scene.
    pub fn add_scene_relation(&mut self, scene: IdKey, component: NodeType, description: &str) {
        self.add_node_handle_relation(&ComponentKey::new(scene, component), description);
    }

    /// Depend on a component of an object.
    pub fn add_object_relation(&mut self, object: IdKey, component: NodeType, description: &str) {
        self.add_node_handle_relation(&ComponentKey::new(object, component), description);
    }

    /// Depend on the final transform of a bone.
    pub fn add_bone_relation(&mut self, object: IdKey, bone: &str, description: &str) {
        self.add_node_handle_relation(
            &OperationKey::bone(object, bone, OpCode::BoneDone),
            description,
        );
    }

    /// Depend on the geometry of everything in a collection.
    pub fn add_collection_geometry_relation(&mut self, collection: IdKey, description: &str) {
        self.add_node_handle_relation(
            &OperationKey::new(collection, NodeType::Geometry, OpCode::GeometryEvalDone),
            description,
        );
    }

    pub fn add_node_tree_output_relation(&mut self, node_tree: IdKey, description: &str) {
        self.add_node_handle_relation(
            &OperationKey::new(node_tree, NodeType::NtreeOutput, OpCode::NtreeOutput),
            description,
        );
    }

    /// Depend on a component of an object that feeds a point cache.
    ///
    /// User edits of that component also reset the point cache of the
    /// handle's own object.
    pub fn add_object_pointcache_relation(
        &mut self,
        object: IdKey,
        component: NodeType,
        description: &str,
    ) {
        let component_key = ComponentKey::new(object, component);
        self.add_node_handle_relation(&component_key, description);
        if component != NodeType::PointCache {
            let point_cache = ComponentKey::new(self.node.id, NodeType::PointCache);
            self.builder.add_relation(
                &component_key,
                &point_cache,
                "Point Cache",
                RelationFlags::FLUSH_USER_EDIT_ONLY,
            );
        }
    }

    /// Depend on any data-block through its generic update operation.
    pub fn add_generic_id_relation(&mut self, id: IdKey, description: &str) {
        self.add_node_handle_relation(
            &OperationKey::new(id, NodeType::GenericDatablock, OpCode::GenericDatablockUpdate),
            description,
        );
    }

    /// The bound operation reads the final transform of its own object.
    pub fn add_modifier_to_transform_relation(&mut self, description: &str) {
        let transform = OperationKey::new(self.node.id, NodeType::Transform, OpCode::TransformFinal);
        self.add_node_handle_relation(&transform, description);
    }

    /// Ask for extra evaluation data on `id`.
    pub fn add_special_eval_flag(&mut self, id: IdKey, flag: EvalFlags) {
        self.builder.add_special_eval_flag(id, flag);
    }

    /// Ask for custom data layers on the evaluated geometry of `object`.
    pub fn add_customdata_mask(&mut self, object: IdKey, mask: CustomDataMask) {
        self.builder.add_customdata_mask(object, mask);
    }
}
