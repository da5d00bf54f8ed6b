//! Node Type Registry
//!
//! Static metadata per [`NodeType`]: its class, display name, the recalc
//! flag reported when a component of this type is updated, and whether
//! tagging the component must also tag the id's copy-on-write component.
//!
//! The table is a `static` array indexed by `NodeType as usize`, so lookups
//! are a bounds-checked index with no global mutable state.

use super::flags::RecalcFlags;
use super::types::{NodeClass, NodeType};

/// Metadata of one node type.
#[derive(Debug, Clone, Copy)]
pub struct NodeTypeInfo {
    pub node_type: NodeType,
    pub name: &'static str,
    pub class: NodeClass,
    /// Recalc flag accumulated on the id when this component is flushed.
    pub id_recalc_tag: RecalcFlags,
    /// Tagging a component of this type also tags copy-on-write.
    pub tags_copy_on_write: bool,
}

const fn generic(node_type: NodeType, name: &'static str) -> NodeTypeInfo {
    NodeTypeInfo {
        node_type,
        name,
        class: NodeClass::Generic,
        id_recalc_tag: RecalcFlags::empty(),
        tags_copy_on_write: false,
    }
}

const fn component(node_type: NodeType, name: &'static str, id_recalc_tag: RecalcFlags) -> NodeTypeInfo {
    NodeTypeInfo {
        node_type,
        name,
        class: NodeClass::Component,
        id_recalc_tag,
        tags_copy_on_write: true,
    }
}

const fn component_no_cow(
    node_type: NodeType,
    name: &'static str,
    id_recalc_tag: RecalcFlags,
) -> NodeTypeInfo {
    NodeTypeInfo {
        node_type,
        name,
        class: NodeClass::Component,
        id_recalc_tag,
        tags_copy_on_write: false,
    }
}

static REGISTRY: [NodeTypeInfo; NodeType::COUNT] = [
    generic(NodeType::Undefined, "UNDEFINED"),
    NodeTypeInfo {
        node_type: NodeType::Operation,
        name: "OPERATION",
        class: NodeClass::Operation,
        id_recalc_tag: RecalcFlags::empty(),
        tags_copy_on_write: false,
    },
    generic(NodeType::TimeSource, "TIME_SOURCE"),
    generic(NodeType::IdRef, "ID_REF"),
    component(NodeType::Parameters, "PARAMETERS", RecalcFlags::PARAMETERS),
    component(NodeType::Animation, "ANIMATION", RecalcFlags::ANIMATION),
    component(NodeType::Transform, "TRANSFORM", RecalcFlags::TRANSFORM),
    component(NodeType::Geometry, "GEOMETRY", RecalcFlags::GEOMETRY),
    component(NodeType::Sequencer, "SEQUENCER", RecalcFlags::SEQUENCER_STRIPS),
    component(NodeType::LayerCollections, "LAYER_COLLECTIONS", RecalcFlags::empty()),
    component_no_cow(NodeType::CopyOnWrite, "COPY_ON_WRITE", RecalcFlags::COPY_ON_WRITE),
    component_no_cow(NodeType::ObjectFromLayer, "OBJECT_FROM_LAYER", RecalcFlags::empty()),
    component_no_cow(NodeType::Audio, "AUDIO", RecalcFlags::empty()),
    component_no_cow(NodeType::Armature, "ARMATURE", RecalcFlags::empty()),
    component_no_cow(NodeType::GenericDatablock, "GENERIC_DATABLOCK", RecalcFlags::empty()),
    component_no_cow(NodeType::Visibility, "VISIBILITY", RecalcFlags::empty()),
    component(NodeType::PointCache, "POINT_CACHE", RecalcFlags::empty()),
    component(NodeType::Cache, "CACHE", RecalcFlags::empty()),
    component_no_cow(NodeType::Dupli, "DUPLI", RecalcFlags::empty()),
    component_no_cow(NodeType::Synchronization, "SYNCHRONIZATION", RecalcFlags::empty()),
    component(NodeType::ParticleSystem, "PARTICLE_SYSTEM", RecalcFlags::GEOMETRY),
    component(NodeType::ParticleSettings, "PARTICLE_SETTINGS", RecalcFlags::empty()),
    component(NodeType::Shading, "SHADING", RecalcFlags::SHADING),
    component_no_cow(NodeType::NtreeOutput, "NTREE_OUTPUT", RecalcFlags::NTREE_OUTPUT),
    component(NodeType::EvalPose, "EVAL_POSE", RecalcFlags::GEOMETRY),
    component(NodeType::Bone, "BONE", RecalcFlags::GEOMETRY),
];

/// Look up the metadata of a node type.
pub fn info(node_type: NodeType) -> &'static NodeTypeInfo {
    &REGISTRY[node_type.index()]
}
