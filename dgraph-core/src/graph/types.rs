//! Node and operation type tags.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Type tag of a graph node.
///
/// Component types double as the "aspect" of a data-block they evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeType {
    Undefined,
    Operation,
    TimeSource,
    IdRef,
    Parameters,
    Animation,
    Transform,
    Geometry,
    Sequencer,
    LayerCollections,
    CopyOnWrite,
    ObjectFromLayer,
    Audio,
    Armature,
    GenericDatablock,
    Visibility,
    PointCache,
    Cache,
    Dupli,
    Synchronization,
    ParticleSystem,
    ParticleSettings,
    Shading,
    NtreeOutput,
    EvalPose,
    Bone,
}

impl NodeType {
    pub const COUNT: usize = 26;

    pub const ALL: [NodeType; Self::COUNT] = [
        NodeType::Undefined,
        NodeType::Operation,
        NodeType::TimeSource,
        NodeType::IdRef,
        NodeType::Parameters,
        NodeType::Animation,
        NodeType::Transform,
        NodeType::Geometry,
        NodeType::Sequencer,
        NodeType::LayerCollections,
        NodeType::CopyOnWrite,
        NodeType::ObjectFromLayer,
        NodeType::Audio,
        NodeType::Armature,
        NodeType::GenericDatablock,
        NodeType::Visibility,
        NodeType::PointCache,
        NodeType::Cache,
        NodeType::Dupli,
        NodeType::Synchronization,
        NodeType::ParticleSystem,
        NodeType::ParticleSettings,
        NodeType::Shading,
        NodeType::NtreeOutput,
        NodeType::EvalPose,
        NodeType::Bone,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Bit of this type in an id node's visible-components mask.
    pub fn mask_bit(self) -> u64 {
        1u64 << self.index()
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(super::registry::info(*self).name)
    }
}

/// Coarse class of a node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeClass {
    Generic,
    Component,
    Operation,
}

/// What an operation does, unique within its component together with the
/// operation's name and name tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OpCode {
    /// Generic operation, also used to address a whole component.
    Operation,

    IdProperty,
    ParametersEntry,
    ParametersEval,
    ParametersExit,
    Dimensions,

    AnimationEntry,
    AnimationEval,
    AnimationExit,
    Driver,

    SceneEval,
    AudioEntry,
    SoundEval,
    AudioVolume,
    SpeakerEval,
    ViewLayerEval,

    ObjectFromLayerEntry,
    ObjectBaseFlags,
    ObjectFromLayerExit,

    TransformInit,
    TransformLocal,
    TransformParent,
    TransformConstraints,
    TransformEval,
    TransformSimulationInit,
    TransformFinal,

    RigidbodyRebuild,
    RigidbodySim,
    RigidbodyTransformCopy,

    GeometryEvalInit,
    GeometryEval,
    GeometryEvalDone,
    GeometryShapekey,
    Modifier,
    Visibility,
    PointCacheReset,

    ArmatureEval,
    PoseInit,
    PoseInitIk,
    PoseCleanup,
    PoseDone,
    PoseIkSolver,
    PoseSplineIkSolver,

    BoneLocal,
    BonePoseParent,
    BoneConstraints,
    BoneReady,
    BoneDone,
    BoneSegments,

    ParticleSystemInit,
    ParticleSystemEval,
    ParticleSystemDone,
    ParticleSettingsInit,
    ParticleSettingsEval,
    ParticleSettingsReset,

    CopyOnWrite,

    Shading,
    MaterialUpdate,
    LightUpdate,
    WorldUpdate,
    NtreeOutput,

    SequencesEval,
    FileCacheUpdate,
    GenericDatablockUpdate,
    Dupli,
    SynchronizeToOriginal,
}

impl OpCode {
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Operation => "OPERATION",
            OpCode::IdProperty => "ID_PROPERTY",
            OpCode::ParametersEntry => "PARAMETERS_ENTRY",
            OpCode::ParametersEval => "PARAMETERS_EVAL",
            OpCode::ParametersExit => "PARAMETERS_EXIT",
            OpCode::Dimensions => "DIMENSIONS",
            OpCode::AnimationEntry => "ANIMATION_ENTRY",
            OpCode::AnimationEval => "ANIMATION_EVAL",
            OpCode::AnimationExit => "ANIMATION_EXIT",
            OpCode::Driver => "DRIVER",
            OpCode::SceneEval => "SCENE_EVAL",
            OpCode::AudioEntry => "AUDIO_ENTRY",
            OpCode::SoundEval => "SOUND_EVAL",
            OpCode::AudioVolume => "AUDIO_VOLUME",
            OpCode::SpeakerEval => "SPEAKER_EVAL",
            OpCode::ViewLayerEval => "VIEW_LAYER_EVAL",
            OpCode::ObjectFromLayerEntry => "OBJECT_FROM_LAYER_ENTRY",
            OpCode::ObjectBaseFlags => "OBJECT_BASE_FLAGS",
            OpCode::ObjectFromLayerExit => "OBJECT_FROM_LAYER_EXIT",
            OpCode::TransformInit => "TRANSFORM_INIT",
            OpCode::TransformLocal => "TRANSFORM_LOCAL",
            OpCode::TransformParent => "TRANSFORM_PARENT",
            OpCode::TransformConstraints => "TRANSFORM_CONSTRAINTS",
            OpCode::TransformEval => "TRANSFORM_EVAL",
            OpCode::TransformSimulationInit => "TRANSFORM_SIMULATION_INIT",
            OpCode::TransformFinal => "TRANSFORM_FINAL",
            OpCode::RigidbodyRebuild => "RIGIDBODY_REBUILD",
            OpCode::RigidbodySim => "RIGIDBODY_SIM",
            OpCode::RigidbodyTransformCopy => "RIGIDBODY_TRANSFORM_COPY",
            OpCode::GeometryEvalInit => "GEOMETRY_EVAL_INIT",
            OpCode::GeometryEval => "GEOMETRY_EVAL",
            OpCode::GeometryEvalDone => "GEOMETRY_EVAL_DONE",
            OpCode::GeometryShapekey => "GEOMETRY_SHAPEKEY",
            OpCode::Modifier => "MODIFIER",
            OpCode::Visibility => "VISIBILITY",
            OpCode::PointCacheReset => "POINT_CACHE_RESET",
            OpCode::ArmatureEval => "ARMATURE_EVAL",
            OpCode::PoseInit => "POSE_INIT",
            OpCode::PoseInitIk => "POSE_INIT_IK",
            OpCode::PoseCleanup => "POSE_CLEANUP",
            OpCode::PoseDone => "POSE_DONE",
            OpCode::PoseIkSolver => "POSE_IK_SOLVER",
            OpCode::PoseSplineIkSolver => "POSE_SPLINE_IK_SOLVER",
            OpCode::BoneLocal => "BONE_LOCAL",
            OpCode::BonePoseParent => "BONE_POSE_PARENT",
            OpCode::BoneConstraints => "BONE_CONSTRAINTS",
            OpCode::BoneReady => "BONE_READY",
            OpCode::BoneDone => "BONE_DONE",
            OpCode::BoneSegments => "BONE_SEGMENTS",
            OpCode::ParticleSystemInit => "PARTICLE_SYSTEM_INIT",
            OpCode::ParticleSystemEval => "PARTICLE_SYSTEM_EVAL",
            OpCode::ParticleSystemDone => "PARTICLE_SYSTEM_DONE",
            OpCode::ParticleSettingsInit => "PARTICLE_SETTINGS_INIT",
            OpCode::ParticleSettingsEval => "PARTICLE_SETTINGS_EVAL",
            OpCode::ParticleSettingsReset => "PARTICLE_SETTINGS_RESET",
            OpCode::CopyOnWrite => "COPY_ON_WRITE",
            OpCode::Shading => "SHADING",
            OpCode::MaterialUpdate => "MATERIAL_UPDATE",
            OpCode::LightUpdate => "LIGHT_UPDATE",
            OpCode::WorldUpdate => "WORLD_UPDATE",
            OpCode::NtreeOutput => "NTREE_OUTPUT",
            OpCode::SequencesEval => "SEQUENCES_EVAL",
            OpCode::FileCacheUpdate => "FILE_CACHE_UPDATE",
            OpCode::GenericDatablockUpdate => "GENERIC_DATABLOCK_UPDATE",
            OpCode::Dupli => "DUPLI",
            OpCode::SynchronizeToOriginal => "SYNCHRONIZE_TO_ORIGINAL",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

macro_rules! arena_index {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }

            pub(crate) fn from_usize(index: usize) -> Self {
                Self(index as u32)
            }
        }
    };
}

arena_index!(
    /// Index of an id node in the graph arena.
    IdNodeIndex
);
arena_index!(
    /// Index of a component node in the graph arena.
    ComponentIndex
);
arena_index!(
    /// Index of an operation node in the graph arena.
    OperationIndex
);
arena_index!(
    /// Index of a relation in the graph arena.
    RelationIndex
);

/// How an id ended up in the graph. Ordered from strongest to weakest
/// so promotion is a `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LinkedState {
    /// Part of the view layer the graph is built for.
    Directly,
    /// Part of a background set scene.
    ViaSet,
    /// Only reached through references.
    Indirectly,
}

/// Why something is being tagged for update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateSource {
    Time,
    UserEdit,
    Relations,
    Visibility,
}

/// Any node a relation may start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRef {
    TimeSource,
    Id(IdNodeIndex),
    Component(ComponentIndex),
    Operation(OperationIndex),
}

impl NodeRef {
    pub fn as_operation(self) -> Option<OperationIndex> {
        match self {
            NodeRef::Operation(index) => Some(index),
            _ => None,
        }
    }
}
