//! Scene Database
//!
//! A minimal model of the data the graph is built from: data-blocks
//! addressed by [`IdKey`], owned by the [`Main`] database.
//!
//! # Overview
//!
//! ```text
//! Main
//!  ├── Scene ── ViewLayer ── Base ──> Object
//!  ├── Object ── data ──> Mesh / Curve / Armature / Camera / ...
//!  │     ├── modifiers, constraints, pose, particle systems
//!  │     └── anim ──> Action (f-curves), drivers
//!  ├── Collection ──> objects, child collections
//!  └── NodeTree, Material, World, Texture, Image, ...
//! ```
//!
//! The graph never owns originals. It reads them while building and takes
//! `Arc` snapshots of them in copy-on-write operations.

mod anim;
mod data;
mod id;
mod main;
mod object;

pub use anim::{ActionData, AnimData, Driver, DriverTarget, DriverVariable, FCurve};
pub use data::{
    Base, CameraData, CollectionData, GeometryData, IdData, IdPayload, NodeTreeData, NodeTreeKind,
    ParticleSettingsData, RigidBodyWorld, SceneData, ShadingData, ShapeKeyData, SpeakerData,
    Strip, TextureData, TreeNode, ViewLayer,
};
pub use id::{IdKey, IdProperty, IdType, PropertyValue};
pub use main::Main;
pub use object::{
    BooleanOperand, Constraint, ConstraintKind, ConstraintTarget, Modifier,
    ModifierDependencies, ModifierKind, ObjectData, ObjectKind, Parent, ParentKind,
    ParticleSystem, Pose, PoseBone, RigidBodyKind, RigidBodyObject, TransformChannel,
};
