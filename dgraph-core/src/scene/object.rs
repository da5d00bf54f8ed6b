//! Objects and everything hanging off them: parenting, modifiers,
//! constraints, poses, particle systems and rigid bodies.

use std::fmt;
use std::sync::Arc;

use super::id::{IdKey, IdProperty};
use crate::builder::NodeHandle;
use crate::config::EvaluationMode;

/// What kind of data an object carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectKind {
    #[default]
    Empty,
    Mesh,
    Curve,
    MetaBall,
    Lattice,
    Armature,
    Camera,
    Light,
    Speaker,
}

impl ObjectKind {
    /// Objects of this kind produce evaluated geometry.
    pub fn has_geometry(self) -> bool {
        matches!(
            self,
            ObjectKind::Mesh | ObjectKind::Curve | ObjectKind::MetaBall | ObjectKind::Lattice
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParentKind {
    /// Plain object parenting.
    Object,
    /// Armature deform parenting.
    Armature,
    /// Parented to a bone of an armature.
    Bone(String),
    /// Parented to vertices of a mesh.
    Vertex,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parent {
    pub object: IdKey,
    pub kind: ParentKind,
}

/// Dependency declaration for modifiers implemented outside this crate.
///
/// The handle is bound to the modifier's own operation, so every relation
/// declared through it points at that operation.
pub trait ModifierDependencies: fmt::Debug + Send + Sync {
    /// Visit every data-block the modifier references.
    fn foreach_id(&self, f: &mut dyn FnMut(IdKey));

    /// Declare the relations the modifier needs.
    fn update_depsgraph(&self, handle: &mut NodeHandle<'_, '_>);

    fn depends_on_time(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BooleanOperand {
    Object(IdKey),
    Collection(IdKey),
}

#[derive(Debug, Clone)]
pub enum ModifierKind {
    Armature { object: Option<IdKey> },
    Hook { object: Option<IdKey>, subtarget: Option<String> },
    CurveDeform { object: Option<IdKey> },
    Boolean { operand: Option<BooleanOperand> },
    Nodes { node_tree: Option<IdKey> },
    ParticleSystem { index: usize },
    Cloth,
    DynamicPaint,
    Subdivision,
    Wave,
    External(Arc<dyn ModifierDependencies>),
}

impl ModifierKind {
    pub fn depends_on_time(&self) -> bool {
        match self {
            ModifierKind::Cloth | ModifierKind::DynamicPaint | ModifierKind::Wave => true,
            ModifierKind::External(deps) => deps.depends_on_time(),
            _ => false,
        }
    }

    /// Modifier keeps a point cache of simulated results.
    pub fn has_point_cache(&self) -> bool {
        matches!(self, ModifierKind::Cloth | ModifierKind::DynamicPaint)
    }

    pub fn foreach_id(&self, f: &mut dyn FnMut(IdKey)) {
        match self {
            ModifierKind::Armature { object }
            | ModifierKind::Hook { object, .. }
            | ModifierKind::CurveDeform { object } => {
                if let Some(object) = object {
                    f(*object);
                }
            }
            ModifierKind::Boolean { operand } => match operand {
                Some(BooleanOperand::Object(id)) | Some(BooleanOperand::Collection(id)) => f(*id),
                None => {}
            },
            ModifierKind::Nodes { node_tree } => {
                if let Some(tree) = node_tree {
                    f(*tree);
                }
            }
            ModifierKind::External(deps) => deps.foreach_id(f),
            _ => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct Modifier {
    pub name: String,
    pub kind: ModifierKind,
    pub show_viewport: bool,
    pub show_render: bool,
}

impl Modifier {
    pub fn new(name: impl Into<String>, kind: ModifierKind) -> Self {
        Self {
            name: name.into(),
            kind,
            show_viewport: true,
            show_render: true,
        }
    }

    pub fn is_enabled(&self, mode: EvaluationMode) -> bool {
        match mode {
            EvaluationMode::Viewport => self.show_viewport,
            EvaluationMode::Render => self.show_render,
        }
    }
}

/// Target of a constraint: an object, optionally narrowed to a bone or a
/// vertex group.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintTarget {
    pub object: IdKey,
    pub subtarget: Option<String>,
}

impl ConstraintTarget {
    pub fn object(object: IdKey) -> Self {
        Self {
            object,
            subtarget: None,
        }
    }

    pub fn bone(object: IdKey, bone: impl Into<String>) -> Self {
        Self {
            object,
            subtarget: Some(bone.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformChannel {
    Location,
    Rotation,
    Scale,
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintKind {
    CopyTransform {
        target: Option<ConstraintTarget>,
        channel: TransformChannel,
    },
    ChildOf {
        target: Option<ConstraintTarget>,
    },
    TrackTo {
        target: Option<ConstraintTarget>,
    },
    FollowPath {
        curve: Option<IdKey>,
    },
    ShrinkWrap {
        target: Option<IdKey>,
    },
    InverseKinematics {
        target: Option<ConstraintTarget>,
        pole: Option<ConstraintTarget>,
        /// Number of bones in the chain, 0 means up to the root.
        chain_len: usize,
        use_tail: bool,
        /// Solver runs on the whole tree at pose init.
        itasc: bool,
    },
    SplineIk {
        curve: Option<IdKey>,
        chain_len: usize,
    },
    Armature {
        targets: Vec<ConstraintTarget>,
    },
}

impl ConstraintKind {
    pub fn depends_on_time(&self) -> bool {
        matches!(self, ConstraintKind::FollowPath { .. })
    }

    /// Visit every target of the constraint.
    pub fn foreach_target(&self, f: &mut dyn FnMut(&ConstraintTarget)) {
        match self {
            ConstraintKind::CopyTransform { target, .. }
            | ConstraintKind::ChildOf { target }
            | ConstraintKind::TrackTo { target } => {
                if let Some(target) = target {
                    f(target);
                }
            }
            ConstraintKind::FollowPath { curve } | ConstraintKind::SplineIk { curve, .. } => {
                if let Some(curve) = curve {
                    f(&ConstraintTarget::object(*curve));
                }
            }
            ConstraintKind::ShrinkWrap { target } => {
                if let Some(target) = target {
                    f(&ConstraintTarget::object(*target));
                }
            }
            ConstraintKind::InverseKinematics { target, pole, .. } => {
                if let Some(target) = target {
                    f(target);
                }
                if let Some(pole) = pole {
                    f(pole);
                }
            }
            ConstraintKind::Armature { targets } => {
                for target in targets {
                    f(target);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub name: String,
    pub kind: ConstraintKind,
    pub enabled: bool,
}

impl Constraint {
    pub fn new(name: impl Into<String>, kind: ConstraintKind) -> Self {
        Self {
            name: name.into(),
            kind,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseBone {
    pub name: String,
    pub parent: Option<String>,
    pub constraints: Vec<Constraint>,
    /// Number of B-Bone segments, 1 for a plain bone.
    pub bbone_segments: u32,
    pub bbone_prev: Option<String>,
    pub bbone_next: Option<String>,
    pub custom_shape: Option<IdKey>,
    pub properties: Vec<IdProperty>,
}

impl PoseBone {
    pub fn new(name: impl Into<String>, parent: Option<&str>) -> Self {
        Self {
            name: name.into(),
            parent: parent.map(str::to_owned),
            bbone_segments: 1,
            ..Default::default()
        }
    }

    pub fn has_segments(&self) -> bool {
        self.bbone_segments > 1
    }
}

/// Evaluated pose of an armature object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pose {
    pub bones: Vec<PoseBone>,
}

impl Pose {
    pub fn bone(&self, name: &str) -> Option<&PoseBone> {
        self.bones.iter().find(|bone| bone.name == name)
    }

    /// Root of an IK chain ending at `tip`.
    ///
    /// The tip itself is only part of the chain when `use_tail` is set. A
    /// chain length of zero walks all the way up to the root bone.
    pub fn ik_chain_root<'a>(
        &'a self,
        tip: &'a PoseBone,
        chain_len: usize,
        use_tail: bool,
    ) -> &'a PoseBone {
        let mut root = tip;
        let mut current = if use_tail {
            Some(tip)
        } else {
            tip.parent.as_deref().and_then(|name| self.bone(name))
        };
        let mut segments = 0;
        while let Some(bone) = current {
            root = bone;
            segments += 1;
            if chain_len != 0 && segments >= chain_len {
                break;
            }
            current = bone.parent.as_deref().and_then(|name| self.bone(name));
        }
        root
    }

    /// Bones of an IK chain from the tip (or its parent) up to the root,
    /// tip side first.
    pub fn ik_chain<'a>(
        &'a self,
        tip: &'a PoseBone,
        chain_len: usize,
        use_tail: bool,
    ) -> Vec<&'a PoseBone> {
        let mut chain = Vec::new();
        let mut current = if use_tail {
            Some(tip)
        } else {
            tip.parent.as_deref().and_then(|name| self.bone(name))
        };
        while let Some(bone) = current {
            chain.push(bone);
            if chain_len != 0 && chain.len() >= chain_len {
                break;
            }
            current = bone.parent.as_deref().and_then(|name| self.bone(name));
        }
        chain
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParticleSystem {
    pub name: String,
    pub settings: IdKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigidBodyKind {
    Active,
    Passive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RigidBodyObject {
    pub kind: RigidBodyKind,
    /// Collision shape is built from the evaluated mesh.
    pub uses_evaluated_geometry: bool,
}

/// Payload of an object data-block.
#[derive(Debug, Clone, Default)]
pub struct ObjectData {
    pub kind: ObjectKind,
    /// Object data (mesh, curve, armature, camera, ...).
    pub data: Option<IdKey>,
    pub parent: Option<Parent>,
    pub modifiers: Vec<Modifier>,
    pub constraints: Vec<Constraint>,
    pub pose: Option<Pose>,
    pub particle_systems: Vec<ParticleSystem>,
    pub materials: Vec<IdKey>,
    pub instance_collection: Option<IdKey>,
    pub rigid_body: Option<RigidBodyObject>,
    pub hide_viewport: bool,
    pub hide_render: bool,
}

impl ObjectData {
    pub fn new(kind: ObjectKind, data: Option<IdKey>) -> Self {
        Self {
            kind,
            data,
            ..Default::default()
        }
    }

    pub fn is_hidden(&self, mode: EvaluationMode) -> bool {
        match mode {
            EvaluationMode::Viewport => self.hide_viewport,
            EvaluationMode::Render => self.hide_render,
        }
    }

    /// Object keeps a point cache for simulated state.
    pub fn has_point_cache(&self) -> bool {
        !self.particle_systems.is_empty()
            || self.rigid_body.is_some()
            || self.modifiers.iter().any(|md| md.kind.has_point_cache())
    }

    pub fn modifier(&self, name: &str) -> Option<&Modifier> {
        self.modifiers.iter().find(|md| md.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> Pose {
        Pose {
            bones: vec![
                PoseBone::new("root", None),
                PoseBone::new("upper", Some("root")),
                PoseBone::new("lower", Some("upper")),
                PoseBone::new("hand", Some("lower")),
            ],
        }
    }

    #[test]
    fn ik_root_whole_chain() {
        let pose = chain();
        let tip = pose.bone("hand").unwrap();
        assert_eq!(pose.ik_chain_root(tip, 0, true).name, "root");
        assert_eq!(pose.ik_chain_root(tip, 0, false).name, "root");
    }

    #[test]
    fn ik_root_limited_chain() {
        let pose = chain();
        let tip = pose.bone("hand").unwrap();
        assert_eq!(pose.ik_chain_root(tip, 2, true).name, "lower");
        assert_eq!(pose.ik_chain_root(tip, 2, false).name, "upper");
        let names: Vec<_> = pose
            .ik_chain(tip, 2, false)
            .iter()
            .map(|bone| bone.name.as_str())
            .collect();
        assert_eq!(names, vec!["lower", "upper"]);
    }

    #[test]
    fn time_dependent_modifiers() {
        assert!(ModifierKind::Cloth.depends_on_time());
        assert!(!ModifierKind::Subdivision.depends_on_time());
        assert!(ModifierKind::Cloth.has_point_cache());
    }
}
