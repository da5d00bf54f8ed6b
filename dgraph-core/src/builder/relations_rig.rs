//! Armature relations: pose evaluation order, IK and spline IK chains.

use std::collections::{HashMap, HashSet};

use super::key::{ComponentKey, OperationKey};
use super::nodes_rig::ik_solver_key;
use super::RelationBuilder;
use crate::graph::{CustomDataMask, EvalFlags, NodeType, OpCode, RelationFlags};
use crate::scene::{Constraint, ConstraintKind, ConstraintTarget, IdKey, ObjectData, ObjectKind, Pose, PoseBone};

/// Maximum number of bones walked along one IK chain.
const MAX_CHAIN_LENGTH: usize = 255;

/// For every bone, the roots of the IK chains it is part of.
#[derive(Debug, Default)]
pub(crate) struct RootMap {
    roots: HashMap<String, HashSet<String>>,
}

impl RootMap {
    pub(crate) fn add_bone(&mut self, bone: &str, root: &str) {
        self.roots
            .entry(bone.to_owned())
            .or_default()
            .insert(root.to_owned());
    }

    /// Both bones are solved by at least one common IK chain.
    pub(crate) fn has_common_root(&self, first: &str, second: &str) -> bool {
        match (self.roots.get(first), self.roots.get(second)) {
            (Some(first), Some(second)) => !first.is_disjoint(second),
            _ => false,
        }
    }
}

impl RelationBuilder<'_> {
    pub(crate) fn build_rig(&mut self, object: IdKey, data: &ObjectData) {
        if let Some(armature) = data.data {
            self.build_armature(armature);
        }
        let pose_key = |opcode| OperationKey::new(object, NodeType::EvalPose, opcode);
        let init = pose_key(OpCode::PoseInit);
        let init_ik = pose_key(OpCode::PoseInitIk);
        let cleanup = pose_key(OpCode::PoseCleanup);
        let done = pose_key(OpCode::PoseDone);

        self.add_relation(
            &ComponentKey::new(object, NodeType::Transform),
            &init,
            "Local Transform -> Pose",
            RelationFlags::empty(),
        );
        self.add_relation(&init, &init_ik, "Pose Init -> Pose Init IK", RelationFlags::empty());
        self.add_relation(&init_ik, &done, "Pose Init IK -> Pose Done", RelationFlags::empty());
        self.add_relation(&init, &cleanup, "Pose Init -> Pose Cleanup", RelationFlags::empty());
        if let Some(armature) = data.data {
            self.add_relation(
                &OperationKey::new(armature, NodeType::Armature, OpCode::ArmatureEval),
                &init,
                "Data dependency",
                RelationFlags::empty(),
            );
        }

        let Some(pose) = &data.pose else {
            return;
        };
        let mut root_map = RootMap::default();
        for bone in &pose.bones {
            for constraint in &bone.constraints {
                if !constraint.enabled {
                    continue;
                }
                match &constraint.kind {
                    ConstraintKind::InverseKinematics { .. } => {
                        self.build_ik_pose(object, pose, bone, constraint, &mut root_map);
                    }
                    ConstraintKind::SplineIk { .. } => {
                        self.build_splineik_pose(object, pose, bone, constraint, &mut root_map);
                    }
                    _ => {}
                }
            }
        }
        for bone in &pose.bones {
            self.build_bone_relations(object, pose, bone, &root_map);
        }
    }

    fn build_bone_relations(&mut self, object: IdKey, pose: &Pose, bone: &PoseBone, root_map: &RootMap) {
        let name = bone.name.as_str();
        let key = |opcode| OperationKey::bone(object, name, opcode);
        let pose_key = |opcode| OperationKey::new(object, NodeType::EvalPose, opcode);
        let local = key(OpCode::BoneLocal);
        let pose_parent = key(OpCode::BonePoseParent);
        let ready = key(OpCode::BoneReady);
        let done = key(OpCode::BoneDone);

        self.add_relation(&pose_key(OpCode::PoseInit), &local, "Pose Init -> Bone Local", RelationFlags::GODMODE);
        self.add_relation(&local, &pose_parent, "Bone Local -> Bone Pose", RelationFlags::empty());
        if let Some(parent) = bone.parent.as_deref().filter(|parent| pose.bone(parent).is_some()) {
            // A parent solved in the same chain is only ready, not done.
            let opcode = if root_map.has_common_root(name, parent) {
                OpCode::BoneReady
            } else {
                OpCode::BoneDone
            };
            self.add_relation(
                &OperationKey::bone(object, parent, opcode),
                &pose_parent,
                "Parent Bone -> Child Bone",
                RelationFlags::empty(),
            );
        }

        let parameters = OperationKey::new(object, NodeType::Parameters, OpCode::ParametersEval).with_name(name);
        if self.has_node(&parameters) {
            self.add_relation(&parameters, &local, "Bone Properties -> Bone Local", RelationFlags::empty());
        }

        if bone.constraints.is_empty() {
            self.add_relation(&pose_parent, &ready, "Bone Pose -> Ready", RelationFlags::empty());
        } else {
            let constraints = key(OpCode::BoneConstraints);
            self.build_constraints(object, &constraints, &bone.constraints, Some((root_map, name)));
            self.add_relation(&pose_parent, &constraints, "Pose -> Constraints Stack", RelationFlags::empty());
            self.add_relation(&local, &constraints, "Local -> Constraints Stack", RelationFlags::empty());
            self.add_relation(&constraints, &ready, "Constraints -> Ready", RelationFlags::empty());
        }
        self.add_relation(&ready, &done, "Ready -> Done", RelationFlags::empty());

        let pose_done = pose_key(OpCode::PoseDone);
        let cleanup = pose_key(OpCode::PoseCleanup);
        if bone.has_segments() {
            let segments = key(OpCode::BoneSegments);
            self.add_relation(&done, &segments, "Done -> B-Bone Segments", RelationFlags::empty());
            for handle in [bone.bbone_prev.as_deref(), bone.bbone_next.as_deref()]
                .into_iter()
                .flatten()
            {
                if handle != name && pose.bone(handle).is_some() {
                    self.add_relation(
                        &OperationKey::bone(object, handle, OpCode::BoneDone),
                        &segments,
                        "B-Bone Handle -> Segments",
                        RelationFlags::empty(),
                    );
                }
            }
            self.add_relation(&segments, &pose_done, "B-Bone Segments -> Pose Done", RelationFlags::GODMODE);
            self.add_relation(&segments, &cleanup, "B-Bone Segments -> Cleanup", RelationFlags::empty());
        } else {
            self.add_relation(&done, &pose_done, "Bone Done -> Pose Done", RelationFlags::empty());
            self.add_relation(&done, &cleanup, "Done -> Cleanup", RelationFlags::empty());
        }
        self.add_relation(&ready, &cleanup, "Ready -> Cleanup", RelationFlags::empty());

        if let Some(shape) = bone.custom_shape {
            self.build_object(shape);
            self.add_visibility_relation(shape, object);
        }
    }

    /// Everything the IK target of `tip` reads, plus the bones the solver
    /// moves.
    fn build_ik_pose(
        &mut self,
        object: IdKey,
        pose: &Pose,
        tip: &PoseBone,
        constraint: &Constraint,
        root_map: &mut RootMap,
    ) {
        let ConstraintKind::InverseKinematics {
            target,
            pole,
            chain_len,
            use_tail,
            itasc,
        } = &constraint.kind
        else {
            return;
        };
        if !use_tail && tip.parent.is_none() {
            return;
        }
        let root = pose.ik_chain_root(tip, *chain_len, *use_tail);
        let pose_key = |opcode| OperationKey::new(object, NodeType::EvalPose, opcode);
        let init_ik = pose_key(OpCode::PoseInitIk);
        let solver = ik_solver_key(object, OpCode::PoseIkSolver, &root.name);

        let main = self.main;
        let is_animated = self.cache.is_any_property_animated(main, object, "constraints");
        if *itasc || is_animated {
            self.add_relation(
                &OperationKey::bone(object, tip.name.as_str(), OpCode::BoneLocal),
                &init_ik,
                "IK Constraint -> Init IK Tree",
                RelationFlags::empty(),
            );
        }
        self.add_relation(&init_ik, &solver, "Init IK -> IK Solver", RelationFlags::empty());
        self.add_relation(
            &solver,
            &pose_key(OpCode::PoseCleanup),
            "IK Solver -> Cleanup",
            RelationFlags::GODMODE,
        );

        let target_dependent = if *itasc { init_ik.clone() } else { solver.clone() };
        for target in [target.as_ref(), pole.as_ref()].into_iter().flatten() {
            self.build_ik_target(object, target, &target_dependent, &init_ik, &constraint.name);
            if target.object == object {
                if let Some(subtarget) = target.subtarget.as_deref() {
                    root_map.add_bone(subtarget, &root.name);
                }
            }
        }

        // Bones the solver moves wait for their own pose, then for the
        // solver.
        let chain = pose.ik_chain(tip, *chain_len, *use_tail);
        let Some(owner) = chain.first() else {
            return;
        };
        self.add_relation(
            &OperationKey::bone(object, owner.name.as_str(), OpCode::BoneReady),
            &solver,
            "IK Solver Owner",
            RelationFlags::empty(),
        );
        for bone in chain.iter().take(MAX_CHAIN_LENGTH) {
            root_map.add_bone(&bone.name, &root.name);
            if bone.name != owner.name {
                self.add_relation(
                    &OperationKey::bone(object, bone.name.as_str(), OpCode::BoneReady),
                    &solver,
                    "IK Chain Parent",
                    RelationFlags::empty(),
                );
            }
            self.add_relation(
                &solver,
                &OperationKey::bone(object, bone.name.as_str(), OpCode::BoneDone),
                "IK Chain Result",
                RelationFlags::empty(),
            );
        }
        self.add_relation(&solver, &pose_key(OpCode::PoseDone), "PoseEval Result-Bone Link", RelationFlags::empty());
        self.build_inter_ik_chains(object, pose, root, &solver, root_map);
    }

    fn build_ik_target(
        &mut self,
        object: IdKey,
        target: &ConstraintTarget,
        target_dependent: &OperationKey,
        init_ik: &OperationKey,
        description: &str,
    ) {
        let main = self.main;
        if target.object != object {
            self.build_id(target.object);
            self.add_relation(
                &ComponentKey::new(target.object, NodeType::Transform),
                target_dependent,
                description,
                RelationFlags::empty(),
            );
            self.add_relation(
                &ComponentKey::new(target.object, NodeType::CopyOnWrite),
                init_ik,
                "IK Target CoW -> Init IK",
                RelationFlags::CHECK_BEFORE_ADD,
            );
        }
        let Some(subtarget) = target.subtarget.as_deref() else {
            return;
        };
        match main.object(target.object).map(|data| data.kind) {
            Some(ObjectKind::Armature) => {
                if target.object != object {
                    self.add_relation(
                        &OperationKey::bone(target.object, subtarget, OpCode::BoneDone),
                        target_dependent,
                        description,
                        RelationFlags::empty(),
                    );
                }
            }
            Some(ObjectKind::Mesh | ObjectKind::Lattice) => {
                self.add_relation(
                    &ComponentKey::new(target.object, NodeType::Geometry),
                    target_dependent,
                    description,
                    RelationFlags::empty(),
                );
                self.add_customdata_mask(target.object, CustomDataMask::DEFORM_VERT);
            }
            _ => {}
        }
    }

    fn build_splineik_pose(
        &mut self,
        object: IdKey,
        pose: &Pose,
        tip: &PoseBone,
        constraint: &Constraint,
        root_map: &mut RootMap,
    ) {
        let ConstraintKind::SplineIk { curve, chain_len } = &constraint.kind else {
            return;
        };
        let root = pose.ik_chain_root(tip, *chain_len, true);
        let pose_key = |opcode| OperationKey::new(object, NodeType::EvalPose, opcode);
        let init_ik = pose_key(OpCode::PoseInitIk);
        let solver = ik_solver_key(object, OpCode::PoseSplineIkSolver, &root.name);

        self.add_relation(&init_ik, &solver, "Init IK -> IK Solver", RelationFlags::empty());
        self.add_relation(
            &solver,
            &pose_key(OpCode::PoseCleanup),
            "IK Solver -> Cleanup",
            RelationFlags::empty(),
        );
        self.add_relation(
            &OperationKey::bone(object, tip.name.as_str(), OpCode::BoneReady),
            &solver,
            "Spline IK Solver Owner",
            RelationFlags::GODMODE,
        );
        if let Some(curve) = *curve {
            self.build_id(curve);
            self.add_relation(
                &ComponentKey::new(curve, NodeType::Geometry),
                &solver,
                "[Curve.Path -> Spline IK]",
                RelationFlags::empty(),
            );
            self.add_relation(
                &ComponentKey::new(curve, NodeType::Transform),
                &solver,
                "[Curve.Transform -> Spline IK]",
                RelationFlags::empty(),
            );
            self.add_special_eval_flag(curve, EvalFlags::NEED_CURVE_PATH);
        }

        for bone in pose.ik_chain(tip, *chain_len, true).into_iter().take(MAX_CHAIN_LENGTH) {
            root_map.add_bone(&bone.name, &root.name);
            if bone.name != tip.name {
                self.add_relation(
                    &OperationKey::bone(object, bone.name.as_str(), OpCode::BoneReady),
                    &solver,
                    "Spline IK Solver Update",
                    RelationFlags::empty(),
                );
            }
            self.add_relation(
                &solver,
                &OperationKey::bone(object, bone.name.as_str(), OpCode::BoneDone),
                "Spline IK Solver Result",
                RelationFlags::empty(),
            );
        }
        self.add_relation(&solver, &pose_key(OpCode::PoseDone), "PoseEval Result-Bone Link", RelationFlags::empty());
        self.build_inter_ik_chains(object, pose, root, &solver, root_map);
    }

    /// A chain whose root sits inside another chain waits for that chain's
    /// solver through the deepest shared bone.
    fn build_inter_ik_chains(
        &mut self,
        object: IdKey,
        pose: &Pose,
        root: &PoseBone,
        solver: &OperationKey,
        root_map: &RootMap,
    ) {
        let mut deepest_shared = None;
        let mut current = root.parent.as_deref().and_then(|name| pose.bone(name));
        while let Some(parent) = current {
            if !root_map.has_common_root(&root.name, &parent.name) {
                break;
            }
            deepest_shared = Some(parent);
            current = parent.parent.as_deref().and_then(|name| pose.bone(name));
        }
        if let Some(bone) = deepest_shared {
            self.add_relation(
                &OperationKey::bone(object, bone.name.as_str(), OpCode::BoneDone),
                solver,
                "IK Chain Overlap",
                RelationFlags::empty(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BaseFilter, BuilderCache, NodeBuilder};
    use crate::config::EvaluationMode;
    use crate::graph::{Depsgraph, LinkedState, OperationIndex};
    use crate::scene::{Base, IdData, IdPayload, Main, SceneData, ViewLayer};

    fn ik(target: IdKey, chain_len: usize) -> Constraint {
        Constraint::new(
            "IK",
            ConstraintKind::InverseKinematics {
                target: Some(ConstraintTarget::object(target)),
                pole: None,
                chain_len,
                use_tail: true,
                itasc: false,
            },
        )
    }

    fn build(pose: impl FnOnce(IdKey) -> Pose) -> (Depsgraph, IdKey, IdKey) {
        let mut main = Main::new();
        let target = main.add(IdData::new("OBTarget", IdPayload::Object(ObjectData::default())));
        let armature = main.add(IdData::new("ARRig", IdPayload::Armature));
        let mut data = ObjectData::new(ObjectKind::Armature, Some(armature));
        data.pose = Some(pose(target));
        let object = main.add(IdData::new("OBRig", IdPayload::Object(data)));
        let mut layer = ViewLayer::new("ViewLayer");
        layer.bases.push(Base::new(object));
        let scene = main.add(IdData::new(
            "SCScene",
            IdPayload::Scene(SceneData {
                view_layers: vec![layer],
                ..Default::default()
            }),
        ));
        let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
        let cache = BuilderCache::new();
        let mut nodes = NodeBuilder::new(&main, &mut graph, &cache, BaseFilter::Enabled);
        nodes.begin_build();
        nodes.build_view_layer(scene, 0, LinkedState::Directly).unwrap();
        nodes.end_build();
        let mut relations = RelationBuilder::new(&main, &mut graph, &cache, BaseFilter::Enabled);
        relations.build_view_layer(scene, 0, LinkedState::Directly);
        (graph, object, target)
    }

    fn bone_op(graph: &Depsgraph, object: IdKey, bone: &str, opcode: OpCode) -> OperationIndex {
        graph.find_operation(object, NodeType::Bone, bone, opcode, "", -1).unwrap()
    }

    #[test]
    fn root_map() {
        let mut map = RootMap::default();
        map.add_bone("hand", "upper");
        map.add_bone("lower", "upper");
        map.add_bone("finger", "finger");
        assert!(map.has_common_root("hand", "lower"));
        assert!(!map.has_common_root("hand", "finger"));
        assert!(!map.has_common_root("hand", "missing"));
    }

    #[test]
    fn ik_chain_order() {
        let (graph, object, target) = build(|target| {
            let mut hand = PoseBone::new("hand", Some("lower"));
            hand.constraints.push(ik(target, 2));
            Pose {
                bones: vec![
                    PoseBone::new("root", None),
                    PoseBone::new("lower", Some("root")),
                    hand,
                    PoseBone::new("finger", Some("hand")),
                ],
            }
        });

        let solver = graph
            .find_operation(object, NodeType::EvalPose, "", OpCode::PoseIkSolver, "lower", -1)
            .unwrap();
        let target_final = graph
            .find_operation(target, NodeType::Transform, "", OpCode::TransformFinal, "", -1)
            .unwrap();
        assert!(graph.is_reachable(target_final, solver));

        for bone in ["lower", "hand"] {
            assert!(graph.is_reachable(bone_op(&graph, object, bone, OpCode::BoneReady), solver));
            assert!(graph.is_reachable(solver, bone_op(&graph, object, bone, OpCode::BoneDone)));
        }
        // "hand" reads "lower" before the solver moves both of them.
        let lower_ready = bone_op(&graph, object, "lower", OpCode::BoneReady);
        let hand_parent = bone_op(&graph, object, "hand", OpCode::BonePoseParent);
        assert!(graph.is_reachable(lower_ready, hand_parent));
        // Outside the chain, children wait for the finished parent.
        let finger_parent = bone_op(&graph, object, "finger", OpCode::BonePoseParent);
        assert!(graph.is_reachable(solver, finger_parent));

        let pose_done = graph
            .find_operation(object, NodeType::EvalPose, "", OpCode::PoseDone, "", -1)
            .unwrap();
        assert!(graph.is_reachable(solver, pose_done));
    }

    #[test]
    fn bbone_segments_wait_for_handles() {
        let (graph, object, _) = build(|_| {
            let mut middle = PoseBone::new("middle", Some("start"));
            middle.bbone_segments = 8;
            middle.bbone_next = Some("end".into());
            Pose {
                bones: vec![
                    PoseBone::new("start", None),
                    middle,
                    PoseBone::new("end", None),
                ],
            }
        });

        let segments = bone_op(&graph, object, "middle", OpCode::BoneSegments);
        let end_done = bone_op(&graph, object, "end", OpCode::BoneDone);
        assert!(graph.is_reachable(end_done, segments));
        let pose_done = graph
            .find_operation(object, NodeType::EvalPose, "", OpCode::PoseDone, "", -1)
            .unwrap();
        assert!(graph.is_reachable(segments, pose_done));
    }
}
