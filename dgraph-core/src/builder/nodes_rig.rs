//! Armature objects: pose evaluation and one component per bone.

use super::key::OperationKey;
use super::NodeBuilder;
use crate::error::Result;
use crate::graph::{LinkedState, NodeType, OpCode, OperationWork};
use crate::scene::{ConstraintKind, IdKey, ObjectData, Pose, PoseBone};

impl NodeBuilder<'_> {
    /// Pose operations of an armature object and the armature data.
    ///
    /// ```text
    /// EVAL_POSE:  POSE_INIT ─ POSE_INIT_IK ─ [IK solvers] ─ POSE_CLEANUP ─ POSE_DONE
    /// BONE[b]:    BONE_LOCAL ─ BONE_POSE_PARENT ─ BONE_READY ─ BONE_DONE [─ BONE_SEGMENTS]
    /// ```
    pub(crate) fn build_rig(&mut self, object: IdKey, data: &ObjectData) -> Result<()> {
        if let Some(armature) = data.data {
            self.build_armature(armature)?;
        }
        let key = |opcode| OperationKey::new(object, NodeType::EvalPose, opcode);
        let init = self.add_kernel(key(OpCode::PoseInit))?;
        self.set_entry(init);
        self.add_kernel(key(OpCode::PoseInitIk))?;
        self.add_kernel(key(OpCode::PoseCleanup))?;
        let done = self.add_kernel(key(OpCode::PoseDone))?;
        self.set_exit(done);

        let Some(pose) = &data.pose else {
            return Ok(());
        };
        for bone in &pose.bones {
            self.build_bone(object, bone)?;
        }
        for bone in &pose.bones {
            self.build_bone_solvers(object, pose, bone)?;
        }
        Ok(())
    }

    fn build_bone(&mut self, object: IdKey, bone: &PoseBone) -> Result<()> {
        let key = |opcode| OperationKey::bone(object, bone.name.as_str(), opcode);
        let local = self.add_kernel(key(OpCode::BoneLocal))?;
        self.set_entry(local);
        self.add_kernel(key(OpCode::BonePoseParent))?;
        self.add_noop(key(OpCode::BoneReady))?;
        let done = self.add_noop(key(OpCode::BoneDone))?;
        if bone.has_segments() {
            let segments = self.add_kernel(key(OpCode::BoneSegments))?;
            self.set_exit(segments);
        } else {
            self.set_exit(done);
        }

        if !bone.properties.is_empty() {
            self.build_idproperties(&bone.properties)?;
            self.ensure_operation(
                &OperationKey::new(object, NodeType::Parameters, OpCode::ParametersEval)
                    .with_name(bone.name.as_str()),
                Some(OperationWork::Kernel),
            )?;
        }
        if !bone.constraints.is_empty() {
            let mut targets = Vec::new();
            for constraint in &bone.constraints {
                constraint.kind.foreach_target(&mut |target| targets.push(target.object));
            }
            for target in targets {
                if target != object {
                    self.build_id(target)?;
                }
            }
            self.add_kernel(key(OpCode::BoneConstraints))?;
        }
        if let Some(shape) = bone.custom_shape {
            self.build_object(None, shape, LinkedState::Indirectly, false)?;
        }
        Ok(())
    }

    /// IK solvers run once per chain root, so bones sharing a root share
    /// the solver.
    fn build_bone_solvers(&mut self, object: IdKey, pose: &Pose, bone: &PoseBone) -> Result<()> {
        for constraint in &bone.constraints {
            let (opcode, root) = match &constraint.kind {
                ConstraintKind::InverseKinematics {
                    chain_len,
                    use_tail,
                    ..
                } => {
                    if !use_tail && bone.parent.is_none() {
                        continue;
                    }
                    (
                        OpCode::PoseIkSolver,
                        pose.ik_chain_root(bone, *chain_len, *use_tail),
                    )
                }
                ConstraintKind::SplineIk { chain_len, .. } => (
                    OpCode::PoseSplineIkSolver,
                    pose.ik_chain_root(bone, *chain_len, true),
                ),
                _ => continue,
            };
            let solver = ik_solver_key(object, opcode, &root.name);
            if !self.has_operation(&solver) {
                self.add_kernel(solver)?;
            }
        }
        Ok(())
    }
}

/// Solver operation of the IK chain rooted at `root`.
pub(crate) fn ik_solver_key(object: IdKey, opcode: OpCode, root: &str) -> OperationKey {
    OperationKey::new(object, NodeType::EvalPose, opcode).with_name(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BaseFilter, BuilderCache};
    use crate::config::EvaluationMode;
    use crate::graph::Depsgraph;
    use crate::scene::{
        Base, Constraint, ConstraintTarget, IdData, IdPayload, Main, ObjectKind, SceneData,
        ViewLayer,
    };

    fn rig(main: &mut Main) -> (IdKey, IdKey) {
        let target = main.add(IdData::new("OBTarget", IdPayload::Object(ObjectData::default())));
        let armature = main.add(IdData::new("ARRig", IdPayload::Armature));
        let mut hand = PoseBone::new("hand", Some("lower"));
        hand.constraints.push(Constraint::new(
            "IK",
            ConstraintKind::InverseKinematics {
                target: Some(ConstraintTarget::object(target)),
                pole: None,
                chain_len: 2,
                use_tail: true,
                itasc: false,
            },
        ));
        let mut finger = PoseBone::new("finger", Some("hand"));
        finger.bbone_segments = 4;
        finger.constraints.push(Constraint::new(
            "IK",
            ConstraintKind::InverseKinematics {
                target: Some(ConstraintTarget::object(target)),
                pole: None,
                chain_len: 3,
                use_tail: true,
                itasc: false,
            },
        ));
        let mut data = ObjectData::new(ObjectKind::Armature, Some(armature));
        data.pose = Some(Pose {
            bones: vec![
                PoseBone::new("root", None),
                PoseBone::new("lower", Some("root")),
                hand,
                finger,
            ],
        });
        let object = main.add(IdData::new("OBRig", IdPayload::Object(data)));
        (object, target)
    }

    #[test]
    fn rig_nodes() {
        let mut main = Main::new();
        let (object, target) = rig(&mut main);
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
        let mut builder = NodeBuilder::new(&main, &mut graph, &cache, BaseFilter::Enabled);
        builder.begin_build();
        builder.build_view_layer(scene, 0, LinkedState::Directly).unwrap();
        builder.end_build();

        assert!(graph.find_id_node(target).is_some());
        for bone in ["root", "lower", "hand", "finger"] {
            assert!(graph
                .find_operation(object, NodeType::Bone, bone, OpCode::BoneDone, "", -1)
                .is_some());
        }
        // hand+lower and finger+hand+lower share the "lower" root.
        assert!(graph
            .find_operation(object, NodeType::EvalPose, "", OpCode::PoseIkSolver, "lower", -1)
            .is_some());
        let solvers = graph
            .operations()
            .filter(|(_, op)| op.opcode() == OpCode::PoseIkSolver)
            .count();
        assert_eq!(solvers, 1);

        let finger = graph.find_component(object, NodeType::Bone, "finger").unwrap();
        let exit = graph.component(finger).exit_operation().unwrap();
        assert_eq!(graph.operation(exit).opcode(), OpCode::BoneSegments);
        let hand = graph.find_component(object, NodeType::Bone, "hand").unwrap();
        let exit = graph.component(hand).exit_operation().unwrap();
        assert_eq!(graph.operation(exit).opcode(), OpCode::BoneDone);
        assert!(graph
            .find_operation(object, NodeType::Bone, "hand", OpCode::BoneConstraints, "", -1)
            .is_some());
    }
}
