//! Property Path Resolution
//!
//! Animation curves and drivers address what they read and write with
//! property paths such as `location`, `pose.bones["hand"].rotation` or
//! `modifiers["Wave"].height`. This module maps a path on a data-block to
//! the graph node that writes it (the entry side, for relations pointing at
//! the property) or that has computed it (the exit side, for relations
//! reading the property).

use super::key::{ComponentKey, NodeKey, OperationKey};
use crate::graph::{NodeType, OpCode};
use crate::scene::{IdKey, IdType};

/// Whether `component` appears in `path` as a whole path segment.
///
/// Only the first occurrence is checked. It must start the path or follow a
/// `.`, and be followed by the end of the path, a `.` or a `[`.
pub fn contains(path: &str, component: &str) -> bool {
    let Some(start) = path.find(component) else {
        return false;
    };
    if start != 0 && !path[..start].ends_with('.') {
        return false;
    }
    matches!(
        path[start + component.len()..].chars().next(),
        None | Some('.') | Some('[')
    )
}

/// Which end of a relation a resolved node is used as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSide {
    /// The property is written; the relation points at it.
    Entry,
    /// The property is read; the relation starts from it.
    Exit,
}

const OBJECT_TRANSFORM_PROPERTIES: &[&str] = &[
    "location",
    "matrix_basis",
    "matrix_channel",
    "matrix_inverse",
    "matrix_local",
    "matrix_parent_inverse",
    "matrix_world",
    "rotation_axis_angle",
    "rotation_euler",
    "rotation_mode",
    "rotation_quaternion",
    "scale",
    "delta_location",
    "delta_rotation_euler",
    "delta_rotation_quaternion",
    "delta_scale",
];

/// Split `prefix["name"]rest` into `name` and `rest`.
fn quoted_key<'p>(path: &'p str, prefix: &str) -> Option<(&'p str, &'p str)> {
    let rest = path.strip_prefix(prefix)?.strip_prefix("[\"")?;
    let end = rest.find("\"]")?;
    Some((&rest[..end], &rest[end + 2..]))
}

/// Property name of a path segment list: the leading `.` stripped.
fn property_name(rest: &str) -> &str {
    rest.strip_prefix('.').unwrap_or(rest)
}

/// Resolves property paths of one data-block to graph nodes.
#[derive(Debug, Clone, Copy)]
pub struct PropertyPathQuery {
    pub owner: IdKey,
    pub owner_type: IdType,
}

impl PropertyPathQuery {
    pub fn new(owner: IdKey, owner_type: IdType) -> Self {
        Self { owner, owner_type }
    }

    /// Node owning the property at `path`.
    pub fn resolve(&self, path: &str, side: PathSide) -> NodeKey {
        let owner = self.owner;

        // Custom properties get a dedicated operation.
        if let Some((name, rest)) = quoted_key(path, "") {
            if rest.is_empty() {
                return OperationKey::new(owner, NodeType::Parameters, OpCode::IdProperty)
                    .with_name(name)
                    .into();
            }
        }

        if self.owner_type == IdType::Object {
            if let Some(key) = self.resolve_object(path, side) {
                return key;
            }
        }

        if let Some((_, rest)) = quoted_key(path, "modifiers") {
            return self.resolve_modifier(rest, side);
        }
        if self.owner_type == IdType::ShapeKey {
            if let Some((block, _)) = quoted_key(path, "key_blocks") {
                return OperationKey::new(owner, NodeType::Parameters, OpCode::ParametersEval)
                    .with_name(block)
                    .into();
            }
        }
        if contains(path, "sequence_editor") {
            return ComponentKey::new(owner, NodeType::Sequencer).into();
        }
        if self.owner_type == IdType::NodeTree {
            if let Some((_, rest)) = quoted_key(path, "nodes") {
                if contains(property_name(rest), "inputs") || contains(property_name(rest), "outputs") {
                    return ComponentKey::new(owner, NodeType::NtreeOutput).into();
                }
                return ComponentKey::new(owner, NodeType::Shading).into();
            }
        }

        OperationKey::new(owner, NodeType::Parameters, OpCode::ParametersEval).into()
    }

    fn resolve_object(&self, path: &str, side: PathSide) -> Option<NodeKey> {
        let owner = self.owner;
        if let Some((bone, rest)) = quoted_key(path, "pose.bones") {
            return Some(resolve_bone(owner, bone, rest, side));
        }
        if OBJECT_TRANSFORM_PROPERTIES
            .iter()
            .any(|property| contains(path, property))
        {
            return Some(ComponentKey::new(owner, NodeType::Transform).into());
        }
        if contains(path, "data") {
            return Some(ComponentKey::new(owner, NodeType::Geometry).into());
        }
        if matches!(path, "hide_viewport" | "hide_render") {
            return Some(ComponentKey::new(owner, NodeType::Visibility).into());
        }
        if path == "dimensions" {
            return Some(OperationKey::new(owner, NodeType::Parameters, OpCode::Dimensions).into());
        }
        None
    }

    fn resolve_modifier(&self, rest: &str, side: PathSide) -> NodeKey {
        let owner = self.owner;
        let property = property_name(rest);
        if contains(property, "show_viewport") || contains(property, "show_render") {
            return OperationKey::new(owner, NodeType::Geometry, OpCode::Visibility).into();
        }
        match side {
            PathSide::Entry => ComponentKey::new(owner, NodeType::Geometry).into(),
            PathSide::Exit => {
                OperationKey::new(owner, NodeType::Parameters, OpCode::ParametersEval).into()
            }
        }
    }
}

fn resolve_bone(object: IdKey, bone: &str, rest: &str, side: PathSide) -> NodeKey {
    // Custom bone properties live in the bone's own component.
    if rest.starts_with("[\"") {
        return ComponentKey::bone(object, bone).into();
    }
    let property = property_name(rest);
    if property.is_empty() {
        return ComponentKey::bone(object, bone).into();
    }
    let opcode = if property.starts_with("bbone_") {
        OpCode::BoneSegments
    } else if matches!(property, "head" | "tail" | "length") || property.starts_with("matrix") {
        match side {
            PathSide::Exit => OpCode::BoneDone,
            PathSide::Entry => return ComponentKey::bone(object, bone).into(),
        }
    } else {
        OpCode::BoneLocal
    };
    OperationKey::bone(object, bone, opcode).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_matrix() {
        assert!(contains("location", "location"));
        assert!(contains("location[0]", "location"));
        assert!(contains("pose.location", "location"));
        assert!(contains("location.x", "location"));
        assert!(!contains("delta_location", "location"));
        assert!(!contains("locationx", "location"));
        assert!(!contains("scale", "location"));
        assert!(contains("data", "data"));
        assert!(!contains("metadata", "data"));
        // Only the first occurrence counts.
        assert!(!contains("xdata.data", "data"));

        assert!(contains("pose.bone[\"blork\"].location.x", "location"));
        assert!(!contains("test_location", "location"));
        assert!(!contains("location_test", "location"));
        assert!(!contains("pose.bone[\"location\"].scale", "location"));
    }

    fn object_query() -> PropertyPathQuery {
        PropertyPathQuery::new(IdKey(1), IdType::Object)
    }

    #[test]
    fn object_properties() {
        let query = object_query();
        assert_eq!(
            query.resolve("rotation_euler", PathSide::Entry),
            ComponentKey::new(IdKey(1), NodeType::Transform).into()
        );
        assert_eq!(
            query.resolve("data.vertices", PathSide::Entry),
            ComponentKey::new(IdKey(1), NodeType::Geometry).into()
        );
        assert_eq!(
            query.resolve("hide_viewport", PathSide::Entry),
            ComponentKey::new(IdKey(1), NodeType::Visibility).into()
        );
        assert_eq!(
            query.resolve("dimensions", PathSide::Exit),
            OperationKey::new(IdKey(1), NodeType::Parameters, OpCode::Dimensions).into()
        );
        assert_eq!(
            query.resolve("color", PathSide::Exit),
            OperationKey::new(IdKey(1), NodeType::Parameters, OpCode::ParametersEval).into()
        );
    }

    #[test]
    fn bone_properties() {
        let query = object_query();
        assert_eq!(
            query.resolve("pose.bones[\"arm\"].rotation_quaternion", PathSide::Entry),
            OperationKey::bone(IdKey(1), "arm", OpCode::BoneLocal).into()
        );
        assert_eq!(
            query.resolve("pose.bones[\"arm\"].bbone_curveinx", PathSide::Entry),
            OperationKey::bone(IdKey(1), "arm", OpCode::BoneSegments).into()
        );
        assert_eq!(
            query.resolve("pose.bones[\"arm\"].matrix", PathSide::Exit),
            OperationKey::bone(IdKey(1), "arm", OpCode::BoneDone).into()
        );
        assert_eq!(
            query.resolve("pose.bones[\"arm\"][\"stretch\"]", PathSide::Entry),
            ComponentKey::bone(IdKey(1), "arm").into()
        );
    }

    #[test]
    fn modifier_and_custom_properties() {
        let query = object_query();
        assert_eq!(
            query.resolve("modifiers[\"Wave\"].show_viewport", PathSide::Entry),
            OperationKey::new(IdKey(1), NodeType::Geometry, OpCode::Visibility).into()
        );
        assert_eq!(
            query.resolve("modifiers[\"Wave\"].height", PathSide::Entry),
            ComponentKey::new(IdKey(1), NodeType::Geometry).into()
        );
        assert_eq!(
            query.resolve("modifiers[\"Wave\"].height", PathSide::Exit),
            OperationKey::new(IdKey(1), NodeType::Parameters, OpCode::ParametersEval).into()
        );
        assert_eq!(
            query.resolve("[\"influence\"]", PathSide::Exit),
            OperationKey::new(IdKey(1), NodeType::Parameters, OpCode::IdProperty)
                .with_name("influence")
                .into()
        );
    }

    #[test]
    fn other_id_types() {
        let key = PropertyPathQuery::new(IdKey(2), IdType::ShapeKey);
        assert_eq!(
            key.resolve("key_blocks[\"Smile\"].value", PathSide::Entry),
            OperationKey::new(IdKey(2), NodeType::Parameters, OpCode::ParametersEval)
                .with_name("Smile")
                .into()
        );
        let tree = PropertyPathQuery::new(IdKey(3), IdType::NodeTree);
        assert_eq!(
            tree.resolve("nodes[\"Mix\"].inputs[0].default_value", PathSide::Entry),
            ComponentKey::new(IdKey(3), NodeType::NtreeOutput).into()
        );
        assert_eq!(
            tree.resolve("nodes[\"Mix\"].blend_type", PathSide::Entry),
            ComponentKey::new(IdKey(3), NodeType::Shading).into()
        );
        let scene = PropertyPathQuery::new(IdKey(4), IdType::Scene);
        assert_eq!(
            scene.resolve("sequence_editor.sequences_all[\"Clip\"].volume", PathSide::Entry),
            ComponentKey::new(IdKey(4), NodeType::Sequencer).into()
        );
    }
}
