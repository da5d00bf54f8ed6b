//! Animation data: actions with f-curves and drivers.

use super::id::IdKey;

/// A single animated channel inside an action.
#[derive(Debug, Clone, PartialEq)]
pub struct FCurve {
    /// Property path relative to the animated data-block.
    pub rna_path: String,
    pub array_index: i32,
}

impl FCurve {
    pub fn new(rna_path: impl Into<String>, array_index: i32) -> Self {
        Self {
            rna_path: rna_path.into(),
            array_index,
        }
    }
}

/// Payload of an action data-block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionData {
    pub fcurves: Vec<FCurve>,
}

/// Where a driver variable reads its value from.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverTarget {
    /// A property of some data-block, addressed by path.
    Property { id: IdKey, rna_path: String },
    /// The final transform of an object, or of one of its pose bones.
    Transform { object: IdKey, bone: Option<String> },
}

impl DriverTarget {
    pub fn id(&self) -> IdKey {
        match self {
            DriverTarget::Property { id, .. } => *id,
            DriverTarget::Transform { object, .. } => *object,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriverVariable {
    pub name: String,
    pub targets: Vec<DriverTarget>,
}

/// A driver writing one property of its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct Driver {
    pub rna_path: String,
    pub array_index: i32,
    pub variables: Vec<DriverVariable>,
    /// Expression reads the current frame.
    pub uses_time: bool,
}

impl Driver {
    pub fn new(rna_path: impl Into<String>, array_index: i32) -> Self {
        Self {
            rna_path: rna_path.into(),
            array_index,
            variables: Vec::new(),
            uses_time: false,
        }
    }

    /// Add a single-target variable.
    pub fn with_target(mut self, name: impl Into<String>, target: DriverTarget) -> Self {
        self.variables.push(DriverVariable {
            name: name.into(),
            targets: vec![target],
        });
        self
    }
}

/// Animation attached to a data-block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnimData {
    pub action: Option<IdKey>,
    pub drivers: Vec<Driver>,
}

impl AnimData {
    pub fn with_action(action: IdKey) -> Self {
        Self {
            action: Some(action),
            drivers: Vec::new(),
        }
    }

    /// Whether an animation component is needed for the owner.
    pub fn has_animation(&self) -> bool {
        self.action.is_some()
    }
}
