//! Data-block identity.
//!
//! Every entity the graph knows about is addressed by an [`IdKey`], a stable
//! handle into the [`Main`](super::Main) database. The key never changes for
//! the lifetime of the entity, which makes it a safe map key for id nodes,
//! builder caches and saved state across rebuilds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable handle of a data-block inside the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdKey(pub u32);

impl IdKey {
    /// Get the raw key value.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for IdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The type of a data-block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdType {
    Scene,
    Object,
    Mesh,
    Curve,
    MetaBall,
    Lattice,
    Armature,
    Camera,
    Light,
    Material,
    World,
    Texture,
    Image,
    NodeTree,
    Collection,
    ParticleSettings,
    Action,
    ShapeKey,
    CacheFile,
    Sound,
    Speaker,
    Text,
}

impl IdType {
    /// Number of distinct id types.
    pub const COUNT: usize = 22;

    /// All id types, in declaration order.
    pub const ALL: [IdType; Self::COUNT] = [
        IdType::Scene,
        IdType::Object,
        IdType::Mesh,
        IdType::Curve,
        IdType::MetaBall,
        IdType::Lattice,
        IdType::Armature,
        IdType::Camera,
        IdType::Light,
        IdType::Material,
        IdType::World,
        IdType::Texture,
        IdType::Image,
        IdType::NodeTree,
        IdType::Collection,
        IdType::ParticleSettings,
        IdType::Action,
        IdType::ShapeKey,
        IdType::CacheFile,
        IdType::Sound,
        IdType::Speaker,
        IdType::Text,
    ];

    /// Position of this type in [`IdType::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Two-letter code used in names and debug dumps.
    pub fn code(self) -> &'static str {
        match self {
            IdType::Scene => "SC",
            IdType::Object => "OB",
            IdType::Mesh => "ME",
            IdType::Curve => "CU",
            IdType::MetaBall => "MB",
            IdType::Lattice => "LT",
            IdType::Armature => "AR",
            IdType::Camera => "CA",
            IdType::Light => "LA",
            IdType::Material => "MA",
            IdType::World => "WO",
            IdType::Texture => "TE",
            IdType::Image => "IM",
            IdType::NodeTree => "NT",
            IdType::Collection => "GR",
            IdType::ParticleSettings => "PA",
            IdType::Action => "AC",
            IdType::ShapeKey => "KE",
            IdType::CacheFile => "CF",
            IdType::Sound => "SO",
            IdType::Speaker => "SK",
            IdType::Text => "TX",
        }
    }

    /// Whether the evaluated state of this type lives in a separate shadow.
    ///
    /// Images and texts are read directly from the original during
    /// evaluation; everything else gets a copy-on-write shadow.
    pub fn needs_copy_on_write(self) -> bool {
        !matches!(self, IdType::Image | IdType::Text)
    }

    /// Whether this type is object data carrying evaluated geometry.
    pub fn is_geometry_data(self) -> bool {
        matches!(
            self,
            IdType::Mesh | IdType::Curve | IdType::MetaBall | IdType::Lattice
        )
    }
}

/// Value of a custom property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Int(i64),
    Float(f64),
    Str(String),
    /// Reference to another data-block.
    Id(IdKey),
    Group(Vec<IdProperty>),
}

/// A named custom property attached to a data-block or a pose bone.
#[derive(Debug, Clone, PartialEq)]
pub struct IdProperty {
    pub name: String,
    pub value: PropertyValue,
}

impl IdProperty {
    pub fn new(name: impl Into<String>, value: PropertyValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Visit every data-block referenced by this property, recursively.
    pub fn foreach_id(&self, f: &mut dyn FnMut(IdKey)) {
        match &self.value {
            PropertyValue::Id(id) => f(*id),
            PropertyValue::Group(children) => {
                for child in children {
                    child.foreach_id(f);
                }
            }
            _ => {}
        }
    }
}
