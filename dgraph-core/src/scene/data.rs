//! Non-object data-block payloads.

use super::anim::{ActionData, AnimData};
use super::id::{IdKey, IdProperty, IdType};
use super::object::ObjectData;
use crate::config::EvaluationMode;

/// An object's membership in a view layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Base {
    pub object: IdKey,
    pub enabled_viewport: bool,
    pub enabled_render: bool,
}

impl Base {
    pub fn new(object: IdKey) -> Self {
        Self {
            object,
            enabled_viewport: true,
            enabled_render: true,
        }
    }

    pub fn is_enabled(&self, mode: EvaluationMode) -> bool {
        match mode {
            EvaluationMode::Viewport => self.enabled_viewport,
            EvaluationMode::Render => self.enabled_render,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewLayer {
    pub name: String,
    pub bases: Vec<Base>,
}

impl ViewLayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bases: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RigidBodyWorld {
    /// Objects taking part in the simulation.
    pub collection: Option<IdKey>,
    pub constraints: Option<IdKey>,
    pub effectors: Option<IdKey>,
}

/// A sequencer strip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Strip {
    pub name: String,
    pub sound: Option<IdKey>,
    pub scene: Option<IdKey>,
    pub properties: Vec<IdProperty>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneData {
    pub view_layers: Vec<ViewLayer>,
    pub camera: Option<IdKey>,
    pub world: Option<IdKey>,
    pub master_collection: Option<IdKey>,
    /// Background set scene.
    pub background_set: Option<IdKey>,
    pub rigid_body_world: Option<RigidBodyWorld>,
    pub compositor: Option<IdKey>,
    pub use_compositing: bool,
    pub use_sequencer: bool,
    /// `None` when the scene has no sequence editor.
    pub strips: Option<Vec<Strip>>,
    pub cache_files: Vec<IdKey>,
    pub audio_volume_animated: bool,
    pub frame: f64,
}

impl SceneData {
    pub fn view_layer(&self, index: usize) -> Option<&ViewLayer> {
        self.view_layers.get(index)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionData {
    pub objects: Vec<IdKey>,
    pub children: Vec<IdKey>,
    pub hide_viewport: bool,
    pub hide_render: bool,
}

impl CollectionData {
    pub fn is_hidden(&self, mode: EvaluationMode) -> bool {
        match mode {
            EvaluationMode::Viewport => self.hide_viewport,
            EvaluationMode::Render => self.hide_render,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeTreeKind {
    #[default]
    Shader,
    Geometry,
    Compositor,
    Texture,
}

/// A node inside a node tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeNode {
    pub name: String,
    /// Data-block the node references (image, object, group tree, ...).
    pub id: Option<IdKey>,
    /// Data-blocks referenced by socket default values.
    pub socket_ids: Vec<IdKey>,
    pub properties: Vec<IdProperty>,
}

impl TreeNode {
    pub fn new(name: impl Into<String>, id: Option<IdKey>) -> Self {
        Self {
            name: name.into(),
            id,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeTreeData {
    pub kind: NodeTreeKind,
    pub nodes: Vec<TreeNode>,
}

/// Object data with geometry (mesh, curve, metaball, lattice).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeometryData {
    pub shape_key: Option<IdKey>,
    pub materials: Vec<IdKey>,
    /// Curve bevel object.
    pub bevel_object: Option<IdKey>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraData {
    pub dof_object: Option<IdKey>,
}

/// Lights, materials and worlds: shading data with an optional node tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShadingData {
    pub node_tree: Option<IdKey>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextureData {
    pub image: Option<IdKey>,
    pub node_tree: Option<IdKey>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticleSettingsData {
    pub instance_object: Option<IdKey>,
    pub instance_collection: Option<IdKey>,
    pub effector_collection: Option<IdKey>,
    pub collision_collection: Option<IdKey>,
    pub textures: Vec<IdKey>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapeKeyData {
    /// Names of the key blocks.
    pub blocks: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeakerData {
    pub sound: Option<IdKey>,
}

/// Type-specific payload of a data-block.
#[derive(Debug, Clone)]
pub enum IdPayload {
    Scene(SceneData),
    Object(ObjectData),
    Geometry(IdType, GeometryData),
    Armature,
    Camera(CameraData),
    Light(ShadingData),
    Material(ShadingData),
    World(ShadingData),
    Texture(TextureData),
    Image,
    NodeTree(NodeTreeData),
    Collection(CollectionData),
    ParticleSettings(ParticleSettingsData),
    Action(ActionData),
    ShapeKey(ShapeKeyData),
    CacheFile,
    Sound,
    Speaker(SpeakerData),
    Text,
}

impl IdPayload {
    pub fn id_type(&self) -> IdType {
        match self {
            IdPayload::Scene(_) => IdType::Scene,
            IdPayload::Object(_) => IdType::Object,
            IdPayload::Geometry(id_type, _) => *id_type,
            IdPayload::Armature => IdType::Armature,
            IdPayload::Camera(_) => IdType::Camera,
            IdPayload::Light(_) => IdType::Light,
            IdPayload::Material(_) => IdType::Material,
            IdPayload::World(_) => IdType::World,
            IdPayload::Texture(_) => IdType::Texture,
            IdPayload::Image => IdType::Image,
            IdPayload::NodeTree(_) => IdType::NodeTree,
            IdPayload::Collection(_) => IdType::Collection,
            IdPayload::ParticleSettings(_) => IdType::ParticleSettings,
            IdPayload::Action(_) => IdType::Action,
            IdPayload::ShapeKey(_) => IdType::ShapeKey,
            IdPayload::CacheFile => IdType::CacheFile,
            IdPayload::Sound => IdType::Sound,
            IdPayload::Speaker(_) => IdType::Speaker,
            IdPayload::Text => IdType::Text,
        }
    }

    /// Node tree embedded in (owned by) this data-block, if any.
    pub fn node_tree(&self) -> Option<IdKey> {
        match self {
            IdPayload::Light(data) | IdPayload::Material(data) | IdPayload::World(data) => {
                data.node_tree
            }
            IdPayload::Texture(data) => data.node_tree,
            IdPayload::Scene(data) => data.compositor,
            _ => None,
        }
    }
}

/// A data-block: name, custom properties, animation, and typed payload.
#[derive(Debug, Clone)]
pub struct IdData {
    pub name: String,
    pub properties: Vec<IdProperty>,
    pub anim: Option<AnimData>,
    pub payload: IdPayload,
}

impl IdData {
    pub fn new(name: impl Into<String>, payload: IdPayload) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            anim: None,
            payload,
        }
    }

    pub fn with_anim(mut self, anim: AnimData) -> Self {
        self.anim = Some(anim);
        self
    }

    pub fn with_property(mut self, property: IdProperty) -> Self {
        self.properties.push(property);
        self
    }

    pub fn id_type(&self) -> IdType {
        self.payload.id_type()
    }

    pub fn as_object(&self) -> Option<&ObjectData> {
        match &self.payload {
            IdPayload::Object(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut ObjectData> {
        match &mut self.payload {
            IdPayload::Object(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_scene(&self) -> Option<&SceneData> {
        match &self.payload {
            IdPayload::Scene(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_scene_mut(&mut self) -> Option<&mut SceneData> {
        match &mut self.payload {
            IdPayload::Scene(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&CollectionData> {
        match &self.payload {
            IdPayload::Collection(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_node_tree(&self) -> Option<&NodeTreeData> {
        match &self.payload {
            IdPayload::NodeTree(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_geometry(&self) -> Option<&GeometryData> {
        match &self.payload {
            IdPayload::Geometry(_, data) => Some(data),
            _ => None,
        }
    }

    /// Animation data with an action assigned.
    pub fn has_animation(&self) -> bool {
        self.anim.as_ref().is_some_and(AnimData::has_animation)
    }
}
