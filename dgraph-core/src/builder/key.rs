//! Keys addressing graph nodes by data-block instead of by index.
//!
//! Builders declare relations between nodes that may not exist yet or may
//! be optional. Keys are resolved against the graph when the relation is
//! added: a component resolves to its exit operation on the source side
//! and to its entry operation on the target side.

use std::fmt;

use crate::graph::{Depsgraph, NodeRef, NodeType, OpCode, OperationIndex};
use crate::scene::IdKey;

/// Something a relation can start from or point to.
pub trait RelationKey: fmt::Display {
    /// Node the relation starts from.
    fn source(&self, graph: &Depsgraph) -> Option<NodeRef>;

    /// Operation the relation points to.
    fn target(&self, graph: &Depsgraph) -> Option<OperationIndex>;
}

/// The graph's time source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeSourceKey;

impl fmt::Display for TimeSourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TimeSource")
    }
}

impl RelationKey for TimeSourceKey {
    fn source(&self, _graph: &Depsgraph) -> Option<NodeRef> {
        Some(NodeRef::TimeSource)
    }

    fn target(&self, _graph: &Depsgraph) -> Option<OperationIndex> {
        None
    }
}

/// A component of a data-block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentKey {
    pub id: IdKey,
    pub node_type: NodeType,
    pub name: String,
}

impl ComponentKey {
    pub fn new(id: IdKey, node_type: NodeType) -> Self {
        Self {
            id,
            node_type,
            name: String::new(),
        }
    }

    pub fn named(id: IdKey, node_type: NodeType, name: impl Into<String>) -> Self {
        Self {
            id,
            node_type,
            name: name.into(),
        }
    }

    /// Bone component of an armature object.
    pub fn bone(object: IdKey, bone: impl Into<String>) -> Self {
        Self::named(object, NodeType::Bone, bone)
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.id, self.node_type)?;
        if !self.name.is_empty() {
            write!(f, "[{}]", self.name)?;
        }
        Ok(())
    }
}

impl RelationKey for ComponentKey {
    fn source(&self, graph: &Depsgraph) -> Option<NodeRef> {
        let component = graph.find_component(self.id, self.node_type, &self.name)?;
        graph
            .component(component)
            .exit_operation()
            .map(NodeRef::Operation)
    }

    fn target(&self, graph: &Depsgraph) -> Option<OperationIndex> {
        let component = graph.find_component(self.id, self.node_type, &self.name)?;
        graph.component(component).entry_operation()
    }
}

/// One operation of a component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationKey {
    pub id: IdKey,
    pub component: NodeType,
    pub component_name: String,
    pub opcode: OpCode,
    pub name: String,
    pub name_tag: i32,
}

impl OperationKey {
    pub fn new(id: IdKey, component: NodeType, opcode: OpCode) -> Self {
        Self {
            id,
            component,
            component_name: String::new(),
            opcode,
            name: String::new(),
            name_tag: -1,
        }
    }

    /// Operation of a bone component.
    pub fn bone(object: IdKey, bone: impl Into<String>, opcode: OpCode) -> Self {
        Self::new(object, NodeType::Bone, opcode).in_component(bone)
    }

    pub fn in_component(mut self, component_name: impl Into<String>) -> Self {
        self.component_name = component_name.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tag(mut self, name_tag: i32) -> Self {
        self.name_tag = name_tag;
        self
    }

    pub fn component_key(&self) -> ComponentKey {
        ComponentKey::named(self.id, self.component, self.component_name.clone())
    }

    /// Persistent key of an existing operation, valid across rebuilds.
    pub(crate) fn of(graph: &Depsgraph, op: OperationIndex) -> Self {
        let (id_index, component) = graph.operation_owner(op);
        let comp = graph.component(component);
        let node = graph.operation(op);
        Self {
            id: graph.id_node(id_index).id_orig(),
            component: comp.node_type(),
            component_name: comp.name().to_owned(),
            opcode: node.opcode(),
            name: node.name().to_owned(),
            name_tag: node.name_tag(),
        }
    }

    pub(crate) fn find(&self, graph: &Depsgraph) -> Option<OperationIndex> {
        graph.find_operation(
            self.id,
            self.component,
            &self.component_name,
            self.opcode,
            &self.name,
            self.name_tag,
        )
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.id, self.component)?;
        if !self.component_name.is_empty() {
            write!(f, "[{}]", self.component_name)?;
        }
        write!(f, "/{}({})", self.opcode, self.name)
    }
}

impl RelationKey for OperationKey {
    fn source(&self, graph: &Depsgraph) -> Option<NodeRef> {
        self.find(graph).map(NodeRef::Operation)
    }

    fn target(&self, graph: &Depsgraph) -> Option<OperationIndex> {
        self.find(graph)
    }
}

/// Either a whole component or one of its operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    Component(ComponentKey),
    Operation(OperationKey),
}

impl NodeKey {
    pub fn id(&self) -> IdKey {
        match self {
            NodeKey::Component(key) => key.id,
            NodeKey::Operation(key) => key.id,
        }
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKey::Component(key) => key.node_type,
            NodeKey::Operation(key) => key.component,
        }
    }
}

impl From<ComponentKey> for NodeKey {
    fn from(key: ComponentKey) -> Self {
        NodeKey::Component(key)
    }
}

impl From<OperationKey> for NodeKey {
    fn from(key: OperationKey) -> Self {
        NodeKey::Operation(key)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Component(key) => key.fmt(f),
            NodeKey::Operation(key) => key.fmt(f),
        }
    }
}

impl RelationKey for NodeKey {
    fn source(&self, graph: &Depsgraph) -> Option<NodeRef> {
        match self {
            NodeKey::Component(key) => key.source(graph),
            NodeKey::Operation(key) => key.source(graph),
        }
    }

    fn target(&self, graph: &Depsgraph) -> Option<OperationIndex> {
        match self {
            NodeKey::Component(key) => key.target(graph),
            NodeKey::Operation(key) => key.target(graph),
        }
    }
}
