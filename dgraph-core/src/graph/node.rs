//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.
//!
//! Ownership is a strict tree above the edge layer:
//!
//! ```text
//! IdNode ──owns──> ComponentNode ──owns──> OperationNode
//! ```
//!
//! All nodes live in arenas on the [`Depsgraph`](super::Depsgraph) and refer
//! to each other through index types, so back references (operation to
//! component, component to id) are plain integers.
//!
//! Operation nodes carry the only state touched concurrently during
//! evaluation: their flags, the pending-parents counter and the scheduled
//! bit are atomics.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use smallvec::SmallVec;

use super::flags::{CustomDataMask, EvalFlags, OperationFlags, RecalcFlags};
use super::types::{ComponentIndex, IdNodeIndex, LinkedState, NodeType, OpCode, OperationIndex, RelationIndex};
use crate::eval::{EvalContext, EvaluatedId};
use crate::scene::{IdKey, IdType};

/// Adjacency list of relation indices.
pub type Links = SmallVec<[RelationIndex; 4]>;

/// Identifies a component within its id node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentIdKey {
    pub node_type: NodeType,
    /// Sub-key such as a bone or a particle system name.
    pub name: String,
}

impl ComponentIdKey {
    pub fn new(node_type: NodeType, name: impl Into<String>) -> Self {
        Self {
            node_type,
            name: name.into(),
        }
    }
}

/// Identifies an operation within its component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationIdKey {
    pub opcode: OpCode,
    pub name: String,
    pub name_tag: i32,
}

impl OperationIdKey {
    pub fn new(opcode: OpCode, name: impl Into<String>, name_tag: i32) -> Self {
        Self {
            opcode,
            name: name.into(),
            name_tag,
        }
    }
}

impl fmt::Display for OperationIdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.opcode, self.name)?;
        if self.name_tag != -1 {
            write!(f, "[{}]", self.name_tag)?;
        }
        Ok(())
    }
}

/// Callback type for custom operations.
pub type OperationCallback = Arc<dyn Fn(&EvalContext<'_>) + Send + Sync>;

/// What an operation executes. Operations without work are no-ops.
#[derive(Clone)]
pub enum OperationWork {
    /// Refresh the copy-on-write shadow of the owning id.
    CopyOnWrite,
    /// Dispatch to the graph's evaluation kernel.
    Kernel,
    /// Run a caller-provided closure.
    Custom(OperationCallback),
}

impl fmt::Debug for OperationWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationWork::CopyOnWrite => f.write_str("CopyOnWrite"),
            OperationWork::Kernel => f.write_str("Kernel"),
            OperationWork::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Whether an operation may run on a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadSafety {
    #[default]
    ParallelSafe,
    /// Deferred to the serial pass on the calling thread.
    SerialOnly,
}

/// The executable leaf of the graph.
#[derive(Debug)]
pub struct OperationNode {
    pub(crate) owner: ComponentIndex,
    pub(crate) opcode: OpCode,
    pub(crate) name: String,
    pub(crate) name_tag: i32,
    pub(crate) work: Option<OperationWork>,
    pub(crate) thread_safety: ThreadSafety,
    pub(crate) inlinks: Links,
    pub(crate) outlinks: Links,
    flags: AtomicU32,
    pub(crate) num_links_pending: AtomicU32,
    pub(crate) scheduled: AtomicBool,
}

impl OperationNode {
    pub(crate) fn new(
        owner: ComponentIndex,
        key: OperationIdKey,
        work: Option<OperationWork>,
        thread_safety: ThreadSafety,
    ) -> Self {
        Self {
            owner,
            opcode: key.opcode,
            name: key.name,
            name_tag: key.name_tag,
            work,
            thread_safety,
            inlinks: Links::new(),
            outlinks: Links::new(),
            flags: AtomicU32::new(0),
            num_links_pending: AtomicU32::new(0),
            scheduled: AtomicBool::new(false),
        }
    }

    pub fn owner(&self) -> ComponentIndex {
        self.owner
    }

    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_tag(&self) -> i32 {
        self.name_tag
    }

    pub fn key(&self) -> OperationIdKey {
        OperationIdKey::new(self.opcode, self.name.clone(), self.name_tag)
    }

    pub fn work(&self) -> Option<&OperationWork> {
        self.work.as_ref()
    }

    pub fn thread_safety(&self) -> ThreadSafety {
        self.thread_safety
    }

    pub fn is_noop(&self) -> bool {
        self.work.is_none()
    }

    pub fn inlinks(&self) -> &[RelationIndex] {
        &self.inlinks
    }

    pub fn outlinks(&self) -> &[RelationIndex] {
        &self.outlinks
    }

    pub fn flags(&self) -> OperationFlags {
        OperationFlags::from_bits_retain(self.flags.load(Ordering::Acquire))
    }

    pub fn has_flags(&self, flags: OperationFlags) -> bool {
        self.flags().contains(flags)
    }

    pub fn needs_update(&self) -> bool {
        self.has_flags(OperationFlags::NEEDS_UPDATE)
    }

    /// Set flags, returning the previous value.
    pub(crate) fn set_flags(&self, flags: OperationFlags) -> OperationFlags {
        OperationFlags::from_bits_retain(self.flags.fetch_or(flags.bits(), Ordering::AcqRel))
    }

    pub(crate) fn clear_flags(&self, flags: OperationFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    pub fn num_links_pending(&self) -> u32 {
        self.num_links_pending.load(Ordering::Acquire)
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }
}

/// A functional aspect of an id (transform, geometry, a bone, ...).
#[derive(Debug)]
pub struct ComponentNode {
    pub(crate) owner: IdNodeIndex,
    pub(crate) node_type: NodeType,
    pub(crate) name: String,
    pub(crate) operations: IndexMap<OperationIdKey, OperationIndex>,
    pub(crate) entry: Option<OperationIndex>,
    pub(crate) exit: Option<OperationIndex>,
    /// Some operation of a visible id reads this component's result.
    pub(crate) affects_visible_id: bool,
    /// Same as `affects_visible_id` but ignoring evaluated visibility.
    pub(crate) possibly_affects_visible_id: bool,
    /// Closed by the node builder; no operations may be added afterwards.
    pub(crate) finalized: bool,
}

impl ComponentNode {
    pub(crate) fn new(owner: IdNodeIndex, key: ComponentIdKey) -> Self {
        Self {
            owner,
            node_type: key.node_type,
            name: key.name,
            operations: IndexMap::new(),
            entry: None,
            exit: None,
            affects_visible_id: true,
            possibly_affects_visible_id: true,
            finalized: false,
        }
    }

    pub fn owner(&self) -> IdNodeIndex {
        self.owner
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn affects_visible_id(&self) -> bool {
        self.affects_visible_id
    }

    pub fn possibly_affects_visible_id(&self) -> bool {
        self.possibly_affects_visible_id
    }

    pub fn operations(&self) -> impl Iterator<Item = OperationIndex> + '_ {
        self.operations.values().copied()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Operation other components link into.
    pub fn entry_operation(&self) -> Option<OperationIndex> {
        self.entry.or_else(|| self.single_operation())
    }

    /// Operation other components link out of.
    pub fn exit_operation(&self) -> Option<OperationIndex> {
        self.exit.or_else(|| self.single_operation())
    }

    fn single_operation(&self) -> Option<OperationIndex> {
        if self.operations.len() == 1 {
            self.operations.values().next().copied()
        } else {
            None
        }
    }

    pub fn find_operation(&self, key: &OperationIdKey) -> Option<OperationIndex> {
        self.operations.get(key).copied()
    }

    /// First operation with the given code, regardless of name.
    pub fn find_operation_by_code(&self, opcode: OpCode) -> Option<OperationIndex> {
        self.operations
            .iter()
            .find(|(key, _)| key.opcode == opcode)
            .map(|(_, index)| *index)
    }
}

/// One data-block in the graph.
#[derive(Debug)]
pub struct IdNode {
    pub(crate) id_orig: IdKey,
    pub(crate) id_type: IdType,
    pub(crate) name: String,
    pub(crate) components: IndexMap<ComponentIdKey, ComponentIndex>,
    pub(crate) linked_state: LinkedState,
    pub(crate) is_visible_on_build: bool,
    pub(crate) is_enabled_on_eval: AtomicBool,
    pub(crate) has_base: bool,
    pub(crate) is_user_modified: bool,
    pub(crate) is_cow_explicitly_tagged: bool,
    pub(crate) is_collection_fully_expanded: bool,
    pub(crate) visible_components_mask: u64,
    pub(crate) previously_visible_components_mask: u64,
    pub(crate) eval_flags: EvalFlags,
    pub(crate) previous_eval_flags: EvalFlags,
    pub(crate) customdata_masks: CustomDataMask,
    pub(crate) previous_customdata_masks: CustomDataMask,
    /// Recalc flags of the evaluated id, reported after evaluation.
    pub(crate) recalc: RecalcFlags,
    pub(crate) cow: RwLock<Option<EvaluatedId>>,
}

impl IdNode {
    pub(crate) fn new(id_orig: IdKey, id_type: IdType, name: String) -> Self {
        Self {
            id_orig,
            id_type,
            name,
            components: IndexMap::new(),
            linked_state: LinkedState::Indirectly,
            is_visible_on_build: true,
            is_enabled_on_eval: AtomicBool::new(true),
            has_base: false,
            is_user_modified: false,
            is_cow_explicitly_tagged: false,
            is_collection_fully_expanded: false,
            visible_components_mask: 0,
            previously_visible_components_mask: 0,
            eval_flags: EvalFlags::empty(),
            previous_eval_flags: EvalFlags::empty(),
            customdata_masks: CustomDataMask::empty(),
            previous_customdata_masks: CustomDataMask::empty(),
            recalc: RecalcFlags::empty(),
            cow: RwLock::new(None),
        }
    }

    pub fn id_orig(&self) -> IdKey {
        self.id_orig
    }

    pub fn id_type(&self) -> IdType {
        self.id_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn linked_state(&self) -> LinkedState {
        self.linked_state
    }

    pub fn is_visible_on_build(&self) -> bool {
        self.is_visible_on_build
    }

    pub fn is_enabled_on_eval(&self) -> bool {
        self.is_enabled_on_eval.load(Ordering::Acquire)
    }

    pub fn has_base(&self) -> bool {
        self.has_base
    }

    pub fn is_user_modified(&self) -> bool {
        self.is_user_modified
    }

    pub fn eval_flags(&self) -> EvalFlags {
        self.eval_flags
    }

    pub fn customdata_masks(&self) -> CustomDataMask {
        self.customdata_masks
    }

    pub fn recalc(&self) -> RecalcFlags {
        self.recalc
    }

    pub fn visible_components_mask(&self) -> u64 {
        self.visible_components_mask
    }

    pub fn components(&self) -> impl Iterator<Item = ComponentIndex> + '_ {
        self.components.values().copied()
    }

    pub fn find_component(&self, node_type: NodeType, name: &str) -> Option<ComponentIndex> {
        self.components
            .get(&ComponentIdKey::new(node_type, name))
            .copied()
    }

    /// The evaluated shadow exists. Ids without copy-on-write are always
    /// considered expanded since they are read in place.
    pub fn is_expanded(&self) -> bool {
        !self.id_type.needs_copy_on_write() || self.cow.read().is_some()
    }

    /// Snapshot of the evaluated shadow, if any.
    pub fn evaluated(&self) -> Option<EvaluatedId> {
        self.cow.read().clone()
    }
}

/// The graph-wide time root.
#[derive(Debug, Default)]
pub struct TimeSourceNode {
    pub(crate) outlinks: Links,
    pub(crate) tagged_for_update: bool,
}

impl TimeSourceNode {
    pub fn outlinks(&self) -> &[RelationIndex] {
        &self.outlinks
    }

    pub fn is_tagged(&self) -> bool {
        self.tagged_for_update
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operation() -> OperationNode {
        OperationNode::new(
            ComponentIndex(0),
            OperationIdKey::new(OpCode::TransformLocal, "", -1),
            Some(OperationWork::Kernel),
            ThreadSafety::ParallelSafe,
        )
    }

    #[test]
    fn operation_flags() {
        let op = operation();
        assert!(!op.needs_update());
        let previous = op.set_flags(OperationFlags::NEEDS_UPDATE | OperationFlags::USER_MODIFIED);
        assert!(previous.is_empty());
        assert!(op.needs_update());
        op.clear_flags(OperationFlags::USER_MODIFIED);
        assert_eq!(op.flags(), OperationFlags::NEEDS_UPDATE);
    }

    #[test]
    fn component_entry_exit() {
        let mut comp = ComponentNode::new(IdNodeIndex(0), ComponentIdKey::new(NodeType::Transform, ""));
        assert_eq!(comp.entry_operation(), None);
        comp.operations
            .insert(OperationIdKey::new(OpCode::TransformInit, "", -1), OperationIndex(3));
        assert_eq!(comp.entry_operation(), Some(OperationIndex(3)));
        assert_eq!(comp.exit_operation(), Some(OperationIndex(3)));
        comp.operations
            .insert(OperationIdKey::new(OpCode::TransformFinal, "", -1), OperationIndex(4));
        assert_eq!(comp.entry_operation(), None);
        comp.exit = Some(OperationIndex(4));
        assert_eq!(comp.exit_operation(), Some(OperationIndex(4)));
        assert_eq!(comp.find_operation_by_code(OpCode::TransformInit), Some(OperationIndex(3)));
    }

    #[test]
    fn key_display() {
        assert_eq!(OperationIdKey::new(OpCode::Driver, "location", 1).to_string(), "DRIVER(location)[1]");
        assert_eq!(OperationIdKey::new(OpCode::BoneDone, "arm", -1).to_string(), "BONE_DONE(arm)");
    }
}
