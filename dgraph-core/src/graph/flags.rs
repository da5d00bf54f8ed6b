//! Flag sets used across the graph.

use bitflags::bitflags;

bitflags! {
    /// Per-operation state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OperationFlags: u32 {
        /// Operation is to be evaluated in the next pass.
        const NEEDS_UPDATE = 1 << 0;
        /// Operation was tagged directly rather than reached by a flush.
        const DIRECTLY_MODIFIED = 1 << 1;
        /// The update originates from a user edit.
        const USER_MODIFIED = 1 << 2;
        /// Operation takes part in the dynamic visibility stage.
        const AFFECTS_VISIBILITY = 1 << 3;
        /// No-op kept alive by the dead no-op remover.
        const PINNED = 1 << 4;
        /// Operation is part of a detected cycle.
        const IN_CYCLE = 1 << 5;
    }
}

impl OperationFlags {
    /// Bits copied from an operation to its children during a flush.
    pub const FLUSH: Self = Self::USER_MODIFIED;

    /// Bits cleared once an operation has been evaluated.
    pub const CLEAR_ON_EVAL: Self = Self::NEEDS_UPDATE
        .union(Self::DIRECTLY_MODIFIED)
        .union(Self::USER_MODIFIED);
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RelationFlags: u32 {
        /// Relation closes a cycle and is ignored by the scheduler.
        const CYCLIC = 1 << 0;
        /// Updates cross the relation only when they come from a user edit.
        const FLUSH_USER_EDIT_ONLY = 1 << 1;
        /// Never chosen to break a cycle, never removed by reduction.
        const GODMODE = 1 << 2;
        /// Merge into an existing identical relation instead of adding one.
        const CHECK_BEFORE_ADD = 1 << 3;
        /// Updates never cross the relation.
        const NO_FLUSH = 1 << 4;
        /// Visibility is not propagated over the relation.
        const NO_VISIBILITY_CHANGE = 1 << 5;
    }
}

bitflags! {
    /// Reasons a data-block is tagged for update.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RecalcFlags: u32 {
        const TRANSFORM = 1 << 0;
        const GEOMETRY = 1 << 1;
        const ANIMATION = 1 << 2;
        const PSYS_REDO = 1 << 3;
        const PSYS_RESET = 1 << 4;
        const PSYS_CHILD = 1 << 5;
        const PSYS_PHYS = 1 << 6;
        const COPY_ON_WRITE = 1 << 7;
        const SHADING = 1 << 8;
        const SELECT = 1 << 9;
        const BASE_FLAGS = 1 << 10;
        const POINT_CACHE = 1 << 11;
        const EDITORS = 1 << 12;
        const SEQUENCER_STRIPS = 1 << 13;
        const FRAME_CHANGE = 1 << 14;
        const AUDIO_FPS = 1 << 15;
        const AUDIO_VOLUME = 1 << 16;
        const AUDIO_MUTE = 1 << 17;
        const AUDIO_LISTENER = 1 << 18;
        const AUDIO = 1 << 19;
        const PARAMETERS = 1 << 20;
        const SOURCE = 1 << 21;
        const NTREE_OUTPUT = 1 << 22;
        const TAG_FOR_UNDO = 1 << 23;
    }
}

impl RecalcFlags {
    pub const PSYS_ALL: Self = Self::PSYS_REDO
        .union(Self::PSYS_RESET)
        .union(Self::PSYS_CHILD)
        .union(Self::PSYS_PHYS);

    /// What a tag without any flag stands for: everything except particles,
    /// animation, source and editors.
    pub const fn legacy_zero() -> Self {
        Self::all().difference(
            Self::PSYS_ALL
                .union(Self::ANIMATION)
                .union(Self::SOURCE)
                .union(Self::EDITORS),
        )
    }
}

bitflags! {
    /// Extra evaluation requests declared by dependents of a data-block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EvalFlags: u32 {
        /// A curve must compute its path.
        const NEED_CURVE_PATH = 1 << 0;
        /// Shrinkwrap targets need boundary data.
        const NEED_SHRINKWRAP_BOUNDARY = 1 << 1;
    }
}

bitflags! {
    /// Custom data layers requested from evaluated geometry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CustomDataMask: u64 {
        const DEFORM_VERT = 1 << 0;
        const ORCO = 1 << 1;
        const UV_MAP = 1 << 2;
        const VERTEX_COLOR = 1 << 3;
        const NORMALS = 1 << 4;
        const ORIGINAL_INDEX = 1 << 5;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_zero() {
        let flags = RecalcFlags::legacy_zero();
        assert!(flags.contains(RecalcFlags::TRANSFORM | RecalcFlags::GEOMETRY));
        assert!(flags.contains(RecalcFlags::COPY_ON_WRITE));
        assert!(!flags.intersects(RecalcFlags::PSYS_ALL));
        assert!(!flags.contains(RecalcFlags::ANIMATION));
        assert!(!flags.contains(RecalcFlags::SOURCE));
        assert!(!flags.contains(RecalcFlags::EDITORS));
    }

    #[test]
    fn clear_on_eval_keeps_structure_bits() {
        let flags = OperationFlags::NEEDS_UPDATE
            | OperationFlags::USER_MODIFIED
            | OperationFlags::PINNED;
        assert_eq!(flags.difference(OperationFlags::CLEAR_ON_EVAL), OperationFlags::PINNED);
    }
}
