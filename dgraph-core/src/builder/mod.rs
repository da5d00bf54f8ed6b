//! Graph Builder
//!
//! Turns the data-blocks reachable from a scene into the operation graph.
//!
//! # Overview
//!
//! A build runs in four phases:
//!
//! ```text
//! sanity check ──> nodes ──> relations ──> finalize
//!                  │          │            ├── cycle detection
//!                  │          │            ├── transitive reduction
//!                  │          │            ├── visibility flush
//!                  │          │            ├── dead no-op removal
//!                  │          │            └── re-tag changed ids
//!                  │          └── RelationBuilder (+ NodeHandle for modifiers)
//!                  └── NodeBuilder
//! ```
//!
//! Both builders walk the same data-blocks, starting from the scope of the
//! build (a view layer, every object, the render pipeline, a compositor
//! tree, or a list of ids). Every data-block is visited once per builder;
//! [`BuiltMap`] remembers which ones were.
//!
//! # Design Decisions
//!
//! 1. Relations are declared between keys ([`ComponentKey`],
//!    [`OperationKey`]) and resolved when added, so the relation builder
//!    never holds indices into nodes that may be missing.
//!
//! 2. Which bases end up in the graph is the only thing the scopes change
//!    about object handling; it is decided by [`BaseFilter`].

mod cache;
mod cycle;
mod handle;
mod key;
mod nodes;
mod nodes_rig;
mod noop;
mod path;
mod pipeline;
mod relations;
mod relations_rig;
mod transitive;
mod visibility;

use std::collections::HashSet;

pub use cache::{AnimatedPropertyStorage, BuilderCache};
pub use handle::NodeHandle;
pub use key::{ComponentKey, NodeKey, OperationKey, RelationKey, TimeSourceKey};
pub use path::{contains, PathSide, PropertyPathQuery};
pub use pipeline::BuildScope;

pub(crate) use nodes::NodeBuilder;
pub(crate) use relations::RelationBuilder;

use crate::config::EvaluationMode;
use crate::scene::{Base, IdKey, Main};

/// Which part of a data-block has been built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum BuildTag {
    Complete,
    Animation,
    Parameters,
    SceneParameters,
    SceneAudio,
    SceneSequencer,
    SceneCompositor,
    LayerCollection,
}

/// Data-blocks a builder already visited.
#[derive(Debug, Default)]
pub(crate) struct BuiltMap {
    built: HashSet<(IdKey, BuildTag)>,
}

impl BuiltMap {
    /// Whether `id` was already built with `tag`. Marks it built.
    pub(crate) fn check_is_built_and_tag(&mut self, id: IdKey, tag: BuildTag) -> bool {
        !self.built.insert((id, tag))
    }

    pub(crate) fn is_built(&self, id: IdKey, tag: BuildTag) -> bool {
        self.built.contains(&(id, tag))
    }
}

/// Decides which bases of a view layer are pulled into the graph.
#[derive(Debug, Clone)]
pub(crate) enum BaseFilter {
    /// Bases enabled for the evaluation mode, plus bases whose object
    /// visibility is animated.
    Enabled,
    /// Every base.
    All,
    /// Only bases of the listed objects.
    FromIds(HashSet<IdKey>),
}

impl BaseFilter {
    pub(crate) fn need_pull_base_into_graph(
        &self,
        main: &Main,
        cache: &BuilderCache,
        base: &Base,
        mode: EvaluationMode,
    ) -> bool {
        match self {
            BaseFilter::Enabled => {
                base.is_enabled(mode) || cache.is_object_visibility_animated(main, base.object)
            }
            BaseFilter::All => true,
            BaseFilter::FromIds(ids) => ids.contains(&base.object),
        }
    }

    /// Whether a collection member may be built at all.
    pub(crate) fn allows_object(&self, object: IdKey) -> bool {
        match self {
            BaseFilter::FromIds(ids) => ids.contains(&object),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{ActionData, AnimData, FCurve, IdData, IdPayload, ObjectData};

    #[test]
    fn built_map() {
        let mut built = BuiltMap::default();
        assert!(!built.check_is_built_and_tag(IdKey(1), BuildTag::Complete));
        assert!(built.check_is_built_and_tag(IdKey(1), BuildTag::Complete));
        assert!(!built.check_is_built_and_tag(IdKey(1), BuildTag::Animation));
        assert!(built.is_built(IdKey(1), BuildTag::Animation));
        assert!(!built.is_built(IdKey(2), BuildTag::Complete));
    }

    #[test]
    fn base_filters() {
        let mut main = Main::new();
        let action = main.add(IdData::new(
            "ACBlink",
            IdPayload::Action(ActionData {
                fcurves: vec![FCurve::new("hide_viewport", 0)],
            }),
        ));
        let plain = main.add(IdData::new("OBPlain", IdPayload::Object(ObjectData::default())));
        let blinking = main.add(
            IdData::new("OBBlink", IdPayload::Object(ObjectData::default()))
                .with_anim(AnimData::with_action(action)),
        );
        let cache = BuilderCache::new();
        let mode = EvaluationMode::Viewport;

        let mut disabled = Base::new(plain);
        disabled.enabled_viewport = false;
        let mut animated = Base::new(blinking);
        animated.enabled_viewport = false;

        assert!(!BaseFilter::Enabled.need_pull_base_into_graph(&main, &cache, &disabled, mode));
        assert!(BaseFilter::Enabled.need_pull_base_into_graph(&main, &cache, &animated, mode));
        assert!(BaseFilter::All.need_pull_base_into_graph(&main, &cache, &disabled, mode));

        let from_ids = BaseFilter::FromIds([blinking].into_iter().collect());
        assert!(!from_ids.need_pull_base_into_graph(&main, &cache, &Base::new(plain), mode));
        assert!(from_ids.need_pull_base_into_graph(&main, &cache, &animated, mode));
        assert!(!from_ids.allows_object(plain));
    }
}
