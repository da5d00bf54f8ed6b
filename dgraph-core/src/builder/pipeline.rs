//! Build entry points.
//!
//! Every build runs the same phases; the [`BuildScope`] only decides where
//! the node and relation builders start and which bases they pull in.

use std::collections::HashSet;
use std::time::Instant;

use tracing::{debug, instrument, warn};

use super::cycle::detect_and_solve_cycles;
use super::noop::remove_unused_noops;
use super::transitive::transitive_reduction;
use super::{BaseFilter, BuilderCache, NodeBuilder, RelationBuilder};
use crate::error::{DgraphError, Result};
use crate::graph::{Depsgraph, IdNodeIndex, LinkedState, RecalcFlags, UpdateSource};
use crate::scene::{IdKey, IdType, Main};

/// Where a build starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildScope {
    /// Enabled bases of the graph's view layer.
    ViewLayer,
    /// Every base of the view layer, enabled or not.
    AllObjects,
    /// Scene data the render pipeline needs, without the view layer.
    Render,
    /// The render scope plus one compositor node tree.
    CompositorPreview(IdKey),
    /// The scene data plus the listed data-blocks. Only bases of listed
    /// objects are pulled in.
    FromIds(Vec<IdKey>),
}

impl BuildScope {
    fn base_filter(&self) -> BaseFilter {
        match self {
            BuildScope::ViewLayer | BuildScope::Render | BuildScope::CompositorPreview(_) => {
                BaseFilter::Enabled
            }
            BuildScope::AllObjects => BaseFilter::All,
            BuildScope::FromIds(ids) => BaseFilter::FromIds(ids.iter().copied().collect::<HashSet<_>>()),
        }
    }

    fn is_render(&self) -> bool {
        matches!(self, BuildScope::Render | BuildScope::CompositorPreview(_))
    }
}

impl Depsgraph {
    /// Build the graph for the enabled bases of the view layer.
    pub fn build_from_view_layer(&mut self, main: &Main) -> Result<()> {
        self.build(main, BuildScope::ViewLayer)
    }

    /// Build the graph for every base of the view layer.
    pub fn build_for_all_objects(&mut self, main: &Main) -> Result<()> {
        self.build(main, BuildScope::AllObjects)
    }

    pub fn build_for_render_pipeline(&mut self, main: &Main) -> Result<()> {
        self.build(main, BuildScope::Render)
    }

    pub fn build_for_compositor_preview(&mut self, main: &Main, node_tree: IdKey) -> Result<()> {
        self.build(main, BuildScope::CompositorPreview(node_tree))
    }

    pub fn build_from_ids(&mut self, main: &Main, ids: &[IdKey]) -> Result<()> {
        self.build(main, BuildScope::FromIds(ids.to_vec()))
    }

    /// Rebuild with the scope of the last build if relations are outdated.
    ///
    /// Graphs that were never built use the view layer scope.
    pub fn relations_update(&mut self, main: &Main) -> Result<()> {
        if !self.need_update {
            return Ok(());
        }
        let scope = self.last_scope.clone().unwrap_or(BuildScope::ViewLayer);
        self.build(main, scope)
    }

    #[instrument(skip_all, fields(scene = %self.scene, ?scope))]
    fn build(&mut self, main: &Main, scope: BuildScope) -> Result<()> {
        if let Err(err) = self.sanity_check(main, &scope) {
            warn!(%err, "build request rejected");
            return Err(err);
        }
        let start = Instant::now();
        let cache = BuilderCache::new();
        let scene = self.scene;
        let view_layer = self.view_layer;

        // Nothing may return early once the previous graph is cleared. Node
        // errors are reported after the graph is complete.
        let mut node_error = None;
        {
            let mut nodes = NodeBuilder::new(main, self, &cache, scope.base_filter());
            nodes.begin_build();
            let mut step = |result: Result<()>| {
                if let Err(err) = result {
                    warn!(%err, "node building step failed, continuing");
                    node_error.get_or_insert(err);
                }
            };
            match &scope {
                BuildScope::ViewLayer | BuildScope::AllObjects => {
                    step(nodes.build_view_layer(scene, view_layer, LinkedState::Directly));
                }
                BuildScope::Render => step(nodes.build_scene_render(scene)),
                BuildScope::CompositorPreview(tree) => {
                    step(nodes.build_scene_render(scene));
                    step(nodes.build_nodetree(*tree));
                }
                BuildScope::FromIds(ids) => {
                    step(nodes.build_view_layer(scene, view_layer, LinkedState::Directly));
                    for id in ids {
                        step(nodes.build_id(*id));
                    }
                }
            }
            nodes.end_build();
        }

        {
            let mut relations = RelationBuilder::new(main, self, &cache, scope.base_filter());
            match &scope {
                BuildScope::ViewLayer | BuildScope::AllObjects => {
                    relations.build_view_layer(scene, view_layer, LinkedState::Directly);
                }
                BuildScope::Render => relations.build_scene_render(scene),
                BuildScope::CompositorPreview(tree) => {
                    relations.build_scene_render(scene);
                    relations.build_nodetree(*tree);
                }
                BuildScope::FromIds(ids) => {
                    relations.build_view_layer(scene, view_layer, LinkedState::Directly);
                    for id in ids {
                        relations.build_id(*id);
                    }
                }
            }
            relations.build_copy_on_write_relations();
            relations.build_driver_relations();
        }

        self.is_render_pipeline = scope.is_render();
        self.finalize(main);
        self.last_scope = Some(scope);

        if self.config.debug.build {
            debug!(
                id_nodes = self.num_id_nodes(),
                operations = self.num_operations(),
                relations = self.num_relations(),
                "graph built"
            );
        }
        if self.config.debug.time {
            debug!(elapsed = ?start.elapsed(), "build finished");
        }
        match node_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn sanity_check(&self, main: &Main, scope: &BuildScope) -> Result<()> {
        let Some(data) = main.get(self.scene) else {
            return Err(DgraphError::SceneNotFound(self.scene));
        };
        let Some(scene) = data.as_scene() else {
            return Err(DgraphError::WrongIdType {
                id: self.scene,
                expected: IdType::Scene,
                actual: data.id_type(),
            });
        };
        if !scope.is_render() && scene.view_layer(self.view_layer).is_none() {
            return Err(DgraphError::ViewLayerNotFound {
                scene: self.scene,
                index: self.view_layer,
            });
        }
        if let BuildScope::FromIds(ids) = scope {
            if let Some(missing) = ids.iter().find(|id| main.get(**id).is_none()) {
                return Err(DgraphError::UnknownId(*missing));
            }
        }
        if let BuildScope::CompositorPreview(tree) = scope {
            let actual = main.id_type(*tree).ok_or(DgraphError::UnknownId(*tree))?;
            if actual != IdType::NodeTree {
                return Err(DgraphError::WrongIdType {
                    id: *tree,
                    expected: IdType::NodeTree,
                    actual,
                });
            }
        }
        if let Some(scene_cow) = self.scene_cow {
            let cached = self.id_node(scene_cow).id_orig;
            if cached != self.scene {
                return Err(DgraphError::SceneMismatch {
                    expected: self.scene,
                    actual: cached,
                });
            }
        }
        Ok(())
    }

    fn finalize(&mut self, main: &Main) {
        detect_and_solve_cycles(self);
        if self.config.transitive_reduction {
            transitive_reduction(self);
        }
        self.scene_cow = self.find_id_node(self.scene);
        self.flush_visibility_flags();
        if self.config.remove_unused_noops {
            remove_unused_noops(self);
        }

        let ids: Vec<IdNodeIndex> = self.id_map.values().copied().collect();
        for id_index in ids {
            self.retag_after_build(main, id_index);
        }

        self.on_visible_update(false);
        self.tag_ids_for_visible_update(main);
        self.need_update = false;
    }

    /// Tag what the rebuild invalidated and restore the original's recalc
    /// flags, which were lost with the old nodes.
    fn retag_after_build(&mut self, main: &Main, id_index: IdNodeIndex) {
        let node = self.id_node(id_index);
        let id = node.id_orig;
        let mut flags = RecalcFlags::empty();
        if node.eval_flags != node.previous_eval_flags
            || node.customdata_masks != node.previous_customdata_masks
        {
            flags |= RecalcFlags::TRANSFORM | RecalcFlags::GEOMETRY;
        }
        if !node.is_expanded() {
            flags |= RecalcFlags::COPY_ON_WRITE;
            if node.id_type == IdType::Object {
                flags |= RecalcFlags::TRANSFORM | RecalcFlags::GEOMETRY;
            }
        }
        flags |= main.recalc(id);
        if !flags.is_empty() {
            if let Err(err) = self.id_tag_update(main, id, flags, UpdateSource::Relations) {
                warn!(%id, %err, "re-tag after build failed");
            }
        }
        let node = self.id_node_mut(id_index);
        node.previous_eval_flags = node.eval_flags;
        node.previous_customdata_masks = node.customdata_masks;
    }
}
