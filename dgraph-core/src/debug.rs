//! Diagnostics
//!
//! Node counts, a Graphviz dump and structural checks of a built graph.
//! None of this runs as part of building or evaluating.
//!
//! ```rust
//! use dgraph_core::config::EvaluationMode;
//! use dgraph_core::graph::Depsgraph;
//! use dgraph_core::scene::{IdData, IdPayload, Main, SceneData, ViewLayer};
//!
//! let mut main = Main::new();
//! let scene = main.add(IdData::new(
//!     "SCScene",
//!     IdPayload::Scene(SceneData { view_layers: vec![ViewLayer::new("ViewLayer")], ..Default::default() }),
//! ));
//! let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
//! graph.build_from_view_layer(&main).unwrap();
//!
//! assert!(graph.consistency_check().is_ok());
//! assert!(graph.relations_validate(&main));
//! println!("{}", graph.debug_stats().to_json().unwrap());
//! ```

use std::fmt::{self, Write};

use serde::Serialize;
use tracing::warn;

use crate::builder::BuildScope;
use crate::error::{ConsistencyError, Result};
use crate::graph::{Depsgraph, NodeRef, OperationIndex, RelationFlags, RelationIndex};
use crate::scene::Main;

/// Size of a graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DebugStats {
    pub id_nodes: usize,
    /// Id nodes plus their components.
    pub outer_nodes: usize,
    pub operations: usize,
    pub relations: usize,
}

impl DebugStats {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn count_in(links: &[RelationIndex], relation: RelationIndex) -> usize {
    links.iter().filter(|link| **link == relation).count()
}

impl Depsgraph {
    pub fn debug_stats(&self) -> DebugStats {
        let mut stats = DebugStats {
            id_nodes: self.num_id_nodes(),
            operations: self.num_operations(),
            ..Default::default()
        };
        for (_, id_node) in self.id_nodes() {
            stats.outer_nodes += 1;
            for component in id_node.components() {
                stats.outer_nodes += 1;
                for op in self.component(component).operations() {
                    stats.relations += self.operation(op).inlinks().len();
                }
            }
        }
        stats
    }

    /// Check that every relation is listed as often in its source's
    /// outlinks as in its target's inlinks, and that operation valencies
    /// agree when counted from either end.
    pub fn consistency_check(&self) -> std::result::Result<(), ConsistencyError> {
        let result = self.check_links().and_then(|()| self.check_valency());
        if let Err(err) = &result {
            warn!(%err, "graph is inconsistent");
        }
        result
    }

    fn outlinks_of(&self, node: NodeRef) -> &[RelationIndex] {
        match node {
            NodeRef::Operation(op) => self.operation(op).outlinks(),
            NodeRef::TimeSource => self.time_source().outlinks(),
            NodeRef::Id(_) | NodeRef::Component(_) => &[],
        }
    }

    fn check_links(&self) -> std::result::Result<(), ConsistencyError> {
        let sources = std::iter::once(NodeRef::TimeSource)
            .chain(self.operations().map(|(index, _)| NodeRef::Operation(index)));
        for source in sources {
            let outlinks = self.outlinks_of(source);
            for link in outlinks {
                let Some(relation) = self.relation(*link) else {
                    return Err(ConsistencyError::DanglingLink {
                        node: self.node_label(source),
                        relation: link.index(),
                    });
                };
                let inlinks = self.operation(relation.to()).inlinks();
                let (outgoing, incoming) = (count_in(outlinks, *link), count_in(inlinks, *link));
                if outgoing != incoming {
                    return Err(ConsistencyError::LinkMismatch {
                        relation: link.index(),
                        name: relation.name().to_owned(),
                        outlinks: outgoing,
                        inlinks: incoming,
                    });
                }
            }
        }

        for (index, node) in self.operations() {
            for link in node.inlinks() {
                let Some(relation) = self.relation(*link) else {
                    return Err(ConsistencyError::DanglingLink {
                        node: self.operation_label(index),
                        relation: link.index(),
                    });
                };
                let incoming = count_in(node.inlinks(), *link);
                let outgoing = count_in(self.outlinks_of(relation.from()), *link);
                if outgoing != incoming {
                    return Err(ConsistencyError::LinkMismatch {
                        relation: link.index(),
                        name: relation.name().to_owned(),
                        outlinks: outgoing,
                        inlinks: incoming,
                    });
                }
            }
        }
        Ok(())
    }

    fn check_valency(&self) -> std::result::Result<(), ConsistencyError> {
        let mut from_outlinks = vec![0u32; self.num_operations()];
        for (_, node) in self.operations() {
            for link in node.outlinks() {
                if let Some(relation) = self.relation(*link) {
                    from_outlinks[relation.to().index()] += 1;
                }
            }
        }
        for (index, node) in self.operations() {
            let from_inlinks = node
                .inlinks()
                .iter()
                .filter_map(|link| self.relation(*link))
                .filter(|relation| matches!(relation.from(), NodeRef::Operation(_)))
                .count() as u32;
            if from_inlinks != from_outlinks[index.index()] {
                return Err(ConsistencyError::PendingCount {
                    operation: self.operation_label(index),
                    expected: from_inlinks,
                    actual: from_outlinks[index.index()],
                });
            }
        }
        Ok(())
    }

    fn node_label(&self, node: NodeRef) -> String {
        match node {
            NodeRef::TimeSource => "TIME_SOURCE".to_owned(),
            NodeRef::Operation(op) => self.operation_label(op),
            NodeRef::Id(id) => self.id_node(id).name().to_owned(),
            NodeRef::Component(component) => self.component(component).node_type().to_string(),
        }
    }

    /// Cheap structural comparison: same number of operations and
    /// relations.
    pub fn debug_compare(&self, other: &Depsgraph) -> bool {
        self.num_operations() == other.num_operations()
            && self.num_relations() == other.num_relations()
    }

    /// Build a fresh graph with the same scope and compare it to this one.
    ///
    /// A mismatch means the database changed in a way that needed a
    /// relations update nobody requested.
    pub fn relations_validate(&self, main: &Main) -> bool {
        let mut fresh = Depsgraph::with_config(self.scene, self.view_layer, self.mode, self.config.clone());
        let scope = self.last_scope.clone().unwrap_or(BuildScope::ViewLayer);
        let built = match scope {
            BuildScope::ViewLayer => fresh.build_from_view_layer(main),
            BuildScope::AllObjects => fresh.build_for_all_objects(main),
            BuildScope::Render => fresh.build_for_render_pipeline(main),
            BuildScope::CompositorPreview(tree) => fresh.build_for_compositor_preview(main, tree),
            BuildScope::FromIds(ids) => fresh.build_from_ids(main, &ids),
        };
        if let Err(err) = built {
            warn!(%err, "validation build failed");
            return false;
        }
        let valid = self.debug_compare(&fresh);
        if !valid {
            warn!(
                operations = self.num_operations(),
                expected_operations = fresh.num_operations(),
                relations = self.num_relations(),
                expected_relations = fresh.num_relations(),
                "graph was not tagged for relations update when it should have been"
            );
        }
        valid
    }

    /// Graphviz rendering of the graph: one cluster per data-block and
    /// component, operations as boxes.
    pub fn to_graphviz(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_graphviz(&mut out);
        out
    }

    pub fn write_graphviz(&self, out: &mut impl Write) -> fmt::Result {
        writeln!(out, "digraph depgraph {{")?;
        writeln!(out, "  rankdir = LR;")?;
        writeln!(out, "  compound = true;")?;
        writeln!(out, "  node [shape = box, fontname = \"helvetica\", fontsize = 10];")?;
        writeln!(out, "  time_source [label = \"Time Source\", shape = ellipse];")?;

        for (id_index, id_node) in self.id_nodes() {
            writeln!(out, "  subgraph cluster_id_{} {{", id_index.index())?;
            writeln!(out, "    label = {:?};", format!("{} ({})", id_node.name(), id_node.id_type().code()))?;
            if !id_node.is_visible_on_build() {
                writeln!(out, "    style = dashed;")?;
            }
            for component in id_node.components() {
                let comp = self.component(component);
                let mut label = comp.node_type().to_string();
                if !comp.name().is_empty() {
                    label.push_str(&format!(" [{}]", comp.name()));
                }
                writeln!(out, "    subgraph cluster_comp_{} {{", component.index())?;
                writeln!(out, "      label = {label:?};")?;
                for op in comp.operations() {
                    self.write_graphviz_operation(out, op)?;
                }
                writeln!(out, "    }}")?;
            }
            writeln!(out, "  }}")?;
        }

        for (_, relation) in self.relations() {
            let from = match relation.from() {
                NodeRef::Operation(op) => format!("op_{}", op.index()),
                _ => "time_source".to_owned(),
            };
            let mut attributes = format!("label = {:?}", relation.name());
            if relation.is_cyclic() {
                attributes.push_str(", color = red, style = dashed");
            } else if relation.flags().contains(RelationFlags::GODMODE) {
                attributes.push_str(", style = bold");
            }
            writeln!(out, "  {from} -> op_{} [{attributes}];", relation.to().index())?;
        }
        writeln!(out, "}}")
    }

    fn write_graphviz_operation(&self, out: &mut impl Write, op: OperationIndex) -> fmt::Result {
        let node = self.operation(op);
        let mut style = String::new();
        if node.is_noop() {
            style.push_str(", style = dotted");
        }
        if node.needs_update() {
            style.push_str(", color = orange");
        }
        writeln!(out, "      op_{} [label = {:?}{style}];", op.index(), node.key().to_string())
    }
}
