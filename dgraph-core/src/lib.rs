//! Dgraph Core
//!
//! This crate provides the dependency graph that keeps evaluated scene data
//! in sync with its originals. It implements:
//!
//! - Graph building from a scene's view layer, the render pipeline, a
//!   compositor tree or an explicit list of data-blocks
//! - Update tagging and propagation along relations
//! - Staged, multi-threaded evaluation with copy-on-write shadows
//! - Queries and diagnostics on built graphs
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `scene`: The original data-blocks the graph is built from
//! - `graph`: Nodes, relations and the graph container
//! - `builder`: Node and relation builders and the build pipeline
//! - `eval`: Tagging, flushing, scheduling and copy-on-write
//! - `query`: Read-only lookups on a built graph
//! - `debug`: Counts, consistency checks and Graphviz output
//!
//! # Example
//!
//! ```rust
//! use dgraph_core::config::EvaluationMode;
//! use dgraph_core::graph::{Depsgraph, RecalcFlags, UpdateSource};
//! use dgraph_core::scene::{Base, IdData, IdPayload, Main, ObjectData, SceneData, ViewLayer};
//!
//! // Describe the scene
//! let mut main = Main::new();
//! let cube = main.add(IdData::new("OBCube", IdPayload::Object(ObjectData::default())));
//! let mut layer = ViewLayer::new("ViewLayer");
//! layer.bases.push(Base::new(cube));
//! let scene = main.add(IdData::new(
//!     "SCScene",
//!     IdPayload::Scene(SceneData { view_layers: vec![layer], ..Default::default() }),
//! ));
//!
//! // Build and evaluate everything once
//! let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
//! graph.build_from_view_layer(&main).unwrap();
//! graph.evaluate_on_refresh(&main);
//!
//! // Only what depends on the edit runs again
//! graph.tag_update(&mut main, cube, RecalcFlags::TRANSFORM, UpdateSource::UserEdit).unwrap();
//! let report = graph.evaluate_on_refresh(&main);
//! assert!(report.updated_ids.iter().any(|(id, _)| *id == cube));
//! ```

pub mod builder;
pub mod config;
pub mod debug;
pub mod error;
pub mod eval;
pub mod graph;
pub mod query;
pub mod scene;

pub use config::{EvaluationMode, GraphConfig};
pub use error::{ConsistencyError, DgraphError, Result};
pub use graph::Depsgraph;
