//! Evaluation
//!
//! Everything that happens to a built graph: tagging data-blocks as
//! changed, flushing the tags to dependent operations, and running the
//! tagged operations.
//!
//! # Overview
//!
//! ```text
//! tag_update ──> entry tags ──> flush_updates ──> evaluate (staged, threaded)
//!                                                    │
//!                               COPY_ON_WRITE ops ───┴──> evaluated shadows
//! ```
//!
//! A typical frame:
//!
//! ```rust
//! use dgraph_core::config::EvaluationMode;
//! use dgraph_core::graph::{Depsgraph, RecalcFlags, UpdateSource};
//! use dgraph_core::scene::{IdData, IdPayload, Main, ObjectData, SceneData, ViewLayer, Base};
//!
//! let mut main = Main::new();
//! let object = main.add(IdData::new("OBEmpty", IdPayload::Object(ObjectData::default())));
//! let mut layer = ViewLayer::new("ViewLayer");
//! layer.bases.push(Base::new(object));
//! let scene = main.add(IdData::new(
//!     "SCScene",
//!     IdPayload::Scene(SceneData { view_layers: vec![layer], ..Default::default() }),
//! ));
//!
//! let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
//! graph.build_from_view_layer(&main).unwrap();
//! graph.evaluate_on_refresh(&main);
//!
//! graph.tag_update(&mut main, object, RecalcFlags::TRANSFORM, UpdateSource::UserEdit).unwrap();
//! let report = graph.evaluate_on_refresh(&main);
//! assert!(report.executed > 0);
//! ```

mod cow;
mod flush;
mod kernel;
mod scheduler;
mod stats;
mod tag;

pub use cow::EvaluatedId;
pub use kernel::{DefaultKernel, EvalContext, EvalKernel};
pub use scheduler::EvaluationStage;
pub use stats::{EvalReport, EvalStats, OperationTiming, StageCounts};
pub use tag::{recalc_flag_target, TagContext};
