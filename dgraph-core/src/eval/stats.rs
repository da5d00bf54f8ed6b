//! Evaluation statistics.

use std::time::Duration;

use serde::Serialize;

use crate::graph::{OperationIndex, RecalcFlags};
use crate::scene::IdKey;

/// Time spent in one operation.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct OperationTiming {
    pub operation: OperationIndex,
    pub thread: usize,
    pub duration: Duration,
}

/// Operations executed per stage of a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub copy_on_write: usize,
    pub dynamic_visibility: usize,
    pub threaded: usize,
    pub single_threaded: usize,
}

impl StageCounts {
    pub fn total(&self) -> usize {
        self.copy_on_write + self.dynamic_visibility + self.threaded + self.single_threaded
    }
}

/// Accumulated over the lifetime of a graph.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvalStats {
    pub passes: u64,
    pub operations_evaluated: u64,
    pub last_pass: Duration,
    /// Per-operation timings of the last pass, when recording is enabled.
    pub timings: Vec<OperationTiming>,
}

impl EvalStats {
    pub(crate) fn record_pass(&mut self, stages: &StageCounts, duration: Duration, timings: Vec<OperationTiming>) {
        self.passes += 1;
        self.operations_evaluated += stages.total() as u64;
        self.last_pass = duration;
        self.timings = timings;
    }

    /// Slowest operations of the last pass, slowest first.
    pub fn slowest(&self, count: usize) -> Vec<OperationTiming> {
        let mut timings = self.timings.clone();
        timings.sort_by(|a, b| b.duration.cmp(&a.duration));
        timings.truncate(count);
        timings
    }
}

/// Outcome of one evaluation pass.
#[derive(Debug, Clone, Default)]
pub struct EvalReport {
    pub executed: usize,
    pub stages: StageCounts,
    /// Expanded, user-modified data-blocks editors should redraw for.
    pub editor_updates: Vec<IdKey>,
    /// Data-blocks updated in this pass with their recalc flags.
    pub updated_ids: Vec<(IdKey, RecalcFlags)>,
}
