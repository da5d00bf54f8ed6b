//! Staged Evaluation
//!
//! Runs every operation that needs an update, parents before children,
//! on a pool of worker threads.
//!
//! # Algorithm
//!
//! Each operation carries an atomic count of parents it still waits for.
//! The count covers non-cyclic inlinks from visible operations that need an
//! update. Operations whose count is zero are sent to the pool; when one
//! finishes, the counts of its children are decremented and children that
//! reach zero are sent in turn. No-ops are never sent: their children are
//! scheduled right away.
//!
//! A pass runs in stages, each draining completely before the next starts:
//!
//! 1. `CopyOnWrite`: refresh the evaluated shadows.
//! 2. `DynamicVisibility`: only when visibility is animated or changed;
//!    operations deciding visibility run, then the visibility flags are
//!    flushed again and the counts recomputed.
//! 3. `ThreadedEvaluation`: everything else, except `SerialOnly`
//!    operations, which stop their subtree.
//! 4. `SingleThreadedWorkaround`: the remaining operations, in FIFO order
//!    on the calling thread.
//!
//! # Design Decisions
//!
//! 1. The pool is a `std::thread::scope` per stage fed by a
//!    `crossbeam-channel`. An `in_flight` counter tracks sent but unfinished
//!    operations; the worker that brings it to zero shuts the pool down.
//!    A child is counted before its parent is released, so the counter
//!    cannot reach zero while work remains.
//!
//! 2. The scheduled bit is claimed with an atomic swap, so an operation is
//!    sent at most once per stage even when two parents finish together.
//!
//! 3. Timings are collected in a `Vec` per worker and merged after join.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, instrument, trace, warn};

use super::kernel::EvalContext;
use super::stats::{EvalReport, OperationTiming, StageCounts};
use crate::graph::{
    Depsgraph, NodeRef, NodeType, OperationFlags, OperationIndex, OperationWork, RecalcFlags,
    ThreadSafety,
};
use crate::scene::Main;

/// Stage of an evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationStage {
    CopyOnWrite,
    DynamicVisibility,
    ThreadedEvaluation,
    SingleThreadedWorkaround,
}

enum Message {
    Run(OperationIndex),
    Shutdown,
}

/// Shared, read-only view of a stage.
struct StageRun<'a> {
    graph: &'a Depsgraph,
    main: &'a Main,
    stage: EvaluationStage,
    need_single_thread_pass: &'a AtomicBool,
    record_stats: bool,
}

fn is_operation_visible(graph: &Depsgraph, stage: EvaluationStage, op: OperationIndex) -> bool {
    let node = graph.operation(op);
    let component = graph.component(node.owner);
    // Shadows are always refreshed to keep the evaluated data consistent.
    if component.node_type == NodeType::CopyOnWrite {
        return true;
    }
    if stage == EvaluationStage::DynamicVisibility {
        return node.has_flags(OperationFlags::AFFECTS_VISIBILITY);
    }
    component.affects_visible_id
}

impl<'a> StageRun<'a> {
    fn need_evaluate_at_stage(&self, op: OperationIndex) -> bool {
        let node = self.graph.operation(op);
        match self.stage {
            EvaluationStage::CopyOnWrite => {
                self.graph.component(node.owner).node_type == NodeType::CopyOnWrite
            }
            EvaluationStage::DynamicVisibility => {
                node.has_flags(OperationFlags::AFFECTS_VISIBILITY)
            }
            EvaluationStage::ThreadedEvaluation => {
                if node.thread_safety == ThreadSafety::SerialOnly {
                    self.need_single_thread_pass.store(true, Ordering::Release);
                    return false;
                }
                true
            }
            EvaluationStage::SingleThreadedWorkaround => true,
        }
    }

    fn schedule_node(
        &self,
        op: OperationIndex,
        dec_parents: bool,
        schedule: &mut dyn FnMut(OperationIndex),
    ) {
        if !is_operation_visible(self.graph, self.stage, op) {
            return;
        }
        let node = self.graph.operation(op);
        if !node.needs_update() {
            return;
        }
        if dec_parents {
            let previous = node.num_links_pending.fetch_update(
                Ordering::AcqRel,
                Ordering::Acquire,
                |pending| pending.checked_sub(1),
            );
            if previous != Ok(1) {
                return;
            }
        } else if node.num_links_pending.load(Ordering::Acquire) != 0 {
            return;
        }
        if !self.need_evaluate_at_stage(op) {
            return;
        }
        if node.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        if node.is_noop() {
            trace!(op = op.index(), "cascade no-op");
            node.clear_flags(OperationFlags::CLEAR_ON_EVAL);
            self.schedule_children(op, schedule);
        } else {
            schedule(op);
        }
    }

    fn schedule_children(&self, op: OperationIndex, schedule: &mut dyn FnMut(OperationIndex)) {
        for link in self.graph.operation(op).outlinks() {
            let Some(relation) = self.graph.relation(*link) else {
                continue;
            };
            let child = relation.to;
            // Only happens for cyclic relations.
            if self.graph.operation(child).is_scheduled() {
                continue;
            }
            self.schedule_node(child, !relation.is_cyclic(), schedule);
        }
    }

    fn schedule_graph(&self, schedule: &mut dyn FnMut(OperationIndex)) {
        for index in 0..self.graph.num_operations() {
            self.schedule_node(OperationIndex::from_usize(index), false, schedule);
        }
    }

    fn evaluate_node(&self, op: OperationIndex, thread: usize) -> Option<OperationTiming> {
        let node = self.graph.operation(op);
        let start = self.record_stats.then(Instant::now);
        if self.graph.config.debug.eval {
            debug!(operation = %self.graph.operation_label(op), thread, "evaluate");
        } else {
            trace!(op = op.index(), thread, "evaluate");
        }
        match node.work() {
            Some(OperationWork::CopyOnWrite) => {
                self.graph
                    .update_copy_on_write(self.main, self.graph.operation_id_node(op));
            }
            Some(OperationWork::Kernel) => {
                let ctx = EvalContext::new(self.graph, self.main, op, thread);
                self.graph.kernel.evaluate(&ctx);
            }
            Some(OperationWork::Custom(callback)) => {
                let ctx = EvalContext::new(self.graph, self.main, op, thread);
                callback(&ctx);
            }
            None => {}
        }
        node.clear_flags(OperationFlags::CLEAR_ON_EVAL);
        start.map(|start| OperationTiming {
            operation: op,
            thread,
            duration: start.elapsed(),
        })
    }
}

/// Sends the shutdown messages if a worker unwinds, so the others do not
/// wait forever.
struct ShutdownOnPanic<'a> {
    sender: &'a Sender<Message>,
    workers: usize,
}

impl Drop for ShutdownOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            for _ in 0..self.workers {
                let _ = self.sender.send(Message::Shutdown);
            }
        }
    }
}

#[derive(Default)]
struct WorkerOutcome {
    executed: usize,
    timings: Vec<OperationTiming>,
}

fn worker_loop(
    run: &StageRun<'_>,
    thread: usize,
    sender: &Sender<Message>,
    receiver: &Receiver<Message>,
    in_flight: &AtomicUsize,
    workers: usize,
) -> WorkerOutcome {
    let _guard = ShutdownOnPanic { sender, workers };
    let mut outcome = WorkerOutcome::default();
    while let Ok(Message::Run(op)) = receiver.recv() {
        if let Some(timing) = run.evaluate_node(op, thread) {
            outcome.timings.push(timing);
        }
        outcome.executed += 1;
        run.schedule_children(op, &mut |child| {
            in_flight.fetch_add(1, Ordering::AcqRel);
            let _ = sender.send(Message::Run(child));
        });
        if in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            for _ in 0..workers {
                let _ = sender.send(Message::Shutdown);
            }
        }
    }
    outcome
}

fn run_threaded_stage(run: &StageRun<'_>, workers: usize) -> WorkerOutcome {
    let (sender, receiver) = crossbeam_channel::unbounded();
    let in_flight = AtomicUsize::new(0);
    run.schedule_graph(&mut |op| {
        in_flight.fetch_add(1, Ordering::AcqRel);
        let _ = sender.send(Message::Run(op));
    });
    if in_flight.load(Ordering::Acquire) == 0 {
        return WorkerOutcome::default();
    }

    thread::scope(|scope| {
        let handles: Vec<_> = (1..=workers)
            .map(|thread| {
                let sender = sender.clone();
                let receiver = receiver.clone();
                let in_flight = &in_flight;
                scope.spawn(move || worker_loop(run, thread, &sender, &receiver, in_flight, workers))
            })
            .collect();
        handles
            .into_iter()
            .fold(WorkerOutcome::default(), |mut total, handle| {
                let outcome = match handle.join() {
                    Ok(outcome) => outcome,
                    Err(payload) => std::panic::resume_unwind(payload),
                };
                total.executed += outcome.executed;
                total.timings.extend(outcome.timings);
                total
            })
    })
}

fn run_serial_stage(run: &StageRun<'_>) -> WorkerOutcome {
    let mut outcome = WorkerOutcome::default();
    let mut queue = VecDeque::new();
    run.schedule_graph(&mut |op| queue.push_back(op));
    while let Some(op) = queue.pop_front() {
        if let Some(timing) = run.evaluate_node(op, 0) {
            outcome.timings.push(timing);
        }
        outcome.executed += 1;
        run.schedule_children(op, &mut |child| queue.push_back(child));
    }
    outcome
}

impl Depsgraph {
    /// Reset scheduling state and count the parents every operation waits
    /// for in the given stage.
    pub(crate) fn calculate_pending_parents(&self, stage: EvaluationStage) {
        for index in 0..self.operations.len() {
            let op = OperationIndex::from_usize(index);
            let node = self.operation(op);
            node.scheduled.store(false, Ordering::Release);
            let pending = if is_operation_visible(self, stage, op) && node.needs_update() {
                self.count_pending_parents(stage, op)
            } else {
                0
            };
            node.num_links_pending.store(pending, Ordering::Release);
        }
    }

    fn count_pending_parents(&self, stage: EvaluationStage, op: OperationIndex) -> u32 {
        let mut pending = 0;
        for link in self.operation(op).inlinks() {
            let Some(relation) = self.relation(*link) else {
                continue;
            };
            let NodeRef::Operation(from) = relation.from else {
                continue;
            };
            if relation.is_cyclic() {
                continue;
            }
            if !is_operation_visible(self, stage, from) {
                continue;
            }
            if !self.operation(from).needs_update() {
                continue;
            }
            pending += 1;
        }
        pending
    }

    /// Pending parents an operation is expected to wait for at the start of
    /// the threaded stage.
    pub fn expected_pending_parents(&self, op: OperationIndex) -> u32 {
        let stage = EvaluationStage::ThreadedEvaluation;
        if is_operation_visible(self, stage, op) && self.operation(op).needs_update() {
            self.count_pending_parents(stage, op)
        } else {
            0
        }
    }

    fn run_stage(
        &self,
        main: &Main,
        stage: EvaluationStage,
        need_single_thread_pass: &AtomicBool,
        workers: usize,
    ) -> WorkerOutcome {
        let run = StageRun {
            graph: self,
            main,
            stage,
            need_single_thread_pass,
            record_stats: self.config.record_stats || self.config.debug.time,
        };
        match stage {
            EvaluationStage::SingleThreadedWorkaround => run_serial_stage(&run),
            _ => run_threaded_stage(&run, workers),
        }
    }

    /// Evaluate everything flushed for update.
    pub(crate) fn evaluate(&mut self, main: &Main) -> StageCounts {
        let mut counts = StageCounts::default();
        if self.entry_tags.is_empty() {
            return counts;
        }
        let start = Instant::now();
        self.is_evaluating = true;
        self.ensure_scene_cow(main);

        let workers = self.config.worker_count();
        let need_single_thread_pass = AtomicBool::new(false);
        let mut timings = Vec::new();

        self.calculate_pending_parents(EvaluationStage::CopyOnWrite);
        let outcome = self.run_stage(
            main,
            EvaluationStage::CopyOnWrite,
            &need_single_thread_pass,
            workers,
        );
        counts.copy_on_write = outcome.executed;
        timings.extend(outcome.timings);

        if self.has_animated_visibility || self.need_update_nodes_visibility.load(Ordering::Acquire)
        {
            self.calculate_pending_parents(EvaluationStage::DynamicVisibility);
            let outcome = self.run_stage(
                main,
                EvaluationStage::DynamicVisibility,
                &need_single_thread_pass,
                workers,
            );
            counts.dynamic_visibility = outcome.executed;
            timings.extend(outcome.timings);
            self.flush_visibility_flags_if_needed();
            // Counts from the visibility stage only cover visibility
            // operations, which have all run by now.
            self.calculate_pending_parents(EvaluationStage::ThreadedEvaluation);
        }

        let outcome = self.run_stage(
            main,
            EvaluationStage::ThreadedEvaluation,
            &need_single_thread_pass,
            workers,
        );
        counts.threaded = outcome.executed;
        timings.extend(outcome.timings);

        if need_single_thread_pass.load(Ordering::Acquire) {
            let outcome = self.run_stage(
                main,
                EvaluationStage::SingleThreadedWorkaround,
                &need_single_thread_pass,
                workers,
            );
            counts.single_threaded = outcome.executed;
            timings.extend(outcome.timings);
        }

        let elapsed = start.elapsed();
        self.stats.record_pass(&counts, elapsed, timings);
        if self.config.debug.time {
            debug!(?elapsed, operations = counts.total(), "evaluation finished");
        }
        self.clear_tags();
        self.is_evaluating = false;
        counts
    }

    /// Bring the evaluated state up to date with the scene's current frame
    /// and every pending tag. Relations tagged as outdated are rebuilt
    /// first.
    #[instrument(skip_all, fields(scene = %self.scene))]
    pub fn evaluate_on_refresh(&mut self, main: &Main) -> EvalReport {
        self.update_outdated_relations(main);
        if let Some(scene) = main.scene(self.scene) {
            if scene.frame != self.frame {
                self.frame = scene.frame;
                self.tag_time_source();
            } else if main.recalc(self.scene).contains(RecalcFlags::FRAME_CHANGE) {
                self.tag_time_source();
            }
        }
        self.flush_updates_and_refresh(main)
    }

    /// Move to `frame` and evaluate.
    #[instrument(skip_all, fields(scene = %self.scene, frame = frame))]
    pub fn evaluate_on_framechange(&mut self, main: &Main, frame: f64) -> EvalReport {
        self.update_outdated_relations(main);
        self.frame = frame;
        self.tag_time_source();
        self.flush_updates_and_refresh(main)
    }

    /// Rebuild the relations of a built graph tagged as outdated. A failed
    /// rebuild leaves the previous graph in place, which is then evaluated
    /// as it is.
    fn update_outdated_relations(&mut self, main: &Main) {
        if !self.need_update || self.last_scope.is_none() {
            return;
        }
        debug!("relations outdated, rebuilding before evaluation");
        if let Err(err) = self.relations_update(main) {
            warn!(%err, "relations update failed, evaluating outdated graph");
        }
    }

    fn flush_updates_and_refresh(&mut self, main: &Main) -> EvalReport {
        self.set_scene_cow_frame();
        self.tag_ids_for_visible_update(main);
        self.flush_updates();
        let stages = self.evaluate(main);
        self.take_report(stages)
    }

    /// Collect what the pass changed and reset the per-id update state.
    fn take_report(&mut self, stages: StageCounts) -> EvalReport {
        let editor_updates = self.editor_updates.drain(..).collect();
        let mut updated_ids = Vec::new();
        for index in self.id_map.values() {
            let node = &mut self.id_nodes[index.index()];
            if !node.recalc.is_empty() {
                updated_ids.push((node.id_orig, node.recalc));
            }
            node.recalc = Default::default();
            node.is_user_modified = false;
            node.is_cow_explicitly_tagged = false;
        }
        EvalReport {
            executed: stages.total(),
            stages,
            editor_updates,
            updated_ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    use super::*;
    use crate::config::{EvaluationMode, GraphConfig};
    use crate::graph::{ComponentIndex, OpCode, OperationIdKey, RelationFlags, UpdateSource};
    use crate::scene::{IdData, IdKey, IdPayload, IdType, SceneData};

    fn graph(num_threads: usize) -> (Main, Depsgraph, ComponentIndex) {
        let mut main = Main::new();
        let scene = main.add(IdData::new("SCScene", IdPayload::Scene(SceneData::default())));
        let config = GraphConfig {
            num_threads,
            record_stats: true,
            ..Default::default()
        };
        let mut graph = Depsgraph::with_config(scene, 0, EvaluationMode::Viewport, config);
        let (id, _) = graph.add_id_node(IdKey(99), IdType::Text, "TXText");
        let comp = graph.add_component(id, NodeType::Parameters, "");
        (main, graph, comp)
    }

    fn counting_op(
        graph: &mut Depsgraph,
        comp: ComponentIndex,
        name: &str,
        counter: &Arc<AtomicU32>,
        safety: ThreadSafety,
    ) -> OperationIndex {
        let counter = counter.clone();
        graph
            .add_operation(
                comp,
                OperationIdKey::new(OpCode::ParametersEval, name, -1),
                Some(OperationWork::Custom(Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))),
                safety,
            )
            .0
    }

    #[test]
    fn pass_runs_each_operation_once() {
        let (main, mut graph, comp) = graph(4);
        let counter = Arc::new(AtomicU32::new(0));
        let ops: Vec<_> = (0..8)
            .map(|i| counting_op(&mut graph, comp, &format!("op{i}"), &counter, ThreadSafety::ParallelSafe))
            .collect();
        // Diamond-ish fan: 0 -> 1..7, all of them -> 7.
        for op in &ops[1..7] {
            graph.add_relation(NodeRef::Operation(ops[0]), *op, "fan", RelationFlags::empty());
            graph.add_relation(NodeRef::Operation(*op), ops[7], "join", RelationFlags::empty());
        }
        for op in &ops {
            graph.tag_operation(*op, UpdateSource::UserEdit);
        }
        assert_eq!(graph.expected_pending_parents(ops[7]), 6);
        assert_eq!(graph.expected_pending_parents(ops[0]), 0);

        let report = graph.evaluate_on_refresh(&main);
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        assert_eq!(report.executed, 8);
        assert_eq!(report.stages.threaded, 8);
        for op in &ops {
            assert!(!graph.operation(*op).needs_update());
            assert!(!graph
                .operation(*op)
                .flags()
                .intersects(OperationFlags::CLEAR_ON_EVAL));
        }
        assert_eq!(graph.entry_tags().count(), 0);
        assert_eq!(graph.stats().timings.len(), 8);
        assert!(!graph.is_evaluating());
    }

    #[test]
    fn serial_operations_run_after_threaded_stage() {
        let (main, mut graph, comp) = graph(2);
        let counter = Arc::new(AtomicU32::new(0));
        let parallel = counting_op(&mut graph, comp, "parallel", &counter, ThreadSafety::ParallelSafe);
        let serial = counting_op(&mut graph, comp, "serial", &counter, ThreadSafety::SerialOnly);
        let after = counting_op(&mut graph, comp, "after", &counter, ThreadSafety::ParallelSafe);
        graph.add_relation(NodeRef::Operation(parallel), serial, "a", RelationFlags::empty());
        graph.add_relation(NodeRef::Operation(serial), after, "b", RelationFlags::empty());
        for op in [parallel, serial, after] {
            graph.tag_operation(op, UpdateSource::Time);
        }
        let report = graph.evaluate_on_refresh(&main);
        assert_eq!(report.stages.threaded, 1);
        assert_eq!(report.stages.single_threaded, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn noop_cascades_and_cycles_do_not_block() {
        let (main, mut graph, comp) = graph(2);
        let counter = Arc::new(AtomicU32::new(0));
        let a = counting_op(&mut graph, comp, "a", &counter, ThreadSafety::ParallelSafe);
        let (noop, _) = graph.add_operation(
            comp,
            OperationIdKey::new(OpCode::Operation, "noop", -1),
            None,
            ThreadSafety::ParallelSafe,
        );
        let b = counting_op(&mut graph, comp, "b", &counter, ThreadSafety::ParallelSafe);
        graph.add_relation(NodeRef::Operation(a), noop, "a-noop", RelationFlags::empty());
        graph.add_relation(NodeRef::Operation(noop), b, "noop-b", RelationFlags::empty());
        graph.add_relation(NodeRef::Operation(b), a, "back", RelationFlags::CYCLIC);
        for op in [a, noop, b] {
            graph.tag_operation(op, UpdateSource::Time);
        }
        let report = graph.evaluate_on_refresh(&main);
        assert_eq!(report.executed, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(!graph.operation(noop).needs_update());
    }

    #[test]
    fn invisible_operations_keep_their_tags() {
        let (main, mut graph, comp) = graph(1);
        let counter = Arc::new(AtomicU32::new(0));
        let op = counting_op(&mut graph, comp, "hidden", &counter, ThreadSafety::ParallelSafe);
        graph.component_mut(comp).affects_visible_id = false;
        graph.tag_operation(op, UpdateSource::Time);
        let report = graph.evaluate_on_refresh(&main);
        assert_eq!(report.executed, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(graph.operation(op).needs_update());
        assert_eq!(graph.expected_pending_parents(op), 0);
    }

    #[test]
    fn pending_parents_skip_clean_cyclic_and_hidden() {
        let (_main, mut graph, comp) = graph(1);
        let counter = Arc::new(AtomicU32::new(0));
        let id_index = graph.component(comp).owner();
        let hidden_comp = graph.add_component(id_index, NodeType::Transform, "");
        graph.component_mut(hidden_comp).affects_visible_id = false;

        let dirty = counting_op(&mut graph, comp, "dirty", &counter, ThreadSafety::ParallelSafe);
        let dirty_too = counting_op(&mut graph, comp, "dirty_too", &counter, ThreadSafety::ParallelSafe);
        let clean = counting_op(&mut graph, comp, "clean", &counter, ThreadSafety::ParallelSafe);
        let cyclic = counting_op(&mut graph, comp, "cyclic", &counter, ThreadSafety::ParallelSafe);
        let hidden = counting_op(&mut graph, hidden_comp, "hidden", &counter, ThreadSafety::ParallelSafe);
        let target = counting_op(&mut graph, comp, "target", &counter, ThreadSafety::ParallelSafe);
        for (parent, flags) in [
            (dirty, RelationFlags::empty()),
            (dirty_too, RelationFlags::empty()),
            (clean, RelationFlags::empty()),
            (cyclic, RelationFlags::CYCLIC),
            (hidden, RelationFlags::empty()),
        ] {
            graph.add_relation(NodeRef::Operation(parent), target, "parent", flags);
        }
        // The hidden operation also feeds the clean one.
        graph.add_relation(NodeRef::Operation(hidden), clean, "hidden-clean", RelationFlags::empty());

        for op in [dirty, dirty_too, clean, cyclic, hidden, target] {
            graph.tag_operation(op, UpdateSource::Time);
        }
        graph.operation(clean).clear_flags(OperationFlags::NEEDS_UPDATE);

        graph.calculate_pending_parents(EvaluationStage::ThreadedEvaluation);
        let pending = |op: OperationIndex| graph.operation(op).num_links_pending();
        assert_eq!(pending(target), 2);
        assert_eq!(pending(dirty), 0);
        assert_eq!(pending(dirty_too), 0);
        assert_eq!(pending(cyclic), 0);
        // Clean and hidden operations are not waited on at all.
        assert_eq!(pending(clean), 0);
        assert_eq!(pending(hidden), 0);
        assert_eq!(graph.expected_pending_parents(target), 2);

        // Once the clean parent is dirty again it counts too.
        graph.tag_operation(clean, UpdateSource::Time);
        graph.calculate_pending_parents(EvaluationStage::ThreadedEvaluation);
        assert_eq!(graph.operation(target).num_links_pending(), 3);
        assert_eq!(graph.operation(clean).num_links_pending(), 0);
        assert!(!graph.operation(target).is_scheduled());
    }

    #[test]
    fn nothing_tagged_is_a_no_op() {
        let (main, mut graph, _) = graph(1);
        let report = graph.evaluate_on_refresh(&main);
        assert_eq!(report.executed, 0);
        assert_eq!(graph.stats().passes, 0);
    }
}
