//! Evaluation kernels: what an operation actually computes.
//!
//! The graph decides when an operation runs; the kernel decides what it
//! does. Applications plug their own kernel in with
//! [`Depsgraph::set_kernel`](crate::graph::Depsgraph::set_kernel).

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::trace;

use crate::config::EvaluationMode;
use crate::graph::{Depsgraph, IdNode, IdNodeIndex, NodeType, OpCode, OperationIndex, OperationNode};
use crate::scene::{IdData, IdKey, Main};

/// Everything an operation may look at while it runs.
pub struct EvalContext<'a> {
    pub(crate) graph: &'a Depsgraph,
    pub(crate) main: &'a Main,
    pub(crate) operation: OperationIndex,
    pub(crate) thread: usize,
}

impl<'a> EvalContext<'a> {
    pub(crate) fn new(graph: &'a Depsgraph, main: &'a Main, operation: OperationIndex, thread: usize) -> Self {
        Self {
            graph,
            main,
            operation,
            thread,
        }
    }

    pub fn graph(&self) -> &'a Depsgraph {
        self.graph
    }

    pub fn main(&self) -> &'a Main {
        self.main
    }

    pub fn operation(&self) -> OperationIndex {
        self.operation
    }

    pub fn operation_node(&self) -> &'a OperationNode {
        self.graph.operation(self.operation)
    }

    pub fn opcode(&self) -> OpCode {
        self.operation_node().opcode
    }

    pub fn component_type(&self) -> NodeType {
        self.graph.component(self.operation_node().owner).node_type
    }

    pub fn id_index(&self) -> IdNodeIndex {
        self.graph.operation_id_node(self.operation)
    }

    pub fn id_node(&self) -> &'a IdNode {
        self.graph.id_node(self.id_index())
    }

    /// Original key of the data-block the operation belongs to.
    pub fn id(&self) -> IdKey {
        self.id_node().id_orig
    }

    /// Worker thread index, zero on the calling thread.
    pub fn thread(&self) -> usize {
        self.thread
    }

    pub fn frame(&self) -> f64 {
        self.graph.frame
    }

    pub fn mode(&self) -> EvaluationMode {
        self.graph.mode
    }

    /// Evaluated data of any data-block, falling back to the original.
    pub fn evaluated(&self, id: IdKey) -> Option<Arc<IdData>> {
        self.graph.evaluated_data(self.main, id)
    }

    /// Record whether the owning data-block is enabled in this evaluation.
    ///
    /// A change requests a visibility flush before the threaded stage.
    pub fn set_enabled_on_eval(&self, enabled: bool) {
        let previous = self.id_node().is_enabled_on_eval.swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            self.graph
                .need_update_nodes_visibility
                .store(true, Ordering::Release);
        }
    }
}

/// Runs operations whose work is [`OperationWork::Kernel`](crate::graph::OperationWork).
pub trait EvalKernel: Send + Sync {
    fn evaluate(&self, ctx: &EvalContext<'_>);
}

/// Kernel used when the application does not provide one.
///
/// Evaluates object visibility and otherwise only traces.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultKernel;

impl EvalKernel for DefaultKernel {
    fn evaluate(&self, ctx: &EvalContext<'_>) {
        match (ctx.component_type(), ctx.opcode()) {
            (NodeType::Visibility, OpCode::Visibility) => {
                let hidden = ctx
                    .evaluated(ctx.id())
                    .and_then(|data| data.as_object().map(|object| object.is_hidden(ctx.mode())))
                    .unwrap_or(false);
                ctx.set_enabled_on_eval(!hidden);
            }
            (component, opcode) => {
                trace!(id = %ctx.id(), %component, %opcode, "evaluate");
            }
        }
    }
}

impl<F> EvalKernel for F
where
    F: Fn(&EvalContext<'_>) + Send + Sync,
{
    fn evaluate(&self, ctx: &EvalContext<'_>) {
        self(ctx)
    }
}
