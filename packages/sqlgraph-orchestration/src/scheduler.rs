//! Generation scheduler
//!
//! Each generation scans the nodes in insertion order and, per node:
//!
//! 1. fails it when an input is unconnected, dangling, or carries an error
//!    produced in this generation
//! 2. waits while any input node is running
//! 3. waits until every input node is done
//! 4. re-runs it when it or any input changed, or it failed last time;
//!    otherwise keeps its outputs (memoized)
//! 5. dispatches it to a blocking worker, bounded by the worker budget
//!
//! The controlling task owns the graph for the whole generation. Workers get
//! copies of their inputs and hand results back through the join set, so no
//! node state is shared across threads.

use crate::config::EngineConfig;
use crate::dag::ensure_acyclic;
use crate::error::{EngineError, KernelError, NodeError, Result};
use crate::graph::Graph;
use crate::kernel::{Invocation, KernelDef, SourceStamp};
use crate::token::NodeData;
use serde::{Deserialize, Serialize};
use sqlgraph_storage::ExecutionContext;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outcome of one generation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationReport {
    pub run_id: Uuid,
    /// Nodes whose kernel (or bypass) ran successfully
    pub executed: Vec<String>,
    /// Nodes whose previous outputs were kept
    pub memoized: Vec<String>,
    /// Nodes that ended the generation with an error
    pub failed: Vec<String>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl GenerationReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            ..Default::default()
        }
    }

    /// Every node finished without error and nothing was interrupted
    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.failed.is_empty()
    }
}

enum Decision {
    Fail(NodeError),
    Wait,
    Memoize,
    Dispatch,
}

/// Work handed to a blocking worker
struct Job {
    index: usize,
    name: String,
    def: Option<Arc<KernelDef>>,
    kernel: String,
    inputs: Vec<NodeData>,
    bypass: bool,
    output_len: usize,
    previous: Option<ExecutionContext>,
    call: Invocation,
    cancel: CancellationToken,
}

/// What a worker hands back
struct Completion {
    index: usize,
    outputs: Option<Vec<NodeData>>,
    error: Option<NodeError>,
    context: Option<ExecutionContext>,
    source: Option<SourceStamp>,
}

/// Runs generations over a graph with a bounded worker pool
#[derive(Debug, Clone)]
pub struct Scheduler {
    worker_budget: usize,
}

impl Scheduler {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_budget(config.worker_budget())
    }

    pub fn with_budget(worker_budget: usize) -> Self {
        Self {
            worker_budget: worker_budget.max(1),
        }
    }

    pub fn worker_budget(&self) -> usize {
        self.worker_budget
    }

    /// Run one generation to completion or interruption
    ///
    /// Node failures are recorded on the nodes and in the report; only
    /// graph-level problems (a wiring cycle, a lost worker) return `Err`.
    pub async fn execute(&self, graph: &mut Graph) -> Result<GenerationReport> {
        let start = Instant::now();
        let mut report = GenerationReport::new(Uuid::new_v4());

        ensure_acyclic(graph)?;
        let cancel = graph.interrupt_handle();
        begin_generation(graph);

        info!(
            "Generation {} started - {} nodes, {} workers",
            report.run_id,
            graph.len(),
            self.worker_budget
        );

        let permits = Arc::new(Semaphore::new(self.worker_budget));
        let mut tasks: JoinSet<Completion> = JoinSet::new();

        while !cancel.is_cancelled() {
            let mut pending = false;
            let mut resolved = false;

            for i in 0..graph.len() {
                if cancel.is_cancelled() {
                    break;
                }
                let node = graph.node_at(i);
                if node.state.done {
                    continue;
                }
                pending = true;
                if node.state.running {
                    continue;
                }

                match evaluate(graph, i) {
                    Decision::Wait => {}
                    Decision::Fail(err) => {
                        let node = graph.node_at_mut(i);
                        warn!(node = %node.name(), error = %err, "node failed before dispatch");
                        report.failed.push(node.name().to_string());
                        node.state.error = Some(err);
                        node.state.done = true;
                        node.state.changed = true;
                        resolved = true;
                    }
                    Decision::Memoize => {
                        let node = graph.node_at_mut(i);
                        debug!(node = %node.name(), "memoized");
                        report.memoized.push(node.name().to_string());
                        node.state.done = true;
                        resolved = true;
                    }
                    Decision::Dispatch => {
                        let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                            continue;
                        };
                        let job = prepare_job(graph, i, &cancel);
                        debug!(node = %job.name, kernel = %job.kernel, "dispatched");
                        tasks.spawn_blocking(move || {
                            let _permit = permit;
                            run_job(job)
                        });
                    }
                }
            }

            if !pending {
                break;
            }
            if resolved {
                // dependents of what was just resolved may be ready now
                continue;
            }
            if tasks.is_empty() {
                // acyclic wiring always makes progress; guard against spinning anyway
                error!("Generation {} stalled with pending nodes", report.run_id);
                break;
            }

            tokio::select! {
                joined = tasks.join_next() => {
                    if let Some(joined) = joined {
                        let completion = joined.map_err(|e| lost_worker(graph, e))?;
                        apply_completion(graph, completion, &mut report);
                    }
                }
                _ = cancel.cancelled() => {}
            }
        }

        // in-flight workers observe the token themselves
        while let Some(joined) = tasks.join_next().await {
            let completion = joined.map_err(|e| lost_worker(graph, e))?;
            apply_completion(graph, completion, &mut report);
        }

        report.cancelled = cancel.is_cancelled();
        finish_generation(graph, report.cancelled);
        report.duration_ms = start.elapsed().as_millis() as u64;

        if report.cancelled {
            warn!(
                "Generation {} interrupted after {}ms - {} executed, {} failed",
                report.run_id,
                report.duration_ms,
                report.executed.len(),
                report.failed.len()
            );
        } else {
            info!(
                "Generation {} finished in {}ms - {} executed, {} memoized, {} failed",
                report.run_id,
                report.duration_ms,
                report.executed.len(),
                report.memoized.len(),
                report.failed.len()
            );
        }
        Ok(report)
    }
}

impl Graph {
    /// Run one generation with a scheduler sized from this graph's config
    pub async fn execute(&mut self) -> Result<GenerationReport> {
        Scheduler::new(self.config()).execute(self).await
    }
}

fn begin_generation(graph: &mut Graph) {
    for node in graph.nodes_mut() {
        let state = &mut node.state;
        state.done = false;
        state.running = false;
        if let Some(err) = state.error.take() {
            state.prior_error = Some(err);
        }
    }
}

fn finish_generation(graph: &mut Graph, cancelled: bool) {
    for node in graph.nodes_mut() {
        let state = &mut node.state;
        state.running = false;
        if cancelled {
            // nodes never reached keep last generation's error
            if !state.done && state.error.is_none() {
                state.error = state.prior_error.take();
            }
        } else {
            state.changed = false;
        }
        state.prior_error = None;
    }
}

fn evaluate(graph: &Graph, i: usize) -> Decision {
    let node = graph.node_at(i);
    let mut upstream = Vec::with_capacity(node.inputs().len());

    for (slot, input) in node.inputs().iter().enumerate() {
        if !input.is_connected() {
            return Decision::Fail(NodeError::not_connected(slot));
        }
        let Some(up) = graph.index_of(&input.node) else {
            return Decision::Fail(NodeError::missing_node(slot, &input.node));
        };
        let up_node = graph.node_at(up);
        if up_node.state.done && up_node.state.error.is_some() {
            return Decision::Fail(NodeError::Upstream {
                slot,
                source_node: input.node.clone(),
            });
        }
        upstream.push(up_node);
    }

    if upstream.iter().any(|u| u.state.running) {
        return Decision::Wait;
    }
    if upstream.iter().any(|u| !u.state.done) {
        return Decision::Wait;
    }

    let rerun = node.state.changed
        || node.state.prior_error.is_some()
        || upstream.iter().any(|u| u.state.changed);
    if rerun {
        Decision::Dispatch
    } else {
        Decision::Memoize
    }
}

fn prepare_job(graph: &mut Graph, i: usize, cancel: &CancellationToken) -> Job {
    let inputs: Vec<NodeData> = graph
        .node_at(i)
        .inputs()
        .iter()
        .map(|input| {
            graph
                .find_node(&input.node)
                .map(|up| up.output(input.output))
                .unwrap_or_default()
        })
        .collect();

    let def = graph.registry().find(graph.node_at(i).kernel()).cloned();
    let database_dir = graph.config().database_dir.clone();
    let namespace = graph.memory_namespace().to_string();

    let node = graph.node_at_mut(i);
    node.state.running = true;

    Job {
        index: i,
        name: node.name().to_string(),
        def,
        kernel: node.kernel().to_string(),
        inputs,
        bypass: node.is_bypassed(),
        output_len: node.outputs().len(),
        previous: node.context.take(),
        call: Invocation::new(node.name(), node.parameters().clone(), database_dir, namespace),
        cancel: cancel.clone(),
    }
}

/// Bypassed nodes forward input `i` to output `i`
fn bypass_outputs(inputs: &[NodeData], output_len: usize) -> Vec<NodeData> {
    (0..output_len.max(inputs.len()))
        .map(|i| inputs.get(i).cloned().unwrap_or_default())
        .collect()
}

fn run_job(job: Job) -> Completion {
    let Job {
        index,
        name,
        def,
        kernel,
        inputs,
        bypass,
        output_len,
        previous,
        mut call,
        cancel,
    } = job;

    if let Some(ctx) = previous {
        if let Err(e) = ctx.destroy() {
            warn!(node = %name, error = %e, "failed to close previous execution context");
        }
    }

    let result = if bypass {
        Ok(bypass_outputs(&inputs, output_len))
    } else {
        match def {
            None => Err(KernelError::UnknownKernel(kernel)),
            Some(def) => catch_unwind(AssertUnwindSafe(|| def.kernel().execute(&inputs, &mut call)))
                .unwrap_or_else(|payload| Err(KernelError::Panicked(panic_message(payload.as_ref())))),
        }
    };

    let (mut outputs, mut error) = match result {
        Ok(outputs) => (Some(outputs), None),
        Err(e) => (None, Some(NodeError::from(e))),
    };

    if cancel.is_cancelled() {
        outputs = None;
        error = Some(NodeError::Cancelled);
    }

    let (mut context, source) = call.into_parts();
    if !cancel.is_cancelled() {
        if let Some(ctx) = context.as_mut() {
            if let Err(e) = ctx.commit() {
                warn!(node = %name, error = %e, "commit after kernel failed");
                if error.is_none() {
                    outputs = None;
                    error = Some(NodeError::from(KernelError::from(e)));
                }
            }
        }
    }

    Completion {
        index,
        outputs,
        error,
        context,
        source,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn apply_completion(graph: &mut Graph, completion: Completion, report: &mut GenerationReport) {
    let node = graph.node_at_mut(completion.index);
    node.context = completion.context;
    if completion.source.is_some() {
        node.source = completion.source;
    }

    match completion.error {
        None => {
            if let Some(outputs) = completion.outputs {
                node.set_outputs(outputs);
            }
            debug!(node = %node.name(), "executed");
            report.executed.push(node.name().to_string());
        }
        Some(err) => {
            warn!(node = %node.name(), error = %err, "node failed");
            report.failed.push(node.name().to_string());
            node.state.error = Some(err);
        }
    }

    node.state.changed = true;
    node.state.running = false;
    node.state.done = true;
}

/// A worker task died outside the kernel's panic guard
fn lost_worker(graph: &mut Graph, err: tokio::task::JoinError) -> EngineError {
    error!(error = %err, "worker task lost; abandoning generation");
    for node in graph.nodes_mut() {
        node.state.running = false;
    }
    EngineError::Worker(err.to_string())
}
