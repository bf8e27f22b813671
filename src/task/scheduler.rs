//! Executes task graphs in dependency order
//!
//! Ready tasks run earliest-deadline first. A task only runs once every
//! predecessor in its graph has completed successfully; tasks downstream of
//! a failure are abandoned (and release what they acquired) so they can be
//! retried on a later request.

use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

use rayon::prelude::*;

use super::context::RenderContext;
use super::graph::{NodeKind, TaskGraph};
use super::task::{ReadyKey, Task};
use crate::core::{Error, Result};

/// Counts from one graph execution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Task bodies that ran
    pub executed: usize,
    /// Bodies that ran and succeeded
    pub succeeded: usize,
    /// Bodies that ran and failed, or could not be prepared
    pub failed: usize,
    /// Tasks skipped because a predecessor failed
    pub abandoned: usize,
    /// Tasks owned by another graph that this one waited for
    pub waited: usize,
    /// Tasks that were already done
    pub already_done: usize,
    /// Execution order of the bodies that ran
    pub order: Vec<String>,
}

impl ExecutionReport {
    /// True if nothing failed or was abandoned.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.abandoned == 0
    }
}

/// Bookkeeping for one run over a graph.
struct Execution {
    indegree: Vec<usize>,
    /// A predecessor failed or was abandoned
    blocked: Vec<bool>,
    ready: BinaryHeap<ReadyKey>,
    /// In-flight tasks of other graphs, waited on only when nothing else is ready
    foreign: VecDeque<usize>,
}

impl Execution {
    fn new(graph: &TaskGraph) -> Self {
        let mut exec = Self {
            indegree: graph.nodes.iter().map(|n| n.predecessors.len()).collect(),
            blocked: vec![false; graph.nodes.len()],
            ready: BinaryHeap::new(),
            foreign: VecDeque::new(),
        };
        for idx in 0..graph.nodes.len() {
            if exec.indegree[idx] == 0 {
                exec.make_ready(graph, idx);
            }
        }
        exec
    }

    fn make_ready(&mut self, graph: &TaskGraph, idx: usize) {
        let node = &graph.nodes[idx];
        if node.kind == NodeKind::InFlight && !self.blocked[idx] {
            self.foreign.push_back(idx);
        } else {
            self.ready.push(ReadyKey {
                deadline: node.task.deadline(),
                seq: idx,
            });
        }
    }

    fn complete(&mut self, graph: &TaskGraph, idx: usize, success: bool) {
        for &succ in &graph.nodes[idx].successors {
            if !success {
                self.blocked[succ] = true;
            }
            self.indegree[succ] -= 1;
            if self.indegree[succ] == 0 {
                self.make_ready(graph, succ);
            }
        }
    }
}

/// Runs task graphs, sequentially or on a rayon pool.
#[derive(Default)]
pub struct Scheduler {
    pool: Option<rayon::ThreadPool>,
}

impl Scheduler {
    /// Scheduler using rayon's global pool for parallel runs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheduler with a dedicated pool of `threads` workers.
    pub fn with_threads(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("terramp-worker-{}", i))
            .build()
            .map_err(|e| Error::config(format!("failed to build worker pool: {}", e)))?;
        Ok(Self { pool: Some(pool) })
    }

    /// Build and run the graph needed to complete `roots`.
    pub fn run_tasks(&self, roots: &[Arc<Task>], ctx: &mut RenderContext) -> ExecutionReport {
        self.run(TaskGraph::build(roots), ctx)
    }

    /// Run every task of `graph` on the calling thread.
    pub fn run(&self, mut graph: TaskGraph, ctx: &mut RenderContext) -> ExecutionReport {
        graph.expand();
        let mut report = ExecutionReport::default();
        let mut exec = Execution::new(&graph);

        loop {
            let idx = match exec.ready.pop() {
                Some(key) => key.seq,
                None => match exec.foreign.pop_front() {
                    Some(idx) => idx,
                    None => break,
                },
            };

            let success = if exec.blocked[idx] {
                graph.settle_abandoned(idx);
                report.abandoned += 1;
                false
            } else {
                match graph.nodes[idx].kind {
                    NodeKind::Claimed => {
                        let task = graph.nodes[idx].task.clone();
                        let success = task.execute(ctx);
                        finish_executed(&mut graph, idx, success, &mut report);
                        success
                    }
                    _ => settle_unowned(&mut graph, idx, &mut report),
                }
            };
            exec.complete(&graph, idx, success);
        }

        report
    }

    /// Run the graph, executing independent ready tasks concurrently.
    ///
    /// Each worker gets its own [`RenderContext`].
    pub fn run_parallel(&self, mut graph: TaskGraph) -> ExecutionReport {
        graph.expand();
        let mut report = ExecutionReport::default();
        let mut exec = Execution::new(&graph);

        loop {
            let mut batch = Vec::new();
            while let Some(key) = exec.ready.pop() {
                batch.push(key.seq);
            }

            if batch.is_empty() {
                match exec.foreign.pop_front() {
                    Some(idx) => {
                        let success = settle_unowned(&mut graph, idx, &mut report);
                        exec.complete(&graph, idx, success);
                        continue;
                    }
                    None => break,
                }
            }

            let mut runnable = Vec::new();
            let mut settled = Vec::new();
            for idx in batch {
                if exec.blocked[idx] {
                    graph.settle_abandoned(idx);
                    report.abandoned += 1;
                    settled.push((idx, false));
                } else if graph.nodes[idx].kind == NodeKind::Claimed {
                    runnable.push((idx, graph.nodes[idx].task.clone()));
                } else {
                    let success = settle_unowned(&mut graph, idx, &mut report);
                    settled.push((idx, success));
                }
            }

            let run = |tasks: &Vec<(usize, Arc<Task>)>| -> Vec<(usize, bool)> {
                tasks
                    .par_iter()
                    .map_init(RenderContext::new, |ctx, (idx, task)| (*idx, task.execute(ctx)))
                    .collect()
            };
            let results = match &self.pool {
                Some(pool) => pool.install(|| run(&runnable)),
                None => run(&runnable),
            };

            for (idx, success) in results {
                finish_executed(&mut graph, idx, success, &mut report);
                settled.push((idx, success));
            }
            for (idx, success) in settled {
                exec.complete(&graph, idx, success);
            }
        }

        report
    }
}

/// Release a task that just ran and record its outcome.
fn finish_executed(graph: &mut TaskGraph, idx: usize, success: bool, report: &mut ExecutionReport) {
    let node = &mut graph.nodes[idx];
    node.settled = true;
    if node.prepared {
        node.task.body().release();
    }
    report.executed += 1;
    report.order.push(node.task.label());
    if success {
        report.succeeded += 1;
    } else {
        report.failed += 1;
    }
}

/// Settle a node this graph does not run itself.
fn settle_unowned(graph: &mut TaskGraph, idx: usize, report: &mut ExecutionReport) -> bool {
    match graph.nodes[idx].kind {
        NodeKind::Done => {
            graph.nodes[idx].settled = true;
            report.already_done += 1;
            true
        }
        NodeKind::InFlight => {
            graph.nodes[idx].settled = true;
            report.waited += 1;
            graph.nodes[idx].task.wait()
        }
        NodeKind::Failed => {
            graph.settle_abandoned(idx);
            report.failed += 1;
            false
        }
        NodeKind::Claimed => unreachable!("claimed tasks are executed, not settled"),
    }
}
