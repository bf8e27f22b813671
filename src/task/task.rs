//! Schedulable units of work with completion state
//!
//! A task moves through:
//! - `Pending`: not produced, or invalidated, or failed last time
//! - `Scheduled`: claimed by one task graph, waiting for its predecessors
//! - `Running`: body executing
//! - `Done`: body succeeded and nothing invalidated it since

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use super::context::RenderContext;
use crate::core::Result;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique task identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

/// Scheduling priority hint: the frame by which the result is wanted.
///
/// Lower is more urgent. Advisory only, nothing is cancelled when it passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Deadline(pub u64);

impl Deadline {
    /// Wanted as soon as possible
    pub const IMMEDIATE: Deadline = Deadline(0);
    /// Background work
    pub const NONE: Deadline = Deadline(u64::MAX);

    pub fn frame(frame: u64) -> Self {
        Self(frame)
    }
}

/// Lifecycle state of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Scheduled,
    Running,
    Done,
}

/// Why a task was sent back to `Pending`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Upstream data changed
    DataChanged,
    /// The producer was given a new configuration
    Reconfigured,
}

/// Result of trying to claim a task for a graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Claim {
    /// This caller now owns the task's next execution
    Claimed,
    /// Another graph owns it; wait for the outcome
    InFlight,
    /// Nothing to do
    Done,
}

/// The work behind a task.
///
/// `prepare` runs once when a graph claims the task and returns the tasks
/// that must finish first. `release` runs exactly once after `prepare`,
/// whether the task ran, failed, or was abandoned.
pub trait TaskBody: Send + Sync {
    /// Short description for logs.
    fn label(&self) -> String;

    /// Acquire prerequisites and report their tasks.
    fn prepare(&self) -> Result<Vec<Arc<Task>>> {
        Ok(Vec::new())
    }

    /// Do the work. `false` marks a recoverable failure.
    fn run(&self, ctx: &mut RenderContext) -> bool;

    /// Give back whatever `prepare` acquired.
    fn release(&self) {}
}

/// Body built from a closure, for ad-hoc work in a task graph.
pub struct FnBody<F> {
    label: String,
    f: F,
}

impl<F> TaskBody for FnBody<F>
where
    F: Fn(&mut RenderContext) -> bool + Send + Sync,
{
    fn label(&self) -> String {
        self.label.clone()
    }

    fn run(&self, ctx: &mut RenderContext) -> bool {
        (self.f)(ctx)
    }
}

#[derive(Debug)]
struct TaskStatus {
    state: TaskState,
    deadline: Deadline,
    reason: Option<InvalidationReason>,
    /// Invalidated while scheduled or running; goes back to Pending when it finishes
    stale: bool,
    runs: u32,
    failures: u32,
    last_failed: bool,
}

/// A schedulable unit with completion state.
pub struct Task {
    id: TaskId,
    body: Box<dyn TaskBody>,
    status: Mutex<TaskStatus>,
    finished: Condvar,
}

impl Task {
    pub fn new(body: impl TaskBody + 'static, deadline: Deadline) -> Arc<Self> {
        Arc::new(Self {
            id: TaskId::next(),
            body: Box::new(body),
            status: Mutex::new(TaskStatus {
                state: TaskState::Pending,
                deadline,
                reason: None,
                stale: false,
                runs: 0,
                failures: 0,
                last_failed: false,
            }),
            finished: Condvar::new(),
        })
    }

    /// Task whose work is a closure.
    pub fn from_fn<F>(label: impl Into<String>, deadline: Deadline, f: F) -> Arc<Self>
    where
        F: Fn(&mut RenderContext) -> bool + Send + Sync + 'static,
    {
        Self::new(FnBody { label: label.into(), f }, deadline)
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn label(&self) -> String {
        self.body.label()
    }

    pub(crate) fn body(&self) -> &dyn TaskBody {
        self.body.as_ref()
    }

    pub fn state(&self) -> TaskState {
        self.status.lock().state
    }

    pub fn is_done(&self) -> bool {
        self.state() == TaskState::Done
    }

    pub fn deadline(&self) -> Deadline {
        self.status.lock().deadline
    }

    /// Tighten the deadline; never loosens it.
    pub fn raise_priority(&self, deadline: Deadline) {
        let mut status = self.status.lock();
        if deadline < status.deadline {
            status.deadline = deadline;
        }
    }

    /// Reason for the most recent invalidation, cleared on a clean completion.
    pub fn invalidation_reason(&self) -> Option<InvalidationReason> {
        self.status.lock().reason
    }

    /// Number of times the body has run.
    pub fn run_count(&self) -> u32 {
        self.status.lock().runs
    }

    /// Number of failed runs.
    pub fn failure_count(&self) -> u32 {
        self.status.lock().failures
    }

    /// True if the most recent run failed.
    pub fn last_run_failed(&self) -> bool {
        self.status.lock().last_failed
    }

    /// True while some graph owns the task's execution.
    pub fn is_in_flight(&self) -> bool {
        matches!(self.state(), TaskState::Scheduled | TaskState::Running)
    }

    /// Try to take ownership of the next execution.
    pub fn try_claim(&self) -> Claim {
        let mut status = self.status.lock();
        match status.state {
            TaskState::Pending => {
                status.state = TaskState::Scheduled;
                Claim::Claimed
            }
            TaskState::Scheduled | TaskState::Running => Claim::InFlight,
            TaskState::Done => Claim::Done,
        }
    }

    /// Run the body of a claimed task. Returns whether it succeeded.
    pub(crate) fn execute(&self, ctx: &mut RenderContext) -> bool {
        {
            let mut status = self.status.lock();
            debug_assert_eq!(status.state, TaskState::Scheduled, "executing unclaimed task");
            status.state = TaskState::Running;
        }

        log::trace!("Running task {}", self.label());
        let success = self.body.run(ctx);

        let mut status = self.status.lock();
        status.runs += 1;
        status.last_failed = !success;
        if !success {
            status.failures += 1;
            status.state = TaskState::Pending;
        } else if status.stale {
            status.state = TaskState::Pending;
        } else {
            status.state = TaskState::Done;
            status.reason = None;
        }
        status.stale = false;
        drop(status);

        self.finished.notify_all();
        success
    }

    /// Give up a claimed task without running it.
    pub(crate) fn abandon(&self) {
        let mut status = self.status.lock();
        if status.state == TaskState::Scheduled {
            status.state = TaskState::Pending;
            status.stale = false;
        }
        drop(status);
        self.finished.notify_all();
    }

    /// Block until no graph owns the task. Returns whether it ended `Done`.
    pub fn wait(&self) -> bool {
        let mut status = self.status.lock();
        while matches!(status.state, TaskState::Scheduled | TaskState::Running) {
            self.finished.wait(&mut status);
        }
        status.state == TaskState::Done
    }

    /// Send the task back to `Pending` so its next graph re-runs it.
    ///
    /// A task that is in flight finishes its current run and then drops back
    /// to `Pending` instead of `Done`.
    pub fn invalidate(&self, reason: InvalidationReason) {
        let mut status = self.status.lock();
        status.reason = Some(reason);
        match status.state {
            TaskState::Done => status.state = TaskState::Pending,
            TaskState::Scheduled | TaskState::Running => status.stale = true,
            TaskState::Pending => {}
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.status.lock();
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("label", &self.body.label())
            .field("state", &status.state)
            .field("deadline", &status.deadline)
            .finish()
    }
}

/// Ready-queue key: earliest deadline first, then insertion order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ReadyKey {
    pub deadline: Deadline,
    pub seq: usize,
}

impl Ord for ReadyKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest deadline pops first
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ReadyKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
