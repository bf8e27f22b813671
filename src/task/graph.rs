//! Task dependency graphs
//!
//! A [`TaskGraph`] is a DAG of "must run before" edges between tasks. Graphs
//! are grown iteratively from a set of root tasks: every task the graph
//! claims is asked for its prerequisites, which are added as predecessors
//! and expanded in turn. No recursion is involved, so deep quadtrees cannot
//! overflow the stack.

use std::collections::HashMap;
use std::sync::Arc;

use super::task::{Claim, Task, TaskId};
use crate::core::{Error, Result};

/// How a graph relates to one of its tasks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// This graph owns the task's execution
    Claimed,
    /// Another graph owns it; this graph waits for it
    InFlight,
    /// Already done when added
    Done,
    /// Claimed, but its prerequisites could not be acquired
    Failed,
}

pub(crate) struct GraphNode {
    pub task: Arc<Task>,
    pub kind: NodeKind,
    /// `prepare` has run, so `release` is owed
    pub prepared: bool,
    /// The scheduler has dealt with this node
    pub settled: bool,
    pub predecessors: Vec<usize>,
    pub successors: Vec<usize>,
}

/// DAG of tasks with "run before" edges.
#[derive(Default)]
pub struct TaskGraph {
    pub(crate) nodes: Vec<GraphNode>,
    index: HashMap<TaskId, usize>,
    /// Claimed nodes whose prerequisites have not been asked for yet
    unprepared: Vec<usize>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the full graph needed to complete `roots`.
    pub fn build(roots: &[Arc<Task>]) -> Self {
        let mut graph = Self::new();
        for root in roots {
            graph.add_task(root.clone());
        }
        graph.expand();
        graph
    }

    /// Add a task, claiming it if it is pending. Idempotent.
    pub fn add_task(&mut self, task: Arc<Task>) -> usize {
        if let Some(&idx) = self.index.get(&task.id()) {
            return idx;
        }

        let kind = match task.try_claim() {
            Claim::Claimed => NodeKind::Claimed,
            Claim::InFlight => NodeKind::InFlight,
            Claim::Done => NodeKind::Done,
        };

        let idx = self.nodes.len();
        self.index.insert(task.id(), idx);
        self.nodes.push(GraphNode {
            task,
            kind,
            prepared: false,
            settled: false,
            predecessors: Vec::new(),
            successors: Vec::new(),
        });
        if kind == NodeKind::Claimed {
            self.unprepared.push(idx);
        }
        idx
    }

    /// Require `before` to finish before `after` runs.
    ///
    /// Fails if the edge would close a cycle.
    pub fn add_dependency(&mut self, after: &Arc<Task>, before: &Arc<Task>) -> Result<()> {
        let after_idx = self.add_task(after.clone());
        let before_idx = self.add_task(before.clone());
        self.add_edge(after_idx, before_idx)
    }

    fn add_edge(&mut self, after: usize, before: usize) -> Result<()> {
        if self.nodes[after].predecessors.contains(&before) {
            return Ok(());
        }
        if self.reaches(after, before) {
            return Err(Error::config(format!(
                "dependency cycle: {} cannot run before {}",
                self.nodes[before].task.label(),
                self.nodes[after].task.label()
            )));
        }
        self.nodes[after].predecessors.push(before);
        self.nodes[before].successors.push(after);
        Ok(())
    }

    /// True if `to` can be reached from `from` along successor edges.
    fn reaches(&self, from: usize, to: usize) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![from];
        while let Some(idx) = stack.pop() {
            if idx == to {
                return true;
            }
            if std::mem::replace(&mut visited[idx], true) {
                continue;
            }
            stack.extend(self.nodes[idx].successors.iter().copied());
        }
        false
    }

    /// Ask every newly claimed task for its prerequisites until none are left.
    pub fn expand(&mut self) {
        while let Some(idx) = self.unprepared.pop() {
            let task = self.nodes[idx].task.clone();
            self.nodes[idx].prepared = true;

            let deps = match task.body().prepare() {
                Ok(deps) => deps,
                Err(e) => {
                    // Pressure clears up by the next frame; anything else is a wiring bug
                    if e.is_transient() {
                        log::debug!("Could not prepare {}: {}", task.label(), e);
                    } else {
                        log::error!("Could not prepare {}: {}", task.label(), e);
                    }
                    self.nodes[idx].kind = NodeKind::Failed;
                    continue;
                }
            };

            let deadline = task.deadline();
            for dep in deps {
                dep.raise_priority(deadline);
                let dep_idx = self.add_task(dep);
                if let Err(e) = self.add_edge(idx, dep_idx) {
                    log::error!("{}", e);
                    self.nodes[idx].kind = NodeKind::Failed;
                    break;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, task: &Task) -> bool {
        self.index.contains_key(&task.id())
    }

    /// How this graph holds `task`, if at all.
    pub fn kind(&self, task: &Task) -> Option<NodeKind> {
        self.index.get(&task.id()).map(|&idx| self.nodes[idx].kind)
    }

    /// Tasks that must finish before `task`.
    pub fn predecessors(&self, task: &Task) -> Vec<Arc<Task>> {
        self.index
            .get(&task.id())
            .map(|&idx| {
                self.nodes[idx]
                    .predecessors
                    .iter()
                    .map(|&p| self.nodes[p].task.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.nodes.iter().map(|n| &n.task)
    }

    /// Give up a node without running it.
    pub(crate) fn settle_abandoned(&mut self, idx: usize) {
        let node = &mut self.nodes[idx];
        if node.settled {
            return;
        }
        node.settled = true;
        if matches!(node.kind, NodeKind::Claimed | NodeKind::Failed) {
            node.task.abandon();
        }
        if node.prepared {
            node.task.body().release();
        }
    }
}

impl Drop for TaskGraph {
    fn drop(&mut self) {
        // Graphs dropped without running must not leave tasks claimed or tiles pinned.
        for idx in 0..self.nodes.len() {
            self.settle_abandoned(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Deadline, TaskBody, TaskState};
    use crate::task::context::RenderContext;
    use parking_lot::Mutex;

    struct Chain {
        name: String,
        deps: Vec<Arc<Task>>,
        released: Arc<Mutex<Vec<String>>>,
    }

    impl TaskBody for Chain {
        fn label(&self) -> String {
            self.name.clone()
        }
        fn prepare(&self) -> Result<Vec<Arc<Task>>> {
            Ok(self.deps.clone())
        }
        fn run(&self, _ctx: &mut RenderContext) -> bool {
            true
        }
        fn release(&self) {
            self.released.lock().push(self.name.clone());
        }
    }

    fn chain(name: &str, deps: Vec<Arc<Task>>, released: &Arc<Mutex<Vec<String>>>) -> Arc<Task> {
        Task::new(
            Chain { name: name.into(), deps, released: released.clone() },
            Deadline::frame(5),
        )
    }

    #[test]
    fn test_build_expands_prerequisites() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let root = chain("root", vec![], &released);
        let mid = chain("mid", vec![root.clone()], &released);
        let leaf = chain("leaf", vec![mid.clone()], &released);

        let graph = TaskGraph::build(&[leaf.clone()]);
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.predecessors(&leaf)[0].id(), mid.id());
        assert_eq!(graph.predecessors(&mid)[0].id(), root.id());
        assert_eq!(graph.kind(&root), Some(NodeKind::Claimed));
        assert_eq!(root.state(), TaskState::Scheduled);
    }

    #[test]
    fn test_shared_prerequisite_added_once() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let parent = chain("parent", vec![], &released);
        let a = chain("a", vec![parent.clone()], &released);
        let b = chain("b", vec![parent.clone()], &released);

        let graph = TaskGraph::build(&[a, b]);
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_cycle_rejected() {
        let a = Task::from_fn("a", Deadline::IMMEDIATE, |_| true);
        let b = Task::from_fn("b", Deadline::IMMEDIATE, |_| true);
        let mut graph = TaskGraph::new();
        graph.add_dependency(&a, &b).unwrap();
        assert!(graph.add_dependency(&b, &a).is_err());
        assert!(graph.add_dependency(&a, &a).is_err());
    }

    #[test]
    fn test_deadline_propagates_to_prerequisites() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let parent = chain("parent", vec![], &released);
        let urgent = Task::new(
            Chain { name: "urgent".into(), deps: vec![parent.clone()], released: released.clone() },
            Deadline::frame(1),
        );
        let _graph = TaskGraph::build(&[urgent]);
        assert_eq!(parent.deadline(), Deadline::frame(1));
    }

    #[test]
    fn test_drop_releases_and_unclaims() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let parent = chain("parent", vec![], &released);
        let child = chain("child", vec![parent.clone()], &released);

        drop(TaskGraph::build(&[child.clone()]));
        assert_eq!(child.state(), TaskState::Pending);
        assert_eq!(parent.state(), TaskState::Pending);
        let mut names = released.lock().clone();
        names.sort();
        assert_eq!(names, vec!["child".to_string(), "parent".to_string()]);
    }

    #[test]
    fn test_in_flight_task_not_expanded() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let parent = chain("parent", vec![], &released);
        let child = chain("child", vec![parent.clone()], &released);

        let first = TaskGraph::build(&[child.clone()]);
        let second = TaskGraph::build(&[child.clone()]);
        assert_eq!(second.len(), 1);
        assert_eq!(second.kind(&child), Some(NodeKind::InFlight));
        drop(second);
        drop(first);
        assert_eq!(released.lock().len(), 2);
    }
}
