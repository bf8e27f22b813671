//! Tasks, task graphs and their execution
//!
//! Tile production is expressed as tasks: each tile owns a task whose body
//! fills the tile's slot, and whose prerequisites are the tasks of the tiles
//! it reads from. A [`TaskGraph`] collects those edges and a [`Scheduler`]
//! runs them in dependency order.

pub mod context;
pub mod graph;
pub mod scheduler;
pub mod task;

pub use context::{RenderContext, RenderTarget};
pub use graph::{NodeKind, TaskGraph};
pub use scheduler::{ExecutionReport, Scheduler};
pub use task::{Claim, Deadline, FnBody, InvalidationReason, Task, TaskBody, TaskId, TaskState};
