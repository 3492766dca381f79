//! Batch execution over a task dependency graph (DAG).
//!
//! ```text
//! BatchDefinition (yaml/json/toml)
//!   ↓
//! TaskGraph::from_tasks() → validate() → tiers (Kahn)
//!   ↓
//! BatchScheduler::register_batch() → records in the TaskStore
//!   ↓
//! BatchScheduler::run_batch()
//!   loop: readiness::evaluate() → skip / dispatch (≤ concurrency)
//!         TaskExecutor::execute() → runner::invoke()
//! ```

mod graph;
mod manifest;
mod readiness;
mod scheduler;
mod task;

pub use graph::{resolve, TaskGraph, TaskLike};
pub use manifest::{BatchDefinition, ManifestFormat, TaskDefinition};
pub use readiness::{evaluate, Readiness};
pub use scheduler::{BatchPlan, BatchScheduler};
pub use task::TaskExecutor;
