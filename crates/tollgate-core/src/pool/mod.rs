//! Elastic worker pool.
//!
//! - **WorkerPool**: hands tasks to idle workers, spawns more on demand
//! - **worker**: the per-thread loop (run, rejoin idle list, evict, stop)
//! - **task**: task signature, outcomes and the handle returned by submit

#[allow(clippy::module_inception)]
pub mod pool;
pub mod task;
mod worker;

pub use self::pool::WorkerPool;
pub use self::task::{Priority, TaskError, TaskHandle, TaskOutcome, TaskResult};
