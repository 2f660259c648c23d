//! Task types submitted to the pool.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::oneshot;

use crate::domain::WorkerId;
use crate::error::PoolError;

/// Scheduling hint recorded on the worker that runs a task.
///
/// Portable Rust threads expose no priority control, so this is advisory:
/// it shows up in logs and on the [`TaskHandle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Failure reported by a task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// Ordinary failure. Logged and contained; the worker carries on.
    #[error("task failed: {0}")]
    Failed(String),

    /// Fatal failure (memory, file handles, ...). The worker terminates and
    /// the error is re-raised to the submitter.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl TaskError {
    pub fn failed(err: impl fmt::Display) -> Self {
        Self::Failed(err.to_string())
    }

    pub fn exhausted(err: impl fmt::Display) -> Self {
        Self::ResourceExhausted(err.to_string())
    }
}

pub type TaskResult = Result<(), TaskError>;

/// How a task ended, when the worker survived it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    Failed(String),
    Panicked(String),
}

pub(crate) type BoxedTask = Box<dyn FnOnce() -> TaskResult + Send + 'static>;

/// A task plus the channel its outcome is reported on.
pub(crate) struct Job {
    pub(crate) task: BoxedTask,
    pub(crate) priority: Priority,
    pub(crate) done: oneshot::Sender<Result<TaskOutcome, PoolError>>,
}

/// Handle to a submitted task and the worker running it.
#[must_use = "dropping the handle discards the task outcome"]
pub struct TaskHandle {
    worker_id: WorkerId,
    worker_name: String,
    priority: Priority,
    outcome: oneshot::Receiver<Result<TaskOutcome, PoolError>>,
}

impl TaskHandle {
    pub(crate) fn new(
        worker_id: WorkerId,
        worker_name: String,
        priority: Priority,
        outcome: oneshot::Receiver<Result<TaskOutcome, PoolError>>,
    ) -> Self {
        Self {
            worker_id,
            worker_name,
            priority,
            outcome,
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Thread name of the worker, `{pool}-{n}`.
    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Blocks until the task finishes. Do not call from an async context.
    pub fn join(self) -> Result<TaskOutcome, PoolError> {
        let worker = self.worker_name;
        self.outcome
            .blocking_recv()
            .unwrap_or(Err(PoolError::WorkerStopped { worker }))
    }

    pub async fn outcome(self) -> Result<TaskOutcome, PoolError> {
        let worker = self.worker_name;
        self.outcome
            .await
            .unwrap_or(Err(PoolError::WorkerStopped { worker }))
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("worker_id", &self.worker_id)
            .field("worker_name", &self.worker_name)
            .field("priority", &self.priority)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_priority_is_normal() {
        assert_eq!(Priority::default(), Priority::Normal);
        assert!(Priority::High > Priority::Low);
    }

    #[test]
    fn task_error_helpers_keep_message() {
        assert_eq!(TaskError::failed("http 503"), TaskError::Failed("http 503".into()));
        assert_eq!(
            TaskError::exhausted("out of memory").to_string(),
            "resource exhausted: out of memory"
        );
    }

    #[test]
    fn dropped_job_reports_worker_stopped() {
        let (tx, rx) = oneshot::channel();
        let handle = TaskHandle::new(WorkerId::generate(), "pool-1".into(), Priority::Low, rx);
        drop(tx);

        let err = handle.join().unwrap_err();
        assert!(matches!(err, PoolError::WorkerStopped { worker } if worker == "pool-1"));
    }
}
