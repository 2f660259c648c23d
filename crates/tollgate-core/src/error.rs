use thiserror::Error;

use crate::domain::{OwnerId, ResourceId};

/// Errors from the lock coordinator.
///
/// Contention is never an error: it is resolved by blocking.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("invalid resource id: {0}")]
    InvalidResource(String),

    #[error("invalid lease: {0}")]
    InvalidLease(String),

    /// The requesting owner's lease ran out; renew before locking again.
    #[error("lease of {owner} has expired")]
    LeaseExpired { owner: OwnerId },

    /// The wait was cancelled; no claim was granted.
    #[error("wait for {resource} was cancelled before it was granted")]
    WaitCancelled { resource: ResourceId },

    #[error("invalid coordinator config: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("failed to spawn reaper thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors from the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid pool config: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Fatal failure inside a task. The worker that ran it has terminated.
    #[error("task on {worker} exhausted resources: {message}")]
    ResourceExhausted { worker: String, message: String },

    /// The worker was stopped before it reported an outcome.
    #[error("{worker} stopped before the task reported an outcome")]
    WorkerStopped { worker: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{0}")]
    Invalid(String),
}
