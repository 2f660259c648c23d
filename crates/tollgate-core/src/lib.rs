//! tollgate-core
//!
//! Resource-lock coordination and an elastic worker pool for threads that
//! share files, folders or other named resources.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, resource, owner, claim）
//! - **ports**: 抽象化レイヤー（Clock）
//! - **lock**: LockCoordinator, Reaper, completion signals
//! - **pool**: WorkerPool, worker loop, task handles
//! - **config**: CoordinatorConfig / PoolConfig（serde + validate）
//! - **observability**: counts views
//! - **error**: LockError / PoolError / ConfigError

pub mod config;
pub mod domain;
pub mod error;
pub mod lock;
pub mod observability;
pub mod pool;
pub mod ports;

pub use config::{CoordinatorConfig, PoolConfig};
pub use domain::{ALL_RESOURCES, ClaimView, Owner, ResourceId};
pub use error::{ConfigError, LockError, PoolError};
pub use lock::{LockCoordinator, Wakeup};
pub use observability::{LockCounts, PoolCounts};
pub use pool::{Priority, TaskError, TaskHandle, TaskOutcome, TaskResult, WorkerPool};
