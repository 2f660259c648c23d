use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockCounts {
    pub held: usize,
    pub waiting: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCounts {
    /// Workers parked in the idle list.
    pub idle: usize,
    /// Workers that have not terminated (idle + busy).
    pub live: usize,
    /// Workers ever spawned by this pool.
    pub spawned: u64,
    pub completed: u64,
    /// Contained failures (errors and panics).
    pub failed: u64,
    /// Resource-exhausted tasks.
    pub fatal: u64,
}
