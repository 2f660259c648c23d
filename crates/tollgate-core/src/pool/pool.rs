//! WorkerPool - タスクを idle worker に渡し、いなければ新しく起こす
//!
//! # サイズの扱い
//! - `max_size` は「タスク完了時に idle list へ戻れる worker 数」の上限で、
//!   spawn 数の上限ではない。バーストでは必要なだけ worker が増え、
//!   完了時に溢れた分が終了する。
//! - `min_size` までの idle worker は idle timeout で evict されない。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use super::task::{Job, Priority, TaskHandle, TaskOutcome, TaskResult};
use super::worker::{self, WorkerSlot};
use crate::config::PoolConfig;
use crate::domain::WorkerId;
use crate::error::PoolError;
use crate::observability::PoolCounts;

#[derive(Default)]
struct PoolState {
    idle: VecDeque<Arc<WorkerSlot>>,
    live: HashMap<WorkerId, Arc<WorkerSlot>>,
}

/// What a worker does after reporting a task outcome.
pub(crate) enum AfterTask {
    Rejoin,
    Terminate,
}

pub(crate) struct PoolShared {
    config: PoolConfig,
    state: Mutex<PoolState>,
    next_seq: AtomicU64,
    spawned: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    fatal: AtomicU64,
}

impl PoolShared {
    pub(crate) fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn spawn_worker(self: &Arc<Self>, job: Job) -> Result<Arc<WorkerSlot>, PoolError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let slot = Arc::new(WorkerSlot::new(
            format!("{}-{}", self.config.name, seq),
            Some(job),
        ));
        self.state
            .lock()
            .unwrap()
            .live
            .insert(slot.id, Arc::clone(&slot));

        if let Err(e) = worker::spawn(Arc::clone(self), Arc::clone(&slot)) {
            self.deregister(slot.id);
            return Err(PoolError::Spawn(e));
        }
        self.spawned.fetch_add(1, Ordering::Relaxed);
        debug!(worker = %slot.name, "worker spawned");
        Ok(slot)
    }

    pub(crate) fn on_task_finished(&self, slot: &Arc<WorkerSlot>) -> AfterTask {
        let mut state = self.state.lock().unwrap();
        if slot.is_stopped() {
            state.live.remove(&slot.id);
            return AfterTask::Terminate;
        }
        if state.idle.len() < self.config.max_size {
            state.idle.push_back(Arc::clone(slot));
            AfterTask::Rejoin
        } else {
            state.live.remove(&slot.id);
            debug!(worker = %slot.name, idle = state.idle.len(), "idle list full; worker terminating");
            AfterTask::Terminate
        }
    }

    /// Returns true if the worker should exit.
    pub(crate) fn on_idle_timeout(&self, slot: &Arc<WorkerSlot>) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(pos) = state.idle.iter().position(|w| w.id == slot.id) else {
            // taken by a submitter; the job is on its way
            return false;
        };
        if state.idle.len() <= self.config.min_size {
            return false;
        }
        state.idle.remove(pos);
        state.live.remove(&slot.id);
        true
    }

    pub(crate) fn deregister(&self, id: WorkerId) {
        let mut state = self.state.lock().unwrap();
        state.live.remove(&id);
        state.idle.retain(|w| w.id != id);
    }

    pub(crate) fn record(&self, outcome: &TaskOutcome) {
        let counter = match outcome {
            TaskOutcome::Completed => &self.completed,
            TaskOutcome::Failed(_) | TaskOutcome::Panicked(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fatal(&self) {
        self.fatal.fetch_add(1, Ordering::Relaxed);
    }
}

/// Elastic pool of worker threads.
///
/// A submitted task goes to the longest-idle worker, or to a fresh worker if
/// none is idle. Dropping the pool stops every worker; busy ones finish their
/// current task first.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        info!(
            pool = %config.name,
            min_size = config.min_size,
            max_size = config.max_size,
            idle_timeout_ms = config.idle_timeout.as_millis() as u64,
            "worker pool created"
        );
        Ok(Self {
            shared: Arc::new(PoolShared {
                config,
                state: Mutex::new(PoolState::default()),
                next_seq: AtomicU64::new(0),
                spawned: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                fatal: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn submit<F>(&self, task: F) -> Result<TaskHandle, PoolError>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        self.submit_with_priority(task, Priority::Normal)
    }

    /// Runs `task` on an idle worker, or on a newly spawned one.
    ///
    /// Never blocks on the pool size: with no idle worker a new thread is
    /// started even if `max_size` workers are already busy.
    pub fn submit_with_priority<F>(
        &self,
        task: F,
        priority: Priority,
    ) -> Result<TaskHandle, PoolError>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        let (done, outcome) = tokio::sync::oneshot::channel();
        let mut job = Job {
            task: Box::new(task),
            priority,
            done,
        };

        loop {
            let idle = self.shared.state.lock().unwrap().idle.pop_front();
            let Some(slot) = idle else {
                break;
            };
            match slot.assign(job) {
                Ok(()) => {
                    debug!(worker = %slot.name, ?priority, "task handed to idle worker");
                    return Ok(TaskHandle::new(slot.id, slot.name.clone(), priority, outcome));
                }
                // stopped after leaving the idle list
                Err(returned) => job = returned,
            }
        }

        let slot = self.shared.spawn_worker(job)?;
        Ok(TaskHandle::new(slot.id, slot.name.clone(), priority, outcome))
    }

    /// Stops every worker and returns how many were live.
    ///
    /// Idle workers exit at once. Busy workers finish their current task,
    /// report its outcome, then exit. The pool stays usable: later submits
    /// spawn fresh workers.
    pub fn stop_all(&self) -> usize {
        let mut state = self.shared.state.lock().unwrap();
        state.idle.clear();
        let stopped = state.live.len();
        for (_, slot) in state.live.drain() {
            slot.stop();
        }
        drop(state);

        if stopped > 0 {
            info!(pool = %self.shared.config.name, workers = stopped, "workers stopped");
        }
        stopped
    }

    pub fn counts(&self) -> PoolCounts {
        let state = self.shared.state.lock().unwrap();
        PoolCounts {
            idle: state.idle.len(),
            live: state.live.len(),
            spawned: self.shared.spawned.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            fatal: self.shared.fatal.load(Ordering::Relaxed),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::pool::TaskError;
    use std::sync::Barrier;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn pool(min_size: usize, max_size: usize) -> WorkerPool {
        WorkerPool::new(
            PoolConfig::default()
                .with_name("test-pool")
                .with_sizes(min_size, max_size),
        )
        .unwrap()
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    /// Submits `n` tasks that all wait on one barrier, so `n` workers must
    /// run at the same time.
    fn run_concurrently(pool: &WorkerPool, n: usize) {
        let barrier = Arc::new(Barrier::new(n));
        let handles: Vec<_> = (0..n)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                pool.submit(move || {
                    barrier.wait();
                    Ok(())
                })
                .unwrap()
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), TaskOutcome::Completed);
        }
    }

    #[test]
    fn runs_task_and_reports_completion() {
        let pool = pool(0, 2);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);

        let handle = pool
            .submit(move || {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        assert_eq!(handle.join().unwrap(), TaskOutcome::Completed);
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(pool.counts().completed, 1);
    }

    #[test]
    fn idle_worker_is_reused() {
        let pool = pool(0, 2);
        let first = pool.submit(|| Ok(())).unwrap();
        let first_id = first.worker_id();
        first.join().unwrap();

        let second = pool.submit(|| Ok(())).unwrap();
        assert_eq!(second.worker_id(), first_id);
        second.join().unwrap();

        assert_eq!(pool.counts().spawned, 1);
    }

    #[test]
    fn burst_grows_past_max_then_shrinks_to_max() {
        let pool = pool(0, 2);
        run_concurrently(&pool, 3);

        let counts = pool.counts();
        assert_eq!(counts.spawned, 3);
        assert_eq!(counts.idle, 2);
        assert_eq!(counts.live, 2);
    }

    #[test]
    fn submit_never_waits_for_a_free_worker() {
        let pool = pool(0, 1);
        run_concurrently(&pool, 4);

        let counts = pool.counts();
        assert_eq!(counts.spawned, 4);
        assert_eq!(counts.idle, 1);
        assert_eq!(counts.live, 1);
    }

    #[test]
    fn idle_workers_above_min_are_evicted() {
        let pool = WorkerPool::new(
            PoolConfig::default()
                .with_name("test-pool")
                .with_sizes(1, 4)
                .with_idle_timeout(Duration::from_millis(50)),
        )
        .unwrap();
        run_concurrently(&pool, 3);
        assert_eq!(pool.counts().spawned, 3);

        assert!(wait_until(|| pool.counts().idle == 1));
        thread::sleep(Duration::from_millis(200));
        let counts = pool.counts();
        assert_eq!(counts.idle, 1);
        assert_eq!(counts.live, 1);
    }

    #[test]
    fn failed_task_is_contained() {
        let pool = pool(0, 2);
        let handle = pool.submit(|| Err(TaskError::failed("http 503"))).unwrap();
        let worker = handle.worker_id();
        assert_eq!(handle.join().unwrap(), TaskOutcome::Failed("http 503".into()));

        let next = pool.submit(|| Ok(())).unwrap();
        assert_eq!(next.worker_id(), worker);
        assert_eq!(next.join().unwrap(), TaskOutcome::Completed);

        let counts = pool.counts();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.completed, 1);
    }

    #[test]
    fn panicking_task_is_contained() {
        let pool = pool(0, 2);
        let handle = pool.submit(|| panic!("boom")).unwrap();
        assert_eq!(handle.join().unwrap(), TaskOutcome::Panicked("boom".into()));

        let counts = pool.counts();
        assert_eq!(counts.live, 1);
        assert_eq!(counts.idle, 1);
        assert_eq!(counts.failed, 1);
    }

    #[test]
    fn resource_exhaustion_terminates_worker() {
        let pool = pool(0, 2);
        let handle = pool
            .submit(|| Err(TaskError::exhausted("out of memory")))
            .unwrap();
        let worker = handle.worker_name().to_string();

        let err = handle.join().unwrap_err();
        assert!(matches!(
            err,
            PoolError::ResourceExhausted { worker: w, message } if w == worker && message == "out of memory"
        ));

        let counts = pool.counts();
        assert_eq!(counts.fatal, 1);
        assert_eq!(counts.live, 0);
        assert_eq!(counts.idle, 0);
    }

    #[test]
    fn stop_all_then_reuse() {
        let pool = pool(0, 2);
        let first = pool.submit(|| Ok(())).unwrap();
        let first_id = first.worker_id();
        first.join().unwrap();

        assert_eq!(pool.stop_all(), 1);
        let counts = pool.counts();
        assert_eq!(counts.idle, 0);
        assert_eq!(counts.live, 0);

        let next = pool.submit(|| Ok(())).unwrap();
        assert_ne!(next.worker_id(), first_id);
        assert_eq!(next.join().unwrap(), TaskOutcome::Completed);
        assert_eq!(pool.counts().spawned, 2);
    }

    #[test]
    fn stop_all_lets_busy_task_finish() {
        let pool = pool(0, 2);
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let handle = pool
            .submit(move || {
                started_tx.send(()).map_err(TaskError::failed)?;
                release_rx.recv().map_err(TaskError::failed)?;
                Ok(())
            })
            .unwrap();

        started_rx.recv().unwrap();
        assert_eq!(pool.stop_all(), 1);
        release_tx.send(()).unwrap();
        assert_eq!(handle.join().unwrap(), TaskOutcome::Completed);

        let counts = pool.counts();
        assert_eq!(counts.idle, 0);
        assert_eq!(counts.live, 0);
    }

    #[test]
    fn worker_threads_are_named_after_the_pool() {
        let pool = pool(0, 2);
        let (tx, rx) = mpsc::channel();
        let handle = pool
            .submit_with_priority(
                move || {
                    let name = thread::current().name().map(str::to_string);
                    tx.send(name).map_err(TaskError::failed)
                },
                Priority::High,
            )
            .unwrap();

        assert_eq!(handle.priority(), Priority::High);
        let name = handle.worker_name().to_string();
        assert!(name.starts_with("test-pool-"));
        handle.join().unwrap();
        assert_eq!(rx.recv().unwrap().as_deref(), Some(name.as_str()));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = WorkerPool::new(PoolConfig::default().with_sizes(3, 1));
        assert!(matches!(
            result,
            Err(PoolError::InvalidConfig(ConfigError::Invalid(_)))
        ));
    }

    #[tokio::test]
    async fn outcome_can_be_awaited() {
        let pool = pool(0, 2);
        let handle = pool.submit(|| Ok(())).unwrap();
        assert_eq!(handle.outcome().await.unwrap(), TaskOutcome::Completed);
    }
}
