//! Worker thread loop.
//!
//! # 状態遷移
//! - Idle --(job assigned)--> Busy
//! - Busy --(task done, idle < max_size)--> Idle
//! - Busy --(task done, idle >= max_size)--> Terminated
//! - Idle --(idle_timeout, idle > min_size)--> Terminated
//! - any --(stop)--> Terminated

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::pool::{AfterTask, PoolShared};
use super::task::{BoxedTask, Job, TaskError, TaskOutcome};
use crate::domain::WorkerId;
use crate::error::PoolError;

struct Inbox {
    job: Option<Job>,
    stopped: bool,
}

/// A worker as seen by the pool: its identity plus the inbox a job is
/// handed over through.
pub(crate) struct WorkerSlot {
    pub(crate) id: WorkerId,
    pub(crate) name: String,
    inbox: Mutex<Inbox>,
    wake: Condvar,
}

enum NextJob {
    Run(Job),
    TimedOut,
    Stopped,
}

enum Ran {
    Outcome(TaskOutcome),
    Fatal(String),
}

impl WorkerSlot {
    pub(crate) fn new(name: String, job: Option<Job>) -> Self {
        Self {
            id: WorkerId::generate(),
            name,
            inbox: Mutex::new(Inbox {
                job,
                stopped: false,
            }),
            wake: Condvar::new(),
        }
    }

    /// Hands `job` to an idle worker. Gives the job back if the worker was
    /// stopped after it left the idle list.
    pub(crate) fn assign(&self, job: Job) -> Result<(), Job> {
        let mut inbox = self.inbox.lock().unwrap();
        if inbox.stopped {
            return Err(job);
        }
        inbox.job = Some(job);
        self.wake.notify_one();
        Ok(())
    }

    pub(crate) fn stop(&self) {
        let mut inbox = self.inbox.lock().unwrap();
        inbox.stopped = true;
        self.wake.notify_one();
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.inbox.lock().unwrap().stopped
    }

    fn next_job(&self, idle_timeout: Duration) -> NextJob {
        let mut inbox = self.inbox.lock().unwrap();
        loop {
            if inbox.stopped {
                // a job handed over just before the stop is discarded
                inbox.job = None;
                return NextJob::Stopped;
            }
            if let Some(job) = inbox.job.take() {
                return NextJob::Run(job);
            }
            let (guard, wait) = self.wake.wait_timeout(inbox, idle_timeout).unwrap();
            inbox = guard;
            if wait.timed_out() && inbox.job.is_none() && !inbox.stopped {
                return NextJob::TimedOut;
            }
        }
    }
}

pub(crate) fn spawn(pool: Arc<PoolShared>, slot: Arc<WorkerSlot>) -> std::io::Result<()> {
    thread::Builder::new()
        .name(slot.name.clone())
        .spawn(move || run(pool, slot))?;
    Ok(())
}

fn run(pool: Arc<PoolShared>, slot: Arc<WorkerSlot>) {
    debug!(worker = %slot.name, "worker started");
    loop {
        match slot.next_job(pool.config().idle_timeout) {
            NextJob::Stopped => break,
            NextJob::TimedOut => {
                if pool.on_idle_timeout(&slot) {
                    debug!(worker = %slot.name, "idle worker evicted");
                    break;
                }
            }
            NextJob::Run(Job {
                task,
                priority,
                done,
            }) => {
                debug!(worker = %slot.name, ?priority, "task started");
                match run_task(task, &slot.name) {
                    Ran::Outcome(outcome) => {
                        pool.record(&outcome);
                        // bookkeeping first, so a joined handle sees the pool settled
                        let after = pool.on_task_finished(&slot);
                        let _ = done.send(Ok(outcome));
                        if let AfterTask::Terminate = after {
                            break;
                        }
                    }
                    Ran::Fatal(message) => {
                        error!(worker = %slot.name, %message, "task exhausted resources; worker terminating");
                        pool.record_fatal();
                        pool.deregister(slot.id);
                        let _ = done.send(Err(PoolError::ResourceExhausted {
                            worker: slot.name.clone(),
                            message,
                        }));
                        break;
                    }
                }
            }
        }
    }
    pool.deregister(slot.id);
    debug!(worker = %slot.name, "worker exited");
}

fn run_task(task: BoxedTask, worker: &str) -> Ran {
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(Ok(())) => Ran::Outcome(TaskOutcome::Completed),
        Ok(Err(TaskError::Failed(message))) => {
            warn!(%worker, %message, "task failed");
            Ran::Outcome(TaskOutcome::Failed(message))
        }
        Ok(Err(TaskError::ResourceExhausted(message))) => Ran::Fatal(message),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(%worker, %message, "task panicked");
            Ran::Outcome(TaskOutcome::Panicked(message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
