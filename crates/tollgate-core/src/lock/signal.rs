//! Named completion signals.
//!
//! A thread parks on a resource id until another thread (typically a transfer
//! progress callback) raises a signal for it, or until the wait times out.
//! Signals behave like an auto-reset event: one raised before anyone waits is
//! kept and consumed by the next wait.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::domain::ResourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Wakeup {
    Signalled,
    TimedOut,
}

#[derive(Default)]
pub(crate) struct SignalBoard {
    pending: Mutex<HashSet<ResourceId>>,
    condvar: Condvar,
}

impl SignalBoard {
    pub(crate) fn signal(&self, resource: &ResourceId) {
        let mut pending = self.pending.lock().unwrap();
        pending.insert(resource.clone());
        self.condvar.notify_all();
    }

    pub(crate) fn wait(&self, resource: &ResourceId, timeout: Option<Duration>) -> Wakeup {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut pending = self.pending.lock().unwrap();
        loop {
            if pending.remove(resource) {
                return Wakeup::Signalled;
            }
            match deadline {
                None => {
                    pending = self.condvar.wait(pending).unwrap();
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Wakeup::TimedOut;
                    }
                    let (guard, _) = self.condvar.wait_timeout(pending, deadline - now).unwrap();
                    pending = guard;
                }
            }
        }
    }

    pub(crate) fn is_pending(&self, resource: &ResourceId) -> bool {
        self.pending.lock().unwrap().contains(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn token(key: &str) -> ResourceId {
        ResourceId::named(key).unwrap()
    }

    #[test]
    fn wait_times_out_without_signal() {
        let board = SignalBoard::default();
        let start = Instant::now();
        let wakeup = board.wait(&token("upload"), Some(Duration::from_millis(50)));
        assert_eq!(wakeup, Wakeup::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn signal_before_wait_is_not_lost() {
        let board = SignalBoard::default();
        board.signal(&token("upload"));
        assert!(board.is_pending(&token("upload")));

        let wakeup = board.wait(&token("upload"), Some(Duration::from_millis(10)));
        assert_eq!(wakeup, Wakeup::Signalled);
        assert!(!board.is_pending(&token("upload")));

        // consumed: the next wait times out again
        let wakeup = board.wait(&token("upload"), Some(Duration::from_millis(10)));
        assert_eq!(wakeup, Wakeup::TimedOut);
    }

    #[test]
    fn signal_from_other_thread_wakes_waiter() {
        let board = Arc::new(SignalBoard::default());
        let waiter = {
            let board = Arc::clone(&board);
            thread::spawn(move || board.wait(&token("upload"), Some(Duration::from_secs(5))))
        };

        thread::sleep(Duration::from_millis(50));
        board.signal(&token("other"));
        board.signal(&token("upload"));

        assert_eq!(waiter.join().unwrap(), Wakeup::Signalled);
        assert!(board.is_pending(&token("other")));
    }
}
