//! Reaper - 到達不能になった owner の claim を回収する
//!
//! # フロー
//! 1. interval だけ待つ（shutdown が来たら抜ける）
//! 2. lost-owner queue を drain し、lease 切れも含めて claim を purge
//! 3. 1 件でも purge したら ALL_RESOURCES として waiter を再評価
//!
//! 明示的な `unlock` / `unlock_all` が fast path で、Reaper は
//! 「unlock を忘れた owner が永遠に他を止める」ことを防ぐ backstop です。

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use super::coordinator::LockShared;

/// Handle to the reaper thread. Dropping it stops and joins the thread.
pub(crate) struct Reaper {
    shutdown: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl Reaper {
    pub(crate) fn spawn(shared: Arc<LockShared>, interval: Duration) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let join = thread::Builder::new()
            .name("tollgate-reaper".to_string())
            .spawn(move || {
                loop {
                    match shutdown_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        // explicit shutdown, or the handle is gone
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    shared.reap();
                }
                debug!("reaper stopped");
            })?;

        Ok(Self {
            shutdown: Some(shutdown_tx),
            join: Some(join),
        })
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
