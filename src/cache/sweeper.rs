//! Background expiry sweep for a [`CachePool`].

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use super::pool::CachePool;

/// Owns the periodic sweep task. Dropping the handle stops the task.
pub struct SweepHandle {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SweepHandle {
    /// Signal the task to stop and wait until it has exited.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl CachePool {
    /// Spawn the periodic sweep on the current tokio runtime.
    ///
    /// The task holds only a weak reference, so it also ends once the pool
    /// itself is dropped. Passes run one after another on this task, and
    /// [`CachePool::sweep_now`] refuses to overlap with a running pass.
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweepHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool = Arc::downgrade(self);
        let every = self.sweep_interval();
        let task = tokio::spawn(sweep_loop(pool, every, shutdown_rx));
        SweepHandle {
            shutdown_tx,
            task: Some(task),
        }
    }
}

async fn sweep_loop(pool: Weak<CachePool>, every: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!(interval_secs = every.as_secs(), "cache sweeper started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                pool.sweep_now();
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    debug!("cache sweeper stopped");
}
