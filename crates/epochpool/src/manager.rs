//! Background pool manager.
//!
//! One task per pool wakes every tick and
//!
//! 1. closes connections handed to it through the close queue, including
//!    whole epochs retired after a disconnect,
//! 2. force-closes query results whose auto-close deadline has passed,
//! 3. runs a validation sweep every `validation_every_ticks` ticks.
//!
//! The task only holds a weak reference to the pool, so dropping the last
//! [`Pool`](crate::Pool) handle stops it at the next tick. A panic inside a
//! tick is caught and logged; the loop keeps running.

use std::panic::AssertUnwindSafe;
use std::sync::Weak;
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::connection::PooledConnection;
use crate::epoch::Epoch;
use crate::pinning::PinSlot;
use crate::pool::PoolInner;

/// Work handed to the manager.
#[derive(Debug)]
pub(crate) enum CloseRequest {
    /// Close every idle and pinned connection opened in this epoch or
    /// earlier.
    Epoch(Epoch),
    /// Close a single connection.
    Connection(PooledConnection),
    /// Close a pinned connection once its slot is free.
    Slot(PinSlot),
}

/// The pool's end of the manager task.
pub(crate) struct ManagerHandle {
    requests: mpsc::UnboundedSender<CloseRequest>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ManagerHandle {
    /// Create the handle and the receiving end for [`spawn`].
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<CloseRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            requests: tx,
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        };
        (handle, rx)
    }

    /// Start the manager task for `pool`.
    pub(crate) fn spawn(
        &self,
        pool: Weak<PoolInner>,
        requests: mpsc::UnboundedReceiver<CloseRequest>,
        tick: Duration,
        validation_every_ticks: u32,
    ) {
        let manager = Manager {
            pool,
            requests,
            validation_every_ticks,
            ticks: 0,
        };
        let task = tokio::spawn(manager.run(tick, self.shutdown.clone()));
        *self.task.lock() = Some(task);
    }

    /// Queue work for the next tick.
    ///
    /// Once the manager has stopped, single connections are closed on a
    /// spawned task instead.
    pub(crate) fn request_close(&self, request: CloseRequest) {
        let Err(mpsc::error::SendError(request)) = self.requests.send(request) else {
            return;
        };
        if let CloseRequest::Epoch(epoch) = request {
            tracing::trace!(%epoch, "manager stopped; epoch close skipped");
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(close_detached(request));
            }
            Err(_) => {
                tracing::warn!(?request, "no runtime to close connection; dropping it");
            }
        }
    }

    /// Signal the task to stop after its current tick.
    pub(crate) fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for the task to finish.
    pub(crate) async fn join(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "pool manager task failed");
            }
        }
    }
}

impl Drop for ManagerHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct Manager {
    pool: Weak<PoolInner>,
    requests: mpsc::UnboundedReceiver<CloseRequest>,
    validation_every_ticks: u32,
    ticks: u32,
}

impl Manager {
    async fn run(mut self, tick: Duration, shutdown: CancellationToken) {
        tracing::debug!(?tick, every = self.validation_every_ticks, "pool manager started");
        let mut interval = tokio::time::interval_at(Instant::now() + tick, tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            let Some(pool) = self.pool.upgrade() else {
                break;
            };
            if AssertUnwindSafe(self.tick(&pool)).catch_unwind().await.is_err() {
                tracing::error!("pool manager tick panicked");
            }
        }

        self.drain_on_exit().await;
        tracing::debug!("pool manager stopped");
    }

    async fn tick(&mut self, pool: &PoolInner) {
        while let Ok(request) = self.requests.try_recv() {
            match request {
                CloseRequest::Epoch(epoch) => pool.purge_epoch(epoch).await,
                CloseRequest::Connection(conn) => pool.close_connection(conn).await,
                CloseRequest::Slot(slot) => {
                    let conn = slot.lock().await.take();
                    if let Some(conn) = conn {
                        pool.close_connection(conn).await;
                    }
                }
            }
        }

        let reclaimed = pool.ledger().sweep(Instant::now()).await;
        if reclaimed > 0 {
            pool.record_reclaimed(reclaimed);
        }

        self.ticks += 1;
        if self.ticks >= self.validation_every_ticks {
            self.ticks = 0;
            let report = pool.validate_connections().await;
            tracing::debug!(?report, "validation sweep finished");
        }
    }

    /// Close single connections still queued when the loop ends.
    async fn drain_on_exit(&mut self) {
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            close_detached(request).await;
        }
    }
}

/// Close a single connection without the pool's bookkeeping.
async fn close_detached(request: CloseRequest) {
    let conn = match request {
        CloseRequest::Connection(conn) => Some(conn),
        CloseRequest::Slot(slot) => slot.lock().await.take(),
        CloseRequest::Epoch(_) => None,
    };
    if let Some(mut conn) = conn {
        conn.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::connection::tests::{Log, connection};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_busy_slot_closed_once_free() {
        let (handle, requests) = ManagerHandle::new();
        drop(requests);
        let log = Arc::new(Log::default());
        let slot: PinSlot = Arc::new(tokio::sync::Mutex::new(Some(connection(&log))));

        let busy = slot.lock().await;
        handle.request_close(CloseRequest::Slot(slot.clone()));
        tokio::task::yield_now().await;
        assert!(log.entries().is_empty());

        drop(busy);
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        assert_eq!(log.entries(), vec!["close"]);
        assert!(slot.lock().await.is_none());
    }
}
