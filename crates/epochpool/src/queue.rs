//! Idle connection queue.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::connection::PooledConnection;

/// FIFO of connections available for checkout.
///
/// Only `poll` and `offer` are used on the hot path; the lock is never held
/// across an `.await`.
#[derive(Default)]
pub(crate) struct IdleQueue {
    inner: Mutex<VecDeque<PooledConnection>>,
}

impl IdleQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Take the connection at the head of the queue.
    pub(crate) fn poll(&self) -> Option<PooledConnection> {
        self.inner.lock().pop_front()
    }

    /// Append a connection at the tail.
    pub(crate) fn offer(&self, conn: PooledConnection) {
        debug_assert!(!conn.in_transaction(), "idle connection with open transaction");
        self.inner.lock().push_back(conn);
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Remove every connection matching `pred`, keeping the others in order.
    pub(crate) fn extract(&self, mut pred: impl FnMut(&PooledConnection) -> bool) -> Vec<PooledConnection> {
        let mut inner = self.inner.lock();
        let mut kept = VecDeque::with_capacity(inner.len());
        let mut taken = Vec::new();
        for conn in inner.drain(..) {
            if pred(&conn) {
                taken.push(conn);
            } else {
                kept.push_back(conn);
            }
        }
        *inner = kept;
        taken
    }

    /// Remove every connection.
    pub(crate) fn drain(&self) -> Vec<PooledConnection> {
        self.inner.lock().drain(..).collect()
    }
}
