//! Transaction pinning map.
//!
//! A connection with an open transaction belongs to exactly one
//! [`TransactionId`] until commit or rollback. Each entry keeps the
//! connection in its own async slot so the background manager can validate
//! or close a pinned connection without holding the map lock, while the
//! owning caller can still claim it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::connection::{PooledConnection, TransactionId};
use crate::epoch::Epoch;

/// Async slot holding one pinned connection.
pub(crate) type PinSlot = Arc<tokio::sync::Mutex<Option<PooledConnection>>>;

struct PinnedEntry {
    epoch: Epoch,
    slot: PinSlot,
}

#[derive(Default)]
pub(crate) struct PinningMap {
    inner: Mutex<HashMap<TransactionId, PinnedEntry>>,
}

impl PinningMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Pin `conn` to `owner`.
    ///
    /// Returns a displaced slot if the owner already had one, which only
    /// happens if a caller broke the one-statement-at-a-time rule.
    pub(crate) fn pin(&self, owner: TransactionId, conn: PooledConnection) -> Option<PinSlot> {
        let entry = PinnedEntry {
            epoch: conn.epoch(),
            slot: Arc::new(tokio::sync::Mutex::new(Some(conn))),
        };
        self.inner.lock().insert(owner, entry).map(|old| old.slot)
    }

    /// Unpin the owner's connection.
    ///
    /// Waits for the slot if the manager is validating the connection at
    /// that moment. Returns `None` if nothing is pinned or the manager closed
    /// it first. The entry stays in place until the slot is locked, so a
    /// cancelled caller leaves the connection pinned.
    pub(crate) async fn take(&self, owner: TransactionId) -> Option<PooledConnection> {
        let slot = self.inner.lock().get(&owner)?.slot.clone();
        let mut guard = slot.lock().await;
        let mut inner = self.inner.lock();
        if inner
            .get(&owner)
            .is_some_and(|entry| Arc::ptr_eq(&entry.slot, &slot))
        {
            inner.remove(&owner);
        }
        guard.take()
    }

    /// Remove the owner's entry without waiting on its slot.
    pub(crate) fn remove(&self, owner: TransactionId) -> Option<PinSlot> {
        self.inner.lock().remove(&owner).map(|e| e.slot)
    }

    pub(crate) fn contains(&self, owner: TransactionId) -> bool {
        self.inner.lock().contains_key(&owner)
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Slots of every pinned connection, in no particular order.
    pub(crate) fn slots(&self) -> Vec<PinSlot> {
        self.inner.lock().values().map(|e| e.slot.clone()).collect()
    }

    /// Unpin every connection opened in `epoch` or earlier.
    pub(crate) fn remove_through(&self, epoch: Epoch) -> Vec<PinSlot> {
        let mut inner = self.inner.lock();
        let stale: Vec<TransactionId> = inner
            .iter()
            .filter(|(_, e)| e.epoch <= epoch)
            .map(|(id, _)| *id)
            .collect();
        stale
            .into_iter()
            .filter_map(|id| inner.remove(&id).map(|e| e.slot))
            .collect()
    }

    /// Unpin everything.
    pub(crate) fn drain(&self) -> Vec<PinSlot> {
        self.inner.lock().drain().map(|(_, e)| e.slot).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::connection::tests::{Log, connection};
    use crate::epoch::EpochGenerator;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_take_keeps_connection_pinned() {
        let log = Arc::new(Log::default());
        let map = PinningMap::new();
        let owner = TransactionId(5);
        assert!(map.pin(owner, connection(&log)).is_none());

        let slot = map.slots().remove(0);
        let busy = slot.lock().await;
        let attempt = tokio::time::timeout(Duration::from_millis(10), map.take(owner)).await;
        assert!(attempt.is_err());
        drop(busy);

        assert!(map.contains(owner));
        assert!(map.take(owner).await.is_some());
        assert!(!map.contains(owner));
        assert!(map.take(owner).await.is_none());
    }

    #[tokio::test]
    async fn test_remove_through_epoch() {
        let log = Arc::new(Log::default());
        let map = PinningMap::new();
        let conn = connection(&log);
        let epoch = conn.epoch();
        map.pin(TransactionId(1), conn);

        assert!(map.remove_through(EpochGenerator::starting_at(1).current()).is_empty());
        assert_eq!(map.remove_through(epoch).len(), 1);
        assert_eq!(map.len(), 0);
    }
}
