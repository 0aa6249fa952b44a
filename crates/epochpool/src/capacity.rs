//! Connection capacity.
//!
//! Every live connection holds one [`CapacityPermit`] from the moment the
//! pool decides to open it until it is closed, retired, or dropped. The
//! permit is released by `Drop`, so a caller cancelled halfway through a
//! connect or a transaction hand-off never leaks capacity.
//!
//! Shrinking the maximum below the number of held permits records a debt;
//! permits released while the debt is outstanding are forgotten instead of
//! returned.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

struct Limits {
    max: usize,
    debt: usize,
}

pub(crate) struct Capacity {
    semaphore: Arc<Semaphore>,
    limits: Mutex<Limits>,
}

impl Capacity {
    pub(crate) fn new(max: usize) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(max)),
            limits: Mutex::new(Limits { max, debt: 0 }),
        })
    }

    /// Reserve room for one connection, if the pool is below its maximum.
    pub(crate) fn try_acquire(self: &Arc<Self>) -> Option<CapacityPermit> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        Some(CapacityPermit {
            permit: Some(permit),
            capacity: Arc::clone(self),
        })
    }

    /// Permits currently held by connections.
    pub(crate) fn held(&self) -> usize {
        let limits = self.limits.lock();
        (limits.max + limits.debt).saturating_sub(self.semaphore.available_permits())
    }

    pub(crate) fn resize(&self, max: usize) {
        let mut limits = self.limits.lock();
        if max >= limits.max {
            let grow = max - limits.max;
            let repaid = grow.min(limits.debt);
            limits.debt -= repaid;
            self.semaphore.add_permits(grow - repaid);
        } else {
            let shrink = limits.max - max;
            let forgotten = self.semaphore.forget_permits(shrink);
            limits.debt += shrink - forgotten;
        }
        limits.max = max;
    }

    fn release(&self, permit: OwnedSemaphorePermit) {
        let mut limits = self.limits.lock();
        if limits.debt > 0 {
            limits.debt -= 1;
            permit.forget();
        }
    }
}

/// Room for one connection, returned to the pool on drop.
pub(crate) struct CapacityPermit {
    permit: Option<OwnedSemaphorePermit>,
    capacity: Arc<Capacity>,
}

impl Drop for CapacityPermit {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.capacity.release(permit);
        }
    }
}

impl fmt::Debug for CapacityPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapacityPermit").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permits_bound_and_release() {
        let capacity = Capacity::new(2);
        let a = capacity.try_acquire();
        let b = capacity.try_acquire();
        assert!(a.is_some() && b.is_some());
        assert!(capacity.try_acquire().is_none());
        assert_eq!(capacity.held(), 2);

        drop(a);
        assert_eq!(capacity.held(), 1);
        assert!(capacity.try_acquire().is_some());
    }

    #[test]
    fn test_shrink_below_held_forgets_released_permits() {
        let capacity = Capacity::new(3);
        let permits: Vec<_> = (0..3).filter_map(|_| capacity.try_acquire()).collect();
        assert_eq!(permits.len(), 3);

        capacity.resize(1);
        assert_eq!(capacity.held(), 3);
        drop(permits);
        assert_eq!(capacity.held(), 0);

        let first = capacity.try_acquire();
        assert!(first.is_some());
        assert!(capacity.try_acquire().is_none());
    }

    #[test]
    fn test_grow_repays_debt_first() {
        let capacity = Capacity::new(2);
        let held: Vec<_> = (0..2).filter_map(|_| capacity.try_acquire()).collect();

        capacity.resize(1);
        capacity.resize(3);
        let third = capacity.try_acquire();
        assert!(third.is_some());
        assert!(capacity.try_acquire().is_none());
        drop(held);
        drop(third);

        let all: Vec<_> = (0..4).filter_map(|_| capacity.try_acquire()).collect();
        assert_eq!(all.len(), 3);
    }
}
