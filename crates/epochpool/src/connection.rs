//! Pooled connection wrapper.
//!
//! A [`PooledConnection`] owns one driver connection together with the
//! bookkeeping the pool needs: the epoch it was opened in, an optional open
//! transaction, and when it was last used.

use std::fmt;

use tokio::time::Instant;

use crate::capacity::CapacityPermit;
use crate::driver::{DriverConnection, DriverResult, DriverStatement, Savepoint, StatementKind};
use crate::epoch::Epoch;
use crate::error::PoolError;

/// Unique identifier of a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub(crate) u64);

impl ConnectionId {
    /// Raw id value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identifier of an open transaction handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub(crate) u64);

impl TransactionId {
    /// Raw id value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Open transaction on a connection.
#[derive(Debug, Clone)]
pub(crate) struct TransactionMarker {
    pub(crate) owner: TransactionId,
    pub(crate) savepoint: Savepoint,
}

/// A driver connection managed by the pool.
pub struct PooledConnection {
    id: ConnectionId,
    epoch: Epoch,
    raw: Box<dyn DriverConnection>,
    transaction: Option<TransactionMarker>,
    created_at: Instant,
    last_activity: Instant,
    checkout_count: u64,
    closed: bool,
    permit: Option<CapacityPermit>,
}

impl PooledConnection {
    pub(crate) fn new(id: ConnectionId, epoch: Epoch, raw: Box<dyn DriverConnection>) -> Self {
        let now = Instant::now();
        Self {
            id,
            epoch,
            raw,
            transaction: None,
            created_at: now,
            last_activity: now,
            checkout_count: 0,
            closed: false,
            permit: None,
        }
    }

    /// Count the connection against the pool maximum until it is closed,
    /// retired, or dropped.
    pub(crate) fn hold(&mut self, permit: CapacityPermit) {
        self.permit = Some(permit);
    }

    /// Stop counting the connection against the pool maximum.
    pub(crate) fn release_capacity(&mut self) {
        self.permit = None;
    }

    /// Unique connection id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Epoch the connection was opened in.
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// When the connection was opened.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When a statement was last created on the connection.
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Number of times the connection has been handed to a caller.
    #[must_use]
    pub fn checkout_count(&self) -> u64 {
        self.checkout_count
    }

    /// Whether a transaction is open on this connection.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// The transaction handle that owns this connection, if any.
    #[must_use]
    pub fn transaction_owner(&self) -> Option<TransactionId> {
        self.transaction.as_ref().map(|m| m.owner)
    }

    /// Whether the connection has been closed by the pool.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.closed
    }

    /// Whether the connection has been unused since before `cutoff`.
    #[must_use]
    pub(crate) fn unused_since(&self, cutoff: Instant) -> bool {
        self.last_activity < cutoff
    }

    pub(crate) fn mark_checkout(&mut self) {
        self.checkout_count += 1;
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Open a transaction owned by `owner`.
    ///
    /// Disables auto-commit and records a savepoint. Must be followed by
    /// exactly one [`commit`](Self::commit) or [`rollback`](Self::rollback).
    pub(crate) async fn start_transaction(&mut self, owner: TransactionId) -> Result<(), PoolError> {
        debug_assert!(self.transaction.is_none(), "transaction already open");
        self.touch();
        self.raw.set_auto_commit(false).await?;
        match self.raw.set_savepoint().await {
            Ok(savepoint) => {
                tracing::debug!(connection = %self.id, transaction = %owner, "transaction started");
                self.transaction = Some(TransactionMarker { owner, savepoint });
                Ok(())
            }
            Err(e) => {
                self.restore_auto_commit().await;
                Err(e.into())
            }
        }
    }

    /// Commit the open transaction.
    ///
    /// The marker is cleared and auto-commit restored whether or not the
    /// commit succeeds.
    pub(crate) async fn commit(&mut self) -> Result<(), PoolError> {
        let marker = self
            .transaction
            .take()
            .ok_or(PoolError::NoActiveTransaction)?;
        self.touch();
        let result = self.raw.commit().await;
        self.restore_auto_commit().await;
        tracing::debug!(
            connection = %self.id,
            transaction = %marker.owner,
            ok = result.is_ok(),
            "transaction committed"
        );
        result.map_err(PoolError::from)
    }

    /// Roll back the open transaction to its savepoint.
    ///
    /// The marker is cleared and auto-commit restored whether or not the
    /// rollback succeeds.
    pub(crate) async fn rollback(&mut self) -> Result<(), PoolError> {
        let marker = self
            .transaction
            .take()
            .ok_or(PoolError::NoActiveTransaction)?;
        self.touch();
        let result = self.raw.rollback_to(&marker.savepoint).await;
        self.restore_auto_commit().await;
        tracing::debug!(
            connection = %self.id,
            transaction = %marker.owner,
            ok = result.is_ok(),
            "transaction rolled back"
        );
        result.map_err(PoolError::from)
    }

    async fn restore_auto_commit(&mut self) {
        if let Ok(false) = self.raw.auto_commit().await {
            if let Err(e) = self.raw.set_auto_commit(true).await {
                tracing::trace!(connection = %self.id, error = %e, "failed to restore auto-commit");
            }
        }
    }

    /// Close the driver connection.
    ///
    /// An open transaction is rolled back first so an abrupt close never
    /// leaves half a transaction behind. Idempotent; errors are swallowed.
    pub(crate) async fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Some(marker) = self.transaction.take() {
            if let Err(e) = self.raw.rollback_to(&marker.savepoint).await {
                tracing::debug!(connection = %self.id, error = %e, "rollback on close failed");
            }
        }
        if let Err(e) = self.raw.close().await {
            tracing::debug!(connection = %self.id, error = %e, "close failed");
        }
        self.closed = true;
        self.permit = None;
        tracing::debug!(connection = %self.id, epoch = %self.epoch, "connection closed");
    }

    /// Create a statement of `kind`, updating the last-activity time.
    pub(crate) async fn get_statement(
        &mut self,
        sql: &str,
        kind: StatementKind,
    ) -> Result<Box<dyn DriverStatement>, PoolError> {
        self.touch();
        match self.raw.create_statement(kind, sql).await {
            Ok(statement) => Ok(statement),
            Err(crate::driver::DriverError::UnsupportedStatement(kind)) => {
                Err(PoolError::StatementKind(kind.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Ask the driver whether the connection is dead.
    pub(crate) async fn is_closed(&self) -> DriverResult<bool> {
        if self.closed {
            return Ok(true);
        }
        self.raw.is_closed().await
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("epoch", &self.epoch)
            .field("transaction", &self.transaction_owner())
            .field("last_activity", &self.last_activity)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
