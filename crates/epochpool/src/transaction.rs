//! Transaction handles.

use std::fmt;

use epochpool_types::{SqlValue, ToSql, to_values};

use crate::connection::TransactionId;
use crate::driver::StatementKind;
use crate::error::Result;
use crate::ledger::ResultCursor;
use crate::pool::Pool;

/// An open transaction.
///
/// Statements issued through the handle run on the connection pinned to it.
/// Finish with [`commit`](Self::commit) or [`rollback`](Self::rollback);
/// dropping a handle with the transaction still open rolls it back in the
/// background.
///
/// A handle is meant to be used by one task at a time. If the pool retires
/// the connection after a disconnect, further use fails with
/// [`PoolError::NoActiveTransaction`](crate::PoolError::NoActiveTransaction).
#[must_use = "dropping a transaction rolls it back"]
pub struct Transaction {
    pool: Pool,
    id: TransactionId,
}

impl Transaction {
    pub(crate) fn new(pool: Pool, id: TransactionId) -> Self {
        Self { pool, id }
    }

    /// Identifier of this transaction.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Whether the pool still holds a connection for this transaction.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.pool.shared().has_pinned(self.id)
    }

    /// Commit and release the connection.
    pub async fn commit(self) -> Result<()> {
        self.pool.commit(&self).await
    }

    /// Roll back and release the connection.
    pub async fn rollback(self) -> Result<()> {
        self.pool.rollback(&self).await
    }

    /// Execute a plain mutating statement in the transaction.
    pub async fn query_to_statement(&self, sql: &str) -> Result<u64> {
        self.execute(StatementKind::Plain, sql, &[]).await
    }

    /// Execute a prepared mutating statement in the transaction.
    pub async fn query_to_prepared_statement(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64> {
        let params = to_values(params)?;
        self.execute(StatementKind::Prepared, sql, &params).await
    }

    /// Execute a stored-procedure call in the transaction.
    pub async fn query_to_callable_statement(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64> {
        let params = to_values(params)?;
        self.execute(StatementKind::Callable, sql, &params).await
    }

    /// Run a plain read query in the transaction.
    pub async fn select_query_to_statement(&self, sql: &str) -> Result<ResultCursor> {
        self.select(StatementKind::Plain, sql, &[]).await
    }

    /// Run a prepared read query in the transaction.
    pub async fn select_query_to_prepared_statement(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<ResultCursor> {
        let params = to_values(params)?;
        self.select(StatementKind::Prepared, sql, &params).await
    }

    /// Run a stored-procedure call returning rows in the transaction.
    pub async fn select_query_to_callable_statement(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<ResultCursor> {
        let params = to_values(params)?;
        self.select(StatementKind::Callable, sql, &params).await
    }

    /// Execute a mutating statement of a runtime-selected kind.
    pub async fn execute(&self, kind: StatementKind, sql: &str, params: &[SqlValue]) -> Result<u64> {
        self.pool
            .shared()
            .execute_update(Some(self.id), kind, sql, params)
            .await
    }

    /// Run a read query of a runtime-selected kind. Not retried on
    /// disconnect.
    pub async fn select(
        &self,
        kind: StatementKind,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<ResultCursor> {
        self.pool
            .shared()
            .execute_select(Some(self.id), kind, sql, params)
            .await
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let inner = self.pool.shared();
        if inner.has_pinned(self.id) {
            tracing::debug!(transaction = %self.id, "transaction dropped while open; rolling back");
            inner.abandon_transaction(self.id);
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction").field("id", &self.id).finish()
    }
}
