//! Leaked-result reclamation.
//!
//! Every successful read query returns a [`ResultCursor`] and records the
//! same statement/result pair in the [`ResultLedger`] with an absolute
//! deadline. Callers should release cursors explicitly; whatever is still
//! open when its deadline passes is closed by the background manager.
//!
//! All entries share one auto-close window, so insertion order is deadline
//! order and the sweep only looks at an expired prefix.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use futures_util::stream::{self, Stream};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::connection::ConnectionId;
use crate::driver::{DriverRows, DriverStatement, Row};
use crate::error::PoolError;

/// The open handles behind one query result.
pub(crate) struct ResultSlot {
    statement: Option<Box<dyn DriverStatement>>,
    rows: Option<Box<dyn DriverRows>>,
}

impl ResultSlot {
    pub(crate) fn new(statement: Box<dyn DriverStatement>, rows: Box<dyn DriverRows>) -> Self {
        Self {
            statement: Some(statement),
            rows: Some(rows),
        }
    }

    fn is_open(&self) -> bool {
        self.statement.is_some() || self.rows.is_some()
    }

    /// Close the statement, then the result. Returns whether anything was
    /// still open.
    async fn close(&mut self) -> bool {
        let was_open = self.is_open();
        if let Some(mut statement) = self.statement.take() {
            if let Err(e) = statement.close().await {
                tracing::trace!(error = %e, "statement close failed");
            }
        }
        if let Some(mut rows) = self.rows.take() {
            if let Err(e) = rows.close().await {
                tracing::trace!(error = %e, "result close failed");
            }
        }
        was_open
    }
}

type SharedSlot = Arc<tokio::sync::Mutex<ResultSlot>>;

/// Row cursor returned by read queries.
///
/// Rows are fetched lazily from the driver. Call [`close`](Self::close) when
/// done; a cursor that is never closed is reclaimed by the pool after the
/// auto-close window, after which reads fail with
/// [`PoolError::ResultClosed`].
pub struct ResultCursor {
    slot: SharedSlot,
    connection: ConnectionId,
    deadline: Instant,
}

impl ResultCursor {
    pub(crate) fn new(slot: SharedSlot, connection: ConnectionId, deadline: Instant) -> Self {
        Self {
            slot,
            connection,
            deadline,
        }
    }

    /// Fetch the next row, or `None` when the result is exhausted.
    pub async fn next_row(&mut self) -> Result<Option<Row>, PoolError> {
        let mut slot = self.slot.lock().await;
        let rows = slot.rows.as_mut().ok_or(PoolError::ResultClosed)?;
        Ok(rows.next_row().await?)
    }

    /// Read every remaining row and release the result.
    pub async fn collect_rows(mut self) -> Result<Vec<Row>, PoolError> {
        let mut out = Vec::new();
        let result = loop {
            match self.next_row().await {
                Ok(Some(row)) => out.push(row),
                Ok(None) => break Ok(out),
                Err(e) => break Err(e),
            }
        };
        self.close().await;
        result
    }

    /// Turn the cursor into a stream of rows.
    ///
    /// The stream ends when the result is exhausted; the result is released
    /// at that point.
    pub fn into_stream(self) -> impl Stream<Item = Result<Row, PoolError>> + Send {
        stream::try_unfold(self, |mut cursor| async move {
            match cursor.next_row().await? {
                Some(row) => Ok(Some((row, cursor))),
                None => {
                    cursor.close().await;
                    Ok(None)
                }
            }
        })
    }

    /// Release the statement and result now.
    pub async fn close(&mut self) {
        self.slot.lock().await.close().await;
    }

    /// Whether the result has been released.
    pub async fn is_closed(&self) -> bool {
        !self.slot.lock().await.is_open()
    }

    /// When the pool will force-close this result.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Connection the query ran on.
    #[must_use]
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }
}

impl fmt::Debug for ResultCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCursor")
            .field("connection", &self.connection)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// An outstanding result awaiting release.
pub(crate) struct LeakedResult {
    slot: SharedSlot,
    deadline: Instant,
}

/// Outstanding results ordered by deadline.
#[derive(Default)]
pub(crate) struct ResultLedger {
    entries: Mutex<VecDeque<LeakedResult>>,
}

impl ResultLedger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record a result; `deadline` must not precede any earlier entry's.
    pub(crate) fn register(&self, slot: SharedSlot, deadline: Instant) {
        let mut entries = self.entries.lock();
        debug_assert!(entries.back().is_none_or(|last| last.deadline <= deadline));
        entries.push_back(LeakedResult { slot, deadline });
    }

    /// Entries whose result is still open. A slot busy with a read counts
    /// as open.
    pub(crate) fn open_count(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.slot.try_lock().map_or(true, |slot| slot.is_open()))
            .count()
    }

    /// Remove the prefix of entries whose deadline has passed.
    fn take_expired(&self, now: Instant) -> Vec<LeakedResult> {
        let mut entries = self.entries.lock();
        let expired = entries
            .iter()
            .position(|entry| entry.deadline > now)
            .unwrap_or(entries.len());
        entries.drain(..expired).collect()
    }

    /// Close every expired result. Returns how many were still open, i.e.
    /// actually leaked by their callers.
    pub(crate) async fn sweep(&self, now: Instant) -> usize {
        let mut reclaimed = 0;
        for entry in self.take_expired(now) {
            if entry.slot.lock().await.close().await {
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            tracing::debug!(reclaimed, "force-closed leaked results");
        }
        reclaimed
    }

    /// Close every outstanding result regardless of deadline.
    pub(crate) async fn close_all(&self) -> usize {
        let all: Vec<_> = self.entries.lock().drain(..).collect();
        let mut closed = 0;
        for entry in all {
            if entry.slot.lock().await.close().await {
                closed += 1;
            }
        }
        closed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::driver::{DriverError, DriverResult};
    use epochpool_types::{ParamBinder, SqlValue};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Closes {
        statements: AtomicUsize,
        rows: AtomicUsize,
    }

    struct StubStatement(Arc<Closes>);

    impl ParamBinder for StubStatement {
        type Error = DriverError;

        fn bind_null(&mut self, _index: usize) -> DriverResult<()> {
            Ok(())
        }

        fn bind_object(&mut self, _index: usize, _value: &SqlValue) -> DriverResult<()> {
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl DriverStatement for StubStatement {
        async fn execute_query(&mut self, _sql: &str) -> DriverResult<Box<dyn DriverRows>> {
            Err(DriverError::Closed)
        }

        async fn execute_update(&mut self, _sql: &str) -> DriverResult<u64> {
            Ok(0)
        }

        async fn close(&mut self) -> DriverResult<()> {
            self.0.statements.fetch_add(1, Ordering::SeqCst);
            Err(DriverError::Other("close errors are swallowed".into()))
        }
    }

    struct StubRows {
        closes: Arc<Closes>,
        remaining: u32,
    }

    #[async_trait::async_trait]
    impl DriverRows for StubRows {
        async fn next_row(&mut self) -> DriverResult<Option<Row>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(Row::new(vec![SqlValue::Int(self.remaining as i32)])))
        }

        async fn close(&mut self) -> DriverResult<()> {
            self.closes.rows.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn slot(closes: &Arc<Closes>, rows: u32) -> SharedSlot {
        Arc::new(tokio::sync::Mutex::new(ResultSlot::new(
            Box::new(StubStatement(closes.clone())),
            Box::new(StubRows {
                closes: closes.clone(),
                remaining: rows,
            }),
        )))
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_stops_at_first_unexpired() {
        let closes = Arc::new(Closes::default());
        let ledger = ResultLedger::new();
        let start = Instant::now();

        ledger.register(slot(&closes, 1), start + Duration::from_secs(1));
        ledger.register(slot(&closes, 1), start + Duration::from_secs(2));
        ledger.register(slot(&closes, 1), start + Duration::from_secs(10));

        assert_eq!(ledger.sweep(start + Duration::from_secs(2)).await, 2);
        assert_eq!(ledger.open_count(), 1);
        assert_eq!(closes.statements.load(Ordering::SeqCst), 2);
        assert_eq!(closes.rows.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_result_not_counted_as_leak() {
        let closes = Arc::new(Closes::default());
        let ledger = ResultLedger::new();
        let shared = slot(&closes, 2);
        let deadline = Instant::now() + Duration::from_secs(15);
        ledger.register(shared.clone(), deadline);

        let mut cursor = ResultCursor::new(shared, ConnectionId(1), deadline);
        assert!(cursor.next_row().await.unwrap().is_some());
        cursor.close().await;
        assert!(cursor.is_closed().await);
        assert_eq!(ledger.open_count(), 0);

        assert_eq!(ledger.sweep(deadline).await, 0);
        assert_eq!(ledger.open_count(), 0);
        assert_eq!(closes.statements.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cursor_fails_after_force_close() {
        let closes = Arc::new(Closes::default());
        let ledger = ResultLedger::new();
        let shared = slot(&closes, 3);
        let deadline = Instant::now() + Duration::from_secs(15);
        ledger.register(shared.clone(), deadline);
        let mut cursor = ResultCursor::new(shared, ConnectionId(7), deadline);

        assert_eq!(ledger.sweep(deadline).await, 1);
        assert!(matches!(
            cursor.next_row().await,
            Err(PoolError::ResultClosed)
        ));
    }

    #[tokio::test]
    async fn test_collect_rows_releases() {
        let closes = Arc::new(Closes::default());
        let shared = slot(&closes, 3);
        let cursor = ResultCursor::new(shared.clone(), ConnectionId(1), Instant::now());

        let rows = cursor.collect_rows().await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(!shared.lock().await.is_open());
    }
}
