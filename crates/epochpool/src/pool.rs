//! Connection pool implementation.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use epochpool_types::{SqlValue, ToSql, bind_all, to_values};
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

use crate::capacity::{Capacity, CapacityPermit};
use crate::config::{
    CHECKOUT_POLL_INTERVAL, ConnectInfo, PoolConfig, interval_from_minutes, normalize_quantity,
};
use crate::connection::{ConnectionId, PooledConnection, TransactionId};
use crate::driver::{Driver, DriverRegistry, DriverStatement, StatementKind};
use crate::epoch::{Epoch, EpochGenerator};
use crate::error::{PoolError, Result};
use crate::ledger::{ResultCursor, ResultLedger, ResultSlot};
use crate::manager::{CloseRequest, ManagerHandle};
use crate::pinning::PinningMap;
use crate::queue::IdleQueue;
use crate::transaction::Transaction;
use crate::validation::ValidationReport;

/// A database connection pool.
///
/// Connections are opened eagerly up to the minimum, handed out for one
/// statement at a time, and pinned to a [`Transaction`] while one is open.
/// When a statement fails on a dead connection the pool retires the whole
/// connection generation; the background manager closes it.
///
/// `Pool` is a cheap handle; clones share the same connections.
///
/// # Example
///
/// ```rust,ignore
/// use epochpool::{ConnectInfo, DriverRegistry, Pool, PoolConfig};
///
/// let registry = DriverRegistry::new().with_driver(my_driver);
/// let pool = Pool::new(
///     &registry,
///     ConnectInfo::new("mydb", "db://localhost/app", "app", "secret"),
///     PoolConfig::new().connection_quantity(2, 10).validation_query("SELECT 1"),
/// )
/// .await?;
///
/// let rows = pool
///     .select_query_to_prepared_statement("SELECT name FROM users WHERE id = ?", &[&42i32])
///     .await?
///     .collect_rows()
///     .await?;
/// ```
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    connect: ConnectInfo,
    driver: Arc<dyn Driver>,

    /// Settings that can change at runtime.
    settings: RwLock<PoolConfig>,

    epochs: EpochGenerator,
    idle: IdleQueue,
    pinned: PinningMap,

    /// One permit per live connection, bounded by `max_connections`.
    capacity: Arc<Capacity>,

    ledger: ResultLedger,
    manager: ManagerHandle,

    closed: AtomicBool,
    next_connection_id: AtomicU64,
    next_transaction_id: AtomicU64,
    created_at: Instant,
    metrics: Mutex<PoolMetricsInner>,
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    connections_created: u64,
    connections_closed: u64,
    checkouts_successful: u64,
    checkouts_failed: u64,
    invalidations: u64,
    results_reclaimed: u64,
    validations_run: u64,
    validation_failures: u64,
}

impl Pool {
    /// Create a new pool builder.
    #[must_use]
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    /// Create a pool and open `min_connections` connections.
    ///
    /// Fails on blank connectivity parameters, an unregistered driver, an
    /// invalid configuration, or if any initial connection cannot be opened
    /// or fails the validation query.
    pub async fn new(
        registry: &DriverRegistry,
        connect: ConnectInfo,
        config: PoolConfig,
    ) -> Result<Self> {
        connect.validate()?;
        config.validate()?;
        let driver = registry.get(&connect.driver).ok_or_else(|| {
            PoolError::Configuration(format!("no driver registered as `{}`", connect.driver))
        })?;

        let (manager, requests) = ManagerHandle::new();
        let tick = config.manager_tick;
        let every = config.validation_every_ticks;
        let capacity = Capacity::new(config.max_connections as usize);
        let inner = Arc::new(PoolInner {
            connect,
            driver,
            settings: RwLock::new(config),
            epochs: EpochGenerator::new(),
            idle: IdleQueue::new(),
            pinned: PinningMap::new(),
            capacity,
            ledger: ResultLedger::new(),
            manager,
            closed: AtomicBool::new(false),
            next_connection_id: AtomicU64::new(1),
            next_transaction_id: AtomicU64::new(1),
            created_at: Instant::now(),
            metrics: Mutex::new(PoolMetricsInner::default()),
        });
        inner
            .manager
            .spawn(Arc::downgrade(&inner), requests, tick, every);

        let pool = Self { inner };
        if let Err(e) = pool.inner.init().await {
            pool.close().await;
            return Err(e);
        }

        let settings = pool.inner.settings.read().clone();
        tracing::info!(
            driver = %pool.inner.connect.driver,
            address = %pool.inner.connect.address,
            min = settings.min_connections,
            max = settings.max_connections,
            epoch = %pool.inner.epochs.current(),
            "connection pool created"
        );
        Ok(pool)
    }

    /// Execute a plain mutating statement.
    pub async fn query_to_statement(&self, sql: &str) -> Result<u64> {
        self.inner
            .execute_update(None, StatementKind::Plain, sql, &[])
            .await
    }

    /// Execute a prepared mutating statement with positional parameters.
    pub async fn query_to_prepared_statement(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64> {
        let params = to_values(params)?;
        self.inner
            .execute_update(None, StatementKind::Prepared, sql, &params)
            .await
    }

    /// Execute a stored-procedure call with positional parameters.
    pub async fn query_to_callable_statement(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64> {
        let params = to_values(params)?;
        self.inner
            .execute_update(None, StatementKind::Callable, sql, &params)
            .await
    }

    /// Run a plain read query.
    ///
    /// A read that fails because the connection died is retried once on a
    /// fresh connection.
    pub async fn select_query_to_statement(&self, sql: &str) -> Result<ResultCursor> {
        self.inner
            .execute_select(None, StatementKind::Plain, sql, &[])
            .await
    }

    /// Run a prepared read query with positional parameters.
    pub async fn select_query_to_prepared_statement(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<ResultCursor> {
        let params = to_values(params)?;
        self.inner
            .execute_select(None, StatementKind::Prepared, sql, &params)
            .await
    }

    /// Run a stored-procedure call returning rows.
    pub async fn select_query_to_callable_statement(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<ResultCursor> {
        let params = to_values(params)?;
        self.inner
            .execute_select(None, StatementKind::Callable, sql, &params)
            .await
    }

    /// Execute a mutating statement of a runtime-selected kind.
    ///
    /// Parameters are ignored for [`StatementKind::Plain`].
    pub async fn execute(
        &self,
        kind: StatementKind,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<u64> {
        self.inner.execute_update(None, kind, sql, params).await
    }

    /// Run a read query of a runtime-selected kind.
    pub async fn select(
        &self,
        kind: StatementKind,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<ResultCursor> {
        self.inner.execute_select(None, kind, sql, params).await
    }

    /// Open a transaction.
    ///
    /// The connection is pinned to the returned handle until
    /// [`commit`](Self::commit) or [`rollback`](Self::rollback). Dropping the
    /// handle with the transaction still open rolls it back.
    pub async fn start_transaction(&self) -> Result<Transaction> {
        let id = self.inner.start_transaction().await?;
        Ok(Transaction::new(self.clone(), id))
    }

    /// Commit the transaction and return its connection to the idle queue.
    pub async fn commit(&self, transaction: &Transaction) -> Result<()> {
        self.inner.finish_transaction(transaction.id(), true).await
    }

    /// Roll back the transaction and return its connection to the idle
    /// queue.
    pub async fn rollback(&self, transaction: &Transaction) -> Result<()> {
        self.inner.finish_transaction(transaction.id(), false).await
    }

    /// Replace the validation query. Blank text clears it.
    pub fn set_validation_query(&self, query: &str) {
        let query = query.trim();
        let mut settings = self.inner.settings.write();
        settings.validation_query = (!query.is_empty()).then(|| Arc::from(query));
        tracing::debug!(query, "validation query updated");
    }

    /// Resize the pool.
    ///
    /// A minimum below 1 keeps the current minimum; a maximum not greater
    /// than the minimum becomes `min + 1`. Existing connections are not
    /// closed; the pool shrinks through validation sweeps.
    pub fn set_connection_quantity(&self, min: u32, max: u32) {
        let mut settings = self.inner.settings.write();
        let (min, max) = normalize_quantity(settings.min_connections, min, max);
        settings.min_connections = min;
        settings.max_connections = max;
        self.inner.capacity.resize(max as usize);
        tracing::debug!(min, max, "connection quantity updated");
    }

    /// Set the validation interval in minutes.
    ///
    /// Non-positive values are ignored; values below 10 become 10.
    pub fn set_validation_interval_minutes(&self, minutes: i64) {
        if let Some(interval) = interval_from_minutes(minutes) {
            self.inner.settings.write().validation_interval = interval;
            tracing::debug!(?interval, "validation interval updated");
        }
    }

    /// Run a validation sweep now instead of waiting for the manager.
    pub async fn validate_connections(&self) -> ValidationReport {
        self.inner.validate_connections().await
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let idle = self.inner.idle.len();
        let pinned = self.inner.pinned.len();
        let in_use = self.inner.capacity.held().saturating_sub(idle + pinned);
        let settings = self.inner.settings.read();
        PoolStatus {
            idle,
            pinned,
            in_use,
            min: settings.min_connections,
            max: settings.max_connections,
            epoch: self.inner.epochs.current(),
            open_results: self.inner.ledger.open_count(),
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            invalidations: inner.invalidations,
            results_reclaimed: inner.results_reclaimed,
            validations_run: inner.validations_run,
            validation_failures: inner.validation_failures,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Close the pool.
    ///
    /// Stops the manager, then closes idle and pinned connections and any
    /// outstanding results. Connections still checked out are closed when
    /// they come back.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.manager.shutdown();
        self.inner.manager.join().await;

        for conn in self.inner.idle.drain() {
            self.inner.close_connection(conn).await;
        }
        for slot in self.inner.pinned.drain() {
            let conn = slot.lock().await.take();
            if let Some(conn) = conn {
                self.inner.close_connection(conn).await;
            }
        }
        let results = self.inner.ledger.close_all().await;
        tracing::info!(results, "connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Snapshot of the current configuration.
    #[must_use]
    pub fn config(&self) -> PoolConfig {
        self.inner.settings.read().clone()
    }

    /// The current connection epoch.
    #[must_use]
    pub fn current_epoch(&self) -> Epoch {
        self.inner.epochs.current()
    }

    pub(crate) fn shared(&self) -> &Arc<PoolInner> {
        &self.inner
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("connect", &self.inner.connect)
            .field("status", &self.status())
            .finish()
    }
}

/// A checked-out connection.
///
/// Goes back to the pool when dropped, so every exit path of a statement
/// returns its connection.
pub(crate) struct Checkout<'a> {
    pool: &'a PoolInner,
    conn: Option<PooledConnection>,
}

impl Deref for Checkout<'_> {
    type Target = PooledConnection;

    #[allow(clippy::expect_used)]
    fn deref(&self) -> &PooledConnection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for Checkout<'_> {
    #[allow(clippy::expect_used)]
    fn deref_mut(&mut self) -> &mut PooledConnection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.return_connection(conn);
        }
    }
}

impl PoolInner {
    /// Open connections until `min_connections` are idle.
    async fn init(&self) -> Result<()> {
        let min = self.settings.read().min_connections as usize;
        while self.idle.len() < min {
            let Some(permit) = self.capacity.try_acquire() else {
                break;
            };
            let conn = self.new_connection(permit).await?;
            self.place(conn);
        }
        Ok(())
    }

    pub(crate) fn ledger(&self) -> &ResultLedger {
        &self.ledger
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Check out a connection.
    ///
    /// A transaction caller gets its pinned connection or
    /// [`PoolError::NoActiveTransaction`]. Anyone else gets an idle
    /// connection of the current epoch, a new connection if the pool is
    /// below capacity, or whatever is returned within the connection
    /// timeout.
    pub(crate) async fn checkout(&self, caller: Option<TransactionId>) -> Result<Checkout<'_>> {
        let conn = self.request_connection(caller).await;
        let mut metrics = self.metrics.lock();
        match conn {
            Ok(mut conn) => {
                metrics.checkouts_successful += 1;
                conn.mark_checkout();
                tracing::trace!(connection = %conn.id(), "connection checked out");
                Ok(Checkout {
                    pool: self,
                    conn: Some(conn),
                })
            }
            Err(e) => {
                metrics.checkouts_failed += 1;
                Err(e)
            }
        }
    }

    /// Find a connection for the caller.
    async fn request_connection(&self, caller: Option<TransactionId>) -> Result<PooledConnection> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }

        if let Some(owner) = caller {
            let conn = self
                .pinned
                .take(owner)
                .await
                .ok_or(PoolError::NoActiveTransaction)?;
            return Ok(conn);
        }

        if let Some(conn) = self.poll_current() {
            return Ok(conn);
        }
        if let Some(conn) = self.open_if_below_capacity().await? {
            return Ok(conn);
        }

        let timeout = self.settings.read().connection_timeout;
        let attempts = timeout.as_millis() / CHECKOUT_POLL_INTERVAL.as_millis();
        tracing::debug!(?timeout, "pool at capacity; waiting for a connection");
        for _ in 0..attempts {
            tokio::time::sleep(CHECKOUT_POLL_INTERVAL).await;
            if self.is_closed() {
                return Err(PoolError::PoolClosed);
            }
            if let Some(conn) = self.poll_current() {
                return Ok(conn);
            }
            if let Some(conn) = self.open_if_below_capacity().await? {
                return Ok(conn);
            }
        }

        tracing::warn!(?timeout, "no connection available");
        Err(PoolError::NoConnectionAvailable { waited: timeout })
    }

    /// Take the first idle connection of the current epoch, retiring stale
    /// ones on the way.
    fn poll_current(&self) -> Option<PooledConnection> {
        while let Some(conn) = self.idle.poll() {
            if self.epochs.is_current(conn.epoch()) {
                return Some(conn);
            }
            self.retire(conn);
        }
        None
    }

    /// Open a connection if idle, pinned, and checked-out connections are
    /// below the maximum.
    async fn open_if_below_capacity(&self) -> Result<Option<PooledConnection>> {
        let Some(permit) = self.capacity.try_acquire() else {
            return Ok(None);
        };
        self.new_connection(permit).await.map(Some)
    }

    /// Give a checked-out connection back.
    pub(crate) fn return_connection(&self, conn: PooledConnection) {
        tracing::trace!(connection = %conn.id(), "connection returned");
        self.place(conn);
    }

    /// Route a connection the pool holds: stale or closed ones to the
    /// manager, transactions to their owner, the rest to the idle queue.
    pub(crate) fn place(&self, conn: PooledConnection) {
        if conn.is_released() {
            return;
        }
        if self.is_closed() || !self.epochs.is_current(conn.epoch()) {
            self.retire(conn);
            return;
        }
        match conn.transaction_owner() {
            Some(owner) => {
                if let Some(displaced) = self.pinned.pin(owner, conn) {
                    tracing::warn!(transaction = %owner, "transaction already had a pinned connection");
                    self.close_slot_later(displaced);
                }
            }
            None => self.idle.offer(conn),
        }
    }

    /// Hand a connection to the manager for closing. It stops counting
    /// against the maximum right away.
    fn retire(&self, mut conn: PooledConnection) {
        conn.release_capacity();
        self.manager.request_close(CloseRequest::Connection(conn));
    }

    fn close_slot_later(&self, slot: crate::pinning::PinSlot) {
        self.manager.request_close(CloseRequest::Slot(slot));
    }

    /// Open a connection stamped with the current epoch and run the
    /// validation query on it. The connection holds `permit` for its
    /// lifetime.
    async fn new_connection(&self, permit: CapacityPermit) -> Result<PooledConnection> {
        let raw = self
            .driver
            .connect(
                &self.connect.address,
                &self.connect.principal,
                &self.connect.credential,
            )
            .await
            .map_err(|e| {
                tracing::warn!(address = %self.connect.address, error = %e, "failed to connect");
                PoolError::Connect(e)
            })?;

        let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let mut conn = PooledConnection::new(id, self.epochs.current(), raw);
        conn.hold(permit);

        if let Err(e) = self.run_validation_query(&mut conn).await {
            tracing::warn!(connection = %id, error = %e, "new connection failed validation");
            self.disconnect_database(conn.epoch());
            self.close_connection(conn).await;
            return Err(e);
        }

        self.metrics.lock().connections_created += 1;
        tracing::debug!(connection = %id, epoch = %conn.epoch(), "connection opened");
        Ok(conn)
    }

    /// Run the validation query, if one is configured.
    pub(crate) async fn run_validation_query(&self, conn: &mut PooledConnection) -> Result<()> {
        let query = self.settings.read().validation_query.clone();
        let Some(query) = query else {
            return Ok(());
        };
        let failed = |source| PoolError::Validation {
            query: query.to_string(),
            source,
        };

        let mut statement = match conn.get_statement(&query, StatementKind::Plain).await {
            Ok(statement) => statement,
            Err(PoolError::Driver(source)) => return Err(failed(source)),
            Err(e) => return Err(e),
        };
        let result = statement.execute_query(&query).await;
        close_statement(statement).await;
        let mut rows = result.map_err(failed)?;
        if let Err(e) = rows.close().await {
            tracing::trace!(error = %e, "validation result close failed");
        }
        Ok(())
    }

    /// Retire `stale`, the epoch of a connection found dead, and ask the
    /// manager to close it.
    ///
    /// Concurrent triggers for the same epoch advance it once; a trigger
    /// from an already retired epoch does nothing.
    pub(crate) fn disconnect_database(&self, stale: Epoch) {
        if self.epochs.advance_from(stale) {
            self.metrics.lock().invalidations += 1;
            tracing::warn!(
                %stale,
                current = %self.epochs.current(),
                "database connection lost; retiring connection generation"
            );
            self.manager.request_close(CloseRequest::Epoch(stale));
        }
    }

    /// Close every idle and pinned connection from `epoch` or earlier.
    pub(crate) async fn purge_epoch(&self, epoch: Epoch) {
        let mut closed = 0usize;
        for conn in self.idle.extract(|c| c.epoch() <= epoch) {
            self.close_connection(conn).await;
            closed += 1;
        }
        for slot in self.pinned.remove_through(epoch) {
            let conn = slot.lock().await.take();
            if let Some(conn) = conn {
                self.close_connection(conn).await;
                closed += 1;
            }
        }
        tracing::debug!(%epoch, closed, "retired connection generation closed");
    }

    pub(crate) async fn close_connection(&self, mut conn: PooledConnection) {
        if conn.is_released() {
            return;
        }
        conn.close().await;
        self.metrics.lock().connections_closed += 1;
    }

    pub(crate) fn record_reclaimed(&self, count: usize) {
        self.metrics.lock().results_reclaimed += count as u64;
    }

    pub(crate) fn record_validation(&self, failed: bool) {
        let mut metrics = self.metrics.lock();
        metrics.validations_run += 1;
        if failed {
            metrics.validation_failures += 1;
        }
    }

    pub(crate) fn pinned(&self) -> &PinningMap {
        &self.pinned
    }

    pub(crate) fn idle(&self) -> &IdleQueue {
        &self.idle
    }

    pub(crate) fn settings(&self) -> PoolConfig {
        self.settings.read().clone()
    }

    /// Turn a failed statement into the error the caller sees.
    ///
    /// If the connection reports itself closed the epoch is retired and the
    /// caller gets [`PoolError::Disconnected`]. If the liveness check itself
    /// fails the epoch is retired and the original error is kept.
    async fn classify(&self, conn: &PooledConnection, err: PoolError) -> PoolError {
        if !matches!(err, PoolError::Driver(_)) {
            return err;
        }
        match conn.is_closed().await {
            Ok(false) => err,
            Ok(true) => {
                tracing::debug!(connection = %conn.id(), error = %err, "statement failed on dead connection");
                self.disconnect_database(conn.epoch());
                PoolError::Disconnected
            }
            Err(check) => {
                tracing::debug!(connection = %conn.id(), error = %check, "liveness check failed");
                self.disconnect_database(conn.epoch());
                err
            }
        }
    }

    async fn prepare(
        &self,
        conn: &mut PooledConnection,
        kind: StatementKind,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Box<dyn DriverStatement>> {
        let mut statement = conn.get_statement(sql, kind).await?;
        if kind.accepts_params() {
            if let Err(e) = bind_all(statement.as_mut(), params) {
                close_statement(statement).await;
                return Err(e.into());
            }
        }
        Ok(statement)
    }

    /// Run a mutating statement. Never retried.
    pub(crate) async fn execute_update(
        &self,
        caller: Option<TransactionId>,
        kind: StatementKind,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<u64> {
        let mut conn = self.checkout(caller).await?;
        let result = match self.prepare(&mut conn, kind, sql, params).await {
            Ok(mut statement) => {
                let result = statement.execute_update(sql).await.map_err(PoolError::from);
                close_statement(statement).await;
                result
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(affected) => Ok(affected),
            Err(e) => Err(self.classify(&conn, e).await),
        }
    }

    /// Run a read query, retrying once on a fresh connection if the first
    /// attempt hit a dead one.
    ///
    /// Reads inside a transaction are not retried: the transaction died
    /// with its connection.
    pub(crate) async fn execute_select(
        &self,
        caller: Option<TransactionId>,
        kind: StatementKind,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<ResultCursor> {
        match self.select_once(caller, kind, sql, params).await {
            Err(PoolError::Disconnected) if caller.is_none() => {
                tracing::debug!("retrying read after disconnect");
                self.select_once(None, kind, sql, params).await
            }
            other => other,
        }
    }

    async fn select_once(
        &self,
        caller: Option<TransactionId>,
        kind: StatementKind,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<ResultCursor> {
        let mut conn = self.checkout(caller).await?;
        let mut statement = match self.prepare(&mut conn, kind, sql, params).await {
            Ok(statement) => statement,
            Err(e) => return Err(self.classify(&conn, e).await),
        };
        match statement.execute_query(sql).await {
            Ok(rows) => {
                let window = self.settings.read().result_auto_close;
                let deadline = Instant::now() + window;
                let slot = Arc::new(tokio::sync::Mutex::new(ResultSlot::new(statement, rows)));
                self.ledger.register(slot.clone(), deadline);
                Ok(ResultCursor::new(slot, conn.id(), deadline))
            }
            Err(e) => {
                close_statement(statement).await;
                Err(self.classify(&conn, e.into()).await)
            }
        }
    }

    /// Check out a connection and open a transaction on it. The checkout
    /// guard then pins the connection to the new id.
    async fn start_transaction(&self) -> Result<TransactionId> {
        let id = TransactionId(self.next_transaction_id.fetch_add(1, Ordering::Relaxed));
        let mut conn = self.checkout(None).await?;
        if let Err(e) = conn.start_transaction(id).await {
            return Err(self.classify(&conn, e).await);
        }
        Ok(id)
    }

    async fn finish_transaction(&self, owner: TransactionId, commit: bool) -> Result<()> {
        let mut conn = self.checkout(Some(owner)).await?;
        let result = if commit {
            conn.commit().await
        } else {
            conn.rollback().await
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.classify(&conn, e).await),
        }
    }

    pub(crate) fn has_pinned(&self, owner: TransactionId) -> bool {
        self.pinned.contains(owner)
    }

    /// Roll back a transaction whose handle was dropped while open.
    pub(crate) fn abandon_transaction(self: &Arc<Self>, owner: TransactionId) {
        let Some(slot) = self.pinned.remove(owner) else {
            return;
        };
        let pool = Arc::clone(self);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let conn = slot.lock().await.take();
                    if let Some(mut conn) = conn {
                        if let Err(e) = conn.rollback().await {
                            tracing::debug!(transaction = %owner, error = %e, "rollback of dropped transaction failed");
                        }
                        pool.place(conn);
                    }
                });
            }
            Err(_) => {
                tracing::warn!(transaction = %owner, "transaction dropped outside a runtime; closing its connection");
                pool.close_slot_later(slot);
            }
        }
    }
}

async fn close_statement(mut statement: Box<dyn DriverStatement>) {
    if let Err(e) = statement.close().await {
        tracing::trace!(error = %e, "statement close failed");
    }
}

/// Builder for creating a connection pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::builder()
///     .registry(registry)
///     .connect_info(ConnectInfo::new("mydb", "db://localhost/app", "app", "secret"))
///     .min_connections(2)
///     .build()
///     .await?;
/// ```
#[derive(Debug, Default)]
pub struct PoolBuilder {
    registry: DriverRegistry,
    connect: Option<ConnectInfo>,
    pool_config: PoolConfig,
}

impl PoolBuilder {
    /// Create a new pool builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the drivers the pool may use.
    #[must_use]
    pub fn registry(mut self, registry: DriverRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register one driver.
    #[must_use]
    pub fn driver(mut self, driver: impl Driver) -> Self {
        self.registry = self.registry.with_driver(driver);
        self
    }

    /// Set the connectivity parameters.
    #[must_use]
    pub fn connect_info(mut self, connect: ConnectInfo) -> Self {
        self.connect = Some(connect);
        self
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the minimum number of connections.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.pool_config = self.pool_config.min_connections(count);
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.pool_config = self.pool_config.max_connections(count);
        self
    }

    /// Set the checkout wait timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config = self.pool_config.connection_timeout(timeout);
        self
    }

    /// Set the validation query.
    #[must_use]
    pub fn validation_query(mut self, query: impl Into<Arc<str>>) -> Self {
        self.pool_config = self.pool_config.validation_query(query);
        self
    }

    /// Build the pool.
    pub async fn build(self) -> Result<Pool> {
        let connect = self
            .connect
            .ok_or_else(|| PoolError::Configuration("connectivity parameters not set".into()))?;
        Pool::new(&self.registry, connect, self.pool_config).await
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Idle connections available for checkout.
    pub idle: usize,
    /// Connections pinned to open transactions.
    pub pinned: usize,
    /// Connections handed out, being opened, or between the idle queue and
    /// the pinning map.
    pub in_use: usize,
    /// Configured minimum.
    pub min: u32,
    /// Configured maximum.
    pub max: u32,
    /// Current connection epoch.
    pub epoch: Epoch,
    /// Query results still open: neither released by the caller nor
    /// reclaimed by the manager.
    pub open_results: usize,
}

impl PoolStatus {
    /// Connections held in any state.
    #[must_use]
    pub fn total(&self) -> usize {
        self.idle + self.pinned + self.in_use
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total() >= self.max as usize
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total connections opened since pool start.
    pub connections_created: u64,
    /// Total connections closed since pool start.
    pub connections_closed: u64,
    /// Successful checkouts.
    pub checkouts_successful: u64,
    /// Failed checkouts (timeouts, closed pool, missing transaction).
    pub checkouts_failed: u64,
    /// Connection generations retired after a disconnect.
    pub invalidations: u64,
    /// Results force-closed by the manager.
    pub results_reclaimed: u64,
    /// Validation sweeps run.
    pub validations_run: u64,
    /// Validation sweeps aborted by a failed validation query.
    pub validation_failures: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_status_capacity() {
        let status = PoolStatus {
            idle: 2,
            pinned: 1,
            in_use: 2,
            min: 2,
            max: 5,
            epoch: EpochGenerator::starting_at(1).current(),
            open_results: 0,
        };
        assert_eq!(status.total(), 5);
        assert!(status.is_at_capacity());
    }

    #[test]
    fn test_checkout_success_rate() {
        let metrics = PoolMetrics {
            connections_created: 0,
            connections_closed: 0,
            checkouts_successful: 3,
            checkouts_failed: 1,
            invalidations: 0,
            results_reclaimed: 0,
            validations_run: 0,
            validation_failures: 0,
            uptime: Duration::ZERO,
        };
        assert!((metrics.checkout_success_rate() - 0.75).abs() < f64::EPSILON);
    }
}
