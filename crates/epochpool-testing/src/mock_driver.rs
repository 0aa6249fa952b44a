//! In-process mock database driver.
//!
//! [`MockDriver`] implements the pool's driver traits against scripted
//! responses. All connections opened by one driver share a [`MockDatabase`]
//! handle that tests use to simulate outages and to inspect what the pool
//! did: statements executed, commits, rollbacks, and closes.
//!
//! An outage kills every connection open at that moment. Connections stay
//! dead after the database comes back, so only freshly opened connections
//! work again, just like a real server restart.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use epochpool::{
    Driver, DriverConnection, DriverError, DriverResult, DriverRows, DriverStatement, ParamBinder,
    Row, Savepoint, SqlValue, StatementKind,
};
use parking_lot::Mutex;

use crate::response::MockResponse;

/// SQLSTATE-like code reported when a connection is dead.
pub const LINK_FAILURE_CODE: i32 = 8_001;

/// Something the pool did to the mock database.
#[derive(Debug, Clone, PartialEq)]
pub enum MockEvent {
    /// A connection was opened.
    Connected(u64),
    /// A statement ran.
    Executed {
        /// Connection id.
        connection: u64,
        /// Statement text.
        sql: String,
        /// Bound parameters in placeholder order.
        params: Vec<SqlValue>,
    },
    /// A transaction started.
    Began(u64),
    /// A transaction committed.
    Committed(u64),
    /// A transaction rolled back.
    RolledBack(u64),
    /// A connection was closed.
    Closed(u64),
}

struct MockState {
    name: String,
    responses: Mutex<HashMap<String, MockResponse>>,
    default_response: Mutex<MockResponse>,
    unsupported: Mutex<HashSet<StatementKind>>,

    /// Bumped by every outage; connections from older generations are dead.
    generation: AtomicU64,
    down: AtomicBool,
    refuse_connects: AtomicBool,
    liveness_errors: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,

    next_connection: AtomicU64,
    open_connections: AtomicUsize,
    open_statements: AtomicUsize,
    open_results: AtomicUsize,
    events: Mutex<Vec<MockEvent>>,
}

impl MockState {
    fn is_dead(&self, generation: u64) -> bool {
        self.down.load(Ordering::SeqCst) || self.generation.load(Ordering::SeqCst) != generation
    }

    fn record(&self, event: MockEvent) {
        tracing::trace!(?event, "mock database event");
        self.events.lock().push(event);
    }

    fn respond(&self, sql: &str, params: &[SqlValue]) -> MockResponse {
        let scripted = self.responses.lock().get(sql).cloned();
        scripted
            .unwrap_or_else(|| self.default_response.lock().clone())
            .resolve(sql, params)
    }
}

/// Shared handle onto the mock database behind a [`MockDriver`].
#[derive(Clone)]
pub struct MockDatabase {
    state: Arc<MockState>,
}

impl MockDatabase {
    /// Take the database down. Every open connection dies and new
    /// connections are refused until [`recover`](Self::recover).
    pub fn outage(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
        self.state.down.store(true, Ordering::SeqCst);
        tracing::debug!("mock database down");
    }

    /// Bring the database back. Connections killed by the outage stay dead.
    pub fn recover(&self) {
        self.state.down.store(false, Ordering::SeqCst);
        tracing::debug!("mock database up");
    }

    /// Kill every open connection without refusing new ones, like a server
    /// restart that completes before anyone notices.
    pub fn restart(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Refuse new connections while the database otherwise stays up.
    pub fn refuse_connects(&self, refuse: bool) {
        self.state.refuse_connects.store(refuse, Ordering::SeqCst);
    }

    /// Make every connect attempt wait `delay` before answering.
    pub fn delay_connects(&self, delay: Option<Duration>) {
        *self.state.connect_delay.lock() = delay;
    }

    /// Make the liveness check itself fail.
    pub fn liveness_errors(&self, fail: bool) {
        self.state.liveness_errors.store(fail, Ordering::SeqCst);
    }

    /// Script the response to `sql`.
    pub fn set_response(&self, sql: impl Into<String>, response: MockResponse) {
        self.state.responses.lock().insert(sql.into(), response);
    }

    /// Everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<MockEvent> {
        self.state.events.lock().clone()
    }

    /// Statements executed with exactly this text.
    #[must_use]
    pub fn executions_of(&self, sql: &str) -> usize {
        self.state
            .events
            .lock()
            .iter()
            .filter(|e| matches!(e, MockEvent::Executed { sql: s, .. } if s == sql))
            .count()
    }

    /// Connections that executed `sql`, in order.
    #[must_use]
    pub fn connections_running(&self, sql: &str) -> Vec<u64> {
        self.state
            .events
            .lock()
            .iter()
            .filter_map(|e| match e {
                MockEvent::Executed { connection, sql: s, .. } if s == sql => Some(*connection),
                _ => None,
            })
            .collect()
    }

    /// How many times `event` was recorded.
    #[must_use]
    pub fn count(&self, event: &MockEvent) -> usize {
        self.state.events.lock().iter().filter(|e| *e == event).count()
    }

    /// Connections opened so far.
    #[must_use]
    pub fn connections_opened(&self) -> u64 {
        self.state.next_connection.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet closed.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.state.open_connections.load(Ordering::SeqCst)
    }

    /// Statements created and not yet closed.
    #[must_use]
    pub fn open_statements(&self) -> usize {
        self.state.open_statements.load(Ordering::SeqCst)
    }

    /// Results produced and not yet closed.
    #[must_use]
    pub fn open_results(&self) -> usize {
        self.state.open_results.load(Ordering::SeqCst)
    }

    /// Whether connection `id` has been closed.
    #[must_use]
    pub fn was_closed(&self, id: u64) -> bool {
        self.count(&MockEvent::Closed(id)) > 0
    }
}

/// A driver answering from scripted responses.
#[derive(Clone)]
pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    /// Create a new builder.
    pub fn builder() -> MockDriverBuilder {
        MockDriverBuilder::new()
    }

    /// Handle for controlling and inspecting the database.
    #[must_use]
    pub fn database(&self) -> MockDatabase {
        MockDatabase {
            state: self.state.clone(),
        }
    }
}

/// Builder for [`MockDriver`].
pub struct MockDriverBuilder {
    name: String,
    responses: HashMap<String, MockResponse>,
    default_response: MockResponse,
    unsupported: HashSet<StatementKind>,
}

impl MockDriverBuilder {
    /// Create a builder for a driver named `mock` that answers every
    /// statement with an empty result.
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            responses: HashMap::new(),
            default_response: MockResponse::empty(),
            unsupported: HashSet::new(),
        }
    }

    /// Set the identity the driver registers under.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a response for a specific statement text.
    pub fn with_response(mut self, sql: impl Into<String>, response: MockResponse) -> Self {
        self.responses.insert(sql.into(), response);
        self
    }

    /// Set the response for unmatched statements.
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.default_response = response;
        self
    }

    /// Reject statements of `kind`.
    pub fn without_statement_kind(mut self, kind: StatementKind) -> Self {
        self.unsupported.insert(kind);
        self
    }

    /// Build the driver.
    pub fn build(self) -> MockDriver {
        MockDriver {
            state: Arc::new(MockState {
                name: self.name,
                responses: Mutex::new(self.responses),
                default_response: Mutex::new(self.default_response),
                unsupported: Mutex::new(self.unsupported),
                generation: AtomicU64::new(0),
                down: AtomicBool::new(false),
                refuse_connects: AtomicBool::new(false),
                liveness_errors: AtomicBool::new(false),
                connect_delay: Mutex::new(None),
                next_connection: AtomicU64::new(0),
                open_connections: AtomicUsize::new(0),
                open_statements: AtomicUsize::new(0),
                open_results: AtomicUsize::new(0),
                events: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl Default for MockDriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Driver for MockDriver {
    fn name(&self) -> &str {
        &self.state.name
    }

    async fn connect(
        &self,
        _address: &str,
        _principal: &str,
        _credential: &str,
    ) -> DriverResult<Box<dyn DriverConnection>> {
        let delay = *self.state.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.down.load(Ordering::SeqCst) || self.state.refuse_connects.load(Ordering::SeqCst)
        {
            return Err(DriverError::Connect("connection refused".into()));
        }
        let id = self.state.next_connection.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.open_connections.fetch_add(1, Ordering::SeqCst);
        self.state.record(MockEvent::Connected(id));
        Ok(Box::new(MockConnection {
            state: self.state.clone(),
            id,
            generation: self.state.generation.load(Ordering::SeqCst),
            auto_commit: true,
            next_savepoint: 0,
            closed: false,
        }))
    }
}

struct MockConnection {
    state: Arc<MockState>,
    id: u64,
    generation: u64,
    auto_commit: bool,
    next_savepoint: u64,
    closed: bool,
}

impl MockConnection {
    fn ensure_alive(&self) -> DriverResult<()> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        if self.state.is_dead(self.generation) {
            return Err(link_failure());
        }
        Ok(())
    }
}

fn link_failure() -> DriverError {
    DriverError::Query {
        code: LINK_FAILURE_CODE,
        message: "communication link failure".into(),
    }
}

#[async_trait::async_trait]
impl DriverConnection for MockConnection {
    async fn create_statement(
        &mut self,
        kind: StatementKind,
        sql: &str,
    ) -> DriverResult<Box<dyn DriverStatement>> {
        self.ensure_alive()?;
        if self.state.unsupported.lock().contains(&kind) {
            return Err(DriverError::UnsupportedStatement(kind));
        }
        self.state.open_statements.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStatement {
            state: self.state.clone(),
            connection: self.id,
            generation: self.generation,
            kind,
            prepared: sql.to_string(),
            params: Vec::new(),
            closed: false,
        }))
    }

    async fn set_auto_commit(&mut self, enabled: bool) -> DriverResult<()> {
        self.ensure_alive()?;
        self.auto_commit = enabled;
        Ok(())
    }

    async fn auto_commit(&self) -> DriverResult<bool> {
        self.ensure_alive()?;
        Ok(self.auto_commit)
    }

    async fn set_savepoint(&mut self) -> DriverResult<Savepoint> {
        self.ensure_alive()?;
        self.next_savepoint += 1;
        self.state.record(MockEvent::Began(self.id));
        Ok(Savepoint {
            id: self.next_savepoint,
            name: None,
        })
    }

    async fn commit(&mut self) -> DriverResult<()> {
        self.ensure_alive()?;
        self.state.record(MockEvent::Committed(self.id));
        Ok(())
    }

    async fn rollback_to(&mut self, _savepoint: &Savepoint) -> DriverResult<()> {
        self.ensure_alive()?;
        self.state.record(MockEvent::RolledBack(self.id));
        Ok(())
    }

    async fn is_closed(&self) -> DriverResult<bool> {
        if self.state.liveness_errors.load(Ordering::SeqCst) {
            return Err(DriverError::Other("liveness check failed".into()));
        }
        Ok(self.closed || self.state.is_dead(self.generation))
    }

    async fn close(&mut self) -> DriverResult<()> {
        if !self.closed {
            self.closed = true;
            self.state.open_connections.fetch_sub(1, Ordering::SeqCst);
            self.state.record(MockEvent::Closed(self.id));
        }
        Ok(())
    }
}

struct MockStatement {
    state: Arc<MockState>,
    connection: u64,
    generation: u64,
    kind: StatementKind,
    prepared: String,
    params: Vec<(usize, SqlValue)>,
    closed: bool,
}

impl MockStatement {
    fn run(&mut self, sql: &str) -> DriverResult<MockResponse> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        if self.state.is_dead(self.generation) {
            return Err(link_failure());
        }
        let sql = match self.kind {
            StatementKind::Plain => sql.to_string(),
            StatementKind::Prepared | StatementKind::Callable => self.prepared.clone(),
        };
        self.params.sort_by_key(|(index, _)| *index);
        let params: Vec<SqlValue> = self.params.iter().map(|(_, v)| v.clone()).collect();
        let response = self.state.respond(&sql, &params);
        self.state.record(MockEvent::Executed {
            connection: self.connection,
            sql,
            params,
        });
        match response {
            MockResponse::Error { code, message } => Err(DriverError::Query { code, message }),
            other => Ok(other),
        }
    }
}

impl ParamBinder for MockStatement {
    type Error = DriverError;

    fn bind_null(&mut self, index: usize) -> DriverResult<()> {
        self.bind_object(index, &SqlValue::Null)
    }

    fn bind_object(&mut self, index: usize, value: &SqlValue) -> DriverResult<()> {
        if index == 0 {
            return Err(DriverError::Bind {
                index,
                message: "placeholders are numbered from 1".into(),
            });
        }
        self.params.retain(|(i, _)| *i != index);
        self.params.push((index, value.clone()));
        Ok(())
    }
}

#[async_trait::async_trait]
impl DriverStatement for MockStatement {
    async fn execute_query(&mut self, sql: &str) -> DriverResult<Box<dyn DriverRows>> {
        let rows = match self.run(sql)? {
            MockResponse::Rows(rows) => rows,
            _ => Vec::new(),
        };
        self.state.open_results.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockRows {
            state: self.state.clone(),
            rows: rows.into_iter(),
            closed: false,
        }))
    }

    async fn execute_update(&mut self, sql: &str) -> DriverResult<u64> {
        match self.run(sql)? {
            MockResponse::RowsAffected(n) => Ok(n),
            MockResponse::Rows(rows) => Ok(rows.len() as u64),
            _ => Ok(0),
        }
    }

    async fn close(&mut self) -> DriverResult<()> {
        if !self.closed {
            self.closed = true;
            self.state.open_statements.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct MockRows {
    state: Arc<MockState>,
    rows: std::vec::IntoIter<Vec<SqlValue>>,
    closed: bool,
}

#[async_trait::async_trait]
impl DriverRows for MockRows {
    async fn next_row(&mut self) -> DriverResult<Option<Row>> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        Ok(self.rows.next().map(Row::new))
    }

    async fn close(&mut self) -> DriverResult<()> {
        if !self.closed {
            self.closed = true;
            self.state.open_results.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_response_and_events() {
        let driver = MockDriver::builder()
            .with_response("SELECT 1", MockResponse::scalar_int(1))
            .build();
        let db = driver.database();

        let mut conn = driver.connect("db", "user", "pw").await.unwrap();
        let mut stmt = conn
            .create_statement(StatementKind::Plain, "")
            .await
            .unwrap();
        let mut rows = stmt.execute_query("SELECT 1").await.unwrap();
        let row = rows.next_row().await.unwrap().unwrap();
        assert_eq!(row.get::<i32>(0).unwrap(), 1);
        assert!(rows.next_row().await.unwrap().is_none());

        assert_eq!(db.open_results(), 1);
        rows.close().await.unwrap();
        stmt.close().await.unwrap();
        assert_eq!(db.open_results(), 0);
        assert_eq!(db.open_statements(), 0);
        assert_eq!(db.executions_of("SELECT 1"), 1);
    }

    #[tokio::test]
    async fn test_outage_kills_existing_connections() {
        let driver = MockDriver::builder().build();
        let db = driver.database();
        let conn = driver.connect("db", "user", "pw").await.unwrap();
        assert!(!conn.is_closed().await.unwrap());

        db.outage();
        assert!(conn.is_closed().await.unwrap());
        assert!(driver.connect("db", "user", "pw").await.is_err());

        db.recover();
        assert!(conn.is_closed().await.unwrap());
        let fresh = driver.connect("db", "user", "pw").await.unwrap();
        assert!(!fresh.is_closed().await.unwrap());
    }

    #[tokio::test]
    async fn test_prepared_params_recorded_in_order() {
        let driver = MockDriver::builder().build();
        let db = driver.database();
        let mut conn = driver.connect("db", "user", "pw").await.unwrap();
        let mut stmt = conn
            .create_statement(StatementKind::Prepared, "UPDATE t SET a = ? WHERE b = ?")
            .await
            .unwrap();
        stmt.bind_int(2, 7).unwrap();
        stmt.bind_string(1, "x").unwrap();
        stmt.execute_update("ignored").await.unwrap();

        assert_eq!(
            db.events().last().unwrap(),
            &MockEvent::Executed {
                connection: 1,
                sql: "UPDATE t SET a = ? WHERE b = ?".into(),
                params: vec![SqlValue::String("x".into()), SqlValue::Int(7)],
            }
        );
    }
}
