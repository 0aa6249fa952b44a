//! Driver capability interface.
//!
//! The pool never talks to a database directly. It goes through the narrow
//! set of object-safe traits defined here: open a connection, create a
//! statement, execute it, fetch rows, control transactions, and close.
//! Concrete drivers are registered in a [`DriverRegistry`] under the identity
//! string that callers pass to the pool.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use epochpool_types::{FromSql, ParamBinder, SqlValue, TypeError};
use thiserror::Error;

use crate::error::PoolError;

/// Errors reported by a driver.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DriverError {
    /// The driver could not open a connection.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The database rejected or failed a statement.
    #[error("query failed ({code}): {message}")]
    Query {
        /// Vendor error code.
        code: i32,
        /// Error message.
        message: String,
    },

    /// The connection, statement or result is already closed.
    #[error("handle closed")]
    Closed,

    /// The driver does not support the requested statement kind.
    #[error("unsupported statement kind: {0}")]
    UnsupportedStatement(StatementKind),

    /// Parameter binding failed.
    #[error("bind failed at parameter {index}: {message}")]
    Bind {
        /// 1-based placeholder index.
        index: usize,
        /// Error message.
        message: String,
    },

    /// Any other driver failure.
    #[error("{0}")]
    Other(String),
}

/// Result type for driver calls.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// The kind of statement to create on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// Plain statement; the SQL text is supplied at execution.
    Plain,
    /// Precompiled statement with positional parameters.
    Prepared,
    /// Stored procedure call with positional parameters.
    Callable,
}

impl StatementKind {
    /// Whether this kind accepts bound parameters.
    #[must_use]
    pub fn accepts_params(&self) -> bool {
        matches!(self, Self::Prepared | Self::Callable)
    }

    /// Name of the kind.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Plain => "statement",
            Self::Prepared => "prepared",
            Self::Callable => "callable",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StatementKind {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "statement" | "plain" => Ok(Self::Plain),
            "prepared" | "prepared_statement" => Ok(Self::Prepared),
            "callable" | "callable_statement" => Ok(Self::Callable),
            other => Err(PoolError::StatementKind(other.to_string())),
        }
    }
}

/// Opaque transaction marker returned by [`DriverConnection::set_savepoint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    /// Driver-assigned savepoint id.
    pub id: u64,
    /// Optional savepoint name.
    pub name: Option<String>,
}

/// A row fetched from a result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<SqlValue>,
}

impl Row {
    /// Create a row from its column values.
    #[must_use]
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value at a zero-based column index.
    #[must_use]
    pub fn value(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    /// Typed value at a zero-based column index.
    pub fn get<T: FromSql>(&self, index: usize) -> Result<T, TypeError> {
        let value = self.values.get(index).ok_or(TypeError::ColumnIndex {
            index,
            len: self.values.len(),
        })?;
        T::from_sql(value)
    }

    /// Consume the row, returning its values.
    #[must_use]
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }
}

impl From<Vec<SqlValue>> for Row {
    fn from(values: Vec<SqlValue>) -> Self {
        Self::new(values)
    }
}

/// A database driver able to open connections.
#[async_trait::async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Identity string this driver is registered under.
    fn name(&self) -> &str;

    /// Open a new connection.
    async fn connect(
        &self,
        address: &str,
        principal: &str,
        credential: &str,
    ) -> DriverResult<Box<dyn DriverConnection>>;
}

/// One live driver connection.
#[async_trait::async_trait]
pub trait DriverConnection: Send + Sync {
    /// Create a statement of the given kind.
    ///
    /// `sql` is the statement text for prepared and callable statements and
    /// is ignored for plain statements.
    async fn create_statement(
        &mut self,
        kind: StatementKind,
        sql: &str,
    ) -> DriverResult<Box<dyn DriverStatement>>;

    /// Enable or disable implicit commit after each statement.
    async fn set_auto_commit(&mut self, enabled: bool) -> DriverResult<()>;

    /// Current auto-commit setting.
    async fn auto_commit(&self) -> DriverResult<bool>;

    /// Establish a savepoint marking the start of a transaction.
    async fn set_savepoint(&mut self) -> DriverResult<Savepoint>;

    /// Commit the current transaction.
    async fn commit(&mut self) -> DriverResult<()>;

    /// Roll back to a savepoint.
    async fn rollback_to(&mut self, savepoint: &Savepoint) -> DriverResult<()>;

    /// Whether the connection is closed or dead.
    async fn is_closed(&self) -> DriverResult<bool>;

    /// Close the connection.
    async fn close(&mut self) -> DriverResult<()>;
}

/// A statement created on a connection.
///
/// Statements are independent of the connection object once created, so a
/// read statement can stay open after its connection returns to the pool.
#[async_trait::async_trait]
pub trait DriverStatement: ParamBinder<Error = DriverError> + Send + Sync {
    /// Execute a query producing rows.
    ///
    /// Plain statements execute `sql`; prepared and callable statements
    /// ignore it and run their prepared text.
    async fn execute_query(&mut self, sql: &str) -> DriverResult<Box<dyn DriverRows>>;

    /// Execute a mutating statement, returning the affected row count.
    async fn execute_update(&mut self, sql: &str) -> DriverResult<u64>;

    /// Close the statement.
    async fn close(&mut self) -> DriverResult<()>;
}

/// A result produced by a query.
#[async_trait::async_trait]
pub trait DriverRows: Send + Sync {
    /// Fetch the next row, or `None` when exhausted.
    async fn next_row(&mut self) -> DriverResult<Option<Row>>;

    /// Close the result.
    async fn close(&mut self) -> DriverResult<()>;
}

/// Registered drivers, keyed by identity.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver under its own name, replacing any previous entry.
    #[must_use]
    pub fn with_driver(mut self, driver: impl Driver) -> Self {
        self.register(Arc::new(driver));
        self
    }

    /// Register a shared driver under its own name.
    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        self.drivers.insert(driver.name().to_string(), driver);
    }

    /// Look up a driver by identity.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.get(name.trim()).cloned()
    }

    /// Registered identities.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.drivers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_kind_parse() {
        assert_eq!(
            "prepared".parse::<StatementKind>().unwrap(),
            StatementKind::Prepared
        );
        assert_eq!(
            " CALLABLE ".parse::<StatementKind>().unwrap(),
            StatementKind::Callable
        );
        let err = "batch".parse::<StatementKind>().unwrap_err();
        assert!(matches!(err, PoolError::StatementKind(ref k) if k == "batch"));
    }

    #[test]
    fn test_statement_kind_params() {
        assert!(!StatementKind::Plain.accepts_params());
        assert!(StatementKind::Prepared.accepts_params());
        assert!(StatementKind::Callable.accepts_params());
    }

    #[test]
    fn test_row_typed_access() {
        let row = Row::new(vec![SqlValue::from("apple"), SqlValue::Int(17)]);
        assert_eq!(row.get::<String>(0).unwrap(), "apple");
        assert_eq!(row.get::<i64>(1).unwrap(), 17);
        assert!(matches!(
            row.get::<i32>(2),
            Err(TypeError::ColumnIndex { index: 2, len: 2 })
        ));
    }
}
