//! Scripted query responses.

use std::fmt;
use std::sync::Arc;

use epochpool::SqlValue;

/// What the mock database answers to a statement.
#[derive(Clone)]
pub enum MockResponse {
    /// Rows, each a list of column values.
    Rows(Vec<Vec<SqlValue>>),

    /// Affected row count, for mutating statements.
    RowsAffected(u64),

    /// A query error on a connection that stays alive.
    Error {
        /// Vendor error code.
        code: i32,
        /// Error message.
        message: String,
    },

    /// Compute the response from the SQL text and bound parameters.
    Custom(Arc<dyn Fn(&str, &[SqlValue]) -> MockResponse + Send + Sync>),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rows(rows) => f.debug_tuple("Rows").field(&rows.len()).finish(),
            Self::RowsAffected(n) => f.debug_tuple("RowsAffected").field(n).finish(),
            Self::Error { code, message } => f
                .debug_struct("Error")
                .field("code", code)
                .field("message", message)
                .finish(),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

impl MockResponse {
    /// A single row with a single integer column.
    pub fn scalar_int(value: i32) -> Self {
        Self::Rows(vec![vec![SqlValue::Int(value)]])
    }

    /// A single row with a single string column.
    pub fn scalar_string(value: impl Into<String>) -> Self {
        Self::Rows(vec![vec![SqlValue::String(value.into())]])
    }

    /// No rows, nothing affected.
    pub fn empty() -> Self {
        Self::RowsAffected(0)
    }

    /// An affected row count.
    pub fn affected(count: u64) -> Self {
        Self::RowsAffected(count)
    }

    /// A query error.
    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Several rows.
    pub fn rows(rows: Vec<Vec<SqlValue>>) -> Self {
        Self::Rows(rows)
    }

    /// A response computed per call.
    pub fn custom(f: impl Fn(&str, &[SqlValue]) -> MockResponse + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    /// Resolve `Custom` responses.
    pub(crate) fn resolve(&self, sql: &str, params: &[SqlValue]) -> MockResponse {
        match self {
            Self::Custom(f) => f(sql, params).resolve(sql, params),
            other => other.clone(),
        }
    }
}
