//! Pool error types.

use std::time::Duration;

use thiserror::Error;

use crate::driver::DriverError;

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Invalid connectivity parameters, pool settings, or unknown driver.
    #[error("pool configuration error: {0}")]
    Configuration(String),

    /// The driver refused to open a connection.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] DriverError),

    /// A statement failed and the connection turned out to be dead.
    ///
    /// The pool has already invalidated the connection's epoch when this is
    /// returned.
    #[error("database connection lost")]
    Disconnected,

    /// Commit or rollback without an open transaction on that handle.
    #[error("no active transaction")]
    NoActiveTransaction,

    /// Capacity is exhausted and nothing was returned within the wait timeout.
    #[error("no connection available after waiting {waited:?}")]
    NoConnectionAvailable {
        /// How long the checkout waited.
        waited: Duration,
    },

    /// Unrecognized or unsupported statement kind.
    #[error("unrecognized statement kind: {0}")]
    StatementKind(String),

    /// The validation query failed on a connection.
    #[error("validation query `{query}` failed: {source}")]
    Validation {
        /// The validation query text.
        query: String,
        /// The driver failure.
        #[source]
        source: DriverError,
    },

    /// Driver or query error on a connection that is still alive.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// A parameter could not be converted.
    #[error("parameter conversion failed: {0}")]
    Type(#[from] epochpool_types::TypeError),

    /// The pool has been closed.
    #[error("pool is closed")]
    PoolClosed,

    /// The result was already released, either by the caller or by the
    /// auto-close sweep.
    #[error("result already closed")]
    ResultClosed,
}

impl PoolError {
    /// Whether the error means the database connection was lost.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Whether retrying the operation later may succeed.
    ///
    /// Disconnects and capacity exhaustion are transient; configuration,
    /// transaction-state and query errors are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Disconnected | Self::NoConnectionAvailable { .. } | Self::Connect(_)
        )
    }
}

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(PoolError::Disconnected.is_transient());
        assert!(
            PoolError::NoConnectionAvailable {
                waited: Duration::from_secs(5)
            }
            .is_transient()
        );
        assert!(!PoolError::NoActiveTransaction.is_transient());
        assert!(!PoolError::Configuration("x".into()).is_transient());
    }

    #[test]
    fn test_driver_error_is_transparent() {
        let err = PoolError::from(DriverError::Query {
            code: 1064,
            message: "syntax".into(),
        });
        assert_eq!(err.to_string(), "query failed (1064): syntax");
        assert!(!err.is_disconnect());
    }
}
