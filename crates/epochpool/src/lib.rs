//! # epochpool
//!
//! Async database connection pool with generation-based invalidation.
//!
//! Every connection is stamped with the epoch that was current when it was
//! opened. When a statement fails and the connection reports itself dead,
//! the pool retires the whole epoch at once: stale connections are never
//! handed out again and a background manager closes them.
//!
//! ## Features
//!
//! - Eager minimum, bounded maximum, timed wait when at capacity
//! - Explicit [`Transaction`] handles that pin one connection until commit
//!   or rollback
//! - Plain, prepared, and callable statements with typed positional
//!   parameters ([`ToSql`])
//! - Read queries retried once after a disconnect
//! - Leaked query results force-closed after a fixed window
//! - Periodic validation that sheds stale surplus connections
//!
//! The pool talks to databases through the [`Driver`] trait family; register
//! implementations in a [`DriverRegistry`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use epochpool::{ConnectInfo, DriverRegistry, Pool, PoolConfig};
//!
//! let pool = Pool::new(
//!     &DriverRegistry::new().with_driver(my_driver),
//!     ConnectInfo::new("mydb", "db://localhost/app", "app", "secret"),
//!     PoolConfig::new().connection_quantity(2, 10),
//! )
//! .await?;
//!
//! let tx = pool.start_transaction().await?;
//! tx.query_to_prepared_statement("UPDATE t SET n = n + ?", &[&1i32]).await?;
//! tx.commit().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod capacity;
pub mod config;
pub mod connection;
pub mod driver;
pub mod epoch;
pub mod error;
pub mod ledger;
mod manager;
mod pinning;
pub mod pool;
mod queue;
pub mod transaction;
pub mod validation;

pub use config::{ConnectInfo, PoolConfig};
pub use connection::{ConnectionId, PooledConnection, TransactionId};
pub use driver::{
    Driver, DriverConnection, DriverError, DriverRegistry, DriverResult, DriverRows,
    DriverStatement, Row, Savepoint, StatementKind,
};
pub use epoch::{Epoch, EpochGenerator};
pub use error::{PoolError, Result};
pub use ledger::ResultCursor;
pub use pool::{Pool, PoolBuilder, PoolMetrics, PoolStatus};
pub use transaction::Transaction;
pub use validation::ValidationReport;

pub use epochpool_types::{FromSql, ParamBinder, SqlValue, ToSql, TypeError};
