//! # epochpool-types
//!
//! Value types shared by the pool and its drivers.
//!
//! [`SqlValue`] is the closed set of values the pool can bind to a statement
//! placeholder or read back from a row. Binding dispatches each variant to a
//! typed [`ParamBinder`] method; extraction goes through [`FromSql`].
//!
//! ## Features
//!
//! - `chrono` (default): date, time and timestamp values
//! - `uuid` (default): UUID values
//! - `decimal` (default): arbitrary-precision decimals via rust_decimal
//! - `url` (default): URL values
//! - `json`: JSON values via serde_json

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod bind;
pub mod error;
pub mod from_sql;
pub mod to_sql;
pub mod value;

pub use bind::{ParamBinder, bind_all};
pub use error::TypeError;
pub use from_sql::FromSql;
pub use to_sql::{ToSql, to_values};
pub use value::SqlValue;
