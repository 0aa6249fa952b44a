//! # epochpool-testing
//!
//! Test infrastructure for the `epochpool` connection pool.
//!
//! This crate provides an in-process mock driver with scripted responses,
//! outage simulation and an event log, plus fixtures for building pools on
//! top of it. No database is required.
//!
//! ## Example
//!
//! ```rust,ignore
//! use epochpool_testing::{MockDriver, MockResponse, fixtures};
//!
//! #[tokio::test]
//! async fn test_with_mock_driver() {
//!     let driver = MockDriver::builder()
//!         .with_response("SELECT name FROM users", MockResponse::scalar_string("alice"))
//!         .build();
//!     let db = driver.database();
//!     let pool = fixtures::pool_with(&driver, fixtures::fast_config()).await.unwrap();
//!
//!     db.outage();
//!     // Statements now fail and the pool retires its connections.
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock_driver;
pub mod response;

pub use mock_driver::{
    LINK_FAILURE_CODE, MockDatabase, MockDriver, MockDriverBuilder, MockEvent,
};
pub use response::MockResponse;
