//! Pool fixtures shared by integration tests.

use std::time::Duration;

use epochpool::{ConnectInfo, Driver, DriverRegistry, Pool, PoolConfig, Result};

use crate::mock_driver::MockDriver;

/// Validation query used by [`fast_config`].
pub const VALIDATION_QUERY: &str = "SELECT 1";

/// Connectivity strings for a driver named `driver`.
#[must_use]
pub fn connect_info(driver: &str) -> ConnectInfo {
    ConnectInfo::new(driver, "mock://localhost/test", "tester", "secret")
}

/// A small pool configuration suited to paused-clock tests: two to three
/// connections, a one second checkout timeout and a validation query.
#[must_use]
pub fn fast_config() -> PoolConfig {
    PoolConfig::new()
        .connection_quantity(2, 3)
        .connection_timeout(Duration::from_secs(1))
        .validation_query(VALIDATION_QUERY)
}

/// Open a pool on `driver` with `config`.
pub async fn pool_with(driver: &MockDriver, config: PoolConfig) -> Result<Pool> {
    let registry = DriverRegistry::new().with_driver(driver.clone());
    Pool::new(&registry, connect_info(driver.name()), config).await
}

/// Install a test-writer tracing subscriber, once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("epochpool=debug")),
        )
        .try_init();
}
