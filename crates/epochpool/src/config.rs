//! Pool configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::PoolError;

/// Default minimum number of connections.
pub const DEFAULT_MIN_CONNECTIONS: u32 = 5;

/// Default maximum number of connections.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 15;

/// Default time a checkout waits for a connection to be returned.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_millis(5000);

/// Interval at which a waiting checkout polls the idle queue.
pub const CHECKOUT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default validation interval (one hour).
pub const DEFAULT_VALIDATION_INTERVAL: Duration = Duration::from_millis(3_600_000);

/// Smallest accepted validation interval (ten minutes).
pub const MIN_VALIDATION_INTERVAL: Duration = Duration::from_millis(600_000);

/// How long an unreleased query result lives before it is force-closed.
pub const DEFAULT_RESULT_AUTO_CLOSE: Duration = Duration::from_secs(15);

/// Background manager tick.
pub const DEFAULT_MANAGER_TICK: Duration = Duration::from_millis(1000);

/// Number of manager ticks between validation sweeps (~10 minutes).
pub const DEFAULT_VALIDATION_EVERY_TICKS: u32 = 600;

/// The four connectivity strings handed to the driver.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    /// Identity of the registered driver.
    pub driver: String,
    /// Database address, opaque to the pool.
    pub address: String,
    /// Login principal.
    pub principal: String,
    /// Login credential.
    pub credential: String,
}

impl ConnectInfo {
    /// Create connectivity settings, trimming surrounding whitespace.
    pub fn new(
        driver: impl Into<String>,
        address: impl Into<String>,
        principal: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            driver: driver.into().trim().to_string(),
            address: address.into().trim().to_string(),
            principal: principal.into().trim().to_string(),
            credential: credential.into().trim().to_string(),
        }
    }

    /// Check that none of the four strings is blank.
    pub fn validate(&self) -> Result<(), PoolError> {
        for (name, value) in [
            ("driver", &self.driver),
            ("address", &self.address),
            ("principal", &self.principal),
            ("credential", &self.credential),
        ] {
            if value.trim().is_empty() {
                tracing::debug!(field = name, "blank connectivity parameter");
                return Err(PoolError::Configuration(format!("{name} must not be blank")));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectInfo")
            .field("driver", &self.driver)
            .field("address", &self.address)
            .field("principal", &self.principal)
            .field("credential", &"<redacted>")
            .finish()
    }
}

/// Configuration for the connection pool.
///
/// This struct is marked `#[non_exhaustive]`; construct it with
/// [`PoolConfig::new()`] and the builder methods.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Number of connections opened eagerly and kept through validation
    /// sweeps.
    pub min_connections: u32,

    /// Upper bound on connections held by the pool. Always greater than
    /// `min_connections`.
    pub max_connections: u32,

    /// How long a checkout waits for a returned connection when the pool is
    /// at capacity.
    pub connection_timeout: Duration,

    /// Lightweight query used to validate connections, if any.
    pub validation_query: Option<Arc<str>>,

    /// Connections idle for longer than this are validated or shed by the
    /// sweep.
    pub validation_interval: Duration,

    /// Lifetime of an unreleased query result.
    pub result_auto_close: Duration,

    /// Background manager tick.
    pub manager_tick: Duration,

    /// Manager ticks between validation sweeps.
    pub validation_every_ticks: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            validation_query: None,
            validation_interval: DEFAULT_VALIDATION_INTERVAL,
            result_auto_close: DEFAULT_RESULT_AUTO_CLOSE,
            manager_tick: DEFAULT_MANAGER_TICK,
            validation_every_ticks: DEFAULT_VALIDATION_EVERY_TICKS,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum and maximum number of connections.
    ///
    /// A minimum below 1 keeps the current minimum; a maximum not greater
    /// than the minimum becomes `min + 1`.
    #[must_use]
    pub fn connection_quantity(mut self, min: u32, max: u32) -> Self {
        let (min, max) = normalize_quantity(self.min_connections, min, max);
        self.min_connections = min;
        self.max_connections = max;
        self
    }

    /// Set the minimum number of connections, keeping the maximum.
    #[must_use]
    pub fn min_connections(self, count: u32) -> Self {
        let max = self.max_connections;
        self.connection_quantity(count, max)
    }

    /// Set the maximum number of connections, keeping the minimum.
    #[must_use]
    pub fn max_connections(self, count: u32) -> Self {
        let min = self.min_connections;
        self.connection_quantity(min, count)
    }

    /// Set the checkout wait timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the validation query.
    ///
    /// The query runs on every new connection and on stale connections
    /// during validation sweeps. It should be cheap, for example `SELECT 1`.
    #[must_use]
    pub fn validation_query(mut self, query: impl Into<Arc<str>>) -> Self {
        self.validation_query = Some(query.into());
        self
    }

    /// Set the validation interval. Values below ten minutes are raised to
    /// ten minutes.
    #[must_use]
    pub fn validation_interval(mut self, interval: Duration) -> Self {
        self.validation_interval = interval.max(MIN_VALIDATION_INTERVAL);
        self
    }

    /// Set the validation interval in minutes.
    ///
    /// Non-positive values are ignored; values below 10 become 10.
    #[must_use]
    pub fn validation_interval_minutes(mut self, minutes: i64) -> Self {
        if let Some(interval) = interval_from_minutes(minutes) {
            self.validation_interval = interval;
        }
        self
    }

    /// Set how long an unreleased query result lives.
    #[must_use]
    pub fn result_auto_close(mut self, window: Duration) -> Self {
        self.result_auto_close = window;
        self
    }

    /// Set the background manager tick.
    #[must_use]
    pub fn manager_tick(mut self, tick: Duration) -> Self {
        self.manager_tick = tick;
        self
    }

    /// Set the number of ticks between validation sweeps.
    #[must_use]
    pub fn validation_every_ticks(mut self, ticks: u32) -> Self {
        self.validation_every_ticks = ticks;
        self
    }

    /// Validate the configuration.
    ///
    /// Sizing is corrected rather than rejected, so this only fails on
    /// settings the pool cannot run with.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.min_connections == 0 {
            return Err(PoolError::Configuration(
                "min_connections must be at least 1".into(),
            ));
        }
        if self.max_connections <= self.min_connections {
            return Err(PoolError::Configuration(
                "max_connections must be greater than min_connections".into(),
            ));
        }
        if self.manager_tick.is_zero() {
            return Err(PoolError::Configuration(
                "manager_tick must be greater than 0".into(),
            ));
        }
        if self.validation_every_ticks == 0 {
            return Err(PoolError::Configuration(
                "validation_every_ticks must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Apply the sizing rules to a requested `(min, max)` pair.
pub(crate) fn normalize_quantity(current_min: u32, min: u32, max: u32) -> (u32, u32) {
    let min = if min == 0 { current_min.max(1) } else { min };
    let max = if max <= min { min.saturating_add(1) } else { max };
    (min, max)
}

/// Convert a minute count to a validation interval.
pub(crate) fn interval_from_minutes(minutes: i64) -> Option<Duration> {
    if minutes <= 0 {
        return None;
    }
    let minutes = u64::try_from(minutes.max(10)).ok()?;
    Some(Duration::from_millis(minutes.saturating_mul(60_000)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.min_connections, 5);
        assert_eq!(config.max_connections, 15);
        assert_eq!(config.connection_timeout, Duration::from_millis(5000));
        assert!(config.validation_query.is_none());
        assert_eq!(config.validation_interval, Duration::from_millis(3_600_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_quantity_corrections() {
        let config = PoolConfig::new().connection_quantity(15, 30);
        assert_eq!((config.min_connections, config.max_connections), (15, 30));

        let config = PoolConfig::new().connection_quantity(0, 30);
        assert_eq!((config.min_connections, config.max_connections), (5, 30));

        let config = PoolConfig::new().connection_quantity(8, 8);
        assert_eq!((config.min_connections, config.max_connections), (8, 9));

        let config = PoolConfig::new().connection_quantity(8, 2);
        assert_eq!((config.min_connections, config.max_connections), (8, 9));
    }

    #[test]
    fn test_validation_interval_minutes() {
        let config = PoolConfig::new().validation_interval_minutes(15);
        assert_eq!(config.validation_interval, Duration::from_millis(900_000));

        let config = PoolConfig::new().validation_interval_minutes(3);
        assert_eq!(config.validation_interval, Duration::from_millis(600_000));

        let config = PoolConfig::new().validation_interval_minutes(-1);
        assert_eq!(config.validation_interval, DEFAULT_VALIDATION_INTERVAL);
    }

    #[test]
    fn test_validation_interval_floor() {
        let config = PoolConfig::new().validation_interval(Duration::from_secs(1));
        assert_eq!(config.validation_interval, MIN_VALIDATION_INTERVAL);
    }

    #[test]
    fn test_zero_tick_rejected() {
        let config = PoolConfig::new().manager_tick(Duration::ZERO);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("manager_tick"));
    }

    #[test]
    fn test_connect_info_rejects_blank() {
        assert!(ConnectInfo::new("mock", "db://x", "root", "pw").validate().is_ok());

        let err = ConnectInfo::new("mock", "  ", "root", "pw")
            .validate()
            .unwrap_err();
        assert!(matches!(err, PoolError::Configuration(ref m) if m.contains("address")));

        let err = ConnectInfo::new("mock", "db://x", "root", "")
            .validate()
            .unwrap_err();
        assert!(matches!(err, PoolError::Configuration(ref m) if m.contains("credential")));
    }

    #[test]
    fn test_connect_info_debug_redacts_credential() {
        let info = ConnectInfo::new("mock", "db://x", "root", "hunter2");
        let rendered = format!("{info:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    proptest! {
        #[test]
        fn prop_quantity_always_valid(current in 1u32..100, min in 0u32..1000, max in 0u32..1000) {
            let (min, max) = normalize_quantity(current, min, max);
            prop_assert!(min >= 1);
            prop_assert!(max > min);
        }
    }
}
