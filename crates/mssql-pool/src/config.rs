//! Pool configuration.

use std::time::Duration;

/// Configuration for a connection pool.
///
/// Marked `#[non_exhaustive]`; construct via [`Default`] and the builder
/// methods.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Hard cap on connections (idle + active + pinned).
    pub limit: u32,

    /// Floor of connections the cleanup sweep preserves.
    pub min: u32,

    /// Idle duration after which a connection is evicted.
    pub idle_timeout: Duration,

    /// How long `acquire` waits for a free connection.
    pub acquire_timeout: Duration,

    /// Wall-clock budget for dialing and authenticating a new connection.
    pub connection_timeout: Duration,

    /// Idle age below which dequeue validation skips the server round trip.
    pub fast_validation_window: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            limit: 8,
            min: 0,
            idle_timeout: Duration::from_secs(300),
            acquire_timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(30),
            fast_validation_window: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection cap.
    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Set the connection floor.
    #[must_use]
    pub fn min(mut self, min: u32) -> Self {
        self.min = min;
        self
    }

    /// Set the idle eviction timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the acquire timeout.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the connection establishment timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), crate::error::PoolError> {
        if self.limit == 0 {
            return Err(crate::error::PoolError::Configuration(
                "limit must be greater than 0".into(),
            ));
        }
        if self.min > self.limit {
            return Err(crate::error::PoolError::Configuration(
                "min cannot be greater than limit".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(PoolConfig::default().validate().is_ok());
    }

    #[test]
    fn builder_methods() {
        let config = PoolConfig::new()
            .limit(32)
            .min(2)
            .idle_timeout(Duration::from_secs(60))
            .acquire_timeout(Duration::from_secs(5));
        assert_eq!(config.limit, 32);
        assert_eq!(config.min, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn min_above_limit_rejected() {
        let config = PoolConfig::new().limit(2).min(5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_limit_rejected() {
        let config = PoolConfig::new().limit(0);
        assert!(config.validate().is_err());
    }
}
