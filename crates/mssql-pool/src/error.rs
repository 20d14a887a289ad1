//! Pool error types.

use thiserror::Error;

/// Errors from pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No connection became available within the acquire timeout.
    #[error("timed out waiting for a pooled connection")]
    AcquireTimeout,

    /// The pool has been shut down.
    #[error("connection pool is closed")]
    PoolClosed,

    /// Building a new connection failed.
    #[error("failed to establish connection: {0}")]
    Connect(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The configuration is invalid.
    #[error("pool configuration error: {0}")]
    Configuration(String),

    /// A context name is already registered or unknown.
    #[error("{0}")]
    Registry(String),
}
