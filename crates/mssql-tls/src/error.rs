//! TLS error types.

use thiserror::Error;

/// Errors from TLS setup and handshake.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Building the client configuration failed.
    #[error("TLS configuration error: {0}")]
    Configuration(String),

    /// The server name is not a valid DNS name.
    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    /// Certificate verification may not be disabled for managed endpoints.
    #[error("certificate verification cannot be disabled for {0}")]
    VerificationRequired(String),

    /// The handshake itself failed.
    #[error("TLS handshake failed: {0}")]
    Handshake(#[from] std::io::Error),
}
