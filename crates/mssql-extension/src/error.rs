//! Engine error types.

use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced across the host-engine boundary.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The server closed the connection, possibly mid-message.
    #[error("connection closed by server")]
    ConnectionClosed,

    /// The byte stream violated the TDS protocol. The connection is closed
    /// before this surfaces.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server reported a statement error (severity >= 11).
    #[error("server error {number} (severity {class}, state {state}, line {line}): {message}")]
    Server {
        /// Error number.
        number: i32,
        /// State.
        state: u8,
        /// Severity class.
        class: u8,
        /// Message text.
        message: String,
        /// Line in the batch.
        line: i32,
    },

    /// Authentication failed; the connection is closed, no retry.
    #[error("authentication failed: {0}")]
    Auth(#[from] mssql_auth::AuthError),

    /// TLS negotiation or handshake failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// No pooled connection became available in time.
    #[error("connection pool timeout")]
    PoolTimeout,

    /// The query exceeded its wall-clock budget and was cancelled.
    #[error("query timed out and was cancelled")]
    QueryTimeout,

    /// The query was cancelled by the caller.
    #[error("query was cancelled")]
    Cancelled,

    /// The server redirected more than the allowed number of times.
    #[error("routing exceeded {max} hops")]
    RoutingExceeded {
        /// Hop limit.
        max: u8,
    },

    /// Bulk load attempted against a Fabric endpoint that rejects it.
    #[error("bulk load is not supported on Fabric endpoint {host}")]
    FabricUnsupported {
        /// The offending endpoint.
        host: String,
    },

    /// A DML operation lacks the schema information it needs (no primary
    /// key, unknown column).
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A value cannot be converted for the target column.
    #[error("type error: {0}")]
    Type(#[from] mssql_types::TypeError),

    /// The attach options are invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport-level failure.
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    /// The named context is not attached.
    #[error("unknown context: {0}")]
    UnknownContext(String),

    /// A transaction-state violation (commit without begin and similar).
    #[error("transaction error: {0}")]
    Transaction(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<tds_protocol::ProtocolError> for Error {
    fn from(e: tds_protocol::ProtocolError) -> Self {
        Self::Protocol(e.to_string())
    }
}

impl From<mssql_codec::CodecError> for Error {
    fn from(e: mssql_codec::CodecError) -> Self {
        match e {
            mssql_codec::CodecError::Io(io) => Self::Io(Arc::new(io)),
            mssql_codec::CodecError::ClosedMidMessage => Self::ConnectionClosed,
            other => Self::Protocol(other.to_string()),
        }
    }
}

impl From<mssql_tls::TlsError> for Error {
    fn from(e: mssql_tls::TlsError) -> Self {
        Self::Tls(e.to_string())
    }
}

impl From<mssql_pool::PoolError> for Error {
    fn from(e: mssql_pool::PoolError) -> Self {
        match e {
            mssql_pool::PoolError::AcquireTimeout => Self::PoolTimeout,
            mssql_pool::PoolError::Connect(inner) => match inner.downcast::<Error>() {
                Ok(engine) => *engine,
                Err(other) => Self::Config(other.to_string()),
            },
            other => Self::Config(other.to_string()),
        }
    }
}

impl Error {
    /// Build a server error from an ERROR token.
    #[must_use]
    pub fn from_server_message(msg: &tds_protocol::token::ServerMessage) -> Self {
        Self::Server {
            number: msg.number,
            state: msg.state,
            class: msg.class,
            message: msg.message.clone(),
            line: msg.line,
        }
    }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
