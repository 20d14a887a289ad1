//! # mssql-pool
//!
//! Bounded async connection pool for the attach engine.
//!
//! The pool owns idle connections, loans active ones to callers, and leaves
//! pinned ones with their transaction until commit/rollback. Validation is
//! tiered: recently idle connections only get a socket-liveness check, older
//! ones a server round trip. A background task sweeps the idle queue every
//! second.
//!
//! The pool is generic over [`ManagedConnection`] so it carries no TDS
//! dependencies of its own; the attach layer provides the factory closure
//! that dials, negotiates and authenticates a connection.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod conn;
pub mod config;
pub mod error;
pub mod manager;
pub mod pool;

pub use conn::ManagedConnection;
pub use config::PoolConfig;
pub use error::PoolError;
pub use manager::PoolManager;
pub use pool::{ConnectFuture, ConnectionFactory, Pool, PoolStats, PooledConnection};
