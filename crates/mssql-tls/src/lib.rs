//! # mssql-tls
//!
//! TLS layer for TDS 7.x connections. The handshake is tunneled inside TDS
//! pre-login packets ([`prelogin_wrapper`]); once complete, the stream is a
//! transparent TLS transport for the rest of the session.
//!
//! Hostname verification is mandatory for managed Azure endpoints
//! (`*.database.windows.net`, `*.database.fabric.microsoft.com`,
//! `*.pbidedicated.windows.net`). `trust_server_certificate` is honored only
//! for on-premises hosts.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connector;
pub mod error;
pub mod prelogin_wrapper;

pub use config::{TlsConfig, is_managed_endpoint};
pub use connector::TlsConnector;
pub use error::TlsError;
pub use prelogin_wrapper::TlsPreloginWrapper;

/// Stream type produced by [`TlsConnector::connect_with_prelogin`].
pub type TdsTlsStream<S> = tokio_rustls::client::TlsStream<TlsPreloginWrapper<S>>;
