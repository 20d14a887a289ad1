//! # mssql-extension
//!
//! The attach engine core: everything between the host query engine's
//! `ATTACH ... (TYPE mssql)` and the TDS wire.
//!
//! - [`connection`]: the TDS connection state machine (PRELOGIN → auth →
//!   idle ↔ executing), routing, cancellation, reset-on-release.
//! - [`stream`]: lazy column-major result chunks with backpressure.
//! - [`catalog`]: the three-level metadata cache over `sys.*` views.
//! - [`dml`]: batched INSERT, rowid UPDATE/DELETE, CTAS DDL generation.
//! - [`bulk`]: the COLMETADATA-driven bulk-load writer.
//! - [`transaction`]: explicit transactions with connection pinning.
//! - [`extension`]: the attach/detach registry and host-facing functions.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod bulk;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod dml;
pub mod error;
pub mod extension;
pub mod settings;
pub mod stream;
pub mod transaction;

pub use config::{AttachConfig, ResolvedSecret, SecretResolver};
pub use connection::{Connection, ConnectionState};
pub use error::{Error, Result};
pub use extension::{AttachedContext, CtasOptions, Extension};
pub use settings::{EngineSettings, FabricBulkPolicy};
pub use stream::{DataChunk, QueryStream};
pub use transaction::Transaction;
