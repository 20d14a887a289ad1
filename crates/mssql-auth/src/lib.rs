//! # mssql-auth
//!
//! Authentication strategies for the SQL Server attach engine.
//!
//! Two families: SQL Server password authentication (credentials in LOGIN7)
//! and Azure AD federated authentication (OAuth2 access token presented via
//! the FEDAUTH feature extension). Token acquisition covers service
//! principals, the Azure CLI, environment-variable service principals, the
//! RFC 8628 device-code flow, and user-supplied static tokens.
//!
//! Acquired tokens live in a process-wide cache keyed by secret id and
//! optional tenant override; a cached token is served only while more than
//! five minutes of validity remain.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod aad;
pub mod cache;
pub mod cli;
pub mod error;
pub mod jwt;
pub mod strategy;
pub mod token;

pub use aad::{DeviceCode, DeviceCodePrompt, ServicePrincipal, env_service_principal};
pub use cache::{TokenCache, TokenCacheKey};
pub use cli::AzureCli;
pub use error::AuthError;
pub use strategy::AuthStrategy;
pub use token::{FedAuthToken, SQL_RESOURCE, SQL_SCOPE};
