//! Attach configuration.
//!
//! `ATTACH '<conn-string>' AS name (TYPE mssql, ...)` options arrive as a
//! key/value map. Credentials referenced by `azure_secret` live in the host
//! engine's secret store and are handed over through a [`SecretResolver`]
//! callback; raw secrets never pass through the option map except for the
//! explicit `user`/`password`/`access_token` options.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use mssql_auth::{AuthStrategy, DeviceCode, ServicePrincipal};
use regex::RegexBuilder;

use crate::error::{Error, Result};
use crate::settings::EngineSettings;

/// Default SQL Server port.
pub const DEFAULT_PORT: u16 = 1433;

/// Hostname suffixes of Fabric warehouse endpoints, which reject
/// `INSERT BULK`.
const FABRIC_SUFFIXES: &[&str] = &[
    ".datawarehouse.fabric.microsoft.com",
    ".pbidedicated.windows.net",
];

/// A secret resolved from the host engine's secret store.
#[derive(Clone)]
pub enum ResolvedSecret {
    /// Service principal credentials.
    ServicePrincipal {
        /// Tenant id.
        tenant_id: String,
        /// Client id.
        client_id: String,
        /// Client secret.
        client_secret: String,
    },
    /// Use the local Azure CLI session.
    AzureCli,
    /// Read credentials from the environment.
    Environment,
    /// Interactive device-code flow for a public client.
    DeviceCode {
        /// Tenant id.
        tenant_id: String,
        /// Client id.
        client_id: String,
    },
    /// A pre-acquired access token.
    AccessToken(String),
}

impl std::fmt::Debug for ResolvedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServicePrincipal {
                tenant_id,
                client_id,
                ..
            } => f
                .debug_struct("ServicePrincipal")
                .field("tenant_id", tenant_id)
                .field("client_id", client_id)
                .field("client_secret", &"[REDACTED]")
                .finish(),
            Self::AzureCli => write!(f, "AzureCli"),
            Self::Environment => write!(f, "Environment"),
            Self::DeviceCode {
                tenant_id,
                client_id,
            } => f
                .debug_struct("DeviceCode")
                .field("tenant_id", tenant_id)
                .field("client_id", client_id)
                .finish(),
            Self::AccessToken(_) => write!(f, "AccessToken([REDACTED])"),
        }
    }
}

/// Callback resolving a secret id to its contents.
pub type SecretResolver = Arc<dyn Fn(&str) -> Option<ResolvedSecret> + Send + Sync>;

/// Parsed attach configuration.
#[derive(Debug, Clone)]
pub struct AttachConfig {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Initial database.
    pub database: Option<String>,
    /// Negotiate TLS for the whole session (default true).
    pub use_encrypt: bool,
    /// Skip certificate verification (on-premises only).
    pub trust_server_certificate: bool,
    /// Case-insensitive partial-match filter on schema names.
    pub schema_filter: Option<String>,
    /// Case-insensitive partial-match filter on table names.
    pub table_filter: Option<String>,
    /// Whether the metadata cache is active.
    pub catalog_enabled: bool,
    /// Pool connection cap.
    pub pool_limit: u32,
    /// Pool connection floor.
    pub pool_min: u32,
    /// Idle eviction timeout.
    pub idle_timeout: Duration,
    /// Acquire wait budget.
    pub acquire_timeout: Duration,
    /// Dial + authenticate budget.
    pub connection_timeout: Duration,
    /// Query wall-clock budget; zero means unbounded.
    pub query_timeout: Duration,
    /// The authentication strategy.
    pub auth: AuthStrategy,
    /// Tenant override for token acquisition.
    pub tenant_override: Option<String>,
}

impl AttachConfig {
    /// Parse attach options.
    ///
    /// `resolver` translates `azure_secret` ids; pass `None` when the host
    /// has no secret store.
    pub fn from_options(
        options: &BTreeMap<String, String>,
        resolver: Option<&SecretResolver>,
    ) -> Result<Self> {
        let settings = EngineSettings::global();

        let host = options
            .get("host")
            .cloned()
            .ok_or_else(|| Error::Config("missing required option: host".into()))?;
        let port = match options.get("port") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("invalid port: {raw:?}")))?,
            None => DEFAULT_PORT,
        };

        let use_encrypt = parse_bool(options, "use_encrypt", true)?;
        // trust_server_certificate is the negation-style alias of strict
        // verification; both spellings are accepted.
        let trust_server_certificate = parse_bool(options, "trust_server_certificate", false)?;

        let tenant_override = options.get("azure_tenant_id").cloned();
        let auth = Self::build_auth(options, resolver, tenant_override.clone())?;

        let config = Self {
            host,
            port,
            database: options.get("database").cloned(),
            use_encrypt,
            trust_server_certificate,
            schema_filter: validated_filter(options, "schema_filter")?,
            table_filter: validated_filter(options, "table_filter")?,
            catalog_enabled: parse_bool(options, "catalog", true)?,
            pool_limit: parse_u32(options, "pool_size", settings.pool_limit)?,
            pool_min: parse_u32(options, "pool_min", settings.pool_min)?,
            idle_timeout: parse_secs(options, "idle_timeout", settings.idle_timeout)?,
            acquire_timeout: parse_secs(options, "acquire_timeout", settings.acquire_timeout)?,
            connection_timeout: parse_secs(
                options,
                "connection_timeout",
                settings.connection_timeout,
            )?,
            query_timeout: parse_secs(options, "query_timeout", settings.query_timeout)?,
            auth,
            tenant_override,
        };

        if config.pool_limit == 0 {
            return Err(Error::Config("pool_size must be greater than 0".into()));
        }
        Ok(config)
    }

    fn build_auth(
        options: &BTreeMap<String, String>,
        resolver: Option<&SecretResolver>,
        tenant_override: Option<String>,
    ) -> Result<AuthStrategy> {
        if let Some(token) = options.get("access_token") {
            return Ok(AuthStrategy::StaticToken {
                token: token.clone(),
            });
        }

        if let Some(secret_id) = options.get("azure_secret") {
            let resolver = resolver.ok_or_else(|| {
                Error::Config("azure_secret requires a secret store".into())
            })?;
            let secret = resolver(secret_id).ok_or_else(|| {
                Error::Config(format!("secret {secret_id:?} not found"))
            })?;
            return Ok(strategy_from_secret(secret_id, secret, tenant_override));
        }

        match (options.get("user"), options.get("password")) {
            (Some(user), Some(password)) => Ok(AuthStrategy::SqlPassword {
                username: user.clone(),
                password: password.clone(),
            }),
            (Some(_), None) | (None, Some(_)) => Err(Error::Config(
                "user and password must be provided together".into(),
            )),
            (None, None) => Err(Error::Config(
                "no credentials: provide user/password, azure_secret, or access_token".into(),
            )),
        }
    }

    /// Whether the endpoint is a Fabric warehouse (no `INSERT BULK`).
    #[must_use]
    pub fn is_fabric_endpoint(&self) -> bool {
        let host = self.host.to_ascii_lowercase();
        FABRIC_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
    }
}

/// Map a resolved secret onto an authentication strategy. Shared by the
/// attach path and `azure_auth_test`.
pub(crate) fn strategy_from_secret(
    secret_id: &str,
    secret: ResolvedSecret,
    tenant_override: Option<String>,
) -> AuthStrategy {
    match secret {
        ResolvedSecret::ServicePrincipal {
            tenant_id,
            client_id,
            client_secret,
        } => AuthStrategy::ServicePrincipal {
            secret_id: secret_id.to_string(),
            principal: ServicePrincipal {
                tenant_id: tenant_override.unwrap_or(tenant_id),
                client_id,
                client_secret,
            },
        },
        ResolvedSecret::AzureCli => AuthStrategy::AzureCli {
            secret_id: secret_id.to_string(),
            tenant: tenant_override,
        },
        ResolvedSecret::Environment => AuthStrategy::EnvServicePrincipal {
            secret_id: secret_id.to_string(),
        },
        ResolvedSecret::DeviceCode {
            tenant_id,
            client_id,
        } => AuthStrategy::DeviceCode {
            secret_id: secret_id.to_string(),
            flow: DeviceCode {
                tenant_id: tenant_override.unwrap_or(tenant_id),
                client_id,
                prompt: Arc::new(|uri, code| {
                    tracing::warn!(
                        verification_uri = uri,
                        user_code = code,
                        "complete device sign-in to continue"
                    );
                }),
            },
        },
        ResolvedSecret::AccessToken(token) => AuthStrategy::StaticToken { token },
    }
}

fn parse_bool(options: &BTreeMap<String, String>, key: &str, default: bool) -> Result<bool> {
    match options.get(key) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "on" | "yes" => Ok(true),
            "false" | "0" | "off" | "no" => Ok(false),
            _ => Err(Error::Config(format!("invalid boolean for {key}: {raw:?}"))),
        },
    }
}

fn parse_u32(options: &BTreeMap<String, String>, key: &str, default: u32) -> Result<u32> {
    match options.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("invalid value for {key}: {raw:?}"))),
    }
}

fn parse_secs(
    options: &BTreeMap<String, String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    match options.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| Error::Config(format!("invalid seconds for {key}: {raw:?}"))),
    }
}

/// Validate a POSIX regex filter option up front so a bad pattern fails the
/// attach, not the first catalog read.
fn validated_filter(options: &BTreeMap<String, String>, key: &str) -> Result<Option<String>> {
    let Some(raw) = options.get(key) else {
        return Ok(None);
    };
    RegexBuilder::new(raw)
        .case_insensitive(true)
        .build()
        .map_err(|e| Error::Config(format!("invalid {key} pattern: {e}")))?;
    Ok(Some(raw.clone()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn opts(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn minimal_sql_auth() {
        let config = AttachConfig::from_options(
            &opts(&[
                ("host", "sql01.corp.local"),
                ("user", "sa"),
                ("password", "TestPassword1"),
                ("database", "TestDB"),
            ]),
            None,
        )
        .unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.use_encrypt);
        assert!(config.catalog_enabled);
        assert!(matches!(config.auth, AuthStrategy::SqlPassword { .. }));
    }

    #[test]
    fn missing_host_rejected() {
        let err = AttachConfig::from_options(&opts(&[("user", "u"), ("password", "p")]), None);
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn missing_credentials_rejected() {
        let err = AttachConfig::from_options(&opts(&[("host", "h")]), None);
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn access_token_wins() {
        let config = AttachConfig::from_options(
            &opts(&[("host", "h.database.windows.net"), ("access_token", "eyJ...")]),
            None,
        )
        .unwrap();
        assert!(matches!(config.auth, AuthStrategy::StaticToken { .. }));
    }

    #[test]
    fn secret_resolution() {
        let resolver: SecretResolver = Arc::new(|id| {
            (id == "sp1").then(|| ResolvedSecret::ServicePrincipal {
                tenant_id: "tenant".into(),
                client_id: "client".into(),
                client_secret: "secret".into(),
            })
        });
        let config = AttachConfig::from_options(
            &opts(&[("host", "h.database.windows.net"), ("azure_secret", "sp1")]),
            Some(&resolver),
        )
        .unwrap();
        assert!(matches!(config.auth, AuthStrategy::ServicePrincipal { .. }));

        let err = AttachConfig::from_options(
            &opts(&[("host", "h"), ("azure_secret", "nope")]),
            Some(&resolver),
        );
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn tenant_override_applies() {
        let resolver: SecretResolver = Arc::new(|_| {
            Some(ResolvedSecret::ServicePrincipal {
                tenant_id: "original".into(),
                client_id: "c".into(),
                client_secret: "s".into(),
            })
        });
        let config = AttachConfig::from_options(
            &opts(&[
                ("host", "h"),
                ("azure_secret", "x"),
                ("azure_tenant_id", "override"),
            ]),
            Some(&resolver),
        )
        .unwrap();
        match config.auth {
            AuthStrategy::ServicePrincipal { principal, .. } => {
                assert_eq!(principal.tenant_id, "override");
            }
            other => panic!("unexpected strategy: {other:?}"),
        }
    }

    #[test]
    fn fabric_detection() {
        let config = AttachConfig::from_options(
            &opts(&[
                ("host", "wh1.datawarehouse.fabric.microsoft.com"),
                ("user", "u"),
                ("password", "p"),
            ]),
            None,
        )
        .unwrap();
        assert!(config.is_fabric_endpoint());
    }

    #[test]
    fn bad_filter_fails_attach() {
        let err = AttachConfig::from_options(
            &opts(&[
                ("host", "h"),
                ("user", "u"),
                ("password", "p"),
                ("table_filter", "(unclosed"),
            ]),
            None,
        );
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn pool_knobs() {
        let config = AttachConfig::from_options(
            &opts(&[
                ("host", "h"),
                ("user", "u"),
                ("password", "p"),
                ("pool_size", "3"),
                ("acquire_timeout", "7"),
                ("query_timeout", "0"),
            ]),
            None,
        )
        .unwrap();
        assert_eq!(config.pool_limit, 3);
        assert_eq!(config.acquire_timeout, Duration::from_secs(7));
        assert_eq!(config.query_timeout, Duration::ZERO);
    }
}
