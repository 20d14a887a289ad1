//! Authentication strategies.
//!
//! The strategy decides what goes into PRELOGIN and LOGIN7 and, for
//! federated variants, how an access token is obtained. A tagged enum covers
//! the five kinds; the factory sits in the attach layer which maps attach
//! options onto a variant.

use tds_protocol::login7::{FeatureExtension, FedAuthLibrary, Login7};
use tds_protocol::prelogin::PreLogin;

use crate::aad::{DeviceCode, ServicePrincipal, env_service_principal};
use crate::cache::{TokenCache, TokenCacheKey};
use crate::cli::AzureCli;
use crate::error::AuthError;
use crate::jwt::validate_access_token;
use crate::token::FedAuthToken;

/// How a connection authenticates.
#[derive(Clone)]
pub enum AuthStrategy {
    /// SQL Server authentication: username and obfuscated password in LOGIN7.
    SqlPassword {
        /// Login name.
        username: String,
        /// Password, sent obfuscated inside TLS.
        password: String,
    },
    /// Service principal with explicit credentials.
    ServicePrincipal {
        /// Cache identity of the credentials.
        secret_id: String,
        /// The principal.
        principal: ServicePrincipal,
    },
    /// Service principal resolved from environment variables at fetch time.
    EnvServicePrincipal {
        /// Cache identity.
        secret_id: String,
    },
    /// Local Azure CLI session.
    AzureCli {
        /// Cache identity.
        secret_id: String,
        /// Optional tenant override.
        tenant: Option<String>,
    },
    /// Interactive device-code flow.
    DeviceCode {
        /// Cache identity.
        secret_id: String,
        /// The flow configuration.
        flow: DeviceCode,
    },
    /// A token supplied directly by the user; validated, never cached.
    StaticToken {
        /// The raw access token.
        token: String,
    },
}

impl AuthStrategy {
    /// Whether this strategy uses the FEDAUTH feature extension.
    #[must_use]
    pub fn requires_fedauth(&self) -> bool {
        !matches!(self, Self::SqlPassword { .. })
    }

    /// Cache key for acquired tokens; `None` for non-cached strategies.
    #[must_use]
    pub fn cache_key(&self) -> Option<TokenCacheKey> {
        match self {
            Self::SqlPassword { .. } | Self::StaticToken { .. } => None,
            Self::ServicePrincipal { secret_id, principal } => Some(TokenCacheKey::new(
                secret_id.clone(),
                Some(principal.tenant_id.clone()),
            )),
            Self::EnvServicePrincipal { secret_id } => {
                Some(TokenCacheKey::new(secret_id.clone(), None))
            }
            Self::AzureCli { secret_id, tenant } => {
                Some(TokenCacheKey::new(secret_id.clone(), tenant.clone()))
            }
            Self::DeviceCode { secret_id, flow } => Some(TokenCacheKey::new(
                secret_id.clone(),
                Some(flow.tenant_id.clone()),
            )),
        }
    }

    /// Shape the PRELOGIN request for this strategy.
    #[must_use]
    pub fn apply_prelogin(&self, prelogin: PreLogin) -> PreLogin {
        prelogin.with_fed_auth_required(self.requires_fedauth())
    }

    /// Shape the LOGIN7 request for this strategy.
    ///
    /// `server_fedauth_echo` replays the server's FEDAUTHREQUIRED pre-login
    /// answer into the feature extension's echo bit.
    #[must_use]
    pub fn apply_login7(&self, login: Login7, server_fedauth_echo: bool) -> Login7 {
        match self {
            Self::SqlPassword { username, password } => {
                login.with_sql_auth(username.clone(), password.clone())
            }
            // Federated logins omit credentials; the token follows in a
            // FEDAUTH_TOKEN message after the server's FEDAUTHINFO.
            _ => login.with_feature(FeatureExtension::fed_auth(
                FedAuthLibrary::SecurityToken,
                server_fedauth_echo,
            )),
        }
    }

    /// Acquire a federated token, consulting the process-wide cache.
    pub async fn federated_token(
        &self,
        http: &reqwest::Client,
    ) -> Result<FedAuthToken, AuthError> {
        if let Some(key) = self.cache_key() {
            if let Some(token) = TokenCache::global().get(&key) {
                tracing::debug!(secret_id = %key.secret_id, "using cached access token");
                return Ok(token);
            }
        }

        let token = match self {
            Self::SqlPassword { .. } => {
                return Err(AuthError::Configuration(
                    "SQL password authentication has no federated token".into(),
                ));
            }
            Self::StaticToken { token } => return validate_access_token(token),
            Self::ServicePrincipal { principal, .. } => principal.fetch_token(http).await?,
            Self::EnvServicePrincipal { .. } => {
                env_service_principal()?.fetch_token(http).await?
            }
            Self::AzureCli { tenant, .. } => {
                AzureCli {
                    tenant: tenant.clone(),
                }
                .fetch_token()
                .await?
            }
            Self::DeviceCode { flow, .. } => flow.fetch_token(http).await?,
        };

        if let Some(key) = self.cache_key() {
            TokenCache::global().insert(key, token.clone());
        }
        Ok(token)
    }

    /// Drop any cached token for this strategy.
    pub fn invalidate_cached(&self) {
        if let Some(key) = self.cache_key() {
            TokenCache::global().invalidate(&key);
        }
    }
}

impl std::fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SqlPassword { username, .. } => f
                .debug_struct("SqlPassword")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Self::ServicePrincipal { secret_id, principal } => f
                .debug_struct("ServicePrincipal")
                .field("secret_id", secret_id)
                .field("principal", principal)
                .finish(),
            Self::EnvServicePrincipal { secret_id } => f
                .debug_struct("EnvServicePrincipal")
                .field("secret_id", secret_id)
                .finish(),
            Self::AzureCli { secret_id, tenant } => f
                .debug_struct("AzureCli")
                .field("secret_id", secret_id)
                .field("tenant", tenant)
                .finish(),
            Self::DeviceCode { secret_id, flow } => f
                .debug_struct("DeviceCode")
                .field("secret_id", secret_id)
                .field("flow", flow)
                .finish(),
            Self::StaticToken { .. } => f
                .debug_struct("StaticToken")
                .field("token", &"[REDACTED]")
                .finish(),
        }
    }
}
