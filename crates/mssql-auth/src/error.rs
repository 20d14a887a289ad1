//! Authentication error types.

use thiserror::Error;

/// Errors from authentication and token acquisition.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The server rejected the login.
    #[error("login rejected by server (error {code}): {message}")]
    LoginRejected {
        /// Server error number.
        code: i32,
        /// Server message text.
        message: String,
    },

    /// Azure AD returned an OAuth2 error body.
    #[error("Azure AD error {code}: {description}")]
    Aad {
        /// The `error` field (e.g. `invalid_client`).
        code: String,
        /// The `error_description` field, surfaced verbatim.
        description: String,
    },

    /// Token acquisition over HTTP failed before a response body arrived.
    #[error("token endpoint request failed: {0}")]
    Http(String),

    /// Required environment variables are missing.
    #[error("missing environment variables: {}", .0.join(", "))]
    MissingEnv(Vec<String>),

    /// The Azure CLI is installed but no account is logged in.
    #[error("Azure CLI has no active account. Run 'az login' and retry")]
    CliNotLoggedIn,

    /// Running the Azure CLI failed.
    #[error("Azure CLI invocation failed: {0}")]
    Cli(String),

    /// The user declined the device-code prompt.
    #[error("device code authorization declined")]
    DeviceCodeDeclined,

    /// The device code expired or was mistyped.
    #[error("device code flow failed: {0}")]
    DeviceCodeFailed(String),

    /// The device-code flow exceeded its 15 minute wall-clock budget.
    #[error("device code flow timed out")]
    DeviceCodeTimeout,

    /// The token is not a parseable JWT.
    #[error("malformed access token: {0}")]
    MalformedToken(String),

    /// The token's audience is not the SQL resource.
    #[error("access token audience {actual:?} does not match {expected:?}")]
    AudienceMismatch {
        /// Required audience.
        expected: String,
        /// Audience found in the token.
        actual: String,
    },

    /// The token is already expired.
    #[error("access token is expired")]
    TokenExpired,

    /// The strategy is misconfigured.
    #[error("authentication configuration error: {0}")]
    Configuration(String),
}

impl AuthError {
    /// Whether invalidating the cached token and re-acquiring may help.
    #[must_use]
    pub fn is_token_expiry(&self) -> bool {
        matches!(self, Self::TokenExpired)
    }
}
