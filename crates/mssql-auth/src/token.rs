//! Federated authentication token.

use std::time::{Duration, SystemTime};

/// Audience required of access tokens for SQL endpoints. The trailing slash
/// is significant: Azure AD issues `aud` with it and the comparison is exact.
pub const SQL_RESOURCE: &str = "https://database.windows.net/";

/// OAuth2 v2 scope for SQL endpoints.
pub const SQL_SCOPE: &str = "https://database.windows.net/.default";

/// Margin before expiry at which a cached token stops being served.
pub const EXPIRY_MARGIN: Duration = Duration::from_secs(300);

/// An Azure AD access token with its expiry.
#[derive(Clone)]
pub struct FedAuthToken {
    /// The opaque access token (a JWT in practice).
    pub access_token: String,
    /// Wall-clock expiry.
    pub expires_at: SystemTime,
}

impl FedAuthToken {
    /// Create a token expiring after `expires_in`.
    #[must_use]
    pub fn expiring_in(access_token: String, expires_in: Duration) -> Self {
        Self {
            access_token,
            expires_at: SystemTime::now() + expires_in,
        }
    }

    /// Whether the token is past its expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        SystemTime::now() >= self.expires_at
    }

    /// Whether the token may still be served from the cache: more than the
    /// expiry margin of validity must remain.
    #[must_use]
    pub fn is_cache_fresh(&self) -> bool {
        SystemTime::now() + EXPIRY_MARGIN < self.expires_at
    }

    /// Redacted one-line summary for diagnostics: first ten and last three
    /// characters plus the length, never the token itself.
    #[must_use]
    pub fn redacted_summary(&self) -> String {
        let token = &self.access_token;
        if token.len() <= 13 {
            return format!("[{} chars]", token.len());
        }
        format!(
            "{}...{} [{} chars]",
            &token[..10],
            &token[token.len() - 3..],
            token.len()
        )
    }
}

impl std::fmt::Debug for FedAuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FedAuthToken")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshness_margin() {
        let fresh = FedAuthToken::expiring_in("t".into(), Duration::from_secs(3600));
        assert!(fresh.is_cache_fresh());
        assert!(!fresh.is_expired());

        // Four minutes left: expired for the cache, still accepted for use.
        let stale = FedAuthToken::expiring_in("t".into(), Duration::from_secs(240));
        assert!(!stale.is_cache_fresh());
        assert!(!stale.is_expired());
    }

    #[test]
    fn redacted_summary_shape() {
        let token = FedAuthToken::expiring_in(
            "eyJ0eXAiOiJKV1QiLCJhbGciOiJSUzI1NiJ9".into(),
            Duration::from_secs(60),
        );
        let summary = token.redacted_summary();
        assert_eq!(summary, "eyJ0eXAiOi...iJ9 [36 chars]");
    }

    #[test]
    fn debug_redacts() {
        let token = FedAuthToken::expiring_in("secret-token".into(), Duration::from_secs(60));
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }
}
