//! Minimal JWT claim inspection.
//!
//! User-provided access tokens are not cryptographically verified here (the
//! server does that); the engine only checks that the token targets the SQL
//! resource and has not expired, so misconfiguration fails fast with a clear
//! message instead of an opaque login error.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::error::AuthError;
use crate::token::{FedAuthToken, SQL_RESOURCE};

/// Claims the engine reads from a token payload.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Claims {
    /// Audience.
    #[serde(default)]
    pub aud: Option<String>,
    /// Expiry as seconds since the Unix epoch.
    #[serde(default)]
    pub exp: Option<u64>,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
}

/// Decode the payload segment of a JWT.
pub fn decode_claims(token: &str) -> Result<Claims, AuthError> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload)) = (segments.next(), segments.next()) else {
        return Err(AuthError::MalformedToken(
            "expected header.payload.signature segments".into(),
        ));
    };

    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::MalformedToken(format!("payload is not base64url: {e}")))?;

    serde_json::from_slice(&decoded)
        .map_err(|e| AuthError::MalformedToken(format!("payload is not JSON: {e}")))
}

/// Validate a user-supplied access token for SQL use.
///
/// Requires `aud` to equal the SQL resource exactly (trailing slash
/// included) and `exp` to be in the future. Returns the token with its
/// expiry attached; the five-minute margin applies only on the cache side,
/// not here.
pub fn validate_access_token(token: &str) -> Result<FedAuthToken, AuthError> {
    let claims = decode_claims(token)?;

    let audience = claims.aud.unwrap_or_default();
    if audience != SQL_RESOURCE {
        return Err(AuthError::AudienceMismatch {
            expected: SQL_RESOURCE.to_string(),
            actual: audience,
        });
    }

    let exp = claims
        .exp
        .ok_or_else(|| AuthError::MalformedToken("missing exp claim".into()))?;
    let expires_at = UNIX_EPOCH + Duration::from_secs(exp);
    if SystemTime::now() >= expires_at {
        return Err(AuthError::TokenExpired);
    }

    Ok(FedAuthToken {
        access_token: token.to_string(),
        expires_at,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn forge(aud: &str, exp: u64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::json!({ "aud": aud, "exp": exp, "iss": "https://sts.windows.net/x/" })
                .to_string(),
        );
        format!("{header}.{payload}.sig")
    }

    fn future_exp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 3600
    }

    #[test]
    fn accepts_sql_audience() {
        let token = forge(SQL_RESOURCE, future_exp());
        let validated = validate_access_token(&token).unwrap();
        assert!(!validated.is_expired());
    }

    #[test]
    fn trailing_slash_is_significant() {
        let token = forge("https://database.windows.net", future_exp());
        assert!(matches!(
            validate_access_token(&token),
            Err(AuthError::AudienceMismatch { .. })
        ));
    }

    #[test]
    fn expired_token_rejected() {
        let token = forge(SQL_RESOURCE, 1_000_000);
        assert!(matches!(
            validate_access_token(&token),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn garbage_rejected() {
        assert!(matches!(
            validate_access_token("not-a-jwt"),
            Err(AuthError::MalformedToken(_))
        ));
    }
}
