//! Azure AD OAuth2 token acquisition.
//!
//! Three acquisition flows live here: service-principal client credentials,
//! the environment-variable variant of the same, and the RFC 8628 device
//! code flow. The Azure CLI flow shells out instead of speaking HTTP and
//! lives in [`crate::cli`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::AuthError;
use crate::token::{FedAuthToken, SQL_SCOPE};

/// Azure AD authority endpoint.
const AUTHORITY: &str = "https://login.microsoftonline.com";

/// Wall-clock budget for the device-code flow.
const DEVICE_CODE_BUDGET: Duration = Duration::from_secs(15 * 60);

/// Successful token response body.
#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// OAuth2 error response body.
#[derive(serde::Deserialize)]
struct OAuthErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

/// Device authorization response body.
#[derive(serde::Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default = "default_interval")]
    interval: u64,
}

fn default_interval() -> u64 {
    5
}

/// Service principal (client-credentials) token source.
#[derive(Clone)]
pub struct ServicePrincipal {
    /// Directory (tenant) id.
    pub tenant_id: String,
    /// Application (client) id.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
}

impl ServicePrincipal {
    /// Acquire a token with the client-credentials grant.
    pub async fn fetch_token(&self, http: &reqwest::Client) -> Result<FedAuthToken, AuthError> {
        let url = format!("{AUTHORITY}/{}/oauth2/v2.0/token", self.tenant_id);
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", SQL_SCOPE),
        ];

        tracing::debug!(tenant = %self.tenant_id, client_id = %self.client_id, "requesting service principal token");
        let response = http
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Http(e.to_string()))?;

        parse_token_response(response).await
    }
}

impl std::fmt::Debug for ServicePrincipal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServicePrincipal")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Build a service principal from `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and
/// `AZURE_CLIENT_SECRET`. Every missing variable is named in the error.
pub fn env_service_principal() -> Result<ServicePrincipal, AuthError> {
    const VARS: [&str; 3] = ["AZURE_TENANT_ID", "AZURE_CLIENT_ID", "AZURE_CLIENT_SECRET"];

    let mut values = Vec::with_capacity(3);
    let mut missing = Vec::new();
    for var in VARS {
        match std::env::var(var) {
            Ok(value) if !value.is_empty() => values.push(value),
            _ => missing.push(var.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(AuthError::MissingEnv(missing));
    }

    let mut values = values.into_iter();
    Ok(ServicePrincipal {
        tenant_id: values.next().unwrap_or_default(),
        client_id: values.next().unwrap_or_default(),
        client_secret: values.next().unwrap_or_default(),
    })
}

/// Callback displaying the verification URI and user code out of band.
pub type DeviceCodePrompt = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// RFC 8628 device authorization grant.
#[derive(Clone)]
pub struct DeviceCode {
    /// Directory (tenant) id; `organizations` or `common` are accepted.
    pub tenant_id: String,
    /// Public client application id.
    pub client_id: String,
    /// Prompt channel for the verification URI and user code.
    pub prompt: DeviceCodePrompt,
}

impl DeviceCode {
    /// Run the device-code flow to completion.
    ///
    /// Polls the token endpoint at the server-provided interval until the
    /// user approves, a terminal error arrives, or 15 minutes elapse.
    pub async fn fetch_token(&self, http: &reqwest::Client) -> Result<FedAuthToken, AuthError> {
        let device_url = format!("{AUTHORITY}/{}/oauth2/v2.0/devicecode", self.tenant_id);
        let token_url = format!("{AUTHORITY}/{}/oauth2/v2.0/token", self.tenant_id);

        let response = http
            .post(&device_url)
            .form(&[("client_id", self.client_id.as_str()), ("scope", SQL_SCOPE)])
            .send()
            .await
            .map_err(|e| AuthError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(read_oauth_error(response).await);
        }
        let device: DeviceCodeResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Http(e.to_string()))?;

        (self.prompt)(&device.verification_uri, &device.user_code);
        tracing::info!(
            uri = %device.verification_uri,
            "waiting for device code confirmation"
        );

        let deadline = Instant::now() + DEVICE_CODE_BUDGET;
        let interval = Duration::from_secs(device.interval.max(1));

        loop {
            if Instant::now() >= deadline {
                return Err(AuthError::DeviceCodeTimeout);
            }
            tokio::time::sleep(interval).await;

            let response = http
                .post(&token_url)
                .form(&[
                    ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                    ("client_id", self.client_id.as_str()),
                    ("device_code", device.device_code.as_str()),
                ])
                .send()
                .await
                .map_err(|e| AuthError::Http(e.to_string()))?;

            if response.status().is_success() {
                return parse_token_response(response).await;
            }

            let body: OAuthErrorBody = response
                .json()
                .await
                .map_err(|e| AuthError::Http(e.to_string()))?;
            match body.error.as_str() {
                "authorization_pending" => continue,
                "slow_down" => {
                    tokio::time::sleep(interval).await;
                    continue;
                }
                "authorization_declined" => return Err(AuthError::DeviceCodeDeclined),
                "expired_token" | "bad_verification_code" => {
                    return Err(AuthError::DeviceCodeFailed(body.error));
                }
                _ => {
                    return Err(AuthError::Aad {
                        code: body.error,
                        description: body.error_description,
                    });
                }
            }
        }
    }
}

impl std::fmt::Debug for DeviceCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCode")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

async fn parse_token_response(response: reqwest::Response) -> Result<FedAuthToken, AuthError> {
    if !response.status().is_success() {
        return Err(read_oauth_error(response).await);
    }
    let body: TokenResponse = response
        .json()
        .await
        .map_err(|e| AuthError::Http(e.to_string()))?;
    Ok(FedAuthToken::expiring_in(
        body.access_token,
        Duration::from_secs(body.expires_in),
    ))
}

async fn read_oauth_error(response: reqwest::Response) -> AuthError {
    let status = response.status();
    match response.json::<OAuthErrorBody>().await {
        Ok(body) if !body.error.is_empty() => AuthError::Aad {
            code: body.error,
            description: body.error_description,
        },
        _ => AuthError::Http(format!("token endpoint returned HTTP {status}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_service_principal_enumerates_missing() {
        // The test environment does not define the Azure variables.
        let result = env_service_principal();
        if let Err(AuthError::MissingEnv(missing)) = result {
            assert!(missing.contains(&"AZURE_TENANT_ID".to_string()));
        }
    }

    #[test]
    fn service_principal_debug_redacts_secret() {
        let sp = ServicePrincipal {
            tenant_id: "t".into(),
            client_id: "c".into(),
            client_secret: "hunter2".into(),
        };
        let debug = format!("{sp:?}");
        assert!(!debug.contains("hunter2"));
    }
}
