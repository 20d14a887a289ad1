//! Azure CLI token source.
//!
//! Shells out to `az account get-access-token` and parses its JSON output.
//! Useful for interactive development where an `az login` session already
//! exists.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::AuthError;
use crate::token::FedAuthToken;

/// Resource URI passed to the CLI (v1 form, no scope suffix).
const CLI_RESOURCE: &str = "https://database.windows.net";

/// Default validity assumed when the CLI output omits a usable expiry.
const FALLBACK_VALIDITY: Duration = Duration::from_secs(45 * 60);

/// `az account get-access-token` JSON output.
#[derive(serde::Deserialize)]
struct CliTokenOutput {
    #[serde(rename = "accessToken")]
    access_token: String,
    /// Unix-epoch expiry, present in Azure CLI 2.54+.
    #[serde(default)]
    expires_on: Option<i64>,
}

/// Token source backed by the local Azure CLI session.
#[derive(Debug, Clone, Default)]
pub struct AzureCli {
    /// Optional tenant override (`--tenant`).
    pub tenant: Option<String>,
}

impl AzureCli {
    /// Acquire a token from the CLI.
    pub async fn fetch_token(&self) -> Result<FedAuthToken, AuthError> {
        let mut command = tokio::process::Command::new("az");
        command
            .arg("account")
            .arg("get-access-token")
            .arg("--resource")
            .arg(CLI_RESOURCE)
            .arg("--output")
            .arg("json");
        if let Some(ref tenant) = self.tenant {
            command.arg("--tenant").arg(tenant);
        }

        tracing::debug!(tenant = ?self.tenant, "invoking az account get-access-token");
        let output = command
            .output()
            .await
            .map_err(|e| AuthError::Cli(format!("failed to launch az: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("az login") || stderr.contains("Please run 'az login'") {
                return Err(AuthError::CliNotLoggedIn);
            }
            return Err(AuthError::Cli(stderr.trim().to_string()));
        }

        let parsed: CliTokenOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| AuthError::Cli(format!("unparseable az output: {e}")))?;

        let expires_at = parsed
            .expires_on
            .and_then(|epoch| u64::try_from(epoch).ok())
            .map(|epoch| UNIX_EPOCH + Duration::from_secs(epoch))
            .unwrap_or_else(|| SystemTime::now() + FALLBACK_VALIDITY);

        Ok(FedAuthToken {
            access_token: parsed.access_token,
            expires_at,
        })
    }
}
