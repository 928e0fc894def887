//! HTTP client utilities.
//!
//! Provides the shared client and error mapping for provider transports.

use std::time::Duration;

use reqwest::{Client, ClientBuilder, Response};

use crate::error::{AicwError, Result};

/// Client-level ceiling. Each call also carries its provider's own timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest error body kept in error messages.
const MAX_ERROR_BODY: usize = 300;

/// Build a configured HTTP client.
///
/// # Errors
///
/// Returns error if client construction fails.
pub fn build_client(timeout: Duration) -> Result<Client> {
    ClientBuilder::new()
        .timeout(timeout)
        .user_agent(format!("aicw/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| AicwError::Network(e.to_string()))
}

/// Get a client with the default timeout.
///
/// # Errors
///
/// Returns error if client construction fails.
pub fn default_client() -> Result<Client> {
    build_client(DEFAULT_TIMEOUT)
}

/// Map a transport failure for `provider_id`.
#[must_use]
pub fn map_send_error(provider_id: &str, timeout: Duration, err: &reqwest::Error) -> AicwError {
    if err.is_timeout() {
        AicwError::Timeout {
            provider: provider_id.to_string(),
            millis: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else {
        AicwError::Network(err.to_string())
    }
}

/// Pass through success responses; turn anything else into `ProviderApiError`.
///
/// # Errors
///
/// Returns [`AicwError::ProviderApiError`] with the status and a truncated body.
pub async fn ensure_success(provider_id: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let mut message = format!("HTTP {status}");
    let body = body.trim();
    if !body.is_empty() {
        let snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
        message.push_str(": ");
        message.push_str(&snippet);
    }

    Err(AicwError::ProviderApiError {
        provider: provider_id.to_string(),
        status_code: Some(status.as_u16()),
        message,
    })
}
