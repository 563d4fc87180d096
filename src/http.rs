//! Shared HTTP plumbing for the service adapters.
//!
//! Maps transport failures and non-success statuses onto [`RagError`] the
//! same way for every provider:
//! - HTTP 429 → [`RagError::RateLimit`]
//! - HTTP 5xx and transport errors → retryable [`RagError::Service`]
//! - any other 4xx → non-retryable [`RagError::Service`]

use std::time::Duration;

use crate::error::{RagError, Result};

pub(crate) fn build_client(provider: &str, timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RagError::service(provider, e, false))
}

pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> RagError {
    RagError::service(provider, err, true)
}

/// Turn a non-success response into an error, consuming its body for the message.
pub(crate) async fn status_error(provider: &str, response: reqwest::Response) -> RagError {
    let status = response.status();
    let body_text = response.text().await.unwrap_or_default();
    let message = format!("{}: {}", status, body_text);
    if status.as_u16() == 429 {
        RagError::RateLimit {
            provider: provider.to_string(),
            message,
        }
    } else {
        RagError::service(provider, message, status.is_server_error())
    }
}

/// Strip a trailing slash so endpoint paths can be appended.
pub(crate) fn base_url(url: Option<&str>, default: &str) -> String {
    url.unwrap_or(default).trim_end_matches('/').to_string()
}
