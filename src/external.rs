//! Plumbing shared by the out-of-band ledger and registry clients.
//!
//! Every external call the kernel makes goes through [`bounded`], so a slow
//! or dead endpoint degrades into an [`ExternalError::Timeout`] instead of
//! stalling the caller.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::Receipt;

/// Maximum characters of an error body kept in [`ExternalError::Rejected`].
const MAX_ERROR_BODY_CHARS: usize = 256;

/// Failure of an external ledger or registry call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExternalError {
    /// The service could not be reached.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The call did not finish within its budget.
    #[error("timed out after {millis}ms")]
    Timeout {
        /// Budget that was exceeded.
        millis: u64,
    },

    /// The service answered with a non-success status.
    #[error("rejected with HTTP {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    /// A payload could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl From<reqwest::Error> for ExternalError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout { millis: 0 };
        }
        if e.is_decode() {
            return Self::Encoding(e.to_string());
        }
        Self::Unreachable(e.to_string())
    }
}

/// Receipt body returned by HTTP ledger and registry endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptBody {
    /// Opaque acknowledgement.
    pub receipt: String,
}

impl From<ReceiptBody> for Receipt {
    fn from(body: ReceiptBody) -> Self {
        Receipt(body.receipt)
    }
}

/// Run an external call under a timeout.
///
/// # Errors
///
/// Returns [`ExternalError::Timeout`] when the budget runs out, otherwise
/// whatever the call itself returned.
pub async fn bounded<T, F>(budget: Duration, call: F) -> Result<T, ExternalError>
where
    F: Future<Output = Result<T, ExternalError>>,
{
    match tokio::time::timeout(budget, call).await {
        Ok(result) => result,
        Err(_) => Err(ExternalError::Timeout {
            millis: u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

/// Build the HTTP client shared by the HTTP adapters.
///
/// # Errors
///
/// Returns [`ExternalError::Unreachable`] if the TLS backend fails to initialise.
pub fn http_client(budget: Duration) -> Result<reqwest::Client, ExternalError> {
    reqwest::Client::builder()
        .timeout(budget)
        .build()
        .map_err(|e| ExternalError::Unreachable(format!("failed to build HTTP client: {e}")))
}

/// Check HTTP status and return the body text.
///
/// # Errors
///
/// Returns [`ExternalError::Rejected`] for non-success statuses.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, ExternalError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ExternalError::Rejected {
            status: status.as_u16(),
            body: truncate_body(&body),
        });
    }
    Ok(body)
}

fn truncate_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_ERROR_BODY_CHARS {
        return collapsed;
    }
    let mut shortened: String = collapsed.chars().take(MAX_ERROR_BODY_CHARS).collect();
    shortened.push_str("...");
    shortened
}
