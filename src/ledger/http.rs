//! HTTP adapter for a remote audit ledger.
//!
//! `POST {endpoint}/records` with the JSON [`AuditRecord`]; the ledger answers
//! `{"receipt": "..."}`.

use std::time::Duration;

use async_trait::async_trait;

use super::{AuditRecord, LedgerSink};
use crate::external::{check_http_response, http_client, ExternalError, ReceiptBody};
use crate::types::Receipt;

/// Ledger reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpLedger {
    client: reqwest::Client,
    records_url: String,
}

impl HttpLedger {
    /// Create a client for the ledger at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`ExternalError::Unreachable`] if the HTTP client cannot be built.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ExternalError> {
        Ok(Self {
            client: http_client(timeout)?,
            records_url: format!("{}/records", endpoint.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl LedgerSink for HttpLedger {
    async fn write(&self, record: &AuditRecord) -> Result<Receipt, ExternalError> {
        let response = self
            .client
            .post(&self.records_url)
            .header("content-type", "application/json")
            .json(record)
            .send()
            .await?;
        let payload = check_http_response(response).await?;
        serde_json::from_str::<ReceiptBody>(&payload)
            .map(Receipt::from)
            .map_err(|e| ExternalError::Encoding(format!("invalid ledger receipt: {e}")))
    }
}
