//! HTTP adapter for the shared threat registry.
//!
//! `GET {endpoint}/threats?since=<rfc3339>` returns a JSON array of
//! [`ThreatRecord`]s; `POST {endpoint}/threats` takes one record and answers
//! `{"receipt": "..."}`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use super::{RegistryService, ThreatRecord};
use crate::external::{check_http_response, http_client, ExternalError, ReceiptBody};
use crate::types::Receipt;

/// Registry service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRegistryService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRegistryService {
    /// Create a client for the registry at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`ExternalError::Unreachable`] if the HTTP client cannot be built.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ExternalError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: endpoint.trim_end_matches('/').to_owned(),
        })
    }

    fn threats_url(&self) -> String {
        format!("{}/threats", self.base_url)
    }
}

// ---------------------------------------------------------------------------
// Trait impl
// ---------------------------------------------------------------------------

#[async_trait]
impl RegistryService for HttpRegistryService {
    async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ThreatRecord>, ExternalError> {
        let mut builder = self.client.get(self.threats_url());
        if let Some(since) = since {
            builder = builder.query(&[("since", since.to_rfc3339_opts(SecondsFormat::Micros, true))]);
        }
        let response = builder.send().await?;
        let payload = check_http_response(response).await?;
        serde_json::from_str(&payload)
            .map_err(|e| ExternalError::Encoding(format!("invalid threat list: {e}")))
    }

    async fn publish(&self, record: &ThreatRecord) -> Result<Receipt, ExternalError> {
        let response = self
            .client
            .post(self.threats_url())
            .header("content-type", "application/json")
            .json(record)
            .send()
            .await?;
        let payload = check_http_response(response).await?;
        serde_json::from_str::<ReceiptBody>(&payload)
            .map(Receipt::from)
            .map_err(|e| ExternalError::Encoding(format!("invalid registry receipt: {e}")))
    }
}
