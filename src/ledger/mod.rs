//! Tamper-evident audit trail for non-trivial decisions.
//!
//! Every decision other than auto-approve becomes an [`AuditRecord`] handed to
//! a [`LedgerSink`]. The kernel writes after releasing its locks and under a
//! timeout, so the ledger can be slow or gone without affecting the decision.

pub mod http;

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::external::ExternalError;
use crate::registry::PublishStatus;
use crate::types::{sha256_hex, ActionRequest, AlertLevel, Decision, Receipt, RiskCategory};

pub use self::http::HttpLedger;

/// Schema version stamped on every record.
pub const RECORD_VERSION: &str = "1.0";

/// Prefix of receipts issued by [`JsonlLedger`].
pub const RECEIPT_PREFIX: &str = "ledger-";

/// Hex characters of the integrity hash kept in a receipt.
const RECEIPT_HASH_LEN: usize = 16;

/// One audited decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique record id.
    pub record_id: Uuid,
    /// Schema version.
    pub version: String,
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
    /// Reporting agent.
    pub agent_id: String,
    /// Action text.
    pub action: String,
    /// Action target.
    pub target: Option<String>,
    /// Caller-supplied context.
    pub context: BTreeMap<String, String>,
    /// Decision reached.
    pub decision: Decision,
    /// Adjusted risk score.
    pub risk_score: u32,
    /// Risk category.
    pub category: RiskCategory,
    /// Full reasoning trace.
    pub reasoning: String,
    /// Alert level.
    pub alert_level: AlertLevel,
    /// Outcome of sharing the threat, for blocks that were published.
    pub threat_publication: PublishStatus,
}

impl AuditRecord {
    /// Stamp a new record for a decision made now.
    pub fn new(
        agent_id: &str,
        request: &ActionRequest,
        decision: Decision,
        risk_score: u32,
        category: RiskCategory,
        reasoning: &str,
        threat_publication: PublishStatus,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            version: RECORD_VERSION.to_owned(),
            timestamp: Utc::now(),
            agent_id: agent_id.to_owned(),
            action: request.action.clone(),
            target: request.target.clone(),
            context: request.context.clone(),
            decision,
            risk_score,
            category,
            reasoning: reasoning.to_owned(),
            alert_level: decision.alert_level(),
            threat_publication,
        }
    }

    /// SHA-256 over the record's canonical JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`ExternalError::Encoding`] if the record cannot be serialised.
    pub fn integrity_hash(&self) -> Result<String, ExternalError> {
        let canonical = serde_json::to_string(self)
            .map_err(|e| ExternalError::Encoding(format!("audit record: {e}")))?;
        Ok(sha256_hex(canonical.as_bytes()))
    }
}

/// Outcome of auditing one decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditStatus {
    /// Auto-approved, nothing written.
    NotRequired,
    /// The ledger acknowledged the record.
    Recorded {
        /// Ledger acknowledgement.
        receipt: Receipt,
    },
    /// The write failed or timed out. The decision stands.
    Failed {
        /// Failure description.
        reason: String,
    },
}

impl AuditStatus {
    /// Receipt, if the record was acknowledged.
    pub fn receipt(&self) -> Option<&Receipt> {
        match self {
            Self::Recorded { receipt } => Some(receipt),
            _ => None,
        }
    }
}

/// Destination for audit records.
#[async_trait]
pub trait LedgerSink: Send + Sync {
    /// Write one record and return the sink's acknowledgement.
    async fn write(&self, record: &AuditRecord) -> Result<Receipt, ExternalError>;
}

// ---------------------------------------------------------------------------
// JSON-lines ledger
// ---------------------------------------------------------------------------

/// One line of the JSON-lines ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerLine {
    /// Integrity hash of `record`.
    pub hash: String,
    /// The audited decision.
    pub record: AuditRecord,
}

/// Append-only JSON-lines ledger on a local file or any writer.
pub struct JsonlLedger {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for JsonlLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlLedger").finish_non_exhaustive()
    }
}

impl JsonlLedger {
    /// Create a ledger that appends to the given file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its parent directory cannot be created.
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            writer: Mutex::new(Box::new(file)),
        })
    }

    /// Create a ledger from an arbitrary writer (for testing).
    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl LedgerSink for JsonlLedger {
    async fn write(&self, record: &AuditRecord) -> Result<Receipt, ExternalError> {
        let hash = record.integrity_hash()?;
        let line = serde_json::to_string(&LedgerLine {
            hash: hash.clone(),
            record: record.clone(),
        })
        .map_err(|e| ExternalError::Encoding(format!("ledger line: {e}")))?;

        let mut writer = self
            .writer
            .lock()
            .map_err(|e| ExternalError::Unreachable(format!("ledger lock poisoned: {e}")))?;
        writeln!(writer, "{line}")
            .and_then(|()| writer.flush())
            .map_err(|e| ExternalError::Unreachable(format!("ledger write failed: {e}")))?;

        let short = hash.get(..RECEIPT_HASH_LEN).unwrap_or(&hash);
        Ok(Receipt(format!("{RECEIPT_PREFIX}{short}")))
    }
}
