//! What the kernel hands back to the caller.

use serde::{Deserialize, Serialize};

use crate::ledger::AuditStatus;
use crate::memory::{MatchKind, MemoryStats};
use crate::registry::{PublishStatus, RegistryStats, ThreatMatch};
use crate::types::{AlertLevel, Decision, Receipt, RiskCategory};

/// Prior decision that influenced a verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryHit {
    /// Exact or fuzzy.
    pub kind: MatchKind,
    /// Decision recorded for the matched entry.
    pub prior_decision: Decision,
    /// Penalty the hit contributed.
    pub penalty: u32,
}

/// Final gating decision for one action plus its supporting metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the action may execute without a human.
    pub allowed: bool,
    /// Final decision.
    pub decision: Decision,
    /// Score after history adjustment. Not clamped to 100.
    pub risk_score: u32,
    /// Classifier score before adjustment.
    pub base_score: u32,
    /// Classified category.
    pub category: RiskCategory,
    /// Every contributing reason, in pipeline order.
    pub reasoning: String,
    /// Alert level derived from the decision.
    pub alert_level: AlertLevel,
    /// Classifier matcher labels.
    pub matched_patterns: Vec<String>,
    /// History hit, if any.
    pub history: Option<HistoryHit>,
    /// Registry hit, if any.
    pub registry_hit: Option<ThreatMatch>,
    /// Ledger outcome.
    pub audit: AuditStatus,
    /// Registry publication outcome.
    pub publication: PublishStatus,
}

impl Verdict {
    /// Ledger receipt, if the audit record was acknowledged.
    pub fn audit_reference(&self) -> Option<&Receipt> {
        self.audit.receipt()
    }

    /// Whether an audit record was due but not confirmed.
    pub fn audit_failed(&self) -> bool {
        matches!(self.audit, AuditStatus::Failed { .. })
    }
}

/// Counters over the kernel's lifetime plus store summaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelStats {
    /// Actions that produced a verdict.
    pub processed: u64,
    /// Requests rejected as malformed.
    pub rejected: u64,
    /// Verdicts that blocked.
    pub blocked: u64,
    /// Audit records acknowledged by the ledger.
    pub audits_recorded: u64,
    /// Audit writes that failed or timed out.
    pub audit_failures: u64,
    /// Threat records acknowledged by the registry.
    pub threats_published: u64,
    /// Threat publications that failed or timed out.
    pub publish_failures: u64,
    /// Decision history summary.
    pub memory: MemoryStats,
    /// Threat cache summary.
    pub registry: RegistryStats,
}
