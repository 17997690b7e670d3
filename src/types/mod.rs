//! Core types shared by every kernel component.
//!
//! Holds the request/decision vocabulary plus the text canonicalisation
//! helpers (normalisation, content hashing, tokenisation) that the memory
//! store and the threat registry both key on.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// An action an agent wants to perform, as submitted to the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Free-form description of the action (command line, intent, API call).
    pub action: String,
    /// Optional target the action operates on (URL, path, address).
    #[serde(default)]
    pub target: Option<String>,
    /// Optional caller-supplied context, carried into the audit trail.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl ActionRequest {
    /// Create a request with no target and empty context.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            target: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a target identifier.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Attach a single context key/value pair.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// A stored text value did not map to any known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field} value: {value:?}")]
pub struct InvalidValue {
    /// Which field carried the value.
    pub field: &'static str,
    /// The unexpected value.
    pub value: String,
}

/// Risk category of an action, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskCategory {
    /// Observes state without changing it.
    ReadOnly,
    /// Changes local files or state.
    WriteLocal,
    /// Sends data to a remote system.
    WriteNetwork,
    /// Moves money or tokens.
    Financial,
    /// Deletes, wipes or disables something.
    Destructive,
    /// Gains privileges the agent does not hold.
    PrivilegeEscalation,
}

impl RiskCategory {
    /// Every category, most severe first (classification precedence).
    pub const PRECEDENCE: [RiskCategory; 6] = [
        Self::PrivilegeEscalation,
        Self::Destructive,
        Self::Financial,
        Self::WriteNetwork,
        Self::WriteLocal,
        Self::ReadOnly,
    ];

    /// Closed base-score range for the category. Ranges overlap at the top.
    pub fn score_range(self) -> RangeInclusive<u32> {
        match self {
            Self::ReadOnly => 0..=10,
            Self::WriteLocal => 10..=30,
            Self::WriteNetwork => 30..=50,
            Self::Financial => 50..=80,
            Self::Destructive => 70..=100,
            Self::PrivilegeEscalation => 80..=100,
        }
    }

    /// Returns the string representation stored in SQLite and audit records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "READ_ONLY",
            Self::WriteLocal => "WRITE_LOCAL",
            Self::WriteNetwork => "WRITE_NETWORK",
            Self::Financial => "FINANCIAL",
            Self::Destructive => "DESTRUCTIVE",
            Self::PrivilegeEscalation => "PRIVILEGE_ESCALATION",
        }
    }

    /// Parse from the stored string representation.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidValue`] if the value is not a known category.
    pub fn parse(s: &str) -> Result<Self, InvalidValue> {
        Self::PRECEDENCE
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| InvalidValue {
                field: "category",
                value: s.to_owned(),
            })
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal gating decision for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Low risk, executes without record.
    AutoApprove,
    /// Medium risk, executes and is written to the ledger.
    ApproveWithLogging,
    /// High risk, held until a human confirms.
    RequireConfirmation,
    /// Denied outright.
    Block,
}

impl Decision {
    /// Whether the action may execute without further interaction.
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::AutoApprove | Self::ApproveWithLogging)
    }

    /// Alert level derived from the decision.
    pub fn alert_level(self) -> AlertLevel {
        match self {
            Self::AutoApprove => AlertLevel::None,
            Self::ApproveWithLogging => AlertLevel::Info,
            Self::RequireConfirmation => AlertLevel::Warning,
            Self::Block => AlertLevel::Critical,
        }
    }

    /// Returns the string representation stored in SQLite and audit records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AutoApprove => "auto_approve",
            Self::ApproveWithLogging => "approve_with_logging",
            Self::RequireConfirmation => "require_confirmation",
            Self::Block => "block",
        }
    }

    /// Parse from the stored string representation.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidValue`] if the value is not a known decision.
    pub fn parse(s: &str) -> Result<Self, InvalidValue> {
        match s {
            "auto_approve" => Ok(Self::AutoApprove),
            "approve_with_logging" => Ok(Self::ApproveWithLogging),
            "require_confirmation" => Ok(Self::RequireConfirmation),
            "block" => Ok(Self::Block),
            other => Err(InvalidValue {
                field: "decision",
                value: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-facing alert level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// Nothing to report.
    None,
    /// Informational.
    Info,
    /// Needs a human.
    Warning,
    /// Action was stopped.
    Critical,
}

impl AlertLevel {
    /// Returns the lowercase string representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Local persistence failure (memory store or threat cache).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored enum column held an unknown value.
    #[error(transparent)]
    InvalidValue(#[from] InvalidValue),

    /// A stored row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// The backing store is not available.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Opaque acknowledgement returned by an external ledger or registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Receipt(pub String);

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Text canonicalisation
// ---------------------------------------------------------------------------

/// Minimum token length kept by [`tokenize`].
pub const MIN_TOKEN_LEN: usize = 2;

/// Lowercase and collapse every whitespace run to a single space.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// SHA-256 hex digest of the normalised text.
///
/// Identical actions modulo case and spacing always collide.
pub fn content_hash(text: &str) -> String {
    sha256_hex(normalize(text).as_bytes())
}

/// SHA-256 hex digest of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Lowercase word set with punctuation stripped and short tokens dropped.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TOKEN_LEN)
        .map(str::to_lowercase)
        .collect()
}
