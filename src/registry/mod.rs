//! Shared threat registry client.
//!
//! The [`ThreatRegistry`] keeps a local cache of known threat patterns, both
//! ones this kernel blocked and ones fetched from the shared registry. Lookups
//! are served from the cache only; the network is touched by
//! [`ThreatRegistry::publish`] and [`ThreatRegistry::refresh`], which run
//! outside the kernel's critical section.

pub mod http;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classifier::{ClassificationResult, InjectionDetector};
use crate::external::{bounded, ExternalError};
use crate::types::{
    content_hash, normalize, sha256_hex, tokenize, InvalidValue, Receipt, RiskCategory,
    StoreError,
};

pub use self::http::HttpRegistryService;

/// Hex characters kept from the SHA-256 digest for a threat id.
const THREAT_ID_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Kind of threat a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    /// Instruction override or role manipulation.
    PromptInjection,
    /// Funds routed to a hostile address.
    MaliciousAddress,
    /// Data destruction.
    DestructiveCommand,
    /// Privilege grab.
    PrivilegeEscalation,
    /// Anything else that was blocked.
    SuspiciousAction,
}

impl ThreatType {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PromptInjection => "prompt_injection",
            Self::MaliciousAddress => "malicious_address",
            Self::DestructiveCommand => "destructive_command",
            Self::PrivilegeEscalation => "privilege_escalation",
            Self::SuspiciousAction => "suspicious_action",
        }
    }

    /// Parse from the stored string representation.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidValue`] for unknown values.
    pub fn parse(s: &str) -> Result<Self, InvalidValue> {
        match s {
            "prompt_injection" => Ok(Self::PromptInjection),
            "malicious_address" => Ok(Self::MaliciousAddress),
            "destructive_command" => Ok(Self::DestructiveCommand),
            "privilege_escalation" => Ok(Self::PrivilegeEscalation),
            "suspicious_action" => Ok(Self::SuspiciousAction),
            other => Err(InvalidValue {
                field: "threat_type",
                value: other.to_owned(),
            }),
        }
    }

    /// Derive the threat type of a blocked action from its classification.
    pub fn classify(action: &str, classification: &ClassificationResult) -> Self {
        if classification.injection_detected() {
            return Self::PromptInjection;
        }
        if classification.category == RiskCategory::Financial
            && tokenize(action).iter().any(|t| t.starts_with("0x"))
        {
            return Self::MaliciousAddress;
        }
        match classification.category {
            RiskCategory::Destructive => Self::DestructiveCommand,
            RiskCategory::PrivilegeEscalation => Self::PrivilegeEscalation,
            _ => Self::SuspiciousAction,
        }
    }
}

impl fmt::Display for ThreatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity bucket of a threat record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Score below 40.
    Low,
    /// Score 40 to 69.
    Medium,
    /// Score 70 to 89.
    High,
    /// Score 90 and above.
    Critical,
}

impl Severity {
    /// Bucket a risk score.
    pub fn from_score(score: u32) -> Self {
        match score {
            90.. => Self::Critical,
            70..=89 => Self::High,
            40..=69 => Self::Medium,
            _ => Self::Low,
        }
    }

    /// Returns the string representation stored in SQLite.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Parse from the stored string representation.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidValue`] for unknown values.
    pub fn parse(s: &str) -> Result<Self, InvalidValue> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(InvalidValue {
                field: "severity",
                value: other.to_owned(),
            }),
        }
    }
}

/// A known-bad action pattern shared between agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatRecord {
    /// Stable id derived from the source hash and reporter.
    pub threat_id: String,
    /// Kind of threat.
    pub threat_type: ThreatType,
    /// The offending action text.
    pub pattern: String,
    /// SHA-256 of the normalised action.
    pub source_hash: String,
    /// Agent that reported the threat.
    pub reporter: String,
    /// When the threat was reported.
    pub timestamp: DateTime<Utc>,
    /// Severity bucket.
    pub severity: Severity,
    /// Score at report time.
    pub risk_score: u32,
}

impl ThreatRecord {
    /// Build the record for an action this kernel just blocked.
    pub fn from_block(
        action: &str,
        classification: &ClassificationResult,
        risk_score: u32,
        reporter: &str,
    ) -> Self {
        let source_hash = content_hash(action);
        Self {
            threat_id: threat_id(&source_hash, reporter),
            threat_type: ThreatType::classify(action, classification),
            pattern: action.to_owned(),
            source_hash,
            reporter: reporter.to_owned(),
            timestamp: Utc::now(),
            severity: Severity::from_score(risk_score),
            risk_score,
        }
    }
}

/// Stable threat id: leading hex of SHA-256 over source hash and reporter.
pub fn threat_id(source_hash: &str, reporter: &str) -> String {
    let mut digest = sha256_hex(format!("{source_hash}{reporter}").as_bytes());
    digest.truncate(THREAT_ID_LEN);
    digest
}

/// Where a cached record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOrigin {
    /// Blocked by this kernel.
    Local,
    /// Fetched from the shared registry.
    Remote,
}

impl CacheOrigin {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }

    /// Parse from the stored string representation.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidValue`] for unknown values.
    pub fn parse(s: &str) -> Result<Self, InvalidValue> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(InvalidValue {
                field: "origin",
                value: other.to_owned(),
            }),
        }
    }
}

/// A threat record as held in the local cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedThreat {
    /// The record.
    pub record: ThreatRecord,
    /// Where it came from.
    pub origin: CacheOrigin,
}

/// How an action matched a cached threat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "signature", rename_all = "snake_case")]
pub enum ThreatMatchKind {
    /// Same normalised text.
    ExactPattern,
    /// Both carry the named injection signature.
    Signature(String),
}

/// A registry hit returned by [`ThreatRegistry::query`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatMatch {
    /// The matched record.
    pub record: ThreatRecord,
    /// How it matched.
    pub kind: ThreatMatchKind,
}

/// Outcome of publishing a blocked action to the shared registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PublishStatus {
    /// The decision did not warrant publication.
    NotRequired,
    /// The pattern was already cached, nothing new to share.
    AlreadyKnown {
        /// Existing record id.
        threat_id: String,
    },
    /// The registry acknowledged the record.
    Published {
        /// Published record id.
        threat_id: String,
        /// Registry acknowledgement.
        receipt: Receipt,
    },
    /// No registry is configured. The record is cached locally only.
    Offline {
        /// Record id.
        threat_id: String,
    },
    /// Publication failed. The record is still cached locally.
    Failed {
        /// Record id.
        threat_id: String,
        /// Failure description.
        reason: String,
    },
}

/// Counters over the local threat cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Cached records.
    pub total: u64,
    /// Records this kernel reported.
    pub local: u64,
    /// Records fetched from the shared registry.
    pub remote: u64,
    /// Records per severity.
    pub by_severity: BTreeMap<String, u64>,
    /// Newest remote timestamp seen, used as the refresh cursor.
    pub cursor: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// The shared registry service.
#[async_trait]
pub trait RegistryService: Send + Sync {
    /// Fetch records reported after `since` (everything when `None`).
    async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ThreatRecord>, ExternalError>;

    /// Publish one record.
    async fn publish(&self, record: &ThreatRecord) -> Result<Receipt, ExternalError>;

    /// Whether a remote registry sits behind this service.
    fn is_connected(&self) -> bool {
        true
    }
}

/// Registry used when no endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRegistry;

#[async_trait]
impl RegistryService for OfflineRegistry {
    async fn fetch(&self, _since: Option<DateTime<Utc>>) -> Result<Vec<ThreatRecord>, ExternalError> {
        Ok(Vec::new())
    }

    async fn publish(&self, _record: &ThreatRecord) -> Result<Receipt, ExternalError> {
        Err(ExternalError::Unreachable(
            "no registry endpoint configured".to_owned(),
        ))
    }

    fn is_connected(&self) -> bool {
        false
    }
}

/// Durable storage behind the local threat cache.
#[async_trait]
pub trait ThreatCacheBackend: Send + Sync {
    /// Load every cached record.
    async fn load(&self) -> Result<Vec<CachedThreat>, StoreError>;

    /// Append one record. Appending a known threat id is a no-op.
    async fn append(&self, threat: &CachedThreat) -> Result<(), StoreError>;
}

/// Volatile cache backend for tests and ephemeral kernels.
#[derive(Debug, Default)]
pub struct InMemoryThreatCache {
    threats: Mutex<Vec<CachedThreat>>,
}

impl InMemoryThreatCache {
    /// Backend pre-seeded with records.
    pub fn with_threats(threats: Vec<CachedThreat>) -> Self {
        Self {
            threats: Mutex::new(threats),
        }
    }
}

#[async_trait]
impl ThreatCacheBackend for InMemoryThreatCache {
    async fn load(&self) -> Result<Vec<CachedThreat>, StoreError> {
        self.threats
            .lock()
            .map(|threats| threats.clone())
            .map_err(|e| StoreError::Unavailable(format!("threat cache lock poisoned: {e}")))
    }

    async fn append(&self, threat: &CachedThreat) -> Result<(), StoreError> {
        let mut threats = self
            .threats
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("threat cache lock poisoned: {e}")))?;
        if !threats
            .iter()
            .any(|t| t.record.threat_id == threat.record.threat_id)
        {
            threats.push(threat.clone());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct CacheEntry {
    threat: CachedThreat,
    normalized: String,
    signatures: Vec<String>,
}

#[derive(Default)]
struct Cache {
    entries: Vec<CacheEntry>,
    ids: HashSet<String>,
}

impl Cache {
    /// Insert unless the threat id is already cached.
    fn insert(&mut self, threat: CachedThreat, detector: &InjectionDetector) -> bool {
        if !self.ids.insert(threat.record.threat_id.clone()) {
            return false;
        }
        let normalized = normalize(&threat.record.pattern);
        let signatures = detector.detect(&normalized);
        self.entries.push(CacheEntry {
            threat,
            normalized,
            signatures,
        });
        true
    }
}

/// Client of the shared threat registry with a local, append-only cache.
pub struct ThreatRegistry {
    cache: RwLock<Cache>,
    backend: Arc<dyn ThreatCacheBackend>,
    service: Arc<dyn RegistryService>,
    detector: InjectionDetector,
    timeout: Duration,
}

impl fmt::Debug for ThreatRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreatRegistry")
            .field("cached", &self.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ThreatRegistry {
    /// Open the registry, loading the cache from the backend.
    ///
    /// A backend that fails to load leaves the cache empty.
    pub async fn open(
        backend: Arc<dyn ThreatCacheBackend>,
        service: Arc<dyn RegistryService>,
        detector: InjectionDetector,
        timeout: Duration,
    ) -> Self {
        let mut cache = Cache::default();
        match backend.load().await {
            Ok(threats) => {
                info!(count = threats.len(), "threat cache loaded");
                for threat in threats {
                    cache.insert(threat, &detector);
                }
            }
            Err(e) => warn!(error = %e, "failed to load threat cache, starting empty"),
        }
        Self {
            cache: RwLock::new(cache),
            backend,
            service,
            detector,
            timeout,
        }
    }

    /// Offline registry with an empty volatile cache.
    pub fn offline(detector: InjectionDetector, timeout: Duration) -> Self {
        Self {
            cache: RwLock::new(Cache::default()),
            backend: Arc::new(InMemoryThreatCache::default()),
            service: Arc::new(OfflineRegistry),
            detector,
            timeout,
        }
    }

    /// Match an action against the cache.
    ///
    /// An action matches a record with the same normalised text, or one that
    /// carries an injection signature the action also carries. With several
    /// matches the highest risk score wins.
    pub fn query(&self, action: &str) -> Option<ThreatMatch> {
        let cache = match self.cache.read() {
            Ok(cache) => cache,
            Err(e) => {
                warn!(error = %e, "threat cache lock poisoned, skipping query");
                return None;
            }
        };

        let normalized = normalize(action);
        let hash = content_hash(action);
        let signatures = self.detector.detect(&normalized);

        let mut best: Option<(&CacheEntry, ThreatMatchKind)> = None;
        for entry in &cache.entries {
            let kind = if entry.threat.record.source_hash == hash || entry.normalized == normalized {
                ThreatMatchKind::ExactPattern
            } else if let Some(shared) = signatures.iter().find(|s| entry.signatures.contains(s)) {
                ThreatMatchKind::Signature(shared.clone())
            } else {
                continue;
            };
            let outranks = best.as_ref().map_or(true, |(current, _)| {
                entry.threat.record.risk_score > current.threat.record.risk_score
            });
            if outranks {
                best = Some((entry, kind));
            }
        }

        best.map(|(entry, kind)| {
            debug!(threat_id = %entry.threat.record.threat_id, "registry hit");
            ThreatMatch {
                record: entry.threat.record.clone(),
                kind,
            }
        })
    }

    /// Add a locally blocked threat to the cache.
    ///
    /// Returns `false` if the threat id was already cached.
    pub async fn remember(&self, record: ThreatRecord) -> bool {
        self.insert(CachedThreat {
            record,
            origin: CacheOrigin::Local,
        })
        .await
    }

    /// Cache a locally blocked threat and share it with the registry.
    ///
    /// # Errors
    ///
    /// Returns [`ExternalError`] if the registry is unreachable, rejects the
    /// record or exceeds the timeout. The record stays cached either way.
    pub async fn publish(&self, record: &ThreatRecord) -> Result<Receipt, ExternalError> {
        self.remember(record.clone()).await;
        let receipt = bounded(self.timeout, self.service.publish(record)).await?;
        info!(threat_id = %record.threat_id, severity = record.severity.as_str(), "threat published");
        Ok(receipt)
    }

    /// Pull records newer than the cursor into the cache.
    ///
    /// Returns how many records were new.
    ///
    /// # Errors
    ///
    /// Returns [`ExternalError`] if the fetch fails. The cache is untouched.
    pub async fn refresh(&self) -> Result<usize, ExternalError> {
        let since = self.cursor();
        let fetched = bounded(self.timeout, self.service.fetch(since)).await?;
        let mut added = 0usize;
        for record in fetched {
            let fresh = self
                .insert(CachedThreat {
                    record,
                    origin: CacheOrigin::Remote,
                })
                .await;
            if fresh {
                added = added.saturating_add(1);
            }
        }
        info!(added, "threat registry refreshed");
        Ok(added)
    }

    /// Whether publications reach a shared registry.
    pub fn is_connected(&self) -> bool {
        self.service.is_connected()
    }

    /// Newest timestamp among records fetched from the registry.
    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        let cache = self.cache.read().ok()?;
        cache
            .entries
            .iter()
            .filter(|e| e.threat.origin == CacheOrigin::Remote)
            .map(|e| e.threat.record.timestamp)
            .max()
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.cache.read().map_or(0, |cache| cache.entries.len())
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counters over the cache.
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            cursor: self.cursor(),
            ..RegistryStats::default()
        };
        let Ok(cache) = self.cache.read() else {
            return stats;
        };
        for entry in &cache.entries {
            stats.total = stats.total.saturating_add(1);
            match entry.threat.origin {
                CacheOrigin::Local => stats.local = stats.local.saturating_add(1),
                CacheOrigin::Remote => stats.remote = stats.remote.saturating_add(1),
            }
            let count = stats
                .by_severity
                .entry(entry.threat.record.severity.as_str().to_owned())
                .or_insert(0);
            *count = count.saturating_add(1);
        }
        stats
    }

    async fn insert(&self, threat: CachedThreat) -> bool {
        let fresh = match self.cache.write() {
            Ok(mut cache) => cache.insert(threat.clone(), &self.detector),
            Err(e) => {
                warn!(error = %e, "threat cache lock poisoned, record dropped");
                return false;
            }
        };
        if fresh {
            if let Err(e) = self.backend.append(&threat).await {
                warn!(error = %e, threat_id = %threat.record.threat_id, "failed to persist threat");
            }
        }
        fresh
    }
}
