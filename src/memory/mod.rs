//! Decision history with exact and fuzzy recall.
//!
//! The [`MemoryStore`] keeps every past decision in an in-process index keyed
//! by content hash, and mirrors appends to a [`MemoryBackend`] so history
//! survives restarts. History is append-only: entries are never rewritten.
//!
//! Persistence failures never block evaluation. A backend that cannot be
//! loaded yields an empty store, and a failed append is logged while the
//! in-process index still records the entry.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::{content_hash, tokenize, Decision, RiskCategory, StoreError};

/// Default minimum word-overlap similarity for a fuzzy hit.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.5;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// One past decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Original action text.
    pub action: String,
    /// SHA-256 of the normalised action.
    pub action_hash: String,
    /// Word set used for fuzzy recall.
    #[serde(skip)]
    pub tokens: BTreeSet<String>,
    /// Target of the action, if any.
    pub target: Option<String>,
    /// Decision that was reached.
    pub decision: Decision,
    /// Adjusted risk score at decision time.
    pub risk_score: u32,
    /// Category at decision time.
    pub category: RiskCategory,
    /// Reasoning at decision time.
    pub reasoning: String,
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
}

impl MemoryEntry {
    /// Create an entry for a decision made now.
    pub fn new(
        action: impl Into<String>,
        target: Option<String>,
        decision: Decision,
        risk_score: u32,
        category: RiskCategory,
        reasoning: impl Into<String>,
    ) -> Self {
        let action = action.into();
        Self {
            action_hash: content_hash(&action),
            tokens: tokenize(&action),
            action,
            target,
            decision,
            risk_score,
            category,
            reasoning: reasoning.into(),
            timestamp: Utc::now(),
        }
    }

    /// Whether this entry recorded a block.
    pub fn is_block(&self) -> bool {
        self.decision == Decision::Block
    }
}

/// How a lookup matched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchKind {
    /// Same normalised text.
    Exact,
    /// Word-overlap similarity at or above the threshold.
    Fuzzy {
        /// Jaccard similarity in `[0, 1]`.
        similarity: f64,
    },
}

/// A history hit returned by [`MemoryStore::lookup`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMatch {
    /// The matching entry.
    pub entry: MemoryEntry,
    /// Exact or fuzzy.
    pub kind: MatchKind,
}

impl MemoryMatch {
    /// Whether the matched entry was blocked.
    pub fn is_prior_block(&self) -> bool {
        self.entry.is_block()
    }
}

/// Counters over the stored history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Number of entries.
    pub total: u64,
    /// Entries per decision, keyed by storage form.
    pub by_decision: BTreeMap<String, u64>,
}

// ---------------------------------------------------------------------------
// Persistence seam
// ---------------------------------------------------------------------------

/// Durable storage behind the in-process index.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Load every stored entry, oldest first.
    async fn load(&self) -> Result<Vec<MemoryEntry>, StoreError>;

    /// Append one entry.
    async fn append(&self, entry: &MemoryEntry) -> Result<(), StoreError>;
}

/// Volatile backend for tests and ephemeral kernels.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: Mutex<Vec<MemoryEntry>>,
}

impl InMemoryBackend {
    /// Backend pre-seeded with history.
    pub fn with_entries(entries: Vec<MemoryEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    async fn load(&self) -> Result<Vec<MemoryEntry>, StoreError> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .map_err(|e| StoreError::Unavailable(format!("memory backend lock poisoned: {e}")))
    }

    async fn append(&self, entry: &MemoryEntry) -> Result<(), StoreError> {
        self.entries
            .lock()
            .map(|mut entries| entries.push(entry.clone()))
            .map_err(|e| StoreError::Unavailable(format!("memory backend lock poisoned: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Index {
    entries: Vec<MemoryEntry>,
    by_hash: HashMap<String, Vec<usize>>,
}

impl Index {
    fn insert(&mut self, entry: MemoryEntry) {
        let position = self.entries.len();
        self.by_hash
            .entry(entry.action_hash.clone())
            .or_default()
            .push(position);
        self.entries.push(entry);
    }
}

/// Append-only decision history.
pub struct MemoryStore {
    index: RwLock<Index>,
    backend: Arc<dyn MemoryBackend>,
    similarity_threshold: f64,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.len())
            .field("similarity_threshold", &self.similarity_threshold)
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Open the store, loading existing history from the backend.
    ///
    /// A backend that fails to load leaves the store empty.
    pub async fn open(backend: Arc<dyn MemoryBackend>, similarity_threshold: f64) -> Self {
        let mut index = Index::default();
        match backend.load().await {
            Ok(entries) => {
                info!(count = entries.len(), "decision history loaded");
                for entry in entries {
                    index.insert(entry);
                }
            }
            Err(e) => warn!(error = %e, "failed to load decision history, starting empty"),
        }
        Self {
            index: RwLock::new(index),
            backend,
            similarity_threshold,
        }
    }

    /// Volatile store with no prior history.
    pub fn ephemeral(similarity_threshold: f64) -> Self {
        Self {
            index: RwLock::new(Index::default()),
            backend: Arc::new(InMemoryBackend::default()),
            similarity_threshold,
        }
    }

    /// Find the most relevant prior decision for an action.
    ///
    /// Exact hits win over fuzzy ones. Among exact hits a prior block wins,
    /// then the most recent. Among fuzzy hits the highest similarity wins,
    /// with ties going to a prior block.
    pub fn lookup(&self, action: &str) -> Option<MemoryMatch> {
        let index = match self.index.read() {
            Ok(index) => index,
            Err(e) => {
                warn!(error = %e, "decision history lock poisoned, skipping lookup");
                return None;
            }
        };

        let hash = content_hash(action);
        if let Some(positions) = index.by_hash.get(&hash) {
            let hits: Vec<&MemoryEntry> = positions
                .iter()
                .rev()
                .filter_map(|&i| index.entries.get(i))
                .collect();
            let chosen = hits
                .iter()
                .find(|e| e.is_block())
                .or_else(|| hits.first())
                .copied();
            if let Some(entry) = chosen {
                return Some(MemoryMatch {
                    entry: entry.clone(),
                    kind: MatchKind::Exact,
                });
            }
        }

        let tokens = tokenize(action);
        if tokens.is_empty() {
            return None;
        }

        let mut best: Option<(f64, &MemoryEntry)> = None;
        for entry in &index.entries {
            let similarity = jaccard(&tokens, &entry.tokens);
            if similarity < self.similarity_threshold {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_similarity, best_entry)) => {
                    if (similarity - best_similarity).abs() > f64::EPSILON {
                        similarity > best_similarity
                    } else {
                        // Tie: a block outranks, otherwise the newer entry.
                        entry.is_block() || !best_entry.is_block()
                    }
                }
            };
            if better {
                best = Some((similarity, entry));
            }
        }

        best.map(|(similarity, entry)| {
            debug!(similarity, prior = %entry.decision, "fuzzy history hit");
            MemoryMatch {
                entry: entry.clone(),
                kind: MatchKind::Fuzzy { similarity },
            }
        })
    }

    /// Append a decision to history.
    ///
    /// The in-process index always records the entry. A backend failure is
    /// logged and otherwise ignored.
    pub async fn record(&self, entry: MemoryEntry) {
        let persisted = self.backend.append(&entry).await;
        if let Err(e) = persisted {
            warn!(error = %e, action_hash = %entry.action_hash, "failed to persist decision");
        }
        match self.index.write() {
            Ok(mut index) => index.insert(entry),
            Err(e) => warn!(error = %e, "decision history lock poisoned, entry dropped"),
        }
    }

    /// Number of recorded decisions.
    pub fn len(&self) -> usize {
        self.index.read().map_or(0, |index| index.entries.len())
    }

    /// Whether no decision has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decision counts over the whole history.
    pub fn stats(&self) -> MemoryStats {
        let Ok(index) = self.index.read() else {
            return MemoryStats::default();
        };
        let mut stats = MemoryStats::default();
        for entry in &index.entries {
            stats.total = stats.total.saturating_add(1);
            let count = stats
                .by_decision
                .entry(entry.decision.as_str().to_owned())
                .or_insert(0);
            *count = count.saturating_add(1);
        }
        stats
    }
}

/// Jaccard similarity of two word sets.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    f64::from(u32::try_from(shared).unwrap_or(u32::MAX))
        / f64::from(u32::try_from(union).unwrap_or(u32::MAX))
}
