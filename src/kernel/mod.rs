//! Compliance kernel: the single entry point that turns an action into a verdict.
//!
//! [`ComplianceKernel::process`] runs classify, registry query, memory query
//! and decide, then appends to history, all inside two store gates. The gates
//! are released before any external call, so a slow ledger or registry only
//! delays the caller up to the configured timeout and never blocks other
//! evaluations.
//!
//! Gate order is always registry then memory.

pub mod builder;
pub mod verdict;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::classifier::{ClassificationResult, RiskClassifier};
use crate::decision::{Assessment, DecisionEngine, DecisionInput};
use crate::external::{bounded, ExternalError};
use crate::ledger::{AuditRecord, AuditStatus, LedgerSink};
use crate::memory::{MemoryEntry, MemoryStore};
use crate::registry::{PublishStatus, ThreatMatch, ThreatRecord, ThreatRegistry};
use crate::types::{content_hash, ActionRequest, Decision};

pub use self::builder::KernelBuilder;
pub use self::verdict::{HistoryHit, KernelStats, Verdict};

/// Longest accepted action text, in bytes.
pub const MAX_ACTION_BYTES: usize = 16_384;

/// Longest accepted target, in bytes.
pub const MAX_TARGET_BYTES: usize = 4_096;

/// Caller-visible failure of [`ComplianceKernel::process`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// The request was rejected before classification.
    #[error("malformed input: {0}")]
    MalformedInput(String),
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    rejected: AtomicU64,
    blocked: AtomicU64,
    audits_recorded: AtomicU64,
    audit_failures: AtomicU64,
    threats_published: AtomicU64,
    publish_failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// What the publish step has to do for one evaluation.
enum PendingThreat {
    /// Nothing worth sharing.
    None,
    /// The action matched a cached threat; the registry already has it.
    Known(String),
    /// A new block, remembered locally. `fresh` is false when its id was
    /// already cached.
    Candidate { record: ThreatRecord, fresh: bool },
}

/// Outcome of the gated section of one evaluation.
struct Gated {
    classification: ClassificationResult,
    assessment: Assessment,
    history: Option<HistoryHit>,
    registry_hit: Option<ThreatMatch>,
    pending_threat: PendingThreat,
    reasoning: String,
}

/// Orchestrates classifier, stores and decision engine for one agent.
pub struct ComplianceKernel {
    agent_id: String,
    classifier: RiskClassifier,
    engine: DecisionEngine,
    memory: MemoryStore,
    registry: ThreatRegistry,
    ledger: Arc<dyn LedgerSink>,
    publish_threshold: u32,
    external_timeout: Duration,
    registry_gate: Mutex<()>,
    memory_gate: Mutex<()>,
    counters: Counters,
}

impl std::fmt::Debug for ComplianceKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComplianceKernel")
            .field("agent_id", &self.agent_id)
            .field("engine", &self.engine)
            .field("memory", &self.memory)
            .field("registry", &self.registry)
            .field("publish_threshold", &self.publish_threshold)
            .field("external_timeout", &self.external_timeout)
            .finish_non_exhaustive()
    }
}

impl ComplianceKernel {
    /// Start building a kernel that audits to `ledger`.
    pub fn builder(ledger: Arc<dyn LedgerSink>) -> KernelBuilder {
        KernelBuilder::new(ledger)
    }

    /// Evaluate one action.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::MalformedInput`] for empty, whitespace-only or
    /// oversized input. Every other failure degrades into the verdict.
    pub async fn process(&self, request: ActionRequest) -> Result<Verdict, KernelError> {
        if let Err(e) = validate(&request) {
            bump(&self.counters.rejected);
            warn!(error = %e, "request rejected");
            return Err(e);
        }

        let gated = self.decide_and_record(&request).await;
        let decision = gated.assessment.decision;
        let risk_score = gated.assessment.adjusted_score;
        let category = gated.classification.category;

        let publication = self.publish_threat(gated.pending_threat).await;
        let audit = if decision == Decision::AutoApprove {
            AuditStatus::NotRequired
        } else {
            let record = AuditRecord::new(
                &self.agent_id,
                &request,
                decision,
                risk_score,
                category,
                &gated.reasoning,
                publication.clone(),
            );
            self.write_audit(&record).await
        };

        bump(&self.counters.processed);
        if decision == Decision::Block {
            bump(&self.counters.blocked);
            warn!(
                action_hash = %content_hash(&request.action),
                %decision,
                risk_score,
                %category,
                "action blocked"
            );
        } else {
            info!(
                action_hash = %content_hash(&request.action),
                %decision,
                risk_score,
                %category,
                "action evaluated"
            );
        }

        Ok(Verdict {
            allowed: decision.is_allowed(),
            decision,
            risk_score,
            base_score: gated.classification.base_score,
            category,
            reasoning: gated.reasoning,
            alert_level: decision.alert_level(),
            matched_patterns: gated.classification.matched_patterns,
            history: gated.history,
            registry_hit: gated.registry_hit,
            audit,
            publication,
        })
    }

    /// Evaluate an action given as loose parts.
    ///
    /// # Errors
    ///
    /// See [`ComplianceKernel::process`].
    pub async fn process_action(
        &self,
        action: &str,
        target: Option<&str>,
        context: Option<BTreeMap<String, String>>,
    ) -> Result<Verdict, KernelError> {
        self.process(ActionRequest {
            action: action.to_owned(),
            target: target.map(str::to_owned),
            context: context.unwrap_or_default(),
        })
        .await
    }

    /// Pull new records from the shared registry into the local cache.
    ///
    /// # Errors
    ///
    /// Returns [`ExternalError`] if the registry fetch fails or times out.
    pub async fn refresh_registry(&self) -> Result<usize, ExternalError> {
        self.registry.refresh().await
    }

    /// Refresh the registry every `every` until the kernel is dropped.
    pub fn spawn_registry_refresh(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let kernel: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(kernel) = kernel.upgrade() else {
                    debug!("kernel dropped, stopping registry refresh");
                    break;
                };
                if let Err(e) = kernel.refresh_registry().await {
                    warn!(error = %e, "registry refresh failed");
                }
            }
        })
    }

    /// Lifetime counters plus store summaries.
    pub fn stats(&self) -> KernelStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        KernelStats {
            processed: load(&self.counters.processed),
            rejected: load(&self.counters.rejected),
            blocked: load(&self.counters.blocked),
            audits_recorded: load(&self.counters.audits_recorded),
            audit_failures: load(&self.counters.audit_failures),
            threats_published: load(&self.counters.threats_published),
            publish_failures: load(&self.counters.publish_failures),
            memory: self.memory.stats(),
            registry: self.registry.stats(),
        }
    }

    /// Agent identity used on audit records and threat reports.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// The classifier.
    pub fn classifier(&self) -> &RiskClassifier {
        &self.classifier
    }

    /// The decision history.
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// The threat registry client.
    pub fn registry(&self) -> &ThreatRegistry {
        &self.registry
    }

    // -----------------------------------------------------------------------
    // Pipeline steps
    // -----------------------------------------------------------------------

    /// Read both stores, decide, then append. Holds both gates throughout so
    /// two identical concurrent actions cannot both miss history.
    async fn decide_and_record(&self, request: &ActionRequest) -> Gated {
        let classification = self.classifier.classify(&request.action);

        let _registry_gate = self.registry_gate.lock().await;
        let registry_hit = self.registry.query(&request.action);
        let _memory_gate = self.memory_gate.lock().await;
        let memory_hit = self.memory.lookup(&request.action);

        let assessment = self.engine.decide(&DecisionInput {
            category: classification.category,
            base_score: classification.base_score,
            memory_hit: memory_hit.as_ref(),
            registry_hit: registry_hit.as_ref(),
        });

        let mut reasons = vec![classification.reasoning.clone()];
        reasons.extend(assessment.reasons.iter().cloned());
        let reasoning = reasons.join(" | ");

        let pending_threat = match &registry_hit {
            Some(hit) if assessment.registry_override => {
                PendingThreat::Known(hit.record.threat_id.clone())
            }
            _ if assessment.decision == Decision::Block
                && assessment.adjusted_score >= self.publish_threshold =>
            {
                let record = ThreatRecord::from_block(
                    &request.action,
                    &classification,
                    assessment.adjusted_score,
                    &self.agent_id,
                );
                let fresh = self.registry.remember(record.clone()).await;
                PendingThreat::Candidate { record, fresh }
            }
            _ => PendingThreat::None,
        };

        self.memory
            .record(MemoryEntry::new(
                request.action.clone(),
                request.target.clone(),
                assessment.decision,
                assessment.adjusted_score,
                classification.category,
                reasoning.clone(),
            ))
            .await;

        let history = memory_hit.map(|hit| HistoryHit {
            kind: hit.kind,
            prior_decision: hit.entry.decision,
            penalty: assessment.memory_penalty,
        });

        Gated {
            classification,
            assessment,
            history,
            registry_hit,
            pending_threat,
            reasoning,
        }
    }

    async fn publish_threat(&self, pending: PendingThreat) -> PublishStatus {
        let record = match pending {
            PendingThreat::None => return PublishStatus::NotRequired,
            PendingThreat::Known(threat_id) => {
                debug!(%threat_id, "registry hit, not republishing");
                return PublishStatus::AlreadyKnown { threat_id };
            }
            PendingThreat::Candidate { record, fresh: false } => {
                debug!(threat_id = %record.threat_id, "threat already cached, not republishing");
                return PublishStatus::AlreadyKnown {
                    threat_id: record.threat_id,
                };
            }
            PendingThreat::Candidate { record, fresh: true } => record,
        };
        if !self.registry.is_connected() {
            debug!(threat_id = %record.threat_id, "no registry configured, threat kept locally");
            return PublishStatus::Offline {
                threat_id: record.threat_id,
            };
        }
        match self.registry.publish(&record).await {
            Ok(receipt) => {
                bump(&self.counters.threats_published);
                PublishStatus::Published {
                    threat_id: record.threat_id,
                    receipt,
                }
            }
            Err(e) => {
                bump(&self.counters.publish_failures);
                warn!(error = %e, threat_id = %record.threat_id, "threat publication failed");
                PublishStatus::Failed {
                    threat_id: record.threat_id,
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn write_audit(&self, record: &AuditRecord) -> AuditStatus {
        match bounded(self.external_timeout, self.ledger.write(record)).await {
            Ok(receipt) => {
                bump(&self.counters.audits_recorded);
                AuditStatus::Recorded { receipt }
            }
            Err(e) => {
                bump(&self.counters.audit_failures);
                warn!(error = %e, record_id = %record.record_id, "audit write failed");
                AuditStatus::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

fn validate(request: &ActionRequest) -> Result<(), KernelError> {
    if request.action.trim().is_empty() {
        return Err(KernelError::MalformedInput(
            "action text is empty".to_owned(),
        ));
    }
    if request.action.len() > MAX_ACTION_BYTES {
        return Err(KernelError::MalformedInput(format!(
            "action text exceeds {MAX_ACTION_BYTES} bytes"
        )));
    }
    if request.action.contains('\0') {
        return Err(KernelError::MalformedInput(
            "action text contains a NUL byte".to_owned(),
        ));
    }
    if request
        .target
        .as_ref()
        .is_some_and(|t| t.len() > MAX_TARGET_BYTES)
    {
        return Err(KernelError::MalformedInput(format!(
            "target exceeds {MAX_TARGET_BYTES} bytes"
        )));
    }
    Ok(())
}
