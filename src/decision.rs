//! Threshold-based decision engine.
//!
//! Pure: the same classification, history hit and registry hit always give
//! the same [`Assessment`].
//!
//! Evaluation order: registry override, history penalty, score thresholds,
//! category confirmation floor, strict-mode escalation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::memory::{MatchKind, MemoryMatch};
use crate::registry::{ThreatMatch, ThreatMatchKind};
use crate::types::{Decision, RiskCategory};

/// Score thresholds and the history penalty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Scores at or above this are logged.
    pub approve_with_logging: u32,
    /// Scores at or above this need a human.
    pub require_confirmation: u32,
    /// Scores at or above this are blocked.
    pub block: u32,
    /// Added when history shows a prior block for the same or a similar action.
    pub memory_penalty: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            approve_with_logging: 30,
            require_confirmation: 70,
            block: 90,
            memory_penalty: 20,
        }
    }
}

/// Everything a decision depends on.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    /// Classified category.
    pub category: RiskCategory,
    /// Classifier score, possibly above 100.
    pub base_score: u32,
    /// Best history hit, if any.
    pub memory_hit: Option<&'a MemoryMatch>,
    /// Registry hit, if any.
    pub registry_hit: Option<&'a ThreatMatch>,
}

/// Decision with the score and reasons behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    /// Final decision.
    pub decision: Decision,
    /// Base score plus history penalty. Not clamped.
    pub adjusted_score: u32,
    /// Penalty that was applied.
    pub memory_penalty: u32,
    /// Whether a registry hit forced the block.
    pub registry_override: bool,
    /// Reasons in the order they were applied.
    pub reasons: Vec<String>,
}

/// Categories that never fall below REQUIRE_CONFIRMATION by default.
pub const DEFAULT_CONFIRM_CATEGORIES: [RiskCategory; 1] = [RiskCategory::Financial];

/// Maps scores to decisions.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    thresholds: Thresholds,
    strict: bool,
    confirm_categories: BTreeSet<RiskCategory>,
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new(Thresholds::default(), false)
    }
}

impl DecisionEngine {
    /// Engine with the given thresholds and the default confirmation floor.
    /// Strict mode turns confirmations into blocks.
    pub fn new(thresholds: Thresholds, strict: bool) -> Self {
        Self {
            thresholds,
            strict,
            confirm_categories: DEFAULT_CONFIRM_CATEGORIES.into_iter().collect(),
        }
    }

    /// Replace the categories whose decisions are raised to at least
    /// REQUIRE_CONFIRMATION.
    #[must_use]
    pub fn with_confirm_categories(
        mut self,
        categories: impl IntoIterator<Item = RiskCategory>,
    ) -> Self {
        self.confirm_categories = categories.into_iter().collect();
        self
    }

    /// Categories under the confirmation floor.
    pub fn confirm_categories(&self) -> &BTreeSet<RiskCategory> {
        &self.confirm_categories
    }

    /// Configured thresholds.
    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Whether strict mode is on.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Map a score to a decision, without history, registry or strict mode.
    pub fn threshold_decision(&self, score: u32) -> Decision {
        let t = &self.thresholds;
        if score >= t.block {
            Decision::Block
        } else if score >= t.require_confirmation {
            Decision::RequireConfirmation
        } else if score >= t.approve_with_logging {
            Decision::ApproveWithLogging
        } else {
            Decision::AutoApprove
        }
    }

    /// Decide one action.
    pub fn decide(&self, input: &DecisionInput<'_>) -> Assessment {
        let mut reasons = Vec::new();

        let memory_penalty = match input.memory_hit {
            Some(hit) if hit.is_prior_block() => {
                let how = match hit.kind {
                    MatchKind::Exact => "identical".to_owned(),
                    MatchKind::Fuzzy { similarity } => format!("similar ({similarity:.2})"),
                };
                reasons.push(format!(
                    "{how} action was previously blocked: +{}",
                    self.thresholds.memory_penalty
                ));
                self.thresholds.memory_penalty
            }
            Some(hit) => {
                reasons.push(format!("previously decided {}", hit.entry.decision));
                0
            }
            None => 0,
        };
        let adjusted_score = input.base_score.saturating_add(memory_penalty);

        if let Some(hit) = input.registry_hit {
            let how = match &hit.kind {
                ThreatMatchKind::ExactPattern => "known threat pattern".to_owned(),
                ThreatMatchKind::Signature(label) => format!("shared signature {label}"),
            };
            reasons.push(format!(
                "REGISTRY MATCH {} ({how}, {}): blocked",
                hit.record.threat_id,
                hit.record.severity.as_str()
            ));
            return Assessment {
                decision: Decision::Block,
                adjusted_score,
                memory_penalty,
                registry_override: true,
                reasons,
            };
        }

        let mut decision = self.threshold_decision(adjusted_score);
        reasons.push(format!(
            "{} score {adjusted_score} -> {decision}",
            input.category
        ));
        if decision.is_allowed() && self.confirm_categories.contains(&input.category) {
            decision = Decision::RequireConfirmation;
            reasons.push(format!("{} actions always need confirmation", input.category));
        }
        if self.strict && decision == Decision::RequireConfirmation {
            decision = Decision::Block;
            reasons.push("strict mode: confirmation escalated to block".to_owned());
        }

        Assessment {
            decision,
            adjusted_score,
            memory_penalty,
            registry_override: false,
            reasons,
        }
    }
}
