//! Risk classification of agent actions.
//!
//! [`RiskClassifier::classify`] is a pure function of the action text: it
//! walks the registered [`CategoryRule`]s in precedence order, picks the first
//! rule with a firing matcher, and then applies the injection pass on top.

pub mod injection;
pub mod rules;

use serde::{Deserialize, Serialize};

pub use self::injection::InjectionDetector;
pub use self::rules::{default_rules, CategoryRule, Matcher};
use crate::types::{normalize, RiskCategory};

/// Penalty added to the score when an injection signature fires.
pub const INJECTION_PENALTY: u32 = 30;

/// Score added per additional matcher of the winning rule.
pub const SECONDARY_MATCH_BONUS: u32 = 5;

/// Reasoning recorded when nothing matched.
pub const NO_MATCH_REASONING: &str = "no risk patterns matched";

/// Errors from building a classifier.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    /// A matcher expression failed to compile.
    #[error("invalid pattern {label}: {source}")]
    InvalidPattern {
        /// Matcher label.
        label: String,
        /// Compilation error.
        #[source]
        source: regex::Error,
    },

    /// A rule's base score lies outside its category range.
    #[error("base score {score} outside range of {category}")]
    BaseScoreOutOfRange {
        /// Rule category.
        category: RiskCategory,
        /// Offending score.
        score: u32,
    },

    /// A keyword matcher was built from an empty word list.
    #[error("keyword matcher {0} has no words")]
    EmptyKeywords(String),

    /// No rule is registered for the category.
    #[error("no rule registered for {0}")]
    UnknownCategory(RiskCategory),
}

/// Outcome of classifying one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Winning category (forced to the most severe one on injection).
    pub category: RiskCategory,
    /// Raw score. May exceed 100 once the injection penalty applies.
    pub base_score: u32,
    /// Labels of every matcher that fired, injection signatures first.
    pub matched_patterns: Vec<String>,
    /// Injection signature labels that fired.
    pub injection_signatures: Vec<String>,
    /// Human-readable trace of how the score was reached.
    pub reasoning: String,
}

impl ClassificationResult {
    /// Whether the injection pass fired.
    pub fn injection_detected(&self) -> bool {
        !self.injection_signatures.is_empty()
    }
}

/// Rule-driven risk classifier.
#[derive(Debug, Clone)]
pub struct RiskClassifier {
    rules: Vec<CategoryRule>,
    injection: InjectionDetector,
}

impl Default for RiskClassifier {
    fn default() -> Self {
        Self::new(default_rules(), InjectionDetector::default())
    }
}

impl RiskClassifier {
    /// Build a classifier from rules in precedence order (most severe first).
    pub fn new(rules: Vec<CategoryRule>, injection: InjectionDetector) -> Self {
        Self { rules, injection }
    }

    /// Append a matcher to the rule registered for `category`.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::UnknownCategory`] if no rule covers the category.
    pub fn extend(
        &mut self,
        category: RiskCategory,
        matcher: Matcher,
    ) -> Result<(), ClassifierError> {
        let rule = self
            .rules
            .iter_mut()
            .find(|r| r.category() == category)
            .ok_or(ClassifierError::UnknownCategory(category))?;
        rule.push(matcher);
        Ok(())
    }

    /// The injection detector used by this classifier.
    pub fn injection(&self) -> &InjectionDetector {
        &self.injection
    }

    /// Classify an action. Never fails.
    pub fn classify(&self, action: &str) -> ClassificationResult {
        let text = normalize(action);
        let injection_signatures = self.injection.detect(&text);

        let mut matched_patterns = injection_signatures.clone();
        let mut winner: Option<(&CategoryRule, u32)> = None;
        for rule in &self.rules {
            let before = matched_patterns.len();
            matched_patterns.extend(
                rule.matchers()
                    .iter()
                    .filter(|m| m.is_match(&text))
                    .map(|m| m.label().to_owned()),
            );
            let hits = matched_patterns.len().saturating_sub(before);
            if hits > 0 && winner.is_none() {
                winner = Some((rule, u32::try_from(hits).unwrap_or(u32::MAX)));
            }
        }

        let mut reasons = Vec::new();
        let (mut category, mut score) = match winner {
            Some((rule, hits)) => {
                let extra = hits.saturating_sub(1);
                let ceiling = *rule.category().score_range().end();
                let score = rule
                    .base_score()
                    .saturating_add(extra.saturating_mul(SECONDARY_MATCH_BONUS))
                    .min(ceiling);
                reasons.push(format!(
                    "category {} (base {})",
                    rule.category(),
                    rule.base_score()
                ));
                if extra > 0 {
                    reasons.push(format!(
                        "{extra} secondary match(es) raise score to {score}"
                    ));
                }
                (rule.category(), score)
            }
            None => (RiskCategory::ReadOnly, 0),
        };

        if !injection_signatures.is_empty() {
            let forced = self
                .rules
                .first()
                .map_or(RiskCategory::PrivilegeEscalation, CategoryRule::category);
            let floor = *forced.score_range().start();
            category = forced;
            score = score.max(floor).saturating_add(INJECTION_PENALTY);
            reasons.push(format!(
                "INJECTION DETECTED ({}): forced {forced}, +{INJECTION_PENALTY} to {score}",
                injection_signatures.join(", ")
            ));
        }

        let reasoning = if matched_patterns.is_empty() {
            NO_MATCH_REASONING.to_owned()
        } else {
            reasons.push(format!("matched: {}", matched_patterns.join(", ")));
            reasons.join(" | ")
        };

        ClassificationResult {
            category,
            base_score: score,
            matched_patterns,
            injection_signatures,
            reasoning,
        }
    }
}
