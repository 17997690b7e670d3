//! Data-driven category rules and their pattern matchers.
//!
//! A [`CategoryRule`] binds a [`RiskCategory`] to a base score and a set of
//! [`Matcher`]s. The classifier walks rules in registration order, so the
//! order of [`default_rules`] is the classification precedence.

use regex::{Regex, RegexBuilder};

use super::ClassifierError;
use crate::types::RiskCategory;

/// Base scores of the built-in rule table.
pub const READ_ONLY_SCORE: u32 = 5;
/// See [`READ_ONLY_SCORE`].
pub const WRITE_LOCAL_SCORE: u32 = 20;
/// See [`READ_ONLY_SCORE`].
pub const WRITE_NETWORK_SCORE: u32 = 40;
/// See [`READ_ONLY_SCORE`].
pub const FINANCIAL_SCORE: u32 = 65;
/// See [`READ_ONLY_SCORE`].
pub const DESTRUCTIVE_SCORE: u32 = 85;
/// See [`READ_ONLY_SCORE`].
pub const PRIVILEGE_ESCALATION_SCORE: u32 = 90;

/// A labelled, case-insensitive pattern evaluated against normalised text.
#[derive(Debug, Clone)]
pub struct Matcher {
    label: String,
    regex: Regex,
}

impl Matcher {
    /// Compile a matcher from a regular expression.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::InvalidPattern`] if the expression does not compile.
    pub fn regex(label: impl Into<String>, pattern: &str) -> Result<Self, ClassifierError> {
        let label = label.into();
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| ClassifierError::InvalidPattern {
                label: label.clone(),
                source,
            })?;
        Ok(Self { label, regex })
    }

    /// Build a whole-word matcher over a keyword list.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::EmptyKeywords`] if the list has no usable word.
    pub fn keywords(label: impl Into<String>, words: &[&str]) -> Result<Self, ClassifierError> {
        let label = label.into();
        let alternation = words
            .iter()
            .filter(|w| !w.trim().is_empty())
            .map(|w| regex::escape(w.trim()))
            .collect::<Vec<_>>()
            .join("|");
        if alternation.is_empty() {
            return Err(ClassifierError::EmptyKeywords(label));
        }
        Self::regex(label, &format!(r"\b(?:{alternation})\b"))
    }

    /// Label recorded in classification reasoning when this matcher fires.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the matcher fires on the given text.
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// One category's base score and pattern set.
#[derive(Debug, Clone)]
pub struct CategoryRule {
    category: RiskCategory,
    base_score: u32,
    matchers: Vec<Matcher>,
}

impl CategoryRule {
    /// Create a rule, checking the base score lies within the category range.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::BaseScoreOutOfRange`] otherwise.
    pub fn new(
        category: RiskCategory,
        base_score: u32,
        matchers: Vec<Matcher>,
    ) -> Result<Self, ClassifierError> {
        if !category.score_range().contains(&base_score) {
            return Err(ClassifierError::BaseScoreOutOfRange {
                category,
                score: base_score,
            });
        }
        Ok(Self {
            category,
            base_score,
            matchers,
        })
    }

    /// Category assigned when this rule wins.
    pub fn category(&self) -> RiskCategory {
        self.category
    }

    /// Configured base score.
    pub fn base_score(&self) -> u32 {
        self.base_score
    }

    /// Matchers owned by this rule.
    pub fn matchers(&self) -> &[Matcher] {
        &self.matchers
    }

    /// Append another matcher to the rule.
    pub fn push(&mut self, matcher: Matcher) {
        self.matchers.push(matcher);
    }
}

/// Built-in rule table, most severe category first.
pub fn default_rules() -> Vec<CategoryRule> {
    vec![
        builtin(
            RiskCategory::PrivilegeEscalation,
            PRIVILEGE_ESCALATION_SCORE,
            vec![
                Matcher::keywords(
                    "privilege:superuser",
                    &["sudo", "su", "runas", "admin", "root"],
                ),
                Matcher::regex("privilege:chmod_world", r"\bchmod\s+[0-9]*7[0-9]*"),
                Matcher::keywords("privilege:chown", &["chown"]),
                Matcher::keywords("privilege:elevate", &["elevate"]),
            ],
        ),
        builtin(
            RiskCategory::Destructive,
            DESTRUCTIVE_SCORE,
            vec![
                Matcher::regex("destructive:rm_rf", r"\brm\s+-rf"),
                Matcher::keywords(
                    "destructive:delete_verb",
                    &[
                        "delete", "remove", "drop", "truncate", "destroy", "format", "wipe",
                    ],
                ),
                Matcher::keywords(
                    "destructive:disable_verb",
                    &["revoke", "disable", "kill", "terminate"],
                ),
                Matcher::regex("destructive:del_recursive", r"\bdel\s+/s"),
            ],
        ),
        builtin(
            RiskCategory::Financial,
            FINANCIAL_SCORE,
            vec![
                Matcher::keywords(
                    "financial:transfer_verb",
                    &[
                        "transfer",
                        "send",
                        "pay",
                        "transaction",
                        "wallet",
                        "crypto",
                        "sui",
                        "token",
                    ],
                ),
                Matcher::regex("financial:address", r"\b0x[a-f0-9]{40,}"),
                Matcher::keywords(
                    "financial:trade_verb",
                    &["withdraw", "deposit", "swap", "trade"],
                ),
                Matcher::regex("financial:sui_cli", r"\bsui\s+(client|move)\b"),
            ],
        ),
        builtin(
            RiskCategory::WriteNetwork,
            WRITE_NETWORK_SCORE,
            vec![
                Matcher::keywords(
                    "network:send_verb",
                    &["post", "put", "patch", "send", "publish", "upload", "push"],
                ),
                Matcher::regex("network:post_http", r"\bpost\b.*\bhttp"),
                Matcher::regex("network:curl_write", r"\bcurl\b.*-x\s+(post|put|patch)\b"),
                Matcher::regex("network:api_write", r"\bapi\b.*\b(post|send)\b"),
            ],
        ),
        builtin(
            RiskCategory::WriteLocal,
            WRITE_LOCAL_SCORE,
            vec![
                Matcher::keywords(
                    "local:write_verb",
                    &[
                        "write", "create", "edit", "modify", "update", "save", "mkdir", "touch",
                    ],
                ),
                Matcher::regex("local:shell_redirect", r"\b(echo|printf)\b.*>"),
                Matcher::regex("local:source_file", r"\.(txt|json|md|py|js|ts|html|css)$"),
            ],
        ),
        builtin(
            RiskCategory::ReadOnly,
            READ_ONLY_SCORE,
            vec![
                Matcher::keywords(
                    "read:read_verb",
                    &[
                        "read", "get", "fetch", "browse", "view", "list", "show", "display",
                        "query", "search",
                    ],
                ),
                Matcher::keywords("read:shell_read", &["cat", "ls", "dir", "pwd", "echo", "type"]),
                Matcher::regex("read:get_http", r"\bget\b.*\bhttp"),
            ],
        ),
    ]
}

/// Assemble a built-in rule. Patterns are static, so a compile failure only
/// drops that matcher.
fn builtin(
    category: RiskCategory,
    base_score: u32,
    matchers: Vec<Result<Matcher, ClassifierError>>,
) -> CategoryRule {
    CategoryRule {
        category,
        base_score,
        matchers: matchers.into_iter().filter_map(Result::ok).collect(),
    }
}
