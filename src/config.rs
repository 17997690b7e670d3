//! Configuration loading and validation.
//!
//! A single `config.toml` under `~/.agent-immune/`. Every section is
//! optional; an empty file yields the default kernel (offline registry,
//! JSON-lines ledger, SQLite state in the config directory).

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::decision::{Thresholds, DEFAULT_CONFIRM_CATEGORIES};
use crate::types::RiskCategory;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Identity stamped on audit records and published threats.
    #[serde(default = "default_agent_id")]
    pub agent_id: String,

    /// Escalate REQUIRE_CONFIRMATION to BLOCK.
    #[serde(default)]
    pub strict: bool,

    /// Decision thresholds.
    #[serde(default)]
    pub thresholds: ThresholdsConfig,

    /// Decision history settings.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Budget for ledger and registry calls.
    #[serde(default)]
    pub external: ExternalConfig,

    /// Audit ledger destination.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Shared threat registry.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Local state database.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Extra classifier patterns.
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent_id: default_agent_id(),
            strict: false,
            thresholds: ThresholdsConfig::default(),
            memory: MemoryConfig::default(),
            external: ExternalConfig::default(),
            ledger: LedgerConfig::default(),
            registry: RegistryConfig::default(),
            storage: StorageConfig::default(),
            classifier: ClassifierConfig::default(),
        }
    }
}

/// Score thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdsConfig {
    /// Lower bound of APPROVE_WITH_LOGGING.
    #[serde(default = "default_approve_with_logging")]
    pub approve_with_logging: u32,

    /// Lower bound of REQUIRE_CONFIRMATION.
    #[serde(default = "default_require_confirmation")]
    pub require_confirmation: u32,

    /// Lower bound of BLOCK.
    #[serde(default = "default_block")]
    pub block: u32,

    /// Added when history shows a prior block.
    #[serde(default = "default_memory_penalty")]
    pub memory_penalty: u32,

    /// Blocks scoring at least this are published to the registry.
    #[serde(default = "default_publish")]
    pub publish: u32,

    /// Categories never decided below REQUIRE_CONFIRMATION.
    #[serde(default = "default_confirm_categories")]
    pub confirm_categories: Vec<RiskCategory>,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            approve_with_logging: default_approve_with_logging(),
            require_confirmation: default_require_confirmation(),
            block: default_block(),
            memory_penalty: default_memory_penalty(),
            publish: default_publish(),
            confirm_categories: default_confirm_categories(),
        }
    }
}

impl ThresholdsConfig {
    /// Decision-engine view of the thresholds.
    pub fn to_thresholds(&self) -> Thresholds {
        Thresholds {
            approve_with_logging: self.approve_with_logging,
            require_confirmation: self.require_confirmation,
            block: self.block,
            memory_penalty: self.memory_penalty,
        }
    }
}

/// Decision history settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    /// Minimum word-overlap similarity for a fuzzy hit.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

/// External call budget.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalConfig {
    /// Timeout for each ledger write and registry call, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Audit ledger destination. An endpoint wins over a file path.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerConfig {
    /// Base URL of an HTTP ledger.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// JSON-lines file. Defaults to `ledger.jsonl` in the config directory.
    #[serde(default)]
    pub jsonl_path: Option<PathBuf>,
}

/// Shared threat registry.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the registry. Offline when unset.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Seconds between background refreshes.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

/// Local state database.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// SQLite file. Defaults to `state.db` in the config directory.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

/// Extra classifier patterns.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClassifierConfig {
    /// Matchers appended to the rule of their category.
    #[serde(default)]
    pub patterns: Vec<PatternConfig>,
}

/// One extra matcher.
#[derive(Debug, Clone, Deserialize)]
pub struct PatternConfig {
    /// Category whose rule receives the matcher.
    pub category: RiskCategory,

    /// Label recorded in reasoning when the matcher fires.
    pub label: String,

    /// Case-insensitive regular expression.
    pub regex: String,
}

impl Config {
    /// Validate that configuration values are within sane bounds.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending value.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.agent_id.trim().is_empty(), "agent_id must not be empty");
        let t = &self.thresholds;
        anyhow::ensure!(
            t.approve_with_logging < t.require_confirmation && t.require_confirmation < t.block,
            "thresholds must be strictly increasing: approve_with_logging < require_confirmation < block"
        );
        anyhow::ensure!(
            t.approve_with_logging > 0,
            "thresholds.approve_with_logging must be > 0"
        );
        anyhow::ensure!(
            self.memory.similarity_threshold > 0.0 && self.memory.similarity_threshold <= 1.0,
            "memory.similarity_threshold must be in (0.0, 1.0]"
        );
        anyhow::ensure!(self.external.timeout_ms > 0, "external.timeout_ms must be > 0");
        anyhow::ensure!(
            self.registry.refresh_interval_secs >= 1,
            "registry.refresh_interval_secs must be >= 1"
        );
        for (name, endpoint) in [
            ("ledger.endpoint", &self.ledger.endpoint),
            ("registry.endpoint", &self.registry.endpoint),
        ] {
            if let Some(endpoint) = endpoint {
                let url = url::Url::parse(endpoint)
                    .with_context(|| format!("{name} is not a valid URL: {endpoint}"))?;
                anyhow::ensure!(
                    matches!(url.scheme(), "http" | "https"),
                    "{name} must use http or https"
                );
            }
        }
        for pattern in &self.classifier.patterns {
            regex::Regex::new(&pattern.regex).with_context(|| {
                format!("classifier pattern {} does not compile", pattern.label)
            })?;
        }
        Ok(())
    }
}

/// Resolved filesystem paths for kernel state.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// Root directory (`~/.agent-immune/`).
    pub root: PathBuf,

    /// Configuration file.
    pub config_toml: PathBuf,

    /// SQLite state database.
    pub state_db: PathBuf,

    /// Default JSON-lines ledger.
    pub ledger_jsonl: PathBuf,

    /// Log directory.
    pub logs_dir: PathBuf,
}

impl RuntimePaths {
    /// Lay out the paths under an arbitrary root.
    pub fn under(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            config_toml: root.join("config.toml"),
            state_db: root.join("state.db"),
            ledger_jsonl: root.join("ledger.jsonl"),
            logs_dir: root.join("logs"),
        }
    }
}

/// Load configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or fails validation.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config at {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Resolve the default config directory (`~/.agent-immune/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".agent-immune"))
}

/// Resolve the runtime paths under the default config directory.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn runtime_paths() -> anyhow::Result<RuntimePaths> {
    Ok(RuntimePaths::under(&config_dir()?))
}

// Default value functions for serde.

fn default_agent_id() -> String {
    "agent".to_owned()
}
fn default_approve_with_logging() -> u32 {
    30
}
fn default_require_confirmation() -> u32 {
    70
}
fn default_block() -> u32 {
    90
}
fn default_memory_penalty() -> u32 {
    20
}
fn default_publish() -> u32 {
    90
}
fn default_confirm_categories() -> Vec<RiskCategory> {
    DEFAULT_CONFIRM_CATEGORIES.to_vec()
}
fn default_similarity_threshold() -> f64 {
    0.5
}
fn default_timeout_ms() -> u64 {
    2000
}
fn default_refresh_interval_secs() -> u64 {
    300
}
