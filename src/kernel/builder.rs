//! Wiring a [`ComplianceKernel`] from parts or from configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{ComplianceKernel, Counters};
use crate::classifier::{Matcher, RiskClassifier};
use crate::config::{runtime_paths, Config};
use crate::db::StateDb;
use crate::decision::{DecisionEngine, Thresholds, DEFAULT_CONFIRM_CATEGORIES};
use crate::ledger::{HttpLedger, JsonlLedger, LedgerSink};
use crate::memory::{InMemoryBackend, MemoryBackend, MemoryStore, DEFAULT_SIMILARITY_THRESHOLD};
use crate::registry::{
    HttpRegistryService, InMemoryThreatCache, OfflineRegistry, RegistryService, ThreatCacheBackend,
    ThreatRegistry,
};
use crate::types::RiskCategory;

/// Default publish threshold.
pub const DEFAULT_PUBLISH_THRESHOLD: u32 = 90;

/// Default budget for each external call.
pub const DEFAULT_EXTERNAL_TIMEOUT: Duration = Duration::from_millis(2000);

/// Step-by-step construction of a [`ComplianceKernel`].
///
/// Unset parts default to volatile in-memory stores and an offline registry.
pub struct KernelBuilder {
    agent_id: String,
    classifier: RiskClassifier,
    thresholds: Thresholds,
    confirm_categories: Vec<RiskCategory>,
    strict: bool,
    publish_threshold: u32,
    similarity_threshold: f64,
    external_timeout: Duration,
    memory_backend: Arc<dyn MemoryBackend>,
    cache_backend: Arc<dyn ThreatCacheBackend>,
    registry_service: Arc<dyn RegistryService>,
    ledger: Arc<dyn LedgerSink>,
}

impl KernelBuilder {
    /// Builder that audits to `ledger`.
    pub fn new(ledger: Arc<dyn LedgerSink>) -> Self {
        Self {
            agent_id: "agent".to_owned(),
            classifier: RiskClassifier::default(),
            thresholds: Thresholds::default(),
            confirm_categories: DEFAULT_CONFIRM_CATEGORIES.to_vec(),
            strict: false,
            publish_threshold: DEFAULT_PUBLISH_THRESHOLD,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            external_timeout: DEFAULT_EXTERNAL_TIMEOUT,
            memory_backend: Arc::new(InMemoryBackend::default()),
            cache_backend: Arc::new(InMemoryThreatCache::default()),
            registry_service: Arc::new(OfflineRegistry),
            ledger,
        }
    }

    /// Identity on audit records and threat reports.
    #[must_use]
    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    /// Replace the classifier.
    #[must_use]
    pub fn classifier(mut self, classifier: RiskClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Replace the decision thresholds.
    #[must_use]
    pub fn thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Categories never decided below REQUIRE_CONFIRMATION.
    #[must_use]
    pub fn confirm_categories(mut self, categories: Vec<RiskCategory>) -> Self {
        self.confirm_categories = categories;
        self
    }

    /// Escalate confirmations to blocks.
    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Minimum adjusted score for publishing a block.
    #[must_use]
    pub fn publish_threshold(mut self, threshold: u32) -> Self {
        self.publish_threshold = threshold;
        self
    }

    /// Minimum similarity for a fuzzy history hit.
    #[must_use]
    pub fn similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Budget for each ledger write and registry call.
    #[must_use]
    pub fn external_timeout(mut self, timeout: Duration) -> Self {
        self.external_timeout = timeout;
        self
    }

    /// Durable decision history.
    #[must_use]
    pub fn memory_backend(mut self, backend: Arc<dyn MemoryBackend>) -> Self {
        self.memory_backend = backend;
        self
    }

    /// Durable threat cache.
    #[must_use]
    pub fn cache_backend(mut self, backend: Arc<dyn ThreatCacheBackend>) -> Self {
        self.cache_backend = backend;
        self
    }

    /// Shared registry service.
    #[must_use]
    pub fn registry_service(mut self, service: Arc<dyn RegistryService>) -> Self {
        self.registry_service = service;
        self
    }

    /// Load both stores and assemble the kernel.
    pub async fn build(self) -> ComplianceKernel {
        let memory = MemoryStore::open(self.memory_backend, self.similarity_threshold).await;
        let registry = ThreatRegistry::open(
            self.cache_backend,
            self.registry_service,
            self.classifier.injection().clone(),
            self.external_timeout,
        )
        .await;
        ComplianceKernel {
            agent_id: self.agent_id,
            classifier: self.classifier,
            engine: DecisionEngine::new(self.thresholds, self.strict)
                .with_confirm_categories(self.confirm_categories),
            memory,
            registry,
            ledger: self.ledger,
            publish_threshold: self.publish_threshold,
            external_timeout: self.external_timeout,
            registry_gate: Mutex::new(()),
            memory_gate: Mutex::new(()),
            counters: Counters::default(),
        }
    }
}

impl ComplianceKernel {
    /// Build a kernel from validated configuration.
    ///
    /// Opens the SQLite state database, picks the HTTP or JSON-lines ledger
    /// and the HTTP or offline registry, and warms the threat cache once.
    /// A failed warm-up is logged; the kernel still starts.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the state database
    /// cannot be opened or the ledger cannot be created.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;
        let timeout = Duration::from_millis(config.external.timeout_ms);

        let mut classifier = RiskClassifier::default();
        for pattern in &config.classifier.patterns {
            let matcher = Matcher::regex(pattern.label.clone(), &pattern.regex)
                .with_context(|| format!("classifier pattern {}", pattern.label))?;
            classifier
                .extend(pattern.category, matcher)
                .with_context(|| format!("classifier pattern {}", pattern.label))?;
        }

        let db_path = match &config.storage.db_path {
            Some(path) => path.clone(),
            None => runtime_paths()?.state_db,
        };
        let db = Arc::new(StateDb::open(&db_path).await?);

        let ledger: Arc<dyn LedgerSink> = match (&config.ledger.endpoint, &config.ledger.jsonl_path) {
            (Some(endpoint), _) => Arc::new(HttpLedger::new(endpoint, timeout)?),
            (None, Some(path)) => Arc::new(JsonlLedger::new(path)?),
            (None, None) => Arc::new(JsonlLedger::new(runtime_paths()?.ledger_jsonl)?),
        };

        let registry_service: Arc<dyn RegistryService> = match &config.registry.endpoint {
            Some(endpoint) => Arc::new(HttpRegistryService::new(endpoint, timeout)?),
            None => Arc::new(OfflineRegistry),
        };

        let kernel = KernelBuilder::new(ledger)
            .agent_id(config.agent_id.clone())
            .classifier(classifier)
            .thresholds(config.thresholds.to_thresholds())
            .confirm_categories(config.thresholds.confirm_categories.clone())
            .strict(config.strict)
            .publish_threshold(config.thresholds.publish)
            .similarity_threshold(config.memory.similarity_threshold)
            .external_timeout(timeout)
            .memory_backend(db.clone())
            .cache_backend(db)
            .registry_service(registry_service)
            .build()
            .await;

        if config.registry.endpoint.is_some() {
            match kernel.refresh_registry().await {
                Ok(added) => info!(added, "threat cache warmed"),
                Err(e) => warn!(error = %e, "threat cache warm-up failed"),
            }
        }

        Ok(kernel)
    }

    /// Build a kernel from configuration and, when a registry endpoint is
    /// set, keep its threat cache fresh every `registry.refresh_interval_secs`.
    ///
    /// The refresh task holds a weak reference and ends once the returned
    /// kernel is dropped.
    ///
    /// # Errors
    ///
    /// Same as [`ComplianceKernel::from_config`].
    pub async fn start(config: &Config) -> anyhow::Result<(Arc<Self>, Option<JoinHandle<()>>)> {
        let kernel = Arc::new(Self::from_config(config).await?);
        let refresh = config.registry.endpoint.as_ref().map(|_| {
            let every = Duration::from_secs(config.registry.refresh_interval_secs);
            info!(every_secs = config.registry.refresh_interval_secs, "registry refresh started");
            kernel.spawn_registry_refresh(every)
        });
        Ok((kernel, refresh))
    }
}
