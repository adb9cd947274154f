//! Memory engine: the entry point used by an agent orchestrator
//!
//! Wires the store, learning pipeline, batch passes, retriever and context
//! optimizer together from one `LtmConfig`. Per-turn calls (`learn`,
//! `retrieve_context`) never take the owner lock; batch passes do.

use std::time::{Duration, Instant};

use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::config::LtmConfig;
use crate::error::Result;
use crate::intelligence::{
    Classifier, Interaction, LearningPipeline, LifecycleManager, MemoryConsolidator,
};
use crate::search::{ContextOptimizer, RelevanceScorer, SmartRetriever};
use crate::storage::validation::validate_owner;
use crate::storage::{MemoryStore, OwnerLocks, Storage};
use crate::types::*;
use crate::vocabulary::TagVocabulary;

/// Lifecycle and consolidation results for one owner
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MaintenanceReport {
    pub owner_id: String,
    pub lifecycle: LifecycleReport,
    pub consolidation: ConsolidationReport,
}

pub struct MemoryEngine {
    config: LtmConfig,
    store: MemoryStore,
    pipeline: LearningPipeline,
    consolidator: MemoryConsolidator,
    lifecycle: LifecycleManager,
    retriever: SmartRetriever,
    optimizer: ContextOptimizer,
    locks: OwnerLocks,
}

impl MemoryEngine {
    /// Open the database named in `config.storage` and build every component
    pub fn new(config: LtmConfig) -> Result<Self> {
        config.validate()?;
        let storage = Storage::open(config.storage.clone())?;
        if let Some(warning) = storage.storage_mode_warning() {
            warn!("{}", warning);
        }
        Self::with_storage(storage, config)
    }

    /// Engine over a fresh in-memory database
    pub fn open_in_memory(config: LtmConfig) -> Result<Self> {
        config.validate()?;
        Self::with_storage(Storage::open_in_memory()?, config)
    }

    fn with_storage(storage: Storage, config: LtmConfig) -> Result<Self> {
        let vocabulary = TagVocabulary::new(&config.vocabulary);
        let classifier = Classifier::new(&config.learning)?;
        let store = MemoryStore::new(storage, vocabulary, classifier);

        let scorer = RelevanceScorer::new(config.retrieval.clone());
        let pipeline = LearningPipeline::new(store.clone(), &config.learning)?;

        Ok(Self {
            consolidator: MemoryConsolidator::new(store.clone(), config.consolidation.clone()),
            lifecycle: LifecycleManager::new(store.clone(), config.lifecycle.clone()),
            retriever: SmartRetriever::new(store.clone(), scorer.clone()),
            optimizer: ContextOptimizer::new(scorer, config.context.clone()),
            pipeline,
            store,
            config,
            locks: OwnerLocks::new(),
        })
    }

    pub fn config(&self) -> &LtmConfig {
        &self.config
    }

    /// Direct access for management operations (create, get, update, list)
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn optimizer(&self) -> &ContextOptimizer {
        &self.optimizer
    }

    /// Learn from one completed conversation turn. Never fails.
    pub fn learn(
        &self,
        owner_id: &str,
        user_input: &str,
        agent_response: &str,
        tool_result: Option<ToolOutcome>,
    ) -> Vec<Memory> {
        let mut interaction = Interaction::new(owner_id, user_input, agent_response);
        interaction.tool_result = tool_result;
        self.learn_interaction(&interaction)
    }

    pub fn learn_interaction(&self, interaction: &Interaction) -> Vec<Memory> {
        self.pipeline.learn(interaction)
    }

    /// Relevance-ranked memories for a query; `None` uses the configured limit
    pub fn retrieve(&self, owner_id: &str, query: &str, limit: Option<i64>) -> Result<Vec<Memory>> {
        let limit = limit.unwrap_or(self.config.retrieval.default_limit);
        self.retriever.get_relevant(owner_id, query, limit)
    }

    /// Formatted context block for a prompt, or "" when nothing is relevant
    pub fn retrieve_context(&self, owner_id: &str, query: &str, max_length: Option<usize>) -> Result<String> {
        let memories = self.retrieve(owner_id, query, None)?;
        let max_length = max_length.unwrap_or(self.config.context.max_length);
        Ok(self.optimizer.format_for_query(&memories, query, max_length))
    }

    pub fn search(&self, owner_id: &str, query: &str, filters: &SearchFilters) -> Result<Vec<Memory>> {
        self.store.search(owner_id, query, filters)
    }

    /// Hard delete; contexts, relationships and access history go with it
    pub fn delete(&self, owner_id: &str, memory_id: MemoryId) -> Result<()> {
        self.store.delete_owned(owner_id, memory_id)
    }

    pub fn stats(&self, owner_id: &str) -> Result<MemoryStats> {
        self.store.stats(owner_id)
    }

    pub fn consolidate(&self, owner_id: &str) -> Result<ConsolidationReport> {
        self.run_batch("consolidate", owner_id, |deadline| {
            self.consolidator.consolidate(owner_id, deadline)
        })
    }

    pub fn run_lifecycle(&self, owner_id: &str) -> Result<LifecycleReport> {
        self.run_batch("lifecycle", owner_id, |deadline| self.lifecycle.run(owner_id, deadline))
    }

    /// Lifecycle then consolidation for every owner with memories, then a WAL
    /// checkpoint.
    ///
    /// A failing owner is logged and skipped.
    pub fn run_maintenance(&self) -> Result<Vec<MaintenanceReport>> {
        let mut reports = Vec::new();
        for owner_id in self.store.list_owners()? {
            let lifecycle = match self.run_lifecycle(&owner_id) {
                Ok(report) => report,
                Err(e) => {
                    warn!(owner_id = %owner_id, error = %e, "lifecycle pass failed");
                    continue;
                }
            };
            let consolidation = match self.consolidate(&owner_id) {
                Ok(report) => report,
                Err(e) => {
                    warn!(owner_id = %owner_id, error = %e, "consolidation pass failed");
                    ConsolidationReport::default()
                }
            };
            reports.push(MaintenanceReport {
                owner_id,
                lifecycle,
                consolidation,
            });
        }
        self.store.storage().checkpoint()?;
        info!(owners = reports.len(), "maintenance finished");
        Ok(reports)
    }

    fn deadline(&self) -> Option<Instant> {
        match self.config.batch_timeout_ms {
            0 => None,
            ms => Some(Instant::now() + Duration::from_millis(ms)),
        }
    }

    /// Run a batch pass under the owner lock, inside a span carrying a run id
    fn run_batch<T, F>(&self, pass: &'static str, owner_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(Option<Instant>) -> Result<T>,
    {
        validate_owner(owner_id)?;
        let run_id = Uuid::new_v4();
        let span = info_span!("batch_pass", pass, owner_id, %run_id);
        let _entered = span.enter();

        self.locks.with_owner(owner_id, || {
            let started = Instant::now();
            let result = f(self.deadline());
            info!(elapsed_ms = started.elapsed().as_millis() as u64, ok = result.is_ok(), "batch pass done");
            result
        })
    }
}
