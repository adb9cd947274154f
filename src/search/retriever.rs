//! Smart retriever: relevance-ranked memories for a query

use chrono::Utc;
use tracing::{debug, warn};

use super::scoring::{RelevanceScore, RelevanceScorer};
use crate::error::Result;
use crate::storage::validation::{validate_limit, validate_owner};
use crate::storage::MemoryStore;
use crate::types::{AccessRecord, ListOptions, Memory, SortField, SortOrder};

pub struct SmartRetriever {
    store: MemoryStore,
    scorer: RelevanceScorer,
}

impl SmartRetriever {
    pub fn new(store: MemoryStore, scorer: RelevanceScorer) -> Self {
        Self { store, scorer }
    }

    /// Candidate pool: the owner's most important active memories at or
    /// above the importance floor
    fn candidates(&self, owner_id: &str) -> Result<Vec<Memory>> {
        let config = self.scorer.config();
        self.store.list(
            owner_id,
            &ListOptions {
                limit: Some(config.candidate_pool_size as i64),
                min_importance: Some(config.min_importance),
                sort_by: Some(SortField::Importance),
                sort_order: Some(SortOrder::Desc),
                ..Default::default()
            },
        )
    }

    /// Top `limit` memories with their score breakdown.
    ///
    /// Each returned memory gets an access log row; the returned copies
    /// reflect the new access count and time.
    pub fn get_relevant_scored(
        &self,
        owner_id: &str,
        query: &str,
        limit: i64,
    ) -> Result<Vec<(Memory, RelevanceScore)>> {
        validate_owner(owner_id)?;
        validate_limit(limit)?;

        let candidates = self.candidates(owner_id)?;
        if candidates.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let now = Utc::now();
        let pool = candidates.len();
        let ranked = self.scorer.rank(candidates, query, now);

        let mut results = Vec::with_capacity(limit as usize);
        for (mut memory, score) in ranked.into_iter().take(limit as usize) {
            let record = AccessRecord::retrieval(query, score.total, score.is_relevant());
            match self.store.record_access(memory.id, &record) {
                Ok(()) => {
                    memory.access_count += 1;
                    memory.last_accessed = Some(Utc::now());
                    memory.dynamic_importance = memory.importance_score as f32;
                }
                Err(e) => {
                    // deleted since the pool was read
                    warn!(memory_id = memory.id, error = %e, "could not record retrieval access");
                    continue;
                }
            }
            results.push((memory, score));
        }

        debug!(owner_id, pool, returned = results.len(), "retrieval ranked");
        Ok(results)
    }

    pub fn get_relevant(&self, owner_id: &str, query: &str, limit: i64) -> Result<Vec<Memory>> {
        Ok(self
            .get_relevant_scored(owner_id, query, limit)?
            .into_iter()
            .map(|(memory, _)| memory)
            .collect())
    }
}
