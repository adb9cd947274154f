//! Lexical relevance scoring
//!
//! score = w_tag·tag_overlap + w_content·content_overlap
//!       + w_importance·(importance/10) + w_recency·recency_bucket
//!
//! clamped to [0, 1]. The same scorer ranks retrieval candidates and
//! re-orders memories before they are formatted for injection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::hash::Hash;

use crate::config::RetrievalConfig;
use crate::types::Memory;

/// Lowercased tokens: runs of alphanumerics, `_` and `-`
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

pub fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// |a ∩ b| / |a ∪ b|, or 0 when both sets are empty
pub fn jaccard<T: Eq + Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

/// Per-factor breakdown of a relevance score
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RelevanceScore {
    pub tag_overlap: f32,
    pub content_overlap: f32,
    pub importance: f32,
    pub recency: f32,
    pub total: f32,
}

impl RelevanceScore {
    /// Whether the query matched the memory at all
    pub fn is_relevant(&self) -> bool {
        self.tag_overlap > 0.0 || self.content_overlap > 0.0
    }
}

/// Weighted relevance formula
#[derive(Debug, Clone)]
pub struct RelevanceScorer {
    config: RetrievalConfig,
}

impl RelevanceScorer {
    pub fn new(config: RetrievalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Fraction of the memory's tags that appear as query tokens
    pub fn tag_overlap(memory: &Memory, query_tokens: &HashSet<String>) -> f32 {
        if memory.tags.is_empty() {
            return 0.0;
        }
        let hits = memory
            .tags
            .iter()
            .filter(|tag| query_tokens.contains(tag.as_str()))
            .count();
        hits as f32 / memory.tags.len() as f32
    }

    /// Bucket value for the time since the memory was last touched
    pub fn recency_bucket(&self, last_touched: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
        let age_days = (now - last_touched).num_seconds().max(0) as f64 / 86_400.0;
        self.config
            .recency_buckets
            .iter()
            .find(|bucket| age_days <= bucket.max_days as f64)
            .map(|bucket| bucket.value)
            .unwrap_or(0.0)
    }

    pub fn score(
        &self,
        memory: &Memory,
        query_tokens: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> RelevanceScore {
        let tag_overlap = Self::tag_overlap(memory, query_tokens);
        let content_overlap = jaccard(&token_set(&memory.content), query_tokens);
        let importance = memory.importance_score as f32 / 10.0;
        let recency = self.recency_bucket(memory.last_touched(), now);

        let total = self.config.tag_weight * tag_overlap
            + self.config.content_weight * content_overlap
            + self.config.importance_weight * importance
            + self.config.recency_weight * recency;

        RelevanceScore {
            tag_overlap,
            content_overlap,
            importance,
            recency,
            total: total.clamp(0.0, 1.0),
        }
    }

    /// Score and order memories: score, then importance, then most recent
    /// access, then newest id
    pub fn rank(
        &self,
        memories: Vec<Memory>,
        query: &str,
        now: DateTime<Utc>,
    ) -> Vec<(Memory, RelevanceScore)> {
        let query_tokens = token_set(query);
        let mut scored: Vec<(Memory, RelevanceScore)> = memories
            .into_iter()
            .map(|memory| {
                let score = self.score(&memory, &query_tokens, now);
                (memory, score)
            })
            .collect();

        scored.sort_by(|(a, sa), (b, sb)| compare_ranked(a, sa, b, sb));
        scored
    }
}

fn compare_ranked(a: &Memory, sa: &RelevanceScore, b: &Memory, sb: &RelevanceScore) -> Ordering {
    sb.total
        .total_cmp(&sa.total)
        .then_with(|| b.importance_score.cmp(&a.importance_score))
        .then_with(|| b.last_accessed.cmp(&a.last_accessed))
        .then_with(|| b.id.cmp(&a.id))
}
