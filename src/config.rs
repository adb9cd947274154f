//! Engine configuration
//!
//! Every tunable threshold lives here and is handed to the component that
//! uses it at construction time. All sections are defaulted so a partial TOML
//! file only needs to name what it overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{LtmError, Result};
use crate::vocabulary::DEFAULT_TAGS;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LtmConfig {
    pub storage: StorageConfig,
    /// Controlled tag vocabulary
    pub vocabulary: Vec<String>,
    pub learning: LearningConfig,
    pub consolidation: ConsolidationConfig,
    pub lifecycle: LifecycleConfig,
    pub retrieval: RetrievalConfig,
    pub context: ContextConfig,
    /// Budget for one batch pass in milliseconds (0 = unbounded)
    pub batch_timeout_ms: u64,
}

impl Default for LtmConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            vocabulary: DEFAULT_TAGS.iter().map(|t| t.to_string()).collect(),
            learning: LearningConfig::default(),
            consolidation: ConsolidationConfig::default(),
            lifecycle: LifecycleConfig::default(),
            retrieval: RetrievalConfig::default(),
            context: ContextConfig::default(),
            batch_timeout_ms: 30_000,
        }
    }
}

impl LtmConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: LtmConfig =
            toml::from_str(s).map_err(|e| LtmError::Config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Reject settings no component can work with
    pub fn validate(&self) -> Result<()> {
        if self.vocabulary.is_empty() {
            return Err(LtmError::Config("vocabulary must not be empty".into()));
        }

        let c = &self.consolidation;
        check_unit("consolidation.tag_similarity_threshold", c.tag_similarity_threshold)?;
        check_unit(
            "consolidation.content_similarity_threshold",
            c.content_similarity_threshold,
        )?;
        if c.page_size == 0 || c.max_items_per_type == 0 {
            return Err(LtmError::Config(
                "consolidation.page_size and max_items_per_type must be positive".into(),
            ));
        }

        let l = &self.lifecycle;
        if l.page_size == 0 {
            return Err(LtmError::Config("lifecycle.page_size must be positive".into()));
        }
        if l.aging_window_days <= 0 || l.archive_age_days <= 0 {
            return Err(LtmError::Config(
                "lifecycle windows must be positive day counts".into(),
            ));
        }

        let r = &self.retrieval;
        check_unit("retrieval.tag_weight", r.tag_weight)?;
        check_unit("retrieval.content_weight", r.content_weight)?;
        check_unit("retrieval.importance_weight", r.importance_weight)?;
        check_unit("retrieval.recency_weight", r.recency_weight)?;
        if r.candidate_pool_size == 0 {
            return Err(LtmError::Config(
                "retrieval.candidate_pool_size must be positive".into(),
            ));
        }
        for bucket in &r.recency_buckets {
            check_unit("retrieval.recency_buckets.value", bucket.value)?;
        }

        check_unit("learning.explicit_confidence", self.learning.explicit_confidence)?;
        if self.learning.min_learned_importance > self.learning.max_learned_importance {
            return Err(LtmError::Config(
                "learning.min_learned_importance exceeds max_learned_importance".into(),
            ));
        }

        Ok(())
    }
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(LtmError::Config(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

/// Configuration for the storage engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to SQLite database
    pub db_path: String,
    /// Storage mode (local or cloud-safe)
    pub storage_mode: StorageMode,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "~/.local/share/ltm/memories.db".to_string(),
            storage_mode: StorageMode::Local,
        }
    }
}

/// Storage mode for SQLite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StorageMode {
    #[default]
    Local,
    CloudSafe,
}

impl std::str::FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "local" => Ok(StorageMode::Local),
            "cloud-safe" => Ok(StorageMode::CloudSafe),
            _ => Err(format!("Unknown storage mode: {}", s)),
        }
    }
}

/// Which learning detectors run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSet {
    pub explicit_request: bool,
    pub preference: bool,
    pub pattern: bool,
    pub insight: bool,
}

impl Default for DetectorSet {
    fn default() -> Self {
        Self {
            explicit_request: true,
            preference: true,
            pattern: true,
            insight: true,
        }
    }
}

/// Configuration for the learning pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub detectors: DetectorSet,
    /// Phrases that mark an explicit request to remember something
    pub explicit_phrases: Vec<String>,
    /// Personal-statement patterns ("i prefer", "i always", ...)
    pub personal_patterns: Vec<String>,
    /// Phrases in the agent response that mark a learning moment
    pub learning_phrases: Vec<String>,
    /// Markers that flag a tool result as failed
    pub error_markers: Vec<String>,
    /// Words that raise an explicit request to the upper importance
    pub urgency_words: Vec<String>,
    pub explicit_importance: i32,
    pub explicit_urgent_importance: i32,
    pub explicit_confidence: f32,
    pub min_learned_importance: i32,
    pub max_learned_importance: i32,
    /// Longest content stored from one interaction, in characters
    pub max_content_chars: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            detectors: DetectorSet::default(),
            explicit_phrases: strings(&[
                "remember this",
                "remember that",
                "don't forget",
                "save this",
                "note this",
                "keep in mind",
                "important",
                "preference",
            ]),
            personal_patterns: strings(&[
                "i prefer",
                "i like",
                "i love",
                "i hate",
                "i always",
                "i never",
                "i usually",
                "i want",
                "my habit",
                "my favorite",
                "my goal",
                "i plan to",
            ]),
            learning_phrases: strings(&["learned", "realized", "now i know", "turns out"]),
            error_markers: strings(&[
                "error",
                "failed",
                "failure",
                "exception",
                "traceback",
                "not found",
                "unauthorized",
            ]),
            urgency_words: strings(&["important", "critical", "always", "never", "must"]),
            explicit_importance: 7,
            explicit_urgent_importance: 8,
            explicit_confidence: 0.9,
            min_learned_importance: 4,
            max_learned_importance: 6,
            max_content_chars: 500,
        }
    }
}

/// Configuration for the consolidator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Tag Jaccard overlap above which two memories are similar
    pub tag_similarity_threshold: f32,
    /// Content-token Jaccard overlap above which two memories are similar
    pub content_similarity_threshold: f32,
    /// Items kept per type in synthesized content
    pub max_items_per_type: usize,
    pub page_size: usize,
    pub max_memories_per_pass: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            tag_similarity_threshold: 0.7,
            content_similarity_threshold: 0.6,
            max_items_per_type: 3,
            page_size: 200,
            max_memories_per_pass: 2000,
        }
    }
}

/// Configuration for the lifecycle manager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Inactivity after which importance drops by one
    pub aging_window_days: i64,
    /// Age after which low-importance memories are archived
    pub archive_age_days: i64,
    /// Archive memories whose importance is strictly below this
    pub archive_importance_below: i32,
    pub page_size: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            aging_window_days: 30,
            archive_age_days: 60,
            archive_importance_below: 3,
            page_size: 200,
        }
    }
}

/// Recency contribution for memories touched within `max_days`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecencyBucket {
    pub max_days: i64,
    pub value: f32,
}

/// Configuration for relevance scoring and the retriever
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub tag_weight: f32,
    pub content_weight: f32,
    pub importance_weight: f32,
    pub recency_weight: f32,
    /// Ascending by `max_days`; the first matching bucket wins
    pub recency_buckets: Vec<RecencyBucket>,
    /// Candidates below this importance are never considered
    pub min_importance: i32,
    pub candidate_pool_size: usize,
    pub default_limit: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            tag_weight: 0.4,
            content_weight: 0.3,
            importance_weight: 0.2,
            recency_weight: 0.1,
            recency_buckets: vec![
                RecencyBucket {
                    max_days: 1,
                    value: 0.1,
                },
                RecencyBucket {
                    max_days: 7,
                    value: 0.05,
                },
                RecencyBucket {
                    max_days: 30,
                    value: 0.02,
                },
            ],
            min_importance: 3,
            candidate_pool_size: 20,
            default_limit: 5,
        }
    }
}

/// Configuration for the context optimizer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_length: usize,
    pub max_tool_preferences: usize,
    pub max_communication_style: usize,
    pub max_items_per_group: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_length: 800,
            max_tool_preferences: 3,
            max_communication_style: 2,
            max_items_per_group: 3,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        LtmConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = LtmConfig::from_toml_str(
            r#"
            batch_timeout_ms = 500

            [consolidation]
            tag_similarity_threshold = 0.8

            [storage]
            db_path = ":memory:"
            storage_mode = "cloud-safe"
            "#,
        )
        .unwrap();

        assert_eq!(config.batch_timeout_ms, 500);
        assert_eq!(config.consolidation.tag_similarity_threshold, 0.8);
        assert_eq!(config.consolidation.content_similarity_threshold, 0.6);
        assert_eq!(config.storage.storage_mode, StorageMode::CloudSafe);
        assert_eq!(config.retrieval.candidate_pool_size, 20);
        assert_eq!(config.context.max_length, 800);
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let err = LtmConfig::from_toml_str(
            r#"
            [retrieval]
            tag_weight = 1.5
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, LtmError::Config(_)));
    }

    #[test]
    fn test_rejects_empty_vocabulary() {
        let config = LtmConfig {
            vocabulary: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_detectors_can_be_disabled() {
        let config = LtmConfig::from_toml_str(
            r#"
            [learning.detectors]
            pattern = false
            "#,
        )
        .unwrap();
        assert!(!config.learning.detectors.pattern);
        assert!(config.learning.detectors.explicit_request);
    }
}
