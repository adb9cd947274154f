//! Core types for the memory engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for a memory
pub type MemoryId = i64;

/// Archive reason written by the consolidator
pub const ARCHIVE_CONSOLIDATED: &str = "consolidated";

/// Archive reason written by the lifecycle archival pass
pub const ARCHIVE_LOW_IMPORTANCE_AGED: &str = "low_importance_aged";

/// Actor recorded when the engine itself authors a memory
pub const SYSTEM_ACTOR: &str = "system";

/// Default category when nothing more specific matches
pub const DEFAULT_CATEGORY: &str = "general";

/// A remembered fact, preference or pattern owned by one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier
    pub id: MemoryId,
    /// Exclusive owner
    pub owner_id: String,
    /// Main content of the memory
    pub content: String,
    /// Tags from the controlled vocabulary (sorted, unique, never empty)
    pub tags: Vec<String>,
    /// Memory type classification
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    /// Free-form domain label (e.g. "work", "health", "general")
    pub category: String,
    /// Author-assigned importance (1 - 10)
    pub importance_score: i32,
    /// Confidence in the memory (0.0 - 1.0)
    pub confidence_score: f32,
    /// Derived importance, currently kept equal to `importance_score`
    pub dynamic_importance: f32,
    /// Provenance kind (e.g. "conversation", "tool", "consolidation")
    pub source_type: Option<String>,
    /// Provenance identifier
    pub source_id: Option<String>,
    /// Actor id or "system"
    pub created_by: String,
    /// When the memory was created
    pub created_at: DateTime<Utc>,
    /// When the memory was last modified
    pub last_modified: DateTime<Utc>,
    /// When the memory was last retrieved
    pub last_accessed: Option<DateTime<Utc>>,
    /// When the aging pass last lowered this memory's importance
    #[serde(default)]
    pub last_aged_at: Option<DateTime<Utc>>,
    /// Number of recorded accesses
    #[serde(default)]
    pub access_count: i64,
    /// Memories this one relates to (sorted, unique)
    #[serde(default)]
    pub related_memory_ids: Vec<MemoryId>,
    /// Parent memory for consolidation lineage
    pub parent_memory_id: Option<MemoryId>,
    /// Open-ended extension data
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Archived memories are excluded from retrieval by default
    #[serde(default)]
    pub is_archived: bool,
    /// Why the memory was archived
    pub archive_reason: Option<String>,
    /// Optimistic concurrency counter
    #[serde(default = "default_version")]
    pub version: i64,
}

impl Memory {
    /// Last time the memory was touched: access time, or creation time if never accessed
    pub fn last_touched(&self) -> DateTime<Utc> {
        self.last_accessed.unwrap_or(self.created_at)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

fn default_version() -> i64 {
    1
}

/// Memory type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Preference,
    #[default]
    Insight,
    Pattern,
    Fact,
    Goal,
    Habit,
    Routine,
    Relationship,
    Skill,
    Knowledge,
    ExplicitRequest,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Preference => "preference",
            MemoryType::Insight => "insight",
            MemoryType::Pattern => "pattern",
            MemoryType::Fact => "fact",
            MemoryType::Goal => "goal",
            MemoryType::Habit => "habit",
            MemoryType::Routine => "routine",
            MemoryType::Relationship => "relationship",
            MemoryType::Skill => "skill",
            MemoryType::Knowledge => "knowledge",
            MemoryType::ExplicitRequest => "explicit_request",
        }
    }

    pub fn all() -> &'static [MemoryType] {
        &[
            MemoryType::Preference,
            MemoryType::Insight,
            MemoryType::Pattern,
            MemoryType::Fact,
            MemoryType::Goal,
            MemoryType::Habit,
            MemoryType::Routine,
            MemoryType::Relationship,
            MemoryType::Skill,
            MemoryType::Knowledge,
            MemoryType::ExplicitRequest,
        ]
    }

    /// Human-readable label, e.g. "Explicit Request"
    pub fn label(&self) -> String {
        self.as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "preference" => Ok(MemoryType::Preference),
            "insight" => Ok(MemoryType::Insight),
            "pattern" => Ok(MemoryType::Pattern),
            "fact" => Ok(MemoryType::Fact),
            "goal" => Ok(MemoryType::Goal),
            "habit" => Ok(MemoryType::Habit),
            "routine" => Ok(MemoryType::Routine),
            "relationship" => Ok(MemoryType::Relationship),
            "skill" => Ok(MemoryType::Skill),
            "knowledge" => Ok(MemoryType::Knowledge),
            "explicit_request" | "explicit" => Ok(MemoryType::ExplicitRequest),
            _ => Err(format!("Unknown memory type: {}", s)),
        }
    }
}

/// Kind of situational metadata attached to a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContextType {
    Temporal,
    Spatial,
    Social,
    Environmental,
    Emotional,
    Technical,
    #[default]
    Custom,
}

impl ContextType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextType::Temporal => "temporal",
            ContextType::Spatial => "spatial",
            ContextType::Social => "social",
            ContextType::Environmental => "environmental",
            ContextType::Emotional => "emotional",
            ContextType::Technical => "technical",
            ContextType::Custom => "custom",
        }
    }
}

impl std::str::FromStr for ContextType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "temporal" => Ok(ContextType::Temporal),
            "spatial" => Ok(ContextType::Spatial),
            "social" => Ok(ContextType::Social),
            "environmental" => Ok(ContextType::Environmental),
            "emotional" => Ok(ContextType::Emotional),
            "technical" => Ok(ContextType::Technical),
            "custom" => Ok(ContextType::Custom),
            _ => Err(format!("Unknown context type: {}", s)),
        }
    }
}

/// Structured situational metadata attached to a memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryContext {
    pub id: i64,
    pub memory_id: MemoryId,
    pub context_type: ContextType,
    pub key: String,
    pub value: String,
    pub confidence: f32,
}

/// Context supplied when creating a memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewContext {
    #[serde(default)]
    pub context_type: ContextType,
    pub key: String,
    pub value: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

/// Types of edges between memories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    #[default]
    RelatedTo,
    Supersedes,
    Contradicts,
    Supports,
    DependsOn,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::RelatedTo => "related_to",
            RelationshipType::Supersedes => "supersedes",
            RelationshipType::Contradicts => "contradicts",
            RelationshipType::Supports => "supports",
            RelationshipType::DependsOn => "depends_on",
        }
    }
}

impl std::str::FromStr for RelationshipType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "related_to" | "related" => Ok(RelationshipType::RelatedTo),
            "supersedes" => Ok(RelationshipType::Supersedes),
            "contradicts" => Ok(RelationshipType::Contradicts),
            "supports" => Ok(RelationshipType::Supports),
            "depends_on" => Ok(RelationshipType::DependsOn),
            _ => Err(format!("Unknown relationship type: {}", s)),
        }
    }
}

/// Directed edge between memories, visible from either endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: i64,
    pub source_memory_id: MemoryId,
    pub target_memory_id: MemoryId,
    pub relationship_type: RelationshipType,
    /// Strength of the edge (0.0 - 1.0)
    pub strength: f32,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a relationship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRelationshipInput {
    pub source_memory_id: MemoryId,
    pub target_memory_id: MemoryId,
    #[serde(default)]
    pub relationship_type: RelationshipType,
    #[serde(default = "default_confidence")]
    pub strength: f32,
    pub description: Option<String>,
}

/// One retrieval touch of a memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessLog {
    pub id: i64,
    pub memory_id: MemoryId,
    pub timestamp: DateTime<Utc>,
    pub access_context: Option<String>,
    pub access_method: String,
    pub query: Option<String>,
    pub was_relevant: bool,
    pub relevance_score: Option<f32>,
}

/// Details recorded alongside an access
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessRecord {
    pub access_context: Option<String>,
    pub access_method: String,
    pub query: Option<String>,
    #[serde(default)]
    pub was_relevant: bool,
    pub relevance_score: Option<f32>,
}

impl AccessRecord {
    /// Access made by the retriever for a query
    pub fn retrieval(query: &str, relevance_score: f32, was_relevant: bool) -> Self {
        Self {
            access_context: None,
            access_method: "retrieval".to_string(),
            query: Some(query.to_string()),
            was_relevant,
            relevance_score: Some(relevance_score),
        }
    }

    /// Direct lookup by a caller
    pub fn direct(context: impl Into<String>) -> Self {
        Self {
            access_context: Some(context.into()),
            access_method: "direct".to_string(),
            ..Default::default()
        }
    }
}

/// Input for creating a new memory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateMemoryInput {
    pub owner_id: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Classified from content when omitted
    #[serde(default, alias = "type")]
    pub memory_type: Option<MemoryType>,
    /// Classified from content when omitted
    #[serde(default)]
    pub category: Option<String>,
    pub importance_score: i32,
    #[serde(default = "default_confidence")]
    pub confidence_score: f32,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    /// Defaults to "system"
    pub created_by: Option<String>,
    #[serde(default)]
    pub related_memory_ids: Vec<MemoryId>,
    pub parent_memory_id: Option<MemoryId>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub contexts: Vec<NewContext>,
}

impl CreateMemoryInput {
    /// Minimal input: owner, content, tags and importance
    pub fn new(
        owner_id: impl Into<String>,
        content: impl Into<String>,
        tags: &[&str],
        importance_score: i32,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            content: content.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            importance_score,
            confidence_score: 1.0,
            ..Default::default()
        }
    }
}

/// Input for updating a memory; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateMemoryInput {
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    #[serde(alias = "type")]
    pub memory_type: Option<MemoryType>,
    pub category: Option<String>,
    pub importance_score: Option<i32>,
    pub confidence_score: Option<f32>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub related_memory_ids: Option<Vec<MemoryId>>,
    pub is_archived: Option<bool>,
    /// Use Some(None) to clear the value
    pub archive_reason: Option<Option<String>>,
    /// Reject the update with a conflict unless the stored version matches
    pub expected_version: Option<i64>,
}

/// Options for listing memories
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListOptions {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// Keyset cursor: only memories with a larger id
    pub after_id: Option<MemoryId>,
    /// Match memories carrying any of these tags
    pub tags: Option<Vec<String>>,
    #[serde(alias = "type")]
    pub memory_type: Option<MemoryType>,
    pub category: Option<String>,
    pub min_importance: Option<i32>,
    pub sort_by: Option<SortField>,
    pub sort_order: Option<SortOrder>,
    /// Include archived memories in results (default: false)
    #[serde(default)]
    pub include_archived: bool,
}

/// Filters for user-facing search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    pub limit: Option<i64>,
    pub tags: Option<Vec<String>>,
    #[serde(alias = "type")]
    pub memory_type: Option<MemoryType>,
    pub category: Option<String>,
    pub min_importance: Option<i32>,
    #[serde(default)]
    pub include_archived: bool,
}

impl SearchFilters {
    pub fn as_list_options(&self) -> ListOptions {
        ListOptions {
            limit: self.limit,
            tags: self.tags.clone(),
            memory_type: self.memory_type,
            category: self.category.clone(),
            min_importance: self.min_importance,
            include_archived: self.include_archived,
            sort_by: Some(SortField::Importance),
            ..Default::default()
        }
    }
}

/// Fields to sort by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Id,
    #[default]
    CreatedAt,
    LastModified,
    LastAccessed,
    Importance,
    AccessCount,
}

/// Sort order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Per-owner analytics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub owner_id: String,
    pub total_memories: i64,
    pub active_memories: i64,
    pub archived_memories: i64,
    pub by_type: HashMap<String, i64>,
    pub by_category: HashMap<String, i64>,
    pub avg_importance: Option<f32>,
    pub total_accesses: i64,
    pub total_relationships: i64,
    #[serde(default)]
    pub top_tags: Vec<(String, i64)>,
    #[serde(default)]
    pub most_accessed: Vec<(MemoryId, i64)>,
}

/// Outcome of the lifecycle passes for one owner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleReport {
    pub aged: i64,
    pub archived: i64,
    pub deduplicated: i64,
    /// Set when a deadline stopped the run between pages
    #[serde(default)]
    pub aborted: bool,
}

/// Outcome of a consolidation pass for one owner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub groups_found: i64,
    pub groups_merged: i64,
    pub memories_archived: i64,
    pub merged_ids: Vec<MemoryId>,
    pub skipped_groups: i64,
    #[serde(default)]
    pub aborted: bool,
}

/// How memories are grouped when summarized or formatted.
///
/// Preferences tagged `tool` or `communication` get their own groups; every
/// other memory is grouped by its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayGroup {
    ToolPreference,
    CommunicationStyle,
    Type(MemoryType),
}

impl DisplayGroup {
    pub fn of(memory: &Memory) -> Self {
        if memory.memory_type == MemoryType::Preference {
            if memory.has_tag("tool") {
                return DisplayGroup::ToolPreference;
            }
            if memory.has_tag("communication") {
                return DisplayGroup::CommunicationStyle;
            }
        }
        DisplayGroup::Type(memory.memory_type)
    }

    /// Stable key, e.g. "tool_preference" or "goal"
    pub fn key(&self) -> &'static str {
        match self {
            DisplayGroup::ToolPreference => "tool_preference",
            DisplayGroup::CommunicationStyle => "communication_style",
            DisplayGroup::Type(memory_type) => memory_type.as_str(),
        }
    }

    /// Heading used in formatted context, e.g. "Tool Preferences"
    pub fn heading(&self) -> String {
        match self {
            DisplayGroup::ToolPreference => "Tool Preferences".to_string(),
            DisplayGroup::CommunicationStyle => "Communication Style".to_string(),
            DisplayGroup::Type(memory_type) => memory_type.label(),
        }
    }
}

/// Tool invocation result handed to the learning pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub tool: String,
    pub output: String,
}

impl ToolOutcome {
    pub fn new(tool: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            output: output.into(),
        }
    }
}
