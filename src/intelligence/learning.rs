//! Learning pipeline
//!
//! Looks at one finished interaction and decides what, if anything, to
//! remember. Each detector is a strategy object; which ones run is decided by
//! `LearningConfig::detectors`, not by what happens to be available.
//!
//! - Explicit request: the user asked to remember something
//! - Preference: the user made a personal statement ("i prefer", "my habit")
//! - Pattern: a tool call succeeded
//! - Insight: the agent response marks a learning moment

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use super::classifier::{Classifier, PhraseSet};
use crate::config::LearningConfig;
use crate::error::Result;
use crate::storage::MemoryStore;
use crate::types::{CreateMemoryInput, Memory, MemoryType, ToolOutcome, SYSTEM_ACTOR};

/// One completed conversation turn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Interaction {
    pub owner_id: String,
    pub user_input: String,
    pub agent_response: String,
    pub tool_result: Option<ToolOutcome>,
    /// Caller-supplied tags, filtered against the vocabulary
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Interaction {
    pub fn new(
        owner_id: impl Into<String>,
        user_input: impl Into<String>,
        agent_response: impl Into<String>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            user_input: user_input.into(),
            agent_response: agent_response.into(),
            ..Default::default()
        }
    }

    pub fn with_tool_result(mut self, tool_result: ToolOutcome) -> Self {
        self.tool_result = Some(tool_result);
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }
}

/// Which detector produced a draft
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    ExplicitRequest,
    Preference,
    Pattern,
    Insight,
}

impl DetectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::ExplicitRequest => "explicit_request",
            DetectorKind::Preference => "preference",
            DetectorKind::Pattern => "pattern",
            DetectorKind::Insight => "insight",
        }
    }
}

/// A memory a detector wants to store, before category and tags are derived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftMemory {
    pub detector: DetectorKind,
    pub content: String,
    pub memory_type: MemoryType,
    pub importance_score: i32,
    pub confidence_score: f32,
    pub source_type: String,
    /// Tags the detector insists on (e.g. "tool")
    pub tags: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A strategy that turns an interaction into at most one draft
pub trait Detector: Send + Sync {
    fn kind(&self) -> DetectorKind;

    fn detect(&self, interaction: &Interaction, classifier: &Classifier) -> Option<DraftMemory>;
}

/// Importance scaled by how many indicators matched, within the learned range
fn scaled_importance(config: &LearningConfig, matched: usize) -> i32 {
    let steps = matched.saturating_sub(1) as i32;
    (config.min_learned_importance + steps).min(config.max_learned_importance)
}

fn ratio(matched: usize, total: usize) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (matched as f32 / total as f32).clamp(0.0, 1.0)
}

/// Cut to at most `max_chars` characters, preferring a whitespace boundary
pub fn truncate_content(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    match cut.rfind(char::is_whitespace) {
        Some(pos) if pos > 0 => cut[..pos].trim_end().to_string(),
        _ => cut,
    }
}

fn phrase_metadata(key: &str, phrases: &[&str]) -> HashMap<String, serde_json::Value> {
    let mut metadata = HashMap::new();
    metadata.insert(key.to_string(), serde_json::json!(phrases));
    metadata
}

/// "remember this", "don't forget", "important", ...
pub struct ExplicitRequestDetector {
    config: LearningConfig,
    phrases: PhraseSet,
    urgency: PhraseSet,
}

impl ExplicitRequestDetector {
    pub fn new(config: &LearningConfig) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            phrases: PhraseSet::new(&config.explicit_phrases)?,
            urgency: PhraseSet::new(&config.urgency_words)?,
        })
    }
}

impl Detector for ExplicitRequestDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::ExplicitRequest
    }

    fn detect(&self, interaction: &Interaction, _classifier: &Classifier) -> Option<DraftMemory> {
        let matched = self.phrases.matches(&interaction.user_input);
        if matched.is_empty() {
            return None;
        }

        let importance = if self.urgency.any(&interaction.user_input) {
            self.config.explicit_urgent_importance
        } else {
            self.config.explicit_importance
        };

        Some(DraftMemory {
            detector: self.kind(),
            content: truncate_content(&interaction.user_input, self.config.max_content_chars),
            memory_type: MemoryType::ExplicitRequest,
            importance_score: importance,
            confidence_score: self.config.explicit_confidence,
            source_type: "conversation".to_string(),
            tags: vec![],
            metadata: phrase_metadata("matched_phrases", &matched),
        })
    }
}

/// Personal statements in the user input
pub struct PreferenceLearner {
    config: LearningConfig,
    patterns: PhraseSet,
}

impl PreferenceLearner {
    pub fn new(config: &LearningConfig) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            patterns: PhraseSet::new(&config.personal_patterns)?,
        })
    }
}

impl Detector for PreferenceLearner {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Preference
    }

    fn detect(&self, interaction: &Interaction, classifier: &Classifier) -> Option<DraftMemory> {
        let matched = self.patterns.matches(&interaction.user_input);
        if matched.is_empty() {
            return None;
        }

        let content = truncate_content(&interaction.user_input, self.config.max_content_chars);
        let memory_type = classifier.classify_type(&content);

        Some(DraftMemory {
            detector: self.kind(),
            memory_type,
            importance_score: scaled_importance(&self.config, matched.len()),
            confidence_score: ratio(matched.len(), self.patterns.len()),
            source_type: "conversation".to_string(),
            tags: vec![],
            metadata: phrase_metadata("matched_patterns", &matched),
            content,
        })
    }
}

/// Successful tool calls
pub struct PatternLearner {
    config: LearningConfig,
    error_markers: PhraseSet,
}

impl PatternLearner {
    pub fn new(config: &LearningConfig) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            error_markers: PhraseSet::new(&config.error_markers)?,
        })
    }
}

impl Detector for PatternLearner {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Pattern
    }

    fn detect(&self, interaction: &Interaction, _classifier: &Classifier) -> Option<DraftMemory> {
        let outcome = interaction.tool_result.as_ref()?;
        if self.error_markers.any(&outcome.output) {
            debug!(tool = %outcome.tool, "tool result carries an error marker");
            return None;
        }

        let tool = outcome.tool.trim();
        let output = outcome.output.trim();
        // indicators: no error marker, named tool, non-empty output
        let matched = 1 + usize::from(!tool.is_empty()) + usize::from(!output.is_empty());

        let content = if tool.is_empty() {
            format!("Tool call succeeded: {}", output)
        } else if output.is_empty() {
            format!("Used {} successfully", tool)
        } else {
            format!("Used {} successfully: {}", tool, output)
        };

        let mut metadata = HashMap::new();
        if !tool.is_empty() {
            metadata.insert("tool".to_string(), serde_json::json!(tool));
        }

        Some(DraftMemory {
            detector: self.kind(),
            content: truncate_content(&content, self.config.max_content_chars),
            memory_type: MemoryType::Pattern,
            importance_score: scaled_importance(&self.config, matched),
            confidence_score: ratio(matched, 3),
            source_type: "tool".to_string(),
            tags: vec!["tool".to_string()],
            metadata,
        })
    }
}

/// Learning moments in the agent response
pub struct InsightDetector {
    config: LearningConfig,
    phrases: PhraseSet,
}

impl InsightDetector {
    pub fn new(config: &LearningConfig) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            phrases: PhraseSet::new(&config.learning_phrases)?,
        })
    }
}

impl Detector for InsightDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Insight
    }

    fn detect(&self, interaction: &Interaction, _classifier: &Classifier) -> Option<DraftMemory> {
        let matched = self.phrases.matches(&interaction.agent_response);
        if matched.is_empty() {
            return None;
        }

        Some(DraftMemory {
            detector: self.kind(),
            content: truncate_content(&interaction.agent_response, self.config.max_content_chars),
            memory_type: MemoryType::Insight,
            importance_score: scaled_importance(&self.config, matched.len()),
            confidence_score: ratio(matched.len(), self.phrases.len()),
            source_type: "conversation".to_string(),
            tags: vec![],
            metadata: phrase_metadata("matched_phrases", &matched),
        })
    }
}

/// Runs the configured detectors and stores what they find
pub struct LearningPipeline {
    store: MemoryStore,
    detectors: Vec<Box<dyn Detector>>,
}

impl LearningPipeline {
    /// Pipeline with the detectors enabled in `config.detectors`
    pub fn new(store: MemoryStore, config: &LearningConfig) -> Result<Self> {
        let mut detectors: Vec<Box<dyn Detector>> = Vec::new();
        if config.detectors.explicit_request {
            detectors.push(Box::new(ExplicitRequestDetector::new(config)?));
        }
        if config.detectors.preference {
            detectors.push(Box::new(PreferenceLearner::new(config)?));
        }
        if config.detectors.pattern {
            detectors.push(Box::new(PatternLearner::new(config)?));
        }
        if config.detectors.insight {
            detectors.push(Box::new(InsightDetector::new(config)?));
        }
        Ok(Self::with_detectors(store, detectors))
    }

    pub fn with_detectors(store: MemoryStore, detectors: Vec<Box<dyn Detector>>) -> Self {
        Self { store, detectors }
    }

    pub fn detector_kinds(&self) -> Vec<DetectorKind> {
        self.detectors.iter().map(|d| d.kind()).collect()
    }

    /// Drafts for an interaction, without touching the store.
    ///
    /// An explicit request suppresses the personal-statement draft for the
    /// same input, and drafts with identical content collapse to the first.
    pub fn detect(&self, interaction: &Interaction) -> Vec<DraftMemory> {
        let classifier = self.store.classifier();
        let mut drafts: Vec<DraftMemory> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut explicit_fired = false;

        for detector in &self.detectors {
            if explicit_fired && detector.kind() == DetectorKind::Preference {
                continue;
            }
            let Some(draft) = detector.detect(interaction, classifier) else {
                continue;
            };
            if draft.content.is_empty() {
                continue;
            }
            if draft.detector == DetectorKind::ExplicitRequest {
                explicit_fired = true;
            }
            if seen.insert(draft.content.clone()) {
                drafts.push(draft);
            }
        }

        drafts
    }

    /// Category and tags for a draft, ready for the store
    pub fn to_input(&self, owner_id: &str, draft: &DraftMemory, caller_tags: &[String]) -> CreateMemoryInput {
        let classifier = self.store.classifier();
        let category = classifier.classify_category(&draft.content);

        let mut explicit: Vec<String> = caller_tags.to_vec();
        explicit.extend(draft.tags.iter().cloned());
        let tags = classifier.extract_tags(
            &draft.content,
            &explicit,
            draft.memory_type,
            &category,
            self.store.vocabulary(),
        );

        let mut metadata = draft.metadata.clone();
        metadata.insert("detector".to_string(), serde_json::json!(draft.detector.as_str()));

        CreateMemoryInput {
            owner_id: owner_id.to_string(),
            content: draft.content.clone(),
            tags,
            memory_type: Some(draft.memory_type),
            category: Some(category),
            importance_score: draft.importance_score,
            confidence_score: draft.confidence_score,
            source_type: Some(draft.source_type.clone()),
            created_by: Some(SYSTEM_ACTOR.to_string()),
            metadata,
            ..Default::default()
        }
    }

    /// Detect and store. Never fails: storage and validation errors are
    /// logged and count as "nothing learned".
    pub fn learn(&self, interaction: &Interaction) -> Vec<Memory> {
        if interaction.owner_id.trim().is_empty() {
            warn!("learn called without an owner; skipping");
            return vec![];
        }

        let mut created = Vec::new();
        for draft in self.detect(interaction) {
            let input = self.to_input(&interaction.owner_id, &draft, &interaction.tags);
            let memory_type = input.memory_type.unwrap_or_default();
            let category = input.category.clone().unwrap_or_default();

            match self.store.find_active_duplicate(
                &interaction.owner_id,
                memory_type,
                &category,
                &input.content,
            ) {
                Ok(Some(existing)) => {
                    debug!(existing_id = existing, detector = draft.detector.as_str(), "duplicate draft skipped");
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "duplicate check failed; no memory created");
                    continue;
                }
            }

            match self.store.create(&input) {
                Ok(memory) => {
                    debug!(
                        memory_id = memory.id,
                        detector = draft.detector.as_str(),
                        importance = memory.importance_score,
                        "learned memory"
                    );
                    created.push(memory);
                }
                Err(e) => {
                    warn!(error = %e, detector = draft.detector.as_str(), "memory creation failed; continuing");
                }
            }
        }

        created
    }
}
