//! Controlled tag vocabulary
//!
//! Memories may only carry tags drawn from a closed set. Unknown tags are
//! rejected on write, and derived tags are filtered against the set rather
//! than added to it.

use std::collections::{BTreeSet, HashSet};

use crate::error::{LtmError, Result};

/// Tags known out of the box: categories, memory types and topic tags
pub const DEFAULT_TAGS: &[&str] = &[
    // categories
    "general",
    "work",
    "health",
    "finance",
    "education",
    "entertainment",
    "travel",
    "personal",
    // memory types
    "preference",
    "insight",
    "pattern",
    "fact",
    "goal",
    "habit",
    "routine",
    "relationship",
    "skill",
    "knowledge",
    "explicit_request",
    // topics
    "tool",
    "communication",
    "schedule",
    "meeting",
    "email",
    "calendar",
    "notes",
    "reminder",
    "project",
    "fitness",
    "diet",
    "sleep",
    "family",
    "friends",
    "food",
    "shopping",
    "budget",
    "learning",
    "technology",
];

/// Closed set of allowed tags
#[derive(Debug, Clone)]
pub struct TagVocabulary {
    tags: HashSet<String>,
}

impl Default for TagVocabulary {
    fn default() -> Self {
        Self::new(DEFAULT_TAGS.iter().copied())
    }
}

impl TagVocabulary {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tags: tags
                .into_iter()
                .map(|t| normalize_tag(t.as_ref()))
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains(&normalize_tag(tag))
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Normalize and check caller-supplied tags.
    ///
    /// Returns the sorted, de-duplicated set. Fails when the set is empty or
    /// when any tag is outside the vocabulary.
    pub fn validate<S: AsRef<str>>(&self, tags: &[S]) -> Result<Vec<String>> {
        let normalized: BTreeSet<String> = tags
            .iter()
            .map(|t| normalize_tag(t.as_ref()))
            .filter(|t| !t.is_empty())
            .collect();

        if normalized.is_empty() {
            return Err(LtmError::Validation(
                "a memory needs at least one tag".to_string(),
            ));
        }

        let unknown: Vec<&str> = normalized
            .iter()
            .filter(|t| !self.tags.contains(t.as_str()))
            .map(|t| t.as_str())
            .collect();
        if !unknown.is_empty() {
            return Err(LtmError::Validation(format!(
                "unknown tags: {}",
                unknown.join(", ")
            )));
        }

        Ok(normalized.into_iter().collect())
    }

    /// Keep only known tags, sorted and de-duplicated
    pub fn filter<I, S>(&self, tags: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        tags.into_iter()
            .map(|t| normalize_tag(t.as_ref()))
            .filter(|t| self.tags.contains(t))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Lowercase and trim a tag
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}
