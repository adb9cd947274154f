//! Content classification: memory type, category and tags
//!
//! Keyword heuristics only. Multi-word phrases come from configuration and
//! are compiled into word-boundary regexes; single-word keyword tables are
//! matched against the content's token set.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::config::LearningConfig;
use crate::error::{LtmError, Result};
use crate::search::scoring::token_set;
use crate::types::{MemoryType, DEFAULT_CATEGORY};
use crate::vocabulary::{normalize_tag, TagVocabulary};

const PREFERENCE_PHRASES: &[&str] = &[
    "prefer",
    "prefers",
    "preferred",
    "want",
    "wants",
    "like",
    "likes",
    "love",
    "loves",
    "favorite",
    "hate",
];

const GOAL_PHRASES: &[&str] = &[
    "goal", "goals", "target", "plan", "plans", "planning", "aim", "objective",
];

/// Domain keywords per category, in tie-break order
static CATEGORY_KEYWORDS: Lazy<Vec<(&'static str, HashSet<&'static str>)>> = Lazy::new(|| {
    vec![
        (
            "work",
            [
                "work", "meeting", "meetings", "project", "deadline", "office", "colleague",
                "colleagues", "boss", "client", "clients", "job", "standup", "team", "report",
            ]
            .into_iter()
            .collect(),
        ),
        (
            "health",
            [
                "health", "exercise", "gym", "doctor", "diet", "sleep", "workout", "run",
                "running", "fitness", "medication", "dentist", "yoga",
            ]
            .into_iter()
            .collect(),
        ),
        (
            "finance",
            [
                "money", "budget", "invest", "investment", "bank", "salary", "expense",
                "expenses", "savings", "tax", "taxes", "bill", "bills",
            ]
            .into_iter()
            .collect(),
        ),
        (
            "education",
            [
                "learn", "learning", "study", "course", "class", "school", "university",
                "exam", "lesson", "lessons", "homework",
            ]
            .into_iter()
            .collect(),
        ),
        (
            "entertainment",
            [
                "movie", "movies", "music", "game", "games", "show", "shows", "tv", "netflix",
                "concert", "podcast", "podcasts", "hobby",
            ]
            .into_iter()
            .collect(),
        ),
        (
            "travel",
            [
                "travel", "trip", "flight", "flights", "hotel", "vacation", "airport",
                "visa", "destination",
            ]
            .into_iter()
            .collect(),
        ),
        (
            "personal",
            [
                "family", "friend", "friends", "birthday", "home", "partner", "kids", "wife",
                "husband", "personal",
            ]
            .into_iter()
            .collect(),
        ),
    ]
});

/// Topic tags derived from keywords
static TOPIC_KEYWORDS: Lazy<Vec<(&'static str, HashSet<&'static str>)>> = Lazy::new(|| {
    let table: &[(&str, &[&str])] = &[
        (
            "tool",
            &[
                "tool", "tools", "app", "apps", "software", "editor", "ide", "vscode", "vim",
                "terminal", "slack", "notion",
            ],
        ),
        (
            "communication",
            &[
                "communication", "message", "messages", "reply", "replies", "tone", "concise",
                "brief", "formal", "casual", "bullet", "bullets", "verbose", "summaries",
            ],
        ),
        ("schedule", &["schedule", "morning", "mornings", "evening", "weekly", "daily"]),
        ("meeting", &["meeting", "meetings", "standup", "call", "calls"]),
        ("email", &["email", "emails", "inbox"]),
        ("calendar", &["calendar", "event", "events", "appointment", "appointments"]),
        ("notes", &["note", "notes"]),
        ("reminder", &["remind", "reminder", "reminders"]),
        ("project", &["project", "projects"]),
        ("fitness", &["gym", "workout", "exercise", "fitness", "run", "running", "yoga"]),
        ("diet", &["diet", "vegetarian", "vegan", "calories"]),
        ("sleep", &["sleep", "bed", "bedtime"]),
        ("family", &["family", "kids", "parents", "wife", "husband"]),
        ("friends", &["friend", "friends"]),
        ("food", &["food", "coffee", "tea", "lunch", "dinner", "breakfast", "cook", "cooking"]),
        ("shopping", &["shop", "shopping", "buy", "order"]),
        ("budget", &["budget", "spending", "expenses"]),
        ("learning", &["learn", "learning", "study", "course"]),
        (
            "technology",
            &["technology", "code", "coding", "programming", "rust", "python", "computer"],
        ),
    ];
    table
        .iter()
        .map(|(tag, words)| (*tag, words.iter().copied().collect()))
        .collect()
});

/// A configured list of phrases compiled to case-insensitive word-boundary regexes
#[derive(Debug, Clone)]
pub struct PhraseSet {
    entries: Vec<(String, Regex)>,
}

impl PhraseSet {
    pub fn new<S: AsRef<str>>(phrases: &[S]) -> Result<Self> {
        let mut entries = Vec::with_capacity(phrases.len());
        for phrase in phrases {
            let phrase = phrase.as_ref().trim().to_lowercase();
            if phrase.is_empty() {
                continue;
            }
            let pattern = format!(r"(?i)\b{}\b", regex::escape(&phrase));
            let regex = Regex::new(&pattern)
                .map_err(|e| LtmError::Config(format!("bad phrase '{}': {}", phrase, e)))?;
            entries.push((phrase, regex));
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Phrases found in `text`, in configuration order
    pub fn matches<'a>(&'a self, text: &str) -> Vec<&'a str> {
        self.entries
            .iter()
            .filter(|(_, regex)| regex.is_match(text))
            .map(|(phrase, _)| phrase.as_str())
            .collect()
    }

    pub fn any(&self, text: &str) -> bool {
        self.entries.iter().any(|(_, regex)| regex.is_match(text))
    }
}

/// Type, category and tags derived for one piece of content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub memory_type: MemoryType,
    pub category: String,
    pub tags: Vec<String>,
}

/// Keyword classifier shared by the store defaults and the learning pipeline
#[derive(Debug, Clone)]
pub struct Classifier {
    explicit: PhraseSet,
    preference: PhraseSet,
    goal: PhraseSet,
}

impl Classifier {
    pub fn new(config: &LearningConfig) -> Result<Self> {
        Ok(Self {
            explicit: PhraseSet::new(&config.explicit_phrases)?,
            preference: PhraseSet::new(PREFERENCE_PHRASES)?,
            goal: PhraseSet::new(GOAL_PHRASES)?,
        })
    }

    /// explicit phrase, then preference, then goal, else insight
    pub fn classify_type(&self, content: &str) -> MemoryType {
        if self.explicit.any(content) {
            MemoryType::ExplicitRequest
        } else if self.preference.any(content) {
            MemoryType::Preference
        } else if self.goal.any(content) {
            MemoryType::Goal
        } else {
            MemoryType::Insight
        }
    }

    /// Category with the most keyword hits; ties go to the earlier category
    pub fn classify_category(&self, content: &str) -> String {
        let tokens = token_set(content);
        let mut best: Option<(&str, usize)> = None;

        for (category, keywords) in CATEGORY_KEYWORDS.iter() {
            let hits = tokens.iter().filter(|t| keywords.contains(t.as_str())).count();
            if hits > 0 && best.map_or(true, |(_, top)| hits > top) {
                best = Some((*category, hits));
            }
        }

        best.map(|(category, _)| category.to_string())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string())
    }

    /// Topic tags whose keywords appear in the content
    pub fn keyword_tags(&self, content: &str) -> Vec<&'static str> {
        let tokens = token_set(content);
        TOPIC_KEYWORDS
            .iter()
            .filter(|(_, keywords)| tokens.iter().any(|t| keywords.contains(t.as_str())))
            .map(|(tag, _)| *tag)
            .collect()
    }

    /// Union of explicit, category, type and keyword tags, limited to the
    /// vocabulary. Falls back to "general" when nothing survives.
    pub fn extract_tags<S: AsRef<str>>(
        &self,
        content: &str,
        explicit_tags: &[S],
        memory_type: MemoryType,
        category: &str,
        vocabulary: &TagVocabulary,
    ) -> Vec<String> {
        let mut candidates: BTreeSet<String> = explicit_tags
            .iter()
            .map(|t| normalize_tag(t.as_ref()))
            .collect();
        candidates.insert(normalize_tag(category));
        candidates.insert(memory_type.as_str().to_string());
        candidates.extend(self.keyword_tags(content).into_iter().map(String::from));

        let tags = vocabulary.filter(candidates);
        if tags.is_empty() {
            vec![DEFAULT_CATEGORY.to_string()]
        } else {
            tags
        }
    }

    pub fn classify<S: AsRef<str>>(
        &self,
        content: &str,
        explicit_tags: &[S],
        vocabulary: &TagVocabulary,
    ) -> Classification {
        let memory_type = self.classify_type(content);
        let category = self.classify_category(content);
        let tags = self.extract_tags(content, explicit_tags, memory_type, &category, vocabulary);
        Classification {
            memory_type,
            category,
            tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::new(&LearningConfig::default()).unwrap()
    }

    #[test]
    fn test_phrase_set_respects_word_boundaries() {
        let phrases = PhraseSet::new(&["important", "i prefer"]).unwrap();
        assert!(phrases.any("This is IMPORTANT."));
        assert!(!phrases.any("importantly, nothing"));
        assert_eq!(phrases.matches("I prefer tea, it is important"), vec!["important", "i prefer"]);
        assert!(phrases.matches("nothing here").is_empty());
    }

    #[test]
    fn test_type_precedence() {
        let c = classifier();
        assert_eq!(
            c.classify_type("Remember this: I prefer tea"),
            MemoryType::ExplicitRequest
        );
        assert_eq!(c.classify_type("I prefer tea"), MemoryType::Preference);
        assert_eq!(c.classify_type("My goal is a marathon"), MemoryType::Goal);
        assert_eq!(c.classify_type("The sky is blue"), MemoryType::Insight);
    }

    #[test]
    fn test_category_by_hit_count() {
        let c = classifier();
        assert_eq!(c.classify_category("Gym and diet before the meeting"), "health");
        assert_eq!(c.classify_category("Book a flight and hotel"), "travel");
        assert_eq!(c.classify_category("The sky is blue"), "general");
        // one hit each: work comes first
        assert_eq!(c.classify_category("meeting at the gym"), "work");
    }

    #[test]
    fn test_extract_tags_filters_vocabulary() {
        let c = classifier();
        let vocab = TagVocabulary::default();
        let tags = c.extract_tags(
            "Use vim for notes",
            &["Spaceship", "technology"],
            MemoryType::Preference,
            "work",
            &vocab,
        );
        assert_eq!(tags, vec!["notes", "preference", "technology", "tool", "work"]);
    }

    #[test]
    fn test_extract_tags_falls_back_to_general() {
        let c = classifier();
        let vocab = TagVocabulary::new(["general"]);
        let empty: [&str; 0] = [];
        let tags = c.extract_tags("vim", &empty, MemoryType::Preference, "work", &vocab);
        assert_eq!(tags, vec!["general"]);
    }
}
