//! Context optimizer: formats ranked memories into a bounded text block
//!
//! Output shape, one section per display group in rank order:
//!
//! ```text
//! **Tool Preferences:** Uses ripgrep for search; Uses jj for version control
//!
//! **Goal:** Run a marathon
//! ```

use chrono::Utc;

use super::scoring::RelevanceScorer;
use crate::config::ContextConfig;
use crate::types::{DisplayGroup, Memory};

const SECTION_SEPARATOR: &str = "\n\n";
const ITEM_SEPARATOR: &str = "; ";

pub struct ContextOptimizer {
    scorer: RelevanceScorer,
    config: ContextConfig,
}

/// A formatted section and where it starts in the joined output (in chars)
struct Section {
    start: usize,
    header_chars: usize,
}

impl ContextOptimizer {
    pub fn new(scorer: RelevanceScorer, config: ContextConfig) -> Self {
        Self { scorer, config }
    }

    fn group_cap(&self, group: DisplayGroup) -> usize {
        match group {
            DisplayGroup::ToolPreference => self.config.max_tool_preferences,
            DisplayGroup::CommunicationStyle => self.config.max_communication_style,
            DisplayGroup::Type(_) => self.config.max_items_per_group,
        }
    }

    /// Format memories ordered by query-independent relevance
    pub fn format_for_injection(&self, memories: &[Memory], max_length: usize) -> String {
        self.format_for_query(memories, "", max_length)
    }

    /// Format memories ordered by relevance to `query`.
    ///
    /// The result never exceeds `max_length` characters and never ends in
    /// the middle of a word or a section header. Empty input gives "".
    pub fn format_for_query(&self, memories: &[Memory], query: &str, max_length: usize) -> String {
        if memories.is_empty() {
            return String::new();
        }

        let ranked = self.scorer.rank(memories.to_vec(), query, Utc::now());

        let mut groups: Vec<(DisplayGroup, Vec<String>)> = Vec::new();
        for (memory, _) in ranked {
            let group = DisplayGroup::of(&memory);
            let index = match groups.iter().position(|(g, _)| *g == group) {
                Some(index) => index,
                None => {
                    groups.push((group, Vec::new()));
                    groups.len() - 1
                }
            };
            let items = &mut groups[index].1;
            let content = memory.content.trim();
            if items.len() < self.group_cap(group) && !content.is_empty() {
                items.push(content.to_string());
            }
        }

        let mut text = String::new();
        let mut sections = Vec::new();
        for (group, items) in groups.iter().filter(|(_, items)| !items.is_empty()) {
            if !text.is_empty() {
                text.push_str(SECTION_SEPARATOR);
            }
            let heading = group.heading();
            sections.push(Section {
                start: text.chars().count(),
                header_chars: heading.chars().count() + 5,
            });
            text.push_str(&format!("**{}:** {}", heading, items.join(ITEM_SEPARATOR)));
        }

        if text.chars().count() <= max_length {
            return text;
        }
        truncate(&text, &sections, max_length)
    }
}

/// Cut `text` to at most `max_length` chars at a sentence end, else at a
/// word boundary, then drop a trailing section left with only its header.
fn truncate(text: &str, sections: &[Section], max_length: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let budget = max_length.min(chars.len());

    let at_boundary = |k: usize| k == chars.len() || chars[k].is_whitespace();

    let sentence_end = (1..=budget)
        .rev()
        .find(|&k| matches!(chars[k - 1], '.' | '!' | '?') && at_boundary(k));
    let word_end = || {
        (1..=budget)
            .rev()
            .find(|&k| at_boundary(k) && !chars[k - 1].is_whitespace())
    };

    let Some(mut cut) = sentence_end.or_else(word_end) else {
        return String::new();
    };

    for section in sections.iter().rev() {
        if section.start >= cut {
            continue;
        }
        // nothing past "**Heading:** " survived
        if cut <= section.start + section.header_chars + 1 {
            cut = section.start;
            continue;
        }
        break;
    }

    let kept: String = chars[..cut].iter().collect();
    kept.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::types::MemoryType;
    use chrono::Duration;
    use std::collections::HashMap;

    fn optimizer() -> ContextOptimizer {
        ContextOptimizer::new(
            RelevanceScorer::new(RetrievalConfig::default()),
            ContextConfig::default(),
        )
    }

    fn memory(id: i64, content: &str, memory_type: MemoryType, tags: &[&str], importance: i32) -> Memory {
        let now = Utc::now();
        Memory {
            id,
            owner_id: "u1".into(),
            content: content.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            memory_type,
            category: "general".into(),
            importance_score: importance,
            confidence_score: 1.0,
            dynamic_importance: importance as f32,
            source_type: None,
            source_id: None,
            created_by: "system".into(),
            created_at: now - Duration::days(90),
            last_modified: now,
            last_accessed: None,
            last_aged_at: None,
            access_count: 0,
            related_memory_ids: vec![],
            parent_memory_id: None,
            metadata: HashMap::new(),
            is_archived: false,
            archive_reason: None,
            version: 1,
        }
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(optimizer().format_for_injection(&[], 800), "");
    }

    #[test]
    fn test_groups_and_templates() {
        let memories = vec![
            memory(3, "Run a marathon", MemoryType::Goal, &["fitness"], 6),
            memory(1, "Uses ripgrep for search", MemoryType::Preference, &["tool"], 8),
            memory(2, "Uses jj for version control", MemoryType::Preference, &["tool"], 7),
        ];
        let text = optimizer().format_for_injection(&memories, 800);
        assert_eq!(
            text,
            "**Tool Preferences:** Uses ripgrep for search; Uses jj for version control\n\n**Goal:** Run a marathon"
        );
    }

    #[test]
    fn test_group_caps() {
        let memories: Vec<Memory> = (1..=4)
            .map(|i| {
                memory(
                    i,
                    &format!("style {}", i),
                    MemoryType::Preference,
                    &["communication"],
                    10 - i as i32,
                )
            })
            .collect();
        let text = optimizer().format_for_injection(&memories, 800);
        assert_eq!(text, "**Communication Style:** style 1; style 2");
    }

    #[test]
    fn test_untagged_preferences_use_type_heading() {
        let memories = vec![memory(1, "Likes tea", MemoryType::Preference, &["food"], 5)];
        assert_eq!(
            optimizer().format_for_injection(&memories, 800),
            "**Preference:** Likes tea"
        );
    }

    #[test]
    fn test_query_reorders_within_group() {
        let memories = vec![
            memory(1, "Prefers dark roast coffee", MemoryType::Fact, &["food"], 9),
            memory(2, "Standup is at nine", MemoryType::Fact, &["meeting"], 5),
        ];
        let text = optimizer().format_for_query(&memories, "meeting time", 800);
        assert_eq!(text, "**Fact:** Standup is at nine; Prefers dark roast coffee");
    }

    #[test]
    fn test_truncates_at_sentence_end() {
        let memories = vec![memory(
            1,
            "First sentence here. Second sentence is longer",
            MemoryType::Insight,
            &["general"],
            5,
        )];
        let text = optimizer().format_for_injection(&memories, 40);
        assert_eq!(text, "**Insight:** First sentence here.");
    }

    #[test]
    fn test_truncates_at_word_boundary() {
        let memories = vec![memory(1, "alpha beta gamma delta", MemoryType::Insight, &["general"], 5)];
        let text = optimizer().format_for_injection(&memories, 24);
        assert_eq!(text, "**Insight:** alpha beta");
    }

    #[test]
    fn test_drops_orphan_header() {
        let memories = vec![
            memory(1, "Likes vim", MemoryType::Preference, &["tool"], 9),
            memory(2, "Ship the release", MemoryType::Goal, &["project"], 5),
        ];
        let text = optimizer().format_for_injection(&memories, 43);
        assert_eq!(text, "**Tool Preferences:** Likes vim");
    }

    #[test]
    fn test_nothing_fits() {
        let memories = vec![memory(1, "x", MemoryType::Insight, &["general"], 5)];
        assert_eq!(optimizer().format_for_injection(&memories, 5), "");
        assert_eq!(optimizer().format_for_injection(&memories, 0), "");
    }
}
