//! Memory consolidation
//!
//! Groups one owner's near-duplicate active memories and replaces each group
//! with a single synthesized memory. Originals are archived, never deleted.
//!
//! Similarity is tag-Jaccard above one threshold or content-token-Jaccard
//! above another. Groups are the connected components of that relation,
//! built with a disjoint-set keyed by memory id, so A~B and B~C put A, B and
//! C together even when A and C are not similar.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::ConsolidationConfig;
use crate::error::{LtmError, Result};
use crate::search::scoring::{jaccard, token_set};
use crate::storage::{queries, MemoryStore};
use crate::types::*;

/// Disjoint-set over memory ids with path compression and union by rank
#[derive(Debug, Default)]
pub struct UnionFind {
    parent: HashMap<MemoryId, MemoryId>,
    rank: HashMap<MemoryId, u32>,
}

impl UnionFind {
    pub fn new<I: IntoIterator<Item = MemoryId>>(ids: I) -> Self {
        let mut uf = Self::default();
        for id in ids {
            uf.parent.insert(id, id);
            uf.rank.insert(id, 0);
        }
        uf
    }

    pub fn find(&mut self, id: MemoryId) -> MemoryId {
        let parent = *self.parent.entry(id).or_insert(id);
        if parent == id {
            return id;
        }
        let root = self.find(parent);
        self.parent.insert(id, root);
        root
    }

    pub fn union(&mut self, a: MemoryId, b: MemoryId) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return;
        }
        let rank_a = self.rank.get(&root_a).copied().unwrap_or(0);
        let rank_b = self.rank.get(&root_b).copied().unwrap_or(0);
        if rank_a < rank_b {
            self.parent.insert(root_a, root_b);
        } else if rank_a > rank_b {
            self.parent.insert(root_b, root_a);
        } else {
            self.parent.insert(root_b, root_a);
            self.rank.insert(root_a, rank_a + 1);
        }
    }

    /// Components as sorted id lists, ordered by their smallest id
    pub fn groups(&mut self) -> Vec<Vec<MemoryId>> {
        let ids: Vec<MemoryId> = self.parent.keys().copied().collect();
        let mut by_root: HashMap<MemoryId, Vec<MemoryId>> = HashMap::new();
        for id in ids {
            let root = self.find(id);
            by_root.entry(root).or_default().push(id);
        }
        let mut groups: Vec<Vec<MemoryId>> = by_root
            .into_values()
            .map(|mut group| {
                group.sort_unstable();
                group
            })
            .collect();
        groups.sort_by_key(|group| group[0]);
        groups
    }
}

enum MergeOutcome {
    Merged(Memory),
    Skipped,
}

pub struct MemoryConsolidator {
    store: MemoryStore,
    config: ConsolidationConfig,
}

impl MemoryConsolidator {
    pub fn new(store: MemoryStore, config: ConsolidationConfig) -> Self {
        Self { store, config }
    }

    /// Tag or content overlap above the configured thresholds
    fn is_similar(
        &self,
        tags: (&HashSet<&str>, &HashSet<&str>),
        tokens: (&HashSet<String>, &HashSet<String>),
    ) -> bool {
        jaccard(tags.0, tags.1) > self.config.tag_similarity_threshold
            || jaccard(tokens.0, tokens.1) > self.config.content_similarity_threshold
    }

    /// Similarity groups of size > 1, each ordered by id
    pub fn find_groups(&self, memories: &[Memory]) -> Vec<Vec<Memory>> {
        let tag_sets: Vec<HashSet<&str>> = memories
            .iter()
            .map(|m| m.tags.iter().map(String::as_str).collect())
            .collect();
        let token_sets: Vec<HashSet<String>> =
            memories.iter().map(|m| token_set(&m.content)).collect();

        let mut uf = UnionFind::new(memories.iter().map(|m| m.id));
        for i in 0..memories.len() {
            for j in (i + 1)..memories.len() {
                if self.is_similar((&tag_sets[i], &tag_sets[j]), (&token_sets[i], &token_sets[j])) {
                    uf.union(memories[i].id, memories[j].id);
                }
            }
        }

        let by_id: HashMap<MemoryId, &Memory> = memories.iter().map(|m| (m.id, m)).collect();
        uf.groups()
            .into_iter()
            .filter(|group| group.len() > 1)
            .map(|group| {
                group
                    .iter()
                    .filter_map(|id| by_id.get(id).map(|m| (*m).clone()))
                    .collect()
            })
            .collect()
    }

    /// Type-by-type summary: "User prefers tools: X, Y | goal: a; b"
    pub fn synthesize_content(&self, group: &[Memory]) -> String {
        let max_items = self.config.max_items_per_type;
        let mut order: Vec<DisplayGroup> = Vec::new();
        let mut members: HashMap<DisplayGroup, Vec<&Memory>> = HashMap::new();
        for memory in group {
            let key = DisplayGroup::of(memory);
            if !members.contains_key(&key) {
                order.push(key);
            }
            members.entry(key).or_default().push(memory);
        }

        order
            .iter()
            .map(|key| {
                let items = &members[key];
                match key {
                    DisplayGroup::ToolPreference => {
                        let mut tools: Vec<String> = Vec::new();
                        for m in items {
                            let tool = match m.metadata.get("tool").and_then(|v| v.as_str()) {
                                Some(tool) => tool.to_string(),
                                None => m.content.trim().to_string(),
                            };
                            if !tools.contains(&tool) {
                                tools.push(tool);
                            }
                        }
                        tools.truncate(max_items);
                        format!("User prefers tools: {}", tools.join(", "))
                    }
                    _ => {
                        let contents: Vec<&str> = items
                            .iter()
                            .map(|m| m.content.trim())
                            .take(max_items)
                            .collect();
                        format!("{}: {}", key.key(), contents.join("; "))
                    }
                }
            })
            .collect::<Vec<_>>()
            .join(" | ")
    }

    /// Create request for the memory that replaces a group
    pub fn merged_input(&self, owner_id: &str, group: &[Memory]) -> CreateMemoryInput {
        let avg = group.iter().map(|m| m.importance_score as f64).sum::<f64>() / group.len() as f64;
        // half-way averages round away from zero: 6.5 -> 7
        let importance = ((avg.round() as i32) + 1).min(10);

        let confidence = group
            .iter()
            .map(|m| m.confidence_score)
            .fold(0.0_f32, f32::max);

        let tags: BTreeSet<String> = group.iter().flat_map(|m| m.tags.iter().cloned()).collect();
        let ids: Vec<MemoryId> = group.iter().map(|m| m.id).collect();

        let mut metadata = HashMap::new();
        metadata.insert("consolidated_from".to_string(), serde_json::json!(ids));

        CreateMemoryInput {
            owner_id: owner_id.to_string(),
            content: self.synthesize_content(group),
            tags: tags.into_iter().collect(),
            memory_type: Some(most_frequent(group.iter().map(|m| m.memory_type)).unwrap_or_default()),
            category: Some(
                most_frequent(group.iter().map(|m| m.category.clone()))
                    .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            ),
            importance_score: importance,
            confidence_score: confidence,
            source_type: Some("consolidation".to_string()),
            created_by: Some(SYSTEM_ACTOR.to_string()),
            related_memory_ids: ids,
            metadata,
            ..Default::default()
        }
    }

    /// Merge one group atomically. Any original that changed since it was
    /// read aborts the whole merge with a conflict.
    fn merge_group(&self, owner_id: &str, group: &[Memory]) -> Result<Memory> {
        let input = self.store.prepare_create(&self.merged_input(owner_id, group))?;

        self.store.storage().with_transaction(|conn| {
            let merged = queries::create_memory(conn, &input)?;
            for original in group {
                if !queries::archive_if_version(
                    conn,
                    original.id,
                    original.version,
                    ARCHIVE_CONSOLIDATED,
                )? {
                    return Err(LtmError::Conflict(format!(
                        "memory {} changed during consolidation",
                        original.id
                    )));
                }
                queries::create_relationship(
                    conn,
                    &CreateRelationshipInput {
                        source_memory_id: merged.id,
                        target_memory_id: original.id,
                        relationship_type: RelationshipType::Supersedes,
                        strength: 1.0,
                        description: Some("consolidated".to_string()),
                    },
                )?;
            }
            Ok(merged)
        })
    }

    /// Current state of a group's members that are still active
    fn reload(&self, owner_id: &str, group: &[Memory]) -> Vec<Memory> {
        group
            .iter()
            .filter_map(|m| self.store.get(m.id).ok())
            .filter(|m| m.owner_id == owner_id && !m.is_archived)
            .collect()
    }

    /// One retry after a conflict, then give up on the group
    fn merge_with_retry(&self, owner_id: &str, group: Vec<Memory>) -> MergeOutcome {
        let group_ids: Vec<MemoryId> = group.iter().map(|m| m.id).collect();
        match self.merge_group(owner_id, &group) {
            Ok(merged) => return MergeOutcome::Merged(merged),
            Err(e) if e.is_retryable() => {
                debug!(group = ?group_ids, error = %e, "consolidation conflict; retrying group");
            }
            Err(e) => {
                warn!(group = ?group_ids, error = %e, "consolidation failed; skipping group");
                return MergeOutcome::Skipped;
            }
        }

        let refreshed = self.reload(owner_id, &group);
        if refreshed.len() < 2 {
            warn!(group = ?group_ids, "group dissolved after conflict; skipping");
            return MergeOutcome::Skipped;
        }

        match self.merge_group(owner_id, &refreshed) {
            Ok(merged) => MergeOutcome::Merged(merged),
            Err(e) => {
                warn!(group = ?group_ids, error = %e, "consolidation retry failed; skipping group");
                MergeOutcome::Skipped
            }
        }
    }

    /// Active memories in id order, page by page, up to the pass limit
    fn load_active(&self, owner_id: &str, deadline: Option<Instant>) -> Result<(Vec<Memory>, bool)> {
        let mut memories = Vec::new();
        let mut after_id = None;
        loop {
            if deadline_passed(deadline) {
                return Ok((memories, true));
            }
            let remaining = self.config.max_memories_per_pass.saturating_sub(memories.len());
            if remaining == 0 {
                break;
            }
            let page = self.store.list(
                owner_id,
                &ListOptions {
                    limit: Some(self.config.page_size.min(remaining) as i64),
                    after_id,
                    sort_by: Some(SortField::Id),
                    sort_order: Some(SortOrder::Asc),
                    ..Default::default()
                },
            )?;
            let full = page.len() == self.config.page_size.min(remaining);
            after_id = page.last().map(|m| m.id);
            memories.extend(page);
            if !full {
                break;
            }
        }
        Ok((memories, false))
    }

    /// Run a consolidation pass for one owner. The caller holds the owner lock.
    pub fn consolidate(&self, owner_id: &str, deadline: Option<Instant>) -> Result<ConsolidationReport> {
        let mut report = ConsolidationReport::default();

        let (memories, aborted) = self.load_active(owner_id, deadline)?;
        if aborted {
            report.aborted = true;
            info!(owner_id, "consolidation aborted while loading");
            return Ok(report);
        }

        let groups = self.find_groups(&memories);
        report.groups_found = groups.len() as i64;

        for group in groups {
            if deadline_passed(deadline) {
                report.aborted = true;
                break;
            }
            let size = group.len() as i64;
            match self.merge_with_retry(owner_id, group) {
                MergeOutcome::Merged(merged) => {
                    report.groups_merged += 1;
                    report.memories_archived += merged.related_memory_ids.len() as i64;
                    report.merged_ids.push(merged.id);
                    debug!(merged_id = merged.id, size, "group consolidated");
                }
                MergeOutcome::Skipped => report.skipped_groups += 1,
            }
        }

        info!(
            owner_id,
            scanned = memories.len(),
            groups_found = report.groups_found,
            groups_merged = report.groups_merged,
            memories_archived = report.memories_archived,
            skipped = report.skipped_groups,
            aborted = report.aborted,
            "consolidation pass finished"
        );

        Ok(report)
    }
}

pub(crate) fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.map_or(false, |d| Instant::now() >= d)
}

/// Most common value; ties go to the value seen first
fn most_frequent<T: Eq + std::hash::Hash + Clone>(values: impl Iterator<Item = T>) -> Option<T> {
    let mut counts: HashMap<T, usize> = HashMap::new();
    let mut order: Vec<T> = Vec::new();
    for value in values {
        let count = counts.entry(value.clone()).or_insert(0);
        if *count == 0 {
            order.push(value);
        }
        *count += 1;
    }
    let mut best: Option<(T, usize)> = None;
    for value in order {
        let count = counts[&value];
        if best.as_ref().map_or(true, |(_, top)| count > *top) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn setup() -> (MemoryStore, MemoryConsolidator) {
        let store = MemoryStore::open_in_memory().unwrap();
        let consolidator = MemoryConsolidator::new(store.clone(), ConsolidationConfig::default());
        (store, consolidator)
    }

    fn create(store: &MemoryStore, content: &str, tags: &[&str], importance: i32, memory_type: MemoryType) -> Memory {
        let mut input = CreateMemoryInput::new("u1", content, tags, importance);
        input.memory_type = Some(memory_type);
        input.category = Some("work".into());
        store.create(&input).unwrap()
    }

    #[test]
    fn test_union_find_is_transitive() {
        let mut uf = UnionFind::new([1, 2, 3, 4]);
        uf.union(1, 2);
        uf.union(2, 3);
        assert_eq!(uf.groups(), vec![vec![1, 2, 3], vec![4]]);
    }

    #[test]
    fn test_transitive_grouping_through_shared_member() {
        let (store, consolidator) = setup();
        // a~b by content, b~c by tags, a and c share nothing
        let a = create(&store, "alpha beta gamma delta", &["travel"], 5, MemoryType::Fact);
        let b = create(&store, "alpha beta gamma delta epsilon", &["work", "meeting"], 5, MemoryType::Fact);
        let c = create(&store, "zeta eta", &["work", "meeting"], 5, MemoryType::Fact);
        let d = create(&store, "unrelated", &["health"], 5, MemoryType::Fact);
        assert!(consolidator.find_groups(&[a.clone(), c.clone()]).is_empty());

        let groups = consolidator.find_groups(&[a.clone(), b.clone(), c.clone(), d]);
        assert_eq!(groups.len(), 1);
        assert_eq!(
            groups[0].iter().map(|m| m.id).collect::<Vec<_>>(),
            vec![a.id, b.id, c.id]
        );
    }

    #[test]
    fn test_merge_of_full_tag_overlap() {
        let (store, consolidator) = setup();
        let a = create(&store, "Standup at nine", &["work"], 6, MemoryType::Fact);
        let b = create(&store, "Retro on fridays", &["work"], 7, MemoryType::Fact);

        let report = consolidator.consolidate("u1", None).unwrap();
        assert_eq!(report.groups_found, 1);
        assert_eq!(report.groups_merged, 1);
        assert_eq!(report.memories_archived, 2);

        let merged = store.get(report.merged_ids[0]).unwrap();
        assert_eq!(merged.related_memory_ids, vec![a.id, b.id]);
        assert_eq!(merged.parent_memory_id, None);
        // round(6.5) + 1
        assert_eq!(merged.importance_score, 8);
        assert_eq!(merged.content, "fact: Standup at nine; Retro on fridays");
        assert_eq!(merged.source_type.as_deref(), Some("consolidation"));
        assert!(!merged.is_archived);

        for id in [a.id, b.id] {
            let original = store.get(id).unwrap();
            assert!(original.is_archived);
            assert_eq!(original.archive_reason.as_deref(), Some(ARCHIVE_CONSOLIDATED));
        }

        let edges = store.get_relationships(merged.id).unwrap();
        assert_eq!(edges.len(), 2);
        assert!(edges
            .iter()
            .all(|e| e.relationship_type == RelationshipType::Supersedes));

        let active = store.list("u1", &ListOptions::default()).unwrap();
        assert_eq!(active.len(), 1);
    }

    #[test]
    fn test_singletons_untouched() {
        let (store, consolidator) = setup();
        let a = create(&store, "Likes hiking", &["travel"], 5, MemoryType::Preference);
        create(&store, "Budget is tight", &["finance"], 5, MemoryType::Fact);

        let report = consolidator.consolidate("u1", None).unwrap();
        assert_eq!(report, ConsolidationReport::default());
        assert!(!store.get(a.id).unwrap().is_archived);
    }

    #[test]
    fn test_tool_preference_summary_and_caps() {
        let (store, consolidator) = setup();
        let mut group = Vec::new();
        for (tool, content) in [("vim", "Uses vim"), ("tmux", "Uses tmux"), ("zsh", "Uses zsh"), ("git", "Uses git")] {
            let mut input = CreateMemoryInput::new("u1", content, &["preference", "tool"], 5);
            input.memory_type = Some(MemoryType::Preference);
            input.metadata.insert("tool".into(), serde_json::json!(tool));
            group.push(store.create(&input).unwrap());
        }
        group.push(create(&store, "Ship v2", &["goal"], 5, MemoryType::Goal));

        assert_eq!(
            consolidator.synthesize_content(&group),
            "User prefers tools: vim, tmux, zsh | goal: Ship v2"
        );
    }

    #[test]
    fn test_stale_group_conflicts_then_retries() {
        let (store, consolidator) = setup();
        let a = create(&store, "Standup at nine", &["work"], 5, MemoryType::Fact);
        let b = create(&store, "Retro on fridays", &["work"], 5, MemoryType::Fact);
        let stale = vec![a.clone(), b.clone()];

        store
            .update(
                b.id,
                &UpdateMemoryInput {
                    content: Some("Retro on thursdays".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let err = consolidator.merge_group("u1", &stale).unwrap_err();
        assert!(matches!(err, LtmError::Conflict(_)));
        // rolled back: nothing archived, nothing created
        assert_eq!(store.count("u1").unwrap(), 2);
        assert!(!store.get(a.id).unwrap().is_archived);

        match consolidator.merge_with_retry("u1", stale) {
            MergeOutcome::Merged(merged) => {
                assert!(merged.content.contains("thursdays"));
            }
            MergeOutcome::Skipped => panic!("retry should merge the refreshed group"),
        }
    }

    #[test]
    fn test_expired_deadline_aborts_cleanly() {
        let (store, consolidator) = setup();
        create(&store, "Standup at nine", &["work"], 5, MemoryType::Fact);
        create(&store, "Retro on fridays", &["work"], 5, MemoryType::Fact);

        let report = consolidator.consolidate("u1", Some(Instant::now())).unwrap();
        assert!(report.aborted);
        assert_eq!(report.groups_merged, 0);
        assert_eq!(store.list("u1", &ListOptions::default()).unwrap().len(), 2);
    }

    #[test]
    fn test_most_frequent_prefers_first_on_tie() {
        assert_eq!(most_frequent(["b", "a", "a", "b"].into_iter()), Some("b"));
        assert_eq!(most_frequent(["b", "a", "a"].into_iter()), Some("a"));
        assert_eq!(most_frequent(std::iter::empty::<&str>()), None);
    }
}
