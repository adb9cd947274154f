//! Lifecycle maintenance: aging, archival and exact-duplicate removal
//!
//! Three independent passes over one owner's active memories, each read in
//! keyset pages so a deadline can stop the run between pages. Every pass is
//! idempotent: running it twice at the same instant changes nothing the
//! second time.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, info};

use super::consolidation::deadline_passed;
use crate::config::LifecycleConfig;
use crate::error::{LtmError, Result};
use crate::storage::{queries, MemoryStore};
use crate::types::*;

pub struct LifecycleManager {
    store: MemoryStore,
    config: LifecycleConfig,
}

/// Survivor candidate for one content string
#[derive(Debug, Clone, Copy)]
struct DuplicateEntry {
    id: MemoryId,
    importance: i32,
    created_at: DateTime<Utc>,
}

impl DuplicateEntry {
    /// Higher importance wins, then the more recent creation, then the newer id
    fn outranks(&self, other: &DuplicateEntry) -> bool {
        (self.importance, self.created_at, self.id) > (other.importance, other.created_at, other.id)
    }
}

impl LifecycleManager {
    pub fn new(store: MemoryStore, config: LifecycleConfig) -> Self {
        Self { store, config }
    }

    /// Run all three passes now
    pub fn run(&self, owner_id: &str, deadline: Option<Instant>) -> Result<LifecycleReport> {
        self.run_at(owner_id, Utc::now(), deadline)
    }

    /// Run all three passes as of `now`. The caller holds the owner lock.
    pub fn run_at(
        &self,
        owner_id: &str,
        now: DateTime<Utc>,
        deadline: Option<Instant>,
    ) -> Result<LifecycleReport> {
        let mut report = LifecycleReport::default();

        report.aborted = self.age(owner_id, now, deadline, &mut report.aged)?;
        if !report.aborted {
            report.aborted = self.archive(owner_id, now, deadline, &mut report.archived)?;
        }
        if !report.aborted {
            report.aborted = self.deduplicate(owner_id, deadline, &mut report.deduplicated)?;
        }

        info!(
            owner_id,
            aged = report.aged,
            archived = report.archived,
            deduplicated = report.deduplicated,
            aborted = report.aborted,
            "lifecycle pass finished"
        );

        Ok(report)
    }

    /// Visit active memories in id order, one page at a time.
    /// Returns true if the deadline stopped the walk.
    fn for_each_page<F>(&self, owner_id: &str, deadline: Option<Instant>, mut f: F) -> Result<bool>
    where
        F: FnMut(Vec<Memory>) -> Result<()>,
    {
        let mut after_id = None;
        loop {
            if deadline_passed(deadline) {
                return Ok(true);
            }
            let page = self.store.list(
                owner_id,
                &ListOptions {
                    limit: Some(self.config.page_size as i64),
                    after_id,
                    sort_by: Some(SortField::Id),
                    sort_order: Some(SortOrder::Asc),
                    ..Default::default()
                },
            )?;
            let full = page.len() == self.config.page_size;
            after_id = page.last().map(|m| m.id);
            if page.is_empty() {
                return Ok(false);
            }
            f(page)?;
            if !full {
                return Ok(false);
            }
        }
    }

    /// Drop importance by one for memories untouched for a whole window.
    /// A memory is aged at most once per window.
    fn age(
        &self,
        owner_id: &str,
        now: DateTime<Utc>,
        deadline: Option<Instant>,
        aged: &mut i64,
    ) -> Result<bool> {
        let window = Duration::days(self.config.aging_window_days);

        self.for_each_page(owner_id, deadline, |page| {
            let due: Vec<&Memory> = page
                .iter()
                .filter(|m| now - m.last_touched() > window)
                .filter(|m| m.last_aged_at.map_or(true, |at| now - at >= window))
                .filter(|m| m.importance_score > 1)
                .collect();
            if due.is_empty() {
                return Ok(());
            }

            let changed = self.store.storage().with_transaction(|conn| {
                let mut changed = 0;
                for memory in &due {
                    if queries::age_memory(conn, memory.id, memory.version, memory.importance_score - 1, now)? {
                        changed += 1;
                    } else {
                        debug!(memory_id = memory.id, "memory changed before aging; skipped");
                    }
                }
                Ok(changed)
            })?;
            *aged += changed;
            Ok(())
        })
    }

    /// Archive old memories whose importance fell below the threshold
    fn archive(
        &self,
        owner_id: &str,
        now: DateTime<Utc>,
        deadline: Option<Instant>,
        archived: &mut i64,
    ) -> Result<bool> {
        let min_age = Duration::days(self.config.archive_age_days);
        let threshold = self.config.archive_importance_below;

        self.for_each_page(owner_id, deadline, |page| {
            let due: Vec<&Memory> = page
                .iter()
                .filter(|m| now - m.created_at > min_age && m.importance_score < threshold)
                .collect();
            if due.is_empty() {
                return Ok(());
            }

            let changed = self.store.storage().with_transaction(|conn| {
                let mut changed = 0;
                for memory in &due {
                    if queries::archive_if_version(
                        conn,
                        memory.id,
                        memory.version,
                        ARCHIVE_LOW_IMPORTANCE_AGED,
                    )? {
                        changed += 1;
                    }
                }
                Ok(changed)
            })?;
            *archived += changed;
            Ok(())
        })
    }

    /// Delete all but one memory per exact content string
    fn deduplicate(&self, owner_id: &str, deadline: Option<Instant>, deduplicated: &mut i64) -> Result<bool> {
        let mut by_content: HashMap<String, Vec<DuplicateEntry>> = HashMap::new();

        let aborted = self.for_each_page(owner_id, deadline, |page| {
            for memory in page {
                by_content.entry(memory.content).or_default().push(DuplicateEntry {
                    id: memory.id,
                    importance: memory.importance_score,
                    created_at: memory.created_at,
                });
            }
            Ok(())
        })?;
        if aborted {
            return Ok(true);
        }

        let mut groups: Vec<Vec<DuplicateEntry>> = by_content
            .into_values()
            .filter(|entries| entries.len() > 1)
            .collect();
        groups.sort_by_key(|entries| entries.iter().map(|e| e.id).min());

        for entries in groups {
            if deadline_passed(deadline) {
                return Ok(true);
            }
            let Some(keep) = entries
                .iter()
                .copied()
                .reduce(|best, e| if e.outranks(&best) { e } else { best })
            else {
                continue;
            };

            let removed = self.store.storage().with_transaction(|conn| {
                let mut removed = 0;
                for entry in entries.iter().filter(|e| e.id != keep.id) {
                    match queries::delete_memory(conn, entry.id) {
                        Ok(()) => removed += 1,
                        Err(LtmError::NotFound(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(removed)
            })?;
            debug!(kept = keep.id, removed, "exact duplicates removed");
            *deduplicated += removed;
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    fn setup() -> (MemoryStore, LifecycleManager) {
        let store = MemoryStore::open_in_memory().unwrap();
        let manager = LifecycleManager::new(store.clone(), LifecycleConfig::default());
        (store, manager)
    }

    fn create(store: &MemoryStore, content: &str, importance: i32) -> Memory {
        store
            .create(&CreateMemoryInput::new("u1", content, &["general"], importance))
            .unwrap()
    }

    /// Move timestamps into the past
    fn backdate(store: &MemoryStore, id: MemoryId, created_days: i64, accessed_days: Option<i64>) {
        let now = Utc::now();
        let created = (now - Duration::days(created_days)).to_rfc3339();
        let accessed = accessed_days.map(|d| (now - Duration::days(d)).to_rfc3339());
        store
            .storage()
            .with_connection(|conn| {
                conn.execute(
                    "UPDATE memories SET created_at = ?, last_accessed = ? WHERE id = ?",
                    params![created, accessed, id],
                )?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_aging_threshold() {
        let (store, manager) = setup();
        let stale = create(&store, "stale", 5);
        let fresh = create(&store, "fresh", 5);
        backdate(&store, stale.id, 40, Some(31));
        backdate(&store, fresh.id, 40, Some(29));

        let report = manager.run("u1", None).unwrap();
        assert_eq!(report.aged, 1);
        assert_eq!(store.get(stale.id).unwrap().importance_score, 4);
        assert_eq!(store.get(stale.id).unwrap().dynamic_importance, 4.0);
        assert_eq!(store.get(fresh.id).unwrap().importance_score, 5);
    }

    #[test]
    fn test_aging_is_idempotent_within_window() {
        let (store, manager) = setup();
        let m = create(&store, "never accessed", 5);
        backdate(&store, m.id, 31, None);

        let now = Utc::now();
        assert_eq!(manager.run_at("u1", now, None).unwrap().aged, 1);
        assert_eq!(manager.run_at("u1", now, None).unwrap().aged, 0);
        assert_eq!(store.get(m.id).unwrap().importance_score, 4);

        let later = now + Duration::days(31);
        assert_eq!(manager.run_at("u1", later, None).unwrap().aged, 1);
        assert_eq!(store.get(m.id).unwrap().importance_score, 3);
    }

    #[test]
    fn test_aging_floors_at_one() {
        let (store, manager) = setup();
        let m = create(&store, "floor", 1);
        backdate(&store, m.id, 10, Some(45));
        let report = manager.run("u1", None).unwrap();
        assert_eq!(report.aged, 0);
        assert_eq!(store.get(m.id).unwrap().importance_score, 1);
    }

    #[test]
    fn test_archival_of_old_low_importance() {
        let (store, manager) = setup();
        let old_low = create(&store, "old and minor", 2);
        let old_high = create(&store, "old but important", 5);
        let new_low = create(&store, "new and minor", 2);
        backdate(&store, old_low.id, 61, Some(1));
        backdate(&store, old_high.id, 61, Some(1));
        backdate(&store, new_low.id, 10, Some(1));

        let report = manager.run("u1", None).unwrap();
        assert_eq!(report.archived, 1);

        let archived = store.get(old_low.id).unwrap();
        assert!(archived.is_archived);
        assert_eq!(archived.archive_reason.as_deref(), Some(ARCHIVE_LOW_IMPORTANCE_AGED));
        assert!(!store.get(old_high.id).unwrap().is_archived);
        assert!(!store.get(new_low.id).unwrap().is_archived);
    }

    #[test]
    fn test_duplicate_removal_keeps_highest_importance() {
        let (store, manager) = setup();
        let low = create(&store, "Dentist on Tuesday", 5);
        let high = create(&store, "Dentist on Tuesday", 7);

        let report = manager.run("u1", None).unwrap();
        assert_eq!(report.deduplicated, 1);
        assert!(matches!(store.get(low.id), Err(LtmError::NotFound(_))));
        assert_eq!(store.get(high.id).unwrap().importance_score, 7);
    }

    #[test]
    fn test_duplicate_tie_keeps_most_recent() {
        let (store, manager) = setup();
        let older = create(&store, "Same words", 5);
        let newer = create(&store, "Same words", 5);
        backdate(&store, older.id, 5, Some(1));
        backdate(&store, newer.id, 2, Some(1));

        manager.run("u1", None).unwrap();
        assert!(store.get(older.id).is_err());
        assert!(store.get(newer.id).is_ok());
    }

    #[test]
    fn test_empty_owner_reports_zero() {
        let (_store, manager) = setup();
        assert_eq!(manager.run("nobody", None).unwrap(), LifecycleReport::default());
    }

    #[test]
    fn test_pages_cover_every_memory() {
        let store = MemoryStore::open_in_memory().unwrap();
        let manager = LifecycleManager::new(
            store.clone(),
            LifecycleConfig {
                page_size: 2,
                ..Default::default()
            },
        );
        for i in 0..5 {
            let m = create(&store, &format!("memory {}", i), 5);
            backdate(&store, m.id, 40, Some(35));
        }
        assert_eq!(manager.run("u1", None).unwrap().aged, 5);
    }
}
