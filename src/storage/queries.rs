//! Database queries for memory operations
//!
//! Free functions over a borrowed connection so callers can compose them
//! inside one transaction. None of them validate input; that happens in
//! `storage::validation` before any of these run.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::error::{LtmError, Result};
use crate::types::*;

/// Columns selected for every memory read, aliased through `m`
const MEMORY_COLUMNS: &str = "m.id, m.owner_id, m.content, m.memory_type, m.category,
    m.importance_score, m.confidence_score, m.dynamic_importance, m.source_type,
    m.source_id, m.created_by, m.created_at, m.last_modified, m.last_accessed,
    m.last_aged_at, m.access_count, m.related_memory_ids, m.parent_memory_id,
    m.metadata, m.is_archived, m.archive_reason, m.version";

/// Parse a memory from a database row
pub fn memory_from_row(row: &Row) -> rusqlite::Result<Memory> {
    let memory_type_str: String = row.get("memory_type")?;
    let created_at: String = row.get("created_at")?;
    let last_modified: String = row.get("last_modified")?;
    let last_accessed: Option<String> = row.get("last_accessed")?;
    let last_aged_at: Option<String> = row.get("last_aged_at")?;
    let related_str: String = row.get("related_memory_ids")?;
    let metadata_str: String = row.get("metadata")?;
    let is_archived: i32 = row.get("is_archived")?;

    let related_memory_ids: Vec<MemoryId> = serde_json::from_str(&related_str).unwrap_or_default();
    let metadata: HashMap<String, serde_json::Value> =
        serde_json::from_str(&metadata_str).unwrap_or_default();

    Ok(Memory {
        id: row.get("id")?,
        owner_id: row.get("owner_id")?,
        content: row.get("content")?,
        tags: vec![], // Loaded separately
        memory_type: memory_type_str.parse().unwrap_or_default(),
        category: row.get("category")?,
        importance_score: row.get("importance_score")?,
        confidence_score: row.get("confidence_score")?,
        dynamic_importance: row.get("dynamic_importance")?,
        source_type: row.get("source_type")?,
        source_id: row.get("source_id")?,
        created_by: row.get("created_by")?,
        created_at: parse_datetime(&created_at),
        last_modified: parse_datetime(&last_modified),
        last_accessed: last_accessed.as_deref().and_then(parse_datetime_opt),
        last_aged_at: last_aged_at.as_deref().and_then(parse_datetime_opt),
        access_count: row.get("access_count")?,
        related_memory_ids,
        parent_memory_id: row.get("parent_memory_id")?,
        metadata,
        is_archived: is_archived != 0,
        archive_reason: row.get("archive_reason")?,
        version: row.get("version")?,
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    parse_datetime_opt(s).unwrap_or_else(Utc::now)
}

fn parse_datetime_opt(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Compute SHA256 hash of the exact content
pub fn compute_content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Load tags for a memory, sorted by name
pub fn load_tags(conn: &Connection, memory_id: MemoryId) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT t.name FROM tags t
         JOIN memory_tags mt ON t.id = mt.tag_id
         WHERE mt.memory_id = ?
         ORDER BY t.name",
    )?;

    let tags = stmt
        .query_map([memory_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;

    Ok(tags)
}

/// Ensure a tag exists and return its ID
fn ensure_tag(conn: &Connection, tag: &str) -> Result<i64> {
    conn.execute("INSERT OR IGNORE INTO tags (name) VALUES (?)", params![tag])?;

    let id: i64 = conn.query_row("SELECT id FROM tags WHERE name = ?", params![tag], |row| {
        row.get(0)
    })?;

    Ok(id)
}

/// Replace the tag set of a memory
fn set_tags(conn: &Connection, memory_id: MemoryId, tags: &[String]) -> Result<()> {
    conn.execute("DELETE FROM memory_tags WHERE memory_id = ?", params![memory_id])?;
    for tag in tags {
        let tag_id = ensure_tag(conn, tag)?;
        conn.execute(
            "INSERT OR IGNORE INTO memory_tags (memory_id, tag_id) VALUES (?, ?)",
            params![memory_id, tag_id],
        )?;
    }
    Ok(())
}

fn sorted_ids(ids: &[MemoryId]) -> Vec<MemoryId> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Insert a memory with its tags and contexts.
///
/// Expects an input already normalized by the store: tags validated,
/// `memory_type` and `category` resolved.
pub fn create_memory(conn: &Connection, input: &CreateMemoryInput) -> Result<Memory> {
    let now = Utc::now().to_rfc3339();
    let memory_type = input.memory_type.unwrap_or_default();
    let category = input.category.as_deref().unwrap_or(DEFAULT_CATEGORY);
    let created_by = input.created_by.as_deref().unwrap_or(SYSTEM_ACTOR);
    let related_json = serde_json::to_string(&sorted_ids(&input.related_memory_ids))?;
    let metadata_json = serde_json::to_string(&input.metadata)?;

    conn.execute(
        "INSERT INTO memories (owner_id, content, content_hash, memory_type, category,
            importance_score, confidence_score, dynamic_importance, source_type, source_id,
            created_by, created_at, last_modified, related_memory_ids, parent_memory_id, metadata)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            input.owner_id,
            input.content,
            compute_content_hash(&input.content),
            memory_type.as_str(),
            category,
            input.importance_score,
            input.confidence_score,
            input.importance_score as f32,
            input.source_type,
            input.source_id,
            created_by,
            now,
            now,
            related_json,
            input.parent_memory_id,
            metadata_json,
        ],
    )?;

    let id = conn.last_insert_rowid();

    set_tags(conn, id, &input.tags)?;

    for context in &input.contexts {
        add_context(conn, id, context)?;
    }

    get_memory(conn, id)
}

/// Get a memory by ID (no access tracking)
pub fn get_memory(conn: &Connection, id: MemoryId) -> Result<Memory> {
    let sql = format!("SELECT {} FROM memories m WHERE m.id = ?", MEMORY_COLUMNS);
    let mut stmt = conn.prepare_cached(&sql)?;

    let mut memory = stmt
        .query_row([id], memory_from_row)
        .optional()?
        .ok_or(LtmError::NotFound(id))?;

    memory.tags = load_tags(conn, id)?;

    Ok(memory)
}

/// Update a memory, bumping its version
pub fn update_memory(conn: &Connection, id: MemoryId, input: &UpdateMemoryInput) -> Result<Memory> {
    let current = get_memory(conn, id)?;

    if let Some(expected) = input.expected_version {
        if expected != current.version {
            return Err(LtmError::Conflict(format!(
                "memory {} is at version {}, expected {}",
                id, current.version, expected
            )));
        }
    }

    let now = Utc::now().to_rfc3339();

    let mut updates = vec![
        "last_modified = ?".to_string(),
        "version = version + 1".to_string(),
    ];
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now)];

    if let Some(ref content) = input.content {
        updates.push("content = ?".to_string());
        values.push(Box::new(content.clone()));
        updates.push("content_hash = ?".to_string());
        values.push(Box::new(compute_content_hash(content)));
    }

    if let Some(memory_type) = input.memory_type {
        updates.push("memory_type = ?".to_string());
        values.push(Box::new(memory_type.as_str().to_string()));
    }

    if let Some(ref category) = input.category {
        updates.push("category = ?".to_string());
        values.push(Box::new(category.clone()));
    }

    if let Some(importance) = input.importance_score {
        updates.push("importance_score = ?".to_string());
        values.push(Box::new(importance));
        updates.push("dynamic_importance = ?".to_string());
        values.push(Box::new(importance as f64));
    }

    if let Some(confidence) = input.confidence_score {
        updates.push("confidence_score = ?".to_string());
        values.push(Box::new(confidence as f64));
    }

    if let Some(ref metadata) = input.metadata {
        updates.push("metadata = ?".to_string());
        values.push(Box::new(serde_json::to_string(metadata)?));
    }

    if let Some(ref related) = input.related_memory_ids {
        updates.push("related_memory_ids = ?".to_string());
        values.push(Box::new(serde_json::to_string(&sorted_ids(related))?));
    }

    if let Some(is_archived) = input.is_archived {
        updates.push("is_archived = ?".to_string());
        values.push(Box::new(is_archived as i32));
    }

    if let Some(ref reason) = input.archive_reason {
        updates.push("archive_reason = ?".to_string());
        values.push(Box::new(reason.clone()));
    }

    let sql = format!(
        "UPDATE memories SET {} WHERE id = ? AND version = ?",
        updates.join(", ")
    );
    values.push(Box::new(id));
    values.push(Box::new(current.version));

    let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
    let affected = conn.execute(&sql, params.as_slice())?;
    if affected == 0 {
        return Err(LtmError::Conflict(format!(
            "memory {} changed during update",
            id
        )));
    }

    if let Some(ref tags) = input.tags {
        set_tags(conn, id, tags)?;
    }

    get_memory(conn, id)
}

/// Delete a memory; contexts, relationships, tags and access log rows cascade
pub fn delete_memory(conn: &Connection, id: MemoryId) -> Result<()> {
    let affected = conn.execute("DELETE FROM memories WHERE id = ?", params![id])?;

    if affected == 0 {
        return Err(LtmError::NotFound(id));
    }

    Ok(())
}

/// List an owner's memories with filtering and pagination
pub fn list_memories(conn: &Connection, owner_id: &str, options: &ListOptions) -> Result<Vec<Memory>> {
    select_memories(conn, owner_id, options, None)
}

/// Full-text plus tag search over an owner's memories.
///
/// A memory matches when any query token appears in its content (FTS5) or
/// names one of its tags. An empty query lists instead.
pub fn search_memories(
    conn: &Connection,
    owner_id: &str,
    query: &str,
    filters: &SearchFilters,
) -> Result<Vec<Memory>> {
    let tokens = query_tokens(query);
    let options = filters.as_list_options();
    if tokens.is_empty() {
        return list_memories(conn, owner_id, &options);
    }
    select_memories(conn, owner_id, &options, Some(&tokens))
}

/// Lowercased alphanumeric query terms, de-duplicated
fn query_tokens(query: &str) -> Vec<String> {
    let mut tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect();
    tokens.sort();
    tokens.dedup();
    tokens
}

fn select_memories(
    conn: &Connection,
    owner_id: &str,
    options: &ListOptions,
    text: Option<&[String]>,
) -> Result<Vec<Memory>> {
    let mut sql = format!("SELECT {} FROM memories m", MEMORY_COLUMNS);

    let mut conditions = vec!["m.owner_id = ?".to_string()];
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(owner_id.to_string())];

    if !options.include_archived {
        conditions.push("m.is_archived = 0".to_string());
    }

    if let Some(tokens) = text {
        // Tokens are alphanumeric so quoting them is enough for FTS5
        let fts_query = tokens
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR ");
        let placeholders: Vec<&str> = tokens.iter().map(|_| "?").collect();
        conditions.push(format!(
            "(m.id IN (SELECT rowid FROM memories_fts WHERE memories_fts MATCH ?)
              OR m.id IN (SELECT mt.memory_id FROM memory_tags mt
                          JOIN tags t ON mt.tag_id = t.id
                          WHERE t.name IN ({})))",
            placeholders.join(", ")
        ));
        params.push(Box::new(fts_query));
        for token in tokens {
            params.push(Box::new(token.clone()));
        }
    }

    if let Some(ref tags) = options.tags {
        if !tags.is_empty() {
            let placeholders: Vec<&str> = tags.iter().map(|_| "?").collect();
            conditions.push(format!(
                "m.id IN (SELECT mt.memory_id FROM memory_tags mt
                          JOIN tags t ON mt.tag_id = t.id
                          WHERE t.name IN ({}))",
                placeholders.join(", ")
            ));
            for tag in tags {
                params.push(Box::new(tag.trim().to_lowercase()));
            }
        }
    }

    if let Some(memory_type) = options.memory_type {
        conditions.push("m.memory_type = ?".to_string());
        params.push(Box::new(memory_type.as_str().to_string()));
    }

    if let Some(ref category) = options.category {
        conditions.push("m.category = ?".to_string());
        params.push(Box::new(category.clone()));
    }

    if let Some(min_importance) = options.min_importance {
        conditions.push("m.importance_score >= ?".to_string());
        params.push(Box::new(min_importance));
    }

    if let Some(after_id) = options.after_id {
        conditions.push("m.id > ?".to_string());
        params.push(Box::new(after_id));
    }

    sql.push_str(" WHERE ");
    sql.push_str(&conditions.join(" AND "));

    let sort_field = match options.sort_by.unwrap_or_default() {
        SortField::Id => "m.id",
        SortField::CreatedAt => "m.created_at",
        SortField::LastModified => "m.last_modified",
        SortField::LastAccessed => "m.last_accessed",
        SortField::Importance => "m.importance_score",
        SortField::AccessCount => "m.access_count",
    };
    let sort_order = match options.sort_order.unwrap_or_default() {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    if sort_field == "m.id" {
        sql.push_str(&format!(" ORDER BY m.id {}", sort_order));
    } else {
        sql.push_str(&format!(
            " ORDER BY {} {}, m.id {}",
            sort_field, sort_order, sort_order
        ));
    }

    let limit = options.limit.unwrap_or(100);
    let offset = options.offset.unwrap_or(0);
    sql.push_str(" LIMIT ? OFFSET ?");
    params.push(Box::new(limit));
    params.push(Box::new(offset));

    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt.query_map(param_refs.as_slice(), memory_from_row)?;
    let mut memories = Vec::new();
    for row in rows {
        let mut memory = row?;
        memory.tags = load_tags(conn, memory.id)?;
        memories.push(memory);
    }

    Ok(memories)
}

/// Count an owner's memories, archived included
pub fn count_memories(conn: &Connection, owner_id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM memories WHERE owner_id = ?",
        params![owner_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Id of an active memory with the same owner, type, category and exact content
pub fn find_active_duplicate(
    conn: &Connection,
    owner_id: &str,
    memory_type: MemoryType,
    category: &str,
    content: &str,
) -> Result<Option<MemoryId>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id FROM memories
         WHERE owner_id = ? AND memory_type = ? AND category = ?
           AND content_hash = ? AND is_archived = 0
         LIMIT 1",
    )?;

    let id = stmt
        .query_row(
            params![
                owner_id,
                memory_type.as_str(),
                category,
                compute_content_hash(content)
            ],
            |row| row.get(0),
        )
        .optional()?;

    Ok(id)
}

/// Record one access: bump the counter, stamp the time, append to the log
pub fn record_access(conn: &Connection, id: MemoryId, record: &AccessRecord) -> Result<()> {
    let now = Utc::now().to_rfc3339();

    let affected = conn.execute(
        "UPDATE memories
         SET access_count = access_count + 1,
             last_accessed = ?,
             dynamic_importance = importance_score
         WHERE id = ?",
        params![now, id],
    )?;

    if affected == 0 {
        return Err(LtmError::NotFound(id));
    }

    conn.execute(
        "INSERT INTO access_log (memory_id, timestamp, access_context, access_method,
            query, was_relevant, relevance_score)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            id,
            now,
            record.access_context,
            record.access_method,
            record.query,
            record.was_relevant as i32,
            record.relevance_score,
        ],
    )?;

    Ok(())
}

/// Access log rows for a memory, newest first
pub fn access_history(conn: &Connection, memory_id: MemoryId, limit: i64) -> Result<Vec<AccessLog>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, memory_id, timestamp, access_context, access_method, query,
                was_relevant, relevance_score
         FROM access_log WHERE memory_id = ?
         ORDER BY timestamp DESC, id DESC
         LIMIT ?",
    )?;

    let rows = stmt
        .query_map(params![memory_id, limit], |row| {
            let timestamp: String = row.get("timestamp")?;
            let was_relevant: i32 = row.get("was_relevant")?;
            Ok(AccessLog {
                id: row.get("id")?,
                memory_id: row.get("memory_id")?,
                timestamp: parse_datetime(&timestamp),
                access_context: row.get("access_context")?,
                access_method: row.get("access_method")?,
                query: row.get("query")?,
                was_relevant: was_relevant != 0,
                relevance_score: row.get("relevance_score")?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
}

/// Attach a context row to a memory
pub fn add_context(conn: &Connection, memory_id: MemoryId, context: &NewContext) -> Result<MemoryContext> {
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO memory_contexts (memory_id, context_type, key, value, confidence, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            memory_id,
            context.context_type.as_str(),
            context.key,
            context.value,
            context.confidence,
            now
        ],
    )?;

    Ok(MemoryContext {
        id: conn.last_insert_rowid(),
        memory_id,
        context_type: context.context_type,
        key: context.key.clone(),
        value: context.value.clone(),
        confidence: context.confidence,
    })
}

/// Contexts attached to a memory, in insertion order
pub fn get_contexts(conn: &Connection, memory_id: MemoryId) -> Result<Vec<MemoryContext>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, memory_id, context_type, key, value, confidence
         FROM memory_contexts WHERE memory_id = ? ORDER BY id",
    )?;

    let contexts = stmt
        .query_map([memory_id], |row| {
            let context_type: String = row.get("context_type")?;
            Ok(MemoryContext {
                id: row.get("id")?,
                memory_id: row.get("memory_id")?,
                context_type: context_type.parse().unwrap_or_default(),
                key: row.get("key")?,
                value: row.get("value")?,
                confidence: row.get("confidence")?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(contexts)
}

fn relationship_from_row(row: &Row) -> rusqlite::Result<Relationship> {
    let relationship_type: String = row.get("relationship_type")?;
    let created_at: String = row.get("created_at")?;
    Ok(Relationship {
        id: row.get("id")?,
        source_memory_id: row.get("source_memory_id")?,
        target_memory_id: row.get("target_memory_id")?,
        relationship_type: relationship_type.parse().unwrap_or_default(),
        strength: row.get("strength")?,
        description: row.get("description")?,
        created_at: parse_datetime(&created_at),
    })
}

/// Create (or refresh) an edge between two memories
pub fn create_relationship(conn: &Connection, input: &CreateRelationshipInput) -> Result<Relationship> {
    // Verify both memories exist
    let _ = get_memory(conn, input.source_memory_id)?;
    let _ = get_memory(conn, input.target_memory_id)?;

    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO relationships (source_memory_id, target_memory_id, relationship_type,
            strength, description, created_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(source_memory_id, target_memory_id, relationship_type)
         DO UPDATE SET strength = excluded.strength, description = excluded.description",
        params![
            input.source_memory_id,
            input.target_memory_id,
            input.relationship_type.as_str(),
            input.strength,
            input.description,
            now
        ],
    )?;

    let relationship = conn.query_row(
        "SELECT id, source_memory_id, target_memory_id, relationship_type, strength,
                description, created_at
         FROM relationships
         WHERE source_memory_id = ? AND target_memory_id = ? AND relationship_type = ?",
        params![
            input.source_memory_id,
            input.target_memory_id,
            input.relationship_type.as_str()
        ],
        relationship_from_row,
    )?;

    Ok(relationship)
}

/// Edges where the memory is either endpoint
pub fn get_relationships(conn: &Connection, memory_id: MemoryId) -> Result<Vec<Relationship>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, source_memory_id, target_memory_id, relationship_type, strength,
                description, created_at
         FROM relationships
         WHERE source_memory_id = ? OR target_memory_id = ?
         ORDER BY strength DESC, id",
    )?;

    let relationships = stmt
        .query_map(params![memory_id, memory_id], relationship_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(relationships)
}

/// Archive a memory only if it is still active at the given version.
///
/// Returns false when the row moved on (edited, archived or deleted).
pub fn archive_if_version(
    conn: &Connection,
    id: MemoryId,
    version: i64,
    reason: &str,
) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let affected = conn.execute(
        "UPDATE memories
         SET is_archived = 1, archive_reason = ?, last_modified = ?, version = version + 1
         WHERE id = ? AND version = ? AND is_archived = 0",
        params![reason, now, id, version],
    )?;
    Ok(affected == 1)
}

/// Lower importance by one step as part of aging, guarded by version
pub fn age_memory(
    conn: &Connection,
    id: MemoryId,
    version: i64,
    new_importance: i32,
    aged_at: DateTime<Utc>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE memories
         SET importance_score = ?, dynamic_importance = ?, last_aged_at = ?,
             last_modified = ?, version = version + 1
         WHERE id = ? AND version = ?",
        params![
            new_importance,
            new_importance as f64,
            aged_at.to_rfc3339(),
            aged_at.to_rfc3339(),
            id,
            version
        ],
    )?;
    Ok(affected == 1)
}

/// Distinct owners with at least one memory
pub fn list_owners(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT DISTINCT owner_id FROM memories ORDER BY owner_id")?;
    let owners = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(owners)
}

/// Per-owner analytics
pub fn get_stats(conn: &Connection, owner_id: &str) -> Result<MemoryStats> {
    let (total_memories, archived_memories): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(is_archived), 0) FROM memories WHERE owner_id = ?",
        params![owner_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let avg_importance: Option<f64> = conn.query_row(
        "SELECT AVG(importance_score) FROM memories WHERE owner_id = ? AND is_archived = 0",
        params![owner_id],
        |row| row.get(0),
    )?;

    let total_accesses: i64 = conn.query_row(
        "SELECT COALESCE(SUM(access_count), 0) FROM memories WHERE owner_id = ?",
        params![owner_id],
        |row| row.get(0),
    )?;

    let total_relationships: i64 = conn.query_row(
        "SELECT COUNT(*) FROM relationships r
         JOIN memories m ON r.source_memory_id = m.id
         WHERE m.owner_id = ?",
        params![owner_id],
        |row| row.get(0),
    )?;

    let by_type = grouped_counts(
        conn,
        "SELECT memory_type, COUNT(*) FROM memories
         WHERE owner_id = ? AND is_archived = 0 GROUP BY memory_type",
        owner_id,
    )?;

    let by_category = grouped_counts(
        conn,
        "SELECT category, COUNT(*) FROM memories
         WHERE owner_id = ? AND is_archived = 0 GROUP BY category",
        owner_id,
    )?;

    let mut stmt = conn.prepare_cached(
        "SELECT t.name, COUNT(*) AS n FROM tags t
         JOIN memory_tags mt ON t.id = mt.tag_id
         JOIN memories m ON mt.memory_id = m.id
         WHERE m.owner_id = ? AND m.is_archived = 0
         GROUP BY t.name ORDER BY n DESC, t.name LIMIT 5",
    )?;
    let top_tags = stmt
        .query_map([owner_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<(String, i64)>>>()?;

    let mut stmt = conn.prepare_cached(
        "SELECT id, access_count FROM memories
         WHERE owner_id = ? AND access_count > 0
         ORDER BY access_count DESC, id LIMIT 5",
    )?;
    let most_accessed = stmt
        .query_map([owner_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<(MemoryId, i64)>>>()?;

    Ok(MemoryStats {
        owner_id: owner_id.to_string(),
        total_memories,
        active_memories: total_memories - archived_memories,
        archived_memories,
        by_type,
        by_category,
        avg_importance: avg_importance.map(|v| v as f32),
        total_accesses,
        total_relationships,
        top_tags,
        most_accessed,
    })
}

fn grouped_counts(conn: &Connection, sql: &str, owner_id: &str) -> Result<HashMap<String, i64>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let counts = stmt
        .query_map([owner_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<HashMap<String, i64>>>()?;
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;

    fn input(owner: &str, content: &str, tags: &[&str], importance: i32) -> CreateMemoryInput {
        let mut input = CreateMemoryInput::new(owner, content, tags, importance);
        input.tags.sort();
        input.memory_type = Some(MemoryType::Fact);
        input.category = Some("work".to_string());
        input
    }

    #[test]
    fn test_create_and_get_memory() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_transaction(|conn| {
                let created = create_memory(conn, &input("u1", "Standup at 9", &["work", "meeting"], 6))?;
                let fetched = get_memory(conn, created.id)?;
                assert_eq!(created, fetched);
                assert_eq!(fetched.tags, vec!["meeting", "work"]);
                assert_eq!(fetched.version, 1);
                assert_eq!(fetched.access_count, 0);
                assert_eq!(fetched.dynamic_importance, 6.0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let storage = Storage::open_in_memory().unwrap();
        let err = storage.with_connection(|conn| get_memory(conn, 99)).unwrap_err();
        assert!(matches!(err, LtmError::NotFound(99)));
    }

    #[test]
    fn test_update_bumps_version_and_checks_expected() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let m = create_memory(conn, &input("u1", "old", &["work"], 5))?;
                let updated = update_memory(
                    conn,
                    m.id,
                    &UpdateMemoryInput {
                        content: Some("new".into()),
                        importance_score: Some(8),
                        expected_version: Some(1),
                        ..Default::default()
                    },
                )?;
                assert_eq!(updated.version, 2);
                assert_eq!(updated.content, "new");
                assert_eq!(updated.dynamic_importance, 8.0);

                let stale = update_memory(
                    conn,
                    m.id,
                    &UpdateMemoryInput {
                        content: Some("stale".into()),
                        expected_version: Some(1),
                        ..Default::default()
                    },
                );
                assert!(matches!(stale, Err(LtmError::Conflict(_))));
                assert_eq!(get_memory(conn, m.id)?.content, "new");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_record_access_and_history() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let m = create_memory(conn, &input("u1", "gym on monday", &["health"], 5))?;
                record_access(conn, m.id, &AccessRecord::retrieval("gym", 0.5, true))?;
                record_access(conn, m.id, &AccessRecord::direct("cli"))?;

                let fetched = get_memory(conn, m.id)?;
                assert_eq!(fetched.access_count, 2);
                assert!(fetched.last_accessed.is_some());
                assert_eq!(fetched.version, 1);

                let history = access_history(conn, m.id, 10)?;
                assert_eq!(history.len(), 2);
                assert!(history.iter().any(|h| h.access_method == "retrieval"
                    && h.query.as_deref() == Some("gym")
                    && h.was_relevant));

                assert!(matches!(
                    record_access(conn, 404, &AccessRecord::direct("cli")),
                    Err(LtmError::NotFound(404))
                ));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_list_filters_and_keyset() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let a = create_memory(conn, &input("u1", "a", &["work"], 3))?;
                let b = create_memory(conn, &input("u1", "b", &["health"], 9))?;
                create_memory(conn, &input("u2", "c", &["work"], 9))?;

                let all = list_memories(conn, "u1", &ListOptions::default())?;
                assert_eq!(all.len(), 2);

                let health = list_memories(
                    conn,
                    "u1",
                    &ListOptions {
                        tags: Some(vec!["health".into()]),
                        ..Default::default()
                    },
                )?;
                assert_eq!(health.len(), 1);
                assert_eq!(health[0].id, b.id);

                let page = list_memories(
                    conn,
                    "u1",
                    &ListOptions {
                        after_id: Some(a.id),
                        sort_by: Some(SortField::Id),
                        sort_order: Some(SortOrder::Asc),
                        ..Default::default()
                    },
                )?;
                assert_eq!(page.iter().map(|m| m.id).collect::<Vec<_>>(), vec![b.id]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_search_matches_content_or_tag() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let a = create_memory(conn, &input("u1", "Quarterly budget review", &["finance"], 5))?;
                let b = create_memory(conn, &input("u1", "Dentist appointment", &["health"], 5))?;
                create_memory(conn, &input("u1", "Unrelated note", &["general"], 5))?;

                let hits = search_memories(conn, "u1", "budget", &SearchFilters::default())?;
                assert_eq!(hits.iter().map(|m| m.id).collect::<Vec<_>>(), vec![a.id]);

                let hits = search_memories(conn, "u1", "health", &SearchFilters::default())?;
                assert_eq!(hits.iter().map(|m| m.id).collect::<Vec<_>>(), vec![b.id]);

                let all = search_memories(conn, "u1", "  ", &SearchFilters::default())?;
                assert_eq!(all.len(), 3);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_delete_cascades() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let a = create_memory(conn, &input("u1", "a", &["work"], 5))?;
                let b = create_memory(conn, &input("u1", "b", &["work"], 5))?;
                add_context(
                    conn,
                    a.id,
                    &NewContext {
                        context_type: ContextType::Temporal,
                        key: "when".into(),
                        value: "morning".into(),
                        confidence: 1.0,
                    },
                )?;
                create_relationship(
                    conn,
                    &CreateRelationshipInput {
                        source_memory_id: a.id,
                        target_memory_id: b.id,
                        relationship_type: RelationshipType::Supports,
                        strength: 0.5,
                        description: None,
                    },
                )?;
                record_access(conn, a.id, &AccessRecord::direct("test"))?;

                assert_eq!(get_relationships(conn, b.id)?.len(), 1);

                delete_memory(conn, a.id)?;
                assert!(get_contexts(conn, a.id)?.is_empty());
                assert!(get_relationships(conn, b.id)?.is_empty());
                assert!(access_history(conn, a.id, 10)?.is_empty());
                assert!(matches!(delete_memory(conn, a.id), Err(LtmError::NotFound(_))));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_archive_if_version_guards() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let m = create_memory(conn, &input("u1", "a", &["work"], 5))?;
                assert!(!archive_if_version(conn, m.id, 7, ARCHIVE_CONSOLIDATED)?);
                assert!(archive_if_version(conn, m.id, 1, ARCHIVE_CONSOLIDATED)?);
                assert!(!archive_if_version(conn, m.id, 2, ARCHIVE_CONSOLIDATED)?);

                let archived = get_memory(conn, m.id)?;
                assert!(archived.is_archived);
                assert_eq!(archived.archive_reason.as_deref(), Some("consolidated"));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_stats_per_owner() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let a = create_memory(conn, &input("u1", "a", &["work"], 4))?;
                create_memory(conn, &input("u1", "b", &["work", "meeting"], 8))?;
                create_memory(conn, &input("u2", "c", &["health"], 2))?;
                record_access(conn, a.id, &AccessRecord::direct("test"))?;

                let stats = get_stats(conn, "u1")?;
                assert_eq!(stats.total_memories, 2);
                assert_eq!(stats.active_memories, 2);
                assert_eq!(stats.avg_importance, Some(6.0));
                assert_eq!(stats.total_accesses, 1);
                assert_eq!(stats.by_category.get("work"), Some(&2));
                assert_eq!(stats.top_tags[0], ("work".to_string(), 2));
                assert_eq!(stats.most_accessed, vec![(a.id, 1)]);

                assert_eq!(list_owners(conn)?, vec!["u1".to_string(), "u2".to_string()]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_content_hash_is_exact() {
        assert_eq!(compute_content_hash("abc"), compute_content_hash("abc"));
        assert_ne!(compute_content_hash("abc"), compute_content_hash("ABC"));
        assert!(compute_content_hash("abc").starts_with("sha256:"));
    }
}
