//! Database migrations

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version = schema_version(conn)?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < SCHEMA_VERSION {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Highest applied schema version (0 for a fresh database)
pub fn schema_version(conn: &Connection) -> Result<i32> {
    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Initial schema (v1): memories, tags, contexts, relationships, access log
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS memories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id TEXT NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            memory_type TEXT NOT NULL,
            category TEXT NOT NULL,
            importance_score INTEGER NOT NULL
                CHECK (importance_score BETWEEN 1 AND 10),
            confidence_score REAL NOT NULL
                CHECK (confidence_score >= 0.0 AND confidence_score <= 1.0),
            dynamic_importance REAL NOT NULL,
            source_type TEXT,
            source_id TEXT,
            created_by TEXT NOT NULL DEFAULT 'system',
            created_at TEXT NOT NULL,
            last_modified TEXT NOT NULL,
            last_accessed TEXT,
            access_count INTEGER NOT NULL DEFAULT 0,
            related_memory_ids TEXT NOT NULL DEFAULT '[]',
            parent_memory_id INTEGER
                REFERENCES memories(id) ON DELETE SET NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            is_archived INTEGER NOT NULL DEFAULT 0,
            archive_reason TEXT,
            version INTEGER NOT NULL DEFAULT 1
        );

        -- Tags table (normalized)
        CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE
        );

        CREATE TABLE IF NOT EXISTS memory_tags (
            memory_id INTEGER NOT NULL,
            tag_id INTEGER NOT NULL,
            PRIMARY KEY (memory_id, tag_id),
            FOREIGN KEY (memory_id) REFERENCES memories(id) ON DELETE CASCADE,
            FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
        );

        -- Structured situational metadata
        CREATE TABLE IF NOT EXISTS memory_contexts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            memory_id INTEGER NOT NULL,
            context_type TEXT NOT NULL DEFAULT 'custom',
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            confidence REAL NOT NULL DEFAULT 1.0,
            created_at TEXT NOT NULL,
            FOREIGN KEY (memory_id) REFERENCES memories(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS relationships (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_memory_id INTEGER NOT NULL,
            target_memory_id INTEGER NOT NULL,
            relationship_type TEXT NOT NULL DEFAULT 'related_to',
            strength REAL NOT NULL DEFAULT 1.0,
            description TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(source_memory_id, target_memory_id, relationship_type),
            FOREIGN KEY (source_memory_id) REFERENCES memories(id) ON DELETE CASCADE,
            FOREIGN KEY (target_memory_id) REFERENCES memories(id) ON DELETE CASCADE
        );

        -- One row per retrieval touch
        CREATE TABLE IF NOT EXISTS access_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            memory_id INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            access_context TEXT,
            access_method TEXT NOT NULL,
            query TEXT,
            was_relevant INTEGER NOT NULL DEFAULT 0,
            relevance_score REAL,
            FOREIGN KEY (memory_id) REFERENCES memories(id) ON DELETE CASCADE
        );

        -- Full-text search over content
        CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
            content,
            content='memories',
            content_rowid='id',
            tokenize='porter unicode61'
        );

        CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
            INSERT INTO memories_fts(rowid, content) VALUES (NEW.id, NEW.content);
        END;

        CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
            INSERT INTO memories_fts(memories_fts, rowid, content)
            VALUES('delete', OLD.id, OLD.content);
        END;

        CREATE TRIGGER IF NOT EXISTS memories_au AFTER UPDATE OF content ON memories BEGIN
            INSERT INTO memories_fts(memories_fts, rowid, content)
            VALUES('delete', OLD.id, OLD.content);
            INSERT INTO memories_fts(rowid, content) VALUES (NEW.id, NEW.content);
        END;

        -- Retriever candidate pool
        CREATE INDEX IF NOT EXISTS idx_memories_owner_archived_importance
            ON memories(owner_id, is_archived, importance_score DESC);
        -- Learning pipeline duplicate checks
        CREATE INDEX IF NOT EXISTS idx_memories_owner_type_category
            ON memories(owner_id, memory_type, category);
        CREATE INDEX IF NOT EXISTS idx_memories_owner_hash
            ON memories(owner_id, content_hash);

        CREATE INDEX IF NOT EXISTS idx_memory_tags_memory ON memory_tags(memory_id);
        CREATE INDEX IF NOT EXISTS idx_memory_tags_tag ON memory_tags(tag_id);
        CREATE INDEX IF NOT EXISTS idx_contexts_memory ON memory_contexts(memory_id);
        CREATE INDEX IF NOT EXISTS idx_relationships_source ON relationships(source_memory_id);
        CREATE INDEX IF NOT EXISTS idx_relationships_target ON relationships(target_memory_id);
        CREATE INDEX IF NOT EXISTS idx_access_log_memory ON access_log(memory_id, timestamp DESC);

        INSERT INTO schema_version (version) VALUES (1);
        "#,
    )?;

    Ok(())
}

/// Aging bookkeeping (v2)
/// Records when the aging pass last lowered a memory's importance so the
/// pass stays idempotent within one aging window.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        ALTER TABLE memories ADD COLUMN last_aged_at TEXT;

        INSERT INTO schema_version (version) VALUES (2);
        "#,
    )?;

    tracing::info!("Migration v2: added last_aged_at to memories");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_importance_check_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO memories (owner_id, content, content_hash, memory_type, category,
                importance_score, confidence_score, dynamic_importance, created_at, last_modified)
             VALUES ('u', 'x', 'h', 'fact', 'general', 11, 0.5, 11.0, 'now', 'now')",
            [],
        );
        assert!(result.is_err());
    }
}
