//! Database connection management
//!
//! One writer connection behind a mutex with configurable journal mode for
//! both local (WAL) and cloud-synced folder (DELETE journal) operation. An
//! on-disk WAL database also gets a read-only connection, so reads see the
//! last committed state without waiting on a batch pass's transaction.

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::Arc;

use super::migrations::run_migrations;
use crate::config::{StorageConfig, StorageMode};
use crate::error::Result;

/// Storage engine wrapping SQLite
pub struct Storage {
    config: StorageConfig,
    conn: Arc<Mutex<Connection>>,
    reader: Option<Arc<Mutex<Connection>>>,
}

impl Storage {
    /// Open or create a database with the given configuration
    pub fn open(config: StorageConfig) -> Result<Self> {
        let conn = Self::create_connection(&config)?;

        run_migrations(&conn)?;

        let reader = if config.db_path != ":memory:" && config.storage_mode == StorageMode::Local {
            Some(Arc::new(Mutex::new(Self::create_reader(&config)?)))
        } else {
            None
        };

        Ok(Self {
            config,
            conn: Arc::new(Mutex::new(conn)),
            reader,
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::open(StorageConfig {
            db_path: ":memory:".to_string(),
            storage_mode: StorageMode::Local,
        })
    }

    fn create_connection(config: &StorageConfig) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = if config.db_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(&config.db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Connection::open_with_flags(&config.db_path, flags)?
        };

        Self::configure_pragmas(&conn, config.storage_mode)?;

        Ok(conn)
    }

    /// Opened after migrations so the WAL journal mode is already persisted
    fn create_reader(config: &StorageConfig) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &config.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(
            r#"
            PRAGMA busy_timeout=30000;
            PRAGMA cache_size=-16000;
            PRAGMA temp_store=MEMORY;
            "#,
        )?;
        Ok(conn)
    }

    /// Local mode: WAL for concurrency and crash recovery.
    /// Cloud-safe mode: single-file DELETE journal for synced folders.
    fn configure_pragmas(conn: &Connection, mode: StorageMode) -> Result<()> {
        match mode {
            StorageMode::Local => {
                conn.execute_batch(
                    r#"
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA wal_autocheckpoint=1000;
                    PRAGMA busy_timeout=30000;
                    PRAGMA cache_size=-64000;
                    PRAGMA temp_store=MEMORY;
                    PRAGMA foreign_keys=ON;
                    "#,
                )?;
            }
            StorageMode::CloudSafe => {
                conn.execute_batch(
                    r#"
                    PRAGMA journal_mode=DELETE;
                    PRAGMA synchronous=FULL;
                    PRAGMA busy_timeout=30000;
                    PRAGMA cache_size=-32000;
                    PRAGMA temp_store=MEMORY;
                    PRAGMA foreign_keys=ON;
                    "#,
                )?;
            }
        }
        Ok(())
    }

    /// Execute a function with the connection
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Execute a read-only function. Uses the reader connection when there is
    /// one, otherwise the writer.
    pub fn with_read_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        match self.reader {
            Some(ref reader) => {
                let conn = reader.lock();
                f(&conn)
            }
            None => self.with_connection(f),
        }
    }

    /// Execute a function inside a transaction; any error rolls it back
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.config.storage_mode
    }

    pub fn db_path(&self) -> &str {
        &self.config.db_path
    }

    fn is_in_cloud_folder(&self) -> bool {
        let path = self.config.db_path.to_lowercase();
        path.contains("dropbox")
            || path.contains("onedrive")
            || path.contains("icloud")
            || path.contains("google drive")
    }

    /// Warning if storage mode doesn't match folder type
    pub fn storage_mode_warning(&self) -> Option<String> {
        if self.is_in_cloud_folder() && self.config.storage_mode == StorageMode::Local {
            Some(format!(
                "Database '{}' appears to be in a cloud-synced folder. \
                WAL mode may cause corruption; use storage_mode = \"cloud-safe\" \
                or move the database to a local folder.",
                self.config.db_path
            ))
        } else {
            None
        }
    }

    /// Fold the WAL back into the database file (local mode only)
    pub fn checkpoint(&self) -> Result<()> {
        if self.config.storage_mode == StorageMode::Local {
            let conn = self.conn.lock();
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        }
        Ok(())
    }

    /// Database size in bytes
    pub fn db_size(&self) -> Result<i64> {
        self.with_read_connection(|conn| {
            Ok(conn.query_row(
                "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                [],
                |row| row.get(0),
            )?)
        })
    }
}

impl Clone for Storage {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            conn: self.conn.clone(),
            reader: self.reader.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LtmError;

    #[test]
    fn test_open_in_memory() {
        let storage = Storage::open_in_memory().unwrap();
        assert_eq!(storage.db_path(), ":memory:");
        assert!(storage.db_size().unwrap() > 0);
    }

    #[test]
    fn test_open_on_disk_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/memories.db");
        let storage = Storage::open(StorageConfig {
            db_path: path.to_string_lossy().to_string(),
            storage_mode: StorageMode::CloudSafe,
        })
        .unwrap();
        assert!(path.exists());
        assert_eq!(storage.storage_mode(), StorageMode::CloudSafe);
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let storage = Storage::open_in_memory().unwrap();
        let result: Result<()> = storage.with_transaction(|conn| {
            conn.execute("INSERT INTO tags (name) VALUES ('work')", [])?;
            Err(LtmError::Internal("boom".into()))
        });
        assert!(result.is_err());

        let count: i64 = storage
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM tags", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    fn local_on_disk(dir: &tempfile::TempDir) -> Storage {
        Storage::open(StorageConfig {
            db_path: dir.path().join("memories.db").to_string_lossy().to_string(),
            storage_mode: StorageMode::Local,
        })
        .unwrap()
    }

    #[test]
    fn test_reads_do_not_wait_on_open_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let storage = local_on_disk(&dir);
        storage
            .with_transaction(|conn| {
                conn.execute("INSERT INTO tags (name) VALUES ('work')", [])?;
                Ok(())
            })
            .unwrap();

        // The writer lock is held for the whole closure; the read goes through
        // the reader and sees only committed rows.
        let seen: i64 = storage
            .with_transaction(|conn| {
                conn.execute("INSERT INTO tags (name) VALUES ('health')", [])?;
                storage.with_read_connection(|reader| {
                    Ok(reader.query_row("SELECT COUNT(*) FROM tags", [], |row| row.get(0))?)
                })
            })
            .unwrap();
        assert_eq!(seen, 1);
        assert!(storage.db_size().unwrap() > 0);
    }

    #[test]
    fn test_checkpoint_truncates_wal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = local_on_disk(&dir);
        storage
            .with_transaction(|conn| {
                conn.execute("INSERT INTO tags (name) VALUES ('work')", [])?;
                Ok(())
            })
            .unwrap();

        storage.checkpoint().unwrap();
        let wal = dir.path().join("memories.db-wal");
        let wal_len = std::fs::metadata(&wal).map(|m| m.len()).unwrap_or(0);
        assert_eq!(wal_len, 0);
    }

    #[test]
    fn test_cloud_folder_warning() {
        let storage = Storage {
            config: StorageConfig {
                db_path: "/Users/test/Dropbox/memories.db".to_string(),
                storage_mode: StorageMode::Local,
            },
            conn: Arc::new(Mutex::new(Connection::open_in_memory().unwrap())),
            reader: None,
        };
        assert!(storage.is_in_cloud_folder());
        assert!(storage.storage_mode_warning().is_some());
    }
}
