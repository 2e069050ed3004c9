//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Writable handles configure WAL mode and run the reference migrations;
//! read-only handles never write to the file.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use dibs_core::error::DibsError;

use crate::migrations;

/// Thread-safe SQLite database wrapper.
///
/// The connection is wrapped in a Mutex since rusqlite Connection is not Sync.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, synchronous=NORMAL, foreign keys, and runs
    /// all pending migrations.
    pub fn new(path: &Path) -> Result<Self, DibsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| DibsError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| DibsError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, DibsError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DibsError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Open an existing database without write access.
    ///
    /// Fails if the file does not exist; never creates it and never runs
    /// migrations.
    pub fn open_read_only(path: &Path) -> Result<Self, DibsError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            DibsError::Storage(format!(
                "Failed to open {} read-only: {}",
                path.display(),
                e
            ))
        })?;

        debug!(path = %path.display(), "Database opened read-only");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DibsError>
    where
        F: FnOnce(&Connection) -> Result<T, DibsError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DibsError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Names of all user tables, sorted. Internal `sqlite_` tables are skipped.
    pub fn table_names(&self) -> Result<Vec<String>, DibsError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT name FROM sqlite_master
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                     ORDER BY name",
                )
                .map_err(|e| DibsError::Storage(e.to_string()))?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| DibsError::Storage(e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| DibsError::Storage(e.to_string()))?;
            Ok(names)
        })
    }

    /// Row count of `table`. The name must already be a validated identifier.
    pub fn count_rows(&self, table: &str) -> Result<u64, DibsError> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| {
                    row.get(0)
                })
                .map_err(|e| DibsError::Storage(format!("Count on {} failed: {}", table, e)))?;
            Ok(count.max(0) as u64)
        })
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.count_rows("sessions").unwrap(), 0);
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");
        let db = Database::new(&path).unwrap();
        assert_eq!(db.count_rows("messages").unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_wal_mode_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&dir.path().join("store.db")).unwrap();
        db.with_conn(|conn| {
            let mode: String = conn
                .query_row("PRAGMA journal_mode", [], |row| row.get(0))
                .map_err(|e| DibsError::Storage(e.to_string()))?;
            assert_eq!(mode, "wal");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_table_names_lists_reference_schema() {
        let db = Database::in_memory().unwrap();
        let names = db.table_names().unwrap();
        for table in ["memories", "messages", "schema_migrations", "sessions"] {
            assert!(names.contains(&table.to_string()), "missing {}", table);
        }
        assert!(names.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_count_rows_missing_table() {
        let db = Database::in_memory().unwrap();
        let err = db.count_rows("nope").unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_open_read_only_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Database::open_read_only(&dir.path().join("absent.db"));
        assert!(result.is_err());
        assert!(!dir.path().join("absent.db").exists());
    }

    #[test]
    fn test_open_read_only_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        drop(Database::new(&path).unwrap());

        let ro = Database::open_read_only(&path).unwrap();
        let result = ro.with_conn(|conn| {
            conn.execute("INSERT INTO sessions (id, created_at) VALUES ('s', 0)", [])
                .map_err(|e| DibsError::Storage(e.to_string()))
        });
        assert!(result.is_err());
    }
}
