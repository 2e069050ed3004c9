//! Reference schema migrations.
//!
//! DIBS only reads the store it protects, but `dibs init` and the test
//! fixtures need a store shaped like the one it expects: the tracked
//! `sessions`, `messages` and `memories` tables, each carrying an integer
//! `created_at` column in unix seconds.

use rusqlite::Connection;
use tracing::info;

use dibs_core::error::DibsError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), DibsError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| DibsError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| DibsError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: tracked_tables");
    }

    Ok(())
}

/// Version 1: tracked tables.
fn apply_v1(conn: &Connection) -> Result<(), DibsError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            id          TEXT PRIMARY KEY NOT NULL,
            title       TEXT NOT NULL DEFAULT '',
            created_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY NOT NULL,
            session_id  TEXT,
            role        TEXT NOT NULL DEFAULT 'user',
            content     TEXT NOT NULL DEFAULT '',
            created_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_created_at
            ON messages (created_at DESC);

        CREATE TABLE IF NOT EXISTS memories (
            id          TEXT PRIMARY KEY NOT NULL,
            content     TEXT NOT NULL DEFAULT '',
            created_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        INSERT INTO schema_migrations (version, name) VALUES (1, 'tracked_tables');
        ",
    )
    .map_err(|e| DibsError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(conn: &Connection) -> i64 {
        conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    #[test]
    fn test_migrations_apply_once() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(version(&conn), 1);
    }

    #[test]
    fn test_created_at_defaults_to_now() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute("INSERT INTO memories (id, content) VALUES ('m1', 'x')", [])
            .unwrap();

        let created_at: i64 = conn
            .query_row("SELECT created_at FROM memories WHERE id = 'm1'", [], |row| {
                row.get(0)
            })
            .unwrap();
        let now = chrono::Utc::now().timestamp();
        assert!((now - created_at).abs() <= 5);
    }
}
