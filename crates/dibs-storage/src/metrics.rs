//! Store metrics source.
//!
//! The interval calculator only needs two questions answered per tracked
//! table: how many rows exist, and how many were created after a point in
//! time. Any failure (file missing, database locked, table absent) surfaces
//! as `DibsError::MetricsUnavailable`; callers fall back to the default
//! cadence instead of failing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use dibs_core::error::DibsError;
use dibs_core::types::StoreMetrics;

use crate::db::Database;

/// Read-only row counting interface over the tracked entity kinds.
pub trait MetricsSource: Send + Sync {
    /// Count of entities of kind `kind`.
    fn count(&self, kind: &str) -> Result<u64, DibsError>;

    /// Count of entities of kind `kind` created strictly after `since`.
    fn count_since(&self, kind: &str, since: DateTime<Utc>) -> Result<u64, DibsError>;
}

/// Metrics source backed by the SQLite store file.
///
/// Opens a short-lived read-only connection per query so the probe never
/// holds the store open between evaluations.
#[derive(Debug, Clone)]
pub struct SqliteMetricsSource {
    path: PathBuf,
    created_column: String,
}

impl SqliteMetricsSource {
    pub fn new(path: impl Into<PathBuf>, created_column: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            created_column: created_column.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Database, DibsError> {
        Database::open_read_only(&self.path)
    }
}

impl MetricsSource for SqliteMetricsSource {
    fn count(&self, kind: &str) -> Result<u64, DibsError> {
        self.open()?.count_rows(kind)
    }

    fn count_since(&self, kind: &str, since: DateTime<Utc>) -> Result<u64, DibsError> {
        let sql = format!(
            "SELECT COUNT(*) FROM \"{}\" WHERE \"{}\" > ?1",
            kind, self.created_column
        );
        self.open()?.with_conn(|conn| {
            let count: i64 = conn
                .query_row(&sql, rusqlite::params![since.timestamp()], |row| row.get(0))
                .map_err(|e| {
                    DibsError::Storage(format!("Recent count on {} failed: {}", kind, e))
                })?;
            Ok(count.max(0) as u64)
        })
    }
}

/// Capture a `StoreMetrics` snapshot across `tables`.
///
/// Every underlying error is folded into `MetricsUnavailable`.
pub fn collect_metrics(
    source: &dyn MetricsSource,
    tables: &[String],
    sessions_table: &str,
    window: Duration,
) -> Result<StoreMetrics, DibsError> {
    let now = Utc::now();
    let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::hours(1));
    let since = now - window;

    let mut counts = BTreeMap::new();
    for table in tables {
        let total = source.count(table).map_err(unavailable)?;
        let recent = source.count_since(table, since).map_err(unavailable)?;
        counts.insert(table.clone(), (total, recent));
    }

    let metrics = StoreMetrics::from_counts(counts, sessions_table, now);
    debug!(
        total_records = metrics.total_records,
        recent_activity = metrics.recent_activity,
        sessions_count = metrics.sessions_count,
        "Store metrics collected"
    );
    Ok(metrics)
}

fn unavailable(err: DibsError) -> DibsError {
    match err {
        DibsError::MetricsUnavailable(_) => err,
        other => DibsError::MetricsUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> Vec<String> {
        vec![
            "sessions".to_string(),
            "messages".to_string(),
            "memories".to_string(),
        ]
    }

    fn seeded_store(dir: &Path) -> (PathBuf, Database) {
        let path = dir.join("store.db");
        let db = Database::new(&path).unwrap();
        let now = Utc::now().timestamp();
        let old = now - 3 * 3600;
        db.with_conn(|conn| {
            for i in 0..4 {
                conn.execute(
                    "INSERT INTO sessions (id, created_at) VALUES (?1, ?2)",
                    rusqlite::params![format!("s{}", i), old],
                )
                .map_err(|e| DibsError::Storage(e.to_string()))?;
            }
            for i in 0..10 {
                let ts = if i < 3 { now } else { old };
                conn.execute(
                    "INSERT INTO messages (id, content, created_at) VALUES (?1, 'hi', ?2)",
                    rusqlite::params![format!("m{}", i), ts],
                )
                .map_err(|e| DibsError::Storage(e.to_string()))?;
            }
            Ok(())
        })
        .unwrap();
        (path, db)
    }

    #[test]
    fn test_collect_metrics_counts_and_recent_window() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _db) = seeded_store(dir.path());
        let source = SqliteMetricsSource::new(&path, "created_at");

        let metrics =
            collect_metrics(&source, &tables(), "sessions", Duration::from_secs(3600)).unwrap();
        assert_eq!(metrics.total_records, 14);
        assert_eq!(metrics.recent_activity, 3);
        assert_eq!(metrics.sessions_count, 4);
        assert_eq!(metrics.per_table.get("memories"), Some(&0));
    }

    #[test]
    fn test_collect_metrics_missing_store_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let source = SqliteMetricsSource::new(dir.path().join("absent.db"), "created_at");
        let err = collect_metrics(&source, &tables(), "sessions", Duration::from_secs(3600))
            .unwrap_err();
        assert!(matches!(err, DibsError::MetricsUnavailable(_)));
        assert!(!dir.path().join("absent.db").exists());
    }

    #[test]
    fn test_collect_metrics_missing_table_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _db) = seeded_store(dir.path());
        let source = SqliteMetricsSource::new(&path, "created_at");
        let mut with_missing = tables();
        with_missing.push("audit_log".to_string());

        let err = collect_metrics(&source, &with_missing, "sessions", Duration::from_secs(60))
            .unwrap_err();
        match err {
            DibsError::MetricsUnavailable(msg) => assert!(msg.contains("audit_log")),
            other => panic!("Expected MetricsUnavailable, got {:?}", other),
        }
    }

    struct FixedSource;

    impl MetricsSource for FixedSource {
        fn count(&self, kind: &str) -> Result<u64, DibsError> {
            Ok(kind.len() as u64)
        }

        fn count_since(&self, _kind: &str, _since: DateTime<Utc>) -> Result<u64, DibsError> {
            Ok(1)
        }
    }

    #[test]
    fn test_collect_metrics_with_custom_source() {
        let metrics =
            collect_metrics(&FixedSource, &tables(), "sessions", Duration::from_secs(60)).unwrap();
        // "sessions" + "messages" + "memories" = 8 + 8 + 8
        assert_eq!(metrics.total_records, 24);
        assert_eq!(metrics.recent_activity, 3);
        assert_eq!(metrics.sessions_count, 8);
    }
}
