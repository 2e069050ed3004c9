//! Backup executor: copy, consolidate, describe, verify.
//!
//! An attempt either leaves a verified artifact plus its JSON metadata
//! sidecar, or leaves nothing. Every failure path removes whatever was
//! written before returning the error.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use dibs_core::config::{wal_path_for, DibsConfig};
use dibs_core::types::{BackupType, PriorityLevel, WalSize};
use dibs_storage::Database;

use crate::error::BackupError;
use crate::lock::LOCK_FILE_NAME;

/// Description of one backup artifact, stored next to it as `<artifact>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub created_at: DateTime<Utc>,
    pub source_path: PathBuf,
    pub backup_type: BackupType,
    pub priority: PriorityLevel,
    pub wal_size_bytes: u64,
    pub size_bytes: u64,
    /// Row counts read back from the artifact during verification.
    #[serde(default)]
    pub table_counts: BTreeMap<String, u64>,
}

/// A verified backup on disk.
#[derive(Debug, Clone, Serialize)]
pub struct BackupRecord {
    pub path: PathBuf,
    pub metadata_path: PathBuf,
    pub metadata: BackupMetadata,
}

/// Takes file-level snapshots of the store and checks them.
#[derive(Debug, Clone)]
pub struct BackupExecutor {
    store_path: PathBuf,
    backup_dir: PathBuf,
    required_tables: Vec<String>,
}

impl BackupExecutor {
    pub fn new(
        store_path: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        required_tables: Vec<String>,
    ) -> Self {
        Self {
            store_path: store_path.into(),
            backup_dir: backup_dir.into(),
            required_tables,
        }
    }

    pub fn from_config(config: &DibsConfig) -> Self {
        let paths = config.paths();
        Self::new(
            paths.store,
            paths.backup_dir,
            config.store.tracked_tables.clone(),
        )
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Lock file every process backing up this store contends on.
    pub fn lock_path(&self) -> PathBuf {
        self.backup_dir.join(LOCK_FILE_NAME)
    }

    /// `<backup_dir>/<type>/<stem>_<YYYYmmdd_HHMMSS_ffffff>.db`
    pub fn artifact_path(&self, backup_type: BackupType, at: DateTime<Utc>) -> PathBuf {
        let stem = self
            .store_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("store");
        self.backup_dir.join(backup_type.dir_name()).join(format!(
            "{}_{}.db",
            stem,
            at.format("%Y%m%d_%H%M%S_%6f")
        ))
    }

    /// Run one backup attempt. On error nothing is left behind.
    pub fn run(
        &self,
        backup_type: BackupType,
        priority: PriorityLevel,
        wal: WalSize,
    ) -> Result<BackupRecord, BackupError> {
        if !self.store_path.is_file() {
            return Err(BackupError::SourceMissing(self.store_path.clone()));
        }

        let created_at = Utc::now();
        let path = self.artifact_path(backup_type, created_at);

        match self.capture(&path, created_at, backup_type, priority, wal) {
            Ok(record) => {
                info!(
                    backup_type = %backup_type,
                    priority = %priority,
                    path = %record.path.display(),
                    size_bytes = record.metadata.size_bytes,
                    "Backup verified"
                );
                Ok(record)
            }
            Err(e) => {
                discard_artifact(&path);
                Err(e)
            }
        }
    }

    fn capture(
        &self,
        path: &Path,
        created_at: DateTime<Utc>,
        backup_type: BackupType,
        priority: PriorityLevel,
        wal: WalSize,
    ) -> Result<BackupRecord, BackupError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        self.copy_store(path)?;
        consolidate(path)?;
        let table_counts = self.verify(path)?;

        // The sidecar is only written for an artifact that passed verification.
        let metadata = BackupMetadata {
            created_at,
            source_path: self.store_path.clone(),
            backup_type,
            priority,
            wal_size_bytes: wal.bytes(),
            size_bytes: std::fs::metadata(path)?.len(),
            table_counts,
        };
        let metadata_path = metadata_path_for(path);
        write_metadata(&metadata_path, &metadata)?;

        Ok(BackupRecord {
            path: path.to_path_buf(),
            metadata_path,
            metadata,
        })
    }

    /// Copy the store file and, when present, its WAL sidecar.
    fn copy_store(&self, dest: &Path) -> Result<(), BackupError> {
        std::fs::copy(&self.store_path, dest).map_err(|e| {
            BackupError::Copy(format!(
                "{} -> {}: {}",
                self.store_path.display(),
                dest.display(),
                e
            ))
        })?;

        let wal = wal_path_for(&self.store_path);
        match std::fs::copy(&wal, wal_path_for(dest)) {
            Ok(bytes) => debug!(bytes, "WAL sidecar copied"),
            // Checkpointed away between the two copies; the main file is consistent on its own.
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(BackupError::Copy(format!("{}: {}", wal.display(), e))),
        }
        Ok(())
    }

    /// Structural check of the artifact against the source.
    ///
    /// The copy must pass `PRAGMA quick_check` and contain every table the
    /// source has plus every configured tracked table, each readable.
    pub fn verify(&self, artifact: &Path) -> Result<BTreeMap<String, u64>, BackupError> {
        let copy = Database::open_read_only(artifact)
            .map_err(|e| BackupError::Verification(e.to_string()))?;

        let check: String = copy
            .with_conn(|conn| {
                conn.query_row("PRAGMA quick_check", [], |row| row.get(0))
                    .map_err(|e| dibs_core::DibsError::Storage(e.to_string()))
            })
            .map_err(|e| BackupError::Verification(e.to_string()))?;
        if check != "ok" {
            return Err(BackupError::Verification(format!(
                "quick_check reported: {}",
                check
            )));
        }

        let copy_tables = copy
            .table_names()
            .map_err(|e| BackupError::Verification(e.to_string()))?;

        let mut expected = self.required_tables.clone();
        match Database::open_read_only(&self.store_path).and_then(|src| src.table_names()) {
            Ok(source_tables) => expected.extend(source_tables),
            Err(e) => warn!(
                error = %e,
                "Could not list source tables, verifying tracked tables only"
            ),
        }
        expected.sort();
        expected.dedup();

        let mut counts = BTreeMap::new();
        for table in expected {
            if !copy_tables.contains(&table) {
                return Err(BackupError::Verification(format!(
                    "table '{}' missing from backup",
                    table
                )));
            }
            let rows = copy
                .count_rows(&table)
                .map_err(|e| BackupError::Verification(e.to_string()))?;
            counts.insert(table, rows);
        }
        Ok(counts)
    }

    /// Metadata of every artifact under the backup root, oldest first.
    ///
    /// Sidecars that cannot be parsed are skipped.
    pub fn list_backups(&self) -> Vec<BackupMetadata> {
        let mut out = Vec::new();
        for kind in [BackupType::Incremental, BackupType::Emergency, BackupType::Manual] {
            let Ok(entries) = std::fs::read_dir(self.backup_dir.join(kind.dir_name())) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                match std::fs::read(&path)
                    .map_err(|e| e.to_string())
                    .and_then(|b| serde_json::from_slice(&b).map_err(|e| e.to_string()))
                {
                    Ok(meta) => out.push(meta),
                    Err(e) => debug!(path = %path.display(), error = %e, "Skipping metadata"),
                }
            }
        }
        out.sort_by_key(|m: &BackupMetadata| m.created_at);
        out
    }
}

/// Fold a copied WAL into the artifact so it stands alone as a single file.
fn consolidate(path: &Path) -> Result<(), BackupError> {
    let conn = Connection::open(path)
        .map_err(|e| BackupError::Copy(format!("open copy {}: {}", path.display(), e)))?;
    let mode: String = conn
        .query_row("PRAGMA journal_mode = DELETE", [], |row| row.get(0))
        .map_err(|e| BackupError::Copy(format!("consolidate {}: {}", path.display(), e)))?;
    conn.close()
        .map_err(|(_, e)| BackupError::Copy(format!("close copy {}: {}", path.display(), e)))?;
    if !mode.eq_ignore_ascii_case("delete") {
        return Err(BackupError::Copy(format!(
            "copy stayed in {} journal mode",
            mode
        )));
    }
    Ok(())
}

fn metadata_path_for(artifact: &Path) -> PathBuf {
    artifact.with_extension("json")
}

fn write_metadata(path: &Path, metadata: &BackupMetadata) -> Result<(), BackupError> {
    let json =
        serde_json::to_vec_pretty(metadata).map_err(|e| BackupError::Metadata(e.to_string()))?;
    std::fs::write(path, json)
        .map_err(|e| BackupError::Metadata(format!("{}: {}", path.display(), e)))
}

/// Remove an artifact and every sidecar it may have.
fn discard_artifact(path: &Path) {
    let mut victims = vec![path.to_path_buf(), metadata_path_for(path), wal_path_for(path)];
    for suffix in ["-shm", "-journal"] {
        let mut os = path.as_os_str().to_os_string();
        os.push(suffix);
        victims.push(PathBuf::from(os));
    }

    for victim in victims {
        match std::fs::remove_file(&victim) {
            Ok(()) => debug!(path = %victim.display(), "Removed partial backup file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %victim.display(), error = %e, "Failed to remove partial backup"),
        }
    }
}
