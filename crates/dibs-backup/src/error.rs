//! Error types for the backup engine.

use std::path::PathBuf;

/// Errors from a single backup attempt.
///
/// None of these are fatal to the monitor; each one marks the attempt as
/// failed and leaves the trigger state untouched.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Store not found: {0}")]
    SourceMissing(PathBuf),
    #[error("Copy failed: {0}")]
    Copy(String),
    #[error("Metadata write failed: {0}")]
    Metadata(String),
    #[error("Verification failed: {0}")]
    Verification(String),
    #[error("Backup lock {} unavailable: {source}", path.display())]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from reading or writing the trigger state file.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("State file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("State file unparseable: {0}")]
    Parse(#[from] serde_json::Error),
}
