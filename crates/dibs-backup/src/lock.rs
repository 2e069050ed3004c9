//! Advisory lock shared by every process backing up the same store.
//!
//! The lock is an exclusive `flock`-style lock on a file under the backup
//! root. It is released when the guard drops, or by the OS if the holder dies.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::BackupError;

/// File name of the lock under the backup root.
pub const LOCK_FILE_NAME: &str = ".dibs.lock";

/// Held exclusive lock on a lock file.
#[derive(Debug)]
pub struct BackupLock {
    file: File,
    path: PathBuf,
}

impl BackupLock {
    /// Block until the lock at `path` is held. Creates the file if needed.
    pub fn acquire(path: &Path) -> Result<Self, BackupError> {
        let file = open_lock_file(path)?;
        FileExt::lock_exclusive(&file).map_err(|source| BackupError::Lock {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Backup lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Take the lock only if nobody else holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>, BackupError> {
        let file = open_lock_file(path)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(Self {
                file,
                path: path.to_path_buf(),
            })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(source) => Err(BackupError::Lock {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BackupLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "Failed to release backup lock");
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File, BackupError> {
    let lock_err = |source| BackupError::Lock {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(lock_err)?;
    }
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(lock_err)
}
