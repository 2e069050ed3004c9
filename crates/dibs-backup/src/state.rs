//! Persisted trigger state.
//!
//! The only durable fact DIBS keeps is the time of the last verified backup.
//! Writes go through a temp file in the same directory followed by a rename,
//! so a crash mid-write leaves either the old file or the new one. Any read
//! problem (missing, truncated, garbage) loads as "never backed up".

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::StateError;

/// Bookkeeping that survives process restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerState {
    /// Completion time of the last backup that passed verification.
    pub last_backup_time: Option<DateTime<Utc>>,
}

impl TriggerState {
    /// State after a verified backup finishing at `at`.
    ///
    /// Never moves backwards, even if the wall clock did.
    pub fn with_backup_at(self, at: DateTime<Utc>) -> Self {
        let last_backup_time = match self.last_backup_time {
            Some(prev) if prev > at => prev,
            _ => at,
        };
        Self {
            last_backup_time: Some(last_backup_time),
        }
    }

    /// The later of two views of the same history.
    pub fn merge(self, other: TriggerState) -> Self {
        match other.last_backup_time {
            Some(at) => self.with_backup_at(at),
            None => self,
        }
    }
}

/// Reads and writes `TriggerState` at a fixed path.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Strict read. `Ok(None)` when the file does not exist.
    pub fn try_load(&self) -> Result<Option<TriggerState>, StateError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Fail-open read: anything other than a valid file is "never backed up".
    pub fn load(&self) -> TriggerState {
        match self.try_load() {
            Ok(Some(state)) => state,
            Ok(None) => {
                debug!(path = %self.path.display(), "No trigger state yet");
                TriggerState::default()
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Trigger state unreadable, starting fresh"
                );
                TriggerState::default()
            }
        }
    }

    /// Atomically replace the state file.
    pub fn save(&self, state: &TriggerState) -> Result<(), StateError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        let bytes = serde_json::to_vec_pretty(state)?;
        let mut tmp = NamedTempFile::new_in(&parent)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StateError::Io(e.error))?;

        debug!(path = %self.path.display(), "Trigger state saved");
        Ok(())
    }
}
