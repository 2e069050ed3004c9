//! Write-ahead log size probe.
//!
//! Fail-open: a missing WAL is an idle store (zero bytes), and any other
//! filesystem error also reads as zero after a warning.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::warn;

use dibs_core::config::wal_path_for;
use dibs_core::types::WalSize;

/// Size of the WAL file at `wal_path`.
pub fn wal_size_bytes(wal_path: &Path) -> WalSize {
    match std::fs::metadata(wal_path) {
        Ok(meta) => WalSize(meta.len()),
        Err(e) if e.kind() == ErrorKind::NotFound => WalSize(0),
        Err(e) => {
            warn!(path = %wal_path.display(), error = %e, "WAL probe failed, assuming empty");
            WalSize(0)
        }
    }
}

/// WAL probe bound to one store.
#[derive(Debug, Clone)]
pub struct WalProbe {
    wal_path: PathBuf,
}

impl WalProbe {
    /// Probe the conventional `<store_path>-wal` file.
    pub fn for_store(store_path: &Path) -> Self {
        Self {
            wal_path: wal_path_for(store_path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.wal_path
    }

    pub fn size(&self) -> WalSize {
        wal_size_bytes(&self.wal_path)
    }
}
