use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DibsError, Result};

/// Top-level configuration for DIBS.
///
/// Loaded from `~/.dibs/config.toml` by default. Every section falls back to
/// its defaults when omitted, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DibsConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub emergency: EmergencyConfig,
    #[serde(default)]
    pub backup: BackupConfig,
}

impl DibsConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DibsConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject configurations the interval law cannot work with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.schedule;
        if s.min_interval_secs == 0 || s.base_interval_secs == 0 || s.poll_interval_secs == 0 {
            return Err(DibsError::Config(
                "schedule intervals must be greater than zero".to_string(),
            ));
        }
        if s.min_interval_secs > s.max_interval_secs {
            return Err(DibsError::Config(format!(
                "min_interval_secs ({}) exceeds max_interval_secs ({})",
                s.min_interval_secs, s.max_interval_secs
            )));
        }
        if !(self.emergency.wal_threshold_mb > 0.0) {
            return Err(DibsError::Config(
                "emergency.wal_threshold_mb must be positive".to_string(),
            ));
        }
        if self.store.tracked_tables.is_empty() {
            return Err(DibsError::Config(
                "store.tracked_tables must name at least one table".to_string(),
            ));
        }
        for name in self
            .store
            .tracked_tables
            .iter()
            .chain([&self.store.sessions_table, &self.store.created_column])
        {
            if !is_sql_identifier(name) {
                return Err(DibsError::Config(format!(
                    "'{}' is not a plain SQL identifier",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Resolve every configured path against the data directory.
    pub fn paths(&self) -> ResolvedPaths {
        let data_dir = expand_home(&self.general.data_dir);
        let store = resolve_under(&data_dir, &self.store.path);
        ResolvedPaths {
            wal: wal_path_for(&store),
            store,
            backup_dir: resolve_under(&data_dir, &self.backup.dir),
            state_file: resolve_under(&data_dir, &self.backup.state_file),
            data_dir,
        }
    }
}

/// Filesystem locations derived from the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub data_dir: PathBuf,
    pub store: PathBuf,
    pub wal: PathBuf,
    pub backup_dir: PathBuf,
    pub state_file: PathBuf,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Base directory for relative store, backup and state paths.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.dibs".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// The store whose write pressure drives the schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file. The WAL lives next to it as `<path>-wal`.
    pub path: String,
    /// Tables whose row counts feed the activity metrics.
    pub tracked_tables: Vec<String>,
    /// Table counted as `sessions_count` for priority classification.
    pub sessions_table: String,
    /// Integer unix-seconds column used for the recent-activity window.
    pub created_column: String,
    /// Trailing window for "recent activity", in seconds.
    pub recent_window_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "store.db".to_string(),
            tracked_tables: vec![
                "sessions".to_string(),
                "messages".to_string(),
                "memories".to_string(),
            ],
            sessions_table: "sessions".to_string(),
            created_column: "created_at".to_string(),
            recent_window_secs: 3600,
        }
    }
}

/// Bounds and cadence of the dynamic interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Interval used when metrics are unavailable, and the numerator of the
    /// interval law.
    pub base_interval_secs: u64,
    pub min_interval_secs: u64,
    pub max_interval_secs: u64,
    /// How often the monitor loop wakes up to evaluate.
    pub poll_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            base_interval_secs: 1800,
            min_interval_secs: 300,
            max_interval_secs: 3600,
            poll_interval_secs: 60,
        }
    }
}

/// Emergency override settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyConfig {
    /// WAL size in MB above which an emergency backup fires.
    pub wal_threshold_mb: f64,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            wal_threshold_mb: 50.0,
        }
    }
}

/// Backup artifact and bookkeeping locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Root directory; artifacts go under `incremental/`, `emergency/`, `manual/`.
    pub dir: String,
    /// JSON file holding the last verified backup time.
    pub state_file: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: "backups".to_string(),
            state_file: "dibs_state.json".to_string(),
        }
    }
}

/// Path of the write-ahead log that belongs to `store`.
pub fn wal_path_for(store: &Path) -> PathBuf {
    let mut os = store.as_os_str().to_os_string();
    os.push("-wal");
    PathBuf::from(os)
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}

fn resolve_under(base: &Path, path: &str) -> PathBuf {
    let expanded = expand_home(path);
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
