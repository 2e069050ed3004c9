use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Enums
// =============================================================================

/// Advisory urgency classification attached to a backup at capture time.
///
/// Priority never gates execution; only the emergency WAL threshold does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriorityLevel::Low => write!(f, "low"),
            PriorityLevel::Medium => write!(f, "medium"),
            PriorityLevel::High => write!(f, "high"),
        }
    }
}

/// Why a backup was taken. Also names the artifact subdirectory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    /// Scheduled by the dynamic interval.
    Incremental,
    /// WAL size crossed the emergency threshold.
    Emergency,
    /// Explicitly requested by an operator.
    Manual,
}

impl BackupType {
    /// Directory name under the backup root for this type.
    pub fn dir_name(&self) -> &'static str {
        match self {
            BackupType::Incremental => "incremental",
            BackupType::Emergency => "emergency",
            BackupType::Manual => "manual",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for BackupType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "incremental" => Ok(BackupType::Incremental),
            "emergency" => Ok(BackupType::Emergency),
            "manual" => Ok(BackupType::Manual),
            other => Err(format!("unknown backup type: {}", other)),
        }
    }
}

// =============================================================================
// Newtype Wrappers
// =============================================================================

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Size of the write-ahead log in bytes. Zero when the file is absent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WalSize(pub u64);

impl WalSize {
    pub fn from_mb(mb: f64) -> Self {
        Self((mb.max(0.0) * BYTES_PER_MB) as u64)
    }

    pub fn bytes(&self) -> u64 {
        self.0
    }

    pub fn as_mb(&self) -> f64 {
        self.0 as f64 / BYTES_PER_MB
    }
}

/// Recommended backup cadence in whole seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IntervalSeconds(pub u64);

impl IntervalSeconds {
    pub fn as_secs(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for IntervalSeconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// Workload pressure in `[1.0, 10.0]`.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct ActivityScore(pub f64);

impl ActivityScore {
    pub const MIN: f64 = 1.0;
    pub const MAX: f64 = 10.0;

    pub fn value(&self) -> f64 {
        self.0
    }
}

// =============================================================================
// Store metrics
// =============================================================================

/// Workload signals captured from the live store for one evaluation.
///
/// Never persisted; recomputed on every call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoreMetrics {
    /// Sum of row counts across all tracked tables.
    pub total_records: u64,
    /// Rows created inside the trailing activity window, summed across tables.
    pub recent_activity: u64,
    /// Row count of the sessions table (zero if it is not tracked).
    pub sessions_count: u64,
    /// Row count per tracked table.
    pub per_table: BTreeMap<String, u64>,
    pub captured_at: DateTime<Utc>,
}

impl StoreMetrics {
    /// Build metrics from per-table `(total, recent)` counts.
    pub fn from_counts(
        counts: BTreeMap<String, (u64, u64)>,
        sessions_table: &str,
        captured_at: DateTime<Utc>,
    ) -> Self {
        let total_records = counts.values().map(|(total, _)| total).sum();
        let recent_activity = counts.values().map(|(_, recent)| recent).sum();
        let sessions_count = counts
            .get(sessions_table)
            .map(|(total, _)| *total)
            .unwrap_or(0);
        let per_table = counts
            .into_iter()
            .map(|(name, (total, _))| (name, total))
            .collect();

        Self {
            total_records,
            recent_activity,
            sessions_count,
            per_table,
            captured_at,
        }
    }

    /// Metrics for a synthetic workload, mainly for tests and benchmarks.
    pub fn synthetic(total_records: u64, recent_activity: u64, sessions_count: u64) -> Self {
        Self {
            total_records,
            recent_activity,
            sessions_count,
            per_table: BTreeMap::new(),
            captured_at: Utc::now(),
        }
    }
}
