//! Interval calculator.
//!
//! Stateless: every call re-reads the store and recomputes. The interval law
//! bounds twice on purpose. Each factor is capped or floored on its own, then
//! the final interval is clamped to `[min_interval, max_interval]`.
//!
//! ```text
//! record_factor   = min(total_records / 100, 5.0)
//! wal_factor      = max(wal_mb / 50, 0.1)
//! activity_factor = activity_score / 10
//! interval        = clamp(base / max(record * wal * activity, 0.1), min, max)
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use dibs_core::config::{DibsConfig, ScheduleConfig};
use dibs_core::error::DibsError;
use dibs_core::types::{ActivityScore, IntervalSeconds, PriorityLevel, StoreMetrics, WalSize};
use dibs_storage::metrics::{collect_metrics, MetricsSource, SqliteMetricsSource};
use dibs_storage::wal::WalProbe;

const RECORDS_PER_UNIT: f64 = 100.0;
const FACTOR_CAP: f64 = 5.0;
const RECENCY_MULTIPLIER: f64 = 2.0;
const WAL_REFERENCE_MB: f64 = 50.0;
const FACTOR_FLOOR: f64 = 0.1;

const HIGH_WAL_MB: f64 = 50.0;
const HIGH_RECENT_ACTIVITY: u64 = 5;
const MEDIUM_WAL_MB: f64 = 10.0;
const MEDIUM_SESSIONS: u64 = 3;

/// Combined volume and recency pressure, floored at 1.0 and capped at 10.0.
pub fn activity_score(metrics: &StoreMetrics) -> ActivityScore {
    let record_pressure = (metrics.total_records as f64 / RECORDS_PER_UNIT).min(FACTOR_CAP);
    let recency_pressure = (metrics.recent_activity as f64 * RECENCY_MULTIPLIER).min(FACTOR_CAP);
    ActivityScore((record_pressure + recency_pressure).max(ActivityScore::MIN))
}

/// Backup cadence for the given workload.
pub fn dynamic_interval(
    schedule: &ScheduleConfig,
    metrics: &StoreMetrics,
    wal: WalSize,
) -> IntervalSeconds {
    let record_factor = (metrics.total_records as f64 / RECORDS_PER_UNIT).min(FACTOR_CAP);
    let wal_factor = (wal.as_mb() / WAL_REFERENCE_MB).max(FACTOR_FLOOR);
    let activity_factor = activity_score(metrics).value() / ActivityScore::MAX;

    let combined = record_factor * wal_factor * activity_factor;
    let raw = schedule.base_interval_secs as f64 / combined.max(FACTOR_FLOOR);
    clamp_interval(schedule, raw)
}

/// Cadence used when metrics cannot be collected: the base interval, still
/// held inside the configured bounds.
pub fn fallback_interval(schedule: &ScheduleConfig) -> IntervalSeconds {
    clamp_interval(schedule, schedule.base_interval_secs as f64)
}

/// Advisory urgency for a backup taken now.
///
/// Without metrics only the WAL size can raise the level.
pub fn priority_level(wal: WalSize, metrics: Option<&StoreMetrics>) -> PriorityLevel {
    let wal_mb = wal.as_mb();
    let recent = metrics.map(|m| m.recent_activity).unwrap_or(0);
    let sessions = metrics.map(|m| m.sessions_count).unwrap_or(0);

    if wal_mb > HIGH_WAL_MB || recent > HIGH_RECENT_ACTIVITY {
        PriorityLevel::High
    } else if wal_mb > MEDIUM_WAL_MB || sessions > MEDIUM_SESSIONS {
        PriorityLevel::Medium
    } else {
        PriorityLevel::Low
    }
}

fn clamp_interval(schedule: &ScheduleConfig, raw: f64) -> IntervalSeconds {
    let min = schedule.min_interval_secs as f64;
    let max = schedule.max_interval_secs as f64;
    // max() before min() so inverted bounds cannot panic; validate() rejects them.
    IntervalSeconds(raw.max(min).min(max).round() as u64)
}

/// Snapshot of everything the calculator knows at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    /// `None` when collection failed; see `metrics_error`.
    pub metrics: Option<StoreMetrics>,
    pub metrics_error: Option<String>,
    pub wal_size_bytes: u64,
    pub wal_mb: f64,
    pub activity_score: Option<f64>,
    pub interval: IntervalSeconds,
    /// True when `interval` is the fallback rather than the dynamic law.
    pub interval_fallback: bool,
    pub priority: PriorityLevel,
}

/// Produces backup cadence and priority from live store signals.
#[derive(Clone)]
pub struct IntervalCalculator {
    source: Arc<dyn MetricsSource>,
    wal: WalProbe,
    tables: Vec<String>,
    sessions_table: String,
    recent_window: Duration,
    schedule: ScheduleConfig,
}

impl IntervalCalculator {
    /// Calculator over the SQLite store named in `config`.
    pub fn new(config: &DibsConfig) -> Self {
        let paths = config.paths();
        let source = SqliteMetricsSource::new(&paths.store, config.store.created_column.clone());
        Self::with_source(Arc::new(source), WalProbe::for_store(&paths.store), config)
    }

    /// Calculator with an explicit metrics source and WAL probe.
    pub fn with_source(
        source: Arc<dyn MetricsSource>,
        wal: WalProbe,
        config: &DibsConfig,
    ) -> Self {
        Self {
            source,
            wal,
            tables: config.store.tracked_tables.clone(),
            sessions_table: config.store.sessions_table.clone(),
            recent_window: Duration::from_secs(config.store.recent_window_secs),
            schedule: config.schedule.clone(),
        }
    }

    pub fn schedule(&self) -> &ScheduleConfig {
        &self.schedule
    }

    /// Read the current workload. Failures come back as `MetricsUnavailable`.
    pub fn collect_metrics(&self) -> Result<StoreMetrics, DibsError> {
        collect_metrics(
            self.source.as_ref(),
            &self.tables,
            &self.sessions_table,
            self.recent_window,
        )
    }

    /// Current WAL size; zero when absent or unreadable.
    pub fn wal_size_bytes(&self) -> WalSize {
        self.wal.size()
    }

    /// Interval for already-captured signals, falling back when metrics are missing.
    pub fn interval_for(&self, metrics: Option<&StoreMetrics>, wal: WalSize) -> IntervalSeconds {
        match metrics {
            Some(m) => dynamic_interval(&self.schedule, m, wal),
            None => fallback_interval(&self.schedule),
        }
    }

    /// Collect all signals and derive interval and priority.
    pub fn generate_report(&self) -> Report {
        let wal = self.wal_size_bytes();
        let (metrics, metrics_error) = match self.collect_metrics() {
            Ok(m) => (Some(m), None),
            Err(e) => {
                warn!(error = %e, "Store metrics unavailable, using base interval");
                (None, Some(e.to_string()))
            }
        };

        Report {
            generated_at: Utc::now(),
            activity_score: metrics.as_ref().map(|m| activity_score(m).value()),
            interval: self.interval_for(metrics.as_ref(), wal),
            interval_fallback: metrics.is_none(),
            priority: priority_level(wal, metrics.as_ref()),
            wal_size_bytes: wal.bytes(),
            wal_mb: wal.as_mb(),
            metrics,
            metrics_error,
        }
    }
}

impl std::fmt::Debug for IntervalCalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalCalculator")
            .field("wal", &self.wal)
            .field("tables", &self.tables)
            .field("schedule", &self.schedule)
            .finish()
    }
}
