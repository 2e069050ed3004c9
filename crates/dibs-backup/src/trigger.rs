//! Backup trigger: the scheduling decision and the serialized backup side effect.
//!
//! Per evaluation the trigger goes Idle -> Evaluating -> (Idle | Backing-up)
//! and always ends back in Idle. Two paths can reach Backing-up: the
//! scheduled path when the elapsed time reaches the dynamic interval, and
//! the emergency path when the WAL exceeds its absolute threshold.
//!
//! Invariant: `last_backup_time` only moves forward, and only after a backup
//! has been copied and verified.
//!
//! Several triggers may share one store: monitor processes, one-shot CLI
//! runs. Backups are serialized by a [`BackupLock`] file under the backup
//! root, and every decision first merges in the state file so a backup taken
//! elsewhere resets this trigger's cadence too.

use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use dibs_core::config::DibsConfig;
use dibs_core::types::{BackupType, IntervalSeconds, WalSize};

use crate::calculator::{IntervalCalculator, Report};
use crate::error::StateError;
use crate::executor::{BackupExecutor, BackupMetadata, BackupRecord};
use crate::lock::BackupLock;
use crate::state::{StateStore, TriggerState};

/// Emergency attempts without a verified backup before the monitor warns.
pub const EMERGENCY_ALERT_AFTER: u32 = 3;

/// Result of evaluating whether a scheduled backup is due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerDecision {
    pub should_trigger: bool,
    /// Human-readable explanation including elapsed time and interval.
    pub reason: String,
    /// Seconds since the last verified backup; `None` if there never was one.
    pub elapsed_secs: Option<i64>,
    pub interval: IntervalSeconds,
}

impl TriggerDecision {
    /// Pure decision for a given state and interval at `now`.
    pub fn evaluate(
        state: &TriggerState,
        interval: IntervalSeconds,
        now: DateTime<Utc>,
    ) -> Self {
        let Some(last) = state.last_backup_time else {
            return Self {
                should_trigger: true,
                reason: "Initial backup required".to_string(),
                elapsed_secs: None,
                interval,
            };
        };

        // A clock that stepped backwards reads as "just backed up".
        let elapsed = (now - last).num_seconds().max(0);
        let should_trigger = elapsed as u64 >= interval.as_secs();
        let reason = if should_trigger {
            format!(
                "Backup due: {}s elapsed since last backup, interval {}s",
                elapsed,
                interval.as_secs()
            )
        } else {
            format!(
                "Backup not due: {}s elapsed since last backup, interval {}s",
                elapsed,
                interval.as_secs()
            )
        };

        Self {
            should_trigger,
            reason,
            elapsed_secs: Some(elapsed),
            interval,
        }
    }
}

/// What happened to one `execute_backup` call.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BackupOutcome {
    /// Copied, verified and recorded.
    Completed(BackupRecord),
    /// Another caller finished a backup while this one waited for the lock.
    Skipped { reason: String },
    /// Copy or verification failed; state untouched, retried next tick.
    Failed { reason: String },
}

impl BackupOutcome {
    /// True unless the attempt failed.
    pub fn is_success(&self) -> bool {
        !matches!(self, BackupOutcome::Failed { .. })
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, BackupOutcome::Completed(_))
    }

    /// One-line description for logs and the CLI.
    pub fn message(&self) -> String {
        match self {
            BackupOutcome::Completed(record) => format!(
                "{} backup verified at {} ({} bytes, priority {})",
                record.metadata.backup_type,
                record.path.display(),
                record.metadata.size_bytes,
                record.metadata.priority
            ),
            BackupOutcome::Skipped { reason } => format!("Backup skipped: {}", reason),
            BackupOutcome::Failed { reason } => format!("Backup failed: {}", reason),
        }
    }
}

/// In-process counters exposed through the status report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuntimeStats {
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub consecutive_failures: u32,
    /// Emergency backups attempted since the last verified backup of any type.
    pub emergency_attempts_since_success: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<String>,
}

/// Summary of one monitor tick.
#[derive(Debug, Clone)]
pub struct TickSummary {
    pub decision: TriggerDecision,
    pub scheduled: Option<BackupOutcome>,
    pub emergency: Option<BackupOutcome>,
}

/// Read-only snapshot for external monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state: TriggerState,
    pub report: Report,
    pub decision: TriggerDecision,
    pub wal_threshold_mb: f64,
    pub wal_over_threshold: bool,
    pub stats: RuntimeStats,
    pub backups_on_disk: usize,
    pub latest_backup: Option<BackupMetadata>,
}

/// Stateful controller owning the last-backup time and the backup locks.
pub struct BackupTrigger {
    calculator: IntervalCalculator,
    executor: BackupExecutor,
    state_store: StateStore,
    state: Mutex<TriggerState>,
    /// Serializes callers in this process before they contend on the file lock.
    backup_lock: Mutex<()>,
    stats: Mutex<RuntimeStats>,
    wal_threshold_mb: f64,
}

impl BackupTrigger {
    /// Build a trigger from configuration and load persisted state.
    pub fn new(config: &DibsConfig) -> Self {
        Self::from_parts(
            IntervalCalculator::new(config),
            BackupExecutor::from_config(config),
            StateStore::new(config.paths().state_file),
            config.emergency.wal_threshold_mb,
        )
    }

    pub fn from_parts(
        calculator: IntervalCalculator,
        executor: BackupExecutor,
        state_store: StateStore,
        wal_threshold_mb: f64,
    ) -> Self {
        let state = state_store.load();
        Self {
            calculator,
            executor,
            state_store,
            state: Mutex::new(state),
            backup_lock: Mutex::new(()),
            stats: Mutex::new(RuntimeStats::default()),
            wal_threshold_mb,
        }
    }

    pub fn calculator(&self) -> &IntervalCalculator {
        &self.calculator
    }

    pub fn executor(&self) -> &BackupExecutor {
        &self.executor
    }

    pub fn wal_threshold_mb(&self) -> f64 {
        self.wal_threshold_mb
    }

    /// Current in-memory state.
    pub fn state(&self) -> TriggerState {
        *lock(&self.state)
    }

    pub fn stats(&self) -> RuntimeStats {
        lock(&self.stats).clone()
    }

    /// Re-read the state file, replacing memory. Missing or corrupt reads as
    /// "never backed up".
    pub fn load_state(&self) -> TriggerState {
        let loaded = self.state_store.load();
        *lock(&self.state) = loaded;
        loaded
    }

    /// Persist the in-memory state.
    pub fn save_state(&self) -> Result<(), StateError> {
        self.state_store.save(&self.state())
    }

    /// Merge the state file into memory and return the result.
    ///
    /// The merge keeps the later timestamp, so a corrupt or stale file never
    /// moves this trigger backwards.
    pub fn refresh_state(&self) -> TriggerState {
        let on_disk = self.state_store.load();
        let mut state = lock(&self.state);
        *state = state.merge(on_disk);
        *state
    }

    /// Whether a scheduled backup is due right now.
    pub fn should_trigger_backup(&self) -> TriggerDecision {
        let state = self.refresh_state();
        let report = self.calculator.generate_report();
        TriggerDecision::evaluate(&state, report.interval, Utc::now())
    }

    /// Run a backup of `backup_type`, serialized against every other caller.
    ///
    /// Never panics and never returns an error; failures come back as
    /// `BackupOutcome::Failed` with the state untouched.
    pub fn execute_backup(&self, backup_type: BackupType) -> BackupOutcome {
        let observed = self.refresh_state().last_backup_time;
        self.execute_backup_after(backup_type, observed)
    }

    /// Emergency backup if the WAL is above `threshold_mb`.
    ///
    /// Returns whether an emergency backup ran and verified.
    pub fn monitor_wal_threshold(&self, threshold_mb: f64) -> bool {
        let observed = self.refresh_state().last_backup_time;
        self.check_wal_emergency(threshold_mb, observed)
            .map(|outcome| outcome.is_completed())
            .unwrap_or(false)
    }

    /// One evaluation: scheduled path, then emergency path.
    ///
    /// Both paths compare against the state seen at the start of the tick,
    /// so one verified backup satisfies both.
    pub fn tick(&self) -> TickSummary {
        let state = self.refresh_state();
        let observed = state.last_backup_time;

        let report = self.calculator.generate_report();
        let decision = TriggerDecision::evaluate(&state, report.interval, Utc::now());
        debug!(
            should_trigger = decision.should_trigger,
            reason = %decision.reason,
            "Backup decision"
        );
        let scheduled = if decision.should_trigger {
            info!(reason = %decision.reason, "Scheduled backup triggered");
            Some(self.execute_backup_after(BackupType::Incremental, observed))
        } else {
            None
        };

        let emergency = self.check_wal_emergency(self.wal_threshold_mb, observed);

        let stats = self.stats();
        if stats.emergency_attempts_since_success >= EMERGENCY_ALERT_AFTER {
            warn!(
                attempts = stats.emergency_attempts_since_success,
                "Repeated WAL emergencies without a verified backup"
            );
        }

        TickSummary {
            decision,
            scheduled,
            emergency,
        }
    }

    /// Snapshot of state, calculator report and next decision. No side effects.
    pub fn status_report(&self) -> StatusReport {
        let state = self.state().merge(self.state_store.load());
        let report = self.calculator.generate_report();
        let decision = TriggerDecision::evaluate(&state, report.interval, Utc::now());
        let backups = self.executor.list_backups();

        StatusReport {
            wal_over_threshold: report.wal_mb > self.wal_threshold_mb,
            wal_threshold_mb: self.wal_threshold_mb,
            stats: self.stats(),
            backups_on_disk: backups.len(),
            latest_backup: backups.last().cloned(),
            state,
            report,
            decision,
        }
    }

    fn check_wal_emergency(
        &self,
        threshold_mb: f64,
        observed: Option<DateTime<Utc>>,
    ) -> Option<BackupOutcome> {
        let wal = self.calculator.wal_size_bytes();
        if wal.as_mb() <= threshold_mb {
            return None;
        }

        warn!(
            wal_mb = wal.as_mb(),
            threshold_mb, "WAL above emergency threshold"
        );
        Some(self.execute_backup_after(BackupType::Emergency, observed))
    }

    fn execute_backup_after(
        &self,
        backup_type: BackupType,
        observed: Option<DateTime<Utc>>,
    ) -> BackupOutcome {
        let _guard = lock(&self.backup_lock);
        let _file_lock = match BackupLock::acquire(&self.executor.lock_path()) {
            Ok(file_lock) => file_lock,
            Err(e) => {
                warn!(backup_type = %backup_type, error = %e, "Could not take backup lock");
                let outcome = BackupOutcome::Failed {
                    reason: e.to_string(),
                };
                self.record_outcome(&outcome);
                return outcome;
            }
        };

        // Someone else verified a backup while we waited; it covers this request.
        let current = self.refresh_state();
        if backup_type != BackupType::Manual && current.last_backup_time != observed {
            let outcome = BackupOutcome::Skipped {
                reason: "a backup completed while waiting for the lock".to_string(),
            };
            info!(backup_type = %backup_type, "{}", outcome.message());
            self.record_outcome(&outcome);
            return outcome;
        }
        if backup_type == BackupType::Emergency {
            lock(&self.stats).emergency_attempts_since_success += 1;
        }

        let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| self.run_backup(backup_type)))
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic during backup".to_string());
                error!(backup_type = %backup_type, reason = %reason, "Backup panicked");
                BackupOutcome::Failed { reason }
            }
        };
        self.record_outcome(&outcome);
        outcome
    }

    fn run_backup(&self, backup_type: BackupType) -> BackupOutcome {
        let report = self.calculator.generate_report();
        let wal = WalSize(report.wal_size_bytes);

        let record = match self.executor.run(backup_type, report.priority, wal) {
            Ok(record) => record,
            Err(e) => {
                warn!(backup_type = %backup_type, error = %e, "Backup attempt failed");
                return BackupOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let updated = self.state().with_backup_at(Utc::now());
        *lock(&self.state) = updated;
        if let Err(e) = self.state_store.save(&updated) {
            // The artifact is verified; only the bookkeeping is behind.
            error!(
                path = %self.state_store.path().display(),
                error = %e,
                "Failed to persist trigger state"
            );
        }

        BackupOutcome::Completed(record)
    }

    fn record_outcome(&self, outcome: &BackupOutcome) {
        let mut stats = lock(&self.stats);
        stats.last_attempt_at = Some(Utc::now());
        stats.last_outcome = Some(outcome.message());
        match outcome {
            BackupOutcome::Completed(_) => {
                stats.completed += 1;
                stats.consecutive_failures = 0;
                stats.emergency_attempts_since_success = 0;
            }
            BackupOutcome::Skipped { .. } => stats.skipped += 1,
            BackupOutcome::Failed { .. } => {
                stats.failed += 1;
                stats.consecutive_failures += 1;
            }
        }
    }
}

impl std::fmt::Debug for BackupTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupTrigger")
            .field("state", &self.state())
            .field("state_file", &self.state_store.path())
            .field("wal_threshold_mb", &self.wal_threshold_mb)
            .finish()
    }
}

/// Lock ignoring poison; every guarded value stays valid across a panic.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
