//! Dynamic incremental backup engine.
//!
//! The [`IntervalCalculator`] turns live store metrics into a bounded backup
//! cadence and an advisory priority. The [`BackupTrigger`] owns the persisted
//! last-backup time, decides when to act, and runs the copy-then-verify
//! sequence through the [`BackupExecutor`] under a [`BackupLock`] shared by
//! every process. The [`Monitor`] drives the trigger on a fixed poll cadence
//! until shut down.

pub mod calculator;
pub mod error;
pub mod executor;
pub mod lock;
pub mod monitor;
pub mod state;
pub mod trigger;

pub use calculator::{IntervalCalculator, Report};
pub use error::{BackupError, StateError};
pub use executor::{BackupExecutor, BackupMetadata, BackupRecord};
pub use lock::BackupLock;
pub use monitor::Monitor;
pub use state::{StateStore, TriggerState};
pub use trigger::{BackupOutcome, BackupTrigger, RuntimeStats, StatusReport, TriggerDecision};
