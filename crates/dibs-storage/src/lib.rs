//! DIBS storage crate - read access to the SQLite store being protected.
//!
//! Provides a connection wrapper with WAL-mode defaults, the reference
//! schema for the tracked tables, the store metrics source consumed by the
//! interval calculator, and the write-ahead-log size probe.

pub mod db;
pub mod metrics;
pub mod migrations;
pub mod wal;

pub use db::Database;
pub use metrics::{collect_metrics, MetricsSource, SqliteMetricsSource};
pub use wal::{wal_size_bytes, WalProbe};
