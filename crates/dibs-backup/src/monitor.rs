//! Background monitoring loop.
//!
//! Evaluates the trigger every poll interval until shut down. Each tick runs
//! on the blocking pool since it touches SQLite and the filesystem; a tick
//! that panics is logged and the loop keeps going.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::trigger::BackupTrigger;

/// Drives a [`BackupTrigger`] on a fixed cadence.
pub struct Monitor {
    trigger: Arc<BackupTrigger>,
    poll: Duration,
    shutdown: Arc<Notify>,
}

impl Monitor {
    pub fn new(trigger: Arc<BackupTrigger>, poll: Duration) -> Self {
        Self {
            trigger,
            poll,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll
    }

    /// Run until [`Monitor::shutdown`] is called. Returns the number of ticks.
    ///
    /// The first evaluation happens immediately. A shutdown requested during
    /// a tick takes effect once that tick finishes; an in-flight backup is
    /// never abandoned half way.
    pub async fn run(&self) -> u64 {
        info!(poll_secs = self.poll.as_secs_f64(), "Backup monitor started");
        let mut ticks: u64 = 0;

        loop {
            let trigger = Arc::clone(&self.trigger);
            match tokio::task::spawn_blocking(move || trigger.tick()).await {
                Ok(summary) => {
                    debug!(
                        tick = ticks,
                        scheduled = summary.scheduled.is_some(),
                        emergency = summary.emergency.is_some(),
                        "Monitor tick finished"
                    );
                }
                Err(e) => {
                    error!(tick = ticks, error = %e, "Monitor tick aborted, continuing");
                }
            }
            ticks += 1;

            tokio::select! {
                _ = tokio::time::sleep(self.poll) => {}
                _ = self.shutdown.notified() => {
                    info!(ticks, "Backup monitor stopped");
                    return ticks;
                }
            }
        }
    }

    /// Signal the loop to stop after the current tick.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Handle that can stop the loop from another task.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use chrono::{DateTime, Utc};
    use dibs_core::config::DibsConfig;
    use dibs_core::types::BackupType;
    use dibs_core::DibsError;
    use dibs_storage::{Database, MetricsSource, WalProbe};

    use crate::calculator::IntervalCalculator;
    use crate::executor::BackupExecutor;
    use crate::state::StateStore;

    fn config_in(dir: &std::path::Path) -> DibsConfig {
        let mut config = DibsConfig::default();
        config.general.data_dir = dir.to_string_lossy().to_string();
        config
    }

    fn count_artifacts(root: &std::path::Path, kind: BackupType) -> usize {
        let dir: PathBuf = root.join("backups").join(kind.dir_name());
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("db"))
                    .count()
            })
            .unwrap_or(0)
    }

    struct PanickingSource;

    impl MetricsSource for PanickingSource {
        fn count(&self, _kind: &str) -> Result<u64, DibsError> {
            panic!("metrics source exploded")
        }

        fn count_since(&self, _kind: &str, _since: DateTime<Utc>) -> Result<u64, DibsError> {
            panic!("metrics source exploded")
        }
    }

    #[tokio::test]
    async fn test_monitor_shutdown_before_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let _db = Database::new(&config.paths().store).unwrap();
        let monitor = Monitor::new(
            Arc::new(BackupTrigger::new(&config)),
            Duration::from_secs(60),
        );

        monitor.shutdown();
        let ticks = tokio::time::timeout(Duration::from_secs(5), monitor.run())
            .await
            .expect("Monitor should shut down within timeout");

        // The first tick still runs and takes the initial backup.
        assert_eq!(ticks, 1);
        assert_eq!(count_artifacts(dir.path(), BackupType::Incremental), 1);
    }

    #[tokio::test]
    async fn test_monitor_backs_up_once_per_interval() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let _db = Database::new(&config.paths().store).unwrap();
        let trigger = Arc::new(BackupTrigger::new(&config));
        let monitor = Arc::new(Monitor::new(Arc::clone(&trigger), Duration::from_millis(20)));

        let runner = Arc::clone(&monitor);
        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(300)).await;
        monitor.shutdown();

        let ticks = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("Monitor should shut down within timeout")
            .unwrap();
        assert!(ticks >= 2, "expected several ticks, got {}", ticks);

        // Interval is at least five minutes, so only the initial backup ran.
        assert_eq!(count_artifacts(dir.path(), BackupType::Incremental), 1);
        assert_eq!(trigger.stats().completed, 1);
        assert!(trigger.state().last_backup_time.is_some());
    }

    #[tokio::test]
    async fn test_monitor_survives_panicking_tick() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let paths = config.paths();
        let calculator = IntervalCalculator::with_source(
            Arc::new(PanickingSource),
            WalProbe::for_store(&paths.store),
            &config,
        );
        let trigger = Arc::new(BackupTrigger::from_parts(
            calculator,
            BackupExecutor::from_config(&config),
            StateStore::new(paths.state_file),
            config.emergency.wal_threshold_mb,
        ));
        let monitor = Arc::new(Monitor::new(trigger, Duration::from_millis(20)));

        let runner = Arc::clone(&monitor);
        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(200)).await;
        monitor.shutdown_handle().notify_one();

        let ticks = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("Monitor should shut down within timeout")
            .unwrap();
        assert!(ticks >= 2, "loop should keep going after a panic, got {}", ticks);
    }
}
