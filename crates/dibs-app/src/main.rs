//! DIBS binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Initialize tracing
//! 3. Build the backup trigger over the configured store
//! 4. Dispatch the requested command
//!
//! Exit code 0 on success, 1 on failure.

mod cli;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use dibs_backup::{BackupTrigger, Monitor, StatusReport};
use dibs_core::config::DibsConfig;
use dibs_core::types::BackupType;
use dibs_core::DibsError;
use dibs_storage::Database;

use cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let loaded = load_config(&config_file);

    let mut config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => DibsConfig::default(),
    };
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }

    // Logs go to stderr so `status --json` stays machine readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = loaded {
        eprintln!("Failed to load config from {}: {}", config_file.display(), e);
        return ExitCode::FAILURE;
    }
    tracing::debug!(path = %config_file.display(), "Configuration resolved");

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    let ok = match args.command {
        Command::Init => run_init(&config, &config_file),
        Command::Check => run_check(&config),
        Command::Status { json } => run_status(&config, json),
        Command::Backup { backup_type } => run_backup(&config, backup_type),
        Command::Monitor { poll_secs } => {
            let poll = poll_secs.unwrap_or(config.schedule.poll_interval_secs);
            run_monitor(&config, poll).await
        }
    };

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Read the config file. A missing file means defaults; anything else is an error.
fn load_config(path: &Path) -> Result<DibsConfig, DibsError> {
    match DibsConfig::load(path) {
        Ok(config) => Ok(config),
        Err(DibsError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok(DibsConfig::default())
        }
        Err(e) => Err(e),
    }
}

fn run_init(config: &DibsConfig, config_file: &Path) -> bool {
    let paths = config.paths();

    if !config_file.exists() {
        if let Err(e) = config.save(config_file) {
            eprintln!("Failed to write config {}: {}", config_file.display(), e);
            return false;
        }
        println!("Wrote default config to {}", config_file.display());
    }

    match Database::new(&paths.store) {
        Ok(db) => {
            let tables = db.table_names().unwrap_or_default();
            println!(
                "Store ready at {} ({} tables)",
                paths.store.display(),
                tables.len()
            );
            true
        }
        Err(e) => {
            eprintln!("Failed to initialize store {}: {}", paths.store.display(), e);
            false
        }
    }
}

fn run_check(config: &DibsConfig) -> bool {
    let trigger = BackupTrigger::new(config);
    let decision = trigger.should_trigger_backup();
    println!(
        "{}: {}",
        if decision.should_trigger { "BACKUP DUE" } else { "NOT DUE" },
        decision.reason
    );
    true
}

fn run_status(config: &DibsConfig, json: bool) -> bool {
    let trigger = BackupTrigger::new(config);
    let status = trigger.status_report();

    if json {
        match serde_json::to_string_pretty(&status) {
            Ok(s) => {
                println!("{}", s);
                true
            }
            Err(e) => {
                eprintln!("Failed to serialize status: {}", e);
                false
            }
        }
    } else {
        print_status(&status);
        true
    }
}

fn print_status(status: &StatusReport) {
    let report = &status.report;

    match status.state.last_backup_time {
        Some(t) => println!("Last backup:      {}", t.to_rfc3339()),
        None => println!("Last backup:      never"),
    }
    println!(
        "Next decision:    {} ({})",
        if status.decision.should_trigger { "due" } else { "not due" },
        status.decision.reason
    );
    println!(
        "Interval:         {}{}",
        report.interval,
        if report.interval_fallback { " (fallback)" } else { "" }
    );
    println!("Priority:         {}", report.priority);
    println!(
        "WAL:              {:.2} MB (emergency above {:.2} MB{})",
        report.wal_mb,
        status.wal_threshold_mb,
        if status.wal_over_threshold { ", EXCEEDED" } else { "" }
    );
    match (&report.metrics, &report.metrics_error) {
        (Some(m), _) => println!(
            "Store:            {} records, {} recent, {} sessions, activity {:.2}",
            m.total_records,
            m.recent_activity,
            m.sessions_count,
            report.activity_score.unwrap_or(1.0)
        ),
        (None, Some(e)) => println!("Store:            metrics unavailable ({})", e),
        (None, None) => println!("Store:            metrics unavailable"),
    }
    println!("Backups on disk:  {}", status.backups_on_disk);
    if let Some(latest) = &status.latest_backup {
        println!(
            "Latest artifact:  {} {} ({} bytes)",
            latest.backup_type,
            latest.created_at.to_rfc3339(),
            latest.size_bytes
        );
    }
}

fn run_backup(config: &DibsConfig, backup_type: BackupType) -> bool {
    let trigger = BackupTrigger::new(config);
    let outcome = trigger.execute_backup(backup_type);
    if outcome.is_success() {
        println!("{}", outcome.message());
    } else {
        eprintln!("{}", outcome.message());
    }
    outcome.is_success()
}

async fn run_monitor(config: &DibsConfig, poll_secs: u64) -> bool {
    if poll_secs == 0 {
        eprintln!("--poll-secs must be greater than zero");
        return false;
    }

    let trigger = Arc::new(BackupTrigger::new(config));
    tracing::info!(
        store = %trigger.executor().store_path().display(),
        backup_dir = %trigger.executor().backup_dir().display(),
        "Starting DIBS v{}",
        env!("CARGO_PKG_VERSION")
    );

    let monitor = Monitor::new(trigger, Duration::from_secs(poll_secs));
    let shutdown = monitor.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested");
                shutdown.notify_one();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });

    let ticks = monitor.run().await;
    println!("Monitor stopped after {} evaluations", ticks);
    true
}
