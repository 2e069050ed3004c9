//! CLI argument definitions for the `dibs` binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use dibs_core::types::BackupType;

/// DIBS: dynamic incremental backups for a live SQLite store.
#[derive(Parser, Debug)]
#[command(name = "dibs", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory holding the store, backups and state file.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Watch the store and back it up on the dynamic cadence until Ctrl-C.
    Monitor {
        /// Seconds between evaluations (defaults to schedule.poll_interval_secs).
        #[arg(long = "poll-secs")]
        poll_secs: Option<u64>,
    },
    /// Print the current state, calculator report and next decision.
    Status {
        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Take a backup now.
    Backup {
        /// Backup type: manual, incremental or emergency.
        #[arg(long = "type", default_value = "manual", value_parser = parse_backup_type)]
        backup_type: BackupType,
    },
    /// Print whether a scheduled backup is due, without acting.
    Check,
    /// Create the store with the reference schema and write a default config.
    Init,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > DIBS_CONFIG env var > platform default (~/.dibs/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("DIBS_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory override. `None` keeps the config value.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Resolve the log level override. `None` keeps the config value.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

fn parse_backup_type(s: &str) -> Result<BackupType, String> {
    s.parse()
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".dibs").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".dibs").join("config.toml");
    }
    PathBuf::from("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_monitor_with_poll() {
        let args = CliArgs::try_parse_from(["dibs", "monitor", "--poll-secs", "5"]).unwrap();
        assert_eq!(args.command, Command::Monitor { poll_secs: Some(5) });
    }

    #[test]
    fn test_backup_defaults_to_manual() {
        let args = CliArgs::try_parse_from(["dibs", "backup"]).unwrap();
        assert_eq!(
            args.command,
            Command::Backup {
                backup_type: BackupType::Manual
            }
        );

        let args = CliArgs::try_parse_from(["dibs", "backup", "--type", "emergency"]).unwrap();
        assert_eq!(
            args.command,
            Command::Backup {
                backup_type: BackupType::Emergency
            }
        );
    }

    #[test]
    fn test_unknown_backup_type_rejected() {
        assert!(CliArgs::try_parse_from(["dibs", "backup", "--type", "full"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args =
            CliArgs::try_parse_from(["dibs", "status", "--json", "-d", "/tmp/dibs", "-l", "debug"])
                .unwrap();
        assert_eq!(args.command, Command::Status { json: true });
        assert_eq!(args.resolve_data_dir().as_deref(), Some("/tmp/dibs"));
        assert_eq!(args.resolve_log_level().as_deref(), Some("debug"));
    }

    #[test]
    fn test_config_flag_wins() {
        let args = CliArgs::try_parse_from(["dibs", "-c", "/etc/dibs.toml", "check"]).unwrap();
        assert_eq!(args.resolve_config_path(), PathBuf::from("/etc/dibs.toml"));
    }
}
