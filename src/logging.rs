// Per-run log file.
// Each run writes to its own file named after the start time, so a scheduled
// task leaves one log per invocation behind.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,drive_backup=debug";

/// `<log_dir>/backup-upload-YYYY-MM-DD-HH-MM-SS.txt` for a run started at `started`.
pub fn log_file_path(log_dir: &Path, started: DateTime<Local>) -> PathBuf {
    log_dir.join(format!(
        "backup-upload-{}.txt",
        started.format("%Y-%m-%d-%H-%M-%S")
    ))
}

/// Create the log file for this run and install it as the global tracing
/// subscriber. Returns the absolute path of the file.
///
/// `RUST_LOG` overrides the default filter.
pub fn init(log_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let path = log_file_path(log_dir, Local::now());
    let file = File::create(&path)
        .with_context(|| format!("Failed to create log file {}", path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install logger: {e}"))?;

    Ok(std::fs::canonicalize(&path).unwrap_or(path))
}
