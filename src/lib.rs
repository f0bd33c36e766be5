// Library root
// -----------
// This crate exposes the backup rotation as a library. The binary
// (`main.rs`) reads the configuration, opens the log file and runs one
// rotation.
//
// Module responsibilities:
// - `storage`: the narrow storage capability the workflow calls through.
// - `api`: Drive v3 HTTP client implementing that capability.
// - `auth`: service-account token exchange and the session provider.
// - `workflow`: prune, select, upload and share, with per-stage isolation.
// - `config` / `logging`: startup configuration and the per-run log file.
//
// Keeping HTTP behind `storage` lets the workflow be tested with an
// in-memory fake instead of a live account.
pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod storage;
pub mod workflow;

pub use error::{BackupError, SelectError, StorageError};
pub use workflow::{run_backup, BackupWorkflow, RunSummary};
