// Entrypoint for the backup tool.
// - Keeps `main` small: load the configuration, open the log file and hand
//   a Drive session provider to the workflow.
// - Returns `anyhow::Result` only for startup failures. A run that reached
//   the workflow always ends normally; its outcome is in the log file.

use drive_backup::api::DriveEndpoints;
use drive_backup::auth::ServiceAccountProvider;
use drive_backup::config::BackupConfig;
use drive_backup::workflow::{run_with, BackupWorkflow};
use drive_backup::logging;

fn main() -> anyhow::Result<()> {
    let config = BackupConfig::from_env()?;

    let log_path = logging::init(&config.log_dir)?;
    println!("The log file will be generated at: {}", log_path.display());
    tracing::info!(folder = %config.backup_folder.display(), "backup run started");

    let provider = ServiceAccountProvider::new(&config.credentials_path, DriveEndpoints::default());
    let workflow = BackupWorkflow::new(&provider).with_options(config.rotation.clone());
    run_with(&workflow, &config.backup_folder, &config.recipient);

    tracing::info!("backup run finished");
    Ok(())
}
