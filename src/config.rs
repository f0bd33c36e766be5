// Runtime configuration read from environment variables at startup.
// The tool takes no command-line arguments: the backup folder, the key file
// and the recipient are fixed per machine, so they live in the environment
// (or a service unit / scheduled task definition).

use crate::storage::Role;
use crate::workflow::RotationOptions;
use std::path::PathBuf;

pub const FOLDER_VAR: &str = "BACKUP_FOLDER";
pub const CREDENTIALS_VAR: &str = "BACKUP_CREDENTIALS";
pub const RECIPIENT_VAR: &str = "BACKUP_RECIPIENT";
pub const LOG_DIR_VAR: &str = "BACKUP_LOG_DIR";
pub const PRUNE_PATTERN_VAR: &str = "BACKUP_PRUNE_PATTERN";
pub const SHARE_ROLE_VAR: &str = "BACKUP_SHARE_ROLE";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Everything one backup run needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    pub backup_folder: PathBuf,
    pub credentials_path: PathBuf,
    pub recipient: String,
    pub log_dir: PathBuf,
    pub rotation: RotationOptions,
}

impl BackupConfig {
    /// Load the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the configuration through `lookup`, which maps a variable name
    /// to its value. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let backup_folder = PathBuf::from(required(FOLDER_VAR)?);
        let credentials_path = PathBuf::from(required(CREDENTIALS_VAR)?);
        let recipient = required(RECIPIENT_VAR)?.trim().to_string();
        if !recipient.contains('@') {
            return Err(ConfigError::Invalid {
                key: RECIPIENT_VAR,
                value: recipient,
            });
        }

        let log_dir = get(LOG_DIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(default_log_dir);

        let mut rotation = RotationOptions::default();
        if let Some(pattern) = get(PRUNE_PATTERN_VAR) {
            rotation.prune_pattern = pattern;
        }
        if let Some(role) = get(SHARE_ROLE_VAR) {
            rotation.share_role = Role::parse(&role).ok_or(ConfigError::Invalid {
                key: SHARE_ROLE_VAR,
                value: role,
            })?;
        }

        Ok(BackupConfig {
            backup_folder,
            credentials_path,
            recipient,
            log_dir,
            rotation,
        })
    }
}

/// `<local data dir>/drive-backup/logs`, or `./logs` when the platform has
/// no data directory.
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("drive-backup").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}
