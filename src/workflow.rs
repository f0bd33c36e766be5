// Backup rotation workflow.
// One run executes four stages in order:
//   1. prune: delete remote archives whose name contains the prune pattern
//   2. select: find the newest file in the local backup folder
//   3. upload: stream that file to the storage service
//   4. share: grant the recipient access to the new object
// Only a failed selection ends the run. Every other failure is logged and
// recorded in the `RunSummary` so callers can see what happened.

use crate::error::{BackupError, SelectError, StorageError};
use crate::storage::{AccessScope, RemoteObject, Role, StorageProvider, StorageService};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{error, info, warn};

/// A file in the local backup folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArtifact {
    pub path: PathBuf,
    pub modified: SystemTime,
}

impl LocalArtifact {
    /// Base file name, used as the remote object name.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Result of a prune stage whose listing succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub deleted: Vec<RemoteObject>,
    pub failed: Vec<RemoteObject>,
}

/// The uploaded object and whether the access grant was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub object: RemoteObject,
    pub shared: bool,
}

/// Per-stage outcome of a run that got past selection.
#[derive(Debug)]
pub struct RunSummary {
    pub prune: Result<PruneReport, StorageError>,
    pub artifact: LocalArtifact,
    pub upload: Result<UploadReceipt, StorageError>,
}

/// Tunables of the rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationOptions {
    /// Remote objects whose name contains this are pruned.
    pub prune_pattern: String,
    pub share_role: Role,
    /// Ask the service to support shared drives on upload.
    pub cross_drive: bool,
}

impl Default for RotationOptions {
    fn default() -> Self {
        RotationOptions {
            prune_pattern: ".zip".into(),
            share_role: Role::Reader,
            cross_drive: true,
        }
    }
}

/// Delete every remote object whose name contains `pattern`.
///
/// All pages are listed before the first delete, so removing objects cannot
/// shift the pages still to be read. A listing failure aborts the stage
/// before anything is deleted. A failed delete is logged and the stage moves
/// on to the next object.
pub fn prune(service: &dyn StorageService, pattern: &str) -> Result<PruneReport, StorageError> {
    let mut matches = Vec::new();
    let mut page_token: Option<String> = None;
    loop {
        let page = service.list_objects(pattern, page_token.as_deref())?;
        matches.extend(
            page.objects
                .into_iter()
                .filter(|object| object.name.contains(pattern)),
        );
        page_token = page.next_page_token;
        if page_token.is_none() {
            break;
        }
    }

    let mut report = PruneReport::default();
    if matches.is_empty() {
        info!("No {pattern} files found to delete.");
        return Ok(report);
    }

    for object in matches {
        match service.delete_object(&object.id) {
            Ok(()) => {
                info!("{pattern} file deleted: {}", object.name);
                report.deleted.push(object);
            }
            Err(e) => {
                error!("Error deleting the file {}: {e}", object.name);
                report.failed.push(object);
            }
        }
    }
    Ok(report)
}

/// Return the most recently modified regular file directly inside `folder`.
pub fn select_latest(folder: &Path) -> Result<LocalArtifact, SelectError> {
    let not_found = |reason: String| SelectError::NotFound {
        folder: folder.to_path_buf(),
        reason,
    };
    let entries = std::fs::read_dir(folder).map_err(|e| not_found(e.to_string()))?;

    let mut latest: Option<LocalArtifact> = None;
    for entry in entries {
        let entry = entry.map_err(|e| not_found(e.to_string()))?;
        // Follow symlinks so a linked backup counts as the file it points to.
        let metadata = match std::fs::metadata(entry.path()) {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                warn!("Skipping {}: {e}", entry.path().display());
                continue;
            }
        };
        let modified = metadata.modified().map_err(|e| not_found(e.to_string()))?;
        if latest.as_ref().map_or(true, |best| modified > best.modified) {
            latest = Some(LocalArtifact {
                path: entry.path(),
                modified,
            });
        }
    }

    let latest = latest.ok_or_else(|| not_found("folder contains no files".into()))?;
    info!("Latest file: {}", latest.path.display());
    Ok(latest)
}

/// Stream `artifact` to the service under its base file name.
pub fn upload(
    service: &dyn StorageService,
    artifact: &LocalArtifact,
    cross_drive: bool,
) -> Result<RemoteObject, StorageError> {
    let io_err = |source: std::io::Error| StorageError::Io {
        operation: "open upload source",
        source,
    };
    let file = File::open(&artifact.path).map_err(io_err)?;
    let len = file.metadata().map_err(io_err)?.len();

    // indicatif hides the bar when stderr is not a terminal.
    let progress = ProgressBar::new(len);
    let style = ProgressStyle::with_template("{msg} [{bar:40}] {bytes}/{total_bytes} ({eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    progress.set_style(style);
    progress.set_message(artifact.file_name());

    info!("Uploading file: {}", artifact.path.display());
    let mut reader = progress.wrap_read(file);
    let result = service.create_object(&artifact.file_name(), &mut reader, len, cross_drive);
    progress.finish_and_clear();

    let object = result?;
    info!("File uploaded successfully. File ID: {}", object.id);
    Ok(object)
}

/// Grant `recipient` access to the object with `object_id`.
pub fn share(
    service: &dyn StorageService,
    object_id: &str,
    recipient: &str,
    role: Role,
) -> Result<(), StorageError> {
    service.create_permission(object_id, recipient, role)?;
    info!("File shared with {recipient} as {role}");
    Ok(())
}

/// The rotation workflow bound to a storage provider.
pub struct BackupWorkflow<'a> {
    provider: &'a dyn StorageProvider,
    options: RotationOptions,
}

impl<'a> BackupWorkflow<'a> {
    pub fn new(provider: &'a dyn StorageProvider) -> Self {
        BackupWorkflow {
            provider,
            options: RotationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RotationOptions) -> Self {
        self.options = options;
        self
    }

    /// Run all stages. Only a selection failure is returned as an error.
    pub fn run(&self, local_folder: &Path, recipient: &str) -> Result<RunSummary, BackupError> {
        let prune = self.prune_stage();
        match &prune {
            Ok(report) if !report.failed.is_empty() => warn!(
                deleted = report.deleted.len(),
                failed = report.failed.len(),
                "prune finished with failures"
            ),
            Ok(report) => info!(deleted = report.deleted.len(), "prune finished"),
            Err(e) => warn!("prune skipped: {e}"),
        }

        let artifact = select_latest(local_folder).map_err(|e| {
            error!("Error getting the latest file: {e}");
            e
        })?;
        info!("Uploading the latest file: {}", artifact.path.display());

        let upload = self.upload_stage(&artifact, recipient);
        if let Err(e) = &upload {
            error!("Error uploading the file: {e}");
        }

        Ok(RunSummary {
            prune,
            artifact,
            upload,
        })
    }

    fn prune_stage(&self) -> Result<PruneReport, StorageError> {
        self.provider
            .connect(AccessScope::Full)
            .and_then(|service| prune(service.as_ref(), &self.options.prune_pattern))
            .map_err(|e| {
                error!("Error while trying to delete {} files: {e}", self.options.prune_pattern);
                e
            })
    }

    fn upload_stage(&self, artifact: &LocalArtifact, recipient: &str) -> Result<UploadReceipt, StorageError> {
        let service = self.provider.connect(AccessScope::File)?;
        let object = upload(service.as_ref(), artifact, self.options.cross_drive)?;

        let shared = match share(service.as_ref(), &object.id, recipient, self.options.share_role) {
            Ok(()) => true,
            Err(e) => {
                error!("Error sharing the file: {e}");
                false
            }
        };
        Ok(UploadReceipt { object, shared })
    }
}

/// Run one backup rotation with default options.
///
/// Nothing is returned: every outcome ends up in the log.
pub fn run_backup(local_folder: &Path, provider: &dyn StorageProvider, recipient: &str) {
    run_with(&BackupWorkflow::new(provider), local_folder, recipient);
}

/// Run `workflow` and log whatever escapes it.
pub fn run_with(workflow: &BackupWorkflow<'_>, local_folder: &Path, recipient: &str) {
    if let Err(e) = workflow.run(local_folder, recipient) {
        error!("Error in the backup run: {e}");
    }
}
