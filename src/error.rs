// Error types shared by the library.
// - `StorageError` covers every failure talking to the storage service
//   (transport, auth, non-2xx answers, malformed responses).
// - `SelectError` is the local "nothing to back up" failure. It is the only
//   error the workflow lets escape to the top level.

use std::path::PathBuf;

/// Failures while communicating with the storage service.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Transport-level failure (DNS, connection, TLS, timeout).
    #[error("HTTP error during {operation}: {source}")]
    Http {
        operation: &'static str,
        source: reqwest::Error,
    },
    /// The service answered with a non-2xx status.
    #[error("{operation} returned {status}: {body}")]
    Api {
        operation: &'static str,
        status: u16,
        body: String,
    },
    /// The credential file could not be read.
    #[error("cannot read credentials {}: {source}", .path.display())]
    CredentialFile {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The credential file is not a valid service account key.
    #[error("invalid credentials {}: {source}", .path.display())]
    InvalidCredentials {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// The JWT assertion could not be signed.
    #[error("cannot sign token request: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
    /// Reading the local content stream failed mid-upload.
    #[error("I/O error during {operation}: {source}")]
    Io {
        operation: &'static str,
        source: std::io::Error,
    },
    /// The service answered in a way the client does not understand.
    #[error("unexpected response during {operation}: {reason}")]
    Protocol {
        operation: &'static str,
        reason: String,
    },
}

/// Selection of the newest local artifact failed.
#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    #[error("no file to back up in {}: {reason}", .folder.display())]
    NotFound { folder: PathBuf, reason: String },
}

/// Failures that end a workflow run.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error(transparent)]
    Select(#[from] SelectError),
}
