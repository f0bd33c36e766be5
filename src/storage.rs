// Storage capability consumed by the backup workflow.
// The workflow never talks HTTP directly: it goes through `StorageService`
// so the Drive client (`api::DriveClient`) and the in-memory test fakes are
// interchangeable.

use crate::error::StorageError;
use serde::Deserialize;
use std::fmt;
use std::io::Read;

/// A file stored in the cloud account, addressed by its service id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteObject {
    pub id: String,
    pub name: String,
}

/// One page of a listing. `next_page_token` is `None` on the last page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPage {
    pub objects: Vec<RemoteObject>,
    pub next_page_token: Option<String>,
}

/// OAuth scope requested for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessScope {
    /// Full access, needed to delete files the session did not create.
    Full,
    /// Access to files created by this application only.
    File,
}

impl AccessScope {
    pub fn as_url(&self) -> &'static str {
        match self {
            AccessScope::Full => "https://www.googleapis.com/auth/drive",
            AccessScope::File => "https://www.googleapis.com/auth/drive.file",
        }
    }
}

/// Permission level of an access grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Reader,
    Writer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Reader => "reader",
            Role::Writer => "writer",
        }
    }

    /// Parse the wire name (`reader` / `writer`), case-insensitive.
    pub fn parse(value: &str) -> Option<Role> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reader" => Some(Role::Reader),
            "writer" => Some(Role::Writer),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four calls the workflow needs from the storage service.
pub trait StorageService {
    /// List objects whose name contains `name_contains`, one page at a time.
    fn list_objects(
        &self,
        name_contains: &str,
        page_token: Option<&str>,
    ) -> Result<ObjectPage, StorageError>;

    fn delete_object(&self, id: &str) -> Result<(), StorageError>;

    /// Create an object named `name` from exactly `len` bytes of `content`.
    fn create_object(
        &self,
        name: &str,
        content: &mut dyn Read,
        len: u64,
        cross_drive: bool,
    ) -> Result<RemoteObject, StorageError>;

    fn create_permission(
        &self,
        object_id: &str,
        recipient: &str,
        role: Role,
    ) -> Result<(), StorageError>;
}

/// Opens authenticated sessions. Each stage asks for the narrowest scope it
/// needs, so a run may open several sessions.
pub trait StorageProvider {
    fn connect(&self, scope: AccessScope) -> Result<Box<dyn StorageService>, StorageError>;
}
