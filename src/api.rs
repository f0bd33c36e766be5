// API client module: a small blocking HTTP client for the Drive v3 REST API.
// It implements `StorageService` so the workflow can list, delete, upload
// and share files without knowing about HTTP.
//
// Uploads use the resumable protocol: one request opens an upload session,
// then the file is sent in fixed-size chunks so large backups never have to
// fit in memory.

use crate::error::StorageError;
use crate::storage::{ObjectPage, RemoteObject, Role, StorageService};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{CONTENT_RANGE, LOCATION, RANGE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Listing page size requested from the service.
pub const PAGE_SIZE: u32 = 100;

/// Upload chunk size. Drive requires a multiple of 256 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 256 * 1024;

const UPLOAD_CHUNK_ALIGN: usize = 256 * 1024;

/// Base URLs of the metadata and upload endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveEndpoints {
    pub api_base: String,
    pub upload_base: String,
}

impl Default for DriveEndpoints {
    fn default() -> Self {
        DriveEndpoints {
            api_base: "https://www.googleapis.com/drive/v3".into(),
            upload_base: "https://www.googleapis.com/upload/drive/v3".into(),
        }
    }
}

impl DriveEndpoints {
    /// Point both endpoints at one server, as a mock server does.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        DriveEndpoints {
            api_base: format!("{base}/drive/v3"),
            upload_base: format!("{base}/upload/drive/v3"),
        }
    }
}

/// Drive client holding a reqwest blocking client, the endpoints and the
/// bearer token of one authenticated session.
pub struct DriveClient {
    client: Client,
    endpoints: DriveEndpoints,
    token: String,
    chunk_size: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<RemoteObject>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct CreatedFile {
    id: String,
}

#[derive(Serialize)]
struct FileMetadata<'a> {
    name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserPermission<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    role: &'static str,
    email_address: &'a str,
}

impl DriveClient {
    /// Build a client for a session authenticated with `token`.
    pub fn new(endpoints: DriveEndpoints, token: impl Into<String>) -> Result<Self, StorageError> {
        // 308 means "resume incomplete" in the upload protocol, so the
        // client must hand 3xx answers back instead of following them.
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|source| StorageError::Http {
                operation: "build client",
                source,
            })?;
        Ok(DriveClient {
            client,
            endpoints,
            token: token.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// Override the upload chunk size, rounded up to a multiple of 256 KiB.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        let chunks = chunk_size.max(1).div_ceil(UPLOAD_CHUNK_ALIGN);
        self.chunk_size = chunks * UPLOAD_CHUNK_ALIGN;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Send an authenticated request and turn non-2xx answers into errors.
    fn send(&self, request: RequestBuilder, operation: &'static str) -> Result<Response, StorageError> {
        let res = request
            .bearer_auth(&self.token)
            .send()
            .map_err(|source| StorageError::Http { operation, source })?;
        if !res.status().is_success() {
            return Err(api_error(res, operation));
        }
        Ok(res)
    }

    /// Open a resumable upload session and return its URI.
    fn start_upload(&self, name: &str, len: u64, cross_drive: bool) -> Result<String, StorageError> {
        let url = format!("{}/files", self.endpoints.upload_base);
        let request = self
            .client
            .post(&url)
            .query(&[
                ("uploadType", "resumable"),
                ("fields", "id"),
                ("supportsAllDrives", if cross_drive { "true" } else { "false" }),
            ])
            .header("X-Upload-Content-Type", "application/octet-stream")
            .header("X-Upload-Content-Length", len.to_string())
            .json(&FileMetadata { name });
        let res = self.send(request, "start upload")?;
        res.headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| StorageError::Protocol {
                operation: "start upload",
                reason: "missing Location header".into(),
            })
    }
}

impl StorageService for DriveClient {
    fn list_objects(
        &self,
        name_contains: &str,
        page_token: Option<&str>,
    ) -> Result<ObjectPage, StorageError> {
        let url = format!("{}/files", self.endpoints.api_base);
        let mut params = vec![
            ("q", format!("name contains '{}'", escape_query(name_contains))),
            ("pageSize", PAGE_SIZE.to_string()),
            ("fields", "nextPageToken, files(id, name)".to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        let res = self.send(self.client.get(&url).query(&params), "list files")?;
        let list: FileList = res.json().map_err(|source| StorageError::Http {
            operation: "list files",
            source,
        })?;
        Ok(ObjectPage {
            objects: list.files,
            next_page_token: list.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    fn delete_object(&self, id: &str) -> Result<(), StorageError> {
        let url = format!("{}/files/{}", self.endpoints.api_base, id);
        self.send(
            self.client.delete(&url).query(&[("supportsAllDrives", "true")]),
            "delete file",
        )?;
        Ok(())
    }

    fn create_object(
        &self,
        name: &str,
        content: &mut dyn Read,
        len: u64,
        cross_drive: bool,
    ) -> Result<RemoteObject, StorageError> {
        let session = self.start_upload(name, len, cross_drive)?;
        let mut reader = content.take(len);
        let mut buf = vec![0u8; self.chunk_size];
        let mut offset = 0u64;

        loop {
            let n = fill_chunk(&mut reader, &mut buf)?;
            let end = offset + n as u64;
            if n < buf.len() && end < len {
                return Err(StorageError::Protocol {
                    operation: "upload chunk",
                    reason: format!("source ended after {end} of {len} bytes"),
                });
            }

            let range = if n == 0 {
                format!("bytes */{len}")
            } else {
                format!("bytes {}-{}/{}", offset, end - 1, len)
            };
            tracing::debug!(%range, "sending upload chunk");

            let res = self
                .client
                .put(&session)
                .bearer_auth(&self.token)
                .header(CONTENT_RANGE, range)
                .body(buf[..n].to_vec())
                .send()
                .map_err(|source| StorageError::Http {
                    operation: "upload chunk",
                    source,
                })?;

            if res.status() == StatusCode::PERMANENT_REDIRECT {
                let persisted = persisted_bytes(&res);
                if n == 0 || persisted != end {
                    return Err(StorageError::Protocol {
                        operation: "upload chunk",
                        reason: format!("service holds {persisted} bytes, expected {end}"),
                    });
                }
                offset = end;
                continue;
            }
            if !res.status().is_success() {
                return Err(api_error(res, "upload chunk"));
            }

            let created: CreatedFile = res.json().map_err(|source| StorageError::Http {
                operation: "upload chunk",
                source,
            })?;
            return Ok(RemoteObject {
                id: created.id,
                name: name.to_string(),
            });
        }
    }

    fn create_permission(
        &self,
        object_id: &str,
        recipient: &str,
        role: Role,
    ) -> Result<(), StorageError> {
        let url = format!("{}/files/{}/permissions", self.endpoints.api_base, object_id);
        let body = UserPermission {
            kind: "user",
            role: role.as_str(),
            email_address: recipient,
        };
        let request = self
            .client
            .post(&url)
            .query(&[("fields", "id"), ("supportsAllDrives", "true")])
            .json(&body);
        self.send(request, "create permission")?;
        Ok(())
    }
}

/// Escape a literal for use inside a single-quoted Drive query string.
pub fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn api_error(res: Response, operation: &'static str) -> StorageError {
    let status = res.status().as_u16();
    let body = res.text().unwrap_or_default();
    StorageError::Api {
        operation,
        status,
        body,
    }
}

/// Bytes the service reports as persisted, from a `Range: bytes=0-N` header.
fn persisted_bytes(res: &Response) -> u64 {
    res.headers()
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit('-').next())
        .and_then(|last| last.trim().parse::<u64>().ok())
        .map(|last| last + 1)
        .unwrap_or(0)
}

/// Read until `buf` is full or the reader is exhausted.
fn fill_chunk(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize, StorageError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(StorageError::Io {
                    operation: "upload chunk",
                    source,
                })
            }
        }
    }
    Ok(filled)
}
