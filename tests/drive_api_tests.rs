//! Integration tests for the Drive HTTP client and the service-account
//! session provider, run against wiremock servers.
//!
//! ## Note on `spawn_blocking`
//!
//! `DriveClient` uses the blocking reqwest client, which cannot run on a
//! Tokio worker thread. Every client call is wrapped in
//! `tokio::task::spawn_blocking`.

use drive_backup::api::{DriveClient, DriveEndpoints};
use drive_backup::auth::{sign_assertion, AssertionClaims, ServiceAccountKey, ServiceAccountProvider};
use drive_backup::error::StorageError;
use drive_backup::storage::{AccessScope, Role, StorageProvider, StorageService};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SERVICE_ACCOUNT: &str = include_str!("fixtures/service_account.json");
const PUBLIC_KEY: &str = include_str!("fixtures/test_key.pub.pem");
const CHUNK: usize = 256 * 1024;

/// Must be called on a blocking thread: the blocking reqwest client owns a
/// runtime of its own.
fn client(uri: String) -> DriveClient {
    DriveClient::new(DriveEndpoints::with_base(&uri), "test-token")
        .expect("client build")
        .with_chunk_size(CHUNK)
}

fn fixture_key() -> ServiceAccountKey {
    serde_json::from_str(SERVICE_ACCOUNT).expect("fixture key")
}

// ── files.list ───────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_objects_sends_query_and_parses_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(query_param("q", "name contains '.zip'"))
        .and(query_param("pageSize", "100"))
        .and(query_param("fields", "nextPageToken, files(id, name)"))
        .and(header("Authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "nextPageToken": "page-2",
            "files": [
                {"id": "f1", "name": "old1.zip"},
                {"id": "f2", "name": "old2.zip"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let page = tokio::task::spawn_blocking(move || client(uri).list_objects(".zip", None))
        .await
        .expect("task")
        .expect("list");

    assert_eq!(page.objects.len(), 2);
    assert_eq!(page.objects[0].id, "f1");
    assert_eq!(page.objects[1].name, "old2.zip");
    assert_eq!(page.next_page_token.as_deref(), Some("page-2"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_objects_forwards_page_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": [{"id": "f3", "name": "old3.zip"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let page = tokio::task::spawn_blocking(move || client(uri).list_objects(".zip", Some("page-2")))
        .await
        .expect("task")
        .expect("list");

    assert_eq!(page.objects.len(), 1);
    assert_eq!(page.next_page_token, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_objects_reports_auth_failure() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid credentials"))
        .mount(&server)
        .await;

    let uri = server.uri();
    let err = tokio::task::spawn_blocking(move || client(uri).list_objects(".zip", None))
        .await
        .expect("task")
        .unwrap_err();

    match err {
        StorageError::Api { status, body, .. } => {
            assert_eq!(status, 401);
            assert_eq!(body, "invalid credentials");
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ── files.delete ─────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delete_object_targets_file_id() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/drive/v3/files/f1"))
        .and(header("Authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    tokio::task::spawn_blocking(move || client(uri).delete_object("f1"))
        .await
        .expect("task")
        .expect("delete");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delete_object_not_found_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/drive/v3/files/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("File not found"))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let err = tokio::task::spawn_blocking(move || client(uri).delete_object("gone"))
        .await
        .expect("task")
        .unwrap_err();
    assert!(matches!(err, StorageError::Api { status: 404, .. }));
}

// ── resumable upload ─────────────────────────────────────────────────

async fn mount_upload_session(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/upload/drive/v3/files"))
        .and(query_param("uploadType", "resumable"))
        .and(query_param("supportsAllDrives", "true"))
        .and(header("Authorization", "Bearer test-token"))
        .and(body_json(serde_json::json!({"name": "backup.zip"})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Location", format!("{}/upload-session/s1", server.uri()).as_str()),
        )
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_object_uploads_in_chunks() {
    let server = MockServer::start().await;
    mount_upload_session(&server).await;

    let payload: Vec<u8> = (0..CHUNK + 100).map(|i| (i % 253) as u8).collect();
    let total = payload.len();

    Mock::given(method("PUT"))
        .and(path("/upload-session/s1"))
        .and(header("Content-Range", format!("bytes 0-{}/{total}", CHUNK - 1).as_str()))
        .respond_with(
            ResponseTemplate::new(308).insert_header("Range", format!("bytes=0-{}", CHUNK - 1).as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/upload-session/s1"))
        .and(header("Content-Range", format!("bytes {CHUNK}-{}/{total}", total - 1).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "file-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let source = payload.clone();
    let object = tokio::task::spawn_blocking(move || {
        let drive = client(uri);
        let mut reader = std::io::Cursor::new(source);
        drive.create_object("backup.zip", &mut reader, total as u64, true)
    })
    .await
    .expect("task")
    .expect("upload");

    assert_eq!(object.id, "file-1");
    assert_eq!(object.name, "backup.zip");

    let sent: Vec<u8> = server
        .received_requests()
        .await
        .expect("recording enabled")
        .into_iter()
        .filter(|r| r.method.as_str() == "PUT")
        .flat_map(|r| r.body)
        .collect();
    assert_eq!(sent, payload);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_object_handles_empty_file() {
    let server = MockServer::start().await;
    mount_upload_session(&server).await;

    Mock::given(method("PUT"))
        .and(path("/upload-session/s1"))
        .and(header("Content-Range", "bytes */0"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "empty-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let object = tokio::task::spawn_blocking(move || {
        let drive = client(uri);
        let mut reader = std::io::empty();
        drive.create_object("backup.zip", &mut reader, 0, true)
    })
    .await
    .expect("task")
    .expect("upload");

    assert_eq!(object.id, "empty-1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_object_rejects_short_source() {
    let server = MockServer::start().await;
    mount_upload_session(&server).await;

    let uri = server.uri();
    let err = tokio::task::spawn_blocking(move || {
        let drive = client(uri);
        let mut reader = std::io::Cursor::new(vec![1u8; 10]);
        drive.create_object("backup.zip", &mut reader, 20, true)
    })
    .await
    .expect("task")
    .unwrap_err();

    assert!(matches!(err, StorageError::Protocol { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_object_sends_only_declared_length() {
    let server = MockServer::start().await;
    mount_upload_session(&server).await;

    Mock::given(method("PUT"))
        .and(path("/upload-session/s1"))
        .and(header("Content-Range", "bytes 0-9/10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "file-10"})))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let object = tokio::task::spawn_blocking(move || {
        let drive = client(uri);
        let mut reader = std::io::Cursor::new(vec![9u8; 50]);
        drive.create_object("backup.zip", &mut reader, 10, true)
    })
    .await
    .expect("task")
    .expect("upload");

    assert_eq!(object.id, "file-10");
    let puts: Vec<_> = server
        .received_requests()
        .await
        .expect("recording enabled")
        .into_iter()
        .filter(|r| r.method.as_str() == "PUT")
        .collect();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].body, vec![9u8; 10]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_object_rejects_mismatched_resume_range() {
    let server = MockServer::start().await;
    mount_upload_session(&server).await;

    let total = CHUNK + 100;
    Mock::given(method("PUT"))
        .and(path("/upload-session/s1"))
        .and(header("Content-Range", format!("bytes 0-{}/{total}", CHUNK - 1).as_str()))
        .respond_with(ResponseTemplate::new(308).insert_header("Range", "bytes=0-99"))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let err = tokio::task::spawn_blocking(move || {
        let drive = client(uri);
        let mut reader = std::io::Cursor::new(vec![3u8; total]);
        drive.create_object("backup.zip", &mut reader, total as u64, true)
    })
    .await
    .expect("task")
    .unwrap_err();

    assert!(matches!(err, StorageError::Protocol { operation: "upload chunk", .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_object_requires_session_location() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload/drive/v3/files"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let uri = server.uri();
    let err = tokio::task::spawn_blocking(move || {
        let drive = client(uri);
        let mut reader = std::io::Cursor::new(vec![1u8; 4]);
        drive.create_object("backup.zip", &mut reader, 4, true)
    })
    .await
    .expect("task")
    .unwrap_err();

    assert!(matches!(err, StorageError::Protocol { operation: "start upload", .. }));
}

// ── permissions.create ───────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_permission_grants_user_role() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/drive/v3/files/file-1/permissions"))
        .and(header("Authorization", "Bearer test-token"))
        .and(body_json(serde_json::json!({
            "type": "user",
            "role": "reader",
            "emailAddress": "owner@example.com"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "perm-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    tokio::task::spawn_blocking(move || {
        client(uri).create_permission("file-1", "owner@example.com", Role::Reader)
    })
    .await
    .expect("task")
    .expect("permission");
}

// ── service-account sessions ─────────────────────────────────────────

#[test]
fn assertion_is_signed_for_requested_scope() {
    let key = fixture_key();
    let now = chrono::Utc::now().timestamp();
    let jwt = sign_assertion(&key, AccessScope::File, now).expect("sign");

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&["https://oauth2.googleapis.com/token"]);
    let decoded = decode::<AssertionClaims>(
        &jwt,
        &DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).expect("public key"),
        &validation,
    )
    .expect("valid assertion");

    assert_eq!(decoded.header.kid.as_deref(), Some("test-key-1"));
    assert_eq!(decoded.claims.iss, key.client_email);
    assert_eq!(decoded.claims.scope, "https://www.googleapis.com/auth/drive.file");
    assert_eq!(decoded.claims.exp - decoded.claims.iat, 3600);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn provider_exchanges_token_and_opens_session() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains(
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer",
        ))
        .and(body_string_contains("assertion="))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "ya29.session",
            "token_type": "Bearer",
            "expires_in": 3599
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/drive/v3/files/f1"))
        .and(header("Authorization", "Bearer ya29.session"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("client.json");
    let mut key: serde_json::Value = serde_json::from_str(SERVICE_ACCOUNT).unwrap();
    key["token_uri"] = serde_json::Value::String(format!("{}/token", server.uri()));
    std::fs::write(&key_path, key.to_string()).unwrap();

    let provider = ServiceAccountProvider::new(key_path, DriveEndpoints::with_base(&server.uri()));
    tokio::task::spawn_blocking(move || {
        let session = provider.connect(AccessScope::Full)?;
        session.delete_object("f1")
    })
    .await
    .expect("task")
    .expect("session delete");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn provider_surfaces_rejected_token_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("client.json");
    let mut key: serde_json::Value = serde_json::from_str(SERVICE_ACCOUNT).unwrap();
    key["token_uri"] = serde_json::Value::String(format!("{}/token", server.uri()));
    std::fs::write(&key_path, key.to_string()).unwrap();

    let provider = ServiceAccountProvider::new(key_path, DriveEndpoints::with_base(&server.uri()));
    let result = tokio::task::spawn_blocking(move || provider.connect(AccessScope::File).map(|_| ()))
        .await
        .expect("task");

    assert!(matches!(
        result,
        Err(StorageError::Api { operation: "fetch token", status: 400, .. })
    ));
}
