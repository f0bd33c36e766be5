// Service-account authentication.
// A service account key file holds a private RSA key. To get an access token
// we sign a short-lived JWT with that key and exchange it at the key's token
// endpoint. Every session asks only for the scope its stage needs.

use crate::api::{DriveClient, DriveEndpoints};
use crate::error::StorageError;
use crate::storage::{AccessScope, StorageProvider, StorageService};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.into()
}

/// The fields of a service account key file this crate uses.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl ServiceAccountKey {
    /// Read and parse a JSON key file.
    pub fn from_file(path: &Path) -> Result<Self, StorageError> {
        let data = std::fs::read_to_string(path).map_err(|source| StorageError::CredentialFile {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| StorageError::InvalidCredentials {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// JWT claims of the token request assertion.
#[derive(Debug, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Build the signed assertion for `scope`, issued at `issued_at` (unix seconds).
pub fn sign_assertion(
    key: &ServiceAccountKey,
    scope: AccessScope,
    issued_at: i64,
) -> Result<String, StorageError> {
    let claims = AssertionClaims {
        iss: key.client_email.clone(),
        scope: scope.as_url().to_string(),
        aud: key.token_uri.clone(),
        iat: issued_at,
        exp: issued_at + ASSERTION_LIFETIME_SECS,
    };
    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();
    let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
    Ok(encode(&header, &claims, &signing_key)?)
}

/// Exchange a signed assertion for a bearer token.
pub fn fetch_access_token(
    client: &Client,
    key: &ServiceAccountKey,
    scope: AccessScope,
) -> Result<String, StorageError> {
    let assertion = sign_assertion(key, scope, chrono::Utc::now().timestamp())?;
    let res = client
        .post(&key.token_uri)
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
        .send()
        .map_err(|source| StorageError::Http {
            operation: "fetch token",
            source,
        })?;
    if !res.status().is_success() {
        let status = res.status().as_u16();
        let body = res.text().unwrap_or_default();
        return Err(StorageError::Api {
            operation: "fetch token",
            status,
            body,
        });
    }
    let token: TokenResponse = res.json().map_err(|source| StorageError::Http {
        operation: "fetch token",
        source,
    })?;
    Ok(token.access_token)
}

/// Opens Drive sessions authenticated with a service account key file.
/// The key is re-read for every session so a run always uses the file as
/// it is on disk.
pub struct ServiceAccountProvider {
    credentials_path: PathBuf,
    endpoints: DriveEndpoints,
}

impl ServiceAccountProvider {
    pub fn new(credentials_path: impl Into<PathBuf>, endpoints: DriveEndpoints) -> Self {
        ServiceAccountProvider {
            credentials_path: credentials_path.into(),
            endpoints,
        }
    }
}

impl StorageProvider for ServiceAccountProvider {
    fn connect(&self, scope: AccessScope) -> Result<Box<dyn StorageService>, StorageError> {
        let key = ServiceAccountKey::from_file(&self.credentials_path)?;
        let client = Client::builder().build().map_err(|source| StorageError::Http {
            operation: "build client",
            source,
        })?;
        let token = fetch_access_token(&client, &key, scope)?;
        tracing::debug!(account = %key.client_email, scope = scope.as_url(), "authenticated session");
        Ok(Box::new(DriveClient::new(self.endpoints.clone(), token)?))
    }
}
