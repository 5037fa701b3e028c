//! Remote Object Store
//!
//! RPC client for a Dropbox-style file API. Authentication exchanges a
//! long-lived refresh token (with the app key and secret) for a short-lived
//! access token, cached and refreshed transparently before it expires.
//!
//! ```text
//! RPC endpoints     POST {api_url}/<endpoint>         JSON in, JSON out
//! Content endpoints POST {content_url}/files/<op>     args in Dropbox-API-Arg header,
//!                                                     bytes in the body
//! ```
//!
//! Endpoint errors come back as HTTP 409 with an `error_summary` such as
//! `path/not_found/..` or `path/conflict/file/..`, which map onto
//! `NotFound` and `Conflict`. Request timeouts come from the HTTP client.

use crate::error::{StoreError, StoreResult};
use crate::store::object_store::{ObjectMeta, ObjectStore, RevisionTracker, StoreFuture, UploadMode};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Refresh this long before the token's reported expiry
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Lifetime assumed when the token response omits `expires_in`
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(4 * 60 * 60);

const API_ARG_HEADER: &str = "Dropbox-API-Arg";
const API_RESULT_HEADER: &str = "Dropbox-API-Result";

/// App credentials for the refresh-token exchange
#[derive(Clone, Default, Deserialize, Serialize)]
pub struct RemoteCredentials {
    pub app_key: String,
    pub app_secret: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCredentials")
            .field("app_key", &self.app_key)
            .field("app_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

impl RemoteCredentials {
    pub fn new(
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        RemoteCredentials {
            app_key: app_key.into(),
            app_secret: app_secret.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// `Auth` naming the first absent credential
    pub fn validate(&self) -> StoreResult<()> {
        for (name, value) in [
            ("app key", &self.app_key),
            ("app secret", &self.app_secret),
            ("refresh token", &self.refresh_token),
        ] {
            if value.trim().is_empty() {
                return Err(StoreError::Auth(format!("missing {}", name)));
            }
        }
        Ok(())
    }
}

/// Base URLs of the remote service
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RemoteEndpoints {
    pub token_url: String,
    pub api_url: String,
    pub content_url: String,
}

impl Default for RemoteEndpoints {
    fn default() -> Self {
        RemoteEndpoints {
            token_url: "https://api.dropboxapi.com/oauth2/token".to_string(),
            api_url: "https://api.dropboxapi.com/2".to_string(),
            content_url: "https://content.dropboxapi.com/2".to_string(),
        }
    }
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct AccountInfo {
    #[serde(default)]
    account_id: String,
}

#[derive(Deserialize)]
struct FileMetadata {
    rev: String,
    #[serde(default)]
    size: u64,
}

#[derive(Deserialize)]
struct RelocationResult {
    metadata: FileMetadata,
}

#[derive(Deserialize)]
struct ListFolderResult {
    entries: Vec<ListEntry>,
    cursor: String,
    has_more: bool,
}

#[derive(Deserialize)]
struct ListEntry {
    name: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error_summary: String,
}

/// Authenticated handle on the remote store
pub struct RemoteObjectStore {
    client: Client,
    credentials: RemoteCredentials,
    endpoints: RemoteEndpoints,
    token: Mutex<Option<AccessToken>>,
    revisions: RevisionTracker,
}

impl std::fmt::Debug for RemoteObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObjectStore")
            .field("credentials", &self.credentials)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

impl RemoteObjectStore {
    /// Validate credentials, exchange them for an access token and confirm
    /// the session with one identity round-trip.
    ///
    /// Missing credentials fail with `Auth` before any network traffic.
    pub async fn bootstrap(
        credentials: RemoteCredentials,
        endpoints: RemoteEndpoints,
        request_timeout: Duration,
    ) -> StoreResult<Self> {
        credentials.validate()?;
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| StoreError::Config(format!("failed to build HTTP client: {}", e)))?;

        let store = RemoteObjectStore {
            client,
            credentials,
            endpoints,
            token: Mutex::new(None),
            revisions: RevisionTracker::new(),
        };
        let account: AccountInfo = store
            .rpc("users/get_current_account", &Value::Null, "")
            .await?;
        info!(account_id = %account.account_id, "remote store session established");
        Ok(store)
    }

    async fn access_token(&self) -> StoreResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + REFRESH_MARGIN {
                return Ok(token.value.clone());
            }
        }
        let fresh = self.refresh_access_token().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    async fn refresh_access_token(&self) -> StoreResult<AccessToken> {
        debug!("refreshing access token");
        let response = self
            .client
            .post(&self.endpoints.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.credentials.refresh_token.as_str()),
                ("client_id", self.credentials.app_key.as_str()),
                ("client_secret", self.credentials.app_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Auth(format!("token refresh rejected: {}", body)));
        }
        if !status.is_success() {
            return Err(StoreError::Transport(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);
        Ok(AccessToken {
            value: token.access_token,
            expires_at: Instant::now() + lifetime,
        })
    }

    async fn forget_token(&self) {
        *self.token.lock().await = None;
    }

    /// Map a non-success response onto the error taxonomy
    async fn check(&self, response: Response, path: &str) -> StoreResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED => {
                self.forget_token().await;
                Err(StoreError::Auth(format!("access token rejected: {}", body)))
            }
            StatusCode::CONFLICT => Err(classify_endpoint_error(&body, path)),
            _ => Err(StoreError::Transport(format!(
                "remote returned {}: {}",
                status, body
            ))),
        }
    }

    async fn rpc<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
        path: &str,
    ) -> StoreResult<R> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!("{}/{}", self.endpoints.api_url, endpoint))
            .bearer_auth(&token)
            .json(body)
            .send()
            .await?;
        let response = self.check(response, path).await?;
        Ok(response.json().await?)
    }

    fn observed_revision(&self, path: &str) -> StoreResult<String> {
        self.revisions.observed(path).ok_or_else(|| {
            StoreError::Conflict(format!("{}: no revision observed by this handle", path))
        })
    }
}

impl ObjectStore for RemoteObjectStore {
    fn download_object<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let token = self.access_token().await?;
            let response = self
                .client
                .post(format!("{}/files/download", self.endpoints.content_url))
                .bearer_auth(&token)
                .header(API_ARG_HEADER, header_safe_json(&json!({ "path": path })))
                .send()
                .await?;
            let response = self.check(response, path).await?;

            let rev = response
                .headers()
                .get(API_RESULT_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| serde_json::from_str::<FileMetadata>(s).ok())
                .map(|meta| meta.rev);
            match rev {
                Some(rev) => self.revisions.observe(path, &rev),
                None => warn!(path, "download response carried no revision"),
            }
            Ok(response.bytes().await?.to_vec())
        })
    }

    fn upload_object<'a>(
        &'a self,
        path: &'a str,
        data: &'a [u8],
        mode: UploadMode,
    ) -> StoreFuture<'a, ObjectMeta> {
        Box::pin(async move {
            let mode_arg = match mode {
                UploadMode::Overwrite => json!("overwrite"),
                UploadMode::UpdateExisting => {
                    let rev = self.observed_revision(path)?;
                    json!({ ".tag": "update", "update": rev })
                }
            };
            let arg = json!({
                "path": path,
                "mode": mode_arg,
                "autorename": false,
                "mute": true,
            });

            let token = self.access_token().await?;
            let response = self
                .client
                .post(format!("{}/files/upload", self.endpoints.content_url))
                .bearer_auth(&token)
                .header(API_ARG_HEADER, header_safe_json(&arg))
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(data.to_vec())
                .send()
                .await?;
            let meta: FileMetadata = self.check(response, path).await?.json().await?;

            self.revisions.observe(path, &meta.rev);
            Ok(ObjectMeta {
                path: path.to_string(),
                size_bytes: meta.size,
                revision: meta.rev,
            })
        })
    }

    fn delete_object<'a>(&'a self, path: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.revisions.forget(path);
            match self
                .rpc::<_, Value>("files/delete_v2", &json!({ "path": path }), path)
                .await
            {
                Ok(_) => Ok(()),
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(e),
            }
        })
    }

    fn move_object<'a>(&'a self, from: &'a str, to: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let arg = json!({ "from_path": from, "to_path": to, "autorename": false });
            let result: RelocationResult = self.rpc("files/move_v2", &arg, from).await?;
            self.revisions.forget(from);
            self.revisions.observe(to, &result.metadata.rev);
            Ok(())
        })
    }

    fn create_folder<'a>(&'a self, path: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let arg = json!({ "path": path, "autorename": false });
            match self.rpc::<_, Value>("files/create_folder_v2", &arg, path).await {
                Ok(_) => Ok(()),
                Err(e) if e.is_conflict() => Ok(()),
                Err(e) => Err(e),
            }
        })
    }

    fn list_folder<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            let arg = json!({ "path": list_path(path) });
            let mut page: ListFolderResult = self.rpc("files/list_folder", &arg, path).await?;
            let mut names: Vec<String> = Vec::new();
            loop {
                names.extend(page.entries.into_iter().map(|e| e.name));
                if !page.has_more {
                    break;
                }
                let arg = json!({ "cursor": page.cursor });
                page = self.rpc("files/list_folder/continue", &arg, path).await?;
            }
            names.sort();
            Ok(names)
        })
    }
}

/// The API names the root folder as the empty string
fn list_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        ""
    } else {
        trimmed
    }
}

/// JSON with every non-ASCII character escaped, safe for an HTTP header
fn header_safe_json(value: &Value) -> String {
    let json = value.to_string();
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() && c != '\u{7f}' {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

/// Classify a 409 endpoint error by its summary
fn classify_endpoint_error(body: &str, path: &str) -> StoreError {
    let summary = serde_json::from_str::<ApiErrorBody>(body)
        .map(|e| e.error_summary)
        .unwrap_or_else(|_| body.to_string());
    if summary.contains("not_found") {
        StoreError::NotFound(path.to_string())
    } else if summary.contains("conflict") {
        StoreError::Conflict(format!("{}: {}", path, summary))
    } else {
        StoreError::Transport(format!("{}: {}", path, summary))
    }
}
