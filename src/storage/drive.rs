//! Google Drive v3 client over plain REST.
//!
//! Only what the pipeline needs: folder lookup/creation, a name lookup inside
//! a folder, and resumable uploads sent in fixed-size chunks.

use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_RANGE, LOCATION, RANGE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::RwLock;

use super::{FolderHandle, Storage, StorageError};
use crate::retry::{self, classify, RetryConfig, Transient};

const DEFAULT_BASE: &str = "https://www.googleapis.com";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// Chunk sizes for resumable uploads must be multiples of this.
const CHUNK_ALIGN: usize = 256 * 1024;
const DEFAULT_CHUNK_SIZE: usize = 32 * CHUNK_ALIGN;
const RESUME_INCOMPLETE: u16 = 308;

/// Base URLs of the metadata and upload APIs.
#[derive(Debug, Clone)]
pub struct DriveEndpoints {
    pub api_base: String,
    pub upload_base: String,
}

impl Default for DriveEndpoints {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_BASE.to_string(),
            upload_base: DEFAULT_BASE.to_string(),
        }
    }
}

/// The "authorized user" token file written by Google's OAuth tooling.
#[derive(Deserialize)]
struct AuthorizedUser {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    token: Option<String>,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct DriveFile {
    id: String,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

enum UploadStep {
    Done(String),
    /// Server has committed everything before this offset.
    Resume(u64),
}

pub struct DriveClient {
    http: Client,
    endpoints: DriveEndpoints,
    credentials: AuthorizedUser,
    access_token: RwLock<String>,
    retry: RetryConfig,
    chunk_size: usize,
}

impl DriveClient {
    pub async fn from_token_file(path: &Path, retry: RetryConfig) -> Result<Self, StorageError> {
        Self::connect(path, DriveEndpoints::default(), retry).await
    }

    pub async fn connect(
        token_file: &Path,
        endpoints: DriveEndpoints,
        retry: RetryConfig,
    ) -> Result<Self, StorageError> {
        let raw = tokio::fs::read(token_file)
            .await
            .map_err(|e| StorageError::TokenFile {
                path: token_file.to_path_buf(),
                source: e,
            })?;
        let credentials: AuthorizedUser =
            serde_json::from_slice(&raw).map_err(|e| StorageError::TokenParse {
                path: token_file.to_path_buf(),
                source: e,
            })?;

        // 308 is the resumable-upload progress reply, not a redirect.
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(300))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| StorageError::Http {
                operation: "HTTP client setup",
                source: e,
            })?;

        let stored = credentials.token.clone().filter(|t| !t.is_empty());
        let client = Self {
            http,
            endpoints,
            access_token: RwLock::new(stored.clone().unwrap_or_default()),
            credentials,
            retry,
            chunk_size: DEFAULT_CHUNK_SIZE,
        };
        if stored.is_none() {
            client.refresh_access_token().await?;
        }
        Ok(client)
    }

    /// Override the upload chunk size. Rounded down to a multiple of 256 KiB.
    #[cfg(test)]
    fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = (bytes / CHUNK_ALIGN).max(1) * CHUNK_ALIGN;
        self
    }

    async fn refresh_access_token(&self) -> Result<String, StorageError> {
        const OPERATION: &str = "Token refresh";
        let resp = self
            .http
            .post(&self.credentials.token_uri)
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", self.credentials.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| StorageError::Http {
                operation: OPERATION,
                source: e,
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| StorageError::Http {
            operation: OPERATION,
            source: e,
        })?;
        if !status.is_success() {
            return Err(StorageError::TokenRefresh {
                status: status.as_u16(),
                body,
            });
        }
        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| StorageError::MalformedResponse {
                operation: OPERATION,
                what: e.to_string(),
            })?;

        *self.access_token.write().await = token.access_token.clone();
        tracing::debug!("Refreshed Google Drive access token");
        Ok(token.access_token)
    }

    /// Send with the current bearer token; on 401 refresh once and replay.
    async fn send_authorized<F>(
        &self,
        operation: &'static str,
        build: F,
    ) -> Result<Response, StorageError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let token = self.access_token.read().await.clone();
        let resp = build(&self.http)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| StorageError::Http {
                operation,
                source: e,
            })?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        tracing::debug!("{} got HTTP 401, refreshing access token", operation);
        let token = self.refresh_access_token().await?;
        build(&self.http)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| StorageError::Http {
                operation,
                source: e,
            })
    }

    async fn list_first(
        &self,
        operation: &'static str,
        q: &str,
    ) -> Result<Option<String>, StorageError> {
        let url = format!("{}/drive/v3/files", self.endpoints.api_base);
        let resp = self
            .send_authorized(operation, |http| {
                http.get(&url).query(&[
                    ("q", q),
                    ("spaces", "drive"),
                    ("fields", "files(id, name)"),
                    ("pageSize", "1"),
                ])
            })
            .await?;
        let list: FileList = read_json(resp, operation).await?;
        Ok(list.files.into_iter().next().map(|f| f.id))
    }

    async fn find_or_create_folder(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<String, StorageError> {
        let mut q = format!(
            "name='{}' and mimeType='{}' and trashed=false",
            escape_query(name),
            FOLDER_MIME
        );
        if let Some(parent) = parent {
            q.push_str(&format!(" and '{}' in parents", escape_query(parent)));
        }
        if let Some(id) = self.list_first("Folder lookup", &q).await? {
            tracing::debug!(folder = name, id = %id, "Found existing folder");
            return Ok(id);
        }

        let mut metadata = json!({ "name": name, "mimeType": FOLDER_MIME });
        if let Some(parent) = parent {
            metadata["parents"] = json!([parent]);
        }
        let url = format!("{}/drive/v3/files", self.endpoints.api_base);
        let resp = self
            .send_authorized("Folder creation", |http| {
                http.post(&url).query(&[("fields", "id")]).json(&metadata)
            })
            .await?;
        let created: DriveFile = read_json(resp, "Folder creation").await?;
        tracing::info!(folder = name, id = %created.id, "Created folder");
        Ok(created.id)
    }

    async fn start_upload_session(
        &self,
        name: &str,
        mime_type: &str,
        parent: &FolderHandle,
        size: u64,
    ) -> Result<String, StorageError> {
        const OPERATION: &str = "Upload session start";
        let url = format!("{}/upload/drive/v3/files", self.endpoints.upload_base);
        let metadata = json!({ "name": name, "parents": [parent.id] });
        let resp = self
            .send_authorized(OPERATION, |http| {
                http.post(&url)
                    .query(&[("uploadType", "resumable"), ("fields", "id")])
                    .header("X-Upload-Content-Type", mime_type)
                    .header("X-Upload-Content-Length", size.to_string())
                    .json(&metadata)
            })
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::Api {
                operation: OPERATION,
                status: status.as_u16(),
                body,
            });
        }
        resp.headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| StorageError::MalformedResponse {
                operation: OPERATION,
                what: "missing Location header".to_string(),
            })
    }

    async fn put_chunk(
        &self,
        session: &str,
        file: &mut tokio::fs::File,
        path: &Path,
        offset: u64,
        size: u64,
    ) -> Result<UploadStep, StorageError> {
        let local = |e| StorageError::LocalFile {
            path: path.to_path_buf(),
            source: e,
        };
        let len = (size - offset).min(self.chunk_size as u64);
        let mut buf = vec![0u8; len as usize];
        file.seek(SeekFrom::Start(offset)).await.map_err(local)?;
        file.read_exact(&mut buf).await.map_err(local)?;

        let resp = self
            .http
            .put(session)
            .header(
                CONTENT_RANGE,
                format!("bytes {}-{}/{}", offset, offset + len - 1, size),
            )
            .body(buf)
            .send()
            .await
            .map_err(|e| StorageError::Http {
                operation: "Upload",
                source: e,
            })?;
        upload_step(resp).await
    }

    /// Ask the session how much it has committed. With nothing left to send
    /// this also finalizes the upload.
    async fn query_upload_status(
        &self,
        session: &str,
        size: u64,
    ) -> Result<UploadStep, StorageError> {
        let resp = self
            .http
            .put(session)
            .header(CONTENT_RANGE, format!("bytes */{}", size))
            .body(Vec::<u8>::new())
            .send()
            .await
            .map_err(|e| StorageError::Http {
                operation: "Upload status",
                source: e,
            })?;
        upload_step(resp).await
    }
}

#[async_trait]
impl Storage for DriveClient {
    async fn resolve_or_create_folder(&self, path: &str) -> Result<FolderHandle, StorageError> {
        let segments: Vec<&str> = path
            .split('/')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        let mut parent: Option<String> = None;
        for segment in &segments {
            let id = retry::retry_with_backoff(&self.retry, "Folder lookup", classify, || {
                self.find_or_create_folder(segment, parent.as_deref())
            })
            .await?;
            parent = Some(id);
        }

        match parent {
            Some(id) => Ok(FolderHandle {
                id,
                path: segments.join("/"),
            }),
            None => Err(StorageError::InvalidPath(path.to_string())),
        }
    }

    async fn find_file(
        &self,
        parent: &FolderHandle,
        name: &str,
    ) -> Result<Option<String>, StorageError> {
        let q = format!(
            "name='{}' and '{}' in parents and trashed=false",
            escape_query(name),
            escape_query(&parent.id)
        );
        retry::retry_with_backoff(&self.retry, "File lookup", classify, || {
            self.list_first("File lookup", &q)
        })
        .await
    }

    async fn upload(
        &self,
        local_path: &Path,
        name: &str,
        mime_type: &str,
        parent: &FolderHandle,
    ) -> Result<String, StorageError> {
        let local = |e| StorageError::LocalFile {
            path: local_path.to_path_buf(),
            source: e,
        };
        let size = tokio::fs::metadata(local_path).await.map_err(local)?.len();
        let session = self
            .start_upload_session(name, mime_type, parent, size)
            .await?;
        tracing::debug!(name, size, "Started resumable upload");

        let mut file = tokio::fs::File::open(local_path).await.map_err(local)?;
        let mut offset = 0u64;
        let mut failures = 0u32;

        loop {
            let step = if offset >= size {
                self.query_upload_status(&session, size).await
            } else {
                self.put_chunk(&session, &mut file, local_path, offset, size)
                    .await
            };

            let err = match step {
                Ok(UploadStep::Done(id)) => return Ok(id),
                Ok(UploadStep::Resume(next)) if next > offset => {
                    offset = next;
                    failures = 0;
                    continue;
                }
                Ok(UploadStep::Resume(_)) => StorageError::MalformedResponse {
                    operation: "Upload",
                    what: format!("no progress past byte {}", offset),
                },
                Err(e) => e,
            };

            let stalled = matches!(err, StorageError::MalformedResponse { .. });
            if !(stalled || err.is_retryable()) || failures >= self.retry.max_retries {
                return Err(err);
            }
            let delay = self.retry.delay_for_retry(failures);
            failures += 1;
            tracing::warn!(
                "Upload of {} interrupted at byte {} (retry {}/{}), resuming in {}s: {}",
                name,
                offset,
                failures,
                self.retry.max_retries,
                delay.as_secs(),
                err
            );
            tokio::time::sleep(delay).await;

            match self.query_upload_status(&session, size).await {
                Ok(UploadStep::Done(id)) => return Ok(id),
                Ok(UploadStep::Resume(committed)) => offset = committed,
                Err(e) if e.is_retryable() => {}
                Err(e) => return Err(e),
            }
        }
    }
}

async fn read_json<T: DeserializeOwned>(
    resp: Response,
    operation: &'static str,
) -> Result<T, StorageError> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| StorageError::Http { operation, source: e })?;
    if !status.is_success() {
        return Err(StorageError::Api {
            operation,
            status: status.as_u16(),
            body,
        });
    }
    serde_json::from_str(&body).map_err(|e| StorageError::MalformedResponse {
        operation,
        what: e.to_string(),
    })
}

async fn upload_step(resp: Response) -> Result<UploadStep, StorageError> {
    if resp.status().as_u16() == RESUME_INCOMPLETE {
        // No Range header means nothing has been committed yet.
        let next = resp
            .headers()
            .get(RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(range_end)
            .map_or(0, |end| end + 1);
        return Ok(UploadStep::Resume(next));
    }
    let file: DriveFile = read_json(resp, "Upload").await?;
    Ok(UploadStep::Done(file.id))
}

/// Last committed byte from a `Range: bytes=0-N` header.
fn range_end(header: &str) -> Option<u64> {
    let (_, end) = header.strip_prefix("bytes=")?.split_once('-')?;
    end.trim().parse().ok()
}

/// Escape a value for use inside a single-quoted Drive query string.
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
