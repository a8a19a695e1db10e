//! Session storage in a Supabase-compatible object storage bucket.
//!
//! Each session is one object named `RemoteAuth-{session_id}.zip`:
//! - `GET    /storage/v1/object/{bucket}/{object}` downloads it
//! - `HEAD   /storage/v1/object/{bucket}/{object}` checks it
//! - `POST   /storage/v1/object/{bucket}/{object}` uploads it (`x-upsert: true`)
//! - `DELETE /storage/v1/object/{bucket}` with `{"prefixes": [object]}` removes it

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use notifier_core::{SessionStore, StorageError};
use reqwest::{RequestBuilder, Response, StatusCode};

/// Object storage backed session store.
pub struct BucketSessionStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    bucket: String,
    scratch_dir: Option<PathBuf>,
}

impl BucketSessionStore {
    /// Create a store for `bucket` on the storage API at `base_url`.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            bucket: bucket.into(),
            scratch_dir: None,
        }
    }

    /// Mirror blobs through a local scratch directory on save and extract.
    #[must_use]
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Use a preconfigured HTTP client.
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Object name for a session.
    #[must_use]
    pub fn object_name(session_id: &str) -> String {
        format!("RemoteAuth-{session_id}.zip")
    }

    fn object_url(&self, session_id: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            self.bucket,
            Self::object_name(session_id)
        )
    }

    fn scratch_path(&self, session_id: &str) -> Option<PathBuf> {
        self.scratch_dir
            .as_deref()
            .map(|dir| dir.join(Self::object_name(session_id)))
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.api_key).bearer_auth(&self.api_key)
    }

    async fn write_scratch(path: &Path, blob: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, blob).await?;
        Ok(())
    }
}

fn backend(e: &reqwest::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// Supabase answers a missing object with either 404 or a 400 whose body
/// carries a `not_found` error.
fn is_not_found(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::NOT_FOUND {
        return true;
    }
    if status != StatusCode::BAD_REQUEST {
        return false;
    }
    serde_json::from_str::<serde_json::Value>(body).is_ok_and(|v| {
        v.get("error").and_then(|e| e.as_str()) == Some("not_found")
            || v.get("statusCode").and_then(|c| c.as_str()) == Some("404")
    })
}

async fn into_http_error(response: Response) -> StorageError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StorageError::Http { status, body }
}

#[async_trait]
impl SessionStore for BucketSessionStore {
    async fn exists(&self, session_id: &str) -> Result<bool, StorageError> {
        let response = self
            .authed(self.client.head(self.object_url(session_id)))
            .send()
            .await
            .map_err(|e| backend(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        // HEAD carries no body, so a bare 400 is taken as "missing" too.
        if status == StatusCode::NOT_FOUND || status == StatusCode::BAD_REQUEST {
            return Ok(false);
        }
        Err(into_http_error(response).await)
    }

    async fn save(&self, session_id: &str, blob: Bytes) -> Result<(), StorageError> {
        let body = match self.scratch_path(session_id) {
            Some(path) => {
                Self::write_scratch(&path, &blob).await?;
                Bytes::from(tokio::fs::read(&path).await?)
            }
            None => blob,
        };
        let size = body.len();

        let response = self
            .authed(self.client.post(self.object_url(session_id)))
            .header("x-upsert", "true")
            .header("content-type", "application/zip")
            .body(body)
            .send()
            .await
            .map_err(|e| backend(&e))?;

        if !response.status().is_success() {
            let err = into_http_error(response).await;
            tracing::error!(session_id, error = %err, "Failed to save session to bucket");
            return Err(err);
        }

        tracing::info!(session_id, bucket = %self.bucket, size, "Session saved to bucket");
        Ok(())
    }

    async fn extract(&self, session_id: &str) -> Result<Option<Bytes>, StorageError> {
        let response = self
            .authed(self.client.get(self.object_url(session_id)))
            .send()
            .await
            .map_err(|e| backend(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_not_found(status, &body) {
                tracing::debug!(session_id, "No session stored in bucket");
                return Ok(None);
            }
            return Err(StorageError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let expected = response.content_length();
        let blob = response.bytes().await.map_err(|e| backend(&e))?;
        if let Some(expected) = expected {
            if blob.len() as u64 != expected {
                return Err(StorageError::Truncated {
                    expected,
                    actual: blob.len(),
                });
            }
        }

        if let Some(path) = self.scratch_path(session_id) {
            Self::write_scratch(&path, &blob).await?;
            tracing::debug!(session_id, path = %path.display(), "Session mirrored to scratch");
        }

        tracing::info!(session_id, size = blob.len(), "Session extracted from bucket");
        Ok(Some(blob))
    }

    async fn delete(&self, session_id: &str) -> Result<(), StorageError> {
        let url = format!("{}/storage/v1/object/{}", self.base_url, self.bucket);
        let response = self
            .authed(self.client.delete(url))
            .json(&serde_json::json!({ "prefixes": [Self::object_name(session_id)] }))
            .send()
            .await
            .map_err(|e| backend(&e))?;

        if !response.status().is_success() {
            let err = into_http_error(response).await;
            tracing::error!(session_id, error = %err, "Failed to delete session from bucket");
            return Err(err);
        }

        if let Some(path) = self.scratch_path(session_id) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!(session_id, "Session deleted from bucket");
        Ok(())
    }
}
