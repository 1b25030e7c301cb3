// SPDX-License-Identifier: Apache-2.0

use crate::{StoreError, StoreErrorCode};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::warn;

pub const ALLOWED_IMAGE_CONTENT_TYPES: [&str; 4] =
    ["image/jpeg", "image/png", "image/webp", "image/gif"];

const MAX_KEY_LEN: usize = 512;

/// Maps an upload content type to the extension used in storage keys.
/// Returns `None` for anything the platform does not accept.
#[must_use]
pub fn media_extension(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff_ms: 120,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        Duration::from_millis(self.base_backoff_ms.saturating_mul(attempt as u64))
    }
}

/// Binary object storage behind the image records. Implementations are
/// synchronous; async callers hop through `spawn_blocking`.
pub trait MediaStore: Send + Sync {
    /// Stores `bytes` under `key` and returns the public URL to serve it at.
    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
    fn url_for(&self, key: &str) -> String;
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(StoreError::new(
            StoreErrorCode::Validation,
            "storage key length out of range",
        ));
    }
    if key.starts_with('/')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(StoreError::new(
            StoreErrorCode::Validation,
            "storage key must be a clean relative path",
        ));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-'))
    {
        return Err(StoreError::new(
            StoreErrorCode::Validation,
            "storage key contains invalid characters",
        ));
    }
    Ok(())
}

fn write_and_sync(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut file = File::create(path)
        .map_err(|e| StoreError::new(StoreErrorCode::Io, format!("create {}: {e}", path.display())))?;
    file.write_all(bytes)
        .map_err(|e| StoreError::new(StoreErrorCode::Io, format!("write {}: {e}", path.display())))?;
    file.sync_all()
        .map_err(|e| StoreError::new(StoreErrorCode::Io, format!("sync {}: {e}", path.display())))?;
    Ok(())
}

/// Filesystem-backed media store. Serves development and single-node
/// deployments where a reverse proxy exposes `root` at `public_base_url`.
pub struct LocalFsMediaStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalFsMediaStore {
    #[must_use]
    pub fn new(root: PathBuf, public_base_url: String) -> Self {
        Self {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl MediaStore for LocalFsMediaStore {
    fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<String, StoreError> {
        validate_key(key)?;
        let path = self.root.join(key);
        let parent = path.parent().ok_or_else(|| {
            StoreError::new(StoreErrorCode::Validation, "storage key has no parent")
        })?;
        fs::create_dir_all(parent).map_err(|e| {
            StoreError::new(StoreErrorCode::Io, format!("mkdir {}: {e}", parent.display()))
        })?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StoreError::new(StoreErrorCode::Validation, "storage key has no file name"))?;
        let tmp = path.with_file_name(format!("{file_name}.tmp"));
        write_and_sync(&tmp, bytes)?;
        fs::rename(&tmp, &path).map_err(|e| {
            StoreError::new(StoreErrorCode::Io, format!("rename {}: {e}", path.display()))
        })?;
        Ok(self.url_for(key))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        let path = self.root.join(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::not_found("media object"))
            }
            Err(e) => Err(StoreError::new(
                StoreErrorCode::Io,
                format!("remove {}: {e}", path.display()),
            )),
        }
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key.trim_start_matches('/'))
    }
}

/// S3-compatible media store speaking plain HTTP PUT/DELETE against
/// `{endpoint}/{bucket}/{key}`. `public_endpoint` is what clients fetch
/// from when a CDN or presigning proxy fronts the bucket.
pub struct HttpMediaStore {
    endpoint: String,
    bucket: String,
    public_endpoint: Option<String>,
    bearer_token: Option<String>,
    retry: RetryPolicy,
    client: Client,
}

impl HttpMediaStore {
    #[must_use]
    pub fn new(endpoint: String, bucket: String) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket,
            public_endpoint: None,
            bearer_token: None,
            retry: RetryPolicy::default(),
            client: Client::new(),
        }
    }

    #[must_use]
    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }

    #[must_use]
    pub fn with_public_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.public_endpoint = endpoint
            .map(|x| x.trim_end_matches('/').to_string())
            .filter(|x| !x.is_empty());
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn object_url(&self, base: &str, key: &str) -> String {
        format!("{}/{}/{}", base, self.bucket, key.trim_start_matches('/'))
    }
}

impl MediaStore for HttpMediaStore {
    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, StoreError> {
        validate_key(key)?;
        let url = self.object_url(&self.endpoint, key);
        let mut attempt = 0usize;
        loop {
            let mut req = self
                .client
                .put(&url)
                .header(CONTENT_TYPE, content_type)
                .body(bytes.to_vec());
            if let Some(token) = &self.bearer_token {
                req = req.bearer_auth(token);
            }
            let retryable = match req.send() {
                Ok(resp) if resp.status().is_success() => return Ok(self.url_for(key)),
                Ok(resp) if resp.status().is_server_error() => {
                    format!("media put failed: {}", resp.status())
                }
                Ok(resp) => {
                    return Err(StoreError::new(
                        StoreErrorCode::Network,
                        format!("media put failed: {}", resp.status()),
                    ))
                }
                Err(e) => format!("media put failed: {e}"),
            };
            attempt += 1;
            if attempt >= self.retry.max_attempts {
                return Err(StoreError::new(StoreErrorCode::Network, retryable));
            }
            warn!(key, attempt, "{retryable}; retrying");
            thread::sleep(self.retry.delay_for_attempt(attempt));
        }
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        let url = self.object_url(&self.endpoint, key);
        let mut req = self.client.delete(&url);
        if let Some(token) = &self.bearer_token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().map_err(|e| {
            StoreError::new(StoreErrorCode::Network, format!("media delete failed: {e}"))
        })?;
        if resp.status().as_u16() == 404 {
            return Err(StoreError::not_found("media object"));
        }
        if !resp.status().is_success() {
            return Err(StoreError::new(
                StoreErrorCode::Network,
                format!("media delete failed: {}", resp.status()),
            ));
        }
        Ok(())
    }

    fn url_for(&self, key: &str) -> String {
        let base = self.public_endpoint.as_deref().unwrap_or(&self.endpoint);
        self.object_url(base, key)
    }
}
