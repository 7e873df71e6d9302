//! Attachment storage backends. One is chosen at startup by
//! [`uploader_from_config`] and shared by every service.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};

use crate::config::{UploaderConfig, UploaderKind};
use crate::error::{ArborError, Result};

pub trait Uploader: Send + Sync {
    fn kind(&self) -> UploaderKind;

    fn save(&self, key: &str, bytes: &[u8]) -> Result<()>;

    fn copy(&self, from_key: &str, to_key: &str) -> Result<()>;

    /// Removing an object that does not exist succeeds.
    fn delete(&self, key: &str) -> Result<()>;
}

pub fn uploader_from_config(config: &UploaderConfig, root: &Path) -> Result<Arc<dyn Uploader>> {
    match config.kind {
        UploaderKind::Local => Ok(Arc::new(LocalUploader::new(root.join("uploads")))),
        UploaderKind::ObjectStore => Ok(Arc::new(ObjectStoreUploader::new(config)?)),
        UploaderKind::BlobStore => Ok(Arc::new(BlobStoreUploader::new(config)?)),
    }
}

pub(crate) fn attachment_storage_key(page_id: &str, attachment_id: &str, file_name: &str) -> String {
    format!(
        "attachments/{page_id}/{attachment_id}-{}",
        safe_file_name(file_name)
    )
}

/// Key of the object a Duplicate copies `source_attachment_id` into. Fixed
/// per operation, so a repeated copy overwrites instead of piling up.
pub(crate) fn duplicated_storage_key(
    operation_id: &str,
    source_attachment_id: &str,
    file_name: &str,
) -> String {
    format!(
        "duplicates/{operation_id}/{source_attachment_id}-{}",
        safe_file_name(file_name)
    )
}

fn safe_file_name(file_name: &str) -> String {
    file_name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn validate_key(key: &str) -> Result<()> {
    let path = Path::new(key);
    let valid = !key.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(ArborError::Validation(format!("invalid storage key: {key}")))
    }
}

#[derive(Debug, Clone)]
pub struct LocalUploader {
    root: PathBuf,
}

impl LocalUploader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

impl Uploader for LocalUploader {
    fn kind(&self) -> UploaderKind {
        UploaderKind::Local
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        Ok(())
    }

    fn copy(&self, from_key: &str, to_key: &str) -> Result<()> {
        let from = self.object_path(from_key)?;
        let to = self.object_path(to_key)?;
        if !from.exists() {
            return Err(ArborError::NotFound(format!("storage object {from_key}")));
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(from, to)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Shared HTTP plumbing for the remote backends.
#[derive(Clone)]
struct HttpStore {
    endpoint: String,
    container: String,
    http: Client,
}

impl HttpStore {
    fn new(config: &UploaderConfig, extra_headers: HeaderMap) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .map(|raw| raw.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                ArborError::Validation(format!(
                    "ARBOR_UPLOADER_ENDPOINT is required for the {} uploader",
                    config.kind.as_str()
                ))
            })?;

        let mut headers = extra_headers;
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                ArborError::Validation(format!("invalid ARBOR_UPLOADER_TOKEN: {e}"))
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            endpoint,
            container: config.container.clone(),
            http,
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.container, key)
    }

    fn source_path(&self, key: &str) -> String {
        format!("/{}/{}", self.container, key)
    }

    fn check(response: Response, action: &str, key: &str) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ArborError::NotFound(format!("storage object {key}")));
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ArborError::Transient(format!(
                "storage {action} {key} returned {status}"
            )));
        }
        Err(ArborError::Internal(format!(
            "storage {action} {key} returned {status}"
        )))
    }

    fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let response = self.http.delete(self.object_url(key)).send()?;
        match Self::check(response, "delete", key) {
            Err(ArborError::NotFound(_)) => Ok(()),
            other => other,
        }
    }
}

/// S3-compatible object store addressed path-style:
/// `{endpoint}/{container}/{key}`.
#[derive(Clone)]
pub struct ObjectStoreUploader {
    store: HttpStore,
}

impl std::fmt::Debug for ObjectStoreUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreUploader")
            .field("endpoint", &self.store.endpoint)
            .field("container", &self.store.container)
            .finish_non_exhaustive()
    }
}

impl ObjectStoreUploader {
    pub fn new(config: &UploaderConfig) -> Result<Self> {
        Ok(Self {
            store: HttpStore::new(config, HeaderMap::new())?,
        })
    }
}

impl Uploader for ObjectStoreUploader {
    fn kind(&self) -> UploaderKind {
        UploaderKind::ObjectStore
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        validate_key(key)?;
        let response = self
            .store
            .http
            .put(self.store.object_url(key))
            .body(bytes.to_vec())
            .send()?;
        HttpStore::check(response, "save", key)
    }

    fn copy(&self, from_key: &str, to_key: &str) -> Result<()> {
        validate_key(from_key)?;
        validate_key(to_key)?;
        let response = self
            .store
            .http
            .put(self.store.object_url(to_key))
            .header("x-amz-copy-source", self.store.source_path(from_key))
            .send()?;
        HttpStore::check(response, "copy", from_key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.store.delete(key)
    }
}

/// Azure-style blob container.
#[derive(Clone)]
pub struct BlobStoreUploader {
    store: HttpStore,
}

impl std::fmt::Debug for BlobStoreUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStoreUploader")
            .field("endpoint", &self.store.endpoint)
            .field("container", &self.store.container)
            .finish_non_exhaustive()
    }
}

impl BlobStoreUploader {
    pub fn new(config: &UploaderConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("x-ms-version", HeaderValue::from_static("2021-08-06"));
        Ok(Self {
            store: HttpStore::new(config, headers)?,
        })
    }
}

impl Uploader for BlobStoreUploader {
    fn kind(&self) -> UploaderKind {
        UploaderKind::BlobStore
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        validate_key(key)?;
        let response = self
            .store
            .http
            .put(self.store.object_url(key))
            .header("x-ms-blob-type", "BlockBlob")
            .body(bytes.to_vec())
            .send()?;
        HttpStore::check(response, "save", key)
    }

    fn copy(&self, from_key: &str, to_key: &str) -> Result<()> {
        validate_key(from_key)?;
        validate_key(to_key)?;
        let response = self
            .store
            .http
            .put(self.store.object_url(to_key))
            .header("x-ms-copy-source", self.store.object_url(from_key))
            .send()?;
        HttpStore::check(response, "copy", from_key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.store.delete(key)
    }
}
