use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ArborError, Result};

use super::env::{read_env_u64, read_non_empty_env};

const ENV_UPLOADER: &str = "ARBOR_UPLOADER";
const ENV_UPLOADER_ENDPOINT: &str = "ARBOR_UPLOADER_ENDPOINT";
const ENV_UPLOADER_CONTAINER: &str = "ARBOR_UPLOADER_CONTAINER";
const ENV_UPLOADER_TOKEN: &str = "ARBOR_UPLOADER_TOKEN";
const ENV_UPLOADER_TIMEOUT_MS: &str = "ARBOR_UPLOADER_TIMEOUT_MS";

const DEFAULT_CONTAINER: &str = "arbor";
const DEFAULT_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploaderKind {
    #[default]
    Local,
    ObjectStore,
    BlobStore,
}

impl UploaderKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::ObjectStore => "object_store",
            Self::BlobStore => "blob_store",
        }
    }
}

impl FromStr for UploaderKind {
    type Err = ArborError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "fs" => Ok(Self::Local),
            "object_store" | "s3" => Ok(Self::ObjectStore),
            "blob_store" | "azure" => Ok(Self::BlobStore),
            other => Err(ArborError::Validation(format!(
                "invalid uploader: {other} (expected local|object_store|blob_store)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploaderConfig {
    pub kind: UploaderKind,
    pub endpoint: Option<String>,
    pub container: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub timeout_ms: u64,
}

impl UploaderConfig {
    pub(super) fn from_env() -> Result<Self> {
        Ok(Self {
            kind: read_non_empty_env(ENV_UPLOADER)
                .map(|raw| raw.parse())
                .transpose()?
                .unwrap_or_default(),
            endpoint: read_non_empty_env(ENV_UPLOADER_ENDPOINT),
            container: read_non_empty_env(ENV_UPLOADER_CONTAINER)
                .unwrap_or_else(|| DEFAULT_CONTAINER.to_string()),
            token: read_non_empty_env(ENV_UPLOADER_TOKEN),
            timeout_ms: read_env_u64(ENV_UPLOADER_TIMEOUT_MS)
                .filter(|value| *value >= 100)
                .unwrap_or(DEFAULT_TIMEOUT_MS),
        })
    }
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            kind: UploaderKind::Local,
            endpoint: None,
            container: DEFAULT_CONTAINER.to_string(),
            token: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uploader_kind_accepts_backend_aliases() {
        assert_eq!("s3".parse::<UploaderKind>().expect("s3"), UploaderKind::ObjectStore);
        assert_eq!(
            "blob_store".parse::<UploaderKind>().expect("blob"),
            UploaderKind::BlobStore
        );
        assert!("ftp".parse::<UploaderKind>().is_err());
    }
}
