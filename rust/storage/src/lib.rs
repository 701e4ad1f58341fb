use chroma_config::registry::{Injectable, Registry};
use chroma_config::Configurable;
use chroma_error::{ChromaError, ErrorCodes};
use std::sync::Arc;
use thiserror::Error;

pub mod config;
pub mod local;
mod metrics;
pub mod s3;

pub use config::*;
use local::LocalStorage;
use s3::S3Storage;

#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("Object not found at {path}")]
    NotFound {
        path: String,
        source: Arc<dyn std::error::Error + Send + Sync>,
    },
    #[error("Generic storage error: {source}")]
    Generic {
        source: Arc<dyn std::error::Error + Send + Sync>,
    },
    #[error("{message}")]
    Message { message: String },
}

impl ChromaError for StorageError {
    fn code(&self) -> ErrorCodes {
        match self {
            StorageError::NotFound { .. } => ErrorCodes::NotFound,
            StorageError::Generic { .. } => ErrorCodes::Internal,
            StorageError::Message { .. } => ErrorCodes::Internal,
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageConfigError {
    #[error("Invalid storage config")]
    InvalidStorageConfig,
    #[error("Failed to create bucket: {0}")]
    FailedToCreateBucket(#[source] StorageError),
}

impl ChromaError for StorageConfigError {
    fn code(&self) -> ErrorCodes {
        match self {
            StorageConfigError::InvalidStorageConfig => ErrorCodes::InvalidArgument,
            StorageConfigError::FailedToCreateBucket(_) => ErrorCodes::Internal,
        }
    }
}

/// Whole-object storage keyed by `/` separated paths.
#[derive(Clone)]
pub enum Storage {
    S3(S3Storage),
    Local(LocalStorage),
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Storage::S3(_) => f.debug_tuple("S3").finish(),
            Storage::Local(_) => f.debug_tuple("Local").finish(),
        }
    }
}

impl Injectable for Storage {}

impl Storage {
    pub async fn get(&self, key: &str) -> Result<Arc<Vec<u8>>, StorageError> {
        match self {
            Storage::S3(s3) => s3.get(key).await,
            Storage::Local(local) => local.get(key).await,
        }
    }

    /// Writes the whole object, replacing any previous content at `key`.
    pub async fn put_bytes(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        match self {
            Storage::S3(s3) => s3.put_bytes(key, bytes).await,
            Storage::Local(local) => local.put_bytes(key, &bytes).await,
        }
    }

    /// Deleting a missing key succeeds, matching S3 semantics.
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match self {
            Storage::S3(s3) => s3.delete(key).await,
            Storage::Local(local) => local.delete(key).await,
        }
    }

    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        match self {
            Storage::S3(s3) => s3.list_prefix(prefix).await,
            Storage::Local(local) => local.list_prefix(prefix).await,
        }
    }

    /// Creates the backing bucket. Succeeds when it already exists.
    pub async fn create_bucket(&self) -> Result<(), StorageError> {
        match self {
            Storage::S3(s3) => s3.create_bucket().await,
            Storage::Local(local) => local.create_root().await,
        }
    }
}

pub fn test_storage() -> (tempfile::TempDir, Storage) {
    let dir = tempfile::TempDir::new().expect("Should be able to create a temporary directory");
    let root = dir
        .path()
        .to_str()
        .expect("Temporary directory path should be valid UTF-8")
        .to_string();
    (dir, Storage::Local(LocalStorage::new(&root)))
}

#[async_trait::async_trait]
impl Configurable<StorageConfig> for Storage {
    async fn try_from_config(
        config: &StorageConfig,
        registry: &Registry,
    ) -> Result<Self, Box<dyn ChromaError>> {
        let storage = match config {
            StorageConfig::S3(_) => Storage::S3(S3Storage::try_from_config(config, registry).await?),
            StorageConfig::Local(local_config) => {
                Storage::Local(LocalStorage::try_from_config(local_config, registry).await?)
            }
        };
        registry.register(storage.clone());
        Ok(storage)
    }
}
