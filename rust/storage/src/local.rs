use crate::config::LocalStorageConfig;
use crate::StorageError;
use async_trait::async_trait;
use chroma_config::registry::Registry;
use chroma_config::Configurable;
use chroma_error::ChromaError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Stores each object as a file under `root`, with the key as its relative path.
#[derive(Clone)]
pub struct LocalStorage {
    root: String,
}

impl LocalStorage {
    pub fn new(root: &str) -> LocalStorage {
        LocalStorage {
            root: root.to_string(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        Path::new(&self.root).join(key)
    }

    pub(crate) async fn create_root(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|err| StorageError::Generic {
                source: Arc::new(err),
            })
    }

    pub async fn get(&self, key: &str) -> Result<Arc<Vec<u8>>, StorageError> {
        let file_path = self.path_for(key);
        tracing::debug!(path = %file_path.display(), "Reading from local storage");
        match tokio::fs::read(&file_path).await {
            Ok(bytes) => Ok(Arc::new(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                path: key.to_string(),
                source: Arc::new(err),
            }),
            Err(err) => Err(StorageError::Generic {
                source: Arc::new(err),
            }),
        }
    }

    pub async fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let file_path = self.path_for(key);
        if let Some(parent) = file_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StorageError::Generic {
                    source: Arc::new(err),
                })?;
        }
        tracing::debug!(path = %file_path.display(), len = bytes.len(), "Writing to local storage");
        tokio::fs::write(&file_path, bytes)
            .await
            .map_err(|err| StorageError::Generic {
                source: Arc::new(err),
            })
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::Generic {
                source: Arc::new(err),
            }),
        }
    }

    /// Returns every key under the root that starts with `prefix`, sorted.
    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let root = PathBuf::from(&self.root);
        let mut pending = vec![root.clone()];
        let mut keys = Vec::new();
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(StorageError::Generic {
                        source: Arc::new(err),
                    })
                }
            };
            while let Some(entry) = entries.next_entry().await.map_err(|err| {
                StorageError::Generic {
                    source: Arc::new(err),
                }
            })? {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(|err| StorageError::Generic {
                    source: Arc::new(err),
                })?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|component| component.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl Configurable<LocalStorageConfig> for LocalStorage {
    async fn try_from_config(
        config: &LocalStorageConfig,
        _registry: &Registry,
    ) -> Result<Self, Box<dyn ChromaError>> {
        let storage = LocalStorage::new(&config.root);
        storage.create_root().await.map_err(|e| e.boxed())?;
        Ok(storage)
    }
}
