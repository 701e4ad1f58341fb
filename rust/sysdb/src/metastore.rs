use async_trait::async_trait;
use chroma_config::registry::Registry;
use chroma_config::Configurable;
use chroma_error::{ChromaError, ErrorCodes};
use chroma_storage::{Storage, StorageConfig, StorageError};
use chroma_types::{
    CollectionLineageFile, CollectionUuid, CollectionVersionDependency, CollectionVersionFile,
};
use prost::Message;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetastoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Failed to decode metastore object: {0}")]
    Decode(#[from] prost::DecodeError),
}

impl ChromaError for MetastoreError {
    fn code(&self) -> ErrorCodes {
        match self {
            MetastoreError::Storage(e) => e.code(),
            MetastoreError::Decode(_) => ErrorCodes::Internal,
        }
    }
}

/// Name of the version file written for `version`. Zero padded to the width of
/// `i64::MAX` so that names of non-negative versions list in version order.
pub fn version_file_name(version: i64) -> String {
    format!("{:019}_{}_flush", version, uuid::Uuid::new_v4())
}

fn collection_prefix(tenant: &str, database_id: &str, collection_id: CollectionUuid) -> String {
    format!("tenant/{tenant}/database/{database_id}/collection/{collection_id}")
}

pub fn version_files_prefix(
    tenant: &str,
    database_id: &str,
    collection_id: CollectionUuid,
) -> String {
    format!(
        "{}/versionfiles/",
        collection_prefix(tenant, database_id, collection_id)
    )
}

pub fn version_file_path(
    tenant: &str,
    database_id: &str,
    collection_id: CollectionUuid,
    file_name: &str,
) -> String {
    format!(
        "{}{file_name}",
        version_files_prefix(tenant, database_id, collection_id)
    )
}

pub fn lineage_file_path(
    tenant: &str,
    database_id: &str,
    collection_id: CollectionUuid,
    file_name: &str,
) -> String {
    format!(
        "{}/lineagefiles/{file_name}",
        collection_prefix(tenant, database_id, collection_id)
    )
}

/// Version history and fork lineage files kept in object storage.
///
/// Every write replaces the whole object. Callers serialise read-modify-write
/// cycles for one collection through the catalog's version compare-and-swap,
/// and write a version file only after that swap succeeded.
#[derive(Clone)]
pub struct S3MetaStore {
    storage: Storage,
}

impl std::fmt::Debug for S3MetaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3MetaStore").finish_non_exhaustive()
    }
}

impl S3MetaStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Creates the bucket if needed. Safe to call on every start.
    pub async fn create_bucket(&self) -> Result<(), MetastoreError> {
        Ok(self.storage.create_bucket().await?)
    }

    /// Writes the version file and returns its object path.
    #[tracing::instrument(skip(self, version_file))]
    pub async fn put_version_file(
        &self,
        tenant: &str,
        database_id: &str,
        collection_id: CollectionUuid,
        file_name: &str,
        version_file: &CollectionVersionFile,
    ) -> Result<String, MetastoreError> {
        let path = version_file_path(tenant, database_id, collection_id, file_name);
        self.storage
            .put_bytes(&path, version_file.encode_to_vec())
            .await?;
        tracing::debug!(%path, "Wrote version file");
        Ok(path)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_version_file(
        &self,
        tenant: &str,
        database_id: &str,
        collection_id: CollectionUuid,
        file_name: &str,
    ) -> Result<CollectionVersionFile, MetastoreError> {
        let path = version_file_path(tenant, database_id, collection_id, file_name);
        let bytes = self.storage.get(&path).await?;
        Ok(CollectionVersionFile::decode(bytes.as_slice())?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_version_file(
        &self,
        tenant: &str,
        database_id: &str,
        collection_id: CollectionUuid,
        file_name: &str,
    ) -> Result<(), MetastoreError> {
        let path = version_file_path(tenant, database_id, collection_id, file_name);
        Ok(self.storage.delete(&path).await?)
    }

    /// Names of the collection's version files, oldest first.
    pub async fn list_version_files(
        &self,
        tenant: &str,
        database_id: &str,
        collection_id: CollectionUuid,
    ) -> Result<Vec<String>, MetastoreError> {
        let prefix = version_files_prefix(tenant, database_id, collection_id);
        let mut names: Vec<String> = self
            .storage
            .list_prefix(&prefix)
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    #[tracing::instrument(skip(self, lineage_file))]
    pub async fn put_lineage_file(
        &self,
        tenant: &str,
        database_id: &str,
        collection_id: CollectionUuid,
        file_name: &str,
        lineage_file: &CollectionLineageFile,
    ) -> Result<String, MetastoreError> {
        let path = lineage_file_path(tenant, database_id, collection_id, file_name);
        self.storage
            .put_bytes(&path, lineage_file.encode_to_vec())
            .await?;
        Ok(path)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_lineage_file(
        &self,
        tenant: &str,
        database_id: &str,
        collection_id: CollectionUuid,
        file_name: &str,
    ) -> Result<CollectionLineageFile, MetastoreError> {
        let path = lineage_file_path(tenant, database_id, collection_id, file_name);
        let bytes = self.storage.get(&path).await?;
        Ok(CollectionLineageFile::decode(bytes.as_slice())?)
    }

    /// Whether any object exists under `prefix`. Lets a first read tell "never
    /// written" apart from a failure.
    pub async fn has_object_with_prefix(&self, prefix: &str) -> Result<bool, MetastoreError> {
        Ok(!self.storage.list_prefix(prefix).await?.is_empty())
    }

    /// Records that `target_collection_id` was forked from `source_version` of
    /// the source collection, in the source's lineage file.
    #[tracing::instrument(skip(self))]
    pub async fn add_lineage_dependency(
        &self,
        tenant: &str,
        database_id: &str,
        source_collection_id: CollectionUuid,
        source_version: u64,
        target_collection_id: CollectionUuid,
        file_name: &str,
    ) -> Result<CollectionLineageFile, MetastoreError> {
        let path = lineage_file_path(tenant, database_id, source_collection_id, file_name);
        let mut lineage = if self.has_object_with_prefix(&path).await? {
            self.get_lineage_file(tenant, database_id, source_collection_id, file_name)
                .await?
        } else {
            CollectionLineageFile::default()
        };
        lineage.dependencies.push(CollectionVersionDependency {
            source_collection_id: source_collection_id.to_string(),
            source_collection_version: source_version,
            target_collection_id: target_collection_id.to_string(),
        });
        self.put_lineage_file(
            tenant,
            database_id,
            source_collection_id,
            file_name,
            &lineage,
        )
        .await?;
        Ok(lineage)
    }
}

#[async_trait]
impl Configurable<StorageConfig> for S3MetaStore {
    async fn try_from_config(
        config: &StorageConfig,
        registry: &Registry,
    ) -> Result<Self, Box<dyn ChromaError>> {
        let storage = match registry.get::<Storage>() {
            Ok(storage) => storage,
            Err(_) => Storage::try_from_config(config, registry).await?,
        };
        Ok(S3MetaStore::new(storage))
    }
}
