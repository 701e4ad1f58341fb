use crate::config::CompactionRetryConfig;
use backon::{ExponentialBuilder, Retryable};
use chroma_error::{ChromaError, ErrorCodes};
use chroma_storage::StorageError;
use chroma_sysdb::{
    version_file_name, GetCollectionsOptions, GetSegmentsOptions, MetastoreError, S3MetaStore,
    SqliteSysDb,
};
use chroma_types::{
    Collection, CollectionInfoImmutable, CollectionInfoMutable, CollectionSegmentInfo,
    CollectionUuid, CollectionVersionFile, CollectionVersionInfo, FilePaths,
    FlushCompactionError, FlushCompactionResponse, FlushSegmentCompactionInfo,
    GetCollectionsError, GetDatabaseError, GetSegmentsError, SegmentFlushInfo,
};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// What a compactor produced for one collection.
#[derive(Clone, Debug)]
pub struct CompactionResult {
    pub collection_id: CollectionUuid,
    /// Collection version the compactor read before pulling the log. The
    /// result only commits while the catalog is still at this version.
    pub expected_version: i32,
    /// Offset of the last record folded into the segments.
    pub new_log_position: i64,
    pub segment_flush_info: Vec<SegmentFlushInfo>,
}

#[derive(Error, Debug)]
pub enum RegisterCompactionError {
    #[error("Collection [{0}] not found")]
    CollectionNotFound(CollectionUuid),
    #[error(transparent)]
    GetCollections(#[from] GetCollectionsError),
    #[error(transparent)]
    GetDatabase(#[from] GetDatabaseError),
    #[error(transparent)]
    GetSegments(#[from] GetSegmentsError),
    #[error(transparent)]
    Flush(#[from] FlushCompactionError),
    #[error(transparent)]
    Metastore(#[from] MetastoreError),
    #[error("Committed collection version {collection_version} but failed to upload its version file: {source}")]
    VersionFileUpload {
        collection_version: i32,
        #[source]
        source: MetastoreError,
    },
}

impl RegisterCompactionError {
    /// Another compactor won the version compare-and-swap. The result must be
    /// discarded and recomputed from the winner's log position.
    pub fn is_stale(&self) -> bool {
        matches!(self, RegisterCompactionError::Flush(FlushCompactionError::Cas(e)) if e.is_stale())
    }

    /// A failure before anything was committed that the same request may
    /// repeat. Stale results and invalid versions never qualify.
    pub fn is_transient(&self) -> bool {
        match self {
            RegisterCompactionError::Metastore(MetastoreError::Storage(e)) => {
                !matches!(e, StorageError::NotFound { .. })
            }
            RegisterCompactionError::GetCollections(_)
            | RegisterCompactionError::GetDatabase(_)
            | RegisterCompactionError::GetSegments(_)
            | RegisterCompactionError::Flush(FlushCompactionError::Internal(_)) => matches!(
                self.code(),
                ErrorCodes::Unavailable | ErrorCodes::ResourceExhausted | ErrorCodes::DeadlineExceeded
            ),
            _ => false,
        }
    }
}

impl ChromaError for RegisterCompactionError {
    fn code(&self) -> ErrorCodes {
        match self {
            RegisterCompactionError::CollectionNotFound(_) => ErrorCodes::NotFound,
            RegisterCompactionError::GetCollections(e) => e.code(),
            RegisterCompactionError::GetDatabase(e) => e.code(),
            RegisterCompactionError::GetSegments(e) => e.code(),
            RegisterCompactionError::Flush(e) => e.code(),
            RegisterCompactionError::Metastore(e) => e.code(),
            RegisterCompactionError::VersionFileUpload { source, .. } => source.code(),
        }
    }
}

impl From<CompactionRetryConfig> for ExponentialBuilder {
    fn from(config: CompactionRetryConfig) -> Self {
        ExponentialBuilder::new()
            .with_max_times(config.max_attempts.saturating_sub(1))
            .with_min_delay(Duration::from_millis(config.min_delay_ms))
            .with_max_delay(Duration::from_millis(config.max_delay_ms))
            .with_jitter()
    }
}

/// A compaction committed to the catalog whose version file still has to be
/// written.
struct CommittedVersion {
    tenant: String,
    database_id: String,
    collection_id: CollectionUuid,
    file_name: String,
    version_file: CollectionVersionFile,
    response: FlushCompactionResponse,
}

/// Records compaction results: the catalog first, then the version file.
///
/// The catalog's version compare-and-swap against the compactor's expected
/// version decides which of several concurrent compactors of a collection
/// wins. Losers get a stale error and must recompute. Only the winner writes
/// the new version file, so storage never holds a version the catalog does
/// not know about.
#[derive(Clone, Debug)]
pub struct CompactionRegistrar {
    sysdb: SqliteSysDb,
    metastore: S3MetaStore,
    backoff: ExponentialBuilder,
}

impl CompactionRegistrar {
    pub fn new(sysdb: SqliteSysDb, metastore: S3MetaStore, config: &CompactionRetryConfig) -> Self {
        CompactionRegistrar {
            sysdb,
            metastore,
            backoff: config.clone().into(),
        }
    }

    #[tracing::instrument(skip(self, result), fields(collection_id = %result.collection_id, expected_version = result.expected_version))]
    pub async fn register_compaction_result(
        &self,
        result: &CompactionResult,
    ) -> Result<FlushCompactionResponse, RegisterCompactionError> {
        let committed = (|| self.commit(result))
            .retry(self.backoff)
            .when(RegisterCompactionError::is_transient)
            .notify(|err: &RegisterCompactionError, delay: Duration| {
                tracing::warn!(
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Compaction registration failed before commit, retrying"
                );
            })
            .await?;

        // Overwriting the same object is idempotent, so the upload alone is
        // retried; the catalog already points at it.
        (|| {
            self.metastore.put_version_file(
                &committed.tenant,
                &committed.database_id,
                committed.collection_id,
                &committed.file_name,
                &committed.version_file,
            )
        })
        .retry(self.backoff)
        .notify(|err: &MetastoreError, _| {
            tracing::warn!(error = %err, file = %committed.file_name, "Failed to upload version file, retrying");
        })
        .await
        .map_err(|source| RegisterCompactionError::VersionFileUpload {
            collection_version: committed.response.collection_version,
            source,
        })?;

        tracing::info!(
            collection_version = committed.response.collection_version,
            version_file = %committed.file_name,
            "Registered compaction result"
        );
        Ok(committed.response)
    }

    async fn commit(
        &self,
        result: &CompactionResult,
    ) -> Result<CommittedVersion, RegisterCompactionError> {
        let collection = self
            .sysdb
            .get_collections(GetCollectionsOptions {
                collection_id: Some(result.collection_id),
                ..Default::default()
            })
            .await?
            .pop()
            .ok_or(RegisterCompactionError::CollectionNotFound(result.collection_id))?;
        let database_id = self
            .sysdb
            .get_database(&collection.database, &collection.tenant)
            .await?
            .id
            .to_string();

        let mut version_file = self.load_version_file(&collection, &database_id).await?;

        let new_version = result.expected_version as i64 + 1;
        let file_name = version_file_name(new_version);
        version_file.push_version(version_info(
            new_version,
            result.new_log_position,
            &result.segment_flush_info,
            "compaction",
            &file_name,
        ));

        let response = self
            .sysdb
            .flush_collection_compaction(
                collection.collection_id,
                result.new_log_position,
                result.expected_version,
                result.segment_flush_info.clone(),
                Some(file_name.clone()),
            )
            .await?;

        Ok(CommittedVersion {
            tenant: collection.tenant,
            database_id,
            collection_id: collection.collection_id,
            file_name,
            version_file,
            response,
        })
    }

    /// The version file the catalog names for the collection, or a new one for
    /// a collection that was never compacted.
    ///
    /// When the named file is missing, because its upload failed after the
    /// catalog committed, history continues from the newest stored file and
    /// the catalog's current version is restored from the catalog row.
    async fn load_version_file(
        &self,
        collection: &Collection,
        database_id: &str,
    ) -> Result<CollectionVersionFile, RegisterCompactionError> {
        let Some(file_name) = &collection.version_file_name else {
            return Ok(new_version_file(collection, database_id));
        };
        match self
            .metastore
            .get_version_file(
                &collection.tenant,
                database_id,
                collection.collection_id,
                file_name,
            )
            .await
        {
            Ok(version_file) => return Ok(version_file),
            Err(MetastoreError::Storage(StorageError::NotFound { .. })) => {}
            Err(e) => return Err(e.into()),
        }

        tracing::error!(
            collection_id = %collection.collection_id,
            collection_version = collection.version,
            version_file = %file_name,
            "Version file named by the catalog is missing, rebuilding it"
        );
        let stored = self
            .metastore
            .list_version_files(&collection.tenant, database_id, collection.collection_id)
            .await?;
        let mut version_file = match stored.last() {
            Some(newest) => {
                self.metastore
                    .get_version_file(
                        &collection.tenant,
                        database_id,
                        collection.collection_id,
                        newest,
                    )
                    .await?
            }
            None => new_version_file(collection, database_id),
        };

        if version_file.latest_version().unwrap_or_default() < collection.version as i64 {
            let segments = self
                .sysdb
                .get_segments(GetSegmentsOptions {
                    collection: Some(collection.collection_id),
                    ..Default::default()
                })
                .await?;
            let flushed: Vec<SegmentFlushInfo> = segments
                .into_iter()
                .map(|segment| SegmentFlushInfo {
                    segment_id: segment.id,
                    file_paths: segment.file_paths,
                })
                .collect();
            version_file.push_version(version_info(
                collection.version as i64,
                collection.log_position,
                &flushed,
                "recovered",
                file_name,
            ));
        }
        Ok(version_file)
    }
}

fn new_version_file(collection: &Collection, database_id: &str) -> CollectionVersionFile {
    CollectionVersionFile {
        collection_info_immutable: Some(CollectionInfoImmutable {
            tenant_id: collection.tenant.clone(),
            database_id: database_id.to_string(),
            database_name: collection.database.clone(),
            collection_id: collection.collection_id.to_string(),
            collection_name: collection.name.clone(),
            dimension: collection.dimension.unwrap_or_default(),
            collection_creation_secs: collection.created_at.timestamp(),
        }),
        version_history: None,
    }
}

fn version_info(
    version: i64,
    log_position: i64,
    segments: &[SegmentFlushInfo],
    reason: &str,
    file_name: &str,
) -> CollectionVersionInfo {
    let now_secs = chrono::Utc::now().timestamp();
    CollectionVersionInfo {
        version,
        segment_info: Some(CollectionSegmentInfo {
            segment_compaction_info: segments.iter().map(segment_compaction_info).collect(),
        }),
        collection_info_mutable: Some(CollectionInfoMutable {
            current_log_position: log_position,
            current_collection_version: version,
            updated_at_secs: now_secs,
        }),
        created_at_secs: now_secs,
        version_change_reason: reason.to_string(),
        version_file_name: file_name.to_string(),
        marked_for_deletion: false,
    }
}

fn segment_compaction_info(info: &SegmentFlushInfo) -> FlushSegmentCompactionInfo {
    FlushSegmentCompactionInfo {
        segment_id: info.segment_id.to_string(),
        file_paths: info
            .file_paths
            .iter()
            .map(|(file_type, paths)| {
                (
                    file_type.clone(),
                    FilePaths {
                        paths: paths.clone(),
                    },
                )
            })
            .collect::<HashMap<_, _>>(),
    }
}
