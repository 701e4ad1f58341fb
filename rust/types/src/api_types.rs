use crate::{
    Collection, CollectionUuid, IdFormatError, MetadataValueConversionError,
    NotificationConversionError, Segment, SegmentConversionError, SegmentScopeConversionError,
    SegmentUuid,
};
use chroma_error::{ChromaError, ErrorCodes};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CreateTenantError {
    #[error("Tenant [{0}] already exists")]
    AlreadyExists(String),
    #[error(transparent)]
    Internal(#[from] Box<dyn ChromaError>),
}

impl_operation_error!(CreateTenantError, {
    CreateTenantError::AlreadyExists(_) => ErrorCodes::AlreadyExists,
});

#[derive(Debug, Error)]
pub enum GetTenantError {
    #[error("Tenant [{0}] not found")]
    NotFound(String),
    #[error(transparent)]
    Internal(#[from] Box<dyn ChromaError>),
}

impl_operation_error!(GetTenantError, {
    GetTenantError::NotFound(_) => ErrorCodes::NotFound,
});

#[derive(Debug, Error)]
pub enum SetLastCompactionTimeError {
    #[error("Tenant [{0}] not found")]
    TenantNotFound(String),
    #[error(transparent)]
    Internal(#[from] Box<dyn ChromaError>),
}

impl_operation_error!(SetLastCompactionTimeError, {
    SetLastCompactionTimeError::TenantNotFound(_) => ErrorCodes::NotFound,
});

#[derive(Debug, Error)]
pub enum CreateDatabaseError {
    #[error("Database [{0}] already exists")]
    AlreadyExists(String),
    #[error("Tenant [{0}] not found")]
    TenantNotFound(String),
    #[error(transparent)]
    Internal(#[from] Box<dyn ChromaError>),
}

impl_operation_error!(CreateDatabaseError, {
    CreateDatabaseError::AlreadyExists(_) => ErrorCodes::AlreadyExists,
    CreateDatabaseError::TenantNotFound(_) => ErrorCodes::NotFound,
});

#[derive(Debug, Error)]
pub enum GetDatabaseError {
    #[error("Database [{0}] not found")]
    NotFound(String),
    #[error(transparent)]
    InvalidId(#[from] IdFormatError),
    #[error(transparent)]
    Internal(#[from] Box<dyn ChromaError>),
}

impl_operation_error!(GetDatabaseError, {
    GetDatabaseError::NotFound(_) => ErrorCodes::NotFound,
    GetDatabaseError::InvalidId(e) => e.code(),
});

#[derive(Debug, Error)]
pub enum ListDatabasesError {
    #[error(transparent)]
    InvalidId(#[from] IdFormatError),
    #[error(transparent)]
    Internal(#[from] Box<dyn ChromaError>),
}

impl_operation_error!(ListDatabasesError, {
    ListDatabasesError::InvalidId(e) => e.code(),
});

#[derive(Debug, Error)]
pub enum DeleteDatabaseError {
    #[error("Database [{0}] not found")]
    NotFound(String),
    #[error(transparent)]
    Internal(#[from] Box<dyn ChromaError>),
}

impl_operation_error!(DeleteDatabaseError, {
    DeleteDatabaseError::NotFound(_) => ErrorCodes::NotFound,
});

#[derive(Debug, Error)]
pub enum GetCollectionsError {
    #[error(transparent)]
    CollectionId(#[from] IdFormatError),
    #[error("Could not deserialize metadata")]
    Metadata(#[from] MetadataValueConversionError),
    #[error(transparent)]
    Internal(#[from] Box<dyn ChromaError>),
}

impl_operation_error!(GetCollectionsError, {
    GetCollectionsError::CollectionId(_) => ErrorCodes::Internal,
    GetCollectionsError::Metadata(_) => ErrorCodes::Internal,
});

#[derive(Debug, Error)]
pub enum CreateCollectionError {
    #[error("Collection [{0}] already exists")]
    AlreadyExists(String),
    #[error("Database [{database}] not found for tenant [{tenant}]")]
    DatabaseNotFound { tenant: String, database: String },
    #[error("Failed to assign a topic: {0}")]
    Assignment(Box<dyn ChromaError>),
    #[error("Failed to read back collection: {0}")]
    Get(#[from] GetCollectionsError),
    #[error(transparent)]
    Internal(#[from] Box<dyn ChromaError>),
}

impl_operation_error!(CreateCollectionError, {
    CreateCollectionError::AlreadyExists(_) => ErrorCodes::AlreadyExists,
    CreateCollectionError::DatabaseNotFound { .. } => ErrorCodes::NotFound,
    CreateCollectionError::Assignment(e) => e.code(),
    CreateCollectionError::Get(e) => e.code(),
});

#[derive(Debug, Error)]
pub enum UpdateCollectionError {
    #[error("Collection [{0}] not found")]
    NotFound(String),
    #[error("Collection name [{0}] already exists in this database")]
    AlreadyExists(String),
    #[error(transparent)]
    Internal(#[from] Box<dyn ChromaError>),
}

impl_operation_error!(UpdateCollectionError, {
    UpdateCollectionError::NotFound(_) => ErrorCodes::NotFound,
    UpdateCollectionError::AlreadyExists(_) => ErrorCodes::AlreadyExists,
});

#[derive(Debug, Error)]
pub enum DeleteCollectionError {
    #[error("Collection [{0}] not found")]
    NotFound(String),
    #[error(transparent)]
    Internal(#[from] Box<dyn ChromaError>),
}

impl_operation_error!(DeleteCollectionError, {
    DeleteCollectionError::NotFound(_) => ErrorCodes::NotFound,
});

#[derive(Debug, Error)]
pub enum CreateSegmentError {
    #[error("Segment [{0}] already exists")]
    AlreadyExists(SegmentUuid),
    #[error(transparent)]
    Internal(#[from] Box<dyn ChromaError>),
}

impl_operation_error!(CreateSegmentError, {
    CreateSegmentError::AlreadyExists(_) => ErrorCodes::AlreadyExists,
});

#[derive(Debug, Error)]
pub enum GetSegmentsError {
    #[error("Could not parse segment")]
    SegmentConversion(#[from] SegmentConversionError),
    #[error("Unknown segment scope")]
    UnknownScope(#[from] SegmentScopeConversionError),
    #[error("Could not deserialize metadata")]
    Metadata(#[from] MetadataValueConversionError),
    #[error(transparent)]
    Internal(#[from] Box<dyn ChromaError>),
}

impl_operation_error!(GetSegmentsError, {
    GetSegmentsError::SegmentConversion(_) => ErrorCodes::Internal,
    GetSegmentsError::UnknownScope(_) => ErrorCodes::Internal,
    GetSegmentsError::Metadata(_) => ErrorCodes::Internal,
});

#[derive(Debug, Error)]
pub enum UpdateSegmentError {
    #[error("Segment [{0}] not found")]
    NotFound(SegmentUuid),
    #[error(transparent)]
    Internal(#[from] Box<dyn ChromaError>),
}

impl_operation_error!(UpdateSegmentError, {
    UpdateSegmentError::NotFound(_) => ErrorCodes::NotFound,
});

#[derive(Debug, Error)]
pub enum DeleteSegmentError {
    #[error("Segment [{0}] not found")]
    NotFound(SegmentUuid),
    #[error(transparent)]
    Internal(#[from] Box<dyn ChromaError>),
}

impl_operation_error!(DeleteSegmentError, {
    DeleteSegmentError::NotFound(_) => ErrorCodes::NotFound,
});

#[derive(Debug, Error)]
pub enum RegisterFilePathsError {
    #[error("Segment [{0}] not found")]
    NotFound(SegmentUuid),
    #[error(transparent)]
    Internal(#[from] Box<dyn ChromaError>),
}

impl_operation_error!(RegisterFilePathsError, {
    RegisterFilePathsError::NotFound(_) => ErrorCodes::NotFound,
});

/// Outcome of a rejected log position and version compare-and-swap.
///
/// A stale request lost a race with another writer and may be recomputed and
/// retried. An invalid version means the catalog is behind the caller, which
/// indicates lost state and must not be retried.
#[derive(Debug, Error)]
pub enum UpdateLogPositionError {
    #[error("Collection [{0}] not found")]
    NotFound(CollectionUuid),
    #[error("Stale log position: stored [{stored}] is ahead of requested [{requested}]")]
    StaleLogPosition { stored: i64, requested: i64 },
    #[error("Stale version: stored [{stored}] is ahead of expected [{expected}]")]
    StaleVersion { stored: i32, expected: i32 },
    #[error("Invalid version: stored [{stored}] is behind expected [{expected}]")]
    InvalidVersion { stored: i32, expected: i32 },
    #[error(transparent)]
    Internal(#[from] Box<dyn ChromaError>),
}

impl UpdateLogPositionError {
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            UpdateLogPositionError::StaleLogPosition { .. }
                | UpdateLogPositionError::StaleVersion { .. }
        )
    }
}

impl_operation_error!(UpdateLogPositionError, {
    UpdateLogPositionError::NotFound(_) => ErrorCodes::NotFound,
    UpdateLogPositionError::StaleLogPosition { .. } => ErrorCodes::Aborted,
    UpdateLogPositionError::StaleVersion { .. } => ErrorCodes::Aborted,
    UpdateLogPositionError::InvalidVersion { .. } => ErrorCodes::VersionMismatch,
});

#[derive(Debug, Error)]
pub enum FlushCompactionError {
    #[error(transparent)]
    Cas(#[from] UpdateLogPositionError),
    #[error("Segment [{0}] not found")]
    SegmentNotFound(SegmentUuid),
    #[error(transparent)]
    Internal(#[from] Box<dyn ChromaError>),
}

impl_operation_error!(FlushCompactionError, {
    FlushCompactionError::Cas(e) => e.code(),
    FlushCompactionError::SegmentNotFound(_) => ErrorCodes::NotFound,
});

/// File paths written for one segment by a compaction.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentFlushInfo {
    pub segment_id: SegmentUuid,
    pub file_paths: std::collections::HashMap<String, Vec<String>>,
}

/// Result of a committed compaction flush.
#[derive(Clone, Debug, PartialEq)]
pub struct FlushCompactionResponse {
    pub collection_id: CollectionUuid,
    pub collection_version: i32,
    pub last_compaction_time: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CollectionAndSegments {
    pub collection: Collection,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Error)]
pub enum GetCollectionWithSegmentsError {
    #[error("Collection [{0}] not found")]
    NotFound(CollectionUuid),
    #[error(transparent)]
    Collection(#[from] GetCollectionsError),
    #[error(transparent)]
    Segments(#[from] GetSegmentsError),
    #[error(transparent)]
    Internal(#[from] Box<dyn ChromaError>),
}

impl_operation_error!(GetCollectionWithSegmentsError, {
    GetCollectionWithSegmentsError::NotFound(_) => ErrorCodes::NotFound,
    GetCollectionWithSegmentsError::Collection(e) => e.code(),
    GetCollectionWithSegmentsError::Segments(e) => e.code(),
});

#[derive(Debug, Error)]
pub enum NotificationStoreError {
    #[error("Notification [{0}] not found")]
    NotFound(i64),
    #[error(transparent)]
    Conversion(#[from] NotificationConversionError),
    #[error(transparent)]
    CollectionId(#[from] IdFormatError),
    #[error(transparent)]
    Internal(#[from] Box<dyn ChromaError>),
}

impl_operation_error!(NotificationStoreError, {
    NotificationStoreError::NotFound(_) => ErrorCodes::NotFound,
    NotificationStoreError::Conversion(e) => e.code(),
    NotificationStoreError::CollectionId(_) => ErrorCodes::Internal,
});

#[derive(Debug, Error)]
pub enum ResetError {
    #[error(transparent)]
    Internal(#[from] Box<dyn ChromaError>),
}

impl ChromaError for ResetError {
    fn code(&self) -> ErrorCodes {
        match self {
            ResetError::Internal(e) => e.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cas_error_codes() {
        let stale = UpdateLogPositionError::StaleLogPosition {
            stored: 10,
            requested: 5,
        };
        assert!(stale.is_stale());
        assert_eq!(stale.code(), ErrorCodes::Aborted);
        assert!(stale.code().is_retryable());

        let invalid = UpdateLogPositionError::InvalidVersion {
            stored: 1,
            expected: 3,
        };
        assert!(!invalid.is_stale());
        assert_eq!(invalid.code(), ErrorCodes::VersionMismatch);
        assert!(!invalid.code().is_retryable());

        let flush: FlushCompactionError = invalid.into();
        assert_eq!(flush.code(), ErrorCodes::VersionMismatch);
    }

    #[test]
    fn test_internal_forwards_code() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = GetTenantError::Internal(io.boxed());
        assert_eq!(err.code(), ErrorCodes::NotFound);
        assert_eq!(
            CreateTenantError::AlreadyExists("t".to_string()).code(),
            ErrorCodes::AlreadyExists
        );
    }
}
