use chroma_error::{ChromaError, ErrorCodes, WrappedSqlxError};
use chroma_types::IdFormatError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PushLogsError {
    #[error("Query error: {0}")]
    QueryError(#[from] WrappedSqlxError),
}

impl ChromaError for PushLogsError {
    fn code(&self) -> ErrorCodes {
        match self {
            PushLogsError::QueryError(err) => err.code(),
        }
    }
}

#[derive(Error, Debug)]
pub enum PullLogsError {
    #[error("Query error: {0}")]
    QueryError(#[from] WrappedSqlxError),
    #[error("Log offsets start at 1, got [{0}]")]
    InvalidOffset(i64),
}

impl ChromaError for PullLogsError {
    fn code(&self) -> ErrorCodes {
        match self {
            PullLogsError::QueryError(err) => err.code(),
            PullLogsError::InvalidOffset(_) => ErrorCodes::InvalidArgument,
        }
    }
}

#[derive(Error, Debug)]
pub enum GetCollectionsToCompactError {
    #[error("Query error: {0}")]
    QueryError(#[from] WrappedSqlxError),
    #[error("Invalid collection ID: {0}")]
    InvalidCollectionId(#[from] IdFormatError),
}

impl ChromaError for GetCollectionsToCompactError {
    fn code(&self) -> ErrorCodes {
        match self {
            GetCollectionsToCompactError::QueryError(err) => err.code(),
            GetCollectionsToCompactError::InvalidCollectionId(_) => ErrorCodes::Internal,
        }
    }
}

#[derive(Error, Debug)]
pub enum PurgeLogsError {
    #[error("Delete query error: {0}")]
    DeleteQueryError(#[from] WrappedSqlxError),
}

impl ChromaError for PurgeLogsError {
    fn code(&self) -> ErrorCodes {
        match self {
            PurgeLogsError::DeleteQueryError(err) => err.code(),
        }
    }
}
