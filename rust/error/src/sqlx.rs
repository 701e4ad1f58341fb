use crate::{ChromaError, ErrorCodes};
use thiserror::Error;

/// Wraps a relational store error so it can travel as a `ChromaError`.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct WrappedSqlxError(#[from] pub sqlx::Error);

impl WrappedSqlxError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            &self.0,
            sqlx::Error::Database(db_err) if db_err.kind() == sqlx::error::ErrorKind::UniqueViolation
        )
    }
}

impl ChromaError for WrappedSqlxError {
    fn code(&self) -> ErrorCodes {
        match &self.0 {
            sqlx::Error::RowNotFound => ErrorCodes::NotFound,
            sqlx::Error::PoolTimedOut => ErrorCodes::ResourceExhausted,
            sqlx::Error::PoolClosed => ErrorCodes::Unavailable,
            _ if self.is_unique_violation() => ErrorCodes::AlreadyExists,
            _ => ErrorCodes::Internal,
        }
    }
}

impl From<sqlx::Error> for Box<dyn ChromaError> {
    fn from(err: sqlx::Error) -> Self {
        Box::new(WrappedSqlxError(err))
    }
}
