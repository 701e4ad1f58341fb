// Error codes follow the gRPC status codes so that errors raised anywhere in
// the coordinator keep a transport-neutral classification.
// https://grpc.github.io/grpc/core/md_doc_statuscodes.html
use std::error::Error;

#[cfg(feature = "sqlx")]
mod sqlx;
#[cfg(feature = "sqlx")]
pub use sqlx::*;

#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub enum ErrorCodes {
    // OK is returned on success, we use "Success" since Ok is a keyword in Rust.
    Success = 0,
    // CANCELLED indicates the operation was cancelled (typically by the caller).
    Cancelled = 1,
    // UNKNOWN indicates an unknown error.
    Unknown = 2,
    // INVALID_ARGUMENT indicates client specified an invalid argument.
    InvalidArgument = 3,
    // DEADLINE_EXCEEDED means operation expired before completion.
    DeadlineExceeded = 4,
    // NOT_FOUND means some requested entity was not found.
    NotFound = 5,
    // ALREADY_EXISTS means an entity that we attempted to create already exists.
    AlreadyExists = 6,
    // PERMISSION_DENIED indicates the caller may not execute the operation.
    PermissionDenied = 7,
    // RESOURCE_EXHAUSTED indicates some resource (pool, quota) has been exhausted.
    ResourceExhausted = 8,
    // FAILED_PRECONDITION indicates the system is not in a state required for the operation.
    FailedPrecondition = 9,
    // ABORTED indicates the operation was aborted, typically by a concurrency conflict
    // such as a rejected compare-and-swap.
    Aborted = 10,
    // OUT_OF_RANGE means operation was attempted past the valid range.
    OutOfRange = 11,
    // UNIMPLEMENTED indicates operation is not implemented or not supported/enabled.
    Unimplemented = 12,
    // INTERNAL errors are internal errors.
    Internal = 13,
    // UNAVAILABLE indicates service is currently unavailable.
    Unavailable = 14,
    // DATA_LOSS indicates unrecoverable data loss or corruption.
    DataLoss = 15,
    // UNAUTHENTICATED indicates the request does not have valid authentication credentials.
    Unauthenticated = 16,
    // VERSION_MISMATCH indicates stored state is behind what the caller expected.
    // Not part of the gRPC spec.
    VersionMismatch = 17,
}

impl ErrorCodes {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCodes::InvalidArgument => "InvalidArgumentError",
            ErrorCodes::NotFound => "NotFoundError",
            ErrorCodes::AlreadyExists => "UniqueConstraintError",
            ErrorCodes::Aborted => "StaleError",
            ErrorCodes::Internal => "InternalError",
            ErrorCodes::VersionMismatch => "InvalidVersionError",
            _ => "ChromaError",
        }
    }

    /// Transient conditions a caller may retry after recomputing its request.
    /// Uniqueness violations and version mismatches are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCodes::Aborted
                | ErrorCodes::Unavailable
                | ErrorCodes::ResourceExhausted
                | ErrorCodes::DeadlineExceeded
        )
    }
}

pub trait ChromaError: Error + Send + Sync {
    fn code(&self) -> ErrorCodes;
    fn boxed(self) -> Box<dyn ChromaError>
    where
        Self: Sized + 'static,
    {
        Box::new(self)
    }
    fn should_trace_error(&self) -> bool {
        true
    }
}

impl Error for Box<dyn ChromaError> {}

impl ChromaError for Box<dyn ChromaError> {
    fn code(&self) -> ErrorCodes {
        self.as_ref().code()
    }

    fn should_trace_error(&self) -> bool {
        self.as_ref().should_trace_error()
    }
}

impl ChromaError for std::io::Error {
    fn code(&self) -> ErrorCodes {
        match self.kind() {
            std::io::ErrorKind::NotFound => ErrorCodes::NotFound,
            std::io::ErrorKind::AlreadyExists => ErrorCodes::AlreadyExists,
            std::io::ErrorKind::PermissionDenied => ErrorCodes::PermissionDenied,
            _ => ErrorCodes::Unknown,
        }
    }
}
