use chroma_error::{ChromaError, ErrorCodes};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentScope {
    VECTOR,
    METADATA,
}

impl From<SegmentScope> for String {
    fn from(scope: SegmentScope) -> String {
        match scope {
            SegmentScope::VECTOR => "VECTOR".to_string(),
            SegmentScope::METADATA => "METADATA".to_string(),
        }
    }
}

impl TryFrom<&str> for SegmentScope {
    type Error = SegmentScopeConversionError;

    fn try_from(scope: &str) -> Result<Self, Self::Error> {
        match scope {
            "VECTOR" => Ok(SegmentScope::VECTOR),
            "METADATA" => Ok(SegmentScope::METADATA),
            _ => Err(SegmentScopeConversionError::InvalidScope(scope.to_string())),
        }
    }
}

#[derive(Error, Debug)]
pub enum SegmentScopeConversionError {
    #[error("Invalid segment scope [{0}], valid scopes are: VECTOR, METADATA")]
    InvalidScope(String),
}

impl ChromaError for SegmentScopeConversionError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}
