use super::{CollectionUuid, Metadata, SegmentScope};
use crate::IdFormatError;
use chroma_error::{ChromaError, ErrorCodes};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

define_uuid_newtype!(
    /// SegmentUuid is a wrapper around Uuid to provide a type for the segment id.
    SegmentUuid
);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentType {
    HnswDistributed,
    BlockfileMetadata,
    BlockfileRecord,
}

impl From<SegmentType> for String {
    fn from(segment_type: SegmentType) -> String {
        match segment_type {
            SegmentType::HnswDistributed => {
                "urn:chroma:segment/vector/hnsw-distributed".to_string()
            }
            SegmentType::BlockfileRecord => "urn:chroma:segment/record/blockfile".to_string(),
            SegmentType::BlockfileMetadata => "urn:chroma:segment/metadata/blockfile".to_string(),
        }
    }
}

impl TryFrom<&str> for SegmentType {
    type Error = SegmentConversionError;

    fn try_from(segment_type: &str) -> Result<Self, Self::Error> {
        match segment_type {
            "urn:chroma:segment/vector/hnsw-distributed" => Ok(SegmentType::HnswDistributed),
            "urn:chroma:segment/record/blockfile" => Ok(SegmentType::BlockfileRecord),
            "urn:chroma:segment/metadata/blockfile" => Ok(SegmentType::BlockfileMetadata),
            _ => Err(SegmentConversionError::InvalidSegmentType(
                segment_type.to_string(),
            )),
        }
    }
}

/// Physical storage unit backing a collection. `collection` may be unset for a
/// segment that has not been attached yet. `file_paths` maps a file type
/// (e.g. "hnsw_index") to the object paths written by the last compaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentUuid,
    pub r#type: SegmentType,
    pub scope: SegmentScope,
    pub collection: Option<CollectionUuid>,
    pub topic: Option<String>,
    pub metadata: Option<Metadata>,
    pub file_paths: HashMap<String, Vec<String>>,
}

impl Segment {
    pub fn new(
        r#type: SegmentType,
        scope: SegmentScope,
        collection: Option<CollectionUuid>,
    ) -> Self {
        Segment {
            id: SegmentUuid::new(),
            r#type,
            scope,
            collection,
            topic: None,
            metadata: None,
            file_paths: HashMap::new(),
        }
    }
}

/// The segments a distributed collection starts with.
pub fn default_segments(collection: CollectionUuid) -> Vec<Segment> {
    vec![
        Segment::new(
            SegmentType::HnswDistributed,
            SegmentScope::VECTOR,
            Some(collection),
        ),
        Segment::new(
            SegmentType::BlockfileMetadata,
            SegmentScope::METADATA,
            Some(collection),
        ),
    ]
}

#[derive(Error, Debug)]
pub enum SegmentConversionError {
    #[error(transparent)]
    InvalidUuid(#[from] IdFormatError),
    #[error("Invalid segment type [{0}]")]
    InvalidSegmentType(String),
    #[error("Invalid file paths encoding: {0}")]
    InvalidFilePaths(#[from] serde_json::Error),
}

impl ChromaError for SegmentConversionError {
    fn code(&self) -> ErrorCodes {
        match self {
            SegmentConversionError::InvalidUuid(e) => e.code(),
            SegmentConversionError::InvalidSegmentType(_) => ErrorCodes::InvalidArgument,
            SegmentConversionError::InvalidFilePaths(_) => ErrorCodes::Internal,
        }
    }
}
