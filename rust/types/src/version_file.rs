//! Binary records kept in object storage next to a collection's segment files.
//! A version file lists every compaction version of one collection; a lineage
//! file records which collections were forked from which source versions.
//! Both are protobuf encoded so older readers tolerate added fields.
use std::collections::HashMap;

#[derive(Clone, PartialEq, prost::Message)]
pub struct CollectionInfoImmutable {
    #[prost(string, tag = "1")]
    pub tenant_id: String,
    #[prost(string, tag = "2")]
    pub database_id: String,
    #[prost(string, tag = "3")]
    pub database_name: String,
    #[prost(string, tag = "4")]
    pub collection_id: String,
    #[prost(string, tag = "5")]
    pub collection_name: String,
    #[prost(int32, tag = "6")]
    pub dimension: i32,
    #[prost(int64, tag = "7")]
    pub collection_creation_secs: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CollectionInfoMutable {
    #[prost(int64, tag = "1")]
    pub current_log_position: i64,
    #[prost(int64, tag = "2")]
    pub current_collection_version: i64,
    #[prost(int64, tag = "3")]
    pub updated_at_secs: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FilePaths {
    #[prost(string, repeated, tag = "1")]
    pub paths: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FlushSegmentCompactionInfo {
    #[prost(string, tag = "1")]
    pub segment_id: String,
    #[prost(map = "string, message", tag = "2")]
    pub file_paths: HashMap<String, FilePaths>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CollectionSegmentInfo {
    #[prost(message, repeated, tag = "1")]
    pub segment_compaction_info: Vec<FlushSegmentCompactionInfo>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CollectionVersionInfo {
    #[prost(int64, tag = "1")]
    pub version: i64,
    #[prost(message, optional, tag = "2")]
    pub segment_info: Option<CollectionSegmentInfo>,
    #[prost(message, optional, tag = "3")]
    pub collection_info_mutable: Option<CollectionInfoMutable>,
    #[prost(int64, tag = "4")]
    pub created_at_secs: i64,
    #[prost(string, tag = "5")]
    pub version_change_reason: String,
    #[prost(string, tag = "6")]
    pub version_file_name: String,
    #[prost(bool, tag = "7")]
    pub marked_for_deletion: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CollectionVersionHistory {
    #[prost(message, repeated, tag = "1")]
    pub versions: Vec<CollectionVersionInfo>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CollectionVersionFile {
    #[prost(message, optional, tag = "1")]
    pub collection_info_immutable: Option<CollectionInfoImmutable>,
    #[prost(message, optional, tag = "2")]
    pub version_history: Option<CollectionVersionHistory>,
}

impl CollectionVersionFile {
    /// Highest version recorded in the history, if any.
    pub fn latest_version(&self) -> Option<i64> {
        self.version_history
            .as_ref()
            .and_then(|history| history.versions.iter().map(|v| v.version).max())
    }

    /// Appends a version entry, creating the history when absent.
    pub fn push_version(&mut self, info: CollectionVersionInfo) {
        self.version_history
            .get_or_insert_with(CollectionVersionHistory::default)
            .versions
            .push(info);
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CollectionVersionDependency {
    #[prost(string, tag = "1")]
    pub source_collection_id: String,
    #[prost(uint64, tag = "2")]
    pub source_collection_version: u64,
    #[prost(string, tag = "3")]
    pub target_collection_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CollectionLineageFile {
    #[prost(message, repeated, tag = "1")]
    pub dependencies: Vec<CollectionVersionDependency>,
}
