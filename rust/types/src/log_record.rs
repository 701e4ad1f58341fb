use crate::CollectionUuid;
use serde::{Deserialize, Serialize};

/// One entry of a collection's record log. `log_offset` starts at 1 and has no
/// gaps within a collection. `timestamp` is nanoseconds since the epoch, taken
/// when the record was pushed. `record` is an opaque serialized mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub collection_id: CollectionUuid,
    pub log_offset: i64,
    pub timestamp: i64,
    pub record: Vec<u8>,
}

/// A collection with uncompacted records: the oldest such record's offset and
/// push timestamp.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub collection_id: CollectionUuid,
    pub first_log_offset: i64,
    pub first_log_ts: i64,
}
