use crate::{Metadata, IdFormatError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

define_uuid_newtype!(
    /// CollectionUuid is a wrapper around Uuid to provide a type for the collection id.
    CollectionUuid
);

/// A named set of records within a database. `log_position` and `version`
/// only move forward, and only through compaction registration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Collection {
    #[serde(rename = "id")]
    pub collection_id: CollectionUuid,
    pub name: String,
    pub topic: String,
    pub dimension: Option<i32>,
    pub metadata: Option<Metadata>,
    pub tenant: String,
    pub database: String,
    pub log_position: i64,
    pub version: i32,
    pub version_file_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MetadataValue;
    use std::str::FromStr;

    #[test]
    fn test_collection_uuid_parse() {
        let id = CollectionUuid::new();
        assert_eq!(CollectionUuid::from_str(&id.to_string()).unwrap(), id);
        let err = CollectionUuid::from_str("not-a-uuid").unwrap_err();
        assert_eq!(err.id, "not-a-uuid");
    }

    #[test]
    fn test_collection_serializes_id_field() {
        let collection = Collection {
            collection_id: CollectionUuid::new(),
            name: "c1".to_string(),
            topic: "persistent://default/default/c1".to_string(),
            dimension: Some(128),
            metadata: Some(Metadata::from([(
                "env".to_string(),
                MetadataValue::from("prod"),
            )])),
            tenant: "t1".to_string(),
            database: "d1".to_string(),
            log_position: 0,
            version: 0,
            version_file_name: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&collection).unwrap();
        assert_eq!(json["id"], collection.collection_id.to_string());
        let back: Collection = serde_json::from_value(json).unwrap();
        assert_eq!(back, collection);
    }
}
