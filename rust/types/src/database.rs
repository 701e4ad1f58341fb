use crate::IdFormatError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_DATABASE: &str = "default_database";

define_uuid_newtype!(
    /// DatabaseUuid is a wrapper around Uuid to provide a type for the database id.
    DatabaseUuid
);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    pub id: DatabaseUuid,
    pub name: String,
    pub tenant: String,
    /// Creation time, seconds since the epoch.
    pub ts: i64,
}
