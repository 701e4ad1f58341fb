use chroma_error::{ChromaError, ErrorCodes};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// A typed metadata value. Collection and segment metadata map string keys to
/// one of these variants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetadataValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            MetadataValue::Int(_) => "int",
            MetadataValue::Float(_) => "float",
            MetadataValue::Str(_) => "string",
        }
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Str(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Str(value)
    }
}

pub type Metadata = HashMap<String, MetadataValue>;

/// A value in a metadata update. `None` deletes the key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpdateMetadataValue {
    Int(i64),
    Float(f64),
    Str(String),
    None,
}

impl From<MetadataValue> for UpdateMetadataValue {
    fn from(value: MetadataValue) -> Self {
        match value {
            MetadataValue::Int(v) => UpdateMetadataValue::Int(v),
            MetadataValue::Float(v) => UpdateMetadataValue::Float(v),
            MetadataValue::Str(v) => UpdateMetadataValue::Str(v),
        }
    }
}

impl TryFrom<&UpdateMetadataValue> for MetadataValue {
    type Error = MetadataValueConversionError;

    fn try_from(value: &UpdateMetadataValue) -> Result<Self, Self::Error> {
        match value {
            UpdateMetadataValue::Int(v) => Ok(MetadataValue::Int(*v)),
            UpdateMetadataValue::Float(v) => Ok(MetadataValue::Float(*v)),
            UpdateMetadataValue::Str(v) => Ok(MetadataValue::Str(v.clone())),
            UpdateMetadataValue::None => Err(MetadataValueConversionError::InvalidValue),
        }
    }
}

pub type UpdateMetadata = HashMap<String, UpdateMetadataValue>;

/// How an update call changes an entity's metadata.
#[derive(Clone, Debug, PartialEq)]
pub enum MetadataUpdate {
    /// Adds or overwrites the given keys and removes keys set to `None`.
    Patch(UpdateMetadata),
    /// Removes every key first, then applies the given keys.
    Reset(UpdateMetadata),
}

impl MetadataUpdate {
    pub fn reset() -> Self {
        MetadataUpdate::Reset(UpdateMetadata::new())
    }
}

/// Applies an update to an in-memory metadata map, with the same semantics the
/// catalog applies to stored metadata. Returns `None` when no key remains.
pub fn apply_metadata_update(existing: Option<Metadata>, update: &MetadataUpdate) -> Option<Metadata> {
    let (mut metadata, changes) = match update {
        MetadataUpdate::Patch(changes) => (existing.unwrap_or_default(), changes),
        MetadataUpdate::Reset(changes) => (Metadata::new(), changes),
    };
    for (key, value) in changes {
        match MetadataValue::try_from(value) {
            Ok(value) => {
                metadata.insert(key.clone(), value);
            }
            Err(_) => {
                metadata.remove(key);
            }
        }
    }
    if metadata.is_empty() {
        None
    } else {
        Some(metadata)
    }
}

#[derive(Error, Debug)]
pub enum MetadataValueConversionError {
    #[error("Invalid metadata value, valid values are: Int, Float, Str")]
    InvalidValue,
    #[error("Unknown metadata type for key [{0}]")]
    UnknownMetadataType(String),
}

impl ChromaError for MetadataValueConversionError {
    fn code(&self) -> ErrorCodes {
        match self {
            MetadataValueConversionError::InvalidValue => ErrorCodes::InvalidArgument,
            MetadataValueConversionError::UnknownMetadataType(_) => ErrorCodes::InvalidArgument,
        }
    }
}

/// Converts loosely typed JSON (as received at the transport boundary) into
/// typed metadata. Booleans, arrays and objects have no metadata variant.
pub fn metadata_from_json(
    value: serde_json::Map<String, serde_json::Value>,
) -> Result<UpdateMetadata, MetadataValueConversionError> {
    value
        .into_iter()
        .map(|(key, value)| {
            let converted = match value {
                serde_json::Value::Null => UpdateMetadataValue::None,
                serde_json::Value::String(s) => UpdateMetadataValue::Str(s),
                serde_json::Value::Number(n) => match n.as_i64() {
                    Some(i) => UpdateMetadataValue::Int(i),
                    None => match n.as_f64() {
                        Some(f) => UpdateMetadataValue::Float(f),
                        None => {
                            return Err(MetadataValueConversionError::UnknownMetadataType(key))
                        }
                    },
                },
                _ => return Err(MetadataValueConversionError::UnknownMetadataType(key)),
            };
            Ok((key, converted))
        })
        .collect()
}
