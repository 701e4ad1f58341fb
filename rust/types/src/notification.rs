use crate::CollectionUuid;
use chroma_error::{ChromaError, ErrorCodes};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    CreateCollection,
    DeleteCollection,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::CreateCollection => "create_collection",
            NotificationType::DeleteCollection => "delete_collection",
        }
    }
}

impl TryFrom<&str> for NotificationType {
    type Error = NotificationConversionError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "create_collection" => Ok(NotificationType::CreateCollection),
            "delete_collection" => Ok(NotificationType::DeleteCollection),
            _ => Err(NotificationConversionError::InvalidType(value.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Acknowledged,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Acknowledged => "acknowledged",
        }
    }
}

impl TryFrom<&str> for NotificationStatus {
    type Error = NotificationConversionError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(NotificationStatus::Pending),
            "acknowledged" => Ok(NotificationStatus::Acknowledged),
            _ => Err(NotificationConversionError::InvalidStatus(value.to_string())),
        }
    }
}

/// A collection lifecycle event recorded in the same transaction as the
/// catalog change it describes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub collection_id: CollectionUuid,
    pub r#type: NotificationType,
    pub status: NotificationStatus,
}

/// Confirmation that a notification reached the bus or a consumer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub id: i64,
    pub collection_id: CollectionUuid,
    pub from: String,
}

#[derive(Error, Debug)]
pub enum NotificationConversionError {
    #[error("Invalid notification type [{0}]")]
    InvalidType(String),
    #[error("Invalid notification status [{0}]")]
    InvalidStatus(String),
}

impl ChromaError for NotificationConversionError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::Internal
    }
}
