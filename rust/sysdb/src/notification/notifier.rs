use crate::NotifierConfig;
use async_trait::async_trait;
use chroma_error::{ChromaError, ErrorCodes};
use chroma_types::{CollectionUuid, Notification};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;

/// A notification as handed to the bus: keyed by collection id so that every
/// event for one collection lands in the same partition.
#[derive(Clone, Debug, PartialEq)]
pub struct NotificationMessage {
    pub key: String,
    pub payload: Vec<u8>,
}

impl NotificationMessage {
    pub fn try_from_notification(notification: &Notification) -> Result<Self, NotifyError> {
        Ok(NotificationMessage {
            key: notification.collection_id.to_string(),
            payload: serde_json::to_vec(notification)?,
        })
    }
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to serialize notification: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to publish notification: {0}")]
    Publish(String),
}

impl ChromaError for NotifyError {
    fn code(&self) -> ErrorCodes {
        match self {
            NotifyError::Serialize(_) => ErrorCodes::Internal,
            NotifyError::Publish(_) => ErrorCodes::Unavailable,
        }
    }
}

/// Delivers notification messages to the message bus.
#[async_trait]
pub trait Notifier: Send + Sync + Debug {
    fn name(&self) -> &str;

    async fn notify(&self, message: &NotificationMessage) -> Result<(), NotifyError>;
}

pub fn notifier_from_config(config: &NotifierConfig) -> Arc<dyn Notifier> {
    match config {
        NotifierConfig::Memory => Arc::new(InMemoryNotifier::default()),
        NotifierConfig::Log => Arc::new(LogNotifier),
    }
}

/// Emits every message as a structured log line.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        tracing::info!(
            key = %message.key,
            payload = %String::from_utf8_lossy(&message.payload),
            "Published notification"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    messages: Vec<NotificationMessage>,
    failing: HashSet<String>,
}

/// Collects messages in memory. Publishing can be made to fail per
/// collection to exercise redelivery.
#[derive(Debug, Default, Clone)]
pub struct InMemoryNotifier {
    state: Arc<Mutex<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, collection_id: CollectionUuid) {
        self.state.lock().failing.insert(collection_id.to_string());
    }

    pub fn recover(&self, collection_id: CollectionUuid) {
        self.state.lock().failing.remove(&collection_id.to_string());
    }

    pub fn messages(&self) -> Vec<NotificationMessage> {
        self.state.lock().messages.clone()
    }

    /// Published notifications, decoded.
    pub fn notifications(&self) -> Vec<Notification> {
        self.state
            .lock()
            .messages
            .iter()
            .filter_map(|message| serde_json::from_slice(&message.payload).ok())
            .collect()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    fn name(&self) -> &str {
        "memory"
    }

    async fn notify(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        let mut state = self.state.lock();
        if state.failing.contains(&message.key) {
            return Err(NotifyError::Publish(format!(
                "bus unavailable for key {}",
                message.key
            )));
        }
        state.messages.push(message.clone());
        Ok(())
    }
}
