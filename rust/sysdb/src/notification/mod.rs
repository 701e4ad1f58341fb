//! Transactional outbox for collection lifecycle events.
//!
//! Catalog writes record a notification in their own transaction; the
//! [`NotificationProcessor`] later publishes pending notifications through a
//! [`Notifier`] and acknowledges them.

mod notifier;
mod processor;
mod store;

pub use notifier::*;
pub use processor::*;
pub use store::NotificationStore;
pub(crate) use store::insert_notification;
