use super::notifier::{NotificationMessage, Notifier};
use super::store::NotificationStore;
use crate::NotificationProcessorConfig;
use chroma_types::{Acknowledgement, CollectionUuid, NotificationStoreError};
use opentelemetry::metrics::Counter;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct NotificationProcessorMetrics {
    published: Counter<u64>,
    failed: Counter<u64>,
}

impl Default for NotificationProcessorMetrics {
    fn default() -> Self {
        let meter = opentelemetry::global::meter("chroma.sysdb");
        Self {
            published: meter
                .u64_counter("notifications_published")
                .with_description("Notifications published and acknowledged")
                .build(),
            failed: meter
                .u64_counter("notifications_failed")
                .with_description("Notification publish or acknowledge failures")
                .build(),
        }
    }
}

/// Outcome of one pass over the outbox.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessSummary {
    pub published: usize,
    pub failed: usize,
}

/// Wakes the processor ahead of its next poll. Cheap to clone; wake-ups that
/// arrive while one is already queued are coalesced.
#[derive(Debug, Clone)]
pub struct NotificationTrigger {
    tx: mpsc::Sender<()>,
}

impl NotificationTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Drains the notification outbox into a `Notifier`.
///
/// Delivery is at least once: a notification is acknowledged only after the
/// notifier accepted it, so a crash between the two republishes it. Within a
/// pass, notifications for one collection are published in id order and a
/// failure stops that collection until the next pass.
pub struct NotificationProcessor {
    store: NotificationStore,
    notifier: Arc<dyn Notifier>,
    batch_size: u32,
    poll_interval: Duration,
    trigger_rx: mpsc::Receiver<()>,
    metrics: NotificationProcessorMetrics,
}

impl NotificationProcessor {
    pub fn new(
        store: NotificationStore,
        notifier: Arc<dyn Notifier>,
        config: &NotificationProcessorConfig,
    ) -> (Self, NotificationTrigger) {
        let (tx, trigger_rx) = mpsc::channel(1);
        (
            NotificationProcessor {
                store,
                notifier,
                batch_size: config.batch_size.max(1),
                poll_interval: Duration::from_millis(config.poll_interval_ms),
                trigger_rx,
                metrics: NotificationProcessorMetrics::default(),
            },
            NotificationTrigger { tx },
        )
    }

    #[tracing::instrument(skip(self), fields(notifier = self.notifier.name()))]
    pub async fn process_pending(&self) -> Result<ProcessSummary, NotificationStoreError> {
        let mut summary = ProcessSummary::default();
        let mut blocked: HashSet<CollectionUuid> = HashSet::new();
        let mut cursor = 0;

        loop {
            let batch = self.store.get_pending(cursor, self.batch_size).await?;
            let Some(last) = batch.last() else {
                break;
            };
            cursor = last.id;

            for notification in &batch {
                if blocked.contains(&notification.collection_id) {
                    continue;
                }

                let message = match NotificationMessage::try_from_notification(notification) {
                    Ok(message) => message,
                    Err(err) => {
                        tracing::error!(id = notification.id, error = %err, "Failed to encode notification");
                        blocked.insert(notification.collection_id);
                        summary.failed += 1;
                        self.metrics.failed.add(1, &[]);
                        continue;
                    }
                };

                if let Err(err) = self.notifier.notify(&message).await {
                    tracing::warn!(
                        id = notification.id,
                        collection_id = %notification.collection_id,
                        error = %err,
                        "Failed to publish notification, will retry"
                    );
                    blocked.insert(notification.collection_id);
                    summary.failed += 1;
                    self.metrics.failed.add(1, &[]);
                    continue;
                }

                let ack = Acknowledgement {
                    id: notification.id,
                    collection_id: notification.collection_id,
                    from: self.notifier.name().to_string(),
                };
                if let Err(err) = self.store.acknowledge(&ack).await {
                    // Published but not acknowledged: it goes out again next pass
                    tracing::warn!(id = notification.id, error = %err, "Failed to acknowledge notification");
                    blocked.insert(notification.collection_id);
                    summary.failed += 1;
                    self.metrics.failed.add(1, &[]);
                    continue;
                }

                summary.published += 1;
                self.metrics.published.add(1, &[]);
            }

            if batch.len() < self.batch_size as usize {
                break;
            }
        }

        if summary.published > 0 || summary.failed > 0 {
            tracing::info!(
                published = summary.published,
                failed = summary.failed,
                "Processed notification outbox"
            );
        }
        Ok(summary)
    }

    /// Processes the outbox on every trigger and poll tick until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Notification processor stopped");
                    return;
                }
                Some(()) = self.trigger_rx.recv() => {}
                _ = interval.tick() => {}
            }

            if let Err(err) = self.process_pending().await {
                tracing::error!(error = %err, "Failed to process notifications");
                continue;
            }
            match self.store.prune_acknowledged().await {
                Ok(0) => {}
                Ok(pruned) => tracing::debug!(pruned, "Pruned acknowledged notifications"),
                Err(err) => tracing::warn!(error = %err, "Failed to prune notifications"),
            }
        }
    }
}
