use crate::config::MemberlistManagerConfig;
use crate::memberlist::{memberlists_equal, sort_memberlist};
use crate::memberlist_store::{CustomResourceMemberlistStore, MemberlistStore, MemberlistStoreError};
use crate::node_watcher::{KubernetesNodeWatcher, NodeWatcher, NodeWatcherError};
use crate::work_queue::WorkQueue;
use async_trait::async_trait;
use chroma_config::registry::Registry;
use chroma_config::Configurable;
use chroma_error::{ChromaError, ErrorCodes};
use opentelemetry::metrics::Counter;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Error, Debug)]
pub enum MemberlistManagerError {
    #[error("Failed to load kube client: {0}")]
    FailedToLoadKubeClient(#[from] kube::Error),
    #[error(transparent)]
    NodeWatcher(#[from] NodeWatcherError),
    #[error(transparent)]
    Store(#[from] MemberlistStoreError),
}

impl ChromaError for MemberlistManagerError {
    fn code(&self) -> ErrorCodes {
        match self {
            MemberlistManagerError::FailedToLoadKubeClient(_) => ErrorCodes::Internal,
            MemberlistManagerError::NodeWatcher(e) => e.code(),
            MemberlistManagerError::Store(e) => e.code(),
        }
    }
}

#[derive(Clone)]
struct MemberlistManagerMetrics {
    flushes: Counter<u64>,
    writes: Counter<u64>,
    failures: Counter<u64>,
}

impl Default for MemberlistManagerMetrics {
    fn default() -> Self {
        let meter = opentelemetry::global::meter("chroma.memberlist");
        Self {
            flushes: meter
                .u64_counter("memberlist_reconcile_flushes")
                .with_description("Batches of worker events reconciled")
                .build(),
            writes: meter
                .u64_counter("memberlist_writes")
                .with_description("Memberlist writes to the backing store")
                .build(),
            failures: meter
                .u64_counter("memberlist_reconcile_failures")
                .with_description("Reconciliations that failed and will be retried")
                .build(),
        }
    }
}

/// Publishes the set of ready workers.
///
/// Worker events from the node watcher are collected in batches. A batch is
/// flushed once it holds `reconcile_count` events or `reconcile_interval`
/// passed since its first event. Each flush recomputes the whole ready list
/// and writes it only if it differs from the stored one. Events are marked
/// done only after a successful flush; on failure they are re-queued with
/// back-off.
pub struct MemberlistManager {
    queue: WorkQueue<String>,
    node_watcher: Arc<dyn NodeWatcher>,
    store: Arc<dyn MemberlistStore>,
    reconcile_count: usize,
    reconcile_interval: Duration,
    metrics: MemberlistManagerMetrics,
}

impl Debug for MemberlistManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberlistManager")
            .field("node_watcher", &self.node_watcher)
            .field("store", &self.store)
            .field("reconcile_count", &self.reconcile_count)
            .field("reconcile_interval", &self.reconcile_interval)
            .finish()
    }
}

impl MemberlistManager {
    pub fn new(
        node_watcher: Arc<dyn NodeWatcher>,
        store: Arc<dyn MemberlistStore>,
        config: &MemberlistManagerConfig,
    ) -> Self {
        MemberlistManager {
            queue: WorkQueue::new(
                Duration::from_millis(config.queue_base_delay_ms),
                Duration::from_millis(config.queue_max_delay_ms),
            ),
            node_watcher,
            store,
            reconcile_count: config.reconcile_count.max(1),
            reconcile_interval: Duration::from_millis(config.reconcile_interval_ms),
            metrics: MemberlistManagerMetrics::default(),
        }
    }

    pub fn queue(&self) -> &WorkQueue<String> {
        &self.queue
    }

    /// Subscribes the node watcher to the queue.
    pub async fn start(&self) -> Result<(), MemberlistManagerError> {
        self.node_watcher.start(self.queue.clone()).await?;
        tracing::info!("Memberlist manager started");
        Ok(())
    }

    /// Consumes worker events until the queue is shut down.
    pub async fn run(&self) {
        while let Some(batch) = self.next_batch().await {
            self.metrics.flushes.add(1, &[]);
            match self.reconcile().await {
                Ok(_) => {
                    for item in &batch {
                        self.queue.forget(item);
                        self.queue.done(item);
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, events = batch.len(), "Failed to reconcile memberlist");
                    self.metrics.failures.add(1, &[]);
                    for item in &batch {
                        self.queue.add_rate_limited(item.clone());
                        self.queue.done(item);
                    }
                }
            }
        }
        tracing::info!("Memberlist manager stopped");
    }

    /// Tears down the watcher subscription and closes the queue, which ends
    /// `run`.
    pub async fn stop(&self) {
        self.node_watcher.stop().await;
        self.queue.shutdown();
    }

    /// Waits for the first event, then collects more until the batch is full
    /// or the interval elapsed. `None` once the queue is shut down.
    async fn next_batch(&self) -> Option<Vec<String>> {
        let first = self.queue.get().await?;
        let mut batch = vec![first];
        let deadline = Instant::now() + self.reconcile_interval;
        while batch.len() < self.reconcile_count {
            tokio::select! {
                item = self.queue.get() => match item {
                    Some(item) => batch.push(item),
                    None => return None,
                },
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }
        Some(batch)
    }

    /// Recomputes the ready list and writes it if it changed. Returns whether
    /// a write happened.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<bool, MemberlistManagerError> {
        let (old_memberlist, resource_version) = self.store.get_memberlist().await?;
        let mut new_memberlist = self.node_watcher.list_ready_members().await?;
        sort_memberlist(&mut new_memberlist);

        if memberlists_equal(&old_memberlist, &new_memberlist) {
            tracing::debug!(members = new_memberlist.len(), "Memberlist unchanged");
            return Ok(false);
        }

        self.store
            .update_memberlist(&new_memberlist, &resource_version)
            .await?;
        self.metrics.writes.add(1, &[]);
        tracing::info!(
            old_members = old_memberlist.len(),
            new_members = new_memberlist.len(),
            "Published memberlist"
        );
        Ok(true)
    }
}

#[async_trait]
impl Configurable<MemberlistManagerConfig> for MemberlistManager {
    async fn try_from_config(
        config: &MemberlistManagerConfig,
        _registry: &Registry,
    ) -> Result<Self, Box<dyn ChromaError>> {
        let kube_client = kube::Client::try_default()
            .await
            .map_err(|err| MemberlistManagerError::FailedToLoadKubeClient(err).boxed())?;
        let node_watcher = KubernetesNodeWatcher::new(
            kube_client.clone(),
            &config.kube_namespace,
            &config.pod_label_selector,
        );
        let store = CustomResourceMemberlistStore::new(
            kube_client,
            &config.kube_namespace,
            &config.memberlist_name,
        );
        Ok(MemberlistManager::new(
            Arc::new(node_watcher),
            Arc::new(store),
            config,
        ))
    }
}
