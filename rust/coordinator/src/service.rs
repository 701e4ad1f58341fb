use crate::compaction::CompactionRegistrar;
use crate::config::CoordinatorConfig;
use crate::coordinator::Coordinator;
use async_trait::async_trait;
use chroma_config::assignment::AssignmentPolicy;
use chroma_config::registry::Registry;
use chroma_config::Configurable;
use chroma_error::ChromaError;
use chroma_log::SqliteLog;
use chroma_memberlist::MemberlistManager;
use chroma_sqlite::db::SqliteDb;
use chroma_sysdb::{
    notifier_from_config, NotificationProcessor, NotificationStore, S3MetaStore, SqliteSysDb,
};
use std::future::Future;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// The coordinator process: the catalog facade plus its background loops.
pub struct CoordinatorService {
    coordinator: Coordinator,
    compaction_registrar: CompactionRegistrar,
    notification_processor: NotificationProcessor,
    memberlist_manager: Option<Arc<MemberlistManager>>,
}

impl CoordinatorService {
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn compaction_registrar(&self) -> &CompactionRegistrar {
        &self.compaction_registrar
    }

    /// Runs until SIGTERM or SIGINT.
    pub async fn run(self) -> Result<(), Box<dyn ChromaError>> {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(err), _) | (_, Err(err)) => {
                    tracing::error!("Failed to create signal handlers: {err}");
                    return Ok(());
                }
            };
        self.run_until(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                _ = sigint.recv() => tracing::info!("Received SIGINT"),
            }
        })
        .await
    }

    /// Runs the notification processor and, when configured, the memberlist
    /// manager until `shutdown` resolves, then stops both.
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), Box<dyn ChromaError>> {
        let cancel = CancellationToken::new();
        let processor_handle = tokio::spawn(self.notification_processor.run(cancel.clone()));

        let memberlist_handle = match &self.memberlist_manager {
            Some(manager) => {
                manager.start().await.map_err(|e| e.boxed())?;
                let manager = manager.clone();
                Some(tokio::spawn(async move { manager.run().await }))
            }
            None => None,
        };
        tracing::info!("Coordinator service running");

        shutdown.await;
        tracing::info!("Shutting down coordinator service");

        cancel.cancel();
        if let Some(manager) = &self.memberlist_manager {
            manager.stop().await;
        }
        if let Err(err) = processor_handle.await {
            tracing::error!("Notification processor task failed: {err}");
        }
        if let Some(handle) = memberlist_handle {
            if let Err(err) = handle.await {
                tracing::error!("Memberlist manager task failed: {err}");
            }
        }
        tracing::info!("Coordinator service stopped");
        Ok(())
    }
}

#[async_trait]
impl Configurable<CoordinatorConfig> for CoordinatorService {
    async fn try_from_config(
        config: &CoordinatorConfig,
        registry: &Registry,
    ) -> Result<Self, Box<dyn ChromaError>> {
        let db = SqliteDb::try_from_config(&config.sqlite, registry)
            .await
            .map_err(|e| e.boxed())?;
        let sysdb = SqliteSysDb::try_from_config(&config.sqlite, registry).await?;
        let log = SqliteLog::try_from_config(&config.log, registry).await?;
        let assignment_policy =
            AssignmentPolicy::try_from_config(&config.assignment_policy, registry).await?;

        let metastore = S3MetaStore::try_from_config(&config.storage, registry).await?;
        metastore.create_bucket().await.map_err(|e| e.boxed())?;

        let (notification_processor, notification_trigger) = NotificationProcessor::new(
            NotificationStore::new(db),
            notifier_from_config(&config.notification.notifier),
            &config.notification,
        );

        let memberlist_manager = match &config.memberlist {
            Some(memberlist_config) => Some(Arc::new(
                MemberlistManager::try_from_config(memberlist_config, registry).await?,
            )),
            None => None,
        };

        Ok(CoordinatorService {
            coordinator: Coordinator::new(
                sysdb.clone(),
                log,
                assignment_policy,
                Some(notification_trigger),
            ),
            compaction_registrar: CompactionRegistrar::new(
                sysdb,
                metastore,
                &config.compaction_retry,
            ),
            notification_processor,
            memberlist_manager,
        })
    }
}
