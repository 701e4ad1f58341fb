use chroma_config::assignment::AssignmentPolicy;
use chroma_error::ChromaError;
use chroma_log::{GetCollectionsToCompactError, PullLogsError, PurgeLogsError, PushLogsError, SqliteLog};
use chroma_sysdb::{
    GetCollectionsOptions, GetSegmentsOptions, NotificationTrigger, SqliteSysDb,
    UpdateSegmentOptions,
};
use chroma_types::{
    default_segments, Collection, CollectionAndSegments, CollectionInfo, CollectionUuid,
    CreateCollectionError, CreateDatabaseError, CreateSegmentError, CreateTenantError, Database,
    DatabaseUuid, DeleteCollectionError, DeleteDatabaseError, DeleteSegmentError,
    GetCollectionWithSegmentsError, GetCollectionsError, GetDatabaseError, GetSegmentsError,
    GetTenantError, ListDatabasesError, LogRecord, Metadata, MetadataUpdate,
    RegisterFilePathsError, ResetError, Segment, SegmentUuid, Tenant, UpdateCollectionError,
    UpdateLogPositionError, UpdateSegmentError,
};
use std::collections::HashMap;

/// Parameters of `Coordinator::create_collection`. Without a `collection_id`
/// a new one is generated; without a `topic` one is assigned by the
/// coordinator's assignment policy.
#[derive(Clone, Debug)]
pub struct CreateCollectionRequest {
    pub tenant: String,
    pub database: String,
    pub collection_id: Option<CollectionUuid>,
    pub name: String,
    pub topic: Option<String>,
    pub metadata: Option<Metadata>,
    pub dimension: Option<i32>,
    pub get_or_create: bool,
}

impl CreateCollectionRequest {
    pub fn new(
        tenant: impl Into<String>,
        database: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        CreateCollectionRequest {
            tenant: tenant.into(),
            database: database.into(),
            collection_id: None,
            name: name.into(),
            topic: None,
            metadata: None,
            dimension: None,
            get_or_create: false,
        }
    }
}

/// Entry point for catalog and log operations.
///
/// Adds what the catalog alone does not do: topic assignment for new
/// collections and waking the notification processor once a create or delete
/// committed its outbox entry.
#[derive(Clone, Debug)]
pub struct Coordinator {
    sysdb: SqliteSysDb,
    log: SqliteLog,
    assignment_policy: AssignmentPolicy,
    notification_trigger: Option<NotificationTrigger>,
}

impl Coordinator {
    pub fn new(
        sysdb: SqliteSysDb,
        log: SqliteLog,
        assignment_policy: AssignmentPolicy,
        notification_trigger: Option<NotificationTrigger>,
    ) -> Self {
        Coordinator {
            sysdb,
            log,
            assignment_policy,
            notification_trigger,
        }
    }

    pub fn sysdb(&self) -> &SqliteSysDb {
        &self.sysdb
    }

    pub fn log(&self) -> &SqliteLog {
        &self.log
    }

    fn notify(&self) {
        if let Some(trigger) = &self.notification_trigger {
            trigger.trigger();
        }
    }

    ////////////////////////// Tenants and databases ////////////////////////

    pub async fn create_tenant(&self, name: impl Into<String>) -> Result<Tenant, CreateTenantError> {
        self.sysdb.create_tenant(name.into()).await
    }

    pub async fn get_tenant(&self, name: &str) -> Result<Tenant, GetTenantError> {
        self.sysdb.get_tenant(name).await
    }

    pub async fn create_database(
        &self,
        name: &str,
        tenant: &str,
    ) -> Result<Database, CreateDatabaseError> {
        self.sysdb
            .create_database(DatabaseUuid::new(), name, tenant)
            .await
    }

    pub async fn get_database(&self, name: &str, tenant: &str) -> Result<Database, GetDatabaseError> {
        self.sysdb.get_database(name, tenant).await
    }

    pub async fn list_databases(
        &self,
        tenant: &str,
        limit: Option<u32>,
        offset: u32,
    ) -> Result<Vec<Database>, ListDatabasesError> {
        self.sysdb.list_databases(tenant, limit, offset).await
    }

    /// Deletes the database together with its collections.
    pub async fn delete_database(&self, name: &str, tenant: &str) -> Result<(), DeleteDatabaseError> {
        self.sysdb.delete_database(name, tenant).await?;
        self.notify();
        Ok(())
    }

    ////////////////////////// Collections ////////////////////////

    #[tracing::instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_collection(
        &self,
        request: CreateCollectionRequest,
    ) -> Result<Collection, CreateCollectionError> {
        let collection_id = request.collection_id.unwrap_or_else(CollectionUuid::new);
        let topic = match request.topic {
            Some(topic) => topic,
            None => self
                .assignment_policy
                .assign_collection(&collection_id.to_string())
                .map_err(|e| CreateCollectionError::Assignment(e.boxed()))?,
        };

        let collection = self
            .sysdb
            .create_collection(
                request.tenant,
                request.database,
                collection_id,
                request.name,
                topic,
                default_segments(collection_id),
                request.metadata,
                request.dimension,
                request.get_or_create,
            )
            .await?;
        self.notify();
        Ok(collection)
    }

    pub async fn get_collections(
        &self,
        options: GetCollectionsOptions,
    ) -> Result<Vec<Collection>, GetCollectionsError> {
        self.sysdb.get_collections(options).await
    }

    pub async fn get_collection_with_segments(
        &self,
        collection_id: CollectionUuid,
    ) -> Result<CollectionAndSegments, GetCollectionWithSegmentsError> {
        self.sysdb.get_collection_with_segments(collection_id).await
    }

    pub async fn update_collection(
        &self,
        collection_id: CollectionUuid,
        name: Option<String>,
        topic: Option<String>,
        dimension: Option<i32>,
        metadata: Option<MetadataUpdate>,
    ) -> Result<(), UpdateCollectionError> {
        self.sysdb
            .update_collection(collection_id, name, topic, dimension, metadata)
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_collection(
        &self,
        tenant: &str,
        database: &str,
        collection_id: CollectionUuid,
    ) -> Result<(), DeleteCollectionError> {
        self.sysdb
            .delete_collection(tenant, database, collection_id)
            .await?;
        self.notify();
        Ok(())
    }

    pub async fn update_log_position_and_version(
        &self,
        collection_id: CollectionUuid,
        new_log_position: i64,
        expected_version: i32,
    ) -> Result<i32, UpdateLogPositionError> {
        self.sysdb
            .update_log_position_and_version(collection_id, new_log_position, expected_version)
            .await
    }

    ////////////////////////// Segments ////////////////////////

    pub async fn create_segment(&self, segment: Segment) -> Result<(), CreateSegmentError> {
        self.sysdb.create_segment(segment).await
    }

    pub async fn get_segments(
        &self,
        options: GetSegmentsOptions,
    ) -> Result<Vec<Segment>, GetSegmentsError> {
        self.sysdb.get_segments(options).await
    }

    pub async fn update_segment(
        &self,
        segment_id: SegmentUuid,
        options: UpdateSegmentOptions,
    ) -> Result<(), UpdateSegmentError> {
        self.sysdb.update_segment(segment_id, options).await
    }

    pub async fn delete_segment(&self, segment_id: SegmentUuid) -> Result<(), DeleteSegmentError> {
        self.sysdb.delete_segment(segment_id).await
    }

    pub async fn register_file_paths(
        &self,
        segment_id: SegmentUuid,
        file_paths: HashMap<String, Vec<String>>,
    ) -> Result<(), RegisterFilePathsError> {
        self.sysdb.register_file_paths(segment_id, file_paths).await
    }

    ////////////////////////// Record log ////////////////////////

    pub async fn push_logs(
        &self,
        collection_id: CollectionUuid,
        records: Vec<Vec<u8>>,
    ) -> Result<usize, PushLogsError> {
        self.log.push_logs(collection_id, records).await
    }

    pub async fn pull_logs(
        &self,
        collection_id: CollectionUuid,
        from_offset: i64,
        batch_size: u32,
        end_timestamp_ns: Option<i64>,
    ) -> Result<Vec<LogRecord>, PullLogsError> {
        self.log
            .pull_logs(collection_id, from_offset, batch_size, end_timestamp_ns)
            .await
    }

    pub async fn get_all_collections_to_compact(
        &self,
    ) -> Result<Vec<CollectionInfo>, GetCollectionsToCompactError> {
        self.log.get_all_collections_to_compact().await
    }

    pub async fn purge_logs(&self, collection_id: CollectionUuid) -> Result<u64, PurgeLogsError> {
        self.log.purge_logs(collection_id).await
    }

    /// Wipes the catalog, the record log and the outbox, then re-seeds the
    /// default tenant and database.
    pub async fn reset(&self) -> Result<(), ResetError> {
        self.sysdb.reset().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chroma_config::assignment::RendezvousHashingAssignmentPolicy;
    use chroma_config::assignment::SimpleAssignmentPolicy;
    use chroma_error::ErrorCodes;
    use chroma_sqlite::db::test_utils::get_new_sqlite_db;
    use chroma_sysdb::{
        InMemoryNotifier, NotificationProcessor, NotificationProcessorConfig, NotificationStore,
    };
    use chroma_types::{NotificationType, DEFAULT_DATABASE, DEFAULT_TENANT};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    async fn coordinator(policy: AssignmentPolicy) -> Coordinator {
        let db = get_new_sqlite_db().await;
        Coordinator::new(
            SqliteSysDb::new(db.clone()),
            SqliteLog::new(db, 100),
            policy,
            None,
        )
    }

    fn simple_policy() -> AssignmentPolicy {
        AssignmentPolicy::Simple(SimpleAssignmentPolicy::new("default", "default"))
    }

    #[tokio::test]
    async fn test_create_collection_assigns_topic() {
        let coordinator = coordinator(simple_policy()).await;
        let collection = coordinator
            .create_collection(CreateCollectionRequest::new(
                DEFAULT_TENANT,
                DEFAULT_DATABASE,
                "assigned",
            ))
            .await
            .unwrap();
        assert_eq!(
            collection.topic,
            format!("persistent://default/default/{}", collection.collection_id)
        );

        let segments = coordinator
            .get_segments(GetSegmentsOptions {
                collection: Some(collection.collection_id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(segments.len(), 2);
    }

    #[tokio::test]
    async fn test_create_collection_keeps_given_topic_and_id() {
        let coordinator = coordinator(simple_policy()).await;
        let collection_id = CollectionUuid::new();
        let collection = coordinator
            .create_collection(CreateCollectionRequest {
                collection_id: Some(collection_id),
                topic: Some("my_topic".to_string()),
                ..CreateCollectionRequest::new(DEFAULT_TENANT, DEFAULT_DATABASE, "explicit")
            })
            .await
            .unwrap();
        assert_eq!(collection.collection_id, collection_id);
        assert_eq!(collection.topic, "my_topic");
    }

    #[tokio::test]
    async fn test_rendezvous_assignment_is_stable() {
        let shards = vec!["log_0".to_string(), "log_1".to_string(), "log_2".to_string()];
        let policy = AssignmentPolicy::RendezvousHashing(RendezvousHashingAssignmentPolicy::new(
            shards.clone(),
        ));
        let coordinator = coordinator(policy.clone()).await;
        let collection = coordinator
            .create_collection(CreateCollectionRequest::new(
                DEFAULT_TENANT,
                DEFAULT_DATABASE,
                "sharded",
            ))
            .await
            .unwrap();
        assert!(shards.contains(&collection.topic));
        assert_eq!(
            policy
                .assign_collection(&collection.collection_id.to_string())
                .unwrap(),
            collection.topic
        );
    }

    #[tokio::test]
    async fn test_create_collection_in_missing_database() {
        let coordinator = coordinator(simple_policy()).await;
        let err = coordinator
            .create_collection(CreateCollectionRequest::new(DEFAULT_TENANT, "nope", "c"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCodes::NotFound);
    }

    #[tokio::test]
    async fn test_mutations_wake_notification_processor() {
        let db = get_new_sqlite_db().await;
        let notifier = InMemoryNotifier::new();
        let (processor, trigger) = NotificationProcessor::new(
            NotificationStore::new(db.clone()),
            Arc::new(notifier.clone()),
            &NotificationProcessorConfig {
                // Only the trigger can wake the processor after its first pass
                poll_interval_ms: 3_600_000,
                ..Default::default()
            },
        );
        let coordinator = Coordinator::new(
            SqliteSysDb::new(db.clone()),
            SqliteLog::new(db, 100),
            simple_policy(),
            Some(trigger),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(processor.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let collection = coordinator
            .create_collection(CreateCollectionRequest::new(
                DEFAULT_TENANT,
                DEFAULT_DATABASE,
                "notified",
            ))
            .await
            .unwrap();
        coordinator
            .delete_collection(DEFAULT_TENANT, DEFAULT_DATABASE, collection.collection_id)
            .await
            .unwrap();

        let mut published = Vec::new();
        for _ in 0..100 {
            published = notifier.notifications();
            if published.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let types: Vec<_> = published.iter().map(|n| n.r#type).collect();
        assert_eq!(
            types,
            vec![
                NotificationType::CreateCollection,
                NotificationType::DeleteCollection
            ]
        );
        assert!(published
            .iter()
            .all(|n| n.collection_id == collection.collection_id));

        cancel.cancel();
        handle.await.unwrap();
    }
}
