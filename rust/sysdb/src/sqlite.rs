use crate::notification::insert_notification;
use crate::{GetCollectionsOptions, GetSegmentsOptions, UpdateSegmentOptions};
use async_trait::async_trait;
use chroma_config::registry::{Injectable, Registry};
use chroma_config::Configurable;
use chroma_error::{ChromaError, WrappedSqlxError};
use chroma_sqlite::config::SqliteDBConfig;
use chroma_sqlite::db::SqliteDb;
use chroma_sqlite::helpers::{delete_metadata, metadata_from_rows, update_metadata};
use chroma_sqlite::table;
use chroma_types::{
    Collection, CollectionAndSegments, CollectionUuid, CreateCollectionError,
    CreateDatabaseError, CreateSegmentError, CreateTenantError, Database, DatabaseUuid,
    DeleteCollectionError, DeleteDatabaseError, DeleteSegmentError, FlushCompactionError,
    FlushCompactionResponse, GetCollectionWithSegmentsError, GetCollectionsError,
    GetDatabaseError, GetSegmentsError, GetTenantError, ListDatabasesError, Metadata,
    MetadataUpdate, NotificationType, RegisterFilePathsError, ResetError, Segment,
    SegmentConversionError, SegmentFlushInfo, SegmentScope, SegmentType, SegmentUuid,
    SetLastCompactionTimeError, Tenant, TenantLastCompactionTime, UpdateCollectionError,
    UpdateLogPositionError, UpdateSegmentError,
};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sea_query_binder::SqlxBinder;
use sqlx::error::ErrorKind;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;

//////////////////////// SqliteSysDb ////////////////////////

/// The metadata catalog: tenants, databases, collections and segments, stored
/// in the coordinator's SQLite database.
/// ## Notes
/// - Clones share the underlying pool, so a `SqliteSysDb` may be cloned into
///   every task that needs it.
/// - Read-check-write operations run in `BEGIN IMMEDIATE` transactions, which
///   hold the database write lock from their first statement.
#[derive(Debug, Clone)]
pub struct SqliteSysDb {
    db: SqliteDb,
}

impl Injectable for SqliteSysDb {}

fn unix_secs() -> i64 {
    Utc::now().timestamp()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.kind() == ErrorKind::UniqueViolation)
}

impl SqliteSysDb {
    pub fn new(db: SqliteDb) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &SqliteDb {
        &self.db
    }

    ////////////////////////// Tenant Methods ////////////////////////

    #[tracing::instrument(skip(self))]
    pub async fn create_tenant(&self, name: String) -> Result<Tenant, CreateTenantError> {
        let ts = unix_secs();
        sqlx::query("INSERT INTO tenants (id, ts, last_compaction_time) VALUES ($1, $2, 0)")
            .bind(&name)
            .bind(ts)
            .execute(self.db.get_conn())
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    CreateTenantError::AlreadyExists(name.clone())
                } else {
                    CreateTenantError::Internal(e.into())
                }
            })?;

        Ok(Tenant {
            name,
            ts,
            last_compaction_time: 0,
        })
    }

    pub async fn get_tenant(&self, name: &str) -> Result<Tenant, GetTenantError> {
        sqlx::query("SELECT id, ts, last_compaction_time FROM tenants WHERE id = $1")
            .bind(name)
            .fetch_one(self.db.get_conn())
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => GetTenantError::NotFound(name.to_string()),
                _ => GetTenantError::Internal(e.into()),
            })
            .map(|row| Tenant {
                name: row.get(0),
                ts: row.get(1),
                last_compaction_time: row.get(2),
            })
    }

    /// Tenants that do not exist are left out of the result.
    pub async fn get_last_compaction_time_for_tenants(
        &self,
        tenants: Vec<String>,
    ) -> Result<Vec<TenantLastCompactionTime>, GetTenantError> {
        let (sql, values) = sea_query::Query::select()
            .from(table::Tenants::Table)
            .columns([table::Tenants::Id, table::Tenants::LastCompactionTime])
            .and_where(sea_query::Expr::col(table::Tenants::Id).is_in(tenants))
            .order_by(table::Tenants::Id, sea_query::Order::Asc)
            .build_sqlx(sea_query::SqliteQueryBuilder);

        let rows = sqlx::query_with(&sql, values)
            .fetch_all(self.db.get_conn())
            .await
            .map_err(|e| GetTenantError::Internal(e.into()))?;

        Ok(rows
            .into_iter()
            .map(|row| TenantLastCompactionTime {
                tenant: row.get(0),
                last_compaction_time: row.get(1),
            })
            .collect())
    }

    pub async fn set_last_compaction_time_for_tenant(
        &self,
        tenant: &str,
        last_compaction_time: i64,
    ) -> Result<(), SetLastCompactionTimeError> {
        let result = sqlx::query("UPDATE tenants SET last_compaction_time = $1 WHERE id = $2")
            .bind(last_compaction_time)
            .bind(tenant)
            .execute(self.db.get_conn())
            .await
            .map_err(|e| SetLastCompactionTimeError::Internal(e.into()))?;
        if result.rows_affected() == 0 {
            return Err(SetLastCompactionTimeError::TenantNotFound(
                tenant.to_string(),
            ));
        }
        Ok(())
    }

    ////////////////////////// Database Methods ////////////////////////

    #[tracing::instrument(skip(self))]
    pub async fn create_database(
        &self,
        id: DatabaseUuid,
        name: &str,
        tenant: &str,
    ) -> Result<Database, CreateDatabaseError> {
        let mut tx = self
            .db
            .get_conn()
            .begin()
            .await
            .map_err(|e| CreateDatabaseError::Internal(e.into()))?;

        let tenant_exists = sqlx::query("SELECT 1 FROM tenants WHERE id = $1")
            .bind(tenant)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| CreateDatabaseError::Internal(e.into()))?
            .is_some();
        if !tenant_exists {
            return Err(CreateDatabaseError::TenantNotFound(tenant.to_string()));
        }

        let ts = unix_secs();
        sqlx::query("INSERT INTO databases (id, name, tenant_id, ts) VALUES ($1, $2, $3, $4)")
            .bind(id.to_string())
            .bind(name)
            .bind(tenant)
            .bind(ts)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    CreateDatabaseError::AlreadyExists(name.to_string())
                } else {
                    CreateDatabaseError::Internal(e.into())
                }
            })?;

        tx.commit()
            .await
            .map_err(|e| CreateDatabaseError::Internal(e.into()))?;

        Ok(Database {
            id,
            name: name.to_string(),
            tenant: tenant.to_string(),
            ts,
        })
    }

    pub async fn get_database(
        &self,
        name: &str,
        tenant: &str,
    ) -> Result<Database, GetDatabaseError> {
        let row = sqlx::query(
            "SELECT id, name, tenant_id, ts FROM databases WHERE name = $1 AND tenant_id = $2",
        )
        .bind(name)
        .bind(tenant)
        .fetch_one(self.db.get_conn())
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => GetDatabaseError::NotFound(name.to_string()),
            _ => GetDatabaseError::Internal(e.into()),
        })?;

        Ok(Database {
            id: DatabaseUuid::from_str(row.get::<&str, _>(0))?,
            name: row.get(1),
            tenant: row.get(2),
            ts: row.get(3),
        })
    }

    pub async fn list_databases(
        &self,
        tenant: &str,
        limit: Option<u32>,
        offset: u32,
    ) -> Result<Vec<Database>, ListDatabasesError> {
        let mut rows = sqlx::query(
            r#"
                SELECT id, name, tenant_id, ts
                FROM databases
                WHERE tenant_id = $1
                ORDER BY name
                LIMIT $2 OFFSET $3
            "#,
        )
        .bind(tenant)
        .bind(limit.unwrap_or(u32::MAX))
        .bind(offset)
        .fetch(self.db.get_conn());

        let mut databases = Vec::new();
        while let Some(row) = rows
            .try_next()
            .await
            .map_err(|e| ListDatabasesError::Internal(e.into()))?
        {
            databases.push(Database {
                id: DatabaseUuid::from_str(row.get::<&str, _>(0))?,
                name: row.get(1),
                tenant: row.get(2),
                ts: row.get(3),
            });
        }

        Ok(databases)
    }

    /// Deletes the database together with all of its collections. A delete
    /// notification is recorded for every removed collection.
    #[tracing::instrument(skip(self))]
    pub async fn delete_database(
        &self,
        name: &str,
        tenant: &str,
    ) -> Result<(), DeleteDatabaseError> {
        let mut tx = self
            .db
            .get_conn()
            .begin()
            .await
            .map_err(|e| DeleteDatabaseError::Internal(e.into()))?;
        self.db
            .begin_immediate(&mut *tx)
            .await
            .map_err(|e| DeleteDatabaseError::Internal(e.into()))?;

        let collections = Self::get_collections_with_conn(
            &mut *tx,
            GetCollectionsOptions {
                tenant: Some(tenant.to_string()),
                database: Some(name.to_string()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| e.boxed())?;

        for collection in collections {
            Self::delete_collection_with_conn(&mut *tx, tenant, name, collection.collection_id)
                .await
                .map_err(|e| e.boxed())?;
        }

        let result = sqlx::query("DELETE FROM databases WHERE name = $1 AND tenant_id = $2")
            .bind(name)
            .bind(tenant)
            .execute(&mut *tx)
            .await
            .map_err(|e| DeleteDatabaseError::Internal(e.into()))?;
        if result.rows_affected() == 0 {
            return Err(DeleteDatabaseError::NotFound(name.to_string()));
        }

        tx.commit()
            .await
            .map_err(|e| DeleteDatabaseError::Internal(e.into()))?;
        Ok(())
    }

    ////////////////////////// Collection Methods ////////////////////////

    /// Creates the collection with its segments and records a create
    /// notification in the same transaction. With `get_or_create`, an existing
    /// collection of the same name is returned unchanged instead.
    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(skip(self, segments, metadata))]
    pub async fn create_collection(
        &self,
        tenant: String,
        database: String,
        collection_id: CollectionUuid,
        name: String,
        topic: String,
        segments: Vec<Segment>,
        metadata: Option<Metadata>,
        dimension: Option<i32>,
        get_or_create: bool,
    ) -> Result<Collection, CreateCollectionError> {
        let mut tx = self
            .db
            .get_conn()
            .begin()
            .await
            .map_err(|e| CreateCollectionError::Internal(e.into()))?;
        self.db
            .begin_immediate(&mut *tx)
            .await
            .map_err(|e| CreateCollectionError::Internal(e.into()))?;

        let database_id: String =
            sqlx::query("SELECT id FROM databases WHERE name = $1 AND tenant_id = $2")
                .bind(&database)
                .bind(&tenant)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| match e {
                    sqlx::Error::RowNotFound => CreateCollectionError::DatabaseNotFound {
                        tenant: tenant.clone(),
                        database: database.clone(),
                    },
                    _ => CreateCollectionError::Internal(e.into()),
                })?
                .get(0);

        let mut existing_collections = Self::get_collections_with_conn(
            &mut *tx,
            GetCollectionsOptions {
                name: Some(name.clone()),
                tenant: Some(tenant.clone()),
                database: Some(database.clone()),
                ..Default::default()
            },
        )
        .await?;

        if let Some(collection) = existing_collections.pop() {
            if get_or_create {
                tracing::debug!(collection_id = %collection.collection_id, "Returning existing collection");
                return Ok(collection);
            } else {
                return Err(CreateCollectionError::AlreadyExists(name));
            }
        }

        let created_at = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO collections
                (id, name, topic, dimension, database_id, log_position, version, created_at)
            VALUES ($1, $2, $3, $4, $5, 0, 0, $6)
            "#,
        )
        .bind(collection_id.to_string())
        .bind(&name)
        .bind(&topic)
        .bind(dimension)
        .bind(&database_id)
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                CreateCollectionError::AlreadyExists(name.clone())
            } else {
                CreateCollectionError::Internal(e.into())
            }
        })?;

        let metadata = metadata.filter(|metadata| !metadata.is_empty());
        if let Some(metadata) = metadata.clone() {
            update_metadata::<table::CollectionMetadata, _, _>(
                &mut *tx,
                collection_id.to_string(),
                metadata.into_iter().map(|(k, v)| (k, v.into())).collect(),
            )
            .await
            .map_err(|e| e.boxed())?;
        }

        for segment in segments {
            Self::create_segment_with_conn(&mut *tx, segment)
                .await
                .map_err(|e| CreateCollectionError::Internal(e.boxed()))?;
        }

        insert_notification(&mut *tx, collection_id, NotificationType::CreateCollection)
            .await
            .map_err(|e| e.boxed())?;

        tx.commit()
            .await
            .map_err(|e| CreateCollectionError::Internal(e.into()))?;

        Ok(Collection {
            collection_id,
            name,
            topic,
            dimension,
            metadata,
            tenant,
            database,
            log_position: 0,
            version: 0,
            version_file_name: None,
            created_at,
        })
    }

    pub async fn get_collections(
        &self,
        options: GetCollectionsOptions,
    ) -> Result<Vec<Collection>, GetCollectionsError> {
        Self::get_collections_with_conn(self.db.get_conn(), options).await
    }

    /// Applies the given changes. Renaming onto a name already used in the
    /// same database fails with `AlreadyExists`.
    #[tracing::instrument(skip(self, metadata))]
    pub async fn update_collection(
        &self,
        collection_id: CollectionUuid,
        name: Option<String>,
        topic: Option<String>,
        dimension: Option<i32>,
        metadata: Option<MetadataUpdate>,
    ) -> Result<(), UpdateCollectionError> {
        let mut tx = self
            .db
            .get_conn()
            .begin()
            .await
            .map_err(|e| UpdateCollectionError::Internal(e.into()))?;
        self.db
            .begin_immediate(&mut *tx)
            .await
            .map_err(|e| UpdateCollectionError::Internal(e.into()))?;

        let exists = sqlx::query("SELECT 1 FROM collections WHERE id = $1")
            .bind(collection_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| UpdateCollectionError::Internal(e.into()))?
            .is_some();
        if !exists {
            return Err(UpdateCollectionError::NotFound(collection_id.to_string()));
        }

        if name.is_some() || topic.is_some() || dimension.is_some() {
            let mut query = sea_query::Query::update();
            query.table(table::Collections::Table).and_where(
                sea_query::Expr::col((table::Collections::Table, table::Collections::Id))
                    .eq(collection_id.to_string()),
            );
            if let Some(name) = &name {
                query.value(table::Collections::Name, name.clone());
            }
            if let Some(topic) = topic {
                query.value(table::Collections::Topic, topic);
            }
            if let Some(dimension) = dimension {
                query.value(table::Collections::Dimension, dimension);
            }
            let (sql, values) = query.build_sqlx(sea_query::SqliteQueryBuilder);

            sqlx::query_with(&sql, values)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        UpdateCollectionError::AlreadyExists(name.clone().unwrap_or_default())
                    } else {
                        UpdateCollectionError::Internal(e.into())
                    }
                })?;
        }

        if let Some(update) = metadata {
            let changes = match update {
                MetadataUpdate::Patch(changes) => changes,
                MetadataUpdate::Reset(changes) => {
                    delete_metadata::<table::CollectionMetadata, _, _>(
                        &mut *tx,
                        collection_id.to_string(),
                    )
                    .await
                    .map_err(|e| e.boxed())?;
                    changes
                }
            };
            if !changes.is_empty() {
                update_metadata::<table::CollectionMetadata, _, _>(
                    &mut *tx,
                    collection_id.to_string(),
                    changes,
                )
                .await
                .map_err(|e| e.boxed())?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| UpdateCollectionError::Internal(e.into()))?;

        Ok(())
    }

    /// Removes the collection, its metadata, segments and record log, and
    /// records a delete notification. Deleting twice fails with `NotFound`.
    #[tracing::instrument(skip(self))]
    pub async fn delete_collection(
        &self,
        tenant: &str,
        database: &str,
        collection_id: CollectionUuid,
    ) -> Result<(), DeleteCollectionError> {
        let mut tx = self
            .db
            .get_conn()
            .begin()
            .await
            .map_err(|e| DeleteCollectionError::Internal(e.into()))?;
        self.db
            .begin_immediate(&mut *tx)
            .await
            .map_err(|e| DeleteCollectionError::Internal(e.into()))?;

        let was_found =
            Self::delete_collection_with_conn(&mut *tx, tenant, database, collection_id)
                .await
                .map_err(|e| e.boxed())?;
        if !was_found {
            return Err(DeleteCollectionError::NotFound(collection_id.to_string()));
        }

        tx.commit()
            .await
            .map_err(|e| DeleteCollectionError::Internal(e.into()))?;

        Ok(())
    }

    pub async fn get_collection_with_segments(
        &self,
        collection_id: CollectionUuid,
    ) -> Result<CollectionAndSegments, GetCollectionWithSegmentsError> {
        let mut collections = self
            .get_collections(GetCollectionsOptions {
                collection_id: Some(collection_id),
                ..Default::default()
            })
            .await?;
        let collection = collections
            .pop()
            .ok_or(GetCollectionWithSegmentsError::NotFound(collection_id))?;

        let segments = self
            .get_segments(GetSegmentsOptions {
                collection: Some(collection_id),
                ..Default::default()
            })
            .await?;

        Ok(CollectionAndSegments {
            collection,
            segments,
        })
    }

    ////////////////////////// Compaction Methods ////////////////////////

    /// Compare-and-swap of the collection's compaction state. Succeeds only
    /// when the stored version equals `expected_version` and the stored log
    /// position does not exceed `new_log_position`; the version then moves to
    /// `expected_version + 1`, which is returned.
    #[tracing::instrument(skip(self))]
    pub async fn update_log_position_and_version(
        &self,
        collection_id: CollectionUuid,
        new_log_position: i64,
        expected_version: i32,
    ) -> Result<i32, UpdateLogPositionError> {
        let mut tx = self
            .db
            .get_conn()
            .begin()
            .await
            .map_err(|e| UpdateLogPositionError::Internal(e.into()))?;
        self.db
            .begin_immediate(&mut *tx)
            .await
            .map_err(|e| UpdateLogPositionError::Internal(e.into()))?;

        let version = Self::update_log_position_and_version_with_conn(
            &mut *tx,
            collection_id,
            new_log_position,
            expected_version,
        )
        .await?;

        tx.commit()
            .await
            .map_err(|e| UpdateLogPositionError::Internal(e.into()))?;
        Ok(version)
    }

    /// Commits a compaction result in one transaction: the log position and
    /// version compare-and-swap, the file paths of every flushed segment, the
    /// collection's current version file and the tenant's last compaction time.
    #[tracing::instrument(skip(self, segment_flush_info))]
    pub async fn flush_collection_compaction(
        &self,
        collection_id: CollectionUuid,
        new_log_position: i64,
        expected_version: i32,
        segment_flush_info: Vec<SegmentFlushInfo>,
        version_file_name: Option<String>,
    ) -> Result<FlushCompactionResponse, FlushCompactionError> {
        let mut tx = self
            .db
            .get_conn()
            .begin()
            .await
            .map_err(|e| FlushCompactionError::Internal(e.into()))?;
        self.db
            .begin_immediate(&mut *tx)
            .await
            .map_err(|e| FlushCompactionError::Internal(e.into()))?;

        let collection_version = Self::update_log_position_and_version_with_conn(
            &mut *tx,
            collection_id,
            new_log_position,
            expected_version,
        )
        .await?;

        for info in segment_flush_info {
            Self::register_file_paths_with_conn(&mut *tx, info.segment_id, &info.file_paths)
                .await
                .map_err(|e| match e {
                    RegisterFilePathsError::NotFound(id) => {
                        FlushCompactionError::SegmentNotFound(id)
                    }
                    RegisterFilePathsError::Internal(e) => FlushCompactionError::Internal(e),
                })?;
        }

        if let Some(version_file_name) = version_file_name {
            sqlx::query("UPDATE collections SET version_file_name = $1 WHERE id = $2")
                .bind(version_file_name)
                .bind(collection_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| FlushCompactionError::Internal(e.into()))?;
        }

        let last_compaction_time = unix_secs();
        sqlx::query(
            r#"
            UPDATE tenants SET last_compaction_time = $1
            WHERE id = (
                SELECT databases.tenant_id
                FROM collections
                INNER JOIN databases ON databases.id = collections.database_id
                WHERE collections.id = $2
            )
            "#,
        )
        .bind(last_compaction_time)
        .bind(collection_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| FlushCompactionError::Internal(e.into()))?;

        tx.commit()
            .await
            .map_err(|e| FlushCompactionError::Internal(e.into()))?;

        tracing::info!(
            %collection_id,
            collection_version,
            new_log_position,
            "Flushed collection compaction"
        );
        Ok(FlushCompactionResponse {
            collection_id,
            collection_version,
            last_compaction_time,
        })
    }

    ////////////////////////// Segment Methods ////////////////////////

    pub async fn create_segment(&self, segment: Segment) -> Result<(), CreateSegmentError> {
        let mut tx = self
            .db
            .get_conn()
            .begin()
            .await
            .map_err(|e| CreateSegmentError::Internal(e.into()))?;
        Self::create_segment_with_conn(&mut *tx, segment).await?;
        tx.commit()
            .await
            .map_err(|e| CreateSegmentError::Internal(e.into()))?;
        Ok(())
    }

    pub async fn get_segments(
        &self,
        options: GetSegmentsOptions,
    ) -> Result<Vec<Segment>, GetSegmentsError> {
        Self::get_segments_with_conn(self.db.get_conn(), options).await
    }

    pub async fn update_segment(
        &self,
        segment_id: SegmentUuid,
        options: UpdateSegmentOptions,
    ) -> Result<(), UpdateSegmentError> {
        let mut tx = self
            .db
            .get_conn()
            .begin()
            .await
            .map_err(|e| UpdateSegmentError::Internal(e.into()))?;

        let exists = sqlx::query("SELECT 1 FROM segments WHERE id = $1")
            .bind(segment_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| UpdateSegmentError::Internal(e.into()))?
            .is_some();
        if !exists {
            return Err(UpdateSegmentError::NotFound(segment_id));
        }
        if options.is_empty() {
            return Ok(());
        }

        if options.topic.is_some() || options.collection.is_some() {
            let mut query = sea_query::Query::update();
            query.table(table::Segments::Table).and_where(
                sea_query::Expr::col((table::Segments::Table, table::Segments::Id))
                    .eq(segment_id.to_string()),
            );
            if let Some(topic) = options.topic {
                query.value(table::Segments::Topic, topic);
            }
            if let Some(collection) = options.collection {
                query.value(
                    table::Segments::Collection,
                    collection.map(|collection| collection.to_string()),
                );
            }
            let (sql, values) = query.build_sqlx(sea_query::SqliteQueryBuilder);
            sqlx::query_with(&sql, values)
                .execute(&mut *tx)
                .await
                .map_err(|e| UpdateSegmentError::Internal(e.into()))?;
        }

        if let Some(update) = options.metadata {
            let changes = match update {
                MetadataUpdate::Patch(changes) => changes,
                MetadataUpdate::Reset(changes) => {
                    delete_metadata::<table::SegmentMetadata, _, _>(
                        &mut *tx,
                        segment_id.to_string(),
                    )
                    .await
                    .map_err(|e| e.boxed())?;
                    changes
                }
            };
            if !changes.is_empty() {
                update_metadata::<table::SegmentMetadata, _, _>(
                    &mut *tx,
                    segment_id.to_string(),
                    changes,
                )
                .await
                .map_err(|e| e.boxed())?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| UpdateSegmentError::Internal(e.into()))?;
        Ok(())
    }

    pub async fn delete_segment(&self, segment_id: SegmentUuid) -> Result<(), DeleteSegmentError> {
        let mut tx = self
            .db
            .get_conn()
            .begin()
            .await
            .map_err(|e| DeleteSegmentError::Internal(e.into()))?;

        sqlx::query("DELETE FROM segment_metadata WHERE segment_id = $1")
            .bind(segment_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| DeleteSegmentError::Internal(e.into()))?;
        let result = sqlx::query("DELETE FROM segments WHERE id = $1")
            .bind(segment_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| DeleteSegmentError::Internal(e.into()))?;
        if result.rows_affected() == 0 {
            return Err(DeleteSegmentError::NotFound(segment_id));
        }

        tx.commit()
            .await
            .map_err(|e| DeleteSegmentError::Internal(e.into()))?;
        Ok(())
    }

    /// Replaces the segment's file paths with `file_paths`.
    #[tracing::instrument(skip(self, file_paths))]
    pub async fn register_file_paths(
        &self,
        segment_id: SegmentUuid,
        file_paths: HashMap<String, Vec<String>>,
    ) -> Result<(), RegisterFilePathsError> {
        let mut tx = self
            .db
            .get_conn()
            .begin()
            .await
            .map_err(|e| RegisterFilePathsError::Internal(e.into()))?;
        Self::register_file_paths_with_conn(&mut *tx, segment_id, &file_paths).await?;
        tx.commit()
            .await
            .map_err(|e| RegisterFilePathsError::Internal(e.into()))?;
        Ok(())
    }

    pub async fn reset(&self) -> Result<(), ResetError> {
        self.db.reset().await.map_err(|e| e.boxed())?;
        Ok(())
    }

    ////////////////////////// Connection-scoped helpers ////////////////////////

    async fn get_collections_with_conn<'a, C>(
        conn: C,
        options: GetCollectionsOptions,
    ) -> Result<Vec<Collection>, GetCollectionsError>
    where
        C: sqlx::Executor<'a, Database = sqlx::Sqlite>,
    {
        let GetCollectionsOptions {
            collection_id,
            name,
            topic,
            tenant,
            database,
            limit,
            offset,
        } = options;

        let mut collections_query = sea_query::Query::select();
        let collections_query = collections_query
            .from(table::Collections::Table)
            .column((table::Collections::Table, table::Collections::Id))
            .column((table::Collections::Table, table::Collections::Name))
            .column((table::Collections::Table, table::Collections::Topic))
            .column((table::Collections::Table, table::Collections::Dimension))
            .column((table::Collections::Table, table::Collections::DatabaseId))
            .column((table::Collections::Table, table::Collections::LogPosition))
            .column((table::Collections::Table, table::Collections::Version))
            .column((table::Collections::Table, table::Collections::VersionFileName))
            .column((table::Collections::Table, table::Collections::CreatedAt))
            .inner_join(
                table::Databases::Table,
                sea_query::Expr::col((table::Databases::Table, table::Databases::Id))
                    .equals((table::Collections::Table, table::Collections::DatabaseId)),
            )
            .cond_where(
                sea_query::Cond::all()
                    .add_option(collection_id.map(|collection_id| {
                        sea_query::Expr::col((table::Collections::Table, table::Collections::Id))
                            .eq(collection_id.to_string())
                    }))
                    .add_option(name.map(|name| {
                        sea_query::Expr::col((table::Collections::Table, table::Collections::Name))
                            .eq(name)
                    }))
                    .add_option(topic.map(|topic| {
                        sea_query::Expr::col((table::Collections::Table, table::Collections::Topic))
                            .eq(topic)
                    }))
                    .add_option(database.map(|database| {
                        sea_query::Expr::col((table::Databases::Table, table::Databases::Name))
                            .eq(database)
                    }))
                    .add_option(tenant.map(|tenant| {
                        sea_query::Expr::col((table::Databases::Table, table::Databases::TenantId))
                            .eq(tenant)
                    })),
            )
            .order_by(
                (table::Collections::Table, table::Collections::Id),
                sea_query::Order::Asc,
            )
            // SQLite requires a limit whenever an offset is given
            .limit(limit.unwrap_or(u32::MAX).into())
            .offset(offset.into());

        let (sql, values) = sea_query::Query::select()
            .from_subquery(collections_query.take(), table::Collections::Table)
            .left_join(
                table::CollectionMetadata::Table,
                sea_query::Expr::col((
                    table::CollectionMetadata::Table,
                    table::CollectionMetadata::CollectionId,
                ))
                .equals((table::Collections::Table, table::Collections::Id)),
            )
            .inner_join(
                table::Databases::Table,
                sea_query::Expr::col((table::Databases::Table, table::Databases::Id))
                    .equals((table::Collections::Table, table::Collections::DatabaseId)),
            )
            .column((table::Collections::Table, table::Collections::Id))
            .column((table::Collections::Table, table::Collections::Name))
            .column((table::Collections::Table, table::Collections::Topic))
            .column((table::Collections::Table, table::Collections::Dimension))
            .column((table::Databases::Table, table::Databases::TenantId))
            .column((table::Databases::Table, table::Databases::Name))
            .column((table::Collections::Table, table::Collections::LogPosition))
            .column((table::Collections::Table, table::Collections::Version))
            .column((table::Collections::Table, table::Collections::VersionFileName))
            .column((table::Collections::Table, table::Collections::CreatedAt))
            .columns([
                table::CollectionMetadata::Key,
                table::CollectionMetadata::StrValue,
                table::CollectionMetadata::IntValue,
                table::CollectionMetadata::FloatValue,
            ])
            .build_sqlx(sea_query::SqliteQueryBuilder);

        let mut rows = sqlx::query_with(&sql, values).fetch(conn);
        let mut rows_by_collection_id: HashMap<CollectionUuid, Vec<SqliteRow>> = HashMap::new();

        while let Some(row) = rows
            .try_next()
            .await
            .map_err(|e| GetCollectionsError::Internal(e.into()))?
        {
            let collection_id = CollectionUuid::from_str(row.get::<&str, _>(0))?;
            rows_by_collection_id
                .entry(collection_id)
                .or_default()
                .push(row);
        }

        let mut collections = Vec::with_capacity(rows_by_collection_id.len());
        for (collection_id, rows) in rows_by_collection_id {
            let Some(first_row) = rows.first() else {
                continue;
            };
            let created_at: DateTime<Utc> = first_row.get(9);
            collections.push(Collection {
                collection_id,
                name: first_row.get(1),
                topic: first_row.get(2),
                dimension: first_row.get(3),
                tenant: first_row.get(4),
                database: first_row.get(5),
                log_position: first_row.get(6),
                version: first_row.get(7),
                version_file_name: first_row.get(8),
                created_at,
                metadata: metadata_from_rows(rows.iter()),
            });
        }

        collections.sort_unstable_by_key(|c| c.collection_id);

        Ok(collections)
    }

    async fn get_segments_with_conn<'a, C>(
        conn: C,
        options: GetSegmentsOptions,
    ) -> Result<Vec<Segment>, GetSegmentsError>
    where
        C: sqlx::Executor<'a, Database = sqlx::Sqlite>,
    {
        let GetSegmentsOptions {
            id,
            r#type,
            scope,
            topic,
            collection,
        } = options;

        let (sql, values) = sea_query::Query::select()
            .from(table::Segments::Table)
            .left_join(
                table::SegmentMetadata::Table,
                sea_query::Expr::col((
                    table::SegmentMetadata::Table,
                    table::SegmentMetadata::SegmentId,
                ))
                .equals((table::Segments::Table, table::Segments::Id)),
            )
            .cond_where(
                sea_query::Cond::all()
                    .add_option(id.map(|id| {
                        sea_query::Expr::col((table::Segments::Table, table::Segments::Id))
                            .eq(id.to_string())
                    }))
                    .add_option(r#type.map(|r#type| {
                        sea_query::Expr::col((table::Segments::Table, table::Segments::Type))
                            .eq(String::from(r#type))
                    }))
                    .add_option(scope.map(|scope| {
                        sea_query::Expr::col((table::Segments::Table, table::Segments::Scope))
                            .eq(String::from(scope))
                    }))
                    .add_option(topic.map(|topic| {
                        sea_query::Expr::col((table::Segments::Table, table::Segments::Topic))
                            .eq(topic)
                    }))
                    .add_option(collection.map(|collection| {
                        sea_query::Expr::col((table::Segments::Table, table::Segments::Collection))
                            .eq(collection.to_string())
                    })),
            )
            .column((table::Segments::Table, table::Segments::Id))
            .column((table::Segments::Table, table::Segments::Type))
            .column((table::Segments::Table, table::Segments::Scope))
            .column((table::Segments::Table, table::Segments::Collection))
            .column((table::Segments::Table, table::Segments::Topic))
            .column((table::Segments::Table, table::Segments::FilePaths))
            .columns([
                table::SegmentMetadata::Key,
                table::SegmentMetadata::StrValue,
                table::SegmentMetadata::IntValue,
                table::SegmentMetadata::FloatValue,
            ])
            .build_sqlx(sea_query::SqliteQueryBuilder);

        let mut rows = sqlx::query_with(&sql, values).fetch(conn);
        let mut rows_by_segment_id: HashMap<SegmentUuid, Vec<SqliteRow>> = HashMap::new();

        while let Some(row) = rows
            .try_next()
            .await
            .map_err(|e| WrappedSqlxError(e).boxed())?
        {
            let segment_id = SegmentUuid::from_str(row.get::<&str, _>(0))
                .map_err(SegmentConversionError::from)?;
            rows_by_segment_id.entry(segment_id).or_default().push(row);
        }

        let mut segments = Vec::with_capacity(rows_by_segment_id.len());
        for (segment_id, rows) in rows_by_segment_id {
            let Some(first_row) = rows.first() else {
                continue;
            };
            let collection = first_row
                .get::<Option<&str>, _>(3)
                .map(CollectionUuid::from_str)
                .transpose()
                .map_err(SegmentConversionError::from)?;
            let file_paths = serde_json::from_str(first_row.get::<&str, _>(5))
                .map_err(SegmentConversionError::from)?;
            segments.push(Segment {
                id: segment_id,
                r#type: SegmentType::try_from(first_row.get::<&str, _>(1))?,
                scope: SegmentScope::try_from(first_row.get::<&str, _>(2))?,
                collection,
                topic: first_row.get(4),
                metadata: metadata_from_rows(rows.iter()),
                file_paths,
            });
        }

        segments.sort_unstable_by_key(|s| s.id);

        Ok(segments)
    }

    async fn create_segment_with_conn<C>(
        conn: &mut C,
        segment: Segment,
    ) -> Result<(), CreateSegmentError>
    where
        for<'a> &'a mut C: sqlx::Executor<'a, Database = sqlx::Sqlite>,
    {
        let file_paths = serde_json::to_string(&segment.file_paths)
            .map_err(|e| SegmentConversionError::from(e).boxed())?;
        sqlx::query(
            r#"
            INSERT INTO segments (id, type, scope, collection, topic, file_paths)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(segment.id.to_string())
        .bind(String::from(segment.r#type))
        .bind(String::from(segment.scope))
        .bind(segment.collection.map(|collection| collection.to_string()))
        .bind(segment.topic)
        .bind(file_paths)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                CreateSegmentError::AlreadyExists(segment.id)
            } else {
                CreateSegmentError::Internal(e.into())
            }
        })?;

        if let Some(metadata) = segment.metadata {
            update_metadata::<table::SegmentMetadata, _, _>(
                conn,
                segment.id.to_string(),
                metadata.into_iter().map(|(k, v)| (k, v.into())).collect(),
            )
            .await
            .map_err(|e| e.boxed())?;
        }

        Ok(())
    }

    async fn register_file_paths_with_conn<C>(
        conn: &mut C,
        segment_id: SegmentUuid,
        file_paths: &HashMap<String, Vec<String>>,
    ) -> Result<(), RegisterFilePathsError>
    where
        for<'a> &'a mut C: sqlx::Executor<'a, Database = sqlx::Sqlite>,
    {
        let file_paths = serde_json::to_string(file_paths)
            .map_err(|e| SegmentConversionError::from(e).boxed())?;
        let result = sqlx::query("UPDATE segments SET file_paths = $1 WHERE id = $2")
            .bind(file_paths)
            .bind(segment_id.to_string())
            .execute(&mut *conn)
            .await
            .map_err(|e| RegisterFilePathsError::Internal(e.into()))?;
        if result.rows_affected() == 0 {
            return Err(RegisterFilePathsError::NotFound(segment_id));
        }
        Ok(())
    }

    async fn update_log_position_and_version_with_conn<C>(
        conn: &mut C,
        collection_id: CollectionUuid,
        new_log_position: i64,
        expected_version: i32,
    ) -> Result<i32, UpdateLogPositionError>
    where
        for<'a> &'a mut C: sqlx::Executor<'a, Database = sqlx::Sqlite>,
    {
        let row = sqlx::query("SELECT log_position, version FROM collections WHERE id = $1")
            .bind(collection_id.to_string())
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| UpdateLogPositionError::Internal(e.into()))?;
        let Some(row) = row else {
            return Err(UpdateLogPositionError::NotFound(collection_id));
        };
        let stored_log_position: i64 = row.get(0);
        let stored_version: i32 = row.get(1);

        if stored_log_position > new_log_position {
            return Err(UpdateLogPositionError::StaleLogPosition {
                stored: stored_log_position,
                requested: new_log_position,
            });
        }
        if stored_version > expected_version {
            return Err(UpdateLogPositionError::StaleVersion {
                stored: stored_version,
                expected: expected_version,
            });
        }
        if stored_version < expected_version {
            tracing::error!(
                %collection_id,
                stored_version,
                expected_version,
                "Catalog version is behind the compactor's expected version"
            );
            return Err(UpdateLogPositionError::InvalidVersion {
                stored: stored_version,
                expected: expected_version,
            });
        }

        let result = sqlx::query(
            r#"
            UPDATE collections
            SET log_position = $1, version = version + 1
            WHERE id = $2 AND version = $3
            "#,
        )
        .bind(new_log_position)
        .bind(collection_id.to_string())
        .bind(expected_version)
        .execute(&mut *conn)
        .await
        .map_err(|e| UpdateLogPositionError::Internal(e.into()))?;
        if result.rows_affected() == 0 {
            return Err(UpdateLogPositionError::StaleVersion {
                stored: stored_version,
                expected: expected_version,
            });
        }

        Ok(expected_version + 1)
    }

    /// Returns true if the collection was deleted, false if it was not found
    async fn delete_collection_with_conn<C>(
        conn: &mut C,
        tenant: &str,
        database: &str,
        collection_id: CollectionUuid,
    ) -> Result<bool, WrappedSqlxError>
    where
        for<'a> &'a mut C: sqlx::Executor<'a, Database = sqlx::Sqlite>,
    {
        let found = sqlx::query(
            r#"
            SELECT collections.id
            FROM collections
            INNER JOIN databases ON databases.id = collections.database_id
            WHERE collections.id = $1 AND databases.name = $2 AND databases.tenant_id = $3
            "#,
        )
        .bind(collection_id.to_string())
        .bind(database)
        .bind(tenant)
        .fetch_optional(&mut *conn)
        .await?
        .is_some();
        if !found {
            return Ok(false);
        }

        sqlx::query(
            r#"
            DELETE FROM segment_metadata
            WHERE segment_id IN (SELECT id FROM segments WHERE collection = $1)
            "#,
        )
        .bind(collection_id.to_string())
        .execute(&mut *conn)
        .await?;

        sqlx::query("DELETE FROM segments WHERE collection = $1")
            .bind(collection_id.to_string())
            .execute(&mut *conn)
            .await?;

        sqlx::query("DELETE FROM collection_metadata WHERE collection_id = $1")
            .bind(collection_id.to_string())
            .execute(&mut *conn)
            .await?;

        sqlx::query("DELETE FROM record_logs WHERE collection_id = $1")
            .bind(collection_id.to_string())
            .execute(&mut *conn)
            .await?;

        sqlx::query("DELETE FROM collections WHERE id = $1")
            .bind(collection_id.to_string())
            .execute(&mut *conn)
            .await?;

        insert_notification(&mut *conn, collection_id, NotificationType::DeleteCollection)
            .await?;

        Ok(true)
    }
}

//////////////////////// Configurable Implementation ////////////////////////

#[async_trait]
impl Configurable<SqliteDBConfig> for SqliteSysDb {
    async fn try_from_config(
        config: &SqliteDBConfig,
        registry: &Registry,
    ) -> Result<Self, Box<dyn ChromaError>> {
        let db = match registry.get::<SqliteDb>() {
            Ok(db) => db,
            Err(_) => SqliteDb::try_from_config(config, registry)
                .await
                .map_err(|e| e.boxed())?,
        };
        let sysdb = Self::new(db);
        registry.register(sysdb.clone());
        Ok(sysdb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NotificationStore;
    use chroma_error::ErrorCodes;
    use chroma_sqlite::db::test_utils::get_new_sqlite_db;
    use chroma_types::{
        default_segments, MetadataValue, NotificationStatus, UpdateMetadata, UpdateMetadataValue,
        DEFAULT_DATABASE, DEFAULT_TENANT,
    };
    use proptest::prelude::*;

    async fn new_sysdb() -> SqliteSysDb {
        SqliteSysDb::new(get_new_sqlite_db().await)
    }

    async fn create_test_collection(
        sysdb: &SqliteSysDb,
        tenant: &str,
        database: &str,
        name: &str,
        metadata: Option<Metadata>,
    ) -> Collection {
        let collection_id = CollectionUuid::new();
        sysdb
            .create_collection(
                tenant.to_string(),
                database.to_string(),
                collection_id,
                name.to_string(),
                format!("topic-{name}"),
                default_segments(collection_id),
                metadata,
                Some(128),
                false,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_tenant() {
        let sysdb = new_sysdb().await;
        let tenant = sysdb.create_tenant("t1".to_string()).await.unwrap();
        assert_eq!(tenant.name, "t1");
        assert_eq!(tenant.last_compaction_time, 0);

        let fetched = sysdb.get_tenant("t1").await.unwrap();
        assert_eq!(fetched, tenant);

        let err = sysdb.create_tenant("t1".to_string()).await.unwrap_err();
        assert!(matches!(err, CreateTenantError::AlreadyExists(_)));
        assert_eq!(err.code(), ErrorCodes::AlreadyExists);

        let err = sysdb.get_tenant("missing").await.unwrap_err();
        assert!(matches!(err, GetTenantError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_default_tenant_exists() {
        let sysdb = new_sysdb().await;
        sysdb.get_tenant(DEFAULT_TENANT).await.unwrap();
        let database = sysdb
            .get_database(DEFAULT_DATABASE, DEFAULT_TENANT)
            .await
            .unwrap();
        assert_eq!(database.tenant, DEFAULT_TENANT);
    }

    #[tokio::test]
    async fn test_last_compaction_time() {
        let sysdb = new_sysdb().await;
        sysdb.create_tenant("t1".to_string()).await.unwrap();
        sysdb
            .set_last_compaction_time_for_tenant("t1", 42)
            .await
            .unwrap();

        let times = sysdb
            .get_last_compaction_time_for_tenants(vec!["t1".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(
            times,
            vec![TenantLastCompactionTime {
                tenant: "t1".to_string(),
                last_compaction_time: 42,
            }]
        );

        let err = sysdb
            .set_last_compaction_time_for_tenant("missing", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SetLastCompactionTimeError::TenantNotFound(_)));
    }

    #[tokio::test]
    async fn test_create_get_list_databases() {
        let sysdb = new_sysdb().await;
        sysdb.create_tenant("t1".to_string()).await.unwrap();
        let id = DatabaseUuid::new();
        let database = sysdb.create_database(id, "d1", "t1").await.unwrap();
        assert_eq!(database.id, id);

        let fetched = sysdb.get_database("d1", "t1").await.unwrap();
        assert_eq!(fetched, database);

        let err = sysdb
            .create_database(DatabaseUuid::new(), "d1", "t1")
            .await
            .unwrap_err();
        assert!(matches!(err, CreateDatabaseError::AlreadyExists(_)));

        let err = sysdb
            .create_database(DatabaseUuid::new(), "d1", "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, CreateDatabaseError::TenantNotFound(_)));

        // Same name under another tenant is fine
        sysdb
            .create_database(DatabaseUuid::new(), "d1", DEFAULT_TENANT)
            .await
            .unwrap();
        sysdb
            .create_database(DatabaseUuid::new(), "d0", "t1")
            .await
            .unwrap();

        let databases = sysdb.list_databases("t1", None, 0).await.unwrap();
        let names: Vec<_> = databases.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["d0", "d1"]);

        let page = sysdb.list_databases("t1", Some(1), 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "d1");

        let err = sysdb.get_database("missing", "t1").await.unwrap_err();
        assert!(matches!(err, GetDatabaseError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_database_cascades() {
        let sysdb = new_sysdb().await;
        sysdb
            .create_database(DatabaseUuid::new(), "d1", DEFAULT_TENANT)
            .await
            .unwrap();
        let collection = create_test_collection(&sysdb, DEFAULT_TENANT, "d1", "c1", None).await;

        sysdb.delete_database("d1", DEFAULT_TENANT).await.unwrap();

        let collections = sysdb
            .get_collections(GetCollectionsOptions {
                collection_id: Some(collection.collection_id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(collections.is_empty());
        let segments = sysdb
            .get_segments(GetSegmentsOptions {
                collection: Some(collection.collection_id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(segments.is_empty());

        let notifications = NotificationStore::new(sysdb.db().clone())
            .get_notifications(collection.collection_id)
            .await
            .unwrap();
        assert_eq!(
            notifications.iter().map(|n| n.r#type).collect::<Vec<_>>(),
            vec![
                NotificationType::CreateCollection,
                NotificationType::DeleteCollection
            ]
        );

        let err = sysdb
            .delete_database("d1", DEFAULT_TENANT)
            .await
            .unwrap_err();
        assert!(matches!(err, DeleteDatabaseError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_collection() {
        let sysdb = new_sysdb().await;
        let metadata = Metadata::from([
            ("key1".to_string(), MetadataValue::Str("value1".to_string())),
            ("key2".to_string(), MetadataValue::Int(42)),
            ("key3".to_string(), MetadataValue::Float(42.5)),
        ]);
        let created = create_test_collection(
            &sysdb,
            DEFAULT_TENANT,
            DEFAULT_DATABASE,
            "test_collection",
            Some(metadata.clone()),
        )
        .await;

        let collections = sysdb
            .get_collections(GetCollectionsOptions {
                collection_id: Some(created.collection_id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(collections.len(), 1);
        let collection = &collections[0];
        assert_eq!(collection.name, "test_collection");
        assert_eq!(collection.topic, "topic-test_collection");
        assert_eq!(collection.dimension, Some(128));
        assert_eq!(collection.tenant, DEFAULT_TENANT);
        assert_eq!(collection.database, DEFAULT_DATABASE);
        assert_eq!(collection.metadata, Some(metadata));
        assert_eq!(collection.log_position, 0);
        assert_eq!(collection.version, 0);
        assert_eq!(
            collection.created_at.timestamp_micros(),
            created.created_at.timestamp_micros()
        );

        let segments = sysdb
            .get_segments(GetSegmentsOptions {
                collection: Some(created.collection_id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(segments.len(), 2);

        let pending = NotificationStore::new(sysdb.db().clone())
            .get_pending(0, 10)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].collection_id, created.collection_id);
        assert_eq!(pending[0].r#type, NotificationType::CreateCollection);
        assert_eq!(pending[0].status, NotificationStatus::Pending);
    }

    #[tokio::test]
    async fn test_create_collection_fails_for_duplicate_name() {
        let sysdb = new_sysdb().await;
        create_test_collection(&sysdb, DEFAULT_TENANT, DEFAULT_DATABASE, "c1", None).await;

        let err = sysdb
            .create_collection(
                DEFAULT_TENANT.to_string(),
                DEFAULT_DATABASE.to_string(),
                CollectionUuid::new(),
                "c1".to_string(),
                "topic".to_string(),
                vec![],
                None,
                None,
                false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CreateCollectionError::AlreadyExists(_)));
        assert_eq!(err.code(), ErrorCodes::AlreadyExists);
    }

    #[tokio::test]
    async fn test_create_collection_get_or_create() {
        let sysdb = new_sysdb().await;
        let original = create_test_collection(
            &sysdb,
            DEFAULT_TENANT,
            DEFAULT_DATABASE,
            "c1",
            Some(Metadata::from([("a".to_string(), MetadataValue::Int(1))])),
        )
        .await;

        let existing = sysdb
            .create_collection(
                DEFAULT_TENANT.to_string(),
                DEFAULT_DATABASE.to_string(),
                CollectionUuid::new(),
                "c1".to_string(),
                "other-topic".to_string(),
                vec![],
                None,
                Some(3),
                true,
            )
            .await
            .unwrap();
        assert_eq!(existing.collection_id, original.collection_id);
        assert_eq!(existing.topic, original.topic);
        assert_eq!(existing.dimension, Some(128));
        assert_eq!(existing.metadata, original.metadata);

        let pending = NotificationStore::new(sysdb.db().clone())
            .get_pending(0, 10)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_create_collection_in_missing_database() {
        let sysdb = new_sysdb().await;
        let err = sysdb
            .create_collection(
                "nope".to_string(),
                DEFAULT_DATABASE.to_string(),
                CollectionUuid::new(),
                "c1".to_string(),
                "topic".to_string(),
                vec![],
                None,
                None,
                true,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CreateCollectionError::DatabaseNotFound { .. }));
        assert_eq!(err.code(), ErrorCodes::NotFound);
    }

    #[tokio::test]
    async fn test_get_collections_filters_combine() {
        let sysdb = new_sysdb().await;
        sysdb.create_tenant("t1".to_string()).await.unwrap();
        sysdb
            .create_database(DatabaseUuid::new(), "d1", "t1")
            .await
            .unwrap();
        let a = create_test_collection(&sysdb, DEFAULT_TENANT, DEFAULT_DATABASE, "a", None).await;
        let b = create_test_collection(&sysdb, DEFAULT_TENANT, DEFAULT_DATABASE, "b", None).await;
        let a1 = create_test_collection(&sysdb, "t1", "d1", "a", None).await;

        let all = sysdb
            .get_collections(GetCollectionsOptions::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let named_a = sysdb
            .get_collections(GetCollectionsOptions {
                name: Some("a".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let mut ids: Vec<_> = named_a.iter().map(|c| c.collection_id).collect();
        let mut expected = vec![a.collection_id, a1.collection_id];
        ids.sort();
        expected.sort();
        assert_eq!(ids, expected);

        let scoped = sysdb
            .get_collections(GetCollectionsOptions {
                name: Some("a".to_string()),
                tenant: Some("t1".to_string()),
                database: Some("d1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].collection_id, a1.collection_id);
        assert_eq!(scoped[0].tenant, "t1");
        assert_eq!(scoped[0].database, "d1");

        let by_topic = sysdb
            .get_collections(GetCollectionsOptions {
                topic: Some(b.topic.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_topic.len(), 1);
        assert_eq!(by_topic[0].collection_id, b.collection_id);

        let none = sysdb
            .get_collections(GetCollectionsOptions {
                name: Some("b".to_string()),
                tenant: Some("t1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(none.is_empty());

        let page = sysdb
            .get_collections(GetCollectionsOptions {
                limit: Some(2),
                offset: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
    }

    #[tokio::test]
    async fn test_update_collection() {
        let sysdb = new_sysdb().await;
        let collection = create_test_collection(
            &sysdb,
            DEFAULT_TENANT,
            DEFAULT_DATABASE,
            "c1",
            Some(Metadata::from([
                ("env".to_string(), MetadataValue::from("prod")),
                ("shards".to_string(), MetadataValue::Int(4)),
            ])),
        )
        .await;
        let id = collection.collection_id;

        sysdb
            .update_collection(
                id,
                Some("renamed".to_string()),
                Some("new-topic".to_string()),
                Some(256),
                Some(MetadataUpdate::Patch(UpdateMetadata::from([
                    ("shards".to_string(), UpdateMetadataValue::None),
                    ("ratio".to_string(), UpdateMetadataValue::Float(0.5)),
                ]))),
            )
            .await
            .unwrap();

        let updated = sysdb
            .get_collections(GetCollectionsOptions {
                collection_id: Some(id),
                ..Default::default()
            })
            .await
            .unwrap()
            .pop()
            .unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.topic, "new-topic");
        assert_eq!(updated.dimension, Some(256));
        assert_eq!(
            updated.metadata,
            Some(Metadata::from([
                ("env".to_string(), MetadataValue::from("prod")),
                ("ratio".to_string(), MetadataValue::Float(0.5)),
            ]))
        );

        sysdb
            .update_collection(id, None, None, None, Some(MetadataUpdate::reset()))
            .await
            .unwrap();
        let reset = sysdb
            .get_collections(GetCollectionsOptions {
                collection_id: Some(id),
                ..Default::default()
            })
            .await
            .unwrap()
            .pop()
            .unwrap();
        assert_eq!(reset.metadata, None);

        sysdb
            .update_collection(
                id,
                None,
                None,
                None,
                Some(MetadataUpdate::Reset(UpdateMetadata::from([(
                    "owner".to_string(),
                    UpdateMetadataValue::Str("search".to_string()),
                )]))),
            )
            .await
            .unwrap();
        let replaced = sysdb
            .get_collections(GetCollectionsOptions {
                collection_id: Some(id),
                ..Default::default()
            })
            .await
            .unwrap()
            .pop()
            .unwrap();
        assert_eq!(
            replaced.metadata,
            Some(Metadata::from([(
                "owner".to_string(),
                MetadataValue::from("search")
            )]))
        );
    }

    #[tokio::test]
    async fn test_update_collection_errors() {
        let sysdb = new_sysdb().await;
        create_test_collection(&sysdb, DEFAULT_TENANT, DEFAULT_DATABASE, "c1", None).await;
        let c2 = create_test_collection(&sysdb, DEFAULT_TENANT, DEFAULT_DATABASE, "c2", None).await;

        let err = sysdb
            .update_collection(c2.collection_id, Some("c1".to_string()), None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateCollectionError::AlreadyExists(_)));

        let err = sysdb
            .update_collection(CollectionUuid::new(), None, None, Some(3), None)
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateCollectionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_collection() {
        let sysdb = new_sysdb().await;
        let collection = create_test_collection(
            &sysdb,
            DEFAULT_TENANT,
            DEFAULT_DATABASE,
            "c1",
            Some(Metadata::from([("a".to_string(), MetadataValue::Int(1))])),
        )
        .await;
        let id = collection.collection_id;

        // Scoped to tenant and database
        let err = sysdb
            .delete_collection("other", DEFAULT_DATABASE, id)
            .await
            .unwrap_err();
        assert!(matches!(err, DeleteCollectionError::NotFound(_)));

        sysdb
            .delete_collection(DEFAULT_TENANT, DEFAULT_DATABASE, id)
            .await
            .unwrap();

        let collections = sysdb
            .get_collections(GetCollectionsOptions {
                collection_id: Some(id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(collections.is_empty());

        let segments = sysdb
            .get_segments(GetSegmentsOptions {
                collection: Some(id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(segments.is_empty());

        let metadata_rows: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM collection_metadata WHERE collection_id = $1",
        )
        .bind(id.to_string())
        .fetch_one(sysdb.db().get_conn())
        .await
        .unwrap();
        assert_eq!(metadata_rows, 0);

        let err = sysdb
            .delete_collection(DEFAULT_TENANT, DEFAULT_DATABASE, id)
            .await
            .unwrap_err();
        assert!(matches!(err, DeleteCollectionError::NotFound(_)));
        assert_eq!(err.code(), ErrorCodes::NotFound);
    }

    #[tokio::test]
    async fn test_segment_lifecycle() {
        let sysdb = new_sysdb().await;
        let collection_id = CollectionUuid::new();
        let mut segment = Segment::new(
            SegmentType::BlockfileRecord,
            SegmentScope::METADATA,
            None,
        );
        segment.metadata = Some(Metadata::from([(
            "kind".to_string(),
            MetadataValue::from("record"),
        )]));
        sysdb.create_segment(segment.clone()).await.unwrap();

        let err = sysdb.create_segment(segment.clone()).await.unwrap_err();
        assert!(matches!(err, CreateSegmentError::AlreadyExists(_)));

        let unassigned = sysdb
            .get_segments(GetSegmentsOptions {
                id: Some(segment.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(unassigned, vec![segment.clone()]);

        sysdb
            .update_segment(
                segment.id,
                UpdateSegmentOptions {
                    topic: Some(Some("t".to_string())),
                    collection: Some(Some(collection_id)),
                    metadata: Some(MetadataUpdate::Patch(UpdateMetadata::from([(
                        "kind".to_string(),
                        UpdateMetadataValue::None,
                    )]))),
                },
            )
            .await
            .unwrap();

        let fetched = sysdb
            .get_segments(GetSegmentsOptions {
                scope: Some(SegmentScope::METADATA),
                r#type: Some(SegmentType::BlockfileRecord),
                topic: Some("t".to_string()),
                collection: Some(collection_id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].collection, Some(collection_id));
        assert_eq!(fetched[0].metadata, None);

        let none = sysdb
            .get_segments(GetSegmentsOptions {
                scope: Some(SegmentScope::VECTOR),
                collection: Some(collection_id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(none.is_empty());

        sysdb
            .update_segment(
                segment.id,
                UpdateSegmentOptions {
                    collection: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let detached = sysdb
            .get_segments(GetSegmentsOptions {
                id: Some(segment.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(detached[0].collection, None);
        assert_eq!(detached[0].topic, Some("t".to_string()));

        sysdb.delete_segment(segment.id).await.unwrap();
        let err = sysdb.delete_segment(segment.id).await.unwrap_err();
        assert!(matches!(err, DeleteSegmentError::NotFound(_)));
        let err = sysdb
            .update_segment(segment.id, UpdateSegmentOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateSegmentError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_register_file_paths() {
        let sysdb = new_sysdb().await;
        let collection =
            create_test_collection(&sysdb, DEFAULT_TENANT, DEFAULT_DATABASE, "c1", None).await;
        let segments = sysdb
            .get_segments(GetSegmentsOptions {
                collection: Some(collection.collection_id),
                scope: Some(SegmentScope::VECTOR),
                ..Default::default()
            })
            .await
            .unwrap();
        let segment_id = segments[0].id;

        let file_paths = HashMap::from([(
            "hnsw_index".to_string(),
            vec!["a/b/1".to_string(), "a/b/2".to_string()],
        )]);
        sysdb
            .register_file_paths(segment_id, file_paths.clone())
            .await
            .unwrap();
        let fetched = sysdb
            .get_segments(GetSegmentsOptions {
                id: Some(segment_id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(fetched[0].file_paths, file_paths);

        let err = sysdb
            .register_file_paths(SegmentUuid::new(), HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RegisterFilePathsError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_log_position_and_version() {
        let sysdb = new_sysdb().await;
        let collection =
            create_test_collection(&sysdb, DEFAULT_TENANT, DEFAULT_DATABASE, "c1", None).await;
        let id = collection.collection_id;

        let version = sysdb.update_log_position_and_version(id, 3, 0).await.unwrap();
        assert_eq!(version, 1);

        // The same request again lost the race
        let err = sysdb
            .update_log_position_and_version(id, 3, 0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UpdateLogPositionError::StaleVersion {
                stored: 1,
                expected: 0
            }
        ));
        assert!(err.is_stale());
        assert_eq!(err.code(), ErrorCodes::Aborted);

        let err = sysdb
            .update_log_position_and_version(id, 2, 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UpdateLogPositionError::StaleLogPosition {
                stored: 3,
                requested: 2
            }
        ));

        let err = sysdb
            .update_log_position_and_version(id, 10, 5)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UpdateLogPositionError::InvalidVersion {
                stored: 1,
                expected: 5
            }
        ));
        assert_eq!(err.code(), ErrorCodes::VersionMismatch);
        assert!(!err.code().is_retryable());

        let err = sysdb
            .update_log_position_and_version(CollectionUuid::new(), 1, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateLogPositionError::NotFound(_)));

        let stored = sysdb
            .get_collections(GetCollectionsOptions {
                collection_id: Some(id),
                ..Default::default()
            })
            .await
            .unwrap()
            .pop()
            .unwrap();
        assert_eq!(stored.log_position, 3);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_concurrent_cas_has_one_winner() {
        let (_dir, db) = chroma_sqlite::db::test_utils::get_new_file_sqlite_db().await;
        let sysdb = SqliteSysDb::new(db);
        let collection =
            create_test_collection(&sysdb, DEFAULT_TENANT, DEFAULT_DATABASE, "c1", None).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let sysdb = sysdb.clone();
            let id = collection.collection_id;
            handles.push(tokio::spawn(async move {
                sysdb.update_log_position_and_version(id, 10, 0).await
            }));
        }
        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(version) => {
                    assert_eq!(version, 1);
                    winners += 1;
                }
                Err(err) => assert!(err.is_stale(), "unexpected error: {err}"),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_flush_collection_compaction() {
        let sysdb = new_sysdb().await;
        let collection =
            create_test_collection(&sysdb, DEFAULT_TENANT, DEFAULT_DATABASE, "c1", None).await;
        let id = collection.collection_id;
        let segments = sysdb
            .get_segments(GetSegmentsOptions {
                collection: Some(id),
                ..Default::default()
            })
            .await
            .unwrap();

        let flush_info: Vec<_> = segments
            .iter()
            .map(|segment| SegmentFlushInfo {
                segment_id: segment.id,
                file_paths: HashMap::from([(
                    "data".to_string(),
                    vec![format!("segment/{}", segment.id)],
                )]),
            })
            .collect();
        let response = sysdb
            .flush_collection_compaction(
                id,
                5,
                0,
                flush_info.clone(),
                Some("000001_flush".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(response.collection_version, 1);
        assert!(response.last_compaction_time > 0);

        let stored = sysdb.get_collection_with_segments(id).await.unwrap();
        assert_eq!(stored.collection.version, 1);
        assert_eq!(stored.collection.log_position, 5);
        assert_eq!(
            stored.collection.version_file_name,
            Some("000001_flush".to_string())
        );
        for segment in &stored.segments {
            assert_eq!(
                segment.file_paths.get("data"),
                Some(&vec![format!("segment/{}", segment.id)])
            );
        }

        let times = sysdb
            .get_last_compaction_time_for_tenants(vec![DEFAULT_TENANT.to_string()])
            .await
            .unwrap();
        assert_eq!(times[0].last_compaction_time, response.last_compaction_time);
    }

    #[tokio::test]
    async fn test_flush_with_missing_segment_rolls_back() {
        let sysdb = new_sysdb().await;
        let collection =
            create_test_collection(&sysdb, DEFAULT_TENANT, DEFAULT_DATABASE, "c1", None).await;
        let id = collection.collection_id;

        let missing = SegmentUuid::new();
        let err = sysdb
            .flush_collection_compaction(
                id,
                5,
                0,
                vec![SegmentFlushInfo {
                    segment_id: missing,
                    file_paths: HashMap::new(),
                }],
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FlushCompactionError::SegmentNotFound(s) if s == missing));

        let stored = sysdb.get_collection_with_segments(id).await.unwrap();
        assert_eq!(stored.collection.version, 0);
        assert_eq!(stored.collection.log_position, 0);

        let err = sysdb
            .flush_collection_compaction(id, 5, 3, vec![], None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCodes::VersionMismatch);
    }

    #[tokio::test]
    async fn test_get_collection_with_segments_not_found() {
        let sysdb = new_sysdb().await;
        let err = sysdb
            .get_collection_with_segments(CollectionUuid::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GetCollectionWithSegmentsError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reset() {
        let sysdb = new_sysdb().await;
        sysdb.create_tenant("t1".to_string()).await.unwrap();
        create_test_collection(&sysdb, DEFAULT_TENANT, DEFAULT_DATABASE, "c1", None).await;

        sysdb.reset().await.unwrap();

        assert!(sysdb.get_tenant("t1").await.is_err());
        sysdb.get_tenant(DEFAULT_TENANT).await.unwrap();
        let collections = sysdb
            .get_collections(GetCollectionsOptions::default())
            .await
            .unwrap();
        assert!(collections.is_empty());
    }

    #[tokio::test]
    async fn test_from_config_reuses_registered_db() {
        let registry = Registry::new();
        let db = get_new_sqlite_db().await;
        registry.register(db.clone());
        let sysdb = SqliteSysDb::try_from_config(&SqliteDBConfig::default(), &registry)
            .await
            .unwrap();
        sysdb.create_tenant("t1".to_string()).await.unwrap();

        let other = SqliteSysDb::new(db);
        other.get_tenant("t1").await.unwrap();
        registry.get::<SqliteSysDb>().unwrap();
    }

    fn metadata_value_strategy() -> impl Strategy<Value = MetadataValue> {
        prop_oneof![
            any::<i64>().prop_map(MetadataValue::Int),
            (-1.0e9f64..1.0e9f64).prop_map(MetadataValue::Float),
            "[a-z0-9 ]{0,12}".prop_map(MetadataValue::Str),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn test_metadata_round_trip(
            metadata in proptest::collection::hash_map("[a-z]{1,8}", metadata_value_strategy(), 1..8)
        ) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            let fetched = runtime.block_on(async {
                let sysdb = new_sysdb().await;
                let collection = create_test_collection(
                    &sysdb,
                    DEFAULT_TENANT,
                    DEFAULT_DATABASE,
                    "c",
                    Some(metadata.clone()),
                )
                .await;
                sysdb
                    .get_collections(GetCollectionsOptions {
                        collection_id: Some(collection.collection_id),
                        ..Default::default()
                    })
                    .await
                    .unwrap()
                    .pop()
                    .unwrap()
            });
            prop_assert_eq!(fetched.metadata, Some(metadata));
        }
    }
}
