use crate::{
    config::SqliteLogConfig, GetCollectionsToCompactError, PullLogsError, PurgeLogsError,
    PushLogsError,
};
use async_trait::async_trait;
use chroma_config::{
    registry::{Injectable, Registry},
    Configurable,
};
use chroma_error::{ChromaError, WrappedSqlxError};
use chroma_sqlite::db::SqliteDb;
use chroma_types::{CollectionInfo, CollectionUuid, LogRecord};
use futures::TryStreamExt;
use sqlx::{QueryBuilder, Row};
use std::str::FromStr;

const DEFAULT_VAR_OPT: u32 = 32766;
const PRAGMA_MAX_VAR_OPT: &str = "MAX_VARIABLE_NUMBER";
const VARIABLE_PER_RECORD: u32 = 4;

/// Record log stored in the coordinator's SQLite database. Offsets are
/// assigned per collection inside an immediate transaction, so concurrent
/// pushers to the same collection never interleave or leave gaps.
#[derive(Clone, Debug)]
pub struct SqliteLog {
    db: SqliteDb,
    max_batch_size: u32,
}

impl SqliteLog {
    pub fn new(db: SqliteDb, max_batch_size: u32) -> Self {
        Self {
            db,
            max_batch_size: max_batch_size.max(1),
        }
    }

    /// Appends `records` to the collection's log and returns how many were
    /// written. The first record ever pushed gets offset 1.
    #[tracing::instrument(skip(self, records), fields(num_records = records.len()))]
    pub async fn push_logs(
        &self,
        collection_id: CollectionUuid,
        records: Vec<Vec<u8>>,
    ) -> Result<usize, PushLogsError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.db.get_conn().begin().await.map_err(WrappedSqlxError)?;
        self.db
            .begin_immediate(&mut *tx)
            .await
            .map_err(WrappedSqlxError)?;

        // Purged offsets stay consumed, so the next offset also clears the
        // collection's compacted position.
        let last_offset: i64 = sqlx::query(
            r#"
            SELECT MAX(
                COALESCE((SELECT MAX(id) FROM record_logs WHERE collection_id = $1), 0),
                COALESCE((SELECT log_position FROM collections WHERE id = $1), 0)
            )
            "#,
        )
        .bind(collection_id.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(WrappedSqlxError)?
        .get(0);

        let timestamp = now_nanos();
        let collection_id_str = collection_id.to_string();
        let mut next_offset = last_offset + 1;
        for batch in records.chunks(self.max_batch_size as usize) {
            let mut query_builder =
                QueryBuilder::new("INSERT INTO record_logs (collection_id, id, timestamp, record) ");
            query_builder.push_values(batch, |mut builder, record| {
                builder.push_bind(&collection_id_str);
                builder.push_bind(next_offset);
                builder.push_bind(timestamp);
                builder.push_bind(record.as_slice());
                next_offset += 1;
            });
            query_builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(WrappedSqlxError)?;
        }
        tx.commit().await.map_err(WrappedSqlxError)?;

        tracing::debug!(
            first_offset = last_offset + 1,
            last_offset = next_offset - 1,
            "Pushed records"
        );
        Ok(records.len())
    }

    /// Reads up to `batch_size` records with offset at or after
    /// `from_offset`, ascending. Records pushed after `end_timestamp_ns`
    /// are excluded so a compaction pass sees a fixed input set.
    #[tracing::instrument(skip(self))]
    pub async fn pull_logs(
        &self,
        collection_id: CollectionUuid,
        from_offset: i64,
        batch_size: u32,
        end_timestamp_ns: Option<i64>,
    ) -> Result<Vec<LogRecord>, PullLogsError> {
        if from_offset < 1 {
            return Err(PullLogsError::InvalidOffset(from_offset));
        }
        let end_timestamp_ns = end_timestamp_ns.unwrap_or(i64::MAX);

        let mut rows = sqlx::query(
            r#"
            SELECT id, timestamp, record
            FROM record_logs
            WHERE collection_id = $1
            AND id >= $2
            AND timestamp <= $3
            ORDER BY id ASC
            LIMIT $4
            "#,
        )
        .bind(collection_id.to_string())
        .bind(from_offset)
        .bind(end_timestamp_ns)
        .bind(batch_size as i64)
        .fetch(self.db.get_conn());

        let mut records = Vec::new();
        while let Some(row) = rows.try_next().await.map_err(WrappedSqlxError)? {
            records.push(LogRecord {
                collection_id,
                log_offset: row.get("id"),
                timestamp: row.get("timestamp"),
                record: row.get::<Option<Vec<u8>>, _>("record").unwrap_or_default(),
            });
        }
        Ok(records)
    }

    /// Collections whose log extends past their compacted position, with the
    /// oldest uncompacted record of each, oldest first.
    #[tracing::instrument(skip(self))]
    pub async fn get_all_collections_to_compact(
        &self,
    ) -> Result<Vec<CollectionInfo>, GetCollectionsToCompactError> {
        let mut results = sqlx::query(
            r#"
            SELECT
                record_logs.collection_id AS collection_id,
                record_logs.id AS first_log_offset,
                record_logs.timestamp AS first_log_ts
            FROM record_logs
            INNER JOIN (
                SELECT
                    record_logs.collection_id AS collection_id,
                    MIN(record_logs.id) AS min_id
                FROM record_logs
                INNER JOIN collections ON collections.id = record_logs.collection_id
                WHERE record_logs.id > collections.log_position
                GROUP BY record_logs.collection_id
            ) AS uncompacted
            ON uncompacted.collection_id = record_logs.collection_id
            AND uncompacted.min_id = record_logs.id
            ORDER BY first_log_ts ASC, collection_id ASC
            "#,
        )
        .fetch(self.db.get_conn());

        let mut infos = Vec::new();
        while let Some(row) = results.try_next().await.map_err(WrappedSqlxError)? {
            infos.push(CollectionInfo {
                collection_id: CollectionUuid::from_str(row.get::<&str, _>("collection_id"))?,
                first_log_offset: row.get("first_log_offset"),
                first_log_ts: row.get("first_log_ts"),
            });
        }

        Ok(infos)
    }

    /// Deletes records already covered by the collection's compacted log
    /// position. Returns the number of records removed.
    #[tracing::instrument(skip(self))]
    pub async fn purge_logs(&self, collection_id: CollectionUuid) -> Result<u64, PurgeLogsError> {
        let result = sqlx::query(
            r#"
            DELETE FROM record_logs
            WHERE collection_id = $1
            AND id <= (SELECT log_position FROM collections WHERE id = $1)
            "#,
        )
        .bind(collection_id.to_string())
        .execute(self.db.get_conn())
        .await
        .map_err(WrappedSqlxError)?;

        Ok(result.rows_affected())
    }

    pub async fn get_total_log_count(
        &self,
        collection_id: CollectionUuid,
    ) -> Result<i64, PullLogsError> {
        let row = sqlx::query("SELECT COUNT(*) FROM record_logs WHERE collection_id = $1")
            .bind(collection_id.to_string())
            .fetch_one(self.db.get_conn())
            .await
            .map_err(WrappedSqlxError)?;
        Ok(row.get(0))
    }

    /// Largest batch the compiled SQLite accepts in one INSERT.
    pub async fn get_max_batch_size(db: &SqliteDb) -> Result<u32, WrappedSqlxError> {
        let opt_strs = sqlx::query("PRAGMA compile_options")
            .fetch_all(db.get_conn())
            .await?
            .into_iter()
            .map(|row| row.try_get::<String, _>(0))
            .collect::<Result<Vec<_>, _>>()?;
        let max_variable_number = opt_strs
            .into_iter()
            .filter_map(|opt_str| {
                let mut opt_val = opt_str.split('=');
                if let Some(PRAGMA_MAX_VAR_OPT) = opt_val.next() {
                    opt_val.next().and_then(|val_str| val_str.parse().ok())
                } else {
                    None
                }
            })
            .fold(DEFAULT_VAR_OPT, |_, opt| opt);
        Ok(max_variable_number / VARIABLE_PER_RECORD)
    }
}

fn now_nanos() -> i64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or(i64::MAX)
}

impl Injectable for SqliteLog {}

#[async_trait]
impl Configurable<SqliteLogConfig> for SqliteLog {
    async fn try_from_config(
        config: &SqliteLogConfig,
        registry: &Registry,
    ) -> Result<Self, Box<dyn ChromaError>> {
        let db = registry.get::<SqliteDb>().map_err(|e| e.boxed())?;
        let compiled_max = Self::get_max_batch_size(&db)
            .await
            .map_err(|e| e.boxed())?;
        let log = Self::new(db, config.max_batch_size.min(compiled_max));
        registry.register(log.clone());
        Ok(log)
    }
}
