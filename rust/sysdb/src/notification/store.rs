use chroma_error::WrappedSqlxError;
use chroma_sqlite::db::SqliteDb;
use chroma_types::{
    Acknowledgement, CollectionUuid, Notification, NotificationStatus, NotificationStoreError,
    NotificationType,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

/// Records an outbox entry for `collection_id`. Callers pass the connection
/// of the transaction that performs the catalog change, so the entry commits
/// or rolls back together with it.
pub(crate) async fn insert_notification<C>(
    conn: &mut C,
    collection_id: CollectionUuid,
    r#type: NotificationType,
) -> Result<i64, WrappedSqlxError>
where
    for<'a> &'a mut C: sqlx::Executor<'a, Database = sqlx::Sqlite>,
{
    let result =
        sqlx::query("INSERT INTO notifications (collection_id, type, status) VALUES ($1, $2, $3)")
            .bind(collection_id.to_string())
            .bind(r#type.as_str())
            .bind(NotificationStatus::Pending.as_str())
            .execute(&mut *conn)
            .await?;
    Ok(result.last_insert_rowid())
}

fn notification_from_row(row: &SqliteRow) -> Result<Notification, NotificationStoreError> {
    Ok(Notification {
        id: row.get(0),
        collection_id: CollectionUuid::from_str(row.get::<&str, _>(1))?,
        r#type: NotificationType::try_from(row.get::<&str, _>(2))?,
        status: NotificationStatus::try_from(row.get::<&str, _>(3))?,
    })
}

/// Reads and acknowledges the notification outbox.
#[derive(Debug, Clone)]
pub struct NotificationStore {
    db: SqliteDb,
}

impl NotificationStore {
    pub fn new(db: SqliteDb) -> Self {
        Self { db }
    }

    /// Pending notifications with an id greater than `after_id`, oldest first.
    pub async fn get_pending(
        &self,
        after_id: i64,
        limit: u32,
    ) -> Result<Vec<Notification>, NotificationStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, collection_id, type, status
            FROM notifications
            WHERE status = $1 AND id > $2
            ORDER BY id ASC
            LIMIT $3
            "#,
        )
        .bind(NotificationStatus::Pending.as_str())
        .bind(after_id)
        .bind(limit)
        .fetch_all(self.db.get_conn())
        .await
        .map_err(|e| NotificationStoreError::Internal(e.into()))?;

        rows.iter().map(notification_from_row).collect()
    }

    /// Every notification recorded for the collection, in insertion order.
    pub async fn get_notifications(
        &self,
        collection_id: CollectionUuid,
    ) -> Result<Vec<Notification>, NotificationStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, collection_id, type, status
            FROM notifications
            WHERE collection_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(collection_id.to_string())
        .fetch_all(self.db.get_conn())
        .await
        .map_err(|e| NotificationStoreError::Internal(e.into()))?;

        rows.iter().map(notification_from_row).collect()
    }

    /// Marks a notification as delivered. Acknowledging twice is a no-op.
    #[tracing::instrument(skip(self), fields(id = ack.id, from = %ack.from))]
    pub async fn acknowledge(&self, ack: &Acknowledgement) -> Result<(), NotificationStoreError> {
        let result =
            sqlx::query("UPDATE notifications SET status = $1 WHERE id = $2 AND collection_id = $3")
                .bind(NotificationStatus::Acknowledged.as_str())
                .bind(ack.id)
                .bind(ack.collection_id.to_string())
                .execute(self.db.get_conn())
                .await
                .map_err(|e| NotificationStoreError::Internal(e.into()))?;
        if result.rows_affected() == 0 {
            return Err(NotificationStoreError::NotFound(ack.id));
        }
        Ok(())
    }

    /// Deletes acknowledged notifications. Returns how many were removed.
    pub async fn prune_acknowledged(&self) -> Result<u64, NotificationStoreError> {
        let result = sqlx::query("DELETE FROM notifications WHERE status = $1")
            .bind(NotificationStatus::Acknowledged.as_str())
            .execute(self.db.get_conn())
            .await
            .map_err(|e| NotificationStoreError::Internal(e.into()))?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chroma_sqlite::db::test_utils::get_new_sqlite_db;

    async fn insert(db: &SqliteDb, collection_id: CollectionUuid, r#type: NotificationType) -> i64 {
        let mut conn = db.get_conn().acquire().await.unwrap();
        insert_notification(&mut *conn, collection_id, r#type)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_pending_are_ordered_and_paged() {
        let db = get_new_sqlite_db().await;
        let store = NotificationStore::new(db.clone());
        let a = CollectionUuid::new();
        let b = CollectionUuid::new();
        let first = insert(&db, a, NotificationType::CreateCollection).await;
        let second = insert(&db, b, NotificationType::CreateCollection).await;
        let third = insert(&db, a, NotificationType::DeleteCollection).await;
        assert!(first < second && second < third);

        let page = store.get_pending(0, 2).await.unwrap();
        assert_eq!(
            page.iter().map(|n| n.id).collect::<Vec<_>>(),
            vec![first, second]
        );
        let rest = store.get_pending(second, 10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, third);
        assert_eq!(rest[0].collection_id, a);
        assert_eq!(rest[0].r#type, NotificationType::DeleteCollection);
    }

    #[tokio::test]
    async fn test_acknowledge_and_prune() {
        let db = get_new_sqlite_db().await;
        let store = NotificationStore::new(db.clone());
        let collection_id = CollectionUuid::new();
        let id = insert(&db, collection_id, NotificationType::CreateCollection).await;

        let ack = Acknowledgement {
            id,
            collection_id,
            from: "test".to_string(),
        };
        store.acknowledge(&ack).await.unwrap();
        // Idempotent
        store.acknowledge(&ack).await.unwrap();
        assert!(store.get_pending(0, 10).await.unwrap().is_empty());

        let notifications = store.get_notifications(collection_id).await.unwrap();
        assert_eq!(notifications[0].status, NotificationStatus::Acknowledged);

        // Wrong collection for the id
        let err = store
            .acknowledge(&Acknowledgement {
                id,
                collection_id: CollectionUuid::new(),
                from: "test".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationStoreError::NotFound(i) if i == id));

        assert_eq!(store.prune_acknowledged().await.unwrap(), 1);
        assert!(store
            .get_notifications(collection_id)
            .await
            .unwrap()
            .is_empty());
    }
}
