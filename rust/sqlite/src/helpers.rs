use crate::table::MetadataTable;
use chroma_error::{ChromaError, ErrorCodes, WrappedSqlxError};
use chroma_types::{Metadata, MetadataValue, UpdateMetadata};
use sea_query::{Expr, Iden, InsertStatement, Nullable, OnConflict, Query, SimpleExpr, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Error constructing query: {0}")]
    QueryError(#[from] sea_query::error::Error),
    #[error("Error executing query: {0}")]
    SqlxError(#[from] WrappedSqlxError),
}

impl ChromaError for MetadataError {
    fn code(&self) -> ErrorCodes {
        match self {
            MetadataError::QueryError(_) => ErrorCodes::Internal,
            MetadataError::SqlxError(e) => e.code(),
        }
    }
}

fn construct_upsert_metadata_stmt<
    Table: MetadataTable + Iden + 'static,
    Id: Into<SimpleExpr> + Clone,
>(
    id: Id,
    metadata: Metadata,
) -> Result<InsertStatement, sea_query::error::Error> {
    let mut stmt = Query::insert();
    stmt.into_table(Table::table_name())
        .columns([
            Table::id_column(),
            Table::key_column(),
            Table::str_value_column(),
            Table::int_value_column(),
            Table::float_value_column(),
        ])
        .on_conflict(
            OnConflict::columns([Table::id_column(), Table::key_column()])
                .update_columns([
                    Table::str_value_column(),
                    Table::int_value_column(),
                    Table::float_value_column(),
                ])
                .to_owned(),
        );
    for (key, val) in metadata {
        stmt.values(match val {
            MetadataValue::Int(i) => [
                id.clone().into(),
                key.into(),
                String::null().into(),
                i.into(),
                f64::null().into(),
            ],
            MetadataValue::Float(f) => [
                id.clone().into(),
                key.into(),
                String::null().into(),
                i64::null().into(),
                f.into(),
            ],
            MetadataValue::Str(s) => [
                id.clone().into(),
                key.into(),
                s.into(),
                i64::null().into(),
                f64::null().into(),
            ],
        })?;
    }
    Ok(stmt)
}

/// Upserts the non-null keys of `metadata` and deletes the keys set to `None`.
pub async fn update_metadata<
    Table: MetadataTable + Iden + 'static,
    Id: Into<SimpleExpr> + Clone,
    C,
>(
    conn: &mut C,
    id: Id,
    metadata: UpdateMetadata,
) -> Result<(), MetadataError>
where
    for<'connection> &'connection mut C: sqlx::Executor<'connection, Database = sqlx::Sqlite>,
{
    let mut deleted_keys = Vec::new();
    let mut metadata_not_null = HashMap::new();
    for (key, value) in metadata {
        match (&value).try_into() {
            Ok(val) => {
                metadata_not_null.insert(key, val);
            }
            Err(_) => deleted_keys.push(key),
        }
    }
    if !deleted_keys.is_empty() {
        let (sql, values) = Query::delete()
            .from_table(Table::table_name())
            .and_where(
                Expr::col(Table::id_column())
                    .eq(id.clone())
                    .and(Expr::col(Table::key_column()).is_in(deleted_keys)),
            )
            .to_owned()
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&sql, values)
            .execute(&mut *conn)
            .await
            .map_err(WrappedSqlxError)?;
    }
    if !metadata_not_null.is_empty() {
        let (sql, values) = construct_upsert_metadata_stmt::<Table, Id>(id, metadata_not_null)?
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&sql, values)
            .execute(conn)
            .await
            .map_err(WrappedSqlxError)?;
    }
    Ok(())
}

pub async fn delete_metadata<
    Table: MetadataTable + Iden + 'static,
    Id: Into<SimpleExpr> + Clone,
    C,
>(
    conn: &mut C,
    id: Id,
) -> Result<(), MetadataError>
where
    for<'connection> &'connection mut C: sqlx::Executor<'connection, Database = sqlx::Sqlite>,
{
    let (sql, values) = Query::delete()
        .from_table(Table::table_name())
        .and_where(Expr::col(Table::id_column()).eq(id))
        .to_owned()
        .build_sqlx(SqliteQueryBuilder);

    sqlx::query_with(&sql, values)
        .execute(conn)
        .await
        .map_err(WrappedSqlxError)?;

    Ok(())
}

/// Folds joined metadata columns back into a map. Rows whose key is NULL
/// (an entity with no metadata under a LEFT JOIN) are skipped.
pub fn metadata_from_rows<'row>(rows: impl Iterator<Item = &'row SqliteRow>) -> Option<Metadata> {
    let metadata: Metadata = rows
        .filter_map(|row| {
            let key = row.get::<Option<String>, _>("key")?;

            if let Some(str_value) = row.get::<Option<String>, _>("str_value") {
                Some((key, MetadataValue::Str(str_value)))
            } else if let Some(int_value) = row.get::<Option<i64>, _>("int_value") {
                Some((key, MetadataValue::Int(int_value)))
            } else {
                row.get::<Option<f64>, _>("float_value")
                    .map(|float_value| (key, MetadataValue::Float(float_value)))
            }
        })
        .collect();

    if metadata.is_empty() {
        None
    } else {
        Some(metadata)
    }
}
