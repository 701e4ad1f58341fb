use crate::config::MigrationHash;
use crate::migrations::{GetSourceMigrationsError, Migration, MigrationDir, MIGRATION_DIRS};
use chroma_error::{ChromaError, ErrorCodes};
use sqlx::sqlite::SqlitePool;
use sqlx::{Executor, Row};
use thiserror::Error;

/// Shared handle to the SQLite pool. Clones share the pool.
#[derive(Clone, Debug)]
pub struct SqliteDb {
    conn: SqlitePool,
    hash_type: MigrationHash,
}

impl SqliteDb {
    pub fn new(conn: SqlitePool, hash_type: MigrationHash) -> Self {
        Self { conn, hash_type }
    }

    pub fn get_conn(&self) -> &SqlitePool {
        &self.conn
    }

    /// Upgrades a freshly opened transaction to `BEGIN IMMEDIATE`, so the
    /// write lock is held from the first read. Required for read-check-write
    /// sequences such as get-or-create and the log position CAS.
    pub async fn begin_immediate<'tx, C>(&self, tx: C) -> Result<(), sqlx::Error>
    where
        C: Executor<'tx, Database = sqlx::Sqlite>,
    {
        tx.execute("END; BEGIN IMMEDIATE;").await?;
        Ok(())
    }

    /// Drops every table and re-applies the migrations, leaving only the
    /// default tenant and database.
    pub async fn reset(&self) -> Result<(), SqliteCreationError> {
        let mut tx = self.conn.begin().await?;
        let tables = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(&mut *tx)
        .await?;
        for row in tables {
            let name: String = row.get("name");
            let sql = format!("DROP TABLE IF EXISTS \"{name}\"");
            (&mut *tx).execute(sql.as_str()).await?;
        }
        tx.commit().await?;

        self.initialize_migrations_table().await?;
        self.apply_all_migrations().await
    }

    //////////////////////// Migrations ////////////////////////

    pub(crate) async fn apply_all_migrations(&self) -> Result<(), SqliteCreationError> {
        let mut all_unapplied_migrations = Vec::new();
        for dir in MIGRATION_DIRS.iter() {
            let applied_migrations = self.get_existing_migrations(dir).await?;
            let source_migrations = dir.get_source_migrations(&self.hash_type)?;
            let unapplied =
                validate_migrations_and_get_unapplied(applied_migrations, source_migrations)?;
            all_unapplied_migrations.extend(unapplied);
        }
        if !all_unapplied_migrations.is_empty() {
            tracing::info!(
                count = all_unapplied_migrations.len(),
                "Applying sqlite migrations"
            );
        }
        self.apply_migrations(all_unapplied_migrations).await?;
        Ok(())
    }

    pub(crate) async fn validate_all_migrations(&self) -> Result<(), SqliteCreationError> {
        for dir in MIGRATION_DIRS.iter() {
            let applied_migrations = self.get_existing_migrations(dir).await?;
            let source_migrations = dir.get_source_migrations(&self.hash_type)?;
            let unapplied =
                validate_migrations_and_get_unapplied(applied_migrations, source_migrations)?;
            if !unapplied.is_empty() {
                return Err(SqliteCreationError::UnappliedMigrationsFound);
            }
        }
        Ok(())
    }

    /// Apply all migrations in a transaction
    async fn apply_migrations(&self, migrations: Vec<Migration>) -> Result<(), sqlx::Error> {
        let mut tx = self.conn.begin().await?;
        for migration in migrations {
            (&mut *tx).execute(migration.sql.as_str()).await?;

            // Bookkeeping
            let query = r#"
                INSERT INTO migrations (dir, version, filename, sql, hash)
                VALUES ($1, $2, $3, $4, $5)
            "#;
            let query = sqlx::query(query)
                .bind(&migration.dir)
                .bind(migration.version)
                .bind(&migration.filename)
                .bind(&migration.sql)
                .bind(&migration.hash);
            (&mut *tx).execute(query).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Idempotent.
    pub(crate) async fn initialize_migrations_table(&self) -> Result<(), sqlx::Error> {
        let query = r#"
            CREATE TABLE IF NOT EXISTS migrations (
                dir TEXT NOT NULL,
                version INTEGER NOT NULL,
                filename TEXT NOT NULL,
                sql TEXT NOT NULL,
                hash TEXT NOT NULL,
                PRIMARY KEY (dir, version)
            )
        "#;
        sqlx::query(query).execute(&self.conn).await?;
        Ok(())
    }

    /// Migrations recorded for `dir`, in ascending version order.
    async fn get_existing_migrations(
        &self,
        dir: &MigrationDir,
    ) -> Result<Vec<Migration>, sqlx::Error> {
        let query = r#"
            SELECT dir, version, filename, sql, hash
            FROM migrations
            WHERE dir = $1
            ORDER BY version ASC
        "#;
        let rows = sqlx::query(query)
            .bind(dir.as_str())
            .fetch_all(&self.conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                Migration::new(
                    row.get("dir"),
                    row.get("filename"),
                    row.get("version"),
                    row.get("sql"),
                    row.get("hash"),
                )
            })
            .collect())
    }
}

/// Checks that the applied migrations are a prefix of the source migrations
/// and returns the remainder.
fn validate_migrations_and_get_unapplied(
    applied_migrations: Vec<Migration>,
    source_migrations: Vec<Migration>,
) -> Result<Vec<Migration>, MigrationValidationError> {
    if applied_migrations.len() > source_migrations.len() {
        return Err(MigrationValidationError::UnknownAppliedMigrations(
            applied_migrations.len() - source_migrations.len(),
        ));
    }
    for (db_migration, source_migration) in
        applied_migrations.iter().zip(source_migrations.iter())
    {
        if db_migration.version != source_migration.version {
            return Err(MigrationValidationError::InconsistentVersion(
                db_migration.version,
                source_migration.version,
            ));
        }
        if db_migration.hash != source_migration.hash {
            return Err(MigrationValidationError::InconsistentHash(
                db_migration.hash.clone(),
                source_migration.hash.clone(),
            ));
        }
    }

    Ok(source_migrations[applied_migrations.len()..].to_vec())
}

//////////////////////// Error Types ////////////////////////

#[derive(Error, Debug)]
pub enum SqliteCreationError {
    #[error(transparent)]
    SqlxError(#[from] sqlx::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    GetSourceMigrationsError(#[from] GetSourceMigrationsError),
    #[error(transparent)]
    MigrationValidationError(#[from] MigrationValidationError),
    #[error("Unapplied migrations found")]
    UnappliedMigrationsFound,
}

impl ChromaError for SqliteCreationError {
    fn code(&self) -> ErrorCodes {
        match self {
            SqliteCreationError::SqlxError(_) => ErrorCodes::Unavailable,
            SqliteCreationError::IoError(e) => e.code(),
            _ => ErrorCodes::FailedPrecondition,
        }
    }
}

#[derive(Error, Debug)]
pub enum MigrationValidationError {
    #[error("Inconsistent version: db={0}, source={1}")]
    InconsistentVersion(i32, i32),
    #[error("Inconsistent hash: db={0}, source={1}")]
    InconsistentHash(String, String),
    #[error("{0} applied migrations have no source file")]
    UnknownAppliedMigrations(usize),
}

pub mod test_utils {
    use super::SqliteDb;
    use crate::config::SqliteDBConfig;
    use chroma_config::{registry::Registry, Configurable};
    use tempfile::TempDir;

    /// Fresh migrated in-memory database, isolated from every other call.
    pub async fn get_new_sqlite_db() -> SqliteDb {
        SqliteDb::try_from_config(&SqliteDBConfig::default(), &Registry::new())
            .await
            .expect("Expect in-memory sqlite db to be created")
    }

    /// A database path inside a new temporary directory. The directory is
    /// removed when the returned guard drops.
    pub fn new_test_db_persist_path() -> (TempDir, String) {
        let dir = tempfile::tempdir().expect("Expect temp dir to be created");
        let path = dir.path().join("chroma.sqlite3");
        (dir, path.to_string_lossy().to_string())
    }

    /// Fresh migrated file-backed database, for tests that need several
    /// connections at once.
    pub async fn get_new_file_sqlite_db() -> (TempDir, SqliteDb) {
        let (dir, url) = new_test_db_persist_path();
        let config = SqliteDBConfig {
            url: Some(url),
            ..Default::default()
        };
        let db = SqliteDb::try_from_config(&config, &Registry::new())
            .await
            .expect("Expect file sqlite db to be created");
        (dir, db)
    }
}
