use crate::db::{SqliteCreationError, SqliteDb};
use async_trait::async_trait;
use chroma_config::{
    registry::{Injectable, Registry},
    Configurable,
};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{path::Path, str::FromStr, time::Duration};
use tokio::fs::create_dir_all;

fn default_hash_type() -> MigrationHash {
    MigrationHash::MD5
}

fn default_migration_mode() -> MigrationMode {
    MigrationMode::Apply
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_max_connections() -> u32 {
    8
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SqliteDBConfig {
    #[serde(default = "default_hash_type")]
    pub hash_type: MigrationHash,
    #[serde(default = "default_migration_mode")]
    pub migration_mode: MigrationMode,
    // The SQLite database path
    // If unspecified, then the database is in memory only
    pub url: Option<String>,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    // Ignored in memory, where a single connection holds the database
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for SqliteDBConfig {
    fn default() -> Self {
        SqliteDBConfig {
            hash_type: default_hash_type(),
            migration_mode: default_migration_mode(),
            url: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            max_connections: default_max_connections(),
        }
    }
}

/// Migration mode for the database
/// - Apply: Apply the migrations
/// - Validate: Validate the applied migrations and ensure none are unapplied
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "lowercase")]
pub enum MigrationMode {
    Apply,
    Validate,
}

/// The hash function to use for the migration files
/// - SHA256: Use SHA256 hash
/// - MD5: Use MD5 hash
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationHash {
    SHA256,
    MD5,
}

//////////////////////// Configurable Implementation ////////////////////////

impl Injectable for SqliteDb {}

#[async_trait]
impl Configurable<SqliteDBConfig, SqliteCreationError> for SqliteDb {
    async fn try_from_config(
        config: &SqliteDBConfig,
        registry: &Registry,
    ) -> Result<Self, SqliteCreationError> {
        let conn = match &config.url {
            Some(url) => {
                let path = Path::new(url);
                if let Some(parent) = path.parent() {
                    create_dir_all(parent).await?;
                }
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .pragma("foreign_keys", "ON")
                    .busy_timeout(Duration::from_millis(config.busy_timeout_ms));
                SqlitePoolOptions::new()
                    .max_connections(config.max_connections.max(1))
                    .connect_with(options)
                    .await?
            }
            None => {
                // Each parse of ":memory:" names a distinct shared-cache database
                let options = SqliteConnectOptions::from_str("sqlite::memory:")?
                    .pragma("foreign_keys", "ON")
                    .busy_timeout(Duration::from_millis(config.busy_timeout_ms));
                SqlitePoolOptions::new()
                    .max_lifetime(None)
                    .idle_timeout(None)
                    .max_connections(1)
                    .connect_with(options)
                    .await?
            }
        };

        let db = SqliteDb::new(conn, config.hash_type);

        db.initialize_migrations_table().await?;
        match config.migration_mode {
            MigrationMode::Apply => db.apply_all_migrations().await?,
            MigrationMode::Validate => db.validate_all_migrations().await?,
        }
        tracing::info!(url = ?config.url, "Opened sqlite database");

        registry.register(db.clone());
        Ok(db)
    }
}
