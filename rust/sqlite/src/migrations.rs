use crate::config::MigrationHash;
use regex::Regex;
use rust_embed::Embed;
use sha2::{Digest, Sha256};
use std::{borrow::Cow, sync::LazyLock};
use thiserror::Error;

///////////// Migration Types //////////////

// A migration is a single SQL file that is executed to update the database schema
// ## Fields
// - dir: The directory the migration file is embedded from. One of "sysdb", "log"
// - filename: The name of the migration file
// - version: The version of the migration file, unique within its dir
// - sql: The SQL content of the migration file
// - hash: The hash of the migration file content
#[derive(Clone, Debug)]
pub(crate) struct Migration {
    pub(crate) dir: String,
    pub(crate) filename: String,
    pub(crate) version: i32,
    pub(crate) sql: String,
    pub(crate) hash: String,
}

impl Migration {
    pub(crate) fn new(
        dir: String,
        filename: String,
        version: i32,
        sql: String,
        hash: String,
    ) -> Self {
        Self {
            dir,
            filename,
            version,
            sql,
            hash,
        }
    }
}

// A migration dir is a directory that contains migration files
// for a given subsystem
pub(crate) enum MigrationDir {
    SysDb,
    Log,
}

pub(crate) const MIGRATION_DIRS: [MigrationDir; 2] = [MigrationDir::SysDb, MigrationDir::Log];

#[derive(Error, Debug)]
pub enum GetSourceMigrationsError {
    #[error(transparent)]
    ParseMigrationFilenameError(#[from] ParseMigrationFilenameError),
    #[error("{0}")]
    NoSuchMigrationFile(String),
    #[error("Failed to get migration file: {0}")]
    FailedToGetMigrationFile(String),
}

impl MigrationDir {
    pub(crate) fn as_str(&self) -> &str {
        match self {
            Self::SysDb => "sysdb",
            Self::Log => "log",
        }
    }

    fn iter(&self) -> Box<dyn Iterator<Item = Cow<'static, str>>> {
        match self {
            Self::SysDb => Box::new(SysDbMigrationsFolder::iter()),
            Self::Log => Box::new(LogMigrationsFolder::iter()),
        }
    }

    fn get_file(&self, name: &str) -> Option<rust_embed::EmbeddedFile> {
        match self {
            Self::SysDb => SysDbMigrationsFolder::get(name),
            Self::Log => LogMigrationsFolder::get(name),
        }
    }

    /// Migrations embedded in the binary, sorted by version in ascending order.
    pub(crate) fn get_source_migrations(
        &self,
        migration_hash: &MigrationHash,
    ) -> Result<Vec<Migration>, GetSourceMigrationsError> {
        let mut migrations = Vec::new();

        for migration_name in self.iter() {
            let (version, _) = parse_migration_filename(&migration_name)?;
            let sql = match self.get_file(&migration_name) {
                Some(file) => std::str::from_utf8(&file.data)
                    .map_err(|_| {
                        GetSourceMigrationsError::FailedToGetMigrationFile(
                            migration_name.to_string(),
                        )
                    })?
                    // Remove CR character on Windows
                    .replace('\r', ""),
                None => {
                    return Err(GetSourceMigrationsError::NoSuchMigrationFile(
                        migration_name.to_string(),
                    ))
                }
            };
            let hash = match migration_hash {
                MigrationHash::SHA256 => {
                    let mut hasher = Sha256::new();
                    hasher.update(sql.as_bytes());
                    format!("{:x}", hasher.finalize())
                }
                MigrationHash::MD5 => {
                    let hash = md5::compute(sql.as_bytes());
                    format!("{:x}", hash)
                }
            };
            migrations.push(Migration::new(
                self.as_str().to_string(),
                migration_name.to_string(),
                version,
                sql,
                hash,
            ));
        }

        migrations.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(migrations)
    }
}

///////////// MigrationDir Helpers //////////////

#[derive(Error, Debug)]
pub enum ParseMigrationFilenameError {
    #[error("Invalid migration filename: {0}")]
    InvalidMigrationFilename(String),
    #[error("Failed to find version")]
    FailedToFindVersion,
    #[error("Failed to find scope")]
    FailedToFindScope,
}

// Format is <version>-<name>.<scope>.sql, e.g. 00001-tenants.sqlite.sql
// Returns the version and scope
fn parse_migration_filename(filename: &str) -> Result<(i32, String), ParseMigrationFilenameError> {
    let groups = MIGRATION_FILENAME_REGEX.captures(filename).ok_or_else(|| {
        ParseMigrationFilenameError::InvalidMigrationFilename(filename.to_string())
    })?;

    let version = groups
        .get(1)
        .ok_or(ParseMigrationFilenameError::FailedToFindVersion)?
        .as_str()
        .parse::<i32>()
        .map_err(|e| ParseMigrationFilenameError::InvalidMigrationFilename(e.to_string()))?;

    let scope = groups
        .get(3)
        .ok_or(ParseMigrationFilenameError::FailedToFindScope)?
        .as_str()
        .to_string();

    Ok((version, scope))
}

static MIGRATION_FILENAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)-(.+)\.(.+)\.sql$").expect("Failed to compile regex"));

///////////// Rust Embed Migrations Data //////////////

#[derive(Embed)]
#[folder = "./migrations/sysdb/"]
#[include = "*.sql"]
struct SysDbMigrationsFolder;

#[derive(Embed)]
#[folder = "./migrations/log/"]
#[include = "*.sql"]
struct LogMigrationsFolder;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_migration_filename() {
        assert_eq!(
            parse_migration_filename("00002-collections-segments.sqlite.sql").unwrap(),
            (2, "sqlite".to_string())
        );
        assert!(matches!(
            parse_migration_filename("collections.sql"),
            Err(ParseMigrationFilenameError::InvalidMigrationFilename(_))
        ));
    }

    #[test]
    fn test_source_migrations_are_sorted_and_hashed() {
        let migrations = MigrationDir::SysDb
            .get_source_migrations(&MigrationHash::MD5)
            .unwrap();
        let versions: Vec<i32> = migrations.iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort();
        assert_eq!(versions, sorted);
        assert!(migrations.iter().all(|m| m.hash.len() == 32));

        let sha = MigrationDir::Log
            .get_source_migrations(&MigrationHash::SHA256)
            .unwrap();
        assert!(sha.iter().all(|m| m.hash.len() == 64));
    }
}
