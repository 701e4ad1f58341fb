use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
/// The configuration for the chosen storage.
/// # Options
/// - S3: An S3 compatible object store.
/// - Local: A directory on local disk, for development and tests.
pub enum StorageConfig {
    // case-insensitive
    #[serde(alias = "s3")]
    S3(S3StorageConfig),
    #[serde(alias = "local")]
    Local(LocalStorageConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Local(LocalStorageConfig::default())
    }
}

#[derive(Deserialize, Serialize, PartialEq, Debug, Clone)]
pub enum S3CredentialsConfig {
    #[serde(alias = "minio")]
    Minio,
    #[serde(alias = "localhost")]
    Localhost,
    #[serde(alias = "aws")]
    AWS,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
/// The configuration for the s3 storage type
/// # Fields
/// - bucket: The name of the bucket to use.
/// - credentials: Where credentials come from. Minio and Localhost use the
///   development minio deployment and create the bucket on startup.
pub struct S3StorageConfig {
    pub bucket: String,
    pub credentials: S3CredentialsConfig,
    #[serde(default = "S3StorageConfig::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "S3StorageConfig::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "S3StorageConfig::default_request_retry_count")]
    pub request_retry_count: u32,
}

impl S3StorageConfig {
    fn default_connect_timeout_ms() -> u64 {
        5000
    }

    fn default_request_timeout_ms() -> u64 {
        30000
    }

    fn default_request_retry_count() -> u32 {
        3
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
/// The configuration for the local storage type
/// # Fields
/// - root: The root directory to use for storage.
/// # Notes
/// This is not intended to be used in production.
pub struct LocalStorageConfig {
    #[serde(default = "LocalStorageConfig::default_root")]
    pub root: String,
}

impl LocalStorageConfig {
    fn default_root() -> String {
        "./chroma_storage".to_string()
    }
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        LocalStorageConfig {
            root: LocalStorageConfig::default_root(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s3_config_defaults() {
        let config: StorageConfig = serde_json::from_str(
            r#"{"s3": {"bucket": "chroma-storage", "credentials": "minio"}}"#,
        )
        .unwrap();
        let StorageConfig::S3(s3) = config else {
            panic!("expected s3 config");
        };
        assert_eq!(s3.bucket, "chroma-storage");
        assert_eq!(s3.credentials, S3CredentialsConfig::Minio);
        assert_eq!(s3.connect_timeout_ms, 5000);
        assert_eq!(s3.request_timeout_ms, 30000);
        assert_eq!(s3.request_retry_count, 3);
    }

    #[test]
    fn test_local_config_alias() {
        let config: StorageConfig =
            serde_json::from_str(r#"{"local": {"root": "/tmp/chroma"}}"#).unwrap();
        assert_eq!(
            config,
            StorageConfig::Local(LocalStorageConfig {
                root: "/tmp/chroma".to_string()
            })
        );
    }
}
