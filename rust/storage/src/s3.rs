// Thin wrapper around the AWS SDK client. Objects in the coordinator's
// metastore are small, so every call moves the whole object in one request.

use crate::config::{S3CredentialsConfig, StorageConfig};
use crate::metrics::StorageMetrics;
use crate::{StorageConfigError, StorageError};
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfigBuilder;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::create_bucket::CreateBucketError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use chroma_config::registry::Registry;
use chroma_config::Configurable;
use chroma_error::ChromaError;
use chroma_tracing::util::{StopWatchUnit, Stopwatch};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct S3Storage {
    pub(super) bucket: String,
    pub(super) client: aws_sdk_s3::Client,
    metrics: StorageMetrics,
}

impl S3Storage {
    pub fn new(bucket: &str, client: aws_sdk_s3::Client) -> S3Storage {
        S3Storage {
            bucket: bucket.to_string(),
            client,
            metrics: StorageMetrics::default(),
        }
    }

    pub(super) async fn create_bucket(&self) -> Result<(), StorageError> {
        let res = self
            .client
            .create_bucket()
            .bucket(self.bucket.clone())
            .send()
            .await;
        match res {
            Ok(_) => {
                tracing::info!(bucket = %self.bucket, "Created bucket");
                Ok(())
            }
            Err(SdkError::ServiceError(err)) => match err.into_err() {
                CreateBucketError::BucketAlreadyExists(msg) => {
                    tracing::debug!(bucket = %self.bucket, "Bucket already exists: {msg}");
                    Ok(())
                }
                CreateBucketError::BucketAlreadyOwnedByYou(msg) => {
                    tracing::debug!(bucket = %self.bucket, "Bucket already owned: {msg}");
                    Ok(())
                }
                err => {
                    tracing::error!(bucket = %self.bucket, error = %err, "Failed to create bucket");
                    Err(StorageError::Generic {
                        source: Arc::new(err),
                    })
                }
            },
            Err(err) => {
                tracing::error!(bucket = %self.bucket, error = %err, "Failed to create bucket");
                Err(StorageError::Generic {
                    source: Arc::new(err),
                })
            }
        }
    }

    pub async fn get(&self, key: &str) -> Result<Arc<Vec<u8>>, StorageError> {
        self.metrics.s3_get_count.add(1, &[]);
        let _stopwatch = Stopwatch::new(&self.metrics.s3_get_latency_ms, &[], StopWatchUnit::Millis);

        let res = self
            .client
            .get_object()
            .bucket(self.bucket.clone())
            .key(key)
            .send()
            .await;
        let output = match res {
            Ok(output) => output,
            Err(SdkError::ServiceError(err)) => {
                let inner = err.into_err();
                return match inner {
                    GetObjectError::NoSuchKey(_) => Err(StorageError::NotFound {
                        path: key.to_string(),
                        source: Arc::new(inner),
                    }),
                    _ => Err(StorageError::Generic {
                        source: Arc::new(inner),
                    }),
                };
            }
            Err(err) => {
                return Err(StorageError::Generic {
                    source: Arc::new(err),
                })
            }
        };
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|err| StorageError::Generic {
                source: Arc::new(err),
            })?
            .into_bytes();
        Ok(Arc::new(bytes.to_vec()))
    }

    pub async fn put_bytes(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.metrics.s3_put_count.add(1, &[]);
        let _stopwatch = Stopwatch::new(&self.metrics.s3_put_latency_ms, &[], StopWatchUnit::Millis);

        self.client
            .put_object()
            .bucket(self.bucket.clone())
            .key(key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|err| {
                self.metrics.s3_put_error_count.add(1, &[]);
                tracing::error!(key, error = %err, "Failed to put object");
                StorageError::Generic {
                    source: Arc::new(err),
                }
            })?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.metrics.s3_delete_count.add(1, &[]);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| StorageError::Generic {
                source: Arc::new(err),
            })?;
        Ok(())
    }

    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.metrics.s3_list_count.add(1, &[]);
        let _stopwatch =
            Stopwatch::new(&self.metrics.s3_list_latency_ms, &[], StopWatchUnit::Millis);

        let mut outs = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .set_max_keys(Some(1000))
            .prefix(prefix)
            .into_paginator()
            .send();
        let mut paths = vec![];
        while let Some(result) = outs.next().await {
            let output = result.map_err(|err| StorageError::Generic {
                source: Arc::new(err),
            })?;
            for object in output.contents() {
                if let Some(key) = object.key() {
                    paths.push(key.to_string());
                } else {
                    return Err(StorageError::Message {
                        message: format!("list on prefix {:?} led to empty key", prefix),
                    });
                }
            }
        }
        Ok(paths)
    }
}

#[async_trait]
impl Configurable<StorageConfig> for S3Storage {
    async fn try_from_config(
        config: &StorageConfig,
        _registry: &Registry,
    ) -> Result<Self, Box<dyn ChromaError>> {
        let StorageConfig::S3(s3_config) = config else {
            return Err(Box::new(StorageConfigError::InvalidStorageConfig));
        };
        let timeout_config = TimeoutConfigBuilder::default()
            .connect_timeout(Duration::from_millis(s3_config.connect_timeout_ms))
            .operation_timeout(Duration::from_millis(s3_config.request_timeout_ms))
            .build();
        let retry_config = RetryConfig::standard().with_max_attempts(s3_config.request_retry_count);

        let client = match &s3_config.credentials {
            S3CredentialsConfig::Minio | S3CredentialsConfig::Localhost => {
                // Development credentials for the minio deployment
                let cred = aws_sdk_s3::config::Credentials::new(
                    "minio",
                    "minio123",
                    None,
                    None,
                    "loaded-from-env",
                );
                let endpoint_url = match s3_config.credentials {
                    S3CredentialsConfig::Localhost => "http://localhost:9000",
                    _ => "http://minio.chroma:9000",
                };
                let config = aws_sdk_s3::config::Builder::new()
                    .endpoint_url(endpoint_url)
                    .credentials_provider(cred)
                    .behavior_version_latest()
                    .region(aws_sdk_s3::config::Region::new("us-east-1"))
                    .force_path_style(true)
                    .timeout_config(timeout_config)
                    .retry_config(retry_config)
                    .build();
                aws_sdk_s3::Client::from_conf(config)
            }
            S3CredentialsConfig::AWS => {
                let config = aws_config::load_from_env().await;
                let config = config
                    .to_builder()
                    .timeout_config(timeout_config)
                    .retry_config(retry_config)
                    .build();
                aws_sdk_s3::Client::new(&config)
            }
        };
        let storage = S3Storage::new(&s3_config.bucket, client);
        // The minio deployments are development only, so the bucket is created here.
        if !matches!(s3_config.credentials, S3CredentialsConfig::AWS) {
            storage
                .create_bucket()
                .await
                .map_err(|e| Box::new(StorageConfigError::FailedToCreateBucket(e)) as Box<dyn ChromaError>)?;
        }
        Ok(storage)
    }
}
