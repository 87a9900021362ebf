//! S3-compatible blob storage
//!
//! Wraps the AWS SDK for S3-compatible storage access.

use std::path::{Path, PathBuf};

use aws_config::BehaviorVersion;
use tokio::io::AsyncWriteExt;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};

use super::{scratch_path, BlobBackend};
use crate::config::StorageConfig;
use crate::error::StorageError;

/// Blob backend for MinIO, R2, B2 and AWS S3
#[derive(Clone)]
pub struct S3BlobBackend {
    client: Client,
    bucket: String,
    prefix: String,
    temp_dir: PathBuf,
}

impl S3BlobBackend {
    /// Create a new backend from configuration
    pub async fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "big-upload",
        );

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO and other S3-compatible services
            .build();

        let client = Client::from_conf(s3_config);

        let bucket = config.bucket.clone();
        match client.head_bucket().bucket(&bucket).send().await {
            Ok(_) => {
                tracing::info!("Connected to S3 bucket: {}", bucket);
            }
            Err(e) => {
                tracing::warn!(
                    "Could not verify bucket {}: {}. Will attempt operations anyway.",
                    bucket,
                    e
                );
            }
        }

        Ok(Self {
            client,
            bucket,
            prefix: config.prefix.trim_matches('/').to_string(),
            temp_dir: std::env::temp_dir(),
        })
    }

    fn object_key(&self, key: &str) -> String {
        object_key(&self.prefix, key)
    }

    async fn exists(&self, object_key: &str) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(object_key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().map(|se| se.is_not_found()).unwrap_or(false) => {
                Ok(false)
            }
            Err(e) => Err(StorageError::SdkError(format!(
                "Failed to head object {}: {}",
                object_key, e
            ))),
        }
    }
}

fn object_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", prefix, key)
    }
}

#[async_trait::async_trait]
impl BlobBackend for S3BlobBackend {
    async fn copy_in(&self, local_path: &Path, key: &str) -> Result<(), StorageError> {
        let object_key = self.object_key(key);
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| StorageError::SdkError(format!("Failed to read {}: {}", local_path.display(), e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .content_type("application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::SdkError(format!("Failed to put object {}: {}", object_key, e)))?;

        Ok(())
    }

    async fn copy_out(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        let object_key = self.object_key(key);
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) {
                    StorageError::ObjectNotFound(key.to_string())
                } else {
                    StorageError::SdkError(format!("Failed to get object {}: {}", object_key, e))
                }
            })?;

        let mut reader = response.body.into_async_read();
        let mut file = tokio::fs::File::create(local_path).await?;
        tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let object_key = self.object_key(key);

        // DeleteObject succeeds on missing keys, so check first
        if !self.exists(&object_key).await? {
            return Err(StorageError::ObjectNotFound(key.to_string()));
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| StorageError::SdkError(format!("Failed to delete object {}: {}", object_key, e)))?;

        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        scratch_path(&self.temp_dir)
    }
}
