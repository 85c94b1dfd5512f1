//! S3-compatible object storage (AWS S3, R2, MinIO).

use std::{fmt, path::Path};

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ObjectStore, validate_key};
use crate::error::StorageError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services.
    pub endpoint: Option<String>,
    /// Path-style addressing (MinIO and most self-hosted endpoints).
    pub force_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "auto".into(),
            endpoint: None,
            force_path_style: false,
        }
    }
}

/// Credentials come from the standard AWS provider chain.
pub struct S3ObjectStore {
    bucket: String,
    client: aws_sdk_s3::Client,
}

impl fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl S3ObjectStore {
    pub async fn from_config(config: &S3Config) -> Result<Self, StorageError> {
        use aws_sdk_s3::config::{Builder, Region};

        if config.bucket.trim().is_empty() {
            return Err(StorageError::Backend("S3 bucket is not configured".into()));
        }

        let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let mut builder = Builder::from(&sdk_config)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Ok(Self {
            bucket: config.bucket.clone(),
            client: aws_sdk_s3::Client::from_conf(builder.build()),
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload(
        &self,
        source: &Path,
        key: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        validate_key(key)?;
        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        debug!(bucket = %self.bucket, key, content_type, "uploaded object");
        Ok(key.to_string())
    }
}
