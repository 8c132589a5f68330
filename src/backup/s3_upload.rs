// colonybackup/src/backup/s3_upload.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::primitives::ByteStream;
use std::path::Path;
use tracing::{error, info};

use crate::config::S3Config;
use crate::errors::{BackupError, Result};

/// Copies an artifact to object storage. Never removes the local copy and
/// never retries; the caller decides what to do with a failure.
#[async_trait]
pub trait RemoteArchiver: Send + Sync {
    /// Streams the file at `source` to `bucket/key`.
    async fn upload(&self, source: &Path, bucket: &str, key: &str) -> Result<()>;
}

/// S3-compatible object storage (AWS, DigitalOcean Spaces, MinIO).
pub struct S3Archiver {
    client: s3::Client,
}

impl S3Archiver {
    /// Static credentials from configuration when given, otherwise the
    /// ambient AWS credential chain.
    pub async fn new(config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        if let Some((access_key_id, secret_access_key)) = &config.credentials {
            loader = loader.credentials_provider(s3::config::Credentials::new(
                access_key_id,
                secret_access_key,
                None,     // session_token
                None,     // expiry
                "Static", // provider_name
            ));
        }
        let sdk_config = loader.load().await;
        S3Archiver {
            client: s3::Client::new(&sdk_config),
        }
    }
}

#[async_trait]
impl RemoteArchiver for S3Archiver {
    async fn upload(&self, source: &Path, bucket: &str, key: &str) -> Result<()> {
        let body = ByteStream::from_path(source).await.map_err(|e| {
            error!(bucket, key, error = ?e, "cannot open backup for upload");
            BackupError::Upload(format!("cannot read {} for upload", key))
        })?;
        info!(bucket, key, bytes = ?body.size_hint().1, "uploading backup to S3");
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                error!(bucket, key, error = ?e, "S3 upload failed");
                BackupError::Upload(format!("S3 rejected upload to bucket {}", bucket))
            })?;
        info!(bucket, key, "✓ backup uploaded to S3");
        Ok(())
    }
}

/// S3 bucket naming rules: 3-63 chars of lowercase letters, digits, dots and
/// hyphens, starting and ending with a letter or digit.
pub fn validate_bucket_name(bucket: &str) -> Result<()> {
    let len_ok = (3..=63).contains(&bucket.len());
    let chars_ok = bucket
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-');
    let ends_ok = bucket
        .chars()
        .next()
        .zip(bucket.chars().last())
        .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());
    if len_ok && chars_ok && ends_ok && !bucket.contains("..") {
        Ok(())
    } else {
        let shown: String = bucket.chars().take(63).collect();
        Err(BackupError::InvalidBucket(format!("{:?}", shown)))
    }
}
