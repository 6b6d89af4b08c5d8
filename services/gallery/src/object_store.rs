use crate::config::S3Config;
use crate::error::{GalleryError, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::path::Path;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Key prefix for photos awaiting review
pub const PENDING_PREFIX: &str = "pending/";
/// Key prefix for published photos
pub const APPROVED_PREFIX: &str = "approved/";

/// Uploads at or above this size go through multipart upload
const MULTIPART_THRESHOLD_BYTES: usize = 8 * 1024 * 1024;
/// S3 requires parts of at least 5MB except the last one
const PART_SIZE_BYTES: usize = 5 * 1024 * 1024;

/// Durable byte storage for gallery images addressed by hierarchical keys
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key`. The caller supplies a collision-resistant key.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<String>;

    /// Relocate an object. Fails when `from` does not exist.
    async fn move_object(&self, from: &str, to: &str) -> Result<()>;

    /// Best-effort delete; missing keys are not an error
    async fn remove(&self, keys: &[String]) -> Result<()>;

    /// Public URL for `key`. Does not check that the object exists.
    fn public_url(&self, key: &str) -> String;

    async fn ping(&self) -> Result<()>;
}

/// S3-compatible object store
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    public_base_url: String,
    delete_concurrency: usize,
}

impl S3ObjectStore {
    pub async fn new(config: &S3Config) -> anyhow::Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());
        let public_base_url = resolve_public_base_url(config);

        info!(
            bucket = %config.bucket,
            region = %config.region,
            public_base_url = %public_base_url,
            "Object store initialized"
        );

        Ok(Self::from_client(
            client,
            &config.bucket,
            &public_base_url,
            config.delete_concurrency,
        ))
    }

    /// Wrap an already configured client
    pub fn from_client(
        client: S3Client,
        bucket: &str,
        public_base_url: &str,
        delete_concurrency: usize,
    ) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            delete_concurrency: delete_concurrency.max(1),
        }
    }

    async fn exists(&self, key: &str) -> std::result::Result<bool, String> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(e.to_string())
                }
            }
        }
    }

    async fn simple_upload(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| storage_write(key, e))?;

        Ok(())
    }

    async fn multipart_upload(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| storage_write(key, e))?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| storage_write(key, "no upload id in response"))?;

        let mut completed_parts = Vec::new();

        for (index, chunk) in data.chunks(PART_SIZE_BYTES).enumerate() {
            let part_number = index as i32 + 1;
            let response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await;

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    self.abort_multipart(key, upload_id).await;
                    return Err(storage_write(key, e));
                }
            };

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| storage_write(key, e))?;

        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            warn!(storage_key = %key, error = %e, "Failed to abort multipart upload");
        }
    }

    async fn delete_one(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| GalleryError::StorageDelete {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        debug!(storage_key = %key, "Object deleted");
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, data), fields(storage_key = %key, size_bytes = data.len()))]
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<String> {
        if data.len() >= MULTIPART_THRESHOLD_BYTES {
            self.multipart_upload(key, data, content_type).await?;
        } else {
            self.simple_upload(key, data, content_type).await?;
        }

        debug!(storage_key = %key, "Object stored");
        Ok(key.to_string())
    }

    /// Copy, verify the copy, then delete the source. A failure between the
    /// copy and the delete leaves the object reachable under both keys.
    #[instrument(skip(self))]
    async fn move_object(&self, from: &str, to: &str) -> Result<()> {
        let move_error = |message: String| GalleryError::StorageMove {
            from: from.to_string(),
            to: to.to_string(),
            message,
        };

        if !self.exists(from).await.map_err(move_error)? {
            return Err(move_error("source object does not exist".to_string()));
        }

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{}", self.bucket, from))
            .key(to)
            .send()
            .await
            .map_err(|e| move_error(e.to_string()))?;

        if !self.exists(to).await.map_err(move_error)? {
            return Err(move_error("copied object not visible".to_string()));
        }

        if let Err(e) = self.delete_one(from).await {
            warn!(error = %e, "Object copied but source could not be deleted");
        }

        debug!(from = %from, to = %to, "Object moved");
        Ok(())
    }

    #[instrument(skip(self), fields(count = keys.len()))]
    async fn remove(&self, keys: &[String]) -> Result<()> {
        let results: Vec<Result<()>> = stream::iter(keys.to_vec())
            .map(|key| async move { self.delete_one(&key).await })
            .buffer_unordered(self.delete_concurrency)
            .collect()
            .await;

        results.into_iter().collect()
    }

    fn public_url(&self, key: &str) -> String {
        join_url(&self.public_base_url, key)
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| GalleryError::StorageWrite {
                key: String::new(),
                message: e.to_string(),
            })?;
        Ok(())
    }
}

fn storage_write(key: &str, e: impl std::fmt::Display) -> GalleryError {
    GalleryError::StorageWrite {
        key: key.to_string(),
        message: e.to_string(),
    }
}

/// Base URL objects are served from: explicit setting, else path-style on a
/// custom endpoint, else the AWS virtual-hosted URL.
pub fn resolve_public_base_url(config: &S3Config) -> String {
    if let Some(ref base) = config.public_base_url {
        return base.trim_end_matches('/').to_string();
    }

    match config.endpoint_url {
        Some(ref endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), config.bucket),
        None => format!(
            "https://{}.s3.{}.amazonaws.com",
            config.bucket, config.region
        ),
    }
}

fn join_url(base: &str, key: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        key.trim_start_matches('/')
    )
}

/// Batch identifier for one submission: UTC epoch milliseconds
pub fn new_batch_id(now: DateTime<Utc>) -> String {
    now.timestamp_millis().to_string()
}

/// Generate a key under the pending prefix
/// Format: pending/{batch_id}/{epoch_ms}_{random}.{ext}
pub fn pending_key(batch_id: &str, file_name: &str, content_type: &str) -> String {
    let random = Uuid::new_v4().simple().to_string();

    format!(
        "{prefix}{batch}/{timestamp}_{random}.{ext}",
        prefix = PENDING_PREFIX,
        batch = sanitize_path_component(batch_id),
        timestamp = Utc::now().timestamp_millis(),
        random = &random[..12],
        ext = file_extension(file_name, content_type),
    )
}

/// The approved-prefix counterpart of a pending key, `None` when the key is
/// not under the pending prefix
pub fn approved_key_for(key: &str) -> Option<String> {
    key.strip_prefix(PENDING_PREFIX)
        .map(|rest| format!("{APPROVED_PREFIX}{rest}"))
}

/// Lowercase extension taken from the file name, else from the content type
pub fn file_extension(file_name: &str, content_type: &str) -> String {
    let from_name = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| sanitize_path_component(&e.to_ascii_lowercase()))
        .filter(|e| !e.is_empty() && e.len() <= 8);

    from_name.unwrap_or_else(|| extension_for_content_type(content_type).to_string())
}

fn extension_for_content_type(content_type: &str) -> &'static str {
    match content_type.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/heic" => "heic",
        "image/avif" => "avif",
        "image/bmp" => "bmp",
        _ => "bin",
    }
}

/// Sanitize a path component to prevent path traversal
pub fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}
