//! S3-compatible object store (AWS S3 or MinIO via endpoint override).

use super::path::{content_type_for_ext, extension_of, original_object_key, sanitize_filename, sanitize_object_path};
use super::ObjectStore;
use crate::config::S3Config;
use crate::error::{AppError, Result};
use crate::retry::RetryStrategy;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, error, info};

/// Transient store failures are retried; logical failures (absent
/// object, rejected path) surface immediately.
fn is_transient(err: &AppError) -> bool {
    matches!(err, AppError::Storage(_))
}

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    retries: RetryStrategy,
}

impl S3ObjectStore {
    /// Build the client and make sure the bucket exists. Bucket
    /// provisioning failures are startup failures.
    pub async fn new(cfg: &S3Config, retries: RetryStrategy) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()));

        if let (Some(access_key), Some(secret_key)) =
            (cfg.access_key_id.as_ref(), cfg.secret_access_key.as_ref())
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "image-service",
            ));
        }

        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = cfg.endpoint.as_ref() {
            builder = builder.endpoint_url(endpoint.clone()).force_path_style(true);
        }

        let store = Self {
            client: Client::from_conf(builder.build()),
            bucket: cfg.bucket.clone(),
            retries,
        };
        store.ensure_bucket().await?;
        Ok(store)
    }

    async fn ensure_bucket(&self) -> Result<()> {
        let exists = self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok();

        if !exists {
            self.client
                .create_bucket()
                .bucket(&self.bucket)
                .send()
                .await
                .map_err(|e| AppError::Storage(format!("failed to create bucket: {e}")))?;
            info!(bucket = %self.bucket, "Created object-store bucket");
        }

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn save_original(&self, filename: &str, data: Bytes) -> Result<String> {
        let safe_name = sanitize_filename(filename);
        let key = original_object_key(&safe_name);
        let content_type = content_type_for_ext(&extension_of(&safe_name));
        let uploaded_at = Utc::now().to_rfc3339();
        let size = data.len();

        self.retries
            .run(is_transient, || {
                let body = data.clone();
                let key = key.clone();
                let safe_name = safe_name.clone();
                let uploaded_at = uploaded_at.clone();
                async move {
                    self.client
                        .put_object()
                        .bucket(&self.bucket)
                        .key(key)
                        .body(ByteStream::from(body))
                        .content_type(content_type)
                        .content_disposition(format!("attachment; filename=\"{}\"", safe_name))
                        .metadata("original-filename", safe_name)
                        .metadata("uploaded-at", uploaded_at)
                        .send()
                        .await
                        .map_err(|e| AppError::Storage(format!("failed to upload file: {e}")))
                }
            })
            .await?;

        debug!(filename = %safe_name, path = %key, size, "File uploaded successfully");
        Ok(key)
    }

    async fn save_processed(&self, path: &str, data: Bytes, content_type: &str) -> Result<()> {
        let key = sanitize_object_path(path)?;
        let size = data.len();

        self.retries
            .run(is_transient, || {
                let body = data.clone();
                let key = key.clone();
                async move {
                    self.client
                        .put_object()
                        .bucket(&self.bucket)
                        .key(key)
                        .body(ByteStream::from(body))
                        .content_type(content_type)
                        .cache_control("public, max-age=31536000")
                        .send()
                        .await
                        .map_err(|e| AppError::Storage(format!("failed to save processed image: {e}")))
                }
            })
            .await?;

        debug!(path = %key, size, content_type, "Processed image saved");
        Ok(())
    }

    async fn get_object(&self, path: &str) -> Result<Bytes> {
        let key = sanitize_object_path(path)?;

        let output = self
            .retries
            .run(is_transient, || {
                let key = key.clone();
                async move {
                    self.client
                        .get_object()
                        .bucket(&self.bucket)
                        .key(&key)
                        .send()
                        .await
                        .map_err(|e| {
                            let service_err = e.into_service_error();
                            if service_err.is_no_such_key() {
                                AppError::ObjectNotFound(key)
                            } else {
                                AppError::Storage(format!("failed to get object: {service_err}"))
                            }
                        })
                }
            })
            .await?;

        let collected = output
            .body
            .collect()
            .await
            .map_err(|e| AppError::Storage(format!("failed to read object body: {e}")))?;
        Ok(collected.into_bytes())
    }

    async fn delete_object(&self, path: &str) -> Result<()> {
        let key = sanitize_object_path(path)?;

        self.retries
            .run(is_transient, || {
                let key = key.clone();
                async move {
                    self.client
                        .delete_object()
                        .bucket(&self.bucket)
                        .key(&key)
                        .send()
                        .await
                        .map_err(|e| AppError::Storage(format!("failed to delete object: {e}")))
                }
            })
            .await?;

        debug!(path = %key, "File deleted");
        Ok(())
    }

    async fn delete_objects_with_prefix(&self, prefix: &str) -> Result<()> {
        let prefix = sanitize_object_path(prefix)?;
        let mut continuation: Option<String> = None;
        let mut failures = 0usize;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix);
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| AppError::Storage(format!("failed to list objects: {e}")))?;

            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                if let Err(e) = self
                    .client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .send()
                    .await
                {
                    failures += 1;
                    error!(object = %key, error = %e, "Failed to delete object");
                }
            }

            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        if failures > 0 {
            return Err(AppError::Storage(format!(
                "failed to delete {failures} objects under {prefix}"
            )));
        }

        info!(prefix = %prefix, "Files with prefix deleted");
        Ok(())
    }
}
