//! Ingest coordinator: the upload transaction plus the read/delete use
//! cases behind the HTTP handlers.
//!
//! Upload spans four externals (object store, database, broker, status
//! row). There is no cross-store transaction; each step compensates on
//! failure so an accepted upload is never silently lost: a failed
//! metadata insert deletes the stored object, a failed publish parks the
//! image in `failed`.

use crate::db::MetadataStore;
use crate::error::{AppError, Result};
use crate::kafka::TaskPublisher;
use crate::models::{
    Image, ImageFormat, ImageStatus, OperationParams, ProcessingTask, ResizeParams,
    ThumbnailParams, MAX_UPLOAD_SIZE,
};
use crate::storage::ObjectStore;
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Bytes of the payload head inspected for magic-byte detection.
const SNIFF_LEN: usize = 512;

const DEFAULT_BUCKET: &str = "images";

#[derive(Clone)]
pub struct IngestService {
    repo: Arc<dyn MetadataStore>,
    store: Arc<dyn ObjectStore>,
    publisher: Arc<dyn TaskPublisher>,
}

impl IngestService {
    pub fn new(
        repo: Arc<dyn MetadataStore>,
        store: Arc<dyn ObjectStore>,
        publisher: Arc<dyn TaskPublisher>,
    ) -> Self {
        Self {
            repo,
            store,
            publisher,
        }
    }

    /// The ingest transaction: gate, sniff, persist object, persist
    /// metadata, publish, transition. Returns the image with its final
    /// status.
    pub async fn upload(
        &self,
        data: Bytes,
        filename: &str,
        declared_content_type: &str,
        operations: Vec<OperationParams>,
    ) -> Result<Image> {
        let size = data.len();
        info!(filename, size, "Starting image upload");

        if size > MAX_UPLOAD_SIZE {
            warn!(filename, size, "File too large");
            return Err(AppError::FileTooLarge(format!(
                "max size is {} bytes",
                MAX_UPLOAD_SIZE
            )));
        }

        // Trust the payload head, not the declared type.
        let head = &data[..data.len().min(SNIFF_LEN)];
        let format = match image::guess_format(head) {
            Ok(detected) => detected,
            Err(_) => {
                warn!(filename, declared_content_type, "Invalid file signature");
                return Err(AppError::InvalidFileFormat(
                    "file is not an image".to_string(),
                ));
            }
        };
        let (format, mime_type) = canonical_format(format);

        let image_id = Uuid::new_v4();

        let original_path = self.store.save_original(filename, data).await?;

        let now = Utc::now();
        let mut image = Image {
            id: image_id,
            original_filename: filename.to_string(),
            original_size: size as i64,
            mime_type: mime_type.to_string(),
            status: ImageStatus::Uploaded.as_str().to_string(),
            original_path: original_path.clone(),
            bucket: DEFAULT_BUCKET.to_string(),
            created_at: now,
            updated_at: now,
        };

        if let Err(err) = self.repo.save(&image).await {
            error!(image_id = %image_id, error = %err, "Failed to save image metadata");
            // Compensation: the object must not outlive the transaction
            // that failed to record it.
            if let Err(del_err) = self.store.delete_object(&original_path).await {
                error!(path = %original_path, error = %del_err, "Failed to cleanup original file after error");
            }
            return Err(err);
        }

        let operations = if operations.is_empty() {
            default_operations()
        } else {
            operations
        };

        let task = ProcessingTask {
            id: Uuid::new_v4(),
            image_id,
            original_path,
            bucket: DEFAULT_BUCKET.to_string(),
            operations,
            format: Some(format),
        };

        if let Err(err) = self.publish_task(&task).await {
            error!(image_id = %image_id, error = %err, "Failed to send task to broker");
            if let Err(update_err) = self.repo.update_status(image_id, ImageStatus::Failed).await {
                error!(image_id = %image_id, error = %update_err, "Failed to update status to failed");
            }
            return Err(err);
        }

        // Idempotent: if this fails the worker performs the transition
        // on first consumption.
        match self.repo.update_status(image_id, ImageStatus::Processing).await {
            Ok(()) => image.status = ImageStatus::Processing.as_str().to_string(),
            Err(err) => {
                warn!(image_id = %image_id, error = %err, "Failed to update status to processing");
            }
        }

        info!(image_id = %image_id, filename, "Image uploaded and queued for processing");
        Ok(image)
    }

    async fn publish_task(&self, task: &ProcessingTask) -> Result<()> {
        let payload =
            serde_json::to_vec(task).map_err(|e| AppError::MessageQueue(e.to_string()))?;
        self.publisher
            .publish_task(&task.image_id.to_string(), &payload)
            .await
    }

    /// Original bytes when `operation` is empty, otherwise the derived
    /// variant for `(id, operation)`.
    pub async fn get_image(&self, id: Uuid, operation: &str) -> Result<(Image, Bytes)> {
        debug!(image_id = %id, operation, "Getting image");
        let image = self.repo.get_by_id(id).await?;

        if operation.is_empty() {
            let data = self.store.get_object(&image.original_path).await?;
            return Ok((image, data));
        }

        let processed = self
            .repo
            .get_processed_image_by_operation(id, operation)
            .await?
            .ok_or(AppError::ProcessedImageNotFound)?;

        let data = self.store.get_object(&processed.path).await?;
        Ok((image, data))
    }

    pub async fn get_status(&self, id: Uuid) -> Result<ImageStatus> {
        debug!(image_id = %id, "Getting image status");
        let image = self.repo.get_by_id(id).await?;
        Ok(image.status())
    }

    /// Cascade delete: artifacts and the original go first (best
    /// effort), then the rows, then the soft-delete transition. Only the
    /// final status write is a hard error.
    pub async fn delete_image(&self, id: Uuid) -> Result<()> {
        info!(image_id = %id, "Deleting image");
        let image = self.repo.get_by_id(id).await?;

        if let Err(err) = self.store.delete_object(&image.original_path).await {
            error!(path = %image.original_path, error = %err, "Failed to delete original file");
        }

        // Artifact keys are recorded per row; the prefix sweep catches
        // anything a partially failed task left behind.
        match self.repo.get_processed_images(id).await {
            Ok(processed) => {
                for artifact in processed {
                    if let Err(err) = self.store.delete_object(&artifact.path).await {
                        error!(path = %artifact.path, error = %err, "Failed to delete processed file");
                    }
                }
            }
            Err(err) => {
                error!(image_id = %id, error = %err, "Failed to list processed images for deletion");
            }
        }
        if let Err(err) = self
            .store
            .delete_objects_with_prefix(&format!("processed/{id}/"))
            .await
        {
            error!(image_id = %id, error = %err, "Failed to delete processed files");
        }

        if let Err(err) = self.repo.delete_processed_images(id).await {
            error!(image_id = %id, error = %err, "Failed to delete processed images from DB");
        }

        self.repo.delete(id).await?;

        info!(image_id = %id, "Image deleted successfully");
        Ok(())
    }

    pub async fn list_images(&self, limit: i64, offset: i64) -> Result<Vec<Image>> {
        self.repo.list(limit, offset).await
    }
}

/// Pipeline injected when the caller requests no operations.
pub fn default_operations() -> Vec<OperationParams> {
    vec![
        OperationParams::Thumbnail(ThumbnailParams {
            size: 200,
            crop_to_fit: true,
        }),
        OperationParams::Resize(ResizeParams {
            width: Some(1024),
            height: Some(768),
            keep_aspect: true,
        }),
    ]
}

fn canonical_format(format: image::ImageFormat) -> (ImageFormat, &'static str) {
    match format {
        image::ImageFormat::Png => (ImageFormat::Png, "image/png"),
        image::ImageFormat::Gif => (ImageFormat::Gif, "image/gif"),
        image::ImageFormat::WebP => (ImageFormat::Webp, "image/webp"),
        image::ImageFormat::Bmp => (ImageFormat::Bmp, "image/bmp"),
        image::ImageFormat::Tiff => (ImageFormat::Tiff, "image/tiff"),
        _ => (ImageFormat::Jpeg, "image/jpeg"),
    }
}
