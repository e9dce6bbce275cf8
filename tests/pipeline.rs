//! End-to-end pipeline scenarios over in-memory fakes of the three
//! adapter seams: object store, metadata store and broker publisher.

use async_trait::async_trait;
use bytes::Bytes;
use image_service::db::MetadataStore;
use image_service::error::{AppError, Result};
use image_service::kafka::TaskPublisher;
use image_service::models::{
    Image, ImageFormat, ImageStatus, OperationParams, ProcessedImage, ProcessingResult,
    ProcessingTask, MAX_UPLOAD_SIZE,
};
use image_service::services::{IngestService, ProcessingEngine};
use image_service::storage::path::{original_object_key, sanitize_filename, sanitize_object_path};
use image_service::storage::ObjectStore;
use image_service::worker::{HandleOutcome, TaskHandler};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ============================================
// In-memory fakes
// ============================================

#[derive(Default)]
struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Bytes>>,
    fail_get: AtomicBool,
}

impl MemoryObjectStore {
    fn contains(&self, path: &str) -> bool {
        self.objects.lock().unwrap().contains_key(path)
    }

    fn object(&self, path: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(path).cloned()
    }

    fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    fn insert_raw(&self, path: &str, data: Bytes) {
        self.objects.lock().unwrap().insert(path.to_string(), data);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn save_original(&self, filename: &str, data: Bytes) -> Result<String> {
        let key = original_object_key(&sanitize_filename(filename));
        self.objects.lock().unwrap().insert(key.clone(), data);
        Ok(key)
    }

    async fn save_processed(&self, path: &str, data: Bytes, _content_type: &str) -> Result<()> {
        let key = sanitize_object_path(path)?;
        self.objects.lock().unwrap().insert(key, data);
        Ok(())
    }

    async fn get_object(&self, path: &str) -> Result<Bytes> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(AppError::Storage("injected storage outage".to_string()));
        }
        let key = sanitize_object_path(path)?;
        self.objects
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or(AppError::ObjectNotFound(key))
    }

    async fn delete_object(&self, path: &str) -> Result<()> {
        let key = sanitize_object_path(path)?;
        self.objects.lock().unwrap().remove(&key);
        Ok(())
    }

    async fn delete_objects_with_prefix(&self, prefix: &str) -> Result<()> {
        let prefix = sanitize_object_path(prefix)?;
        self.objects
            .lock()
            .unwrap()
            .retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }
}

#[derive(Default)]
struct MemoryMetadataStore {
    images: Mutex<HashMap<Uuid, Image>>,
    processed: Mutex<Vec<ProcessedImage>>,
    fail_save: AtomicBool,
}

impl MemoryMetadataStore {
    fn raw_status(&self, id: Uuid) -> Option<String> {
        self.images
            .lock()
            .unwrap()
            .get(&id)
            .map(|img| img.status.clone())
    }

    fn image_count(&self) -> usize {
        self.images.lock().unwrap().len()
    }

    fn processed_count(&self) -> usize {
        self.processed.lock().unwrap().len()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn save(&self, image: &Image) -> Result<()> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(AppError::Database("injected database outage".to_string()));
        }
        let mut images = self.images.lock().unwrap();
        if images.contains_key(&image.id) {
            return Err(AppError::Database("duplicate key violation".to_string()));
        }
        images.insert(image.id, image.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Image> {
        self.images
            .lock()
            .unwrap()
            .get(&id)
            .filter(|img| img.status != "deleted")
            .cloned()
            .ok_or(AppError::ImageNotFound)
    }

    async fn update_status(&self, id: Uuid, status: ImageStatus) -> Result<()> {
        let mut images = self.images.lock().unwrap();
        let Some(image) = images.get_mut(&id).filter(|img| img.status != "deleted") else {
            return Err(AppError::ImageNotFound);
        };
        // A failed image cannot re-enter processing.
        if image.status == "failed" && status == ImageStatus::Processing {
            return Ok(());
        }
        image.status = status.as_str().to_string();
        image.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut images = self.images.lock().unwrap();
        let Some(image) = images.get_mut(&id).filter(|img| img.status != "deleted") else {
            return Err(AppError::ImageNotFound);
        };
        image.status = "deleted".to_string();
        image.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn save_processed_image(&self, processed: &ProcessedImage) -> Result<()> {
        let mut rows = self.processed.lock().unwrap();
        if let Some(existing) = rows
            .iter_mut()
            .find(|row| row.image_id == processed.image_id && row.operation == processed.operation)
        {
            *existing = processed.clone();
        } else {
            rows.push(processed.clone());
        }
        Ok(())
    }

    async fn get_processed_images(&self, image_id: Uuid) -> Result<Vec<ProcessedImage>> {
        Ok(self
            .processed
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.image_id == image_id)
            .cloned()
            .collect())
    }

    async fn get_processed_image_by_operation(
        &self,
        image_id: Uuid,
        operation: &str,
    ) -> Result<Option<ProcessedImage>> {
        Ok(self
            .processed
            .lock()
            .unwrap()
            .iter()
            .find(|row| row.image_id == image_id && row.operation == operation)
            .cloned())
    }

    async fn delete_processed_images(&self, image_id: Uuid) -> Result<()> {
        self.processed
            .lock()
            .unwrap()
            .retain(|row| row.image_id != image_id);
        Ok(())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Image>> {
        let mut images: Vec<Image> = self
            .images
            .lock()
            .unwrap()
            .values()
            .filter(|img| img.status != "deleted")
            .cloned()
            .collect();
        images.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(images
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count(&self) -> Result<i64> {
        Ok(self
            .images
            .lock()
            .unwrap()
            .values()
            .filter(|img| img.status != "deleted")
            .count() as i64)
    }
}

#[derive(Default)]
struct MemoryTaskPublisher {
    tasks: Mutex<Vec<(String, Vec<u8>)>>,
    results: Mutex<Vec<(String, Vec<u8>)>>,
    fail_tasks: AtomicBool,
}

impl MemoryTaskPublisher {
    fn task_count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    fn last_task(&self) -> Option<(String, Vec<u8>)> {
        self.tasks.lock().unwrap().last().cloned()
    }

    fn last_result(&self) -> Option<ProcessingResult> {
        self.results
            .lock()
            .unwrap()
            .last()
            .and_then(|(_, payload)| serde_json::from_slice(payload).ok())
    }
}

#[async_trait]
impl TaskPublisher for MemoryTaskPublisher {
    async fn publish_task(&self, key: &str, payload: &[u8]) -> Result<()> {
        if self.fail_tasks.load(Ordering::SeqCst) {
            return Err(AppError::MessageQueue("injected broker outage".to_string()));
        }
        self.tasks
            .lock()
            .unwrap()
            .push((key.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn publish_result(&self, key: &str, payload: &[u8]) -> Result<()> {
        self.results
            .lock()
            .unwrap()
            .push((key.to_string(), payload.to_vec()));
        Ok(())
    }
}

// ============================================
// Harness
// ============================================

struct Harness {
    service: IngestService,
    handler: TaskHandler,
    repo: Arc<MemoryMetadataStore>,
    store: Arc<MemoryObjectStore>,
    publisher: Arc<MemoryTaskPublisher>,
}

fn harness() -> Harness {
    let repo = Arc::new(MemoryMetadataStore::default());
    let store = Arc::new(MemoryObjectStore::default());
    let publisher = Arc::new(MemoryTaskPublisher::default());
    let engine = Arc::new(ProcessingEngine::new().unwrap());

    Harness {
        service: IngestService::new(repo.clone(), store.clone(), publisher.clone()),
        handler: TaskHandler::new(repo.clone(), store.clone(), publisher.clone(), engine),
        repo,
        store,
        publisher,
    }
}

fn jpeg_bytes(width: u32, height: u32) -> Bytes {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 200])
    }));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), image::ImageOutputFormat::Jpeg(90))
        .unwrap();
    Bytes::from(out)
}

fn png_bytes(width: u32, height: u32) -> Bytes {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        width,
        height,
        image::Rgb([40, 80, 120]),
    ));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), image::ImageOutputFormat::Png)
        .unwrap();
    Bytes::from(out)
}

fn gif_bytes(width: u32, height: u32) -> Bytes {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        width,
        height,
        image::Rgb([200, 100, 50]),
    ));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), image::ImageOutputFormat::Gif)
        .unwrap();
    Bytes::from(out)
}

// ============================================
// Ingest scenarios
// ============================================

#[tokio::test]
async fn upload_persists_object_metadata_and_exactly_one_task() {
    let h = harness();

    let image = h
        .service
        .upload(jpeg_bytes(1024, 768), "photo.jpg", "image/jpeg", vec![])
        .await
        .unwrap();

    assert_eq!(image.status, "processing");
    assert_eq!(image.mime_type, "image/jpeg");
    assert_eq!(h.repo.image_count(), 1);
    assert!(h.store.contains(&image.original_path));

    assert_eq!(h.publisher.task_count(), 1);
    let (key, payload) = h.publisher.last_task().unwrap();
    assert_eq!(key, image.id.to_string());

    let task: ProcessingTask = serde_json::from_slice(&payload).unwrap();
    assert_eq!(task.image_id, image.id);
    assert_eq!(task.original_path, image.original_path);
    assert_eq!(task.format, Some(ImageFormat::Jpeg));
    // Empty operation lists get the default pipeline.
    assert_eq!(task.operations.len(), 2);
    assert!(matches!(task.operations[0], OperationParams::Thumbnail(_)));
    assert!(matches!(task.operations[1], OperationParams::Resize(_)));
}

#[tokio::test]
async fn oversize_upload_touches_nothing() {
    let h = harness();

    let err = h
        .service
        .upload(
            Bytes::from(vec![0u8; MAX_UPLOAD_SIZE + 1]),
            "big.png",
            "image/png",
            vec![],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::FileTooLarge(_)));
    assert_eq!(h.repo.image_count(), 0);
    assert_eq!(h.store.len(), 0);
    assert_eq!(h.publisher.task_count(), 0);
}

#[tokio::test]
async fn spoofed_content_type_fails_magic_byte_gate() {
    let h = harness();

    let err = h
        .service
        .upload(
            Bytes::from_static(b"just some plain text pretending"),
            "evil.jpg",
            "image/jpeg",
            vec![],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::InvalidFileFormat(_)));
    assert_eq!(h.repo.image_count(), 0);
    assert_eq!(h.store.len(), 0);
    assert_eq!(h.publisher.task_count(), 0);
}

#[tokio::test]
async fn metadata_failure_deletes_the_stored_object() {
    let h = harness();
    h.repo.fail_save.store(true, Ordering::SeqCst);

    let err = h
        .service
        .upload(png_bytes(32, 32), "photo.png", "image/png", vec![])
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Database(_)));
    // Compensation: no orphan object remains.
    assert_eq!(h.store.len(), 0);
    assert_eq!(h.publisher.task_count(), 0);
}

#[tokio::test]
async fn broker_outage_parks_image_in_failed_and_keeps_object() {
    let h = harness();
    h.publisher.fail_tasks.store(true, Ordering::SeqCst);

    let err = h
        .service
        .upload(png_bytes(32, 32), "photo.png", "image/png", vec![])
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::MessageQueue(_)));
    // The row references the object, so the object is kept.
    assert_eq!(h.store.len(), 1);
    let id = *h.repo.images.lock().unwrap().keys().next().unwrap();
    assert_eq!(h.repo.raw_status(id).as_deref(), Some("failed"));
}

// ============================================
// Worker scenarios
// ============================================

#[tokio::test]
async fn worker_materialises_every_operation_and_completes() {
    let h = harness();

    let image = h
        .service
        .upload(jpeg_bytes(1024, 768), "photo.jpg", "image/jpeg", vec![])
        .await
        .unwrap();
    let (_, payload) = h.publisher.last_task().unwrap();

    let outcome = h.handler.handle(&payload).await;
    assert_eq!(outcome, HandleOutcome::Commit);

    assert_eq!(h.repo.raw_status(image.id).as_deref(), Some("completed"));
    assert_eq!(h.repo.processed_count(), 2);

    let thumb_path = format!("processed/thumbnails/{}/200.jpeg", image.id);
    let resize_path = format!("processed/resize/{}/1024x768.jpeg", image.id);
    let thumb = h.store.object(&thumb_path).expect("thumbnail object");
    assert!(h.store.contains(&resize_path));

    let decoded = image::load_from_memory(&thumb).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (200, 200));

    let resized = image::load_from_memory(&h.store.object(&resize_path).unwrap()).unwrap();
    assert!(resized.width() <= 1024 && resized.height() <= 768);

    let result = h.publisher.last_result().expect("processing result");
    assert_eq!(result.image_id, image.id);
    assert_eq!(result.status, ImageStatus::Completed);
    assert_eq!(result.processed_paths.len(), 2);
    assert!(result.error.is_empty());
}

#[tokio::test]
async fn replaying_a_task_converges_instead_of_duplicating() {
    let h = harness();

    let image = h
        .service
        .upload(jpeg_bytes(640, 480), "photo.jpg", "image/jpeg", vec![])
        .await
        .unwrap();
    let (_, payload) = h.publisher.last_task().unwrap();

    assert_eq!(h.handler.handle(&payload).await, HandleOutcome::Commit);
    let objects_after_first = h.store.len();
    let paths_first: Vec<String> = h
        .repo
        .get_processed_images(image.id)
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.path)
        .collect();

    // Crash-after-write, before-ack: the broker redelivers the same
    // payload.
    assert_eq!(h.handler.handle(&payload).await, HandleOutcome::Commit);

    assert_eq!(h.store.len(), objects_after_first);
    assert_eq!(h.repo.processed_count(), 2);
    let paths_second: Vec<String> = h
        .repo
        .get_processed_images(image.id)
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.path)
        .collect();
    assert_eq!(paths_first, paths_second);
    assert_eq!(h.repo.raw_status(image.id).as_deref(), Some("completed"));
}

#[tokio::test]
async fn poison_payload_is_acked_without_side_effects() {
    let h = harness();

    let outcome = h.handler.handle(b"{ this is not a task }").await;

    assert_eq!(outcome, HandleOutcome::Commit);
    assert_eq!(h.repo.image_count(), 0);
    assert_eq!(h.store.len(), 0);
}

#[tokio::test]
async fn undecodable_original_fails_the_task_without_ack() {
    let h = harness();

    let image_id = seed_image(&h, "original/2026/08/02/1.jpg").await;
    h.store
        .insert_raw("original/2026/08/02/1.jpg", Bytes::from_static(b"garbage"));

    let payload = task_payload(image_id, "original/2026/08/02/1.jpg", serde_json::json!([
        {"type": "thumbnail", "parameters": {"size": 100}}
    ]));

    assert_eq!(h.handler.handle(&payload).await, HandleOutcome::Retry);
    assert_eq!(h.repo.raw_status(image_id).as_deref(), Some("failed"));

    let result = h.publisher.last_result().expect("failure result");
    assert_eq!(result.status, ImageStatus::Failed);
    assert!(!result.error.is_empty());
}

#[tokio::test]
async fn storage_outage_during_fetch_leaves_offset_uncommitted() {
    let h = harness();

    let image_id = seed_image(&h, "original/2026/08/02/9.png").await;
    h.store
        .insert_raw("original/2026/08/02/9.png", png_bytes(32, 32));
    h.store.fail_get.store(true, Ordering::SeqCst);

    let payload = task_payload(image_id, "original/2026/08/02/9.png", serde_json::json!([
        {"type": "thumbnail", "parameters": {}}
    ]));

    assert_eq!(h.handler.handle(&payload).await, HandleOutcome::Retry);
    assert_eq!(h.repo.raw_status(image_id).as_deref(), Some("failed"));

    // Once storage recovers, the redelivered task succeeds. The failed
    // image is allowed to progress to completed (only failed ->
    // processing is forbidden).
    h.store.fail_get.store(false, Ordering::SeqCst);
    assert_eq!(h.handler.handle(&payload).await, HandleOutcome::Commit);
    assert_eq!(h.repo.raw_status(image_id).as_deref(), Some("completed"));
}

#[tokio::test]
async fn missing_original_fails_the_task_without_ack() {
    let h = harness();
    let image_id = seed_image(&h, "original/2026/08/02/2.jpg").await;

    let payload = task_payload(image_id, "original/2026/08/02/2.jpg", serde_json::json!([
        {"type": "thumbnail", "parameters": {}}
    ]));

    assert_eq!(h.handler.handle(&payload).await, HandleOutcome::Retry);
    assert_eq!(h.repo.raw_status(image_id).as_deref(), Some("failed"));
}

#[tokio::test]
async fn unsupported_operation_fails_the_task() {
    let h = harness();

    let image_id = seed_image(&h, "original/2026/08/02/3.png").await;
    h.store
        .insert_raw("original/2026/08/02/3.png", png_bytes(64, 64));

    let payload = task_payload(image_id, "original/2026/08/02/3.png", serde_json::json!([
        {"type": "rotate", "parameters": {"angle": 90}}
    ]));

    assert_eq!(h.handler.handle(&payload).await, HandleOutcome::Retry);
    assert_eq!(h.repo.raw_status(image_id).as_deref(), Some("failed"));

    let result = h.publisher.last_result().expect("failure result");
    assert!(result.error.contains("unsupported operation"));
}

#[tokio::test]
async fn watermarked_gif_flattens_to_a_jpeg_artifact() {
    let h = harness();

    let image = h
        .service
        .upload(
            gif_bytes(300, 200),
            "banner.gif",
            "image/gif",
            vec![OperationParams::Watermark(Default::default())],
        )
        .await
        .unwrap();
    let (_, payload) = h.publisher.last_task().unwrap();

    assert_eq!(h.handler.handle(&payload).await, HandleOutcome::Commit);

    let row = h
        .repo
        .get_processed_image_by_operation(image.id, "watermark")
        .await
        .unwrap()
        .expect("watermark row");
    assert_eq!(row.format, "jpeg");
    assert_eq!(row.mime_type, "image/jpeg");
    assert_eq!(
        row.path,
        format!("processed/watermarked/{}/watermarked.jpeg", image.id)
    );
    assert!(h.store.contains(&row.path));
}

// ============================================
// Delete and visibility scenarios
// ============================================

#[tokio::test]
async fn delete_cascades_to_objects_rows_and_status() {
    let h = harness();

    let image = h
        .service
        .upload(jpeg_bytes(800, 600), "photo.jpg", "image/jpeg", vec![])
        .await
        .unwrap();
    let (_, payload) = h.publisher.last_task().unwrap();
    assert_eq!(h.handler.handle(&payload).await, HandleOutcome::Commit);
    assert!(h.store.len() >= 3);

    h.service.delete_image(image.id).await.unwrap();

    assert_eq!(h.store.len(), 0, "all objects for the asset are removed");
    assert_eq!(h.repo.processed_count(), 0);
    assert_eq!(h.repo.raw_status(image.id).as_deref(), Some("deleted"));

    assert!(matches!(
        h.service.get_status(image.id).await,
        Err(AppError::ImageNotFound)
    ));
    assert!(matches!(
        h.service.get_image(image.id, "").await,
        Err(AppError::ImageNotFound)
    ));
}

#[tokio::test]
async fn soft_deleted_images_never_appear_in_listings() {
    let h = harness();

    let keep = h
        .service
        .upload(png_bytes(20, 20), "keep.png", "image/png", vec![])
        .await
        .unwrap();
    let drop = h
        .service
        .upload(png_bytes(20, 20), "drop.png", "image/png", vec![])
        .await
        .unwrap();

    h.service.delete_image(drop.id).await.unwrap();

    let listed = h.service.list_images(10, 0).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, keep.id);
    assert_eq!(h.repo.count().await.unwrap(), 1);
}

#[tokio::test]
async fn fetching_a_variant_requires_its_row() {
    let h = harness();

    let image = h
        .service
        .upload(png_bytes(50, 50), "photo.png", "image/png", vec![])
        .await
        .unwrap();

    // Worker has not run yet: the variant does not exist.
    assert!(matches!(
        h.service.get_image(image.id, "thumbnail").await,
        Err(AppError::ProcessedImageNotFound)
    ));

    // The original is always reachable.
    let (_, original) = h.service.get_image(image.id, "").await.unwrap();
    assert!(!original.is_empty());
}

// ============================================
// Helpers
// ============================================

async fn seed_image(h: &Harness, original_path: &str) -> Uuid {
    let id = Uuid::new_v4();
    let now = chrono::Utc::now();
    h.repo
        .save(&Image {
            id,
            original_filename: "seed.jpg".to_string(),
            original_size: 1,
            mime_type: "image/jpeg".to_string(),
            status: "processing".to_string(),
            original_path: original_path.to_string(),
            bucket: "images".to_string(),
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
    id
}

fn task_payload(image_id: Uuid, original_path: &str, operations: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "id": Uuid::new_v4(),
        "image_id": image_id,
        "original_path": original_path,
        "bucket": "images",
        "operations": operations,
        "format": null,
    }))
    .unwrap()
}
