//! Worker runtime: bounded fan-out of task handlers over one consumer.
//!
//! Delivery is at-least-once. A message is committed only after its task
//! fully succeeded; every failure path leaves the offset uncommitted so
//! the broker redelivers. The single exception is an unparseable payload
//! (poison), which is committed to keep it from blocking the partition.

use crate::db::MetadataStore;
use crate::error::{AppError, Result};
use crate::kafka::{BrokerMessage, KafkaTaskConsumer, TaskPublisher};
use crate::models::{
    ImageStatus, ProcessedImage, ProcessingResult, ProcessingTask,
};
use crate::services::ProcessingEngine;
use crate::storage::path::content_type_for_ext;
use crate::storage::ObjectStore;
use chrono::Utc;
use futures::FutureExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What to do with the broker offset after handling a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Processing finished (or the payload is poison); commit.
    Commit,
    /// Processing failed; leave uncommitted so the broker redelivers.
    Retry,
}

/// Just enough of a task payload to attribute a panic to an image.
#[derive(Deserialize)]
struct TaskKey {
    image_id: Uuid,
}

pub struct TaskHandler {
    repo: Arc<dyn MetadataStore>,
    store: Arc<dyn ObjectStore>,
    publisher: Arc<dyn TaskPublisher>,
    engine: Arc<ProcessingEngine>,
}

impl TaskHandler {
    pub fn new(
        repo: Arc<dyn MetadataStore>,
        store: Arc<dyn ObjectStore>,
        publisher: Arc<dyn TaskPublisher>,
        engine: Arc<ProcessingEngine>,
    ) -> Self {
        Self {
            repo,
            store,
            publisher,
            engine,
        }
    }

    /// Handle one payload with panic isolation. A panic anywhere in the
    /// task flow is recovered, attributed to the image when possible,
    /// and treated like any other task failure: `failed` status, no
    /// commit.
    pub async fn handle_isolated(&self, payload: &[u8]) -> HandleOutcome {
        match AssertUnwindSafe(self.handle(payload)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(panic = %detail, "Panic recovered while processing message");

                if let Ok(key) = serde_json::from_slice::<TaskKey>(payload) {
                    self.mark_failed(key.image_id).await;
                }
                HandleOutcome::Retry
            }
        }
    }

    pub async fn handle(&self, payload: &[u8]) -> HandleOutcome {
        let task: ProcessingTask = match serde_json::from_slice(payload) {
            Ok(task) => task,
            Err(err) => {
                // Poison: no retry would ever make this parse.
                warn!(error = %err, "Failed to deserialize task payload, committing poison message");
                return HandleOutcome::Commit;
            }
        };

        info!(
            task_id = %task.id,
            image_id = %task.image_id,
            operations = task.operations.len(),
            "Processing task started"
        );

        match self.process(&task).await {
            Ok(()) => {
                info!(image_id = %task.image_id, "Image processing completed successfully");
                HandleOutcome::Commit
            }
            Err(err) => {
                error!(image_id = %task.image_id, error = %err, "Failed to process task");
                HandleOutcome::Retry
            }
        }
    }

    async fn process(&self, task: &ProcessingTask) -> Result<()> {
        let original = match self.store.get_object(&task.original_path).await {
            Ok(data) => data,
            Err(err) => {
                error!(image_id = %task.image_id, path = %task.original_path, error = %err, "Failed to get original image");
                self.mark_failed(task.image_id).await;
                return Err(err);
            }
        };

        let decoded = tokio::task::spawn_blocking(move || ProcessingEngine::decode(&original))
            .await
            .map_err(|e| AppError::Internal(format!("decode task panicked: {e}")))
            .and_then(|r| r);
        let (img, detected_format) = match decoded {
            Ok(pair) => pair,
            Err(err) => {
                self.fail_task(task, &err).await;
                return Err(err);
            }
        };

        let target_format = task
            .format
            .map(|f| f.as_str().to_string())
            .unwrap_or(detected_format);
        let img = Arc::new(img);
        let mut processed_paths = HashMap::new();

        for operation in &task.operations {
            let engine = self.engine.clone();
            let source = img.clone();
            let op = operation.clone();
            let format = target_format.clone();

            let applied = tokio::task::spawn_blocking(move || engine.apply(&source, &format, &op))
                .await
                .map_err(|e| AppError::OperationFailed(format!("transform panicked: {e}")))
                .and_then(|r| r);
            let (data, out_format) = match applied {
                Ok(pair) => pair,
                Err(err) => {
                    error!(
                        image_id = %task.image_id,
                        operation = operation.operation_type().as_str(),
                        error = %err,
                        "Operation failed"
                    );
                    self.fail_task(task, &err).await;
                    return Err(err);
                }
            };

            let path = ProcessingEngine::derived_path(task.image_id, operation, &out_format);
            let content_type = content_type_for_ext(&out_format);
            let size = data.len();

            if let Err(err) = self.store.save_processed(&path, data, content_type).await {
                error!(image_id = %task.image_id, path = %path, error = %err, "Failed to save processed image");
                self.fail_task(task, &err).await;
                return Err(err);
            }

            let record = ProcessedImage {
                id: Uuid::new_v4(),
                image_id: task.image_id,
                operation: operation.operation_type().as_str().to_string(),
                path: path.clone(),
                size: size as i64,
                mime_type: content_type.to_string(),
                format: out_format,
                status: ImageStatus::Completed.as_str().to_string(),
                created_at: Utc::now(),
            };
            if let Err(err) = self.repo.save_processed_image(&record).await {
                error!(image_id = %task.image_id, path = %path, error = %err, "Failed to save processed image metadata");
                self.fail_task(task, &err).await;
                return Err(err);
            }

            debug!(
                image_id = %task.image_id,
                operation = operation.operation_type().as_str(),
                path = %path,
                size,
                "Operation completed and saved"
            );
            processed_paths.insert(operation.operation_type().as_str().to_string(), path);
        }

        self.publish_result(task, ImageStatus::Completed, processed_paths, String::new())
            .await;

        self.repo
            .update_status(task.image_id, ImageStatus::Completed)
            .await?;

        Ok(())
    }

    /// Park the image in `failed` and report the error on the results
    /// topic; both are best-effort.
    async fn fail_task(&self, task: &ProcessingTask, err: &AppError) {
        self.mark_failed(task.image_id).await;
        self.publish_result(task, ImageStatus::Failed, HashMap::new(), err.to_string())
            .await;
    }

    async fn mark_failed(&self, image_id: Uuid) {
        if let Err(err) = self.repo.update_status(image_id, ImageStatus::Failed).await {
            error!(image_id = %image_id, error = %err, "Failed to update status to failed");
        }
    }

    async fn publish_result(
        &self,
        task: &ProcessingTask,
        status: ImageStatus,
        processed_paths: HashMap<String, String>,
        error_message: String,
    ) {
        let result = ProcessingResult {
            id: task.id,
            image_id: task.image_id,
            status,
            processed_paths,
            error: error_message,
        };
        let payload = match serde_json::to_vec(&result) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(image_id = %task.image_id, error = %err, "Failed to serialize processing result");
                return;
            }
        };
        if let Err(err) = self
            .publisher
            .publish_result(&task.image_id.to_string(), &payload)
            .await
        {
            warn!(image_id = %task.image_id, error = %err, "Failed to publish processing result");
        }
    }
}

/// One consumer, a bounded channel of capacity `2N`, and `N` handler
/// tasks. The bounded channel stalls the fetch loop when handlers lag.
pub struct WorkerRuntime {
    consumer: Arc<KafkaTaskConsumer>,
    handler: Arc<TaskHandler>,
    concurrency: usize,
}

impl WorkerRuntime {
    pub fn new(consumer: Arc<KafkaTaskConsumer>, handler: Arc<TaskHandler>, concurrency: usize) -> Self {
        Self {
            consumer,
            handler,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(concurrency = self.concurrency, "Starting worker");

        let (tx, rx) = mpsc::channel::<BrokerMessage>(self.concurrency * 2);
        let rx = Arc::new(Mutex::new(rx));

        let fetch = {
            let consumer = self.consumer.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                consumer.start(tx, shutdown).await;
            })
        };

        let mut handlers = Vec::with_capacity(self.concurrency);
        for worker_id in 0..self.concurrency {
            let rx = rx.clone();
            let handler = self.handler.clone();
            let consumer = self.consumer.clone();
            handlers.push(tokio::spawn(async move {
                info!(worker_id, "Handler started");
                loop {
                    let message = { rx.lock().await.recv().await };
                    let Some(message) = message else {
                        debug!(worker_id, "Handler stopping");
                        break;
                    };

                    let started = Instant::now();
                    let outcome = handler.handle_isolated(&message.payload).await;
                    match outcome {
                        HandleOutcome::Commit => {
                            if let Err(err) = consumer.commit(message.partition, message.offset) {
                                error!(
                                    worker_id,
                                    offset = message.offset,
                                    error = %err,
                                    "Failed to commit message after successful processing"
                                );
                            } else {
                                debug!(
                                    worker_id,
                                    offset = message.offset,
                                    elapsed_ms = started.elapsed().as_millis() as u64,
                                    "Message processed and committed successfully"
                                );
                            }
                        }
                        HandleOutcome::Retry => {
                            warn!(
                                worker_id,
                                offset = message.offset,
                                "Message left uncommitted for redelivery"
                            );
                        }
                    }
                }
            }));
        }

        // The fetch loop owns the sender: when it stops, the channel
        // closes and handlers drain the remaining messages.
        if let Err(err) = fetch.await {
            error!(error = %err, "Fetch loop task failed");
        }
        for handle in handlers {
            if let Err(err) = handle.await {
                error!(error = %err, "Handler task failed");
            }
        }

        self.consumer.close();
        info!("Worker stopped gracefully");
        Ok(())
    }
}
