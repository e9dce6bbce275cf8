//! Image Worker - Kafka consumer for image processing
//!
//! Consumes processing tasks, applies the requested transforms and
//! records each derived artifact. Offsets are committed only after a
//! task fully succeeds, so failed tasks are redelivered.
//!
//! Environment variables:
//! - DATABASE_URL: PostgreSQL connection string
//! - S3_ENDPOINT / S3_BUCKET / AWS_REGION / AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY
//! - KAFKA_BROKERS: Kafka broker addresses
//! - KAFKA_PROCESSING_TOPIC: Topic to consume (default: "image-processing")
//! - KAFKA_RESULTS_TOPIC: Topic for processing results (default: "image-processed")
//! - KAFKA_GROUP_ID: Consumer group ID (default: "image-processor-group")
//! - WORKER_CONCURRENCY: Parallel task handlers (default: 4)

use image_service::db::{self, PgImageRepository};
use image_service::kafka::{KafkaTaskConsumer, KafkaTaskProducer};
use image_service::services::ProcessingEngine;
use image_service::storage::S3ObjectStore;
use image_service::worker::{TaskHandler, WorkerRuntime};
use image_service::Config;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("image_worker=info".parse().expect("valid directive"))
                .add_directive("image_service=info".parse().expect("valid directive")),
        )
        .init();

    info!("Starting Image Worker");

    dotenvy::dotenv().ok();
    let config = Config::from_env().map_err(|e| format!("failed to load configuration: {e}"))?;
    info!(
        brokers = %config.kafka.brokers,
        topic = %config.kafka.processing_topic,
        group = %config.kafka.group_id,
        concurrency = config.worker.concurrency,
        "Worker configuration"
    );

    let retries = config.retry.strategy();

    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| format!("{e}"))?;
    let repo = Arc::new(PgImageRepository::new(pool, retries.clone()));

    let store = Arc::new(
        S3ObjectStore::new(&config.s3, retries.clone())
            .await
            .map_err(|e| format!("{e}"))?,
    );
    info!(bucket = %config.s3.bucket, "Object store ready");

    let producer = Arc::new(
        KafkaTaskProducer::new(&config.kafka, retries).map_err(|e| format!("{e}"))?,
    );

    let engine = Arc::new(ProcessingEngine::new().map_err(|e| format!("{e}"))?);
    let handler = Arc::new(TaskHandler::new(repo, store, producer, engine));

    let consumer = Arc::new(KafkaTaskConsumer::new(&config.kafka).map_err(|e| format!("{e}"))?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let runtime = WorkerRuntime::new(consumer, handler, config.worker.concurrency);
    runtime.run(shutdown_rx).await.map_err(|e| format!("{e}"))?;

    info!("Image Worker stopped");
    Ok(())
}
