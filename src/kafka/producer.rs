//! Kafka producers for processing tasks and their results.

use crate::config::KafkaConfig;
use crate::error::{AppError, Result};
use crate::retry::RetryStrategy;
use anyhow::Context;
use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::sync::Arc;
use std::time::Duration;

/// Publishing surface the ingest coordinator and worker depend on.
/// Tasks are keyed by image id so every message for one asset lands on
/// one partition, preserving relative order.
#[async_trait]
pub trait TaskPublisher: Send + Sync {
    async fn publish_task(&self, key: &str, payload: &[u8]) -> Result<()>;
    async fn publish_result(&self, key: &str, payload: &[u8]) -> Result<()>;
}

/// Cheap-clone wrapper over one idempotent producer and the two topics.
#[derive(Clone)]
pub struct KafkaTaskProducer {
    inner: Arc<FutureProducer>,
    processing_topic: String,
    results_topic: String,
    retries: RetryStrategy,
}

impl KafkaTaskProducer {
    pub fn new(cfg: &KafkaConfig, retries: RetryStrategy) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &cfg.brokers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("message.timeout.ms", "5000")
            .create()
            .with_context(|| format!("Failed to create Kafka producer for '{}'", cfg.brokers))
            .map_err(|e| AppError::MessageQueue(format!("{e:#}")))?;

        Ok(Self {
            inner: Arc::new(producer),
            processing_topic: cfg.processing_topic.clone(),
            results_topic: cfg.results_topic.clone(),
            retries,
        })
    }

    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        self.retries
            .run(
                |e: &AppError| matches!(e, AppError::MessageQueue(_)),
                move || async move {
                    let record = FutureRecord::to(topic).key(key).payload(payload);
                    self.inner
                        .send(record, Duration::from_secs(10))
                        .await
                        .map(|_| ())
                        .map_err(|(err, _)| {
                            AppError::MessageQueue(format!("failed to publish to {topic}: {err}"))
                        })
                },
            )
            .await
    }
}

#[async_trait]
impl TaskPublisher for KafkaTaskProducer {
    async fn publish_task(&self, key: &str, payload: &[u8]) -> Result<()> {
        self.send(&self.processing_topic, key, payload).await
    }

    async fn publish_result(&self, key: &str, payload: &[u8]) -> Result<()> {
        self.send(&self.results_topic, key, payload).await
    }
}
