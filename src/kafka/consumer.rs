//! Kafka consumer for processing tasks.
//!
//! Auto-commit is disabled: an offset is committed only after the worker
//! finishes a message, which is what makes delivery at-least-once. The
//! fetch loop tracks the most recently delivered offset per partition
//! and refuses to commit anything else, so a handler can never commit
//! ahead of delivery.

use super::BrokerMessage;
use crate::config::KafkaConfig;
use crate::error::{AppError, Result};
use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

pub struct KafkaTaskConsumer {
    consumer: StreamConsumer,
    topic: String,
    delivered: Mutex<HashMap<i32, i64>>,
}

impl KafkaTaskConsumer {
    pub fn new(cfg: &KafkaConfig) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &cfg.brokers)
            .set("group.id", &cfg.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "45000")
            .set("max.poll.interval.ms", "300000")
            .create()
            .map_err(|e| AppError::MessageQueue(format!("failed to create Kafka consumer: {e}")))?;

        consumer
            .subscribe(&[&cfg.processing_topic])
            .map_err(|e| AppError::MessageQueue(format!("failed to subscribe to topic: {e}")))?;

        info!(
            brokers = %cfg.brokers,
            topic = %cfg.processing_topic,
            group_id = %cfg.group_id,
            "Task consumer initialized"
        );

        Ok(Self {
            consumer,
            topic: cfg.processing_topic.clone(),
            delivered: Mutex::new(HashMap::new()),
        })
    }

    /// Long-running fetch loop: delivers messages onto `out` until the
    /// shutdown signal flips or the broker stream ends. The bounded
    /// channel provides the backpressure that stalls fetching when
    /// handlers lag.
    pub async fn start(&self, out: mpsc::Sender<BrokerMessage>, mut shutdown: watch::Receiver<bool>) {
        let mut stream = self.consumer.stream();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Shutdown signal received, stopping fetch loop");
                        break;
                    }
                }

                message = stream.next() => {
                    match message {
                        Some(Ok(msg)) => {
                            let delivered = BrokerMessage {
                                key: msg.key().map(<[u8]>::to_vec).unwrap_or_default(),
                                payload: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                                partition: msg.partition(),
                                offset: msg.offset(),
                            };
                            self.delivered
                                .lock()
                                .expect("delivered offsets lock poisoned")
                                .insert(delivered.partition, delivered.offset);
                            if out.send(delivered).await.is_err() {
                                warn!("Message channel closed, stopping fetch loop");
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            // Keep consuming; the broker client recovers on
                            // its own for transient fetch errors.
                            error!(error = %e, "Kafka consumer error");
                        }
                        None => {
                            warn!("Message stream ended unexpectedly");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Commit the delivered offset for a partition. Rejects offsets that
    /// do not match the most recently delivered one so stale handlers
    /// cannot commit ahead.
    pub fn commit(&self, partition: i32, offset: i64) -> Result<()> {
        {
            let delivered = self
                .delivered
                .lock()
                .expect("delivered offsets lock poisoned");
            match delivered.get(&partition) {
                Some(&last) if last == offset => {}
                Some(&last) => {
                    return Err(AppError::MessageQueue(format!(
                        "offset mismatch on partition {partition}: expected {last}, got {offset}"
                    )));
                }
                None => {
                    return Err(AppError::MessageQueue(format!(
                        "no delivered offset recorded for partition {partition}"
                    )));
                }
            }
        }

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&self.topic, partition, Offset::Offset(offset + 1))
            .map_err(|e| AppError::MessageQueue(format!("invalid commit offset: {e}")))?;
        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| AppError::MessageQueue(format!("failed to commit offset: {e}")))
    }

    /// Idempotent.
    pub fn close(&self) {
        self.consumer.unsubscribe();
    }
}
