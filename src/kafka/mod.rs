//! Broker adapter: task publishing and the worker-side fetch loop.

pub mod consumer;
pub mod producer;

pub use consumer::KafkaTaskConsumer;
pub use producer::{KafkaTaskProducer, TaskPublisher};

/// One delivered broker record.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
}
