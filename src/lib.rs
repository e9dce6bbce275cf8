//! Image Service
//!
//! Accepts image uploads, stores the originals in S3-compatible object
//! storage, records metadata in Postgres and queues processing tasks on
//! Kafka. A separate worker binary consumes the tasks, applies the
//! requested transforms (thumbnail, resize, watermark) and records each
//! derived artifact.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod kafka;
pub mod models;
pub mod retry;
pub mod services;
pub mod storage;
pub mod worker;

// Public re-exports
pub use config::Config;
pub use error::{AppError, Result};
