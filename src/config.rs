/// Configuration management for the image service
///
/// Loads configuration from environment variables with sensible defaults.
use crate::retry::RetryStrategy;
use serde::Deserialize;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub kafka: KafkaConfig,
    pub s3: S3Config,
    pub worker: WorkerConfig,
    pub retry: RetryConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub conn_max_lifetime_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct KafkaConfig {
    pub brokers: String,
    pub processing_topic: String,
    pub results_topic: String,
    pub group_id: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// MinIO-compatible endpoint override; path-style addressing is forced
    /// when this is set.
    pub endpoint: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WorkerConfig {
    pub concurrency: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RetryConfig {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
}

impl RetryConfig {
    pub fn strategy(&self) -> RetryStrategy {
        RetryStrategy {
            attempts: self.attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            factor: self.factor,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Config {
            server: ServerConfig {
                host: env_or("SERVER_HOST", "0.0.0.0"),
                port: env_parse("SERVER_PORT", 8080),
                read_timeout_secs: env_parse("SERVER_READ_TIMEOUT_SECS", 10),
                write_timeout_secs: env_parse("SERVER_WRITE_TIMEOUT_SECS", 30),
                idle_timeout_secs: env_parse("SERVER_IDLE_TIMEOUT_SECS", 60),
                shutdown_timeout_secs: env_parse("SERVER_SHUTDOWN_TIMEOUT_SECS", 10),
            },
            database: DatabaseConfig {
                url: env_or("DATABASE_URL", "postgresql://localhost/image_service"),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS", 1),
                conn_max_lifetime_secs: env_parse("DATABASE_CONN_MAX_LIFETIME_SECS", 1800),
            },
            kafka: KafkaConfig {
                brokers: env_or("KAFKA_BROKERS", "localhost:9092"),
                processing_topic: env_or("KAFKA_PROCESSING_TOPIC", "image-processing"),
                results_topic: env_or("KAFKA_RESULTS_TOPIC", "image-processed"),
                group_id: env_or("KAFKA_GROUP_ID", "image-processor-group"),
            },
            s3: S3Config {
                bucket: env_or("S3_BUCKET", "images"),
                region: env_or("AWS_REGION", "us-east-1"),
                access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok(),
                secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
                endpoint: std::env::var("S3_ENDPOINT").ok(),
            },
            worker: WorkerConfig {
                concurrency: env_parse("WORKER_CONCURRENCY", 4).max(1),
            },
            retry: RetryConfig {
                attempts: env_parse("RETRY_ATTEMPTS", 3),
                base_delay_ms: env_parse("RETRY_BASE_DELAY_MS", 100),
                factor: env_parse("RETRY_FACTOR", 2.0),
                max_delay_ms: env_parse("RETRY_MAX_DELAY_MS", 5000),
            },
        })
    }
}
