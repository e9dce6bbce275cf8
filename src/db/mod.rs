//! Metadata store: Postgres pool plus the image repository.

use crate::config::DatabaseConfig;
use crate::error::{AppError, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

pub mod image_repo;

pub use image_repo::{MetadataStore, PgImageRepository};

/// Build the process-wide connection pool.
pub async fn create_pool(cfg: &DatabaseConfig) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .min_connections(cfg.min_connections)
        .max_lifetime(Duration::from_secs(cfg.conn_max_lifetime_secs))
        .connect(&cfg.url)
        .await
        .map_err(|e| AppError::Database(format!("failed to connect to database: {e}")))
}
