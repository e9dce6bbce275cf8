//! CRUD over the `images` and `processed_images` relations.
//!
//! Soft-deleted rows never leave this module: every read filters
//! `status = 'deleted'`. Mutations run under the configured retry
//! strategy; unique-key violations and logical not-found are never
//! retried.

use crate::error::{AppError, Result};
use crate::models::{Image, ImageStatus, ProcessedImage};
use crate::retry::RetryStrategy;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

const PG_UNIQUE_VIOLATION: &str = "23505";

/// Capability surface for image metadata. Production binds to Postgres;
/// tests bind to an in-memory fake.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn save(&self, image: &Image) -> Result<()>;
    async fn get_by_id(&self, id: Uuid) -> Result<Image>;
    async fn update_status(&self, id: Uuid, status: ImageStatus) -> Result<()>;
    /// Soft delete: flips the row to `deleted` and bumps `updated_at`.
    async fn delete(&self, id: Uuid) -> Result<()>;
    /// Upsert keyed on `(image_id, operation)`.
    async fn save_processed_image(&self, processed: &ProcessedImage) -> Result<()>;
    async fn get_processed_images(&self, image_id: Uuid) -> Result<Vec<ProcessedImage>>;
    async fn get_processed_image_by_operation(
        &self,
        image_id: Uuid,
        operation: &str,
    ) -> Result<Option<ProcessedImage>>;
    async fn delete_processed_images(&self, image_id: Uuid) -> Result<()>;
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Image>>;
    async fn count(&self) -> Result<i64>;
}

fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Protocol(_)
    )
}

fn map_db_error(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some(PG_UNIQUE_VIOLATION) {
            return AppError::Database(format!("duplicate key violation: {db_err}"));
        }
    }
    AppError::Database(err.to_string())
}

pub struct PgImageRepository {
    pool: PgPool,
    retries: RetryStrategy,
}

impl PgImageRepository {
    pub fn new(pool: PgPool, retries: RetryStrategy) -> Self {
        Self { pool, retries }
    }

    async fn image_exists(&self, id: Uuid) -> Result<bool> {
        let exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM images WHERE id = $1 AND status <> 'deleted'")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_db_error)?;
        Ok(exists.is_some())
    }
}

#[async_trait]
impl MetadataStore for PgImageRepository {
    async fn save(&self, image: &Image) -> Result<()> {
        self.retries
            .run(is_transient, || async move {
                sqlx::query(
                    r#"
                    INSERT INTO images (
                        id, original_filename, original_size, mime_type,
                        status, original_path, bucket, created_at, updated_at
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    "#,
                )
                .bind(image.id)
                .bind(&image.original_filename)
                .bind(image.original_size)
                .bind(&image.mime_type)
                .bind(&image.status)
                .bind(&image.original_path)
                .bind(&image.bucket)
                .bind(image.created_at)
                .bind(image.updated_at)
                .execute(&self.pool)
                .await
            })
            .await
            .map(|_| ())
            .map_err(map_db_error)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Image> {
        let image: Option<Image> = sqlx::query_as(
            r#"
            SELECT id, original_filename, original_size, mime_type,
                   status, original_path, bucket, created_at, updated_at
            FROM images
            WHERE id = $1 AND status <> 'deleted'
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        image.ok_or(AppError::ImageNotFound)
    }

    async fn update_status(&self, id: Uuid, status: ImageStatus) -> Result<()> {
        // The WHERE clause enforces the lifecycle rules: deleted rows are
        // immutable and a failed image cannot re-enter processing.
        let result = self
            .retries
            .run(is_transient, || async move {
                sqlx::query(
                    r#"
                    UPDATE images SET status = $1, updated_at = $2
                    WHERE id = $3
                      AND status <> 'deleted'
                      AND NOT (status = 'failed' AND $1 = 'processing')
                    "#,
                )
                .bind(status.as_str())
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await
            })
            .await
            .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            // Zero rows is either an absent/deleted image or a skipped
            // forbidden transition; only the former is an error.
            if self.image_exists(id).await? {
                return Ok(());
            }
            return Err(AppError::ImageNotFound);
        }

        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let result = self
            .retries
            .run(is_transient, || async move {
                sqlx::query(
                    "UPDATE images SET status = 'deleted', updated_at = $1 WHERE id = $2 AND status <> 'deleted'",
                )
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await
            })
            .await
            .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::ImageNotFound);
        }

        Ok(())
    }

    async fn save_processed_image(&self, processed: &ProcessedImage) -> Result<()> {
        self.retries
            .run(is_transient, || async move {
                sqlx::query(
                    r#"
                    INSERT INTO processed_images (
                        id, image_id, operation, path, size,
                        mime_type, format, status, created_at
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    ON CONFLICT (image_id, operation) DO UPDATE SET
                        path = EXCLUDED.path,
                        size = EXCLUDED.size,
                        mime_type = EXCLUDED.mime_type,
                        format = EXCLUDED.format,
                        status = EXCLUDED.status,
                        created_at = EXCLUDED.created_at
                    "#,
                )
                .bind(processed.id)
                .bind(processed.image_id)
                .bind(&processed.operation)
                .bind(&processed.path)
                .bind(processed.size)
                .bind(&processed.mime_type)
                .bind(&processed.format)
                .bind(&processed.status)
                .bind(processed.created_at)
                .execute(&self.pool)
                .await
            })
            .await
            .map(|_| ())
            .map_err(map_db_error)
    }

    async fn get_processed_images(&self, image_id: Uuid) -> Result<Vec<ProcessedImage>> {
        sqlx::query_as(
            r#"
            SELECT id, image_id, operation, path, size,
                   mime_type, format, status, created_at
            FROM processed_images
            WHERE image_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(image_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)
    }

    async fn get_processed_image_by_operation(
        &self,
        image_id: Uuid,
        operation: &str,
    ) -> Result<Option<ProcessedImage>> {
        sqlx::query_as(
            r#"
            SELECT id, image_id, operation, path, size,
                   mime_type, format, status, created_at
            FROM processed_images
            WHERE image_id = $1 AND operation = $2
            LIMIT 1
            "#,
        )
        .bind(image_id)
        .bind(operation)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)
    }

    async fn delete_processed_images(&self, image_id: Uuid) -> Result<()> {
        self.retries
            .run(is_transient, || async move {
                sqlx::query("DELETE FROM processed_images WHERE image_id = $1")
                    .bind(image_id)
                    .execute(&self.pool)
                    .await
            })
            .await
            .map(|_| ())
            .map_err(map_db_error)
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Image>> {
        sqlx::query_as(
            r#"
            SELECT id, original_filename, original_size, mime_type,
                   status, original_path, bucket, created_at, updated_at
            FROM images
            WHERE status <> 'deleted'
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)
    }

    async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM images WHERE status <> 'deleted'")
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)
    }
}
