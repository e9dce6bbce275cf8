//! Object-store adapter: blob I/O keyed by sanitised path.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

pub mod path;
pub mod s3;

pub use s3::S3ObjectStore;

/// Capability surface the ingest coordinator and worker depend on.
/// Production binds to S3-compatible storage; tests bind to an in-memory
/// fake.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an original upload under a generated date-sharded key and
    /// return that key.
    async fn save_original(&self, filename: &str, data: Bytes) -> Result<String>;

    /// Store a derived artifact at `path` (already sanitised) with a
    /// long-lived cache-control header.
    async fn save_processed(&self, path: &str, data: Bytes, content_type: &str) -> Result<()>;

    /// Fetch a whole object. Blobs are bounded by the upload size gate,
    /// so they are returned collected rather than streamed.
    async fn get_object(&self, path: &str) -> Result<Bytes>;

    async fn delete_object(&self, path: &str) -> Result<()>;

    /// Best-effort bulk delete; individual failures are aggregated into
    /// a single summary error.
    async fn delete_objects_with_prefix(&self, prefix: &str) -> Result<()>;
}
