//! Delivery to object storage.
//!
//! - `buffered`: per-stream accumulator that flushes on size, time and shutdown
//! - `prefix`: object key templates
//! - `compression`: whole-blob encoding of flushed batches

pub mod buffered;
mod compression;
pub mod prefix;

pub use buffered::{BufferedSink, RetryPolicy, SinkSettings};
pub use compression::CompressionFormat;
pub use prefix::KeyTemplate;

use async_trait::async_trait;
use bytes::Bytes;
use snafu::prelude::*;
use std::sync::Arc;

use sluice_core::StoragePoolRef;

use crate::error::{SinkError, StorageSnafu};

/// Shared handle to an object sink.
pub type ObjectSinkRef = Arc<dyn ObjectSink>;

/// Destination for flushed batches.
///
/// Every error from `put` is treated as retryable by callers.
#[async_trait]
pub trait ObjectSink: Send + Sync {
    /// Write `body` to `key` in `bucket`.
    async fn put(&self, bucket: &str, key: &str, body: Bytes) -> Result<(), SinkError>;

    /// Check that `bucket` exists and is reachable.
    async fn probe(&self, bucket: &str) -> Result<(), SinkError>;
}

/// Object sink backed by the shared storage pool.
#[derive(Debug, Clone)]
pub struct StorageSink {
    pool: StoragePoolRef,
}

impl StorageSink {
    pub fn new(pool: StoragePoolRef) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ObjectSink for StorageSink {
    async fn put(&self, bucket: &str, key: &str, body: Bytes) -> Result<(), SinkError> {
        let provider = self.pool.get_or_create(bucket).await.context(StorageSnafu)?;
        provider.put(key, body).await.context(StorageSnafu)
    }

    async fn probe(&self, bucket: &str) -> Result<(), SinkError> {
        let provider = self.pool.get_or_create(bucket).await.context(StorageSnafu)?;
        provider.probe().await.context(StorageSnafu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::{BackendConfig, LocalConfig, StoragePool};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_storage_sink_writes_through_pool() {
        let pool = Arc::new(StoragePool::new(BackendConfig::Memory));
        let sink = StorageSink::new(pool.clone());

        sink.probe("bucket").await.unwrap();
        sink.put("bucket", "a/b", Bytes::from_static(b"data"))
            .await
            .unwrap();

        let provider = pool.get_or_create("bucket").await.unwrap();
        assert_eq!(provider.bucket(), "bucket");
        assert_eq!(provider.canonical_url(), "memory://bucket");
    }

    #[tokio::test]
    async fn test_invalid_bucket_probe_is_not_found() {
        let sink = StorageSink::new(Arc::new(StoragePool::new(BackendConfig::Memory)));
        let err = sink.probe("No_Such_Bucket").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_local_backend_round_trip() {
        let root = TempDir::new().unwrap();
        let pool = Arc::new(StoragePool::new(BackendConfig::Local(LocalConfig {
            root: root.path().to_path_buf(),
        })));
        let sink = StorageSink::new(pool);

        sink.put("logs", "2018/08/27/x", Bytes::from_static(b"abc"))
            .await
            .unwrap();
        let written = std::fs::read(root.path().join("logs/2018/08/27/x")).unwrap();
        assert_eq!(written, b"abc");
    }
}
