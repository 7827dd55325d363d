//! Object storage abstraction.
//!
//! Every bucket is reached through a [`StorageProvider`] built from a shared
//! [`BackendConfig`]: real S3 (or an S3-compatible endpoint), a local directory
//! per bucket, or an in-process memory store.

mod local;
mod memory;
mod pool;
mod s3;

pub use local::LocalConfig;
pub use pool::{StoragePool, StoragePoolRef};
pub use s3::S3Config;

use bytes::Bytes;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Instant;

use crate::emit;
use crate::error::{InvalidBucketSnafu, ObjectStoreSnafu, StorageError};
use crate::metrics::events::{RequestStatus, StorageOperation, StorageRequest, StorageRequestDuration};

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// How buckets are reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Amazon S3 or any S3-compatible endpoint.
    S3(S3Config),
    /// One directory per bucket under a root directory.
    Local(LocalConfig),
    /// Process-local memory, one store per bucket.
    Memory,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::S3(S3Config::default())
    }
}

/// Storage provider bound to a single bucket.
#[derive(Clone)]
pub struct StorageProvider {
    pub(crate) bucket: String,
    pub(crate) object_store: Arc<dyn ObjectStore>,
    pub(crate) canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

impl StorageProvider {
    /// Create a provider for `bucket` on the given backend.
    pub async fn for_bucket(backend: &BackendConfig, bucket: &str) -> Result<Self, StorageError> {
        ensure!(
            is_valid_bucket_name(bucket),
            InvalidBucketSnafu {
                bucket: bucket.to_string()
            }
        );

        match backend {
            BackendConfig::S3(config) => Self::construct_s3(config, bucket),
            BackendConfig::Local(config) => Self::construct_local(config, bucket).await,
            BackendConfig::Memory => Ok(Self::construct_memory(bucket)),
        }
    }

    /// Bucket this provider writes to.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Human-readable location of the bucket.
    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// Put bytes at `key`.
    pub async fn put(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        let path = Path::from(key);
        let start = Instant::now();
        let result = self.object_store.put(&path, PutPayload::from(bytes)).await;
        record_request(StorageOperation::Put, result.is_ok(), start);

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Get the contents of the object at `key`.
    #[cfg(test)]
    pub(crate) async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = Path::from(key);
        let start = Instant::now();
        let result = self.object_store.get(&path).await;
        record_request(StorageOperation::Get, result.is_ok(), start);

        result
            .context(ObjectStoreSnafu)?
            .bytes()
            .await
            .context(ObjectStoreSnafu)
    }

    /// List every object key under `prefix`, sorted.
    #[cfg(test)]
    pub(crate) async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError> {
        use futures::TryStreamExt;

        let prefix = prefix.map(Path::from);
        let start = Instant::now();
        let result: Result<Vec<_>, _> = self
            .object_store
            .list(prefix.as_ref())
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await;
        record_request(StorageOperation::List, result.is_ok(), start);

        let mut keys = result.context(ObjectStoreSnafu)?;
        keys.sort();
        Ok(keys)
    }

    /// Check that the bucket is reachable.
    pub async fn probe(&self) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self.object_store.list_with_delimiter(None).await;
        record_request(StorageOperation::List, result.is_ok(), start);

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }
}

fn record_request(operation: StorageOperation, ok: bool, start: Instant) {
    let status = if ok {
        RequestStatus::Success
    } else {
        RequestStatus::Error
    };
    emit!(StorageRequest { operation, status });
    emit!(StorageRequestDuration {
        operation,
        duration: start.elapsed(),
    });
}

/// S3 bucket naming rules, loosely: 3-63 chars of lowercase letters, digits, `.` and `-`.
fn is_valid_bucket_name(bucket: &str) -> bool {
    (3..=63).contains(&bucket.len())
        && bucket
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-')
        && !bucket.starts_with(['.', '-'])
        && !bucket.ends_with(['.', '-'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_bucket_name_rules() {
        assert!(is_valid_bucket_name("my-bucket.logs"));
        assert!(!is_valid_bucket_name("ab"));
        assert!(!is_valid_bucket_name("Upper"));
        assert!(!is_valid_bucket_name("-leading"));
        assert!(!is_valid_bucket_name("trailing."));
        assert!(!is_valid_bucket_name("under_score"));
    }

    #[tokio::test]
    async fn test_invalid_bucket_is_not_found() {
        let err = StorageProvider::for_bucket(&BackendConfig::Memory, "x")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_memory_put_get_list() {
        let provider = StorageProvider::for_bucket(&BackendConfig::Memory, "bucket")
            .await
            .unwrap();
        provider
            .put("2018/08/27/a", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        provider
            .put("other/b", Bytes::from_static(b"world"))
            .await
            .unwrap();

        assert_eq!(provider.get("2018/08/27/a").await.unwrap().as_ref(), b"hello");
        assert_eq!(provider.list(None).await.unwrap().len(), 2);
        assert_eq!(
            provider.list(Some("2018")).await.unwrap(),
            vec!["2018/08/27/a".to_string()]
        );
        provider.probe().await.unwrap();
    }

    #[tokio::test]
    async fn test_local_backend_writes_under_bucket_directory() {
        let root = TempDir::new().unwrap();
        let backend = BackendConfig::Local(LocalConfig {
            root: root.path().to_path_buf(),
        });
        let provider = StorageProvider::for_bucket(&backend, "logs").await.unwrap();

        provider
            .put("prefix/object", Bytes::from_static(&[1, 2, 3]))
            .await
            .unwrap();

        let written = std::fs::read(root.path().join("logs/prefix/object")).unwrap();
        assert_eq!(written, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let provider = StorageProvider::for_bucket(&BackendConfig::Memory, "bucket")
            .await
            .unwrap();
        let err = provider.get("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_backend_config_yaml() {
        let backend: BackendConfig =
            serde_yaml::from_str("type: s3\nendpoint: http://localhost:4566\n").unwrap();
        match backend {
            BackendConfig::S3(config) => {
                assert_eq!(config.endpoint.as_deref(), Some("http://localhost:4566"))
            }
            other => panic!("unexpected backend: {other:?}"),
        }

        let backend: BackendConfig = serde_yaml::from_str("type: memory").unwrap();
        assert_eq!(backend, BackendConfig::Memory);
    }
}
