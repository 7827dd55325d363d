//! Per-bucket provider cache.
//!
//! Delivery streams writing to the same bucket share one provider, and with
//! it one HTTP connection pool (or, for the memory backend, one store).

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::StorageError;

use super::{BackendConfig, StorageProvider, StorageProviderRef};

/// Reference-counted handle to a [`StoragePool`].
pub type StoragePoolRef = Arc<StoragePool>;

/// Pool of storage providers keyed by bucket name.
pub struct StoragePool {
    backend: BackendConfig,
    providers: RwLock<HashMap<String, StorageProviderRef>>,
}

impl std::fmt::Debug for StoragePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoragePool")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl StoragePool {
    /// Create an empty pool for the given backend.
    pub fn new(backend: BackendConfig) -> Self {
        Self {
            backend,
            providers: RwLock::new(HashMap::new()),
        }
    }

    /// Backend every provider in this pool is built on.
    pub fn backend(&self) -> &BackendConfig {
        &self.backend
    }

    /// Get or create the provider for `bucket`.
    pub async fn get_or_create(&self, bucket: &str) -> Result<StorageProviderRef, StorageError> {
        {
            let providers = self.providers.read().await;
            if let Some(provider) = providers.get(bucket) {
                return Ok(provider.clone());
            }
        }

        let mut providers = self.providers.write().await;
        // Another task may have created it while we waited for the write lock
        if let Some(provider) = providers.get(bucket) {
            return Ok(provider.clone());
        }

        let provider = Arc::new(StorageProvider::for_bucket(&self.backend, bucket).await?);
        providers.insert(bucket.to_string(), provider.clone());
        Ok(provider)
    }
}
