//! In-memory storage backend, used for tests and throwaway runs.

use object_store::ObjectStore;
use object_store::memory::InMemory;
use std::sync::Arc;

use super::StorageProvider;

impl StorageProvider {
    pub(super) fn construct_memory(bucket: &str) -> Self {
        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        Self {
            bucket: bucket.to_string(),
            object_store,
            canonical_url: format!("memory://{bucket}"),
        }
    }
}
