//! Local filesystem storage backend implementation.

use object_store::ObjectStore;
use object_store::local::LocalFileSystem;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{IoSnafu, ObjectStoreSnafu, StorageError};

use super::StorageProvider;

/// Local filesystem configuration: each bucket is a directory under `root`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalConfig {
    pub root: PathBuf,
}

impl StorageProvider {
    pub(super) async fn construct_local(
        config: &LocalConfig,
        bucket: &str,
    ) -> Result<Self, StorageError> {
        let path = config.root.join(bucket);
        tokio::fs::create_dir_all(&path).await.context(IoSnafu)?;

        let object_store: Arc<dyn ObjectStore> =
            Arc::new(LocalFileSystem::new_with_prefix(&path).context(ObjectStoreSnafu)?);

        Ok(Self {
            bucket: bucket.to_string(),
            object_store,
            canonical_url: format!("file://{}", path.display()),
        })
    }
}
