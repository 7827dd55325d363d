//! S3 storage backend implementation.

use object_store::aws::AmazonS3Builder;
use object_store::{ObjectStore, RetryConfig};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{S3ConfigSnafu, StorageError};

use super::StorageProvider;

/// S3 connection settings shared by every bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3Config {
    /// Custom endpoint (LocalStack, MinIO, ...). Enables path-style requests and plain HTTP.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Region; falls back to the environment when unset.
    #[serde(default)]
    pub region: Option<String>,
    /// Extra `object_store` options (e.g. `aws_access_key_id`).
    #[serde(default)]
    pub options: HashMap<String, String>,
}

/// Retries inside the client stay short: the delivery sink does its own retrying.
fn client_retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: 2,
        retry_timeout: Duration::from_secs(10),
        ..RetryConfig::default()
    }
}

impl StorageProvider {
    pub(super) fn construct_s3(config: &S3Config, bucket: &str) -> Result<Self, StorageError> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_retry(client_retry_config());

        for (key, value) in &config.options {
            builder = builder.with_config(key.parse().context(S3ConfigSnafu)?, value.clone());
        }

        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }

        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false)
                .with_allow_http(true);
        }

        let canonical_url = match (&config.endpoint, &config.region) {
            (Some(endpoint), _) => format!("{}/{}", endpoint.trim_end_matches('/'), bucket),
            (None, Some(region)) => format!("https://s3.{region}.amazonaws.com/{bucket}"),
            (None, None) => format!("s3://{bucket}"),
        };

        let object_store: Arc<dyn ObjectStore> =
            Arc::new(builder.build().context(S3ConfigSnafu)?);

        Ok(Self {
            bucket: bucket.to_string(),
            object_store,
            canonical_url,
        })
    }
}
