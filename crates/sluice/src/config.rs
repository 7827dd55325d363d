//! Server configuration.
//!
//! Loaded from a YAML file with `${VAR}` / `${VAR:-default}` interpolation.
//! Every section is optional:
//!
//! ```yaml
//! address: 0.0.0.0:4573
//! region: us-east-1
//! account_id: "000000000000"
//! credentials:
//!   type: static
//!   access_key_id: ${AWS_ACCESS_KEY_ID}
//!   secret_access_key: ${AWS_SECRET_ACCESS_KEY}
//! storage:
//!   type: s3
//!   endpoint: http://localhost:9000
//! s3:
//!   interval_in_seconds: 60
//! kinesis:
//!   endpoint: http://localhost:4566
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use sluice_core::BackendConfig;
use sluice_core::config::{load_yaml_file, parse_yaml};
use sluice_core::error::InvalidValueSnafu;

use crate::auth::{CredentialProviderRef, Credentials, EnvCredentials, StaticCredentials};
use crate::error::ConfigError;
use crate::pipeline::StreamSettings;
use crate::sink::RetryPolicy;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listen address.
    #[serde(default = "default_address")]
    pub address: String,
    /// Region used in ARNs and for request signing.
    #[serde(default = "default_region")]
    pub region: String,
    /// Account id used in ARNs.
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Credentials inbound requests must be signed with.
    #[serde(default)]
    pub credentials: CredentialsConfig,
    /// Where delivered objects are written.
    #[serde(default)]
    pub storage: BackendConfig,
    /// Buffering overrides applied to every delivery stream.
    #[serde(default)]
    pub s3: S3Overrides,
    /// Kinesis endpoint for `KinesisStreamAsSource` streams.
    #[serde(default)]
    pub kinesis: Option<KinesisConfig>,
    /// Sink write behaviour.
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: default_address(),
            region: default_region(),
            account_id: default_account_id(),
            credentials: CredentialsConfig::default(),
            storage: BackendConfig::default(),
            s3: S3Overrides::default(),
            kinesis: None,
            delivery: DeliveryConfig::default(),
        }
    }
}

fn default_address() -> String {
    "0.0.0.0:4573".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_account_id() -> String {
    "000000000000".to_string()
}

/// Source of the shared secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum CredentialsConfig {
    /// `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` at request time.
    #[default]
    Env,
    /// Fixed keys.
    Static {
        access_key_id: String,
        secret_access_key: String,
        #[serde(default)]
        session_token: Option<String>,
    },
}

impl CredentialsConfig {
    pub fn provider(&self) -> CredentialProviderRef {
        match self {
            CredentialsConfig::Env => Arc::new(EnvCredentials),
            CredentialsConfig::Static {
                access_key_id,
                secret_access_key,
                session_token,
            } => {
                let mut credentials = Credentials::new(access_key_id, secret_access_key);
                credentials.session_token = session_token.clone();
                Arc::new(StaticCredentials::new(credentials))
            }
        }
    }
}

/// Forced buffering settings. Unset fields keep each stream's own hints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3Overrides {
    #[serde(default)]
    pub size_in_mbs: Option<u32>,
    #[serde(default)]
    pub interval_in_seconds: Option<u32>,
    #[serde(default)]
    pub disable_buffering: bool,
}

/// Kinesis connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KinesisConfig {
    pub endpoint: String,
    /// Pause between polls of each shard, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Retry and shutdown bounds for object writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_final_flush_timeout_secs")]
    pub final_flush_timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            final_flush_timeout_secs: default_final_flush_timeout_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    30
}

fn default_backoff_ms() -> u64 {
    100
}

fn default_final_flush_timeout_secs() -> u64 {
    5
}

impl Config {
    /// Load and validate a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Config = load_yaml_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a YAML document.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = parse_yaml(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        ensure!(
            !self.region.is_empty(),
            InvalidValueSnafu {
                field: "region",
                message: "must not be empty",
            }
        );
        ensure!(
            !self.account_id.is_empty(),
            InvalidValueSnafu {
                field: "account_id",
                message: "must not be empty",
            }
        );
        if let Some(size) = self.s3.size_in_mbs {
            ensure!(
                (1..=128).contains(&size),
                InvalidValueSnafu {
                    field: "s3.size_in_mbs",
                    message: format!("{size} is outside 1..=128"),
                }
            );
        }
        if let Some(interval) = self.s3.interval_in_seconds {
            ensure!(
                interval >= 1,
                InvalidValueSnafu {
                    field: "s3.interval_in_seconds",
                    message: "must be at least 1",
                }
            );
        }
        ensure!(
            self.delivery.max_attempts >= 1,
            InvalidValueSnafu {
                field: "delivery.max_attempts",
                message: "must be at least 1",
            }
        );
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.address.parse().map_err(|e: std::net::AddrParseError| {
            ConfigError::InvalidValue {
                field: "address".to_string(),
                message: e.to_string(),
            }
        })
    }

    /// Settings shared by every delivery stream.
    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            region: self.region.clone(),
            account_id: self.account_id.clone(),
            size_in_mbs: self.s3.size_in_mbs,
            interval_in_seconds: self.s3.interval_in_seconds,
            disable_buffering: self.s3.disable_buffering,
            retry: RetryPolicy {
                max_attempts: self.delivery.max_attempts,
                backoff: Duration::from_millis(self.delivery.backoff_ms),
            },
            poll_interval: self
                .kinesis
                .as_ref()
                .map(|k| Duration::from_millis(k.poll_interval_ms))
                .unwrap_or(crate::source::DEFAULT_POLL_INTERVAL),
            final_flush_timeout: Duration::from_secs(self.delivery.final_flush_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::LocalConfig;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::parse("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.socket_addr().unwrap().port(), 4573);

        let settings = config.stream_settings();
        assert_eq!(settings.region, "us-east-1");
        assert_eq!(settings.account_id, "000000000000");
        assert_eq!(settings.retry, RetryPolicy::default());
        assert_eq!(settings.final_flush_timeout, Duration::from_secs(5));
        assert!(settings.size_in_mbs.is_none());
    }

    #[test]
    fn test_full_document() {
        let config = Config::parse(
            r#"
address: 127.0.0.1:8080
region: ap-northeast-1
account_id: "123456789012"
credentials:
  type: static
  access_key_id: AKID
  secret_access_key: secret
storage:
  type: local
  root: /tmp/sluice
s3:
  size_in_mbs: 1
  interval_in_seconds: 2
  disable_buffering: true
kinesis:
  endpoint: http://localhost:4566
  poll_interval_ms: 250
delivery:
  max_attempts: 3
"#,
        )
        .unwrap();

        assert_eq!(
            config.storage,
            BackendConfig::Local(LocalConfig {
                root: "/tmp/sluice".into()
            })
        );
        let credentials = config.credentials.provider().credentials().unwrap();
        assert_eq!(credentials.access_key_id, "AKID");

        let settings = config.stream_settings();
        assert_eq!(settings.size_in_mbs, Some(1));
        assert_eq!(settings.interval_in_seconds, Some(2));
        assert!(settings.disable_buffering);
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.retry.backoff, Duration::from_millis(100));
    }

    #[test]
    fn test_rejects_unknown_fields_and_bad_values() {
        assert!(Config::parse("adress: 0.0.0.0:1").is_err());
        assert!(matches!(
            Config::parse("address: nowhere").unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
        assert!(matches!(
            Config::parse("s3:\n  size_in_mbs: 500").unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_load_interpolates_environment() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "region: ${{SLUICE_TEST_UNSET_REGION:-eu-west-1}}").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.region, "eu-west-1");
    }
}
