//! sluice-core: shared components for the sluice delivery stream emulator.
//!
//! - `storage/` - Object storage abstraction (S3, local, memory) and per-bucket pool
//! - `metrics/` - Prometheus metrics infrastructure
//! - `config/` - Environment variable interpolation, YAML loading and CLI args
//! - `signal` - Signal handling for graceful shutdown
//! - `tracing` - Subscriber setup
//! - `error` - Common error types

pub mod config;
pub mod error;
pub mod metrics;
pub mod signal;
pub mod storage;
pub mod tracing;

// Re-export commonly used items
pub use config::{CliArgs, KB, MB};
pub use error::{ConfigError, MetricsError, StorageError};
pub use metrics::{MetricsController, init as init_metrics, init_test as init_metrics_test};
pub use signal::shutdown_signal;
pub use storage::{
    BackendConfig, LocalConfig, S3Config, StoragePool, StoragePoolRef, StorageProvider,
    StorageProviderRef,
};
pub use self::tracing::init_tracing;
