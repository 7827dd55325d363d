//! sluice: a delivery stream emulator.
//!
//! This crate handles:
//! - The Firehose-style JSON API over HTTP, with SigV4 request verification
//! - Per-stream buffering with size, interval and shutdown flushes
//! - Object writes with gzip, templated keys and bounded retries
//! - Pulling records from Kinesis-compatible sharded streams

pub mod app;
pub mod arn;
pub mod auth;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod server;
pub mod service;
pub mod sink;
pub mod source;

// Re-export commonly used items
pub use app::{App, run};
pub use config::Config;
pub use error::{AppError, FirehoseError};
pub use pipeline::{DeliveryStreams, StreamSettings};
pub use service::{DeliveryStreamService, Operation};

// Re-export from sluice-core
pub use sluice_core::{CliArgs, init_tracing, shutdown_signal};
