//! Upstream sharded streams.
//!
//! - `kinesis`: JSON 1.1 client for a Kinesis-compatible endpoint
//! - `consumer`: shard discovery and per-shard pollers feeding a delivery stream

pub mod consumer;
mod kinesis;

pub use consumer::{DEFAULT_POLL_INTERVAL, ShardConsumer};
pub use kinesis::KinesisClient;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::error::SourceError;

/// Shared handle to a shard source.
pub type ShardSourceRef = Arc<dyn ShardSource>;

/// Status string of a stream that can be read from.
pub const STREAM_ACTIVE: &str = "ACTIVE";

/// A stream and its shards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardedStream {
    pub name: String,
    pub status: String,
    pub shard_ids: Vec<String>,
}

/// One page of records read from a shard.
///
/// A missing `next_iterator` means the shard is closed.
#[derive(Debug, Clone, Default)]
pub struct ShardBatch {
    pub records: Vec<Bytes>,
    pub next_iterator: Option<String>,
    /// Records dropped because their data could not be decoded.
    pub skipped: usize,
}

/// Read access to a sharded stream service.
#[async_trait]
pub trait ShardSource: Send + Sync {
    /// Describe a stream, listing every shard.
    async fn describe_stream(&self, stream: &str) -> Result<ShardedStream, SourceError>;

    /// Iterator positioned at the oldest record of a shard.
    async fn get_shard_iterator(&self, stream: &str, shard_id: &str)
    -> Result<String, SourceError>;

    /// Read records at `iterator`. Zero records is a valid result.
    async fn get_records(&self, iterator: &str) -> Result<ShardBatch, SourceError>;
}
