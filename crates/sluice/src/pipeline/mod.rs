//! Delivery stream lifecycle.
//!
//! A [`Pipeline`] is the live state of one delivery stream: its intake queue,
//! its cancellation token and the configuration it was created with. The
//! [`DeliveryStreams`] controller creates, registers and tears them down.

mod controller;
mod record;

pub use controller::{
    CreateSpec, DeliveryStreams, INTAKE_CAPACITY, SourceSpec, StreamDescription, StreamSettings,
};
pub use record::Record;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::arn::{BucketArn, PipelineId};
use crate::sink::CompressionFormat;

/// Where a delivery stream's records come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceType {
    /// Clients push records with PutRecord / PutRecordBatch.
    DirectPut,
    /// Records are pulled from a Kinesis data stream.
    KinesisStreamAsSource,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::DirectPut => "DirectPut",
            SourceType::KinesisStreamAsSource => "KinesisStreamAsSource",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DirectPut" => Ok(SourceType::DirectPut),
            "KinesisStreamAsSource" => Ok(SourceType::KinesisStreamAsSource),
            other => Err(format!("unsupported DeliveryStreamType: {other}")),
        }
    }
}

/// Lifecycle status reported by describe.
///
/// Creation completes synchronously, so a registered stream is always active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Active,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Active => "ACTIVE",
        }
    }
}

/// Size and time flush thresholds as requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferingHints {
    pub size_in_mbs: u32,
    pub interval_in_seconds: u32,
}

impl Default for BufferingHints {
    fn default() -> Self {
        Self {
            size_in_mbs: 5,
            interval_in_seconds: 300,
        }
    }
}

/// Object storage destination of a delivery stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkDescriptor {
    pub bucket_arn: BucketArn,
    pub buffering: BufferingHints,
    pub compression: CompressionFormat,
    pub prefix: String,
    pub error_prefix: String,
    pub role_arn: Option<String>,
}

/// Upstream Kinesis source of a delivery stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub stream_arn: String,
    pub role_arn: Option<String>,
    pub delivery_start: DateTime<Utc>,
}

/// Live state of one registered delivery stream.
#[derive(Debug)]
pub struct Pipeline {
    pub(crate) id: PipelineId,
    pub(crate) source_type: SourceType,
    pub(crate) intake: mpsc::Sender<Record>,
    pub(crate) token: CancellationToken,
    pub(crate) destination: SinkDescriptor,
    pub(crate) source: Option<SourceDescriptor>,
    pub(crate) created_at: DateTime<Utc>,
    /// Creation order tie-breaker for identical timestamps.
    pub(crate) sequence: u64,
}

impl Pipeline {
    pub fn id(&self) -> &PipelineId {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.id.name()
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    pub fn destination(&self) -> &SinkDescriptor {
        &self.destination
    }

    pub fn source(&self) -> Option<&SourceDescriptor> {
        self.source.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Sort key for listing: creation time, then creation order.
    pub(crate) fn creation_order(&self) -> (DateTime<Utc>, u64) {
        (self.created_at, self.sequence)
    }

    /// Offer a record to the intake queue, waiting while it is full.
    ///
    /// Returns the record back if the intake has been closed.
    pub(crate) async fn offer(&self, record: Record) -> Result<(), Record> {
        if self.token.is_cancelled() {
            return Err(record);
        }
        self.intake.send(record).await.map_err(|e| e.0)
    }

    /// Cancel every task of this pipeline. The sink drains and flushes once.
    pub(crate) fn close(&self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_names() {
        assert_eq!(
            "KinesisStreamAsSource".parse::<SourceType>().unwrap(),
            SourceType::KinesisStreamAsSource
        );
        assert_eq!(SourceType::DirectPut.to_string(), "DirectPut");
        assert!("Firehose".parse::<SourceType>().is_err());
    }

    #[test]
    fn test_default_buffering_hints() {
        let hints = BufferingHints::default();
        assert_eq!(hints.size_in_mbs, 5);
        assert_eq!(hints.interval_in_seconds, 300);
    }

    #[tokio::test]
    async fn test_offer_after_close_is_rejected() {
        let (tx, mut rx) = mpsc::channel(4);
        let pipeline = Pipeline {
            id: PipelineId::new("us-east-1", "1", "p"),
            source_type: SourceType::DirectPut,
            intake: tx,
            token: CancellationToken::new(),
            destination: SinkDescriptor {
                bucket_arn: "arn:aws:s3:::bucket".parse().unwrap(),
                buffering: BufferingHints::default(),
                compression: CompressionFormat::Uncompressed,
                prefix: String::new(),
                error_prefix: String::new(),
                role_arn: None,
            },
            source: None,
            created_at: Utc::now(),
            sequence: 0,
        };

        pipeline.offer(Record::new("a")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().payload().as_ref(), b"a");

        pipeline.close();
        let rejected = pipeline.offer(Record::new("b")).await.unwrap_err();
        assert_eq!(rejected.payload().as_ref(), b"b");
    }
}
