//! Creation, lookup and teardown of delivery streams.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use sluice_core::metrics::events::RecordsAccepted;
use sluice_core::{MB, emit};

use super::{
    Pipeline, Record, SinkDescriptor, SourceDescriptor, SourceType, StreamStatus,
};
use crate::arn::PipelineId;
use crate::error::FirehoseError;
use crate::registry::StreamRegistry;
use crate::sink::{BufferedSink, KeyTemplate, ObjectSinkRef, RetryPolicy, SinkSettings};
use crate::source::{DEFAULT_POLL_INTERVAL, ShardConsumer, ShardSourceRef};

/// Capacity of each stream's intake queue. Producers wait when it is full.
pub const INTAKE_CAPACITY: usize = 128;

/// Process-wide settings applied to every delivery stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    pub region: String,
    pub account_id: String,
    /// Replaces every stream's requested `SizeInMBs`.
    pub size_in_mbs: Option<u32>,
    /// Replaces every stream's requested `IntervalInSeconds`.
    pub interval_in_seconds: Option<u32>,
    /// Write each record as its own object.
    pub disable_buffering: bool,
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    pub final_flush_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            account_id: "000000000000".to_string(),
            size_in_mbs: None,
            interval_in_seconds: None,
            disable_buffering: false,
            retry: RetryPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            final_flush_timeout: Duration::from_secs(5),
        }
    }
}

/// Kinesis source requested at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub stream_arn: String,
    pub role_arn: Option<String>,
}

/// A validated create request.
#[derive(Debug, Clone)]
pub struct CreateSpec {
    pub name: String,
    pub source_type: SourceType,
    pub destination: SinkDescriptor,
    pub source: Option<SourceSpec>,
}

/// Point-in-time view of a registered stream.
#[derive(Debug, Clone)]
pub struct StreamDescription {
    pub id: PipelineId,
    pub source_type: SourceType,
    /// Always `Active`: a stream is registered only once fully set up.
    pub status: StreamStatus,
    pub destination: SinkDescriptor,
    pub source: Option<SourceDescriptor>,
    pub created_at: DateTime<Utc>,
    pub version_id: &'static str,
}

impl StreamDescription {
    fn of(pipeline: &Pipeline) -> Self {
        Self {
            id: pipeline.id().clone(),
            source_type: pipeline.source_type(),
            status: StreamStatus::Active,
            destination: pipeline.destination().clone(),
            source: pipeline.source().cloned(),
            created_at: pipeline.created_at(),
            version_id: "1",
        }
    }

    pub fn name(&self) -> &str {
        self.id.name()
    }
}

/// Owner of every delivery stream in the process.
///
/// Each stream's tasks run under a child of one root token, so
/// [`shutdown`](Self::shutdown) stops and flushes all of them. Dispatched
/// writes have a token of their own and outlive both delete and shutdown
/// until the final flush timeout.
pub struct DeliveryStreams {
    settings: StreamSettings,
    registry: StreamRegistry,
    sink: ObjectSinkRef,
    source: Option<ShardSourceRef>,
    root: CancellationToken,
    writes: CancellationToken,
    tasks: TaskTracker,
    sequence: AtomicU64,
}

impl DeliveryStreams {
    /// `source` is `None` when no Kinesis endpoint is configured.
    pub fn new(
        settings: StreamSettings,
        sink: ObjectSinkRef,
        source: Option<ShardSourceRef>,
    ) -> Self {
        Self {
            settings,
            registry: StreamRegistry::new(),
            sink,
            source,
            root: CancellationToken::new(),
            writes: CancellationToken::new(),
            tasks: TaskTracker::new(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Identifier of the stream called `name` in this region and account.
    pub fn id_for(&self, name: &str) -> PipelineId {
        PipelineId::new(&self.settings.region, &self.settings.account_id, name)
    }

    /// Set up and register a delivery stream.
    ///
    /// Nothing is registered unless the bucket and the source are reachable.
    pub async fn create(&self, spec: CreateSpec) -> Result<PipelineId, FirehoseError> {
        let id = self.id_for(&spec.name);
        if self.registry.find(&id).is_some() {
            return Err(already_exists(&spec.name));
        }
        if spec.source_type == SourceType::KinesisStreamAsSource && spec.source.is_none() {
            return Err(FirehoseError::invalid(
                "KinesisStreamSourceConfiguration is required for KinesisStreamAsSource",
            ));
        }

        let bucket = spec.destination.bucket_arn.bucket.clone();
        if let Err(e) = self.sink.probe(&bucket).await {
            warn!(target = %spec.name, bucket = %bucket, error = %e, "Bucket probe failed");
            return Err(if e.is_not_found() {
                FirehoseError::ResourceNotFound {
                    message: "invalid BucketName".to_string(),
                }
            } else {
                FirehoseError::unavailable(format!("unable to reach bucket {bucket}"))
            });
        }

        let token = self.root.child_token();
        let (intake, receiver) = mpsc::channel(INTAKE_CAPACITY);
        let sink = BufferedSink::new(
            self.sink_settings(&spec.name, &spec.destination),
            self.sink.clone(),
            receiver,
            self.writes.clone(),
        );
        self.tasks.spawn(sink.run(token.clone()));

        let created_at = Utc::now();
        let (consumer, source) = match (spec.source_type, spec.source) {
            (SourceType::KinesisStreamAsSource, Some(source)) => {
                let consumer = match ShardConsumer::setup(
                    &source.stream_arn,
                    self.source.clone(),
                    self.settings.poll_interval,
                )
                .await
                {
                    Ok(consumer) => consumer,
                    Err(e) => {
                        token.cancel();
                        return Err(e);
                    }
                };
                info!(
                    target = %spec.name,
                    stream_arn = %source.stream_arn,
                    shards = consumer.shard_count(),
                    "Kinesis source attached"
                );
                let descriptor = SourceDescriptor {
                    stream_arn: source.stream_arn,
                    role_arn: source.role_arn,
                    delivery_start: created_at,
                };
                (Some(consumer), Some(descriptor))
            }
            _ => (None, None),
        };

        let pipeline = Arc::new(Pipeline {
            id: id.clone(),
            source_type: spec.source_type,
            intake: intake.clone(),
            token: token.clone(),
            destination: spec.destination,
            source,
            created_at,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        });
        if self.registry.try_add(pipeline).is_err() {
            token.cancel();
            return Err(already_exists(&spec.name));
        }

        if let Some(consumer) = consumer {
            self.tasks
                .spawn(consumer.run(token, intake, spec.name.clone()));
        }

        info!(target = %spec.name, arn = %id, "Delivery stream created");
        Ok(id)
    }

    /// Unregister a stream. Its sink drains the queue and flushes once.
    pub fn delete(&self, name: &str) -> Result<(), FirehoseError> {
        let pipeline = self
            .registry
            .delete(&self.id_for(name))
            .ok_or_else(|| FirehoseError::not_found(name))?;
        pipeline.close();
        info!(target = %name, "Delivery stream deleted");
        Ok(())
    }

    pub fn describe(&self, name: &str) -> Result<StreamDescription, FirehoseError> {
        self.registry
            .find(&self.id_for(name))
            .map(|pipeline| StreamDescription::of(&pipeline))
            .ok_or_else(|| FirehoseError::not_found(name))
    }

    /// Queue one record. Returns its fresh id.
    pub async fn enqueue(&self, name: &str, payload: Bytes) -> Result<String, FirehoseError> {
        let mut ids = self.enqueue_batch(name, vec![payload]).await?;
        Ok(ids.remove(0))
    }

    /// Queue records in order. Returns their ids in the same order.
    ///
    /// Fails if the stream is absent or its intake closes part way through.
    pub async fn enqueue_batch(
        &self,
        name: &str,
        payloads: Vec<Bytes>,
    ) -> Result<Vec<String>, FirehoseError> {
        let pipeline = self
            .registry
            .find(&self.id_for(name))
            .ok_or_else(|| FirehoseError::not_found(name))?;

        let mut ids = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let record = Record::new(payload);
            let record_id = record.id().to_string();
            if pipeline.offer(record).await.is_err() {
                debug!(target = %name, "Intake closed while enqueuing");
                return Err(FirehoseError::not_found(name));
            }
            ids.push(record_id);
        }

        emit!(RecordsAccepted {
            count: ids.len() as u64,
            stream: name.to_string(),
        });
        Ok(ids)
    }

    /// Names of streams in creation order, and whether more remain.
    pub fn list(
        &self,
        source_type: Option<SourceType>,
        exclusive_start: Option<&str>,
        limit: usize,
    ) -> (Vec<String>, bool) {
        let page = self.registry.list(source_type, exclusive_start, limit);
        let names = page
            .pipelines
            .iter()
            .map(|pipeline| pipeline.name().to_string())
            .collect();
        (names, page.has_next)
    }

    /// Cancel every stream and wait for their final flushes.
    pub async fn shutdown(&self) {
        info!(streams = self.registry.len(), "Stopping delivery streams");
        self.root.cancel();
        self.tasks.close();

        let timeout = self.settings.final_flush_timeout;
        if tokio::time::timeout(timeout, self.tasks.wait()).await.is_err() {
            warn!(
                timeout_secs = timeout.as_secs(),
                "Pending writes did not finish in time, cancelling"
            );
            self.writes.cancel();
            self.tasks.wait().await;
        }
        info!("Delivery streams stopped");
    }

    fn sink_settings(&self, name: &str, destination: &SinkDescriptor) -> SinkSettings {
        let size_in_mbs = self
            .settings
            .size_in_mbs
            .unwrap_or(destination.buffering.size_in_mbs);
        let interval = self
            .settings
            .interval_in_seconds
            .unwrap_or(destination.buffering.interval_in_seconds);

        SinkSettings {
            stream_name: name.to_string(),
            bucket: destination.bucket_arn.bucket.clone(),
            size_threshold: size_in_mbs as usize * MB,
            interval: Duration::from_secs(u64::from(interval)),
            disable_buffering: self.settings.disable_buffering,
            compression: destination.compression,
            keys: KeyTemplate::new(&destination.prefix, &destination.error_prefix),
            retry: self.settings.retry,
            final_flush_timeout: self.settings.final_flush_timeout,
        }
    }
}

impl std::fmt::Debug for DeliveryStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryStreams")
            .field("settings", &self.settings)
            .field("streams", &self.registry.len())
            .finish_non_exhaustive()
    }
}

fn already_exists(name: &str) -> FirehoseError {
    FirehoseError::ResourceInUse {
        message: format!("DeliveryStreamName: {name} already exists"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SinkError, SourceError};
    use crate::pipeline::BufferingHints;
    use crate::sink::{CompressionFormat, ObjectSink, StorageSink};
    use crate::source::{STREAM_ACTIVE, ShardBatch, ShardSource, ShardedStream};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use sluice_core::{BackendConfig, StoragePool};

    /// Captures every write in order.
    #[derive(Default)]
    struct CapturingSink {
        objects: Mutex<Vec<(String, String, Bytes)>>,
    }

    impl CapturingSink {
        fn bodies(&self) -> Vec<Bytes> {
            self.objects.lock().iter().map(|(_, _, b)| b.clone()).collect()
        }
    }

    #[async_trait]
    impl ObjectSink for CapturingSink {
        async fn put(&self, bucket: &str, key: &str, body: Bytes) -> Result<(), SinkError> {
            self.objects
                .lock()
                .push((bucket.to_string(), key.to_string(), body));
            Ok(())
        }

        async fn probe(&self, _: &str) -> Result<(), SinkError> {
            Ok(())
        }
    }

    /// Single-shard stream that yields one page and closes.
    struct OnePageSource;

    #[async_trait]
    impl ShardSource for OnePageSource {
        async fn describe_stream(&self, stream: &str) -> Result<ShardedStream, SourceError> {
            Ok(ShardedStream {
                name: stream.to_string(),
                status: STREAM_ACTIVE.to_string(),
                shard_ids: vec!["shardId-000".to_string()],
            })
        }

        async fn get_shard_iterator(&self, _: &str, _: &str) -> Result<String, SourceError> {
            Ok("it".to_string())
        }

        async fn get_records(&self, _: &str) -> Result<ShardBatch, SourceError> {
            Ok(ShardBatch {
                records: vec![Bytes::from_static(b"from-kinesis")],
                next_iterator: None,
                skipped: 0,
            })
        }
    }

    fn destination(bucket: &str) -> SinkDescriptor {
        SinkDescriptor {
            bucket_arn: format!("arn:aws:s3:::{bucket}").parse().unwrap(),
            buffering: BufferingHints::default(),
            compression: CompressionFormat::Uncompressed,
            prefix: String::new(),
            error_prefix: String::new(),
            role_arn: None,
        }
    }

    fn direct(name: &str) -> CreateSpec {
        CreateSpec {
            name: name.to_string(),
            source_type: SourceType::DirectPut,
            destination: destination("bucket"),
            source: None,
        }
    }

    fn streams(sink: Arc<CapturingSink>) -> DeliveryStreams {
        DeliveryStreams::new(StreamSettings::default(), sink, None)
    }

    #[tokio::test]
    async fn test_create_rejects_live_duplicate() {
        let streams = streams(Arc::new(CapturingSink::default()));

        let id = streams.create(direct("orders")).await.unwrap();
        assert_eq!(
            id.to_string(),
            "arn:aws:firehose:us-east-1:000000000000:deliverystream/orders"
        );
        streams.create(direct("payments")).await.unwrap();

        let err = streams.create(direct("orders")).await.unwrap_err();
        assert_eq!(err.error_type(), "ResourceInUseException");
        assert_eq!(streams.registry().len(), 2);

        streams.delete("orders").unwrap();
        streams.create(direct("orders")).await.unwrap();
        streams.shutdown().await;
    }

    #[tokio::test]
    async fn test_create_with_bad_bucket_registers_nothing() {
        let pool = Arc::new(StoragePool::new(BackendConfig::Memory));
        let streams = DeliveryStreams::new(
            StreamSettings::default(),
            Arc::new(StorageSink::new(pool)),
            None,
        );

        let mut spec = direct("orders");
        spec.destination = destination("No_Such_Bucket!");
        let err = streams.create(spec).await.unwrap_err();
        assert_eq!(err.error_type(), "ResourceNotFoundException");
        assert_eq!(err.to_string(), "invalid BucketName");
        assert!(streams.registry().is_empty());
    }

    #[tokio::test]
    async fn test_kinesis_without_endpoint_is_invalid() {
        let streams = streams(Arc::new(CapturingSink::default()));
        let spec = CreateSpec {
            source_type: SourceType::KinesisStreamAsSource,
            source: Some(SourceSpec {
                stream_arn: "arn:aws:kinesis:us-east-1:000000000000:stream/clicks".into(),
                role_arn: None,
            }),
            ..direct("clicks")
        };
        let err = streams.create(spec).await.unwrap_err();
        assert_eq!(err.error_type(), "InvalidArgumentException");
        assert!(streams.registry().is_empty());
        streams.shutdown().await;
    }

    #[tokio::test]
    async fn test_delete_flushes_and_closes_intake() {
        let sink = Arc::new(CapturingSink::default());
        let streams = streams(sink.clone());
        streams.create(direct("orders")).await.unwrap();

        let ids = streams
            .enqueue_batch(
                "orders",
                vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")],
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);

        streams.delete("orders").unwrap();
        let err = streams
            .enqueue("orders", Bytes::from_static(b"three"))
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "ResourceNotFoundException");
        assert!(streams.delete("orders").is_err());

        streams.shutdown().await;
        assert_eq!(sink.bodies(), vec![Bytes::from_static(b"onetwo")]);
    }

    #[tokio::test]
    async fn test_describe_echoes_configuration() {
        let streams = streams(Arc::new(CapturingSink::default()));
        let before = Utc::now();
        streams.create(direct("orders")).await.unwrap();

        let description = streams.describe("orders").unwrap();
        assert_eq!(description.name(), "orders");
        assert_eq!(description.status, StreamStatus::Active);
        assert_eq!(description.version_id, "1");
        assert_eq!(description.destination.bucket_arn.bucket, "bucket");
        assert!(description.source.is_none());
        assert!(description.created_at >= before);

        assert!(streams.describe("missing").is_err());
        streams.shutdown().await;
    }

    #[tokio::test]
    async fn test_list_in_creation_order() {
        let streams = streams(Arc::new(CapturingSink::default()));
        for name in ["c", "a", "b"] {
            streams.create(direct(name)).await.unwrap();
        }

        let (names, has_next) = streams.list(None, None, 2);
        assert_eq!(names, vec!["c", "a"]);
        assert!(has_next);

        let (names, has_next) = streams.list(None, Some("a"), 2);
        assert_eq!(names, vec!["b"]);
        assert!(!has_next);

        let (names, _) = streams.list(Some(SourceType::KinesisStreamAsSource), None, 10);
        assert!(names.is_empty());
        streams.shutdown().await;
    }

    #[tokio::test]
    async fn test_kinesis_records_reach_the_sink() {
        let sink = Arc::new(CapturingSink::default());
        let streams = DeliveryStreams::new(
            StreamSettings::default(),
            sink.clone(),
            Some(Arc::new(OnePageSource)),
        );
        let spec = CreateSpec {
            source_type: SourceType::KinesisStreamAsSource,
            source: Some(SourceSpec {
                stream_arn: "arn:aws:kinesis:us-east-1:000000000000:stream/clicks".into(),
                role_arn: Some("arn:aws:iam::000000000000:role/firehose".into()),
            }),
            ..direct("clicks")
        };
        streams.create(spec).await.unwrap();

        let description = streams.describe("clicks").unwrap();
        let source = description.source.unwrap();
        assert_eq!(source.delivery_start, description.created_at);

        // The shard closes after one page; give the poller a moment.
        tokio::time::sleep(Duration::from_millis(100)).await;
        streams.shutdown().await;
        assert_eq!(sink.bodies(), vec![Bytes::from_static(b"from-kinesis")]);
    }

    #[tokio::test]
    async fn test_overrides_replace_buffering_hints() {
        let settings = StreamSettings {
            size_in_mbs: Some(1),
            interval_in_seconds: Some(60),
            ..StreamSettings::default()
        };
        let streams = DeliveryStreams::new(settings, Arc::new(CapturingSink::default()), None);
        let sink = streams.sink_settings("orders", &destination("bucket"));
        assert_eq!(sink.size_threshold, MB);
        assert_eq!(sink.interval, Duration::from_secs(60));
        assert!(!sink.disable_buffering);
    }
}
