//! Buffered delivery of one stream's records to object storage.
//!
//! # Flush triggers
//!
//! - **Size**: the buffered byte count reaches the threshold (or buffering is
//!   disabled). The batch is handed to a detached flush task and the buffer
//!   and interval timer are reset immediately.
//! - **Interval**: the timer fires. A non-empty buffer is flushed the same
//!   way; an empty one writes nothing. The timer restarts either way.
//! - **Shutdown**: the stream's token is cancelled or every sender is gone.
//!   The intake is closed, records already queued are drained, and a final
//!   flush runs under its own token with a bounded timeout. With buffering
//!   disabled each drained record is still written as its own object.
//!
//! # Cancellation
//!
//! Detached flushes run under the write token handed to [`BufferedSink::new`],
//! which deleting a stream never cancels. A stopping sink waits for them only
//! until the final-flush deadline and then detaches the rest; they keep
//! running until they finish or the write token is cancelled.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use sluice_core::emit;
use sluice_core::metrics::events::{BatchDelivered, BatchDropped, FlushTrigger};

use super::{CompressionFormat, KeyTemplate, ObjectSinkRef};
use crate::pipeline::Record;

/// Bounded retry of object writes with a fixed backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            backoff: Duration::from_millis(100),
        }
    }
}

/// Resolved configuration of one stream's sink.
#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub stream_name: String,
    pub bucket: String,
    /// Flush once this many payload bytes are buffered.
    pub size_threshold: usize,
    pub interval: Duration,
    /// Flush every record on arrival.
    pub disable_buffering: bool,
    pub compression: CompressionFormat,
    pub keys: KeyTemplate,
    pub retry: RetryPolicy,
    /// Upper bound on the flush performed while stopping.
    pub final_flush_timeout: Duration,
}

/// Records accumulated since the last flush.
#[derive(Debug, Default)]
struct Buffer {
    payloads: Vec<Bytes>,
    bytes: usize,
}

impl Buffer {
    fn push(&mut self, record: Record) {
        self.bytes += record.len();
        self.payloads.push(record.into_payload());
    }

    fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    fn bytes(&self) -> usize {
        self.bytes
    }

    /// Detach the buffered records, leaving the buffer empty.
    fn take(&mut self) -> Batch {
        let bytes = std::mem::take(&mut self.bytes);
        Batch {
            payloads: std::mem::take(&mut self.payloads),
            bytes,
        }
    }
}

/// A detached copy of the buffer, owned by one flush.
#[derive(Debug)]
struct Batch {
    payloads: Vec<Bytes>,
    bytes: usize,
}

impl Batch {
    /// Payloads back to back in arrival order, without framing.
    fn concat(&self) -> Bytes {
        let mut blob = BytesMut::with_capacity(self.bytes);
        for payload in &self.payloads {
            blob.extend_from_slice(payload);
        }
        blob.freeze()
    }
}

/// Per-stream accumulator consuming the intake queue.
pub struct BufferedSink {
    settings: Arc<SinkSettings>,
    sink: ObjectSinkRef,
    intake: mpsc::Receiver<Record>,
    buffer: Buffer,
    in_flight: JoinSet<()>,
    write_token: CancellationToken,
}

impl BufferedSink {
    /// Create a sink reading from `intake`.
    ///
    /// Detached flushes abort only when `write_token` is cancelled.
    pub fn new(
        settings: SinkSettings,
        sink: ObjectSinkRef,
        intake: mpsc::Receiver<Record>,
        write_token: CancellationToken,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            sink,
            intake,
            buffer: Buffer::default(),
            in_flight: JoinSet::new(),
            write_token,
        }
    }

    /// Accumulate and flush until `shutdown` is cancelled or the intake closes.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let interval = self.settings.interval;
        info!(
            target = %self.settings.stream_name,
            bucket = %self.settings.bucket,
            size_threshold = self.settings.size_threshold,
            interval_secs = interval.as_secs(),
            "Sink started"
        );

        let timer = tokio::time::sleep(interval);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!(target = %self.settings.stream_name, "Shutdown requested");
                    break;
                }

                _ = &mut timer => {
                    if self.buffer.is_empty() {
                        trace!(target = %self.settings.stream_name, "Interval elapsed with empty buffer");
                    } else {
                        self.dispatch(FlushTrigger::Interval);
                    }
                    timer.as_mut().reset(Instant::now() + interval);
                }

                record = self.intake.recv() => {
                    let Some(record) = record else {
                        debug!(target = %self.settings.stream_name, "Intake closed");
                        break;
                    };
                    self.buffer.push(record);

                    if self.settings.disable_buffering {
                        self.dispatch(FlushTrigger::Unbuffered);
                        timer.as_mut().reset(Instant::now() + interval);
                    } else if self.buffer.bytes() >= self.settings.size_threshold {
                        self.dispatch(FlushTrigger::Size);
                        timer.as_mut().reset(Instant::now() + interval);
                    }
                }

                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    log_join(&self.settings.stream_name, joined);
                }
            }
        }

        self.stop().await;
    }

    /// Hand the buffer to a detached flush task.
    fn dispatch(&mut self, trigger: FlushTrigger) {
        let batch = self.buffer.take();
        debug!(
            target = %self.settings.stream_name,
            trigger = trigger.as_str(),
            records = batch.payloads.len(),
            bytes = batch.bytes,
            "Dispatching flush"
        );
        self.in_flight.spawn(flush(
            self.settings.clone(),
            self.sink.clone(),
            batch,
            trigger,
            self.write_token.clone(),
        ));
    }

    /// Drain the closed intake, flush what is left, and wait for dispatched
    /// flushes. Everything after the drain shares one final-flush deadline.
    async fn stop(mut self) {
        let name = self.settings.stream_name.clone();
        let timeout = self.settings.final_flush_timeout;

        self.intake.close();
        let mut batches = Vec::new();
        while let Some(record) = self.intake.recv().await {
            self.buffer.push(record);
            if self.settings.disable_buffering {
                batches.push(self.buffer.take());
            }
        }
        if !self.buffer.is_empty() {
            batches.push(self.buffer.take());
        }

        let deadline = Instant::now() + timeout;
        if !batches.is_empty() {
            let settings = self.settings.clone();
            let sink = self.sink.clone();
            let final_flushes = async move {
                for batch in batches {
                    flush(
                        settings.clone(),
                        sink.clone(),
                        batch,
                        FlushTrigger::Shutdown,
                        CancellationToken::new(),
                    )
                    .await;
                }
            };
            if tokio::time::timeout_at(deadline, final_flushes).await.is_err() {
                warn!(
                    target = %name,
                    timeout_secs = timeout.as_secs(),
                    "Final flush timed out"
                );
            }
        }

        let in_flight = &mut self.in_flight;
        let drained = tokio::time::timeout_at(deadline, async {
            while let Some(joined) = in_flight.join_next().await {
                log_join(&name, joined);
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                target = %name,
                pending = self.in_flight.len(),
                "Dispatched flushes still running at deadline, detaching"
            );
            self.in_flight.detach_all();
        }

        info!(target = %name, "Sink stopped");
    }
}

fn log_join(name: &str, joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(target = %name, error = %e, "Flush task failed");
    }
}

/// Encode, name and write one batch, retrying per the stream's policy.
///
/// Cancellation of `token` stops the write without counting it as a failure.
async fn flush(
    settings: Arc<SinkSettings>,
    sink: ObjectSinkRef,
    batch: Batch,
    trigger: FlushTrigger,
    token: CancellationToken,
) {
    let flushed_at = Utc::now();
    let records = batch.payloads.len() as u64;
    let name = settings.stream_name.as_str();

    let body = match settings.compression.encode(batch.concat()) {
        Ok(body) => body,
        Err(e) => {
            error!(target = %name, error = %e, "Failed to compress batch");
            emit!(BatchDropped {
                records,
                stream: name.to_string(),
            });
            return;
        }
    };
    let key = settings.keys.object_key(name, flushed_at);
    let policy = settings.retry;

    for attempt in 1..=policy.max_attempts {
        let Some(result) = token
            .run_until_cancelled(sink.put(&settings.bucket, &key, body.clone()))
            .await
        else {
            debug!(target = %name, key = %key, "Flush cancelled");
            return;
        };

        match result {
            Ok(()) => {
                debug!(
                    target = %name,
                    key = %key,
                    bytes = body.len(),
                    attempt,
                    "Batch written"
                );
                emit!(BatchDelivered {
                    trigger,
                    records,
                    bytes: body.len() as u64,
                    attempts: attempt,
                    stream: name.to_string(),
                });
                return;
            }
            Err(e) => {
                warn!(target = %name, key = %key, attempt, error = %e, "Failed to write batch");
            }
        }

        if attempt < policy.max_attempts
            && token
                .run_until_cancelled(tokio::time::sleep(policy.backoff))
                .await
                .is_none()
        {
            debug!(target = %name, key = %key, "Flush cancelled during backoff");
            return;
        }
    }

    error!(
        target = %name,
        bucket = %settings.bucket,
        key = %key,
        error_prefix = %settings.keys.error_prefix(flushed_at),
        records,
        "Giving up on batch after {} attempts",
        policy.max_attempts
    );
    emit!(BatchDropped {
        records,
        stream: name.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SinkError, StorageSnafu};
    use crate::sink::ObjectSink;
    use async_trait::async_trait;
    use flate2::read::GzDecoder;
    use parking_lot::Mutex;
    use sluice_core::StorageError;
    use snafu::prelude::*;
    use std::io::Read;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Records every successful write; fails the first `failures` attempts.
    #[derive(Default)]
    struct RecordingSink {
        writes: Mutex<Vec<(String, Bytes)>>,
        attempts: AtomicU32,
        failures: u32,
    }

    impl RecordingSink {
        fn failing(failures: u32) -> Self {
            Self {
                failures,
                ..Default::default()
            }
        }

        fn bodies(&self) -> Vec<Bytes> {
            self.writes.lock().iter().map(|(_, b)| b.clone()).collect()
        }

        fn keys(&self) -> Vec<String> {
            self.writes.lock().iter().map(|(k, _)| k.clone()).collect()
        }
    }

    #[async_trait]
    impl ObjectSink for RecordingSink {
        async fn put(&self, _bucket: &str, key: &str, body: Bytes) -> Result<(), SinkError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err(StorageError::InvalidBucket {
                    bucket: "unavailable".into(),
                })
                .context(StorageSnafu);
            }
            self.writes.lock().push((key.to_string(), body));
            Ok(())
        }

        async fn probe(&self, _bucket: &str) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn settings(size_threshold: usize, interval: Duration) -> SinkSettings {
        SinkSettings {
            stream_name: "orders".into(),
            bucket: "bucket".into(),
            size_threshold,
            interval,
            disable_buffering: false,
            compression: CompressionFormat::Uncompressed,
            keys: KeyTemplate::new("logs", ""),
            retry: RetryPolicy::default(),
            final_flush_timeout: Duration::from_secs(5),
        }
    }

    struct Harness {
        sink: Arc<RecordingSink>,
        intake: mpsc::Sender<Record>,
        shutdown: CancellationToken,
        handle: tokio::task::JoinHandle<()>,
    }

    fn start(settings: SinkSettings, sink: Arc<RecordingSink>, write_token: CancellationToken) -> Harness {
        let (intake, rx) = mpsc::channel(128);
        let shutdown = CancellationToken::new();
        let buffered = BufferedSink::new(settings, sink.clone(), rx, write_token);
        let handle = tokio::spawn(buffered.run(shutdown.clone()));
        Harness {
            sink,
            intake,
            shutdown,
            handle,
        }
    }

    async fn send(h: &Harness, payload: &'static [u8]) {
        h.intake.send(Record::new(payload)).await.unwrap();
    }

    /// Let spawned tasks run without moving past the next timer.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_threshold_dispatches_and_resets() {
        let h = start(
            settings(10, Duration::from_secs(60)),
            Arc::new(RecordingSink::default()),
            CancellationToken::new(),
        );

        send(&h, b"aaaa").await;
        send(&h, b"bbbb").await;
        settle().await;
        assert!(h.sink.bodies().is_empty());

        send(&h, b"cccc").await;
        settle().await;
        assert_eq!(h.sink.bodies(), vec![Bytes::from_static(b"aaaabbbbcccc")]);

        // Counter was reset: two more records stay buffered.
        send(&h, b"dddd").await;
        send(&h, b"eeee").await;
        settle().await;
        assert_eq!(h.sink.bodies().len(), 1);

        h.shutdown.cancel();
        h.handle.await.unwrap();
        assert_eq!(
            h.sink.bodies(),
            vec![
                Bytes::from_static(b"aaaabbbbcccc"),
                Bytes::from_static(b"ddddeeee")
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_interval_writes_nothing() {
        let h = start(
            settings(1024, Duration::from_secs(1)),
            Arc::new(RecordingSink::default()),
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(h.sink.attempts.load(Ordering::SeqCst), 0);

        // Timer kept running: a record now is flushed at the next tick.
        send(&h, b"late").await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(h.sink.bodies(), vec![Bytes::from_static(b"late")]);

        h.shutdown.cancel();
        h.handle.await.unwrap();
        assert_eq!(h.sink.bodies().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_buffering_flushes_each_record() {
        let mut s = settings(1024, Duration::from_secs(60));
        s.disable_buffering = true;
        let h = start(s, Arc::new(RecordingSink::default()), CancellationToken::new());

        send(&h, b"one").await;
        send(&h, b"two").await;
        h.shutdown.cancel();
        h.handle.await.unwrap();

        let mut bodies = h.sink.bodies();
        bodies.sort();
        assert_eq!(
            bodies,
            vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_queued_records_into_one_flush() {
        let sink = Arc::new(RecordingSink::default());
        let (intake, rx) = mpsc::channel(128);
        for payload in [b"a", b"b", b"c"] {
            intake
                .send(Record::new(Bytes::from_static(payload)))
                .await
                .unwrap();
        }

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        BufferedSink::new(
            settings(1024, Duration::from_secs(60)),
            sink.clone(),
            rx,
            CancellationToken::new(),
        )
        .run(shutdown)
        .await;

        assert_eq!(sink.bodies(), vec![Bytes::from_static(b"abc")]);
        assert!(intake.send(Record::new("d")).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbuffered_shutdown_writes_queued_records_separately() {
        let sink = Arc::new(RecordingSink::default());
        let (intake, rx) = mpsc::channel(128);
        for payload in [b"a", b"b", b"c"] {
            intake
                .send(Record::new(Bytes::from_static(payload)))
                .await
                .unwrap();
        }

        let mut s = settings(1024, Duration::from_secs(60));
        s.disable_buffering = true;
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        BufferedSink::new(s, sink.clone(), rx, CancellationToken::new())
            .run(shutdown)
            .await;

        assert_eq!(
            sink.bodies(),
            vec![
                Bytes::from_static(b"a"),
                Bytes::from_static(b"b"),
                Bytes::from_static(b"c")
            ]
        );
    }

    /// Never completes a write.
    struct HangingSink;

    #[async_trait]
    impl ObjectSink for HangingSink {
        async fn put(&self, _: &str, _: &str, _: Bytes) -> Result<(), SinkError> {
            std::future::pending().await
        }

        async fn probe(&self, _: &str) -> Result<(), SinkError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_final_flush_is_bounded() {
        let (intake, rx) = mpsc::channel(8);
        intake.send(Record::new("stuck")).await.unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let started = Instant::now();
        BufferedSink::new(
            settings(1024, Duration::from_secs(60)),
            Arc::new(HangingSink),
            rx,
            CancellationToken::new(),
        )
        .run(shutdown)
        .await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5));
        assert!(elapsed < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_dispatched_flush_does_not_block_stop() {
        let (intake, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            BufferedSink::new(
                settings(1, Duration::from_secs(60)),
                Arc::new(HangingSink),
                rx,
                CancellationToken::new(),
            )
            .run(shutdown.clone()),
        );

        intake.send(Record::new("stuck")).await.unwrap();
        settle().await;

        let started = Instant::now();
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(3600), handle)
            .await
            .expect("sink stops")
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gzip_and_key_layout() {
        let mut s = settings(1024, Duration::from_secs(60));
        s.compression = CompressionFormat::Gzip;
        let h = start(s, Arc::new(RecordingSink::default()), CancellationToken::new());

        send(&h, b"{\"a\":1}").await;
        send(&h, b"{\"a\":2}").await;
        h.shutdown.cancel();
        h.handle.await.unwrap();

        let bodies = h.sink.bodies();
        assert_eq!(bodies.len(), 1);
        let mut decoded = Vec::new();
        GzDecoder::new(&bodies[0][..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, b"{\"a\":1}{\"a\":2}");

        let key = &h.sink.keys()[0];
        assert!(key.starts_with("logs/"));
        assert!(key.contains("/orders-1-"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let h = start(
            settings(1, Duration::from_secs(60)),
            Arc::new(RecordingSink::failing(2)),
            CancellationToken::new(),
        );

        send(&h, b"retry-me").await;
        h.shutdown.cancel();
        h.handle.await.unwrap();

        assert_eq!(h.sink.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(h.sink.bodies(), vec![Bytes::from_static(b"retry-me")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let mut s = settings(1, Duration::from_secs(60));
        s.retry = RetryPolicy {
            max_attempts: 4,
            backoff: Duration::from_millis(100),
        };
        let h = start(s, Arc::new(RecordingSink::failing(u32::MAX)), CancellationToken::new());

        send(&h, b"doomed").await;
        h.shutdown.cancel();
        h.handle.await.unwrap();

        assert_eq!(h.sink.attempts.load(Ordering::SeqCst), 4);
        assert!(h.sink.bodies().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_token_aborts_dispatched_flush() {
        let write_token = CancellationToken::new();
        let h = start(
            settings(1, Duration::from_secs(60)),
            Arc::new(RecordingSink::failing(u32::MAX)),
            write_token.clone(),
        );

        send(&h, b"x").await;
        settle().await;
        write_token.cancel();
        h.shutdown.cancel();
        h.handle.await.unwrap();

        assert!(h.sink.attempts.load(Ordering::SeqCst) < RetryPolicy::default().max_attempts);
        assert!(h.sink.bodies().is_empty());
    }
}
