//! Internal events for metrics emission.
//!
//! Each struct is one measurable occurrence. Delivery stream events carry a
//! `stream` label so every delivery stream can be observed on its own.

use metrics::{counter, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

// ============ Storage ============

/// Storage operation type.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Put,
    Get,
    List,
}

impl StorageOperation {
    fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Put => "put",
            StorageOperation::Get => "get",
            StorageOperation::List => "list",
        }
    }
}

/// Outcome of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted for every storage request.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        counter!(
            "sluice_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted with the latency of a storage request.
pub struct StorageRequestDuration {
    pub operation: StorageOperation,
    pub duration: Duration,
}

impl InternalEvent for StorageRequestDuration {
    fn emit(self) {
        histogram!(
            "sluice_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}

// ============ Delivery ============

/// Event emitted when records are accepted onto a delivery stream's intake.
pub struct RecordsAccepted {
    pub count: u64,
    pub stream: String,
}

impl InternalEvent for RecordsAccepted {
    fn emit(self) {
        trace!(count = self.count, stream = %self.stream, "Records accepted");
        counter!("sluice_records_accepted_total", "stream" => self.stream).increment(self.count);
    }
}

/// What caused a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Size,
    Interval,
    Unbuffered,
    Shutdown,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Interval => "interval",
            FlushTrigger::Unbuffered => "unbuffered",
            FlushTrigger::Shutdown => "shutdown",
        }
    }
}

/// Event emitted when a batch is written to the sink.
pub struct BatchDelivered {
    pub trigger: FlushTrigger,
    pub records: u64,
    pub bytes: u64,
    pub attempts: u32,
    pub stream: String,
}

impl InternalEvent for BatchDelivered {
    fn emit(self) {
        trace!(
            trigger = self.trigger.as_str(),
            records = self.records,
            bytes = self.bytes,
            attempts = self.attempts,
            stream = %self.stream,
            "Batch delivered"
        );
        counter!(
            "sluice_batches_delivered_total",
            "trigger" => self.trigger.as_str(),
            "stream" => self.stream.clone()
        )
        .increment(1);
        counter!("sluice_records_delivered_total", "stream" => self.stream.clone())
            .increment(self.records);
        counter!("sluice_bytes_delivered_total", "stream" => self.stream).increment(self.bytes);
    }
}

/// Event emitted when a batch is given up on after exhausting every attempt.
pub struct BatchDropped {
    pub records: u64,
    pub stream: String,
}

impl InternalEvent for BatchDropped {
    fn emit(self) {
        trace!(records = self.records, stream = %self.stream, "Batch dropped");
        counter!("sluice_batches_dropped_total", "stream" => self.stream.clone()).increment(1);
        counter!("sluice_records_dropped_total", "stream" => self.stream).increment(self.records);
    }
}

/// Event emitted for every record pulled from a source shard.
pub struct ShardRecordsRead {
    pub count: u64,
    pub stream: String,
}

impl InternalEvent for ShardRecordsRead {
    fn emit(self) {
        counter!("sluice_shard_records_read_total", "stream" => self.stream).increment(self.count);
    }
}

/// Event emitted when a shard poll fails and will be retried.
pub struct ShardPollFailed {
    pub stream: String,
}

impl InternalEvent for ShardPollFailed {
    fn emit(self) {
        counter!("sluice_shard_poll_failures_total", "stream" => self.stream).increment(1);
    }
}

/// Event emitted when an inbound request fails signature verification.
pub struct RequestRejected {
    pub reason: &'static str,
}

impl InternalEvent for RequestRejected {
    fn emit(self) {
        counter!("sluice_requests_rejected_total", "reason" => self.reason).increment(1);
    }
}
