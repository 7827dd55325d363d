//! The delivery stream API: request decoding, validation and response shaping.
//!
//! Each operation takes the raw JSON body and returns a serializable output.
//! Field names follow the Firehose JSON protocol.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tracing::debug;

use crate::arn::{BucketArn, RoleArn};
use crate::error::{FirehoseError, InvalidArgumentSnafu, SerializationSnafu};
use crate::pipeline::{
    BufferingHints, CreateSpec, DeliveryStreams, SinkDescriptor, SourceSpec, SourceType,
    StreamDescription,
};
use crate::sink::CompressionFormat;

/// Prefix of the `X-Amz-Target` header value.
pub const TARGET_PREFIX: &str = "Firehose_20150804";

/// Largest accepted record payload after base64 decoding.
pub const MAX_RECORD_BYTES: usize = 1000 * 1024;

/// Most records accepted by one `PutRecordBatch`.
pub const MAX_BATCH_RECORDS: usize = 500;

const MAX_NAME_LEN: usize = 64;
const MAX_LIST_LIMIT: u32 = 10_000;
const DEFAULT_LIST_LIMIT: u32 = 10;

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_.-]+$").expect("valid regex"));

/// Operations served on `POST /`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateDeliveryStream,
    DeleteDeliveryStream,
    DescribeDeliveryStream,
    ListDeliveryStreams,
    PutRecord,
    PutRecordBatch,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateDeliveryStream => "CreateDeliveryStream",
            Operation::DeleteDeliveryStream => "DeleteDeliveryStream",
            Operation::DescribeDeliveryStream => "DescribeDeliveryStream",
            Operation::ListDeliveryStreams => "ListDeliveryStreams",
            Operation::PutRecord => "PutRecord",
            Operation::PutRecordBatch => "PutRecordBatch",
        }
    }

    /// Resolve an `X-Amz-Target` header value.
    pub fn from_target(target: Option<&str>) -> Result<Self, FirehoseError> {
        let operation = target
            .and_then(|t| t.strip_prefix(TARGET_PREFIX))
            .and_then(|rest| rest.strip_prefix('.'))
            .filter(|op| !op.is_empty())
            .ok_or(FirehoseError::MissingAction)?;
        operation.parse()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = FirehoseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CreateDeliveryStream" => Operation::CreateDeliveryStream,
            "DeleteDeliveryStream" => Operation::DeleteDeliveryStream,
            "DescribeDeliveryStream" => Operation::DescribeDeliveryStream,
            "ListDeliveryStreams" => Operation::ListDeliveryStreams,
            "PutRecord" => Operation::PutRecord,
            "PutRecordBatch" => Operation::PutRecordBatch,
            other => {
                return Err(FirehoseError::UnknownOperation {
                    operation: other.to_string(),
                });
            }
        })
    }
}

// ============ Requests ============

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateInput {
    delivery_stream_name: Option<String>,
    delivery_stream_type: Option<String>,
    s3_destination_configuration: Option<S3DestinationInput>,
    extended_s3_destination_configuration: Option<S3DestinationInput>,
    kinesis_stream_source_configuration: Option<KinesisSourceInput>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct S3DestinationInput {
    #[serde(rename = "BucketARN")]
    bucket_arn: Option<String>,
    #[serde(rename = "RoleARN")]
    role_arn: Option<String>,
    buffering_hints: Option<BufferingHintsBody>,
    compression_format: Option<String>,
    prefix: Option<String>,
    error_output_prefix: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BufferingHintsBody {
    #[serde(rename = "SizeInMBs")]
    size_in_mbs: Option<u32>,
    interval_in_seconds: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct KinesisSourceInput {
    #[serde(rename = "KinesisStreamARN")]
    stream_arn: Option<String>,
    #[serde(rename = "RoleARN")]
    role_arn: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StreamNameInput {
    delivery_stream_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PutRecordInput {
    delivery_stream_name: Option<String>,
    record: Option<RecordInput>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PutRecordBatchInput {
    delivery_stream_name: Option<String>,
    #[serde(default)]
    records: Vec<RecordInput>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecordInput {
    #[serde(default)]
    data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListInput {
    delivery_stream_type: Option<String>,
    exclusive_start_delivery_stream_name: Option<String>,
    limit: Option<u32>,
}

// ============ Responses ============

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateOutput {
    #[serde(rename = "DeliveryStreamARN")]
    pub delivery_stream_arn: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DeleteOutput {}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutRecordOutput {
    pub record_id: String,
    pub encrypted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutRecordBatchOutput {
    pub failed_put_count: u32,
    pub encrypted: bool,
    pub request_responses: Vec<RecordResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecordResponse {
    pub record_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListOutput {
    pub delivery_stream_names: Vec<String>,
    pub has_more_delivery_streams: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeOutput {
    pub delivery_stream_description: DescriptionBody,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescriptionBody {
    /// Unix seconds.
    pub create_timestamp: i64,
    #[serde(rename = "DeliveryStreamARN")]
    pub delivery_stream_arn: String,
    pub delivery_stream_name: String,
    pub delivery_stream_status: String,
    pub delivery_stream_type: String,
    pub destinations: Vec<DestinationBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceBody>,
    pub has_more_destinations: bool,
    pub version_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DestinationBody {
    pub destination_id: String,
    #[serde(rename = "S3DestinationDescription")]
    pub s3_destination_description: S3DescriptionBody,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct S3DescriptionBody {
    #[serde(rename = "BucketARN")]
    pub bucket_arn: String,
    #[serde(rename = "RoleARN", skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
    pub buffering_hints: HintsBody,
    pub compression_format: String,
    pub prefix: String,
    pub error_output_prefix: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HintsBody {
    #[serde(rename = "SizeInMBs")]
    pub size_in_mbs: u32,
    pub interval_in_seconds: u32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SourceBody {
    pub kinesis_stream_source_description: KinesisDescriptionBody,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KinesisDescriptionBody {
    #[serde(rename = "KinesisStreamARN")]
    pub kinesis_stream_arn: String,
    #[serde(rename = "RoleARN", skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
    /// Unix seconds.
    pub delivery_start_timestamp: i64,
}

impl From<StreamDescription> for DescribeOutput {
    fn from(description: StreamDescription) -> Self {
        let destination = description.destination;
        let source = description.source.map(|source| SourceBody {
            kinesis_stream_source_description: KinesisDescriptionBody {
                kinesis_stream_arn: source.stream_arn,
                role_arn: source.role_arn,
                delivery_start_timestamp: source.delivery_start.timestamp(),
            },
        });

        DescribeOutput {
            delivery_stream_description: DescriptionBody {
                create_timestamp: description.created_at.timestamp(),
                delivery_stream_arn: description.id.to_string(),
                delivery_stream_name: description.id.name().to_string(),
                delivery_stream_status: description.status.as_str().to_string(),
                delivery_stream_type: description.source_type.as_str().to_string(),
                destinations: vec![DestinationBody {
                    destination_id: "destinationId-000000000001".to_string(),
                    s3_destination_description: S3DescriptionBody {
                        bucket_arn: destination.bucket_arn.to_string(),
                        role_arn: destination.role_arn,
                        buffering_hints: HintsBody {
                            size_in_mbs: destination.buffering.size_in_mbs,
                            interval_in_seconds: destination.buffering.interval_in_seconds,
                        },
                        compression_format: destination.compression.as_str().to_string(),
                        prefix: destination.prefix,
                        error_output_prefix: destination.error_prefix,
                    },
                }],
                source,
                has_more_destinations: false,
                version_id: description.version_id.to_string(),
            },
        }
    }
}

// ============ Service ============

/// Decodes, validates and executes API operations.
#[derive(Debug, Clone)]
pub struct DeliveryStreamService {
    streams: Arc<DeliveryStreams>,
}

impl DeliveryStreamService {
    pub fn new(streams: Arc<DeliveryStreams>) -> Self {
        Self { streams }
    }

    pub fn streams(&self) -> &Arc<DeliveryStreams> {
        &self.streams
    }

    /// Run `operation` on a raw body, returning the serialized response.
    pub async fn dispatch(&self, operation: Operation, body: &[u8]) -> Result<Vec<u8>, FirehoseError> {
        debug!(operation = %operation, bytes = body.len(), "Dispatching request");
        match operation {
            Operation::CreateDeliveryStream => to_json(&self.create(body).await?),
            Operation::DeleteDeliveryStream => to_json(&self.delete(body)?),
            Operation::DescribeDeliveryStream => to_json(&self.describe(body)?),
            Operation::ListDeliveryStreams => to_json(&self.list(body)?),
            Operation::PutRecord => to_json(&self.put_record(body).await?),
            Operation::PutRecordBatch => to_json(&self.put_record_batch(body).await?),
        }
    }

    pub async fn create(&self, body: &[u8]) -> Result<CreateOutput, FirehoseError> {
        let input: CreateInput = decode(body)?;
        let name = validate_name(input.delivery_stream_name.as_deref())?;
        let source_type = match input.delivery_stream_type.as_deref() {
            None | Some("") => SourceType::DirectPut,
            Some(raw) => raw
                .parse()
                .map_err(|_| FirehoseError::invalid("DeliveryStreamType value is invalid format"))?,
        };

        let destination = input
            .extended_s3_destination_configuration
            .or(input.s3_destination_configuration)
            .ok_or_else(|| FirehoseError::invalid("S3DestinationConfiguration is required"))?;
        let destination = sink_descriptor(destination)?;

        let source = match (source_type, input.kinesis_stream_source_configuration) {
            (SourceType::KinesisStreamAsSource, Some(config)) => Some(source_spec(config)?),
            (SourceType::KinesisStreamAsSource, None) => {
                return Err(FirehoseError::invalid(
                    "KinesisStreamSourceConfiguration is required for KinesisStreamAsSource",
                ));
            }
            (SourceType::DirectPut, _) => None,
        };

        let id = self
            .streams
            .create(CreateSpec {
                name: name.to_string(),
                source_type,
                destination,
                source,
            })
            .await?;
        Ok(CreateOutput {
            delivery_stream_arn: id.to_string(),
        })
    }

    pub fn delete(&self, body: &[u8]) -> Result<DeleteOutput, FirehoseError> {
        let input: StreamNameInput = decode(body)?;
        let name = validate_name(input.delivery_stream_name.as_deref())?;
        self.streams.delete(name)?;
        Ok(DeleteOutput {})
    }

    pub fn describe(&self, body: &[u8]) -> Result<DescribeOutput, FirehoseError> {
        let input: StreamNameInput = decode(body)?;
        let name = validate_name(input.delivery_stream_name.as_deref())?;
        Ok(self.streams.describe(name)?.into())
    }

    pub fn list(&self, body: &[u8]) -> Result<ListOutput, FirehoseError> {
        let input: ListInput = decode(body)?;
        let source_type = match input.delivery_stream_type.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(
                raw.parse::<SourceType>()
                    .map_err(|_| FirehoseError::invalid("DeliveryStreamType value is invalid format"))?,
            ),
        };
        let exclusive_start = match input.exclusive_start_delivery_stream_name.as_deref() {
            None | Some("") => None,
            Some(name) => Some(validate_name(Some(name))?),
        };
        let limit = input.limit.unwrap_or(DEFAULT_LIST_LIMIT);
        ensure!(
            (1..=MAX_LIST_LIMIT).contains(&limit),
            InvalidArgumentSnafu {
                message: "Limit is invalid",
            }
        );

        let (names, has_more) = self
            .streams
            .list(source_type, exclusive_start, limit as usize);
        Ok(ListOutput {
            delivery_stream_names: names,
            has_more_delivery_streams: has_more,
        })
    }

    pub async fn put_record(&self, body: &[u8]) -> Result<PutRecordOutput, FirehoseError> {
        let input: PutRecordInput = decode(body)?;
        let name = validate_name(input.delivery_stream_name.as_deref())?;
        let record = input
            .record
            .ok_or_else(|| FirehoseError::invalid("Record is required"))?;
        let payload = record_payload(&record)?;

        let record_id = self.streams.enqueue(name, payload).await?;
        Ok(PutRecordOutput {
            record_id,
            encrypted: false,
        })
    }

    pub async fn put_record_batch(&self, body: &[u8]) -> Result<PutRecordBatchOutput, FirehoseError> {
        let input: PutRecordBatchInput = decode(body)?;
        let name = validate_name(input.delivery_stream_name.as_deref())?;
        ensure!(
            (1..=MAX_BATCH_RECORDS).contains(&input.records.len()),
            InvalidArgumentSnafu {
                message: format!("Records must contain between 1 and {MAX_BATCH_RECORDS} entries"),
            }
        );
        let payloads = input
            .records
            .iter()
            .map(record_payload)
            .collect::<Result<Vec<_>, _>>()?;

        let ids = self.streams.enqueue_batch(name, payloads).await?;
        Ok(PutRecordBatchOutput {
            failed_put_count: 0,
            encrypted: false,
            request_responses: ids
                .into_iter()
                .map(|record_id| RecordResponse { record_id })
                .collect(),
        })
    }
}

fn decode<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, FirehoseError> {
    // Some SDKs send an empty body for parameterless calls
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).context(SerializationSnafu)
}

fn to_json<T: Serialize>(output: &T) -> Result<Vec<u8>, FirehoseError> {
    serde_json::to_vec(output).context(SerializationSnafu)
}

fn validate_name(name: Option<&str>) -> Result<&str, FirehoseError> {
    let name = name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| FirehoseError::invalid("DeliveryStreamName is required"))?;
    if name.len() > MAX_NAME_LEN {
        return Err(FirehoseError::invalid("DeliveryStreamName value length is over"));
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(FirehoseError::invalid("DeliveryStreamName value is invalid format"));
    }
    Ok(name)
}

fn sink_descriptor(input: S3DestinationInput) -> Result<SinkDescriptor, FirehoseError> {
    let bucket_arn: BucketArn = input
        .bucket_arn
        .as_deref()
        .ok_or_else(|| FirehoseError::invalid("BucketARN is required"))?
        .parse()
        .map_err(|_| FirehoseError::invalid("BucketARN pattern unmatched"))?;
    let role_arn = validate_role(input.role_arn)?;

    let defaults = BufferingHints::default();
    let hints = input.buffering_hints.unwrap_or_default();
    let buffering = BufferingHints {
        size_in_mbs: hints.size_in_mbs.unwrap_or(defaults.size_in_mbs),
        interval_in_seconds: hints
            .interval_in_seconds
            .unwrap_or(defaults.interval_in_seconds),
    };
    ensure!(
        (1..=128).contains(&buffering.size_in_mbs),
        InvalidArgumentSnafu {
            message: "SizeInMBs is invalid",
        }
    );
    ensure!(
        (60..=900).contains(&buffering.interval_in_seconds),
        InvalidArgumentSnafu {
            message: "IntervalInSeconds is invalid",
        }
    );

    let compression = match input.compression_format.as_deref() {
        None | Some("") => CompressionFormat::default(),
        Some(raw) => raw
            .parse()
            .map_err(|_| FirehoseError::invalid("CompressionFormat is invalid"))?,
    };

    Ok(SinkDescriptor {
        bucket_arn,
        buffering,
        compression,
        prefix: input.prefix.unwrap_or_default(),
        error_prefix: input.error_output_prefix.unwrap_or_default(),
        role_arn,
    })
}

fn source_spec(input: KinesisSourceInput) -> Result<SourceSpec, FirehoseError> {
    let stream_arn = input
        .stream_arn
        .filter(|arn| !arn.is_empty())
        .ok_or_else(|| FirehoseError::invalid("KinesisStreamARN is required"))?;
    Ok(SourceSpec {
        stream_arn,
        role_arn: validate_role(input.role_arn)?,
    })
}

/// Role ARNs are checked for shape and echoed back; nothing is assumed.
fn validate_role(role_arn: Option<String>) -> Result<Option<String>, FirehoseError> {
    match role_arn.filter(|arn| !arn.is_empty()) {
        Some(arn) => {
            arn.parse::<RoleArn>()
                .map_err(|_| FirehoseError::invalid("RoleARN pattern unmatched"))?;
            Ok(Some(arn))
        }
        None => Ok(None),
    }
}

/// Base64-decoded record data, or the raw text when it is not base64.
fn record_payload(record: &RecordInput) -> Result<Bytes, FirehoseError> {
    let payload = match STANDARD.decode(record.data.as_bytes()) {
        Ok(decoded) => Bytes::from(decoded),
        Err(_) => Bytes::copy_from_slice(record.data.as_bytes()),
    };
    ensure!(
        payload.len() <= MAX_RECORD_BYTES,
        InvalidArgumentSnafu {
            message: format!("Record size exceeds {} KiB", MAX_RECORD_BYTES / 1024),
        }
    );
    Ok(payload)
}
