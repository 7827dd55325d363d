//! Kinesis client over JSON 1.1.
//!
//! Every call is a signed `POST /` with the operation in `X-Amz-Target`.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tracing::{trace, warn};

use super::{ShardBatch, ShardSource, ShardedStream};
use crate::auth::{AMZ_DATE_FORMAT, CredentialProviderRef, SignableRequest, Signer, X_AMZ_DATE};
use crate::error::{
    HttpSnafu, InvalidEndpointSnafu, JsonSnafu, RecordDataSnafu, SigningSnafu, SourceError,
};

const TARGET_PREFIX: &str = "Kinesis_20131202";
const JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for a Kinesis-compatible endpoint.
#[derive(Debug, Clone)]
pub struct KinesisClient {
    http: Client,
    endpoint: Url,
    host: String,
    region: String,
    credentials: CredentialProviderRef,
}

impl KinesisClient {
    pub fn new(
        endpoint: &str,
        region: impl Into<String>,
        credentials: CredentialProviderRef,
    ) -> Result<Self, SourceError> {
        let url = Url::parse(endpoint).map_err(|e| SourceError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return InvalidEndpointSnafu {
                    endpoint,
                    message: "no host",
                }
                .fail();
            }
        };
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context(HttpSnafu)?;

        Ok(Self {
            http,
            endpoint: url,
            host,
            region: region.into(),
            credentials,
        })
    }

    async fn call<I, O>(&self, operation: &str, input: &I) -> Result<O, SourceError>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let body = serde_json::to_vec(input).context(JsonSnafu)?;
        let target = format!("{TARGET_PREFIX}.{operation}");
        let amz_date = Utc::now();
        let amz_date_str = amz_date.format(AMZ_DATE_FORMAT).to_string();

        let credentials = self.credentials.credentials().context(SigningSnafu)?;
        let mut headers = vec![
            (CONTENT_TYPE.as_str().to_string(), JSON_CONTENT_TYPE.to_string()),
            ("host".to_string(), self.host.clone()),
            (X_AMZ_DATE.to_string(), amz_date_str.clone()),
            ("x-amz-target".to_string(), target.clone()),
        ];
        if let Some(token) = &credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        let authorization = Signer::new(credentials, &self.region, "kinesis").authorization(
            &SignableRequest {
                method: "POST",
                path: self.endpoint.path(),
                query: self.endpoint.query().unwrap_or(""),
                headers: headers.clone(),
                payload: &body,
            },
            amz_date,
        );

        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header(AUTHORIZATION, authorization)
            .body(body);
        for (name, value) in headers.into_iter().filter(|(name, _)| name != "host") {
            request = request.header(name, value);
        }

        let response = request.send().await.context(HttpSnafu)?;
        let status = response.status();
        let bytes = response.bytes().await.context(HttpSnafu)?;
        trace!(operation, status = status.as_u16(), bytes = bytes.len(), "Kinesis response");

        if !status.is_success() {
            let error: ErrorBody = serde_json::from_slice(&bytes).unwrap_or_default();
            return Err(SourceError::Api {
                status: status.as_u16(),
                error_type: error.error_type.unwrap_or_default(),
                message: error
                    .message
                    .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned()),
            });
        }

        serde_json::from_slice(&bytes).context(JsonSnafu)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type")]
    error_type: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStreamInput<'a> {
    stream_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    exclusive_start_shard_id: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStreamOutput {
    stream_description: StreamDescriptionBody,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StreamDescriptionBody {
    stream_name: String,
    stream_status: String,
    #[serde(default)]
    shards: Vec<ShardBody>,
    #[serde(default)]
    has_more_shards: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ShardBody {
    shard_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetShardIteratorInput<'a> {
    stream_name: &'a str,
    shard_id: &'a str,
    shard_iterator_type: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetShardIteratorOutput {
    shard_iterator: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetRecordsInput<'a> {
    shard_iterator: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetRecordsOutput {
    #[serde(default)]
    records: Vec<RecordBody>,
    next_shard_iterator: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecordBody {
    data: String,
    #[serde(default)]
    sequence_number: Option<String>,
}

#[async_trait]
impl ShardSource for KinesisClient {
    async fn describe_stream(&self, stream: &str) -> Result<ShardedStream, SourceError> {
        let mut shard_ids = Vec::new();
        let mut exclusive_start: Option<String> = None;

        loop {
            let output: DescribeStreamOutput = self
                .call(
                    "DescribeStream",
                    &DescribeStreamInput {
                        stream_name: stream,
                        exclusive_start_shard_id: exclusive_start.as_deref(),
                    },
                )
                .await?;
            let description = output.stream_description;
            shard_ids.extend(description.shards.into_iter().map(|s| s.shard_id));

            if !description.has_more_shards || shard_ids.is_empty() {
                return Ok(ShardedStream {
                    name: description.stream_name,
                    status: description.stream_status,
                    shard_ids,
                });
            }
            exclusive_start = shard_ids.last().cloned();
        }
    }

    async fn get_shard_iterator(&self, stream: &str, shard_id: &str) -> Result<String, SourceError> {
        let output: GetShardIteratorOutput = self
            .call(
                "GetShardIterator",
                &GetShardIteratorInput {
                    stream_name: stream,
                    shard_id,
                    shard_iterator_type: "TRIM_HORIZON",
                },
            )
            .await?;
        Ok(output.shard_iterator)
    }

    async fn get_records(&self, iterator: &str) -> Result<ShardBatch, SourceError> {
        let output: GetRecordsOutput = self
            .call(
                "GetRecords",
                &GetRecordsInput {
                    shard_iterator: iterator,
                },
            )
            .await?;

        let mut records = Vec::with_capacity(output.records.len());
        let mut skipped = 0;
        for record in output.records {
            match STANDARD.decode(record.data.as_bytes()).context(RecordDataSnafu) {
                Ok(data) => records.push(Bytes::from(data)),
                Err(error) => {
                    warn!(
                        sequence_number = record.sequence_number.as_deref().unwrap_or("unknown"),
                        %error,
                        "Skipping record with undecodable data"
                    );
                    skipped += 1;
                }
            }
        }

        Ok(ShardBatch {
            records,
            skipped,
            next_iterator: output.next_shard_iterator,
        })
    }
}
