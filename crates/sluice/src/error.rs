//! Error types for the delivery stream emulator.

use axum::http::StatusCode;
use snafu::prelude::*;

// Re-export common errors
pub use sluice_core::error::{ConfigError, StorageError};

/// Errors surfaced to API callers.
///
/// Each variant maps to one wire exception name and HTTP status.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FirehoseError {
    /// A request field is missing, malformed or out of range.
    #[snafu(display("{message}"))]
    InvalidArgument { message: String },

    /// A delivery stream with the same name is already live.
    #[snafu(display("{message}"))]
    ResourceInUse { message: String },

    /// The named resource does not exist.
    #[snafu(display("{message}"))]
    ResourceNotFound { message: String },

    /// A collaborator (object store, source stream) could not be reached.
    #[snafu(display("{message}"))]
    ServiceUnavailable { message: String },

    /// The request body is not valid JSON for the operation.
    #[snafu(display("{source}"))]
    Serialization { source: serde_json::Error },

    /// The target header named an operation we do not serve.
    #[snafu(display("Unknown operation: {operation}"))]
    UnknownOperation { operation: String },

    /// The target header is missing or malformed.
    #[snafu(display("no action received"))]
    MissingAction,

    /// The request signature is absent or incomplete.
    #[snafu(display("{source}"))]
    IncompleteSignature { source: AuthError },

    /// The request signature does not match.
    #[snafu(display("{source}"))]
    InvalidSignature { source: AuthError },
}

impl FirehoseError {
    /// Exception name written to the `__type` field of error bodies.
    pub fn error_type(&self) -> &'static str {
        match self {
            FirehoseError::InvalidArgument { .. } => "InvalidArgumentException",
            FirehoseError::ResourceInUse { .. } => "ResourceInUseException",
            FirehoseError::ResourceNotFound { .. } => "ResourceNotFoundException",
            FirehoseError::ServiceUnavailable { .. } => "ServiceUnavailableException",
            FirehoseError::Serialization { .. } => "SerializationException",
            FirehoseError::UnknownOperation { .. } => "UnknownOperationException",
            FirehoseError::MissingAction => "MissingAction",
            FirehoseError::IncompleteSignature { .. } => "IncompleteSignatureException",
            FirehoseError::InvalidSignature { .. } => "InvalidSignatureException",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            FirehoseError::ResourceNotFound { .. } => StatusCode::NOT_FOUND,
            FirehoseError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        FirehoseError::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn not_found(name: &str) -> Self {
        FirehoseError::ResourceNotFound {
            message: format!("DeliveryStreamName: {name} not found"),
        }
    }

    pub(crate) fn unavailable(message: impl Into<String>) -> Self {
        FirehoseError::ServiceUnavailable {
            message: message.into(),
        }
    }
}

impl From<AuthError> for FirehoseError {
    fn from(source: AuthError) -> Self {
        if source.is_incomplete() {
            FirehoseError::IncompleteSignature { source }
        } else {
            FirehoseError::InvalidSignature { source }
        }
    }
}

/// Errors from signing or verifying requests.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AuthError {
    /// No `Authorization` header was presented.
    #[snafu(display("Authorization header is missing"))]
    MissingAuthorization,

    /// The `Authorization` header could not be parsed.
    #[snafu(display("Authorization header is malformed: {message}"))]
    MalformedAuthorization { message: String },

    /// No `X-Amz-Date` header was presented.
    #[snafu(display("X-Amz-Date header is missing"))]
    MissingDate,

    /// The `X-Amz-Date` header is not a basic ISO-8601 timestamp.
    #[snafu(display("X-Amz-Date header is invalid: {value}"))]
    InvalidDate { value: String },

    /// Credentials could not be retrieved.
    #[snafu(display("Unable to retrieve credentials: {message}"))]
    Credentials { message: String },

    /// The recomputed signature differs from the presented one.
    #[snafu(display("The request signature we calculated does not match the signature you provided"))]
    SignatureMismatch,
}

impl AuthError {
    /// Whether the request lacked signing material rather than carrying a bad signature.
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            AuthError::MissingAuthorization
                | AuthError::MalformedAuthorization { .. }
                | AuthError::MissingDate
        )
    }
}

/// Errors parsing resource names.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ArnError {
    /// The ARN does not have the expected shape.
    #[snafu(display("Invalid ARN {arn:?}: {reason}"))]
    Malformed { arn: String, reason: &'static str },
}

/// Errors from the upstream shard source.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    /// The configured endpoint is not a usable URL.
    #[snafu(display("Invalid Kinesis endpoint {endpoint:?}: {message}"))]
    InvalidEndpoint { endpoint: String, message: String },

    /// The HTTP exchange failed.
    #[snafu(display("Kinesis request failed: {source}"))]
    Http { source: reqwest::Error },

    /// The service answered with an error body.
    #[snafu(display("Kinesis returned {status} {error_type}: {message}"))]
    Api {
        status: u16,
        error_type: String,
        message: String,
    },

    /// Signing the outbound request failed.
    #[snafu(display("Failed to sign Kinesis request: {source}"))]
    Signing { source: AuthError },

    /// A request or response body could not be (de)serialized.
    #[snafu(display("Invalid Kinesis JSON: {source}"))]
    Json { source: serde_json::Error },

    /// A record's data field is not valid base64.
    #[snafu(display("Invalid record data: {source}"))]
    RecordData { source: base64::DecodeError },
}

/// Errors writing to the object sink.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// The storage layer rejected the operation.
    #[snafu(display("Storage error: {source}"))]
    Storage { source: StorageError },
}

impl SinkError {
    /// Whether the bucket does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            SinkError::Storage { source } => source.is_not_found(),
        }
    }
}

/// Top-level errors for the binary.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AppError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Metrics initialization failed.
    #[snafu(display("Metrics error: {source}"))]
    Metrics {
        source: sluice_core::error::MetricsError,
    },

    /// The Kinesis client could not be built.
    #[snafu(display("Kinesis client error: {source}"))]
    Kinesis { source: SourceError },

    /// The listener could not be bound or served.
    #[snafu(display("Server error on {address}: {source}"))]
    Serve {
        address: String,
        source: std::io::Error,
    },
}
