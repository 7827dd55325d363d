//! HTTP front end.
//!
//! - `POST /` - the JSON 1.1 API; the operation is named by `X-Amz-Target`
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /health` - returns 200 OK

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use sluice_core::MetricsController;

use crate::auth::{InboundRequest, RequestAuthenticator};
use crate::error::FirehoseError;
use crate::service::{DeliveryStreamService, Operation};

/// Content type of every API response.
pub const JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Header carrying the per-request id.
pub static REQUEST_ID: HeaderName = HeaderName::from_static("x-amzn-requestid");

static X_AMZ_TARGET: HeaderName = HeaderName::from_static("x-amz-target");

struct ApiState {
    service: DeliveryStreamService,
    authenticator: RequestAuthenticator,
}

/// Build the application router.
pub fn router(service: DeliveryStreamService, authenticator: RequestAuthenticator) -> Router {
    let state = Arc::new(ApiState {
        service,
        authenticator,
    });

    Router::new()
        .route("/", post(api_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    #[serde(rename = "__type")]
    error_type: &'a str,
    message: String,
}

impl IntoResponse for FirehoseError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error_type: self.error_type(),
            message: self.to_string(),
        };
        let body = serde_json::to_vec(&body).unwrap_or_default();
        (
            self.status(),
            [(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
            body,
        )
            .into_response()
    }
}

async fn api_handler(
    State(state): State<Arc<ApiState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let target = headers.get(&X_AMZ_TARGET).and_then(|v| v.to_str().ok());

    let result = async {
        let operation = Operation::from_target(target)?;
        state.authenticator.verify(&InboundRequest {
            method: method.as_str(),
            path: uri.path(),
            query: uri.query().unwrap_or(""),
            headers: &headers,
            body: &body,
        })?;
        state.service.dispatch(operation, &body).await
    }
    .await;

    let mut response = match result {
        Ok(body) => {
            debug!(request_id = %request_id, target = target.unwrap_or_default(), "Request served");
            (
                StatusCode::OK,
                [(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
                body,
            )
                .into_response()
        }
        Err(e) => {
            warn!(
                request_id = %request_id,
                target = target.unwrap_or_default(),
                error_type = e.error_type(),
                error = %e,
                "Request failed"
            );
            e.into_response()
        }
    };

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID.clone(), value);
    }
    response
}

async fn metrics_handler() -> Response {
    match MetricsController::get() {
        Ok(controller) => controller.render().into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

async fn health_handler() -> &'static str {
    "ok\n"
}
