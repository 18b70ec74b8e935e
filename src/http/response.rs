//! Response shaping and error mapping.
//!
//! # Responsibilities
//! - Wrap successful payloads in the `{"success": true, ...}` envelope
//! - Map service errors to status codes and `{"success": false, "error": ...}`
//! - Reject unreadable JSON bodies in that same error shape
//!
//! # Design Decisions
//! - An open circuit answers 503 with `Retry-After`; a failing appliance answers 502
//! - 5xx bodies never carry internal detail; the detail goes to the log

use axum::{
    extract::{FromRequest, Request},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::residents::ServiceError;

/// Successful API payload, flattened next to `"success": true`.
#[derive(Debug, Serialize)]
pub struct ApiSuccess<T> {
    success: bool,
    #[serde(flatten)]
    data: T,
}

impl<T: Serialize> ApiSuccess<T> {
    pub fn new(data: T) -> Self {
        Self { success: true, data }
    }
}

impl<T: Serialize> IntoResponse for ApiSuccess<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// JSON body extractor whose rejections use the API error envelope.
///
/// Status codes are the ones axum picks: 415 without a JSON content type,
/// 400 for malformed JSON, 422 for well-formed JSON of the wrong shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => {
                tracing::debug!(error = %rejection.body_text(), "Rejected request body");
                Err(error_response(rejection.status(), &rejection.body_text()))
            }
        }
    }
}

/// Error body in the shape every client already parses.
pub fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": false, "error": message }))).into_response()
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        match self {
            ServiceError::Conflict { message, owner_id } => (
                status,
                Json(json!({ "success": false, "error": message, "ownerId": owner_id })),
            )
                .into_response(),
            ServiceError::CircuitOpen(e) => {
                tracing::warn!(outcome = "circuit_open", "Request refused while circuit is open");
                let mut response = error_response(status, "Service temporarily unavailable");
                if let Ok(value) = HeaderValue::from_str(&e.retry_after_secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                response
            }
            ServiceError::Downstream(e) => {
                tracing::warn!(outcome = "downstream_failure", error = %e, "HikCentral call failed");
                error_response(status, &format!("HikCentral request failed: {}", downstream_summary(&e)))
            }
            ServiceError::Signing(e) => {
                tracing::error!(error = %e, "Request signing failed");
                error_response(status, "Internal server error")
            }
            ServiceError::Internal(e) => {
                tracing::error!(error = %e, "Internal error");
                error_response(status, "Internal server error")
            }
            other => error_response(status, &other.to_string()),
        }
    }
}

/// Client-safe description of a downstream failure.
fn downstream_summary(err: &crate::hikcentral::DownstreamError) -> String {
    use crate::hikcentral::DownstreamError;
    match err {
        DownstreamError::Transport(_) => "appliance unreachable".to_string(),
        DownstreamError::Status { status, .. } => format!("HTTP {status}"),
        DownstreamError::Api { code, message } => format!("{message} (code {code})"),
        DownstreamError::Decode(_) => "unexpected response".to_string(),
    }
}
