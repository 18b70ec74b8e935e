use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::http::response::error_response;
use crate::http::server::AppState;

/// Header carrying the shared API key.
pub const API_KEY_HEADER: &str = "x-api-key";

pub async fn api_key_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.auth.require_api_key {
        return next.run(request).await;
    }

    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok());

    match presented {
        None => error_response(StatusCode::UNAUTHORIZED, "X-API-Key header is required"),
        Some(key) if bool::from(key.as_bytes().ct_eq(state.auth.api_key.as_bytes())) => {
            next.run(request).await
        }
        Some(_) => {
            tracing::warn!(path = %request.uri().path(), "Rejected request with invalid API key");
            error_response(StatusCode::UNAUTHORIZED, "Invalid API key")
        }
    }
}
