//! Request handlers for the resident API.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;

use crate::http::response::{ApiJson, ApiSuccess};
use crate::http::server::AppState;
use crate::resilience::CircuitState;
use crate::residents::{
    BatchCreateRequest, CheckRequest, CreateResidentRequest, FaceValidateRequest, QrCodeOptions,
    ServiceError, SyncRequest, UpdateResidentRequest,
};

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let circuit = state.service.breaker().snapshot().await;
    let status = if circuit.degraded {
        "degraded"
    } else if circuit.state == CircuitState::Closed {
        "healthy"
    } else {
        "downstream_unavailable"
    };

    Json(json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "store": circuit.store,
        "circuitBreaker": circuit,
        "residents": {
            "active": state.service.registry().active_count(),
        },
    }))
}

/// `POST /api/v1/residents/check`
pub async fn check_resident(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CheckRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let resident = state.service.check(&request.email, &request.community)?;
    Ok(ApiSuccess::new(resident))
}

/// `POST /api/v1/residents`
pub async fn create_resident(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CreateResidentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let resident = state.service.create(request).await?;
    Ok((StatusCode::CREATED, ApiSuccess::new(resident)))
}

/// `POST /api/v1/residents/batch`
pub async fn batch_create_residents(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<BatchCreateRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state.service.batch_create(request.residents).await?;
    Ok(ApiSuccess::new(outcome))
}

/// `POST /api/v1/residents/sync/{personId}`
///
/// The body is optional once the person is already mapped.
pub async fn sync_resident(
    State(state): State<AppState>,
    Path(person_id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let request: SyncRequest = optional_body(&body)?;
    let resident = state.service.sync_from_hikcentral(&person_id, request).await?;
    Ok(ApiSuccess::new(resident))
}

/// `POST /api/v1/faces/validate`
pub async fn validate_face(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<FaceValidateRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let check = state.service.validate_face(&request.face_image)?;
    Ok(ApiSuccess::new(check))
}

/// `GET /api/v1/residents/{ownerId}/{unitId}`
pub async fn get_resident(
    State(state): State<AppState>,
    Path((owner_id, unit_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ServiceError> {
    let details = state.service.fetch(&owner_id, &unit_id).await?;
    Ok(ApiSuccess::new(details))
}

/// `PUT /api/v1/residents/{ownerId}/{unitId}`
pub async fn update_resident(
    State(state): State<AppState>,
    Path((owner_id, unit_id)): Path<(String, String)>,
    ApiJson(changes): ApiJson<UpdateResidentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let resident = state.service.update(&owner_id, &unit_id, changes).await?;
    Ok(ApiSuccess::new(resident))
}

/// `DELETE /api/v1/residents/{ownerId}/{unitId}`
pub async fn delete_resident(
    State(state): State<AppState>,
    Path((owner_id, unit_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ServiceError> {
    let resident = state.service.delete(&owner_id, &unit_id).await?;
    Ok(ApiSuccess::new(json!({
        "ownerId": resident.owner_id,
        "unitId": resident.unit_id,
    })))
}

/// `POST /api/v1/residents/{ownerId}/{unitId}/qrcode`
///
/// The body is optional; an empty one uses the configured validity.
pub async fn generate_qr_code(
    State(state): State<AppState>,
    Path((owner_id, unit_id)): Path<(String, String)>,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let options: QrCodeOptions = optional_body(&body)?;
    let issued = state
        .service
        .generate_qr_code(&owner_id, &unit_id, options.validity_minutes)
        .await?;
    Ok(ApiSuccess::new(issued))
}

/// Parse a JSON body that may be left empty.
fn optional_body<T>(body: &[u8]) -> Result<T, ServiceError>
where
    T: serde::de::DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        Ok(T::default())
    } else {
        serde_json::from_slice(body)
            .map_err(|e| ServiceError::Invalid(format!("invalid request body: {e}")))
    }
}
