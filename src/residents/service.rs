//! Resident sync service.
//!
//! # Responsibilities
//! - Validate and normalize inbound resident requests
//! - Drive every HikCentral call through the circuit breaker
//! - Keep the local registry in step with the appliance
//! - Pull HikCentral persons into the registry on request
//! - Emit one audit event per operation
//!
//! # Design Decisions
//! - The registry is only changed after HikCentral accepted the change
//! - Breaker rejection and downstream failure stay distinct all the way to HTTP
//! - Only appliance failures count against the circuit; local errors never trip it
//! - A create that loses the insert race deletes the person it just registered
//! - Audit events go to the `lyve_bridge::audit` target so they can be routed separately

use std::sync::Arc;
use std::time::Instant;

use base64::{engine::general_purpose, Engine};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::config::ResidentConfig;
use crate::hikcentral::types::{
    CERTIFICATE_TYPE_ID_CARD, FACE_TYPE_NORMAL, PERSON_TYPE_NORMAL,
};
use crate::hikcentral::{
    ClientError, DownstreamError, FaceData, HikCentralClient, PersonPayload, PersonUpdate,
    QrCodeRequest,
};
use crate::resilience::{CallError, CircuitBreaker, CircuitOpenError};
use crate::residents::registry::ResidentRegistry;
use crate::residents::types::{
    format_hik_time, image_format, local_now, parse_datetime, split_name, BatchItemResult,
    BatchOutcome, CreateResidentRequest, FaceCheck, QrCodeIssued, ResidentDetails,
    ResidentRecord, SyncRequest, UpdateResidentRequest, PERSON_CODE_PREFIX,
};
use crate::signing::SigningError;

/// HikCentral `gender` value used when none is known.
const DEFAULT_GENDER: u8 = 1;

/// Owner id prefix for persons created in HikCentral rather than through the bridge.
const SYNCED_OWNER_PREFIX: &str = "SYNC_";

/// Errors returned by resident operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Conflict { message: String, owner_id: String },

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("HikCentral request failed: {0}")]
    Downstream(#[from] DownstreamError),

    #[error("request signing failed: {0}")]
    Signing(#[from] SigningError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// HTTP status this error surfaces as.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::NotFound(_) => 404,
            ServiceError::Conflict { .. } => 409,
            ServiceError::Invalid(_) => 400,
            ServiceError::CircuitOpen(_) => 503,
            ServiceError::Downstream(_) => 502,
            ServiceError::Signing(_) | ServiceError::Internal(_) => 500,
        }
    }

    fn resident_not_found() -> Self {
        ServiceError::NotFound("Resident not found".to_string())
    }
}

impl From<ClientError> for ServiceError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Signing(e) => ServiceError::Signing(e),
            ClientError::Downstream(e) => ServiceError::Downstream(e),
            ClientError::Encode(e) => ServiceError::Internal(e.to_string()),
            ClientError::Config(e) => ServiceError::Internal(e),
        }
    }
}

impl From<CallError<ClientError>> for ServiceError {
    fn from(err: CallError<ClientError>) -> Self {
        match err {
            CallError::Open(e) => ServiceError::CircuitOpen(e),
            CallError::Failed(e) => e.into(),
        }
    }
}

/// Identifiers attached to one audit event.
#[derive(Default)]
struct Audit<'a> {
    operation: &'static str,
    email: Option<&'a str>,
    community: Option<&'a str>,
    owner_id: Option<&'a str>,
    unit_id: Option<&'a str>,
    person_id: Option<String>,
}

impl Audit<'_> {
    fn record<T>(&self, start: Instant, result: &Result<T, ServiceError>) {
        let elapsed_ms = start.elapsed().as_millis() as u64;
        let (status, error) = match result {
            Ok(_) => (200, None),
            Err(e) => (e.status_code(), Some(e.to_string())),
        };
        tracing::info!(
            target: "lyve_bridge::audit",
            operation = self.operation,
            email = self.email.unwrap_or("-"),
            community = self.community.unwrap_or("-"),
            owner_id = self.owner_id.unwrap_or("-"),
            unit_id = self.unit_id.unwrap_or("-"),
            person_id = self.person_id.as_deref().unwrap_or("-"),
            status,
            error = error.as_deref().unwrap_or(""),
            elapsed_ms,
            "sync"
        );
    }
}

/// Keeps residents in Lyve and persons in HikCentral in step.
pub struct ResidentService {
    client: Arc<HikCentralClient>,
    breaker: Arc<CircuitBreaker>,
    registry: Arc<ResidentRegistry>,
    config: ResidentConfig,
}

impl ResidentService {
    pub fn new(
        client: Arc<HikCentralClient>,
        breaker: Arc<CircuitBreaker>,
        registry: Arc<ResidentRegistry>,
        config: ResidentConfig,
    ) -> Self {
        Self {
            client,
            breaker,
            registry,
            config,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn registry(&self) -> &ResidentRegistry {
        &self.registry
    }

    /// Look up an active resident by email and community.
    pub fn check(&self, email: &str, community: &str) -> Result<ResidentRecord, ServiceError> {
        let start = Instant::now();
        let audit = Audit {
            operation: "CHECK",
            email: Some(email),
            community: Some(community),
            ..Audit::default()
        };

        let result = if email.trim().is_empty() || community.trim().is_empty() {
            Err(ServiceError::Invalid(
                "Both email and community are required".to_string(),
            ))
        } else {
            self.registry
                .find_active(email, community)
                .ok_or_else(ServiceError::resident_not_found)
        };

        audit.record(start, &result);
        result
    }

    /// Register a resident in HikCentral and record the mapping.
    pub async fn create(&self, request: CreateResidentRequest) -> Result<ResidentRecord, ServiceError> {
        let start = Instant::now();
        let owner_id = Uuid::new_v4().to_string();
        let mut audit = Audit {
            operation: "CREATE",
            email: Some(&request.email),
            community: Some(&request.community),
            unit_id: request.unit_id.as_deref(),
            ..Audit::default()
        };

        let result = self.create_inner(&request, &owner_id).await;
        if result.is_ok() {
            audit.owner_id = Some(&owner_id);
            audit.person_id = Some(person_code(&owner_id));
        }

        audit.record(start, &result);
        result
    }

    async fn create_inner(
        &self,
        request: &CreateResidentRequest,
        owner_id: &str,
    ) -> Result<ResidentRecord, ServiceError> {
        require(&request.email, "email")?;
        require(&request.community, "community")?;
        require(&request.name, "name")?;
        let unit_id = request.unit_id.as_deref().unwrap_or_default();
        require(unit_id, "unitId")?;
        if !request.email.contains('@') {
            return Err(ServiceError::Invalid(format!("invalid email '{}'", request.email)));
        }

        if let Some(existing) = self.registry.find_active(&request.email, &request.community) {
            return Err(conflict(existing));
        }

        let (from_date, to_date) = self.validity_window(
            request.from_date.as_deref(),
            request.to_date.as_deref(),
        )?;
        let (first_name, last_name) = split_name(&request.name);
        let faces = self.face_entries(&request.face_images, &request.name)?;
        let face_count = faces.len();
        let person_id = person_code(owner_id);
        let phone = request.phone.clone().unwrap_or_default();

        let payload = PersonPayload {
            person_code: person_id.clone(),
            person_family_name: last_name.clone(),
            person_given_name: first_name.clone(),
            gender: DEFAULT_GENDER,
            org_index_code: self.client.org_index_code().to_string(),
            phone_no: phone.clone(),
            email: request.email.clone(),
            certificate_type: CERTIFICATE_TYPE_ID_CARD,
            certificate_num: String::new(),
            person_type: PERSON_TYPE_NORMAL,
            begin_time: format_hik_time(&from_date),
            end_time: format_hik_time(&to_date),
            faces,
        };

        self.breaker
            .call_with(|| self.client.add_person(&payload), ClientError::is_downstream)
            .await?;

        let now = Utc::now();
        let record = ResidentRecord {
            owner_id: owner_id.to_string(),
            unit_id: unit_id.trim().to_string(),
            email: request.email.trim().to_string(),
            community: request.community.trim().to_string(),
            name: request.name.trim().to_string(),
            first_name,
            last_name,
            phone,
            owner_type: request.owner_type.clone().unwrap_or_default(),
            hikcentral_person_id: person_id,
            from_date,
            to_date,
            face_count,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        if let Err(existing) = self.registry.insert(record.clone()) {
            tracing::warn!(
                owner_id = %existing.owner_id,
                person_id = %record.hikcentral_person_id,
                "Concurrent create won the mapping, removing duplicate HikCentral person"
            );
            self.remove_orphan(&record.hikcentral_person_id).await;
            return Err(conflict(existing));
        }
        Ok(record)
    }

    /// Best-effort delete of a person no mapping points at.
    async fn remove_orphan(&self, person_id: &str) {
        let removed = self
            .breaker
            .call_with(|| self.client.delete_person(person_id), ClientError::is_downstream)
            .await;
        match removed {
            Ok(_) => tracing::info!(person_id, "Duplicate HikCentral person removed"),
            Err(e) => {
                let err = ServiceError::from(e);
                tracing::error!(person_id, error = %err, "Duplicate HikCentral person left behind");
            }
        }
    }

    /// Create each resident in turn and report every outcome.
    ///
    /// Fails as a whole only when the batch itself is unusable.
    pub async fn batch_create(
        &self,
        requests: Vec<CreateResidentRequest>,
    ) -> Result<BatchOutcome, ServiceError> {
        if requests.is_empty() {
            return Err(ServiceError::Invalid("residents must not be empty".to_string()));
        }
        if requests.len() > self.config.max_batch_size {
            return Err(ServiceError::Invalid(format!(
                "at most {} residents per batch, got {}",
                self.config.max_batch_size,
                requests.len()
            )));
        }

        let total = requests.len();
        let mut results = Vec::with_capacity(total);
        for (index, request) in requests.into_iter().enumerate() {
            let item = match self.create(request).await {
                Ok(record) => BatchItemResult {
                    index,
                    success: true,
                    owner_id: Some(record.owner_id),
                    hikcentral_person_id: Some(record.hikcentral_person_id),
                    status: 201,
                    error: None,
                },
                Err(e) => BatchItemResult {
                    index,
                    success: false,
                    owner_id: match &e {
                        ServiceError::Conflict { owner_id, .. } => Some(owner_id.clone()),
                        _ => None,
                    },
                    hikcentral_person_id: None,
                    status: e.status_code(),
                    error: Some(e.to_string()),
                },
            };
            results.push(item);
        }

        let success_count = results.iter().filter(|r| r.success).count();
        let error_count = total - success_count;
        tracing::info!(total, success_count, error_count, "Batch create finished");
        Ok(BatchOutcome {
            all_succeeded: error_count == 0,
            total,
            success_count,
            error_count,
            results,
        })
    }

    /// Pull a HikCentral person into the registry.
    ///
    /// Refreshes the active mapping for `person_id` if there is one, otherwise
    /// records a new resident using `request` for what HikCentral does not hold.
    pub async fn sync_from_hikcentral(
        &self,
        person_id: &str,
        request: SyncRequest,
    ) -> Result<ResidentRecord, ServiceError> {
        let start = Instant::now();
        let mut audit = Audit {
            operation: "SYNC",
            community: request.community.as_deref(),
            unit_id: request.unit_id.as_deref(),
            person_id: Some(person_id.to_string()),
            ..Audit::default()
        };

        let result = self.sync_inner(person_id, &request).await;
        if let Ok(record) = &result {
            audit.owner_id = Some(&record.owner_id);
            audit.email = Some(&record.email);
        }
        audit.record(start, &result);
        result
    }

    async fn sync_inner(
        &self,
        person_id: &str,
        request: &SyncRequest,
    ) -> Result<ResidentRecord, ServiceError> {
        require(person_id, "personId")?;
        let person = self
            .breaker
            .call_with(|| self.client.get_person(person_id), ClientError::is_downstream)
            .await?;
        if !person.is_object() {
            return Err(ServiceError::NotFound("Person not found in HikCentral".to_string()));
        }

        let text = |field: &str| {
            person
                .get(field)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .unwrap_or_default()
                .to_string()
        };
        let first_name = text("personGivenName");
        let last_name = text("personFamilyName");
        let name = format!("{first_name} {last_name}").trim().to_string();
        let phone = text("phoneNo");
        let email = text("email");
        let face_count = person
            .get("faces")
            .and_then(|v| v.as_array())
            .map_or(0, Vec::len);
        let begin = parse_datetime(&text("beginTime"));
        let end = parse_datetime(&text("endTime"));

        if let Some(current) = self.registry.find_by_person_id(person_id) {
            let applied = self.registry.update(&current.owner_id, |record| {
                if !name.is_empty() {
                    record.name = name;
                    record.first_name = first_name;
                    record.last_name = last_name;
                }
                if !email.is_empty() {
                    record.email = email;
                }
                record.phone = phone;
                record.face_count = face_count;
                if let (Some(begin), Some(end)) = (begin, end) {
                    record.from_date = begin;
                    record.to_date = end;
                }
            });
            return match applied {
                Some(Ok(record)) => Ok(record),
                Some(Err(existing)) => Err(conflict(existing)),
                None => Err(ServiceError::resident_not_found()),
            };
        }

        let community = request.community.as_deref().unwrap_or_default();
        let unit_id = request.unit_id.as_deref().unwrap_or_default();
        require(community, "community")?;
        require(unit_id, "unitId")?;
        if email.is_empty() {
            return Err(ServiceError::Invalid(
                "HikCentral person has no email to map".to_string(),
            ));
        }
        if let Some(existing) = self.registry.find_active(&email, community) {
            return Err(conflict(existing));
        }

        let (from_date, to_date) = match (begin, end) {
            (Some(begin), Some(end)) if end > begin => (begin, end),
            _ => self.validity_window(None, None)?,
        };
        let owner_id = match person_id.strip_prefix(PERSON_CODE_PREFIX) {
            Some(owner_id) if !owner_id.is_empty() => owner_id.to_string(),
            _ => format!("{SYNCED_OWNER_PREFIX}{person_id}"),
        };
        let now = Utc::now();
        let record = ResidentRecord {
            owner_id,
            unit_id: unit_id.trim().to_string(),
            email,
            community: community.trim().to_string(),
            name,
            first_name,
            last_name,
            phone,
            owner_type: request.owner_type.clone().unwrap_or_default(),
            hikcentral_person_id: person_id.to_string(),
            from_date,
            to_date,
            face_count,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.registry.insert(record.clone()).map_err(conflict)?;
        Ok(record)
    }

    /// Local record plus the person as HikCentral holds it.
    pub async fn fetch(&self, owner_id: &str, unit_id: &str) -> Result<ResidentDetails, ServiceError> {
        let start = Instant::now();
        let mut audit = Audit {
            operation: "GET",
            owner_id: Some(owner_id),
            unit_id: Some(unit_id),
            ..Audit::default()
        };

        let result: Result<ResidentDetails, ServiceError> = async {
            let resident = self
                .registry
                .get_active(owner_id, unit_id)
                .ok_or_else(ServiceError::resident_not_found)?;
            let hikcentral = self
                .breaker
                .call_with(
                    || self.client.get_person(&resident.hikcentral_person_id),
                    ClientError::is_downstream,
                )
                .await?;
            Ok(ResidentDetails { resident, hikcentral })
        }
        .await;

        if let Ok(details) = &result {
            audit.person_id = Some(details.resident.hikcentral_person_id.clone());
        }
        audit.record(start, &result);
        result
    }

    /// Push changed attributes to HikCentral, then update the mapping.
    pub async fn update(
        &self,
        owner_id: &str,
        unit_id: &str,
        changes: UpdateResidentRequest,
    ) -> Result<ResidentRecord, ServiceError> {
        let start = Instant::now();
        let mut audit = Audit {
            operation: "UPDATE",
            owner_id: Some(owner_id),
            unit_id: Some(unit_id),
            ..Audit::default()
        };

        let result = self.update_inner(owner_id, unit_id, &changes).await;
        if let Ok(record) = &result {
            audit.person_id = Some(record.hikcentral_person_id.clone());
        }
        audit.record(start, &result);
        result
    }

    async fn update_inner(
        &self,
        owner_id: &str,
        unit_id: &str,
        changes: &UpdateResidentRequest,
    ) -> Result<ResidentRecord, ServiceError> {
        if changes.is_empty() {
            return Err(ServiceError::Invalid("no fields to update".to_string()));
        }
        let current = self
            .registry
            .get_active(owner_id, unit_id)
            .ok_or_else(ServiceError::resident_not_found)?;

        let name = match &changes.name {
            Some(name) => {
                require(name, "name")?;
                name.trim().to_string()
            }
            None => current.name.clone(),
        };
        let email = match &changes.email {
            Some(email) if !email.contains('@') => {
                return Err(ServiceError::Invalid(format!("invalid email '{email}'")));
            }
            Some(email) => email.trim().to_string(),
            None => current.email.clone(),
        };
        if email != current.email {
            if let Some(existing) = self.registry.find_active(&email, &current.community) {
                if existing.owner_id != current.owner_id {
                    return Err(conflict(existing));
                }
            }
        }

        let from_date = match &changes.from_date {
            Some(raw) => parse_field(raw, "fromDate")?,
            None => current.from_date,
        };
        let to_date = match &changes.to_date {
            Some(raw) => parse_field(raw, "toDate")?,
            None => current.to_date,
        };
        if to_date <= from_date {
            return Err(ServiceError::Invalid("toDate must be after fromDate".to_string()));
        }

        let (first_name, last_name) = split_name(&name);
        let phone = changes.phone.clone().unwrap_or_else(|| current.phone.clone());
        let owner_type = changes
            .owner_type
            .clone()
            .unwrap_or_else(|| current.owner_type.clone());

        let update = PersonUpdate {
            person_id: current.hikcentral_person_id.clone(),
            person_family_name: last_name.clone(),
            person_given_name: first_name.clone(),
            gender: DEFAULT_GENDER,
            phone_no: phone.clone(),
            email: email.clone(),
            certificate_type: CERTIFICATE_TYPE_ID_CARD,
            certificate_num: String::new(),
            person_type: PERSON_TYPE_NORMAL,
            begin_time: format_hik_time(&from_date),
            end_time: format_hik_time(&to_date),
        };

        self.breaker
            .call_with(|| self.client.update_person(&update), ClientError::is_downstream)
            .await?;

        let applied = self.registry.update(owner_id, |record| {
            record.name = name;
            record.first_name = first_name;
            record.last_name = last_name;
            record.email = email;
            record.phone = phone;
            record.owner_type = owner_type;
            record.from_date = from_date;
            record.to_date = to_date;
        });
        match applied {
            Some(Ok(record)) => Ok(record),
            Some(Err(existing)) => Err(conflict(existing)),
            None => Err(ServiceError::resident_not_found()),
        }
    }

    /// Remove the person from HikCentral, then deactivate the mapping.
    pub async fn delete(&self, owner_id: &str, unit_id: &str) -> Result<ResidentRecord, ServiceError> {
        let start = Instant::now();
        let mut audit = Audit {
            operation: "DELETE",
            owner_id: Some(owner_id),
            unit_id: Some(unit_id),
            ..Audit::default()
        };

        let result: Result<ResidentRecord, ServiceError> = async {
            let resident = self
                .registry
                .get_active(owner_id, unit_id)
                .ok_or_else(ServiceError::resident_not_found)?;
            self.breaker
                .call_with(
                    || self.client.delete_person(&resident.hikcentral_person_id),
                    ClientError::is_downstream,
                )
                .await?;
            self.registry
                .deactivate(owner_id)
                .ok_or_else(ServiceError::resident_not_found)
        }
        .await;

        if let Ok(record) = &result {
            audit.email = Some(&record.email);
            audit.community = Some(&record.community);
            audit.person_id = Some(record.hikcentral_person_id.clone());
        }
        audit.record(start, &result);
        result
    }

    /// Issue an access QR code for an active resident.
    pub async fn generate_qr_code(
        &self,
        owner_id: &str,
        unit_id: &str,
        validity_minutes: Option<u32>,
    ) -> Result<QrCodeIssued, ServiceError> {
        let start = Instant::now();
        let mut audit = Audit {
            operation: "QR_CODE",
            owner_id: Some(owner_id),
            unit_id: Some(unit_id),
            ..Audit::default()
        };

        let validity_minutes = validity_minutes.unwrap_or(self.config.qr_validity_minutes);
        let result: Result<(String, QrCodeIssued), ServiceError> = async {
            if validity_minutes == 0 {
                return Err(ServiceError::Invalid("validityMinutes must be > 0".to_string()));
            }
            let resident = self
                .registry
                .get_active(owner_id, unit_id)
                .ok_or_else(ServiceError::resident_not_found)?;
            let request = QrCodeRequest {
                person_id: resident.hikcentral_person_id.clone(),
                unit_id: unit_id.to_string(),
                validity_minutes,
            };
            let data = self
                .breaker
                .call_with(|| self.client.generate_qr_code(&request), ClientError::is_downstream)
                .await?;
            if data.qr_code.is_empty() {
                return Err(ServiceError::Downstream(DownstreamError::Decode(
                    "No QR code data received".to_string(),
                )));
            }

            let issued_at = Utc::now();
            let expires_at = data
                .expires_at
                .as_deref()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| issued_at + ChronoDuration::minutes(i64::from(validity_minutes)));

            Ok((
                resident.hikcentral_person_id,
                QrCodeIssued {
                    owner_id: owner_id.to_string(),
                    unit_id: unit_id.to_string(),
                    qr_code: data.qr_code,
                    expires_at,
                    validity_minutes,
                },
            ))
        }
        .await;

        let result = result.map(|(person_id, issued)| {
            audit.person_id = Some(person_id);
            issued
        });
        audit.record(start, &result);
        result
    }

    fn validity_window(
        &self,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<(NaiveDateTime, NaiveDateTime), ServiceError> {
        let from_date = match from.filter(|s| !s.trim().is_empty()) {
            Some(raw) => parse_field(raw, "fromDate")?,
            None => local_now(),
        };
        let to_date = match to.filter(|s| !s.trim().is_empty()) {
            Some(raw) => parse_field(raw, "toDate")?,
            None => from_date + ChronoDuration::days(self.config.default_validity_days),
        };
        if to_date <= from_date {
            return Err(ServiceError::Invalid("toDate must be after fromDate".to_string()));
        }
        Ok((from_date, to_date))
    }

    fn face_entries(&self, images: &[String], name: &str) -> Result<Vec<FaceData>, ServiceError> {
        if images.len() > self.config.max_face_images {
            return Err(ServiceError::Invalid(format!(
                "at most {} face images are accepted, got {}",
                self.config.max_face_images,
                images.len()
            )));
        }

        let born_time = format_hik_time(&local_now());
        images
            .iter()
            .enumerate()
            .map(|(i, image)| {
                let (encoded, _) = self.decode_face(image, &format!("faceImages[{i}]"))?;
                Ok(FaceData {
                    face_data: encoded.to_string(),
                    face_type: FACE_TYPE_NORMAL,
                    name: format!("{}_face_{}", name.trim(), i + 1),
                    born_time: born_time.clone(),
                    sex: DEFAULT_GENDER,
                    certificate_type: CERTIFICATE_TYPE_ID_CARD,
                    certificate_num: String::new(),
                })
            })
            .collect()
    }

    /// Check a face image without registering anyone.
    pub fn validate_face(&self, image: &str) -> Result<FaceCheck, ServiceError> {
        let (_, decoded) = self.decode_face(image, "faceImage")?;
        Ok(FaceCheck {
            valid: true,
            size_bytes: decoded.len(),
            format: image_format(&decoded),
        })
    }

    /// Decode one base64 face image and enforce the size limit.
    fn decode_face<'a>(
        &self,
        image: &'a str,
        field: &str,
    ) -> Result<(&'a str, Vec<u8>), ServiceError> {
        let encoded = strip_data_url(image.trim());
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| ServiceError::Invalid(format!("{field} is not valid base64: {e}")))?;
        if decoded.is_empty() {
            return Err(ServiceError::Invalid(format!("{field} is empty")));
        }
        if decoded.len() > self.config.max_face_image_bytes {
            return Err(ServiceError::Invalid(format!(
                "{field} is {} bytes, limit is {}",
                decoded.len(),
                self.config.max_face_image_bytes
            )));
        }
        Ok((encoded, decoded))
    }
}

impl std::fmt::Debug for ResidentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResidentService")
            .field("client", &self.client)
            .field("breaker", &self.breaker)
            .field("registry", &self.registry)
            .finish()
    }
}

/// HikCentral person code for an owner id.
pub fn person_code(owner_id: &str) -> String {
    format!("{PERSON_CODE_PREFIX}{owner_id}")
}

fn require(value: &str, field: &str) -> Result<(), ServiceError> {
    if value.trim().is_empty() {
        Err(ServiceError::Invalid(format!("{field} is required")))
    } else {
        Ok(())
    }
}

fn parse_field(raw: &str, field: &str) -> Result<NaiveDateTime, ServiceError> {
    parse_datetime(raw).ok_or_else(|| ServiceError::Invalid(format!("invalid {field} '{raw}'")))
}

fn conflict(existing: ResidentRecord) -> ServiceError {
    ServiceError::Conflict {
        message: "Resident already exists".to_string(),
        owner_id: existing.owner_id,
    }
}

/// `data:image/jpeg;base64,XXXX` → `XXXX`.
fn strip_data_url(image: &str) -> &str {
    match image.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => image,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, HikCentralConfig};
    use crate::signing::RequestSigner;

    /// Service pointed at a closed local port: every downstream call fails fast.
    fn service(config: ResidentConfig) -> ResidentService {
        let hik = HikCentralConfig {
            base_url: "http://127.0.0.1:9".into(),
            app_key: "k".into(),
            app_secret: "s".into(),
            timeout_secs: 2,
            ..HikCentralConfig::default()
        };
        let signer = Arc::new(RequestSigner::from_config(&hik));
        let client = Arc::new(HikCentralClient::new(&hik, signer).unwrap());
        let breaker = Arc::new(CircuitBreaker::in_memory(&CircuitBreakerConfig::default()));
        ResidentService::new(client, breaker, Arc::new(ResidentRegistry::new(None)), config)
    }

    fn create_request() -> CreateResidentRequest {
        CreateResidentRequest {
            email: "jane@example.com".into(),
            community: "hydepark".into(),
            name: "Jane Doe".into(),
            unit_id: Some("U-1".into()),
            ..CreateResidentRequest::default()
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ServiceError::resident_not_found().status_code(), 404);
        assert_eq!(ServiceError::Invalid("x".into()).status_code(), 400);
        assert_eq!(
            ServiceError::CircuitOpen(CircuitOpenError { retry_after_secs: 60 }).status_code(),
            503
        );
        assert_eq!(
            ServiceError::Downstream(DownstreamError::Decode("x".into())).status_code(),
            502
        );
        assert_eq!(ServiceError::Signing(SigningError::InvalidKey).status_code(), 500);
    }

    #[test]
    fn test_call_error_conversion_keeps_kinds_apart() {
        let open: ServiceError = CallError::<ClientError>::Open(CircuitOpenError {
            retry_after_secs: 5,
        })
        .into();
        assert!(matches!(open, ServiceError::CircuitOpen(e) if e.retry_after_secs == 5));

        let failed: ServiceError = CallError::Failed(ClientError::Downstream(DownstreamError::Api {
            code: "1".into(),
            message: "nope".into(),
        }))
        .into();
        assert!(matches!(failed, ServiceError::Downstream(DownstreamError::Api { .. })));
    }

    #[test]
    fn test_person_code() {
        assert_eq!(person_code("abc"), "LYVE_abc");
    }

    #[test]
    fn test_strip_data_url() {
        assert_eq!(strip_data_url("data:image/png;base64,aGVsbG8="), "aGVsbG8=");
        assert_eq!(strip_data_url("aGVsbG8="), "aGVsbG8=");
    }

    #[test]
    fn test_face_entries() {
        let svc = service(ResidentConfig::default());
        let faces = svc
            .face_entries(&["aGVsbG8=".into(), "data:image/jpeg;base64,d29ybGQ=".into()], "Jane Doe")
            .unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].name, "Jane Doe_face_1");
        assert_eq!(faces[1].face_data, "d29ybGQ=");
        assert_eq!(faces[1].certificate_type, 111);
    }

    #[test]
    fn test_face_entries_limits() {
        let svc = service(ResidentConfig {
            max_face_images: 1,
            max_face_image_bytes: 4,
            ..ResidentConfig::default()
        });

        let too_many = svc.face_entries(&["aGk=".into(), "aGk=".into()], "x");
        assert!(matches!(too_many, Err(ServiceError::Invalid(_))));

        let too_big = svc.face_entries(&["aGVsbG8=".into()], "x");
        assert!(matches!(too_big, Err(ServiceError::Invalid(m)) if m.contains("limit")));

        let not_base64 = svc.face_entries(&["***".into()], "x");
        assert!(matches!(not_base64, Err(ServiceError::Invalid(_))));

        assert_eq!(svc.face_entries(&["aGk=".into()], "x").unwrap().len(), 1);
    }

    #[test]
    fn test_validity_window_defaults() {
        let svc = service(ResidentConfig::default());
        let (from, to) = svc.validity_window(Some("2024-01-01T00:00:00"), None).unwrap();
        assert_eq!(to - from, ChronoDuration::days(365));

        let err = svc
            .validity_window(Some("2024-01-02"), Some("2024-01-01"))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Invalid(_)));

        assert!(svc.validity_window(Some("garbage"), None).is_err());
    }

    #[test]
    fn test_check_requires_fields() {
        let svc = service(ResidentConfig::default());
        assert!(matches!(svc.check("", "hydepark"), Err(ServiceError::Invalid(_))));
        assert!(matches!(
            svc.check("jane@example.com", "hydepark"),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_before_calling_downstream() {
        let svc = service(ResidentConfig::default());
        let mut request = create_request();
        request.email = "not-an-email".into();

        assert!(matches!(svc.create(request).await, Err(ServiceError::Invalid(_))));
        assert_eq!(svc.breaker().failure_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_downstream_failure_leaves_registry_untouched() {
        let svc = service(ResidentConfig::default());
        let err = svc.create(create_request()).await.unwrap_err();

        assert!(matches!(err, ServiceError::Downstream(DownstreamError::Transport(_))));
        assert!(svc.registry().is_empty());
        assert_eq!(svc.breaker().failure_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_requires_unit_before_calling_downstream() {
        let svc = service(ResidentConfig::default());
        let mut request = create_request();
        request.unit_id = None;
        let err = svc.create(request).await.unwrap_err();
        assert!(matches!(err, ServiceError::Invalid(m) if m == "unitId is required"));

        let mut request = create_request();
        request.unit_id = Some("  ".into());
        assert!(matches!(svc.create(request).await, Err(ServiceError::Invalid(_))));

        assert!(svc.registry().is_empty());
        assert_eq!(svc.breaker().failure_count().await.unwrap(), 0);
    }

    #[test]
    fn test_validate_face() {
        let svc = service(ResidentConfig {
            max_face_image_bytes: 8,
            ..ResidentConfig::default()
        });

        // 0xFF 0xD8 0xFF 0xE0
        let check = svc.validate_face("data:image/jpeg;base64,/9j/4A==").unwrap();
        assert_eq!(
            check,
            FaceCheck {
                valid: true,
                size_bytes: 4,
                format: "jpeg"
            }
        );

        assert!(matches!(svc.validate_face(""), Err(ServiceError::Invalid(m)) if m == "faceImage is empty"));
        assert!(matches!(svc.validate_face("@@@"), Err(ServiceError::Invalid(_))));
        let too_big = svc.validate_face("aGVsbG8gd29ybGQ=");
        assert!(matches!(too_big, Err(ServiceError::Invalid(m)) if m.contains("limit is 8")));
    }

    #[tokio::test]
    async fn test_batch_create_limits() {
        let svc = service(ResidentConfig {
            max_batch_size: 2,
            ..ResidentConfig::default()
        });
        assert!(matches!(svc.batch_create(Vec::new()).await, Err(ServiceError::Invalid(_))));
        let oversized = vec![create_request(), create_request(), create_request()];
        assert!(matches!(svc.batch_create(oversized).await, Err(ServiceError::Invalid(m)) if m.contains("at most 2")));
        assert_eq!(svc.breaker().failure_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_create_reports_each_entry() {
        let svc = service(ResidentConfig::default());
        let mut nameless = create_request();
        nameless.name.clear();

        let outcome = svc
            .batch_create(vec![nameless, create_request()])
            .await
            .unwrap();
        assert!(!outcome.all_succeeded);
        assert_eq!(outcome.total, 2);
        assert_eq!(outcome.success_count, 0);
        assert_eq!(outcome.error_count, 2);
        assert_eq!(outcome.results[0].index, 0);
        assert_eq!(outcome.results[0].status, 400);
        assert_eq!(outcome.results[0].error.as_deref(), Some("name is required"));
        // The second entry reached the closed port.
        assert_eq!(outcome.results[1].status, 502);
        assert_eq!(svc.breaker().failure_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sync_requires_person_id() {
        let svc = service(ResidentConfig::default());
        let err = svc
            .sync_from_hikcentral(" ", SyncRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Invalid(m) if m == "personId is required"));
        assert_eq!(svc.breaker().failure_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_resident_operations() {
        let svc = service(ResidentConfig::default());
        assert!(matches!(svc.fetch("o", "u").await, Err(ServiceError::NotFound(_))));
        assert!(matches!(svc.delete("o", "u").await, Err(ServiceError::NotFound(_))));
        assert!(matches!(
            svc.generate_qr_code("o", "u", None).await,
            Err(ServiceError::NotFound(_))
        ));
        let changes = UpdateResidentRequest {
            phone: Some("1".into()),
            ..UpdateResidentRequest::default()
        };
        assert!(matches!(svc.update("o", "u", changes).await, Err(ServiceError::NotFound(_))));
        assert_eq!(svc.breaker().failure_count().await.unwrap(), 0);
    }
}
