//! Resident records and API request/response shapes.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Timestamp layout HikCentral expects for `beginTime` / `endTime`.
pub const HIK_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Prefix of every HikCentral person code created by the bridge.
pub const PERSON_CODE_PREFIX: &str = "LYVE_";

/// Local mapping between a Lyve resident and its HikCentral person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResidentRecord {
    pub owner_id: String,
    pub unit_id: String,
    pub email: String,
    pub community: String,
    pub name: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub owner_type: String,
    pub hikcentral_person_id: String,
    pub from_date: NaiveDateTime,
    pub to_date: NaiveDateTime,
    pub face_count: usize,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `POST /api/v1/residents/check`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub community: String,
}

/// `POST /api/v1/residents`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateResidentRequest {
    pub email: String,
    pub community: String,
    pub name: String,
    pub phone: Option<String>,
    pub unit_id: Option<String>,
    pub owner_type: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    /// Base64 face pictures, optionally as `data:` URLs.
    pub face_images: Vec<String>,
}

/// `PUT /api/v1/residents/{ownerId}/{unitId}`. Absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateResidentRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub owner_type: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
}

impl UpdateResidentRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.phone.is_none()
            && self.email.is_none()
            && self.owner_type.is_none()
            && self.from_date.is_none()
            && self.to_date.is_none()
    }
}

/// `POST /api/v1/residents/{ownerId}/{unitId}/qrcode`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QrCodeOptions {
    pub validity_minutes: Option<u32>,
}

/// Local record plus what HikCentral currently holds for the person.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResidentDetails {
    #[serde(flatten)]
    pub resident: ResidentRecord,
    pub hikcentral: Value,
}

/// An issued access QR code.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCodeIssued {
    pub owner_id: String,
    pub unit_id: String,
    /// Base64 PNG.
    pub qr_code: String,
    pub expires_at: DateTime<Utc>,
    pub validity_minutes: u32,
}

/// `POST /api/v1/residents/batch`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchCreateRequest {
    pub residents: Vec<CreateResidentRequest>,
}

/// Result of one entry in a batch create.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub index: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hikcentral_person_id: Option<String>,
    /// HTTP status the entry would have received on its own.
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-entry outcomes of a batch create, in request order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub all_succeeded: bool,
    pub total: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub results: Vec<BatchItemResult>,
}

/// `POST /api/v1/residents/sync/{personId}`.
///
/// Only consulted when the person has no local mapping yet.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncRequest {
    pub community: Option<String>,
    pub unit_id: Option<String>,
    pub owner_type: Option<String>,
}

/// `POST /api/v1/faces/validate`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FaceValidateRequest {
    pub face_image: String,
}

/// An accepted face image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceCheck {
    pub valid: bool,
    pub size_bytes: usize,
    pub format: &'static str,
}

/// Split a full name into (given, family): first token, then the rest.
pub fn split_name(full_name: &str) -> (String, String) {
    let mut parts = full_name.split_whitespace();
    let given = parts.next().unwrap_or_default().to_string();
    let family = parts.collect::<Vec<_>>().join(" ");
    (given, family)
}

/// Parse a client-supplied date or datetime.
///
/// Accepts RFC 3339 (normalized to UTC), naive `YYYY-MM-DDTHH:MM:SS[.fff]`,
/// and bare `YYYY-MM-DD` (midnight).
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Image container named by its leading magic bytes.
pub fn image_format(bytes: &[u8]) -> &'static str {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => "jpeg",
        [0x89, b'P', b'N', b'G', ..] => "png",
        [b'G', b'I', b'F', b'8', ..] => "gif",
        [b'B', b'M', ..] => "bmp",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "webp",
        _ => "unknown",
    }
}

/// Render a timestamp the way HikCentral expects it.
pub fn format_hik_time(dt: &NaiveDateTime) -> String {
    dt.format(HIK_TIME_FORMAT).to_string()
}

/// Current wall-clock time, second precision, appliance-local.
pub fn local_now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}
