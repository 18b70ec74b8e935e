//! HikCentral OpenAPI wire types and errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::signing::SigningError;

/// `certificateType` for a national ID card.
pub const CERTIFICATE_TYPE_ID_CARD: u32 = 111;

/// `personType` for a regular person.
pub const PERSON_TYPE_NORMAL: u8 = 1;

/// `faceType` for a normal face picture.
pub const FACE_TYPE_NORMAL: u8 = 1;

/// Body of `person/single/add`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonPayload {
    pub person_code: String,
    pub person_family_name: String,
    pub person_given_name: String,
    pub gender: u8,
    pub org_index_code: String,
    pub phone_no: String,
    pub email: String,
    pub certificate_type: u32,
    pub certificate_num: String,
    pub person_type: u8,
    /// `YYYY-MM-DDTHH:MM:SS`, appliance local time.
    pub begin_time: String,
    pub end_time: String,
    pub faces: Vec<FaceData>,
}

/// One face picture attached to a person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceData {
    /// Base64 image bytes.
    pub face_data: String,
    pub face_type: u8,
    pub name: String,
    pub born_time: String,
    pub sex: u8,
    pub certificate_type: u32,
    pub certificate_num: String,
}

/// Body of `person/single/update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonUpdate {
    pub person_id: String,
    pub person_family_name: String,
    pub person_given_name: String,
    pub gender: u8,
    pub phone_no: String,
    pub email: String,
    pub certificate_type: u32,
    pub certificate_num: String,
    pub person_type: u8,
    pub begin_time: String,
    pub end_time: String,
}

/// Body of `visitor/access/qrCode/generate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCodeRequest {
    pub person_id: String,
    pub unit_id: String,
    pub validity_minutes: u32,
}

/// `data` object returned by QR code generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QrCodeData {
    /// Base64 PNG.
    pub qr_code: String,
    pub expires_at: Option<String>,
}

/// Response envelope shared by every OpenAPI call.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope {
    /// `"0"` on success. Some firmware sends it as a number.
    #[serde(default)]
    pub code: Value,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl ApiEnvelope {
    /// Code rendered as text, whatever JSON type it arrived as.
    pub fn code_str(&self) -> String {
        match &self.code {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code_str() == "0"
    }
}

/// A downstream call that reached, or tried to reach, the appliance and failed.
#[derive(Debug, Error)]
pub enum DownstreamError {
    /// Connection refused, TLS failure, timeout.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// Non-2xx HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// 2xx with an envelope `code` other than `"0"`.
    #[error("HikCentral error {code}: {message}")]
    Api { code: String, message: String },

    /// Body was not the expected JSON.
    #[error("undecodable response: {0}")]
    Decode(String),
}

impl DownstreamError {
    /// Short label for metrics and audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            DownstreamError::Transport(_) => "transport",
            DownstreamError::Status { .. } => "status",
            DownstreamError::Api { .. } => "api",
            DownstreamError::Decode(_) => "decode",
        }
    }
}

/// Errors raised by [`HikCentralClient`](crate::hikcentral::HikCentralClient).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Downstream(#[from] DownstreamError),

    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Whether the appliance itself failed, as opposed to a local error
    /// raised before anything was sent.
    pub fn is_downstream(&self) -> bool {
        matches!(self, ClientError::Downstream(_))
    }
}
