//! Signed HTTP client for the HikCentral OpenAPI gateway.
//!
//! # Responsibilities
//! - Reduce the configured base URL to its origin
//! - Serialize, sign, and send one request per call
//! - Interpret the `{code, msg, data}` envelope
//! - Record per-call latency and outcome metrics
//!
//! # Design Decisions
//! - One parameterized executor serves every verb
//! - Only the path is signed; query parameters travel unsigned
//! - No retries here; the circuit breaker sees every failure

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Method;
use serde::Serialize;
use serde_json::{json, Value};
use url::Url;

use crate::config::HikCentralConfig;
use crate::hikcentral::types::{
    ApiEnvelope, ClientError, DownstreamError, PersonPayload, PersonUpdate, QrCodeData,
    QrCodeRequest,
};
use crate::observability::metrics;
use crate::signing::RequestSigner;

pub const ADD_PERSON_PATH: &str = "/artemis/api/resource/v1/person/single/add";
pub const UPDATE_PERSON_PATH: &str = "/artemis/api/resource/v1/person/single/update";
pub const DELETE_PERSON_PATH: &str = "/artemis/api/resource/v1/person/single/delete";
pub const GET_PERSON_PATH: &str = "/artemis/api/resource/v1/person/single/info";
pub const QR_CODE_PATH: &str = "/artemis/api/visitor/access/qrCode/generate";

/// Upper bound on how much of an error body is kept.
const MAX_ERROR_BODY: usize = 512;

/// HikCentral OpenAPI client.
#[derive(Clone)]
pub struct HikCentralClient {
    http: reqwest::Client,
    base_url: String,
    org_index_code: String,
    signer: Arc<RequestSigner>,
}

impl HikCentralClient {
    /// Create a client.
    ///
    /// # Arguments
    /// * `config` - The `[hikcentral]` section
    /// * `signer` - Shared signer holding the partner credentials
    pub fn new(config: &HikCentralConfig, signer: Arc<RequestSigner>) -> Result<Self, ClientError> {
        let base_url = origin_of(&config.base_url)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        tracing::info!(
            base_url = %base_url,
            verify_ssl = config.verify_ssl,
            timeout_secs = config.timeout_secs,
            "HikCentral client initialized"
        );

        Ok(Self {
            http,
            base_url,
            org_index_code: config.org_index_code.clone(),
            signer,
        })
    }

    /// Origin every path is appended to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Organization new persons are filed under.
    pub fn org_index_code(&self) -> &str {
        &self.org_index_code
    }

    /// Sign and send one request, returning the envelope's `data` (or `null`).
    ///
    /// `body` is serialized compactly; `None` sends no body and no Content-MD5.
    pub async fn execute<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        query: &[(&str, &str)],
    ) -> Result<Value, ClientError>
    where
        B: Serialize + ?Sized,
    {
        let start = Instant::now();
        let result = self.send(method.clone(), path, body, query).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(ClientError::Downstream(e)) => e.kind(),
            Err(_) => "local",
        };
        metrics::record_downstream_request(path, outcome, start);

        match &result {
            Ok(_) => tracing::debug!(
                method = %method,
                path,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "HikCentral call succeeded"
            ),
            Err(e) => tracing::warn!(
                method = %method,
                path,
                outcome,
                error = %e,
                "HikCentral call failed"
            ),
        }
        result
    }

    async fn send<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        query: &[(&str, &str)],
    ) -> Result<Value, ClientError>
    where
        B: Serialize + ?Sized,
    {
        let body = match body {
            Some(b) => serde_json::to_string(b)?,
            None => String::new(),
        };
        let signed = self.signer.build_headers(&method, path, body.as_bytes())?;
        let headers = signed.header_map()?;

        let mut request = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .headers(headers);
        if !query.is_empty() {
            request = request.query(query);
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request.send().await.map_err(DownstreamError::Transport)?;
        let status = response.status();
        let text = response.text().await.map_err(DownstreamError::Transport)?;

        if !status.is_success() {
            return Err(DownstreamError::Status {
                status: status.as_u16(),
                body: truncate(text, MAX_ERROR_BODY),
            }
            .into());
        }

        let envelope: ApiEnvelope =
            serde_json::from_str(&text).map_err(|e| DownstreamError::Decode(e.to_string()))?;
        if !envelope.is_success() {
            return Err(DownstreamError::Api {
                code: envelope.code_str(),
                message: envelope.msg.unwrap_or_else(|| "Unknown error".to_string()),
            }
            .into());
        }
        Ok(envelope.data.unwrap_or(Value::Null))
    }

    /// Register a person.
    pub async fn add_person(&self, person: &PersonPayload) -> Result<Value, ClientError> {
        self.execute(Method::POST, ADD_PERSON_PATH, Some(person), &[]).await
    }

    /// Replace a person's attributes.
    pub async fn update_person(&self, update: &PersonUpdate) -> Result<Value, ClientError> {
        self.execute(Method::PUT, UPDATE_PERSON_PATH, Some(update), &[]).await
    }

    /// Remove a person.
    pub async fn delete_person(&self, person_id: &str) -> Result<Value, ClientError> {
        let body = json!({ "personId": person_id });
        self.execute(Method::DELETE, DELETE_PERSON_PATH, Some(&body), &[]).await
    }

    /// Fetch a person's stored attributes.
    pub async fn get_person(&self, person_id: &str) -> Result<Value, ClientError> {
        self.execute::<Value>(Method::GET, GET_PERSON_PATH, None, &[("personId", person_id)])
            .await
    }

    /// Issue an access QR code.
    pub async fn generate_qr_code(&self, request: &QrCodeRequest) -> Result<QrCodeData, ClientError> {
        let data = self.execute(Method::POST, QR_CODE_PATH, Some(request), &[]).await?;
        serde_json::from_value(data)
            .map_err(|e| ClientError::Downstream(DownstreamError::Decode(e.to_string())))
    }
}

impl std::fmt::Debug for HikCentralClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HikCentralClient")
            .field("base_url", &self.base_url)
            .field("org_index_code", &self.org_index_code)
            .field("signer", &self.signer)
            .finish()
    }
}

/// `scheme://host[:port]` of `raw`; any path, query or fragment is dropped.
pub fn origin_of(raw: &str) -> Result<String, ClientError> {
    let url = Url::parse(raw).map_err(|e| ClientError::Config(format!("base_url '{raw}': {e}")))?;
    let origin = url.origin();
    if !origin.is_tuple() {
        return Err(ClientError::Config(format!("base_url '{raw}' has no host")));
    }
    Ok(origin.ascii_serialization())
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_strips_path() {
        assert_eq!(
            origin_of("https://192.168.1.101/artemis").unwrap(),
            "https://192.168.1.101"
        );
        assert_eq!(
            origin_of("http://hik.local:8443/artemis/api?x=1").unwrap(),
            "http://hik.local:8443"
        );
        assert_eq!(origin_of("https://hik.local:443/").unwrap(), "https://hik.local");
    }

    #[test]
    fn test_origin_rejects_garbage() {
        assert!(matches!(origin_of("not a url"), Err(ClientError::Config(_))));
        assert!(matches!(origin_of("mailto:ops@example.com"), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short".into(), 10), "short");
        assert_eq!(truncate("ééé".into(), 3), "é");
    }

    #[test]
    fn test_new_normalizes_base_url() {
        let config = HikCentralConfig {
            base_url: "https://10.1.1.1/artemis".into(),
            app_key: "k".into(),
            app_secret: "s".into(),
            ..HikCentralConfig::default()
        };
        let signer = Arc::new(RequestSigner::from_config(&config));
        let client = HikCentralClient::new(&config, signer).unwrap();
        assert_eq!(client.base_url(), "https://10.1.1.1");
        assert_eq!(client.org_index_code(), "1");
    }
}
