//! HMAC-SHA256 request signer.
//!
//! # Responsibilities
//! - Generate a fresh nonce and millisecond timestamp per call
//! - Compute Content-MD5 and the HMAC-SHA256 signature
//! - Assemble the header set the gateway requires

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose, Engine};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::config::HikCentralConfig;
use crate::signing::canonical::{self, CanonicalRequest, ACCEPT, CONTENT_TYPE, SIGNATURE_HEADERS};

type HmacSha256 = Hmac<Sha256>;

/// Methods the gateway accepts signed calls for.
const SIGNABLE_METHODS: [Method; 4] = [Method::GET, Method::POST, Method::PUT, Method::DELETE];

/// Errors raised while signing a request. None of them are retryable.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("request body is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("HTTP method {0} cannot be signed")]
    UnsupportedMethod(String),

    #[error("HMAC key rejected")]
    InvalidKey,

    #[error("header {name} cannot carry its value: {reason}")]
    InvalidHeader { name: &'static str, reason: String },
}

/// Signs outbound calls with the credentials of one HikCentral partner app.
#[derive(Clone)]
pub struct RequestSigner {
    app_key: String,
    app_secret: String,
    user_id: String,
}

impl RequestSigner {
    /// Create a signer from raw credentials.
    pub fn new(
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            app_key: app_key.into(),
            app_secret: app_secret.into(),
            user_id: user_id.into(),
        }
    }

    /// Create a signer from the `[hikcentral]` configuration section.
    pub fn from_config(config: &HikCentralConfig) -> Self {
        Self::new(&config.app_key, &config.app_secret, &config.user_id)
    }

    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Sign a call with a fresh nonce and the current time.
    pub fn build_headers(
        &self,
        method: &Method,
        uri_path: &str,
        body: &[u8],
    ) -> Result<SignedRequest, SigningError> {
        let nonce = Uuid::new_v4().to_string();
        self.build_headers_at(method, uri_path, body, &nonce, now_millis())
    }

    /// Sign a call with a pinned nonce and timestamp.
    pub fn build_headers_at(
        &self,
        method: &Method,
        uri_path: &str,
        body: &[u8],
        nonce: &str,
        timestamp_ms: u64,
    ) -> Result<SignedRequest, SigningError> {
        if !SIGNABLE_METHODS.contains(method) {
            return Err(SigningError::UnsupportedMethod(method.to_string()));
        }
        let body = std::str::from_utf8(body)?;
        let content_md5 = canonical::content_md5(body);
        let timestamp = timestamp_ms.to_string();

        let to_sign = canonical::string_to_sign(&CanonicalRequest {
            method: method.as_str(),
            content_md5: content_md5.as_deref(),
            app_key: &self.app_key,
            nonce,
            timestamp: &timestamp,
            uri_path,
        });
        let signature = self.sign(&to_sign)?;

        Ok(SignedRequest {
            method: method.as_str().to_string(),
            uri_path: uri_path.to_string(),
            body: body.to_string(),
            nonce: nonce.to_string(),
            timestamp_ms,
            content_md5,
            signature,
            app_key: self.app_key.clone(),
            user_id: self.user_id.clone(),
        })
    }

    /// base64(HMAC-SHA256(secret, string_to_sign)).
    pub fn sign(&self, string_to_sign: &str) -> Result<String, SigningError> {
        let mut mac = HmacSha256::new_from_slice(self.app_secret.as_bytes())
            .map_err(|_| SigningError::InvalidKey)?;
        mac.update(string_to_sign.as_bytes());
        Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSigner")
            .field("app_key", &self.app_key)
            .field("app_secret", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// One signed outbound call. Valid for a single request only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub method: String,
    pub uri_path: String,
    pub body: String,
    pub nonce: String,
    pub timestamp_ms: u64,
    pub content_md5: Option<String>,
    pub signature: String,
    app_key: String,
    user_id: String,
}

impl SignedRequest {
    /// Headers in the order they are documented by the gateway.
    pub fn header_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(9);
        pairs.push(("Accept", ACCEPT.to_string()));
        pairs.push(("Content-Type", CONTENT_TYPE.to_string()));
        if let Some(md5) = &self.content_md5 {
            pairs.push(("Content-MD5", md5.clone()));
        }
        pairs.push(("X-Ca-Key", self.app_key.clone()));
        pairs.push(("X-Ca-Nonce", self.nonce.clone()));
        pairs.push(("X-Ca-Timestamp", self.timestamp_ms.to_string()));
        pairs.push(("X-Ca-Signature-Headers", SIGNATURE_HEADERS.to_string()));
        pairs.push(("X-Ca-Signature", self.signature.clone()));
        pairs.push(("userId", self.user_id.clone()));
        pairs
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<String> {
        self.header_pairs()
            .into_iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Convert into a header map ready to attach to a reqwest builder.
    pub fn header_map(&self) -> Result<HeaderMap, SigningError> {
        let mut headers = HeaderMap::with_capacity(9);
        for (name, value) in self.header_pairs() {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| SigningError::InvalidHeader {
                    name,
                    reason: e.to_string(),
                })?;
            let header_value = HeaderValue::from_str(&value).map_err(|e| SigningError::InvalidHeader {
                name,
                reason: e.to_string(),
            })?;
            headers.insert(header_name, header_value);
        }
        Ok(headers)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_signer() -> RequestSigner {
        RequestSigner::new("27108141", "c3U7KikkPGo2Yka6GMZ5", "admin")
    }

    #[test]
    fn test_golden_vector() {
        let signed = test_signer()
            .build_headers_at(
                &Method::POST,
                "/api/resource/v1/person/single/add",
                b"",
                "42",
                1_700_000_000_000,
            )
            .unwrap();

        assert_eq!(signed.signature, "4EB21neOSRq0MCeqCX/wwTq3FMMCtbo4Lxx4A3waRKk=");
        assert_eq!(signed.content_md5, None);
    }

    #[test]
    fn test_golden_vector_with_body() {
        let body = br#"{"personId":"LYVE_1"}"#;
        let signed = test_signer()
            .build_headers_at(
                &Method::POST,
                "/artemis/api/resource/v1/person/single/delete",
                body,
                "42",
                1_700_000_000_000,
            )
            .unwrap();

        assert_eq!(signed.content_md5.as_deref(), Some("JsXNP0iN3JrTOTYrI02oTw=="));
        assert_eq!(signed.signature, "Vql587AuHhWayCBiglPY4SN1gmKzTT1cxdcUSOtngrQ=");
    }

    #[test]
    fn test_get_without_body_signs_same_shape() {
        let signed = test_signer()
            .build_headers_at(
                &Method::GET,
                "/artemis/api/resource/v1/person/single/info",
                b"",
                "42",
                1_700_000_000_000,
            )
            .unwrap();

        assert_eq!(signed.signature, "E/C+Bf3T06PvTMj/E1e3Ov23ChjMrRDi67d9+DqSqCw=");
        assert!(signed.header("Content-MD5").is_none());
    }

    #[test]
    fn test_pinned_inputs_are_deterministic() {
        let signer = test_signer();
        let a = signer
            .build_headers_at(&Method::PUT, "/p", b"{}", "n-1", 1)
            .unwrap();
        let b = signer
            .build_headers_at(&Method::PUT, "/p", b"{}", "n-1", 1)
            .unwrap();
        assert_eq!(a, b);

        let c = signer
            .build_headers_at(&Method::PUT, "/p", b"{}", "n-2", 1)
            .unwrap();
        assert_ne!(a.signature, c.signature);
    }

    #[test]
    fn test_fresh_signatures_differ() {
        let signer = test_signer();
        let a = signer.build_headers(&Method::POST, "/p", b"{}").unwrap();
        let b = signer.build_headers(&Method::POST, "/p", b"{}").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.signature, b.signature);
    }

    #[test]
    fn test_body_controls_content_md5() {
        let signer = test_signer();

        let empty = signer.build_headers(&Method::POST, "/p", b"").unwrap();
        assert!(empty.header_map().unwrap().get("content-md5").is_none());

        let with_body = signer.build_headers(&Method::POST, "/p", b"hello").unwrap();
        let headers = with_body.header_map().unwrap();
        assert_eq!(headers.get("content-md5").unwrap(), "XUFAKrxLKna5cZ2REBfFkg==");
    }

    #[test]
    fn test_header_set() {
        let signed = test_signer()
            .build_headers_at(&Method::DELETE, "/p", b"x", "abc", 123)
            .unwrap();
        let headers = signed.header_map().unwrap();

        assert_eq!(headers.get("accept").unwrap(), "application/json");
        assert_eq!(headers.get("content-type").unwrap(), "application/json;charset=UTF-8");
        assert_eq!(headers.get("x-ca-key").unwrap(), "27108141");
        assert_eq!(headers.get("x-ca-nonce").unwrap(), "abc");
        assert_eq!(headers.get("x-ca-timestamp").unwrap(), "123");
        assert_eq!(
            headers.get("x-ca-signature-headers").unwrap(),
            "x-ca-key,x-ca-nonce,x-ca-timestamp"
        );
        assert_eq!(headers.get("x-ca-signature").unwrap(), signed.signature.as_str());
        assert_eq!(headers.get("userid").unwrap(), "admin");
        assert_eq!(headers.len(), 9);
    }

    #[test]
    fn test_rejects_non_utf8_body() {
        let err = test_signer()
            .build_headers(&Method::POST, "/p", &[0xff, 0xfe, 0x00])
            .unwrap_err();
        assert!(matches!(err, SigningError::Encoding(_)));
    }

    #[test]
    fn test_rejects_unsupported_method() {
        let err = test_signer()
            .build_headers(&Method::PATCH, "/p", b"")
            .unwrap_err();
        assert!(matches!(err, SigningError::UnsupportedMethod(m) if m == "PATCH"));
    }

    #[test]
    fn test_control_characters_rejected_in_header_map() {
        let signer = RequestSigner::new("key\nwith-newline", "secret", "admin");
        let signed = signer.build_headers(&Method::GET, "/p", b"").unwrap();
        let err = signed.header_map().unwrap_err();
        assert!(matches!(err, SigningError::InvalidHeader { name: "X-Ca-Key", .. }));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", test_signer());
        assert!(!rendered.contains("c3U7KikkPGo2Yka6GMZ5"));
        assert!(rendered.contains("<redacted>"));
    }
}
