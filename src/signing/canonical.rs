//! String-to-sign construction.
//!
//! The gateway rebuilds the same newline-joined string on its side; a single
//! byte of difference (ordering, trailing newline, header casing) produces a
//! signature mismatch, so the layout here is fixed.

use base64::{engine::general_purpose, Engine};
use md5::{Digest, Md5};

/// `Accept` header value sent with every call.
pub const ACCEPT: &str = "application/json";

/// `Content-Type` header value sent with every call.
pub const CONTENT_TYPE: &str = "application/json;charset=UTF-8";

/// Value of `X-Ca-Signature-Headers`: the custom headers folded into the signature.
pub const SIGNATURE_HEADERS: &str = "x-ca-key,x-ca-nonce,x-ca-timestamp";

/// Inputs of one string-to-sign.
#[derive(Debug, Clone, Copy)]
pub struct CanonicalRequest<'a> {
    /// Uppercase HTTP method.
    pub method: &'a str,
    /// Base64 MD5 of the body, absent for an empty body.
    pub content_md5: Option<&'a str>,
    pub app_key: &'a str,
    pub nonce: &'a str,
    /// Milliseconds since the Unix epoch, as sent in `X-Ca-Timestamp`.
    pub timestamp: &'a str,
    /// Path component only (scheme, host and query stripped).
    pub uri_path: &'a str,
}

/// Base64 of the raw MD5 digest of `body`, or `None` when the body is empty.
pub fn content_md5(body: &str) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    let digest = Md5::digest(body.as_bytes());
    Some(general_purpose::STANDARD.encode(digest))
}

/// Build the newline-joined string the HMAC is computed over.
pub fn string_to_sign(request: &CanonicalRequest<'_>) -> String {
    let key_line = format!("x-ca-key:{}", request.app_key);
    let nonce_line = format!("x-ca-nonce:{}", request.nonce);
    let timestamp_line = format!("x-ca-timestamp:{}", request.timestamp);

    [
        request.method,
        ACCEPT,
        request.content_md5.unwrap_or(""),
        CONTENT_TYPE,
        // Date
        "",
        &key_line,
        &nonce_line,
        &timestamp_line,
        request.uri_path,
    ]
    .join("\n")
}
