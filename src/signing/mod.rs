//! Outbound request signing for the HikCentral OpenAPI gateway.
//!
//! # Data Flow
//! ```text
//! (method, uri path, body)
//!     → canonical.rs (Content-MD5, string-to-sign)
//!     → signer.rs (HMAC-SHA256, header assembly)
//!     → SignedRequest (headers for exactly one outbound call)
//! ```
//!
//! # Design Decisions
//! - A signature is recomputed for every call and never cached
//! - The signer holds only immutable credentials and is shared via Arc
//! - Only the URI path is signed; query strings are not part of the string-to-sign
//! - The `Date` slot of the string-to-sign is always empty; freshness lives in
//!   `X-Ca-Timestamp` and `X-Ca-Nonce`

pub mod canonical;
pub mod signer;

pub use canonical::{content_md5, string_to_sign, CanonicalRequest};
pub use signer::{RequestSigner, SignedRequest, SigningError};
