//! HikCentral downstream integration.
//!
//! # Data Flow
//! ```text
//! ResidentService
//!     → CircuitBreaker::call
//!     → client.rs (serialize body, sign via signing::RequestSigner)
//!     → reqwest → HikCentral OpenAPI gateway
//!     → client.rs (status + envelope → data or DownstreamError)
//! ```

pub mod client;
pub mod types;

pub use client::HikCentralClient;
pub use types::{
    ApiEnvelope, ClientError, DownstreamError, FaceData, PersonPayload, PersonUpdate, QrCodeData,
    QrCodeRequest,
};
