//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the bridge.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the bridge.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// HTTP API listener.
    pub server: ServerConfig,

    /// Downstream HikCentral appliance and partner credentials.
    pub hikcentral: HikCentralConfig,

    /// Circuit breaker guarding downstream calls.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Inbound API key check.
    pub auth: AuthConfig,

    /// Resident sync defaults and limits.
    pub residents: ResidentConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Deadline for a whole inbound request, downstream call included.
    pub request_timeout_secs: u64,

    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            request_timeout_secs: 45,
            // Five 2 MiB face images survive base64 inflation.
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

/// HikCentral OpenAPI gateway configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HikCentralConfig {
    /// Appliance URL. Any path is discarded; only scheme, host and port are kept.
    pub base_url: String,

    /// Partner app key (`X-Ca-Key`).
    pub app_key: String,

    /// Partner app secret used as the HMAC key.
    pub app_secret: String,

    /// Operator account sent as `userId`.
    pub user_id: String,

    /// Organization new persons are filed under.
    pub org_index_code: String,

    /// Verify the appliance TLS certificate. Appliances usually ship self-signed.
    pub verify_ssl: bool,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HikCentralConfig {
    fn default() -> Self {
        Self {
            base_url: "https://192.168.1.101".to_string(),
            app_key: String::new(),
            app_secret: String::new(),
            user_id: "admin".to_string(),
            org_index_code: "1".to_string(),
            verify_ssl: false,
            timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for HikCentralConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HikCentralConfig")
            .field("base_url", &self.base_url)
            .field("app_key", &self.app_key)
            .field("app_secret", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("org_index_code", &self.org_index_code)
            .field("verify_ssl", &self.verify_ssl)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u64,

    /// Seconds the circuit stays open before a trial call is allowed.
    pub recovery_timeout_secs: u64,

    /// Shared Redis holding breaker state across instances. Unset or
    /// unreachable means per-process in-memory state.
    pub redis_url: Option<String>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            redis_url: None,
        }
    }
}

/// Inbound authentication.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Reject `/api/*` calls without a matching `X-API-Key`.
    pub require_api_key: bool,

    /// Shared key expected in `X-API-Key`.
    pub api_key: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            require_api_key: true,
            api_key: String::new(),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("require_api_key", &self.require_api_key)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Resident sync defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResidentConfig {
    /// Access validity when the request carries no `toDate`.
    pub default_validity_days: i64,

    /// QR code lifetime when the request does not specify one.
    pub qr_validity_minutes: u32,

    /// Face images accepted per resident.
    pub max_face_images: usize,

    /// Decoded size limit per face image.
    pub max_face_image_bytes: usize,

    /// Requests accepted in one batch create.
    pub max_batch_size: usize,

    /// JSON snapshot of the registry, loaded at start and written at shutdown.
    pub snapshot_path: Option<String>,
}

impl Default for ResidentConfig {
    fn default() -> Self {
        Self {
            default_validity_days: 365,
            qr_validity_minutes: 60,
            max_face_images: 5,
            max_face_image_bytes: 2 * 1024 * 1024,
            max_batch_size: 100,
            snapshot_path: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
