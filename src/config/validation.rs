//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, thresholds ≥ 1, addresses parse)
//! - Require the credentials the signer cannot work without
//! - Reject credentials that cannot travel in an HTTP header
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BridgeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use url::Url;

use crate::config::schema::BridgeConfig;

/// One failed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Run every semantic check and collect the failures.
pub fn validate_config(config: &BridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("'{}' is not a socket address", config.server.bind_address),
        ));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new("server.request_timeout_secs", "must be > 0"));
    }
    if config.server.max_body_bytes == 0 {
        errors.push(ValidationError::new("server.max_body_bytes", "must be > 0"));
    }

    let hik = &config.hikcentral;
    match Url::parse(&hik.base_url) {
        Ok(url) if !matches!(url.scheme(), "http" | "https") => {
            errors.push(ValidationError::new(
                "hikcentral.base_url",
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }
        Ok(url) if url.host_str().is_none() => {
            errors.push(ValidationError::new("hikcentral.base_url", "missing host"));
        }
        Ok(_) => {}
        Err(e) => errors.push(ValidationError::new("hikcentral.base_url", e.to_string())),
    }
    if hik.app_key.trim().is_empty() {
        errors.push(ValidationError::new("hikcentral.app_key", "must not be empty"));
    }
    for (field, value) in [
        ("hikcentral.app_key", &hik.app_key),
        ("hikcentral.user_id", &hik.user_id),
    ] {
        if value.chars().any(char::is_control) {
            errors.push(ValidationError::new(field, "must not contain control characters"));
        }
    }
    if hik.app_secret.is_empty() {
        errors.push(ValidationError::new("hikcentral.app_secret", "must not be empty"));
    }
    if hik.timeout_secs == 0 {
        errors.push(ValidationError::new("hikcentral.timeout_secs", "must be > 0"));
    }

    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be >= 1"));
    }
    if config.circuit_breaker.recovery_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.recovery_timeout_secs",
            "must be > 0",
        ));
    }

    if config.auth.require_api_key && config.auth.api_key.is_empty() {
        errors.push(ValidationError::new(
            "auth.api_key",
            "required when auth.require_api_key is set",
        ));
    }

    let residents = &config.residents;
    if residents.default_validity_days <= 0 {
        errors.push(ValidationError::new("residents.default_validity_days", "must be > 0"));
    }
    if residents.qr_validity_minutes == 0 {
        errors.push(ValidationError::new("residents.qr_validity_minutes", "must be > 0"));
    }
    if residents.max_face_image_bytes == 0 {
        errors.push(ValidationError::new("residents.max_face_image_bytes", "must be > 0"));
    }
    if residents.max_batch_size == 0 {
        errors.push(ValidationError::new("residents.max_batch_size", "must be > 0"));
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.hikcentral.app_key = "27108141".into();
        config.hikcentral.app_secret = "secret".into();
        config.auth.api_key = "demo-key".into();
        config
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_defaults_require_credentials() {
        let errors = validate_config(&BridgeConfig::default()).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert!(fields.contains(&"hikcentral.app_key"));
        assert!(fields.contains(&"hikcentral.app_secret"));
        assert!(fields.contains(&"auth.api_key"));
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = valid_config();
        config.server.bind_address = "not-an-address".into();
        config.hikcentral.base_url = "ftp://appliance".into();
        config.circuit_breaker.failure_threshold = 0;
        config.circuit_breaker.recovery_timeout_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert_eq!(
            errors[1].to_string(),
            "hikcentral.base_url: unsupported scheme 'ftp'"
        );
    }

    #[test]
    fn test_header_credentials_reject_control_characters() {
        let mut config = valid_config();
        config.hikcentral.app_key = "27108141\n".into();
        config.hikcentral.user_id = "ad\rmin".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["hikcentral.app_key", "hikcentral.user_id"]);
        assert_eq!(errors[0].message, "must not contain control characters");
    }

    #[test]
    fn test_api_key_optional_when_auth_disabled() {
        let mut config = valid_config();
        config.auth.require_api_key = false;
        config.auth.api_key.clear();
        assert!(validate_config(&config).is_ok());
    }
}
