//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use crate::config::schema::BridgeConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Env { var: &'static str, value: String },
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Env { var, value } => {
                write!(f, "Environment error: {} has invalid value '{}'", var, value)
            }
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load, override from the process environment, and validate a TOML file.
pub fn load_config(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    load_config_str(&content, |var| std::env::var(var).ok())
}

/// Build a config from defaults and the process environment alone.
pub fn load_from_env() -> Result<BridgeConfig, ConfigError> {
    load_config_str("", |var| std::env::var(var).ok())
}

/// Parse TOML, apply overrides from `lookup`, and validate.
pub fn load_config_str<F>(content: &str, lookup: F) -> Result<BridgeConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: BridgeConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    apply_env_overrides(&mut config, lookup)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay secrets and deployment-specific values from the environment.
pub fn apply_env_overrides<F>(config: &mut BridgeConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let strings: [(&str, &mut String); 8] = [
        ("LYVE_BIND_ADDRESS", &mut config.server.bind_address),
        ("LYVE_API_KEY", &mut config.auth.api_key),
        ("HIKCENTRAL_BASE_URL", &mut config.hikcentral.base_url),
        ("HIKCENTRAL_APP_KEY", &mut config.hikcentral.app_key),
        ("HIKCENTRAL_APP_SECRET", &mut config.hikcentral.app_secret),
        ("HIKCENTRAL_USER_ID", &mut config.hikcentral.user_id),
        ("HIKCENTRAL_ORG_INDEX_CODE", &mut config.hikcentral.org_index_code),
        ("LYVE_LOG_LEVEL", &mut config.observability.log_level),
    ];
    for (var, field) in strings {
        if let Some(value) = lookup(var) {
            *field = value;
        }
    }

    if let Some(value) = lookup("LYVE_REQUIRE_API_KEY") {
        config.auth.require_api_key = parse_bool("LYVE_REQUIRE_API_KEY", value)?;
    }
    if let Some(value) = lookup("HIKCENTRAL_VERIFY_SSL") {
        config.hikcentral.verify_ssl = parse_bool("HIKCENTRAL_VERIFY_SSL", value)?;
    }
    if let Some(value) = lookup("HIKCENTRAL_TIMEOUT_SECS") {
        config.hikcentral.timeout_secs = value.parse().map_err(|_| ConfigError::Env {
            var: "HIKCENTRAL_TIMEOUT_SECS",
            value,
        })?;
    }
    if let Some(value) = lookup("REDIS_URL") {
        config.circuit_breaker.redis_url = Some(value).filter(|v| !v.is_empty());
    }
    if let Some(value) = lookup("LYVE_SNAPSHOT_PATH") {
        config.residents.snapshot_path = Some(value).filter(|v| !v.is_empty());
    }

    Ok(())
}

fn parse_bool(var: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    const FILE: &str = r#"
        [hikcentral]
        base_url = "https://10.0.0.5/artemis"
        app_key = "27108141"
        app_secret = "from-file"

        [auth]
        api_key = "demo-key"

        [circuit_breaker]
        failure_threshold = 3
    "#;

    #[test]
    fn test_load_from_str() {
        let config = load_config_str(FILE, env(&[])).unwrap();
        assert_eq!(config.hikcentral.app_secret, "from-file");
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.recovery_timeout_secs, 60);
    }

    #[test]
    fn test_env_overrides_file() {
        let config = load_config_str(
            FILE,
            env(&[
                ("HIKCENTRAL_APP_SECRET", "from-env"),
                ("HIKCENTRAL_VERIFY_SSL", "true"),
                ("LYVE_REQUIRE_API_KEY", "0"),
                ("REDIS_URL", "redis://cache:6379/0"),
            ]),
        )
        .unwrap();
        assert_eq!(config.hikcentral.app_secret, "from-env");
        assert!(config.hikcentral.verify_ssl);
        assert!(!config.auth.require_api_key);
        assert_eq!(
            config.circuit_breaker.redis_url.as_deref(),
            Some("redis://cache:6379/0")
        );
    }

    #[test]
    fn test_invalid_env_value() {
        let err = load_config_str(FILE, env(&[("HIKCENTRAL_TIMEOUT_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "HIKCENTRAL_TIMEOUT_SECS", .. }));
    }

    #[test]
    fn test_env_only_config() {
        let config = load_config_str(
            "",
            env(&[
                ("HIKCENTRAL_APP_KEY", "k"),
                ("HIKCENTRAL_APP_SECRET", "s"),
                ("LYVE_API_KEY", "a"),
            ]),
        )
        .unwrap();
        assert_eq!(config.hikcentral.app_key, "k");
    }

    #[test]
    fn test_validation_failure_reported() {
        let err = load_config_str("", env(&[])).unwrap_err();
        match err {
            ConfigError::Validation(errors) => assert!(errors.len() >= 2),
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn test_parse_error() {
        let err = load_config_str("[hikcentral\n", env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
