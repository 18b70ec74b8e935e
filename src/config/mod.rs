//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML), optional
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (LYVE_* / HIKCENTRAL_* environment overrides)
//!     → validation.rs (semantic checks)
//!     → BridgeConfig (validated, immutable)
//!     → sections handed to the subsystems that own them
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Secrets are expected from the environment, not the file
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_from_env, ConfigError};
pub use schema::{
    AuthConfig, BridgeConfig, CircuitBreakerConfig, HikCentralConfig, ObservabilityConfig,
    ResidentConfig, ServerConfig,
};
