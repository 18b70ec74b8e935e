//! Lyve ⇄ HikCentral identity bridge library.

pub mod config;
pub mod hikcentral;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod residents;
pub mod resilience;
pub mod signing;

pub use config::schema::BridgeConfig;
pub use http::HttpServer;
pub use lifecycle::{Application, Shutdown};
