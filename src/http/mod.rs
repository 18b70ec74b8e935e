//! HTTP API subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (request ID, trace span, timeout, body limit, metrics)
//!     → auth.rs (X-API-Key on /api/*)
//!     → handlers.rs (extract, call ResidentService)
//!     → response.rs (success envelope or error mapping)
//!     → Send to client
//! ```

pub mod auth;
pub mod handlers;
pub mod response;
pub mod server;

pub use server::{build_router, AppState, HttpServer};
