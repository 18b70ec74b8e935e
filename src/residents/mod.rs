//! Resident synchronization between Lyve and HikCentral.
//!
//! # Data Flow
//! ```text
//! HTTP handler
//!     → service.rs (validate, build HikCentral payload)
//!     → CircuitBreaker::call(HikCentralClient op)
//!     → registry.rs (record mapping once HikCentral accepted)
//!     → audit event (target lyve_bridge::audit)
//! ```
//!
//! # Design Decisions
//! - The registry is an in-memory map with an optional JSON snapshot, not a database
//! - An active `(email, community)` pair maps to at most one resident
//! - Batch creates run one by one and report per entry; one failure never aborts the rest
//! - Sync pulls a HikCentral person into the registry, matched by person code

pub mod registry;
pub mod service;
pub mod types;

pub use registry::ResidentRegistry;
pub use service::{ResidentService, ServiceError};
pub use types::{
    BatchCreateRequest, BatchItemResult, BatchOutcome, CheckRequest, CreateResidentRequest,
    FaceCheck, FaceValidateRequest, QrCodeIssued, QrCodeOptions, ResidentDetails,
    ResidentRecord, SyncRequest, UpdateResidentRequest,
};
