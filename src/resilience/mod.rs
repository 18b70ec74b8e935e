//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to HikCentral:
//!     → circuit_breaker.rs (admit, reject fast, or admit a trial call)
//!     → operation runs
//!     → circuit_breaker.rs (record outcome in the shared store)
//! ```
//!
//! # Design Decisions
//! - Breaker state lives behind `StateStore` so instances can share it
//! - Redis when configured and reachable, otherwise an in-process map
//! - Time comes from an injectable `Clock`; tests drive recovery explicitly

pub mod circuit_breaker;
pub mod clock;
pub mod redis_store;
pub mod store;

pub use circuit_breaker::{CallError, CircuitBreaker, CircuitOpenError, CircuitSnapshot, CircuitState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use redis_store::RedisStore;
pub use store::{MemoryStore, StateStore, StoreError};
