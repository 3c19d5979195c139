//! Warden Infrastructure Library
//!
//! Shared infrastructure used by the Warden crates:
//! - Telemetry initialization
//! - Security event sinks (tracing-backed, dedup decorator)
//! - Client-facing error responses

#[cfg(feature = "observability-basic")]
pub mod telemetry;

pub mod error;
pub mod events;

#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, shutdown_telemetry};

pub use error::ErrorResponse;
pub use events::{CapturingEventSink, DedupEventSink, TracingEventSink};
