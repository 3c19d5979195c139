//! Warden Core Library
//!
//! Domain models, error taxonomy, configuration and host hooks shared by every Warden crate.

pub mod config;
pub mod constants;
pub mod error;
pub mod hooks;
pub mod models;

// Re-export commonly used types
pub use config::{
    BaseConfig, CleanupSettings, LogFormat, ScanSettings, StorageSettings, ValidationSettings,
    WardenConfig,
};
pub use error::{ErrorMetadata, LogLevel, RejectReason, UploadError};
pub use hooks::{hash_for_log, EventSink, NoOpEventSink, SecurityEvent};
