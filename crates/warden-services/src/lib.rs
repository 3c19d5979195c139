//! Warden Services Layer
//!
//! Orchestration on top of storage, processing and the stores: detectors and the scan
//! coordinator, the cleanup scheduler, the upload service and detector health.

pub mod cleanup;
pub mod health;
pub mod scan;
pub mod services;
pub mod upload;

pub use cleanup::{
    CleanupAction, CleanupScheduler, CleanupWorker, StorageCleanupDispatcher,
    StorageRenditionProbe, SweepReport,
};
pub use health::{DetectorStatus, HealthReport};
pub use scan::{
    build_detectors, BinaryAllowList, CircuitBreaker, Detector, RetryPolicy, ScanCoordinator,
    ScanReport,
};
pub use services::{ClamdDetector, CommandDetector};
pub use upload::{UploadRequest, UploadService, UploadServiceDeps};
