#![allow(dead_code)]

pub mod detectors;
pub mod fixtures;

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use warden_core::models::{Actor, ProfileRegistry};
use warden_core::WardenConfig;
use warden_db::{MemoryCleanupStateStore, MemoryCounterStore, MemoryUploadRecordStore, UploadRecordStore};
use warden_infra::CapturingEventSink;
use warden_processing::{FileInspector, InferSniffer};
use warden_services::scan::{CircuitBreaker, Detector, RetryPolicy, ScanCoordinator};
use warden_services::{
    CleanupScheduler, StorageCleanupDispatcher, StorageRenditionProbe, UploadRequest,
    UploadService, UploadServiceDeps,
};
use warden_storage::{create_disks, QuarantineStore, Storage, StorageDisks};

pub const TENANT: &str = "acme";

/// Fully wired pipeline on temporary directories and in-memory stores.
pub struct TestPipeline {
    pub dir: TempDir,
    pub service: UploadService,
    pub disks: StorageDisks,
    pub quarantine: Arc<QuarantineStore>,
    pub records: Arc<dyn UploadRecordStore>,
    pub cleanup_states: Arc<MemoryCleanupStateStore>,
    pub scheduler: Arc<CleanupScheduler>,
    pub scanner: Arc<ScanCoordinator>,
    pub events: Arc<CapturingEventSink>,
}

pub struct PipelineOptions {
    pub detectors: Vec<Arc<dyn Detector>>,
    pub records: Arc<dyn UploadRecordStore>,
    pub scanning_disabled: bool,
    pub circuit_threshold: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            detectors: vec![detectors::Scripted::clean("clamd")],
            records: Arc::new(MemoryUploadRecordStore::new()),
            scanning_disabled: false,
            circuit_threshold: 3,
        }
    }
}

pub async fn setup_test_pipeline() -> TestPipeline {
    setup_test_pipeline_with(PipelineOptions::default()).await
}

pub async fn setup_test_pipeline_with(options: PipelineOptions) -> TestPipeline {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = WardenConfig::default();

    let disks = create_disks(&dir.path().join("storage"), ["local", "secrets"])
        .await
        .expect("disks");
    let quarantine = Arc::new(
        QuarantineStore::new(dir.path().join("quarantine"))
            .await
            .expect("quarantine"),
    );
    let events = Arc::new(CapturingEventSink::new());
    let inspector = FileInspector::new(&config.validation, Arc::new(InferSniffer), events.clone());

    let breaker = Arc::new(CircuitBreaker::new(
        Arc::new(MemoryCounterStore::new()),
        options.circuit_threshold,
        Duration::from_secs(60),
    ));
    let scanner = Arc::new(ScanCoordinator::new(
        options.detectors,
        breaker,
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter_pct: 0,
        },
        Duration::from_secs(2),
        events.clone(),
    ));

    let cleanup_states = Arc::new(MemoryCleanupStateStore::new());
    let scheduler = Arc::new(CleanupScheduler::new(
        cleanup_states.clone(),
        Arc::new(StorageRenditionProbe::new(disks.clone())),
        Arc::new(StorageCleanupDispatcher::new(disks.clone())),
        events.clone(),
        Duration::from_secs(2),
    ));

    let service = UploadService::new(UploadServiceDeps {
        profiles: ProfileRegistry::builtin(),
        quarantine: quarantine.clone(),
        inspector,
        scanner: scanner.clone(),
        disks: disks.clone(),
        records: options.records.clone(),
        cleanup: scheduler.clone(),
        events: events.clone(),
        scanning_disabled: options.scanning_disabled,
        hard_max_bytes: config.validation.hard_max_bytes,
    });

    TestPipeline {
        dir,
        service,
        disks,
        quarantine,
        records: options.records,
        cleanup_states,
        scheduler,
        scanner,
        events,
    }
}

impl TestPipeline {
    pub fn actor(&self) -> Actor {
        Actor::new("user-1", Some(TENANT.to_string()))
    }

    pub fn request<'a>(
        &self,
        profile_id: &str,
        name: &str,
        bytes: &'a [u8],
        owner_id: Option<&str>,
    ) -> UploadRequest<&'a [u8]> {
        UploadRequest {
            profile_id: profile_id.to_string(),
            actor: self.actor(),
            reader: bytes,
            declared_name: name.to_string(),
            client_mime: None,
            owner_id: owner_id.map(str::to_string),
            correlation_id: None,
            expected_len: Some(bytes.len() as u64),
        }
    }

    pub async fn storage(&self, disk: &str) -> Arc<dyn Storage> {
        self.disks.get(disk).expect("disk")
    }

    /// Number of files currently staged in quarantine.
    pub fn quarantined_files(&self) -> usize {
        std::fs::read_dir(self.quarantine.root())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}
