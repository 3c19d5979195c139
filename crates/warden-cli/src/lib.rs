//! Bootstrap of the upload pipeline from [`WardenConfig`].

use anyhow::Context;
use std::sync::Arc;
use warden_core::models::ProfileRegistry;
use warden_core::{EventSink, WardenConfig};
use warden_db::{create_stores, Stores};
use warden_infra::{DedupEventSink, TracingEventSink};
use warden_processing::{FileInspector, InferSniffer};
use warden_services::scan::build_detectors;
use warden_services::{
    CircuitBreaker, CleanupScheduler, RetryPolicy, ScanCoordinator, StorageCleanupDispatcher,
    StorageRenditionProbe, UploadService, UploadServiceDeps,
};
use warden_storage::{create_disks, QuarantineStore};

/// Repeated identical events inside this window are logged once.
const EVENT_DEDUP_WINDOW: std::time::Duration = std::time::Duration::from_secs(10);

/// Everything a command needs, built once per process.
pub struct Pipeline {
    pub config: WardenConfig,
    pub stores: Stores,
    pub quarantine: Arc<QuarantineStore>,
    pub scanner: Arc<ScanCoordinator>,
    pub scheduler: Arc<CleanupScheduler>,
    pub service: UploadService,
}

fn load_profiles(config: &WardenConfig) -> anyhow::Result<ProfileRegistry> {
    match &config.storage.profiles_path {
        Some(path) => ProfileRegistry::from_json_file(path),
        None => Ok(ProfileRegistry::builtin()),
    }
}

/// Wire stores, storage disks, detectors and services.
pub async fn initialize_pipeline(config: WardenConfig) -> anyhow::Result<Pipeline> {
    let profiles = load_profiles(&config)?;
    let stores = create_stores(config.base.database_url.as_deref()).await?;

    let mut disk_names: Vec<String> = profiles
        .ids()
        .iter()
        .filter_map(|id| profiles.get(id))
        .map(|p| p.disk.clone())
        .collect();
    disk_names.push(config.storage.disk.clone());
    disk_names.sort();
    disk_names.dedup();
    let disks = create_disks(&config.storage.root, disk_names.iter().map(String::as_str))
        .await
        .context("Failed to initialize storage disks")?;

    let quarantine = Arc::new(
        QuarantineStore::new(config.storage.quarantine_dir.clone())
            .await
            .context("Failed to initialize quarantine directory")?,
    );

    let events: Arc<dyn EventSink> = Arc::new(DedupEventSink::new(
        Arc::new(TracingEventSink),
        EVENT_DEDUP_WINDOW,
    ));

    let detectors = build_detectors(&config.scan);
    tracing::info!(
        detectors = ?config.scan.detectors,
        scanning_disabled = config.scan.scanning_disabled,
        "Scan detectors configured"
    );
    let breaker = Arc::new(CircuitBreaker::from_settings(
        stores.counters.clone(),
        &config.scan,
    ));
    let scanner = Arc::new(ScanCoordinator::new(
        detectors,
        breaker,
        RetryPolicy::from_settings(&config.scan),
        config.scan.detector_timeout,
        events.clone(),
    ));

    let scheduler = Arc::new(CleanupScheduler::from_settings(
        stores.cleanup_states.clone(),
        Arc::new(StorageRenditionProbe::new(disks.clone())),
        Arc::new(StorageCleanupDispatcher::new(disks.clone())),
        events.clone(),
        &config.cleanup,
    ));

    let service = UploadService::new(UploadServiceDeps {
        profiles,
        quarantine: quarantine.clone(),
        inspector: FileInspector::new(&config.validation, Arc::new(InferSniffer), events.clone()),
        scanner: scanner.clone(),
        disks,
        records: stores.uploads.clone(),
        cleanup: scheduler.clone(),
        events,
        scanning_disabled: config.scan.scanning_disabled,
        hard_max_bytes: config.validation.hard_max_bytes,
    });

    Ok(Pipeline {
        config,
        stores,
        quarantine,
        scanner,
        scheduler,
        service,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &std::path::Path) -> WardenConfig {
        let mut config = WardenConfig::default();
        config.storage.root = dir.join("storage");
        config.storage.quarantine_dir = dir.join("quarantine");
        config.scan.detectors = Vec::new();
        config
    }

    #[tokio::test]
    async fn test_initialize_pipeline_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = initialize_pipeline(config_in(dir.path())).await.unwrap();

        assert!(pipeline.service.profiles().get("avatar").is_some());
        assert!(pipeline.scanner.detectors().is_empty());
        assert!(dir.path().join("storage").join("secrets").is_dir());
        assert!(dir.path().join("quarantine").is_dir());
    }

    #[tokio::test]
    async fn test_profile_file_replaces_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let mut profiles: Vec<serde_json::Value> = warden_core::models::builtin_profiles()
            .into_iter()
            .map(|p| serde_json::to_value(p).unwrap())
            .collect();
        profiles.truncate(1);
        let path = dir.path().join("profiles.json");
        std::fs::write(&path, serde_json::to_vec(&profiles).unwrap()).unwrap();

        let mut config = config_in(dir.path());
        config.storage.profiles_path = Some(path);
        let pipeline = initialize_pipeline(config).await.unwrap();
        assert_eq!(pipeline.service.profiles().ids(), vec!["avatar".to_string()]);
    }
}
