//! Storage-backed collaborators of the cleanup scheduler.

use async_trait::async_trait;
use warden_core::models::{ArtifactRef, CleanupPayload};
use warden_storage::{PathLayout, StorageDisks};

/// Answers which expected renditions of a stored artifact are still missing.
#[async_trait]
pub trait RenditionProbe: Send + Sync {
    /// Names from `expected` with no stored rendition next to `path` on `disk`.
    async fn missing(&self, disk: &str, path: &str, expected: &[String]) -> Vec<String>;
}

/// Outcome of one deletion dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub deleted: usize,
    pub failed: usize,
}

/// Deletes the artifacts of a cleanup payload.
#[async_trait]
pub trait CleanupDispatcher: Send + Sync {
    async fn dispatch(&self, payload: &CleanupPayload) -> DispatchReport;
}

/// Checks rendition keys generated by [`PathLayout`] against storage.
pub struct StorageRenditionProbe {
    disks: StorageDisks,
}

impl StorageRenditionProbe {
    pub fn new(disks: StorageDisks) -> Self {
        Self { disks }
    }
}

#[async_trait]
impl RenditionProbe for StorageRenditionProbe {
    async fn missing(&self, disk: &str, path: &str, expected: &[String]) -> Vec<String> {
        if expected.is_empty() {
            return Vec::new();
        }
        let storage = match self.disks.get(disk) {
            Ok(storage) => storage,
            Err(e) => {
                tracing::warn!(disk = %disk, error = %e, "Rendition probe: unknown disk");
                return expected.to_vec();
            }
        };

        let mut missing = Vec::new();
        for rendition in expected {
            let key = match PathLayout::rendition_key(path, rendition) {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!(rendition = %rendition, error = %e, "Rendition probe: invalid key");
                    missing.push(rendition.clone());
                    continue;
                }
            };
            match storage.exists(&key).await {
                Ok(true) => {}
                Ok(false) => missing.push(rendition.clone()),
                Err(e) => {
                    tracing::warn!(rendition = %rendition, error = %e, "Rendition probe failed");
                    missing.push(rendition.clone());
                }
            }
        }
        missing
    }
}

/// Deletes base artifacts and their renditions, skipping preserved ids.
///
/// Individual failures are logged and counted; the remaining artifacts are still deleted.
pub struct StorageCleanupDispatcher {
    disks: StorageDisks,
}

impl StorageCleanupDispatcher {
    pub fn new(disks: StorageDisks) -> Self {
        Self { disks }
    }

    async fn delete_artifact(&self, artifact: &ArtifactRef, report: &mut DispatchReport) {
        let storage = match self.disks.get(&artifact.disk) {
            Ok(storage) => storage,
            Err(e) => {
                tracing::error!(artifact_id = %artifact.id, error = %e, "Cleanup: unknown disk");
                report.failed += 1;
                return;
            }
        };

        let mut keys = Vec::with_capacity(artifact.renditions.len() + 1);
        for rendition in &artifact.renditions {
            match PathLayout::rendition_key(&artifact.path, rendition) {
                Ok(key) => keys.push(key),
                Err(e) => {
                    tracing::error!(artifact_id = %artifact.id, error = %e, "Cleanup: invalid rendition key");
                    report.failed += 1;
                }
            }
        }
        keys.push(artifact.path.clone());

        for key in keys {
            match storage.delete(&key).await {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    tracing::error!(artifact_id = %artifact.id, error = %e, "Failed to delete artifact");
                    report.failed += 1;
                }
            }
        }
    }
}

#[async_trait]
impl CleanupDispatcher for StorageCleanupDispatcher {
    async fn dispatch(&self, payload: &CleanupPayload) -> DispatchReport {
        let mut report = DispatchReport::default();
        for artifact in payload.deletable() {
            self.delete_artifact(artifact, &mut report).await;
        }
        tracing::info!(
            deleted = report.deleted,
            failed = report.failed,
            preserved = payload.preserve_ids.len(),
            "Cleanup payload dispatched"
        );
        report
    }
}
