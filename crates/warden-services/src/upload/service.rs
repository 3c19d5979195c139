use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::Instrument;
use uuid::Uuid;
use warden_core::constants::SHARED_OWNER_SEGMENT;
use warden_core::models::{
    Actor, ArtifactRef, CleanupSubject, ProfileRegistry, ScanMode, ScanVerdict, UploadProfile,
    UploadRecord, UploadStatus,
};
use warden_core::{hash_for_log, EventSink, LogLevel, RejectReason, SecurityEvent, UploadError};
use warden_db::UploadRecordStore;
use warden_processing::{FileInspector, InspectionRequest};
use warden_storage::{PathLayout, QuarantineStore, StorageDisks};

use crate::cleanup::{CleanupAction, CleanupScheduler};
use crate::scan::ScanCoordinator;

const CHECKSUM_CHUNK: usize = 64 * 1024;

/// One incoming file and everything the caller claims about it.
pub struct UploadRequest<R> {
    pub profile_id: String,
    pub actor: Actor,
    pub reader: R,
    pub declared_name: String,
    pub client_mime: Option<String>,
    pub owner_id: Option<String>,
    /// Generated when absent.
    pub correlation_id: Option<String>,
    /// Content length announced by the client, checked against the staged copy.
    pub expected_len: Option<u64>,
}

/// Collaborators of [`UploadService`].
pub struct UploadServiceDeps {
    pub profiles: ProfileRegistry,
    pub quarantine: Arc<QuarantineStore>,
    pub inspector: FileInspector,
    pub scanner: Arc<ScanCoordinator>,
    pub disks: StorageDisks,
    pub records: Arc<dyn UploadRecordStore>,
    pub cleanup: Arc<CleanupScheduler>,
    pub events: Arc<dyn EventSink>,
    /// Global kill switch; only ever turns scanning off.
    pub scanning_disabled: bool,
    pub hard_max_bytes: u64,
}

/// Runs an upload through quarantine, validation and scanning before it is stored.
pub struct UploadService {
    profiles: ProfileRegistry,
    quarantine: Arc<QuarantineStore>,
    inspector: FileInspector,
    scanner: Arc<ScanCoordinator>,
    disks: StorageDisks,
    records: Arc<dyn UploadRecordStore>,
    cleanup: Arc<CleanupScheduler>,
    events: Arc<dyn EventSink>,
    scanning_disabled: bool,
    hard_max_bytes: u64,
}

impl UploadService {
    pub fn new(deps: UploadServiceDeps) -> Self {
        if deps.scanning_disabled {
            tracing::warn!("Malware scanning is globally disabled");
        }
        Self {
            profiles: deps.profiles,
            quarantine: deps.quarantine,
            inspector: deps.inspector,
            scanner: deps.scanner,
            disks: deps.disks,
            records: deps.records,
            cleanup: deps.cleanup,
            events: deps.events,
            scanning_disabled: deps.scanning_disabled,
            hard_max_bytes: deps.hard_max_bytes,
        }
    }

    pub fn profiles(&self) -> &ProfileRegistry {
        &self.profiles
    }

    pub fn cleanup(&self) -> &Arc<CleanupScheduler> {
        &self.cleanup
    }

    /// Stage, inspect, scan and store one file. Nothing is stored unless every stage passes,
    /// and the quarantined copy is removed on every path.
    pub async fn upload<R>(&self, request: UploadRequest<R>) -> Result<UploadRecord, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let tenant_id = request.actor.require_tenant_id()?.to_string();
        let profile = self
            .profiles
            .get(&request.profile_id)
            .ok_or_else(|| UploadError::ProfileNotFound(request.profile_id.clone()))?;
        let owner_id = request
            .owner_id
            .as_deref()
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string);
        if profile.owner_required && owner_id.is_none() {
            return Err(UploadError::OwnerRequired(profile.id.clone()));
        }
        let correlation_id = request
            .correlation_id
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let span = tracing::info_span!(
            "upload",
            correlation_id = %correlation_id,
            profile = %profile.id,
            tenant_id = %tenant_id,
            name_hash = %hash_for_log(&request.declared_name),
        );
        let result = self
            .run_pipeline(request, &profile, &tenant_id, owner_id, &correlation_id)
            .instrument(span)
            .await;
        if let Err(e) = &result {
            self.log_failure(e, &profile, &correlation_id);
        }
        result
    }

    async fn run_pipeline<R>(
        &self,
        request: UploadRequest<R>,
        profile: &Arc<UploadProfile>,
        tenant_id: &str,
        owner_id: Option<String>,
        correlation_id: &str,
    ) -> Result<UploadRecord, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let now = Utc::now();
        let tenant_dir = PathLayout::tenant_dir(
            tenant_id,
            &profile.entity_kind,
            owner_id.as_deref(),
            &profile.path_category,
            now,
        )
        .map_err(RejectReason::from)?;

        let max_len = profile.max_bytes.min(self.hard_max_bytes);
        let token = self
            .quarantine
            .stage(
                request.reader,
                &request.declared_name,
                correlation_id,
                profile.category.as_str(),
                request.expected_len,
                max_len,
            )
            .await?;
        let guard = self.quarantine.guard(token);

        let inspected = self
            .inspector
            .inspect(InspectionRequest {
                path: guard.path().to_path_buf(),
                profile: profile.clone(),
                declared_name: request.declared_name.clone(),
                client_mime: request.client_mime.clone(),
                correlation_id: correlation_id.to_string(),
            })
            .await?;

        if profile.effective_scan_mode(self.scanning_disabled) == ScanMode::Required {
            let report = self.scanner.scan(guard.path(), correlation_id).await;
            match report.verdict {
                ScanVerdict::Clean => {}
                ScanVerdict::Infected(detector) => return Err(UploadError::Infected { detector }),
                ScanVerdict::Unavailable(reason) => return Err(UploadError::ScanUnavailable(reason)),
                ScanVerdict::ValidationFailed(reason) => {
                    return Err(RejectReason::ScanTargetInvalid(reason).into())
                }
            }
        } else {
            tracing::debug!(correlation_id = %correlation_id, "Scan skipped for profile");
        }

        let checksum = checksum_file(guard.path()).await?;

        let artifact_id = Uuid::new_v4();
        let tenant_path = tenant_dir
            .artifact(artifact_id, &inspected.extension)
            .map_err(RejectReason::from)?;
        let key = tenant_path.key();

        let storage = self.disks.get(&profile.disk)?;
        let stored = storage.put_file(&key, guard.path()).await?;

        let record = UploadRecord {
            id: artifact_id,
            tenant_id: tenant_id.to_string(),
            profile_id: profile.id.clone(),
            disk: profile.disk.clone(),
            path: key.clone(),
            mime: inspected.mime.clone(),
            size: stored,
            checksum: Some(checksum),
            status: UploadStatus::Stored,
            correlation_id: correlation_id.to_string(),
            owner_id: owner_id.clone(),
            created_at: now,
        };

        if let Err(e) = self.records.insert(&record).await {
            if let Err(delete_err) = storage.delete(&key).await {
                tracing::error!(
                    correlation_id = %correlation_id,
                    error = %delete_err,
                    "Failed to roll back stored artifact"
                );
            }
            return Err(UploadError::PersistenceFailed(e.to_string()));
        }

        if let Err(e) = guard.release().await {
            tracing::warn!(correlation_id = %correlation_id, error = %e, "Failed to release quarantine file");
        }

        if !profile.expected_renditions.is_empty() {
            let subject = subject_for(&record, profile);
            if let Err(e) = self.cleanup.flag(&subject, &profile.expected_renditions).await {
                tracing::error!(
                    correlation_id = %correlation_id,
                    artifact_id = %record.id,
                    error = %e,
                    "Failed to flag artifact for renditions"
                );
            }
        }

        tracing::info!(
            correlation_id = %correlation_id,
            artifact_id = %record.id,
            profile = %profile.id,
            mime = %record.mime,
            size_bytes = record.size,
            "Upload stored"
        );
        self.events.emit(
            SecurityEvent::new("upload.stored", LogLevel::Info, correlation_id)
                .with("profile", profile.id.as_str())
                .with("artifact_id", record.id.to_string())
                .with("size", record.size),
        );
        Ok(record)
    }

    /// Supersede `previous_id` with `replacement`. The previous artifact is deleted once
    /// the replacement's renditions exist.
    pub async fn replace(
        &self,
        actor: &Actor,
        previous_id: Uuid,
        replacement: &UploadRecord,
    ) -> Result<CleanupAction, UploadError> {
        let tenant_id = actor.require_tenant_id()?;
        if replacement.tenant_id != tenant_id {
            return Err(UploadError::RecordNotFound(replacement.id));
        }
        let previous = self
            .records
            .get(tenant_id, previous_id)
            .await?
            .ok_or(UploadError::RecordNotFound(previous_id))?;

        let replacement_profile = self.profile_of(replacement)?;
        let previous_profile = self.profile_of(&previous)?;
        let subject = subject_for(replacement, &replacement_profile);
        let action = self
            .cleanup
            .schedule_cleanup(
                &subject,
                vec![artifact_ref(&previous, &previous_profile)],
                vec![replacement.id],
                &replacement_profile.expected_renditions,
            )
            .await?;
        self.records
            .update_status(previous.id, UploadStatus::Superseded)
            .await?;

        tracing::info!(
            previous_id = %previous.id,
            replacement_id = %replacement.id,
            action = ?action,
            "Upload replaced"
        );
        Ok(action)
    }

    /// Delete an upload, waiting for its own renditions if they are still being produced.
    pub async fn delete(&self, actor: &Actor, id: Uuid) -> Result<CleanupAction, UploadError> {
        let tenant_id = actor.require_tenant_id()?;
        let record = self
            .records
            .get(tenant_id, id)
            .await?
            .ok_or(UploadError::RecordNotFound(id))?;
        let profile = self.profile_of(&record)?;

        let action = self
            .cleanup
            .schedule_cleanup(
                &subject_for(&record, &profile),
                vec![artifact_ref(&record, &profile)],
                Vec::new(),
                &profile.expected_renditions,
            )
            .await?;
        self.records
            .update_status(record.id, UploadStatus::Deleted)
            .await?;

        tracing::info!(artifact_id = %record.id, action = ?action, "Upload deleted");
        Ok(action)
    }

    fn profile_of(&self, record: &UploadRecord) -> Result<Arc<UploadProfile>, UploadError> {
        self.profiles
            .get(&record.profile_id)
            .ok_or_else(|| UploadError::ProfileNotFound(record.profile_id.clone()))
    }

    fn log_failure(&self, error: &UploadError, profile: &UploadProfile, correlation_id: &str) {
        use warden_core::ErrorMetadata;
        match error.log_level() {
            LogLevel::Error => tracing::error!(
                correlation_id = %correlation_id,
                profile = %profile.id,
                error_code = error.error_code(),
                error = %error,
                "Upload failed"
            ),
            LogLevel::Warn => tracing::warn!(
                correlation_id = %correlation_id,
                profile = %profile.id,
                error_code = error.error_code(),
                error = %error,
                "Upload blocked"
            ),
            LogLevel::Info | LogLevel::Debug => tracing::debug!(
                correlation_id = %correlation_id,
                profile = %profile.id,
                error_code = error.error_code(),
                error = %error,
                "Upload rejected"
            ),
        }
    }
}

fn artifact_ref(record: &UploadRecord, profile: &UploadProfile) -> ArtifactRef {
    ArtifactRef {
        id: record.id,
        disk: record.disk.clone(),
        path: record.path.clone(),
        renditions: profile.expected_renditions.clone(),
    }
}

fn subject_for(record: &UploadRecord, profile: &UploadProfile) -> CleanupSubject {
    CleanupSubject {
        artifact: artifact_ref(record, profile),
        collection: profile.id.clone(),
        owner_type: profile.entity_kind.clone(),
        owner_id: record
            .owner_id
            .clone()
            .unwrap_or_else(|| SHARED_OWNER_SEGMENT.to_string()),
    }
}

/// Hex SHA-256 of a file, read in chunks.
async fn checksum_file(path: &Path) -> Result<String, UploadError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHECKSUM_CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
