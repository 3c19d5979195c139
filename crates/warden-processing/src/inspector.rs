//! Runs every content check on a quarantined file under one deadline.

use crate::document::{extension_for, ArchiveLimits, CsvSettings, DocumentGuard};
use crate::image::ImageGuard;
use crate::sniff::MimeSniffer;
use crate::validator::{SignatureValidator, ValidationContext};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use warden_core::models::{ProfileCategory, UploadProfile};
use warden_core::{
    hash_for_log, EventSink, LogLevel, RejectReason, SecurityEvent, UploadError, ValidationSettings,
};

/// A quarantined file to inspect, with everything the client claimed about it.
#[derive(Debug, Clone)]
pub struct InspectionRequest {
    pub path: PathBuf,
    pub profile: Arc<UploadProfile>,
    pub declared_name: String,
    pub client_mime: Option<String>,
    pub correlation_id: String,
}

/// A file that passed signature, document and image checks.
#[derive(Debug, Clone, PartialEq)]
pub struct InspectedFile {
    pub path: PathBuf,
    pub size: u64,
    pub mime: String,
    /// Extension the stored artifact will carry.
    pub extension: String,
    pub dimensions: Option<(u32, u32)>,
}

#[derive(Clone)]
pub struct FileInspector {
    validator: SignatureValidator,
    documents: DocumentGuard,
    images: ImageGuard,
    timeout: Duration,
    events: Arc<dyn EventSink>,
}

impl FileInspector {
    pub fn new(settings: &ValidationSettings, sniffer: Arc<dyn MimeSniffer>, events: Arc<dyn EventSink>) -> Self {
        let csv = CsvSettings {
            min_consistency: settings.csv_min_consistency,
            sample_lines: settings.csv_sample_lines,
        };
        Self {
            validator: SignatureValidator::new(settings, sniffer),
            documents: DocumentGuard::new(csv, ArchiveLimits::default()),
            images: ImageGuard::new(settings.max_image_pixels),
            timeout: settings.validate_timeout,
            events,
        }
    }

    pub fn with_archive_limits(mut self, limits: ArchiveLimits) -> Self {
        self.documents.archive = limits;
        self
    }

    /// Validate the quarantined file. Rejections are reported to the event sink.
    #[tracing::instrument(skip(self, request), fields(
        profile = %request.profile.id,
        correlation_id = %request.correlation_id
    ))]
    pub async fn inspect(&self, request: InspectionRequest) -> Result<InspectedFile, UploadError> {
        let start = std::time::Instant::now();
        let worker = self.clone();
        let job = request.clone();
        let task = tokio::task::spawn_blocking(move || worker.inspect_blocking(&job));

        let result = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                return Err(UploadError::Internal(format!(
                    "Validation task failed: {}",
                    join_error
                )))
            }
            Err(_) => Err(RejectReason::ValidationTimeout(self.timeout.as_millis() as u64)),
        };

        match result {
            Ok(inspected) => {
                tracing::debug!(
                    mime = %inspected.mime,
                    size = inspected.size,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "File passed inspection"
                );
                Ok(inspected)
            }
            Err(reason) => {
                self.events.emit(
                    SecurityEvent::new("upload.rejected", LogLevel::Warn, &request.correlation_id)
                        .with("reason", reason.code())
                        .with("profile", request.profile.id.as_str())
                        .with("name_hash", hash_for_log(&request.declared_name)),
                );
                Err(UploadError::Rejected(reason))
            }
        }
    }

    fn inspect_blocking(&self, request: &InspectionRequest) -> Result<InspectedFile, RejectReason> {
        let profile = request.profile.as_ref();
        let validated = self.validator.validate(
            &request.path,
            profile,
            ValidationContext {
                declared_name: &request.declared_name,
                client_mime: request.client_mime.as_deref(),
            },
        )?;

        if !validated.mismatches.is_empty() {
            self.events.emit(
                SecurityEvent::new("upload.mime_mismatch", LogLevel::Warn, &request.correlation_id)
                    .with("profile", profile.id.as_str())
                    .with("detected", validated.detected_mime.as_str())
                    .with("count", validated.mismatches.len())
                    .with("name_hash", hash_for_log(&request.declared_name)),
            );
        }

        let extension = extension_for(profile, validated.declared_extension.as_deref())?;

        self.documents.validate(
            &validated.canonical_path,
            profile,
            validated.declared_extension.as_deref(),
            &validated.mime,
            validated.size,
        )?;

        let dimensions = match profile.category {
            ProfileCategory::Image => Some(self.images.validate(&validated.canonical_path)?),
            _ => None,
        };

        Ok(InspectedFile {
            path: validated.canonical_path,
            size: validated.size,
            mime: validated.mime,
            extension,
            dimensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sniff::InferSniffer;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;
    use warden_core::models::ProfileRegistry;
    use warden_infra::CapturingEventSink;

    fn settings() -> ValidationSettings {
        ValidationSettings {
            hard_max_bytes: 10 * 1024 * 1024,
            header_window_bytes: 8192,
            allow_mime_mismatch: false,
            validate_timeout: Duration::from_secs(5),
            csv_min_consistency: 0.6,
            csv_sample_lines: 50,
            max_image_pixels: 1_000_000,
        }
    }

    fn request(path: PathBuf, profile: &str, name: &str, mime: Option<&str>) -> InspectionRequest {
        InspectionRequest {
            path,
            profile: ProfileRegistry::builtin().get(profile).unwrap(),
            declared_name: name.to_string(),
            client_mime: mime.map(str::to_string),
            correlation_id: "corr-1".to_string(),
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([0, 128, 255, 255]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[tokio::test]
    async fn test_inspects_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staged");
        std::fs::write(&path, png(64, 32)).unwrap();
        let events = Arc::new(CapturingEventSink::new());
        let inspector = FileInspector::new(&settings(), Arc::new(InferSniffer), events.clone());

        let inspected = inspector
            .inspect(request(path, "avatar", "Photo.JPEG.png", Some("image/png")))
            .await
            .unwrap();
        assert_eq!(inspected.mime, "image/png");
        assert_eq!(inspected.extension, "png");
        assert_eq!(inspected.dimensions, Some((64, 32)));
        assert_eq!(events.count("upload.rejected"), 0);
    }

    #[tokio::test]
    async fn test_rejection_emits_hashed_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staged");
        std::fs::write(&path, b"%PDF-1.4\n<?php system($_GET['c']); ?>").unwrap();
        let events = Arc::new(CapturingEventSink::new());
        let inspector = FileInspector::new(&settings(), Arc::new(InferSniffer), events.clone());

        let err = inspector
            .inspect(request(path, "pdf_document", "secret-plans.pdf", None))
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "POLYGLOT");

        let captured = events.events();
        assert_eq!(captured.len(), 1);
        let event = &captured[0];
        assert_eq!(event.name, "upload.rejected");
        assert_eq!(event.correlation_id, "corr-1");
        assert_eq!(event.context["reason"], "POLYGLOT");
        assert!(!event.context["name_hash"]
            .as_str()
            .unwrap()
            .contains("secret"));
    }

    #[tokio::test]
    async fn test_csv_extension_is_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staged");
        let mut data = "id,name,email\n".to_string();
        for i in 0..30 {
            data.push_str(&format!("{},user{},u{}@example.com\n", i, i, i));
        }
        std::fs::write(&path, data).unwrap();
        let inspector = FileInspector::new(
            &settings(),
            Arc::new(InferSniffer),
            Arc::new(CapturingEventSink::new()),
        );

        let inspected = inspector
            .inspect(request(path, "csv_import", "export.txt", Some("text/plain")))
            .await
            .unwrap();
        assert_eq!(inspected.extension, "csv");
        assert!(inspected.dimensions.is_none());
    }

    #[tokio::test]
    async fn test_oversized_image_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staged");
        std::fs::write(&path, png(200, 200)).unwrap();
        let mut tight = settings();
        tight.max_image_pixels = 10_000;
        let inspector = FileInspector::new(&tight, Arc::new(InferSniffer), Arc::new(CapturingEventSink::new()));

        let err = inspector
            .inspect(request(path, "avatar", "big.png", None))
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "IMAGE_DIMENSIONS");
    }

    struct SlowSniffer;

    impl MimeSniffer for SlowSniffer {
        fn sniff(&self, _prefix: &[u8]) -> Option<String> {
            std::thread::sleep(Duration::from_millis(300));
            None
        }
    }

    #[tokio::test]
    async fn test_validation_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staged");
        std::fs::write(&path, png(8, 8)).unwrap();
        let mut quick = settings();
        quick.validate_timeout = Duration::from_millis(20);
        let events = Arc::new(CapturingEventSink::new());
        let inspector = FileInspector::new(&quick, Arc::new(SlowSniffer), events.clone());

        let err = inspector
            .inspect(request(path, "avatar", "a.png", None))
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "VALIDATION_TIMEOUT");
        assert_eq!(events.count("upload.rejected"), 1);
    }
}
