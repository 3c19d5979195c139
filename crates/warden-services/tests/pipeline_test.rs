mod helpers;

use helpers::detectors::{Hanging, Scripted};
use helpers::{fixtures, setup_test_pipeline, setup_test_pipeline_with, PipelineOptions, TENANT};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use warden_core::models::{Actor, CleanupPhase, UploadStatus};
use warden_core::{ErrorMetadata, RejectReason, UploadError};
use warden_db::{MemoryUploadRecordStore, UploadRecordStore};
use warden_services::scan::{Detector, DetectorError, DetectorOutcome};
use warden_storage::Storage;

fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}

#[tokio::test]
async fn test_avatar_upload_is_stored_under_tenant_path() {
    let app = setup_test_pipeline().await;
    let png = fixtures::png(16, 16);

    let record = app
        .service
        .upload(app.request("avatar", "me.PNG", &png, Some("42")))
        .await
        .expect("upload succeeds");

    let prefix = format!("tenants/{}/users/42/avatars/", TENANT);
    assert!(record.path.starts_with(&prefix), "{}", record.path);
    assert!(record.path.ends_with(&format!("{}.png", record.id)));
    assert_eq!(record.mime, "image/png");
    assert_eq!(record.size, png.len() as u64);
    assert_eq!(record.status, UploadStatus::Stored);
    assert_eq!(
        record.checksum.as_deref(),
        Some(hex::encode(Sha256::digest(&png)).as_str())
    );

    assert!(app.storage("local").await.exists(&record.path).await.unwrap());
    let stored = std::fs::read(app.dir.path().join("storage/local").join(&record.path)).unwrap();
    assert_eq!(stored, png);
    assert_eq!(app.quarantined_files(), 0);
    assert_eq!(
        app.records.get(TENANT, record.id).await.unwrap(),
        Some(record.clone())
    );

    assert_eq!(
        app.scheduler.phase(record.id).await.unwrap(),
        CleanupPhase::Flagged(vec!["thumb".to_string(), "medium".to_string()])
    );
    assert_eq!(app.events.count("upload.stored"), 1);
}

#[tokio::test]
async fn test_correlation_id_is_kept_or_generated() {
    let app = setup_test_pipeline().await;
    let pdf = fixtures::pdf();

    let mut request = app.request("pdf_document", "report.pdf", &pdf, None);
    request.correlation_id = Some("req-123".to_string());
    let record = app.service.upload(request).await.unwrap();
    assert_eq!(record.correlation_id, "req-123");

    let record = app
        .service
        .upload(app.request("pdf_document", "report.pdf", &pdf, None))
        .await
        .unwrap();
    assert!(uuid::Uuid::parse_str(&record.correlation_id).is_ok());
}

#[tokio::test]
async fn test_missing_tenant_is_refused_before_staging() {
    let app = setup_test_pipeline().await;
    let pdf = fixtures::pdf();
    let mut request = app.request("pdf_document", "a.pdf", &pdf, None);
    request.actor = Actor::new("anonymous", None);

    let err = app.service.upload(request).await.unwrap_err();
    assert!(matches!(err, UploadError::TenantRequired));
    assert_eq!(app.quarantined_files(), 0);
}

#[tokio::test]
async fn test_unknown_profile_and_missing_owner() {
    let app = setup_test_pipeline().await;
    let png = fixtures::png(4, 4);

    let err = app
        .service
        .upload(app.request("banner", "a.png", &png, Some("1")))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::ProfileNotFound(ref p) if p == "banner"));

    let err = app
        .service
        .upload(app.request("avatar", "a.png", &png, Some("  ")))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::OwnerRequired(_)));
}

#[tokio::test]
async fn test_polyglot_image_is_rejected_and_nothing_is_stored() {
    let app = setup_test_pipeline().await;
    let bytes = fixtures::png_polyglot();

    let err = app
        .service
        .upload(app.request("avatar", "cat.png", &bytes, Some("42")))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        UploadError::Rejected(RejectReason::Polyglot(_))
    ));
    assert_eq!(err.error_code(), "UPLOAD_REJECTED");
    assert_eq!(app.quarantined_files(), 0);
    assert_eq!(count_files(&app.dir.path().join("storage")), 0);
    assert_eq!(app.events.count("upload.rejected"), 1);
}

#[tokio::test]
async fn test_oversized_upload_is_rejected_while_streaming() {
    let app = setup_test_pipeline().await;
    let bytes = vec![0u8; 5 * 1024 * 1024 + 1];
    let mut request = app.request("avatar", "big.png", &bytes, Some("42"));
    request.expected_len = None;

    let err = app.service.upload(request).await.unwrap_err();
    assert!(matches!(
        err,
        UploadError::Rejected(RejectReason::FileTooLarge { .. })
    ));
    assert_eq!(err.http_status_code(), 413);
    assert_eq!(app.quarantined_files(), 0);
}

#[tokio::test]
async fn test_declared_length_mismatch_fails_staging() {
    let app = setup_test_pipeline().await;
    let pdf = fixtures::pdf();
    let mut request = app.request("pdf_document", "a.pdf", &pdf, None);
    request.expected_len = Some(pdf.len() as u64 + 10);

    let err = app.service.upload(request).await.unwrap_err();
    assert!(matches!(err, UploadError::Quarantine(_)));
    assert_eq!(app.quarantined_files(), 0);
}

#[tokio::test]
async fn test_infected_upload_is_blocked() {
    let detector = Scripted::new("clamd", vec![Ok(DetectorOutcome::Infected("Eicar-Test".into()))]);
    let app = setup_test_pipeline_with(PipelineOptions {
        detectors: vec![detector.clone() as Arc<dyn Detector>],
        ..PipelineOptions::default()
    })
    .await;
    let pdf = fixtures::pdf();

    let err = app
        .service
        .upload(app.request("pdf_document", "invoice.pdf", &pdf, None))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Infected { ref detector } if detector == "clamd"));
    assert_eq!(err.error_code(), "UPLOAD_BLOCKED");
    assert!(!err.is_recoverable());
    assert_eq!(detector.calls(), 1);
    assert_eq!(app.quarantined_files(), 0);
    assert_eq!(count_files(&app.dir.path().join("storage")), 0);
}

#[tokio::test]
async fn test_unavailable_scanner_fails_closed_without_leaking_details() {
    let detector = Scripted::new(
        "clamscan",
        vec![Err(DetectorError::MissingBinary("/usr/local/bin/clamscan".into()))],
    );
    let app = setup_test_pipeline_with(PipelineOptions {
        detectors: vec![detector.clone() as Arc<dyn Detector>],
        ..PipelineOptions::default()
    })
    .await;
    let pdf = fixtures::pdf();

    let err = app
        .service
        .upload(app.request("pdf_document", "a.pdf", &pdf, None))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::ScanUnavailable(_)));
    assert_eq!(err.error_code(), "SCAN_UNAVAILABLE");
    assert!(!err.client_message().contains("/usr/local/bin"));
    assert!(!err.to_string().contains("/usr/local/bin"));
    assert_eq!(detector.calls(), 1);
    assert_eq!(count_files(&app.dir.path().join("storage")), 0);
}

#[tokio::test]
async fn test_scan_target_rejection_is_a_validation_error() {
    let detector = Scripted::new(
        "clamd",
        vec![Err(DetectorError::MalformedTarget("clamd stream size limit exceeded".into()))],
    );
    let app = setup_test_pipeline_with(PipelineOptions {
        detectors: vec![detector as Arc<dyn Detector>],
        ..PipelineOptions::default()
    })
    .await;
    let pdf = fixtures::pdf();

    let err = app
        .service
        .upload(app.request("pdf_document", "a.pdf", &pdf, None))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UploadError::Rejected(RejectReason::ScanTargetInvalid(_))
    ));
}

#[tokio::test]
async fn test_global_kill_switch_skips_scanning() {
    let detector = Scripted::new("clamd", vec![Ok(DetectorOutcome::Infected("x".into()))]);
    let app = setup_test_pipeline_with(PipelineOptions {
        detectors: vec![detector.clone() as Arc<dyn Detector>],
        scanning_disabled: true,
        ..PipelineOptions::default()
    })
    .await;
    let pdf = fixtures::pdf();

    app.service
        .upload(app.request("pdf_document", "a.pdf", &pdf, None))
        .await
        .expect("scan skipped");
    assert_eq!(detector.calls(), 0);
}

#[tokio::test]
async fn test_validation_runs_before_scanning() {
    let detector = Scripted::new("clamd", vec![Ok(DetectorOutcome::Clean)]);
    let app = setup_test_pipeline_with(PipelineOptions {
        detectors: vec![detector.clone() as Arc<dyn Detector>],
        ..PipelineOptions::default()
    })
    .await;
    let pdf = fixtures::pdf();

    let err = app
        .service
        .upload(app.request("avatar", "fake.png", &pdf, Some("42")))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Rejected(_)));
    assert_eq!(detector.calls(), 0);
}

#[tokio::test]
async fn test_invalid_owner_is_refused_before_staging_and_scanning() {
    let detector = Scripted::new("clamd", vec![Ok(DetectorOutcome::Clean)]);
    let app = setup_test_pipeline_with(PipelineOptions {
        detectors: vec![detector.clone() as Arc<dyn Detector>],
        ..PipelineOptions::default()
    })
    .await;
    let png = fixtures::png(16, 16);

    let err = app
        .service
        .upload(app.request("avatar", "me.png", &png, Some("../x")))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UploadError::Rejected(RejectReason::InvalidPathSegment { segment: "owner" })
    ));
    assert_eq!(detector.calls(), 0);
    assert_eq!(app.quarantined_files(), 0);
    assert_eq!(count_files(&app.dir.path().join("storage")), 0);
}

#[tokio::test]
async fn test_csv_import_always_stored_as_csv() {
    let app = setup_test_pipeline().await;
    let csv = fixtures::csv();

    let record = app
        .service
        .upload(app.request("csv_import", "contacts.txt", &csv, None))
        .await
        .unwrap();
    assert!(record.path.ends_with(".csv"), "{}", record.path);
    assert!(record.path.contains("/imports/shared/csv/"));

    let mut request = app.request("csv_import", "contacts.csv", &csv, None);
    request.client_mime = Some("text/csv".to_string());
    let record = app.service.upload(request).await.unwrap();
    assert_eq!(record.mime, "text/csv");
}

#[tokio::test]
async fn test_failed_record_insert_rolls_back_storage() {
    let app = setup_test_pipeline_with(PipelineOptions {
        records: Arc::new(MemoryUploadRecordStore::failing()),
        ..PipelineOptions::default()
    })
    .await;
    let pdf = fixtures::pdf();

    let err = app
        .service
        .upload(app.request("pdf_document", "a.pdf", &pdf, None))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::PersistenceFailed(_)));
    assert_eq!(count_files(&app.dir.path().join("storage")), 0);
    assert_eq!(app.quarantined_files(), 0);
}

#[tokio::test]
async fn test_cancelled_upload_releases_quarantine() {
    let app = setup_test_pipeline_with(PipelineOptions {
        detectors: vec![Arc::new(Hanging) as Arc<dyn Detector>],
        ..PipelineOptions::default()
    })
    .await;
    let pdf = fixtures::pdf();

    let mut upload = Box::pin(
        app.service
            .upload(app.request("pdf_document", "a.pdf", &pdf, None)),
    );
    let mut staged = false;
    for _ in 0..200 {
        tokio::select! {
            _ = &mut upload => panic!("upload should be stuck in the detector"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(5)) => {
                if app.quarantined_files() == 1 {
                    staged = true;
                    break;
                }
            }
        }
    }
    assert!(staged);

    drop(upload);
    assert_eq!(app.quarantined_files(), 0);
}
