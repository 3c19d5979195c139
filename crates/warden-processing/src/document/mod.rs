//! Type-specific document guards.
//!
//! Each category re-asserts its own MIME set and size limit before looking at structure,
//! so a guard never trusts the generic validator's verdict on its own.

pub mod csv;
pub mod pdf;
pub mod pkcs12;
pub mod spreadsheet;

pub use csv::{validate_csv, CsvReport, CsvSettings};
pub use pdf::validate_pdf;
pub use pkcs12::validate_pkcs12;
pub use spreadsheet::{validate_spreadsheet, ArchiveLimits};

use crate::mime::{canonical_mime, normalize_extension};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use warden_core::models::{ProfileCategory, UploadProfile};
use warden_core::RejectReason;

const PDF_HEADER_LEN: u64 = 16;

/// MIME types each category may end up stored as.
pub fn expected_mimes(category: ProfileCategory) -> &'static [&'static str] {
    match category {
        ProfileCategory::Image => &["image/jpeg", "image/png", "image/gif", "image/webp"],
        ProfileCategory::Pdf => &["application/pdf"],
        ProfileCategory::Spreadsheet => &[
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            "application/zip",
        ],
        ProfileCategory::Csv => &["text/csv", "text/plain", "text/tab-separated-values"],
        ProfileCategory::Pkcs12 => &["application/x-pkcs12", "application/octet-stream"],
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentGuard {
    pub csv: CsvSettings,
    pub archive: ArchiveLimits,
}

impl DocumentGuard {
    pub fn new(csv: CsvSettings, archive: ArchiveLimits) -> Self {
        Self { csv, archive }
    }

    /// Run the category guard for `profile` against the file at `path`.
    pub fn validate(
        &self,
        path: &Path,
        profile: &UploadProfile,
        declared_extension: Option<&str>,
        mime: &str,
        size: u64,
    ) -> Result<(), RejectReason> {
        if size == 0 {
            return Err(RejectReason::EmptyFile);
        }
        if size > profile.max_bytes {
            return Err(RejectReason::FileTooLarge {
                size,
                max: profile.max_bytes,
            });
        }

        let canonical = canonical_mime(mime);
        if !expected_mimes(profile.category).contains(&canonical.as_str()) {
            return Err(RejectReason::MimeNotAllowed(canonical));
        }

        match profile.category {
            ProfileCategory::Image => Ok(()),
            ProfileCategory::Pdf => {
                let mut header = Vec::with_capacity(PDF_HEADER_LEN as usize);
                open(path)?
                    .take(PDF_HEADER_LEN)
                    .read_to_end(&mut header)
                    .map_err(|_| RejectReason::InvalidPdf)?;
                validate_pdf(&header)
            }
            ProfileCategory::Spreadsheet => {
                validate_spreadsheet(BufReader::new(open(path)?), &self.archive)
            }
            ProfileCategory::Csv => {
                let bytes = read_bounded(path, profile.max_bytes)?;
                validate_csv(&bytes, &self.csv).map(|report| {
                    tracing::debug!(
                        delimiter = ?report.delimiter,
                        columns = report.columns,
                        rows = report.total_rows,
                        "CSV structure accepted"
                    );
                })
            }
            ProfileCategory::Pkcs12 => {
                let bytes = read_bounded(path, profile.max_bytes)?;
                validate_pkcs12(&bytes, declared_extension)
            }
        }
    }
}

fn open(path: &Path) -> Result<File, RejectReason> {
    File::open(path).map_err(|_| RejectReason::NotRegularFile)
}

fn read_bounded(path: &Path, max: u64) -> Result<Vec<u8>, RejectReason> {
    let mut bytes = Vec::new();
    open(path)?
        .take(max.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|_| RejectReason::NotRegularFile)?;
    if bytes.len() as u64 > max {
        return Err(RejectReason::FileTooLarge {
            size: bytes.len() as u64,
            max,
        });
    }
    Ok(bytes)
}

/// Extension the stored file will carry.
///
/// The profile's canonical extension wins; otherwise the normalised declared extension is
/// used when the profile allows it.
pub fn extension_for(
    profile: &UploadProfile,
    declared_extension: Option<&str>,
) -> Result<String, RejectReason> {
    if let Some(canonical) = &profile.canonical_extension {
        return Ok(normalize_extension(canonical));
    }

    let declared = declared_extension.unwrap_or_default();
    let normalized = normalize_extension(declared);
    if !normalized.is_empty()
        && (profile.allows_extension(&normalized) || profile.allows_extension(declared))
    {
        return Ok(normalized);
    }
    Err(RejectReason::ExtensionNotAllowed(normalized))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use warden_core::models::ProfileRegistry;

    fn profile(id: &str) -> UploadProfile {
        ProfileRegistry::builtin().get(id).unwrap().as_ref().clone()
    }

    fn write(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_extension_for_canonical() {
        let csv = profile("csv_import");
        assert_eq!(extension_for(&csv, Some("txt")).unwrap(), "csv");
        assert_eq!(extension_for(&csv, None).unwrap(), "csv");
    }

    #[test]
    fn test_extension_for_declared() {
        let avatar = profile("avatar");
        assert_eq!(extension_for(&avatar, Some("JPEG")).unwrap(), "jpg");
        assert_eq!(extension_for(&avatar, Some("png")).unwrap(), "png");
        assert_eq!(
            extension_for(&avatar, Some("svg")),
            Err(RejectReason::ExtensionNotAllowed("svg".to_string()))
        );
        assert!(extension_for(&avatar, None).is_err());
    }

    #[test]
    fn test_pdf_guard() {
        let dir = tempfile::tempdir().unwrap();
        let guard = DocumentGuard::default();
        let pdf = profile("pdf_document");

        let good = write(dir.path(), "a.pdf", b"%PDF-1.4\n1 0 obj\n");
        assert!(guard.validate(&good, &pdf, Some("pdf"), "application/pdf", 17).is_ok());

        let bad = write(dir.path(), "b.pdf", b"%PDF-X\n");
        assert_eq!(
            guard.validate(&bad, &pdf, Some("pdf"), "application/pdf", 7),
            Err(RejectReason::InvalidPdf)
        );
    }

    #[test]
    fn test_category_mime_reasserted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "a.pdf", b"%PDF-1.4\n");
        let result = DocumentGuard::default().validate(
            &path,
            &profile("pdf_document"),
            Some("pdf"),
            "image/png",
            9,
        );
        assert_eq!(result, Err(RejectReason::MimeNotAllowed("image/png".to_string())));
    }

    #[test]
    fn test_size_reasserted() {
        let dir = tempfile::tempdir().unwrap();
        let pkcs = profile("pkcs12_secret");
        let path = write(dir.path(), "a.p12", &[0x30, 0x03, 0x02, 0x01, 0x03]);
        let result = DocumentGuard::default().validate(
            &path,
            &pkcs,
            Some("p12"),
            "application/x-pkcs12",
            pkcs.max_bytes + 1,
        );
        assert!(matches!(result, Err(RejectReason::FileTooLarge { .. })));
    }

    #[test]
    fn test_csv_guard() {
        let dir = tempfile::tempdir().unwrap();
        let data = "a,b,c\n".repeat(20);
        let path = write(dir.path(), "a.csv", data.as_bytes());
        assert!(DocumentGuard::default()
            .validate(&path, &profile("csv_import"), Some("csv"), "text/csv", data.len() as u64)
            .is_ok());
    }

    #[test]
    fn test_pkcs12_guard() {
        let dir = tempfile::tempdir().unwrap();
        let data = [0x30, 0x03, 0x02, 0x01, 0x03];
        let path = write(dir.path(), "cert.p12", &data);
        let guard = DocumentGuard::default();
        let pkcs = profile("pkcs12_secret");

        assert!(guard
            .validate(&path, &pkcs, Some("p12"), "application/x-pkcs12", 5)
            .is_ok());
        assert!(guard
            .validate(&path, &pkcs, Some("crt"), "application/x-pkcs12", 5)
            .is_err());
    }
}
