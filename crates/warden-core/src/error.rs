//! Error types module
//!
//! All pipeline failures are unified under [`UploadError`]. Validation problems carry a
//! [`RejectReason`] whose `code()` is stable and safe to return to clients; infrastructure
//! failures collapse to a generic code so internal paths and binary names never leak.

use std::io;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Info level - for routine lifecycle events
    Info,
    /// Warning level - for blocked uploads and degraded dependencies
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented
pub trait ErrorMetadata {
    /// HTTP status code a host controller should map this error to
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "UPLOAD_REJECTED")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden from clients
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

/// Why a file was refused by validation. Every variant maps to a stable reason code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("empty file")]
    EmptyFile,

    #[error("file too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("not a regular file")]
    NotRegularFile,

    #[error("symbolic links are not accepted")]
    SymlinkRejected,

    #[error("file changed while it was being validated")]
    FileSwapped,

    #[error("file extension not allowed: {0}")]
    ExtensionNotAllowed(String),

    #[error("content type not allowed: {0}")]
    MimeNotAllowed(String),

    #[error("content type mismatch: {0}")]
    MimeMismatch(String),

    #[error("unrecognised file signature")]
    UnknownSignature,

    #[error("polyglot content detected: {0}")]
    Polyglot(String),

    #[error("unexpected null bytes in textual content")]
    SuspiciousNullBytes,

    #[error("invalid PDF header")]
    InvalidPdf,

    #[error("invalid spreadsheet container: {0}")]
    InvalidSpreadsheet(String),

    #[error("archive exceeds decompression limits: {0}")]
    ArchiveBomb(String),

    #[error("CSV is not valid UTF-8 or UTF-16")]
    InvalidCsvEncoding,

    #[error("CSV contains control characters")]
    CsvControlCharacters,

    #[error("CSV contains script content")]
    CsvScriptContent,

    #[error("CSV rows are structurally inconsistent ({consistent} of {total} rows share {columns} columns)")]
    CsvInconsistentColumns {
        consistent: usize,
        total: usize,
        columns: usize,
    },

    #[error("invalid PKCS#12 payload")]
    InvalidPkcs12,

    #[error("image dimensions rejected: {0}")]
    ImageDimensions(String),

    #[error("image could not be decoded")]
    ImageUndecodable,

    #[error("invalid path segment '{segment}'")]
    InvalidPathSegment { segment: &'static str },

    #[error("detector rejected the scan target: {0}")]
    ScanTargetInvalid(String),

    #[error("validation did not finish within {0} ms")]
    ValidationTimeout(u64),
}

impl RejectReason {
    /// Stable, enumerable reason code returned to callers.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::EmptyFile => "EMPTY_FILE",
            RejectReason::FileTooLarge { .. } => "FILE_TOO_LARGE",
            RejectReason::NotRegularFile => "NOT_REGULAR_FILE",
            RejectReason::SymlinkRejected => "SYMLINK_REJECTED",
            RejectReason::FileSwapped => "FILE_SWAPPED",
            RejectReason::ExtensionNotAllowed(_) => "EXTENSION_NOT_ALLOWED",
            RejectReason::MimeNotAllowed(_) => "MIME_NOT_ALLOWED",
            RejectReason::MimeMismatch(_) => "MIME_MISMATCH",
            RejectReason::UnknownSignature => "UNKNOWN_SIGNATURE",
            RejectReason::Polyglot(_) => "POLYGLOT",
            RejectReason::SuspiciousNullBytes => "SUSPICIOUS_NULL_BYTES",
            RejectReason::InvalidPdf => "INVALID_PDF",
            RejectReason::InvalidSpreadsheet(_) => "INVALID_SPREADSHEET",
            RejectReason::ArchiveBomb(_) => "ARCHIVE_BOMB",
            RejectReason::InvalidCsvEncoding => "CSV_ENCODING",
            RejectReason::CsvControlCharacters => "CSV_CONTROL_CHARACTERS",
            RejectReason::CsvScriptContent => "CSV_SCRIPT_CONTENT",
            RejectReason::CsvInconsistentColumns { .. } => "CSV_INCONSISTENT_COLUMNS",
            RejectReason::InvalidPkcs12 => "INVALID_PKCS12",
            RejectReason::ImageDimensions(_) => "IMAGE_DIMENSIONS",
            RejectReason::ImageUndecodable => "IMAGE_UNDECODABLE",
            RejectReason::InvalidPathSegment { .. } => "INVALID_PATH_SEGMENT",
            RejectReason::ScanTargetInvalid(_) => "SCAN_TARGET_INVALID",
            RejectReason::ValidationTimeout(_) => "VALIDATION_TIMEOUT",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Upload rejected: {0}")]
    Rejected(#[from] RejectReason),

    #[error("Upload blocked: detector {detector} reported an infection")]
    Infected { detector: String },

    #[error("Scanning unavailable: {0}")]
    ScanUnavailable(String),

    #[error("Persisting upload metadata failed: {0}")]
    PersistenceFailed(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Quarantine error: {0}")]
    Quarantine(String),

    #[error("Tenant context required")]
    TenantRequired,

    #[error("Upload profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Upload profile {0} requires an owning entity")]
    OwnerRequired(String),

    #[error("Upload not found: {0}")]
    RecordNotFound(uuid::Uuid),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl From<anyhow::Error> for UploadError {
    fn from(err: anyhow::Error) -> Self {
        UploadError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for UploadError {
    fn from(err: io::Error) -> Self {
        UploadError::Internal(format!("IO error: {}", err))
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, sensitive, log_level).
fn upload_error_static_metadata(err: &UploadError) -> (u16, &'static str, bool, bool, LogLevel) {
    match err {
        UploadError::Rejected(RejectReason::FileTooLarge { .. }) => {
            (413, "UPLOAD_REJECTED", false, false, LogLevel::Debug)
        }
        UploadError::Rejected(_) => (422, "UPLOAD_REJECTED", false, false, LogLevel::Debug),
        UploadError::Infected { .. } => (422, "UPLOAD_BLOCKED", false, false, LogLevel::Warn),
        UploadError::ScanUnavailable(_) => (503, "SCAN_UNAVAILABLE", true, true, LogLevel::Error),
        UploadError::PersistenceFailed(_) => (500, "PERSISTENCE_FAILED", true, true, LogLevel::Error),
        UploadError::Storage(_) => (500, "STORAGE_ERROR", true, true, LogLevel::Error),
        UploadError::Quarantine(_) => (500, "QUARANTINE_ERROR", true, true, LogLevel::Error),
        UploadError::TenantRequired => (403, "TENANT_REQUIRED", false, false, LogLevel::Debug),
        UploadError::ProfileNotFound(_) => (404, "PROFILE_NOT_FOUND", false, false, LogLevel::Debug),
        UploadError::OwnerRequired(_) => (400, "OWNER_REQUIRED", false, false, LogLevel::Debug),
        UploadError::RecordNotFound(_) => (404, "UPLOAD_NOT_FOUND", false, false, LogLevel::Debug),
        UploadError::Internal(_) | UploadError::InternalWithSource { .. } => {
            (500, "INTERNAL_ERROR", true, true, LogLevel::Error)
        }
    }
}

impl UploadError {
    /// Stable reason code: the rejection reason for validation failures, the error code otherwise.
    pub fn reason_code(&self) -> &'static str {
        match self {
            UploadError::Rejected(reason) => reason.code(),
            other => other.error_code(),
        }
    }

    /// The rejection reason, when this error is a validation failure.
    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match self {
            UploadError::Rejected(reason) => Some(reason),
            _ => None,
        }
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for UploadError {
    fn http_status_code(&self) -> u16 {
        upload_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        upload_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        upload_error_static_metadata(self).2
    }

    fn is_sensitive(&self) -> bool {
        upload_error_static_metadata(self).3
    }

    fn log_level(&self) -> LogLevel {
        upload_error_static_metadata(self).4
    }

    fn client_message(&self) -> String {
        match self {
            UploadError::Rejected(reason) => reason.to_string(),
            UploadError::Infected { .. } => "The file was blocked by a security scan".to_string(),
            UploadError::ScanUnavailable(_) => {
                "File scanning is temporarily unavailable, try again later".to_string()
            }
            UploadError::PersistenceFailed(_) => "Failed to record the upload".to_string(),
            UploadError::Storage(_) => "Failed to access storage".to_string(),
            UploadError::Quarantine(_) => "Failed to receive the file".to_string(),
            UploadError::TenantRequired => "A tenant context is required".to_string(),
            UploadError::ProfileNotFound(id) => format!("Unknown upload profile: {}", id),
            UploadError::OwnerRequired(id) => {
                format!("Upload profile {} requires an owner id", id)
            }
            UploadError::RecordNotFound(_) => "Upload not found".to_string(),
            UploadError::Internal(_) | UploadError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
        }
    }
}
