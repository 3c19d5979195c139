//! Client-facing error responses
//!
//! Built from [`ErrorMetadata`] so sensitive variants only ever expose their generic message.

use serde::Serialize;
use warden_core::ErrorMetadata;

/// Standard error body handed to hosts and printed by the CLI
#[derive(Debug, Serialize, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub status: u16,
    pub recoverable: bool,
}

impl ErrorResponse {
    pub fn from_error<E: ErrorMetadata>(err: &E, reason: Option<&str>) -> Self {
        Self {
            error: err.client_message(),
            code: err.error_code().to_string(),
            reason: reason.map(str::to_string),
            status: err.http_status_code(),
            recoverable: err.is_recoverable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::{RejectReason, UploadError};

    #[test]
    fn test_scan_unavailable_hides_detail() {
        let err = UploadError::ScanUnavailable("clamd at 10.0.0.4:3310 refused".to_string());
        let body = ErrorResponse::from_error(&err, err.reject_reason().map(RejectReason::code));
        assert_eq!(body.code, "SCAN_UNAVAILABLE");
        assert_eq!(body.status, 503);
        assert!(!body.error.contains("10.0.0.4"));
    }

    #[test]
    fn test_rejection_carries_reason_code() {
        let err = UploadError::Rejected(RejectReason::InvalidPdf);
        let body = ErrorResponse::from_error(&err, err.reject_reason().map(RejectReason::code));
        assert_eq!(body.reason.as_deref(), Some("INVALID_PDF"));
        assert_eq!(body.status, 422);
    }
}
