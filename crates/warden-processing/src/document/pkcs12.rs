use crate::mime::normalize_extension;
use crate::signatures::{der_content_len, der_header_len};
use warden_core::RejectReason;

pub const PKCS12_EXTENSIONS: [&str; 2] = ["p12", "pfx"];

/// DER SEQUENCE with a valid length form that fits the file, and a `.p12`/`.pfx` name.
pub fn validate_pkcs12(bytes: &[u8], declared_extension: Option<&str>) -> Result<(), RejectReason> {
    let extension = declared_extension.map(normalize_extension).unwrap_or_default();
    if !PKCS12_EXTENSIONS.contains(&extension.as_str()) {
        return Err(RejectReason::ExtensionNotAllowed(extension));
    }

    let header = der_header_len(bytes).ok_or(RejectReason::InvalidPkcs12)?;
    if let Some(content) = der_content_len(bytes) {
        if header as u64 + content > bytes.len() as u64 {
            return Err(RejectReason::InvalidPkcs12);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pfx(content_len: usize) -> Vec<u8> {
        let mut data = vec![0x30, 0x82, (content_len >> 8) as u8, content_len as u8];
        data.extend_from_slice(&[0x02, 0x01, 0x03]);
        data.resize(4 + content_len, 0x00);
        data
    }

    #[test]
    fn test_valid_pfx() {
        assert!(validate_pkcs12(&pfx(300), Some("p12")).is_ok());
        assert!(validate_pkcs12(&pfx(300), Some("PFX")).is_ok());
    }

    #[test]
    fn test_extension_restricted() {
        assert_eq!(
            validate_pkcs12(&pfx(300), Some("pem")),
            Err(RejectReason::ExtensionNotAllowed("pem".to_string()))
        );
        assert!(validate_pkcs12(&pfx(300), None).is_err());
    }

    #[test]
    fn test_bad_der() {
        assert_eq!(
            validate_pkcs12(b"-----BEGIN CERTIFICATE-----", Some("p12")),
            Err(RejectReason::InvalidPkcs12)
        );
        let mut truncated = pfx(300);
        truncated.truncate(100);
        assert_eq!(validate_pkcs12(&truncated, Some("p12")), Err(RejectReason::InvalidPkcs12));
    }
}
