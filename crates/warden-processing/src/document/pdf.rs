use warden_core::RejectReason;

/// `%PDF-` followed by a version digit.
pub fn validate_pdf(prefix: &[u8]) -> Result<(), RejectReason> {
    match prefix {
        [b'%', b'P', b'D', b'F', b'-', digit, ..] if digit.is_ascii_digit() => Ok(()),
        _ => Err(RejectReason::InvalidPdf),
    }
}
