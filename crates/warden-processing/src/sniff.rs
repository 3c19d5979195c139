//! Content-based MIME detection independent of anything the client declares.

/// Trusted MIME detector. `None` means the detector has no opinion.
pub trait MimeSniffer: Send + Sync {
    fn sniff(&self, prefix: &[u8]) -> Option<String>;
}

/// [`MimeSniffer`] backed by the `infer` crate, with a plain-text fallback.
#[derive(Debug, Default, Clone)]
pub struct InferSniffer;

impl MimeSniffer for InferSniffer {
    fn sniff(&self, prefix: &[u8]) -> Option<String> {
        if let Some(kind) = infer::get(prefix) {
            return Some(kind.mime_type().to_string());
        }
        if looks_textual(prefix) {
            return Some("text/plain".to_string());
        }
        None
    }
}

/// Byte-order marks we accept for textual uploads.
pub(crate) const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
pub(crate) const UTF16_LE_BOM: &[u8] = &[0xFF, 0xFE];
pub(crate) const UTF16_BE_BOM: &[u8] = &[0xFE, 0xFF];

/// Whether a prefix plausibly belongs to a text file.
///
/// A multi-byte sequence cut off by the end of the prefix still counts as valid UTF-8.
pub fn looks_textual(prefix: &[u8]) -> bool {
    if prefix.starts_with(UTF16_LE_BOM) || prefix.starts_with(UTF16_BE_BOM) {
        return true;
    }
    let body = prefix.strip_prefix(UTF8_BOM).unwrap_or(prefix);
    if body.is_empty() || body.contains(&0) {
        return false;
    }
    match std::str::from_utf8(body) {
        Ok(_) => {}
        Err(e) if e.error_len().is_none() => {}
        Err(_) => return false,
    }
    let controls = body
        .iter()
        .filter(|b| **b < 0x20 && !matches!(**b, b'\t' | b'\r' | b'\n' | 0x0C))
        .count();
    controls * 100 <= body.len()
}
