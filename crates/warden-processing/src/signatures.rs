//! Magic-byte signature table.
//!
//! Matching is done on a bounded prefix only. Container formats get dedicated matchers
//! so a bare container header is not mistaken for the format it can carry.

/// One fixed signature: `magic` at `offset` identifies `mime`.
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pub mime: &'static str,
    pub offset: usize,
    pub magic: &'static [u8],
}

pub const SIGNATURES: &[Signature] = &[
    Signature {
        mime: "image/jpeg",
        offset: 0,
        magic: &[0xFF, 0xD8, 0xFF],
    },
    Signature {
        mime: "image/png",
        offset: 0,
        magic: &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A],
    },
    Signature {
        mime: "image/gif",
        offset: 0,
        magic: b"GIF87a",
    },
    Signature {
        mime: "image/gif",
        offset: 0,
        magic: b"GIF89a",
    },
    Signature {
        mime: "application/pdf",
        offset: 0,
        magic: b"%PDF-",
    },
    Signature {
        mime: "application/zip",
        offset: 0,
        magic: &[b'P', b'K', 0x03, 0x04],
    },
];

/// Slack allowed between the RIFF size field and the real file length (trailing padding).
const RIFF_SIZE_SLACK: u64 = 16;

/// Match `prefix` (the first bytes of a file of `file_len` bytes) against the table.
pub fn detect(prefix: &[u8], file_len: u64) -> Option<&'static str> {
    if let Some(mime) = detect_webp(prefix, file_len) {
        return Some(mime);
    }
    if let Some(mime) = detect_pkcs12(prefix) {
        return Some(mime);
    }
    SIGNATURES
        .iter()
        .find(|sig| {
            prefix
                .get(sig.offset..sig.offset + sig.magic.len())
                .is_some_and(|window| window == sig.magic)
        })
        .map(|sig| sig.mime)
}

/// `RIFF` only counts as WebP with `WEBP` at 8, a VP8 chunk tag at 12 and a plausible size.
fn detect_webp(prefix: &[u8], file_len: u64) -> Option<&'static str> {
    if prefix.len() < 16 || &prefix[0..4] != b"RIFF" || &prefix[8..12] != b"WEBP" {
        return None;
    }
    if !matches!(&prefix[12..16], b"VP8 " | b"VP8L" | b"VP8X") {
        return None;
    }
    let riff_size = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]) as u64;
    let max_size = file_len.saturating_sub(8) + RIFF_SIZE_SLACK;
    if riff_size < 4 || riff_size > max_size {
        return None;
    }
    Some("image/webp")
}

/// PKCS#12 `PFX ::= SEQUENCE { version INTEGER (3), ... }` in DER or BER.
fn detect_pkcs12(prefix: &[u8]) -> Option<&'static str> {
    let header = der_header_len(prefix)?;
    let body = prefix.get(header..header + 3)?;
    if body == [0x02, 0x01, 0x03] {
        Some("application/x-pkcs12")
    } else {
        None
    }
}

/// Parse a SEQUENCE tag and its length octets, returning the header length.
///
/// Accepts the short form, the long form with 1 to 4 length bytes and (for BER encoders
/// that stream the outer PFX) the indefinite form.
pub fn der_header_len(bytes: &[u8]) -> Option<usize> {
    if bytes.first() != Some(&0x30) {
        return None;
    }
    let first = *bytes.get(1)?;
    match first {
        0x00..=0x7F | 0x80 => Some(2),
        0x81..=0x84 => {
            let n = (first & 0x7F) as usize;
            let len_bytes = bytes.get(2..2 + n)?;
            if len_bytes[0] == 0 {
                return None;
            }
            Some(2 + n)
        }
        _ => None,
    }
}

/// Declared content length of a SEQUENCE in long or short form. `None` for indefinite.
pub fn der_content_len(bytes: &[u8]) -> Option<u64> {
    let header = der_header_len(bytes)?;
    let first = bytes[1];
    match first {
        0x00..=0x7F => Some(first as u64),
        0x80 => None,
        _ => Some(
            bytes[2..header]
                .iter()
                .fold(0u64, |acc, b| (acc << 8) | *b as u64),
        ),
    }
}
