//! Signature & polyglot validator.
//!
//! Works on the quarantined copy only. The file is identified by `(dev, ino)` before it is
//! opened and again after it is read, so a path swapped mid-validation is refused rather
//! than validated under the wrong name.

use crate::document::csv::decode_text;
use crate::mime::{canonical_mime, extension_of, is_generic_mime, mime_family, mimes_for_extension};
use crate::polyglot;
use crate::signatures;
use crate::sniff::{InferSniffer, MimeSniffer};
use std::fs::{self, File, Metadata};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use warden_core::constants::MIN_HEADER_WINDOW_BYTES;
use warden_core::models::{ProfileCategory, UploadProfile};
use warden_core::{RejectReason, ValidationSettings};

/// Client-supplied facts about the upload. None of them are trusted.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    pub declared_name: &'a str,
    pub client_mime: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedFile {
    pub canonical_path: PathBuf,
    pub size: u64,
    /// MIME the file will be stored as; always allowed by the profile.
    pub mime: String,
    /// MIME derived from the signature table (or `text/plain` for textual content).
    pub detected_mime: String,
    pub declared_extension: Option<String>,
    /// Disagreements tolerated because mismatches are allowed.
    pub mismatches: Vec<String>,
}

#[derive(Clone)]
pub struct SignatureValidator {
    hard_max_bytes: u64,
    header_window: usize,
    allow_mime_mismatch: bool,
    sniffer: Arc<dyn MimeSniffer>,
}

impl SignatureValidator {
    pub fn new(settings: &ValidationSettings, sniffer: Arc<dyn MimeSniffer>) -> Self {
        Self {
            hard_max_bytes: settings.hard_max_bytes,
            header_window: settings.header_window_bytes.max(MIN_HEADER_WINDOW_BYTES),
            allow_mime_mismatch: settings.allow_mime_mismatch,
            sniffer,
        }
    }

    pub fn with_infer(settings: &ValidationSettings) -> Self {
        Self::new(settings, Arc::new(InferSniffer))
    }

    /// Validate the file at `path` against `profile`.
    pub fn validate(
        &self,
        path: &Path,
        profile: &UploadProfile,
        context: ValidationContext<'_>,
    ) -> Result<ValidatedFile, RejectReason> {
        // Identity and size
        let before = fs::symlink_metadata(path).map_err(|_| RejectReason::NotRegularFile)?;
        if before.file_type().is_symlink() {
            return Err(RejectReason::SymlinkRejected);
        }
        if !before.is_file() {
            return Err(RejectReason::NotRegularFile);
        }

        let canonical_path = fs::canonicalize(path).map_err(|_| RejectReason::NotRegularFile)?;
        let file = File::open(&canonical_path).map_err(|_| RejectReason::NotRegularFile)?;
        let opened = file.metadata().map_err(|_| RejectReason::NotRegularFile)?;
        if !opened.is_file() {
            return Err(RejectReason::NotRegularFile);
        }
        if !same_file(&before, &opened) {
            return Err(RejectReason::FileSwapped);
        }

        let size = opened.len();
        self.check_size(size, profile.max_bytes)?;

        let declared_extension = extension_of(context.declared_name);
        if let Some(ext) = &declared_extension {
            if !profile.allows_extension(ext) && !raw_extension_allowed(profile, context.declared_name) {
                return Err(RejectReason::ExtensionNotAllowed(ext.clone()));
            }
        }

        // Read
        let textual = profile.category.is_textual();
        let limit = if textual { size } else { self.header_window as u64 };
        let mut buffer = Vec::with_capacity(limit.min(size) as usize);
        file.take(limit)
            .read_to_end(&mut buffer)
            .map_err(|_| RejectReason::NotRegularFile)?;

        let after = fs::symlink_metadata(&canonical_path).map_err(|_| RejectReason::FileSwapped)?;
        if !same_file(&opened, &after) || after.len() != size {
            return Err(RejectReason::FileSwapped);
        }

        // Signature
        let signature = signatures::detect(&buffer, size);
        let detected_mime = match (textual, signature) {
            (true, Some(binary)) => return Err(RejectReason::MimeNotAllowed(binary.to_string())),
            (true, None) => "text/plain",
            (false, Some(mime)) => mime,
            (false, None) => return Err(RejectReason::UnknownSignature),
        };

        let prefix = &buffer[..buffer.len().min(self.header_window)];
        let sniffed = self.sniffer.sniff(prefix).map(|m| canonical_mime(&m));

        // Agreement
        let mismatches = disagreements(
            detected_mime,
            declared_extension.as_deref(),
            context.client_mime,
            sniffed.as_deref(),
        );
        if let Some(first) = mismatches.first() {
            if !self.allow_mime_mismatch {
                return Err(RejectReason::MimeMismatch(first.clone()));
            }
            tracing::warn!(
                profile = %profile.id,
                mismatches = ?mismatches,
                "MIME disagreement tolerated by configuration"
            );
        }

        // Polyglot and NUL bytes
        if textual {
            let text = decode_text(&buffer)?;
            if let Some(marker) = polyglot::scan(text.as_bytes(), false) {
                return Err(RejectReason::Polyglot(marker));
            }
            if text.contains('\0') {
                return Err(RejectReason::SuspiciousNullBytes);
            }
        } else if let Some(marker) =
            polyglot::scan(&buffer, profile.category == ProfileCategory::Image)
        {
            return Err(RejectReason::Polyglot(marker));
        }

        let mime = stored_mime(
            profile,
            detected_mime,
            declared_extension.as_deref(),
            context.client_mime,
            sniffed.as_deref(),
        )?;

        Ok(ValidatedFile {
            canonical_path,
            size,
            mime,
            detected_mime: detected_mime.to_string(),
            declared_extension,
            mismatches,
        })
    }

    fn check_size(&self, size: u64, profile_max: u64) -> Result<(), RejectReason> {
        if size == 0 {
            return Err(RejectReason::EmptyFile);
        }
        let max = self.hard_max_bytes.min(profile_max);
        if size > max {
            return Err(RejectReason::FileTooLarge { size, max });
        }
        Ok(())
    }
}

fn raw_extension_allowed(profile: &UploadProfile, declared_name: &str) -> bool {
    declared_name
        .rsplit_once('.')
        .is_some_and(|(_, raw)| profile.allows_extension(raw))
}

#[cfg(unix)]
fn same_file(a: &Metadata, b: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(a: &Metadata, b: &Metadata) -> bool {
    a.len() == b.len() && a.modified().ok() == b.modified().ok()
}

/// Every independent MIME opinion that falls outside the detected family.
///
/// Generic client types and a sniffer without an opinion are skipped.
fn disagreements(
    detected: &str,
    extension: Option<&str>,
    client_mime: Option<&str>,
    sniffed: Option<&str>,
) -> Vec<String> {
    let family = mime_family(detected);
    let mut found = Vec::new();

    if let Some(ext) = extension {
        if let Some(expected) = mimes_for_extension(ext) {
            if !expected.iter().any(|m| mime_family(m) == family) {
                found.push(format!("extension {} does not match {}", ext, detected));
            }
        }
    }
    if let Some(client) = client_mime.filter(|m| !is_generic_mime(m)) {
        if mime_family(client) != family {
            found.push(format!("declared {} does not match {}", canonical_mime(client), detected));
        }
    }
    if let Some(sniffed) = sniffed {
        if mime_family(sniffed) != family {
            found.push(format!("content sniffed as {} but signature is {}", sniffed, detected));
        }
    }
    found
}

/// Pick the most specific allowed MIME within the detected family.
fn stored_mime(
    profile: &UploadProfile,
    detected: &str,
    extension: Option<&str>,
    client_mime: Option<&str>,
    sniffed: Option<&str>,
) -> Result<String, RejectReason> {
    let family = mime_family(detected);
    let from_extension = extension
        .and_then(mimes_for_extension)
        .unwrap_or_default()
        .iter()
        .map(|m| m.to_string());
    let candidates = from_extension
        .chain(client_mime.filter(|m| !is_generic_mime(m)).map(canonical_mime))
        .chain(sniffed.map(str::to_string))
        .chain(std::iter::once(detected.to_string()));

    for candidate in candidates {
        if mime_family(&candidate) == family && profile.allows_mime(&candidate) {
            return Ok(candidate);
        }
    }

    profile
        .allowed_mime_types
        .iter()
        .find(|m| mime_family(m) == family)
        .cloned()
        .ok_or_else(|| RejectReason::MimeNotAllowed(detected.to_string()))
}
