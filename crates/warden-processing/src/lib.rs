//! Warden Processing Library
//!
//! Content checks for quarantined uploads: magic-byte signatures, MIME sniffing and
//! agreement, polyglot detection, document guards and image header limits.

pub mod document;
pub mod image;
pub mod inspector;
pub mod mime;
pub mod polyglot;
pub mod signatures;
pub mod sniff;
pub mod validator;

pub use document::{extension_for, ArchiveLimits, CsvSettings, DocumentGuard};
pub use crate::image::ImageGuard;
pub use inspector::{FileInspector, InspectedFile, InspectionRequest};
pub use sniff::{InferSniffer, MimeSniffer};
pub use validator::{SignatureValidator, ValidatedFile, ValidationContext};
