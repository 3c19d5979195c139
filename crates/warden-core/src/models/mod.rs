//! Domain models shared by every pipeline stage.

pub mod cleanup;
pub mod profile;
pub mod scan;
pub mod upload;

pub use cleanup::{ArtifactRef, CleanupPayload, CleanupPhase, CleanupState, CleanupSubject};
pub use profile::{builtin_profiles, ProfileCategory, ProfileRegistry, ScanMode, UploadProfile};
pub use scan::{DetectorKind, ScanPhase, ScanVerdict};
pub use upload::{Actor, UploadRecord, UploadStatus};
