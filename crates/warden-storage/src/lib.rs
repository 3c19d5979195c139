//! Warden Storage Library
//!
//! Storage abstraction, the local filesystem backend, tenant-scoped key layout and the
//! quarantine area uploads are staged in before they are trusted.
//!
//! # Storage key format
//!
//! Every promoted artifact lives under
//! `tenants/{tenantId}/{entityKind}/{ownerId}/{category}/{yyyy}/{mm}/{artifactId}.{ext}`.
//! Renditions share the parent directory: `{artifactId}-{rendition}.{ext}`.
//! Keys are only ever built by [`layout::PathLayout`]; backends still refuse `..` and
//! absolute keys.

pub mod factory;
pub mod layout;
pub mod local;
pub mod quarantine;
pub mod traits;

// Re-export commonly used types
pub use factory::{create_disks, StorageDisks};
pub use layout::{PathLayout, PathLayoutError, TenantDir, TenantPath};
pub use local::LocalStorage;
pub use quarantine::{QuarantineError, QuarantineGuard, QuarantineStore, QuarantineToken};
pub use traits::{Storage, StorageError, StorageResult};
