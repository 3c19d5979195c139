//! Application-wide constants.

/// Absolute upper bound on any upload, independent of profile limits.
pub const DEFAULT_HARD_MAX_BYTES: u64 = 512 * 1024 * 1024;

/// Prefix read for signature and polyglot detection.
pub const DEFAULT_HEADER_WINDOW_BYTES: usize = 8 * 1024;

/// Smallest header window that still covers every signature offset.
pub const MIN_HEADER_WINDOW_BYTES: usize = 512;

/// Owner segment used when a profile does not require an owning entity.
pub const SHARED_OWNER_SEGMENT: &str = "shared";

/// Top-level prefix of every tenant-scoped storage key.
pub const TENANT_ROOT_SEGMENT: &str = "tenants";
