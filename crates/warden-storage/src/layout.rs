//! Tenant-scoped key layout
//!
//! Pure functions only: no I/O, no clock reads. Every dynamic segment must match
//! `^[A-Za-z0-9_-]+$` and is rejected (never sanitised) otherwise.

use chrono::{DateTime, Datelike, Utc};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;
use uuid::Uuid;
use warden_core::constants::{SHARED_OWNER_SEGMENT, TENANT_ROOT_SEGMENT};
use warden_core::{hash_for_log, RejectReason};

static SEGMENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid segment pattern"));

static EXTENSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]{1,10}$").expect("valid extension pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathLayoutError {
    #[error("Invalid path segment '{segment}' (value hash {value_hash})")]
    InvalidSegment {
        segment: &'static str,
        value_hash: String,
    },
}

impl From<PathLayoutError> for RejectReason {
    fn from(err: PathLayoutError) -> Self {
        match err {
            PathLayoutError::InvalidSegment { segment, .. } => {
                RejectReason::InvalidPathSegment { segment }
            }
        }
    }
}

/// A validated, relative storage key for one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantPath {
    parent: String,
    artifact_id: Uuid,
    extension: String,
}

impl TenantPath {
    /// Directory part, without a trailing slash.
    pub fn parent(&self) -> &str {
        &self.parent
    }

    pub fn artifact_id(&self) -> Uuid {
        self.artifact_id
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.artifact_id, self.extension)
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.parent, self.file_name())
    }

    /// Key of a rendition of this artifact; same parent directory as the base file.
    pub fn rendition(&self, rendition: &str) -> Result<String, PathLayoutError> {
        check_segment("rendition", rendition)?;
        Ok(format!(
            "{}/{}-{}.{}",
            self.parent, self.artifact_id, rendition, self.extension
        ))
    }

    /// Rebuild a `TenantPath` from a key this module produced earlier.
    pub fn parse(key: &str) -> Result<Self, PathLayoutError> {
        let (parent, file_name) = key
            .rsplit_once('/')
            .ok_or_else(|| invalid("key", key))?;
        let (stem, extension) = file_name
            .rsplit_once('.')
            .ok_or_else(|| invalid("extension", file_name))?;
        let artifact_id = Uuid::parse_str(stem).map_err(|_| invalid("artifact", stem))?;
        check_extension(extension)?;

        let segments: Vec<&str> = parent.split('/').collect();
        if segments.len() != 7 || segments[0] != TENANT_ROOT_SEGMENT {
            return Err(invalid("key", key));
        }
        for segment in &segments[1..] {
            check_segment("key", segment)?;
        }

        Ok(TenantPath {
            parent: parent.to_string(),
            artifact_id,
            extension: extension.to_string(),
        })
    }
}

impl fmt::Display for TenantPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Inputs to [`PathLayout::tenant_path`].
#[derive(Debug, Clone)]
pub struct PathRequest<'a> {
    pub tenant_id: &'a str,
    pub entity_kind: &'a str,
    /// `None` places the artifact under the shared owner segment.
    pub owner_id: Option<&'a str>,
    pub category: &'a str,
    pub artifact_id: Uuid,
    pub extension: &'a str,
    pub at: DateTime<Utc>,
}

/// Validated tenant/owner/category directory. Built before any upload bytes are accepted;
/// the artifact file name is added once the extension is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantDir {
    parent: String,
}

impl TenantDir {
    pub fn parent(&self) -> &str {
        &self.parent
    }

    pub fn artifact(&self, artifact_id: Uuid, extension: &str) -> Result<TenantPath, PathLayoutError> {
        check_extension(extension)?;
        Ok(TenantPath {
            parent: self.parent.clone(),
            artifact_id,
            extension: extension.to_string(),
        })
    }
}

pub struct PathLayout;

impl PathLayout {
    /// `tenants/{tenantId}/{entityKind}/{ownerId}/{category}/{yyyy}/{mm}`
    pub fn tenant_dir(
        tenant_id: &str,
        entity_kind: &str,
        owner_id: Option<&str>,
        category: &str,
        at: DateTime<Utc>,
    ) -> Result<TenantDir, PathLayoutError> {
        check_segment("tenant", tenant_id)?;
        check_segment("entity_kind", entity_kind)?;
        let owner = owner_id.unwrap_or(SHARED_OWNER_SEGMENT);
        check_segment("owner", owner)?;
        check_segment("category", category)?;

        Ok(TenantDir {
            parent: format!(
                "{}/{}/{}/{}/{}/{:04}/{:02}",
                TENANT_ROOT_SEGMENT,
                tenant_id,
                entity_kind,
                owner,
                category,
                at.year(),
                at.month()
            ),
        })
    }

    /// `tenants/{tenantId}/{entityKind}/{ownerId}/{category}/{yyyy}/{mm}/{artifactId}.{ext}`
    pub fn tenant_path(request: &PathRequest<'_>) -> Result<TenantPath, PathLayoutError> {
        Self::tenant_dir(
            request.tenant_id,
            request.entity_kind,
            request.owner_id,
            request.category,
            request.at,
        )?
        .artifact(request.artifact_id, request.extension)
    }

    /// Rendition key for a stored base key.
    pub fn rendition_key(base_key: &str, rendition: &str) -> Result<String, PathLayoutError> {
        TenantPath::parse(base_key)?.rendition(rendition)
    }
}

fn invalid(segment: &'static str, value: &str) -> PathLayoutError {
    PathLayoutError::InvalidSegment {
        segment,
        value_hash: hash_for_log(value),
    }
}

fn check_segment(segment: &'static str, value: &str) -> Result<(), PathLayoutError> {
    if SEGMENT_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(invalid(segment, value))
    }
}

fn check_extension(value: &str) -> Result<(), PathLayoutError> {
    if EXTENSION_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(invalid("extension", value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request<'a>(tenant: &'a str, owner: Option<&'a str>, ext: &'a str) -> PathRequest<'a> {
        PathRequest {
            tenant_id: tenant,
            entity_kind: "users",
            owner_id: owner,
            category: "avatars",
            artifact_id: Uuid::parse_str("3f0b8f7e-1c2d-4a5b-9c8d-0e1f2a3b4c5d").unwrap(),
            extension: ext,
            at: Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_layout() {
        let path = PathLayout::tenant_path(&request("acme", Some("user_42"), "png")).unwrap();
        assert_eq!(
            path.key(),
            "tenants/acme/users/user_42/avatars/2026/03/3f0b8f7e-1c2d-4a5b-9c8d-0e1f2a3b4c5d.png"
        );
    }

    #[test]
    fn test_shared_owner() {
        let path = PathLayout::tenant_path(&request("acme", None, "png")).unwrap();
        assert!(path.parent().contains("/users/shared/avatars/"));
    }

    #[test]
    fn test_rejects_bad_segments_deterministically() {
        for bad in ["a/b", "..", ".", "", "tenant 1", "tënant", "a.b", "a\0b"] {
            let first = PathLayout::tenant_path(&request(bad, None, "png")).unwrap_err();
            let second = PathLayout::tenant_path(&request(bad, None, "png")).unwrap_err();
            assert_eq!(first, second);
            assert!(matches!(
                first,
                PathLayoutError::InvalidSegment { segment: "tenant", .. }
            ));
        }
        let err = PathLayoutError::InvalidSegment {
            segment: "owner",
            value_hash: String::new(),
        };
        assert_eq!(
            RejectReason::from(err),
            RejectReason::InvalidPathSegment { segment: "owner" }
        );
    }

    #[test]
    fn test_rejects_bad_extension() {
        for bad in ["PNG", "p/g", "", "tar.gz"] {
            assert!(matches!(
                PathLayout::tenant_path(&request("acme", None, bad)),
                Err(PathLayoutError::InvalidSegment { segment: "extension", .. })
            ));
        }
    }

    #[test]
    fn test_error_does_not_leak_value() {
        let err = PathLayout::tenant_path(&request("../../etc", None, "png")).unwrap_err();
        assert!(!err.to_string().contains("etc"));
    }

    #[test]
    fn test_rendition_shares_parent() {
        let path = PathLayout::tenant_path(&request("acme", Some("u1"), "jpg")).unwrap();
        let thumb = path.rendition("thumb").unwrap();
        let (parent, name) = thumb.rsplit_once('/').unwrap();
        assert_eq!(parent, path.parent());
        assert_eq!(name, format!("{}-thumb.jpg", path.artifact_id()));
        assert!(path.rendition("../x").is_err());
    }

    #[test]
    fn test_parse_roundtrip_and_rendition_key() {
        let path = PathLayout::tenant_path(&request("acme", Some("u1"), "jpg")).unwrap();
        assert_eq!(TenantPath::parse(&path.key()).unwrap(), path);
        assert_eq!(
            PathLayout::rendition_key(&path.key(), "medium").unwrap(),
            path.rendition("medium").unwrap()
        );
        assert!(TenantPath::parse("tenants/../x.png").is_err());
        assert!(TenantPath::parse("media/a/b/c/d/e/f/3f0b8f7e-1c2d-4a5b-9c8d-0e1f2a3b4c5d.png").is_err());
    }

    #[test]
    fn test_tenant_dir_checks_segments_without_extension() {
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();
        assert!(matches!(
            PathLayout::tenant_dir("acme", "users", Some("../x"), "avatars", at),
            Err(PathLayoutError::InvalidSegment { segment: "owner", .. })
        ));

        let dir = PathLayout::tenant_dir("acme", "users", Some("u1"), "avatars", at).unwrap();
        let path = dir.artifact(request("acme", Some("u1"), "png").artifact_id, "png").unwrap();
        assert_eq!(path, PathLayout::tenant_path(&request("acme", Some("u1"), "png")).unwrap());
        assert!(dir.artifact(path.artifact_id(), "p/g").is_err());
    }
}
