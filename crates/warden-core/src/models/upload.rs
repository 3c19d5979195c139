use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::UploadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Stored,
    Superseded,
    Deleted,
}

impl Display for UploadStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            UploadStatus::Stored => write!(f, "stored"),
            UploadStatus::Superseded => write!(f, "superseded"),
            UploadStatus::Deleted => write!(f, "deleted"),
        }
    }
}

impl FromStr for UploadStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stored" => Ok(UploadStatus::Stored),
            "superseded" => Ok(UploadStatus::Superseded),
            "deleted" => Ok(UploadStatus::Deleted),
            other => Err(anyhow::anyhow!("Invalid upload status: {}", other)),
        }
    }
}

/// Result of a successful upload, also the persisted metadata row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: Uuid,
    pub tenant_id: String,
    pub profile_id: String,
    pub disk: String,
    pub path: String,
    pub mime: String,
    pub size: u64,
    pub checksum: Option<String>,
    pub status: UploadStatus,
    pub correlation_id: String,
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Authenticated caller as resolved by the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub actor_id: String,
    pub tenant_id: Option<String>,
}

impl Actor {
    pub fn new(actor_id: impl Into<String>, tenant_id: Option<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            tenant_id,
        }
    }

    pub fn require_tenant_id(&self) -> Result<&str, UploadError> {
        match self.tenant_id.as_deref() {
            Some(t) if !t.trim().is_empty() => Ok(t),
            _ => Err(UploadError::TenantRequired),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_tenant_id() {
        assert_eq!(
            Actor::new("u1", Some("acme".into())).require_tenant_id().unwrap(),
            "acme"
        );
        assert!(matches!(
            Actor::new("u1", None).require_tenant_id(),
            Err(UploadError::TenantRequired)
        ));
        assert!(Actor::new("u1", Some("  ".into())).require_tenant_id().is_err());
    }
}
