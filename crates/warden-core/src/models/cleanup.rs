use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored artifact that may be deleted by the cleanup scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub id: Uuid,
    /// Storage disk holding the original.
    #[serde(default = "default_disk")]
    pub disk: String,
    /// Storage key of the original.
    pub path: String,
    /// Rendition names derived from the original (deleted alongside it).
    #[serde(default)]
    pub renditions: Vec<String>,
}

fn default_disk() -> String {
    "local".to_string()
}

/// Deletion deferred until renditions finish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupPayload {
    pub artifacts: Vec<ArtifactRef>,
    #[serde(default)]
    pub preserve_ids: Vec<Uuid>,
    #[serde(default)]
    pub origin_ids: Vec<Uuid>,
    pub queued_at: DateTime<Utc>,
}

impl CleanupPayload {
    pub fn new(queued_at: DateTime<Utc>) -> Self {
        Self {
            artifacts: Vec::new(),
            preserve_ids: Vec::new(),
            origin_ids: Vec::new(),
            queued_at,
        }
    }

    /// Add artifacts, preserved ids and origins, skipping ones already present.
    pub fn merge(&mut self, artifacts: Vec<ArtifactRef>, preserve_ids: Vec<Uuid>, origin_ids: &[Uuid]) {
        for artifact in artifacts {
            if !self.artifacts.iter().any(|a| a.id == artifact.id) {
                self.artifacts.push(artifact);
            }
        }
        for keep in preserve_ids {
            if !self.preserve_ids.contains(&keep) {
                self.preserve_ids.push(keep);
            }
        }
        for origin in origin_ids {
            if !self.origin_ids.contains(origin) {
                self.origin_ids.push(*origin);
            }
        }
    }

    /// Artifacts that should actually be removed.
    pub fn deletable(&self) -> impl Iterator<Item = &ArtifactRef> {
        self.artifacts
            .iter()
            .filter(|a| !self.preserve_ids.contains(&a.id))
    }
}

/// Durable per-artifact record reconciling storage with asynchronous renditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupState {
    pub artifact_id: Uuid,
    /// Disk and key of the base artifact, used to locate its renditions.
    #[serde(default = "default_disk")]
    pub disk: String,
    #[serde(default)]
    pub path: String,
    pub collection: String,
    pub owner_type: String,
    pub owner_id: String,
    #[serde(default)]
    pub expected_renditions: Vec<String>,
    #[serde(default)]
    pub payload: Option<CleanupPayload>,
    pub flagged_at: Option<DateTime<Utc>>,
    pub payload_queued_at: Option<DateTime<Utc>>,
}

impl CleanupState {
    pub fn new(artifact_id: Uuid, collection: &str, owner_type: &str, owner_id: &str) -> Self {
        Self {
            artifact_id,
            disk: default_disk(),
            path: String::new(),
            collection: collection.to_string(),
            owner_type: owner_type.to_string(),
            owner_id: owner_id.to_string(),
            expected_renditions: Vec::new(),
            payload: None,
            flagged_at: None,
            payload_queued_at: None,
        }
    }

    /// Empty record for the artifact a cleanup call refers to.
    pub fn for_subject(subject: &CleanupSubject) -> Self {
        let mut state = Self::new(
            subject.artifact.id,
            &subject.collection,
            &subject.owner_type,
            &subject.owner_id,
        );
        state.disk = subject.artifact.disk.clone();
        state.path = subject.artifact.path.clone();
        state
    }

    /// No pending conversions and no deferred payload: the record can be deleted.
    pub fn is_empty(&self) -> bool {
        self.flagged_at.is_none() && self.payload.is_none()
    }

    /// Oldest timestamp held by the record, used by the sweep.
    pub fn oldest_activity(&self) -> Option<DateTime<Utc>> {
        match (self.flagged_at, self.payload_queued_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Identity of the artifact a cleanup call refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupSubject {
    pub artifact: ArtifactRef,
    pub collection: String,
    pub owner_type: String,
    pub owner_id: String,
}

/// Where an artifact sits in the cleanup state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupPhase {
    NoPendingWork,
    Flagged(Vec<String>),
    DeferredPayloadStored {
        artifacts: Vec<Uuid>,
        preserve_ids: Vec<Uuid>,
    },
}

impl CleanupPhase {
    pub fn of(state: Option<&CleanupState>) -> Self {
        match state {
            None => CleanupPhase::NoPendingWork,
            Some(s) => match &s.payload {
                Some(p) => CleanupPhase::DeferredPayloadStored {
                    artifacts: p.artifacts.iter().map(|a| a.id).collect(),
                    preserve_ids: p.preserve_ids.clone(),
                },
                None if s.flagged_at.is_some() => {
                    CleanupPhase::Flagged(s.expected_renditions.clone())
                }
                None => CleanupPhase::NoPendingWork,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(id: Uuid) -> ArtifactRef {
        ArtifactRef {
            id,
            disk: "local".to_string(),
            path: format!("tenants/t/users/o/avatars/2024/01/{}.png", id),
            renditions: vec!["thumb".into()],
        }
    }

    #[test]
    fn test_deletable_skips_preserved() {
        let keep = Uuid::new_v4();
        let drop = Uuid::new_v4();
        let payload = CleanupPayload {
            artifacts: vec![artifact(keep), artifact(drop)],
            preserve_ids: vec![keep],
            origin_ids: vec![],
            queued_at: Utc::now(),
        };
        let ids: Vec<Uuid> = payload.deletable().map(|a| a.id).collect();
        assert_eq!(ids, vec![drop]);
    }

    #[test]
    fn test_merge_skips_duplicates() {
        let origin = Uuid::new_v4();
        let a = Uuid::new_v4();
        let mut payload = CleanupPayload::new(Utc::now());
        payload.merge(vec![artifact(a)], vec![origin], &[origin]);
        payload.merge(vec![artifact(a), artifact(origin)], vec![origin], &[origin]);

        let ids: Vec<Uuid> = payload.artifacts.iter().map(|x| x.id).collect();
        assert_eq!(ids, vec![a, origin]);
        assert_eq!(payload.preserve_ids, vec![origin]);
        assert_eq!(payload.origin_ids, vec![origin]);
    }

    #[test]
    fn test_phase_transitions() {
        let id = Uuid::new_v4();
        let mut state = CleanupState::new(id, "avatars", "users", "42");
        assert!(state.is_empty());
        assert_eq!(CleanupPhase::of(Some(&state)), CleanupPhase::NoPendingWork);

        state.expected_renditions = vec!["thumb".into()];
        state.flagged_at = Some(Utc::now());
        assert_eq!(
            CleanupPhase::of(Some(&state)),
            CleanupPhase::Flagged(vec!["thumb".into()])
        );

        let now = Utc::now();
        state.payload = Some(CleanupPayload {
            artifacts: vec![artifact(id)],
            preserve_ids: vec![],
            origin_ids: vec![id],
            queued_at: now,
        });
        state.payload_queued_at = Some(now);
        assert!(matches!(
            CleanupPhase::of(Some(&state)),
            CleanupPhase::DeferredPayloadStored { .. }
        ));
        assert!(state.oldest_activity().unwrap() <= now);
    }
}
