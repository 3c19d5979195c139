use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;
use warden_core::models::{CleanupPayload, CleanupState};

use super::error::StoreResult;

/// Durable cleanup records plus a lease-based lock per artifact.
#[async_trait]
pub trait CleanupStateStore: Send + Sync {
    async fn load(&self, artifact_id: Uuid) -> StoreResult<Option<CleanupState>>;

    /// Insert or replace the record for `state.artifact_id`.
    async fn save(&self, state: &CleanupState) -> StoreResult<()>;

    async fn delete(&self, artifact_id: Uuid) -> StoreResult<()>;

    /// Take the lease for `artifact_id` if it is free or expired. Returns false when held.
    async fn try_lock(&self, artifact_id: Uuid, owner: &str, lease: Duration) -> StoreResult<bool>;

    /// Release the lease if `owner` still holds it.
    async fn unlock(&self, artifact_id: Uuid, owner: &str) -> StoreResult<()>;

    /// Records whose oldest flag or payload timestamp is before `cutoff`.
    async fn list_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<CleanupState>>;
}

fn lease_expiry(lease: Duration) -> DateTime<Utc> {
    let lease = chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::minutes(5));
    Utc::now()
        .checked_add_signed(lease)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Postgres cleanup state (`upload_cleanup_states`, `upload_cleanup_locks`).
#[derive(Clone)]
pub struct PgCleanupStateStore {
    pool: PgPool,
}

impl PgCleanupStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &sqlx::postgres::PgRow) -> StoreResult<CleanupState> {
        let expected: serde_json::Value = row.try_get("expected_renditions")?;
        let payload: Option<serde_json::Value> = row.try_get("payload")?;
        Ok(CleanupState {
            artifact_id: row.try_get("artifact_id")?,
            disk: row.try_get("artifact_disk")?,
            path: row.try_get("artifact_path")?,
            collection: row.try_get("collection")?,
            owner_type: row.try_get("owner_type")?,
            owner_id: row.try_get("owner_id")?,
            expected_renditions: serde_json::from_value(expected)?,
            payload: payload
                .map(serde_json::from_value::<CleanupPayload>)
                .transpose()?,
            flagged_at: row.try_get("flagged_at")?,
            payload_queued_at: row.try_get("payload_queued_at")?,
        })
    }
}

#[async_trait]
impl CleanupStateStore for PgCleanupStateStore {
    async fn load(&self, artifact_id: Uuid) -> StoreResult<Option<CleanupState>> {
        let row = sqlx::query(
            r#"
            SELECT artifact_id, artifact_disk, artifact_path, collection, owner_type, owner_id, expected_renditions,
                   payload, flagged_at, payload_queued_at
            FROM upload_cleanup_states
            WHERE artifact_id = $1
            "#,
        )
        .bind(artifact_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::from_row).transpose()
    }

    #[tracing::instrument(skip(self, state), fields(
        db.system = "postgresql",
        db.table = "upload_cleanup_states",
        db.operation = "upsert",
        artifact_id = %state.artifact_id
    ))]
    async fn save(&self, state: &CleanupState) -> StoreResult<()> {
        let expected = serde_json::to_value(&state.expected_renditions)?;
        let payload = state
            .payload
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO upload_cleanup_states (
                artifact_id, artifact_disk, artifact_path, collection, owner_type, owner_id,
                expected_renditions, payload, flagged_at, payload_queued_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
            ON CONFLICT (artifact_id) DO UPDATE SET
                artifact_disk = EXCLUDED.artifact_disk,
                artifact_path = EXCLUDED.artifact_path,
                collection = EXCLUDED.collection,
                owner_type = EXCLUDED.owner_type,
                owner_id = EXCLUDED.owner_id,
                expected_renditions = EXCLUDED.expected_renditions,
                payload = EXCLUDED.payload,
                flagged_at = EXCLUDED.flagged_at,
                payload_queued_at = EXCLUDED.payload_queued_at,
                updated_at = NOW()
            "#,
        )
        .bind(state.artifact_id)
        .bind(&state.disk)
        .bind(&state.path)
        .bind(&state.collection)
        .bind(&state.owner_type)
        .bind(&state.owner_id)
        .bind(expected)
        .bind(payload)
        .bind(state.flagged_at)
        .bind(state.payload_queued_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, artifact_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM upload_cleanup_states WHERE artifact_id = $1")
            .bind(artifact_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn try_lock(&self, artifact_id: Uuid, owner: &str, lease: Duration) -> StoreResult<bool> {
        let row = sqlx::query(
            r#"
            INSERT INTO upload_cleanup_locks (artifact_id, owner, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (artifact_id) DO UPDATE
            SET owner = EXCLUDED.owner, expires_at = EXCLUDED.expires_at
            WHERE upload_cleanup_locks.expires_at <= NOW()
            RETURNING owner
            "#,
        )
        .bind(artifact_id)
        .bind(owner)
        .bind(lease_expiry(lease))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn unlock(&self, artifact_id: Uuid, owner: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM upload_cleanup_locks WHERE artifact_id = $1 AND owner = $2")
            .bind(artifact_id)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<CleanupState>> {
        let rows = sqlx::query(
            r#"
            SELECT artifact_id, artifact_disk, artifact_path, collection, owner_type, owner_id, expected_renditions,
                   payload, flagged_at, payload_queued_at
            FROM upload_cleanup_states
            WHERE LEAST(
                COALESCE(flagged_at, 'infinity'::timestamptz),
                COALESCE(payload_queued_at, 'infinity'::timestamptz)
            ) < $1
            ORDER BY updated_at
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::from_row).collect()
    }
}

/// Process-local cleanup state.
#[derive(Default)]
pub struct MemoryCleanupStateStore {
    states: Mutex<HashMap<Uuid, CleanupState>>,
    locks: Mutex<HashMap<Uuid, (String, DateTime<Utc>)>>,
}

impl MemoryCleanupStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.states.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.lock().await.is_empty()
    }
}

#[async_trait]
impl CleanupStateStore for MemoryCleanupStateStore {
    async fn load(&self, artifact_id: Uuid) -> StoreResult<Option<CleanupState>> {
        Ok(self.states.lock().await.get(&artifact_id).cloned())
    }

    async fn save(&self, state: &CleanupState) -> StoreResult<()> {
        self.states
            .lock()
            .await
            .insert(state.artifact_id, state.clone());
        Ok(())
    }

    async fn delete(&self, artifact_id: Uuid) -> StoreResult<()> {
        self.states.lock().await.remove(&artifact_id);
        Ok(())
    }

    async fn try_lock(&self, artifact_id: Uuid, owner: &str, lease: Duration) -> StoreResult<bool> {
        let now = Utc::now();
        let mut locks = self.locks.lock().await;
        match locks.get(&artifact_id) {
            Some((_, expires)) if *expires > now => Ok(false),
            _ => {
                locks.insert(artifact_id, (owner.to_string(), lease_expiry(lease)));
                Ok(true)
            }
        }
    }

    async fn unlock(&self, artifact_id: Uuid, owner: &str) -> StoreResult<()> {
        let mut locks = self.locks.lock().await;
        if locks.get(&artifact_id).is_some_and(|(o, _)| o == owner) {
            locks.remove(&artifact_id);
        }
        Ok(())
    }

    async fn list_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<CleanupState>> {
        Ok(self
            .states
            .lock()
            .await
            .values()
            .filter(|s| s.oldest_activity().is_some_and(|t| t < cutoff))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flagged(age: chrono::Duration) -> CleanupState {
        let mut state = CleanupState::new(Uuid::new_v4(), "avatar", "users", "u1");
        state.expected_renditions = vec!["thumb".into()];
        state.flagged_at = Some(Utc::now() - age);
        state
    }

    #[tokio::test]
    async fn test_save_load_delete() {
        let store = MemoryCleanupStateStore::new();
        let state = flagged(chrono::Duration::zero());

        store.save(&state).await.unwrap();
        assert_eq!(store.load(state.artifact_id).await.unwrap(), Some(state.clone()));

        store.delete(state.artifact_id).await.unwrap();
        assert_eq!(store.load(state.artifact_id).await.unwrap(), None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_lease_lock() {
        let store = MemoryCleanupStateStore::new();
        let id = Uuid::new_v4();
        let lease = Duration::from_secs(30);

        assert!(store.try_lock(id, "a", lease).await.unwrap());
        assert!(!store.try_lock(id, "b", lease).await.unwrap());

        store.unlock(id, "b").await.unwrap();
        assert!(!store.try_lock(id, "b", lease).await.unwrap());

        store.unlock(id, "a").await.unwrap();
        assert!(store.try_lock(id, "b", lease).await.unwrap());
    }

    #[tokio::test]
    async fn test_unbounded_lease_does_not_overflow() {
        let store = MemoryCleanupStateStore::new();
        let id = Uuid::new_v4();
        assert!(store.try_lock(id, "a", Duration::MAX).await.unwrap());
        assert!(!store.try_lock(id, "b", Duration::from_secs(1)).await.unwrap());
        assert_eq!(
            lease_expiry(Duration::from_secs(10_000_000_000_000)),
            DateTime::<Utc>::MAX_UTC
        );
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken() {
        let store = MemoryCleanupStateStore::new();
        let id = Uuid::new_v4();

        assert!(store.try_lock(id, "a", Duration::ZERO).await.unwrap());
        assert!(store.try_lock(id, "b", Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_older_than() {
        let store = MemoryCleanupStateStore::new();
        let old = flagged(chrono::Duration::hours(48));
        let fresh = flagged(chrono::Duration::minutes(1));
        store.save(&old).await.unwrap();
        store.save(&fresh).await.unwrap();

        let stale = store
            .list_older_than(Utc::now() - chrono::Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].artifact_id, old.artifact_id);
    }
}
