use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;
use warden_core::models::{UploadRecord, UploadStatus};

use super::error::{StoreError, StoreResult};

/// Metadata rows for promoted artifacts.
#[async_trait]
pub trait UploadRecordStore: Send + Sync {
    async fn insert(&self, record: &UploadRecord) -> StoreResult<()>;

    async fn get(&self, tenant_id: &str, id: Uuid) -> StoreResult<Option<UploadRecord>>;

    async fn update_status(&self, id: Uuid, status: UploadStatus) -> StoreResult<()>;
}

/// Postgres upload records (`uploads`).
#[derive(Clone)]
pub struct PgUploadRecordStore {
    pool: PgPool,
}

impl PgUploadRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UploadRecordStore for PgUploadRecordStore {
    #[tracing::instrument(skip(self, record), fields(
        db.system = "postgresql",
        db.table = "uploads",
        db.operation = "insert",
        upload_id = %record.id
    ))]
    async fn insert(&self, record: &UploadRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO uploads (
                id, tenant_id, profile_id, disk, path, mime, size, checksum,
                status, correlation_id, owner_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.id)
        .bind(&record.tenant_id)
        .bind(&record.profile_id)
        .bind(&record.disk)
        .bind(&record.path)
        .bind(&record.mime)
        .bind(record.size as i64)
        .bind(&record.checksum)
        .bind(record.status.to_string())
        .bind(&record.correlation_id)
        .bind(&record.owner_id)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = ?e, upload_id = %record.id, "Failed to insert upload record");
            e
        })?;

        Ok(())
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> StoreResult<Option<UploadRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, profile_id, disk, path, mime, size, checksum,
                   status, correlation_id, owner_id, created_at
            FROM uploads
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.try_get("status")?;
        let size: i64 = row.try_get("size")?;
        Ok(Some(UploadRecord {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            profile_id: row.try_get("profile_id")?,
            disk: row.try_get("disk")?,
            path: row.try_get("path")?,
            mime: row.try_get("mime")?,
            size: u64::try_from(size).map_err(|_| StoreError::InvalidValue(format!("size {}", size)))?,
            checksum: row.try_get("checksum")?,
            status: status
                .parse()
                .map_err(|e: anyhow::Error| StoreError::InvalidValue(e.to_string()))?,
            correlation_id: row.try_get("correlation_id")?,
            owner_id: row.try_get("owner_id")?,
            created_at: row.try_get("created_at")?,
        }))
    }

    async fn update_status(&self, id: Uuid, status: UploadStatus) -> StoreResult<()> {
        sqlx::query("UPDATE uploads SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Process-local upload records.
#[derive(Default)]
pub struct MemoryUploadRecordStore {
    records: Mutex<HashMap<Uuid, UploadRecord>>,
    fail_inserts: bool,
}

impl MemoryUploadRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose inserts always fail; exercises rollback paths.
    pub fn failing() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            fail_inserts: true,
        }
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl UploadRecordStore for MemoryUploadRecordStore {
    async fn insert(&self, record: &UploadRecord) -> StoreResult<()> {
        if self.fail_inserts {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut records = self.records.lock().await;
        if records
            .values()
            .any(|r| r.disk == record.disk && r.path == record.path)
        {
            return Err(StoreError::InvalidValue(format!(
                "duplicate upload path on disk {}",
                record.disk
            )));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> StoreResult<Option<UploadRecord>> {
        Ok(self
            .records
            .lock()
            .await
            .get(&id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned())
    }

    async fn update_status(&self, id: Uuid, status: UploadStatus) -> StoreResult<()> {
        if let Some(record) = self.records.lock().await.get_mut(&id) {
            record.status = status;
        }
        Ok(())
    }
}
