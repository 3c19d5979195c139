use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::error::StoreResult;

/// Shared integer counters with a time-to-live, refreshed on every write.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current value, `None` when missing or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<i64>>;

    async fn set(&self, key: &str, value: i64, ttl: Duration) -> StoreResult<()>;

    /// Add one and return the new value. An expired counter restarts at 1.
    async fn increment(&self, key: &str, ttl: Duration) -> StoreResult<i64>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Whether `increment` is a single atomic operation in the backing store.
    ///
    /// Callers fall back to lock-guarded read-modify-write when this is false.
    fn supports_atomic_increment(&self) -> bool;
}

/// Absolute expiry for `ttl`; a TTL past the representable range never expires.
fn expiry(ttl: Duration) -> chrono::DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC)
}

/// Far enough out to never be reached by a running process.
const NEVER: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn instant_expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(NEVER))
        .unwrap_or(now)
}

/// Postgres counters (`upload_counters`); increments are a single upsert.
#[derive(Clone)]
pub struct PgCounterStore {
    pool: PgPool,
}

impl PgCounterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CounterStore for PgCounterStore {
    async fn get(&self, key: &str) -> StoreResult<Option<i64>> {
        let row = sqlx::query(
            r#"
            SELECT value FROM upload_counters
            WHERE key = $1 AND expires_at > NOW()
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get::<i64, _>("value")))
    }

    async fn set(&self, key: &str, value: i64, ttl: Duration) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO upload_counters (key, value, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expiry(ttl))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(
        db.system = "postgresql",
        db.table = "upload_counters",
        db.operation = "upsert"
    ))]
    async fn increment(&self, key: &str, ttl: Duration) -> StoreResult<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO upload_counters (key, value, expires_at)
            VALUES ($1, 1, $2)
            ON CONFLICT (key) DO UPDATE
            SET value = CASE
                    WHEN upload_counters.expires_at > NOW() THEN upload_counters.value + 1
                    ELSE 1
                END,
                expires_at = EXCLUDED.expires_at
            RETURNING value
            "#,
        )
        .bind(key)
        .bind(expiry(ttl))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("value"))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM upload_counters WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn supports_atomic_increment(&self) -> bool {
        true
    }
}

/// Process-local counters.
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, (i64, Instant)>>,
    atomic: bool,
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            atomic: true,
        }
    }

    /// A store that reports no atomic increment, forcing callers onto their locking path.
    pub fn without_atomic_increment() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            atomic: false,
        }
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> StoreResult<Option<i64>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(*value)),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: i64, ttl: Duration) -> StoreResult<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), (value, instant_expiry(Instant::now(), ttl)));
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> StoreResult<i64> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let current = match entries.get(key) {
            Some((value, expires)) if *expires > now => *value,
            _ => 0,
        };
        let next = current + 1;
        entries.insert(key.to_string(), (next, instant_expiry(now, ttl)));
        Ok(next)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    fn supports_atomic_increment(&self) -> bool {
        self.atomic
    }
}
