//! Pool setup and store construction

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use super::{
    CleanupStateStore, CounterStore, MemoryCleanupStateStore, MemoryCounterStore,
    MemoryUploadRecordStore, PgCleanupStateStore, PgCounterStore, PgUploadRecordStore,
    UploadRecordStore,
};

/// The three stores the pipeline depends on.
#[derive(Clone)]
pub struct Stores {
    pub counters: Arc<dyn CounterStore>,
    pub cleanup_states: Arc<dyn CleanupStateStore>,
    pub uploads: Arc<dyn UploadRecordStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            counters: Arc::new(MemoryCounterStore::new()),
            cleanup_states: Arc::new(MemoryCleanupStateStore::new()),
            uploads: Arc::new(MemoryUploadRecordStore::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            counters: Arc::new(PgCounterStore::new(pool.clone())),
            cleanup_states: Arc::new(PgCleanupStateStore::new(pool.clone())),
            uploads: Arc::new(PgUploadRecordStore::new(pool)),
        }
    }
}

/// Connect to Postgres and apply pending migrations.
pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    tracing::info!("Database connected and migrations applied");
    Ok(pool)
}

/// Postgres-backed stores when a database URL is configured, in-memory ones otherwise.
pub async fn create_stores(database_url: Option<&str>) -> anyhow::Result<Stores> {
    match database_url {
        Some(url) => Ok(Stores::postgres(connect(url).await?)),
        None => {
            tracing::warn!(
                "DATABASE_URL not set, using in-memory stores (state is lost on restart)"
            );
            Ok(Stores::in_memory())
        }
    }
}
