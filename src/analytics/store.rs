#![forbid(unsafe_code)]

// Durable analytics record - one keyed document holding every room's analytics,
// read once at startup and rewritten whole after each mutation.

use super::aggregator::StreamAnalytics;
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::Relaxed};
use std::sync::RwLock as StdRwLock;
use thiserror::Error;
use tracing::{debug, info};

/// Fixed name of the record holding all rooms.
pub const RECORD_NAME: &str = "stream-analytics";

pub type AnalyticsRecord = BTreeMap<String, StreamAnalytics>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed analytics record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// The stored mapping, empty when nothing was saved yet.
    async fn load(&self) -> Result<AnalyticsRecord, StoreError>;

    async fn save(&self, record: &AnalyticsRecord) -> Result<(), StoreError>;
}

/// JSON file `<dir>/stream-analytics.json`.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { path: dir.as_ref().join(format!("{RECORD_NAME}.json")) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AnalyticsStore for FileStore {
    async fn load(&self) -> Result<AnalyticsRecord, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No analytics record at {}, starting empty", self.path.display());
                Ok(AnalyticsRecord::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, record: &AnalyticsRecord) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let bytes = serde_json::to_vec(record)?;
        // Write then rename so a crash never leaves a truncated record behind.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Saved analytics for {} room(s) to {}", record.len(), self.path.display());
        Ok(())
    }
}

/// One row in `analytics_records`, keyed by the record name.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnalyticsStore for PgStore {
    async fn load(&self) -> Result<AnalyticsRecord, StoreError> {
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT value FROM analytics_records WHERE name = $1"
        )
        .bind(RECORD_NAME)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((value,)) => Ok(serde_json::from_str(&value)?),
            None => Ok(AnalyticsRecord::new()),
        }
    }

    async fn save(&self, record: &AnalyticsRecord) -> Result<(), StoreError> {
        let value = serde_json::to_string(record)?;
        sqlx::query(
            "INSERT INTO analytics_records (name, value, updated_at)
             VALUES ($1, $2, NOW())
             ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()"
        )
        .bind(RECORD_NAME)
        .bind(&value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// In-memory store. Saves can be made to fail to exercise error paths.
#[derive(Default)]
pub struct MemoryStore {
    record: StdRwLock<AnalyticsRecord>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: AnalyticsRecord) -> Self {
        Self { record: StdRwLock::new(record), ..Self::default() }
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Relaxed);
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Relaxed)
    }

    pub fn record(&self) -> AnalyticsRecord {
        self.record.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl AnalyticsStore for MemoryStore {
    async fn load(&self) -> Result<AnalyticsRecord, StoreError> {
        Ok(self.record())
    }

    async fn save(&self, record: &AnalyticsRecord) -> Result<(), StoreError> {
        if self.fail_saves.load(Relaxed) {
            return Err(StoreError::Unavailable("saves disabled".to_string()));
        }
        *self.record.write().unwrap_or_else(|e| e.into_inner()) = record.clone();
        self.saves.fetch_add(1, Relaxed);
        Ok(())
    }
}
