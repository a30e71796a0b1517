//! Embedded document database, the native stand-in for IndexedDB.
//!
//! Records are stored as structured rows rather than JSON envelopes, so the
//! metadata can be queried directly.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use super::backend::{BackendError, BackendKind, StorageBackend, WriteOptions, WriteOutcome, PROBE_KEY};
use super::record::StoredRecord;

/// File name of the document database inside the data directory.
pub const DOCUMENT_DB_FILE: &str = "documents.db";

#[derive(sqlx::FromRow)]
struct RecordRow {
    value: String,
}

/// Structured record as read back from the database.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DocumentRecord {
    pub key: String,
    pub value: String,
    pub timestamp: i64,
    pub version: String,
    pub origin_agent: String,
    pub is_persistent: bool,
}

/// SQLite-backed document store. Cloning shares the connection pool.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    /// Opens (or creates) the database file inside `data_dir` and runs migrations.
    pub async fn open(data_dir: &Path) -> Result<Self, BackendError> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(DOCUMENT_DB_FILE);
        let db_url = format!("sqlite:{}?mode=rwc", path.display());

        let options = SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// A private in-memory database.
    ///
    /// Uses a single connection that is never recycled, since every SQLite
    /// memory connection is its own database.
    pub async fn in_memory() -> Result<Self, BackendError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, BackendError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Reads the full structured record for a key.
    pub async fn record(&self, key: &str) -> Result<Option<DocumentRecord>, BackendError> {
        let row = sqlx::query_as::<_, DocumentRecord>(
            "SELECT key, value, timestamp, version, origin_agent, is_persistent FROM records WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl StorageBackend for DocumentStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    async fn probe(&self) -> bool {
        let record = StoredRecord::new(PROBE_KEY, "1", "probe", false);
        let ok = self.set(&record, WriteOptions::default()).await.is_ok()
            && self.remove(PROBE_KEY).await.is_ok();
        if !ok {
            tracing::warn!("document storage probe failed");
        }
        ok
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let row: Option<RecordRow> = sqlx::query_as("SELECT value FROM records WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.value))
    }

    async fn set(
        &self,
        record: &StoredRecord,
        _options: WriteOptions,
    ) -> Result<WriteOutcome, BackendError> {
        sqlx::query(
            r#"
            INSERT INTO records (key, value, timestamp, version, origin_agent, is_persistent)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                timestamp = excluded.timestamp,
                version = excluded.version,
                origin_agent = excluded.origin_agent,
                is_persistent = excluded.is_persistent
            "#,
        )
        .bind(&record.key)
        .bind(&record.encoded_value)
        .bind(record.metadata.timestamp)
        .bind(&record.metadata.format_version)
        .bind(&record.metadata.origin_agent)
        .bind(record.metadata.is_persistent)
        .execute(&self.pool)
        .await?;
        Ok(WriteOutcome::Written)
    }

    async fn remove(&self, key: &str) -> Result<(), BackendError> {
        sqlx::query("DELETE FROM records WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, BackendError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT key FROM records ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(k,)| k).collect())
    }

    async fn clear(&self) -> Result<usize, BackendError> {
        let result = sqlx::query("DELETE FROM records")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}
