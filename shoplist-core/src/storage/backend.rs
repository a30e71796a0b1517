//! The capability interface every physical storage mechanism implements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::record::StoredRecord;

/// The physical mechanisms, in fixed read-priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Durable keyed store, primary namespace.
    Durable,
    /// Durable keyed store, backup namespace.
    DurableBackup,
    /// Session-scoped keyed store.
    Session,
    /// Embedded document database.
    Document,
    /// Small signed cookies.
    Cookie,
    /// In-process memory cache of decoded values.
    Memory,
}

impl BackendKind {
    /// Every kind that is backed by a [`StorageBackend`], in read order.
    pub const PERSISTENT: [BackendKind; 5] = [
        BackendKind::Durable,
        BackendKind::DurableBackup,
        BackendKind::Session,
        BackendKind::Document,
        BackendKind::Cookie,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Durable => "durable",
            BackendKind::DurableBackup => "durable_backup",
            BackendKind::Session => "session",
            BackendKind::Document => "document",
            BackendKind::Cookie => "cookie",
            BackendKind::Memory => "memory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Options for a single facade write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Critical writes also go to cookies and are marked persistent.
    pub critical: bool,
}

impl WriteOptions {
    pub fn critical() -> Self {
        Self { critical: true }
    }
}

/// What a backend did with a write or removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The backend deliberately ignored the request (e.g. cookies on a
    /// non-critical write, or a backend found unavailable at probe time).
    Skipped,
}

/// Failure of one backend operation. Never escapes the facade.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{0} storage is unavailable")]
    Unavailable(BackendKind),

    #[error("{kind} quota exceeded: {needed} bytes needed, {limit} allowed")]
    QuotaExceeded {
        kind: BackendKind,
        needed: usize,
        limit: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{0}")]
    Other(String),
}

/// One physical storage mechanism.
///
/// Implementations own their serialization format and their physical key
/// namespace; callers only ever pass logical keys.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Harmless write/delete round trip. Returns false instead of failing.
    async fn probe(&self) -> bool;

    /// Returns the codec-encoded value stored for a logical key.
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    async fn set(
        &self,
        record: &StoredRecord,
        options: WriteOptions,
    ) -> Result<WriteOutcome, BackendError>;

    async fn remove(&self, key: &str) -> Result<(), BackendError>;

    /// Logical keys currently held in this backend's namespace.
    async fn keys(&self) -> Result<Vec<String>, BackendError>;

    /// Deletes everything in this backend's namespace, returning the count.
    async fn clear(&self) -> Result<usize, BackendError>;
}

/// Probe key written and removed by [`StorageBackend::probe`] implementations.
pub(crate) const PROBE_KEY: &str = "__probe__";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistent_order() {
        assert_eq!(BackendKind::PERSISTENT[0], BackendKind::Durable);
        assert_eq!(BackendKind::PERSISTENT[4], BackendKind::Cookie);
        assert!(!BackendKind::PERSISTENT.contains(&BackendKind::Memory));
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&BackendKind::DurableBackup).unwrap();
        assert_eq!(json, "\"durable_backup\"");
        assert_eq!(BackendKind::DurableBackup.to_string(), "durable_backup");
    }

    #[test]
    fn test_error_display() {
        let err = BackendError::QuotaExceeded {
            kind: BackendKind::Durable,
            needed: 10,
            limit: 5,
        };
        assert_eq!(
            err.to_string(),
            "durable quota exceeded: 10 bytes needed, 5 allowed"
        );
    }
}
