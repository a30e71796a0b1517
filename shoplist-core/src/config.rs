//! Configuration for the storage facade and the services built on it.
//!
//! All fields have defaults, so a config file only needs the values it
//! overrides:
//!
//! ```
//! use shoplist_core::{StateConfig, StorageConfig};
//!
//! let storage: StorageConfig = serde_json::from_str(r#"{"data_dir": "/tmp/shoplist"}"#).unwrap();
//! assert!(storage.enable_cookies);
//!
//! let state = StateConfig::default();
//! assert_eq!(state.sync_interval_secs, 30);
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::storage::{DEFAULT_COOKIE_MAX_BYTES, DEFAULT_QUOTA_BYTES};

/// Where and how the standard backends are opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the durable store, document database and cookie jar.
    pub data_dir: PathBuf,

    /// Durable store quota in bytes (default: 5 MiB)
    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: usize,

    /// Per-cookie size limit in bytes (default: 4096)
    #[serde(default = "default_cookie_max_bytes")]
    pub cookie_max_bytes: usize,

    #[serde(default = "default_true")]
    pub enable_cookies: bool,

    #[serde(default = "default_true")]
    pub enable_documents: bool,
}

impl StorageConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            quota_bytes: default_quota_bytes(),
            cookie_max_bytes: default_cookie_max_bytes(),
            enable_cookies: true,
            enable_documents: true,
        }
    }
}

/// Timers driving background persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Interval between periodic state syncs (default: 30s)
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Interval between identity flushes (default: 60s)
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

impl StateConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: default_sync_interval_secs(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

fn default_quota_bytes() -> usize {
    DEFAULT_QUOTA_BYTES
}

fn default_cookie_max_bytes() -> usize {
    DEFAULT_COOKIE_MAX_BYTES
}

fn default_true() -> bool {
    true
}

fn default_sync_interval_secs() -> u64 {
    30
}

fn default_flush_interval_secs() -> u64 {
    60
}
