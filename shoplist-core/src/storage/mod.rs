//! Redundant client-side storage.
//!
//! A single facade ([`Storage`]) writes every value to all usable backends and
//! reads it back from the first one that still has it, so data survives the
//! host wiping any one mechanism.
//!
//! # Read order
//!
//! 1. memory cache (decoded values)
//! 2. durable store, primary namespace (`shoplist:`)
//! 3. durable store, backup namespace (`shoplist.backup:`)
//! 4. session store (`shoplist.session:`)
//! 5. document database
//! 6. cookies (critical writes only)

mod backend;
mod cookie;
mod document;
mod facade;
mod local;
mod record;
mod session;

pub use backend::{BackendError, BackendKind, StorageBackend, WriteOptions, WriteOutcome};
pub use cookie::{Cookie, CookieJar, COOKIE_JAR_FILE, DEFAULT_COOKIE_MAX_BYTES};
pub use document::{DocumentRecord, DocumentStore, DOCUMENT_DB_FILE};
pub use facade::{BackendResult, MemoryCache, Storage, StorageBuilder, StorageHealth, WriteReport};
pub use local::{
    DurableBackend, LocalStore, Namespace, StorageEvent, DEFAULT_QUOTA_BYTES, LOCAL_STORE_FILE,
};
pub use record::{Envelope, RecordMetadata, StoredRecord};
pub use session::SessionStore;

/// Prefix for primary physical keys. Writes under it signal other tabs.
pub const PRIMARY_PREFIX: &str = "shoplist:";
/// Prefix for the durable store's backup copies.
pub const BACKUP_PREFIX: &str = "shoplist.backup:";
/// Prefix for session-scoped keys.
pub const SESSION_PREFIX: &str = "shoplist.session:";

/// Logical storage keys shared by the state manager and identity tracker.
pub mod keys {
    pub const SHOPPING_LISTS: &str = "shopping_lists";
    pub const APP_THEME: &str = "app_theme";
    pub const UI_STATE: &str = "ui_state";
    pub const APP_STATE: &str = "app_state";
    pub const USER_STATE: &str = "user_state";
    pub const USER_ID: &str = "user_id";
    pub const USER_NAME: &str = "user_name";
    pub const USER_PREFERENCES: &str = "user_preferences";
    pub const USER_ACTIVITY: &str = "user_activity";
}

/// Keys removed by [`Storage::clear_corrupted_data`] before the prefix sweep.
pub const WELL_KNOWN_KEYS: [&str; 9] = [
    keys::SHOPPING_LISTS,
    keys::APP_THEME,
    keys::UI_STATE,
    keys::APP_STATE,
    keys::USER_STATE,
    keys::USER_ID,
    keys::USER_NAME,
    keys::USER_PREFERENCES,
    keys::USER_ACTIVITY,
];

/// Logical key of a primary-namespace physical key.
pub fn logical_key(physical: &str) -> Option<&str> {
    physical.strip_prefix(PRIMARY_PREFIX)
}
