//! Application state held in memory and mirrored to storage.
//!
//! Each state key maps to one storage key:
//!
//! | state key | storage key      |
//! |-----------|------------------|
//! | `lists`   | `shopping_lists` |
//! | `theme`   | `app_theme`      |
//! | `ui`      | `ui_state`       |
//! | `app`     | `app_state`      |
//! | `user`    | `user_state`     |
//! | other `k` | `state_k`        |

mod lists;
mod manager;
mod queue;
mod subscribers;

pub use lists::{ListItem, ShoppingList};
pub use manager::{
    SetOptions, StateBackup, StateError, StateManager, SyncOutcome, BACKUP_VERSION,
    THEME_EXPORT_VERSION,
};
pub use queue::{SyncQueue, SyncQueueEntry};
pub use subscribers::{Callback, StateEvent, Subscription, ALL_KEYS};

use crate::storage::keys;

pub mod state_keys {
    pub const APP: &str = "app";
    pub const LISTS: &str = "lists";
    pub const THEME: &str = "theme";
    pub const UI: &str = "ui";
    pub const USER: &str = "user";

    pub const ALL: [&str; 5] = [APP, LISTS, THEME, UI, USER];
}

const CUSTOM_PREFIX: &str = "state_";

/// Storage key holding a state key's value.
pub fn storage_key(state_key: &str) -> String {
    match state_key {
        state_keys::LISTS => keys::SHOPPING_LISTS.to_string(),
        state_keys::THEME => keys::APP_THEME.to_string(),
        state_keys::UI => keys::UI_STATE.to_string(),
        state_keys::APP => keys::APP_STATE.to_string(),
        state_keys::USER => keys::USER_STATE.to_string(),
        other => format!("{}{}", CUSTOM_PREFIX, other),
    }
}

/// The state key stored under a storage key, if any.
pub fn state_key_for(storage_key: &str) -> Option<String> {
    let key = match storage_key {
        keys::SHOPPING_LISTS => state_keys::LISTS,
        keys::APP_THEME => state_keys::THEME,
        keys::UI_STATE => state_keys::UI,
        keys::APP_STATE => state_keys::APP,
        keys::USER_STATE => state_keys::USER,
        other => return other.strip_prefix(CUSTOM_PREFIX).map(str::to_string),
    };
    Some(key.to_string())
}
