//! Shoplist Core Library
//!
//! Redundant client-side storage and the services built on it: a storage
//! facade mirroring every value across several backends, an obfuscation
//! codec, an anonymous user identity tracker and the application state
//! manager.

pub mod codec;
pub mod config;
pub mod identity;
pub mod lifecycle;
pub mod state;
pub mod storage;

pub use config::{StateConfig, StorageConfig};
pub use identity::{
    validate_user_name, ActivityEntry, HostEnvironment, IdentityError, NameRule, SessionInfo,
    UserDataExport, UserInfo, UserTracker, ValidationError,
};
pub use lifecycle::{
    ChannelEvents, HostEvents, Lifecycle, LifecycleEvent, LifecycleEventSource,
    LifecycleListener, ScriptedEvents,
};
pub use state::{
    ListItem, SetOptions, ShoppingList, StateBackup, StateError, StateEvent, StateManager,
    Subscription, SyncOutcome,
};
pub use storage::{
    BackendError, BackendKind, LocalStore, Storage, StorageBackend, StorageHealth, WriteOptions,
    WriteOutcome, WriteReport,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
