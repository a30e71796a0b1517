//! Anonymous user identity, display name, preferences and activity history.

mod session;
mod tracker;
mod validation;

pub use session::{generate_id, ActivityEntry, HostEnvironment, SessionInfo};
pub use tracker::{
    IdentityError, UserDataExport, UserInfo, UserTracker, ACTIVITY_LOG_CAP,
    EXPORT_ACTIVITY_ENTRIES,
};
pub use validation::{
    validate_user_name, NameRule, ValidationError, NAME_MAX_CHARS, NAME_MIN_CHARS,
    RESERVED_WORDS,
};
