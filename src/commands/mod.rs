mod backup;
mod config_cmd;
mod list;
mod storage_cmd;
mod theme;
mod user;
mod watch;

pub use backup::BackupCommand;
pub use config_cmd::ConfigCommand;
pub use list::ListCommand;
pub use storage_cmd::StorageCommand;
pub use theme::ThemeCommand;
pub use user::UserCommand;
pub use watch::WatchCommand;

use clap::ValueEnum;
use serde_json::Value;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Reads a command-line value as JSON, falling back to a plain string.
pub(crate) fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// One-line rendering of a value: strings without quotes, the rest as JSON.
pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
