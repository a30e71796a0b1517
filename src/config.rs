use serde::{Deserialize, Serialize};
use shoplist_core::{StateConfig, StorageConfig};
use std::path::PathBuf;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }

    fn from_file(current: Self, value: Option<T>) -> Self {
        match value {
            Some(value) => Self::new(value, ConfigSource::File),
            None => current,
        }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Directory holding the durable store, document database and cookie jar
    pub data_dir: ConfigValue<PathBuf>,
    /// Seconds between background state syncs
    pub sync_interval_secs: ConfigValue<u64>,
    /// Seconds between identity flushes
    pub flush_interval_secs: ConfigValue<u64>,
    /// Durable store quota in bytes
    pub quota_bytes: ConfigValue<usize>,
    pub enable_cookies: ConfigValue<bool>,
    pub enable_documents: ConfigValue<bool>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    data_dir: Option<PathBuf>,
    sync_interval_secs: Option<u64>,
    flush_interval_secs: Option<u64>,
    quota_bytes: Option<usize>,
    enable_cookies: Option<bool>,
    enable_documents: Option<bool>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let storage_defaults = StorageConfig::new(Self::default_data_dir());
        let state_defaults = StateConfig::default();

        // Start with defaults
        let mut config = Self {
            data_dir: ConfigValue::new(storage_defaults.data_dir, ConfigSource::Default),
            sync_interval_secs: ConfigValue::new(
                state_defaults.sync_interval_secs,
                ConfigSource::Default,
            ),
            flush_interval_secs: ConfigValue::new(
                state_defaults.flush_interval_secs,
                ConfigSource::Default,
            ),
            quota_bytes: ConfigValue::new(storage_defaults.quota_bytes, ConfigSource::Default),
            enable_cookies: ConfigValue::new(
                storage_defaults.enable_cookies,
                ConfigSource::Default,
            ),
            enable_documents: ConfigValue::new(
                storage_defaults.enable_documents,
                ConfigSource::Default,
            ),
            config_file: None,
        };

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            // Resolve relative paths against config file's directory
            let data_dir = file_config.data_dir.map(|dir| {
                if dir.is_relative() {
                    path.parent().map(|p| p.join(&dir)).unwrap_or(dir)
                } else {
                    dir
                }
            });

            config.data_dir = ConfigValue::from_file(config.data_dir, data_dir);
            config.sync_interval_secs =
                ConfigValue::from_file(config.sync_interval_secs, file_config.sync_interval_secs);
            config.flush_interval_secs = ConfigValue::from_file(
                config.flush_interval_secs,
                file_config.flush_interval_secs,
            );
            config.quota_bytes = ConfigValue::from_file(config.quota_bytes, file_config.quota_bytes);
            config.enable_cookies =
                ConfigValue::from_file(config.enable_cookies, file_config.enable_cookies);
            config.enable_documents =
                ConfigValue::from_file(config.enable_documents, file_config.enable_documents);
            config.config_file = Some(path);
        }

        // Apply environment variable overrides
        if let Ok(dir) = std::env::var("SHOPLIST_DATA_DIR") {
            config.data_dir = ConfigValue::new(PathBuf::from(dir), ConfigSource::Environment);
        }
        if let Some(secs) = parse_env("SHOPLIST_SYNC_INTERVAL_SECS")? {
            config.sync_interval_secs = ConfigValue::new(secs, ConfigSource::Environment);
        }
        if let Some(bytes) = parse_env("SHOPLIST_QUOTA_BYTES")? {
            config.quota_bytes = ConfigValue::new(bytes, ConfigSource::Environment);
        }

        Ok(config)
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            data_dir: self.data_dir.value.clone(),
            quota_bytes: self.quota_bytes.value,
            enable_cookies: self.enable_cookies.value,
            enable_documents: self.enable_documents.value,
            ..StorageConfig::new(&self.data_dir.value)
        }
    }

    pub fn state_config(&self) -> StateConfig {
        StateConfig {
            sync_interval_secs: self.sync_interval_secs.value,
            flush_interval_secs: self.flush_interval_secs.value,
        }
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/shoplist/
    /// - macOS: ~/Library/Application Support/shoplist/
    /// - Windows: %APPDATA%/shoplist/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shoplist")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/shoplist/
    /// - macOS: ~/Library/Application Support/shoplist/
    /// - Windows: %APPDATA%/shoplist/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shoplist")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

fn parse_env<T: std::str::FromStr>(var: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv(var.to_string(), raw)),
        Err(_) => Ok(None),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidEnv(String, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidEnv(var, value) => {
                write!(f, "Invalid value for {}: '{}'", var, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = Config::load(Some(config_path)).unwrap();
        assert!(config.data_dir.value.ends_with("shoplist"));
        assert_eq!(config.flush_interval_secs.value, 60);
        assert_eq!(config.flush_interval_secs.source, ConfigSource::Default);
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "data_dir: /custom/shoplist").unwrap();
        writeln!(file, "flush_interval_secs: 15").unwrap();
        writeln!(file, "enable_cookies: false").unwrap();

        let config = Config::load(Some(config_path.clone())).unwrap();
        assert_eq!(config.data_dir.value, PathBuf::from("/custom/shoplist"));
        assert_eq!(config.data_dir.source, ConfigSource::File);
        assert_eq!(config.flush_interval_secs.value, 15);
        assert!(!config.enable_cookies.value);
        assert!(config.enable_documents.value);
        assert_eq!(config.config_file, Some(config_path));
    }

    #[test]
    fn test_relative_data_dir_resolves_against_config_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::write(&config_path, "data_dir: data\n").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.data_dir.value, temp_dir.path().join("data"));
    }

    #[test]
    fn test_env_var_overrides_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::write(&config_path, "sync_interval_secs: 10\n").unwrap();

        std::env::set_var("SHOPLIST_SYNC_INTERVAL_SECS", "45");
        let config = Config::load(Some(config_path));
        std::env::remove_var("SHOPLIST_SYNC_INTERVAL_SECS");

        let config = config.unwrap();
        assert_eq!(config.sync_interval_secs.value, 45);
        assert_eq!(config.sync_interval_secs.source, ConfigSource::Environment);
    }

    #[test]
    fn test_invalid_env_value() {
        std::env::set_var("SHOPLIST_TEST_INVALID_NUMBER", "lots");
        let result = parse_env::<usize>("SHOPLIST_TEST_INVALID_NUMBER");
        std::env::remove_var("SHOPLIST_TEST_INVALID_NUMBER");

        assert!(matches!(result, Err(ConfigError::InvalidEnv(_, _))));
        assert!(matches!(parse_env::<usize>("SHOPLIST_TEST_UNSET"), Ok(None)));
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::write(&config_path, "invalid: yaml: content: [").unwrap();

        let result = Config::load(Some(config_path));
        assert!(matches!(result, Err(ConfigError::ParseError(_, _))));
    }

    #[test]
    fn test_core_configs() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::write(&config_path, "data_dir: /d\nsync_interval_secs: 5\n").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.storage_config().data_dir, PathBuf::from("/d"));
        assert_eq!(config.storage_config().cookie_max_bytes, 4096);
        assert_eq!(config.state_config().sync_interval_secs, 5);
    }
}
