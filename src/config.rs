use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use possync_core::{ConflictPolicy, Priority, DEFAULT_MAX_RETRIES, DEFAULT_TOMBSTONE_RETENTION_DAYS};

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
}

/// Queue, retention and dispatch tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Attempts before an operation is marked failed
    pub max_retries: u32,
    /// Priority for operations enqueued without an explicit one (1-3)
    pub default_priority: Priority,
    /// Days a tombstone is kept before it may be purged
    pub tombstone_retention_days: i64,
    /// Seconds an operation may stay in syncing before it is reclaimed
    pub dispatch_timeout_secs: u64,
    /// Operations dequeued per dispatch cycle
    pub batch_size: u32,
    /// Seconds between dispatch cycles
    pub poll_interval_secs: u64,
    pub conflict_policy: ConflictPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            default_priority: Priority::Medium,
            tombstone_retention_days: DEFAULT_TOMBSTONE_RETENTION_DAYS,
            dispatch_timeout_secs: 300,
            batch_size: 50,
            poll_interval_secs: 30,
            conflict_policy: ConflictPolicy::Manual,
        }
    }
}

impl SyncConfig {
    pub fn dispatch_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.dispatch_timeout_secs as i64)
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the SQLite database
    pub database_path: ConfigValue<PathBuf>,
    /// Device id override; when unset the id persisted next to the database is used
    pub device_id: ConfigValue<Option<String>>,
    /// User recorded in audit fields
    pub user: ConfigValue<String>,
    pub tenant_id: ConfigValue<String>,
    pub store_id: ConfigValue<String>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    pub sync: SyncConfig,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    device_id: Option<String>,
    user: Option<String>,
    tenant_id: Option<String>,
    store_id: Option<String>,
    sync: Option<SyncConfig>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut database_path = ConfigValue::new(
            Self::default_data_dir().join("possync.db"),
            ConfigSource::Default,
        );
        let mut device_id = ConfigValue::new(None, ConfigSource::Default);
        let mut user = ConfigValue::new("default".to_string(), ConfigSource::Default);
        let mut tenant_id = ConfigValue::new("default".to_string(), ConfigSource::Default);
        let mut store_id = ConfigValue::new("default".to_string(), ConfigSource::Default);
        let mut config_file = None;
        let mut sync = SyncConfig::default();

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(db_path) = file_config.database_path {
                // Resolve relative paths against config file's directory
                let resolved_path = if db_path.is_relative() {
                    path.parent().map(|p| p.join(&db_path)).unwrap_or(db_path)
                } else {
                    db_path
                };
                database_path = ConfigValue::new(resolved_path, ConfigSource::File);
            }
            if let Some(id) = file_config.device_id {
                device_id = ConfigValue::new(Some(id), ConfigSource::File);
            }
            if let Some(name) = file_config.user {
                user = ConfigValue::new(name, ConfigSource::File);
            }
            if let Some(tenant) = file_config.tenant_id {
                tenant_id = ConfigValue::new(tenant, ConfigSource::File);
            }
            if let Some(store) = file_config.store_id {
                store_id = ConfigValue::new(store, ConfigSource::File);
            }
            if let Some(sync_config) = file_config.sync {
                sync = sync_config;
            }
        }

        // Apply environment variable overrides
        if let Ok(db_path) = std::env::var("POSSYNC_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Ok(id) = std::env::var("POSSYNC_DEVICE_ID") {
            device_id = ConfigValue::new(Some(id), ConfigSource::Environment);
        }
        if let Ok(name) = std::env::var("POSSYNC_USER") {
            user = ConfigValue::new(name, ConfigSource::Environment);
        }
        if let Ok(tenant) = std::env::var("POSSYNC_TENANT_ID") {
            tenant_id = ConfigValue::new(tenant, ConfigSource::Environment);
        }
        if let Ok(store) = std::env::var("POSSYNC_STORE_ID") {
            store_id = ConfigValue::new(store, ConfigSource::Environment);
        }

        Ok(Self {
            database_path,
            device_id,
            user,
            tenant_id,
            store_id,
            config_file,
            sync,
        })
    }

    /// Directory holding the database and the persisted device id
    pub fn data_dir(&self) -> PathBuf {
        self.database_path
            .value
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/possync/
    /// - macOS: ~/Library/Application Support/possync/
    /// - Windows: %APPDATA%/possync/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("possync")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/possync/
    /// - macOS: ~/Library/Application Support/possync/
    /// - Windows: %APPDATA%/possync/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("possync")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
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
        }
    }
}

impl std::error::Error for ConfigError {}
