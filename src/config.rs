use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use ecocatalyst_core::Calendar;

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

/// Backend of the local persistent cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalStoreKind {
    /// One row per namespace in the SQLite database at `database_path`
    #[default]
    Sqlite,
    /// One JSON file per namespace in the `local_store` directory next to
    /// `database_path`
    Files,
}

impl std::fmt::Display for LocalStoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocalStoreKind::Sqlite => write!(f, "sqlite"),
            LocalStoreKind::Files => write!(f, "files"),
        }
    }
}

impl std::str::FromStr for LocalStoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(LocalStoreKind::Sqlite),
            "files" => Ok(LocalStoreKind::Files),
            _ => Err(format!(
                "Invalid local store '{}'. Valid options: sqlite, files",
                s
            )),
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

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// SQLite file backing the local store
    pub database_path: ConfigValue<PathBuf>,
    /// Which local store backend to use
    pub local_store: ConfigValue<LocalStoreKind>,
    /// Sync server URL; local-only when unset
    pub server_url: ConfigValue<Option<String>>,
    /// Signed-in user; anonymous when unset
    pub user_id: ConfigValue<Option<String>>,
    /// Offset of the local calendar day from UTC
    pub utc_offset_minutes: ConfigValue<i32>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    local_store: Option<LocalStoreKind>,
    server_url: Option<String>,
    user_id: Option<String>,
    utc_offset_minutes: Option<i32>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut database_path = ConfigValue::new(
            Self::default_data_dir().join("ecocatalyst.db"),
            ConfigSource::Default,
        );
        let mut local_store = ConfigValue::new(LocalStoreKind::default(), ConfigSource::Default);
        let mut server_url = ConfigValue::new(None, ConfigSource::Default);
        let mut user_id = ConfigValue::new(None, ConfigSource::Default);
        let mut utc_offset_minutes = ConfigValue::new(0, ConfigSource::Default);
        let mut config_file = None;

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(db_path) = file_config.database_path {
                // Relative paths are relative to the config file
                let resolved_path = if db_path.is_relative() {
                    path.parent().map(|p| p.join(&db_path)).unwrap_or(db_path)
                } else {
                    db_path
                };
                database_path = ConfigValue::new(resolved_path, ConfigSource::File);
            }
            if let Some(kind) = file_config.local_store {
                local_store = ConfigValue::new(kind, ConfigSource::File);
            }
            if let Some(url) = file_config.server_url {
                server_url = ConfigValue::new(Some(url), ConfigSource::File);
            }
            if let Some(user) = file_config.user_id {
                user_id = ConfigValue::new(Some(user), ConfigSource::File);
            }
            if let Some(offset) = file_config.utc_offset_minutes {
                utc_offset_minutes = ConfigValue::new(offset, ConfigSource::File);
            }
        }

        if let Ok(db_path) = std::env::var("ECOCATALYST_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Ok(kind) = std::env::var("ECOCATALYST_LOCAL_STORE") {
            let parsed = kind
                .parse()
                .map_err(|_| ConfigError::InvalidValue("ECOCATALYST_LOCAL_STORE", kind))?;
            local_store = ConfigValue::new(parsed, ConfigSource::Environment);
        }
        if let Ok(url) = std::env::var("ECOCATALYST_SERVER_URL") {
            server_url = ConfigValue::new(Some(url), ConfigSource::Environment);
        }
        if let Ok(user) = std::env::var("ECOCATALYST_USER_ID") {
            user_id = ConfigValue::new(Some(user), ConfigSource::Environment);
        }
        if let Ok(offset) = std::env::var("ECOCATALYST_UTC_OFFSET_MINUTES") {
            let minutes = offset
                .parse()
                .map_err(|_| ConfigError::InvalidValue("ECOCATALYST_UTC_OFFSET_MINUTES", offset))?;
            utc_offset_minutes = ConfigValue::new(minutes, ConfigSource::Environment);
        }

        let config = Self {
            database_path,
            local_store,
            server_url,
            user_id,
            utc_offset_minutes,
            config_file,
        };
        config.calendar()?;
        Ok(config)
    }

    /// Calendar at the configured offset.
    pub fn calendar(&self) -> Result<Calendar, ConfigError> {
        Calendar::from_offset_minutes(self.utc_offset_minutes.value).ok_or_else(|| {
            ConfigError::InvalidValue(
                "utc_offset_minutes",
                self.utc_offset_minutes.value.to_string(),
            )
        })
    }

    /// Directory of the `files` local store.
    pub fn local_store_dir(&self) -> PathBuf {
        self.database_path
            .value
            .parent()
            .map(|dir| dir.join("local_store"))
            .unwrap_or_else(|| PathBuf::from("local_store"))
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/ecocatalyst/
    /// - macOS: ~/Library/Application Support/ecocatalyst/
    /// - Windows: %APPDATA%/ecocatalyst/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ecocatalyst")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/ecocatalyst/
    /// - macOS: ~/Library/Application Support/ecocatalyst/
    /// - Windows: %APPDATA%/ecocatalyst/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ecocatalyst")
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
    InvalidValue(&'static str, String),
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
            ConfigError::InvalidValue(key, value) => {
                write!(f, "Invalid value '{}' for {}", value, key)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
