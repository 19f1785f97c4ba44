//! Configuration management for radarlivre.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "radarlivre";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "radarlivre.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `RADARLIVRE_`, sections split on `__`)
/// 2. TOML config file at `~/.config/radarlivre/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Observation ingest configuration.
    pub ingest: IngestConfig,
    /// Store call policy.
    pub store: StoreCallConfig,
    /// Query configuration.
    pub query: QueryConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/radarlivre/radarlivre.db`
    pub database_path: Option<PathBuf>,
    /// How long `SQLite` waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
}

/// Observation ingest configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Pattern an airplane ICAO identifier must match (after upper-casing).
    pub airplane_id_pattern: String,
    /// Pattern a flight callsign must match.
    pub callsign_pattern: String,
    /// Maximum length of each raw ADS-B message.
    pub max_raw_message_length: usize,
    /// Reject observations from collectors that are not registered.
    pub require_registered_collector: bool,
}

/// Deadlines and retries for store calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreCallConfig {
    /// Timeout for each store call, in milliseconds.
    pub call_timeout_ms: u64,
    /// Extra attempts for a state write that failed transiently.
    pub transient_retries: u32,
}

/// Query configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Observations fetched per page by history scans.
    pub history_page_size: usize,
    /// Default window for listing active airplanes, in seconds.
    pub active_window_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Will be resolved to default at runtime
            busy_timeout_ms: 5_000,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            airplane_id_pattern: r"^[0-9A-F]{6}$".to_string(),
            callsign_pattern: r"^[A-Za-z0-9]{1,16}$".to_string(),
            max_raw_message_length: 100,
            require_registered_collector: false,
        }
    }
}

impl Default for StoreCallConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5_000,
            transient_retries: 1,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            history_page_size: 500,
            active_window_secs: 300,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `RADARLIVRE_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("RADARLIVRE_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        for (name, pattern) in [
            ("airplane_id_pattern", &self.ingest.airplane_id_pattern),
            ("callsign_pattern", &self.ingest.callsign_pattern),
        ] {
            if regex::Regex::new(pattern).is_err() {
                return Err(Error::ConfigValidation {
                    message: format!("invalid regex pattern for {name}: {pattern}"),
                });
            }
        }

        if self.store.call_timeout_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "call_timeout_ms must be greater than 0".to_string(),
            });
        }

        if self.query.history_page_size == 0 {
            return Err(Error::ConfigValidation {
                message: "history_page_size must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the `SQLite` busy timeout as a Duration.
    #[must_use]
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.storage.busy_timeout_ms)
    }

    /// Get the store call timeout as a Duration.
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.store.call_timeout_ms)
    }

    /// Get the active-airplane window as a Duration.
    #[must_use]
    pub fn active_window(&self) -> Duration {
        Duration::from_secs(self.query.active_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.storage.database_path.is_none());
        assert_eq!(config.storage.busy_timeout_ms, 5_000);
        assert_eq!(config.ingest.max_raw_message_length, 100);
        assert!(!config.ingest.require_registered_collector);
        assert_eq!(config.store.transient_retries, 1);
        assert_eq!(config.query.history_page_size, 500);
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_regex() {
        let mut config = Config::default();
        config.ingest.callsign_pattern = "[invalid".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("callsign_pattern"));
    }

    #[test]
    fn test_validate_zero_call_timeout() {
        let mut config = Config::default();
        config.store.call_timeout_ms = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("call_timeout_ms"));
    }

    #[test]
    fn test_validate_zero_page_size() {
        let mut config = Config::default();
        config.query.history_page_size = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("history_page_size"));
    }

    #[test]
    fn test_database_path_default() {
        let config = Config::default();
        let path = config.database_path();

        assert!(path.to_string_lossy().contains("radarlivre.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));

        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_durations() {
        let config = Config::default();
        assert_eq!(config.busy_timeout(), Duration::from_secs(5));
        assert_eq!(config.call_timeout(), Duration::from_secs(5));
        assert_eq!(config.active_window(), Duration::from_secs(300));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("radarlivre"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), Config::default());
    }

    #[test]
    fn test_load_from_toml_file() {
        let path = std::env::temp_dir().join(format!(
            "radarlivre_config_test_{}.toml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            "[ingest]\nrequire_registered_collector = true\n\n[query]\nhistory_page_size = 50\n",
        )
        .unwrap();

        let config = Config::load_from(Some(path.clone())).unwrap();
        assert!(config.ingest.require_registered_collector);
        assert_eq!(config.query.history_page_size, 50);
        assert_eq!(config.store, StoreCallConfig::default());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let path = std::env::temp_dir().join(format!(
            "radarlivre_config_invalid_{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[store]\ncall_timeout_ms = 0\n").unwrap();

        let err = Config::load_from(Some(path.clone())).unwrap_err();
        assert!(matches!(err, crate::error::Error::ConfigValidation { .. }));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_ingest_config_deserialize() {
        let json = r#"{"max_raw_message_length": 28}"#;
        let ingest: IngestConfig = serde_json::from_str(json).unwrap();
        assert_eq!(ingest.max_raw_message_length, 28);
        assert_eq!(ingest.airplane_id_pattern, IngestConfig::default().airplane_id_pattern);
    }
}
