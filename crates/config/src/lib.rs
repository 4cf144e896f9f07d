//! Configuration loading, validation, and management for NTBridge.
//!
//! Loads configuration from `~/.ntbridge/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default floor of the short-id cursor: close to `i32::MIN` so nearly the
/// whole signed range is available before the counter could wrap.
pub const DEFAULT_SHORT_ID_FLOOR: i32 = -2_147_483_640;

/// The root configuration structure.
///
/// Maps directly to `~/.ntbridge/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Log every intercepted call and frame
    #[serde(default)]
    pub hook_log: bool,

    /// Correlator settings
    #[serde(default)]
    pub call: CallConfig,

    /// Message identity store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Snapshot-diff notice settings
    #[serde(default)]
    pub notice: NoticeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// Timeout applied when a call site does not pick its own
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Capacity of the raw inbound event stream
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_timeout_ms() -> u64 {
    5000
}
fn default_event_buffer() -> usize {
    1024
}

impl CallConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// Directory holding one store per account
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Whole-cache clear interval
    #[serde(default = "default_cache_clear_interval_secs")]
    pub cache_clear_interval_secs: u64,

    /// Backoff between store initialization attempts
    #[serde(default = "default_init_retry_ms")]
    pub init_retry_ms: u64,

    /// Cursor value used when no cursor has been persisted yet
    #[serde(default = "default_short_id_floor")]
    pub short_id_floor: i32,
}

fn default_store_backend() -> String {
    "sqlite".into()
}
fn default_data_dir() -> PathBuf {
    BridgeConfig::config_dir().join("data")
}
fn default_cache_clear_interval_secs() -> u64 {
    600
}
fn default_init_retry_ms() -> u64 {
    300
}
fn default_short_id_floor() -> i32 {
    DEFAULT_SHORT_ID_FLOOR
}

impl StoreConfig {
    pub fn cache_clear_interval(&self) -> Duration {
        Duration::from_secs(self.cache_clear_interval_secs)
    }

    pub fn init_retry(&self) -> Duration {
        Duration::from_millis(self.init_retry_ms)
    }

    /// Path of the store file for one account.
    pub fn account_db_path(&self, uin: &str) -> PathBuf {
        self.data_dir.join(format!("msg_{uin}.sqlite"))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            data_dir: default_data_dir(),
            cache_clear_interval_secs: default_cache_clear_interval_secs(),
            init_retry_ms: default_init_retry_ms(),
            short_id_floor: default_short_id_floor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoticeConfig {
    /// Skip member-left diffing in groups where the local account is admin or owner
    #[serde(default = "default_true")]
    pub suppress_when_privileged: bool,

    /// Capacity of the notice bus
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    /// Re-activate chats the host deactivates
    #[serde(default = "default_true")]
    pub keep_chats_active: bool,
}

fn default_true() -> bool {
    true
}
fn default_bus_capacity() -> usize {
    256
}

impl Default for NoticeConfig {
    fn default() -> Self {
        Self {
            suppress_when_privileged: true,
            bus_capacity: default_bus_capacity(),
            keep_chats_active: true,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from the default path (~/.ntbridge/config.toml).
    ///
    /// Environment overrides:
    /// - `NTBRIDGE_DATA_DIR`
    /// - `NTBRIDGE_HOOK_LOG` (`1`/`true` to enable)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(dir) = std::env::var("NTBRIDGE_DATA_DIR") {
            config.store.data_dir = PathBuf::from(dir);
        }

        if let Ok(flag) = std::env::var("NTBRIDGE_HOOK_LOG") {
            config.hook_log = matches!(flag.as_str(), "1" | "true" | "yes");
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ntbridge")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.call.default_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "call.default_timeout_ms must be > 0".into(),
            ));
        }

        if self.call.event_buffer == 0 || self.notice.bus_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "call.event_buffer and notice.bus_capacity must be > 0".into(),
            ));
        }

        if self.store.cache_clear_interval_secs == 0 || self.store.init_retry_ms == 0 {
            return Err(ConfigError::ValidationError(
                "store.cache_clear_interval_secs and store.init_retry_ms must be > 0".into(),
            ));
        }

        if !matches!(self.store.backend.as_str(), "sqlite" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "store.backend must be \"sqlite\" or \"memory\", got \"{}\"",
                self.store.backend
            )));
        }

        if self.store.short_id_floor == i32::MAX {
            return Err(ConfigError::ValidationError(
                "store.short_id_floor leaves no room for allocation".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            hook_log: false,
            call: CallConfig::default(),
            store: StoreConfig::default(),
            notice: NoticeConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
