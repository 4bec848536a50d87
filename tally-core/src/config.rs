//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/tally/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/tally/` (~/.config/tally/)
//! - Data: `$XDG_DATA_HOME/tally/` (~/.local/share/tally/)
//! - State/Logs: `$XDG_STATE_HOME/tally/` (~/.local/state/tally/)

use crate::archive::{ArchivePolicy, DEFAULT_GRACE_DAYS};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Storage backend selection
    #[serde(default)]
    pub storage: StorageConfig,

    /// Monthly rollover settings
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Remote collection endpoint (optional)
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Supported storage backends
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// JSON blob on disk, rolled over monthly
    #[default]
    File,
    /// SQLite table, events kept indefinitely
    Sqlite,
}

/// Storage configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// Which backend to use
    #[serde(default)]
    pub backend: StorageBackend,

    /// Override for the data directory
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    /// Directory holding the store files.
    pub fn data_dir(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(Config::data_dir)
    }
}

/// Archive configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveConfig {
    /// Days at the start of a month during which the sweep runs
    #[serde(default = "default_grace_days")]
    pub grace_days: u32,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            grace_days: default_grace_days(),
        }
    }
}

impl ArchiveConfig {
    pub fn validate(&self) -> Result<()> {
        if self.grace_days == 0 || self.grace_days > 28 {
            return Err(Error::Config(
                "archive.grace_days must be between 1 and 28".to_string(),
            ));
        }
        Ok(())
    }

    pub fn policy(&self) -> ArchivePolicy {
        ArchivePolicy {
            grace_days: self.grace_days,
        }
    }
}

fn default_grace_days() -> u32 {
    DEFAULT_GRACE_DAYS
}

/// Remote collection endpoint configuration
///
/// Used by `tally-track --remote` and `tally-report --remote` to talk to a
/// deployed analytics endpoint instead of the local store.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// Base URL (e.g., `https://analytics.example.com`)
    pub api_url: Option<String>,

    /// App id sent with every event
    pub app_id: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_client_timeout")]
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            app_id: None,
            timeout_secs: default_client_timeout(),
        }
    }
}

impl ClientConfig {
    /// Check if the client has everything it needs
    pub fn is_ready(&self) -> bool {
        self.api_url.is_some() && self.app_id.is_some()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        match self.api_url.as_deref() {
            None => {
                return Err(Error::Config(
                    "client.api_url is required for remote mode".to_string(),
                ))
            }
            Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                return Err(Error::Config(format!(
                    "client.api_url must be an http(s) URL, got '{}'",
                    url
                )))
            }
            Some(_) => {}
        }
        if self.app_id.as_deref().map_or(true, str::is_empty) {
            return Err(Error::Config(
                "client.app_id is required for remote mode".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "client.timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_client_timeout() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.archive.validate()?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/tally/config.toml` (~/.config/tally/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("tally").join("config.toml")
    }

    /// Returns the data directory path (for the store files)
    ///
    /// `$XDG_DATA_HOME/tally/` (~/.local/share/tally/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("tally")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/tally/` (~/.local/state/tally/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("tally")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
