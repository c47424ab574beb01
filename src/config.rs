//! # Configuration Management Module
//!
//! Persistent service settings stored in platform-appropriate locations.
//! Handles loading, saving, and providing defaults for configuration options.
//!
//! ## Settings
//! - `[provider]`: API base URL, token endpoint, user id and per-request timeout
//! - `[poll]`: poll period, sample window, cycle gating and refresh retry policy
//! - `[store]`: data directory, startup reset and sequence numbering mode
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/relax-signal/config.toml
//! - Linux: ~/.config/relax-signal/config.toml
//! - Windows: %APPDATA%\relax-signal\config.toml
//!
//! Credentials are not part of this file. They live in `credentials.toml`
//! inside the data directory so the token rotation never rewrites settings.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::ConfigError;
use crate::reconstruction::DEFAULT_WINDOW_SECS;

const APP_DIR: &str = "relax-signal";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub poll: PollConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_base: String,
    pub token_url: String,
    /// `-` means the user the tokens belong to
    pub user_id: String,
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.fitbit.com".to_string(),
            token_url: "https://api.fitbit.com/oauth2/token".to_string(),
            user_id: "-".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// How overlapping timer ticks are handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleMode {
    /// At most one cycle in flight; ticks that find one running are skipped
    #[default]
    Serialized,
    /// Every tick starts a cycle even if the previous one is still running
    Overlapping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: u64,
    pub window_secs: u32,
    pub cycle_mode: CycleMode,
    /// Retry the data request once with freshly rotated tokens
    pub retry_after_refresh: bool,
    /// Fixed jitter seed for reproducible runs
    pub jitter_seed: Option<u64>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            window_secs: DEFAULT_WINDOW_SECS,
            cycle_mode: CycleMode::default(),
            retry_after_refresh: false,
            jitter_seed: None,
        }
    }
}

/// How record sequence ids are assigned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceMode {
    /// Count and write under one lock
    #[default]
    Serialized,
    /// Count, then write; concurrent appends may collide
    Legacy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Defaults to the platform data directory
    pub data_dir: Option<PathBuf>,
    /// Start from an empty record store instead of the seeded one
    pub reset_on_start: bool,
    pub sequence_mode: SequenceMode,
}

impl Config {
    /// Get the path to the config file
    fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoDirectory)?;
        Ok(config_dir.join(APP_DIR).join("config.toml"))
    }

    /// Load config from the default location, or create default if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load config from `path`, writing defaults there if the file is missing
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config = toml::from_str(&contents)
                    .map_err(ConfigError::ParseFailed)?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(ConfigError::SerializeFailed)?;
        fs::write(path, toml_string)
            .map_err(ConfigError::WriteFailed)?;

        Ok(())
    }

    /// Directory holding `credentials.toml` and `records.json`
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.store.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|dir| dir.join(APP_DIR))
                .ok_or(ConfigError::NoDirectory),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll.interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.provider.request_timeout_secs.max(1))
    }
}
