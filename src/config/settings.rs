//! Application settings and configuration types.
//!
//! Settings are persisted to `~/.config/spamguard/settings.json` (or the
//! platform equivalent) and loaded at startup. OAuth credentials are not part
//! of the settings; they live in the system keychain.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::DEFAULT_LABEL_PREFIX;

/// Errors loading or saving settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No home directory could be determined for the config path.
    #[error("could not determine a config directory")]
    NoConfigDir,

    /// Reading or writing the settings file failed.
    #[error("settings file {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON for [`Settings`].
    #[error("invalid settings file {path}: {source}")]
    Parse {
        /// File involved.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level application settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// College directory service.
    pub directory: DirectorySettings,
    /// Gmail account selection.
    pub gmail: GmailSettings,
    /// Batch sizes and pacing for remote calls.
    pub limits: LimitSettings,
    /// Prefix of the provisioning label name.
    pub label_prefix: LabelPrefix,
}

/// Directory service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySettings {
    /// Root URL of the directory REST service.
    pub base_url: String,
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/".to_string(),
        }
    }
}

/// Gmail account configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GmailSettings {
    /// Account name the keychain credentials are stored under.
    pub account: String,
    /// Keychain service name.
    pub keychain_service: String,
}

impl Default for GmailSettings {
    fn default() -> Self {
        Self {
            account: String::new(),
            keychain_service: "spamguard".to_string(),
        }
    }
}

/// Batch sizes and pacing for remote calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    /// Search page size (the service caps it at 500).
    pub page_size: u32,
    /// Metadata fetches issued together.
    pub metadata_group_size: usize,
    /// Pause between metadata groups in milliseconds.
    pub metadata_group_delay_ms: u64,
    /// Filter creations issued together.
    pub filter_group_size: usize,
    /// Sender addresses per filter (the service caps it at 30).
    pub addresses_per_filter: usize,
    /// Message ids per bulk modification (the service caps it at 1000).
    pub modify_chunk_size: usize,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            page_size: 500,
            metadata_group_size: 50,
            metadata_group_delay_ms: 1000,
            filter_group_size: 25,
            addresses_per_filter: 30,
            modify_chunk_size: 1000,
        }
    }
}

impl LimitSettings {
    /// Pause between metadata groups.
    pub fn metadata_group_delay(&self) -> Duration {
        Duration::from_millis(self.metadata_group_delay_ms)
    }
}

/// Provisioning label prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelPrefix(pub String);

impl Default for LabelPrefix {
    fn default() -> Self {
        Self(DEFAULT_LABEL_PREFIX.to_string())
    }
}

impl LabelPrefix {
    /// The prefix as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Settings {
    /// Default settings file location.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dirs = directories::ProjectDirs::from("org", "collegespamguard", "spamguard")
            .ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("settings.json"))
    }

    /// Loads settings from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No settings file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads settings from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path()?)
    }

    /// Writes settings to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(io_err)
    }
}
