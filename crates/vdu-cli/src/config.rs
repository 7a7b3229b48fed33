//! Configuration file and local state.
//!
//! `config.toml` lives in the platform config directory
//! (`~/.config/vdu/config.toml` on Linux). `VDU_CONFIG_DIR` overrides the
//! directory for both the config file and the state file.
//!
//! ```toml
//! [server]
//! url = "https://vdu.example:4443"
//!
//! [drive]
//! letter = "V:"
//! require_login = true
//!
//! [refresh]
//! threshold = "3s"
//! backoff = "4s"
//! ```

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vdu_session::RefreshPolicy;

pub const CONFIG_DIR_ENV: &str = "VDU_CONFIG_DIR";
const CONFIG_FILE: &str = "config.toml";
const STATE_FILE: &str = "state.json";

/// Directory holding `config.toml` and `state.json`.
pub fn config_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    ProjectDirs::from("", "", "vdu")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .context("Could not determine the configuration directory")
}

fn default_cache_dir() -> PathBuf {
    ProjectDirs::from("", "", "vdu").map_or_else(
        || std::env::temp_dir().join("vdu-cache"),
        |dirs| dirs.cache_dir().join("volume"),
    )
}

fn default_drive_root() -> PathBuf {
    std::env::temp_dir().join("vdu-drives")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriveConfig {
    /// Drive letter (`"V:"`) or mount directory.
    pub letter: String,
    /// Directory under which drive letters are mounted.
    pub drive_root: PathBuf,
    /// Backing directory of the volume.
    pub cache_dir: PathBuf,
    pub volume_label: String,
    /// Deny filesystem access while logged out.
    pub require_login: bool,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            letter: "V:".to_string(),
            drive_root: default_drive_root(),
            cache_dir: default_cache_dir(),
            volume_label: vdu_provider::DEFAULT_VOLUME_LABEL.to_string(),
            require_login: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefreshConfig {
    #[serde(with = "humantime_serde")]
    pub threshold: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        let policy = RefreshPolicy::default();
        Self {
            threshold: policy.threshold,
            poll_interval: policy.poll_interval,
            backoff: policy.backoff,
            request_timeout: policy.request_timeout,
        }
    }
}

impl From<RefreshConfig> for RefreshPolicy {
    fn from(config: RefreshConfig) -> Self {
        RefreshPolicy::default()
            .threshold(config.threshold)
            .poll_interval(config.poll_interval)
            .backoff(config.backoff)
            .request_timeout(config.request_timeout)
    }
}

/// Contents of `config.toml`. Every section and key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub drive: DriveConfig,
    pub refresh: RefreshConfig,
}

impl Config {
    /// Loads `config.toml` from [`config_dir`]. A missing file yields the
    /// defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_dir()?.join(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text)
                .with_context(|| format!("Invalid configuration file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No configuration file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// The server to talk to: the flag, then the config file, then the last
    /// server used.
    pub fn server_url(&self, flag: Option<&str>, state: &State) -> Option<String> {
        flag.map(str::to_string)
            .or_else(|| self.server.url.clone())
            .or_else(|| state.last_server.clone())
    }
}

/// Values remembered between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct State {
    /// Server of the last successful login.
    pub last_server: Option<String>,
}

impl State {
    fn path() -> Result<PathBuf> {
        Ok(config_dir()?.join(STATE_FILE))
    }

    /// Reads the state file. A missing or unreadable file yields an empty
    /// state.
    pub fn load() -> Self {
        let Ok(path) = Self::path() else {
            return Self::default();
        };
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt state file");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))
    }
}
