//! Configuration loading and paths.
//!
//! Everything lives under `~/.privacycall/` (or `$PRIVACYCALL_HOME`):
//! - `config.toml`: screening configuration
//! - `contacts.json`: default contacts directory
//! - `screening.lease/`: background lease while screening
//! - `daemon.sock`: daemon socket

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::directory::NumberMatch;
use crate::error::ScreeningError;
use crate::router::LookupFailurePolicy;
use crate::session::ControllerOptions;

pub const HOME_ENV: &str = "PRIVACYCALL_HOME";
const BASE_DIR_NAME: &str = ".privacycall";
const CONFIG_FILE_NAME: &str = "config.toml";
const CONTACTS_FILE_NAME: &str = "contacts.json";
const DEFAULT_LOOKUP_TIMEOUT_MS: u64 = 500;
// Kept under the hook's read timeout.
pub const MAX_LOOKUP_TIMEOUT_MS: u64 = 1000;

/// Returns the PrivacyCall base directory.
pub fn base_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(HOME_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs::home_dir().map(|home| home.join(BASE_DIR_NAME))
}

pub fn config_path(base: &Path) -> PathBuf {
    base.join(CONFIG_FILE_NAME)
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub contacts_path: Option<String>,
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
    #[serde(default)]
    pub number_match: NumberMatch,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            contacts_path: None,
            lookup_timeout_ms: default_lookup_timeout_ms(),
            number_match: NumberMatch::default(),
        }
    }
}

impl DirectoryConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms.clamp(1, MAX_LOOKUP_TIMEOUT_MS))
    }

    /// Resolves the contacts file, expanding a leading `~/`.
    pub fn resolve_contacts_path(&self, base: &Path) -> PathBuf {
        match self.contacts_path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => expand_home(path),
            _ => base.join(CONTACTS_FILE_NAME),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct PolicyConfig {
    #[serde(default)]
    pub lookup_failure: LookupFailurePolicy,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    #[serde(default = "default_true")]
    pub attach_connection_on_start: bool,
    #[serde(default = "default_activity_capacity")]
    pub activity_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            attach_connection_on_start: true,
            activity_capacity: default_activity_capacity(),
        }
    }
}

impl SessionConfig {
    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            attach_connection_on_start: self.attach_connection_on_start,
            activity_capacity: self.activity_capacity,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ScreeningConfig {
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Loads `config.toml`, returning defaults if it doesn't exist.
pub fn load_config(path: &Path) -> Result<ScreeningConfig, ScreeningError> {
    if !path.exists() {
        return Ok(ScreeningConfig::default());
    }

    let content = fs_err::read_to_string(path).map_err(|source| ScreeningError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<ScreeningConfig>(&content).map_err(|err| ScreeningError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

fn default_lookup_timeout_ms() -> u64 {
    DEFAULT_LOOKUP_TIMEOUT_MS
}

fn default_activity_capacity() -> usize {
    crate::activity::DEFAULT_ACTIVITY_CAPACITY
}

fn default_true() -> bool {
    true
}
