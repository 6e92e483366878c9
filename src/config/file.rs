//! On-disk configuration file.
//!
//! Loads settings from `~/.jsync/config.json`. Every field is optional;
//! anything missing falls back to environment variables or defaults.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::{global_jsync_dir, EnvLookup};

/// Top-level config file layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub jira: JiraSettings,
    pub sync: SyncFileSettings,
}

/// `jira` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JiraSettings {
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub api_token: Option<String>,
    pub page_size: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub fields: FieldOverrides,
}

/// Custom field ids, when the instance differs from the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldOverrides {
    pub sprints: Option<String>,
    pub story_points: Option<String>,
    pub products: Option<String>,
    pub locality: Option<String>,
}

/// `sync` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncFileSettings {
    pub queue_capacity: Option<usize>,
    pub sprint_states: Option<Vec<String>>,
}

/// Get the config file path.
///
/// `JSYNC_CONFIG` overrides the default `~/.jsync/config.json`.
///
/// # Errors
///
/// Returns `Error::Config` if the home directory cannot be determined.
pub fn config_path(env: EnvLookup<'_>) -> Result<PathBuf> {
    if let Some(path) = env("JSYNC_CONFIG") {
        return Ok(PathBuf::from(path));
    }
    global_jsync_dir()
        .map(|dir| dir.join("config.json"))
        .ok_or_else(|| Error::Config("Could not determine home directory".into()))
}

/// Load the config file at `path`, or defaults if it does not exist.
///
/// # Errors
///
/// Returns `Error::Config` if the file exists but cannot be read or parsed.
pub fn load_config_from(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {e}", path.display())))?;

    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {e}", path.display())))
}

/// Load the config file from its resolved location.
///
/// # Errors
///
/// Returns `Error::Config` if the path cannot be resolved or the file is invalid.
pub fn load_config(env: EnvLookup<'_>) -> Result<ConfigFile> {
    load_config_from(&config_path(env)?)
}
