//! Configuration management.
//!
//! Resolves the database path and the settings for the Jira gateway and the
//! sync engine from three layers: CLI flags, environment variables and the
//! config file at `~/.jsync/config.json`.
//!
//! Resolution functions take the environment as an [`EnvLookup`] closure
//! instead of reading process state, so they can be tested in isolation.
//! [`process_env`] is the lookup used by the binary.

mod file;

pub use file::{
    config_path, load_config, load_config_from, ConfigFile, FieldOverrides, JiraSettings,
    SyncFileSettings,
};

use crate::error::{Error, Result};
use crate::model::SprintState;
use crate::validate::normalize_sprint_states;

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default search and changelog page size.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Largest page size Jira accepts for search.
pub const MAX_PAGE_SIZE: u32 = 5000;

/// Default per-request HTTP timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default capacity of the detector's discovery queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Environment lookup: returns the value of a variable if set and non-blank.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Read a variable from the process environment, ignoring blank values.
#[must_use]
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Get the global jsync directory, `~/.jsync/`.
#[must_use]
pub fn global_jsync_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".jsync"))
}

/// Resolve the database path.
///
/// Priority:
/// 1. `explicit_path` (the `--db` flag)
/// 2. `JSYNC_DB` environment variable
/// 3. `~/.jsync/data/jsync.db`
///
/// Returns `None` if no location can be determined.
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>, env: EnvLookup<'_>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if let Some(db_path) = env("JSYNC_DB") {
        return Some(PathBuf::from(db_path));
    }

    global_jsync_dir().map(|dir| dir.join("data").join("jsync.db"))
}

/// Get the actor name recorded on audit events.
///
/// Priority: `JSYNC_ACTOR`, then `USER`, then `"jsync"`.
#[must_use]
pub fn default_actor(env: EnvLookup<'_>) -> String {
    env("JSYNC_ACTOR")
        .or_else(|| env("USER"))
        .unwrap_or_else(|| "jsync".to_string())
}

/// Ids of the instance-specific custom fields the gateway reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMap {
    pub sprints: String,
    pub story_points: String,
    pub products: String,
    pub locality: String,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            sprints: "customfield_10020".to_string(),
            story_points: "customfield_10025".to_string(),
            products: "customfield_10693".to_string(),
            locality: "customfield_10696".to_string(),
        }
    }
}

impl FieldMap {
    fn with_overrides(overrides: &FieldOverrides) -> Self {
        let defaults = Self::default();
        Self {
            sprints: overrides.sprints.clone().unwrap_or(defaults.sprints),
            story_points: overrides.story_points.clone().unwrap_or(defaults.story_points),
            products: overrides.products.clone().unwrap_or(defaults.products),
            locality: overrides.locality.clone().unwrap_or(defaults.locality),
        }
    }
}

/// Everything needed to construct a `JiraClient`.
#[derive(Clone, PartialEq, Eq)]
pub struct JiraConfig {
    /// Site root, e.g. `https://acme.atlassian.net` (no trailing slash).
    pub base_url: String,
    pub username: String,
    pub api_token: String,
    pub page_size: u32,
    pub timeout: Duration,
    pub fields: FieldMap,
}

impl std::fmt::Debug for JiraConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JiraConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("api_token", &"<redacted>")
            .field("page_size", &self.page_size)
            .field("timeout", &self.timeout)
            .field("fields", &self.fields)
            .finish()
    }
}

impl JiraConfig {
    /// Config with defaults for everything but location and credentials.
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            api_token: api_token.into(),
            page_size: DEFAULT_PAGE_SIZE,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            fields: FieldMap::default(),
        }
    }
}

/// Engine settings not tied to the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub queue_capacity: usize,
    /// States refreshed by `jsync sprints` when none are given.
    pub sprint_states: Vec<SprintState>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            sprint_states: vec![SprintState::Active, SprintState::Future],
        }
    }
}

/// Resolve the gateway config. Environment variables win over the file.
///
/// Variables: `JIRA_BASE_URL`, `JIRA_USERNAME`, `JIRA_API_TOKEN` (falling
/// back to `JIRA_PASSWORD`).
///
/// # Errors
///
/// Returns `Error::Config` if a required value is missing or invalid.
pub fn resolve_jira_config(file: &ConfigFile, env: EnvLookup<'_>) -> Result<JiraConfig> {
    let settings = &file.jira;

    let base_url = env("JIRA_BASE_URL")
        .or_else(|| settings.base_url.clone())
        .ok_or_else(|| Error::Config("Jira base URL is not set (JIRA_BASE_URL)".into()))?;
    if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
        return Err(Error::Config(format!(
            "Jira base URL must start with http:// or https://, got '{base_url}'"
        )));
    }

    let username = env("JIRA_USERNAME")
        .or_else(|| settings.username.clone())
        .ok_or_else(|| Error::Config("Jira username is not set (JIRA_USERNAME)".into()))?;

    let api_token = env("JIRA_API_TOKEN")
        .or_else(|| env("JIRA_PASSWORD"))
        .or_else(|| settings.api_token.clone())
        .ok_or_else(|| Error::Config("Jira API token is not set (JIRA_API_TOKEN)".into()))?;

    let page_size = settings.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(Error::Config(format!(
            "jira.page_size must be between 1 and {MAX_PAGE_SIZE}, got {page_size}"
        )));
    }

    let timeout_secs = settings.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(Error::Config("jira.timeout_secs must be positive".into()));
    }

    Ok(JiraConfig {
        page_size,
        timeout: Duration::from_secs(timeout_secs),
        fields: FieldMap::with_overrides(&settings.fields),
        ..JiraConfig::new(base_url, username, api_token)
    })
}

/// Resolve engine settings from the file, with defaults.
///
/// # Errors
///
/// Returns `Error::Config` for a zero queue capacity or an unknown sprint state.
pub fn resolve_sync_settings(file: &ConfigFile) -> Result<SyncSettings> {
    let defaults = SyncSettings::default();

    let queue_capacity = file.sync.queue_capacity.unwrap_or(defaults.queue_capacity);
    if queue_capacity == 0 {
        return Err(Error::Config("sync.queue_capacity must be at least 1".into()));
    }

    let sprint_states = match &file.sync.sprint_states {
        Some(raw) if !raw.is_empty() => normalize_sprint_states(raw)
            .map_err(|e| Error::Config(format!("sync.sprint_states: {e}")))?,
        _ => defaults.sprint_states,
    };

    Ok(SyncSettings {
        queue_capacity,
        sprint_states,
    })
}
