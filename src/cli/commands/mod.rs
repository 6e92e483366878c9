//! Command implementations.

pub mod completions;
pub mod fetch;
pub mod init;
pub mod sprints;
pub mod status;
pub mod sync;
pub mod version;

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::config::{
    default_actor, load_config, process_env, resolve_db_path, resolve_jira_config,
    resolve_sync_settings, SyncSettings,
};
use crate::error::{Error, Result};
use crate::remote::JiraClient;
use crate::storage::SqliteStore;
use crate::sync::CancelToken;

/// Open the store for a command, failing if `jsync init` has not run.
fn open_store(db_path: Option<&PathBuf>, actor: Option<&str>) -> Result<SqliteStore> {
    let db_path =
        resolve_db_path(db_path.map(|p| p.as_path()), &process_env).ok_or(Error::NotInitialized)?;

    if !db_path.exists() {
        return Err(Error::NotInitialized);
    }

    let actor = actor.map_or_else(|| default_actor(&process_env), str::to_string);
    Ok(SqliteStore::open(&db_path)?.with_actor(actor))
}

/// Build the Jira client and engine settings from config file and env.
fn connect() -> Result<(JiraClient, SyncSettings)> {
    let file = load_config(&process_env)?;
    let client = JiraClient::new(resolve_jira_config(&file, &process_env)?)?;
    let settings = resolve_sync_settings(&file)?;
    Ok((client, settings))
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Error::Other(format!("Failed to create async runtime: {e}")))
}

/// Token for one command run, with the `--timeout` deadline if given.
fn command_token(timeout_secs: Option<u64>) -> CancelToken {
    match timeout_secs {
        Some(secs) => CancelToken::with_timeout(Duration::from_secs(secs)),
        None => CancelToken::new(),
    }
}

/// Cancel `token` on Ctrl-C. Must be called inside the runtime.
///
/// The returned handle should be aborted once the run is over.
fn cancel_on_ctrl_c(token: &CancelToken) -> tokio::task::JoinHandle<()> {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            token.cancel();
        }
    })
}
