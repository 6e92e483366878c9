//! Initialize the jsync database.
//!
//! Creates `~/.jsync/data/jsync.db` (or the `--db` / `JSYNC_DB` path) and
//! applies the schema. Re-running is refused unless `--force` is given,
//! which discards the existing database.

use crate::config::{process_env, resolve_db_path};
use crate::error::{Error, Result};
use crate::storage::SqliteStore;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct InitOutput {
    database: PathBuf,
    recreated: bool,
}

/// Execute the init command.
///
/// # Errors
///
/// Returns an error if the directory or database cannot be created.
pub fn execute(db_path: Option<&PathBuf>, force: bool, json: bool) -> Result<()> {
    let db_path = resolve_db_path(db_path.map(|p| p.as_path()), &process_env)
        .ok_or_else(|| Error::Config("Could not determine the database location".to_string()))?;

    let recreated = init_database(&db_path, force)?;

    if json {
        let output = InitOutput {
            database: db_path,
            recreated,
        };
        let payload = serde_json::to_string(&output)?;
        println!("{payload}");
    } else {
        println!("Initialized jsync database");
        println!("  Database: {}", db_path.display());
        println!();
        println!("Next: set JIRA_BASE_URL, JIRA_USERNAME and JIRA_API_TOKEN, then run 'jsync sync --jql ...'");
    }

    Ok(())
}

/// Create the database at `db_path`. Returns whether one was replaced.
fn init_database(db_path: &Path, force: bool) -> Result<bool> {
    let exists = db_path.exists();
    if exists && !force {
        return Err(Error::AlreadyInitialized {
            path: db_path.to_path_buf(),
        });
    }

    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    if exists {
        fs::remove_file(db_path)?;
        for suffix in ["-wal", "-shm"] {
            let mut side = db_path.as_os_str().to_owned();
            side.push(suffix);
            let side = PathBuf::from(side);
            if side.exists() {
                fs::remove_file(side)?;
            }
        }
    }

    SqliteStore::open(db_path)?;
    Ok(exists)
}
