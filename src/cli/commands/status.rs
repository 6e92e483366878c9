//! Status command implementation.

use super::open_store;
use crate::error::Result;
use crate::storage::{RunRecord, StoreCounts};
use crate::sync::RunStatus;
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

/// Output for status command.
#[derive(Serialize)]
struct StatusOutput {
    counts: StoreCounts,
    last_update: Option<DateTime<Utc>>,
    recent_runs: Vec<RunRecord>,
}

/// Execute status command.
///
/// # Errors
///
/// Returns an error if the database is missing or a query fails.
pub fn execute(db_path: Option<&PathBuf>, runs: u32, json: bool) -> Result<()> {
    let store = open_store(db_path, None)?;

    let output = StatusOutput {
        counts: store.counts()?,
        last_update: store.last_update()?,
        recent_runs: store.recent_runs(runs)?,
    };

    if json {
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    println!("{}", "jsync Status".cyan().bold());
    println!();
    println!("Issues:    {}", output.counts.issues);
    println!("Changelog: {}", output.counts.changelog_entries);
    println!("Accounts:  {}", output.counts.accounts);
    println!(
        "Sprints:   {} ({} open)",
        output.counts.sprints, output.counts.open_sprints
    );
    println!("Versions:  {}", output.counts.fix_versions);
    match output.last_update {
        Some(at) => println!("Last update: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Last update: {}", "never".dimmed()),
    }

    println!();
    if output.recent_runs.is_empty() {
        println!("No runs yet.");
        println!();
        println!("Start one with: jsync sync --jql \"project = KEY\"");
        return Ok(());
    }

    println!("{}", "Recent Runs".cyan().bold());
    for run in &output.recent_runs {
        let status = match run.status {
            RunStatus::Succeeded => run.status.as_str().green(),
            RunStatus::Failed => run.status.as_str().red(),
            RunStatus::Cancelled => run.status.as_str().yellow(),
            RunStatus::Running => run.status.as_str().blue(),
        };
        println!(
            "  {} {:<8} {:<9} dispatched {}, skipped {}",
            run.started_at.format("%Y-%m-%d %H:%M"),
            run.kind.as_str(),
            status,
            run.stats.dispatched,
            run.stats.skipped,
        );
        if let Some(error) = &run.error {
            println!("      {}", error.dimmed());
        }
    }

    Ok(())
}
