//! Sprints command: refresh stored sprints still open remotely.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use super::{cancel_on_ctrl_c, command_token, connect, open_store, runtime};
use crate::error::Result;
use crate::model::SprintState;
use crate::sync::{DetectStats, RunKind, RunOutcome, SprintRefresher};
use crate::validate::normalize_sprint_states;

#[derive(Serialize)]
struct SprintsOutput<'a> {
    states: &'a [SprintState],
    refreshed: usize,
}

/// Execute the sprints command.
///
/// # Errors
///
/// Returns an error for an unknown state name, a missing database or
/// config, or the first refresh failure.
pub fn execute(
    states: &[String],
    timeout: Option<u64>,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let requested = normalize_sprint_states(states)?;

    let store = Arc::new(open_store(db_path, actor)?);
    let (client, settings) = connect()?;
    let states = if requested.is_empty() {
        settings.sprint_states
    } else {
        requested
    };

    let refresher = SprintRefresher::new(Arc::new(client), Arc::clone(&store));
    let rt = runtime()?;
    let filter = states.iter().map(SprintState::as_str).collect::<Vec<_>>().join(",");
    let run_id = store.start_run(RunKind::Sprints, Some(&filter))?;

    let result = rt.block_on(async {
        let token = command_token(timeout);
        let watcher = cancel_on_ctrl_c(&token);
        let result = refresher.refresh_by_states(&token, &states).await;
        watcher.abort();
        result
    });

    let stats = DetectStats {
        dispatched: result.as_ref().copied().unwrap_or_default(),
        ..DetectStats::default()
    };
    store.finish_run(&run_id, &RunOutcome::from_result(stats, &result))?;
    let refreshed = result?;

    if json {
        let output = SprintsOutput {
            states: &states,
            refreshed,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Refreshed {refreshed} sprint(s) in state {filter}");
    }

    Ok(())
}
