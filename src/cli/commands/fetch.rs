//! Fetch command: sync specific issues regardless of their stamps.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use super::{cancel_on_ctrl_c, command_token, connect, open_store, runtime};
use crate::error::{Error, Result};
use crate::sync::{DetectStats, IssueSyncWorker, RunKind, RunOutcome, SyncOutcome};
use crate::validate::parse_issue_id;

#[derive(Serialize)]
struct FetchedIssue {
    id: u64,
    outcome: SyncOutcome,
}

/// Execute the fetch command.
///
/// Ids are synced in the order given; the first failure stops the rest.
///
/// # Errors
///
/// Returns an error for an unparseable id, a missing database or config,
/// or the first sync failure.
pub fn execute(
    ids: &[String],
    timeout: Option<u64>,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let ids = ids
        .iter()
        .map(|raw| {
            parse_issue_id(raw).map_err(|(msg, hint)| match hint {
                Some(hint) => Error::InvalidArgument(format!("{msg} ({hint})")),
                None => Error::InvalidArgument(msg),
            })
        })
        .collect::<Result<Vec<u64>>>()?;

    let store = Arc::new(open_store(db_path, actor)?);
    let (client, _) = connect()?;
    let worker = IssueSyncWorker::new(Arc::new(client), Arc::clone(&store));

    let rt = runtime()?;
    let run_id = store.start_run(RunKind::Fetch, None)?;

    let result = rt.block_on(async {
        let token = command_token(timeout);
        let watcher = cancel_on_ctrl_c(&token);
        let result = worker.sync_all(&token, &ids).await;
        watcher.abort();
        result
    });

    let stats = DetectStats {
        discovered: ids.len(),
        dispatched: result.as_ref().map_or(0, Vec::len),
        ..DetectStats::default()
    };
    store.finish_run(&run_id, &RunOutcome::from_result(stats, &result))?;
    let synced = result?;

    if json {
        let output: Vec<FetchedIssue> = synced
            .into_iter()
            .map(|(id, outcome)| FetchedIssue { id, outcome })
            .collect();
        println!("{}", serde_json::to_string(&output)?);
    } else {
        for (id, outcome) in synced {
            let verb = match outcome {
                SyncOutcome::Created => "created",
                SyncOutcome::Updated => "updated",
            };
            println!("{id}: {verb}");
        }
    }

    Ok(())
}
