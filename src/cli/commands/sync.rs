//! Sync command: change detection plus per-issue sync, optionally preceded
//! by a board's sprints and fix versions.
//!
//! Every run is recorded in the run ledger, including failed and
//! cancelled ones, with whatever counts were reached.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use super::{cancel_on_ctrl_c, command_token, connect, open_store, runtime};
use crate::cli::SyncArgs;
use crate::error::{Error, Result};
use crate::sync::filter::with_updated_window;
use crate::sync::{
    BoardStats, BoardSync, ChangeDetector, DetectStats, IssueSyncWorker, RunKind, RunOutcome,
};
use crate::validate::validate_filter;

#[derive(Serialize)]
struct SyncOutput<'a> {
    run_id: &'a str,
    filter: &'a str,
    stats: DetectStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    board: Option<BoardStats>,
}

/// Execute the sync command.
///
/// # Errors
///
/// Returns an error for an invalid filter, a missing database or config,
/// or the first failure of the run.
pub fn execute(args: &SyncArgs, db_path: Option<&PathBuf>, actor: Option<&str>, json: bool) -> Result<()> {
    validate_filter(&args.jql).map_err(|msg| Error::InvalidArgument(format!("invalid --jql: {msg}")))?;

    let store = Arc::new(open_store(db_path, actor)?);
    let (client, settings) = connect()?;
    let gateway = Arc::new(client);

    let filter = if args.incremental {
        with_updated_window(&args.jql, store.last_update()?, Utc::now())
    } else {
        args.jql.clone()
    };
    info!(filter = %filter, board = ?args.board, "starting sync");

    let rt = runtime()?;
    let run_id = store.start_run(RunKind::Issues, Some(&filter))?;
    let mut stats = DetectStats::default();
    let mut board = None;

    let result = rt.block_on(async {
        let token = command_token(args.timeout);
        let watcher = cancel_on_ctrl_c(&token);

        let result = async {
            if let Some(board_id) = args.board {
                let synced = BoardSync::new(Arc::clone(&gateway), Arc::clone(&store))
                    .sync_board(&token, board_id)
                    .await?;
                board = Some(synced);
            }

            let worker = IssueSyncWorker::new(Arc::clone(&gateway), Arc::clone(&store));
            let detector = ChangeDetector::new(Arc::clone(&gateway), Arc::clone(&store))
                .with_queue_capacity(settings.queue_capacity);

            let worker = &worker;
            let run_token = &token;
            detector
                .run_with_stats(&token, &filter, &mut stats, move |id| async move {
                    worker.sync_one(run_token, id).await.map(|_| ())
                })
                .await
        }
        .await;

        watcher.abort();
        result
    });

    store.finish_run(&run_id, &RunOutcome::from_result(stats, &result))?;
    result?;

    if json {
        let output = SyncOutput {
            run_id: &run_id,
            filter: &filter,
            stats,
            board,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!(
            "Synced {} issue(s), {} unchanged, across {} page(s)",
            stats.dispatched, stats.skipped, stats.pages
        );
        if let Some(board_stats) = board {
            println!(
                "  Board: {} sprint(s), {} fix version(s)",
                board_stats.sprints, board_stats.fix_versions
            );
        }
        println!("  Filter: {filter}");
        println!("  Run: {run_id}");
    }

    Ok(())
}
