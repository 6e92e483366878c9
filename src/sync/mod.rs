//! Incremental sync engine.
//!
//! - [`ChangeDetector`] pages through the remote search and dispatches ids
//!   whose stamp changed since the last sync
//! - [`IssueSyncWorker`] fetches one issue's detail and status changelog and
//!   creates or updates it in the store
//! - [`SprintRefresher`] re-fetches stored sprints that are still open
//! - [`BoardSync`] saves every fix version and sprint listed on a board
//!
//! Every run is fail-fast: the first error stops it and is returned. A
//! [`CancelToken`] spans each run and is checked at every blocking step.
//!
//! # Example
//!
//! ```ignore
//! let worker = IssueSyncWorker::new(Arc::clone(&gateway), Arc::clone(&store));
//! let (worker, run_token) = (&worker, &token);
//! let stats = ChangeDetector::new(gateway, store)
//!     .run(&token, "project = PAY", move |id| async move {
//!         worker.sync_one(run_token, id).await.map(|_| ())
//!     })
//!     .await?;
//! ```

mod board;
mod cancel;
mod detector;
pub mod filter;
pub mod reconcile;
mod sprints;
mod types;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use board::BoardSync;
pub use cancel::{CancelReason, CancelToken, DropGuard};
pub use detector::ChangeDetector;
pub use sprints::SprintRefresher;
pub use types::{BoardStats, DetectStats, RunKind, RunOutcome, RunStatus, SyncOutcome, SyncStep};
pub use worker::IssueSyncWorker;
