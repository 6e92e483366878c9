//! Remote issue-tracker gateway.
//!
//! The sync engine only talks to the tracker through [`RemoteGateway`].
//! [`JiraClient`] is the production implementation over the Jira Cloud
//! REST and Agile APIs.

pub mod jira;
mod wire;

use crate::error::Result;
use crate::model::{ChangelogEntry, FixVersion, Issue, Sprint, Stamp};

pub use jira::JiraClient;

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the next page; `None` on the final page.
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// Build a page, treating an empty cursor as the end of the listing.
    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self {
            items,
            next_cursor: next_cursor.filter(|c| !c.is_empty()),
        }
    }
}

/// Read access to the remote tracker.
///
/// A `None` cursor requests the first page. Implementations must not retry
/// internally; failures surface to the engine, which aborts the run.
pub trait RemoteGateway: Send + Sync {
    /// Cheap search returning only stamps for issues matching `filter`.
    fn search_lite(
        &self,
        filter: &str,
        cursor: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Page<Stamp>>> + Send;

    /// Full issue detail by id. The changelog is left empty.
    fn get_detail(&self, id: u64) -> impl std::future::Future<Output = Result<Issue>> + Send;

    /// One page of an issue's changelog, by issue key.
    fn get_changelog(
        &self,
        key: &str,
        cursor: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Page<ChangelogEntry>>> + Send;

    /// Current state of one sprint.
    fn get_sprint(&self, id: u64) -> impl std::future::Future<Output = Result<Sprint>> + Send;

    /// One page of the sprints on an agile board, in every state.
    fn list_board_sprints(
        &self,
        board_id: u64,
        cursor: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Page<Sprint>>> + Send;

    /// One page of the fix versions of the project behind an agile board.
    fn list_board_versions(
        &self,
        board_id: u64,
        cursor: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Page<FixVersion>>> + Send;
}
