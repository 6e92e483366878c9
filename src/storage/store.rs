//! The store interface the sync engine writes through.

use crate::error::Result;
use crate::model::{FixVersion, Issue, Sprint, SprintState, Stamp};

/// Local persistence used by the sync engine.
///
/// `create_record` and `update_record` are each one atomic unit: the whole
/// aggregate (scalars, associations and changelog) is persisted, or none of
/// it is.
pub trait LocalStore: Send + Sync {
    /// Stored fingerprint for an issue id, if the issue has been synced.
    fn get_stamp_by_id(&self, id: u64) -> impl std::future::Future<Output = Result<Option<Stamp>>> + Send;

    /// Insert a new issue aggregate. Fails if the id is already stored.
    fn create_record(&self, issue: &Issue) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Overwrite a stored issue, reconciling every association to exactly
    /// the sets on `issue`. Fails with `IssueNotFound` if the id is unknown.
    fn update_record(&self, issue: &Issue) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Stored sprints whose state is one of `states`.
    fn get_sprints_by_state(
        &self,
        states: &[SprintState],
    ) -> impl std::future::Future<Output = Result<Vec<Sprint>>> + Send;

    /// Insert or overwrite a sprint, keyed by id.
    fn save_sprint(&self, sprint: &Sprint) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Insert or overwrite a fix version, keyed by id.
    fn save_fix_version(&self, fix_version: &FixVersion) -> impl std::future::Future<Output = Result<()>> + Send;
}
