//! Per-issue fetch and upsert.
//!
//! [`IssueSyncWorker::sync_one`] pulls one issue's detail and status
//! changelog and writes the aggregate in a single store call. Detail is
//! always fetched before changelog, and both before the write.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::ChangelogEntry;
use crate::remote::RemoteGateway;
use crate::storage::LocalStore;
use crate::sync::{CancelToken, SyncOutcome, SyncStep};

/// Syncs individual issues from the gateway into the store.
pub struct IssueSyncWorker<G, S> {
    gateway: Arc<G>,
    store: Arc<S>,
}

impl<G, S> IssueSyncWorker<G, S>
where
    G: RemoteGateway,
    S: LocalStore,
{
    pub fn new(gateway: Arc<G>, store: Arc<S>) -> Self {
        Self { gateway, store }
    }

    /// Fetch issue `id` and create or update its stored aggregate.
    ///
    /// The parent travels as a reference on the aggregate; the store keeps
    /// only its id and key and never writes a row for it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Sync` naming the failed step and the id. A stopped
    /// token surfaces as a wrapped `Error::Cancelled`.
    pub async fn sync_one(&self, token: &CancelToken, id: u64) -> Result<SyncOutcome> {
        token.checkpoint()?;

        let mut issue = token
            .run_until_cancelled(self.gateway.get_detail(id))
            .await
            .map_err(|e| e.in_step(SyncStep::FetchDetail, id))?;

        issue.changelog = token
            .run_until_cancelled(self.status_changelog(&issue.key))
            .await
            .map_err(|e| e.in_step(SyncStep::FetchChangelog, id))?;

        let existing = token
            .run_until_cancelled(self.store.get_stamp_by_id(id))
            .await
            .map_err(|e| e.in_step(SyncStep::LookupStamp, id))?;

        let written = if existing.is_some() {
            token
                .run_until_cancelled(self.store.update_record(&issue))
                .await
                .map(|()| SyncOutcome::Updated)
        } else {
            token
                .run_until_cancelled(self.store.create_record(&issue))
                .await
                .map(|()| SyncOutcome::Created)
        };
        let outcome = written.map_err(|e| e.in_step(SyncStep::Store, id))?;

        info!(
            id,
            key = %issue.key,
            outcome = ?outcome,
            transitions = issue.changelog.len(),
            "synced issue"
        );
        Ok(outcome)
    }

    /// Sync several issues in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first `sync_one` error.
    pub async fn sync_all(&self, token: &CancelToken, ids: &[u64]) -> Result<Vec<(u64, SyncOutcome)>> {
        let mut outcomes = Vec::with_capacity(ids.len());
        for &id in ids {
            outcomes.push((id, self.sync_one(token, id).await?));
        }
        Ok(outcomes)
    }

    /// Every status transition for `key`, across all changelog pages.
    async fn status_changelog(&self, key: &str) -> Result<Vec<ChangelogEntry>> {
        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0_usize;

        loop {
            let page = self.gateway.get_changelog(key, cursor.as_deref()).await?;
            pages += 1;
            entries.extend(
                page.items
                    .into_iter()
                    .filter(ChangelogEntry::is_status_transition),
            );

            let Some(next) = page.next_cursor else {
                break;
            };
            if !seen.insert(next.clone()) {
                return Err(Error::Decode {
                    operation: "get_changelog",
                    target: key.to_string(),
                    message: format!("pagination cursor '{next}' did not advance"),
                });
            }
            cursor = Some(next);
        }

        debug!(key, pages, transitions = entries.len(), "fetched changelog");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Sprint, SprintState};
    use crate::remote::Page;
    use crate::sync::testing::{issue, stamp, status_entry, FakeGateway, MemoryStore};

    fn key(id: u64) -> String {
        format!("P-{id}")
    }

    fn worker(gateway: FakeGateway, store: MemoryStore) -> (IssueSyncWorker<FakeGateway, MemoryStore>, Arc<FakeGateway>, Arc<MemoryStore>) {
        let gateway = Arc::new(gateway);
        let store = Arc::new(store);
        (IssueSyncWorker::new(Arc::clone(&gateway), Arc::clone(&store)), gateway, store)
    }

    #[tokio::test]
    async fn test_new_issue_is_created_with_changelog() {
        let mut gateway = FakeGateway::default();
        gateway.details.insert(1, issue(1, 100));

        let mut assignee_change = status_entry(11, "", "", 20);
        assignee_change.field = "assignee".into();
        gateway.changelogs.insert(
            (key(1), String::new()),
            Page::new(vec![status_entry(10, "To Do", "Doing", 10), assignee_change], Some("c2".into())),
        );
        gateway.changelogs.insert(
            (key(1), "c2".into()),
            Page::new(vec![status_entry(12, "Doing", "Done", 30)], None),
        );

        let (worker, gateway, store) = worker(gateway, MemoryStore::default());
        let outcome = worker.sync_one(&CancelToken::new(), 1).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Created);

        let stored = store.issue(1).unwrap();
        let ids: Vec<u64> = stored.changelog.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![10, 12]);

        // Detail precedes changelog, which precedes the write
        assert_eq!(
            gateway.calls(),
            vec!["detail:1".to_string(), "changelog:P-1:".into(), "changelog:P-1:c2".into()]
        );
        assert_eq!(store.writes(), vec!["create:1".to_string()]);
    }

    #[tokio::test]
    async fn test_known_issue_is_updated_with_fresh_sprints() {
        let mut fresh = issue(1, 200);
        fresh.sprints = vec![
            Sprint::new(2, "B", SprintState::Active),
            Sprint::new(3, "C", SprintState::Future),
        ];
        let mut gateway = FakeGateway::default();
        gateway.details.insert(1, fresh);

        let store = MemoryStore::with_stamps(&[stamp(1, 100)]);
        let (worker, _, store) = worker(gateway, store);

        let outcome = worker.sync_one(&CancelToken::new(), 1).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Updated);

        let ids: Vec<u64> = store.issue(1).unwrap().sprints.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_detail_failure_names_step_and_id() {
        let (worker, _, store) = worker(FakeGateway::default(), MemoryStore::default());

        let err = worker.sync_one(&CancelToken::new(), 42).await.unwrap_err();
        match &err {
            Error::Sync { step, id, .. } => {
                assert_eq!(*step, SyncStep::FetchDetail);
                assert_eq!(*id, 42);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(err.root(), Error::RemoteFetch { status: Some(404), .. }));
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_wrapped() {
        let mut gateway = FakeGateway::default();
        gateway.details.insert(5, issue(5, 100));
        let store = MemoryStore {
            fail_writes: [5].into_iter().collect(),
            ..MemoryStore::default()
        };
        let (worker, _, _) = worker(gateway, store);

        let err = worker.sync_one(&CancelToken::new(), 5).await.unwrap_err();
        assert!(matches!(err, Error::Sync { step: SyncStep::Store, id: 5, .. }));
    }

    #[tokio::test]
    async fn test_repeated_changelog_cursor_is_decode_error() {
        let mut gateway = FakeGateway::default();
        gateway.details.insert(1, issue(1, 100));
        gateway
            .changelogs
            .insert((key(1), String::new()), Page::new(vec![], Some("loop".into())));
        gateway
            .changelogs
            .insert((key(1), "loop".into()), Page::new(vec![], Some("loop".into())));

        let (worker, _, store) = worker(gateway, MemoryStore::default());
        let err = worker.sync_one(&CancelToken::new(), 1).await.unwrap_err();
        assert!(matches!(err, Error::Sync { step: SyncStep::FetchChangelog, .. }));
        assert!(matches!(err.root(), Error::Decode { .. }));
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_fetch() {
        let mut gateway = FakeGateway::default();
        gateway.details.insert(1, issue(1, 100));
        let (worker, gateway, _) = worker(gateway, MemoryStore::default());

        let token = CancelToken::new();
        token.cancel();
        let err = worker.sync_one(&token, 1).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sync_all_stops_at_first_failure() {
        let mut gateway = FakeGateway::default();
        gateway.details.insert(1, issue(1, 100));
        gateway.details.insert(3, issue(3, 100));
        let (worker, _, store) = worker(gateway, MemoryStore::default());

        let err = worker.sync_all(&CancelToken::new(), &[1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, Error::Sync { id: 2, .. }));
        assert_eq!(store.writes(), vec!["create:1".to_string()]);
    }
}
