//! Sprint state refresh.
//!
//! Issue search never reports a sprint closing, so stored sprints that are
//! still open are re-fetched one by one and overwritten.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::SprintState;
use crate::remote::RemoteGateway;
use crate::storage::LocalStore;
use crate::sync::CancelToken;

/// Re-fetches stored open sprints so state changes reach the store.
pub struct SprintRefresher<G, S> {
    gateway: Arc<G>,
    store: Arc<S>,
}

impl<G, S> SprintRefresher<G, S>
where
    G: RemoteGateway,
    S: LocalStore,
{
    pub fn new(gateway: Arc<G>, store: Arc<S>) -> Self {
        Self { gateway, store }
    }

    /// Re-fetch every stored sprint in `states` and save the remote version.
    ///
    /// Sequential; the first failure aborts the remaining sprints.
    /// Returns how many sprints were refreshed.
    ///
    /// # Errors
    ///
    /// Returns `Error::SprintRefresh` naming the sprint that failed, or
    /// `Error::Cancelled` if `token` stops.
    pub async fn refresh_by_states(&self, token: &CancelToken, states: &[SprintState]) -> Result<usize> {
        token.checkpoint()?;
        let sprints = token
            .run_until_cancelled(self.store.get_sprints_by_state(states))
            .await?;
        debug!(count = sprints.len(), ?states, "refreshing sprints");

        for sprint in &sprints {
            token.checkpoint()?;
            let wrap = |e: Error| Error::SprintRefresh {
                id: sprint.id,
                source: Box::new(e),
            };

            let fresh = token
                .run_until_cancelled(self.gateway.get_sprint(sprint.id))
                .await
                .map_err(wrap)?;
            token
                .run_until_cancelled(self.store.save_sprint(&fresh))
                .await
                .map_err(wrap)?;

            if fresh.state == sprint.state {
                debug!(id = sprint.id, state = %fresh.state, "sprint unchanged");
            } else {
                info!(id = sprint.id, name = %fresh.name, from = %sprint.state, to = %fresh.state, "sprint changed state");
            }
        }

        Ok(sprints.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Sprint;
    use crate::sync::testing::{at, FakeGateway, MemoryStore};

    fn refresher(gateway: FakeGateway, store: MemoryStore) -> (SprintRefresher<FakeGateway, MemoryStore>, Arc<FakeGateway>, Arc<MemoryStore>) {
        let gateway = Arc::new(gateway);
        let store = Arc::new(store);
        (SprintRefresher::new(Arc::clone(&gateway), Arc::clone(&store)), gateway, store)
    }

    #[tokio::test]
    async fn test_refreshes_only_requested_states() {
        let store = MemoryStore::with_sprints(vec![
            Sprint::new(1, "S1", SprintState::Active),
            Sprint::new(2, "S2", SprintState::Future),
            Sprint::new(3, "S3", SprintState::Closed),
        ]);
        let mut gateway = FakeGateway::default();
        let mut closed = Sprint::new(1, "S1", SprintState::Closed);
        closed.completed_at = Some(at(500));
        gateway.sprints.insert(1, closed.clone());
        gateway.sprints.insert(2, Sprint::new(2, "S2", SprintState::Active));

        let (refresher, gateway, store) = refresher(gateway, store);
        let count = refresher
            .refresh_by_states(&CancelToken::new(), &[SprintState::Active, SprintState::Future])
            .await
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(gateway.calls(), vec!["sprint:1".to_string(), "sprint:2".into()]);
        let sprints = store.sprints.lock().unwrap();
        assert_eq!(sprints[&1], closed);
        assert_eq!(sprints[&2].state, SprintState::Active);
        assert_eq!(sprints[&3].state, SprintState::Closed);
    }

    #[tokio::test]
    async fn test_first_failure_aborts_remaining() {
        let store = MemoryStore::with_sprints(vec![
            Sprint::new(1, "S1", SprintState::Active),
            Sprint::new(2, "S2", SprintState::Active),
            Sprint::new(3, "S3", SprintState::Active),
        ]);
        let mut gateway = FakeGateway::default();
        gateway.sprints.insert(1, Sprint::new(1, "S1", SprintState::Active));
        gateway.sprints.insert(3, Sprint::new(3, "S3", SprintState::Active));

        let (refresher, gateway, store) = refresher(gateway, store);
        let err = refresher
            .refresh_by_states(&CancelToken::new(), &[SprintState::Active])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SprintRefresh { id: 2, .. }));
        assert!(!gateway.calls().contains(&"sprint:3".to_string()));
        assert_eq!(store.writes(), vec!["sprint:1".to_string()]);
    }

    #[tokio::test]
    async fn test_no_matching_sprints() {
        let (refresher, gateway, _) = refresher(FakeGateway::default(), MemoryStore::default());
        let count = refresher
            .refresh_by_states(&CancelToken::new(), &[SprintState::Future])
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = MemoryStore::with_sprints(vec![Sprint::new(1, "S1", SprintState::Active)]);
        let (refresher, gateway, _) = refresher(FakeGateway::default(), store);
        let token = CancelToken::new();
        token.cancel();

        let err = refresher
            .refresh_by_states(&token, &[SprintState::Active])
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(gateway.calls().is_empty());
    }
}
