//! Board-level dependency sync.
//!
//! Issue search only reaches sprints and fix versions that some issue
//! references. A board listing also yields future sprints and unreleased
//! versions nobody has picked up yet, so they can be tracked (and later
//! refreshed) before the first issue lands in them.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{FixVersion, Sprint};
use crate::remote::{Page, RemoteGateway};
use crate::storage::LocalStore;
use crate::sync::{BoardStats, CancelToken};

/// Streams a board's fix versions and sprints into the store.
pub struct BoardSync<G, S> {
    gateway: Arc<G>,
    store: Arc<S>,
}

impl<G, S> BoardSync<G, S>
where
    G: RemoteGateway,
    S: LocalStore,
{
    pub fn new(gateway: Arc<G>, store: Arc<S>) -> Self {
        Self { gateway, store }
    }

    /// Save every fix version, then every sprint, listed on `board_id`.
    ///
    /// Each page is written before the next is requested. Sequential and
    /// fail-fast: the first fetch or write error ends the sync.
    ///
    /// # Errors
    ///
    /// Returns the gateway or store error that stopped the sync,
    /// `Error::Decode` if a listing repeats a cursor, or `Error::Cancelled`
    /// if `token` stops.
    pub async fn sync_board(&self, token: &CancelToken, board_id: u64) -> Result<BoardStats> {
        let gateway = &self.gateway;
        let store = &self.store;

        let fix_versions = drain_pages(
            token,
            "list_board_versions",
            board_id,
            move |cursor: Option<String>| async move {
                gateway.list_board_versions(board_id, cursor.as_deref()).await
            },
            move |version: FixVersion| async move { store.save_fix_version(&version).await },
        )
        .await?;
        debug!(board_id, fix_versions, "board fix versions saved");

        let sprints = drain_pages(
            token,
            "list_board_sprints",
            board_id,
            move |cursor: Option<String>| async move {
                gateway.list_board_sprints(board_id, cursor.as_deref()).await
            },
            move |sprint: Sprint| async move { store.save_sprint(&sprint).await },
        )
        .await?;

        let stats = BoardStats { fix_versions, sprints };
        info!(board_id, fix_versions, sprints, "board synced");
        Ok(stats)
    }
}

/// Follow a listing to its last page, saving each item in order.
async fn drain_pages<T, F, FFut, W, WFut>(
    token: &CancelToken,
    operation: &'static str,
    board_id: u64,
    mut fetch: F,
    mut save: W,
) -> Result<usize>
where
    F: FnMut(Option<String>) -> FFut,
    FFut: Future<Output = Result<Page<T>>>,
    W: FnMut(T) -> WFut,
    WFut: Future<Output = Result<()>>,
{
    let mut seen = HashSet::new();
    let mut cursor: Option<String> = None;
    let mut saved = 0_usize;

    loop {
        token.checkpoint()?;
        let page = token.run_until_cancelled(fetch(cursor.take())).await?;
        for item in page.items {
            token.checkpoint()?;
            token.run_until_cancelled(save(item)).await?;
            saved += 1;
        }

        let Some(next) = page.next_cursor else {
            return Ok(saved);
        };
        if !seen.insert(next.clone()) {
            return Err(Error::Decode {
                operation,
                target: format!("board {board_id}"),
                message: format!("pagination cursor '{next}' repeated"),
            });
        }
        cursor = Some(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SprintState;
    use crate::sync::testing::{FakeGateway, MemoryStore};

    fn version(id: u64) -> FixVersion {
        FixVersion {
            id,
            name: format!("v{id}"),
            description: None,
            released: false,
            archived: false,
            release_date: None,
        }
    }

    fn board_sync(gateway: FakeGateway, store: MemoryStore) -> (BoardSync<FakeGateway, MemoryStore>, Arc<FakeGateway>, Arc<MemoryStore>) {
        let gateway = Arc::new(gateway);
        let store = Arc::new(store);
        (BoardSync::new(Arc::clone(&gateway), Arc::clone(&store)), gateway, store)
    }

    fn two_page_board() -> FakeGateway {
        let mut gateway = FakeGateway::default();
        gateway
            .board_versions
            .insert((9, String::new()), Page::new(vec![version(7)], None));
        gateway.board_sprints.insert(
            (9, String::new()),
            Page::new(
                vec![Sprint::new(1, "S1", SprintState::Closed), Sprint::new(2, "S2", SprintState::Active)],
                Some("2".into()),
            ),
        );
        gateway.board_sprints.insert(
            (9, "2".into()),
            Page::new(vec![Sprint::new(3, "S3", SprintState::Future)], None),
        );
        gateway
    }

    #[tokio::test]
    async fn test_versions_then_sprints_across_pages() {
        let (sync, gateway, store) = board_sync(two_page_board(), MemoryStore::default());
        let stats = sync.sync_board(&CancelToken::new(), 9).await.unwrap();

        assert_eq!(stats, BoardStats { fix_versions: 1, sprints: 3 });
        assert_eq!(
            gateway.calls(),
            vec![
                "board_versions:9:".to_string(),
                "board_sprints:9:".into(),
                "board_sprints:9:2".into(),
            ]
        );
        assert_eq!(
            store.writes(),
            vec!["version:7".to_string(), "sprint:1".into(), "sprint:2".into(), "sprint:3".into()]
        );
        assert_eq!(store.sprints.lock().unwrap()[&3].state, SprintState::Future);
    }

    #[tokio::test]
    async fn test_write_failure_stops_before_sprints() {
        let store = MemoryStore {
            fail_writes: [7].into(),
            ..MemoryStore::default()
        };
        let (sync, gateway, store) = board_sync(two_page_board(), store);

        let err = sync.sync_board(&CancelToken::new(), 9).await.unwrap_err();
        assert!(matches!(err, Error::Store { .. }));
        assert_eq!(gateway.calls(), vec!["board_versions:9:".to_string()]);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_cursor_is_decode_error() {
        let mut gateway = FakeGateway::default();
        gateway
            .board_versions
            .insert((9, String::new()), Page::new(Vec::new(), Some("5".into())));
        gateway
            .board_versions
            .insert((9, "5".into()), Page::new(vec![version(1)], Some("5".into())));

        let (sync, _, _) = board_sync(gateway, MemoryStore::default());
        let err = sync.sync_board(&CancelToken::new(), 9).await.unwrap_err();
        assert!(matches!(err, Error::Decode { operation: "list_board_versions", .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (sync, gateway, _) = board_sync(two_page_board(), MemoryStore::default());
        let token = CancelToken::new();
        token.cancel();

        let err = sync.sync_board(&token, 9).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(gateway.calls().is_empty());
    }
}
