//! Change detection over the remote search.
//!
//! One spawned producer task pages through `search_lite` and pushes stamps
//! into a bounded channel. The calling task drains it, compares each stamp
//! with the stored one and dispatches ids that are new or changed, one at a
//! time. The first error on either side cancels the run's token, which
//! stops the other side at its next blocking point.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::config::DEFAULT_QUEUE_CAPACITY;
use crate::error::{Error, Result};
use crate::model::Stamp;
use crate::remote::RemoteGateway;
use crate::storage::LocalStore;
use crate::sync::{CancelToken, DetectStats, SyncStep};

/// Finds issues whose stamp changed since the last sync.
pub struct ChangeDetector<G, S> {
    gateway: Arc<G>,
    store: Arc<S>,
    queue_capacity: usize,
}

impl<G, S> ChangeDetector<G, S>
where
    G: RemoteGateway + 'static,
    S: LocalStore,
{
    pub fn new(gateway: Arc<G>, store: Arc<S>) -> Self {
        Self {
            gateway,
            store,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Bound on stamps buffered between the search and the dispatcher.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Scan every issue matching `filter` and dispatch the new or changed ones.
    ///
    /// # Errors
    ///
    /// Returns the first search, lookup or dispatch error, or
    /// `Error::Cancelled` if `token` stops first. Nothing is dispatched
    /// after the first error.
    pub async fn run<F, Fut>(&self, token: &CancelToken, filter: &str, dispatch: F) -> Result<DetectStats>
    where
        F: FnMut(u64) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut stats = DetectStats::default();
        self.run_with_stats(token, filter, &mut stats, dispatch).await?;
        Ok(stats)
    }

    /// Like [`run`](Self::run), filling `stats` as it goes so partial
    /// counts survive a failed run.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    pub async fn run_with_stats<F, Fut>(
        &self,
        token: &CancelToken,
        filter: &str,
        stats: &mut DetectStats,
        mut dispatch: F,
    ) -> Result<()>
    where
        F: FnMut(u64) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let run_token = token.child();
        // Stops the producer if this future is dropped mid-run.
        let _guard = run_token.drop_guard();

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let pages = Arc::new(AtomicUsize::new(0));
        let producer = tokio::spawn(produce(
            Arc::clone(&self.gateway),
            run_token.clone(),
            filter.to_string(),
            Arc::clone(&pages),
            tx,
        ));

        let consumed = self.consume(&run_token, rx, stats, &mut dispatch).await;
        if consumed.is_err() {
            run_token.cancel();
        }

        let produced = producer
            .await
            .unwrap_or_else(|e| Err(Error::Other(format!("search task failed: {e}"))));
        stats.pages = pages.load(Ordering::Relaxed);

        let result = first_error(consumed, produced);
        match &result {
            Ok(()) => debug!(
                pages = stats.pages,
                discovered = stats.discovered,
                dispatched = stats.dispatched,
                skipped = stats.skipped,
                "change detection finished"
            ),
            Err(err) if err.is_cancelled() => warn!(dispatched = stats.dispatched, "change detection cancelled: {err}"),
            Err(err) => warn!(dispatched = stats.dispatched, "change detection failed: {err}"),
        }
        result
    }

    async fn consume<F, Fut>(
        &self,
        token: &CancelToken,
        mut rx: mpsc::Receiver<Stamp>,
        stats: &mut DetectStats,
        dispatch: &mut F,
    ) -> Result<()>
    where
        F: FnMut(u64) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        loop {
            let stamp = tokio::select! {
                biased;
                reason = token.cancelled() => return Err(Error::Cancelled(reason)),
                next = rx.recv() => match next {
                    Some(stamp) => stamp,
                    None => return Ok(()),
                },
            };
            stats.discovered += 1;

            let stored = token
                .run_until_cancelled(self.store.get_stamp_by_id(stamp.id))
                .await
                .map_err(|e| e.in_step(SyncStep::LookupStamp, stamp.id))?;

            if stored.as_ref().is_some_and(|s| !s.differs_from(&stamp)) {
                stats.skipped += 1;
                trace!(id = stamp.id, key = %stamp.key, "unchanged, skipping");
                continue;
            }

            debug!(id = stamp.id, key = %stamp.key, new = stored.is_none(), "dispatching");
            token.run_until_cancelled(dispatch(stamp.id)).await?;
            stats.dispatched += 1;
        }
    }
}

/// Page through the search, feeding stamps to the consumer.
///
/// Cancels `token` on failure so a consumer blocked on an empty queue wakes.
async fn produce<G: RemoteGateway>(
    gateway: Arc<G>,
    token: CancelToken,
    filter: String,
    pages: Arc<AtomicUsize>,
    tx: mpsc::Sender<Stamp>,
) -> Result<()> {
    let result = paginate(gateway.as_ref(), &token, &filter, &pages, &tx).await;
    if result.is_err() {
        token.cancel();
    }
    result
}

async fn paginate<G: RemoteGateway>(
    gateway: &G,
    token: &CancelToken,
    filter: &str,
    pages: &AtomicUsize,
    tx: &mpsc::Sender<Stamp>,
) -> Result<()> {
    let mut seen = HashSet::new();
    let mut cursor: Option<String> = None;

    loop {
        token.checkpoint()?;
        let page = token
            .run_until_cancelled(gateway.search_lite(filter, cursor.as_deref()))
            .await?;
        let page_no = pages.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(page = page_no, count = page.items.len(), "fetched search page");

        for stamp in page.items {
            tokio::select! {
                biased;
                reason = token.cancelled() => return Err(Error::Cancelled(reason)),
                sent = tx.send(stamp) => {
                    // Receiver gone: the consumer already finished
                    if sent.is_err() {
                        return Ok(());
                    }
                }
            }
        }

        let Some(next) = page.next_cursor else {
            return Ok(());
        };
        if !seen.insert(next.clone()) {
            return Err(Error::Decode {
                operation: "search_lite",
                target: filter.to_string(),
                message: format!("pagination cursor '{next}' repeated"),
            });
        }
        cursor = Some(next);
    }
}

/// Pick the error to report: a real failure beats a cancellation, and the
/// consumer's failure beats the producer's.
fn first_error(consumed: Result<()>, produced: Result<()>) -> Result<()> {
    match (consumed, produced) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(c), Err(p)) if c.is_cancelled() && !p.is_cancelled() => Err(p),
        (Err(c), _) => Err(c),
        (Ok(()), Err(p)) => Err(p),
    }
}
