use std::collections::HashSet;
use std::future::poll_fn;
use std::sync::Arc;
use std::task::Poll;
use std::time::Instant;

use metrics::histogram;
use serde::Serialize;
use tracing::{debug, instrument, trace, warn};

use crate::backend::FetchError;
use crate::cache::CachedValue;
use crate::realtime::{ChangeEvent, Subscription, SubscriptionState};

use super::spec::{Identified, PageCursor, QueryPolicy, QuerySpec};
use super::task::{FetchTask, TaskOutcome};
use super::{FetchKind, METRIC_QUERY_FETCH_MS, QueryContext, QueryError, QueryUpdate};

/// What a façade writes to the cache: the loaded list and where it stopped.
struct CachedPages<T> {
    items: Vec<T>,
    cursor: PageCursor,
}

type FetchResult<T> = Result<Vec<T>, FetchError>;

struct InFlight<T> {
    task: FetchTask<FetchResult<T>>,
    kind: FetchKind,
    offset: usize,
    limit: usize,
    started: Instant,
}

enum Wake<T> {
    Fetched(TaskOutcome<FetchResult<T>>),
    Changed(ChangeEvent),
    Drained,
}

/// View-facing state of a façade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuerySnapshot<T> {
    pub data: Vec<T>,
    pub loading: bool,
    pub error: Option<QueryError>,
    pub has_more: bool,
}

/// Cache-first, paginated, realtime-invalidated list of one entity.
///
/// At most one fetch is in flight. Starting a refetch cancels a pending
/// `load_more`; unmounting cancels everything and closes the change feeds,
/// so no result is applied after `unmount`.
pub struct CachedQuery<Q: QuerySpec> {
    ctx: QueryContext,
    spec: Q,
    policy: QueryPolicy,
    data: Vec<Q::Item>,
    cursor: PageCursor,
    loading: bool,
    error: Option<QueryError>,
    in_flight: Option<InFlight<Q::Item>>,
    subscriptions: Vec<Subscription>,
    generation: u64,
    mounted: bool,
}

impl<Q: QuerySpec> CachedQuery<Q> {
    pub fn new(ctx: QueryContext, spec: Q) -> Self {
        let policy = spec.policy(&ctx.defaults);
        Self {
            ctx,
            spec,
            policy,
            data: Vec::new(),
            cursor: PageCursor::start(policy.page_size),
            loading: false,
            error: None,
            in_flight: None,
            subscriptions: Vec::new(),
            generation: 0,
            mounted: false,
        }
    }

    pub fn spec(&self) -> &Q {
        &self.spec
    }

    pub fn policy(&self) -> QueryPolicy {
        self.policy
    }

    pub fn data(&self) -> &[Q::Item] {
        &self.data
    }

    pub fn has_more(&self) -> bool {
        self.cursor.has_more
    }

    pub fn cursor(&self) -> PageCursor {
        self.cursor
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&QueryError> {
        self.error.as_ref()
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn snapshot(&self) -> QuerySnapshot<Q::Item> {
        QuerySnapshot {
            data: self.data.clone(),
            loading: self.loading,
            error: self.error.clone(),
            has_more: self.cursor.has_more,
        }
    }

    /// Serve from cache when possible, otherwise fetch page 0, then open the
    /// change feeds. Mounting twice is a no-op.
    #[instrument(skip(self), fields(entity = %self.spec.entity(), key = %self.spec.cache_key()))]
    pub fn mount(&mut self) {
        if self.mounted {
            return;
        }
        self.mounted = true;
        self.generation += 1;

        let key = self.spec.cache_key();
        match self.ctx.cache.get_as::<CachedPages<Q::Item>>(&key) {
            Some(cached) => {
                self.data = cached.items.clone();
                self.cursor = cached.cursor;
                self.loading = false;
                debug!(items = self.data.len(), "Served from cache");
                if self.policy.background_refetch {
                    self.start_fetch(FetchKind::Reset, false);
                }
            }
            None => self.start_fetch(FetchKind::Reset, true),
        }

        self.subscriptions = self
            .spec
            .subscriptions()
            .into_iter()
            .map(|spec| self.ctx.realtime.subscribe(spec))
            .collect();
    }

    /// Cancel in-flight work and close every change feed.
    pub fn unmount(&mut self) {
        if !self.mounted {
            return;
        }
        self.mounted = false;
        self.generation += 1;
        self.in_flight = None;
        self.loading = false;
        for mut subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        debug!(entity = %self.spec.entity(), "Query unmounted");
    }

    /// Switch to another scope (for example another conversation peer).
    pub fn set_spec(&mut self, spec: Q) {
        let was_mounted = self.mounted;
        self.unmount();
        self.policy = spec.policy(&self.ctx.defaults);
        self.spec = spec;
        self.data.clear();
        self.cursor = PageCursor::start(self.policy.page_size);
        self.error = None;
        if was_mounted {
            self.mount();
        }
    }

    /// Reload from offset 0, keeping the depth the user has scrolled to.
    pub fn refetch(&mut self) {
        if !self.mounted {
            return;
        }
        self.start_fetch(FetchKind::Reset, true);
    }

    /// Fetch the next page. Ignored while any fetch is in flight or when the
    /// last page came back short.
    pub fn load_more(&mut self) -> bool {
        if !self.mounted || !self.policy.paginated || !self.cursor.has_more {
            return false;
        }
        if self.in_flight.is_some() {
            trace!(entity = %self.spec.entity(), "load_more ignored while fetching");
            return false;
        }
        self.start_fetch(FetchKind::Append, true);
        true
    }

    /// Drop every cached entry of this entity family and refetch.
    pub fn invalidate(&mut self) -> usize {
        let removed = self.ctx.cache.invalidate_entity(self.spec.entity());
        self.refetch();
        removed
    }

    /// Wait until every change feed reports open.
    pub async fn wait_until_live(&mut self) -> bool {
        for subscription in &mut self.subscriptions {
            if !subscription.wait_for_state(SubscriptionState::Open).await {
                return false;
            }
        }
        true
    }

    /// Apply the next fetch result or change event.
    ///
    /// Returns `None` when unmounted or when there is nothing left to wait
    /// for. With open change feeds and no fetch in flight this waits for the
    /// next event. Change feeds closed by the manager are dropped from the
    /// query; events the spec does not accept are skipped.
    pub async fn next_update(&mut self) -> Option<QueryUpdate> {
        loop {
            if !self.mounted || (self.in_flight.is_none() && self.subscriptions.is_empty()) {
                return None;
            }

            let in_flight = &mut self.in_flight;
            let subscriptions = &mut self.subscriptions;
            let wake = poll_fn(|cx| {
                if let Some(flight) = in_flight.as_mut()
                    && let Poll::Ready(outcome) = flight.task.poll_outcome(cx)
                {
                    return Poll::Ready(Wake::Fetched(outcome));
                }
                let mut index = 0;
                while index < subscriptions.len() {
                    match subscriptions[index].poll_recv(cx) {
                        Poll::Ready(Some(event)) => return Poll::Ready(Wake::Changed(event)),
                        Poll::Ready(None) => {
                            let closed = subscriptions.swap_remove(index);
                            debug!(subscription_id = %closed.id(), "Change feed closed");
                        }
                        Poll::Pending => index += 1,
                    }
                }
                if in_flight.is_none() && subscriptions.is_empty() {
                    return Poll::Ready(Wake::Drained);
                }
                Poll::Pending
            })
            .await;

            match wake {
                Wake::Fetched(outcome) => return Some(self.finish_flight(outcome)),
                Wake::Changed(event) if self.spec.accepts(&event) => {
                    return Some(self.apply_event(event));
                }
                Wake::Changed(event) => {
                    trace!(
                        table = %event.table,
                        kind = ?event.kind,
                        "Change event not for this query"
                    );
                }
                Wake::Drained => return None,
            }
        }
    }

    /// Run until no fetch is in flight. Returns the last applied update.
    pub async fn settle(&mut self) -> Option<QueryUpdate> {
        let mut last = None;
        loop {
            let outcome = match self.in_flight.as_mut() {
                Some(flight) => poll_fn(|cx| flight.task.poll_outcome(cx)).await,
                None => return last,
            };
            last = Some(self.finish_flight(outcome));
        }
    }

    fn start_fetch(&mut self, kind: FetchKind, foreground: bool) {
        let page_size = self.policy.page_size;
        let (offset, limit) = match kind {
            FetchKind::Reset if self.policy.paginated => {
                let pages = self.data.len().div_ceil(page_size).max(1);
                (0, pages * page_size)
            }
            FetchKind::Reset => (0, page_size),
            FetchKind::Append => (self.cursor.offset, page_size),
        };

        let source = Arc::clone(&self.ctx.source);
        let lookup = self.spec.single_row().filter(|_| kind == FetchKind::Reset);
        let query = self.spec.range(offset, limit);
        let task = FetchTask::spawn(self.generation, async move {
            let rows: Vec<serde_json::Value> = match lookup {
                Some((table, id)) => source.fetch_one(table, id).await?.into_iter().collect(),
                None => source.fetch_range(&query).await?,
            };
            rows.into_iter()
                .map(serde_json::from_value::<Q::Item>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(FetchError::from)
        });

        if self.in_flight.is_some() {
            debug!(entity = %self.spec.entity(), "Superseding in-flight fetch");
        }
        self.in_flight = Some(InFlight {
            task,
            kind,
            offset,
            limit,
            started: Instant::now(),
        });
        self.loading = foreground;
    }

    fn finish_flight(&mut self, outcome: TaskOutcome<FetchResult<Q::Item>>) -> QueryUpdate {
        let Some(flight) = self.in_flight.take() else {
            return QueryUpdate::Discarded;
        };
        self.loading = false;

        match outcome {
            TaskOutcome::Completed(result) if flight.task.generation() == self.generation => {
                self.apply_fetch(flight, result)
            }
            _ => {
                debug!(entity = %self.spec.entity(), "Discarding stale fetch");
                QueryUpdate::Discarded
            }
        }
    }

    fn apply_fetch(
        &mut self,
        flight: InFlight<Q::Item>,
        result: FetchResult<Q::Item>,
    ) -> QueryUpdate {
        let entity = self.spec.entity();
        histogram!(METRIC_QUERY_FETCH_MS, "entity" => entity.as_str())
            .record(flight.started.elapsed().as_secs_f64() * 1000.0);

        let page = match result {
            Ok(page) => page,
            Err(err) => {
                warn!(
                    entity = %entity,
                    error = %err,
                    kept = self.data.len(),
                    "Query fetch failed; keeping last data"
                );
                let error = QueryError::from(&err);
                self.error = Some(error.clone());
                return QueryUpdate::Failed(error);
            }
        };

        let fetched = page.len();
        let added = match flight.kind {
            FetchKind::Reset => {
                self.data = page;
                fetched
            }
            FetchKind::Append => append_unique(&mut self.data, page),
        };
        self.cursor = if self.policy.paginated {
            PageCursor::after_page(flight.offset, flight.limit, fetched, self.policy.page_size)
        } else {
            PageCursor::exhausted(fetched, self.policy.page_size)
        };
        self.error = None;
        self.store();

        debug!(
            entity = %entity,
            kind = ?flight.kind,
            fetched,
            added,
            has_more = self.cursor.has_more,
            "Query fetch applied"
        );
        QueryUpdate::Fetched {
            kind: flight.kind,
            fetched,
            added,
        }
    }

    fn apply_event(&mut self, event: ChangeEvent) -> QueryUpdate {
        let entity = self.spec.entity();
        let removed = self.ctx.cache.invalidate_entity(entity);
        debug!(
            entity = %entity,
            table = %event.table,
            kind = ?event.kind,
            removed,
            "Change event invalidated entity"
        );
        self.start_fetch(FetchKind::Reset, true);
        QueryUpdate::Invalidated(event.kind)
    }

    fn store(&self) {
        let pages: CachedValue = Arc::new(CachedPages {
            items: self.data.clone(),
            cursor: self.cursor,
        });
        self.ctx
            .cache
            .set_with_ttl(self.spec.cache_key(), pages, self.policy.ttl);
    }
}

/// Append rows whose id is not already present. Returns how many were added.
fn append_unique<T: Identified>(data: &mut Vec<T>, page: Vec<T>) -> usize {
    let mut seen: HashSet<_> = data.iter().map(Identified::id).collect();
    let before = data.len();
    data.extend(page.into_iter().filter(|item| seen.insert(item.id())));
    data.len() - before
}
