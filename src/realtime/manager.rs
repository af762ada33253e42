//! Subscription lifecycle.
//!
//! Every `subscribe` spawns one pump task that owns exactly one transport
//! stream at a time and walks `Opening -> Open -> Reconnecting -> Open ...`
//! until the handle is closed. Events reach the consumer through a bounded
//! channel, so a reconnect is invisible to it: the same receiver keeps
//! yielding events and nothing is registered twice.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::StreamExt;
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backoff::{Backoff, ReconnectPolicy};
use super::event::{ChangeEvent, SubscriptionSpec};
use super::transport::RealtimeTransport;

pub(crate) const METRIC_OPEN_STREAMS: &str = "talentgrid_realtime_open_streams";
pub(crate) const METRIC_RECONNECT: &str = "talentgrid_realtime_reconnect_total";

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Process-unique handle id, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Unsubscribed, or unknown to the manager.
    Closed,
    Opening,
    /// Events are flowing.
    Open,
    /// Waiting out a backoff delay after a refused open or a drop.
    Reconnecting,
}

struct HandleEntry {
    spec: SubscriptionSpec,
    state: Arc<watch::Sender<SubscriptionState>>,
    task: JoinHandle<()>,
}

struct ManagerInner {
    transport: Arc<dyn RealtimeTransport>,
    policy: ReconnectPolicy,
    channel_capacity: usize,
    handles: DashMap<SubscriptionId, HandleEntry>,
    next_id: AtomicU64,
}

impl ManagerInner {
    fn close(&self, id: SubscriptionId) -> bool {
        let Some((_, entry)) = self.handles.remove(&id) else {
            return false;
        };
        entry.task.abort();
        entry.state.send_replace(SubscriptionState::Closed);
        gauge!(METRIC_OPEN_STREAMS).set(self.handles.len() as f64);
        debug!(subscription_id = %id, spec = %entry.spec, "Subscription closed");
        true
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        for entry in self.handles.iter() {
            entry.task.abort();
        }
    }
}

/// Owns every open change stream of the application.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<ManagerInner>,
}

impl SubscriptionManager {
    pub fn new(transport: Arc<dyn RealtimeTransport>, policy: ReconnectPolicy) -> Self {
        Self::with_channel_capacity(transport, policy, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_channel_capacity(
        transport: Arc<dyn RealtimeTransport>,
        policy: ReconnectPolicy,
        channel_capacity: usize,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                transport,
                policy,
                channel_capacity: channel_capacity.max(1),
                handles: DashMap::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_settings(
        transport: Arc<dyn RealtimeTransport>,
        settings: &crate::config::RealtimeSettings,
    ) -> Self {
        Self::with_channel_capacity(
            transport,
            ReconnectPolicy::from(settings),
            settings.channel_capacity.get(),
        )
    }

    /// Open a stream for `spec`. Must be called from within a tokio runtime.
    ///
    /// The returned handle closes its stream when dropped.
    pub fn subscribe(&self, spec: SubscriptionSpec) -> Subscription {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (events_tx, events_rx) = mpsc::channel(self.inner.channel_capacity);
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Opening);
        let state_tx = Arc::new(state_tx);

        let task = tokio::spawn(pump(Pump {
            id,
            transport: Arc::clone(&self.inner.transport),
            spec: spec.clone(),
            policy: self.inner.policy,
            events: events_tx,
            state: Arc::clone(&state_tx),
        }));

        self.inner.handles.insert(
            id,
            HandleEntry {
                spec: spec.clone(),
                state: state_tx,
                task,
            },
        );
        gauge!(METRIC_OPEN_STREAMS).set(self.inner.handles.len() as f64);
        info!(subscription_id = %id, spec = %spec, "Subscription registered");

        Subscription {
            id,
            spec,
            events: events_rx,
            state: state_rx,
            manager: Arc::downgrade(&self.inner),
            closed: false,
        }
    }

    /// Close a handle by id. Closing an unknown or already closed id is a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.close(id)
    }

    pub fn open_handles(&self) -> usize {
        self.inner.handles.len()
    }

    /// `Closed` for ids the manager no longer tracks.
    pub fn state(&self, id: SubscriptionId) -> SubscriptionState {
        self.inner
            .handles
            .get(&id)
            .map(|entry| *entry.state.borrow())
            .unwrap_or(SubscriptionState::Closed)
    }

    /// Close every open handle and return how many were closed. Their
    /// consumers see the event channel end.
    pub fn close_all(&self) -> usize {
        let ids: Vec<SubscriptionId> = self.inner.handles.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter(|id| self.inner.close(*id)).count()
    }
}

/// Consumer side of one subscription.
pub struct Subscription {
    id: SubscriptionId,
    spec: SubscriptionSpec,
    events: mpsc::Receiver<ChangeEvent>,
    state: watch::Receiver<SubscriptionState>,
    manager: Weak<ManagerInner>,
    closed: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn spec(&self) -> &SubscriptionSpec {
        &self.spec
    }

    pub fn state(&self) -> SubscriptionState {
        if self.closed {
            SubscriptionState::Closed
        } else {
            *self.state.borrow()
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Next matching event. `None` once the handle is closed, locally or by
    /// the manager.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        if self.closed {
            return None;
        }
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        if self.closed {
            return None;
        }
        self.events.try_recv().ok()
    }

    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<ChangeEvent>> {
        if self.closed {
            return Poll::Ready(None);
        }
        self.events.poll_recv(cx)
    }

    /// Wait until the pump reports `target`. Returns false if the handle
    /// closed first.
    pub async fn wait_for_state(&mut self, target: SubscriptionState) -> bool {
        if self.closed {
            return target == SubscriptionState::Closed;
        }
        self.state.wait_for(|state| *state == target).await.is_ok()
    }

    /// Close the stream. Calling this more than once is a no-op.
    pub fn unsubscribe(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.events.close();
        if let Some(manager) = self.manager.upgrade() {
            manager.close(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("spec", &self.spec)
            .field("state", &self.state())
            .finish()
    }
}

struct Pump {
    id: SubscriptionId,
    transport: Arc<dyn RealtimeTransport>,
    spec: SubscriptionSpec,
    policy: ReconnectPolicy,
    events: mpsc::Sender<ChangeEvent>,
    state: Arc<watch::Sender<SubscriptionState>>,
}

async fn pump(ctx: Pump) {
    let Pump {
        id,
        transport,
        spec,
        policy,
        events,
        state,
    } = ctx;
    let mut backoff = Backoff::new(policy);

    loop {
        match transport.open(&spec).await {
            Ok(mut stream) => {
                backoff.reset();
                state.send_replace(SubscriptionState::Open);
                debug!(subscription_id = %id, spec = %spec, "Change stream open");

                while let Some(item) = stream.next().await {
                    match item {
                        Ok(event) => {
                            if !spec.matches(&event) {
                                continue;
                            }
                            if events.send(event).await.is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            warn!(
                                subscription_id = %id,
                                spec = %spec,
                                error = %err,
                                "Change stream dropped"
                            );
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                warn!(
                    subscription_id = %id,
                    spec = %spec,
                    error = %err,
                    "Failed to open change stream"
                );
            }
        }

        if events.is_closed() {
            return;
        }

        state.send_replace(SubscriptionState::Reconnecting);
        counter!(METRIC_RECONNECT).increment(1);
        let delay = backoff.next_delay();
        debug!(
            subscription_id = %id,
            attempt = backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            "Reconnecting change stream"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = events.closed() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::timeout;

    use super::*;
    use crate::backend::MemoryBackend;
    use crate::realtime::{EventFilter, RowFilter};

    const WAIT: Duration = Duration::from_secs(2);

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            initial_ms: 5,
            max_ms: 20,
            multiplier: 2.0,
            jitter_ms: 0,
        }
    }

    fn manager(backend: &MemoryBackend) -> SubscriptionManager {
        SubscriptionManager::new(Arc::new(backend.clone()), fast_policy())
    }

    #[tokio::test]
    async fn delivers_matching_events() {
        let backend = MemoryBackend::new();
        let manager = manager(&backend);
        let mut sub = manager.subscribe(
            SubscriptionSpec::new("applications", EventFilter::Insert)
                .with_filter(RowFilter::eq("candidate_id", "c1")),
        );
        assert!(timeout(WAIT, sub.wait_for_state(SubscriptionState::Open)).await.expect("open"));

        backend.emit(ChangeEvent::insert("applications", json!({ "candidate_id": "c2" })));
        backend.emit(ChangeEvent::insert("applications", json!({ "candidate_id": "c1" })));

        let event = timeout(WAIT, sub.recv()).await.expect("event").expect("open channel");
        assert_eq!(event.row(), Some(&json!({ "candidate_id": "c1" })));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn unsubscribe_twice_is_a_no_op() {
        let backend = MemoryBackend::new();
        let manager = manager(&backend);
        let mut sub = manager.subscribe(SubscriptionSpec::new("messages", EventFilter::Any));
        let id = sub.id();

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!manager.unsubscribe(id));
        assert_eq!(manager.open_handles(), 0);
        assert_eq!(sub.state(), SubscriptionState::Closed);
        assert_eq!(manager.state(id), SubscriptionState::Closed);
    }

    #[tokio::test]
    async fn dropping_handle_releases_stream() {
        let backend = MemoryBackend::new();
        let manager = manager(&backend);
        {
            let mut sub = manager.subscribe(SubscriptionSpec::new("feed_posts", EventFilter::Any));
            timeout(WAIT, sub.wait_for_state(SubscriptionState::Open))
                .await
                .expect("open");
            assert_eq!(manager.open_handles(), 1);
        }
        assert_eq!(manager.open_handles(), 0);

        // The aborted pump drops its receiver once the runtime reaps it.
        timeout(WAIT, async {
            while backend.open_streams() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("stream released");
        backend.emit(ChangeEvent::insert("feed_posts", json!({})));
        assert_eq!(backend.open_streams(), 0);
    }

    #[tokio::test]
    async fn reconnects_after_drop_without_duplicating_delivery() {
        let backend = MemoryBackend::new();
        let manager = manager(&backend);
        let mut sub = manager.subscribe(SubscriptionSpec::new("messages", EventFilter::Insert));
        timeout(WAIT, sub.wait_for_state(SubscriptionState::Open))
            .await
            .expect("open");

        backend.drop_streams();
        timeout(WAIT, sub.wait_for_state(SubscriptionState::Reconnecting))
            .await
            .expect("reconnecting");
        timeout(WAIT, sub.wait_for_state(SubscriptionState::Open))
            .await
            .expect("reopened");
        assert_eq!(backend.open_streams(), 1);

        backend.emit(ChangeEvent::insert("messages", json!({ "n": 1 })));
        let event = timeout(WAIT, sub.recv()).await.expect("event").expect("open channel");
        assert_eq!(event.row(), Some(&json!({ "n": 1 })));
        assert!(sub.try_recv().is_none());
        assert_eq!(manager.open_handles(), 1);
    }

    #[tokio::test]
    async fn retries_failed_opens_silently() {
        let backend = MemoryBackend::new();
        backend.fail_next_opens(2);
        let manager = manager(&backend);
        let mut sub = manager.subscribe(SubscriptionSpec::new("profiles", EventFilter::Update));

        assert!(
            timeout(WAIT, sub.wait_for_state(SubscriptionState::Open))
                .await
                .expect("eventually open")
        );
    }

    #[tokio::test]
    async fn close_all_releases_every_handle() {
        let backend = MemoryBackend::new();
        let manager = manager(&backend);
        let _a = manager.subscribe(SubscriptionSpec::new("profiles", EventFilter::Any));
        let _b = manager.subscribe(SubscriptionSpec::new("profiles", EventFilter::Any));
        assert_eq!(manager.open_handles(), 2);

        assert_eq!(manager.close_all(), 2);
        assert_eq!(manager.open_handles(), 0);
    }
}
