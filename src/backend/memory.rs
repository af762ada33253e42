//! In-process backend.
//!
//! Holds tables as JSON rows, serves range reads, and acts as the realtime
//! transport: every write is broadcast to the open streams whose
//! subscription matches. Faults can be injected for fetches, stream opens
//! and live streams.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::cache::lock::{mutex_lock, rw_read, rw_write};
use crate::realtime::{
    ChangeEvent, ChangeStream, RealtimeTransport, SubscriptionSpec, TransportError, value_text,
};

use super::{DataSource, FetchError, OrderBy, RangeQuery};

const SOURCE: &str = "backend::memory";

struct Listener {
    spec: SubscriptionSpec,
    tx: mpsc::UnboundedSender<Result<ChangeEvent, TransportError>>,
}

#[derive(Default)]
struct MemoryInner {
    tables: RwLock<HashMap<String, Vec<Value>>>,
    listeners: Mutex<Vec<Listener>>,
    fetch_failures: Mutex<VecDeque<String>>,
    open_failures: AtomicUsize,
    fetches: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rows without emitting change events.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Value>) {
        rw_write(&self.inner.tables, SOURCE, "seed")
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        rw_read(&self.inner.tables, SOURCE, "rows")
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn delete(&self, table: &str, id: Uuid) -> Option<Value> {
        let removed = {
            let mut tables = rw_write(&self.inner.tables, SOURCE, "delete");
            let rows = tables.get_mut(table)?;
            let position = rows.iter().position(|row| row_has_id(row, id))?;
            rows.remove(position)
        };
        self.emit(ChangeEvent::delete(table, removed.clone()));
        Some(removed)
    }

    /// Deliver an event to every open stream whose subscription matches.
    pub fn emit(&self, event: ChangeEvent) {
        let mut listeners = mutex_lock(&self.inner.listeners, SOURCE, "emit");
        listeners.retain(|listener| !listener.tx.is_closed());
        let mut delivered = 0_usize;
        for listener in listeners.iter() {
            if listener.spec.matches(&event) && listener.tx.send(Ok(event.clone())).is_ok() {
                delivered += 1;
            }
        }
        debug!(table = %event.table, kind = ?event.kind, delivered, "Change event emitted");
    }

    /// Simulate the transport dropping every live stream.
    pub fn drop_streams(&self) {
        let listeners = std::mem::take(&mut *mutex_lock(&self.inner.listeners, SOURCE, "drop"));
        for listener in listeners {
            let _ = listener
                .tx
                .send(Err(TransportError::dropped("connection reset by backend")));
        }
    }

    pub fn fail_next_fetch(&self, message: impl Into<String>) {
        mutex_lock(&self.inner.fetch_failures, SOURCE, "fail_next_fetch").push_back(message.into());
    }

    pub fn fail_next_opens(&self, count: usize) {
        self.inner.open_failures.store(count, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.inner.fetches.load(Ordering::SeqCst)
    }

    pub fn open_streams(&self) -> usize {
        mutex_lock(&self.inner.listeners, SOURCE, "open_streams")
            .iter()
            .filter(|listener| !listener.tx.is_closed())
            .count()
    }

    fn take_fetch_failure(&self) -> Option<String> {
        mutex_lock(&self.inner.fetch_failures, SOURCE, "take_fetch_failure").pop_front()
    }
}

fn row_has_id(row: &Value, id: Uuid) -> bool {
    row.get("id")
        .is_some_and(|value| value_text(value) == id.to_string())
}

fn compare_rows(a: &Value, b: &Value, order: &OrderBy) -> CmpOrdering {
    let ordering = compare_fields(a.get(&order.column), b.get(&order.column));
    if order.descending {
        ordering.reverse()
    } else {
        ordering
    }
}

/// Missing and null fields sort after present ones.
fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    let a = a.filter(|value| !value.is_null());
    let b = b.filter(|value| !value.is_null());
    match (a, b) {
        (None, None) => CmpOrdering::Equal,
        (None, Some(_)) => CmpOrdering::Greater,
        (Some(_), None) => CmpOrdering::Less,
        (Some(a), Some(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => value_text(a).cmp(&value_text(b)),
        },
    }
}

#[async_trait]
impl DataSource for MemoryBackend {
    async fn fetch_range(&self, query: &RangeQuery) -> Result<Vec<Value>, FetchError> {
        self.inner.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if let Some(message) = self.take_fetch_failure() {
            return Err(FetchError::unavailable(message));
        }

        let mut rows: Vec<Value> = rw_read(&self.inner.tables, SOURCE, "fetch_range")
            .get(&query.table)
            .map(|rows| rows.iter().filter(|row| query.matches(row)).cloned().collect())
            .unwrap_or_default();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| compare_rows(a, b, order));
        }

        Ok(rows
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }

    async fn fetch_one(&self, table: &str, id: Uuid) -> Result<Option<Value>, FetchError> {
        self.inner.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if let Some(message) = self.take_fetch_failure() {
            return Err(FetchError::unavailable(message));
        }

        Ok(rw_read(&self.inner.tables, SOURCE, "fetch_one")
            .get(table)
            .and_then(|rows| rows.iter().find(|row| row_has_id(row, id)).cloned()))
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value, FetchError> {
        let Value::Object(mut fields) = row else {
            return Err(FetchError::InvalidInput("row must be a JSON object".into()));
        };
        fields
            .entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        let row = Value::Object(fields);

        rw_write(&self.inner.tables, SOURCE, "insert")
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        self.emit(ChangeEvent::insert(table, row.clone()));
        Ok(row)
    }

    async fn update(&self, table: &str, id: Uuid, patch: Value) -> Result<Value, FetchError> {
        let Value::Object(patch) = patch else {
            return Err(FetchError::InvalidInput("patch must be a JSON object".into()));
        };

        let (old, new) = {
            let mut tables = rw_write(&self.inner.tables, SOURCE, "update");
            let row = tables
                .get_mut(table)
                .and_then(|rows| rows.iter_mut().find(|row| row_has_id(row, id)))
                .ok_or_else(|| FetchError::not_found(table, id))?;
            let old = row.clone();
            let fields: &mut Map<String, Value> = row
                .as_object_mut()
                .ok_or_else(|| FetchError::InvalidInput("stored row is not an object".into()))?;
            fields.extend(patch);
            (old, row.clone())
        };

        self.emit(ChangeEvent::update(table, old, new.clone()));
        Ok(new)
    }
}

#[async_trait]
impl RealtimeTransport for MemoryBackend {
    async fn open(&self, spec: &SubscriptionSpec) -> Result<ChangeStream, TransportError> {
        let refused = self
            .inner
            .open_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::connect("realtime endpoint refused connection"));
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        mutex_lock(&self.inner.listeners, SOURCE, "open").push(Listener {
            spec: spec.clone(),
            tx,
        });

        let stream = async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        };
        Ok(stream.boxed())
    }
}
