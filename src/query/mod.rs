//! Cached-query façades.
//!
//! A façade combines a cache read, a paginated range read, and realtime
//! invalidation for one entity. [`CachedQuery`] holds the shared behaviour;
//! the entity modules only describe keys, filters and change feeds through
//! [`QuerySpec`].
//!
//! Façades are driven explicitly: callers `mount`, then poll
//! [`CachedQuery::next_update`] (or [`CachedQuery::settle`]) to apply fetch
//! results and change events.

mod cached;
mod entities;
mod mutation;
mod spec;
mod task;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::backend::{DataSource, FetchError};
use crate::cache::{CacheConfig, QueryCache};
use crate::clock::{Clock, SystemClock};
use crate::realtime::{ChangeKind, SubscriptionManager};

pub use cached::{CachedQuery, QuerySnapshot};
pub use entities::{ApplicationsQuery, FeedQuery, MessagesQuery, OffersQuery, ProfileQuery};
pub use mutation::MutationService;
pub use spec::{Identified, PageCursor, QueryPolicy, QuerySpec};
pub use task::{FetchTask, TaskOutcome};

pub(crate) const METRIC_QUERY_FETCH_MS: &str = "talentgrid_query_fetch_ms";

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const DEFAULT_FEED_PAGE_SIZE: usize = 20;
pub const DEFAULT_MESSAGES_PAGE_SIZE: usize = 50;

/// Page sizes and TTLs the entity façades pick their policy from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDefaults {
    pub cache: CacheConfig,
    pub page_size: usize,
    pub feed_page_size: usize,
    pub messages_page_size: usize,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            page_size: DEFAULT_PAGE_SIZE,
            feed_page_size: DEFAULT_FEED_PAGE_SIZE,
            messages_page_size: DEFAULT_MESSAGES_PAGE_SIZE,
        }
    }
}

impl QueryDefaults {
    pub fn from_settings(settings: &crate::config::Settings) -> Self {
        Self {
            cache: CacheConfig::from(&settings.cache),
            page_size: settings.query.page_size.get(),
            feed_page_size: settings.query.feed_page_size.get(),
            messages_page_size: settings.query.messages_page_size.get(),
        }
    }
}

/// Shared services every façade is built from.
#[derive(Clone)]
pub struct QueryContext {
    pub cache: Arc<QueryCache>,
    pub source: Arc<dyn DataSource>,
    pub realtime: SubscriptionManager,
    pub defaults: QueryDefaults,
    pub clock: Arc<dyn Clock>,
}

impl QueryContext {
    pub fn new(
        cache: Arc<QueryCache>,
        source: Arc<dyn DataSource>,
        realtime: SubscriptionManager,
    ) -> Self {
        Self {
            cache,
            source,
            realtime,
            defaults: QueryDefaults::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_defaults(mut self, defaults: QueryDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build an unmounted façade for `spec`.
    pub fn query<Q: QuerySpec>(&self, spec: Q) -> CachedQuery<Q> {
        CachedQuery::new(self.clone(), spec)
    }

    pub fn mutations(&self) -> MutationService {
        MutationService::new(self)
    }
}

/// Fetch failure as exposed to views. Clonable so snapshots can carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{message}")]
pub struct QueryError {
    pub message: String,
}

impl From<&FetchError> for QueryError {
    fn from(err: &FetchError) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchKind {
    /// Replace the list from offset 0.
    Reset,
    /// Append the next page.
    Append,
}

/// What a call to [`CachedQuery::next_update`] applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryUpdate {
    Fetched {
        kind: FetchKind,
        fetched: usize,
        added: usize,
    },
    Failed(QueryError),
    /// A change event dropped the entity family and started a refetch.
    Invalidated(ChangeKind),
    /// A fetch finished after it stopped being relevant.
    Discarded,
}
