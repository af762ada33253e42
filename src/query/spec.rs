use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::backend::RangeQuery;
use crate::cache::{CacheKey, EntityKind};
use crate::realtime::{ChangeEvent, SubscriptionSpec};

use super::QueryDefaults;

/// Rows that can be de-duplicated when pages are appended.
pub trait Identified {
    fn id(&self) -> Uuid;
}

/// Per-instance behaviour of a façade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryPolicy {
    pub ttl: Duration,
    pub page_size: usize,
    /// Single-row queries never report more pages.
    pub paginated: bool,
    /// Refetch in the background even when the cache served the mount.
    pub background_refetch: bool,
}

/// Everything that distinguishes one entity façade from another.
pub trait QuerySpec: Send + Sync + 'static {
    type Item: Identified + Clone + DeserializeOwned + Send + Sync + 'static;

    fn entity(&self) -> EntityKind;

    fn cache_key(&self) -> CacheKey;

    /// Range read for `[offset, offset + limit)`.
    fn range(&self, offset: usize, limit: usize) -> RangeQuery;

    /// `(table, id)` when the query is a lookup of one row by primary key.
    /// Such queries are served by a single-row read instead of a range.
    fn single_row(&self) -> Option<(&'static str, Uuid)> {
        None
    }

    /// Change feeds that invalidate this entity.
    fn subscriptions(&self) -> Vec<SubscriptionSpec>;

    /// Whether a change delivered by one of the feeds concerns this query.
    fn accepts(&self, _event: &ChangeEvent) -> bool {
        true
    }

    fn policy(&self, defaults: &QueryDefaults) -> QueryPolicy;
}

/// Offset cursor. `has_more` is true iff the last page came back full, so a
/// list of exactly N pages costs one extra empty `load_more`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageCursor {
    pub offset: usize,
    pub page_size: usize,
    pub has_more: bool,
}

impl PageCursor {
    pub fn start(page_size: usize) -> Self {
        Self {
            offset: 0,
            page_size,
            has_more: false,
        }
    }

    pub fn after_page(fetched_at: usize, requested: usize, fetched: usize, page_size: usize) -> Self {
        Self {
            offset: fetched_at + fetched,
            page_size,
            has_more: requested > 0 && fetched == requested,
        }
    }

    pub fn exhausted(fetched: usize, page_size: usize) -> Self {
        Self {
            offset: fetched,
            page_size,
            has_more: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_page_means_more() {
        let cursor = PageCursor::after_page(0, 10, 10, 10);
        assert_eq!(cursor.offset, 10);
        assert!(cursor.has_more);
    }

    #[test]
    fn short_page_means_done() {
        let cursor = PageCursor::after_page(10, 10, 4, 10);
        assert_eq!(cursor.offset, 14);
        assert!(!cursor.has_more);
    }

    #[test]
    fn exact_boundary_over_reports_once() {
        // 20 rows total: the second full page still claims more.
        let second = PageCursor::after_page(10, 10, 10, 10);
        assert!(second.has_more);
        let third = PageCursor::after_page(second.offset, 10, 0, 10);
        assert!(!third.has_more);
        assert_eq!(third.offset, 20);
    }
}
