//! Storage backend boundary.
//!
//! The hosted database is reached through [`DataSource`]: paginated range
//! reads, single-row reads, and writes that return the written row.

mod memory;
mod rest;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::realtime::value_text;

pub use memory::MemoryBackend;
pub use rest::RestDataSource;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("server error: status {status} body {body}")]
    Server { status: u16, body: String },
    #[error("failed to decode row: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("row `{id}` not found in `{table}`")]
    NotFound { table: String, id: Uuid },
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl FetchError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn not_found(table: impl Into<String>, id: Uuid) -> Self {
        Self::NotFound {
            table: table.into(),
            id,
        }
    }
}

/// Row predicate of a range read.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(column.into(), value.into())
    }

    pub fn matches(&self, row: &Value) -> bool {
        match self {
            Filter::Eq(column, expected) => row
                .get(column)
                .is_some_and(|actual| value_text(actual) == value_text(expected)),
            Filter::And(filters) => filters.iter().all(|filter| filter.matches(row)),
            Filter::Or(filters) => filters.iter().any(|filter| filter.matches(row)),
        }
    }

    /// Nested form used inside `and(...)` / `or(...)` groups.
    fn nested(&self) -> String {
        match self {
            Filter::Eq(column, value) => format!("{column}.eq.{}", value_text(value)),
            Filter::And(filters) => format!("and({})", join_nested(filters)),
            Filter::Or(filters) => format!("or({})", join_nested(filters)),
        }
    }

    /// Top-level query pair.
    pub(crate) fn query_pair(&self) -> (String, String) {
        match self {
            Filter::Eq(column, value) => (column.clone(), format!("eq.{}", value_text(value))),
            Filter::And(filters) => ("and".to_string(), format!("({})", join_nested(filters))),
            Filter::Or(filters) => ("or".to_string(), format!("({})", join_nested(filters))),
        }
    }
}

fn join_nested(filters: &[Filter]) -> String {
    filters
        .iter()
        .map(Filter::nested)
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = if self.descending { "desc" } else { "asc" };
        write!(f, "{}.{direction}", self.column)
    }
}

/// `(table, filter, orderBy, offset, limit)` read.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    pub table: String,
    pub filters: Vec<Filter>,
    pub order: Option<OrderBy>,
    pub offset: usize,
    pub limit: usize,
}

impl RangeQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            order: None,
            offset: 0,
            limit: 0,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order = Some(OrderBy {
            column: column.into(),
            descending,
        });
        self
    }

    pub fn range(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|filter| filter.matches(row))
    }
}

#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    async fn fetch_range(&self, query: &RangeQuery) -> Result<Vec<Value>, FetchError>;

    async fn fetch_one(&self, table: &str, id: Uuid) -> Result<Option<Value>, FetchError>;

    async fn insert(&self, table: &str, row: Value) -> Result<Value, FetchError>;

    async fn update(&self, table: &str, id: Uuid, patch: Value) -> Result<Value, FetchError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn or_of_ands_matches_either_direction() {
        let filter = Filter::Or(vec![
            Filter::And(vec![Filter::eq("sender_id", "a"), Filter::eq("receiver_id", "b")]),
            Filter::And(vec![Filter::eq("sender_id", "b"), Filter::eq("receiver_id", "a")]),
        ]);

        assert!(filter.matches(&json!({ "sender_id": "a", "receiver_id": "b" })));
        assert!(filter.matches(&json!({ "sender_id": "b", "receiver_id": "a" })));
        assert!(!filter.matches(&json!({ "sender_id": "a", "receiver_id": "c" })));
    }

    #[test]
    fn query_pairs_use_postgrest_syntax() {
        assert_eq!(
            Filter::eq("is_active", true).query_pair(),
            ("is_active".to_string(), "eq.true".to_string())
        );

        let or = Filter::Or(vec![
            Filter::And(vec![Filter::eq("sender_id", "a"), Filter::eq("receiver_id", "b")]),
            Filter::eq("sender_id", "c"),
        ]);
        assert_eq!(
            or.query_pair(),
            (
                "or".to_string(),
                "(and(sender_id.eq.a,receiver_id.eq.b),sender_id.eq.c)".to_string()
            )
        );
    }

    #[test]
    fn order_renders_direction() {
        let query = RangeQuery::new("feed_posts").order_by("created_at", true);
        assert_eq!(
            query.order.map(|order| order.to_string()),
            Some("created_at.desc".to_string())
        );
    }
}
