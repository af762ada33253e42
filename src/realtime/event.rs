//! Change events and the subscription specs that select them.
//!
//! A [`SubscriptionSpec`] names a table, the change kinds of interest and an
//! optional [`RowFilter`]. Transports deliver [`ChangeEvent`]s; the spec's
//! `matches` is the same predicate a server applies, so in-process backends
//! filter exactly like the hosted service.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Kind of row change. Serialized in upper case (`INSERT`) as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Which change kinds a subscription wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventFilter {
    Insert,
    Update,
    Delete,
    /// Every change kind; serialized as `*`.
    #[serde(rename = "*")]
    Any,
}

impl EventFilter {
    pub fn matches(&self, kind: ChangeKind) -> bool {
        matches!(
            (self, kind),
            (EventFilter::Any, _)
                | (EventFilter::Insert, ChangeKind::Insert)
                | (EventFilter::Update, ChangeKind::Update)
                | (EventFilter::Delete, ChangeKind::Delete)
        )
    }
}

/// A server-side row change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    #[serde(rename = "event")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub new: Option<Value>,
    #[serde(default)]
    pub old: Option<Value>,
}

impl ChangeEvent {
    pub fn insert(table: impl Into<String>, row: Value) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Insert,
            new: Some(row),
            old: None,
        }
    }

    pub fn update(table: impl Into<String>, old: Value, new: Value) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Update,
            new: Some(new),
            old: Some(old),
        }
    }

    pub fn delete(table: impl Into<String>, old: Value) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Delete,
            new: None,
            old: Some(old),
        }
    }

    /// The row a filter is evaluated against: `new`, or `old` for deletes.
    pub fn row(&self) -> Option<&Value> {
        self.new.as_ref().or(self.old.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid row filter `{input}`: expected `column=eq.value`")]
pub struct RowFilterParseError {
    input: String,
}

/// Equality filter in the `column=eq.value` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowFilter {
    pub column: String,
    pub value: String,
}

impl RowFilter {
    /// `column = value`, with the value compared in its text form.
    pub fn eq(column: impl Into<String>, value: impl fmt::Display) -> Self {
        Self {
            column: column.into(),
            value: value.to_string(),
        }
    }

    /// False when the row lacks the column.
    pub fn matches(&self, row: &Value) -> bool {
        row.get(&self.column)
            .is_some_and(|field| value_text(field) == self.value)
    }
}

impl fmt::Display for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

impl FromStr for RowFilter {
    type Err = RowFilterParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || RowFilterParseError {
            input: input.to_string(),
        };
        let (column, rest) = input.split_once('=').ok_or_else(invalid)?;
        let value = rest.strip_prefix("eq.").ok_or_else(invalid)?;
        if column.trim().is_empty() {
            return Err(invalid());
        }
        Ok(Self::eq(column.trim(), value))
    }
}

/// Text form of a JSON scalar as it appears in filters.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// The (table, event, filter) tuple one stream is opened for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionSpec {
    pub table: String,
    pub event: EventFilter,
    pub filter: Option<RowFilter>,
}

impl SubscriptionSpec {
    pub fn new(table: impl Into<String>, event: EventFilter) -> Self {
        Self {
            table: table.into(),
            event,
            filter: None,
        }
    }

    /// Narrow delivery to rows passing `filter`. Replaces any earlier filter.
    pub fn with_filter(mut self, filter: RowFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// True when table and kind match and the row passes the filter. Deletes
    /// are filtered on the old row.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table || !self.event.matches(event.kind) {
            return false;
        }
        match &self.filter {
            Some(filter) => event.row().is_some_and(|row| filter.matches(row)),
            None => true,
        }
    }
}

impl fmt::Display for SubscriptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}", self.table, self.event)?;
        if let Some(filter) = &self.filter {
            write!(f, ":{filter}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_equality_filter() {
        let filter: RowFilter = "candidate_id=eq.42".parse().expect("filter");
        assert_eq!(filter, RowFilter::eq("candidate_id", 42));
        assert_eq!(filter.to_string(), "candidate_id=eq.42");
    }

    #[test]
    fn rejects_malformed_filters() {
        assert!("candidate_id".parse::<RowFilter>().is_err());
        assert!("candidate_id=gt.4".parse::<RowFilter>().is_err());
        assert!("=eq.4".parse::<RowFilter>().is_err());
    }

    #[test]
    fn filter_compares_scalars_by_text() {
        let filter = RowFilter::eq("is_active", true);
        assert!(filter.matches(&json!({ "is_active": true })));
        assert!(!filter.matches(&json!({ "is_active": false })));
        assert!(!filter.matches(&json!({ "other": true })));
    }

    #[test]
    fn spec_checks_table_kind_and_row() {
        let spec = SubscriptionSpec::new("applications", EventFilter::Insert)
            .with_filter(RowFilter::eq("candidate_id", "c1"));

        let mine = ChangeEvent::insert("applications", json!({ "candidate_id": "c1" }));
        let theirs = ChangeEvent::insert("applications", json!({ "candidate_id": "c2" }));
        let other_table = ChangeEvent::insert("messages", json!({ "candidate_id": "c1" }));
        let update = ChangeEvent::update(
            "applications",
            json!({ "candidate_id": "c1" }),
            json!({ "candidate_id": "c1" }),
        );

        assert!(spec.matches(&mine));
        assert!(!spec.matches(&theirs));
        assert!(!spec.matches(&other_table));
        assert!(!spec.matches(&update));
    }

    #[test]
    fn deletes_are_filtered_on_old_row() {
        let spec = SubscriptionSpec::new("job_offers", EventFilter::Any)
            .with_filter(RowFilter::eq("recruiter_id", "r1"));
        let event = ChangeEvent::delete("job_offers", json!({ "recruiter_id": "r1" }));
        assert!(spec.matches(&event));
    }

    #[test]
    fn wildcard_event_round_trips_through_serde() {
        let encoded = serde_json::to_value(EventFilter::Any).expect("encode");
        assert_eq!(encoded, json!("*"));
        let decoded: EventFilter = serde_json::from_value(json!("DELETE")).expect("decode");
        assert_eq!(decoded, EventFilter::Delete);
    }
}
