//! Realtime change feeds.
//!
//! A [`SubscriptionManager`] turns `(table, event, filter)` tuples into
//! channels of [`ChangeEvent`]s, hiding transport drops behind a jittered
//! exponential reconnect.

mod backoff;
mod event;
mod manager;
mod transport;

pub use backoff::ReconnectPolicy;
pub use event::{
    ChangeEvent, ChangeKind, EventFilter, RowFilter, RowFilterParseError, SubscriptionSpec,
};
pub use manager::{Subscription, SubscriptionId, SubscriptionManager, SubscriptionState};
pub use transport::{ChangeStream, RealtimeTransport, TransportError};

pub(crate) use event::value_text;
pub(crate) use manager::{METRIC_OPEN_STREAMS, METRIC_RECONNECT};
