use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use super::event::{ChangeEvent, SubscriptionSpec};

/// Items of an open change stream. An `Err` item means the stream dropped.
pub type ChangeStream = BoxStream<'static, Result<ChangeEvent, TransportError>>;

/// Both variants are retried by the subscription pump.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The open was refused or the endpoint was unreachable.
    #[error("failed to open change stream: {0}")]
    Connect(String),
    #[error("change stream dropped: {0}")]
    /// A live stream ended with an error.
    Dropped(String),
}

impl TransportError {
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect(message.into())
    }

    pub fn dropped(message: impl Into<String>) -> Self {
        Self::Dropped(message.into())
    }
}

/// The hosted realtime service, reduced to "open a filtered stream".
#[async_trait]
pub trait RealtimeTransport: Send + Sync + 'static {
    /// Open one stream delivering the events `spec` matches. The stream
    /// ending, or yielding an `Err`, counts as a drop.
    async fn open(&self, spec: &SubscriptionSpec) -> Result<ChangeStream, TransportError>;
}
