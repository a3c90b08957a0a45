//! The delivery capability the dispatch core pushes through.

use async_trait::async_trait;
use serde::Serialize;

use super::encoder::EncodedPayload;
use super::event::{ChannelToken, SubscriberId};

/// Why a single recipient did not get a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TransportFailure {
    /// The subscriber has no attached connection.
    #[error("no open connection")]
    NotConnected,
    /// The connection went away while sending.
    #[error("connection closed")]
    Closed,
    /// The send did not finish within the send timeout.
    #[error("send timed out after {0} ms")]
    TimedOut(u64),
    /// The transport refused the operation.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Per-recipient facts the transport knows about a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryContext {
    pub subscriber: SubscriberId,
    /// `Some(true)` when the client asked for native (structured) payloads,
    /// `Some(false)` when it asked for JSON, `None` when it did not say.
    pub wants_native: Option<bool>,
}

impl DeliveryContext {
    pub fn unknown(subscriber: SubscriberId) -> Self {
        Self {
            subscriber,
            wants_native: None,
        }
    }
}

/// Pushes bytes to connected subscribers and hands out channel tokens.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a token the subscriber uses to attach a connection.
    async fn open_connection(&self, subscriber: &SubscriberId)
        -> Result<ChannelToken, TransportFailure>;

    /// Deliver one payload to one subscriber.
    async fn send(
        &self,
        subscriber: &SubscriberId,
        payload: &EncodedPayload,
    ) -> Result<(), TransportFailure>;

    /// Describe how the subscriber wants to receive payloads.
    fn delivery_context(&self, subscriber: &SubscriberId) -> DeliveryContext {
        DeliveryContext::unknown(subscriber.clone())
    }
}
