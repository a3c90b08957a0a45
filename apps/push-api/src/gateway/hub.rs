//! In-process connection hub: the default [`Transport`].
//!
//! Tokens are issued by `open_connection` and stay valid until they expire,
//! so a client can re-attach after a dropped socket. Each subscriber has at
//! most one attached connection; a newer attach replaces the older one.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use push_common::id::{self, prefix};
use tokio::sync::mpsc;

use crate::error::PushError;
use crate::push::clock::Clock;
use crate::push::encoder::EncodedPayload;
use crate::push::event::{ChannelToken, SubscriberId};
use crate::push::transport::{DeliveryContext, Transport, TransportFailure};

use super::events::ConnectionEvent;

/// Events buffered per connection before sends start waiting.
const CONNECTION_BUFFER: usize = 64;

struct IssuedToken {
    subscriber: SubscriberId,
    expires_at: DateTime<Utc>,
}

struct Connection {
    connection_id: String,
    wants_native: Option<bool>,
    expires_at: DateTime<Utc>,
    sender: mpsc::Sender<ConnectionEvent>,
}

/// A connection bound to a subscriber, handed to the socket handler.
pub struct AttachedConnection {
    pub subscriber: SubscriberId,
    pub connection_id: String,
    pub events: mpsc::Receiver<ConnectionEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AttachError {
    #[error("unknown channel token")]
    UnknownToken,
    #[error("channel token expired")]
    TokenExpired,
}

pub struct ConnectionHub {
    tokens: DashMap<String, IssuedToken>,
    connections: DashMap<SubscriberId, Connection>,
    clock: Arc<dyn Clock>,
    token_ttl: Duration,
}

impl ConnectionHub {
    pub fn new(clock: Arc<dyn Clock>, token_ttl_minutes: i64) -> Result<Self, PushError> {
        let token_ttl = Duration::try_minutes(token_ttl_minutes)
            .filter(|ttl| *ttl > Duration::zero())
            .ok_or_else(|| {
                PushError::InvalidConfiguration(format!(
                    "channel token TTL must be positive, got {token_ttl_minutes} minutes"
                ))
            })?;
        if clock.now().checked_add_signed(token_ttl).is_none() {
            return Err(PushError::InvalidConfiguration(format!(
                "channel token TTL of {token_ttl_minutes} minutes is out of range"
            )));
        }

        Ok(Self {
            tokens: DashMap::new(),
            connections: DashMap::new(),
            clock,
            token_ttl,
        })
    }

    /// Bind a live connection to the subscriber that owns `token`.
    pub fn attach(
        &self,
        token: &str,
        wants_native: Option<bool>,
    ) -> Result<AttachedConnection, AttachError> {
        if !id::has_prefix(token, prefix::CHANNEL_TOKEN) {
            return Err(AttachError::UnknownToken);
        }

        let now = self.clock.now();
        let (subscriber, expires_at) = {
            let issued = self.tokens.get(token).ok_or(AttachError::UnknownToken)?;
            (issued.subscriber.clone(), issued.expires_at)
        };
        if now >= expires_at {
            self.tokens.remove(token);
            return Err(AttachError::TokenExpired);
        }

        let (sender, events) = mpsc::channel(CONNECTION_BUFFER);
        let connection_id = id::prefixed_ulid(prefix::CONNECTION);
        let replaced = self.connections.insert(
            subscriber.clone(),
            Connection {
                connection_id: connection_id.clone(),
                wants_native,
                expires_at,
                sender,
            },
        );
        if let Some(old) = replaced {
            tracing::debug!(%subscriber, old = %old.connection_id, "connection replaced");
        }

        Ok(AttachedConnection {
            subscriber,
            connection_id,
            events,
        })
    }

    /// Forget the connection if it is still the current one for `subscriber`.
    pub fn detach(&self, subscriber: &SubscriberId, connection_id: &str) {
        self.connections
            .remove_if(subscriber, |_, c| c.connection_id == connection_id);
    }

    /// Drop lapsed tokens and tell their connections to go away.
    ///
    /// Returns the number of connections that were sent `TokenExpired`.
    pub fn expire_tokens(&self) -> usize {
        let now = self.clock.now();
        self.tokens.retain(|_, t| t.expires_at > now);

        let expired: Vec<SubscriberId> = self
            .connections
            .iter()
            .filter(|c| c.expires_at <= now)
            .map(|c| c.key().clone())
            .collect();

        let mut notified = 0;
        for subscriber in expired {
            let Some((_, connection)) = self
                .connections
                .remove_if(&subscriber, |_, c| c.expires_at <= now)
            else {
                continue;
            };
            // A full buffer drops the event; the closed sender still ends the connection.
            let _ = connection.sender.try_send(ConnectionEvent::TokenExpired);
            notified += 1;
        }

        if notified > 0 {
            tracing::info!(expired = notified, "channel tokens expired");
        }
        notified
    }

    pub fn is_connected(&self, subscriber: &SubscriberId) -> bool {
        self.connections.contains_key(subscriber)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[async_trait]
impl Transport for ConnectionHub {
    async fn open_connection(
        &self,
        subscriber: &SubscriberId,
    ) -> Result<ChannelToken, TransportFailure> {
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(self.token_ttl)
            .ok_or_else(|| TransportFailure::Rejected("token expiry out of range".to_string()))?;
        let token = id::prefixed_ulid(prefix::CHANNEL_TOKEN);
        self.tokens.insert(
            token.clone(),
            IssuedToken {
                subscriber: subscriber.clone(),
                expires_at,
            },
        );
        Ok(ChannelToken::new(token))
    }

    async fn send(
        &self,
        subscriber: &SubscriberId,
        payload: &EncodedPayload,
    ) -> Result<(), TransportFailure> {
        let (sender, connection_id) = match self.connections.get(subscriber) {
            Some(c) => (c.sender.clone(), c.connection_id.clone()),
            None => return Err(TransportFailure::NotConnected),
        };

        if sender
            .send(ConnectionEvent::Message(payload.clone()))
            .await
            .is_err()
        {
            self.detach(subscriber, &connection_id);
            return Err(TransportFailure::Closed);
        }
        Ok(())
    }

    fn delivery_context(&self, subscriber: &SubscriberId) -> DeliveryContext {
        DeliveryContext {
            subscriber: subscriber.clone(),
            wants_native: self
                .connections
                .get(subscriber)
                .and_then(|c| c.wants_native),
        }
    }
}

/// Periodically expire channel tokens until the hub is dropped elsewhere.
pub fn spawn_token_sweeper(
    hub: Arc<ConnectionHub>,
    every: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await; // First tick fires immediately; skip it.
        loop {
            ticker.tick().await;
            hub.expire_tokens();
        }
    })
}
