//! Channel tokens and interest registration on behalf of subscribers.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::PushError;

use super::clock::Clock;
use super::event::{ChannelToken, EventType, SubscriberId, Subscription};
use super::repository::SubscriptionsRepository;
use super::transport::Transport;

pub struct ChannelRegistrar {
    transport: Arc<dyn Transport>,
    repository: Arc<SubscriptionsRepository>,
    clock: Arc<dyn Clock>,
    default_ttl_minutes: i64,
}

impl ChannelRegistrar {
    /// `default_ttl_minutes` is applied by [`keep_alive`](Self::keep_alive) and
    /// by callers that do not pick a TTL; it must be positive.
    pub fn new(
        transport: Arc<dyn Transport>,
        repository: Arc<SubscriptionsRepository>,
        clock: Arc<dyn Clock>,
        default_ttl_minutes: i64,
    ) -> Result<Self, PushError> {
        if default_ttl_minutes <= 0 {
            return Err(PushError::InvalidConfiguration(format!(
                "subscription TTL must be positive, got {default_ttl_minutes} minutes"
            )));
        }
        Ok(Self {
            transport,
            repository,
            clock,
            default_ttl_minutes,
        })
    }

    pub fn default_ttl_minutes(&self) -> i64 {
        self.default_ttl_minutes
    }

    /// `now + ttl_minutes`, rejecting non-positive or overflowing TTLs.
    pub fn compute_expiration(
        now: DateTime<Utc>,
        ttl_minutes: i64,
    ) -> Result<DateTime<Utc>, PushError> {
        if ttl_minutes <= 0 {
            return Err(PushError::InvalidConfiguration(format!(
                "subscription TTL must be positive, got {ttl_minutes} minutes"
            )));
        }
        Duration::try_minutes(ttl_minutes)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                PushError::InvalidConfiguration(format!(
                    "subscription TTL of {ttl_minutes} minutes is out of range"
                ))
            })
    }

    /// Ask the transport for a channel token. Interest is registered separately.
    pub async fn open(&self, subscriber: &SubscriberId) -> Result<ChannelToken, PushError> {
        let token = self.transport.open_connection(subscriber).await?;
        tracing::info!(%subscriber, "channel opened");
        Ok(token)
    }

    pub async fn register_interest(
        &self,
        subscriber: &SubscriberId,
        event_type: &EventType,
        ttl_minutes: i64,
    ) -> Result<Subscription, PushError> {
        let expires_at = Self::compute_expiration(self.clock.now(), ttl_minutes)?;
        self.repository
            .subscribe(subscriber, event_type, expires_at)
            .await
    }

    pub async fn remove_interest(
        &self,
        subscriber: &SubscriberId,
        event_type: &EventType,
    ) -> Result<(), PushError> {
        self.repository.unsubscribe(subscriber, event_type).await
    }

    /// Extend every live subscription of `subscriber` by the default TTL.
    ///
    /// Returns how many subscriptions were refreshed.
    pub async fn keep_alive(&self, subscriber: &SubscriberId) -> Result<usize, PushError> {
        let expires_at = Self::compute_expiration(self.clock.now(), self.default_ttl_minutes)?;
        let event_types = self.repository.subscribed_types(subscriber).await?;

        for event_type in &event_types {
            self.repository
                .subscribe(subscriber, event_type, expires_at)
                .await?;
        }

        tracing::debug!(%subscriber, refreshed = event_types.len(), "keep-alive");
        Ok(event_types.len())
    }
}
