//! Subscription registry: which subscribers want which event types, and until when.
//!
//! Records live in the key-value store as JSON arrays:
//! - `push:subs:<eventType>` holds `{subscriber, expires_at}` in insertion order,
//! - `push:types:<subscriberId>` holds `{event_type, expires_at}` for keep-alive.
//!
//! Expiry is filtered at read time; expired entries are pruned on the next
//! write to the same key. Writes to one key are serialized by an async mutex
//! per key.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time;

use crate::db::kv::{KeyValueStore, StoreError};
use crate::error::PushError;

use super::clock::Clock;
use super::event::{EventType, SubscriberId, Subscription};

const SUBSCRIPTIONS_PREFIX: &str = "push:subs:";
const SUBSCRIBER_TYPES_PREFIX: &str = "push:types:";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SubscriptionRecord {
    subscriber: SubscriberId,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InterestRecord {
    event_type: EventType,
    expires_at: DateTime<Utc>,
}

/// Anything with an expiry can be pruned the same way.
trait Expiring {
    fn expires_at(&self) -> DateTime<Utc>;
}

impl Expiring for SubscriptionRecord {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl Expiring for InterestRecord {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

pub struct SubscriptionsRepository {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SubscriptionsRepository {
    /// `timeout` bounds every individual store call.
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            store,
            clock,
            timeout,
            locks: DashMap::new(),
        }
    }

    /// Insert or refresh the subscription of `subscriber` to `event_type`.
    ///
    /// A live subscription keeps its position; only `expires_at` changes.
    pub async fn subscribe(
        &self,
        subscriber: &SubscriberId,
        event_type: &EventType,
        expires_at: DateTime<Utc>,
    ) -> Result<Subscription, PushError> {
        let subs_key = subscriptions_key(event_type);
        self.locked(&subs_key, async {
            let now = self.clock.now();
            let mut records: Vec<SubscriptionRecord> = self.read(&subs_key).await?;
            records.retain(|r| r.expires_at > now);
            match records.iter_mut().find(|r| &r.subscriber == subscriber) {
                Some(record) => record.expires_at = expires_at,
                None => records.push(SubscriptionRecord {
                    subscriber: subscriber.clone(),
                    expires_at,
                }),
            }
            self.write(&subs_key, &records).await
        })
        .await?;

        // The subscription is live from here on; the index only feeds keep-alive.
        let types_key = subscriber_types_key(subscriber);
        let indexed = self
            .locked(&types_key, async {
                let now = self.clock.now();
                let mut records: Vec<InterestRecord> = self.read(&types_key).await?;
                records.retain(|r| r.expires_at > now);
                match records.iter_mut().find(|r| &r.event_type == event_type) {
                    Some(record) => record.expires_at = expires_at,
                    None => records.push(InterestRecord {
                        event_type: event_type.clone(),
                        expires_at,
                    }),
                }
                self.write(&types_key, &records).await
            })
            .await;
        if let Err(e) = indexed {
            tracing::warn!(%subscriber, %event_type, error = %e, "subscriber index not updated; keep-alive will skip this type");
        }

        tracing::debug!(%subscriber, %event_type, %expires_at, "subscription stored");

        Ok(Subscription {
            subscriber: subscriber.clone(),
            event_type: event_type.clone(),
            expires_at,
        })
    }

    /// Subscribers holding a live subscription to `event_type`, in insertion order.
    pub async fn subscribed_users(
        &self,
        event_type: &EventType,
    ) -> Result<Vec<SubscriberId>, PushError> {
        let now = self.clock.now();
        let records: Vec<SubscriptionRecord> = self.read(&subscriptions_key(event_type)).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.expires_at > now)
            .map(|r| r.subscriber)
            .collect())
    }

    /// Event types `subscriber` holds a live subscription to, in insertion order.
    pub async fn subscribed_types(
        &self,
        subscriber: &SubscriberId,
    ) -> Result<Vec<EventType>, PushError> {
        let now = self.clock.now();
        let records: Vec<InterestRecord> = self.read(&subscriber_types_key(subscriber)).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.expires_at > now)
            .map(|r| r.event_type)
            .collect())
    }

    /// Remove the subscription. Absent subscriptions are not an error.
    pub async fn unsubscribe(
        &self,
        subscriber: &SubscriberId,
        event_type: &EventType,
    ) -> Result<(), PushError> {
        // The index is cleared before the record: keep-alive must never revive
        // a removed subscription.
        let types_key = subscriber_types_key(subscriber);
        self.locked(&types_key, async {
            let now = self.clock.now();
            let mut records: Vec<InterestRecord> = self.read(&types_key).await?;
            let before = records.len();
            records.retain(|r| &r.event_type != event_type && r.expires_at > now);
            if records.len() != before {
                self.write(&types_key, &records).await?;
            }
            Ok::<_, PushError>(())
        })
        .await?;

        let subs_key = subscriptions_key(event_type);
        let removed = self
            .locked(&subs_key, async {
                let now = self.clock.now();
                let mut records: Vec<SubscriptionRecord> = self.read(&subs_key).await?;
                let before = records.len();
                records.retain(|r| &r.subscriber != subscriber && r.expires_at > now);
                if records.len() != before {
                    self.write(&subs_key, &records).await?;
                }
                Ok::<_, PushError>(before != records.len())
            })
            .await?;

        if removed {
            tracing::debug!(%subscriber, %event_type, "subscription removed");
        }
        Ok(())
    }

    /// Run `f` while holding the write lock for `key`.
    async fn locked<T>(&self, key: &str, f: impl Future<Output = T>) -> T {
        let lock = self.locks.entry(key.to_string()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            f.await
        };
        drop(lock);
        self.locks.remove_if(key, |_, l| Arc::strong_count(l) == 1);
        result
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>, PushError> {
        let stored = self.bounded(key, self.store.get(key)).await?;
        match stored {
            Some(stored) => serde_json::from_str(&stored.value).map_err(|e| {
                PushError::RepositoryUnavailable(format!("corrupt record at {key}: {e}"))
            }),
            None => Ok(Vec::new()),
        }
    }

    /// Persist `records`, letting the store drop the key when the last entry expires.
    async fn write<T: Serialize + Expiring>(&self, key: &str, records: &[T]) -> Result<(), PushError> {
        let Some(latest) = records.iter().map(Expiring::expires_at).max() else {
            return self.bounded(key, self.store.del(key)).await;
        };
        let value = serde_json::to_string(records).map_err(|e| {
            PushError::RepositoryUnavailable(format!("cannot serialize record at {key}: {e}"))
        })?;
        self.bounded(key, self.store.put(key, &value, Some(latest))).await
    }

    async fn bounded<T>(
        &self,
        key: &str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, PushError> {
        match time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(PushError::RepositoryUnavailable(format!("{key}: {e}"))),
            Err(_elapsed) => Err(PushError::RepositoryUnavailable(format!(
                "{key}: store call timed out after {} ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

fn subscriptions_key(event_type: &EventType) -> String {
    format!("{SUBSCRIPTIONS_PREFIX}{event_type}")
}

fn subscriber_types_key(subscriber: &SubscriberId) -> String {
    format!("{SUBSCRIBER_TYPES_PREFIX}{subscriber}")
}
