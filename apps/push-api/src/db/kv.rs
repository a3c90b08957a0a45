use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::push::clock::{Clock, SystemClock};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

/// A value read back from the store together with its expiry, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Abstraction over the key-value store that backs the subscription registry.
///
/// Backed by Redis in production and an in-memory map in tests.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value; expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError>;
    /// Write a value. `None` means no expiry.
    async fn put(&self, key: &str, value: &str, expires_at: Option<DateTime<Utc>>)
        -> Result<(), StoreError>;
    async fn del(&self, key: &str) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (local runs / tests)
// ---------------------------------------------------------------------------

pub struct MemoryStore {
    data: Mutex<HashMap<String, StoredValue>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of entries held, expired or not.
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        let now = self.clock.now();
        let mut data = self.data.lock();
        match data.get(key) {
            Some(stored) if stored.expires_at.is_some_and(|at| now >= at) => {
                data.remove(key);
                Ok(None)
            }
            Some(stored) => Ok(Some(stored.clone())),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.data.lock().insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.data.lock().remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Redis implementation
// ---------------------------------------------------------------------------

/// Redis-backed store.
///
/// Each call is one round trip; there is no WATCH/MULTI around the
/// repository's read-modify-write. Write serialization comes from the
/// repository's in-process per-key locks, so one Redis database should be
/// written by one push-api process at a time.
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
    clock: Arc<dyn Clock>,
}

impl RedisStore {
    pub async fn connect(redis_url: &str, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            tracing::error!(?e, "invalid redis url");
            StoreError(e.to_string())
        })?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| {
                tracing::error!(?e, "redis connect failed");
                StoreError(e.to_string())
            })?;

        tracing::info!("redis store connected");

        Ok(Self { conn, clock })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        let mut conn = self.conn.clone();
        let (value, pttl): (Option<String>, i64) = redis::pipe()
            .get(key)
            .pttl(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                tracing::error!(?e, "redis get failed");
                StoreError(e.to_string())
            })?;

        Ok(value.map(|value| StoredValue {
            value,
            // PTTL is -1 for keys without expiry and -2 for missing keys.
            expires_at: (pttl > 0).then(|| self.clock.now() + Duration::milliseconds(pttl)),
        }))
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();

        let result = match expires_at {
            Some(at) => {
                let ttl_ms = (at - self.clock.now()).num_milliseconds();
                if ttl_ms <= 0 {
                    conn.del::<_, ()>(key).await
                } else {
                    conn.pset_ex::<_, _, ()>(key, value, ttl_ms as u64).await
                }
            }
            None => conn.set::<_, _, ()>(key, value).await,
        };

        result.map_err(|e| {
            tracing::error!(?e, "redis set failed");
            StoreError(e.to_string())
        })
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(|e| {
            tracing::error!(?e, "redis del failed");
            StoreError(e.to_string())
        })
    }
}
