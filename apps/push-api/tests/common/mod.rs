#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use push_api::config::Config;
use push_api::db::kv::{KeyValueStore, MemoryStore, StoreError, StoredValue};
use push_api::push::clock::{Clock, ManualClock};
use push_api::push::encoder::{EncodedPayload, EncoderFactory, RecipientClass, StructuredEncoder};
use push_api::push::event::{ChannelToken, SubscriberId};
use push_api::push::registrar::ChannelRegistrar;
use push_api::push::repository::SubscriptionsRepository;
use push_api::push::service::PushService;
use push_api::push::transport::{DeliveryContext, Transport, TransportFailure};
use push_api::AppState;

pub const TTL_MINUTES: i64 = 30;

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

pub fn test_config() -> Config {
    let mut config = Config::new(TTL_MINUTES);
    config.send_timeout = Duration::from_millis(500);
    config.store_timeout = Duration::from_millis(500);
    config
}

/// Build application state backed by an in-memory store and a manual clock.
pub fn test_state() -> (AppState, Arc<ManualClock>) {
    test_state_with(test_config(), StructuredEncoder::new())
}

pub fn test_state_with(config: Config, structured: StructuredEncoder) -> (AppState, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(epoch()));
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::with_clock(clock.clone()));
    let state = AppState::assemble_with_schemas(config, kv, clock.clone(), structured)
        .expect("assemble state");
    (state, clock)
}

/// Build a router with test state.
pub fn test_app() -> (Router, AppState, Arc<ManualClock>) {
    let (state, clock) = test_state();
    let app = push_api::routes::router().with_state(state.clone());
    (app, state, clock)
}

// ---------------------------------------------------------------------------
// Transport double
// ---------------------------------------------------------------------------

/// Records every send; chosen subscribers fail or never complete.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(SubscriberId, String)>>,
    failing: HashSet<SubscriberId>,
    stalled: HashSet<SubscriberId>,
    native: HashMap<SubscriberId, bool>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, subscriber: &str) -> Self {
        self.failing.insert(subscriber.into());
        self
    }

    pub fn stalled(mut self, subscriber: &str) -> Self {
        self.stalled.insert(subscriber.into());
        self
    }

    pub fn native(mut self, subscriber: &str, wants_native: bool) -> Self {
        self.native.insert(subscriber.into(), wants_native);
        self
    }

    /// Sends observed so far, in arrival order.
    pub fn sent(&self) -> Vec<(SubscriberId, String)> {
        self.sent.lock().clone()
    }

    pub fn payload_for(&self, subscriber: &str) -> Option<String> {
        self.sent
            .lock()
            .iter()
            .find(|(s, _)| s.as_str() == subscriber)
            .map(|(_, p)| p.clone())
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn open_connection(
        &self,
        subscriber: &SubscriberId,
    ) -> Result<ChannelToken, TransportFailure> {
        Ok(ChannelToken::new(format!("cht_{subscriber}")))
    }

    async fn send(
        &self,
        subscriber: &SubscriberId,
        payload: &EncodedPayload,
    ) -> Result<(), TransportFailure> {
        self.sent
            .lock()
            .push((subscriber.clone(), payload.as_str().to_string()));

        if self.stalled.contains(subscriber) {
            std::future::pending::<()>().await;
        }
        if self.failing.contains(subscriber) {
            return Err(TransportFailure::Rejected("connection reset".to_string()));
        }
        Ok(())
    }

    fn delivery_context(&self, subscriber: &SubscriberId) -> DeliveryContext {
        DeliveryContext {
            subscriber: subscriber.clone(),
            wants_native: self.native.get(subscriber).copied(),
        }
    }
}

// ---------------------------------------------------------------------------
// Store double
// ---------------------------------------------------------------------------

/// A store whose every call errors, as if the backend were unreachable.
pub struct FailingStore;

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<StoredValue>, StoreError> {
        Err(StoreError("connection refused".to_string()))
    }

    async fn put(
        &self,
        _key: &str,
        _value: &str,
        _expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        Err(StoreError("connection refused".to_string()))
    }

    async fn del(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError("connection refused".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Service wiring
// ---------------------------------------------------------------------------

/// Push core wired against a transport double.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub repository: Arc<SubscriptionsRepository>,
    pub registrar: ChannelRegistrar,
    pub push: PushService,
    pub transport: Arc<RecordingTransport>,
}

pub fn harness(transport: RecordingTransport) -> Harness {
    harness_with(
        transport,
        None,
        StructuredEncoder::new(),
        RecipientClass::Json,
    )
}

pub fn harness_with(
    transport: RecordingTransport,
    store: Option<Arc<dyn KeyValueStore>>,
    structured: StructuredEncoder,
    default_class: RecipientClass,
) -> Harness {
    let config = test_config();
    let clock = Arc::new(ManualClock::new(epoch()));
    let store: Arc<dyn KeyValueStore> = match store {
        Some(store) => store,
        None => Arc::new(MemoryStore::with_clock(clock.clone())),
    };
    let transport = Arc::new(transport);
    let dyn_clock: Arc<dyn Clock> = clock.clone();

    let repository = Arc::new(SubscriptionsRepository::new(
        store,
        dyn_clock.clone(),
        config.store_timeout,
    ));
    let registrar = ChannelRegistrar::new(
        transport.clone(),
        repository.clone(),
        dyn_clock,
        TTL_MINUTES,
    )
    .expect("registrar");
    let push = PushService::new(
        repository.clone(),
        EncoderFactory::new(structured, default_class),
        transport.clone(),
        config.send_timeout,
        config.push_max_concurrency,
    );

    Harness {
        clock,
        repository,
        registrar,
        push,
        transport,
    }
}

// ---------------------------------------------------------------------------
// In-flight tracking transport
// ---------------------------------------------------------------------------

/// Holds every send for `hold`, recording the most sends ever in flight at once.
pub struct InFlightTransport {
    hold: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

impl InFlightTransport {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for InFlightTransport {
    async fn open_connection(
        &self,
        subscriber: &SubscriberId,
    ) -> Result<ChannelToken, TransportFailure> {
        Ok(ChannelToken::new(format!("cht_{subscriber}")))
    }

    async fn send(
        &self,
        _subscriber: &SubscriberId,
        _payload: &EncodedPayload,
    ) -> Result<(), TransportFailure> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
