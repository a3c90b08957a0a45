//! Resolves subscribers for an event, encodes it, and fans it out.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio::time;

use crate::error::PushError;

use super::encoder::{EncodedPayload, EncoderFactory, RecipientClass};
use super::event::{PushEvent, SubscriberId};
use super::repository::SubscriptionsRepository;
use super::transport::{Transport, TransportFailure};

/// Outcome of one push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushResult {
    /// Sends attempted, one per live subscriber.
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: BTreeMap<SubscriberId, TransportFailure>,
}

impl PushResult {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct PushService {
    repository: Arc<SubscriptionsRepository>,
    encoders: EncoderFactory,
    transport: Arc<dyn Transport>,
    send_timeout: Duration,
    max_concurrency: usize,
}

impl PushService {
    pub fn new(
        repository: Arc<SubscriptionsRepository>,
        encoders: EncoderFactory,
        transport: Arc<dyn Transport>,
        send_timeout: Duration,
        max_concurrency: usize,
    ) -> Self {
        Self {
            repository,
            encoders,
            transport,
            send_timeout,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Deliver `event` to every live subscriber of its type.
    ///
    /// Failing to resolve subscribers or to encode the event fails the whole
    /// push before anything is sent. Individual send failures are collected in
    /// the result and never stop the rest of the batch.
    pub async fn push<E: PushEvent>(&self, event: &E) -> Result<PushResult, PushError> {
        let event_type = event.event_type();

        let subscribers = self
            .repository
            .subscribed_users(&event_type)
            .await
            .inspect_err(|e| tracing::error!(%event_type, error = %e, "push aborted: cannot resolve subscribers"))?;

        if subscribers.is_empty() {
            tracing::debug!(%event_type, "push skipped: no subscribers");
            return Ok(PushResult::default());
        }

        // Encode once per recipient class.
        let mut payloads: HashMap<RecipientClass, EncodedPayload> = HashMap::new();
        let mut deliveries = Vec::with_capacity(subscribers.len());
        for subscriber in subscribers {
            let class = self
                .encoders
                .class_for(&self.transport.delivery_context(&subscriber));
            let payload = match payloads.get(&class) {
                Some(payload) => payload.clone(),
                None => {
                    let payload = self
                        .encoders
                        .encoder_for(class)
                        .encode(event)
                        .inspect_err(|e| tracing::warn!(%event_type, ?class, error = %e, "push aborted: encoding failed"))?;
                    payloads.insert(class, payload.clone());
                    payload
                }
            };
            deliveries.push((subscriber, payload));
        }

        let attempted = deliveries.len();
        let outcomes: Vec<(SubscriberId, Result<(), TransportFailure>)> = stream::iter(deliveries)
            .map(|(subscriber, payload)| async move {
                let outcome = self.deliver(&subscriber, &payload).await;
                (subscriber, outcome)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut result = PushResult {
            attempted,
            ..PushResult::default()
        };
        for (subscriber, outcome) in outcomes {
            match outcome {
                Ok(()) => result.succeeded += 1,
                Err(failure) => {
                    tracing::warn!(%subscriber, %event_type, %failure, "delivery failed");
                    result.failures.insert(subscriber, failure);
                }
            }
        }

        tracing::info!(
            %event_type,
            attempted = result.attempted,
            succeeded = result.succeeded,
            failed = result.failures.len(),
            "push completed"
        );

        Ok(result)
    }

    async fn deliver(
        &self,
        subscriber: &SubscriberId,
        payload: &EncodedPayload,
    ) -> Result<(), TransportFailure> {
        match time::timeout(self.send_timeout, self.transport.send(subscriber, payload)).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => Err(TransportFailure::TimedOut(
                self.send_timeout.as_millis() as u64,
            )),
        }
    }
}
