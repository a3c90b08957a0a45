//! Subscription registry, encoders and dispatch.

pub mod clock;
pub mod encoder;
pub mod event;
pub mod registrar;
pub mod repository;
pub mod service;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use encoder::{EncodedPayload, Encoder, EncoderFactory, JsonEncoder, RecipientClass, StructuredEncoder};
pub use event::{ChannelToken, EventFields, EventType, PushEvent, RawEvent, SubscriberId, Subscription};
pub use registrar::ChannelRegistrar;
pub use repository::SubscriptionsRepository;
pub use service::{PushResult, PushService};
pub use transport::{DeliveryContext, Transport, TransportFailure};
