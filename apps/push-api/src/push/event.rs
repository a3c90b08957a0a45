//! Event, subscriber and subscription value types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PushError;

/// Name of a category of event, e.g. `addPersonEvent`.
///
/// Always held in lower-camel-case, which doubles as the JSON discriminator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct EventType(String);

impl EventType {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(lower_camel(name.as_ref()))
    }

    /// Derive the event type from a Rust type name (`AddPersonEvent` → `addPersonEvent`).
    pub fn of<T: ?Sized>() -> Self {
        let full = std::any::type_name::<T>();
        let without_generics = full.split('<').next().unwrap_or(full);
        let simple = without_generics
            .rsplit("::")
            .next()
            .unwrap_or(without_generics);
        Self::new(simple)
    }

    /// Parse a client-supplied event type, rejecting blank names.
    pub fn parse(name: &str) -> Result<Self, PushError> {
        let name = name.trim();
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(PushError::InvalidEventType(format!(
                "invalid event type {name:?}"
            )));
        }
        Ok(Self::new(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn lower_camel(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.0
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identity of a connected party.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(String);

impl SubscriberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubscriberId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Token a subscriber presents to attach its transport connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelToken(String);

impl ChannelToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A typed payload that can be pushed to subscribers.
///
/// The serialized form must be a struct or map; its fields, in declaration
/// order, become the keys of the JSON payload.
pub trait PushEvent: Serialize + Send + Sync {
    fn event_type(&self) -> EventType {
        EventType::of::<Self>()
    }
}

/// One subscriber's interest in one event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub subscriber: SubscriberId,
    pub event_type: EventType,
    pub expires_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Event fields in the order the producer supplied them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFields(Vec<(String, Value)>);

impl EventFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for EventFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for EventFields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldsVisitor;

        impl<'de> Visitor<'de> for FieldsVisitor {
            type Value = EventFields;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object of event fields")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<EventFields, A::Error> {
                let mut fields: Vec<(String, Value)> =
                    Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, Value>()? {
                    if fields.iter().any(|(existing, _)| existing == &key) {
                        return Err(de::Error::custom(format!("duplicate field `{key}`")));
                    }
                    fields.push((key, value));
                }
                Ok(EventFields(fields))
            }
        }

        deserializer.deserialize_map(FieldsVisitor)
    }
}

/// An event whose type is only known at runtime, e.g. one submitted over HTTP.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    event_type: EventType,
    fields: EventFields,
}

impl RawEvent {
    pub fn new(event_type: EventType, fields: EventFields) -> Self {
        Self { event_type, fields }
    }
}

impl Serialize for RawEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

impl PushEvent for RawEvent {
    fn event_type(&self) -> EventType {
        self.event_type.clone()
    }
}
