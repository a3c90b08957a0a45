//! Serialization of push events into wire payloads, chosen per recipient class.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PushError;

use super::event::{EventType, PushEvent};
use super::transport::DeliveryContext;

/// Key appended to every JSON payload naming the event shape.
pub const DISCRIMINATOR: &str = "event";

/// Wire form of one event for one encoding class. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodedPayload(Arc<str>);

impl EncodedPayload {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for EncodedPayload {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for EncodedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which family of encoder a recipient needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientClass {
    /// Typed client runtime; positional payloads driven by a schema.
    Structured,
    /// Generic client; flat JSON with a discriminator.
    Json,
}

impl FromStr for RecipientClass {
    type Err = PushError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "structured" => Ok(Self::Structured),
            "json" => Ok(Self::Json),
            other => Err(PushError::InvalidConfiguration(format!(
                "unknown encoding mode {other:?} (expected \"structured\" or \"json\")"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

/// Emits the event's fields in declaration order followed by the discriminator.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonEncoder;

#[derive(Serialize)]
struct Discriminated<'a, E> {
    #[serde(flatten)]
    fields: &'a E,
    event: &'a str,
}

impl JsonEncoder {
    pub fn encode<E: PushEvent>(&self, event: &E) -> Result<EncodedPayload, PushError> {
        let event_type = event.event_type();

        match serde_json::to_value(event) {
            Ok(Value::Object(fields)) if fields.contains_key(DISCRIMINATOR) => {
                return Err(PushError::Encoding(format!(
                    "{event_type} declares the reserved field `{DISCRIMINATOR}`"
                )));
            }
            Ok(Value::Object(_)) => {}
            Ok(_) => {
                return Err(PushError::Encoding(format!(
                    "{event_type} does not serialize to an object"
                )));
            }
            Err(e) => return Err(PushError::Encoding(e.to_string())),
        }

        let json = serde_json::to_string(&Discriminated {
            fields: event,
            event: event_type.as_str(),
        })
        .map_err(|e| PushError::Encoding(e.to_string()))?;

        Ok(EncodedPayload::from(json))
    }
}

// ---------------------------------------------------------------------------
// Structured
// ---------------------------------------------------------------------------

/// Field layout a typed client expects for one event type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventSchema {
    #[serde(default = "default_schema_version")]
    pub version: u32,
    pub fields: Vec<String>,
}

fn default_schema_version() -> u32 {
    1
}

/// Schema file entries: either a bare field list or a versioned schema.
#[derive(Deserialize)]
#[serde(untagged)]
enum SchemaEntry {
    Fields(Vec<String>),
    Versioned(EventSchema),
}

/// Positional encoder for typed client runtimes.
///
/// Output is `["<eventType>",<version>,[v1,v2,...]]` with values in schema
/// order, so the shape is fixed per event type.
#[derive(Debug, Default, Clone)]
pub struct StructuredEncoder {
    schemas: HashMap<EventType, EventSchema>,
}

impl StructuredEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a version-1 schema.
    pub fn with_schema<I, S>(mut self, event_type: EventType, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schemas.insert(
            event_type,
            EventSchema {
                version: 1,
                fields: fields.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    pub fn register(&mut self, event_type: EventType, schema: EventSchema) -> Result<(), PushError> {
        for (i, field) in schema.fields.iter().enumerate() {
            if schema.fields[..i].contains(field) {
                return Err(PushError::InvalidConfiguration(format!(
                    "schema for {event_type} lists field `{field}` twice"
                )));
            }
        }
        self.schemas.insert(event_type, schema);
        Ok(())
    }

    /// Parse a schema document such as `{"addPersonEvent": ["name", "age"]}`.
    pub fn from_json(json: &str) -> Result<Self, PushError> {
        let entries: HashMap<String, SchemaEntry> = serde_json::from_str(json)
            .map_err(|e| PushError::InvalidConfiguration(format!("invalid schema document: {e}")))?;

        let mut encoder = Self::new();
        for (name, entry) in entries {
            let schema = match entry {
                SchemaEntry::Fields(fields) => EventSchema { version: 1, fields },
                SchemaEntry::Versioned(schema) => schema,
            };
            let event_type = EventType::parse(&name).map_err(|e| {
                PushError::InvalidConfiguration(format!("schema document: {e}"))
            })?;
            encoder.register(event_type, schema)?;
        }
        Ok(encoder)
    }

    pub fn load(path: &Path) -> Result<Self, PushError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            PushError::InvalidConfiguration(format!("cannot read {}: {e}", path.display()))
        })?;
        let encoder = Self::from_json(&json)?;
        tracing::info!(path = %path.display(), schemas = encoder.schemas.len(), "structured schemas loaded");
        Ok(encoder)
    }

    pub fn supports(&self, event_type: &EventType) -> bool {
        self.schemas.contains_key(event_type)
    }

    pub fn encode<E: PushEvent>(&self, event: &E) -> Result<EncodedPayload, PushError> {
        let event_type = event.event_type();
        let schema = self
            .schemas
            .get(&event_type)
            .ok_or_else(|| PushError::UnsupportedEventType(event_type.clone()))?;

        let fields = match serde_json::to_value(event) {
            Ok(Value::Object(fields)) => fields,
            Ok(_) => {
                return Err(PushError::Encoding(format!(
                    "{event_type} does not serialize to an object"
                )));
            }
            Err(e) => return Err(PushError::Encoding(e.to_string())),
        };

        if let Some(extra) = fields.keys().find(|k| !schema.fields.contains(k)) {
            return Err(PushError::Encoding(format!(
                "{event_type} has field `{extra}` missing from its schema"
            )));
        }

        let values = schema
            .fields
            .iter()
            .map(|name| {
                fields.get(name).cloned().ok_or_else(|| {
                    PushError::Encoding(format!("{event_type} is missing field `{name}`"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let payload = serde_json::json!([event_type.as_str(), schema.version, values]);
        Ok(EncodedPayload::from(payload.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// An encoding strategy, borrowed from the factory.
#[derive(Debug, Clone, Copy)]
pub enum Encoder<'a> {
    Structured(&'a StructuredEncoder),
    Json(&'a JsonEncoder),
}

impl Encoder<'_> {
    pub fn class(&self) -> RecipientClass {
        match self {
            Encoder::Structured(_) => RecipientClass::Structured,
            Encoder::Json(_) => RecipientClass::Json,
        }
    }

    pub fn encode<E: PushEvent>(&self, event: &E) -> Result<EncodedPayload, PushError> {
        match self {
            Encoder::Structured(encoder) => encoder.encode(event),
            Encoder::Json(encoder) => encoder.encode(event),
        }
    }
}

/// Picks an encoder per recipient class.
#[derive(Debug, Clone)]
pub struct EncoderFactory {
    structured: StructuredEncoder,
    json: JsonEncoder,
    default_class: RecipientClass,
}

impl EncoderFactory {
    pub fn new(structured: StructuredEncoder, default_class: RecipientClass) -> Self {
        Self {
            structured,
            json: JsonEncoder,
            default_class,
        }
    }

    /// The class a recipient falls into; the configured default applies when
    /// the connection did not declare a preference.
    pub fn class_for(&self, context: &DeliveryContext) -> RecipientClass {
        match context.wants_native {
            Some(true) => RecipientClass::Structured,
            Some(false) => RecipientClass::Json,
            None => self.default_class,
        }
    }

    pub fn encoder_for(&self, class: RecipientClass) -> Encoder<'_> {
        match class {
            RecipientClass::Structured => Encoder::Structured(&self.structured),
            RecipientClass::Json => Encoder::Json(&self.json),
        }
    }
}
