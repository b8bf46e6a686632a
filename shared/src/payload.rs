use serde_json::{Map, Value};
use thiserror::Error;

use crate::{request_id::RequestId, types::ChannelIndex};

/// Field of a command object carrying the caller's correlation id
pub const REQUEST_ID_FIELD: &str = "i";

/// Errors that can occur when turning a JSON value into a command payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// Only objects, arrays and strings can be submitted
    #[error("Cannot submit a JSON {found} as a command. Use an object, an array of objects or a raw string")]
    UnsupportedValue { found: &'static str },

    /// A batch must contain at least one command
    #[error("Batch payload is empty")]
    EmptyBatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Single,
    Batch,
    Raw,
}

/// What a caller submits. A `Batch` is several commands travelling as one
/// unit; the server may roll back its trailing members.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Single(Map<String, Value>),
    Batch(Vec<Value>),
    Raw(String),
}

/// Dedup and cache key of a single-object command: the channel it is sent
/// on, the session it is sent under and its serialized body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    channel: ChannelIndex,
    key: String,
}

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn channel(&self) -> ChannelIndex {
        self.channel
    }
}

impl Payload {
    pub fn from_value(value: Value) -> Result<Self, PayloadError> {
        match value {
            Value::Object(map) => Ok(Payload::Single(map)),
            Value::Array(items) if items.is_empty() => Err(PayloadError::EmptyBatch),
            Value::Array(items) => Ok(Payload::Batch(items)),
            Value::String(raw) => Ok(Payload::Raw(raw)),
            Value::Null => Err(PayloadError::UnsupportedValue { found: "null" }),
            Value::Bool(_) => Err(PayloadError::UnsupportedValue { found: "boolean" }),
            Value::Number(_) => Err(PayloadError::UnsupportedValue { found: "number" }),
        }
    }

    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Single(_) => PayloadKind::Single,
            Payload::Batch(_) => PayloadKind::Batch,
            Payload::Raw(_) => PayloadKind::Raw,
        }
    }

    /// Number of entries this payload occupies in a wire array.
    pub fn slot_count(&self) -> usize {
        match self {
            Payload::Batch(items) => items.len(),
            _ => 1,
        }
    }

    /// The correlation id the caller put in the command, if any.
    pub fn caller_id(&self) -> Option<&str> {
        match self {
            Payload::Single(map) => map.get(REQUEST_ID_FIELD).and_then(Value::as_str),
            Payload::Batch(items) => items
                .first()
                .and_then(|item| item.get(REQUEST_ID_FIELD))
                .and_then(Value::as_str),
            Payload::Raw(_) => None,
        }
    }

    /// Stamps the correlation id on every command object of the payload.
    pub fn set_request_id(&mut self, id: &RequestId) {
        let stamp = |map: &mut Map<String, Value>| {
            map.insert(
                REQUEST_ID_FIELD.to_string(),
                Value::String(id.as_str().to_string()),
            );
        };
        match self {
            Payload::Single(map) => stamp(map),
            Payload::Batch(items) => {
                for item in items.iter_mut() {
                    if let Value::Object(map) = item {
                        stamp(map);
                    }
                }
            }
            Payload::Raw(_) => {}
        }
    }

    /// Dedup key of the payload on `channel` under `session`. Only single objects without a
    /// caller-controlled correlation id are eligible.
    pub fn fingerprint(&self, channel: ChannelIndex, session: &str) -> Option<Fingerprint> {
        let Payload::Single(map) = self else {
            return None;
        };
        if map.contains_key(REQUEST_ID_FIELD) {
            return None;
        }
        let canonical = serde_json::to_string(map).ok()?;
        Some(Fingerprint {
            channel,
            key: format!("{}|{}|{}", channel, session, canonical),
        })
    }

    /// Entries contributed to a wire array, in order.
    pub fn wire_values(&self) -> Vec<Value> {
        match self {
            Payload::Single(map) => vec![Value::Object(map.clone())],
            Payload::Batch(items) => items.clone(),
            Payload::Raw(raw) => vec![Value::String(raw.clone())],
        }
    }
}

impl TryFrom<Value> for Payload {
    type Error = PayloadError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Payload::from_value(value)
    }
}
