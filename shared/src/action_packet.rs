use log::warn;
use serde_json::Value;

use crate::sequence_tag::SequenceTag;

/// Field of an action packet carrying the sequence tag of the request that caused it
pub const TAG_FIELD: &str = "st";
/// Field of an action packet naming the action
pub const ACTION_FIELD: &str = "a";

/// A server-pushed notification describing a state change, delivered on the
/// notification stream independently of request/response traffic.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionPacket {
    tag: Option<SequenceTag>,
    action: Option<String>,
    body: Value,
}

impl ActionPacket {
    pub fn new(tag: Option<SequenceTag>, body: Value) -> Self {
        let action = body
            .get(ACTION_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string);
        Self { tag, action, body }
    }

    /// Reads the tag and action off a raw packet. A malformed tag is treated as absent.
    pub fn from_value(body: Value) -> Self {
        let tag = match body.get(TAG_FIELD).and_then(Value::as_str) {
            Some(raw) => match SequenceTag::new(raw) {
                Ok(tag) => Some(tag),
                Err(err) => {
                    warn!("Ignoring tag of action packet: {}", err);
                    None
                }
            },
            None => None,
        };
        Self::new(tag, body)
    }

    pub fn tag(&self) -> Option<&SequenceTag> {
        self.tag.as_ref()
    }

    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    pub fn body(&self) -> &Value {
        &self.body
    }
}
