use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::ApiError;

/// Errors that can occur when reading a sequence tag off the wire
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    /// Empty strings never identify a server-side change
    #[error("Sequence tag is empty")]
    Empty,

    /// Tags must not carry a negative value
    #[error("Sequence tag value {value} is negative")]
    Negative { value: i64 },
}

/// Server-issued token linking a request's effect to the action packets that
/// later describe it on the notification stream.
///
/// Tags are issued in increasing order: a longer tag is always newer, and tags
/// of equal length compare lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceTag(String);

impl SequenceTag {
    pub fn new(tag: impl Into<String>) -> Result<Self, TagError> {
        let tag = tag.into();
        if tag.is_empty() {
            return Err(TagError::Empty);
        }
        if let Ok(value) = tag.parse::<i64>() {
            if value < 0 {
                return Err(TagError::Negative { value });
            }
        }
        Ok(Self(tag))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns whether this tag was issued after `other`
    pub fn is_after(&self, other: &SequenceTag) -> bool {
        self.cmp(other) == Ordering::Greater
    }
}

impl Ord for SequenceTag {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for SequenceTag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for SequenceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Splits the raw result of an acknowledged command into its `(tag, value)` pair.
///
/// - `["tag", value]` gives `(Some(tag), value)`
/// - `"tag"` gives `(Some(tag), 0)`
/// - a non-negative number `n` gives `(None, n)`
/// - an object carrying a string `st` field gives `(Some(st), object)`
/// - a negative number is the command's error code
pub fn split_tagged_result(result: Value) -> Result<(Option<SequenceTag>, Value), ApiError> {
    match result {
        Value::Number(number) => {
            if let Some(code) = number.as_i64() {
                if code < 0 {
                    return Err(ApiError::application(code));
                }
            }
            Ok((None, Value::Number(number)))
        }
        Value::String(tag) => {
            let tag = SequenceTag::new(tag).map_err(|err| ApiError::Malformed {
                reason: err.to_string(),
            })?;
            Ok((Some(tag), Value::from(0)))
        }
        Value::Array(mut pair) if pair.len() == 2 && pair[0].is_string() => {
            let value = pair.pop().unwrap_or(Value::Null);
            let Some(Value::String(tag)) = pair.pop() else {
                return Err(ApiError::Invariant {
                    reason: "tagged pair lost its tag".to_string(),
                });
            };
            if let Some(code) = value.as_i64() {
                if code < 0 {
                    return Err(ApiError::application(code));
                }
            }
            let tag = SequenceTag::new(tag).map_err(|err| ApiError::Malformed {
                reason: err.to_string(),
            })?;
            Ok((Some(tag), value))
        }
        Value::Object(object) => {
            let tag = match object.get("st") {
                Some(Value::String(tag)) => SequenceTag::new(tag.clone()).ok(),
                _ => None,
            };
            Ok((tag, Value::Object(object)))
        }
        other => Ok((None, other)),
    }
}
