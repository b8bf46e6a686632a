use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const TIME_DIGITS: usize = 9;
const COUNTER_DIGITS: usize = 3;
const RANDOM_DIGITS: usize = 4;

/// Ids a caller may put in a payload that do not identify a request.
const SENTINEL_IDS: [&str; 2] = ["", "0"];

/// Correlation id of a command that waits for acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Accepts a caller supplied id, refusing the sentinel values.
    pub fn from_caller(id: &str) -> Option<Self> {
        if SENTINEL_IDS.contains(&id) {
            None
        } else {
            Some(Self(id.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generates lexicographically sortable request ids: a fixed-width base36
/// millisecond timestamp, a rolling counter, then random padding.
pub struct RequestIdGenerator {
    counter: u32,
    last_millis: u64,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self {
            counter: 0,
            last_millis: 0,
        }
    }

    pub fn generate(&mut self) -> RequestId {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        self.generate_at(now)
    }

    /// Same as `generate` with an explicit clock reading.
    pub fn generate_at(&mut self, millis: u64) -> RequestId {
        // never step backwards, even if the wall clock does
        let millis = millis.max(self.last_millis);
        if millis == self.last_millis {
            self.counter = self.counter.wrapping_add(1);
        } else {
            self.counter = 0;
            self.last_millis = millis;
        }
        let max_counter = 36u32.pow(COUNTER_DIGITS as u32);
        if self.counter >= max_counter {
            // counter exhausted within one millisecond, borrow the next one
            self.last_millis += 1;
            self.counter = 0;
        }

        let mut id = String::with_capacity(TIME_DIGITS + COUNTER_DIGITS + RANDOM_DIGITS);
        push_base36(&mut id, self.last_millis, TIME_DIGITS);
        push_base36(&mut id, u64::from(self.counter), COUNTER_DIGITS);
        for _ in 0..RANDOM_DIGITS {
            id.push(ALPHABET[fastrand::usize(..ALPHABET.len())] as char);
        }
        RequestId(id)
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn push_base36(out: &mut String, mut value: u64, width: usize) {
    let mut digits = vec![b'0'; width];
    for slot in digits.iter_mut().rev() {
        *slot = ALPHABET[(value % 36) as usize];
        value /= 36;
    }
    out.extend(digits.into_iter().map(char::from));
}
