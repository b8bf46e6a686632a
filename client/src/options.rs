use std::{fmt, rc::Rc, time::Duration};

use apilane_shared::ChannelIndex;
use serde_json::Value;

/// How long a successful response stays cached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheLifetime {
    Skip,
    Forever,
    For(Duration),
}

/// Cache rule of a submission.
#[derive(Clone)]
pub enum CachePolicy {
    Off,
    /// Keep for the lifetime of the dispatcher
    Forever,
    /// Keep for this many seconds
    Seconds(u64),
    /// Decide from the response itself
    Computed(Rc<dyn Fn(&Value) -> CacheLifetime>),
}

impl CachePolicy {
    pub fn computed<F>(rule: F) -> Self
    where
        F: Fn(&Value) -> CacheLifetime + 'static,
    {
        CachePolicy::Computed(Rc::new(rule))
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, CachePolicy::Off)
    }

    pub fn lifetime_for(&self, response: &Value) -> CacheLifetime {
        match self {
            CachePolicy::Off => CacheLifetime::Skip,
            CachePolicy::Forever => CacheLifetime::Forever,
            CachePolicy::Seconds(0) => CacheLifetime::Skip,
            CachePolicy::Seconds(seconds) => CacheLifetime::For(Duration::from_secs(*seconds)),
            CachePolicy::Computed(rule) => rule(response),
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::Off
    }
}

impl fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CachePolicy::Off => f.write_str("Off"),
            CachePolicy::Forever => f.write_str("Forever"),
            CachePolicy::Seconds(seconds) => write!(f, "Seconds({})", seconds),
            CachePolicy::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Endpoint and query overrides. A command carrying one is sent alone, with
/// its payload as the request body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CustomTarget {
    pub endpoint: Option<String>,
    pub query: Vec<(String, String)>,
}

/// Options of one submission. Build from a channel index or with the
/// chained setters.
#[derive(Clone, Debug)]
pub struct SubmitOptions {
    pub channel: ChannelIndex,
    /// Share the outcome of an identical in-flight command
    pub dedup: bool,
    pub cache: CachePolicy,
    /// Wait for the action packets describing the command's effects
    pub acknowledge: bool,
    pub endpoint: Option<String>,
    pub query: Vec<(String, String)>,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            channel: 0,
            dedup: true,
            cache: CachePolicy::Off,
            acknowledge: false,
            endpoint: None,
            query: Vec::new(),
        }
    }
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_channel(mut self, channel: ChannelIndex) -> Self {
        self.channel = channel;
        self
    }

    pub fn without_dedup(mut self) -> Self {
        self.dedup = false;
        self
    }

    pub fn cached(mut self, cache: CachePolicy) -> Self {
        self.cache = cache;
        self
    }

    pub fn acknowledged(mut self) -> Self {
        self.acknowledge = true;
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub(crate) fn target(&self) -> Option<CustomTarget> {
        if self.endpoint.is_none() && self.query.is_empty() {
            return None;
        }
        Some(CustomTarget {
            endpoint: self.endpoint.clone(),
            query: self.query.clone(),
        })
    }
}

impl From<ChannelIndex> for SubmitOptions {
    fn from(channel: ChannelIndex) -> Self {
        SubmitOptions::default().on_channel(channel)
    }
}
