use std::{default::Default, time::Duration};

use apilane_shared::SessionScope;

use crate::channel::backoff::BackoffConfig;

/// Contains Config properties which will be used by the Dispatcher
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Prefix every channel's service name is appended to, e.g.
    /// `https://api.example.net/` gives `https://api.example.net/cs`
    pub api_base: String,
    /// Calls submitted within this window after the first one travel in the
    /// same exchange
    pub batch_window: Duration,
    /// How long `cancel_all`/`cancel_channel` let idle channels flush before
    /// aborting them
    pub cancel_flush_timeout: Duration,
    /// Retry delays applied after transient failures
    pub backoff: BackoffConfig,
    /// Response cache bounds
    pub cache: CacheConfig,
    /// Sequence-tag reconciliation tuning
    pub reconcile: ReconcileConfig,
    /// Built-in channel table; index in this list is the channel index
    pub channels: Vec<ChannelSpec>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: "https://g.api.example.net/".to_string(),
            batch_window: Duration::from_millis(350),
            cancel_flush_timeout: Duration::from_millis(1500),
            backoff: BackoffConfig::default(),
            cache: CacheConfig::default(),
            reconcile: ReconcileConfig::default(),
            channels: ChannelSpec::builtin(),
        }
    }
}

/// Identity of one channel: the service it talks to and the session it carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSpec {
    pub service: String,
    pub scope: SessionScope,
    /// Feed the body to the splitter chunk by chunk as it arrives
    pub streaming: bool,
}

impl ChannelSpec {
    pub fn new(service: impl Into<String>, scope: SessionScope) -> Self {
        Self {
            service: service.into(),
            scope,
            streaming: false,
        }
    }

    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// 0: main commands, 1: folder-link commands, 2: bulk, 3: auxiliary,
    /// 4: notification stream, 5: notification url lookup
    pub fn builtin() -> Vec<ChannelSpec> {
        vec![
            ChannelSpec::new("cs", SessionScope::Main),
            ChannelSpec::new("cs", SessionScope::FolderLink),
            ChannelSpec::new("cs", SessionScope::Main),
            ChannelSpec::new("cs", SessionScope::Main),
            ChannelSpec::new("sc", SessionScope::Main).streaming(),
            ChannelSpec::new("wsc", SessionScope::Main),
        ]
    }
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Maximum number of cached responses; the oldest is evicted first
    pub capacity: usize,
    /// Minimum time between two expiry sweeps
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReconcileConfig {
    /// Period of the stalled-reconciliation check
    pub poke_interval: Duration,
    /// Number of distinct not-yet-claimed tags whose packets are remembered
    pub recent_tag_memory: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poke_interval: Duration::from_secs(2),
            recent_tag_memory: 64,
        }
    }
}
