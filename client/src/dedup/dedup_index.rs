use std::collections::HashMap;

use apilane_shared::{ChannelIndex, Fingerprint};
use log::debug;
use serde_json::Value;
use tokio::{sync::oneshot, time::Instant};

use crate::{
    channel::command::CommandResult, client_config::CacheConfig, dedup::ResponseCache,
    options::CachePolicy,
};

/// Outcome of presenting a fingerprint to the index.
pub(crate) enum Admission {
    /// A fresh cached copy; nothing is sent
    Cached(Value),
    /// An identical command is in flight; its outcome arrives here
    Joined(oneshot::Receiver<CommandResult>),
    /// The caller must send the command and later call `complete`
    Leader(oneshot::Receiver<CommandResult>),
}

/// Live in-flight fingerprints plus the response cache behind them.
pub(crate) struct DedupIndex {
    live: HashMap<Fingerprint, Vec<oneshot::Sender<CommandResult>>>,
    cache: ResponseCache,
}

impl DedupIndex {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            live: HashMap::new(),
            cache: ResponseCache::new(config),
        }
    }

    /// Checks and registers in one step, so two submissions of the same
    /// fingerprint can never both become leaders.
    pub fn admit(&mut self, key: &Fingerprint, use_cache: bool, now: Instant) -> Admission {
        let (sender, receiver) = oneshot::channel();
        if let Some(waiters) = self.live.get_mut(key) {
            debug!("Joining in-flight command {}", key.as_str());
            waiters.push(sender);
            return Admission::Joined(receiver);
        }

        if use_cache {
            self.cache.maybe_sweep(now);
            if let Some(value) = self.cache.get(key, now) {
                debug!("Cache hit for {}", key.as_str());
                return Admission::Cached(value);
            }
        }

        self.live.insert(key.clone(), vec![sender]);
        Admission::Leader(receiver)
    }

    /// Settles every caller waiting on `key` and drops its live marker.
    pub fn complete(
        &mut self,
        key: &Fingerprint,
        result: &CommandResult,
        policy: &CachePolicy,
        now: Instant,
    ) {
        if let Ok(value) = result {
            if policy.is_enabled() {
                let lifetime = policy.lifetime_for(value);
                self.cache.insert(key.clone(), value.clone(), lifetime, now);
            }
        }

        let Some(waiters) = self.live.remove(key) else {
            return;
        };
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    pub fn is_live(&self, key: &Fingerprint) -> bool {
        self.live.contains_key(key)
    }

    /// Drops the cached responses of `channel`. Live entries are left to
    /// their leaders, which settle them once the channel rejects the command.
    pub fn purge_channel(&mut self, channel: ChannelIndex) {
        self.cache.purge_channel(channel);
    }

    pub fn purge_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}
