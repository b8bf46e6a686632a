use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use apilane_shared::{ChannelIndex, Fingerprint};
use log::debug;
use serde_json::Value;
use tokio::time::Instant;

use crate::{client_config::CacheConfig, options::CacheLifetime};

struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires_at| now < expires_at)
    }
}

/// Bounded, time-limited store of settled responses.
///
/// Lookups hand out owned copies, so no two callers ever share a result.
pub(crate) struct ResponseCache {
    entries: HashMap<Fingerprint, CacheEntry>,
    /// Insertion order, oldest first
    order: VecDeque<Fingerprint>,
    capacity: usize,
    sweep_interval: Duration,
    last_sweep: Instant,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: config.capacity,
            sweep_interval: config.sweep_interval,
            last_sweep: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &Fingerprint, now: Instant) -> Option<Value> {
        self.entries
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.value.clone())
    }

    pub fn insert(&mut self, key: Fingerprint, value: Value, lifetime: CacheLifetime, now: Instant) {
        let expires_at = match lifetime {
            CacheLifetime::Skip => return,
            CacheLifetime::Forever => None,
            CacheLifetime::For(duration) => Some(now + duration),
        };
        if self.capacity == 0 {
            return;
        }

        if self.entries.contains_key(&key) {
            self.order.retain(|existing| existing != &key);
        }
        while self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, CacheEntry { value, expires_at });
    }

    /// Drops every expired entry.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now));
        let entries = &self.entries;
        self.order.retain(|key| entries.contains_key(key));
        self.last_sweep = now;
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("Response cache sweep dropped {} expired entries", removed);
        }
        removed
    }

    /// Sweeps if `sweep_interval` has elapsed since the last sweep.
    pub fn maybe_sweep(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_sweep) >= self.sweep_interval {
            self.sweep(now);
        }
    }

    pub fn purge_channel(&mut self, channel: ChannelIndex) {
        self.entries.retain(|key, _| key.channel() != channel);
        let entries = &self.entries;
        self.order.retain(|key| entries.contains_key(key));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}
