use std::cell::Cell;

/// Reports whether the network is reachable. While offline, channels pin their
/// backoff instead of hammering a dead link.
pub trait Connectivity {
    fn is_online(&self) -> bool;
}

/// Assumes the network is always reachable.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Connectivity flag flipped by the embedding client.
#[derive(Debug)]
pub struct OnlineFlag {
    online: Cell<bool>,
}

impl OnlineFlag {
    pub fn new(online: bool) -> Self {
        Self {
            online: Cell::new(online),
        }
    }

    pub fn set(&self, online: bool) {
        self.online.set(online);
    }
}

impl Default for OnlineFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for OnlineFlag {
    fn is_online(&self) -> bool {
        self.online.get()
    }
}
