use std::{cell::Cell, rc::Rc};

use apilane_shared::ExchangeSeqNo;
use log::error;

use crate::{
    client_config::ClientConfig, connectivity::Connectivity, splitter::SplitterFactory,
    transport::Transport,
};

/// Collaborators and counters shared by every channel of one dispatcher.
pub(crate) struct EngineContext {
    pub config: ClientConfig,
    pub transport: Rc<dyn Transport>,
    pub connectivity: Rc<dyn Connectivity>,
    pub splitters: Rc<dyn SplitterFactory>,
    next_seqno: Cell<ExchangeSeqNo>,
    reload_requested: Cell<bool>,
}

impl EngineContext {
    pub fn new(
        config: ClientConfig,
        transport: Rc<dyn Transport>,
        connectivity: Rc<dyn Connectivity>,
        splitters: Rc<dyn SplitterFactory>,
    ) -> Self {
        Self {
            config,
            transport,
            connectivity,
            splitters,
            next_seqno: Cell::new(fastrand::u64(..u64::from(u32::MAX))),
            reload_requested: Cell::new(false),
        }
    }

    pub fn next_seqno(&self) -> ExchangeSeqNo {
        let seqno = self.next_seqno.get();
        self.next_seqno.set(seqno.wrapping_add(1));
        seqno
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn request_reload(&self, reason: &str) {
        if !self.reload_requested.replace(true) {
            error!("Unrecoverable response ({}), client reload requested", reason);
        }
    }

    pub fn reload_requested(&self) -> bool {
        self.reload_requested.get()
    }
}
