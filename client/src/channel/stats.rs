use std::time::Duration;

use apilane_shared::ChannelIndex;

/// Where a channel is in its flush/retry cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelPhase {
    /// Nothing queued, nothing in flight
    Idle,
    /// Commands queued, waiting for the batch window to close
    Scheduled,
    /// Building the exchange for a snapshot of the queue
    Flushing,
    /// Exchange sent, waiting for the body to complete
    AwaitingResponse,
    /// Sleeping for the backoff before resending the same exchange
    Retrying,
    /// Cancelled; the channel never changes again
    Aborted,
}

/// Session credential carried in every exchange of a channel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionCredential {
    pub sid: Option<String>,
    /// Handle of the folder link the session belongs to
    pub folder: Option<String>,
}

impl SessionCredential {
    /// Identifies the credential inside dedup and cache keys, so answers
    /// fetched under one session are never handed to another.
    pub fn scope_key(&self) -> String {
        format!(
            "{}/{}",
            self.sid.as_deref().unwrap_or_default(),
            self.folder.as_deref().unwrap_or_default()
        )
    }
}

/// Snapshot of one channel, for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelStats {
    pub index: ChannelIndex,
    pub service: String,
    pub phase: ChannelPhase,
    pub pending: usize,
    pub in_flight: usize,
    pub backoff: Duration,
    pub received_bytes: u64,
    pub total_bytes: Option<u64>,
    pub session: SessionCredential,
}
