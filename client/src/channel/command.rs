use apilane_shared::{ApiError, Payload, PayloadKind};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::{options::CustomTarget, transport::WireRequest};

pub(crate) type CommandResult = Result<Value, ApiError>;
pub(crate) type Settlement = oneshot::Sender<CommandResult>;

/// A queued unit of work, owned by exactly one channel.
pub(crate) struct Command {
    pub id: u64,
    pub payload: Payload,
    pub target: Option<CustomTarget>,
    reply: Settlement,
}

impl Command {
    pub fn new(id: u64, payload: Payload, target: Option<CustomTarget>, reply: Settlement) -> Self {
        Self {
            id,
            payload,
            target,
            reply,
        }
    }

    /// Raw, batch and custom-target commands never share an exchange.
    pub fn is_isolated(&self) -> bool {
        self.target.is_some() || self.payload.kind() != PayloadKind::Single
    }

    pub fn settle(self, result: CommandResult) {
        if self.reply.send(result).is_err() {
            log::debug!("Command {} settled after its caller went away", self.id);
        }
    }
}

/// How the response of an exchange maps back onto its commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Shape {
    /// One array entry per command, in enqueue order
    Array { commands: usize },
    /// One batch command spread over `slots` array entries
    Batch { slots: usize },
    /// A single raw/custom command; the whole response is its result
    Direct,
}

/// A built exchange, reused verbatim for every retry.
pub(crate) struct Outgoing {
    pub request: WireRequest,
    pub shape: Shape,
}
