use serde_json::Value;

use crate::{action_packet::ActionPacket, request_id::RequestId, sequence_tag::SequenceTag};

/// Outcome of one member of an acknowledged batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SubReply {
    tag: Option<SequenceTag>,
    result: Value,
    packets: Vec<ActionPacket>,
}

impl SubReply {
    pub fn new(tag: Option<SequenceTag>, result: Value, packets: Vec<ActionPacket>) -> Self {
        Self {
            tag,
            result,
            packets,
        }
    }

    pub fn tag(&self) -> Option<&SequenceTag> {
        self.tag.as_ref()
    }

    pub fn result(&self) -> &Value {
        &self.result
    }

    pub fn packets(&self) -> &[ActionPacket] {
        &self.packets
    }
}

/// Settled result of an acknowledged command: the server's own answer
/// combined with every action packet that carried its sequence tag.
///
/// Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedReply {
    request_id: RequestId,
    tag: Option<SequenceTag>,
    result: Value,
    packets: Vec<ActionPacket>,
    batch: Vec<SubReply>,
    forced: bool,
}

impl TrackedReply {
    pub fn new(
        request_id: RequestId,
        tag: Option<SequenceTag>,
        result: Value,
        packets: Vec<ActionPacket>,
        batch: Vec<SubReply>,
        forced: bool,
    ) -> Self {
        Self {
            request_id,
            tag,
            result,
            packets,
            batch,
            forced,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn tag(&self) -> Option<&SequenceTag> {
        self.tag.as_ref()
    }

    pub fn result(&self) -> &Value {
        &self.result
    }

    /// Packets folded into this reply, in arrival order. For batches this is
    /// the concatenation of every member's packets.
    pub fn packets(&self) -> &[ActionPacket] {
        &self.packets
    }

    /// Per-member outcomes; empty unless the command was a batch.
    pub fn batch(&self) -> &[SubReply] {
        &self.batch
    }

    /// True when the reply was released without waiting for its packets
    /// because the notification stream could not deliver them.
    pub fn forced(&self) -> bool {
        self.forced
    }
}
