use std::collections::{HashMap, HashSet, VecDeque};

use apilane_shared::{
    split_tagged_result, ActionPacket, ApiError, RequestId, SequenceTag, SubReply, TrackedReply,
};
use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::client_config::ReconcileConfig;

pub(crate) type TrackedResult = Result<TrackedReply, ApiError>;

struct Member {
    tag: Option<SequenceTag>,
    result: Value,
    packets: Vec<ActionPacket>,
    /// False when another record owns the tag; nothing is awaited for it
    claimed: bool,
}

enum Progress {
    AwaitingResponse,
    AwaitingPackets { members: Vec<Member>, batch: bool },
}

struct Record {
    service: String,
    /// Registration order, used to break tag collisions
    order: u64,
    reply: oneshot::Sender<TrackedResult>,
    progress: Progress,
}

/// Joins each acknowledged command's response with the action packets that
/// carry its sequence tag, and settles the caller exactly once with both.
pub(crate) struct Reconciler {
    config: ReconcileConfig,
    records: HashMap<RequestId, Record>,
    aliases: HashMap<SequenceTag, RequestId>,
    resolved: HashSet<SequenceTag>,
    resolved_order: VecDeque<SequenceTag>,
    /// Packets whose tag no record claimed yet, newest last
    recent: VecDeque<(SequenceTag, Vec<ActionPacket>)>,
    /// Highest tag the notification stream has processed
    current_tag: Option<SequenceTag>,
    /// Highest tag seen in a response
    last_tag: Option<SequenceTag>,
    /// Cursor assumed by `prime` before any delivery; never counts as processed
    baseline: Option<SequenceTag>,
    stream_active: bool,
    catchups: Vec<(SequenceTag, oneshot::Sender<()>)>,
    next_order: u64,
}

impl Reconciler {
    pub fn new(config: ReconcileConfig) -> Self {
        Self {
            config,
            records: HashMap::new(),
            aliases: HashMap::new(),
            resolved: HashSet::new(),
            resolved_order: VecDeque::new(),
            recent: VecDeque::new(),
            current_tag: None,
            last_tag: None,
            baseline: None,
            stream_active: false,
            catchups: Vec::new(),
            next_order: 0,
        }
    }

    /// Opens a record before the command is sent.
    pub fn register(
        &mut self,
        id: RequestId,
        service: &str,
    ) -> Result<oneshot::Receiver<TrackedResult>, ApiError> {
        if self.records.contains_key(&id) {
            return Err(ApiError::Invariant {
                reason: format!("request id {} is already being reconciled", id),
            });
        }
        let (reply, receiver) = oneshot::channel();
        let order = self.next_order;
        self.next_order += 1;
        self.records.insert(
            id,
            Record {
                service: service.to_string(),
                order,
                reply,
                progress: Progress::AwaitingResponse,
            },
        );
        Ok(receiver)
    }

    /// Feeds the command's own response into its record.
    pub fn on_response(&mut self, id: &RequestId, response: Result<Value, ApiError>, batch: bool) {
        if !self.records.contains_key(id) {
            debug!("Response for {} arrived after its record was dropped", id);
            return;
        }

        let members = response.and_then(|value| split_members(value, batch));
        let mut members = match members {
            Ok(members) => members,
            Err(err) => {
                self.reject(id, err);
                return;
            }
        };

        for member in members.iter_mut() {
            let Some(tag) = member.tag.clone() else {
                continue;
            };
            if self.last_tag.as_ref().map_or(true, |last| tag.is_after(last)) {
                self.last_tag = Some(tag.clone());
            }
            member.claimed = self.claim(id, &tag);
            if member.claimed {
                if let Some(position) = self.recent.iter().position(|(recent, _)| recent == &tag) {
                    if let Some((_, packets)) = self.recent.remove(position) {
                        member.packets.extend(packets);
                    }
                }
            }
        }

        if let Some(record) = self.records.get_mut(id) {
            record.progress = Progress::AwaitingPackets { members, batch };
        }
        self.try_settle(id, false);
    }

    /// Processes one delivery of the notification stream. Records touched by
    /// it settle only after every packet of the delivery was folded in.
    pub fn deliver_packets(&mut self, packets: Vec<ActionPacket>) {
        let mut touched = Vec::new();
        for packet in packets {
            let Some(tag) = packet.tag().cloned() else {
                continue;
            };
            if self.current_tag.as_ref().map_or(true, |current| tag.is_after(current)) {
                self.current_tag = Some(tag.clone());
            }

            if let Some(id) = self.aliases.get(&tag).cloned() {
                if let Some(member) = self.member_mut(&id, &tag) {
                    member.packets.push(packet);
                    if !touched.contains(&id) {
                        touched.push(id);
                    }
                }
            } else if self.resolved.contains(&tag) {
                warn!("Dropping duplicate action packet for resolved tag {}", tag);
            } else {
                self.remember(tag, packet);
            }
        }

        for id in touched {
            self.try_settle(&id, false);
        }
        self.settle_superseded();
        self.fire_catchups();
    }

    /// Marks the notification stream as running or stopped. Stopping releases
    /// everything that waits on it.
    pub fn set_stream_active(&mut self, active: bool) {
        self.stream_active = active;
        if !active {
            self.poke();
        }
    }

    /// Releases reconciliations that can never complete. Returns how many
    /// records were settled.
    pub fn poke(&mut self) -> usize {
        let waiting: Vec<RequestId> = self
            .records
            .iter()
            .filter(|(_, record)| matches!(record.progress, Progress::AwaitingPackets { .. }))
            .map(|(id, _)| id.clone())
            .collect();

        let mut settled = 0;
        for id in waiting {
            if !self.stream_active {
                info!("Notification stream is not running, releasing {}", id);
                self.settle(&id, true);
                settled += 1;
            } else if self.try_settle(&id, false) {
                settled += 1;
            }
        }
        self.fire_catchups();
        settled
    }

    /// Settles once the stream has processed `tag`.
    pub fn catchup(&mut self, tag: SequenceTag) -> oneshot::Receiver<()> {
        let (sender, receiver) = oneshot::channel();
        if !self.stream_active || self.has_processed(&tag) {
            let _ = sender.send(());
        } else {
            self.catchups.push((tag, sender));
        }
        receiver
    }

    /// Rejects a pending reconciliation with a rollback. Returns false if the
    /// id is unknown.
    pub fn rollback(&mut self, id: &RequestId) -> bool {
        if !self.records.contains_key(id) {
            return false;
        }
        info!("Rolling back reconciliation of {}", id);
        self.reject(id, ApiError::RolledBack { index: 0 });
        true
    }

    /// Rejects every record of `service` with `Cancelled`.
    pub fn purge_service(&mut self, service: &str) {
        let ids: Vec<RequestId> = self
            .records
            .iter()
            .filter(|(_, record)| record.service == service)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            self.reject(&id, ApiError::Cancelled);
        }
    }

    /// Returns the notification cursor new acknowledgments start from. Before
    /// the stream delivered anything, the last tag seen in a response is
    /// adopted as a baseline; the processed cursor is left untouched.
    pub fn prime(&mut self) -> Option<SequenceTag> {
        if let Some(current) = &self.current_tag {
            return Some(current.clone());
        }
        if self.baseline.is_none() {
            self.baseline = self.last_tag.clone();
        }
        self.baseline.clone()
    }

    pub fn pending(&self) -> usize {
        self.records.len()
    }

    pub fn current_tag(&self) -> Option<&SequenceTag> {
        self.current_tag.as_ref()
    }

    pub fn last_tag(&self) -> Option<&SequenceTag> {
        self.last_tag.as_ref()
    }

    pub fn stream_active(&self) -> bool {
        self.stream_active
    }

    fn has_processed(&self, tag: &SequenceTag) -> bool {
        self.current_tag
            .as_ref()
            .map_or(false, |current| !tag.is_after(current))
    }

    /// Aliases `tag` to `id` unless an earlier record already owns it.
    fn claim(&mut self, id: &RequestId, tag: &SequenceTag) -> bool {
        if self.resolved.contains(tag) {
            warn!("Tag {} of {} was already resolved by another command", tag, id);
            return false;
        }
        let Some(owner) = self.aliases.get(tag).cloned() else {
            self.aliases.insert(tag.clone(), id.clone());
            return true;
        };
        if &owner == id {
            return false;
        }

        let order_of = |records: &HashMap<RequestId, Record>, id: &RequestId| {
            records.get(id).map_or(u64::MAX, |record| record.order)
        };
        let owner_order = order_of(&self.records, &owner);
        let own_order = order_of(&self.records, id);
        warn!(
            "Tag {} is claimed by both {} and {}, the earliest registration keeps it",
            tag, owner, id
        );
        if owner_order <= own_order {
            return false;
        }

        if let Some(member) = self.member_mut(&owner, tag) {
            member.claimed = false;
        }
        self.aliases.insert(tag.clone(), id.clone());
        self.try_settle(&owner, false);
        true
    }

    fn member_mut(&mut self, id: &RequestId, tag: &SequenceTag) -> Option<&mut Member> {
        let record = self.records.get_mut(id)?;
        let Progress::AwaitingPackets { members, .. } = &mut record.progress else {
            return None;
        };
        members
            .iter_mut()
            .find(|member| member.claimed && member.tag.as_ref() == Some(tag))
    }

    fn remember(&mut self, tag: SequenceTag, packet: ActionPacket) {
        if let Some((_, packets)) = self.recent.iter_mut().find(|(recent, _)| recent == &tag) {
            packets.push(packet);
            return;
        }
        if self.config.recent_tag_memory == 0 {
            return;
        }
        while self.recent.len() >= self.config.recent_tag_memory {
            self.recent.pop_front();
        }
        self.recent.push_back((tag, vec![packet]));
    }

    fn settle_superseded(&mut self) {
        let waiting: Vec<RequestId> = self
            .records
            .iter()
            .filter(|(_, record)| matches!(record.progress, Progress::AwaitingPackets { .. }))
            .map(|(id, _)| id.clone())
            .collect();
        for id in waiting {
            self.try_settle(&id, false);
        }
    }

    /// Settles `id` if every claimed tag has its packets, the stream has moved
    /// past it, or the stream is not running.
    fn try_settle(&mut self, id: &RequestId, force: bool) -> bool {
        let Some(record) = self.records.get(id) else {
            return false;
        };
        let Progress::AwaitingPackets { members, .. } = &record.progress else {
            return false;
        };

        let mut forced = force;
        for member in members {
            let Some(tag) = &member.tag else {
                continue;
            };
            if !member.claimed || !member.packets.is_empty() {
                continue;
            }
            if !self.stream_active {
                forced = true;
            } else if self.has_processed(tag) {
                warn!("Stream moved past tag {} of {}, ack never arrived", tag, id);
                forced = true;
            } else {
                return false;
            }
        }

        self.settle(id, forced);
        true
    }

    fn settle(&mut self, id: &RequestId, forced: bool) {
        let Some(record) = self.records.remove(id) else {
            return;
        };
        let (members, batch) = match record.progress {
            Progress::AwaitingPackets { members, batch } => (members, batch),
            Progress::AwaitingResponse => {
                let _ = record.reply.send(Err(ApiError::Invariant {
                    reason: format!("{} settled before its response", id),
                }));
                return;
            }
        };

        for member in &members {
            if let Some(tag) = &member.tag {
                if member.claimed {
                    self.aliases.remove(tag);
                    self.mark_resolved(tag.clone());
                }
            }
        }

        let reply = if batch {
            let tag = members.iter().filter_map(|member| member.tag.clone()).max();
            let result = Value::Array(members.iter().map(|member| member.result.clone()).collect());
            let packets = members
                .iter()
                .flat_map(|member| member.packets.iter().cloned())
                .collect();
            let subs = members
                .into_iter()
                .map(|member| SubReply::new(member.tag, member.result, member.packets))
                .collect();
            TrackedReply::new(id.clone(), tag, result, packets, subs, forced)
        } else {
            let mut members = members.into_iter();
            let (tag, result, packets) = match members.next() {
                Some(member) => (member.tag, member.result, member.packets),
                None => (None, Value::Null, Vec::new()),
            };
            TrackedReply::new(id.clone(), tag, result, packets, Vec::new(), forced)
        };

        debug!(
            "Reconciled {} with {} packet(s){}",
            id,
            reply.packets().len(),
            if forced { " (forced)" } else { "" }
        );
        if record.reply.send(Ok(reply)).is_err() {
            debug!("Caller of {} went away before reconciliation", id);
        }
    }

    fn reject(&mut self, id: &RequestId, err: ApiError) {
        let Some(record) = self.records.remove(id) else {
            return;
        };
        if let Progress::AwaitingPackets { members, .. } = &record.progress {
            for member in members.iter().filter(|member| member.claimed) {
                if let Some(tag) = &member.tag {
                    self.aliases.remove(tag);
                }
            }
        }
        let _ = record.reply.send(Err(err));
    }

    fn mark_resolved(&mut self, tag: SequenceTag) {
        if !self.resolved.insert(tag.clone()) {
            return;
        }
        self.resolved_order.push_back(tag);
        while self.resolved_order.len() > self.config.recent_tag_memory.max(1) {
            if let Some(oldest) = self.resolved_order.pop_front() {
                self.resolved.remove(&oldest);
            }
        }
    }

    fn fire_catchups(&mut self) {
        let catchups = std::mem::take(&mut self.catchups);
        for (tag, sender) in catchups {
            if !self.stream_active || self.has_processed(&tag) {
                let _ = sender.send(());
            } else {
                self.catchups.push((tag, sender));
            }
        }
    }
}

fn split_members(value: Value, batch: bool) -> Result<Vec<Member>, ApiError> {
    let member = |(tag, result): (Option<SequenceTag>, Value)| Member {
        tag,
        result,
        packets: Vec::new(),
        claimed: false,
    };
    if !batch {
        return split_tagged_result(value).map(|split| vec![member(split)]);
    }

    let Value::Array(results) = value else {
        return Err(ApiError::Malformed {
            reason: "batch response is not an array".to_string(),
        });
    };
    results
        .into_iter()
        .enumerate()
        .map(|(index, result)| {
            split_tagged_result(result)
                .map(member)
                .map_err(|_| ApiError::RolledBack { index })
        })
        .collect()
}
