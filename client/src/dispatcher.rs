use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use apilane_shared::{
    ActionPacket, ApiError, ChannelIndex, Payload, PayloadKind, RequestId, RequestIdGenerator,
    SequenceTag, SessionScope, TrackedReply,
};
use log::{debug, info, warn};
use serde_json::Value;
use tokio::{
    sync::oneshot,
    task::{spawn_local, JoinHandle},
    time::{interval_at, timeout_at, Instant},
};

use crate::{
    channel::{
        channel::Channel,
        command::CommandResult,
        stats::{ChannelStats, SessionCredential},
    },
    client_config::{ChannelSpec, ClientConfig},
    connectivity::{AlwaysOnline, Connectivity},
    context::EngineContext,
    dedup::{Admission, DedupIndex},
    options::SubmitOptions,
    reconcile::Reconciler,
    splitter::{JsonSplitterFactory, SplitterFactory},
    transport::Transport,
};

/// Single entry surface of the engine: owns the channel table, the dedup and
/// cache index, and the sequence-tag reconciler.
///
/// Everything runs on the current thread. Submissions spawn local tasks, so a
/// `Dispatcher` must be driven from inside a `tokio::task::LocalSet`.
#[derive(Clone)]
pub struct Dispatcher {
    state: Rc<DispatcherState>,
}

struct DispatcherState {
    context: Rc<EngineContext>,
    channels: RefCell<Vec<Option<Channel>>>,
    builtin_count: usize,
    dedup: Rc<RefCell<DedupIndex>>,
    reconciler: Rc<RefCell<Reconciler>>,
    request_ids: RefCell<RequestIdGenerator>,
    sessions: RefCell<Sessions>,
    poke_task: RefCell<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct Sessions {
    sid: Option<String>,
    folder: Option<String>,
    folder_sid: Option<String>,
}

impl Sessions {
    fn credential(&self, scope: SessionScope) -> SessionCredential {
        match scope {
            SessionScope::Main => SessionCredential {
                sid: self.sid.clone(),
                folder: None,
            },
            SessionScope::FolderLink => SessionCredential {
                sid: self.folder_sid.clone(),
                folder: self.folder.clone(),
            },
            SessionScope::Anonymous => SessionCredential::default(),
        }
    }
}

impl Dispatcher {
    /// Create a new Dispatcher talking through `transport`, assuming the
    /// network is always reachable and responses are plain JSON
    pub fn new<T: Transport + 'static>(config: ClientConfig, transport: T) -> Self {
        Self::with_parts(
            config,
            Rc::new(transport),
            Rc::new(AlwaysOnline),
            Rc::new(JsonSplitterFactory),
        )
    }

    pub fn with_parts(
        config: ClientConfig,
        transport: Rc<dyn Transport>,
        connectivity: Rc<dyn Connectivity>,
        splitters: Rc<dyn SplitterFactory>,
    ) -> Self {
        let dedup = DedupIndex::new(&config.cache);
        let reconciler = Reconciler::new(config.reconcile.clone());
        let specs = config.channels.clone();
        let context = Rc::new(EngineContext::new(config, transport, connectivity, splitters));

        let sessions = Sessions::default();
        let channels = specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| {
                let session = sessions.credential(spec.scope);
                Some(Channel::new(index, spec, context.clone(), session))
            })
            .collect::<Vec<_>>();

        Self {
            state: Rc::new(DispatcherState {
                context,
                builtin_count: channels.len(),
                channels: RefCell::new(channels),
                dedup: Rc::new(RefCell::new(dedup)),
                reconciler: Rc::new(RefCell::new(reconciler)),
                request_ids: RefCell::new(RequestIdGenerator::new()),
                sessions: RefCell::new(sessions),
                poke_task: RefCell::new(None),
            }),
        }
    }

    /// Submits a command and waits for its result.
    ///
    /// Identical single-object commands in flight at the same time share one
    /// exchange; with a cache policy a fresh cached copy is returned without
    /// any exchange. With `acknowledge` set the result is only returned once
    /// the command's action packets were received.
    pub async fn submit(
        &self,
        payload: Value,
        options: impl Into<SubmitOptions>,
    ) -> Result<Value, ApiError> {
        let options = options.into();
        if options.acknowledge {
            return self
                .submit_tracked(payload, options)
                .await
                .map(|reply| reply.result().clone());
        }

        let payload = Payload::from_value(payload)?;
        let channel = self.channel(options.channel)?;
        let target = options.target();
        let key = match (&target, options.dedup) {
            (None, true) => payload.fingerprint(channel.index(), &channel.session().scope_key()),
            _ => None,
        };
        let Some(key) = key else {
            return settled(channel.enqueue(payload, target)).await;
        };

        let admission = self.state.dedup.borrow_mut().admit(
            &key,
            options.cache.is_enabled(),
            Instant::now(),
        );
        match admission {
            Admission::Cached(value) => Ok(value),
            Admission::Joined(receiver) => settled(receiver).await,
            Admission::Leader(receiver) => {
                let pending = channel.enqueue(payload, None);
                let dedup = self.state.dedup.clone();
                let policy = options.cache;
                // completes even if this caller stops waiting, so joiners settle
                spawn_local(async move {
                    let result = settled(pending).await;
                    dedup
                        .borrow_mut()
                        .complete(&key, &result, &policy, Instant::now());
                });
                settled(receiver).await
            }
        }
    }

    /// Submits a command that settles only together with the action packets
    /// carrying its sequence tag.
    pub async fn submit_tracked(
        &self,
        payload: Value,
        options: impl Into<SubmitOptions>,
    ) -> Result<TrackedReply, ApiError> {
        let options = options.into();
        let mut payload = Payload::from_value(payload)?;
        if payload.kind() == PayloadKind::Raw {
            return Err(ApiError::InvalidPayload {
                reason: "raw payloads carry no request id and cannot be acknowledged".to_string(),
            });
        }
        let channel = self.channel(options.channel)?;

        let id = match payload.caller_id().and_then(RequestId::from_caller) {
            Some(id) => id,
            None => self.state.request_ids.borrow_mut().generate(),
        };
        payload.set_request_id(&id);
        let batch = payload.kind() == PayloadKind::Batch;

        let receiver = {
            let mut reconciler = self.state.reconciler.borrow_mut();
            let cursor = reconciler.prime();
            debug!("Tracking {} from notification cursor {:?}", id, cursor);
            reconciler.register(id.clone(), channel.service())?
        };
        self.ensure_poke_task();

        let pending = channel.enqueue(payload, options.target());
        let reconciler = self.state.reconciler.clone();
        spawn_local(async move {
            let result = settled(pending).await;
            reconciler.borrow_mut().on_response(&id, result, batch);
        });

        receiver.await.unwrap_or(Err(ApiError::Cancelled))
    }

    /// Flushes the channel if it is merely waiting for its batch window, then
    /// aborts it. Every unsettled command is rejected with `Cancelled`.
    pub async fn cancel_channel(&self, index: ChannelIndex) -> Result<(), ApiError> {
        let channel = self.channel(index)?;
        self.drain_and_abort(vec![channel]).await;
        Ok(())
    }

    pub async fn cancel_all(&self) {
        let channels = self.live_channels();
        self.drain_and_abort(channels).await;
    }

    async fn drain_and_abort(&self, channels: Vec<Channel>) {
        let deadline = Instant::now() + self.state.context.config.cancel_flush_timeout;
        let drains: Vec<oneshot::Receiver<()>> = channels
            .iter()
            .filter(|channel| channel.is_flushable())
            .map(|channel| {
                channel.flush();
                channel.wait_idle()
            })
            .collect();
        for drain in drains {
            if timeout_at(deadline, drain).await.is_err() {
                info!("Flush before cancellation timed out");
                break;
            }
        }

        for channel in &channels {
            channel.abort();
            self.state.dedup.borrow_mut().purge_channel(channel.index());
            self.state
                .reconciler
                .borrow_mut()
                .purge_service(channel.service());
        }
    }

    /// Replaces the channel with a fresh one carrying the same session. Its
    /// cached responses are dropped.
    pub fn reinit_channel(&self, index: ChannelIndex) -> Result<(), ApiError> {
        let mut channels = self.state.channels.borrow_mut();
        let Some(slot) = channels.get_mut(index) else {
            return Err(ApiError::UnknownChannel { index });
        };
        let Some(old) = slot.take() else {
            return Err(ApiError::UnknownChannel { index });
        };
        old.abort();
        self.state.dedup.borrow_mut().purge_channel(index);
        *slot = Some(Channel::new(
            index,
            old.spec().clone(),
            self.state.context.clone(),
            old.session(),
        ));
        Ok(())
    }

    pub fn reinit_all(&self) {
        let indices: Vec<ChannelIndex> = self
            .live_channels()
            .iter()
            .map(Channel::index)
            .collect();
        for index in indices {
            if let Err(err) = self.reinit_channel(index) {
                warn!("Could not reinitialize channel {}: {}", index, err);
            }
        }
    }

    /// Called when connectivity returns: channels sitting in a long backoff
    /// retry now. Returns how many did.
    pub fn retry_stalled(&self) -> usize {
        self.live_channels()
            .iter()
            .filter(|channel| channel.retry_if_stalled())
            .count()
    }

    /// Sets the account session on every channel following it.
    pub fn set_session_id(&self, sid: Option<String>) {
        self.state.sessions.borrow_mut().sid = sid;
        self.propagate_sessions(SessionScope::follows_main_session);
    }

    /// Sets the folder-link session on every channel following it.
    pub fn set_folder_session_id(&self, handle: Option<String>, sid: Option<String>) {
        {
            let mut sessions = self.state.sessions.borrow_mut();
            sessions.folder = handle;
            sessions.folder_sid = sid;
        }
        self.propagate_sessions(SessionScope::follows_folder_session);
    }

    fn propagate_sessions(&self, follows: fn(SessionScope) -> bool) {
        let sessions = self.state.sessions.borrow();
        for channel in self.live_channels() {
            if follows(channel.spec().scope) {
                channel.set_session(sessions.credential(channel.spec().scope));
                self.state.dedup.borrow_mut().purge_channel(channel.index());
            }
        }
    }

    /// Appends a channel beyond the built-in table.
    pub fn register_custom_channel(&self, spec: ChannelSpec) -> ChannelIndex {
        let session = self.state.sessions.borrow().credential(spec.scope);
        let mut channels = self.state.channels.borrow_mut();
        let index = channels.len();
        info!("Registering custom channel {} for {}", index, spec.service);
        channels.push(Some(Channel::new(
            index,
            spec,
            self.state.context.clone(),
            session,
        )));
        index
    }

    /// Aborts and removes a custom channel. Built-in channels cannot be removed.
    pub fn remove_custom_channel(&self, index: ChannelIndex) -> Result<(), ApiError> {
        if index < self.state.builtin_count {
            return Err(ApiError::Invariant {
                reason: format!("channel {} is built in and cannot be removed", index),
            });
        }
        let removed = self
            .state
            .channels
            .borrow_mut()
            .get_mut(index)
            .and_then(Option::take);
        match removed {
            Some(channel) => {
                channel.abort();
                Ok(())
            }
            None => Err(ApiError::UnknownChannel { index }),
        }
    }

    /// Waits until the notification stream has processed `tag`. Returns at
    /// once if the stream is not running.
    pub async fn catchup(&self, tag: SequenceTag) {
        let receiver = self.state.reconciler.borrow_mut().catchup(tag);
        let _ = receiver.await;
    }

    /// Hands one delivery of the notification stream to the reconciler.
    pub fn deliver_packets(&self, packets: Vec<ActionPacket>) {
        self.state.reconciler.borrow_mut().deliver_packets(packets);
    }

    pub fn deliver_packet(&self, packet: ActionPacket) {
        self.deliver_packets(vec![packet]);
    }

    /// Reports whether the notification stream is running. While it is not,
    /// acknowledged commands settle without waiting for packets.
    pub fn set_notifications_active(&self, active: bool) {
        self.state.reconciler.borrow_mut().set_stream_active(active);
    }

    /// Releases reconciliations that can no longer complete.
    pub fn poke(&self) -> usize {
        self.state.reconciler.borrow_mut().poke()
    }

    /// Rejects a pending acknowledged command with `RolledBack`.
    pub fn rollback(&self, id: &RequestId) -> bool {
        self.state.reconciler.borrow_mut().rollback(id)
    }

    pub fn current_tag(&self) -> Option<SequenceTag> {
        self.state.reconciler.borrow().current_tag().cloned()
    }

    pub fn pending_reconciliations(&self) -> usize {
        self.state.reconciler.borrow().pending()
    }

    pub fn channel_stats(&self, index: ChannelIndex) -> Result<ChannelStats, ApiError> {
        self.channel(index).map(|channel| channel.stats())
    }

    pub fn channel_count(&self) -> usize {
        self.state.channels.borrow().len()
    }

    /// True once a malformed response was received. Sticky.
    pub fn reload_requested(&self) -> bool {
        self.state.context.reload_requested()
    }

    pub fn purge_cache(&self) {
        self.state.dedup.borrow_mut().purge_cache();
    }

    fn channel(&self, index: ChannelIndex) -> Result<Channel, ApiError> {
        self.state
            .channels
            .borrow()
            .get(index)
            .cloned()
            .flatten()
            .ok_or(ApiError::UnknownChannel { index })
    }

    fn live_channels(&self) -> Vec<Channel> {
        self.state
            .channels
            .borrow()
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    fn ensure_poke_task(&self) {
        let mut poke_task = self.state.poke_task.borrow_mut();
        if poke_task.is_some() {
            return;
        }
        let period = self.state.context.config.reconcile.poke_interval;
        let reconciler: Weak<RefCell<Reconciler>> = Rc::downgrade(&self.state.reconciler);
        *poke_task = Some(spawn_local(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            loop {
                ticks.tick().await;
                let Some(reconciler) = reconciler.upgrade() else {
                    break;
                };
                let released = reconciler.borrow_mut().poke();
                if released > 0 {
                    info!("Released {} stalled reconciliation(s)", released);
                }
            }
        }));
    }
}

impl Drop for DispatcherState {
    fn drop(&mut self) {
        if let Some(task) = self.poke_task.get_mut().take() {
            task.abort();
        }
        for channel in self.channels.get_mut().iter().flatten() {
            channel.abort();
        }
    }
}

async fn settled(receiver: oneshot::Receiver<CommandResult>) -> CommandResult {
    receiver.await.unwrap_or(Err(ApiError::Cancelled))
}
