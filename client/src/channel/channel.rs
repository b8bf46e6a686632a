use std::{cell::RefCell, collections::VecDeque, mem, rc::Rc};

use apilane_shared::{ApiError, ChannelIndex, Payload, TransportError};
use log::{debug, info, warn};
use serde_json::Value;
use tokio::{
    sync::{oneshot, Notify},
    task::JoinHandle,
    time::{sleep, sleep_until, Instant},
};
use url::Url;

use crate::{
    channel::{
        backoff::{Backoff, RetryCause},
        command::{Command, CommandResult, Outgoing, Shape},
        result_matcher::{match_response, Verdict},
        stats::{ChannelPhase, ChannelStats, SessionCredential},
    },
    client_config::ChannelSpec,
    context::EngineContext,
    options::CustomTarget,
    splitter::SPLIT_SYNTAX_ERROR,
    transport::{Method, WireRequest},
};

/// One strictly ordered request lane.
///
/// Commands are queued, coalesced during the batch window and sent as a
/// single exchange. A channel never has two exchanges in flight: commands
/// queued meanwhile wait for the next round. Transient failures resend the
/// very same exchange after a backoff, so nothing is dropped or duplicated.
#[derive(Clone)]
pub(crate) struct Channel {
    shared: Rc<ChannelShared>,
}

struct ChannelShared {
    index: ChannelIndex,
    spec: ChannelSpec,
    context: Rc<EngineContext>,
    state: RefCell<ChannelState>,
    flush_signal: Notify,
    retry_signal: Notify,
}

struct ChannelState {
    phase: ChannelPhase,
    pending: VecDeque<Command>,
    in_flight: Vec<Command>,
    flush_requested: bool,
    backoff: Backoff,
    session: SessionCredential,
    runner: Option<JoinHandle<()>>,
    next_command_id: u64,
    received_bytes: u64,
    total_bytes: Option<u64>,
    idle_waiters: Vec<oneshot::Sender<()>>,
}

enum ExchangeFailure {
    Transport(TransportError),
    Syntax(String),
}

impl Channel {
    pub fn new(
        index: ChannelIndex,
        spec: ChannelSpec,
        context: Rc<EngineContext>,
        session: SessionCredential,
    ) -> Self {
        let backoff = Backoff::new(context.config.backoff.clone());
        Self {
            shared: Rc::new(ChannelShared {
                index,
                spec,
                context,
                state: RefCell::new(ChannelState {
                    phase: ChannelPhase::Idle,
                    pending: VecDeque::new(),
                    in_flight: Vec::new(),
                    flush_requested: false,
                    backoff,
                    session,
                    runner: None,
                    next_command_id: 0,
                    received_bytes: 0,
                    total_bytes: None,
                    idle_waiters: Vec::new(),
                }),
                flush_signal: Notify::new(),
                retry_signal: Notify::new(),
            }),
        }
    }

    pub fn index(&self) -> ChannelIndex {
        self.shared.index
    }

    pub fn spec(&self) -> &ChannelSpec {
        &self.shared.spec
    }

    pub fn service(&self) -> &str {
        &self.shared.spec.service
    }

    pub fn phase(&self) -> ChannelPhase {
        self.shared.state.borrow().phase
    }

    pub fn is_aborted(&self) -> bool {
        self.phase() == ChannelPhase::Aborted
    }

    pub fn session(&self) -> SessionCredential {
        self.shared.state.borrow().session.clone()
    }

    /// Applies to exchanges built from now on; a batch being retried keeps
    /// the credential it was sent with.
    pub fn set_session(&self, session: SessionCredential) {
        let mut state = self.shared.state.borrow_mut();
        if state.phase != ChannelPhase::Aborted {
            state.session = session;
        }
    }

    /// Queues a command. The receiver settles exactly once.
    pub fn enqueue(
        &self,
        payload: Payload,
        target: Option<CustomTarget>,
    ) -> oneshot::Receiver<CommandResult> {
        let (sender, receiver) = oneshot::channel();
        let mut state = self.shared.state.borrow_mut();
        let id = state.next_command_id;
        state.next_command_id += 1;
        let command = Command::new(id, payload, target, sender);

        if state.phase == ChannelPhase::Aborted {
            drop(state);
            command.settle(Err(ApiError::Cancelled));
            return receiver;
        }

        let isolated = command.is_isolated();
        state.pending.push_back(command);
        if isolated {
            state.flush_requested = true;
        }
        self.ensure_runner(&mut state);
        drop(state);

        if isolated {
            self.shared.flush_signal.notify_one();
        }
        receiver
    }

    /// Closes the batch window now.
    pub fn flush(&self) {
        let mut state = self.shared.state.borrow_mut();
        if state.phase == ChannelPhase::Aborted || state.pending.is_empty() {
            return;
        }
        state.flush_requested = true;
        self.ensure_runner(&mut state);
        drop(state);
        self.shared.flush_signal.notify_one();
    }

    /// True when commands are queued but no exchange is running yet.
    pub fn is_flushable(&self) -> bool {
        let state = self.shared.state.borrow();
        state.phase == ChannelPhase::Scheduled && !state.pending.is_empty()
    }

    /// Settles once the queue has fully drained (or the channel was aborted).
    pub fn wait_idle(&self) -> oneshot::Receiver<()> {
        let (sender, receiver) = oneshot::channel();
        let mut state = self.shared.state.borrow_mut();
        if state.runner.is_none() {
            let _ = sender.send(());
        } else {
            state.idle_waiters.push(sender);
        }
        receiver
    }

    /// Cuts a long backoff short. Returns whether a retry was forced.
    pub fn retry_if_stalled(&self) -> bool {
        let mut state = self.shared.state.borrow_mut();
        if state.phase != ChannelPhase::Retrying || !state.backoff.is_stalled() {
            return false;
        }
        let fresh = state.backoff.refresh();
        drop(state);
        info!(
            "Channel {} leaving stalled backoff, next backoff starts at {:?}",
            self.shared.index, fresh
        );
        self.shared.retry_signal.notify_one();
        true
    }

    /// Rejects every queued and in-flight command with `Cancelled` and freezes
    /// the channel. Its timers die with the runner task.
    pub fn abort(&self) {
        let mut state = self.shared.state.borrow_mut();
        if state.phase == ChannelPhase::Aborted {
            return;
        }
        state.phase = ChannelPhase::Aborted;
        let mut commands = mem::take(&mut state.in_flight);
        commands.extend(state.pending.drain(..));
        let runner = state.runner.take();
        let waiters = mem::take(&mut state.idle_waiters);
        drop(state);

        if let Some(runner) = runner {
            runner.abort();
        }
        info!(
            "Channel {} ({}) cancelled, rejecting {} commands",
            self.shared.index,
            self.shared.spec.service,
            commands.len()
        );
        for command in commands {
            command.settle(Err(ApiError::Cancelled));
        }
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }

    pub fn stats(&self) -> ChannelStats {
        let state = self.shared.state.borrow();
        ChannelStats {
            index: self.shared.index,
            service: self.shared.spec.service.clone(),
            phase: state.phase,
            pending: state.pending.len(),
            in_flight: state.in_flight.len(),
            backoff: state.backoff.current(),
            received_bytes: state.received_bytes,
            total_bytes: state.total_bytes,
            session: state.session.clone(),
        }
    }

    fn ensure_runner(&self, state: &mut ChannelState) {
        if state.runner.is_some() {
            return;
        }
        state.phase = ChannelPhase::Scheduled;
        let shared = self.shared.clone();
        state.runner = Some(tokio::task::spawn_local(async move {
            shared.run().await;
        }));
    }
}

impl ChannelShared {
    /// Drains the queue one exchange at a time.
    async fn run(self: Rc<Self>) {
        self.batch_window().await;
        loop {
            let Some(outgoing) = self.take_batch() else {
                break;
            };
            match outgoing {
                Ok(outgoing) => self.transmit(outgoing).await,
                Err(err) => self.settle_in_flight_with(err),
            }
            // let callers woken by this round queue more before the next one
            tokio::task::yield_now().await;
        }
        self.finish();
    }

    async fn batch_window(&self) {
        let deadline = Instant::now() + self.context.config.batch_window;
        loop {
            if self.flush_due() {
                return;
            }
            tokio::select! {
                _ = sleep_until(deadline) => return,
                _ = self.flush_signal.notified() => {}
            }
        }
    }

    fn flush_due(&self) -> bool {
        let state = self.state.borrow();
        state.flush_requested || state.pending.front().map_or(true, Command::is_isolated)
    }

    /// Moves a snapshot of the queue in flight: either the longest run of
    /// plain commands at the front, or a single isolated command.
    fn take_batch(&self) -> Option<Result<Outgoing, ApiError>> {
        let mut state = self.state.borrow_mut();
        if state.phase == ChannelPhase::Aborted {
            return None;
        }
        state.flush_requested = false;

        let mut commands = Vec::new();
        if state.pending.front()?.is_isolated() {
            commands.extend(state.pending.pop_front());
        } else {
            while state
                .pending
                .front()
                .map_or(false, |command| !command.is_isolated())
            {
                commands.extend(state.pending.pop_front());
            }
        }

        let seqno = self.context.next_seqno();
        let outgoing = self.build_exchange(&commands, &state.session, seqno);
        debug!(
            "Channel {} flushing {} command(s) as exchange {}",
            self.index,
            commands.len(),
            seqno
        );
        state.in_flight = commands;
        state.phase = ChannelPhase::Flushing;
        Some(outgoing)
    }

    fn build_exchange(
        &self,
        commands: &[Command],
        session: &SessionCredential,
        seqno: u64,
    ) -> Result<Outgoing, ApiError> {
        let Some(first) = commands.first() else {
            return Err(ApiError::Invariant {
                reason: "flush of an empty snapshot".to_string(),
            });
        };

        let (body, shape) = if commands.len() == 1 && first.is_isolated() {
            match &first.payload {
                Payload::Raw(raw) if raw.is_empty() => (None, Shape::Direct),
                Payload::Raw(raw) => (Some(raw.as_bytes().to_vec()), Shape::Direct),
                Payload::Batch(items) => (
                    Some(encode(&Value::Array(items.clone()))?),
                    Shape::Batch { slots: items.len() },
                ),
                Payload::Single(map) => (Some(encode(&Value::Object(map.clone()))?), Shape::Direct),
            }
        } else {
            let values: Vec<Value> = commands
                .iter()
                .flat_map(|command| command.payload.wire_values())
                .collect();
            (
                Some(encode(&Value::Array(values))?),
                Shape::Array {
                    commands: commands.len(),
                },
            )
        };

        let url = self.build_url(first.target.as_ref(), session, seqno)?;
        let method = if body.is_some() {
            Method::Post
        } else {
            Method::Get
        };
        Ok(Outgoing {
            request: WireRequest { method, url, body },
            shape,
        })
    }

    fn build_url(
        &self,
        target: Option<&CustomTarget>,
        session: &SessionCredential,
        seqno: u64,
    ) -> Result<Url, ApiError> {
        let base = match target.and_then(|target| target.endpoint.as_deref()) {
            Some(endpoint) => endpoint.to_string(),
            None => format!("{}{}", self.context.config.api_base, self.spec.service),
        };
        let mut url = Url::parse(&base).map_err(|_| ApiError::InvalidPayload {
            reason: TransportError::InvalidTarget {
                target: base.clone(),
            }
            .to_string(),
        })?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("id", &seqno.to_string());
            if let Some(sid) = &session.sid {
                query.append_pair("sid", sid);
            }
            if let Some(folder) = &session.folder {
                query.append_pair("n", folder);
            }
            if let Some(target) = target {
                for (key, value) in &target.query {
                    query.append_pair(key, value);
                }
            }
        }
        Ok(url)
    }

    /// Sends one exchange until it yields a settling verdict.
    async fn transmit(&self, outgoing: Outgoing) {
        loop {
            self.set_phase(ChannelPhase::AwaitingResponse);
            let verdict = match self.exchange(&outgoing.request).await {
                Ok(response) => match_response(outgoing.shape, response),
                Err(ExchangeFailure::Transport(err)) => {
                    warn!("Channel {} exchange failed: {}", self.index, err);
                    Verdict::Retry(RetryCause::Transient)
                }
                Err(ExchangeFailure::Syntax(reason)) => Verdict::Malformed(reason),
            };

            match verdict {
                Verdict::Retry(cause) => self.back_off(cause).await,
                Verdict::Settle(results) => {
                    self.state.borrow_mut().backoff.reset();
                    self.settle_in_flight(results);
                    return;
                }
                Verdict::Malformed(reason) => {
                    self.context.request_reload(&reason);
                    self.settle_in_flight_with(ApiError::Malformed { reason });
                    return;
                }
            }
        }
    }

    async fn exchange(&self, request: &WireRequest) -> Result<Value, ExchangeFailure> {
        let mut body = self
            .context
            .transport
            .exchange(request)
            .await
            .map_err(ExchangeFailure::Transport)?;
        let status = body.status();
        if status != 200 {
            return Err(ExchangeFailure::Transport(TransportError::Status { status }));
        }

        {
            let mut state = self.state.borrow_mut();
            state.total_bytes = body.content_length();
            state.received_bytes = 0;
        }

        let mut splitter = self
            .context
            .splitters
            .create(&self.spec.service, self.spec.streaming);
        let mut buffered = Vec::new();
        loop {
            let chunk = body
                .next_chunk()
                .await
                .map_err(ExchangeFailure::Transport)?;
            let is_final = chunk.is_none();
            let chunk = chunk.unwrap_or_default();
            self.state.borrow_mut().received_bytes += chunk.len() as u64;

            if !self.spec.streaming {
                buffered.extend_from_slice(&chunk);
                if !is_final {
                    continue;
                }
            }
            let fed = if self.spec.streaming { &chunk } else { &buffered };
            let status = splitter.feed(fed, is_final);
            if status == SPLIT_SYNTAX_ERROR {
                return Err(ExchangeFailure::Syntax(format!(
                    "syntax error in {} response",
                    self.spec.service
                )));
            }
            if status < 0 {
                return Ok(Value::from(status));
            }
            if is_final {
                break;
            }
        }

        splitter
            .take_response()
            .ok_or_else(|| ExchangeFailure::Syntax("empty response body".to_string()))
    }

    async fn back_off(&self, cause: RetryCause) {
        let online = self.context.is_online();
        let delay = {
            let mut state = self.state.borrow_mut();
            state.phase = ChannelPhase::Retrying;
            state.backoff.next_delay(cause, online)
        };
        match cause {
            RetryCause::RateLimited => warn!(
                "Channel {} rate limited, retrying in {:?}",
                self.index, delay
            ),
            RetryCause::Transient if !online => {
                info!("Channel {} offline, holding retry until back online", self.index)
            }
            RetryCause::Transient => info!("Channel {} retrying in {:?}", self.index, delay),
        }

        tokio::select! {
            _ = sleep(delay) => {}
            _ = self.retry_signal.notified() => {
                debug!("Channel {} retry forced", self.index);
            }
        }
    }

    fn settle_in_flight(&self, results: Vec<CommandResult>) {
        let commands = self.take_in_flight();
        let mut results = results.into_iter();
        for command in commands {
            let result = results.next().unwrap_or_else(|| {
                Err(ApiError::Invariant {
                    reason: "response shorter than the exchange".to_string(),
                })
            });
            command.settle(result);
        }
    }

    fn settle_in_flight_with(&self, err: ApiError) {
        for command in self.take_in_flight() {
            command.settle(Err(err.clone()));
        }
    }

    fn take_in_flight(&self) -> Vec<Command> {
        let mut state = self.state.borrow_mut();
        if state.phase != ChannelPhase::Aborted {
            state.phase = if state.pending.is_empty() {
                ChannelPhase::Idle
            } else {
                ChannelPhase::Scheduled
            };
        }
        mem::take(&mut state.in_flight)
    }

    fn set_phase(&self, phase: ChannelPhase) {
        let mut state = self.state.borrow_mut();
        if state.phase != ChannelPhase::Aborted {
            state.phase = phase;
        }
    }

    fn finish(&self) {
        let waiters = {
            let mut state = self.state.borrow_mut();
            if state.phase != ChannelPhase::Aborted {
                state.phase = ChannelPhase::Idle;
            }
            state.runner = None;
            mem::take(&mut state.idle_waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }
}

fn encode(value: &Value) -> Result<Vec<u8>, ApiError> {
    serde_json::to_vec(value).map_err(|err| ApiError::InvalidPayload {
        reason: err.to_string(),
    })
}
