//! Session actor
//!
//! One task owns all mutable state of a peer session. Handles post
//! [`Command`]s, the transport and data channel post their events, timers and
//! one-tick deferrals post [`Deferred`] tasks, and the operations chain posts
//! [`Completion`]s, all into the same inbox.
//!
//! Scheduling follows three rules:
//!
//! - Commands already queued when the actor wakes are handled as one tick.
//! - Microtasks queued during a tick run after it, before the next inbox item.
//! - Asynchronous transport operations run one at a time, in submission order,
//!   on the operations chain. Their completions re-enter through the inbox and
//!   check whether the session was destroyed in the meantime.

use crate::candidates::CandidateBuffer;
use crate::config::PeerConfig;
use crate::error::{PeerError, Result, TransportResult};
use crate::peer::PeerEvent;
use crate::signaling::SignalData;
use crate::stats::StatsReport;
use crate::transport::{ChannelEvent, DataChannel, RtcTransport, TransportEvent};
use crate::types::{
    AddressInfo, ChannelPayload, IceCandidateInit, IceConnectionState, IceGatheringState,
    MediaKind, Role, SdpType, SessionDescription,
};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Reply slot for a handle request
pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// Requests from [`crate::Peer`] handles
pub(crate) enum Command {
    Signal(SignalData),
    Send(ChannelPayload, Reply<()>),
    Write(ChannelPayload, Reply<()>),
    End,
    Negotiate,
    AddTransceiver(MediaKind, Option<serde_json::Value>),
    RemoveSender(String),
    GetStats(Reply<Vec<StatsReport>>),
    BufferedAmount(Reply<usize>),
    Destroy(Option<PeerError>),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Signal(_) => "signal",
            Self::Send(..) => "send",
            Self::Write(..) => "write",
            Self::End => "end",
            Self::Negotiate => "negotiate",
            Self::AddTransceiver(..) => "add_transceiver",
            Self::RemoveSender(_) => "remove_sender",
            Self::GetStats(_) => "get_stats",
            Self::BufferedAmount(_) => "buffered_amount",
            Self::Destroy(_) => "destroy",
        }
    }
}

/// Work the session schedules for itself
#[derive(Debug, Clone)]
pub(crate) enum Deferred {
    CreateOffer,
    Teardown(Option<PeerError>),
    FindCandidatePair,
    ClosingPoll,
    BackpressurePoll,
    IceCompleteTimeout,
    FinishFlush,
}

/// Results of operations-chain work
pub(crate) enum Completion {
    OfferCreated(TransportResult<SessionDescription>),
    AnswerCreated(TransportResult<SessionDescription>),
    LocalDescriptionSet(SessionDescription, TransportResult<()>),
    RemoteDescriptionSet(SdpType, TransportResult<()>),
    CandidateAdded(IceCandidateInit, TransportResult<()>),
    TransceiverAdded(MediaKind, TransportResult<()>),
    SenderRemoved(String, TransportResult<()>),
    ReadinessStats(TransportResult<Vec<serde_json::Value>>),
}

/// One inbox item
pub(crate) enum Task {
    Command(Command),
    Transport(TransportEvent),
    Channel(ChannelEvent),
    Deferred(Deferred),
    Completion(Completion),
}

/// Work run after the current tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Microtask {
    NeedsNegotiation,
}

/// Timer posting a deferred task; aborted on drop
pub(crate) struct Timer(JoinHandle<()>);

impl Timer {
    /// Post `task` once after `delay`
    pub(crate) fn after(inbox: &mpsc::UnboundedSender<Task>, delay: Duration, task: Deferred) -> Self {
        let inbox = inbox.clone();
        Self(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inbox.send(Task::Deferred(task));
        }))
    }

    /// Post `task` every `period`, starting one period from now
    pub(crate) fn every(inbox: &mpsc::UnboundedSender<Task>, period: Duration, task: Deferred) -> Self {
        let inbox = inbox.clone();
        Self(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if inbox.send(Task::Deferred(task.clone())).is_err() {
                    break;
                }
            }
        }))
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Sequential executor for asynchronous transport operations
pub(crate) struct OpQueue {
    tx: mpsc::UnboundedSender<BoxFuture<'static, ()>>,
    worker: JoinHandle<()>,
}

impl OpQueue {
    pub(crate) fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<BoxFuture<'static, ()>>();
        let worker = tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                op.await;
            }
        });
        Self { tx, worker }
    }

    fn push(&self, op: BoxFuture<'static, ()>) {
        let _ = self.tx.send(op);
    }
}

impl Drop for OpQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

const PHASE_ACTIVE: u8 = 0;
const PHASE_DESTROYING: u8 = 1;
const PHASE_DESTROYED: u8 = 2;

/// Lifecycle phase as seen from handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Active,
    Destroying,
    Destroyed,
}

/// State readable from handles without a round trip to the actor
pub(crate) struct SharedState {
    phase: AtomicU8,
    connected: AtomicBool,
    channel_open: AtomicBool,
    local_address: Mutex<AddressInfo>,
    remote_address: Mutex<AddressInfo>,
    channel_name: Mutex<Option<String>>,
}

impl SharedState {
    pub(crate) fn new(channel_name: Option<String>) -> Self {
        Self {
            phase: AtomicU8::new(PHASE_ACTIVE),
            connected: AtomicBool::new(false),
            channel_open: AtomicBool::new(false),
            local_address: Mutex::new(AddressInfo::default()),
            remote_address: Mutex::new(AddressInfo::default()),
            channel_name: Mutex::new(channel_name),
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        match self.phase.load(Ordering::Acquire) {
            PHASE_ACTIVE => Phase::Active,
            PHASE_DESTROYING => Phase::Destroying,
            _ => Phase::Destroyed,
        }
    }

    /// Move from active to destroying; returns false if already past active
    pub(crate) fn begin_destroy(&self) -> bool {
        self.phase
            .compare_exchange(
                PHASE_ACTIVE,
                PHASE_DESTROYING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn mark_destroyed(&self) {
        self.phase.store(PHASE_DESTROYED, Ordering::Release);
        self.connected.store(false, Ordering::Release);
        self.channel_open.store(false, Ordering::Release);
    }

    /// Connected and the data channel still open
    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && self.channel_open.load(Ordering::Acquire)
    }

    pub(crate) fn set_channel_open(&self, open: bool) {
        self.channel_open.store(open, Ordering::Release);
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub(crate) fn local_address(&self) -> AddressInfo {
        self.local_address.lock().clone()
    }

    pub(crate) fn remote_address(&self) -> AddressInfo {
        self.remote_address.lock().clone()
    }

    pub(crate) fn set_addresses(&self, local: AddressInfo, remote: AddressInfo) {
        *self.local_address.lock() = local;
        *self.remote_address.lock() = remote;
    }

    pub(crate) fn channel_name(&self) -> Option<String> {
        self.channel_name.lock().clone()
    }

    pub(crate) fn set_channel_name(&self, name: String) {
        *self.channel_name.lock() = Some(name);
    }
}

/// Mutable session state, owned by the actor task
pub(crate) struct Session {
    pub(crate) id: String,
    pub(crate) role: Role,
    pub(crate) config: PeerConfig,
    pub(crate) transport: Arc<dyn RtcTransport>,
    pub(crate) channel: Option<Arc<dyn DataChannel>>,
    pub(crate) shared: Arc<SharedState>,
    pub(crate) inbox: mpsc::UnboundedSender<Task>,
    events: mpsc::UnboundedSender<PeerEvent>,
    ops: Option<OpQueue>,
    microtasks: VecDeque<Microtask>,

    // negotiation
    pub(crate) is_negotiating: bool,
    pub(crate) queued_negotiation: bool,
    pub(crate) first_negotiation: bool,
    pub(crate) batched_negotiation: bool,
    pub(crate) senders_awaiting_stable: Vec<String>,
    pub(crate) awaiting_ice_complete: Option<SessionDescription>,

    // signaling and candidates
    pub(crate) remote_description_set: bool,
    pub(crate) pending_candidates: CandidateBuffer,
    pub(crate) ice_complete: bool,
    pub(crate) ice_complete_timer: Option<Timer>,

    // readiness
    pub(crate) ice_connection_state: IceConnectionState,
    pub(crate) ice_gathering_state: IceGatheringState,
    pub(crate) pc_ready: bool,
    pub(crate) channel_ready: bool,
    pub(crate) connecting: bool,
    pub(crate) connected: bool,
    pub(crate) stats_attempts: u32,
    pub(crate) stats_timer: Option<Timer>,

    // channel lifecycle
    pub(crate) low_threshold_supported: bool,
    pub(crate) closing_observed: bool,
    pub(crate) closing_timer: Option<Timer>,

    // stream
    pub(crate) pending_write: Option<(ChannelPayload, Reply<()>)>,
    pub(crate) held_completion: Option<Reply<()>>,
    pub(crate) backpressure_timer: Option<Timer>,
    pub(crate) write_ended: bool,
    pub(crate) finish_on_connect: bool,
    pub(crate) finish_timer: Option<Timer>,

    // lifecycle
    pub(crate) destroying: bool,
    pub(crate) destroyed: bool,
}

impl Session {
    pub(crate) fn new(
        id: String,
        config: PeerConfig,
        transport: Arc<dyn RtcTransport>,
        shared: Arc<SharedState>,
        inbox: mpsc::UnboundedSender<Task>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        Self {
            id,
            role: Role::from_initiator(config.initiator),
            config,
            transport,
            channel: None,
            shared,
            inbox,
            events,
            ops: Some(OpQueue::spawn()),
            microtasks: VecDeque::new(),
            is_negotiating: false,
            queued_negotiation: false,
            first_negotiation: true,
            batched_negotiation: false,
            senders_awaiting_stable: Vec::new(),
            awaiting_ice_complete: None,
            remote_description_set: false,
            pending_candidates: CandidateBuffer::default(),
            ice_complete: false,
            ice_complete_timer: None,
            ice_connection_state: IceConnectionState::New,
            ice_gathering_state: IceGatheringState::New,
            pc_ready: false,
            channel_ready: false,
            connecting: false,
            connected: false,
            stats_attempts: 0,
            stats_timer: None,
            low_threshold_supported: false,
            closing_observed: false,
            closing_timer: None,
            pending_write: None,
            held_completion: None,
            backpressure_timer: None,
            write_ended: false,
            finish_on_connect: false,
            finish_timer: None,
            destroying: false,
            destroyed: false,
        }
    }

    /// Wire the transport and create the local data channel
    ///
    /// Runs before the actor loop starts so that commands issued right after
    /// construction share the first tick with the initial negotiation.
    pub(crate) async fn start(&mut self) {
        let inbox = self.inbox.clone();
        self.transport.bind(Arc::new(move |event| {
            let _ = inbox.send(Task::Transport(event));
        }));

        if self.role.is_initiator() || self.config.channel_config.negotiated {
            let label = self.shared.channel_name().unwrap_or_default();
            match self
                .transport
                .create_data_channel(&label, &self.config.channel_config)
                .await
            {
                Ok(channel) => self.setup_channel(channel).await,
                Err(e) => self.destroy(Some(PeerError::DataChannel(e.to_string()))),
            }
        }

        tracing::debug!(peer = %self.id, "initial negotiation");
        self.needs_negotiation();
    }

    /// Actor loop; returns once teardown has completed
    pub(crate) async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Task>) {
        let mut carry = self.drain_commands(&mut inbox).await;
        self.run_microtasks().await;

        while !self.destroyed {
            let task = match carry.take() {
                Some(task) => task,
                None => match inbox.recv().await {
                    Some(task) => task,
                    None => break,
                },
            };
            match task {
                Task::Command(command) => {
                    self.handle_command(command).await;
                    carry = self.drain_commands(&mut inbox).await;
                }
                Task::Transport(event) => self.handle_transport_event(event).await,
                Task::Channel(event) => self.handle_channel_event(event).await,
                Task::Deferred(task) => self.handle_deferred(task).await,
                Task::Completion(completion) => self.handle_completion(completion).await,
            }
            self.run_microtasks().await;
        }
        tracing::debug!(peer = %self.id, "session task finished");
    }

    // Handles every command already queued; returns the first non-command item.
    async fn drain_commands(&mut self, inbox: &mut mpsc::UnboundedReceiver<Task>) -> Option<Task> {
        while let Ok(task) = inbox.try_recv() {
            match task {
                Task::Command(command) => self.handle_command(command).await,
                other => return Some(other),
            }
        }
        None
    }

    async fn run_microtasks(&mut self) {
        while let Some(task) = self.microtasks.pop_front() {
            match task {
                Microtask::NeedsNegotiation => self.run_batched_negotiation(),
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        tracing::trace!(peer = %self.id, command = command.name(), "command");
        match command {
            Command::Signal(data) => self.signal(data),
            Command::Send(payload, reply) => self.send(payload, reply).await,
            Command::Write(payload, reply) => self.write(payload, reply).await,
            Command::End => self.end(),
            Command::Negotiate => self.negotiate(),
            Command::AddTransceiver(kind, init) => self.add_transceiver(kind, init),
            Command::RemoveSender(id) => self.remove_sender(id),
            Command::GetStats(reply) => self.get_stats(reply),
            Command::BufferedAmount(reply) => {
                let _ = reply.send(Ok(self.buffered_amount().await));
            }
            Command::Destroy(err) => self.destroy(err),
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        tracing::trace!(peer = %self.id, ?event, "transport event");
        match event {
            TransportEvent::IceCandidate(candidate) => self.on_local_candidate(candidate).await,
            TransportEvent::IceConnectionStateChange(state) => {
                self.ice_connection_state = state;
                self.on_ice_state_change();
            }
            TransportEvent::IceGatheringStateChange(state) => {
                self.ice_gathering_state = state;
                self.on_ice_state_change();
            }
            TransportEvent::SignalingStateChange(state) => self.on_signaling_state_change(state),
            TransportEvent::ConnectionStateChange(state) => self.on_connection_state_change(state),
            TransportEvent::DataChannel(channel) => self.on_remote_channel(channel).await,
        }
    }

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Open => self.on_channel_open(),
            ChannelEvent::Message(payload) => self.on_channel_message(payload),
            ChannelEvent::BufferedAmountLow => self.on_buffered_amount_low(),
            ChannelEvent::Close => self.on_channel_close(),
            ChannelEvent::Error(e) => self.on_channel_error(e),
        }
    }

    async fn handle_deferred(&mut self, task: Deferred) {
        match task {
            Deferred::CreateOffer => self.create_offer(),
            Deferred::Teardown(err) => self.teardown(err).await,
            Deferred::FindCandidatePair => self.find_candidate_pair(),
            Deferred::ClosingPoll => self.closing_poll(),
            Deferred::BackpressurePoll => self.backpressure_poll().await,
            Deferred::IceCompleteTimeout => self.on_ice_complete_timeout().await,
            Deferred::FinishFlush => self.destroy(None),
        }
    }

    async fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::OfferCreated(result) => self.on_offer_created(result),
            Completion::AnswerCreated(result) => self.on_answer_created(result),
            Completion::LocalDescriptionSet(description, result) => {
                self.on_local_description_set(description, result).await;
            }
            Completion::RemoteDescriptionSet(sdp_type, result) => {
                self.on_remote_description_set(sdp_type, result);
            }
            Completion::CandidateAdded(candidate, result) => {
                self.on_candidate_added(&candidate, result);
            }
            Completion::TransceiverAdded(kind, result) => self.on_transceiver_added(kind, result),
            Completion::SenderRemoved(id, result) => self.on_sender_removed(id, result),
            Completion::ReadinessStats(result) => self.on_readiness_stats(result).await,
        }
    }

    /// Queue work to run after the current tick
    pub(crate) fn queue_microtask(&mut self, task: Microtask) {
        self.microtasks.push_back(task);
    }

    /// Run `task` on a later tick, after everything already queued
    pub(crate) fn defer(&self, task: Deferred) {
        let _ = self.inbox.send(Task::Deferred(task));
    }

    /// Run a transport operation on the operations chain
    pub(crate) fn submit<F>(&self, op: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let Some(ops) = &self.ops else {
            return;
        };
        let inbox = self.inbox.clone();
        ops.push(Box::pin(async move {
            let completion = op.await;
            let _ = inbox.send(Task::Completion(completion));
        }));
    }

    /// Run a transport operation outside the chain
    pub(crate) fn spawn_detached<F>(&self, op: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let completion = op.await;
            let _ = inbox.send(Task::Completion(completion));
        });
    }

    /// Stop the operations chain; queued operations are dropped
    pub(crate) fn stop_operations(&mut self) {
        self.ops = None;
    }

    /// Deliver an event to the application
    pub(crate) fn emit(&self, event: PeerEvent) {
        tracing::trace!(peer = %self.id, event = event.name(), "emit");
        let _ = self.events.send(event);
    }
}
