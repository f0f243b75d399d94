//! Peer handle and events
//!
//! [`Peer`] is a cheap, clonable handle to a session task. Calls are posted
//! to the task and return as soon as they are queued, except `send`, `write`
//! and `get_stats`, which wait for their result. Everything the session
//! reports arrives on [`PeerEvents`].

use crate::config::{
    AnswerOptions, ChannelConfig, OfferOptions, PeerConfig, RtcConfiguration,
};
use crate::error::{PeerError, Result};
use crate::session::{Command, Phase, Session, SharedState, Task};
use crate::signaling::{SignalData, SignalMessage};
use crate::stats::StatsReport;
use crate::transport::RtcTransport;
use crate::types::{
    AddressInfo, ChannelPayload, IceConnectionState, IceGatheringState, MediaKind,
    SignalingState,
};
use futures::Stream;
use rand::Rng;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::Instrument;

/// Events reported by a session
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Signaling message to relay to the remote peer
    Signal(SignalMessage),
    /// Transport and data channel are both ready; fires once
    Connect,
    /// Connected session is being torn down
    Disconnect,
    /// Data received from the remote peer
    Data(ChannelPayload),
    /// Session closed; always the last event
    Close,
    /// Fatal failure; followed by [`PeerEvent::Close`]
    Error(PeerError),
    /// ICE connectivity or gathering state changed
    IceStateChange {
        /// ICE connectivity state
        ice_connection_state: IceConnectionState,
        /// Candidate gathering state
        ice_gathering_state: IceGatheringState,
    },
    /// Offer/answer state changed
    SignalingStateChange(SignalingState),
    /// A negotiation cycle finished with nothing queued behind it
    Negotiated,
    /// Gathering did not finish within the ICE-complete timeout
    IceTimeout,
}

impl PeerEvent {
    /// Event name
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Signal(_) => "signal",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Data(_) => "data",
            Self::Close => "close",
            Self::Error(_) => "error",
            Self::IceStateChange { .. } => "iceStateChange",
            Self::SignalingStateChange(_) => "signalingStateChange",
            Self::Negotiated => "negotiated",
            Self::IceTimeout => "iceTimeout",
        }
    }
}

/// Receiver for [`PeerEvent`]s; ends after [`PeerEvent::Close`]
pub struct PeerEvents {
    rx: mpsc::UnboundedReceiver<PeerEvent>,
}

impl PeerEvents {
    /// Next event, or `None` once the session task has finished
    pub async fn recv(&mut self) -> Option<PeerEvent> {
        self.rx.recv().await
    }

    /// Next event if one is queued
    pub fn try_recv(&mut self) -> Option<PeerEvent> {
        self.rx.try_recv().ok()
    }

    /// Convert into a `Stream`
    #[must_use]
    pub fn into_stream(self) -> UnboundedReceiverStream<PeerEvent> {
        UnboundedReceiverStream::new(self.rx)
    }
}

impl Stream for PeerEvents {
    type Item = PeerEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

struct PeerInner {
    id: String,
    initiator: bool,
    shared: Arc<SharedState>,
    inbox: mpsc::UnboundedSender<Task>,
}

impl Drop for PeerInner {
    fn drop(&mut self) {
        if self.shared.begin_destroy() {
            let _ = self.inbox.send(Task::Command(Command::Destroy(None)));
        }
    }
}

/// Handle to a peer session
///
/// Dropping the last handle destroys the session.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.inner.id)
            .field("initiator", &self.inner.initiator)
            .field("phase", &self.inner.shared.phase())
            .finish()
    }
}

fn random_hex(bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..bytes).map(|_| format!("{:02x}", rng.gen::<u8>())).collect()
}

impl Peer {
    /// Create a builder
    #[must_use]
    pub fn builder() -> PeerBuilder {
        PeerBuilder::new()
    }

    /// Start a session over the given transport
    ///
    /// The initiator creates its data channel and schedules the first offer
    /// right away. Calls made before the session task first runs share its
    /// first tick.
    ///
    /// # Errors
    ///
    /// Currently infallible for a constructed transport; reserved for
    /// construction failures
    pub async fn new(
        config: PeerConfig,
        transport: Arc<dyn RtcTransport>,
    ) -> Result<(Self, PeerEvents)> {
        let mut id = random_hex(4);
        id.truncate(7);

        let channel_name = if config.initiator {
            Some(config.channel_name.clone().unwrap_or_else(|| random_hex(20)))
        } else {
            config.channel_name.clone()
        };
        let initiator = config.initiator;
        let shared = Arc::new(SharedState::new(channel_name));
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let span = tracing::debug_span!("peer", id = %id, initiator);
        let mut session = Session::new(
            id.clone(),
            config,
            transport,
            Arc::clone(&shared),
            inbox_tx.clone(),
            events_tx,
        );
        session.start().instrument(span.clone()).await;
        tokio::spawn(session.run(inbox_rx).instrument(span));

        tracing::debug!(peer = %id, initiator, "new peer");
        let peer = Self {
            inner: Arc::new(PeerInner {
                id,
                initiator,
                shared,
                inbox: inbox_tx,
            }),
        };
        Ok((peer, PeerEvents { rx: events_rx }))
    }

    /// Start a session over a fresh [`crate::WebRtcTransport`]
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::TransportUnavailable`] if the WebRTC stack cannot
    /// be initialised, or [`PeerError::Construction`] if the peer connection
    /// cannot be created
    #[cfg(feature = "webrtc-backend")]
    pub async fn with_webrtc(config: PeerConfig) -> Result<(Self, PeerEvents)> {
        let transport = crate::webrtc_transport::WebRtcTransport::new(&config.rtc_config).await?;
        Self::new(config, Arc::new(transport)).await
    }

    /// Short session id used in logs
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Check if this side creates the offers
    #[must_use]
    pub fn initiator(&self) -> bool {
        self.inner.initiator
    }

    /// Data channel label, once known
    #[must_use]
    pub fn channel_name(&self) -> Option<String> {
        self.inner.shared.channel_name()
    }

    /// Check if the session is connected and its data channel is open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.shared.is_connected()
    }

    /// Check if teardown has completed
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.shared.phase() == Phase::Destroyed
    }

    /// Local endpoint of the selected candidate pair
    #[must_use]
    pub fn address(&self) -> AddressInfo {
        self.inner.shared.local_address()
    }

    /// Remote endpoint of the selected candidate pair
    #[must_use]
    pub fn remote_address(&self) -> AddressInfo {
        self.inner.shared.remote_address()
    }

    // Ok(false) while teardown is pending: the call is silently dropped.
    fn admit(&self, operation: &'static str) -> Result<bool> {
        match self.inner.shared.phase() {
            Phase::Active => Ok(true),
            Phase::Destroying => Ok(false),
            Phase::Destroyed => Err(PeerError::Destroyed { operation }),
        }
    }

    fn post(&self, operation: &'static str, command: Command) -> Result<()> {
        self.inner
            .inbox
            .send(Task::Command(command))
            .map_err(|_| PeerError::Destroyed { operation })
    }

    async fn request<T>(
        &self,
        operation: &'static str,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.post(operation, command(tx))?;
        rx.await
            .map_err(|_| PeerError::Destroyed { operation })?
    }

    /// Feed a signaling message received from the remote peer
    ///
    /// Accepts a [`SignalData`], its JSON text, or a [`SignalMessage`].
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::Destroyed`] if the session is destroyed
    #[tracing::instrument(skip(self, data), fields(peer = %self.inner.id))]
    pub fn signal(&self, data: impl Into<SignalData>) -> Result<()> {
        if !self.admit("signal")? {
            return Ok(());
        }
        self.post("signal", Command::Signal(data.into()))
    }

    /// Send one message on the data channel without backpressure
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::Destroyed`] if the session is destroyed, or
    /// [`PeerError::DataChannel`] if the channel is not open or rejects the
    /// message
    #[tracing::instrument(skip(self, payload), fields(peer = %self.inner.id))]
    pub async fn send(&self, payload: impl Into<ChannelPayload>) -> Result<()> {
        if !self.admit("send")? {
            return Ok(());
        }
        let payload = payload.into();
        self.request("send", move |reply| Command::Send(payload, reply))
            .await
    }

    /// Write to the stream; resolves once the session accepts more data
    ///
    /// Before the session connects the write is held and sent on connect.
    /// Once connected, completion waits while the channel buffers more than
    /// [`crate::MAX_BUFFERED_AMOUNT`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::WriteInProgress`] if an earlier write has not
    /// completed, [`PeerError::WriteAfterEnd`] after [`Peer::end`], or
    /// [`PeerError::Destroyed`] if the session is destroyed before completion
    #[tracing::instrument(skip(self, payload), fields(peer = %self.inner.id))]
    pub async fn write(&self, payload: impl Into<ChannelPayload>) -> Result<()> {
        if !self.admit("write")? {
            return Ok(());
        }
        let payload = payload.into();
        self.request("write", move |reply| Command::Write(payload, reply))
            .await
    }

    /// End the write side; the session is torn down shortly after connecting
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::Destroyed`] if the session is destroyed
    pub fn end(&self) -> Result<()> {
        if !self.admit("end")? {
            return Ok(());
        }
        self.post("end", Command::End)
    }

    /// Start a negotiation cycle
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::Destroyed`] if the session is destroyed
    #[tracing::instrument(skip(self), fields(peer = %self.inner.id))]
    pub fn negotiate(&self) -> Result<()> {
        if !self.admit("negotiate")? {
            return Ok(());
        }
        self.post("negotiate", Command::Negotiate)
    }

    /// Add a transceiver, or ask the initiator to add one
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::Destroyed`] if the session is destroyed
    #[tracing::instrument(skip(self, init), fields(peer = %self.inner.id))]
    pub fn add_transceiver(&self, kind: MediaKind, init: Option<serde_json::Value>) -> Result<()> {
        if !self.admit("addTransceiver")? {
            return Ok(());
        }
        self.post("addTransceiver", Command::AddTransceiver(kind, init))
    }

    /// Remove a sender by track id and renegotiate
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::Destroyed`] if the session is destroyed
    #[tracing::instrument(skip(self, sender_id), fields(peer = %self.inner.id))]
    pub fn remove_sender(&self, sender_id: impl Into<String>) -> Result<()> {
        if !self.admit("removeSender")? {
            return Ok(());
        }
        self.post("removeSender", Command::RemoveSender(sender_id.into()))
    }

    /// Connection statistics, with legacy `values` arrays flattened
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::Destroyed`] if the session is destroyed or
    /// [`PeerError::Stats`] if the transport cannot collect statistics
    pub async fn get_stats(&self) -> Result<Vec<StatsReport>> {
        if !self.admit("getStats")? {
            return Ok(Vec::new());
        }
        self.request("getStats", Command::GetStats).await
    }

    /// Bytes queued on the data channel and not yet sent
    ///
    /// Zero before the channel exists and while teardown is pending.
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::Destroyed`] if the session is destroyed
    pub async fn buffered_amount(&self) -> Result<usize> {
        if !self.admit("bufferedAmount")? {
            return Ok(0);
        }
        self.request("bufferedAmount", Command::BufferedAmount).await
    }

    /// Tear the session down; safe to call any number of times
    ///
    /// With an error, the session reports [`PeerEvent::Error`] before
    /// [`PeerEvent::Close`].
    #[tracing::instrument(skip(self), fields(peer = %self.inner.id))]
    pub fn destroy(&self, err: Option<PeerError>) {
        if self.inner.shared.begin_destroy() {
            let _ = self.inner.inbox.send(Task::Command(Command::Destroy(err)));
        }
    }
}

/// Builder for [`Peer`] sessions
#[derive(Debug, Default)]
pub struct PeerBuilder {
    config: PeerConfig,
}

impl PeerBuilder {
    /// Create a builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    #[must_use]
    pub fn with_config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the initiator flag
    #[must_use]
    pub fn initiator(mut self, initiator: bool) -> Self {
        self.config.initiator = initiator;
        self
    }

    /// Set the data channel label
    #[must_use]
    pub fn channel_name(mut self, name: impl Into<String>) -> Self {
        self.config.channel_name = Some(name.into());
        self
    }

    /// Set data channel parameters
    #[must_use]
    pub fn channel_config(mut self, channel_config: ChannelConfig) -> Self {
        self.config.channel_config = channel_config;
        self
    }

    /// Set the transport configuration
    #[must_use]
    pub fn rtc_config(mut self, rtc_config: RtcConfiguration) -> Self {
        self.config.rtc_config = rtc_config;
        self
    }

    /// Set offer options
    #[must_use]
    pub fn offer_options(mut self, options: OfferOptions) -> Self {
        self.config.offer_options = options;
        self
    }

    /// Set answer options
    #[must_use]
    pub fn answer_options(mut self, options: AnswerOptions) -> Self {
        self.config.answer_options = options;
        self
    }

    /// Rewrite every local SDP before it is committed
    #[must_use]
    pub fn sdp_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(String) -> String + Send + Sync + 'static,
    {
        self.config.sdp_transform = Some(Arc::new(transform));
        self
    }

    /// Enable or disable trickle ICE
    #[must_use]
    pub fn trickle(mut self, trickle: bool) -> Self {
        self.config.trickle = trickle;
        self
    }

    /// Keep the trickle advertisement in SDP when not trickling
    #[must_use]
    pub fn allow_half_trickle(mut self, allow: bool) -> Self {
        self.config.allow_half_trickle = allow;
        self
    }

    /// Set the ICE-complete timeout
    #[must_use]
    pub fn ice_complete_timeout(mut self, timeout: Duration) -> Self {
        self.config.ice_complete_timeout = timeout;
        self
    }

    /// Deliver text messages as text
    #[must_use]
    pub fn object_mode(mut self, object_mode: bool) -> Self {
        self.config.object_mode = object_mode;
        self
    }

    /// Configuration built so far
    #[must_use]
    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    /// Start the session over the given transport
    ///
    /// # Errors
    ///
    /// Returns error if session construction fails
    pub async fn build(self, transport: Arc<dyn RtcTransport>) -> Result<(Peer, PeerEvents)> {
        Peer::new(self.config, transport).await
    }

    /// Start the session over a fresh [`crate::WebRtcTransport`]
    ///
    /// # Errors
    ///
    /// Returns error if the WebRTC stack or peer connection cannot be created
    #[cfg(feature = "webrtc-backend")]
    pub async fn build_webrtc(self) -> Result<(Peer, PeerEvents)> {
        Peer::with_webrtc(self.config).await
    }
}
