//! RTC transport abstraction layer
//!
//! A session never talks to a concrete WebRTC stack. It drives an
//! [`RtcTransport`] (the peer connection) and a [`DataChannel`], and receives
//! their callbacks through a single bound handler each. Two providers ship
//! with the crate: [`crate::loopback::LoopbackTransport`] and, behind the
//! `webrtc-backend` feature, [`crate::webrtc_transport::WebRtcTransport`].

use crate::config::{AnswerOptions, ChannelConfig, OfferOptions};
use crate::error::{TransportError, TransportResult};
use crate::types::{
    ChannelPayload, ChannelState, IceCandidateInit, IceConnectionState, IceGatheringState,
    MediaKind, PeerConnectionState, SessionDescription, SignalingState,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Callback receiving transport or channel events
pub type EventHandler<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Events raised by an [`RtcTransport`]
#[derive(Clone)]
pub enum TransportEvent {
    /// Local candidate discovered; `None` marks the end of gathering
    IceCandidate(Option<IceCandidateInit>),
    /// ICE connectivity state changed
    IceConnectionStateChange(IceConnectionState),
    /// Candidate gathering state changed
    IceGatheringStateChange(IceGatheringState),
    /// Offer/answer state changed
    SignalingStateChange(SignalingState),
    /// Aggregate connection state changed
    ConnectionStateChange(PeerConnectionState),
    /// Remote peer opened a data channel; `None` if the stack delivered no object
    DataChannel(Option<Arc<dyn DataChannel>>),
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IceCandidate(candidate) => f.debug_tuple("IceCandidate").field(candidate).finish(),
            Self::IceConnectionStateChange(state) => {
                f.debug_tuple("IceConnectionStateChange").field(state).finish()
            }
            Self::IceGatheringStateChange(state) => {
                f.debug_tuple("IceGatheringStateChange").field(state).finish()
            }
            Self::SignalingStateChange(state) => {
                f.debug_tuple("SignalingStateChange").field(state).finish()
            }
            Self::ConnectionStateChange(state) => {
                f.debug_tuple("ConnectionStateChange").field(state).finish()
            }
            Self::DataChannel(channel) => f
                .debug_tuple("DataChannel")
                .field(&channel.as_ref().map(|c| c.label()))
                .finish(),
        }
    }
}

/// Events raised by a [`DataChannel`]
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Channel opened
    Open,
    /// Message received
    Message(ChannelPayload),
    /// Buffered amount fell to or below the low threshold
    BufferedAmountLow,
    /// Channel closed
    Close,
    /// Channel failure
    Error(TransportError),
}

/// Peer connection capability consumed by a session
#[async_trait]
pub trait RtcTransport: Send + Sync {
    /// Create an offer
    ///
    /// # Errors
    ///
    /// Returns error if the offer cannot be generated
    async fn create_offer(&self, options: &OfferOptions) -> TransportResult<SessionDescription>;

    /// Create an answer to the applied remote offer
    ///
    /// # Errors
    ///
    /// Returns error if the answer cannot be generated
    async fn create_answer(&self, options: &AnswerOptions) -> TransportResult<SessionDescription>;

    /// Commit a local description
    ///
    /// # Errors
    ///
    /// Returns error if the description is rejected
    async fn set_local_description(&self, description: SessionDescription) -> TransportResult<()>;

    /// Commit a remote description
    ///
    /// # Errors
    ///
    /// Returns error if the description is rejected
    async fn set_remote_description(&self, description: SessionDescription)
        -> TransportResult<()>;

    /// Committed local description, which may differ from the one passed in
    async fn local_description(&self) -> Option<SessionDescription>;

    /// Apply a remote candidate
    ///
    /// # Errors
    ///
    /// Returns error if the candidate is rejected
    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> TransportResult<()>;

    /// Create a data channel
    ///
    /// Returns `Ok(None)` if the stack produced no channel object.
    ///
    /// # Errors
    ///
    /// Returns error if channel creation fails
    async fn create_data_channel(
        &self,
        label: &str,
        config: &ChannelConfig,
    ) -> TransportResult<Option<Arc<dyn DataChannel>>>;

    /// Add a transceiver of the given kind
    ///
    /// # Errors
    ///
    /// Returns error if the transceiver cannot be added
    async fn add_transceiver(
        &self,
        kind: MediaKind,
        _init: Option<serde_json::Value>,
    ) -> TransportResult<()> {
        Err(TransportError::Unsupported(format!("add_transceiver({kind})")))
    }

    /// Remove a sender by track id
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotStable`] if removal must wait for the next
    /// stable signaling state, or another error if removal fails
    async fn remove_sender(&self, sender_id: &str) -> TransportResult<()> {
        Err(TransportError::Unsupported(format!("remove_sender({sender_id})")))
    }

    /// Raw statistics reports
    ///
    /// # Errors
    ///
    /// Returns error if statistics cannot be collected
    async fn get_stats(&self) -> TransportResult<Vec<serde_json::Value>>;

    /// Close the peer connection
    ///
    /// # Errors
    ///
    /// Returns error if closing fails
    async fn close(&self) -> TransportResult<()>;

    /// Install the event handler, replacing any previous one
    fn bind(&self, handler: EventHandler<TransportEvent>);

    /// Drop the event handler; later events are discarded
    fn unbind(&self);
}

/// Data channel capability consumed by a session
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Channel label
    fn label(&self) -> String;

    /// Current ready state
    fn ready_state(&self) -> ChannelState;

    /// Bytes queued for sending
    async fn buffered_amount(&self) -> usize;

    /// Set the low-water mark for [`ChannelEvent::BufferedAmountLow`]
    ///
    /// Returns `false` if the channel never raises that event.
    async fn set_buffered_amount_low_threshold(&self, threshold: usize) -> bool;

    /// Send a message
    ///
    /// # Errors
    ///
    /// Returns error if the channel is not open or sending fails
    async fn send(&self, payload: ChannelPayload) -> TransportResult<()>;

    /// Close the channel
    ///
    /// # Errors
    ///
    /// Returns error if closing fails
    async fn close(&self) -> TransportResult<()>;

    /// Install the event handler, replacing any previous one
    fn bind(&self, handler: EventHandler<ChannelEvent>);

    /// Drop the event handler; later events are discarded
    fn unbind(&self);
}

enum SlotState<E> {
    Pending(Vec<E>),
    Bound(EventHandler<E>),
    Closed,
}

/// Callback slot for transport implementations
///
/// Events raised before a handler is bound are queued and replayed on bind.
/// After [`HandlerSlot::unbind`] every event is discarded. Handlers run under
/// the slot lock and must not emit on the same slot.
pub struct HandlerSlot<E> {
    state: Mutex<SlotState<E>>,
}

impl<E> HandlerSlot<E> {
    /// Create an unbound slot
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending(Vec::new())),
        }
    }

    /// Install a handler and replay the backlog
    pub fn bind(&self, handler: EventHandler<E>) {
        let mut state = self.state.lock();
        if let SlotState::Pending(backlog) = &mut *state {
            for event in backlog.drain(..) {
                handler(event);
            }
        }
        *state = SlotState::Bound(handler);
    }

    /// Drop the handler and discard everything from now on
    pub fn unbind(&self) {
        *self.state.lock() = SlotState::Closed;
    }

    /// Deliver or queue an event
    pub fn emit(&self, event: E) {
        let mut state = self.state.lock();
        match &mut *state {
            SlotState::Pending(backlog) => backlog.push(event),
            SlotState::Bound(handler) => handler(event),
            SlotState::Closed => {}
        }
    }

    /// Check if a handler is installed
    #[must_use]
    pub fn is_bound(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Bound(_))
    }
}

impl<E> Default for HandlerSlot<E> {
    fn default() -> Self {
        Self::new()
    }
}
